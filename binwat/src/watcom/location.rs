//! The location expression "stack machine".
//!
//! A variable's run-time storage location is encoded as a length-prefixed
//! sequence of postfix operations: push a BP-relative offset, push a register
//! or a constant address, dereference, add, and so on. The debugger composes
//! the decoded steps to find the variable; this decoder only makes the
//! sequence explicit.


use from_to_repr::from_to_other;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cursor::Cursor;
use crate::error::Error;


/// The x86 register numbering used by location expressions.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum Register {
    Al = 0,
    Ah = 1,
    Bl = 2,
    Bh = 3,
    Cl = 4,
    Ch = 5,
    Dl = 6,
    Dh = 7,
    Ax = 8,
    Bx = 9,
    Cx = 10,
    Dx = 11,
    Si = 12,
    Di = 13,
    Bp = 14,
    Sp = 15,
    Cs = 16,
    Ss = 17,
    Ds = 18,
    Es = 19,
    St0 = 20,
    St1 = 21,
    St2 = 22,
    St3 = 23,
    St4 = 24,
    St5 = 25,
    St6 = 26,
    St7 = 27,
    Eax = 28,
    Ebx = 29,
    Ecx = 30,
    Edx = 31,
    Esi = 32,
    Edi = 33,
    Ebp = 34,
    Esp = 35,
    Fs = 36,
    Gs = 37,
    Other(u8),
}

/// One decoded operation of a location expression.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum LocationStep {
    BpOffsetByte { offset: i32 },
    BpOffsetWord { offset: i32 },
    BpOffsetDword { offset: i32 },
    ConstAddr286 { address: u32 },
    ConstAddr386 { address: u32, segment: u16 },
    ConstInt1 { value: u32 },
    ConstInt2 { value: u32 },
    ConstInt3 { value: u32 },
    MultiReg { registers: Vec<Register> },
    Reg { register: Register },
    IndRegCallocNear { register: Register },
    IndRegCallocFar { register: Register, register2: Register },
    IndRegRallocNear { register: Register },
    IndRegRallocFar { register: Register, register2: Register },
    OperatorInd2,
    OperatorInd4,
    OperatorAddress286,
    OperatorAddress386,
    OperatorZeb,
    OperatorZew,
    OperatorMkFp,
    OperatorPop,
    OperatorXchg { stack: u8 },
    OperatorAdd,
    OperatorDup,
    OperatorNop,
    Unknown { opcode: u8 },
}
impl LocationStep {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let opcode = cursor.read_u8()?;
        let step = match opcode {
            0x10 => Self::BpOffsetByte { offset: cursor.read_s8()? },
            0x11 => Self::BpOffsetWord { offset: cursor.read_s16_le()? },
            0x12 => Self::BpOffsetDword { offset: cursor.read_s32_le()? },
            0x20 => Self::ConstAddr286 { address: cursor.read_u32_le()? },
            0x21 => Self::ConstAddr386 {
                address: cursor.read_u32_le()?,
                segment: cursor.read_u16_le()?,
            },
            0x22 => Self::ConstInt1 { value: cursor.read_u8()?.into() },
            0x23 => Self::ConstInt2 { value: cursor.read_u16_le()?.into() },
            0x24 => Self::ConstInt3 { value: cursor.read_u32_le()? },
            0x50 => Self::IndRegCallocNear { register: Register::from_base_type(cursor.read_u8()?) },
            0x51 => Self::IndRegCallocFar {
                register: Register::from_base_type(cursor.read_u8()?),
                register2: Register::from_base_type(cursor.read_u8()?),
            },
            0x52 => Self::IndRegRallocNear { register: Register::from_base_type(cursor.read_u8()?) },
            0x53 => Self::IndRegRallocFar {
                register: Register::from_base_type(cursor.read_u8()?),
                register2: Register::from_base_type(cursor.read_u8()?),
            },
            0x60 => Self::OperatorInd2,
            0x61 => Self::OperatorInd4,
            0x62 => Self::OperatorAddress286,
            0x63 => Self::OperatorAddress386,
            0x64 => Self::OperatorZeb,
            0x65 => Self::OperatorZew,
            0x66 => Self::OperatorMkFp,
            0x67 => Self::OperatorPop,
            0x68 => Self::OperatorXchg { stack: cursor.read_u8()? },
            0x69 => Self::OperatorAdd,
            0x6A => Self::OperatorDup,
            0x6B => Self::OperatorNop,
            // the low nibble is part of the operand for these two classes
            b if b & 0xF0 == 0x30 => {
                let register_count = 1 + usize::from(b & 0x0F);
                let mut registers = Vec::with_capacity(register_count);
                for _ in 0..register_count {
                    registers.push(Register::from_base_type(cursor.read_u8()?));
                }
                Self::MultiReg { registers }
            },
            b if b & 0xF0 == 0x40 => Self::Reg {
                register: Register::from_base_type(b & 0x0F),
            },
            other => Self::Unknown { opcode: other },
        };
        Ok(step)
    }
}

/// A full location expression: the ordered steps of one stack-machine block.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Location {
    pub steps: Vec<LocationStep>,
}
impl Location {
    /// Reads a length-prefixed location block from the middle of a record.
    ///
    /// A header byte below 0x80 is itself the whole block (a one-byte
    /// operator, not consumed as a header); otherwise the header is consumed
    /// and the block spans the next `header - 0x80` bytes. Steps never read
    /// past the block boundary.
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let header = cursor.peek_u8()?;
        let length = if header < 0x80 {
            1
        } else {
            cursor.read_u8()?;
            usize::from(header - 0x80)
        };

        let mut block = cursor.sub_cursor(length, "location expression")?;
        let mut steps = Vec::new();
        while !block.at_end() {
            steps.push(LocationStep::read(&mut block)?);
        }
        Ok(Self {
            steps,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::{Location, LocationStep, Register};
    use crate::cursor::Cursor;
    use crate::error::Error;

    fn read_location(data: &[u8]) -> Location {
        let mut cursor = Cursor::new(data, "test");
        Location::read(&mut cursor).unwrap()
    }

    #[test]
    fn test_single_byte_operator_block() {
        // 0x67 < 0x80: the byte is the whole block, an operand-less POP
        let location = read_location(&[0x67]);
        assert_eq!(location.steps, vec![LocationStep::OperatorPop]);
    }

    #[test]
    fn test_register_step() {
        // header 0x81: one block byte follows
        let location = read_location(&[0x81, 0x40]);
        assert_eq!(location.steps, vec![LocationStep::Reg { register: Register::Al }]);
    }

    #[test]
    fn test_register_low_nibble_selects_register() {
        let location = read_location(&[0x81, 0x4E]);
        assert_eq!(location.steps, vec![LocationStep::Reg { register: Register::Bp }]);
    }

    #[test]
    fn test_bp_offset_byte_is_sign_extended() {
        let location = read_location(&[0x82, 0x10, 0xFE]);
        assert_eq!(location.steps, vec![LocationStep::BpOffsetByte { offset: -2 }]);
    }

    #[test]
    fn test_bp_offset_word() {
        let location = read_location(&[0x83, 0x11, 0xFC, 0xFF]);
        assert_eq!(location.steps, vec![LocationStep::BpOffsetWord { offset: -4 }]);
    }

    #[test]
    fn test_multi_reg_counts_from_low_nibble() {
        // 0x31: two register bytes follow
        let location = read_location(&[0x83, 0x31, 0x0B, 0x08]);
        assert_eq!(
            location.steps,
            vec![LocationStep::MultiReg { registers: vec![Register::Dx, Register::Ax] }],
        );
    }

    #[test]
    fn test_const_addr_386() {
        let location = read_location(&[0x87, 0x21, 0x78, 0x56, 0x34, 0x12, 0x0F, 0x00]);
        assert_eq!(
            location.steps,
            vec![LocationStep::ConstAddr386 { address: 0x1234_5678, segment: 0x000F }],
        );
    }

    #[test]
    fn test_several_steps_in_one_block() {
        let location = read_location(&[0x84, 0x41, 0x10, 0x04, 0x69]);
        assert_eq!(
            location.steps,
            vec![
                LocationStep::Reg { register: Register::Ah },
                LocationStep::BpOffsetByte { offset: 4 },
                LocationStep::OperatorAdd,
            ],
        );
    }

    #[test]
    fn test_unknown_opcode_consumes_no_operands() {
        let location = read_location(&[0x82, 0x7F, 0x67]);
        assert_eq!(
            location.steps,
            vec![LocationStep::Unknown { opcode: 0x7F }, LocationStep::OperatorPop],
        );
    }

    #[test]
    fn test_operand_crossing_block_boundary_is_truncated() {
        // BP_OFFSET_WORD needs two operand bytes but the block only has one
        let mut cursor = Cursor::new(&[0x82, 0x11, 0x01, 0x67], "test");
        let error = Location::read(&mut cursor).unwrap_err();
        assert!(matches!(error, Error::Truncated { .. }));
    }

    #[test]
    fn test_empty_block() {
        let mut cursor = Cursor::new(&[0x80, 0xAA], "test");
        let location = Location::read(&mut cursor).unwrap();
        assert!(location.steps.is_empty());
        // only the header byte is consumed
        assert_eq!(cursor.position(), 1);
    }
}
