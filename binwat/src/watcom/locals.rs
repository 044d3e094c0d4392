//! Per-module local symbol records.
//!
//! Every record starts with its own total length (including the length byte)
//! and a tag byte; the tag selects one of three families: variables, code
//! scopes (blocks and routines), and base-address changes. All variants
//! except the block/scope/base ones end in a symbol name that occupies the
//! remaining bytes of the record.


use from_to_repr::from_to_other;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorInt};
use crate::error::Error;
use crate::watcom::location::Location;


#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum LocalEntryKind {
    Module = 0x10,
    Local = 0x11,
    Module386 = 0x12,
    ModuleLoc = 0x13,

    Block = 0x20,
    NearRoutine = 0x21,
    FarRoutine = 0x22,
    Block386 = 0x23,
    NearRoutine386 = 0x24,
    FarRoutine386 = 0x25,
    MemberScope = 0x26,

    AddPrevSeg = 0x30,
    SetBase = 0x31,
    SetBase386 = 0x32,

    Other(u8),
}
impl LocalEntryKind {
    /// Whether records of this kind end in a trailing symbol name.
    ///
    /// Scope and base-change records carry no name; everything else,
    /// including unrecognized kinds, runs its name to the end of the record.
    fn has_name(&self) -> bool {
        !matches!(
            self,
            Self::Block | Self::Block386 | Self::MemberScope
                | Self::AddPrevSeg | Self::SetBase | Self::SetBase386,
        )
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum LocalEntryData {
    Module(ModuleVariable),
    Local(LocalVariable),
    Module386(Module386Variable),
    ModuleLoc(LocalVariable),

    Block(BlockScope<u16>),
    NearRoutine(Routine<u16>),
    FarRoutine(Routine<u16>),
    Block386(BlockScope<u32>),
    NearRoutine386(Routine<u32>),
    FarRoutine386(Routine<u32>),
    MemberScope(MemberScope),

    AddPrevSeg(AddPrevSeg),
    SetBase(SetBase),
    SetBase386(SetBase386),

    Other, // nothing decodable without knowing the layout
}
impl LocalEntryData {
    fn read(cursor: &mut Cursor<'_>, kind: LocalEntryKind) -> Result<Self, Error> {
        match kind {
            LocalEntryKind::Module => {
                let data = ModuleVariable::read(cursor)?;
                Ok(Self::Module(data))
            },
            LocalEntryKind::Local => {
                let data = LocalVariable::read(cursor)?;
                Ok(Self::Local(data))
            },
            LocalEntryKind::Module386 => {
                let data = Module386Variable::read(cursor)?;
                Ok(Self::Module386(data))
            },
            LocalEntryKind::ModuleLoc => {
                let data = LocalVariable::read(cursor)?;
                Ok(Self::ModuleLoc(data))
            },
            LocalEntryKind::Block => {
                let data = BlockScope::read(cursor)?;
                Ok(Self::Block(data))
            },
            LocalEntryKind::NearRoutine => {
                let data = Routine::read(cursor)?;
                Ok(Self::NearRoutine(data))
            },
            LocalEntryKind::FarRoutine => {
                let data = Routine::read(cursor)?;
                Ok(Self::FarRoutine(data))
            },
            LocalEntryKind::Block386 => {
                let data = BlockScope::read(cursor)?;
                Ok(Self::Block386(data))
            },
            LocalEntryKind::NearRoutine386 => {
                let data = Routine::read(cursor)?;
                Ok(Self::NearRoutine386(data))
            },
            LocalEntryKind::FarRoutine386 => {
                let data = Routine::read(cursor)?;
                Ok(Self::FarRoutine386(data))
            },
            LocalEntryKind::MemberScope => {
                let data = MemberScope::read(cursor)?;
                Ok(Self::MemberScope(data))
            },
            LocalEntryKind::AddPrevSeg => {
                let data = AddPrevSeg::read(cursor)?;
                Ok(Self::AddPrevSeg(data))
            },
            LocalEntryKind::SetBase => {
                let data = SetBase::read(cursor)?;
                Ok(Self::SetBase(data))
            },
            LocalEntryKind::SetBase386 => {
                let data = SetBase386::read(cursor)?;
                Ok(Self::SetBase386(data))
            },
            LocalEntryKind::Other(_) => Ok(Self::Other),
        }
    }
}

/// A module-scope variable at a fixed offset.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ModuleVariable {
    pub location: u32,
    pub type_index: u16,
}
impl ModuleVariable {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let location = cursor.read_u32_le()?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            location,
            type_index,
        })
    }
}

/// A variable whose storage is described by a location expression.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct LocalVariable {
    pub location: Location,
    pub type_index: u16,
}
impl LocalVariable {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let location = Location::read(cursor)?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            location,
            type_index,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Module386Variable {
    pub location: u32,
    pub segment: u16,
    pub type_index: u16,
}
impl Module386Variable {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let location = cursor.read_u32_le()?;
        let segment = cursor.read_u16_le()?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            location,
            segment,
            type_index,
        })
    }
}

/// A lexical block; `O` is `u16` for 16-bit code and `u32` for 386 code.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct BlockScope<O> {
    pub start_offset: O,
    pub size: O,
    pub parent_block_offset: u16,
}
impl<O: CursorInt> BlockScope<O> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let start_offset = O::read_le(cursor)?;
        let size = O::read_le(cursor)?;
        let parent_block_offset = cursor.read_u16_le()?;
        Ok(Self {
            start_offset,
            size,
            parent_block_offset,
        })
    }
}

/// A routine: a block plus prologue/epilogue data, the return value's
/// location and the locations of register-passed parameters.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Routine<O> {
    pub start_offset: O,
    pub size: O,
    pub parent_block_offset: u16,
    pub prologue_size: u8,
    pub epilogue_size: u8,
    pub return_address_offset: O,
    pub type_index: u16,
    pub return_value_location: Location,
    pub register_params: Vec<Location>,
}
impl<O: CursorInt> Routine<O> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let start_offset = O::read_le(cursor)?;
        let size = O::read_le(cursor)?;
        let parent_block_offset = cursor.read_u16_le()?;
        let prologue_size = cursor.read_u8()?;
        let epilogue_size = cursor.read_u8()?;
        let return_address_offset = O::read_le(cursor)?;
        let type_index = cursor.read_index()?;
        let return_value_location = Location::read(cursor)?;

        let register_param_count = cursor.read_u8()?;
        let mut register_params = Vec::with_capacity(register_param_count.into());
        for _ in 0..register_param_count {
            register_params.push(Location::read(cursor)?);
        }

        Ok(Self {
            start_offset,
            size,
            parent_block_offset,
            prologue_size,
            epilogue_size,
            return_address_offset,
            type_index,
            return_value_location,
            register_params,
        })
    }
}

/// C++ member scope record.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct MemberScope {
    pub parent_block_offset: u16,
    pub class_type_index: u16,
}
impl MemberScope {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let parent_block_offset = cursor.read_u16_le()?;
        let class_type_index = cursor.read_index()?;
        Ok(Self {
            parent_block_offset,
            class_type_index,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct AddPrevSeg {
    pub segment_increase: u16,
}
impl AddPrevSeg {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let segment_increase = cursor.read_u16_le()?;
        Ok(Self {
            segment_increase,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SetBase {
    pub location: u32,
}
impl SetBase {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let location = cursor.read_u32_le()?;
        Ok(Self {
            location,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SetBase386 {
    pub location: u32,
    pub segment: u16,
}
impl SetBase386 {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let location = cursor.read_u32_le()?;
        let segment = cursor.read_u16_le()?;
        Ok(Self {
            location,
            segment,
        })
    }
}

/// One local symbol record.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct LocalEntry {
    /// Total encoded length, including this length byte itself.
    pub len: u8,
    pub kind: LocalEntryKind, // u8
    pub data: LocalEntryData,
    /// Trailing symbol name; occupies the rest of the record, no terminator.
    pub name: Option<String>,
}
impl LocalEntry {
    /// Reads one record from a cursor spanning exactly that record
    /// (including the leading length byte).
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let len = cursor.read_u8()?;
        let type_code = cursor.read_u8()?;
        let kind = LocalEntryKind::from_base_type(type_code);

        let data = LocalEntryData::read(cursor, kind)?;
        let name = if kind.has_name() {
            Some(cursor.read_string_to_end())
        } else {
            None
        };

        Ok(Self {
            len,
            kind,
            data,
            name,
        })
    }
}

/// Reads all records of one demand-table block.
///
/// Each record announces its own length; the record slice starts at (and
/// includes) the length byte.
pub fn read_local_entries(block: &mut Cursor<'_>) -> Result<Vec<LocalEntry>, Error> {
    let mut entries = Vec::new();
    while !block.at_end() {
        let len = block.peek_u8()?;
        let mut record = block.sub_cursor(len.into(), "local symbol record")?;
        entries.push(LocalEntry::read(&mut record)?);
    }
    Ok(entries)
}


#[cfg(test)]
mod tests {
    use super::{
        LocalEntry, LocalEntryData, LocalEntryKind, read_local_entries,
    };
    use crate::cursor::Cursor;
    use crate::error::Error;
    use crate::watcom::location::{LocationStep, Register};

    fn read_entry(data: &[u8]) -> LocalEntry {
        let mut cursor = Cursor::new(data, "test");
        LocalEntry::read(&mut cursor).unwrap()
    }

    #[test]
    fn test_module_variable() {
        let entry = read_entry(&[
            0x0C, 0x10, // len, MODULE
            0x44, 0x33, 0x22, 0x11, // location
            0x05, // type index (short form)
            b'c', b'o', b'u', b'n', b't',
        ]);
        assert_eq!(entry.len, 0x0C);
        assert_eq!(entry.kind, LocalEntryKind::Module);
        match &entry.data {
            LocalEntryData::Module(data) => {
                assert_eq!(data.location, 0x1122_3344);
                assert_eq!(data.type_index, 5);
            },
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(entry.name.as_deref(), Some("count"));
    }

    #[test]
    fn test_local_variable_with_location_expression() {
        let entry = read_entry(&[
            0x08, 0x11, // len, LOCAL
            0x82, 0x10, 0xFC, // location: BP-4
            0x81, 0x23, // type index (long form): 0x123
            b'i',
        ]);
        assert_eq!(entry.kind, LocalEntryKind::Local);
        match &entry.data {
            LocalEntryData::Local(data) => {
                assert_eq!(data.location.steps, vec![LocationStep::BpOffsetByte { offset: -4 }]);
                assert_eq!(data.type_index, 0x0123);
            },
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(entry.name.as_deref(), Some("i"));
    }

    #[test]
    fn test_block_has_no_name() {
        let entry = read_entry(&[
            0x08, 0x20, // len, BLOCK
            0x10, 0x00, // start offset
            0x40, 0x00, // size
            0x00, 0x00, // parent block offset
        ]);
        assert_eq!(entry.kind, LocalEntryKind::Block);
        match &entry.data {
            LocalEntryData::Block(data) => {
                assert_eq!(data.start_offset, 0x0010);
                assert_eq!(data.size, 0x0040);
                assert_eq!(data.parent_block_offset, 0);
            },
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(entry.name, None);
    }

    #[test]
    fn test_near_routine_386() {
        let entry = read_entry(&[
            0x1E, 0x24, // len, NEAR_RTN_386
            0x00, 0x01, 0x00, 0x00, // start offset
            0x80, 0x00, 0x00, 0x00, // size
            0x00, 0x00, // parent block offset
            0x05, // prologue size
            0x03, // epilogue size
            0x10, 0x01, 0x00, 0x00, // return address offset
            0x07, // type index
            0x81, 0x41, // return value location: REG AH
            0x02, // two register params
            0x81, 0x48, // REG AX
            0x81, 0x4B, // REG DX
            b'm', b'a', b'i', b'n',
        ]);
        assert_eq!(entry.kind, LocalEntryKind::NearRoutine386);
        match &entry.data {
            LocalEntryData::NearRoutine386(routine) => {
                assert_eq!(routine.start_offset, 0x100);
                assert_eq!(routine.size, 0x80);
                assert_eq!(routine.prologue_size, 5);
                assert_eq!(routine.epilogue_size, 3);
                assert_eq!(routine.return_address_offset, 0x110);
                assert_eq!(routine.type_index, 7);
                assert_eq!(
                    routine.return_value_location.steps,
                    vec![LocationStep::Reg { register: Register::Ah }],
                );
                assert_eq!(routine.register_params.len(), 2);
                assert_eq!(
                    routine.register_params[1].steps,
                    vec![LocationStep::Reg { register: Register::Dx }],
                );
            },
            other => panic!("unexpected data {:?}", other),
        }
        assert_eq!(entry.name.as_deref(), Some("main"));
    }

    #[test]
    fn test_unknown_kind_still_reads_name() {
        let entry = read_entry(&[0x06, 0x7F, b'w', b'a', b't', b'?']);
        assert_eq!(entry.kind, LocalEntryKind::Other(0x7F));
        assert_eq!(entry.data, LocalEntryData::Other);
        assert_eq!(entry.name.as_deref(), Some("wat?"));
    }

    #[test]
    fn test_record_field_beyond_slice_is_truncated() {
        // MODULE needs a 4-byte location but the record is 3 bytes long
        let mut cursor = Cursor::new(&[0x03, 0x10, 0x01], "test");
        let mut record = cursor.sub_cursor(3, "local symbol record").unwrap();
        let error = LocalEntry::read(&mut record).unwrap_err();
        assert!(matches!(error, Error::Truncated { .. }));
    }

    #[test]
    fn test_block_of_records() {
        // two SET_BASE records of 6 bytes each
        let data = [
            0x06, 0x31, 0x00, 0x10, 0x00, 0x00,
            0x06, 0x31, 0x00, 0x20, 0x00, 0x00,
        ];
        let mut block = Cursor::new(&data, "test");
        let entries = read_local_entries(&mut block).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LocalEntryKind::SetBase);
        match &entries[1].data {
            LocalEntryData::SetBase(data) => assert_eq!(data.location, 0x2000),
            other => panic!("unexpected data {:?}", other),
        }
    }
}
