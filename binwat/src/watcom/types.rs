//! Per-module type records.
//!
//! The high nibble of the tag byte selects a category (scalar names, arrays,
//! subranges, pointers, enumerations, structures, procedures, character
//! blocks); the full byte selects the record layout. Enumeration and
//! structure members are encoded as separate records that follow their list
//! header and are folded back into it during decoding, so the resulting
//! entry list contains the list headers with their members attached.


use from_to_repr::from_to_other;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::cursor::{Cursor, CursorInt};
use crate::error::Error;


#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum TypeCategory {
    TypeName = 0x1,
    Array = 0x2,
    Subrange = 0x3,
    Pointer = 0x4,
    Enumerated = 0x5,
    Structure = 0x6,
    Procedure = 0x7,
    CharacterBlock = 0x8,
    Other(u8),
}

#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum TypeKind {
    Scalar = 0x10,
    Scope = 0x11,
    Name = 0x12,
    CueTable = 0x13,
    Eof = 0x14,

    ArrayByteIndex = 0x20,
    ArrayWordIndex = 0x21,
    ArrayLongIndex = 0x22,
    ArrayTypeIndex = 0x23,
    ArrayDescIndex = 0x24,
    ArrayDescIndex386 = 0x25,

    SubrangeByte = 0x30,
    SubrangeWord = 0x31,
    SubrangeLong = 0x32,

    PointerNear = 0x40,
    PointerFar = 0x41,
    PointerHuge = 0x42,
    PointerNearDeref = 0x43,
    PointerFarDeref = 0x44,
    PointerHugeDeref = 0x45,
    PointerNear386 = 0x46,
    PointerFar386 = 0x47,
    PointerNear386Deref = 0x48,
    PointerFar386Deref = 0x49,

    EnumeratedList = 0x50,
    EnumeratedConstByte = 0x51,
    EnumeratedConstWord = 0x52,
    EnumeratedConstLong = 0x53,

    StructureList = 0x60,
    StructureFieldByte = 0x61,
    StructureFieldWord = 0x62,
    StructureFieldLong = 0x63,
    StructureBitByte = 0x64,
    StructureBitWord = 0x65,
    StructureBitLong = 0x66,
    StructureFieldClass = 0x67,
    StructureBitClass = 0x68,
    StructureInheritClass = 0x69,

    ProcedureNear = 0x70,
    ProcedureFar = 0x71,
    ProcedureNear386 = 0x72,
    ProcedureFar386 = 0x73,
    ProcedureExtParms = 0x75,

    Other(u8),
}
impl TypeKind {
    fn is_enum_member(&self) -> bool {
        matches!(
            self,
            Self::EnumeratedConstByte | Self::EnumeratedConstWord | Self::EnumeratedConstLong,
        )
    }

    fn is_structure_member(&self) -> bool {
        matches!(
            self,
            Self::StructureFieldByte | Self::StructureFieldWord | Self::StructureFieldLong
                | Self::StructureBitByte | Self::StructureBitWord | Self::StructureBitLong,
        )
    }

    /// Class-member records whose layout is undecoded; they are neither
    /// numbered nor kept in the entry list.
    fn is_class_member(&self) -> bool {
        matches!(
            self,
            Self::StructureFieldClass | Self::StructureBitClass | Self::StructureInheritClass,
        )
    }
}

/// Whether records of this category/kind end in a trailing name.
fn has_name(category: TypeCategory, kind: TypeKind) -> bool {
    let nameless_category = matches!(
        category,
        TypeCategory::Array | TypeCategory::Subrange | TypeCategory::Pointer
            | TypeCategory::Procedure | TypeCategory::CharacterBlock,
    );
    let nameless_kind = matches!(
        kind,
        TypeKind::Eof | TypeKind::CueTable
            | TypeKind::StructureList | TypeKind::StructureInheritClass,
    );
    !nameless_category && !nameless_kind
}

/// The interpretation class of a scalar type byte's high bits.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[from_to_other(base_type = u8, derive_compare = "as_int")]
pub enum ScalarClass {
    Int = 0b000,
    Unsigned = 0b001,
    Float = 0b010,
    Void = 0b011,
    Complex = 0b100,
    Other(u8),
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ScalarType {
    pub raw: u8,
    pub size_bytes: u8, // (raw & 0x0F) + 1
    pub class: ScalarClass, // (raw >> 4) & 0b111
}
impl ScalarType {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let raw = cursor.read_u8()?;
        Ok(Self {
            raw,
            size_bytes: (raw & 0x0F) + 1,
            class: ScalarClass::from_base_type((raw >> 4) & 0b111),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct NameType {
    pub scope: u16,
    pub type_index: u16,
}
impl NameType {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let scope = cursor.read_index()?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            scope,
            type_index,
        })
    }
}

/// Array indexed by an inline upper bound; `B` is the bound's width.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ArrayIndex<B> {
    pub high_bound: B,
    pub base_type: u16,
}
impl<B: CursorInt> ArrayIndex<B> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let high_bound = B::read_le(cursor)?;
        let base_type = cursor.read_index()?;
        Ok(Self {
            high_bound,
            base_type,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ArrayTypeIndex {
    pub index_type: u16,
    pub base_type: u16,
}
impl ArrayTypeIndex {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let index_type = cursor.read_index()?;
        let base_type = cursor.read_index()?;
        Ok(Self {
            index_type,
            base_type,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ArrayDescIndex {
    pub scalar_type: u8,
    pub scalar_type2: u8,
    pub bounds: u32,
    pub bounds_segment: Option<u16>, // 386 variant only
    pub base_type: u16,
}
impl ArrayDescIndex {
    fn read(cursor: &mut Cursor<'_>, with_segment: bool) -> Result<Self, Error> {
        let scalar_type = cursor.read_u8()?;
        let scalar_type2 = cursor.read_u8()?;
        let bounds = cursor.read_u32_le()?;
        let bounds_segment = if with_segment {
            Some(cursor.read_u16_le()?)
        } else {
            None
        };
        let base_type = cursor.read_index()?;
        Ok(Self {
            scalar_type,
            scalar_type2,
            bounds,
            bounds_segment,
            base_type,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Subrange<B> {
    pub low_bound: B,
    pub high_bound: B,
    pub base_type: u16,
}
impl<B: CursorInt> Subrange<B> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let low_bound = B::read_le(cursor)?;
        let high_bound = B::read_le(cursor)?;
        let base_type = cursor.read_index()?;
        Ok(Self {
            low_bound,
            high_bound,
            base_type,
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Pointer {
    pub base_type: u16,
    /// Trailing locator string, surfaced only when non-empty.
    pub base_locator: Option<String>,
}
impl Pointer {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let base_type = cursor.read_index()?;
        let locator = cursor.read_string_to_end();
        let base_locator = if locator.is_empty() {
            None
        } else {
            Some(locator)
        };
        Ok(Self {
            base_type,
            base_locator,
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct EnumeratedList {
    pub number_of_fields: u16,
    pub scalar_type: u8,
    /// Copies of the ENUMERATED_CONST_* records following this header;
    /// the originals stay in the entry list with their own numbers.
    pub fields: Vec<TypeEntry>,
}
impl EnumeratedList {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let number_of_fields = cursor.read_u16_le()?;
        let scalar_type = cursor.read_u8()?;
        Ok(Self {
            number_of_fields,
            scalar_type,
            fields: Vec::new(),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct EnumeratedConst<V> {
    pub value: V,
}
impl<V: CursorInt> EnumeratedConst<V> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let value = V::read_le(cursor)?;
        Ok(Self {
            value,
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct StructureList {
    pub number_of_fields: u16,
    pub size: u32,
    /// The STRUCTURE_FIELD_*/STRUCTURE_BIT_* records following this header.
    pub fields: Vec<TypeEntry>,
}
impl StructureList {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let number_of_fields = cursor.read_u16_le()?;
        let size = cursor.read_u32_le()?;
        Ok(Self {
            number_of_fields,
            size,
            fields: Vec::new(),
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct StructureField<O> {
    pub offset: O,
    pub type_index: u16,
}
impl<O: CursorInt> StructureField<O> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let offset = O::read_le(cursor)?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            offset,
            type_index,
        })
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct StructureBitField<O> {
    pub offset: O,
    pub start_bit: u8,
    pub bit_size: u8,
    pub type_index: u16,
}
impl<O: CursorInt> StructureBitField<O> {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let offset = O::read_le(cursor)?;
        let start_bit = cursor.read_u8()?;
        let bit_size = cursor.read_u8()?;
        let type_index = cursor.read_index()?;
        Ok(Self {
            offset,
            start_bit,
            bit_size,
            type_index,
        })
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct Procedure {
    pub return_type: u16,
    pub param_types: Vec<u16>,
}
impl Procedure {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let return_type = cursor.read_index()?;
        let param_count = cursor.read_u8()?;
        let mut param_types = Vec::with_capacity(param_count.into());
        for _ in 0..param_count {
            param_types.push(cursor.read_index()?);
        }
        Ok(Self {
            return_type,
            param_types,
        })
    }

    /// EXT_PARMS layout: no count prefix, parameter indices to end of record.
    fn read_ext_parms(cursor: &mut Cursor<'_>) -> Result<Vec<u16>, Error> {
        let mut param_types = Vec::new();
        while !cursor.at_end() {
            param_types.push(cursor.read_index()?);
        }
        Ok(param_types)
    }
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum TypeEntryData {
    Scalar(ScalarType),
    Scope,
    Name(NameType),
    CueTable { table_offset: u32 },
    Eof,

    ArrayByteIndex(ArrayIndex<u8>),
    ArrayWordIndex(ArrayIndex<u16>),
    ArrayLongIndex(ArrayIndex<u32>),
    ArrayTypeIndex(ArrayTypeIndex),
    ArrayDescIndex(ArrayDescIndex),

    SubrangeByte(Subrange<u8>),
    SubrangeWord(Subrange<u16>),
    SubrangeLong(Subrange<u32>),

    Pointer(Pointer),

    EnumeratedList(EnumeratedList),
    EnumeratedConstByte(EnumeratedConst<u8>),
    EnumeratedConstWord(EnumeratedConst<u16>),
    EnumeratedConstLong(EnumeratedConst<u32>),

    StructureList(StructureList),
    StructureFieldByte(StructureField<u8>),
    StructureFieldWord(StructureField<u16>),
    StructureFieldLong(StructureField<u32>),
    StructureBitByte(StructureBitField<u8>),
    StructureBitWord(StructureBitField<u16>),
    StructureBitLong(StructureBitField<u32>),
    StructureFieldClass,
    StructureBitClass,
    StructureInheritClass,

    Procedure(Procedure),
    ProcedureExtParms { param_types: Vec<u16> },

    Other,
}
impl TypeEntryData {
    fn read(cursor: &mut Cursor<'_>, kind: TypeKind, category: TypeCategory) -> Result<Self, Error> {
        match kind {
            TypeKind::Scalar => {
                let data = ScalarType::read(cursor)?;
                Ok(Self::Scalar(data))
            },
            TypeKind::Scope => Ok(Self::Scope),
            TypeKind::Name => {
                let data = NameType::read(cursor)?;
                Ok(Self::Name(data))
            },
            TypeKind::CueTable => {
                let table_offset = cursor.read_u32_le()?;
                Ok(Self::CueTable { table_offset })
            },
            TypeKind::Eof => Ok(Self::Eof),
            TypeKind::ArrayByteIndex => {
                let data = ArrayIndex::read(cursor)?;
                Ok(Self::ArrayByteIndex(data))
            },
            TypeKind::ArrayWordIndex => {
                let data = ArrayIndex::read(cursor)?;
                Ok(Self::ArrayWordIndex(data))
            },
            TypeKind::ArrayLongIndex => {
                let data = ArrayIndex::read(cursor)?;
                Ok(Self::ArrayLongIndex(data))
            },
            TypeKind::ArrayTypeIndex => {
                let data = ArrayTypeIndex::read(cursor)?;
                Ok(Self::ArrayTypeIndex(data))
            },
            TypeKind::ArrayDescIndex => {
                let data = ArrayDescIndex::read(cursor, false)?;
                Ok(Self::ArrayDescIndex(data))
            },
            TypeKind::ArrayDescIndex386 => {
                let data = ArrayDescIndex::read(cursor, true)?;
                Ok(Self::ArrayDescIndex(data))
            },
            TypeKind::SubrangeByte => {
                let data = Subrange::read(cursor)?;
                Ok(Self::SubrangeByte(data))
            },
            TypeKind::SubrangeWord => {
                let data = Subrange::read(cursor)?;
                Ok(Self::SubrangeWord(data))
            },
            TypeKind::SubrangeLong => {
                let data = Subrange::read(cursor)?;
                Ok(Self::SubrangeLong(data))
            },
            TypeKind::PointerNear | TypeKind::PointerFar | TypeKind::PointerHuge
                | TypeKind::PointerNearDeref | TypeKind::PointerFarDeref
                | TypeKind::PointerHugeDeref | TypeKind::PointerNear386
                | TypeKind::PointerFar386 | TypeKind::PointerNear386Deref
                | TypeKind::PointerFar386Deref => {
                let data = Pointer::read(cursor)?;
                Ok(Self::Pointer(data))
            },
            TypeKind::EnumeratedList => {
                let data = EnumeratedList::read(cursor)?;
                Ok(Self::EnumeratedList(data))
            },
            TypeKind::EnumeratedConstByte => {
                let data = EnumeratedConst::read(cursor)?;
                Ok(Self::EnumeratedConstByte(data))
            },
            TypeKind::EnumeratedConstWord => {
                let data = EnumeratedConst::read(cursor)?;
                Ok(Self::EnumeratedConstWord(data))
            },
            TypeKind::EnumeratedConstLong => {
                let data = EnumeratedConst::read(cursor)?;
                Ok(Self::EnumeratedConstLong(data))
            },
            TypeKind::StructureList => {
                let data = StructureList::read(cursor)?;
                Ok(Self::StructureList(data))
            },
            TypeKind::StructureFieldByte => {
                let data = StructureField::read(cursor)?;
                Ok(Self::StructureFieldByte(data))
            },
            TypeKind::StructureFieldWord => {
                let data = StructureField::read(cursor)?;
                Ok(Self::StructureFieldWord(data))
            },
            TypeKind::StructureFieldLong => {
                let data = StructureField::read(cursor)?;
                Ok(Self::StructureFieldLong(data))
            },
            TypeKind::StructureBitByte => {
                let data = StructureBitField::read(cursor)?;
                Ok(Self::StructureBitByte(data))
            },
            TypeKind::StructureBitWord => {
                let data = StructureBitField::read(cursor)?;
                Ok(Self::StructureBitWord(data))
            },
            TypeKind::StructureBitLong => {
                let data = StructureBitField::read(cursor)?;
                Ok(Self::StructureBitLong(data))
            },
            TypeKind::StructureFieldClass => Ok(Self::StructureFieldClass),
            TypeKind::StructureBitClass => Ok(Self::StructureBitClass),
            TypeKind::StructureInheritClass => Ok(Self::StructureInheritClass),
            TypeKind::ProcedureNear | TypeKind::ProcedureFar
                | TypeKind::ProcedureNear386 | TypeKind::ProcedureFar386 => {
                let data = Procedure::read(cursor)?;
                Ok(Self::Procedure(data))
            },
            TypeKind::ProcedureExtParms => {
                let param_types = Procedure::read_ext_parms(cursor)?;
                Ok(Self::ProcedureExtParms { param_types })
            },
            TypeKind::Other(_) => {
                // unlisted pointer layouts still follow the category's shape
                if matches!(category, TypeCategory::Pointer) {
                    let data = Pointer::read(cursor)?;
                    Ok(Self::Pointer(data))
                } else {
                    Ok(Self::Other)
                }
            },
        }
    }
}

/// One type record, with list members folded in.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct TypeEntry {
    /// 1-based sequence number within the module's type table. Structure
    /// field records folded into a list header carry none, and neither does
    /// CUE_TABLE even though it stays in the entry list.
    pub self_index: Option<u32>,
    /// Total encoded length, including this length byte itself.
    pub len: u8,
    pub category: TypeCategory, // high nibble of the tag
    pub kind: TypeKind, // u8
    pub data: TypeEntryData,
    pub name: Option<String>,
}
impl TypeEntry {
    /// Reads one record from a cursor spanning exactly that record
    /// (including the leading length byte).
    pub fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let len = cursor.read_u8()?;
        let type_code = cursor.read_u8()?;
        let category = TypeCategory::from_base_type(type_code >> 4);
        let kind = TypeKind::from_base_type(type_code);

        let data = TypeEntryData::read(cursor, kind, category)?;
        let name = if has_name(category, kind) {
            Some(cursor.read_string_to_end())
        } else {
            None
        };

        Ok(Self {
            self_index: None,
            len,
            category,
            kind,
            data,
            name,
        })
    }
}

/// Reads all records of one demand-table block.
///
/// `next_index` is the module's running sequence counter; it advances by the
/// number of entries appended to the output. Enumerated constants stay in
/// the output (numbered) and are additionally mirrored into the preceding
/// list header; structure fields are folded into their header only, so they
/// do not consume a number. An unnumbered CUE_TABLE entry does.
pub fn read_type_entries(block: &mut Cursor<'_>, next_index: &mut u32) -> Result<Vec<TypeEntry>, Error> {
    let mut entries: Vec<TypeEntry> = Vec::new();
    let mut last_enum: Option<usize> = None;
    let mut last_struct: Option<usize> = None;
    let mut running = *next_index;

    while !block.at_end() {
        let len = block.peek_u8()?;
        if len == 0 {
            break;
        }
        let mut record = block.sub_cursor(len.into(), "type record")?;
        let record_offset = record.offset();
        let mut entry = TypeEntry::read(&mut record)?;

        if entry.kind.is_enum_member() {
            entry.self_index = Some(running);
            running += 1;
            // a const with no preceding header simply stays top-level
            if let Some(header_index) = last_enum {
                match &mut entries[header_index].data {
                    TypeEntryData::EnumeratedList(list) => list.fields.push(entry.clone()),
                    _ => return Err(Error::Structural {
                        offset: record_offset,
                        context: "enumerated constant whose list header is not a list",
                    }),
                }
            }
            entries.push(entry);
        } else if entry.kind.is_structure_member() {
            let header_index = last_struct
                .ok_or(Error::Structural {
                    offset: record_offset,
                    context: "structure field without a preceding list header",
                })?;
            match &mut entries[header_index].data {
                TypeEntryData::StructureList(list) => list.fields.push(entry),
                _ => return Err(Error::Structural {
                    offset: record_offset,
                    context: "structure field whose list header is not a list",
                }),
            }
        } else if entry.kind.is_class_member() {
            // layout undecoded; dropped from the output entirely
        } else if matches!(entry.kind, TypeKind::CueTable) {
            entries.push(entry);
        } else {
            entry.self_index = Some(running);
            running += 1;
            if matches!(entry.kind, TypeKind::EnumeratedList) {
                last_enum = Some(entries.len());
            } else if matches!(entry.kind, TypeKind::StructureList) {
                last_struct = Some(entries.len());
            }
            entries.push(entry);
        }
    }

    *next_index += u32::try_from(entries.len()).unwrap_or(u32::MAX);
    Ok(entries)
}
