//! Debug information in the Watcom format.
//!
//! Watcom compilers append their debugging information to the end of the
//! executable: a master header sits in the file's last 14 bytes and declares
//! how many bytes of debugging data precede it. Most of the structures here
//! have been derived from the contents of
//! https://open-watcom.github.io/open-watcom-v2-wikidocs/wddoc.html.


pub mod locals;
pub mod location;
pub mod types;


use bitflags::bitflags;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::cursor::Cursor;
use crate::error::Error;
use crate::watcom::locals::{LocalEntry, read_local_entries};
use crate::watcom::types::{TypeEntry, read_type_entries};


pub const MASTER_DEBUG_HEADER_SIZE: usize = 14;


/// The fixed record in the last 14 bytes of the file.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct MasterDebugHeader {
    pub signature: [u8; 2],
    pub exe_major_version: u8,
    pub exe_minor_version: u8,
    pub obj_major_version: u8,
    pub obj_minor_version: u8,
    pub lang_size: u16,
    pub segment_size: u16,
    /// The debugging region is the last `debug_size` bytes of the file,
    /// master header included.
    pub debug_size: u32,
}
impl MasterDebugHeader {
    pub fn read(file: &[u8]) -> Result<Self, Error> {
        let offset = file.len().checked_sub(MASTER_DEBUG_HEADER_SIZE)
            .ok_or(Error::Truncated {
                offset: 0,
                needed: MASTER_DEBUG_HEADER_SIZE,
                available: file.len(),
                context: "master debug header",
            })?;
        let mut cursor = Cursor::over(file, offset, MASTER_DEBUG_HEADER_SIZE, "master debug header")?;

        let signature = [cursor.read_u8()?, cursor.read_u8()?];
        let exe_major_version = cursor.read_u8()?;
        let exe_minor_version = cursor.read_u8()?;
        let obj_major_version = cursor.read_u8()?;
        let obj_minor_version = cursor.read_u8()?;
        let lang_size = cursor.read_u16_le()?;
        let segment_size = cursor.read_u16_le()?;
        let debug_size = cursor.read_u32_le()?;

        Ok(Self {
            signature,
            exe_major_version,
            exe_minor_version,
            obj_major_version,
            obj_minor_version,
            lang_size,
            segment_size,
            debug_size,
        })
    }
}

/// The per-section header; one section per overlay, and overlays are not
/// supported, so exactly one of these is decoded.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SectionDebugHeader {
    /// Where the header itself sits within the debugging region; the table
    /// offsets below are relative to this base.
    pub offset: u32,
    pub module_offset: u32,
    pub global_offset: u32,
    pub address_offset: u32,
    pub section_size: u32,
    pub section_id: u16,
}
impl SectionDebugHeader {
    fn read(region: &[u8], offset: usize) -> Result<Self, Error> {
        let mut cursor = Cursor::over(region, offset, 18, "section debug header")?;

        let module_offset = cursor.read_u32_le()?;
        let global_offset = cursor.read_u32_le()?;
        let address_offset = cursor.read_u32_le()?;
        let section_size = cursor.read_u32_le()?;
        let section_id = cursor.read_u16_le()?;

        if module_offset > global_offset
                || global_offset > address_offset
                || address_offset > section_size {
            return Err(Error::Structural {
                offset,
                context: "section debug header with decreasing table offsets",
            });
        }

        Ok(Self {
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
            module_offset,
            global_offset,
            address_offset,
            section_size,
            section_id,
        })
    }
}

/// One row of the module table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct ModuleInfo {
    /// Position in the module table, assigned by enumeration order.
    pub module_index: u32,
    pub language: u16,
    pub locals_offset: u32,
    pub locals_num_entries: u16,
    pub types_offset: u32,
    pub types_num_entries: u16,
    pub lines_offset: u32,
    pub lines_num_entries: u16,
    pub name: String,
}
impl ModuleInfo {
    fn read(cursor: &mut Cursor<'_>, module_index: u32) -> Result<Self, Error> {
        let language = cursor.read_u16_le()?;
        let locals_offset = cursor.read_u32_le()?;
        let locals_num_entries = cursor.read_u16_le()?;
        let types_offset = cursor.read_u32_le()?;
        let types_num_entries = cursor.read_u16_le()?;
        let lines_offset = cursor.read_u32_le()?;
        let lines_num_entries = cursor.read_u16_le()?;
        let name = cursor.read_pascal_string()?;

        Ok(Self {
            module_index,
            language,
            locals_offset,
            locals_num_entries,
            types_offset,
            types_num_entries,
            lines_offset,
            lines_num_entries,
            name,
        })
    }
}

bitflags! {
    /// The kind byte of a global symbol table entry.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
    #[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
    pub struct GlobalSymbolKind : u8 {
        const STATIC = 0b0000_0001;
        const DATA = 0b0000_0010;
        const CODE = 0b0000_0100;
    }
}

/// One entry of the global symbol table.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct GlobalSymbol {
    pub address_offset: u32,
    pub address_segment: u16,
    pub module_index: u16,
    pub kind: GlobalSymbolKind, // u8, unknown bits retained
    pub name: String,
}
impl GlobalSymbol {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let address_offset = cursor.read_u32_le()?;
        let address_segment = cursor.read_u16_le()?;
        let module_index = cursor.read_u16_le()?;
        let kind = GlobalSymbolKind::from_bits_retain(cursor.read_u8()?);
        let name = cursor.read_pascal_string()?;

        Ok(Self {
            address_offset,
            address_segment,
            module_index,
            kind,
            name,
        })
    }
}

/// One run of a segment's address table.
///
/// `address` is not stored in the file; it is the segment base plus the
/// sizes of all preceding entries within the same segment.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct AddressInfo {
    pub address: u32,
    pub size: u32,
    pub module_index: u16,
}

/// One segment of the address table with its run-length entry list.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SegmentInfo {
    pub address: u32,
    pub segment: u16,
    pub address_info: Vec<AddressInfo>,
}
impl SegmentInfo {
    fn read(cursor: &mut Cursor<'_>) -> Result<Self, Error> {
        let address = cursor.read_u32_le()?;
        let segment = cursor.read_u16_le()?;
        let address_info_count = cursor.read_u16_le()?;

        let mut address_info = Vec::with_capacity(address_info_count.into());
        let mut running_address = address;
        for _ in 0..address_info_count {
            let size = cursor.read_u32_le()?;
            let module_index = cursor.read_u16_le()?;
            address_info.push(AddressInfo {
                address: running_address,
                size,
                module_index,
            });
            running_address = running_address.wrapping_add(size);
        }

        Ok(Self {
            address,
            segment,
            address_info,
        })
    }
}

/// Which module a demand-table block belongs to and where it came from.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct DemandTableMeta {
    pub module_index: u32,
    pub module_name: String,
    /// Block offset relative to the section header base.
    pub offset: u32,
    pub len: u32,
}

/// One decoded demand-table block.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct DemandTable<T> {
    pub meta: DemandTableMeta,
    pub entries: Vec<T>,
}

/// Walks one module's demand-table index array and decodes each block.
///
/// The index array holds `num_entries + 1` 32-bit offsets relative to the
/// section base; consecutive offsets delimit one block each. The first
/// offset read is only a start marker: blocks are emitted once a previous
/// non-zero offset exists.
fn walk_demand_table<'a, T, F>(
    region: &'a [u8],
    section: &SectionDebugHeader,
    module: &ModuleInfo,
    table_offset: u32,
    num_entries: u16,
    context: &'static str,
    mut read_block: F,
) -> Result<Vec<DemandTable<T>>, Error>
where
    F: FnMut(&mut Cursor<'a>) -> Result<Vec<T>, Error>,
{
    if num_entries == 0 {
        return Ok(Vec::new());
    }

    let index_offset = section.offset as usize + table_offset as usize;
    let index_length = (usize::from(num_entries) + 1) * 4;
    let mut index_cursor = Cursor::over(region, index_offset, index_length, context)?;

    let mut tables = Vec::new();
    let mut last_index = 0u32;
    while !index_cursor.at_end() {
        let index = index_cursor.read_u32_le()?;
        if last_index != 0 {
            let len = index.checked_sub(last_index)
                .ok_or(Error::Structural {
                    offset: index_cursor.offset(),
                    context: "demand table with decreasing block offsets",
                })?;
            let block_offset = section.offset as usize + last_index as usize;
            let mut block = Cursor::over(region, block_offset, len as usize, context)?;
            let entries = read_block(&mut block)?;
            tables.push(DemandTable {
                meta: DemandTableMeta {
                    module_index: module.module_index,
                    module_name: module.name.clone(),
                    offset: last_index,
                    len,
                },
                entries,
            });
        }
        last_index = index;
    }

    Ok(tables)
}

/// Everything decoded from the debugging region.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct DebuggingRegion {
    pub languages: Vec<String>,
    pub segments: Vec<u16>,
    pub section_headers: Vec<SectionDebugHeader>,
    pub modules: Vec<ModuleInfo>,
    pub module_locals: Vec<DemandTable<LocalEntry>>,
    pub module_types: Vec<DemandTable<TypeEntry>>,
    pub global_symbols: Vec<GlobalSymbol>,
    pub address_table: Vec<SegmentInfo>,
}
impl DebuggingRegion {
    #[instrument(skip_all)]
    fn parse(master_header: &MasterDebugHeader, region: &[u8]) -> Result<Self, Error> {
        let lang_size = usize::from(master_header.lang_size);
        let segment_size = usize::from(master_header.segment_size);

        let languages = Cursor::over(region, 0, lang_size, "language list")?
            .read_string_array();
        let segments = Cursor::over(region, lang_size, segment_size, "segment list")?
            .read_u16_le_array()?;

        // overlays are unsupported; exactly one section header is decoded
        let section = SectionDebugHeader::read(region, lang_size + segment_size)?;

        let module_table_offset = section.offset as usize + section.module_offset as usize;
        let module_table_length = (section.global_offset - section.module_offset) as usize;
        let mut module_cursor = Cursor::over(
            region,
            module_table_offset,
            module_table_length,
            "module table",
        )?;
        let mut modules = Vec::new();
        while !module_cursor.at_end() {
            let module_index = u32::try_from(modules.len()).unwrap_or(u32::MAX);
            modules.push(ModuleInfo::read(&mut module_cursor, module_index)?);
        }
        debug!("decoded {} modules", modules.len());

        let mut module_locals = Vec::new();
        let mut module_types = Vec::new();
        for module in &modules {
            let locals = walk_demand_table(
                region,
                &section,
                module,
                module.locals_offset,
                module.locals_num_entries,
                "local symbols demand table",
                read_local_entries,
            )?;
            module_locals.extend(locals);

            // sequence numbers start over at 1 for every module and run
            // across all of its blocks
            let mut next_type_index = 1u32;
            let types = walk_demand_table(
                region,
                &section,
                module,
                module.types_offset,
                module.types_num_entries,
                "types demand table",
                |block| read_type_entries(block, &mut next_type_index),
            )?;
            module_types.extend(types);
        }

        let global_table_offset = section.offset as usize + section.global_offset as usize;
        let global_table_length = (section.address_offset - section.global_offset) as usize;
        let mut global_cursor = Cursor::over(
            region,
            global_table_offset,
            global_table_length,
            "global symbol table",
        )?;
        let mut global_symbols = Vec::new();
        while !global_cursor.at_end() {
            global_symbols.push(GlobalSymbol::read(&mut global_cursor)?);
        }

        let address_table_offset = section.offset as usize + section.address_offset as usize;
        let address_table_length = (section.section_size - section.address_offset) as usize;
        let mut address_cursor = Cursor::over(
            region,
            address_table_offset,
            address_table_length,
            "address table",
        )?;
        let mut address_table = Vec::new();
        while !address_cursor.at_end() {
            address_table.push(SegmentInfo::read(&mut address_cursor)?);
        }

        Ok(Self {
            languages,
            segments,
            section_headers: vec![section],
            modules,
            module_locals,
            module_types,
            global_symbols,
            address_table,
        })
    }
}

/// The fully decoded debug information of one file.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct WatcomDebugInfo {
    pub master_header: MasterDebugHeader,
    pub debugging_region: DebuggingRegion,
}
impl WatcomDebugInfo {
    /// Decodes the debugging region of a fully loaded executable/object
    /// file. No I/O happens here; the caller supplies the file contents.
    #[instrument(skip_all)]
    pub fn parse(file: &[u8]) -> Result<Self, Error> {
        let master_header = MasterDebugHeader::read(file)?;
        debug!(
            "signature {:?}, debugging region of {} bytes",
            master_header.signature, master_header.debug_size,
        );

        let debug_size = master_header.debug_size as usize;
        if debug_size > file.len() {
            return Err(Error::Structural {
                offset: file.len() - MASTER_DEBUG_HEADER_SIZE,
                context: "master debug header declaring a region larger than the file",
            });
        }
        let region = &file[file.len() - debug_size..];

        let debugging_region = DebuggingRegion::parse(&master_header, region)?;
        Ok(Self {
            master_header,
            debugging_region,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::{
        GlobalSymbol, GlobalSymbolKind, ModuleInfo, SectionDebugHeader, SegmentInfo,
        WatcomDebugInfo, walk_demand_table,
    };
    use crate::cursor::Cursor;
    use crate::error::Error;

    fn push_u16(bytes: &mut Vec<u8>, value: u16) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn push_u32(bytes: &mut Vec<u8>, value: u32) {
        bytes.extend_from_slice(&value.to_le_bytes());
    }

    fn test_module(name: &str) -> ModuleInfo {
        ModuleInfo {
            module_index: 0,
            language: 0,
            locals_offset: 0,
            locals_num_entries: 0,
            types_offset: 0,
            types_num_entries: 0,
            lines_offset: 0,
            lines_num_entries: 0,
            name: name.to_owned(),
        }
    }

    fn test_section(section_size: u32) -> SectionDebugHeader {
        SectionDebugHeader {
            offset: 0,
            module_offset: 0,
            global_offset: 0,
            address_offset: 0,
            section_size,
            section_id: 0,
        }
    }

    #[test]
    fn test_walker_first_offset_is_a_sentinel() {
        // index array [100, 140, 180] at the start of the region
        let mut region = vec![0u8; 200];
        region[0..4].copy_from_slice(&100u32.to_le_bytes());
        region[4..8].copy_from_slice(&140u32.to_le_bytes());
        region[8..12].copy_from_slice(&180u32.to_le_bytes());

        let section = test_section(200);
        let module = test_module("a");

        let tables = walk_demand_table(
            &region,
            &section,
            &module,
            0,
            2,
            "test",
            |block: &mut Cursor<'_>| Ok(vec![block.remaining()]),
        ).unwrap();

        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].meta.offset, 100);
        assert_eq!(tables[0].meta.len, 40);
        assert_eq!(tables[0].entries, vec![40]);
        assert_eq!(tables[1].meta.offset, 140);
        assert_eq!(tables[1].meta.len, 40);
    }

    #[test]
    fn test_walker_zero_entries_short_circuits() {
        // no index array exists at all; the walker must not touch the region
        let region = [0u8; 0];
        let section = test_section(0);
        let module = test_module("a");

        let tables = walk_demand_table(
            &region,
            &section,
            &module,
            0,
            0,
            "test",
            |_block: &mut Cursor<'_>| -> Result<Vec<()>, Error> { panic!("no blocks expected") },
        ).unwrap();
        assert!(tables.is_empty());
    }

    #[test]
    fn test_walker_decreasing_offsets_are_structural() {
        let mut region = vec![0u8; 64];
        region[0..4].copy_from_slice(&32u32.to_le_bytes());
        region[4..8].copy_from_slice(&16u32.to_le_bytes());

        let section = test_section(64);
        let module = test_module("a");

        let error = walk_demand_table(
            &region,
            &section,
            &module,
            0,
            1,
            "test",
            |_block: &mut Cursor<'_>| -> Result<Vec<()>, Error> { panic!("no blocks expected") },
        ).unwrap_err();
        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_global_symbol_kind_bits() {
        let data = [
            0x00, 0x10, 0x00, 0x00, // address offset
            0x01, 0x00, // address segment
            0x02, 0x00, // module index
            0b0000_0101, // static + code
            0x04, b'm', b'a', b'i', b'n',
        ];
        let mut cursor = Cursor::new(&data, "test");
        let symbol = GlobalSymbol::read(&mut cursor).unwrap();
        assert_eq!(symbol.address_offset, 0x1000);
        assert!(symbol.kind.contains(GlobalSymbolKind::STATIC));
        assert!(!symbol.kind.contains(GlobalSymbolKind::DATA));
        assert!(symbol.kind.contains(GlobalSymbolKind::CODE));
        assert_eq!(symbol.name, "main");
    }

    #[test]
    fn test_address_table_running_address() {
        let mut data = Vec::new();
        push_u32(&mut data, 0x1000); // segment base address
        push_u16(&mut data, 0x0001); // segment
        push_u16(&mut data, 3); // entry count
        push_u32(&mut data, 0x40);
        push_u16(&mut data, 0);
        push_u32(&mut data, 0x10);
        push_u16(&mut data, 1);
        push_u32(&mut data, 0x20);
        push_u16(&mut data, 2);

        let mut cursor = Cursor::new(&data, "test");
        let segment = SegmentInfo::read(&mut cursor).unwrap();
        assert_eq!(segment.address, 0x1000);
        assert_eq!(segment.address_info.len(), 3);
        assert_eq!(segment.address_info[0].address, 0x1000);
        assert_eq!(segment.address_info[1].address, 0x1040);
        assert_eq!(segment.address_info[2].address, 0x1050);
        assert_eq!(segment.address_info[2].module_index, 2);
    }

    /// Builds the smallest structurally complete file: one section, one
    /// module without locals/types, empty global and address tables.
    fn minimal_synthetic_file() -> Vec<u8> {
        let mut region = Vec::new();

        // language list (2 bytes) and segment list (2 bytes)
        region.extend_from_slice(b"C\x00");
        push_u16(&mut region, 0x0001);

        // section header at region offset 4
        let module_offset = 18u32; // right after this header
        let module_record_len = 22u32;
        let global_offset = module_offset + module_record_len;
        push_u32(&mut region, module_offset);
        push_u32(&mut region, global_offset);
        push_u32(&mut region, global_offset); // empty global table
        push_u32(&mut region, global_offset); // empty address table
        push_u16(&mut region, 0); // section id

        // one module record, no locals/types/lines
        push_u16(&mut region, 0x0001); // language
        push_u32(&mut region, 0);
        push_u16(&mut region, 0);
        push_u32(&mut region, 0);
        push_u16(&mut region, 0);
        push_u32(&mut region, 0);
        push_u16(&mut region, 0);
        region.push(1);
        region.push(b'm');

        // master header at the very end; the region size includes it
        let debug_size = u32::try_from(region.len() + 14).unwrap();
        let mut file = region;
        file.extend_from_slice(b"\x8B\x00"); // signature
        file.extend_from_slice(&[3, 0, 1, 0]); // versions
        push_u16(&mut file, 2); // lang size
        push_u16(&mut file, 2); // segment size
        push_u32(&mut file, debug_size);
        file
    }

    #[test]
    fn test_minimal_file_decodes() {
        let file = minimal_synthetic_file();
        let info = WatcomDebugInfo::parse(&file).unwrap();

        assert_eq!(info.master_header.lang_size, 2);
        assert_eq!(info.master_header.debug_size as usize, file.len());
        assert_eq!(info.debugging_region.languages, vec!["C".to_owned()]);
        assert_eq!(info.debugging_region.segments, vec![0x0001]);
        assert_eq!(info.debugging_region.section_headers.len(), 1);
        assert_eq!(info.debugging_region.modules.len(), 1);
        assert_eq!(info.debugging_region.modules[0].name, "m");
        assert_eq!(info.debugging_region.modules[0].module_index, 0);
        assert!(info.debugging_region.module_locals.is_empty());
        assert!(info.debugging_region.module_types.is_empty());
        assert!(info.debugging_region.global_symbols.is_empty());
        assert!(info.debugging_region.address_table.is_empty());
    }

    #[test]
    fn test_declared_region_larger_than_file() {
        let mut file = minimal_synthetic_file();
        let len = file.len();
        file[len - 4..].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        let error = WatcomDebugInfo::parse(&file).unwrap_err();
        assert!(matches!(error, Error::Structural { .. }));
    }

    #[test]
    fn test_file_too_short_for_master_header() {
        let error = WatcomDebugInfo::parse(&[0u8; 5]).unwrap_err();
        assert!(matches!(error, Error::Truncated { .. }));
    }
}
