use std::collections::BTreeMap;
use std::collections::HashMap;

use num_enum::TryFromPrimitive;

use super::charset::{decode_opt, Encoding};
use super::error::TpsError;
use super::record::Record;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum FieldType {
    Byte = 0x1,
    Short = 0x2,
    UShort = 0x3,
    Date = 0x4,
    Time = 0x5,
    Long = 0x6,
    ULong = 0x7,
    Float = 0x8,
    Double = 0x9,
    Decimal = 0xA,
    String = 0x12,
    CString = 0x13,
    PString = 0x14,
    Picture = 0x15,
    Group = 0x16,
}

#[derive(Debug, Clone)]
pub struct FieldDescriptor {
    pub field_type: FieldType,
    pub offset: u16,
    pub name: Vec<u8>,
    pub array_element_count: u16,
    pub size: u16,
    pub overlaps: bool,
    pub number: u16,
    /// STRING/CSTRING/PSTRING/PICTURE only.
    pub array_element_size: Option<u16>,
    pub template: Option<u16>,
    /// DECIMAL only.
    pub decimal_count: Option<u8>,
    pub decimal_size: Option<u8>,
}

impl FieldDescriptor {
    pub fn name_str(&self, encoding: Option<Encoding>) -> String {
        decode_opt(&self.name, encoding)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoType {
    Memo,
    Blob,
}

#[derive(Debug, Clone)]
pub struct MemoDescriptor {
    pub external_filename: Vec<u8>,
    pub name: Vec<u8>,
    pub size: u16,
    pub memo_type: MemoType,
    pub binary: bool,
    pub reserved: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexType {
    Key,
    Index,
    DynamicIndex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    pub external_filename: Vec<u8>,
    pub name: Vec<u8>,
    pub index_type: IndexType,
    pub nocase: bool,
    pub opt: bool,
    pub dup: bool,
    pub fields: Vec<(u16, FieldOrder)>,
}

#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub min_version_driver: u16,
    pub record_size: u16,
    pub fields: Vec<FieldDescriptor>,
    pub memos: Vec<MemoDescriptor>,
    pub indexes: Vec<IndexDescriptor>,
}

fn read_u16(buf: &[u8], pos: &mut usize) -> Result<u16, TpsError> {
    let s = buf
        .get(*pos..*pos + 2)
        .ok_or_else(|| TpsError::Corrupt("table definition truncated (u16)".into()))?;
    *pos += 2;
    Ok(u16::from_le_bytes(s.try_into().unwrap()))
}

fn read_u8(buf: &[u8], pos: &mut usize) -> Result<u8, TpsError> {
    let b = *buf
        .get(*pos)
        .ok_or_else(|| TpsError::Corrupt("table definition truncated (u8)".into()))?;
    *pos += 1;
    Ok(b)
}

fn read_cstring(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, TpsError> {
    let start = *pos;
    let end = buf[start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| TpsError::Corrupt("unterminated string in table definition".into()))?;
    let s = buf[start..start + end].to_vec();
    *pos = start + end + 1;
    Ok(s)
}

impl TableDefinition {
    pub fn parse(buf: &[u8]) -> Result<TableDefinition, TpsError> {
        let mut pos = 0usize;
        let min_version_driver = read_u16(buf, &mut pos)?;
        let record_size = read_u16(buf, &mut pos)?;
        let field_count = read_u16(buf, &mut pos)?;
        let memo_count = read_u16(buf, &mut pos)?;
        let index_count = read_u16(buf, &mut pos)?;

        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            fields.push(Self::parse_field(buf, &mut pos)?);
        }

        let mut memos = Vec::with_capacity(memo_count as usize);
        for _ in 0..memo_count {
            memos.push(Self::parse_memo(buf, &mut pos)?);
        }

        let mut indexes = Vec::with_capacity(index_count as usize);
        for _ in 0..index_count {
            indexes.push(Self::parse_index(buf, &mut pos)?);
        }

        Ok(TableDefinition { min_version_driver, record_size, fields, memos, indexes })
    }

    fn parse_field(buf: &[u8], pos: &mut usize) -> Result<FieldDescriptor, TpsError> {
        let type_tag = read_u8(buf, pos)?;
        let field_type = FieldType::try_from_primitive(type_tag)
            .map_err(|_| TpsError::UnsupportedField(format!("unknown field type tag {type_tag:#x}")))?;
        let offset = read_u16(buf, pos)?;
        let name = read_cstring(buf, pos)?;
        let array_element_count = read_u16(buf, pos)?;
        let size = read_u16(buf, pos)?;
        let overlaps = read_u16(buf, pos)? != 0;
        let number = read_u16(buf, pos)?;

        let (array_element_size, template) = match field_type {
            FieldType::String | FieldType::CString | FieldType::PString | FieldType::Picture => {
                (Some(read_u16(buf, pos)?), Some(read_u16(buf, pos)?))
            }
            _ => (None, None),
        };

        let (decimal_count, decimal_size) = match field_type {
            FieldType::Decimal => (Some(read_u8(buf, pos)?), Some(read_u8(buf, pos)?)),
            _ => (None, None),
        };

        Ok(FieldDescriptor {
            field_type,
            offset,
            name,
            array_element_count,
            size,
            overlaps,
            number,
            array_element_size,
            template,
            decimal_count,
            decimal_size,
        })
    }

    fn parse_memo(buf: &[u8], pos: &mut usize) -> Result<MemoDescriptor, TpsError> {
        let external_filename = read_cstring(buf, pos)?;
        if external_filename.is_empty() {
            read_u8(buf, pos)?; // inline marker byte
        }
        let name = read_cstring(buf, pos)?;
        let size = read_u16(buf, pos)?;
        let flags = read_u16(buf, pos)?;

        // Packed as a big-endian bitfield over the first flags byte:
        // [5 bits pad][memo_type: 1][binary: 1][reserved: 1], second byte
        // all padding. `flags` is little-endian, so the first byte is the
        // low 8 bits, and bit 2/1/0 of that byte carry the three flags.
        let memo_type = if flags & 0x4 != 0 { MemoType::Blob } else { MemoType::Memo };
        let binary = flags & 0x2 != 0;
        let reserved = flags & 0x1 != 0;

        Ok(MemoDescriptor { external_filename, name, size, memo_type, binary, reserved })
    }

    fn parse_index(buf: &[u8], pos: &mut usize) -> Result<IndexDescriptor, TpsError> {
        let external_filename = read_cstring(buf, pos)?;
        if external_filename.is_empty() {
            read_u8(buf, pos)?; // inline marker byte
        }
        let name = read_cstring(buf, pos)?;
        let flags = read_u8(buf, pos)?;

        // Packed as a big-endian bitfield over the byte: [1 pad][type: 2]
        // [2 pad][NOCASE: 1][OPT: 1][DUP: 1] (bit 7 down to bit 0).
        let index_type = match (flags >> 5) & 0x3 {
            0 => IndexType::Key,
            1 => IndexType::Index,
            _ => IndexType::DynamicIndex,
        };
        let nocase = flags & 0x4 != 0;
        let opt = flags & 0x2 != 0;
        let dup = flags & 0x1 != 0;

        let field_count = read_u16(buf, pos)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let field_number = read_u16(buf, pos)?;
            let order_raw = read_u16(buf, pos)?;
            let field_order = if order_raw == 0 { FieldOrder::Ascending } else { FieldOrder::Descending };
            fields.push((field_number, field_order));
        }

        Ok(IndexDescriptor { external_filename, name, index_type, nocase, opt, dup, fields })
    }
}

/// Per-table accumulator populated while scanning leaf pages; see
/// [`TableCatalog`] for the full-file aggregate.
#[derive(Debug, Clone, Default)]
struct TableEntry {
    name: Option<Vec<u8>>,
    portions: BTreeMap<u16, Vec<u8>>,
    statistics: HashMap<u8, (u32, u32)>,
}

impl TableEntry {
    fn is_complete(&self) -> bool {
        self.name.is_some() && !self.portions.is_empty()
    }
}

/// Accumulates table names, schema portions, and metadata statistics while
/// walking a file's leaf pages. Definitions are parsed lazily on request.
#[derive(Debug, Clone, Default)]
pub struct TableCatalog {
    tables: HashMap<u32, TableEntry>,
}

impl TableCatalog {
    pub fn new() -> Self {
        TableCatalog::default()
    }

    pub fn observe(&mut self, record: &Record) {
        match record {
            Record::TableName { table_number, name } => {
                self.tables.entry(*table_number).or_default().name = Some(name.clone());
            }
            Record::TableDefinition { table_number, portion_number, data } => {
                self.tables
                    .entry(*table_number)
                    .or_default()
                    .portions
                    .insert(*portion_number, data.clone());
            }
            Record::Metadata { table_number, metadata_type, record_count, last_access } => {
                self.tables
                    .entry(*table_number)
                    .or_default()
                    .statistics
                    .insert(*metadata_type, (*record_count, *last_access));
            }
            _ => {}
        }
    }

    pub fn table_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.tables.keys().copied()
    }

    pub fn name(&self, table_number: u32, encoding: Option<Encoding>) -> Option<String> {
        self.tables
            .get(&table_number)
            .and_then(|t| t.name.as_ref())
            .map(|bytes| decode_opt(bytes, encoding))
    }

    pub fn get_number(&self, name: &str, encoding: Option<Encoding>) -> Option<u32> {
        self.tables
            .iter()
            .find(|(_, entry)| entry.name.as_ref().is_some_and(|n| decode_opt(n, encoding) == name))
            .map(|(&n, _)| n)
    }

    pub fn is_complete(&self, table_number: u32) -> bool {
        self.tables.get(&table_number).is_some_and(TableEntry::is_complete)
    }

    pub fn all_complete(&self) -> bool {
        !self.tables.is_empty() && self.tables.values().all(TableEntry::is_complete)
    }

    pub fn get_definition(&self, table_number: u32) -> Result<TableDefinition, TpsError> {
        let entry = self
            .tables
            .get(&table_number)
            .ok_or_else(|| TpsError::Corrupt(format!("no such table {table_number}")))?;
        if entry.portions.is_empty() {
            return Err(TpsError::Corrupt(format!("table {table_number} has no definition")));
        }
        let mut bytes = Vec::new();
        for portion in entry.portions.values() {
            bytes.extend_from_slice(portion);
        }
        TableDefinition::parse(&bytes)
    }

    pub fn statistics(&self, table_number: u32) -> Option<&HashMap<u8, (u32, u32)>> {
        self.tables.get(&table_number).map(|t| &t.statistics)
    }
}
