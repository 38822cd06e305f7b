use super::error::TpsError;

/// One delta-split record body paired with the header-size word carried in
/// its framing byte. `body` is the fully reconstructed record payload (the
/// bytes that would follow a 2-byte `data_size` field on disk); `parse`
/// dispatches on `body` directly and does not consult `header_size`.
#[derive(Debug, Clone)]
pub struct SplitRecord {
    pub header_size: u16,
    pub body: Vec<u8>,
}

/// Splits a leaf page's decompressed body into delta-encoded records.
///
/// Each record's framing byte may carry a fresh `record_size` and/or
/// `record_header_size` (high two bits); the low six bits are the count of
/// leading bytes retained verbatim from the previous record.
pub fn split(page_body: &[u8]) -> Result<Vec<SplitRecord>, TpsError> {
    let mut out = Vec::new();
    let mut pos = 0usize;
    let mut record_size: u16 = 0;
    let mut record_header_size: u16 = 0;
    let mut previous: Vec<u8> = Vec::new();

    let take_u16 = |buf: &[u8], at: usize| -> Result<u16, TpsError> {
        buf.get(at..at + 2)
            .map(|s| u16::from_le_bytes(s.try_into().unwrap()))
            .ok_or_else(|| TpsError::Corrupt("record split: truncated framing".into()))
    };

    while pos < page_body.len() {
        let b = page_body[pos];
        pos += 1;

        if b & 0x80 != 0 {
            record_size = take_u16(page_body, pos)?;
            pos += 2;
        }
        if b & 0x40 != 0 {
            record_header_size = take_u16(page_body, pos)?;
            pos += 2;
        }

        let keep = (b & 0x3F) as usize;
        if keep > previous.len() {
            return Err(TpsError::Corrupt(format!(
                "record split: keep {keep} exceeds previous record length {}",
                previous.len()
            )));
        }
        let new_len = (record_size as usize)
            .checked_sub(keep)
            .ok_or_else(|| TpsError::Corrupt("record split: keep exceeds record_size".into()))?;
        let new_bytes = page_body
            .get(pos..pos + new_len)
            .ok_or_else(|| TpsError::Corrupt("record split: truncated record body".into()))?;
        pos += new_len;

        let mut body = Vec::with_capacity(record_size as usize);
        body.extend_from_slice(&previous[..keep]);
        body.extend_from_slice(new_bytes);

        previous = body.clone();
        out.push(SplitRecord { header_size: record_header_size, body });
    }

    Ok(out)
}

/// A decoded tagged record, discriminated per the byte following the
/// 2-byte `data_size` framing.
#[derive(Debug, Clone)]
pub enum Record {
    Null,
    TableName { table_number: u32, name: Vec<u8> },
    Data { table_number: u32, record_number: u32, data: Vec<u8> },
    Metadata { table_number: u32, metadata_type: u8, record_count: u32, last_access: u32 },
    TableDefinition { table_number: u32, portion_number: u16, data: Vec<u8> },
    Index { table_number: u32, data: Vec<u8>, record_number: u32 },
}

impl Record {
    pub fn table_number(&self) -> Option<u32> {
        match self {
            Record::Null => None,
            Record::TableName { table_number, .. }
            | Record::Data { table_number, .. }
            | Record::Metadata { table_number, .. }
            | Record::TableDefinition { table_number, .. }
            | Record::Index { table_number, .. } => Some(*table_number),
        }
    }
}

const TAG_DATA: u8 = 0xF3;
const TAG_METADATA: u8 = 0xF6;
const TAG_TABLE_DEFINITION: u8 = 0xFA;
const TAG_TABLE_NAME: u8 = 0xFE;

/// Parses a [`SplitRecord`]'s body into a tagged [`Record`].
pub fn parse(split: &SplitRecord) -> Result<Record, TpsError> {
    let payload = &split.body;

    if payload.is_empty() {
        return Ok(Record::Null);
    }

    if payload[0] == TAG_TABLE_NAME {
        let rest = &payload[1..];
        if rest.len() < 4 {
            return Err(TpsError::Corrupt("TABLE_NAME record truncated".into()));
        }
        let split_at = rest.len() - 4;
        let table_number = u32::from_be_bytes(rest[split_at..].try_into().unwrap());
        let name = rest[..split_at].to_vec();
        return Ok(Record::TableName { table_number, name });
    }

    if payload.len() < 5 {
        return Err(TpsError::Corrupt("record truncated before tag byte".into()));
    }
    let table_number = u32::from_be_bytes(payload[0..4].try_into().unwrap());
    let tag = payload[4];
    let body = &payload[5..];

    match tag {
        TAG_DATA => {
            if body.len() < 4 {
                return Err(TpsError::Corrupt("DATA record truncated".into()));
            }
            let record_number = u32::from_be_bytes(body[0..4].try_into().unwrap());
            Ok(Record::Data { table_number, record_number, data: body[4..].to_vec() })
        }
        TAG_METADATA => {
            if body.len() < 9 {
                return Err(TpsError::Corrupt("METADATA record truncated".into()));
            }
            let metadata_type = body[0];
            let record_count = u32::from_le_bytes(body[1..5].try_into().unwrap());
            let last_access = u32::from_le_bytes(body[5..9].try_into().unwrap());
            Ok(Record::Metadata { table_number, metadata_type, record_count, last_access })
        }
        TAG_TABLE_DEFINITION => {
            if body.len() < 2 {
                return Err(TpsError::Corrupt("TABLE_DEFINITION record truncated".into()));
            }
            let portion_number = u16::from_le_bytes(body[0..2].try_into().unwrap());
            Ok(Record::TableDefinition { table_number, portion_number, data: body[2..].to_vec() })
        }
        _ => {
            // data(data_size-10) + record_number(4) + one trailing unused byte.
            if body.len() < 5 {
                return Err(TpsError::Corrupt("INDEX record truncated".into()));
            }
            let split_at = body.len() - 5;
            let record_number = u32::from_le_bytes(body[split_at..split_at + 4].try_into().unwrap());
            Ok(Record::Index { table_number, data: body[..split_at].to_vec(), record_number })
        }
    }
}
