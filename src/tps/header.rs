use tracing::debug;

use super::crypt::Decryptor;
use super::error::TpsError;

const HEADER_READ_SIZE: usize = 0x200;
const TOPSPEED_MARK: [u8; 6] = *b"tOpS\x00\x00";

/// The 512-byte logical file header: fixed fields plus two parallel
/// block-reference arrays describing the contiguous valid-page ranges.
#[derive(Debug, Clone)]
pub struct Header {
    pub header_offset: u32,
    pub header_size: u16,
    pub file_size: u32,
    pub allocated_file_size: u32,
    pub last_issued_row: u32,
    pub change_count: u32,
    pub page_root_ref: u32,
    pub block_start_ref: Vec<u32>,
    pub block_end_ref: Vec<u32>,
}

impl Header {
    pub fn parse(decryptor: &Decryptor) -> Result<Header, TpsError> {
        let buf = decryptor.read(HEADER_READ_SIZE, Some(0))?;

        let header_offset = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let header_size = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let file_size = u32::from_le_bytes(buf[6..10].try_into().unwrap());
        let allocated_file_size = u32::from_le_bytes(buf[10..14].try_into().unwrap());

        if buf[14..20] != TOPSPEED_MARK {
            debug!("header marker mismatch: {:02x?}", &buf[14..20]);
            return Err(TpsError::BadMagic);
        }

        let last_issued_row = u32::from_be_bytes(buf[20..24].try_into().unwrap());
        let change_count = u32::from_le_bytes(buf[24..28].try_into().unwrap());
        let page_root_ref = u32::from_le_bytes(buf[28..32].try_into().unwrap());

        let array_len = ((header_size as usize).saturating_sub(0x20)) / 8;
        let mut pos = 32usize;
        let mut block_start_ref = Vec::with_capacity(array_len);
        for _ in 0..array_len {
            block_start_ref.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }
        let mut block_end_ref = Vec::with_capacity(array_len);
        for _ in 0..array_len {
            block_end_ref.push(u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()));
            pos += 4;
        }

        Ok(Header {
            header_offset,
            header_size,
            file_size,
            allocated_file_size,
            last_issued_row,
            change_count,
            page_root_ref,
            block_start_ref,
            block_end_ref,
        })
    }

    /// True iff some declared block fully contains `[start_ref, end_ref]`.
    pub fn block_contains(&self, start_ref: u32, end_ref: u32) -> bool {
        self.block_start_ref
            .iter()
            .zip(self.block_end_ref.iter())
            .any(|(&s, &e)| s <= start_ref && end_ref <= e)
    }
}
