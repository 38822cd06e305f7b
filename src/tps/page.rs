use std::collections::{HashMap, HashSet};

use tracing::warn;

use super::crypt::Decryptor;
use super::error::{Anomaly, TpsError};
use super::header::Header;

pub const PAGE_HEADER_SIZE: usize = 13;

/// A single page header plus, for interior pages, its child refs.
#[derive(Debug, Clone)]
pub struct Page {
    pub page_ref: u32,
    pub offset: u32,
    pub size: u16,
    pub uncompressed_size: u16,
    pub uncompressed_unabridged_size: u16,
    pub record_count: u16,
    pub hierarchy_level: u8,
    pub children: Vec<u32>,
}

impl Page {
    pub fn is_leaf(&self) -> bool {
        self.hierarchy_level == 0
    }

    fn file_offset(page_ref: u32, header_size: u16) -> u64 {
        page_ref as u64 * 0x100 + header_size as u64
    }

    fn parse(
        decryptor: &Decryptor,
        header_size: u16,
        page_ref: u32,
    ) -> Result<Page, TpsError> {
        let offset = Self::file_offset(page_ref, header_size);
        let buf = decryptor.read(PAGE_HEADER_SIZE, Some(offset))?;

        let page_offset = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let size = u16::from_le_bytes(buf[4..6].try_into().unwrap());
        let uncompressed_size = u16::from_le_bytes(buf[6..8].try_into().unwrap());
        let uncompressed_unabridged_size = u16::from_le_bytes(buf[8..10].try_into().unwrap());
        let record_count = u16::from_le_bytes(buf[10..12].try_into().unwrap());
        let hierarchy_level = buf[12];

        let mut children = Vec::new();
        if hierarchy_level != 0 {
            let child_bytes_len = size as usize - PAGE_HEADER_SIZE;
            let child_buf = decryptor.read(child_bytes_len, None)?;
            for chunk in child_buf.chunks_exact(4) {
                children.push(u32::from_le_bytes(chunk.try_into().unwrap()));
            }
        }

        Ok(Page {
            page_ref,
            offset: page_offset,
            size,
            uncompressed_size,
            uncompressed_unabridged_size,
            record_count,
            hierarchy_level,
            children,
        })
    }
}

/// Materialized page-ref → [`Page`] map, built by walking the page tree
/// from the header's root ref. Traversal order is depth-first and each
/// ref is visited exactly once; callers filter [`Page::is_leaf`] to find
/// the data-bearing pages.
pub struct PageIndex {
    pages: HashMap<u32, Page>,
    order: Vec<u32>,
}

impl PageIndex {
    pub fn build(
        decryptor: &Decryptor,
        header: &Header,
        check: bool,
        anomalies: &mut Vec<Anomaly>,
    ) -> Result<PageIndex, TpsError> {
        let mut pages = HashMap::new();
        let mut order = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![header.page_root_ref];

        while let Some(page_ref) = stack.pop() {
            if !visited.insert(page_ref) {
                continue;
            }

            let page = Page::parse(decryptor, header.header_size, page_ref)?;

            if check {
                check_page(&page, header, &pages, anomalies);
            }

            for &child in page.children.iter().rev() {
                stack.push(child);
            }

            order.push(page_ref);
            pages.insert(page_ref, page);
        }

        Ok(PageIndex { pages, order })
    }

    pub fn list_refs(&self) -> &[u32] {
        &self.order
    }

    pub fn get(&self, page_ref: u32) -> Option<&Page> {
        self.pages.get(&page_ref)
    }

    pub fn leaves(&self) -> impl Iterator<Item = &Page> {
        self.order
            .iter()
            .filter_map(move |r| self.pages.get(r))
            .filter(|p| p.is_leaf())
    }

    pub fn leaves_reverse(&self) -> impl Iterator<Item = &Page> {
        self.order
            .iter()
            .rev()
            .filter_map(move |r| self.pages.get(r))
            .filter(|p| p.is_leaf())
    }
}

fn check_page(page: &Page, header: &Header, pages: &HashMap<u32, Page>, anomalies: &mut Vec<Anomaly>) {
    let expected = Page::file_offset(page.page_ref, header.header_size);
    if page.offset as u64 != expected {
        warn!(
            "page ref {} offset {} does not match expected {}",
            page.page_ref, page.offset, expected
        );
        anomalies.push(Anomaly::PageOffsetMismatch {
            page_ref: page.page_ref,
            expected,
            actual: page.offset,
        });
    }

    let start = page.offset as u64;
    let end = start + page.size as u64;
    for (&other_ref, other) in pages.iter() {
        let other_start = other.offset as u64;
        let other_end = other_start + other.size as u64;
        let intersects = (other_start <= start && start < other_end)
            || (other_start < end && end <= other_end);
        if intersects {
            warn!("page ref {} intersects with page ref {}", page.page_ref, other_ref);
            anomalies.push(Anomaly::PageIntersection {
                page_ref: page.page_ref,
                other_ref,
            });
        }
    }

    let end_ref = (page.offset as u64 + page.size as u64 - header.header_size as u64) / 0x100;
    if !header.block_contains(page.page_ref, end_ref as u32) {
        warn!("page ref {} is not inside any declared block", page.page_ref);
        anomalies.push(Anomaly::PageOutsideBlocks {
            page_ref: page.page_ref,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tps::byte_source::ByteSource;

    /// Builds a minimal two-page file: an interior root with one leaf
    /// child, no compression, no records (record_count = 0 body).
    fn build_fixture() -> (tempfile::NamedTempFile, Header) {
        let header_size: u16 = 0x20; // no block arrays
        let root_ref: u32 = 0;
        let leaf_ref: u32 = 1;

        let root_header_pos = header_size as usize;
        let root_page_size: u16 = (PAGE_HEADER_SIZE + 4) as u16; // header + 1 child ref
        let leaf_pos = leaf_ref as u64 * 0x100 + header_size as u64;

        let mut buf = vec![0u8; leaf_pos as usize + PAGE_HEADER_SIZE];

        buf[root_header_pos..root_header_pos + 4]
            .copy_from_slice(&(root_ref as u64 * 0x100 + header_size as u64).to_le_bytes()[..4]);
        buf[root_header_pos + 4..root_header_pos + 6].copy_from_slice(&root_page_size.to_le_bytes());
        buf[root_header_pos + 6..root_header_pos + 8].copy_from_slice(&0u16.to_le_bytes()); // uncompressed_size
        buf[root_header_pos + 8..root_header_pos + 10].copy_from_slice(&0u16.to_le_bytes());
        buf[root_header_pos + 10..root_header_pos + 12].copy_from_slice(&1u16.to_le_bytes()); // record_count = 1 child
        buf[root_header_pos + 12] = 1; // hierarchy_level != 0
        buf[root_header_pos + PAGE_HEADER_SIZE..root_header_pos + PAGE_HEADER_SIZE + 4]
            .copy_from_slice(&leaf_ref.to_le_bytes());
        let leaf_offset_val = leaf_pos as u32;
        buf[leaf_pos as usize..leaf_pos as usize + 4].copy_from_slice(&leaf_offset_val.to_le_bytes());
        buf[leaf_pos as usize + 4..leaf_pos as usize + 6].copy_from_slice(&13u16.to_le_bytes());
        buf[leaf_pos as usize + 6..leaf_pos as usize + 8].copy_from_slice(&13u16.to_le_bytes());
        buf[leaf_pos as usize + 8..leaf_pos as usize + 10].copy_from_slice(&13u16.to_le_bytes());
        buf[leaf_pos as usize + 10..leaf_pos as usize + 12].copy_from_slice(&0u16.to_le_bytes());
        buf[leaf_pos as usize + 12] = 0; // hierarchy_level == 0 -> leaf

        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &buf).unwrap();

        let header = Header {
            header_offset: 0,
            header_size,
            file_size: buf.len() as u32,
            allocated_file_size: buf.len() as u32,
            last_issued_row: 0,
            change_count: 0,
            page_root_ref: root_ref,
            block_start_ref: vec![],
            block_end_ref: vec![],
        };

        (file, header)
    }

    #[test]
    fn walks_root_and_leaf_exactly_once() {
        let (file, header) = build_fixture();
        let src = ByteSource::open(file.path()).unwrap();
        let dec = Decryptor::new(&src, None);
        let mut anomalies = Vec::new();

        let index = PageIndex::build(&dec, &header, false, &mut anomalies).unwrap();
        assert_eq!(index.list_refs().len(), 2);
        assert!(index.get(0).unwrap().hierarchy_level != 0);
        assert!(index.get(1).unwrap().is_leaf());
        assert_eq!(index.leaves().count(), 1);
    }
}
