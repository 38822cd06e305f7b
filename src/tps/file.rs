use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::byte_source::ByteSource;
use super::charset::Encoding;
use super::compress;
use super::crypt::Decryptor;
use super::error::{Anomaly, TpsError};
use super::field::{FieldMaterializer, FieldValue};
use super::header::Header;
use super::page::{Page, PageIndex, PAGE_HEADER_SIZE};
use super::record::{self, Record, SplitRecord};
use super::table::{TableCatalog, TableDefinition};

/// Every recognized open-time configuration option (§6 Open Parameters),
/// threaded explicitly rather than read from process-wide state.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub encoding: Option<Encoding>,
    pub password: Option<String>,
    pub check: bool,
    pub cached: bool,
    pub current_tablename: Option<String>,
    pub date_fieldnames: HashSet<String>,
    pub time_fieldnames: HashSet<String>,
}

impl OpenOptions {
    pub fn new() -> Self {
        OpenOptions::default()
    }

    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = Some(encoding);
        self
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_check(mut self, check: bool) -> Self {
        self.check = check;
        self
    }

    pub fn with_cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn with_current_table(mut self, name: impl Into<String>) -> Self {
        self.current_tablename = Some(name.into());
        self
    }
}

/// An open TopSpeed database file: the assembled decode pipeline (A-I)
/// plus accumulated catalog state and anomalies from the initial scan.
pub struct TpsFile {
    source: ByteSource,
    header: Header,
    page_index: PageIndex,
    catalog: TableCatalog,
    options: OpenOptions,
    anomalies: Vec<Anomaly>,
    page_cache: HashMap<u32, Vec<SplitRecord>>,
    current_table: Option<u32>,
}

impl TpsFile {
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> Result<TpsFile, TpsError> {
        let path: PathBuf = path.as_ref().to_owned();
        info!("opening {}", path.display());

        let source = ByteSource::open(&path)?;
        if source.len() % 64 != 0 {
            warn!("file size {} is not block-aligned", source.len());
        }

        let decryptor = Decryptor::new(&source, options.password.as_deref());
        let header = Header::parse(&decryptor)?;

        let mut anomalies = Vec::new();
        if options.check && source.len() % 64 != 0 {
            anomalies.push(Anomaly::FileSizeNotBlockAligned { file_size: source.len() });
        }

        let page_index = PageIndex::build(&decryptor, &header, options.check, &mut anomalies)?;
        debug!("page tree walked: {} pages", page_index.list_refs().len());

        let mut file = TpsFile {
            source,
            header,
            page_index,
            catalog: TableCatalog::new(),
            current_table: None,
            page_cache: HashMap::new(),
            anomalies,
            options,
        };

        file.scan_catalog()?;
        if let Some(name) = file.options.current_tablename.clone() {
            file.set_current_table(&name)?;
        }

        info!(
            "scan complete: {} tables, {} anomalies",
            file.catalog.table_numbers().count(),
            file.anomalies.len()
        );
        Ok(file)
    }

    fn decryptor(&self) -> Decryptor<'_> {
        Decryptor::new(&self.source, self.options.password.as_deref())
    }

    fn scan_catalog(&mut self) -> Result<(), TpsError> {
        let decryptor = self.decryptor();
        let refs: Vec<u32> = self.page_index.leaves_reverse().map(|p| p.page_ref).collect();

        for page_ref in refs {
            if self.catalog.all_complete() {
                break;
            }
            let records = self.load_page(&decryptor, page_ref)?;
            for split in &records {
                let record = record::parse(split)?;
                self.catalog.observe(&record);
            }
        }
        Ok(())
    }

    fn load_page(&mut self, decryptor: &Decryptor, page_ref: u32) -> Result<Vec<SplitRecord>, TpsError> {
        if self.options.cached {
            if let Some(cached) = self.page_cache.get(&page_ref) {
                return Ok(cached.clone());
            }
        }

        let page = self
            .page_index
            .get(page_ref)
            .ok_or_else(|| TpsError::Corrupt(format!("page ref {page_ref} not in index")))?
            .clone();

        let records = Self::decode_leaf(decryptor, &page)?;

        if self.options.cached {
            self.page_cache.insert(page_ref, records.clone());
        }
        Ok(records)
    }

    fn decode_leaf(decryptor: &Decryptor, page: &Page) -> Result<Vec<SplitRecord>, TpsError> {
        let body_len = page.size as usize - PAGE_HEADER_SIZE;
        let offset = page.offset as u64 + PAGE_HEADER_SIZE as u64;
        let raw = decryptor.read(body_len, Some(offset))?;

        let body: std::borrow::Cow<[u8]> = if page.uncompressed_size > page.size {
            debug!("page {} is RLE-compressed", page.page_ref);
            std::borrow::Cow::Owned(compress::decompress(&raw))
        } else {
            raw
        };

        record::split(&body)
    }

    pub fn set_current_table(&mut self, name: &str) -> Result<(), TpsError> {
        let number = self
            .catalog
            .get_number(name, self.options.encoding)
            .ok_or_else(|| TpsError::Corrupt(format!("no such table: {name}")))?;
        self.current_table = Some(number);
        Ok(())
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn table_names(&self) -> Vec<String> {
        self.catalog
            .table_numbers()
            .filter_map(|n| self.catalog.name(n, self.options.encoding))
            .collect()
    }

    pub fn table_number(&self, name: &str) -> Option<u32> {
        self.catalog.get_number(name, self.options.encoding)
    }

    pub fn get_definition(&self, table_number: u32) -> Result<TableDefinition, TpsError> {
        self.catalog.get_definition(table_number)
    }

    /// Iterates `{field_name: value}` mappings for the current table, in
    /// leaf-page ref order and on-disk record order within a page.
    pub fn iter_rows(&mut self) -> Result<TpsRowIter<'_>, TpsError> {
        let table_number = self
            .current_table
            .ok_or_else(|| TpsError::Corrupt("no current table selected".into()))?;
        let definition = self.catalog.get_definition(table_number)?;
        let refs: Vec<u32> = self.page_index.leaves().map(|p| p.page_ref).collect();

        Ok(TpsRowIter {
            file: self,
            table_number,
            definition,
            refs: refs.into_iter(),
            pending: Vec::new().into_iter(),
        })
    }
}

pub struct TpsRowIter<'a> {
    file: &'a mut TpsFile,
    table_number: u32,
    definition: TableDefinition,
    refs: std::vec::IntoIter<u32>,
    pending: std::vec::IntoIter<Record>,
}

impl<'a> Iterator for TpsRowIter<'a> {
    type Item = Result<HashMap<String, FieldValue>, TpsError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.pending.next() {
                if let Record::Data { table_number, record_number, data } = record {
                    if table_number == self.table_number {
                        let materializer = FieldMaterializer {
                            encoding: self.file.options.encoding,
                            date_fieldnames: &self.file.options.date_fieldnames,
                            time_fieldnames: &self.file.options.time_fieldnames,
                        };
                        let values = materializer.materialize(
                            &data,
                            &self.definition,
                            table_number,
                            record_number,
                            &mut self.file.anomalies,
                        );
                        return Some(Ok(values));
                    }
                }
                continue;
            }

            let page_ref = self.refs.next()?;
            let decryptor = self.file.decryptor();
            let splits = match self.file.load_page(&decryptor, page_ref) {
                Ok(s) => s,
                Err(e) => return Some(Err(e)),
            };
            let mut records = Vec::with_capacity(splits.len());
            for split in &splits {
                match record::parse(split) {
                    Ok(r) => records.push(r),
                    Err(e) => return Some(Err(e)),
                }
            }
            self.pending = records.into_iter();
        }
    }
}
