use std::io::Write as _;

use tps::tps::page::PAGE_HEADER_SIZE;
use tps::tps::table::FieldType;
use tps::{FieldValue, OpenOptions, TpsFile};

const HEADER_SIZE: u16 = 0x28; // 0x20 fixed + one block-range entry (8 bytes)
const TOPSPEED_MARK: [u8; 6] = *b"tOpS\x00\x00";

fn field_bytes(field_type: u8, offset: u16, name: &str, size: u16, number: u16) -> Vec<u8> {
    let mut out = vec![field_type];
    out.extend_from_slice(&offset.to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.push(0);
    out.extend_from_slice(&0u16.to_le_bytes()); // array_element_count
    out.extend_from_slice(&size.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes()); // overlaps
    out.extend_from_slice(&number.to_le_bytes());
    out
}

fn string_field_bytes(offset: u16, name: &str, size: u16, number: u16) -> Vec<u8> {
    let mut out = field_bytes(FieldType::String as u8, offset, name, size, number);
    out.extend_from_slice(&size.to_le_bytes()); // array_element_size
    out.extend_from_slice(&0u16.to_le_bytes()); // template
    out
}

fn decimal_field_bytes(offset: u16, name: &str, size: u16, number: u16, decimal_count: u8) -> Vec<u8> {
    let mut out = field_bytes(FieldType::Decimal as u8, offset, name, size, number);
    out.push(decimal_count);
    out.push(size as u8);
    out
}

/// Schema: ID (ULONG @0, 4 bytes), NAME (STRING @4, 10 bytes), PRICE
/// (DECIMAL @14, 3 bytes, scale 2). record_size = 17.
fn table_definition_bytes() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&1u16.to_le_bytes()); // min_version_driver
    out.extend_from_slice(&17u16.to_le_bytes()); // record_size
    out.extend_from_slice(&3u16.to_le_bytes()); // field_count
    out.extend_from_slice(&0u16.to_le_bytes()); // memo_count
    out.extend_from_slice(&0u16.to_le_bytes()); // index_count
    out.extend_from_slice(&field_bytes(FieldType::ULong as u8, 0, "ID", 4, 1));
    out.extend_from_slice(&string_field_bytes(4, "NAME", 10, 2));
    out.extend_from_slice(&decimal_field_bytes(14, "PRICE", 3, 3, 2));
    out
}

fn framed_record(body: &[u8]) -> Vec<u8> {
    let mut out = vec![0xC0u8]; // fresh record_size + record_header_size, keep=0
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(&(body.len() as u16).to_le_bytes());
    out.extend_from_slice(body);
    out
}

fn table_name_record(table_number: u32, name: &[u8]) -> Vec<u8> {
    let mut body = vec![0xFEu8];
    body.extend_from_slice(name);
    body.extend_from_slice(&table_number.to_be_bytes());
    framed_record(&body)
}

fn table_definition_record(table_number: u32, portion: u16, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_number.to_be_bytes());
    body.push(0xFA);
    body.extend_from_slice(&portion.to_le_bytes());
    body.extend_from_slice(data);
    framed_record(&body)
}

fn data_record(table_number: u32, record_number: u32, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&table_number.to_be_bytes());
    body.push(0xF3);
    body.extend_from_slice(&record_number.to_be_bytes());
    body.extend_from_slice(data);
    framed_record(&body)
}

fn row_bytes(id: u32, name: &str, price_bcd: [u8; 3]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&id.to_le_bytes());
    let mut name_field = name.as_bytes().to_vec();
    name_field.resize(10, b' ');
    out.extend_from_slice(&name_field);
    out.extend_from_slice(&price_bcd);
    out
}

/// Builds a two-page file: an interior root pointing at one leaf child
/// holding a TABLE_NAME, a TABLE_DEFINITION, and three DATA records.
fn build_fixture() -> tempfile::NamedTempFile {
    let root_ref: u32 = 0;
    let leaf_ref: u32 = 1;
    let root_pos = HEADER_SIZE as usize;
    let root_page_size = PAGE_HEADER_SIZE + 4;
    let leaf_pos = (leaf_ref as u64 * 0x100 + HEADER_SIZE as u64) as usize;

    let mut page_body = Vec::new();
    page_body.extend_from_slice(&table_name_record(1, b"ITEMS"));
    page_body.extend_from_slice(&table_definition_record(1, 0, &table_definition_bytes()));
    page_body.extend_from_slice(&data_record(1, 1, &row_bytes(1, "APPLE", [0x01, 0x00, 0x00])));
    page_body.extend_from_slice(&data_record(1, 2, &row_bytes(2, "PEAR", [0x25, 0x00, 0x0F])));
    page_body.extend_from_slice(&data_record(1, 3, &row_bytes(3, "PLUM", [0x00, 0x99, 0x00])));

    let leaf_page_size = PAGE_HEADER_SIZE + page_body.len();
    let data_end = leaf_pos + leaf_page_size;
    let mut buf = vec![0u8; data_end.div_ceil(64) * 64]; // keep the file 64-byte aligned

    // header
    buf[0..4].copy_from_slice(&0u32.to_le_bytes());
    buf[4..6].copy_from_slice(&HEADER_SIZE.to_le_bytes());
    buf[6..10].copy_from_slice(&(buf.len() as u32).to_le_bytes());
    buf[10..14].copy_from_slice(&(buf.len() as u32).to_le_bytes());
    buf[14..20].copy_from_slice(&TOPSPEED_MARK);
    buf[20..24].copy_from_slice(&3u32.to_be_bytes()); // last_issued_row
    buf[24..28].copy_from_slice(&0u32.to_le_bytes());
    buf[28..32].copy_from_slice(&root_ref.to_le_bytes());
    // one block range covering every page ref this fixture ever uses
    buf[32..36].copy_from_slice(&0u32.to_le_bytes()); // block_start_ref[0]
    buf[36..40].copy_from_slice(&100u32.to_le_bytes()); // block_end_ref[0]

    // root (interior) page
    buf[root_pos..root_pos + 4].copy_from_slice(&(root_pos as u32).to_le_bytes());
    buf[root_pos + 4..root_pos + 6].copy_from_slice(&(root_page_size as u16).to_le_bytes());
    buf[root_pos + 6..root_pos + 8].copy_from_slice(&0u16.to_le_bytes());
    buf[root_pos + 8..root_pos + 10].copy_from_slice(&0u16.to_le_bytes());
    buf[root_pos + 10..root_pos + 12].copy_from_slice(&1u16.to_le_bytes()); // 1 child
    buf[root_pos + 12] = 1; // interior
    buf[root_pos + PAGE_HEADER_SIZE..root_pos + PAGE_HEADER_SIZE + 4]
        .copy_from_slice(&leaf_ref.to_le_bytes());

    // leaf page
    buf[leaf_pos..leaf_pos + 4].copy_from_slice(&(leaf_pos as u32).to_le_bytes());
    buf[leaf_pos + 4..leaf_pos + 6].copy_from_slice(&(leaf_page_size as u16).to_le_bytes());
    buf[leaf_pos + 6..leaf_pos + 8].copy_from_slice(&(leaf_page_size as u16).to_le_bytes());
    buf[leaf_pos + 8..leaf_pos + 10].copy_from_slice(&(leaf_page_size as u16).to_le_bytes());
    buf[leaf_pos + 10..leaf_pos + 12].copy_from_slice(&3u16.to_le_bytes()); // 3 data records
    buf[leaf_pos + 12] = 0; // leaf
    buf[leaf_pos + PAGE_HEADER_SIZE..leaf_pos + PAGE_HEADER_SIZE + page_body.len()]
        .copy_from_slice(&page_body);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&buf).unwrap();
    file
}

#[test]
fn discovers_catalog_across_interior_and_leaf_pages() {
    let file = build_fixture();
    let tps = TpsFile::open(file.path(), OpenOptions::new()).unwrap();

    assert_eq!(tps.table_names(), vec!["ITEMS".to_string()]);
    let def = tps.get_definition(tps.table_number("ITEMS").unwrap()).unwrap();
    assert_eq!(def.record_size, 17);
    assert_eq!(def.fields.len(), 3);
}

#[test]
fn iterates_typed_rows_with_strictly_increasing_recno() {
    let file = build_fixture();
    let mut tps = TpsFile::open(file.path(), OpenOptions::new().with_current_table("ITEMS")).unwrap();

    let rows: Vec<_> = tps.iter_rows().unwrap().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 3);

    let rec_nos: Vec<u32> = rows
        .iter()
        .map(|r| match r.get(":RecNo") {
            Some(FieldValue::ULong(n)) => *n,
            other => panic!("unexpected :RecNo value: {other:?}"),
        })
        .collect();
    assert_eq!(rec_nos, vec![1, 2, 3]);

    match rows[0].get("NAME") {
        Some(FieldValue::String(s)) => assert_eq!(s, "APPLE"),
        other => panic!("unexpected NAME value: {other:?}"),
    }
    match rows[1].get("PRICE") {
        Some(FieldValue::Decimal(d)) => assert_eq!(d.to_string(), "-250.00"),
        other => panic!("unexpected PRICE value: {other:?}"),
    }
}

#[test]
fn check_mode_reports_no_anomalies_for_well_formed_fixture() {
    let file = build_fixture();
    let tps = TpsFile::open(file.path(), OpenOptions::new().with_check(true)).unwrap();
    assert!(tps.anomalies().is_empty(), "unexpected anomalies: {:?}", tps.anomalies());
}

#[test]
fn selecting_an_unknown_table_fails_with_a_descriptive_error() {
    let file = build_fixture();
    let mut tps = TpsFile::open(file.path(), OpenOptions::new()).unwrap();
    let err = tps.set_current_table("NOPE").unwrap_err();
    assert!(err.to_string().contains("NOPE"));
}
