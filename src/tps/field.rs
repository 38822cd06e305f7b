use std::collections::{HashMap, HashSet};
use std::fmt;

use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::trace;

use super::charset::{decode_opt, Encoding};
use super::error::Anomaly;
use super::table::{FieldDescriptor, FieldType, TableDefinition};

/// A BCD-packed decimal value: `sign * unscaled / 10^scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    pub unscaled: i128,
    pub scale: u8,
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{}", self.unscaled);
        }
        let negative = self.unscaled < 0;
        let magnitude = self.unscaled.unsigned_abs();
        let digits = magnitude.to_string();
        let digits = if digits.len() <= scale {
            format!("{:0>width$}", digits, width = scale + 1)
        } else {
            digits
        };
        let split_at = digits.len() - scale;
        if negative {
            write!(f, "-{}.{}", &digits[..split_at], &digits[split_at..])
        } else {
            write!(f, "{}.{}", &digits[..split_at], &digits[split_at..])
        }
    }
}

/// A materialized field value, or a sentinel for fields this crate does
/// not render (GROUP/PICTURE) or cannot safely slice (schema overrun).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Byte(u8),
    Short(i16),
    UShort(u16),
    ULong(u32),
    Long(i32),
    ClarionDate(Option<NaiveDate>),
    ClarionDateTime(Option<String>),
    Float(f32),
    Double(f64),
    Date(Option<NaiveDate>),
    Time(Option<NaiveTime>),
    Decimal(Decimal),
    String(String),
    Skipped,
}

/// 1800-12-28 as a proleptic-calendar ordinal; see GLOSSARY "Clarion ordinal".
const CLARION_EPOCH_ORDINAL: i32 = 657_433;

fn trim_field(s: &str) -> &str {
    s.trim_end_matches(|c: char| c == '\0' || c.is_whitespace())
}

/// Maps a table's raw `DATA` record bytes to named, typed field values.
///
/// `date_fieldnames`/`time_fieldnames` hold suffix strings; a LONG field
/// whose name ends with one of them is interpreted as a Clarion ordinal
/// date or a seconds+centiseconds timestamp respectively, instead of a
/// plain signed integer.
pub struct FieldMaterializer<'a> {
    pub encoding: Option<Encoding>,
    pub date_fieldnames: &'a HashSet<String>,
    pub time_fieldnames: &'a HashSet<String>,
}

impl<'a> FieldMaterializer<'a> {
    pub fn materialize(
        &self,
        data: &[u8],
        def: &TableDefinition,
        table_number: u32,
        record_number: u32,
        anomalies: &mut Vec<Anomaly>,
    ) -> HashMap<String, FieldValue> {
        let mut out = HashMap::with_capacity(def.fields.len() + 1);
        out.insert(":RecNo".to_string(), FieldValue::ULong(record_number));

        if data.len() != def.record_size as usize {
            anomalies.push(Anomaly::RecordSizeMismatch {
                table_number,
                expected: def.record_size,
                actual: data.len(),
            });
        }

        for field in &def.fields {
            let name = field.name_str(self.encoding);
            let start = field.offset as usize;
            let end = start + field.size as usize;

            if end > data.len() {
                trace!("field {name} on table {table_number} overruns record buffer, skipping");
                out.insert(name, FieldValue::Skipped);
                continue;
            }

            let value = self.materialize_field(&data[start..end], field, &name);
            out.insert(name, value);
        }

        out
    }

    fn materialize_field(&self, bytes: &[u8], field: &FieldDescriptor, name: &str) -> FieldValue {
        match field.field_type {
            FieldType::Byte => FieldValue::Byte(bytes[0]),
            FieldType::Short => FieldValue::Short(i16::from_le_bytes(bytes.try_into().unwrap())),
            FieldType::UShort => FieldValue::UShort(u16::from_le_bytes(bytes.try_into().unwrap())),
            FieldType::ULong => FieldValue::ULong(u32::from_le_bytes(bytes.try_into().unwrap())),
            FieldType::Long => self.materialize_long(bytes, name),
            FieldType::Float => FieldValue::Float(f32::from_le_bytes(bytes.try_into().unwrap())),
            FieldType::Double => FieldValue::Double(f64::from_le_bytes(bytes.try_into().unwrap())),
            FieldType::Date => FieldValue::Date(decode_date(bytes)),
            FieldType::Time => FieldValue::Time(decode_time(bytes)),
            FieldType::Decimal => FieldValue::Decimal(decode_decimal(bytes, field.decimal_count.unwrap_or(0))),
            FieldType::String => FieldValue::String(trim_field(&decode_opt(bytes, self.encoding)).to_string()),
            FieldType::CString => FieldValue::String(trim_field(&decode_opt(bytes, self.encoding)).to_string()),
            FieldType::PString => {
                let len = bytes.first().copied().unwrap_or(0) as usize;
                let body = bytes.get(1..1 + len.min(bytes.len().saturating_sub(1))).unwrap_or(&[]);
                FieldValue::String(trim_field(&decode_opt(body, self.encoding)).to_string())
            }
            FieldType::Group | FieldType::Picture => FieldValue::Skipped,
        }
    }

    fn materialize_long(&self, bytes: &[u8], name: &str) -> FieldValue {
        let n = i32::from_le_bytes(bytes.try_into().unwrap());

        if has_suffix(name, self.date_fieldnames) {
            if n == 0 {
                return FieldValue::ClarionDate(None);
            }
            let date = NaiveDate::from_num_days_from_ce_opt(CLARION_EPOCH_ORDINAL + n);
            return FieldValue::ClarionDate(date);
        }

        if has_suffix(name, self.time_fieldnames) {
            let seconds = n.div_euclid(100) as i64;
            let centiseconds = n.rem_euclid(100);
            let formatted = Utc
                .timestamp_opt(seconds, 0)
                .single()
                .map(|dt| format!("{}.{:03}", dt.format("%Y-%m-%d %H:%M:%S"), centiseconds));
            return FieldValue::ClarionDateTime(formatted);
        }

        FieldValue::Long(n)
    }
}

fn has_suffix(name: &str, suffixes: &HashSet<String>) -> bool {
    suffixes.iter().any(|suffix| name.ends_with(suffix.as_str()))
}

fn decode_date(bytes: &[u8]) -> Option<NaiveDate> {
    let day = bytes[0];
    let month = bytes[1];
    let year = u16::from_le_bytes(bytes[2..4].try_into().unwrap());
    if year == 0 {
        return None;
    }
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

fn decode_time(bytes: &[u8]) -> Option<NaiveTime> {
    let centi = bytes[0] as u32;
    let sec = bytes[1] as u32;
    let min = bytes[2] as u32;
    let hour = bytes[3] as u32;
    NaiveTime::from_hms_micro_opt(hour, min, sec, centi * 10_000)
}

fn decode_decimal(bytes: &[u8], decimal_count: u8) -> Decimal {
    let mut digits = Vec::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        digits.push(byte >> 4);
        digits.push(byte & 0x0F);
    }

    let mut sign = 1i128;
    if digits.last() == Some(&0xF) {
        sign = -1;
        digits.pop();
    }

    let unscaled = digits.iter().fold(0i128, |acc, &d| acc * 10 + d as i128);
    Decimal { unscaled: sign * unscaled, scale: decimal_count }
}
