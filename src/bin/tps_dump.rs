use std::collections::HashSet;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::{info, Level};

use tps::{Encoding, FieldValue, OpenOptions, TableDefinition, TpsFile};

#[derive(Parser, Debug, Clone)]
#[command(about = "Inspect and dump TopSpeed (TPS) database files")]
struct Arguments {
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long)]
    password: Option<String>,

    #[arg(long, help = "cp1251 / cp437 / utf8")]
    encoding: Option<String>,

    #[arg(long, help = "Enable structural integrity checks")]
    check: bool,

    #[arg(long, help = "Dump rows of this table instead of listing the catalog")]
    table: Option<String>,

    #[arg(long = "date-field", help = "Field-name suffix to interpret LONGs as Clarion dates")]
    date_field: Vec<String>,

    #[arg(long = "time-field", help = "Field-name suffix to interpret LONGs as timestamps")]
    time_field: Vec<String>,

    #[arg(long, help = "Maximum rows to dump")]
    limit: Option<usize>,

    #[arg(short = 'o', long = "output", help = "JSON report path (default: summary to stdout)")]
    output: Option<PathBuf>,

    #[arg(value_name = "TPS FILE")]
    file: PathBuf,
}

fn field_value_to_json(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Byte(b) => json!(b),
        FieldValue::Short(v) => json!(v),
        FieldValue::UShort(v) => json!(v),
        FieldValue::ULong(v) => json!(v),
        FieldValue::Long(v) => json!(v),
        FieldValue::Float(v) => json!(v),
        FieldValue::Double(v) => json!(v),
        FieldValue::ClarionDate(Some(d)) => json!(d.to_string()),
        FieldValue::ClarionDate(None) => Value::Null,
        FieldValue::ClarionDateTime(Some(s)) => json!(s),
        FieldValue::ClarionDateTime(None) => Value::Null,
        FieldValue::Date(Some(d)) => json!(d.to_string()),
        FieldValue::Date(None) => Value::Null,
        FieldValue::Time(Some(t)) => json!(t.to_string()),
        FieldValue::Time(None) => Value::Null,
        FieldValue::Decimal(d) => json!(d.to_string()),
        FieldValue::String(s) => json!(s),
        FieldValue::Skipped => Value::Null,
    }
}

fn field_type_name(field_type: tps::FieldType) -> &'static str {
    use tps::FieldType::*;
    match field_type {
        Byte => "BYTE",
        Short => "SHORT",
        UShort => "USHORT",
        Date => "DATE",
        Time => "TIME",
        Long => "LONG",
        ULong => "ULONG",
        Float => "FLOAT",
        Double => "DOUBLE",
        Decimal => "DECIMAL",
        String => "STRING",
        CString => "CSTRING",
        PString => "PSTRING",
        Picture => "PICTURE",
        Group => "GROUP",
    }
}

fn table_definition_json(def: &TableDefinition) -> Value {
    json!({
        "record_size": def.record_size,
        "fields": def.fields.iter().map(|f| json!({
            "name": f.name_str(None),
            "type": field_type_name(f.field_type),
            "offset": f.offset,
            "size": f.size,
        })).collect::<Vec<_>>(),
    })
}

/// Human-readable fallback for stdout when `--output` isn't given; a JSON
/// report always goes to the file `--output` names instead.
fn print_summary(report: &Value) {
    if let Some(tables) = report.get("tables").and_then(Value::as_array) {
        for table in tables {
            let name = table.get("name").and_then(Value::as_str).unwrap_or("?");
            match table.get("definition").and_then(|d| d.as_object()) {
                Some(def) => {
                    let field_count = def.get("fields").and_then(Value::as_array).map_or(0, Vec::len);
                    println!("{name}: {field_count} fields");
                }
                None => println!("{name}: <no definition found>"),
            }
        }
        return;
    }

    let table = report.get("table").and_then(Value::as_str).unwrap_or("?");
    let rows = report.get("rows").and_then(Value::as_array).cloned().unwrap_or_default();
    println!("{table}: {} rows", rows.len());
    for row in &rows {
        if let Some(obj) = row.as_object() {
            let rendered: Vec<String> = obj.iter().map(|(k, v)| format!("{k}={v}")).collect();
            println!("  {}", rendered.join(" "));
        }
    }
}

fn run(args: &Arguments) -> Result<()> {
    let encoding = args
        .encoding
        .as_deref()
        .map(|name| Encoding::by_name(name).with_context(|| format!("unrecognized encoding: {name}")))
        .transpose()?;

    let mut options = OpenOptions::new().with_check(args.check).with_cached(true);
    if let Some(encoding) = encoding {
        options = options.with_encoding(encoding);
    }
    if let Some(password) = &args.password {
        options = options.with_password(password.clone());
    }
    options.date_fieldnames = args.date_field.iter().cloned().collect::<HashSet<_>>();
    options.time_fieldnames = args.time_field.iter().cloned().collect::<HashSet<_>>();
    if let Some(table) = &args.table {
        options.current_tablename = Some(table.clone());
    }

    let mut tps = TpsFile::open(&args.file, options).context("failed to open TPS file")?;

    let report = if let Some(table_name) = &args.table {
        let table_number = tps
            .table_number(table_name)
            .with_context(|| format!("no such table: {table_name}"))?;
        let definition = tps.get_definition(table_number)?;

        let progress = ProgressBar::new_spinner();
        progress.set_style(
            ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
        );
        progress.set_message(format!("scanning {table_name}"));

        let mut rows = Vec::new();
        for row in tps.iter_rows()? {
            let row = row?;
            rows.push(Value::Object(
                row.into_iter().map(|(k, v)| (k, field_value_to_json(&v))).collect(),
            ));
            progress.set_message(format!("{table_name}: {} rows", rows.len()));
            progress.tick();
            if let Some(limit) = args.limit {
                if rows.len() >= limit {
                    break;
                }
            }
        }
        progress.finish_and_clear();

        json!({
            "table": table_name,
            "definition": table_definition_json(&definition),
            "rows": rows,
        })
    } else {
        let tables: Vec<Value> = tps
            .table_names()
            .into_iter()
            .map(|name| {
                let number = tps.table_number(&name);
                let definition = number.and_then(|n| tps.get_definition(n).ok());
                json!({
                    "name": name,
                    "definition": definition.as_ref().map(table_definition_json),
                })
            })
            .collect();
        json!({ "tables": tables })
    };

    let anomaly_count = tps.anomalies().len();
    for anomaly in tps.anomalies() {
        tracing::warn!("{anomaly}");
    }

    match &args.output {
        Some(path) => {
            let mut file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            file.write_all(serde_json::to_string_pretty(&report)?.as_bytes())?;
        }
        None => print_summary(&report),
    }

    info!(
        "scan complete: {} tables, {} anomalies",
        tps.table_names().len(),
        anomaly_count
    );
    Ok(())
}

fn main() -> Result<()> {
    let args = Arguments::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(match args.verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        })
        .without_time()
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to install logger");

    run(&args)
}
