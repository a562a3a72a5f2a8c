//! Table loading.
//!
//! CSV input is sniffed for its delimiter: each of `,` `;` `\t` `|` is tried
//! in order and the first one that yields more than one column with every
//! record at the header's width wins. Bytes are decoded as UTF-8 with invalid
//! sequences replaced. Empty cells and the markers in [`MISSING_MARKERS`] are
//! read as missing.
//!
//! JSON input is an array of flat objects; columns are the union of keys.

use std::path::Path;

use serde_json::Value;

use super::Table;
use crate::error::Result;

/// Delimiters tried by the CSV sniffer, in priority order.
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Cell contents treated as a missing value.
pub const MISSING_MARKERS: [&str; 5] = ["NA", "N/A", "NaN", "nan", "null"];

fn normalize_cell(raw: &str) -> Option<String> {
    let v = raw.trim();
    if v.is_empty() || MISSING_MARKERS.contains(&v) {
        None
    } else {
        Some(v.to_string())
    }
}

/// Load a table, choosing the format from the file extension
/// (`.json` → JSON records, anything else → CSV).
pub fn load_table(path: &Path) -> Result<Table> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if is_json {
        load_json_records(path)
    } else {
        load_csv(path)
    }
}

/// Load a CSV file from disk.
pub fn load_csv(path: &Path) -> Result<Table> {
    let raw = std::fs::read(path)?;
    let table = load_csv_bytes(&raw)?;
    tracing::info!(
        "Loaded {}: {} rows, {} columns",
        path.display(),
        table.row_count(),
        table.columns().len()
    );
    Ok(table)
}

/// Parse CSV bytes, sniffing the delimiter.
pub fn load_csv_bytes(raw: &[u8]) -> Result<Table> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_start_matches('\u{feff}');

    for delimiter in CANDIDATE_DELIMITERS {
        match parse_delimited(text, delimiter, false) {
            Ok(table) if table.columns().len() > 1 => {
                tracing::debug!("Sniffed CSV delimiter {:?}", delimiter as char);
                return Ok(table);
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!("Delimiter {:?} rejected: {}", delimiter as char, e);
                continue;
            }
        }
    }

    // Single-column or irregular input: read permissively with commas.
    parse_delimited(text, b',', true)
}

fn parse_delimited(text: &str, delimiter: u8, flexible: bool) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(flexible)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let columns: Vec<String> = reader.headers()?.iter().map(String::from).collect();
    let width = columns.len();
    let mut table = Table::new(columns);

    for record in reader.records() {
        let record = record?;
        let mut row: Vec<Option<String>> = record.iter().map(normalize_cell).collect();
        // Only reachable in flexible mode.
        row.resize(width, None);
        table.push_row(row)?;
    }
    Ok(table)
}

/// Load a JSON file holding an array of flat objects.
pub fn load_json_records(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path)?;
    let table = load_json_str(&text)?;
    tracing::info!(
        "Loaded {}: {} rows, {} columns",
        path.display(),
        table.row_count(),
        table.columns().len()
    );
    Ok(table)
}

/// Parse a JSON array of objects. Nulls and absent keys are missing;
/// numbers and booleans are stringified; nested values keep their JSON text.
pub fn load_json_str(text: &str) -> Result<Table> {
    let records: Vec<serde_json::Map<String, Value>> = serde_json::from_str(text)?;

    let mut columns: Vec<String> = Vec::new();
    for record in &records {
        for key in record.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns.clone());
    for record in &records {
        let row = columns
            .iter()
            .map(|c| match record.get(c) {
                None | Some(Value::Null) => None,
                Some(Value::String(s)) => normalize_cell(s),
                Some(other) => Some(other.to_string()),
            })
            .collect();
        table.push_row(row)?;
    }
    Ok(table)
}
