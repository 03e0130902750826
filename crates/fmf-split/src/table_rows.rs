// SPDX-License-Identifier: MIT OR Apache-2.0
//! Row-oriented extraction from tabular inputs.

use fmf_core::TableRow;
use fmf_error::FmfError;
use fmf_ids::chunk_id as row_id_seed;
use std::collections::BTreeMap;

/// How to derive each row's `text` field.
#[derive(Debug, Clone)]
pub enum TextColumn {
    /// No derived text; `values` only.
    None,
    /// A single column's value, stringified.
    Single(String),
    /// Several columns, space-joined in order.
    Joined(Vec<String>),
}

/// De-duplicate header names by appending `_N` to repeats, matching the
/// convention used when a spreadsheet has blank or duplicate header cells.
#[must_use]
pub fn clean_headers(raw: &[String]) -> Vec<String> {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    raw.iter()
        .enumerate()
        .map(|(i, h)| {
            let base = if h.trim().is_empty() {
                format!("column_{i}")
            } else {
                h.trim().to_string()
            };
            let count = seen.entry(base.clone()).or_insert(0);
            let name = if *count == 0 { base.clone() } else { format!("{base}_{count}") };
            *count += 1;
            name
        })
        .collect()
}

fn derive_text(values: &BTreeMap<String, serde_json::Value>, text_column: &TextColumn) -> Option<String> {
    match text_column {
        TextColumn::None => None,
        TextColumn::Single(col) => values.get(col).map(value_to_text),
        TextColumn::Joined(cols) => {
            let parts: Vec<String> = cols
                .iter()
                .filter_map(|c| values.get(c))
                .map(value_to_text)
                .filter(|s| !s.is_empty())
                .collect();
            if parts.is_empty() { None } else { Some(parts.join(" ")) }
        }
    }
}

fn value_to_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse CSV bytes into rows, applying header de-duplication, an optional
/// column allow-list, and a derived `text` field.
pub fn iter_csv_rows(
    source_uri: &str,
    data: &[u8],
    pass_through: Option<&[String]>,
    text_column: &TextColumn,
) -> Result<Vec<TableRow>, FmfError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(data);
    let raw_headers: Vec<String> = reader
        .headers()
        .map_err(|e| FmfError::processing(format!("failed to read CSV headers: {e}")))?
        .iter()
        .map(str::to_string)
        .collect();
    let headers = clean_headers(&raw_headers);

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let record = record.map_err(|e| FmfError::processing(format!("failed to read CSV row {index}: {e}")))?;
        let mut values = BTreeMap::new();
        for (col_idx, header) in headers.iter().enumerate() {
            if let Some(allow) = pass_through {
                if !allow.iter().any(|a| a == header) {
                    continue;
                }
            }
            if let Some(cell) = record.get(col_idx) {
                values.insert(header.clone(), serde_json::Value::String(cell.to_string()));
            }
        }
        let text = derive_text(&values, text_column);
        let seed = format!("{source_uri}|row={index}");
        rows.push(TableRow {
            id: row_id_seed(&seed, index, &seed),
            doc_id: None,
            source_uri: source_uri.to_string(),
            index,
            values,
            text,
        });
    }
    Ok(rows)
}

/// Extension-based dispatch. Formats without an available reader are
/// rejected rather than silently skipped.
pub fn iter_table_rows(
    source_uri: &str,
    filename: &str,
    data: &[u8],
    pass_through: Option<&[String]>,
    text_column: &TextColumn,
) -> Result<Vec<TableRow>, FmfError> {
    let ext = filename.rsplit('.').next().unwrap_or_default().to_ascii_lowercase();
    match ext.as_str() {
        "csv" => iter_csv_rows(source_uri, data, pass_through, text_column),
        "xlsx" => Err(FmfError::processing(
            "reading .xlsx requires an optional dependency that is not installed",
        )),
        "parquet" => Err(FmfError::processing(
            "reading .parquet requires an optional dependency that is not installed",
        )),
        other => Err(FmfError::processing(format!("unsupported table extension: {other}"))),
    }
}
