//! Flat input records and the `;`-delimited CSV reader

use super::{ImportError, ImportResult};
use crate::graph::MeasureKind;
use csv::{ReaderBuilder, StringRecord, Trim};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::warn;

/// One row of the tabular analysis.
///
/// Text fields are kept raw; the importer normalizes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportRecord {
    pub product: Option<String>,
    pub subsystem: Option<String>,
    pub system_element: Option<String>,
    pub function: Option<String>,
    pub failure_mode: Option<String>,
    pub failure_cause: Option<String>,
    pub failure_effect: Option<String>,
    pub measure_name: Option<String>,
    pub measure_type: Option<MeasureKind>,
    pub severity: Option<i64>,
    pub occurrence: Option<i64>,
    pub detection: Option<i64>,
}

impl ImportRecord {
    /// Record with the seven hierarchy/failure names set.
    pub fn new(
        product: &str,
        subsystem: &str,
        system_element: &str,
        function: &str,
        failure_mode: &str,
        failure_cause: &str,
        failure_effect: &str,
    ) -> Self {
        Self {
            product: Some(product.to_string()),
            subsystem: Some(subsystem.to_string()),
            system_element: Some(system_element.to_string()),
            function: Some(function.to_string()),
            failure_mode: Some(failure_mode.to_string()),
            failure_cause: Some(failure_cause.to_string()),
            failure_effect: Some(failure_effect.to_string()),
            ..Default::default()
        }
    }

    pub fn with_measure(mut self, name: &str, kind: MeasureKind) -> Self {
        self.measure_name = Some(name.to_string());
        self.measure_type = Some(kind);
        self
    }

    pub fn with_ratings(
        mut self,
        severity: Option<i64>,
        occurrence: Option<i64>,
        detection: Option<i64>,
    ) -> Self {
        self.severity = severity;
        self.occurrence = occurrence;
        self.detection = detection;
        self
    }
}

const COLUMNS: [&str; 12] = [
    "product",
    "subsystem",
    "system_element",
    "function",
    "failure_mode",
    "failure_cause",
    "failure_effect",
    "measure_name",
    "measure_type",
    "severity",
    "occurrence",
    "detection",
];

/// Read every parseable record from a CSV file.
pub fn read_records(path: impl AsRef<Path>) -> ImportResult<Vec<ImportRecord>> {
    let file = File::open(path)?;
    read_records_from(file)
}

/// Read records from any reader.
///
/// Lines that fail to parse are logged and skipped. Missing trailing
/// cells are treated as empty.
pub fn read_records_from<R: Read>(reader: R) -> ImportResult<Vec<ImportRecord>> {
    let mut csv = ReaderBuilder::new()
        .delimiter(b';')
        .quote(b'"')
        .double_quote(true)
        .trim(Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = csv.headers()?.clone();
    let columns = ColumnIndex::from_headers(&headers)?;

    let mut records = Vec::new();
    for (line, result) in csv.records().enumerate() {
        match result {
            Ok(row) => records.push(columns.record(&row)),
            Err(e) => warn!(line = line + 2, error = %e, "skipping unparseable csv line"),
        }
    }
    Ok(records)
}

struct ColumnIndex(HashMap<&'static str, usize>);

impl ColumnIndex {
    fn from_headers(headers: &StringRecord) -> ImportResult<Self> {
        let mut index = HashMap::new();
        for column in COLUMNS {
            let position = headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(column))
                .ok_or_else(|| ImportError::MissingColumn(column.to_string()))?;
            index.insert(column, position);
        }
        Ok(Self(index))
    }

    fn cell(&self, row: &StringRecord, column: &str) -> Option<String> {
        self.0
            .get(column)
            .and_then(|i| row.get(*i))
            .filter(|value| !value.trim().is_empty())
            .map(str::to_string)
    }

    fn record(&self, row: &StringRecord) -> ImportRecord {
        ImportRecord {
            product: self.cell(row, "product"),
            subsystem: self.cell(row, "subsystem"),
            system_element: self.cell(row, "system_element"),
            function: self.cell(row, "function"),
            failure_mode: self.cell(row, "failure_mode"),
            failure_cause: self.cell(row, "failure_cause"),
            failure_effect: self.cell(row, "failure_effect"),
            measure_name: self.cell(row, "measure_name"),
            measure_type: self
                .cell(row, "measure_type")
                .and_then(|v| MeasureKind::parse(&v)),
            severity: self.cell(row, "severity").and_then(|v| parse_rating(&v)),
            occurrence: self.cell(row, "occurrence").and_then(|v| parse_rating(&v)),
            detection: self.cell(row, "detection").and_then(|v| parse_rating(&v)),
        }
    }
}

/// Integer rating; spreadsheet exports sometimes write "7.0".
fn parse_rating(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(n) = value.parse::<i64>() {
        return Some(n);
    }
    match value.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
        _ => None,
    }
}
