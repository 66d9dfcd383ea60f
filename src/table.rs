//! The FMEA output table and its per-stage row builders
//!
//! Every generation stage turns unit contexts plus generated content into
//! rows of a fresh table. Row ids continue from the table's current maximum.

use crate::generation::{GeneratedFailure, GeneratedMeasure, RiskRatings};
use crate::retrieval::ChainContext;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type TableResult<T> = Result<T, TableError>;

/// Integer rating from a JSON number or numeric string; anything else is absent.
pub(crate) fn rating_from_value(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .or_else(|| float_rating(n.as_f64()?)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u32>()
                .ok()
                .or_else(|| float_rating(s.parse::<f64>().ok()?))
        }
        _ => None,
    }
}

fn float_rating(f: f64) -> Option<u32> {
    (f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64).then_some(f as u32)
}

pub(crate) fn deserialize_rating<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(rating_from_value))
}

/// One row of the analysis table
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TableRow {
    #[serde(rename = "row_id", default)]
    pub row_id: u64,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub subsystem: Option<String>,
    #[serde(default)]
    pub system_element: Option<String>,
    #[serde(default)]
    pub function: Option<String>,
    #[serde(default)]
    pub failure_mode: Option<String>,
    #[serde(default)]
    pub failure_cause: Option<String>,
    #[serde(default)]
    pub failure_effect: Option<String>,
    #[serde(default)]
    pub preventive_measure: Option<String>,
    #[serde(default)]
    pub detective_measure: Option<String>,
    #[serde(default, alias = "SeverityRating", deserialize_with = "deserialize_rating")]
    pub severity: Option<u32>,
    #[serde(default, alias = "OccurrenceRating", deserialize_with = "deserialize_rating")]
    pub occurrence: Option<u32>,
    #[serde(default, alias = "DetectionRating", deserialize_with = "deserialize_rating")]
    pub detection: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_preventive_measure: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_detective_measure: Option<String>,
}

impl TableRow {
    /// Row carrying the seven context names of `ctx` and nothing else.
    pub fn from_context(ctx: &ChainContext) -> Self {
        Self {
            product: ctx.product.clone(),
            subsystem: ctx.subsystem.clone(),
            system_element: ctx.system_element.clone(),
            function: ctx.function.clone(),
            failure_mode: ctx.failure_mode.clone(),
            failure_cause: ctx.failure_cause.clone(),
            failure_effect: ctx.failure_effect.clone(),
            ..Default::default()
        }
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

fn joined(items: &[String]) -> Option<String> {
    (!items.is_empty()).then(|| items.join(", "))
}

/// Ordered analysis table, serialized as a plain JSON array of rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: Vec<TableRow>,
    /// Highest row id present; 0 when empty
    max_id: u64,
}

impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.rows.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Table {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<TableRow>::deserialize(deserializer).map(Self::from_rows)
    }
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<TableRow>) -> Self {
        let max_id = rows.iter().map(|r| r.row_id).max().unwrap_or(0);
        Self { rows, max_id }
    }

    pub fn load(path: impl AsRef<Path>) -> TableResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> TableResult<()> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<TableRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn next_row_id(&self) -> u64 {
        self.max_id + 1
    }

    /// Append a row, assigning the next row id.
    pub fn push(&mut self, mut row: TableRow) {
        self.max_id += 1;
        row.row_id = self.max_id;
        self.rows.push(row);
    }

    // === Stage row builders ===

    /// One row per generated function.
    pub fn add_functions(&mut self, ctx: &ChainContext, functions: &[String]) {
        for function in functions {
            self.push(TableRow {
                product: ctx.product.clone(),
                subsystem: ctx.subsystem.clone(),
                system_element: ctx.system_element.clone(),
                function: Some(function.clone()),
                ..Default::default()
            });
        }
    }

    /// One row per generated failure triple.
    pub fn add_failures(&mut self, ctx: &ChainContext, failures: &[GeneratedFailure]) {
        for failure in failures {
            self.push(TableRow {
                product: ctx.product.clone(),
                subsystem: ctx.subsystem.clone(),
                system_element: ctx.system_element.clone(),
                function: ctx.function.clone(),
                failure_mode: failure.failure_mode.clone(),
                failure_cause: failure.failure_cause.clone(),
                failure_effect: failure.failure_effect.clone(),
                ..Default::default()
            });
        }
    }

    /// One row per non-blank measure.
    pub fn add_existing_measures(&mut self, ctx: &ChainContext, measures: &[GeneratedMeasure]) {
        for measure in measures {
            let Some(name) = non_blank(measure.name()) else {
                continue;
            };
            let mut row = TableRow::from_context(ctx);
            match measure {
                GeneratedMeasure::Preventive(_) => row.preventive_measure = Some(name),
                GeneratedMeasure::Detective(_) => row.detective_measure = Some(name),
            }
            self.push(row);
        }
    }

    /// Detective measure rows first, then preventive, each with the ratings.
    ///
    /// A chain without measures still gets one ratings-only row.
    pub fn add_risk_ratings(&mut self, ctx: &ChainContext, ratings: &RiskRatings) {
        let rated = |mut row: TableRow| {
            row.severity = ratings.severity;
            row.occurrence = ratings.occurrence;
            row.detection = ratings.detection;
            row
        };

        if ctx.detective_measure.is_empty() && ctx.preventive_measure.is_empty() {
            self.push(rated(TableRow::from_context(ctx)));
            return;
        }
        for measure in &ctx.detective_measure {
            let mut row = TableRow::from_context(ctx);
            row.detective_measure = Some(measure.clone());
            self.push(rated(row));
        }
        for measure in &ctx.preventive_measure {
            let mut row = TableRow::from_context(ctx);
            row.preventive_measure = Some(measure.clone());
            self.push(rated(row));
        }
    }

    /// A single row: existing and new measures comma-joined.
    pub fn add_new_measures(&mut self, ctx: &ChainContext, measures: &[GeneratedMeasure]) {
        let mut new_preventive = Vec::new();
        let mut new_detective = Vec::new();
        for measure in measures {
            match measure {
                GeneratedMeasure::Preventive(name) => new_preventive.extend(non_blank(name)),
                GeneratedMeasure::Detective(name) => new_detective.extend(non_blank(name)),
            }
        }

        let mut row = TableRow::from_context(ctx);
        row.preventive_measure = joined(&ctx.preventive_measure);
        row.detective_measure = joined(&ctx.detective_measure);
        row.severity = ctx.severity;
        row.occurrence = ctx.occurrence;
        row.detection = ctx.detection;
        row.new_preventive_measure = joined(&new_preventive);
        row.new_detective_measure = joined(&new_detective);
        self.push(row);
    }

    /// Append externally produced rows, renumbering them.
    pub fn extend_rows(&mut self, rows: impl IntoIterator<Item = TableRow>) {
        for row in rows {
            self.push(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain() -> ChainContext {
        ChainContext::chain("Engine", "Cooling", "Pump", "Circulate", "Leak", "Wear", "Heat")
    }

    #[test]
    fn row_ids_continue_from_maximum() {
        let mut table = Table::from_rows(vec![TableRow {
            row_id: 7,
            ..Default::default()
        }]);
        table.add_functions(&chain(), &["A".into(), "B".into()]);
        let ids: Vec<u64> = table.rows().iter().map(|r| r.row_id).collect();
        assert_eq!(ids, vec![7, 8, 9]);
    }

    #[test]
    fn loaded_table_continues_numbering() {
        let json = r#"[{"row_id": 3}, {"row_id": 12}, {"row_id": 5}]"#;
        let mut table: Table = serde_json::from_str(json).unwrap();
        assert_eq!(table.next_row_id(), 13);
        table.push(TableRow::default());
        assert_eq!(table.rows()[3].row_id, 13);
        assert_eq!(table.next_row_id(), 14);
    }

    #[test]
    fn large_tables_number_rows_sequentially() {
        let mut table = Table::new();
        let functions: Vec<String> = (0..20_000).map(|i| format!("F{i}")).collect();
        for chunk in functions.chunks(100) {
            table.add_functions(&chain(), chunk);
        }
        assert_eq!(table.len(), 20_000);
        assert!(table.rows().iter().enumerate().all(|(i, r)| r.row_id == i as u64 + 1));
        assert_eq!(table, Table::from_rows(table.rows().to_vec()));
    }

    #[test]
    fn function_rows_keep_only_hierarchy() {
        let mut table = Table::new();
        table.add_functions(&chain(), &["Pump coolant".into()]);
        let row = &table.rows()[0];
        assert_eq!(row.row_id, 1);
        assert_eq!(row.function.as_deref(), Some("Pump coolant"));
        assert_eq!(row.failure_mode, None);
    }

    #[test]
    fn existing_measures_skip_blank_names() {
        let mut table = Table::new();
        table.add_existing_measures(
            &chain(),
            &[
                GeneratedMeasure::Preventive("Audit".into()),
                GeneratedMeasure::Detective("  ".into()),
                GeneratedMeasure::Detective("Sensor".into()),
            ],
        );
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].preventive_measure.as_deref(), Some("Audit"));
        assert_eq!(table.rows()[1].detective_measure.as_deref(), Some("Sensor"));
        assert_eq!(table.rows()[1].preventive_measure, None);
    }

    #[test]
    fn risk_rating_rows_put_detective_first() {
        let mut ctx = chain();
        ctx.preventive_measure = vec!["Audit".into()];
        ctx.detective_measure = vec!["Sensor".into(), "Probe".into()];
        let ratings = RiskRatings {
            severity: Some(8),
            occurrence: Some(3),
            detection: Some(5),
        };

        let mut table = Table::new();
        table.add_risk_ratings(&ctx, &ratings);
        let measures: Vec<_> = table
            .rows()
            .iter()
            .map(|r| (r.detective_measure.clone(), r.preventive_measure.clone()))
            .collect();
        assert_eq!(
            measures,
            vec![
                (Some("Sensor".into()), None),
                (Some("Probe".into()), None),
                (None, Some("Audit".into())),
            ]
        );
        assert!(table.rows().iter().all(|r| r.severity == Some(8) && r.detection == Some(5)));
    }

    #[test]
    fn chain_without_measures_gets_ratings_only_row() {
        let mut table = Table::new();
        table.add_risk_ratings(&chain(), &RiskRatings::default());
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].failure_cause.as_deref(), Some("Wear"));
    }

    #[test]
    fn new_measures_collapse_into_one_row() {
        let mut ctx = chain();
        ctx.preventive_measure = vec!["Audit".into(), "Training".into()];
        ctx.severity = Some(9);
        let mut table = Table::new();
        table.add_new_measures(
            &ctx,
            &[
                GeneratedMeasure::Preventive("Redesign seal".into()),
                GeneratedMeasure::Detective("Leak sensor".into()),
                GeneratedMeasure::Detective("Dye test".into()),
            ],
        );
        let row = &table.rows()[0];
        assert_eq!(row.preventive_measure.as_deref(), Some("Audit, Training"));
        assert_eq!(row.detective_measure, None);
        assert_eq!(row.new_preventive_measure.as_deref(), Some("Redesign seal"));
        assert_eq!(row.new_detective_measure.as_deref(), Some("Leak sensor, Dye test"));
        assert_eq!(row.severity, Some(9));
    }

    #[test]
    fn rows_use_pascal_case_and_accept_legacy_rating_names() {
        let row: TableRow = serde_json::from_value(json!({
            "row_id": 3,
            "Product": "Engine",
            "SystemElement": "Pump",
            "SeverityRating": "7",
            "Occurrence": 2.0,
            "Detection": null
        }))
        .unwrap();
        assert_eq!(row.severity, Some(7));
        assert_eq!(row.occurrence, Some(2));
        assert_eq!(row.detection, None);

        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["SystemElement"], json!("Pump"));
        assert_eq!(value["Severity"], json!(7));
        assert!(value.get("NewPreventiveMeasure").is_none());
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("table.json");
        let mut table = Table::new();
        table.add_functions(&chain(), &["Pump coolant".into()]);
        table.save(&path).unwrap();
        assert_eq!(Table::load(&path).unwrap(), table);
    }
}
