//! Response contract for generation calls
//!
//! Every stage asks the model for a JSON object with `analysis_decision` and
//! `content`. Model output is not trusted: fences are stripped, a content
//! value that is itself JSON-encoded is decoded once, and a content value of
//! the wrong shape is replaced by an empty default. Parse problems never
//! escape this module; they show up as an `ERROR: ...` decision instead.

use crate::table::{deserialize_rating, TableRow};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const PARSE_FAILED: &str = "ERROR: JSON parsing failed";
pub const INVALID_STRUCTURE: &str = "ERROR: Invalid response structure";

/// Generation stage, which fixes the expected content shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Functions,
    Failures,
    ExistingMeasures,
    RiskRating,
    NewMeasures,
    /// Free question answering or system structure generation
    Answer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    List,
    Object,
    /// Text or a list of structure rows
    Any,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Functions => "functions",
            Stage::Failures => "failures",
            Stage::ExistingMeasures => "existing_measures",
            Stage::RiskRating => "risk_rating",
            Stage::NewMeasures => "new_measures",
            Stage::Answer => "answer",
        }
    }

    fn shape(&self) -> Shape {
        match self {
            Stage::RiskRating => Shape::Object,
            Stage::Answer => Shape::Any,
            _ => Shape::List,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized content of a generation response
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GenerationContent {
    RawText(String),
    ParsedList(Vec<Value>),
    ParsedObject(Map<String, Value>),
}

impl GenerationContent {
    fn empty_for(stage: Stage, raw: &str) -> Self {
        match stage.shape() {
            Shape::List => GenerationContent::ParsedList(Vec::new()),
            Shape::Object => GenerationContent::ParsedObject(Map::new()),
            Shape::Any => GenerationContent::RawText(raw.to_string()),
        }
    }

    fn from_value(value: Value) -> Self {
        match value {
            Value::Array(items) => GenerationContent::ParsedList(items),
            Value::Object(map) => GenerationContent::ParsedObject(map),
            Value::String(s) => GenerationContent::RawText(s),
            other => GenerationContent::RawText(other.to_string()),
        }
    }
}

/// A failure triple proposed by the model
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct GeneratedFailure {
    #[serde(default)]
    pub failure_mode: Option<String>,
    #[serde(default)]
    pub failure_cause: Option<String>,
    #[serde(default)]
    pub failure_effect: Option<String>,
}

/// One measure proposed by the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedMeasure {
    Preventive(String),
    Detective(String),
}

impl GeneratedMeasure {
    /// `{"PreventiveMeasure": ..}` or `{"DetectiveMeasure": ..}`; preventive wins if both.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        if let Some(v) = object.get("PreventiveMeasure") {
            return v.as_str().map(|s| GeneratedMeasure::Preventive(s.to_string()));
        }
        object
            .get("DetectiveMeasure")
            .and_then(Value::as_str)
            .map(|s| GeneratedMeasure::Detective(s.to_string()))
    }

    pub fn name(&self) -> &str {
        match self {
            GeneratedMeasure::Preventive(name) | GeneratedMeasure::Detective(name) => name,
        }
    }
}

/// Severity, occurrence and detection as rated by the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RiskRatings {
    #[serde(default, deserialize_with = "deserialize_rating")]
    pub severity: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_rating")]
    pub occurrence: Option<u32>,
    #[serde(default, deserialize_with = "deserialize_rating")]
    pub detection: Option<u32>,
}

/// Validated result of one generation call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub analysis_decision: String,
    pub content: GenerationContent,
}

/// Remove markdown code fences and surrounding whitespace.
pub fn strip_fences(raw: &str) -> String {
    raw.trim()
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string()
}

impl GenerationOutcome {
    /// Parse raw model output for `stage`. Never fails.
    pub fn parse(stage: Stage, raw: &str) -> Self {
        let text = strip_fences(raw);
        let value: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) => return Self::error(stage, PARSE_FAILED, raw),
        };

        let mut object = match value {
            Value::Object(object)
                if object.contains_key("analysis_decision") && object.contains_key("content") =>
            {
                object
            }
            _ => return Self::error(stage, INVALID_STRUCTURE, raw),
        };

        let analysis_decision = match object.remove("analysis_decision") {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        };
        let content = object.remove("content").unwrap_or(Value::Null);

        Self {
            analysis_decision,
            content: Self::normalize_content(stage, content, raw),
        }
    }

    fn error(stage: Stage, decision: &str, raw: &str) -> Self {
        Self {
            analysis_decision: decision.to_string(),
            content: GenerationContent::empty_for(stage, raw),
        }
    }

    fn normalize_content(stage: Stage, content: Value, raw: &str) -> GenerationContent {
        match stage.shape() {
            Shape::Any => match content {
                Value::String(s) => {
                    let trimmed = s.trim();
                    if trimmed.starts_with('[') && trimmed.ends_with(']') {
                        if let Ok(Value::Array(items)) = serde_json::from_str(trimmed) {
                            return GenerationContent::ParsedList(items);
                        }
                    }
                    GenerationContent::RawText(s)
                }
                other => GenerationContent::from_value(other),
            },
            expected => {
                let decoded = match content {
                    Value::String(s) => match serde_json::from_str::<Value>(&s) {
                        Ok(value) => value,
                        Err(_) => return GenerationContent::empty_for(stage, raw),
                    },
                    other => other,
                };
                match (expected, decoded) {
                    (Shape::List, Value::Array(items)) => GenerationContent::ParsedList(items),
                    (Shape::Object, Value::Object(map)) => GenerationContent::ParsedObject(map),
                    _ => GenerationContent::empty_for(stage, raw),
                }
            }
        }
    }

    /// Whether the decision marks a failed unit
    pub fn is_error(&self) -> bool {
        self.analysis_decision.starts_with("ERROR")
    }

    fn list(&self) -> &[Value] {
        match &self.content {
            GenerationContent::ParsedList(items) => items,
            _ => &[],
        }
    }

    /// Function names; blank and non-string items are dropped.
    pub fn functions(&self) -> Vec<String> {
        self.list()
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn failures(&self) -> Vec<GeneratedFailure> {
        self.list()
            .iter()
            .filter(|v| v.is_object())
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    pub fn measures(&self) -> Vec<GeneratedMeasure> {
        self.list()
            .iter()
            .filter_map(GeneratedMeasure::from_value)
            .collect()
    }

    pub fn ratings(&self) -> RiskRatings {
        match &self.content {
            GenerationContent::ParsedObject(map) => {
                serde_json::from_value(Value::Object(map.clone())).unwrap_or_default()
            }
            _ => RiskRatings::default(),
        }
    }

    /// Structure rows from a system structure answer.
    pub fn structure_rows(&self) -> Vec<TableRow> {
        self.list()
            .iter()
            .filter(|v| v.is_object())
            .filter_map(|v| serde_json::from_value(v.clone()).ok())
            .collect()
    }

    /// Human-readable form of the content
    pub fn answer_text(&self) -> String {
        match &self.content {
            GenerationContent::RawText(text) => text.clone(),
            other => serde_json::to_string_pretty(other).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_double_encoded_empty_list_is_repaired() {
        let raw = "```json\n{\"analysis_decision\":\"ok\",\"content\":\"[]\"}\n```";
        let outcome = GenerationOutcome::parse(Stage::Failures, raw);
        assert_eq!(outcome.analysis_decision, "ok");
        assert_eq!(outcome.content, GenerationContent::ParsedList(vec![]));
        assert!(!outcome.is_error());
    }

    #[test]
    fn unparseable_text_is_an_error_decision() {
        let outcome = GenerationOutcome::parse(Stage::Functions, "Sure! Here are functions:");
        assert_eq!(outcome.analysis_decision, PARSE_FAILED);
        assert_eq!(outcome.content, GenerationContent::ParsedList(vec![]));
        assert!(outcome.is_error());
    }

    #[test]
    fn missing_key_is_invalid_structure() {
        let outcome = GenerationOutcome::parse(Stage::RiskRating, r#"{"content": {}}"#);
        assert_eq!(outcome.analysis_decision, INVALID_STRUCTURE);
        assert_eq!(outcome.content, GenerationContent::ParsedObject(Map::new()));

        let outcome = GenerationOutcome::parse(Stage::Failures, r#"["a"]"#);
        assert_eq!(outcome.analysis_decision, INVALID_STRUCTURE);
    }

    #[test]
    fn wrong_shape_falls_back_to_empty_default() {
        let outcome = GenerationOutcome::parse(
            Stage::ExistingMeasures,
            r#"{"analysis_decision":"EXACT MATCH","content":{"PreventiveMeasure":"x"}}"#,
        );
        assert_eq!(outcome.analysis_decision, "EXACT MATCH");
        assert_eq!(outcome.content, GenerationContent::ParsedList(vec![]));

        let outcome = GenerationOutcome::parse(
            Stage::RiskRating,
            r#"{"analysis_decision":"d","content":"not json"}"#,
        );
        assert_eq!(outcome.content, GenerationContent::ParsedObject(Map::new()));
    }

    #[test]
    fn typed_accessors_read_stage_content() {
        let functions = GenerationOutcome::parse(
            Stage::Functions,
            r#"{"analysis_decision":"d","content":["Pump coolant"," ",3]}"#,
        );
        assert_eq!(functions.functions(), vec!["Pump coolant".to_string()]);

        let failures = GenerationOutcome::parse(
            Stage::Failures,
            r#"{"analysis_decision":"d","content":[{"FailureMode":"Leak","FailureCause":"Wear","FailureEffect":"Heat"},"junk"]}"#,
        );
        assert_eq!(
            failures.failures(),
            vec![GeneratedFailure {
                failure_mode: Some("Leak".into()),
                failure_cause: Some("Wear".into()),
                failure_effect: Some("Heat".into()),
            }]
        );

        let measures = GenerationOutcome::parse(
            Stage::NewMeasures,
            r#"{"analysis_decision":"d","content":[{"PreventiveMeasure":"Audit"},{"DetectiveMeasure":"Sensor"},{"Other":"x"}]}"#,
        );
        assert_eq!(
            measures.measures(),
            vec![
                GeneratedMeasure::Preventive("Audit".into()),
                GeneratedMeasure::Detective("Sensor".into())
            ]
        );
    }

    #[test]
    fn ratings_accept_numbers_and_numeric_strings() {
        let outcome = GenerationOutcome::parse(
            Stage::RiskRating,
            r#"{"analysis_decision":"d","content":{"Severity":8,"Occurrence":"3","Detection":"n/a"}}"#,
        );
        assert_eq!(
            outcome.ratings(),
            RiskRatings {
                severity: Some(8),
                occurrence: Some(3),
                detection: None
            }
        );
    }

    #[test]
    fn answer_keeps_text_and_decodes_bracketed_lists() {
        let text = GenerationOutcome::parse(
            Stage::Answer,
            r#"{"analysis_decision":"EXACT MATCH","content":"Pumps leak when seals wear."}"#,
        );
        assert_eq!(text.answer_text(), "Pumps leak when seals wear.");

        let rows = GenerationOutcome::parse(
            Stage::Answer,
            r#"{"analysis_decision":"d","content":"[{\"Product\":\"Kettle\",\"Subsystem\":\"Heating\",\"SystemElement\":\"Coil\"}]"}"#,
        );
        let structure = rows.structure_rows();
        assert_eq!(structure.len(), 1);
        assert_eq!(structure[0].system_element.as_deref(), Some("Coil"));
    }

    #[test]
    fn failed_answer_keeps_raw_response() {
        let outcome = GenerationOutcome::parse(Stage::Answer, "plain prose");
        assert_eq!(outcome.analysis_decision, PARSE_FAILED);
        assert_eq!(outcome.answer_text(), "plain prose");
    }
}
