//! Failure-chain extraction from the flat analysis table
//!
//! The table carries one row per measure, so a single failure chain is
//! spread across several rows. These functions regroup rows into unit
//! contexts for the generation stages.

use crate::retrieval::ChainContext;
use crate::table::TableRow;
use std::collections::{HashMap, HashSet};
use tracing::debug;

const NONE_LITERAL: &str = "None";

type ChainKey = [String; 7];

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

/// The seven names of a complete chain row.
fn chain_key(row: &TableRow) -> Option<ChainKey> {
    Some([
        present(&row.product)?.to_string(),
        present(&row.subsystem)?.to_string(),
        present(&row.system_element)?.to_string(),
        present(&row.function)?.to_string(),
        present(&row.failure_mode)?.to_string(),
        present(&row.failure_cause)?.to_string(),
        present(&row.failure_effect)?.to_string(),
    ])
}

fn add_measure(list: &mut Vec<String>, measure: &Option<String>) {
    if let Some(measure) = present(measure) {
        if measure != NONE_LITERAL && !list.iter().any(|m| m == measure) {
            list.push(measure.to_string());
        }
    }
}

fn context_from_key(key: &ChainKey) -> ChainContext {
    let [p, s, e, f, fm, fc, fe] = key;
    ChainContext::chain(p, s, e, f, fm, fc, fe)
}

/// Group complete rows into chains by their seven names.
///
/// Rows missing a name, or whose mode, cause or effect is the literal
/// `"None"`, are skipped. Measures are unioned in first-seen order.
pub fn extract_failure_chains(rows: &[TableRow]) -> Vec<ChainContext> {
    let mut order: Vec<ChainKey> = Vec::new();
    let mut grouped: HashMap<ChainKey, ChainContext> = HashMap::new();

    for (index, row) in rows.iter().enumerate() {
        let Some(key) = chain_key(row) else {
            debug!(row = index + 1, "skipping incomplete chain row");
            continue;
        };
        if key[4..].iter().any(|name| name == NONE_LITERAL) {
            debug!(row = index + 1, "skipping chain row with None values");
            continue;
        }
        let chain = grouped.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            context_from_key(&key)
        });
        add_measure(&mut chain.preventive_measure, &row.preventive_measure);
        add_measure(&mut chain.detective_measure, &row.detective_measure);
    }

    order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .collect()
}

fn sorted(list: &[String]) -> Vec<String> {
    let mut list = list.to_vec();
    list.sort();
    list
}

/// Drop chains equal to an earlier one under a canonical key: the seven
/// names plus the sorted measure lists.
pub fn dedup_chains(chains: Vec<ChainContext>) -> Vec<ChainContext> {
    let mut seen = HashSet::new();
    chains
        .into_iter()
        .filter(|chain| {
            let names: Vec<Option<String>> = chain
                .names()
                .iter()
                .map(|name| name.map(str::to_string))
                .collect();
            let key = (
                names,
                sorted(&chain.preventive_measure),
                sorted(&chain.detective_measure),
            );
            seen.insert(key)
        })
        .collect()
}

/// Both passes: group rows into chains, then drop canonical duplicates.
pub fn unique_failure_chains(rows: &[TableRow]) -> Vec<ChainContext> {
    let chains = extract_failure_chains(rows);
    let before = chains.len();
    let unique = dedup_chains(chains);
    debug!(chains = before, unique = unique.len(), "extracted failure chains");
    unique
}

/// Group complete rows by the seven names plus the three ratings.
pub fn extract_chains_with_ratings(rows: &[TableRow]) -> Vec<ChainContext> {
    type RatedKey = (ChainKey, Option<u32>, Option<u32>, Option<u32>);
    let mut order: Vec<RatedKey> = Vec::new();
    let mut grouped: HashMap<RatedKey, ChainContext> = HashMap::new();

    for row in rows {
        let Some(names) = chain_key(row) else {
            continue;
        };
        let key = (names, row.occurrence, row.detection, row.severity);
        let chain = grouped.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            context_from_key(&key.0).with_ratings(row.severity, row.occurrence, row.detection)
        });
        add_measure(&mut chain.preventive_measure, &row.preventive_measure);
        add_measure(&mut chain.detective_measure, &row.detective_measure);
    }

    order
        .into_iter()
        .filter_map(|key| grouped.remove(&key))
        .collect()
}

fn unique_contexts(contexts: impl Iterator<Item = ChainContext>) -> Vec<ChainContext> {
    let mut seen = HashSet::new();
    contexts.filter(|ctx| seen.insert(ctx.clone())).collect()
}

/// One context per distinct (product, subsystem, element) row.
pub fn extract_system_elements(rows: &[TableRow]) -> Vec<ChainContext> {
    unique_contexts(rows.iter().filter_map(|row| {
        Some(ChainContext::element(
            present(&row.product)?,
            present(&row.subsystem)?,
            present(&row.system_element)?,
        ))
    }))
}

/// One context per distinct (product, subsystem, element, function) row.
pub fn extract_functions(rows: &[TableRow]) -> Vec<ChainContext> {
    unique_contexts(rows.iter().filter_map(|row| {
        Some(ChainContext::function(
            present(&row.product)?,
            present(&row.subsystem)?,
            present(&row.system_element)?,
            present(&row.function)?,
        ))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fm: &str, preventive: Option<&str>, detective: Option<&str>) -> TableRow {
        TableRow {
            product: Some("Engine".into()),
            subsystem: Some("Cooling".into()),
            system_element: Some("Pump".into()),
            function: Some("Circulate".into()),
            failure_mode: Some(fm.into()),
            failure_cause: Some("Wear".into()),
            failure_effect: Some("Heat".into()),
            preventive_measure: preventive.map(str::to_string),
            detective_measure: detective.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn rows_of_one_chain_merge_their_measures() {
        let rows = vec![
            row("Leak", Some("Audit"), None),
            row("Leak", None, Some("Sensor")),
            row("Leak", Some("Audit"), Some("None")),
            row("Crack", None, None),
        ];
        let chains = extract_failure_chains(&rows);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].failure_mode.as_deref(), Some("Leak"));
        assert_eq!(chains[0].preventive_measure, vec!["Audit"]);
        assert_eq!(chains[0].detective_measure, vec!["Sensor"]);
        assert!(chains[1].preventive_measure.is_empty());
    }

    #[test]
    fn incomplete_and_none_rows_are_skipped() {
        let mut missing = row("Leak", None, None);
        missing.function = None;
        let mut blank = row("Leak", None, None);
        blank.product = Some("  ".into());
        let rows = vec![missing, blank, row("None", None, None)];
        assert!(extract_failure_chains(&rows).is_empty());
    }

    #[test]
    fn measure_order_does_not_affect_dedup() {
        let a = ChainContext::chain("P", "S", "E", "F", "M", "C", "X")
            .with_measures(vec!["a".into(), "b".into()], vec![]);
        let b = ChainContext::chain("P", "S", "E", "F", "M", "C", "X")
            .with_measures(vec!["b".into(), "a".into()], vec![]);
        let c = ChainContext::chain("P", "S", "E", "F", "M", "C", "X")
            .with_measures(vec!["a".into()], vec![]);
        let unique = dedup_chains(vec![a.clone(), b, c]);
        assert_eq!(unique.len(), 2);
        assert_eq!(unique[0], a);
    }

    #[test]
    fn ratings_split_chains() {
        let mut rated = row("Leak", Some("Audit"), None);
        rated.severity = Some(7);
        let mut rated_again = row("Leak", Some("Training"), None);
        rated_again.severity = Some(7);
        let mut other = row("Leak", None, None);
        other.severity = Some(3);

        let chains = extract_chains_with_ratings(&[rated, rated_again, other]);
        assert_eq!(chains.len(), 2);
        assert_eq!(chains[0].severity, Some(7));
        assert_eq!(chains[0].preventive_measure, vec!["Audit", "Training"]);
        assert_eq!(chains[1].severity, Some(3));
    }

    #[test]
    fn unit_contexts_skip_incomplete_rows_and_repeat_contexts() {
        let mut no_function = row("Leak", None, None);
        no_function.function = None;
        let rows = vec![row("Leak", None, None), row("Crack", None, None), no_function];

        assert_eq!(extract_system_elements(&rows).len(), 1);
        let functions = extract_functions(&rows);
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].function.as_deref(), Some("Circulate"));
        assert_eq!(functions[0].failure_mode, None);
    }
}
