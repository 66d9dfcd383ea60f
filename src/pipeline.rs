//! End-to-end stage pipelines
//!
//! Each stage reads the current table, builds unit contexts, runs them
//! through the orchestrator and returns a fresh table built from the
//! succeeded units in submission order. Decisions go to the audit log.

use crate::audit::AuditLog;
use crate::chains::{
    extract_chains_with_ratings, extract_functions, extract_system_elements,
    unique_failure_chains,
};
use crate::embedding::SearchHit;
use crate::fusion::{fuse, ContextBlob};
use crate::generation::{
    extract_entities, generate, prompts, GenerationClient, GenerationError, GenerationOutcome,
    Stage,
};
use crate::orchestrator::{BatchReport, Orchestrator, UnitSkip, UnitWork};
use crate::retrieval::{ChainContext, GraphRecord, LookupStage, RetrievalFacade};
use crate::table::Table;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// One stage's retrieval and generation for a single chain context.
struct StageWork {
    facade: RetrievalFacade,
    client: Arc<dyn GenerationClient>,
    stage: Stage,
    lookup: LookupStage,
}

#[async_trait]
impl UnitWork for StageWork {
    type Context = ChainContext;
    type Structural = GraphRecord;
    type Semantic = SearchHit;

    fn structural(&self, ctx: &ChainContext) -> Vec<GraphRecord> {
        self.facade.structural(self.lookup, ctx)
    }

    fn semantic(&self, ctx: &ChainContext) -> Vec<SearchHit> {
        self.facade.semantic(self.lookup, ctx)
    }

    async fn generate(
        &self,
        ctx: &ChainContext,
        blob: &ContextBlob,
    ) -> Result<GenerationOutcome, GenerationError> {
        let request = prompts::unit_request(self.stage, ctx, &blob.to_string());
        generate(self.client.as_ref(), self.stage, &request).await
    }

    fn describe(&self, ctx: &ChainContext) -> String {
        let target = match self.stage {
            Stage::Functions => &ctx.system_element,
            Stage::Failures => &ctx.function,
            _ => &ctx.failure_cause,
        };
        target.clone().unwrap_or_default()
    }
}

/// Result of one stage run
#[derive(Debug, Clone)]
pub struct StageRun {
    pub table: Table,
    pub units: usize,
    pub skipped: Vec<UnitSkip<ChainContext>>,
    /// Audit file written for this run, if any
    pub audit_file: Option<PathBuf>,
}

/// Runs the generation stages against one graph and one generation client.
pub struct StagePipeline {
    facade: RetrievalFacade,
    client: Arc<dyn GenerationClient>,
    orchestrator: Orchestrator,
    audit: AuditLog,
}

impl StagePipeline {
    pub fn new(
        facade: RetrievalFacade,
        client: Arc<dyn GenerationClient>,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            facade,
            client,
            orchestrator,
            audit: AuditLog::disabled(),
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = audit;
        self
    }

    /// Functions for every distinct system element.
    pub async fn generate_functions(&self, table: &Table) -> StageRun {
        let units = extract_system_elements(table.rows());
        self.run_stage(Stage::Functions, LookupStage::Functions, units, |out, ctx, outcome| {
            out.add_functions(ctx, &outcome.functions())
        })
        .await
    }

    /// Failure mode, cause and effect triples for every distinct function.
    pub async fn generate_failures(&self, table: &Table) -> StageRun {
        let units = extract_functions(table.rows());
        self.run_stage(Stage::Failures, LookupStage::Failures, units, |out, ctx, outcome| {
            out.add_failures(ctx, &outcome.failures())
        })
        .await
    }

    /// Existing preventive and detective measures for every failure chain.
    pub async fn generate_existing_measures(&self, table: &Table) -> StageRun {
        let units = unique_failure_chains(table.rows());
        self.run_stage(
            Stage::ExistingMeasures,
            LookupStage::Measures,
            units,
            |out, ctx, outcome| out.add_existing_measures(ctx, &outcome.measures()),
        )
        .await
    }

    /// Severity, occurrence and detection for every failure chain.
    pub async fn generate_risk_ratings(&self, table: &Table) -> StageRun {
        let units = unique_failure_chains(table.rows());
        self.run_stage(Stage::RiskRating, LookupStage::Ratings, units, |out, ctx, outcome| {
            out.add_risk_ratings(ctx, &outcome.ratings())
        })
        .await
    }

    /// Improvement measures for every rated failure chain.
    pub async fn generate_new_measures(&self, table: &Table) -> StageRun {
        let units = extract_chains_with_ratings(table.rows());
        self.run_stage(
            Stage::NewMeasures,
            LookupStage::Measures,
            units,
            |out, ctx, outcome| out.add_new_measures(ctx, &outcome.measures()),
        )
        .await
    }

    async fn run_stage<F>(
        &self,
        stage: Stage,
        lookup: LookupStage,
        units: Vec<ChainContext>,
        add_rows: F,
    ) -> StageRun
    where
        F: Fn(&mut Table, &ChainContext, &GenerationOutcome),
    {
        let work = Arc::new(StageWork {
            facade: self.facade.clone(),
            client: self.client.clone(),
            stage,
            lookup,
        });
        let total = units.len();
        info!(%stage, units = total, concurrency = self.orchestrator.concurrency(), "stage started");

        let report: BatchReport<ChainContext> = self.orchestrator.run(work, units).await;

        let mut table = Table::new();
        for success in &report.succeeded {
            add_rows(&mut table, &success.context, &success.outcome);
        }
        for skip in &report.skipped {
            warn!(%stage, unit = skip.index, reason = %skip.reason, "unit skipped");
        }
        let audit_file = self.audit.record(
            stage,
            report
                .succeeded
                .iter()
                .map(|s| (&s.context, s.outcome.analysis_decision.as_str())),
        );

        info!(
            %stage,
            processed = report.succeeded.len(),
            skipped = report.skipped.len(),
            rows = table.len(),
            "stage complete"
        );
        StageRun {
            table,
            units: total,
            skipped: report.skipped,
            audit_file,
        }
    }

    /// Answer a free question, or generate a system structure, from the
    /// entities it mentions and a semantic search over the question.
    pub async fn answer_question(&self, question: &str) -> Result<GenerationOutcome, GenerationError> {
        let entities = extract_entities(self.client.as_ref(), question).await;
        info!(entities = entities.iter().count(), "entities extracted");

        let facade = self.facade.clone();
        let text = question.to_string();
        let (rows, hits) = tokio::task::spawn_blocking(move || facade.question(&entities, &text))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "question lookup task failed");
                (Vec::new(), Vec::new())
            });

        let blob = fuse(&rows, &hits);
        let request = prompts::answer_request(question, &blob.to_string());
        generate(self.client.as_ref(), Stage::Answer, &request).await
    }
}

/// Table of the structure rows in a generated system structure answer.
pub fn structure_table(outcome: &GenerationOutcome) -> Table {
    let mut table = Table::new();
    table.extend_rows(outcome.structure_rows());
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::MockClient;
    use crate::graph::MeasureKind;
    use crate::import::{GraphImporter, ImportRecord};
    use crate::storage::{GraphStore, OpenStore, SqliteStore};
    use crate::table::TableRow;

    fn create_test_facade() -> RetrievalFacade {
        let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let records = vec![
            ImportRecord::new("Engine", "Cooling", "Pump", "Circulate coolant", "Leakage", "Seal wear", "Overheating")
                .with_measure("Seal inspection", MeasureKind::Preventive)
                .with_ratings(Some(8), Some(4), Some(3)),
        ];
        GraphImporter::new(store.clone()).run(records).unwrap();
        RetrievalFacade::new(store)
    }

    fn pipeline(client: Arc<MockClient>) -> StagePipeline {
        StagePipeline::new(create_test_facade(), client, Orchestrator::new(4).unwrap())
    }

    fn element_row(element: &str) -> TableRow {
        TableRow {
            product: Some("Engine".into()),
            subsystem: Some("Cooling".into()),
            system_element: Some(element.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn functions_stage_builds_fresh_table() {
        let client = MockClient::available()
            .with_response(
                "System Element: Pump",
                r#"{"analysis_decision":"EXACT MATCH","content":["Circulate coolant","Hold pressure"]}"#,
            )
            .with_response(
                "System Element: Fan",
                r#"{"analysis_decision":"NO MATCH","content":"[\"Move air\"]"}"#,
            );
        let client = Arc::new(client);
        let table = Table::from_rows(vec![element_row("Pump"), element_row("Fan"), element_row("Pump")]);

        let run = pipeline(client).generate_functions(&table).await;
        assert_eq!(run.units, 2);
        assert!(run.skipped.is_empty());
        let functions: Vec<_> = run
            .table
            .rows()
            .iter()
            .map(|r| (r.row_id, r.function.clone().unwrap()))
            .collect();
        assert_eq!(
            functions,
            vec![
                (1, "Circulate coolant".to_string()),
                (2, "Hold pressure".to_string()),
                (3, "Move air".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn prompt_carries_fused_graph_context() {
        let client = Arc::new(
            MockClient::available()
                .with_default(r#"{"analysis_decision":"EXACT MATCH","content":[]}"#),
        );
        let pipeline = pipeline(client.clone());
        pipeline
            .generate_functions(&Table::from_rows(vec![element_row("Pump")]))
            .await;

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].human.contains("=== GRAPH QUERY DATA ==="));
        assert!(requests[0].human.contains("Circulate coolant"));
    }

    #[tokio::test]
    async fn failed_units_are_skipped_and_audited_out() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(
            MockClient::available()
                .with_response("System Element: Pump", "garbage")
                .with_default(r#"{"analysis_decision":"EXACT MATCH","content":["Move air"]}"#),
        );
        let run = pipeline(client)
            .with_audit(AuditLog::new(dir.path()))
            .generate_functions(&Table::from_rows(vec![element_row("Pump"), element_row("Fan")]))
            .await;

        assert_eq!(run.table.len(), 1);
        assert_eq!(run.skipped.len(), 1);
        assert_eq!(run.skipped[0].context.system_element.as_deref(), Some("Pump"));

        let audit = std::fs::read_to_string(run.audit_file.unwrap()).unwrap();
        assert_eq!(audit.lines().collect::<Vec<_>>(), vec!["system_element,analysis_decision", "Fan,EXACT MATCH"]);
    }

    #[tokio::test]
    async fn risk_ratings_stage_rates_each_measure_row() {
        let client = Arc::new(MockClient::available().with_default(
            r#"{"analysis_decision":"EXACT MATCH","content":{"Severity":8,"Occurrence":"4","Detection":3}}"#,
        ));
        let chain = TableRow {
            function: Some("Circulate coolant".into()),
            failure_mode: Some("Leakage".into()),
            failure_cause: Some("Seal wear".into()),
            failure_effect: Some("Overheating".into()),
            preventive_measure: Some("Seal inspection".into()),
            ..element_row("Pump")
        };
        let detective = TableRow {
            preventive_measure: None,
            detective_measure: Some("Pressure test".into()),
            ..chain.clone()
        };

        let run = pipeline(client)
            .generate_risk_ratings(&Table::from_rows(vec![chain, detective]))
            .await;
        assert_eq!(run.units, 1);
        let rows = run.table.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].detective_measure.as_deref(), Some("Pressure test"));
        assert_eq!(rows[1].preventive_measure.as_deref(), Some("Seal inspection"));
        assert!(rows.iter().all(|r| r.occurrence == Some(4)));
    }

    #[tokio::test]
    async fn question_flow_uses_extracted_entities() {
        let client = Arc::new(
            MockClient::available()
                .with_response("Extract FMEA entities", r#"{"SystemElement":["Pump"],"Function":[]}"#)
                .with_response(
                    "USER REQUEST",
                    r#"{"analysis_decision":"EXACT MATCH","content":"The pump circulates coolant."}"#,
                ),
        );
        let outcome = pipeline(client.clone())
            .answer_question("What does the pump do?")
            .await
            .unwrap();
        assert_eq!(outcome.answer_text(), "The pump circulates coolant.");

        let answer = &client.requests()[1];
        assert!(answer.human.contains("Circulate coolant"));
    }

    #[test]
    fn structure_answer_becomes_table() {
        let outcome = GenerationOutcome::parse(
            Stage::Answer,
            r#"{"analysis_decision":"NO MATCH","content":[{"Product":"Drone","Subsystem":"Power","SystemElement":"Battery"}]}"#,
        );
        let table = structure_table(&outcome);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows()[0].row_id, 1);
        assert_eq!(table.rows()[0].system_element.as_deref(), Some("Battery"));
    }
}
