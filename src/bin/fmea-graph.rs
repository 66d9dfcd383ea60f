//! fmea-graph CLI: import FMEA tables and generate grounded analyses.
//!
//! Usage:
//!   fmea-graph import <csv> [--db path]
//!   fmea-graph embed [--db path]
//!   fmea-graph ask <question> [--structure-output table.json]
//!   fmea-graph generate <stage> --input table.json --output table.json
//!   fmea-graph stats [--db path]

use clap::{Parser, Subcommand, ValueEnum};
use fmea_graph::embedding::{index_chunks, materialize_chunks, SemanticSearch};
use fmea_graph::import::read_records;
use fmea_graph::pipeline::structure_table;
use fmea_graph::{
    AuditLog, GraphImporter, GraphStore, HttpGenerationClient, OpenStore, Orchestrator,
    PipelineConfig, RetrievalFacade, SqliteStore, StagePipeline, StageRun, Table,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "fmea-graph",
    version,
    about = "FMEA knowledge graph import and grounded analysis generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Path to SQLite database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replace the graph with the records of a `;`-delimited CSV file
    Import {
        /// CSV file with one record per measure
        csv: PathBuf,
    },
    /// Materialize failure mode text chunks and index them
    Embed,
    /// Answer a question, or generate a system structure, from the graph
    Ask {
        question: String,
        /// Save generated structure rows as a table
        #[arg(long)]
        structure_output: Option<PathBuf>,
    },
    /// Run one generation stage over a table
    Generate {
        stage: StageArg,
        /// Current table (JSON)
        #[arg(long)]
        input: PathBuf,
        /// Where to write the generated table (JSON)
        #[arg(long)]
        output: PathBuf,
        /// Units in flight at once, overriding the config
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Print node and edge counts
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum StageArg {
    Functions,
    Failures,
    ExistingMeasures,
    RiskRatings,
    NewMeasures,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>, db: Option<PathBuf>) -> Result<PipelineConfig, String> {
    let mut config = PipelineConfig::load_or_default(path)
        .map_err(|e| format!("Failed to load config: {}", e))?;
    if let Some(db) = db {
        config.database = db;
    }
    Ok(config)
}

fn open_store(config: &PipelineConfig) -> Result<Arc<dyn GraphStore>, String> {
    let store = SqliteStore::open(&config.database)
        .map_err(|e| format!("Failed to open database: {}", e))?;
    Ok(Arc::new(store))
}

/// Vector index lives next to the graph database.
fn vector_db_path(config: &PipelineConfig) -> PathBuf {
    config.database.with_extension("vectors.db")
}

#[cfg(feature = "embeddings")]
fn semantic_search(config: &PipelineConfig) -> Option<SemanticSearch> {
    use fmea_graph::embedding::{FastEmbedEmbedder, SqliteVecIndex, DEFAULT_EMBEDDING_DIMENSIONS};

    let embedder = match FastEmbedEmbedder::default_model() {
        Ok(embedder) => embedder,
        Err(e) => {
            warn!(error = %e, "embedding model unavailable; semantic lookups disabled");
            return None;
        }
    };
    let index = match SqliteVecIndex::open(&vector_db_path(config), DEFAULT_EMBEDDING_DIMENSIONS) {
        Ok(index) => index,
        Err(e) => {
            warn!(error = %e, "vector index unavailable; semantic lookups disabled");
            return None;
        }
    };
    Some(SemanticSearch::new(Arc::new(embedder), Arc::new(index)))
}

#[cfg(not(feature = "embeddings"))]
fn semantic_search(_config: &PipelineConfig) -> Option<SemanticSearch> {
    warn!("built without the `embeddings` feature; semantic lookups disabled");
    None
}

fn build_pipeline(
    config: &PipelineConfig,
    concurrency: Option<usize>,
) -> Result<StagePipeline, String> {
    let store = open_store(config)?;
    let mut facade = RetrievalFacade::new(store).with_top_k(config.retrieval.top_k);
    if let Some(search) = semantic_search(config) {
        facade = facade.with_semantic(search);
    }

    let client = HttpGenerationClient::new(&config.generation).map_err(|e| e.to_string())?;

    let mut settings = config.orchestrator.clone();
    if let Some(concurrency) = concurrency {
        settings.concurrency = concurrency;
    }
    let orchestrator = Orchestrator::from_settings(&settings).map_err(|e| e.to_string())?;

    let audit = if config.audit.enabled {
        AuditLog::new(&config.audit.dir)
    } else {
        AuditLog::disabled()
    };
    Ok(StagePipeline::new(facade, Arc::new(client), orchestrator).with_audit(audit))
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Runtime::new().map_err(|e| format!("Failed to start runtime: {}", e))
}

fn cmd_import(config: &PipelineConfig, csv: &Path) -> i32 {
    let records = match read_records(csv) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    match GraphImporter::new(store).run(records) {
        Ok(summary) => {
            println!("{}", summary);
            for skipped in &summary.skipped {
                eprintln!("Warning: row {} skipped: {}", skipped.row, skipped.reason);
            }
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_embed(config: &PipelineConfig) -> i32 {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let chunks = match materialize_chunks(store.as_ref()) {
        Ok(chunks) => chunks,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("Materialized {} text chunks", chunks.len());

    let Some(search) = semantic_search(config) else {
        println!("Vector index not updated");
        return 0;
    };
    if let Err(e) = search.index().clear() {
        eprintln!("Error: {}", e);
        return 1;
    }
    match index_chunks(search.embedder().as_ref(), search.index().as_ref(), &chunks) {
        Ok(count) => {
            println!("Indexed {} chunks into {}", count, vector_db_path(config).display());
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn cmd_ask(config: &PipelineConfig, question: &str, structure_output: Option<&Path>) -> i32 {
    let result = runtime().and_then(|rt| {
        let pipeline = build_pipeline(config, None)?;
        rt.block_on(pipeline.answer_question(question))
            .map_err(|e| e.to_string())
    });
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    println!("Decision: {}", outcome.analysis_decision);
    println!("{}", outcome.answer_text());

    if let Some(path) = structure_output {
        let table = structure_table(&outcome);
        if table.is_empty() {
            eprintln!("Warning: answer contains no structure rows; nothing saved");
            return 0;
        }
        if let Err(e) = table.save(path) {
            eprintln!("Error: {}", e);
            return 1;
        }
        println!("Saved {} structure rows to {}", table.len(), path.display());
    }
    0
}

fn cmd_generate(
    config: &PipelineConfig,
    stage: StageArg,
    input: &Path,
    output: &Path,
    concurrency: Option<usize>,
) -> i32 {
    let table = match Table::load(input) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("Error: cannot read '{}': {}", input.display(), e);
            return 1;
        }
    };
    let result = runtime().and_then(|rt| {
        let pipeline = build_pipeline(config, concurrency)?;
        Ok(rt.block_on(async {
            match stage {
                StageArg::Functions => pipeline.generate_functions(&table).await,
                StageArg::Failures => pipeline.generate_failures(&table).await,
                StageArg::ExistingMeasures => pipeline.generate_existing_measures(&table).await,
                StageArg::RiskRatings => pipeline.generate_risk_ratings(&table).await,
                StageArg::NewMeasures => pipeline.generate_new_measures(&table).await,
            }
        }))
    });
    let run: StageRun = match result {
        Ok(run) => run,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };

    if let Err(e) = run.table.save(output) {
        eprintln!("Error: {}", e);
        return 1;
    }
    println!(
        "{} units, {} skipped, {} rows written to {}",
        run.units,
        run.skipped.len(),
        run.table.len(),
        output.display()
    );
    if let Some(audit) = &run.audit_file {
        println!("Audit log: {}", audit.display());
    }
    0
}

fn cmd_stats(config: &PipelineConfig) -> i32 {
    let store = match open_store(config) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let counts = match store.node_counts() {
        Ok(counts) => counts,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    println!("{:<16}  {:>8}", "KIND", "NODES");
    println!("{}", "-".repeat(26));
    for (kind, count) in counts {
        println!("{:<16}  {:>8}", kind.as_str(), count);
    }
    match store.count_edges(None) {
        Ok(edges) => {
            println!("{:<16}  {:>8}", "edges", edges);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match load_config(cli.config.as_deref(), cli.db) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Import { csv } => cmd_import(&config, &csv),
        Commands::Embed => cmd_embed(&config),
        Commands::Ask {
            question,
            structure_output,
        } => cmd_ask(&config, &question, structure_output.as_deref()),
        Commands::Generate {
            stage,
            input,
            output,
            concurrency,
        } => cmd_generate(&config, stage, &input, &output, concurrency),
        Commands::Stats => cmd_stats(&config),
    };
    std::process::exit(code);
}
