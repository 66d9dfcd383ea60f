//! FMEA Graph: knowledge graph import and grounded analysis generation
//!
//! Flat FMEA tables (product, subsystem, element, function, failure mode,
//! cause, effect, measures and ratings) are imported into a deduplicated
//! property graph. Later analyses are generated one unit at a time: each
//! unit retrieves structural neighbors from the graph and semantic hits
//! from a vector index, fuses them into one context blob and asks a
//! generation model for a structured answer.
//!
//! # Core Concepts
//!
//! - **Import**: natural keys make a failure mode shared by several rows
//!   or functions a single node
//! - **Retrieval**: one structural and one semantic lookup per unit, both
//!   empty rather than failing
//! - **Orchestration**: many units in flight under a concurrency cap, with
//!   failures isolated per unit
//!
//! # Example
//!
//! ```
//! use fmea_graph::{GraphImporter, GraphStore, ImportRecord, OpenStore, SqliteStore};
//! use std::sync::Arc;
//!
//! let store: Arc<dyn GraphStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
//! let record = ImportRecord::new("Engine", "Cooling", "Pump", "Circulate coolant",
//!     "Leakage", "Seal wear", "Overheating");
//! let summary = GraphImporter::new(store).run(vec![record]).unwrap();
//! assert_eq!(summary.rows_imported, 1);
//! ```

pub mod audit;
pub mod chains;
pub mod config;
pub mod embedding;
pub mod fusion;
pub mod generation;
pub mod graph;
pub mod import;
pub mod normalize;
pub mod orchestrator;
pub mod pipeline;
pub mod retrieval;
pub mod storage;
pub mod table;

pub use audit::AuditLog;
pub use config::{ConfigError, PipelineConfig};
pub use fusion::{fuse, ContextBlob};
pub use generation::{
    GenerationClient, GenerationError, GenerationOutcome, HttpGenerationClient, MockClient, Stage,
};
pub use graph::{Edge, MeasureKind, Node, NodeKind, NodeRef, PropertyValue, Relationship};
pub use import::{GraphImporter, ImportError, ImportRecord, ImportSummary};
pub use orchestrator::{
    BatchReport, Orchestrator, OrchestratorError, UnitSkip, UnitState, UnitSuccess, UnitWork,
};
pub use pipeline::{StagePipeline, StageRun};
pub use retrieval::{ChainContext, EntityMap, LookupStage, RetrievalFacade};
pub use storage::{GraphStore, NodeFilter, OpenStore, SqliteStore, StorageError, StorageResult};
pub use table::{Table, TableRow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
