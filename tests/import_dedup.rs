//! Import and dedup behavior over a persistent store

mod common;

use common::fixture_records;
use fmea_graph::import::read_records;
use fmea_graph::{
    Edge, GraphImporter, GraphStore, ImportRecord, MeasureKind, NodeKind, NodeRef, OpenStore,
    Relationship, SqliteStore,
};
use std::io::Write;
use std::sync::Arc;

fn open_store(dir: &tempfile::TempDir) -> Arc<dyn GraphStore> {
    Arc::new(SqliteStore::open(dir.path().join("fmea.db")).unwrap())
}

fn counts(store: &dyn GraphStore) -> Vec<(NodeKind, usize)> {
    store.node_counts().unwrap()
}

// ============================================================================
// Idempotence
// ============================================================================

#[test]
fn importing_twice_yields_identical_counts() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let mut importer = GraphImporter::new(store.clone());

    importer.run(fixture_records()).unwrap();
    let first = counts(store.as_ref());
    let first_edges = store.count_edges(None).unwrap();

    importer.run(fixture_records()).unwrap();
    assert_eq!(counts(store.as_ref()), first);
    assert_eq!(store.count_edges(None).unwrap(), first_edges);
}

#[test]
fn identical_second_row_adds_no_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let row = fixture_records().remove(0);

    GraphImporter::new(store.clone()).run(vec![row.clone()]).unwrap();
    let after_one = counts(store.as_ref());

    GraphImporter::new(store.clone()).run(vec![row.clone(), row]).unwrap();
    assert_eq!(counts(store.as_ref()), after_one);
    assert!(after_one.iter().all(|(_, n)| *n == 1));
}

#[test]
fn names_differing_in_whitespace_share_a_node() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let records = vec![
        ImportRecord::new("Engine Block", "Cooling", "Water pump", "Circulate", "Leak", "Wear", "Heat"),
        ImportRecord::new(" Engine\tBlock ", "Cooling", "Water\n pump", "Circulate", "Leak", "Wear", "Heat"),
    ];
    GraphImporter::new(store.clone()).run(records).unwrap();

    assert_eq!(store.count_nodes(NodeKind::Product).unwrap(), 1);
    assert_eq!(store.count_nodes(NodeKind::SystemElement).unwrap(), 1);
    let product = store
        .load_node(NodeRef::new(NodeKind::Product, 1))
        .unwrap()
        .unwrap();
    assert_eq!(product.name.as_deref(), Some("Engine Block"));
}

#[test]
fn repeated_edge_write_keeps_one_edge() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    GraphImporter::new(store.clone()).run(fixture_records()).unwrap();
    let before = store.count_edges(None).unwrap();

    let edge = Edge::new(
        NodeRef::new(NodeKind::Product, 1),
        NodeRef::new(NodeKind::Subsystem, 1),
        Relationship::HasSubsystem,
    );
    assert!(!store.upsert_edge(&edge).unwrap());
    assert!(!store.upsert_edge(&edge).unwrap());
    assert_eq!(store.count_edges(None).unwrap(), before);
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn shared_product_with_two_subsystems() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let records = vec![
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Circulate", "Leak", "Wear", "Heat"),
        ImportRecord::new("EngineBlock", "Ignition", "Coil", "Spark", "No spark", "Short", "Misfire"),
    ];
    GraphImporter::new(store.clone()).run(records).unwrap();

    assert_eq!(store.count_nodes(NodeKind::Product).unwrap(), 1);
    assert_eq!(store.count_nodes(NodeKind::Subsystem).unwrap(), 2);
    let product = NodeRef::new(NodeKind::Product, 1);
    let subsystems = store.targets(product, Relationship::HasSubsystem).unwrap();
    assert_eq!(subsystems.len(), 2);
    for subsystem in subsystems {
        let parents = store
            .edges_to(subsystem.node_ref(), Some(Relationship::HasSubsystem))
            .unwrap();
        assert_eq!(parents.len(), 1);
    }
}

#[test]
fn failure_mode_shared_by_two_functions() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir);
    let records = vec![
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Circulate coolant", "Leakage", "Seal wear", "Overheating"),
        ImportRecord::new("EngineBlock", "Cooling", "WaterPump", "Hold pressure", "Leakage", "Seal wear", "Overheating"),
    ];
    GraphImporter::new(store.clone()).run(records).unwrap();

    assert_eq!(store.count_nodes(NodeKind::Function).unwrap(), 2);
    assert_eq!(store.count_nodes(NodeKind::FailureMode).unwrap(), 1);
    let incoming = store
        .edges_to(
            NodeRef::new(NodeKind::FailureMode, 1),
            Some(Relationship::HasFailureMode),
        )
        .unwrap();
    assert_eq!(incoming.len(), 2);
}

// ============================================================================
// CSV input
// ============================================================================

#[test]
fn csv_file_round_trip_into_graph() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fmea.csv");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(
        file,
        "product;subsystem;system_element;function;failure_mode;failure_cause;failure_effect;measure_name;measure_type;severity;occurrence;detection"
    )
    .unwrap();
    writeln!(file, "EngineBlock;Cooling;WaterPump;Circulate;Leak;Wear;Heat;Inspect;preventive;8;4;6").unwrap();
    writeln!(file, "EngineBlock;Cooling;WaterPump;Circulate;Leak;Wear;Heat;\"Test; bench\";detective;8;4;high").unwrap();
    writeln!(file, ";Cooling;WaterPump;Circulate;Leak;Wear;Heat;;;;;").unwrap();
    drop(file);

    let records = read_records(&path).unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1].measure_name.as_deref(), Some("Test; bench"));
    assert_eq!(records[1].measure_type, Some(MeasureKind::Detective));
    assert_eq!(records[1].detection, None);

    let store = open_store(&dir);
    let summary = GraphImporter::new(store.clone()).run(records).unwrap();
    assert_eq!(summary.rows_imported, 2);
    assert_eq!(summary.skipped.len(), 1);
    assert_eq!(summary.skipped[0].row, 3);
    assert_eq!(store.count_nodes(NodeKind::Measure).unwrap(), 2);
}
