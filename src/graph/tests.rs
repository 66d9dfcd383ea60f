//! Serialization and naming tests for graph types

use super::*;
use serde_json::json;

#[test]
fn node_kind_round_trips_through_its_name() {
    for kind in NodeKind::FMEA {
        assert_eq!(kind.as_str().parse::<NodeKind>().unwrap(), kind);
    }
    assert_eq!(
        "VectorEmbedding".parse::<NodeKind>().unwrap(),
        NodeKind::VectorEmbedding
    );
    assert!("Widget".parse::<NodeKind>().is_err());
}

#[test]
fn relationship_uses_graph_wire_names() {
    assert_eq!(Relationship::IsDueToFailureCause.as_str(), "isDueToFailureCause");
    assert_eq!(Relationship::HasEmbedding.as_str(), "HAS_EMBEDDING");
    assert_eq!(
        serde_json::to_value(Relationship::ImprovesDetectionFor).unwrap(),
        json!("improvesDetectionFor")
    );
    assert_eq!(
        "resultsInFailureEffect".parse::<Relationship>().unwrap(),
        Relationship::ResultsInFailureEffect
    );
}

#[test]
fn measure_kind_parse_is_lenient() {
    assert_eq!(MeasureKind::parse(" Preventive "), Some(MeasureKind::Preventive));
    assert_eq!(MeasureKind::parse("DETECTIVE"), Some(MeasureKind::Detective));
    assert_eq!(MeasureKind::parse(""), None);
    assert_eq!(MeasureKind::parse("corrective"), None);
}

#[test]
fn improved_by_picks_relationship_per_kind() {
    assert_eq!(
        Relationship::improved_by(MeasureKind::Preventive),
        Relationship::IsImprovedByPreventiveMeasure
    );
    assert_eq!(
        Relationship::improved_by(MeasureKind::Detective),
        Relationship::IsImprovedByDetectiveMeasure
    );
}

#[test]
fn property_values_serialize_untagged() {
    let node = Node::new(NodeKind::FailureEffect, 3, "Engine overheats")
        .with_property(props::SEVERITY_RATING, PropertyValue::Int(8));
    let value = serde_json::to_value(&node).unwrap();
    assert_eq!(value["properties"]["severity_rating"], json!(8));
    assert_eq!(value["kind"], json!("FailureEffect"));

    let back: Node = serde_json::from_value(value).unwrap();
    assert_eq!(back, node);
}

#[test]
fn measure_kind_is_read_from_type_property() {
    let measure = Node::new(NodeKind::Measure, 1, "Leak test")
        .with_property(props::MEASURE_TYPE, PropertyValue::from("detective"));
    assert_eq!(measure.measure_kind(), Some(MeasureKind::Detective));
    assert_eq!(Node::new(NodeKind::Measure, 2, "x").measure_kind(), None);
}

#[test]
fn optional_property_is_skipped_when_absent() {
    let edge = Edge::new(
        NodeRef::new(NodeKind::FailureMode, 1),
        NodeRef::new(NodeKind::FailureCause, 1),
        Relationship::IsDueToFailureCause,
    )
    .with_optional_property(props::DETECTION_RATING, None);
    assert!(edge.properties.is_empty());
    assert_eq!(edge.int_property(props::DETECTION_RATING), None);
}
