//! Property-based tests for staging, compaction and ordering.
//!
//! Random road networks are generated over a small pool of street names and
//! towns so duplicates and shared sub-features are common, and roads may
//! point at each other to form cycles.
//!
//! # Invariants tested
//!
//! - **Idempotent compaction:** compacting a compacted graph merges nothing.
//! - **Reference integrity:** every reference resolves to a field of a live row.
//! - **Shared collapse:** one town row per distinct town, one name row per
//!   distinct street name.
//! - **Topological validity:** the order lists every row once, and unless it
//!   is a cycle fallback, referenced rows precede the rows referencing them.
//! - **Stable feature keys:** compaction never changes the primary key of a
//!   feature row, including canals whose details rows share the canal id.

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use tessera_core::test_support::{PassthroughEncoder, SequenceKeys, road_network};
use tessera_core::{
    Feature, FeatureGraph, FeatureId, FeatureTypeMapping, FeatureWriter, ForeignKeySide, KeySource,
    MappingField, PropertyMapping, PropertyValue, RowGraph, RowIndex, SchemaMapping, SqlType,
    StagedInsert, TableRelation, Value, WriterConfig, compact,
};

const STREETS: [&str; 3] = ["High Street", "Mill Lane", "Station Road"];

/// Generated road: street name, town, optional next road and sign count.
type RoadSpec = (usize, usize, Option<usize>, usize);

fn road_specs() -> impl Strategy<Value = Vec<RoadSpec>> {
    prop::collection::vec(
        (
            0..STREETS.len(),
            0_usize..3,
            proptest::option::of(0_usize..6),
            0_usize..3,
        ),
        1..7,
    )
}

fn build_features(specs: &[RoadSpec]) -> FeatureGraph {
    let mut features = FeatureGraph::new();
    let mut roads = Vec::with_capacity(specs.len());
    for (index, &(street, town, _, signs)) in specs.iter().enumerate() {
        let town = features.insert(
            Feature::new("Town", format!("TOWN_{town}")).with_simple("name", format!("Town {town}")),
        );
        let mut road = Feature::new("Road", format!("ROAD_{index}"))
            .with_simple("name", STREETS[street])
            .with_feature("town", town);
        for sign in 0..signs {
            let sign = features.insert(Feature::new("Sign", format!("SIGN_{index}{sign}")));
            road = road.with_feature("signs", sign);
        }
        roads.push(features.insert_root(road));
    }
    for (index, &(_, _, next, _)) in specs.iter().enumerate() {
        if let Some(next) = next {
            let target = roads[next % roads.len()];
            assert!(features.push_property(roads[index], "next", PropertyValue::Feature(target)));
        }
    }
    features
}

fn stage(specs: &[RoadSpec]) -> StagedInsert {
    let mapping = road_network();
    FeatureWriter::new(&mapping)
        .stage(
            &build_features(specs),
            SequenceKeys::default(),
            PassthroughEncoder,
        )
        .expect("generated networks stage cleanly")
}

/// Road network plus canals whose depth lives in a details row keyed by the
/// canal id.
fn canal_network() -> SchemaMapping {
    road_network().with_feature_type(
        FeatureTypeMapping::new("Canal", "canals", "id", SqlType::Integer)
            .with_id_prefix("CANAL_")
            .with_property(
                PropertyMapping::simple(
                    "depth",
                    MappingField::new("canal_details", "depth", SqlType::Double),
                )
                .via(
                    TableRelation::new(
                        MappingField::new("canals", "id", SqlType::Integer),
                        MappingField::new("canal_details", "id", SqlType::Integer),
                        ForeignKeySide::From,
                    )
                    .with_key_source(KeySource::Parent("id".into())),
                ),
            ),
    )
}

/// Stage roads and canals without compacting.
fn stage_uncompacted(specs: &[RoadSpec], depths: &[u8]) -> RowGraph {
    let mut features = build_features(specs);
    for (index, &depth) in depths.iter().enumerate() {
        features.insert_root(
            Feature::new("Canal", format!("CANAL_{index}")).with_simple("depth", f64::from(depth)),
        );
    }
    let mapping = canal_network();
    let config = WriterConfig {
        compact: false,
        ..WriterConfig::default()
    };
    FeatureWriter::with_config(&mapping, config)
        .stage(&features, SequenceKeys::default(), PassthroughEncoder)
        .expect("generated networks stage cleanly")
        .rows
}

fn feature_keys(rows: &RowGraph) -> HashMap<FeatureId, Value> {
    rows.rows()
        .iter()
        .filter_map(|&row| {
            let data = rows.row(row);
            let id = data.feature_id()?.clone();
            let pk = data.primary_key()?;
            Some((id, rows.value(pk).clone()))
        })
        .collect()
}

fn table_count(rows: &RowGraph, table: &str) -> usize {
    rows.rows()
        .iter()
        .filter(|&&row| rows.row(row).table() == table)
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// Property: A second compaction pass finds nothing to merge.
    #[test]
    fn compaction_is_idempotent(specs in road_specs()) {
        let mut staged = stage(&specs);
        let before = staged.rows.clone();
        let merged = compact(&mut staged.rows).expect("compaction succeeds");
        prop_assert_eq!(merged, 0);
        prop_assert_eq!(staged.rows, before);
    }

    /// Property: No reference points into a dropped row.
    #[test]
    fn references_resolve_to_live_rows(specs in road_specs()) {
        let staged = stage(&specs);
        let rows = &staged.rows;
        for &row in rows.rows() {
            for &field in rows.row(row).fields() {
                if let Some(target) = rows.field(field).reference() {
                    prop_assert!(
                        rows.is_live(rows.field(target).row()),
                        "{} references a dropped row",
                        rows.field(field).column()
                    );
                    let resolved = rows.resolve(field);
                    prop_assert!(rows.is_live(rows.field(resolved).row()));
                }
            }
        }
    }

    /// Property: Shared towns and repeated street names collapse.
    #[test]
    fn shared_values_collapse(specs in road_specs()) {
        let staged = stage(&specs);
        let towns: HashSet<_> = specs.iter().map(|spec| spec.1).collect();
        let streets: HashSet<_> = specs.iter().map(|spec| spec.0).collect();
        prop_assert_eq!(table_count(&staged.rows, "roads"), specs.len());
        prop_assert_eq!(table_count(&staged.rows, "towns"), towns.len());
        prop_assert_eq!(table_count(&staged.rows, "road_names"), streets.len());
    }

    /// Property: Every feature row keeps its primary key through compaction.
    #[test]
    fn compaction_keeps_feature_keys(
        specs in road_specs(),
        depths in prop::collection::vec(0_u8..3, 0..6),
    ) {
        let mut rows = stage_uncompacted(&specs, &depths);
        let before = feature_keys(&rows);
        compact(&mut rows).expect("compaction succeeds");
        prop_assert_eq!(feature_keys(&rows), before);
        prop_assert_eq!(table_count(&rows, "canal_details"), depths.len());
    }

    /// Property: The order is a permutation of the rows and respects every
    /// reference unless a cycle forced the fallback.
    #[test]
    fn order_is_topological_unless_cyclic(specs in road_specs()) {
        let staged = stage(&specs);
        let rows = &staged.rows;
        let order = &staged.outcome.order;

        let mut listed: Vec<RowIndex> = order.clone();
        listed.sort_unstable();
        let mut live: Vec<RowIndex> = rows.rows().to_vec();
        live.sort_unstable();
        prop_assert_eq!(listed, live);

        if staged.outcome.is_fallback() {
            prop_assert!(staged.outcome.cycle.is_some());
            return Ok(());
        }
        let position: HashMap<RowIndex, usize> =
            order.iter().enumerate().map(|(index, &row)| (row, index)).collect();
        let adjacency = rows.adjacency();
        for &row in order {
            for referenced in adjacency.referenced_rows(row) {
                prop_assert!(
                    position[referenced] < position[&row],
                    "{referenced} is inserted after {row}, which references it"
                );
            }
        }
    }
}
