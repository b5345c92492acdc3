//! Compaction of value-identical property rows.
//!
//! Two plain rows of the same table are equivalent when every non-key
//! column present in either of them resolves to the same value in both. A
//! column missing from one row never matches, while `NULL` matches `NULL`.
//! The later row of an equivalent pair is dropped and every field pointing
//! into it is relinked to the same-named column of the earlier row. A row
//! that some primary key references is never dropped.

use std::collections::HashMap;

use log::debug;

use crate::error::WriteError;
use crate::rows::{Adjacency, RowGraph, RowIndex, RowKind};
use crate::value::ValueKey;

/// Merge equivalent plain rows until no further merge is possible.
///
/// Returns the number of rows removed. Feature rows are never merged.
/// Running the function on an already compacted graph removes nothing.
///
/// # Errors
/// [`WriteError::BrokenRelink`] when a reference into a dropped row names a
/// column the surviving row lacks.
pub fn compact(graph: &mut RowGraph) -> Result<usize, WriteError> {
    let mut removed = 0;
    loop {
        let merged = compact_pass(graph)?;
        if merged == 0 {
            return Ok(removed);
        }
        removed += merged;
    }
}

/// Whether two rows would be merged by [`compact`].
#[must_use]
pub fn equivalent(graph: &RowGraph, left: RowIndex, right: RowIndex) -> bool {
    let (left_row, right_row) = (graph.row(left), graph.row(right));
    if left_row.table() != right_row.table()
        || *left_row.kind() != RowKind::Plain
        || *right_row.kind() != RowKind::Plain
    {
        return false;
    }
    covers(graph, left, right) && covers(graph, right, left)
}

/// Every non-key column of `row` has an equal counterpart on `other`.
fn covers(graph: &RowGraph, row: RowIndex, other: RowIndex) -> bool {
    graph.row(row).fields().iter().all(|&field| {
        let data = graph.field(field);
        if data.is_primary_key() {
            return true;
        }
        graph
            .column(other, data.column())
            .filter(|&counterpart| !graph.field(counterpart).is_primary_key())
            .is_some_and(|counterpart| graph.value(counterpart) == graph.value(field))
    })
}

fn compact_pass(graph: &mut RowGraph) -> Result<usize, WriteError> {
    let buckets = plain_rows_by_signature(graph);
    let adjacency = graph.adjacency();
    let mut dropped = Vec::new();
    for rows in buckets.values() {
        let mut survivors: Vec<RowIndex> = Vec::new();
        for &candidate in rows {
            let survivor = if anchors_primary_key(graph, &adjacency, candidate) {
                None
            } else {
                survivors
                    .iter()
                    .copied()
                    .find(|&survivor| equivalent(graph, survivor, candidate))
            };
            let Some(survivor) = survivor else {
                survivors.push(candidate);
                continue;
            };
            let fields = graph.row(candidate).fields().to_vec();
            for field in fields {
                let referencing = adjacency.referencing_fields(field);
                if referencing.is_empty() {
                    continue;
                }
                let column = graph.field(field).column().to_owned();
                let target = graph.column(survivor, &column).ok_or_else(|| {
                    WriteError::BrokenRelink {
                        table: graph.row(survivor).table().to_owned(),
                        column: column.clone(),
                    }
                })?;
                for &source in referencing {
                    graph.relink(source, target);
                }
            }
            debug!(
                "merged {candidate} into {survivor} in table {}",
                graph.row(survivor).table()
            );
            dropped.push(candidate);
        }
    }
    graph.remove_rows(&dropped);
    Ok(dropped.len())
}

/// Whether some primary key takes its value from `row`.
///
/// Such a row carries another row's identity, as with a details row keyed by
/// its owner's id. Dropping it would rewrite that key.
fn anchors_primary_key(graph: &RowGraph, adjacency: &Adjacency, row: RowIndex) -> bool {
    graph.row(row).fields().iter().any(|&field| {
        adjacency
            .referencing_fields(field)
            .iter()
            .any(|&source| graph.field(source).is_primary_key())
    })
}

/// Live plain rows grouped by table and non-key column values, each group in
/// staging order.
///
/// Equivalent rows always land in the same group; rows within a group still
/// need [`equivalent`] to confirm the match.
fn plain_rows_by_signature(graph: &RowGraph) -> HashMap<Signature, Vec<RowIndex>> {
    let mut buckets: HashMap<Signature, Vec<RowIndex>> = HashMap::new();
    for &row in graph.rows() {
        let data = graph.row(row);
        if *data.kind() != RowKind::Plain {
            continue;
        }
        let mut columns: Vec<(String, ValueKey)> = data
            .fields()
            .iter()
            .filter(|&&field| !graph.field(field).is_primary_key())
            .map(|&field| {
                (
                    graph.field(field).column().to_owned(),
                    graph.value(field).key(),
                )
            })
            .collect();
        columns.sort_unstable_by(|left, right| left.0.cmp(&right.0));
        buckets
            .entry((data.table().to_owned(), columns))
            .or_default()
            .push(row);
    }
    buckets
}

type Signature = (String, Vec<(String, ValueKey)>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rows::FieldIndex;
    use crate::value::{SqlType, Value};
    use crate::FeatureId;
    use rstest::rstest;

    fn name_row(graph: &mut RowGraph, pk: i64, name: &str) -> (RowIndex, FieldIndex) {
        let row = graph.add_row("names", RowKind::Plain);
        let key = graph
            .set_primary_key(row, "id", SqlType::Integer, Value::Integer(pk))
            .expect("pk");
        graph
            .set_column(row, "name", SqlType::Varchar, Value::from(name))
            .expect("name");
        (row, key)
    }

    fn owner(graph: &mut RowGraph, pk: i64, target: FieldIndex) -> FieldIndex {
        let row = graph.add_row(
            "roads",
            RowKind::Feature(FeatureId::new("Road", pk.to_string())),
        );
        graph
            .set_primary_key(row, "id", SqlType::Integer, Value::Integer(pk))
            .expect("pk");
        graph
            .link_column(row, "name_id", SqlType::Integer, target)
            .expect("fk")
    }

    #[rstest]
    fn later_duplicate_is_dropped_and_references_follow() {
        let mut graph = RowGraph::new();
        let (first, first_pk) = name_row(&mut graph, 1, "Main Street");
        let (second, second_pk) = name_row(&mut graph, 2, "Main Street");
        let fk = owner(&mut graph, 10, second_pk);

        assert_eq!(compact(&mut graph).expect("compact"), 1);
        assert!(graph.is_live(first));
        assert!(!graph.is_live(second));
        assert_eq!(graph.resolve(fk), first_pk);
        assert_eq!(graph.value(fk), &Value::Integer(1));
    }

    #[rstest]
    fn distinct_values_survive() {
        let mut graph = RowGraph::new();
        name_row(&mut graph, 1, "Main Street");
        name_row(&mut graph, 2, "High Street");
        assert_eq!(compact(&mut graph).expect("compact"), 0);
        assert_eq!(graph.len(), 2);
    }

    #[rstest]
    fn missing_columns_never_match_but_nulls_do() {
        let mut graph = RowGraph::new();
        let a = graph.add_row("names", RowKind::Plain);
        graph.set_column(a, "name", SqlType::Varchar, Value::Null).expect("a");
        let b = graph.add_row("names", RowKind::Plain);
        graph.set_column(b, "name", SqlType::Varchar, Value::Null).expect("b");
        let c = graph.add_row("names", RowKind::Plain);
        graph.set_column(c, "other", SqlType::Varchar, Value::Null).expect("c");

        assert!(equivalent(&graph, a, b));
        assert!(!equivalent(&graph, a, c));
        assert!(!equivalent(&graph, c, a));
    }

    #[rstest]
    fn feature_rows_are_never_merged() {
        let mut graph = RowGraph::new();
        let (_, name_pk) = name_row(&mut graph, 1, "Main Street");
        owner(&mut graph, 10, name_pk);
        let twin = graph.add_row("roads", RowKind::Feature(FeatureId::new("Road", "11")));
        graph
            .link_column(twin, "name_id", SqlType::Integer, name_pk)
            .expect("fk");
        assert_eq!(compact(&mut graph).expect("compact"), 0);
        assert_eq!(graph.len(), 3);
    }

    #[rstest]
    fn rows_lending_a_feature_its_key_are_kept() {
        let mut graph = RowGraph::new();
        let mut owners = Vec::new();
        for id in [4, 5] {
            let details = graph.add_row("canal_details", RowKind::Plain);
            let details_pk = graph
                .set_primary_key(details, "id", SqlType::Integer, Value::Integer(id))
                .expect("details pk");
            graph
                .set_column(details, "depth", SqlType::Double, Value::Real(3.5))
                .expect("depth");
            let canal = graph.add_row(
                "canals",
                RowKind::Feature(FeatureId::new("Canal", id.to_string())),
            );
            let canal_pk = graph
                .set_primary_key(canal, "id", SqlType::Integer, Value::Integer(id))
                .expect("canal pk");
            graph
                .link_column(canal, "id", SqlType::Integer, details_pk)
                .expect("shared key");
            owners.push(canal_pk);
        }

        assert_eq!(compact(&mut graph).expect("compact"), 0);
        assert_eq!(graph.value(owners[0]), &Value::Integer(4));
        assert_eq!(graph.value(owners[1]), &Value::Integer(5));
    }

    #[rstest]
    fn every_duplicate_of_a_row_merges_in_one_pass() {
        let mut graph = RowGraph::new();
        let (first, first_pk) = name_row(&mut graph, 1, "Main Street");
        let fks: Vec<_> = (2..5)
            .map(|pk| {
                let (_, key) = name_row(&mut graph, pk, "Main Street");
                owner(&mut graph, pk * 10, key)
            })
            .collect();

        assert_eq!(compact_pass(&mut graph).expect("pass"), 3);
        assert_eq!(graph.rows()[0], first);
        assert!(fks.iter().all(|&fk| graph.resolve(fk) == first_pk));
    }

    #[rstest]
    fn merges_cascade_until_fixpoint() {
        // Two join rows differ only through the name rows they reference.
        let mut graph = RowGraph::new();
        let (_, first_pk) = name_row(&mut graph, 1, "Main Street");
        let (_, second_pk) = name_row(&mut graph, 2, "Main Street");
        for target in [first_pk, second_pk] {
            let join = graph.add_row("road_names", RowKind::Plain);
            graph
                .link_column(join, "name_id", SqlType::Integer, target)
                .expect("join");
        }
        assert_eq!(compact(&mut graph).expect("compact"), 2);
        assert_eq!(graph.len(), 2);
        assert_eq!(compact(&mut graph).expect("second compact"), 0);
    }

    #[rstest]
    fn reference_to_a_column_missing_on_the_survivor_fails_loudly() {
        // Equal rows always share their columns, except for the key column.
        let mut graph = RowGraph::new();
        let first = graph.add_row("names", RowKind::Plain);
        graph
            .set_column(first, "name", SqlType::Varchar, Value::from("x"))
            .expect("name");
        let (_, second_pk) = name_row(&mut graph, 2, "x");
        owner(&mut graph, 10, second_pk);
        let error = compact(&mut graph).expect_err("survivor lacks id");
        assert!(matches!(error, WriteError::BrokenRelink { ref column, .. } if column == "id"));
    }
}
