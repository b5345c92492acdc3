//! Reference index derived from a [`RowGraph`].

use std::collections::HashMap;

use super::{FieldIndex, RowGraph, RowIndex};

/// Snapshot of which fields and rows reference which.
///
/// The index is rebuilt from the forward references on every call to
/// [`RowGraph::adjacency`] and is not updated when the graph changes.
/// Only live rows take part; references into removed rows are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Adjacency {
    referencing_fields: HashMap<FieldIndex, Vec<FieldIndex>>,
    referenced_fields: HashMap<RowIndex, Vec<FieldIndex>>,
    referenced_rows: HashMap<RowIndex, Vec<RowIndex>>,
    referencing_rows: HashMap<RowIndex, Vec<RowIndex>>,
}

impl Adjacency {
    pub(super) fn build(graph: &RowGraph) -> Self {
        let mut index = Self::default();
        for &row in graph.rows() {
            for &field in graph.row(row).fields() {
                let Some(target) = graph.field(field).reference() else {
                    continue;
                };
                let owner = graph.field(target).row();
                if !graph.is_live(owner) {
                    continue;
                }
                index.referencing_fields.entry(target).or_default().push(field);
                if owner == row {
                    continue;
                }
                push_distinct(index.referenced_fields.entry(row).or_default(), target);
                push_distinct(index.referenced_rows.entry(row).or_default(), owner);
                push_distinct(index.referencing_rows.entry(owner).or_default(), row);
            }
        }
        index
    }

    /// Fields whose reference points directly at `field`.
    #[must_use]
    pub fn referencing_fields(&self, field: FieldIndex) -> &[FieldIndex] {
        self.referencing_fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Distinct fields on other rows that `row` references.
    #[must_use]
    pub fn referenced_fields(&self, row: RowIndex) -> &[FieldIndex] {
        self.referenced_fields.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows that `row` depends on, excluding itself.
    #[must_use]
    pub fn referenced_rows(&self, row: RowIndex) -> &[RowIndex] {
        self.referenced_rows.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Rows that depend on `row`, excluding itself.
    #[must_use]
    pub fn referencing_rows(&self, row: RowIndex) -> &[RowIndex] {
        self.referencing_rows.get(&row).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn push_distinct<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

#[cfg(test)]
mod tests {
    use crate::rows::{RowGraph, RowKind};
    use crate::value::{SqlType, Value};
    use rstest::rstest;

    #[rstest]
    fn back_references_follow_relinks() {
        let mut graph = RowGraph::new();
        let first = graph.add_row("towns", RowKind::Plain);
        let first_pk = graph
            .set_primary_key(first, "id", SqlType::Integer, Value::Integer(1))
            .expect("pk");
        let second = graph.add_row("towns", RowKind::Plain);
        let second_pk = graph
            .set_primary_key(second, "id", SqlType::Integer, Value::Integer(2))
            .expect("pk");
        let road = graph.add_row("roads", RowKind::Plain);
        let fk = graph
            .link_column(road, "town_id", SqlType::Integer, first_pk)
            .expect("fk");

        let before = graph.adjacency();
        assert_eq!(before.referencing_fields(first_pk), &[fk]);
        assert_eq!(before.referencing_rows(first), &[road]);

        graph.relink(fk, second_pk);
        let after = graph.adjacency();
        assert!(after.referencing_fields(first_pk).is_empty());
        assert_eq!(after.referencing_fields(second_pk), &[fk]);
        assert_eq!(after.referenced_rows(road), &[second]);
    }

    #[rstest]
    fn self_references_are_not_dependencies() {
        let mut graph = RowGraph::new();
        let row = graph.add_row("nodes", RowKind::Plain);
        let pk = graph
            .set_primary_key(row, "id", SqlType::Integer, Value::Integer(1))
            .expect("pk");
        let parent = graph
            .link_column(row, "parent_id", SqlType::Integer, pk)
            .expect("self link");
        let adjacency = graph.adjacency();
        assert_eq!(adjacency.referencing_fields(pk), &[parent]);
        assert!(adjacency.referenced_rows(row).is_empty());
        assert!(adjacency.referenced_fields(row).is_empty());
    }

    #[rstest]
    fn removed_rows_drop_out_of_the_index() {
        let mut graph = RowGraph::new();
        let town = graph.add_row("towns", RowKind::Plain);
        let pk = graph
            .set_primary_key(town, "id", SqlType::Integer, Value::Integer(1))
            .expect("pk");
        let road = graph.add_row("roads", RowKind::Plain);
        graph
            .link_column(road, "town_id", SqlType::Integer, pk)
            .expect("fk");
        graph.remove_row(road);
        let adjacency = graph.adjacency();
        assert!(adjacency.referencing_rows(town).is_empty());
    }
}
