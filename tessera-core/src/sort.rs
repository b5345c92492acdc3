//! Dependency ordering of staged rows.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use log::warn;

use crate::rows::{Adjacency, RowGraph, RowIndex};

/// Result of [`order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortOutcome {
    /// Every live row exactly once.
    pub order: Vec<RowIndex>,
    /// Rows forming a reference cycle when sorting was abandoned.
    pub cycle: Option<Vec<RowIndex>>,
}

impl SortOutcome {
    /// Whether the rows came back in staging order because of a cycle.
    #[must_use]
    pub const fn is_fallback(&self) -> bool {
        self.cycle.is_some()
    }
}

/// Order rows so that referenced rows come before the rows referencing them.
///
/// Among rows that are ready at the same time, the one staged first wins, so
/// the result is deterministic. When the rows contain a reference cycle the
/// sort is abandoned: the rows are returned in staging order and the cycle
/// is reported in [`SortOutcome::cycle`]. This is not an error; the backend
/// may still accept the inserts, for instance through deferred constraints.
#[must_use]
pub fn order(graph: &RowGraph) -> SortOutcome {
    let rows = graph.rows();
    let position: HashMap<RowIndex, usize> = rows
        .iter()
        .enumerate()
        .map(|(position, &row)| (row, position))
        .collect();
    let adjacency = graph.adjacency();

    let mut in_degree: Vec<usize> = rows
        .iter()
        .map(|&row| adjacency.referenced_fields(row).len())
        .collect();
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(position, _)| Reverse(position))
        .collect();

    let mut sorted = Vec::with_capacity(rows.len());
    while let Some(Reverse(next)) = ready.pop() {
        let emitted = rows[next];
        sorted.push(emitted);
        for &dependent in adjacency.referencing_rows(emitted) {
            let Some(&slot) = position.get(&dependent) else {
                continue;
            };
            let satisfied = adjacency
                .referenced_fields(dependent)
                .iter()
                .filter(|&&field| graph.field(field).row() == emitted)
                .count();
            in_degree[slot] = in_degree[slot].saturating_sub(satisfied);
            if in_degree[slot] == 0 {
                ready.push(Reverse(slot));
            }
        }
    }

    if sorted.len() == rows.len() {
        return SortOutcome {
            order: sorted,
            cycle: None,
        };
    }
    let cycle = cycle_in(graph, &adjacency).unwrap_or_default();
    warn!(
        "reference cycle among {} of {} rows ({}); keeping staging order",
        rows.len() - sorted.len(),
        rows.len(),
        describe(graph, &cycle)
    );
    SortOutcome {
        order: rows.to_vec(),
        cycle: Some(cycle),
    }
}

/// Find one reference cycle among the live rows.
///
/// The path starts at the first row of the cycle in staging order and lists
/// each row once; the last row references the first. Rows referencing only
/// themselves do not count.
#[must_use]
pub fn find_cycle(graph: &RowGraph) -> Option<Vec<RowIndex>> {
    cycle_in(graph, &graph.adjacency())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    OnPath,
    Done,
}

fn cycle_in(graph: &RowGraph, adjacency: &Adjacency) -> Option<Vec<RowIndex>> {
    let mut marks: HashMap<RowIndex, Mark> = graph
        .rows()
        .iter()
        .map(|&row| (row, Mark::Unvisited))
        .collect();
    for &start in graph.rows() {
        if marks.get(&start) != Some(&Mark::Unvisited) {
            continue;
        }
        // Iterative depth-first search; `path` mirrors the rows marked OnPath.
        let mut path: Vec<RowIndex> = vec![start];
        let mut cursors: Vec<usize> = vec![0];
        marks.insert(start, Mark::OnPath);
        while let (Some(&row), Some(cursor)) = (path.last(), cursors.last_mut()) {
            let Some(&next) = adjacency.referenced_rows(row).get(*cursor) else {
                marks.insert(row, Mark::Done);
                path.pop();
                cursors.pop();
                continue;
            };
            *cursor += 1;
            match marks.get(&next) {
                Some(Mark::OnPath) => {
                    let from = path.iter().position(|&step| step == next).unwrap_or(0);
                    let mut cycle = path[from..].to_vec();
                    let first = rotation_start(&cycle);
                    cycle.rotate_left(first);
                    return Some(cycle);
                }
                Some(Mark::Unvisited) => {
                    marks.insert(next, Mark::OnPath);
                    path.push(next);
                    cursors.push(0);
                }
                Some(Mark::Done) | None => {}
            }
        }
    }
    None
}

/// Offset of the earliest staged row within `cycle`.
///
/// Row indices grow in staging order.
fn rotation_start(cycle: &[RowIndex]) -> usize {
    cycle
        .iter()
        .enumerate()
        .min_by_key(|&(_, row)| *row)
        .map_or(0, |(offset, _)| offset)
}

fn describe(graph: &RowGraph, cycle: &[RowIndex]) -> String {
    cycle
        .iter()
        .map(|&row| format!("{} {row}", graph.row(row).table()))
        .collect::<Vec<_>>()
        .join(" -> ")
}
