//! Turns ordered rows into insert statements.

use log::debug;

use crate::error::{SinkError, WriteError};
use crate::rows::{RowGraph, RowIndex};
use crate::store::{Argument, StatementSink};

/// What happened to one row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// The insert ran and touched `affected` rows.
    Inserted {
        /// Row count reported by the sink.
        affected: u64,
    },
    /// A feature row whose key already exists in the store was not inserted.
    SkippedExisting,
}

/// Outcome of one executed row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowReport {
    /// Row in the staged graph.
    pub row: RowIndex,
    /// Target table.
    pub table: String,
    /// Result of the insert.
    pub outcome: RowOutcome,
}

/// An insert statement built from one row.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    /// Target table.
    pub table: String,
    /// Columns in binding order.
    pub columns: Vec<String>,
    /// SQL text with positional `?` placeholders.
    pub sql: String,
    /// Bound values, one per placeholder.
    pub arguments: Vec<Argument>,
}

impl InsertStatement {
    /// Build the statement for `row`.
    ///
    /// Geometry fields carrying a target reference system bind through the
    /// sink's transform call. Table and column names are rendered by the
    /// sink's identifier quoting; `columns` keeps them as mapped.
    #[must_use]
    pub fn for_row(graph: &RowGraph, row: RowIndex, sink: &impl StatementSink) -> Self {
        let row_data = graph.row(row);
        let mut columns = Vec::with_capacity(row_data.fields().len());
        let mut placeholders = Vec::with_capacity(row_data.fields().len());
        let mut arguments = Vec::with_capacity(row_data.fields().len());
        for &field in row_data.fields() {
            columns.push(graph.field(field).column().to_owned());
            placeholders.push(match graph.target_srs(field) {
                Some(srs) => sink.transform_call("?", srs),
                None => "?".to_owned(),
            });
            arguments.push(Argument {
                value: graph.value(field).clone(),
                sql_type: graph.sql_type(field),
            });
        }
        let quoted: Vec<String> = columns
            .iter()
            .map(|column| sink.quote_identifier(column))
            .collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            sink.quote_identifier(row_data.table()),
            quoted.join(", "),
            placeholders.join(", ")
        );
        Self {
            table: row_data.table().to_owned(),
            columns,
            sql,
            arguments,
        }
    }
}

/// Insert `order` through `sink`, stopping at the first failure.
///
/// When `check_existing` is set, feature rows whose primary key is already
/// stored are skipped. Rows inserted before a failure are not undone; the
/// caller rolls back the enclosing transaction.
///
/// # Errors
/// [`WriteError::Statement`] naming the table and columns of the failing row.
pub fn execute<S: StatementSink>(
    graph: &RowGraph,
    order: &[RowIndex],
    sink: &mut S,
    check_existing: bool,
) -> Result<Vec<RowReport>, WriteError> {
    let mut reports = Vec::with_capacity(order.len());
    for &row in order {
        let row_data = graph.row(row);
        if check_existing && row_data.feature_id().is_some() && already_stored(graph, row, sink)? {
            debug!(
                "skipping {} in {}: already stored",
                row_data.feature_id().map(ToString::to_string).unwrap_or_default(),
                row_data.table()
            );
            reports.push(RowReport {
                row,
                table: row_data.table().to_owned(),
                outcome: RowOutcome::SkippedExisting,
            });
            continue;
        }

        let statement = InsertStatement::for_row(graph, row, &*sink);
        debug!("{}", statement.sql);
        let affected = sink
            .execute(&statement.sql, &statement.arguments)
            .map_err(|source| statement_error(graph, row, source))?;
        reports.push(RowReport {
            row,
            table: statement.table,
            outcome: RowOutcome::Inserted { affected },
        });
    }
    Ok(reports)
}

fn already_stored(
    graph: &RowGraph,
    row: RowIndex,
    sink: &mut impl StatementSink,
) -> Result<bool, WriteError> {
    let row_data = graph.row(row);
    let Some(pk) = row_data.primary_key() else {
        return Ok(false);
    };
    sink.exists(row_data.table(), graph.field(pk).column(), graph.value(pk))
        .map_err(|source| statement_error(graph, row, source))
}

fn statement_error(graph: &RowGraph, row: RowIndex, source: SinkError) -> WriteError {
    let row_data = graph.row(row);
    WriteError::Statement {
        table: row_data.table().to_owned(),
        columns: row_data
            .fields()
            .iter()
            .map(|&field| graph.field(field).column().to_owned())
            .collect(),
        source,
    }
}
