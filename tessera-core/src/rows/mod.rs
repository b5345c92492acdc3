//! Arena of staged rows and fields.
//!
//! Rows and fields are addressed by index. A field either carries a literal
//! or references exactly one other field; its effective value and type are
//! found by following the reference chain at read time. Back-references are
//! never stored on the fields themselves: [`RowGraph::adjacency`] derives
//! them from the forward references whenever they are needed, so relinking
//! a field cannot leave a stale back-reference behind.

use std::collections::HashMap;
use std::fmt;

use crate::error::WriteError;
use crate::feature_id::FeatureId;
use crate::value::{SqlType, Value, ValueKey};

mod adjacency;

pub use adjacency::Adjacency;

/// Index of a row inside a [`RowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowIndex(usize);

impl RowIndex {
    /// Arena position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RowIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row#{}", self.0)
    }
}

/// Index of a field inside a [`RowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldIndex(usize);

impl FieldIndex {
    /// Arena position.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Literal value or reference held by a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldContent {
    /// A value of its own.
    Literal(Value),
    /// Delegates value and type to another field.
    Reference(FieldIndex),
}

/// A single staged column.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    row: RowIndex,
    column: String,
    sql_type: SqlType,
    content: FieldContent,
    primary_key: bool,
    target_srs: Option<i32>,
}

impl Field {
    /// Row owning the field.
    #[must_use]
    pub const fn row(&self) -> RowIndex {
        self.row
    }

    /// Column name.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Literal or reference.
    #[must_use]
    pub const fn content(&self) -> &FieldContent {
        &self.content
    }

    /// Referenced field, if any.
    #[must_use]
    pub const fn reference(&self) -> Option<FieldIndex> {
        match self.content {
            FieldContent::Reference(target) => Some(target),
            FieldContent::Literal(_) => None,
        }
    }

    /// Whether this is the primary key of its row.
    #[must_use]
    pub const fn is_primary_key(&self) -> bool {
        self.primary_key
    }
}

/// Distinguishes feature rows from property and join table rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    /// The row of one feature instance.
    Feature(FeatureId),
    /// A property or join table row; only these are merged by compaction.
    Plain,
}

/// A staged table row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    table: String,
    kind: RowKind,
    fields: Vec<FieldIndex>,
    primary_key: Option<FieldIndex>,
    live: bool,
}

impl Row {
    /// Target table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Feature or plain row.
    #[must_use]
    pub const fn kind(&self) -> &RowKind {
        &self.kind
    }

    /// Feature identity of a feature row.
    #[must_use]
    pub const fn feature_id(&self) -> Option<&FeatureId> {
        match &self.kind {
            RowKind::Feature(id) => Some(id),
            RowKind::Plain => None,
        }
    }

    /// Fields in column insertion order.
    #[must_use]
    pub fn fields(&self) -> &[FieldIndex] {
        &self.fields
    }

    /// Primary key field, if one was set.
    #[must_use]
    pub const fn primary_key(&self) -> Option<FieldIndex> {
        self.primary_key
    }
}

/// Every row staged for one transaction.
///
/// # Examples
/// ```
/// use tessera_core::{RowGraph, RowKind, SqlType, Value};
///
/// let mut graph = RowGraph::new();
/// let town = graph.add_row("towns", RowKind::Plain);
/// let pk = graph.set_primary_key(town, "id", SqlType::Integer, Value::Integer(1)).unwrap();
/// let road = graph.add_row("roads", RowKind::Plain);
/// let fk = graph.link_column(road, "town_id", SqlType::Integer, pk).unwrap();
/// assert_eq!(graph.value(fk), &Value::Integer(1));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowGraph {
    rows: Vec<Row>,
    fields: Vec<Field>,
    order: Vec<RowIndex>,
    // Rows by table and primary key value; entries may be stale and are
    // checked on lookup.
    keys: HashMap<(String, ValueKey), Vec<RowIndex>>,
}

static NULL: Value = Value::Null;

impl RowGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an empty row.
    pub fn add_row(&mut self, table: impl Into<String>, kind: RowKind) -> RowIndex {
        let index = RowIndex(self.rows.len());
        self.rows.push(Row {
            table: table.into(),
            kind,
            fields: Vec::new(),
            primary_key: None,
            live: true,
        });
        self.order.push(index);
        index
    }

    /// Live rows in staging order.
    #[must_use]
    pub fn rows(&self) -> &[RowIndex] {
        &self.order
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no live rows remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Access a row. Removed rows stay addressable.
    #[must_use]
    pub fn row(&self, index: RowIndex) -> &Row {
        &self.rows[index.0]
    }

    /// Access a field.
    #[must_use]
    pub fn field(&self, index: FieldIndex) -> &Field {
        &self.fields[index.0]
    }

    /// Whether `index` has not been removed.
    #[must_use]
    pub fn is_live(&self, index: RowIndex) -> bool {
        self.rows.get(index.0).is_some_and(|row| row.live)
    }

    /// Find the field holding `column` on `row`.
    #[must_use]
    pub fn column(&self, row: RowIndex, column: &str) -> Option<FieldIndex> {
        self.rows[row.0]
            .fields
            .iter()
            .copied()
            .find(|field| self.fields[field.0].column == column)
    }

    /// Find the live feature row staged for `id`.
    #[must_use]
    pub fn feature_row(&self, id: &FeatureId) -> Option<RowIndex> {
        self.order
            .iter()
            .copied()
            .find(|row| self.rows[row.0].feature_id() == Some(id))
    }

    /// Find the earliest live row of `table` whose primary key resolves to
    /// `pk`.
    #[must_use]
    pub fn find_by_primary_key(&self, table: &str, pk: &Value) -> Option<RowIndex> {
        self.keys
            .get(&(table.to_owned(), pk.key()))?
            .iter()
            .copied()
            .filter(|&row| {
                let row_data = &self.rows[row.0];
                row_data.live
                    && row_data
                        .primary_key
                        .is_some_and(|field| self.value(field) == pk)
            })
            .min()
    }

    /// Store a literal in `column`.
    ///
    /// Setting a column again with an equal value is a no-op; a different
    /// value is an [`WriteError::AmbiguousColumnValue`].
    pub fn set_column(
        &mut self,
        row: RowIndex,
        column: &str,
        sql_type: SqlType,
        value: Value,
    ) -> Result<FieldIndex, WriteError> {
        if let Some(existing) = self.column(row, column) {
            let current = self.value(existing);
            if current == &value {
                return Ok(existing);
            }
            return Err(self.ambiguous(row, column, current, &value));
        }
        Ok(self.push_field(row, column, sql_type, FieldContent::Literal(value)))
    }

    /// Store a geometry literal that is transformed to `target_srs` on insert.
    pub fn set_geometry_column(
        &mut self,
        row: RowIndex,
        column: &str,
        value: Value,
        target_srs: Option<i32>,
    ) -> Result<FieldIndex, WriteError> {
        let field = self.set_column(row, column, SqlType::Geometry, value)?;
        if target_srs.is_some() {
            self.fields[field.0].target_srs = target_srs;
        }
        Ok(field)
    }

    /// Store `value` in `column` and make it the row's primary key.
    pub fn set_primary_key(
        &mut self,
        row: RowIndex,
        column: &str,
        sql_type: SqlType,
        value: Value,
    ) -> Result<FieldIndex, WriteError> {
        let field = self.set_column(row, column, sql_type, value)?;
        self.mark_primary_key(row, field);
        Ok(field)
    }

    /// Make `column` reference `target`.
    ///
    /// An existing literal in `column` is replaced by the reference when it is
    /// `NULL` or equal to the resolved target value, and rejected otherwise.
    pub fn link_column(
        &mut self,
        row: RowIndex,
        column: &str,
        sql_type: SqlType,
        target: FieldIndex,
    ) -> Result<FieldIndex, WriteError> {
        let Some(existing) = self.column(row, column) else {
            return Ok(self.push_field(row, column, sql_type, FieldContent::Reference(target)));
        };
        if self.resolve(target) == self.resolve(existing) {
            return Ok(existing);
        }
        let current = self.value(existing);
        let incoming = self.value(target);
        if !current.is_null() && current != incoming {
            return Err(self.ambiguous(row, column, current, incoming));
        }
        self.relink(existing, target);
        Ok(existing)
    }

    /// Point `field` at `target`, replacing whatever it held.
    pub fn relink(&mut self, field: FieldIndex, target: FieldIndex) {
        self.fields[field.0].content = FieldContent::Reference(target);
        if self.fields[field.0].primary_key {
            self.index_primary_key(self.fields[field.0].row);
        }
    }

    /// Remove a row from the live set. Its fields stay addressable.
    pub fn remove_row(&mut self, row: RowIndex) {
        self.remove_rows(&[row]);
    }

    /// Remove several rows from the live set in one sweep.
    pub fn remove_rows(&mut self, removed: &[RowIndex]) {
        for row in removed {
            if let Some(row_data) = self.rows.get_mut(row.0) {
                row_data.live = false;
            }
        }
        let rows = &self.rows;
        self.order.retain(|candidate| rows[candidate.0].live);
    }

    /// Follow the reference chain of `field` to the field holding a literal.
    ///
    /// A chain that loops back on itself resolves to its last distinct field,
    /// which then reads as `NULL`.
    #[must_use]
    pub fn resolve(&self, field: FieldIndex) -> FieldIndex {
        let mut current = field;
        for _ in 0..=self.fields.len() {
            match self.fields[current.0].content {
                FieldContent::Literal(_) => return current,
                FieldContent::Reference(next) => current = next,
            }
        }
        current
    }

    /// Effective value of `field`.
    #[must_use]
    pub fn value(&self, field: FieldIndex) -> &Value {
        match &self.fields[self.resolve(field).0].content {
            FieldContent::Literal(value) => value,
            FieldContent::Reference(_) => &NULL,
        }
    }

    /// Effective SQL type of `field`.
    #[must_use]
    pub fn sql_type(&self, field: FieldIndex) -> SqlType {
        self.fields[self.resolve(field).0].sql_type
    }

    /// Transform target of the geometry `field` resolves to.
    #[must_use]
    pub fn target_srs(&self, field: FieldIndex) -> Option<i32> {
        self.fields[self.resolve(field).0].target_srs
    }

    /// Derive the reference index over the live rows.
    #[must_use]
    pub fn adjacency(&self) -> Adjacency {
        Adjacency::build(self)
    }

    fn push_field(
        &mut self,
        row: RowIndex,
        column: &str,
        sql_type: SqlType,
        content: FieldContent,
    ) -> FieldIndex {
        let index = FieldIndex(self.fields.len());
        self.fields.push(Field {
            row,
            column: column.to_owned(),
            sql_type,
            content,
            primary_key: false,
            target_srs: None,
        });
        self.rows[row.0].fields.push(index);
        index
    }

    fn mark_primary_key(&mut self, row: RowIndex, field: FieldIndex) {
        if let Some(previous) = self.rows[row.0].primary_key.replace(field) {
            self.fields[previous.0].primary_key = false;
        }
        self.fields[field.0].primary_key = true;
        self.index_primary_key(row);
    }

    fn index_primary_key(&mut self, row: RowIndex) {
        let Some(pk) = self.rows[row.0].primary_key else {
            return;
        };
        let key = (self.rows[row.0].table.clone(), self.value(pk).key());
        let rows = self.keys.entry(key).or_default();
        if !rows.contains(&row) {
            rows.push(row);
        }
    }

    fn ambiguous(&self, row: RowIndex, column: &str, existing: &Value, incoming: &Value) -> WriteError {
        WriteError::AmbiguousColumnValue {
            table: self.rows[row.0].table.clone(),
            column: column.to_owned(),
            existing: existing.to_string(),
            incoming: incoming.to_string(),
        }
    }
}
