//! Collaborator traits connecting the writer to a backend.
//!
//! The writer never talks to a database directly. It asks a
//! [`PrimaryKeyGenerator`] for fresh keys, a [`GeometryEncoder`] for the
//! native form of geometries, and hands finished statements to a
//! [`StatementSink`]. The `store-sqlite` feature provides implementations
//! backed by `rusqlite`.

use geo::Geometry;

use crate::error::{GeometryEncodingError, IdGenerationError, SinkError};
use crate::value::{SqlType, Value};

#[cfg(feature = "store-sqlite")]
mod sqlite;

#[cfg(feature = "store-sqlite")]
pub use sqlite::{JsonGeometryEncoder, SqliteKeyGenerator, SqliteSink, SqliteSinkError};

/// Source of primary key values for new rows.
pub trait PrimaryKeyGenerator {
    /// Produce a key for `table.column` that no staged or stored row uses.
    fn next_pk(&mut self, table: &str, column: &str) -> Result<Value, IdGenerationError>;
}

/// Converts domain geometries into the backend's native representation.
pub trait GeometryEncoder {
    /// Native code of the reference system identified by `crs`, such as
    /// `EPSG:4326`, or `None` when the backend does not know it.
    fn native_srs_code(&self, crs: &str) -> Option<i32>;

    /// Encode `geometry`, tagging it with `srs_code` when one is given.
    fn to_native(
        &self,
        geometry: &Geometry<f64>,
        srs_code: Option<i32>,
    ) -> Result<Value, GeometryEncodingError>;
}

/// One bound statement argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Value to bind.
    pub value: Value,
    /// Declared SQL type of the column.
    pub sql_type: SqlType,
}

/// Executes insert statements and answers existence checks.
///
/// # Examples
///
/// ```rust
/// use tessera_core::{Argument, SinkError, StatementSink, Value};
///
/// #[derive(Default)]
/// struct Counting {
///     statements: usize,
/// }
///
/// impl StatementSink for Counting {
///     fn exists(&mut self, _: &str, _: &str, _: &Value) -> Result<bool, SinkError> {
///         Ok(false)
///     }
///
///     fn execute(&mut self, _: &str, _: &[Argument]) -> Result<u64, SinkError> {
///         self.statements += 1;
///         Ok(1)
///     }
/// }
///
/// let sink = Counting::default();
/// assert_eq!(sink.transform_call("?", 4326), "ST_Transform(?, 4326)");
/// ```
pub trait StatementSink {
    /// Whether `table` already holds a row whose `pk_column` equals `pk`.
    fn exists(&mut self, table: &str, pk_column: &str, pk: &Value) -> Result<bool, SinkError>;

    /// Run `sql` with positional `?` placeholders bound to `arguments`.
    ///
    /// Returns the number of affected rows.
    fn execute(&mut self, sql: &str, arguments: &[Argument]) -> Result<u64, SinkError>;

    /// Wrap a placeholder so the backend transforms the bound geometry into
    /// reference system `srs_code` on insert.
    fn transform_call(&self, placeholder: &str, srs_code: i32) -> String {
        format!("ST_Transform({placeholder}, {srs_code})")
    }

    /// Render a table or column name for use in SQL text.
    ///
    /// Names are used as mapped by default.
    fn quote_identifier(&self, name: &str) -> String {
        name.to_owned()
    }
}

impl<T: PrimaryKeyGenerator + ?Sized> PrimaryKeyGenerator for &mut T {
    fn next_pk(&mut self, table: &str, column: &str) -> Result<Value, IdGenerationError> {
        (**self).next_pk(table, column)
    }
}

impl<T: GeometryEncoder + ?Sized> GeometryEncoder for &T {
    fn native_srs_code(&self, crs: &str) -> Option<i32> {
        (**self).native_srs_code(crs)
    }

    fn to_native(
        &self,
        geometry: &Geometry<f64>,
        srs_code: Option<i32>,
    ) -> Result<Value, GeometryEncodingError> {
        (**self).to_native(geometry, srs_code)
    }
}

impl<T: StatementSink + ?Sized> StatementSink for &mut T {
    fn exists(&mut self, table: &str, pk_column: &str, pk: &Value) -> Result<bool, SinkError> {
        (**self).exists(table, pk_column, pk)
    }

    fn execute(&mut self, sql: &str, arguments: &[Argument]) -> Result<u64, SinkError> {
        (**self).execute(sql, arguments)
    }

    fn transform_call(&self, placeholder: &str, srs_code: i32) -> String {
        (**self).transform_call(placeholder, srs_code)
    }

    fn quote_identifier(&self, name: &str) -> String {
        (**self).quote_identifier(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MemorySink, SequenceKeys};
    use rstest::rstest;

    fn draw(mut keys: impl PrimaryKeyGenerator) -> Value {
        keys.next_pk("roads", "id").expect("key")
    }

    #[rstest]
    fn mutable_references_forward_to_the_generator() {
        let mut keys = SequenceKeys::starting_at(5);
        assert_eq!(draw(&mut keys), Value::Integer(5));
        assert_eq!(draw(&mut keys), Value::Integer(6));
    }

    #[rstest]
    fn mutable_references_forward_to_the_sink() {
        fn run(mut sink: impl StatementSink) -> u64 {
            sink.execute("INSERT INTO roads (id) VALUES (?)", &[])
                .expect("execute")
        }

        let mut sink = MemorySink::default();
        assert_eq!(run(&mut sink), 1);
        assert_eq!(sink.statements().len(), 1);
    }
}
