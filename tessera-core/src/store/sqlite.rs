//! SQLite-backed collaborators for the feature writer.
//!
//! [`SqliteSink`] runs statements on a borrowed [`Connection`], so callers can
//! hand it a transaction and roll back when an insert fails.
//! [`SqliteKeyGenerator`] draws keys from the current column maximum and
//! [`JsonGeometryEncoder`] stores geometries as JSON text.

use std::collections::HashMap;

use geo::Geometry;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter, types};
use serde_json::json;
use thiserror::Error;

use super::{Argument, GeometryEncoder, PrimaryKeyGenerator, StatementSink};
use crate::error::{GeometryEncodingError, IdGenerationError, SinkError};
use crate::value::{SqlType, Value};

/// Error raised by [`SqliteSink`].
#[derive(Debug, Error)]
pub enum SqliteSinkError {
    /// A value has no SQLite representation; geometries must be encoded
    /// before they reach the sink.
    #[error("cannot bind {value} to a {sql_type} column")]
    UnsupportedValue {
        /// Rendering of the rejected value.
        value: String,
        /// Declared column type, when known.
        sql_type: String,
    },
    /// The row count reported by SQLite does not fit the report type.
    #[error("affected row count {count} is out of range")]
    RowCount {
        /// Count reported by SQLite.
        count: usize,
    },
    /// Statement preparation or execution failed.
    #[error(transparent)]
    Database(#[from] rusqlite::Error),
}

/// `StatementSink` executing on a SQLite connection or transaction.
///
/// SQLite has no `ST_Transform`; transformed geometries are bound through
/// SpatiaLite's `Transform` function, which must be loaded on the
/// connection.
#[derive(Debug, Clone, Copy)]
pub struct SqliteSink<'c> {
    connection: &'c Connection,
}

impl<'c> SqliteSink<'c> {
    /// Run statements on `connection`.
    ///
    /// A [`rusqlite::Transaction`] dereferences to a connection, so the sink
    /// can be built from one directly.
    #[must_use]
    pub const fn new(connection: &'c Connection) -> Self {
        Self { connection }
    }
}

impl StatementSink for SqliteSink<'_> {
    fn exists(&mut self, table: &str, pk_column: &str, pk: &Value) -> Result<bool, SinkError> {
        let key = sqlite_value(pk, None)?;
        let query = format!(
            "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
            quoted(table),
            quoted(pk_column)
        );
        let mut statement = self
            .connection
            .prepare_cached(&query)
            .map_err(SqliteSinkError::from)?;
        Ok(statement.exists(params![key]).map_err(SqliteSinkError::from)?)
    }

    fn execute(&mut self, sql: &str, arguments: &[Argument]) -> Result<u64, SinkError> {
        let values = arguments
            .iter()
            .map(|argument| sqlite_value(&argument.value, Some(argument.sql_type)))
            .collect::<Result<Vec<_>, _>>()?;
        let count = self
            .connection
            .execute(sql, params_from_iter(values))
            .map_err(SqliteSinkError::from)?;
        Ok(u64::try_from(count).map_err(|_| SqliteSinkError::RowCount { count })?)
    }

    fn transform_call(&self, placeholder: &str, srs_code: i32) -> String {
        format!("Transform({placeholder}, {srs_code})")
    }

    fn quote_identifier(&self, name: &str) -> String {
        quoted(name)
    }
}

/// Double-quoted SQL identifier, so reserved words such as `order` work as
/// mapped names.
fn quoted(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn sqlite_value(
    value: &Value,
    sql_type: Option<SqlType>,
) -> Result<types::Value, SqliteSinkError> {
    Ok(match value {
        Value::Null => types::Value::Null,
        Value::Boolean(flag) => types::Value::Integer(i64::from(*flag)),
        Value::Integer(number) => types::Value::Integer(*number),
        Value::Real(number) => types::Value::Real(*number),
        Value::Text(text) => types::Value::Text(text.clone()),
        Value::Blob(bytes) => types::Value::Blob(bytes.clone()),
        Value::Geometry(_) => {
            return Err(SqliteSinkError::UnsupportedValue {
                value: value.to_string(),
                sql_type: sql_type.map_or_else(|| "key".to_owned(), |known| known.to_string()),
            });
        }
    })
}

/// `PrimaryKeyGenerator` continuing after the largest stored key.
///
/// The first key for a column is one more than its current maximum; later
/// keys count up from there without querying again, so keys handed out for
/// rows that are staged but not yet inserted are never repeated.
#[derive(Debug)]
pub struct SqliteKeyGenerator<'c> {
    connection: &'c Connection,
    next: HashMap<(String, String), i64>,
}

impl<'c> SqliteKeyGenerator<'c> {
    /// Draw keys from the tables reachable through `connection`.
    #[must_use]
    pub fn new(connection: &'c Connection) -> Self {
        Self {
            connection,
            next: HashMap::new(),
        }
    }

    fn stored_max(&self, table: &str, column: &str) -> Result<i64, rusqlite::Error> {
        let query = format!("SELECT MAX({}) FROM {}", quoted(column), quoted(table));
        let max: Option<i64> = self
            .connection
            .query_row(&query, [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0))
    }
}

impl PrimaryKeyGenerator for SqliteKeyGenerator<'_> {
    fn next_pk(&mut self, table: &str, column: &str) -> Result<Value, IdGenerationError> {
        let failure = |reason: String| IdGenerationError {
            table: table.to_owned(),
            column: column.to_owned(),
            reason,
        };
        let slot = (table.to_owned(), column.to_owned());
        let key = match self.next.get(&slot) {
            Some(&key) => key,
            None => self
                .stored_max(table, column)
                .map_err(|source| failure(source.to_string()))?
                .checked_add(1)
                .ok_or_else(|| failure("stored keys are exhausted".to_owned()))?,
        };
        let following = key
            .checked_add(1)
            .ok_or_else(|| failure("key space is exhausted".to_owned()))?;
        self.next.insert(slot, following);
        Ok(Value::Integer(key))
    }
}

/// `GeometryEncoder` storing geometries as JSON text.
///
/// The encoded object carries the geometry under `geometry` and, when known,
/// the reference system code under `srid`. Recognised reference systems are
/// EPSG codes in `EPSG:<code>`, URN and OGC URL form, plus `CRS84`, which
/// maps to 4326.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonGeometryEncoder;

impl GeometryEncoder for JsonGeometryEncoder {
    fn native_srs_code(&self, crs: &str) -> Option<i32> {
        if crs.ends_with("CRS84") {
            return Some(4326);
        }
        let code = crs
            .strip_prefix("EPSG:")
            .or_else(|| crs.strip_prefix("urn:ogc:def:crs:EPSG::"))
            .or_else(|| crs.strip_prefix("http://www.opengis.net/def/crs/EPSG/0/"))?;
        code.parse().ok()
    }

    fn to_native(
        &self,
        geometry: &Geometry<f64>,
        srs_code: Option<i32>,
    ) -> Result<Value, GeometryEncodingError> {
        let geometry = serde_json::to_value(geometry).map_err(|source| GeometryEncodingError {
            reason: source.to_string(),
        })?;
        let encoded = match srs_code {
            Some(srid) => json!({ "srid": srid, "geometry": geometry }),
            None => json!({ "geometry": geometry }),
        };
        Ok(Value::Text(encoded.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::InsertStatement;
    use crate::rows::{RowGraph, RowKind};
    use geo::Point;
    use rstest::{fixture, rstest};

    #[fixture]
    fn connection() -> Connection {
        let connection = Connection::open_in_memory().expect("open in-memory database");
        connection
            .execute_batch(
                "CREATE TABLE towns (id INTEGER PRIMARY KEY, name TEXT, centre TEXT);
                 INSERT INTO towns (id, name) VALUES (7, 'Bonn');",
            )
            .expect("create schema");
        connection
    }

    fn argument(value: Value, sql_type: SqlType) -> Argument {
        Argument { value, sql_type }
    }

    #[rstest]
    #[case(Value::Integer(7), true)]
    #[case(Value::Integer(8), false)]
    fn sink_checks_stored_keys(
        connection: Connection,
        #[case] key: Value,
        #[case] expected: bool,
    ) {
        let mut sink = SqliteSink::new(&connection);
        assert_eq!(sink.exists("towns", "id", &key).expect("query"), expected);
    }

    #[rstest]
    fn sink_binds_arguments_in_order(connection: Connection) {
        let mut sink = SqliteSink::new(&connection);
        let affected = sink
            .execute(
                "INSERT INTO towns (id, name) VALUES (?, ?)",
                &[
                    argument(Value::Integer(8), SqlType::Integer),
                    argument(Value::from("Köln"), SqlType::Varchar),
                ],
            )
            .expect("insert");
        let name: String = connection
            .query_row("SELECT name FROM towns WHERE id = 8", [], |row| row.get(0))
            .expect("read back");
        assert_eq!(affected, 1);
        assert_eq!(name, "Köln");
    }

    #[rstest]
    fn sink_rejects_unencoded_geometries(connection: Connection) {
        let mut sink = SqliteSink::new(&connection);
        let error = sink
            .execute(
                "INSERT INTO towns (id, centre) VALUES (?, ?)",
                &[
                    argument(Value::Integer(9), SqlType::Integer),
                    argument(Value::from(Geometry::from(Point::new(7.1, 50.7))), SqlType::Geometry),
                ],
            )
            .expect_err("geometry must be encoded first");
        assert!(error.to_string().contains("geometry"));
    }

    #[rstest]
    fn sink_reports_database_failures(connection: Connection) {
        let mut sink = SqliteSink::new(&connection);
        let error = sink
            .execute(
                "INSERT INTO towns (id) VALUES (?)",
                &[argument(Value::Integer(7), SqlType::Integer)],
            )
            .expect_err("duplicate key");
        let source = error
            .downcast_ref::<SqliteSinkError>()
            .expect("sqlite sink error");
        assert!(matches!(source, SqliteSinkError::Database(_)));
    }

    #[rstest]
    fn sink_uses_spatialite_transform(connection: Connection) {
        let sink = SqliteSink::new(&connection);
        assert_eq!(sink.transform_call("?", 25832), "Transform(?, 25832)");
    }

    #[rstest]
    fn reserved_words_work_as_mapped_names(connection: Connection) {
        connection
            .execute_batch(r#"CREATE TABLE "order" (id INTEGER PRIMARY KEY, "group" TEXT);"#)
            .expect("create table");
        let mut graph = RowGraph::new();
        let row = graph.add_row("order", RowKind::Plain);
        graph
            .set_primary_key(row, "id", SqlType::Integer, Value::Integer(1))
            .expect("pk");
        graph
            .set_column(row, "group", SqlType::Varchar, Value::from("north"))
            .expect("column");

        let mut sink = SqliteSink::new(&connection);
        let statement = InsertStatement::for_row(&graph, row, &sink);
        assert_eq!(
            statement.sql,
            r#"INSERT INTO "order" ("id", "group") VALUES (?, ?)"#
        );
        sink.execute(&statement.sql, &statement.arguments)
            .expect("insert");
        assert!(sink.exists("order", "id", &Value::Integer(1)).expect("query"));
        let mut keys = SqliteKeyGenerator::new(&connection);
        assert_eq!(keys.next_pk("order", "id").expect("key"), Value::Integer(2));
    }

    #[rstest]
    fn key_generator_continues_after_stored_maximum(connection: Connection) {
        let mut keys = SqliteKeyGenerator::new(&connection);
        assert_eq!(keys.next_pk("towns", "id").expect("key"), Value::Integer(8));
        assert_eq!(keys.next_pk("towns", "id").expect("key"), Value::Integer(9));
    }

    #[rstest]
    fn key_generator_starts_empty_tables_at_one(connection: Connection) {
        connection
            .execute_batch("CREATE TABLE signs (id INTEGER PRIMARY KEY);")
            .expect("create table");
        let mut keys = SqliteKeyGenerator::new(&connection);
        assert_eq!(keys.next_pk("signs", "id").expect("key"), Value::Integer(1));
    }

    #[rstest]
    fn key_generator_reports_unknown_tables(connection: Connection) {
        let mut keys = SqliteKeyGenerator::new(&connection);
        let error = keys.next_pk("canals", "id").expect_err("no such table");
        assert_eq!(error.table, "canals");
        assert!(error.reason.contains("canals"));
    }

    #[rstest]
    #[case("EPSG:25832", Some(25832))]
    #[case("urn:ogc:def:crs:EPSG::4258", Some(4258))]
    #[case("http://www.opengis.net/def/crs/EPSG/0/3857", Some(3857))]
    #[case("urn:ogc:def:crs:OGC:1.3:CRS84", Some(4326))]
    #[case("EPSG:abc", None)]
    #[case("local", None)]
    fn encoder_recognises_reference_systems(#[case] crs: &str, #[case] code: Option<i32>) {
        assert_eq!(JsonGeometryEncoder.native_srs_code(crs), code);
    }

    #[rstest]
    fn encoder_tags_geometries_with_their_code() {
        let point = Geometry::from(Point::new(7.1, 50.7));
        let Value::Text(encoded) = JsonGeometryEncoder
            .to_native(&point, Some(4326))
            .expect("encode")
        else {
            panic!("expected text");
        };
        let parsed: serde_json::Value = serde_json::from_str(&encoded).expect("valid json");
        assert_eq!(parsed["srid"], 4326);
        let decoded: Geometry<f64> =
            serde_json::from_value(parsed["geometry"].clone()).expect("geometry");
        assert_eq!(decoded, point);
    }
}
