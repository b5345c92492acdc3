//! In-memory collaborators used by unit and behaviour tests.

use std::collections::HashMap;

use geo::Geometry;

use crate::error::{GeometryEncodingError, IdGenerationError, SinkError};
use crate::mapping::{
    FeatureTypeMapping, ForeignKeySide, MappingField, PropertyMapping, SchemaMapping,
    SimpleContent, TableRelation,
};
use crate::store::{Argument, GeometryEncoder, PrimaryKeyGenerator, StatementSink};
use crate::value::{SqlType, Value};

/// A statement received by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    /// SQL text.
    pub sql: String,
    /// Bound arguments.
    pub arguments: Vec<Argument>,
}

impl RecordedStatement {
    /// Target table parsed from an `INSERT INTO` statement.
    #[must_use]
    pub fn table(&self) -> Option<&str> {
        self.sql
            .strip_prefix("INSERT INTO ")
            .and_then(|rest| rest.split_whitespace().next())
    }

    /// Column list of an `INSERT INTO` statement.
    #[must_use]
    pub fn columns(&self) -> Vec<&str> {
        self.sql
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(')'))
            .map(|(columns, _)| columns.split(", ").collect())
            .unwrap_or_default()
    }

    /// Value bound to `column`.
    #[must_use]
    pub fn value(&self, column: &str) -> Option<&Value> {
        let position = self.columns().iter().position(|name| *name == column)?;
        self.arguments.get(position).map(|argument| &argument.value)
    }
}

/// `StatementSink` that records statements instead of running them.
///
/// Existing keys are registered per table; statements against a table set
/// up with [`MemorySink::failing_on`] are rejected and not recorded.
#[derive(Debug, Default)]
pub struct MemorySink {
    statements: Vec<RecordedStatement>,
    existing: HashMap<String, Vec<Value>>,
    failing_tables: Vec<String>,
}

impl MemorySink {
    /// Pretend `table` already stores a row keyed by `pk`.
    #[must_use]
    pub fn with_existing(mut self, table: impl Into<String>, pk: Value) -> Self {
        self.existing.entry(table.into()).or_default().push(pk);
        self
    }

    /// Reject every insert into `table`.
    #[must_use]
    pub fn failing_on(mut self, table: impl Into<String>) -> Self {
        self.failing_tables.push(table.into());
        self
    }

    /// Statements executed so far, in order.
    #[must_use]
    pub fn statements(&self) -> &[RecordedStatement] {
        &self.statements
    }

    /// Tables written to, in statement order.
    #[must_use]
    pub fn tables(&self) -> Vec<&str> {
        self.statements
            .iter()
            .filter_map(RecordedStatement::table)
            .collect()
    }
}

impl StatementSink for MemorySink {
    fn exists(&mut self, table: &str, _pk_column: &str, pk: &Value) -> Result<bool, SinkError> {
        Ok(self
            .existing
            .get(table)
            .is_some_and(|keys| keys.contains(pk)))
    }

    fn execute(&mut self, sql: &str, arguments: &[Argument]) -> Result<u64, SinkError> {
        let statement = RecordedStatement {
            sql: sql.to_owned(),
            arguments: arguments.to_vec(),
        };
        if let Some(table) = statement.table()
            && self.failing_tables.iter().any(|failing| failing == table)
        {
            return Err(format!("insert into {table} rejected").into());
        }
        self.statements.push(statement);
        Ok(1)
    }
}

/// `PrimaryKeyGenerator` handing out consecutive integers shared by all tables.
#[derive(Debug, Clone)]
pub struct SequenceKeys {
    next: i64,
    issued: Vec<(String, String, i64)>,
}

impl Default for SequenceKeys {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

impl SequenceKeys {
    /// Start the sequence at `first`.
    #[must_use]
    pub const fn starting_at(first: i64) -> Self {
        Self {
            next: first,
            issued: Vec::new(),
        }
    }

    /// Keys issued so far as `(table, column, key)`.
    #[must_use]
    pub fn issued(&self) -> &[(String, String, i64)] {
        &self.issued
    }
}

impl PrimaryKeyGenerator for SequenceKeys {
    fn next_pk(&mut self, table: &str, column: &str) -> Result<Value, IdGenerationError> {
        let key = self.next;
        self.next = key.checked_add(1).ok_or_else(|| IdGenerationError {
            table: table.to_owned(),
            column: column.to_owned(),
            reason: "sequence exhausted".to_owned(),
        })?;
        self.issued.push((table.to_owned(), column.to_owned(), key));
        Ok(Value::Integer(key))
    }
}

/// `GeometryEncoder` that keeps geometries in domain form.
///
/// Reference systems named `EPSG:<code>` map to `<code>`; any other name is
/// unknown.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl GeometryEncoder for PassthroughEncoder {
    fn native_srs_code(&self, crs: &str) -> Option<i32> {
        crs.strip_prefix("EPSG:")?.parse().ok()
    }

    fn to_native(
        &self,
        geometry: &Geometry<f64>,
        _srs_code: Option<i32>,
    ) -> Result<Value, GeometryEncodingError> {
        Ok(Value::Geometry(geometry.clone()))
    }
}

fn int(table: &str, column: &str) -> MappingField {
    MappingField::new(table, column, SqlType::Integer)
}

fn text(table: &str, column: &str) -> MappingField {
    MappingField::new(table, column, SqlType::Varchar)
}

/// Schema of a small road network used throughout the tests.
///
/// | Type     | Table      | Id prefix | Notes                                        |
/// |----------|------------|-----------|----------------------------------------------|
/// | Road     | `roads`    | `ROAD_`   | see below                                    |
/// | Town     | `towns`    | `TOWN_`   | `name` inline, `centre` in EPSG:4326         |
/// | Sign     | `signs`    | `SIGN_`   | `signs.road_id` references its road          |
/// | Building | abstract   |           | substituted by Church and House              |
/// | Church   | `churches` | `CHURCH_` |                                              |
/// | House    | `houses`   | `HOUSE_`  |                                              |
/// | Bridge   | `bridges`  | `BRIDGE_` | read only                                    |
///
/// Road properties:
/// - `name`: stored in `road_names`, referenced through `roads.name_id`;
/// - `lanes`: inline integer; `kind`: the constant `'road'`, never written;
/// - `geometry`: `roads.geom` in EPSG:25832;
/// - `town`: `roads.town_id` references `towns.id`;
/// - `next`: `roads.next_id` references another road;
/// - `signs`: sub-features holding the foreign key;
/// - `crossings`: other roads linked through `road_crossings`;
/// - `landmark`: a Building, disambiguated by `roads.ft_landmark_id`.
#[must_use]
pub fn road_network() -> SchemaMapping {
    let road = FeatureTypeMapping::new("Road", "roads", "id", SqlType::Integer)
        .with_id_prefix("ROAD_")
        .with_property(
            PropertyMapping::simple("name", text("road_names", "name")).via(TableRelation::new(
                int("roads", "name_id"),
                int("road_names", "id"),
                ForeignKeySide::From,
            )),
        )
        .with_property(PropertyMapping::simple("lanes", int("roads", "lanes")))
        .with_property(PropertyMapping::derived(
            "kind",
            SimpleContent::Constant(Value::from("road")),
        ))
        .with_property(PropertyMapping::geometry(
            "geometry",
            MappingField::new("roads", "geom", SqlType::Geometry),
            "EPSG:25832",
            Some(25832),
        ))
        .with_property(PropertyMapping::feature("town", "Town").via(TableRelation::new(
            int("roads", "town_id"),
            int("towns", "id"),
            ForeignKeySide::From,
        )))
        .with_property(PropertyMapping::feature("next", "Road").via(TableRelation::new(
            int("roads", "next_id"),
            int("roads", "id"),
            ForeignKeySide::From,
        )))
        .with_property(PropertyMapping::feature("signs", "Sign").via(TableRelation::new(
            int("roads", "id"),
            int("signs", "road_id"),
            ForeignKeySide::To,
        )))
        .with_property(
            PropertyMapping::feature("crossings", "Road")
                .via(TableRelation::new(
                    int("roads", "id"),
                    int("road_crossings", "road_id"),
                    ForeignKeySide::To,
                ))
                .via(TableRelation::new(
                    int("road_crossings", "crossing_id"),
                    int("roads", "id"),
                    ForeignKeySide::From,
                )),
        )
        .with_property(
            PropertyMapping::feature("landmark", "Building").via(TableRelation::new(
                int("roads", "landmark_id"),
                int("buildings", "id"),
                ForeignKeySide::From,
            )),
        );
    let town = FeatureTypeMapping::new("Town", "towns", "id", SqlType::Integer)
        .with_id_prefix("TOWN_")
        .with_property(PropertyMapping::simple("name", text("towns", "name")))
        .with_property(PropertyMapping::geometry(
            "centre",
            MappingField::new("towns", "centre", SqlType::Geometry),
            "EPSG:4326",
            Some(4326),
        ));
    let sign = FeatureTypeMapping::new("Sign", "signs", "id", SqlType::Integer)
        .with_id_prefix("SIGN_")
        .with_property(PropertyMapping::simple("text", text("signs", "text")));
    let building = FeatureTypeMapping::new("Building", "buildings", "id", SqlType::Integer)
        .abstract_type();
    let church = FeatureTypeMapping::new("Church", "churches", "id", SqlType::Integer)
        .with_id_prefix("CHURCH_")
        .substitutes("Building");
    let house = FeatureTypeMapping::new("House", "houses", "id", SqlType::Integer)
        .with_id_prefix("HOUSE_")
        .substitutes("Building");
    let bridge = FeatureTypeMapping::new("Bridge", "bridges", "id", SqlType::Integer)
        .with_id_prefix("BRIDGE_")
        .read_only();

    SchemaMapping::new()
        .with_feature_type(road)
        .with_feature_type(town)
        .with_feature_type(sign)
        .with_feature_type(building)
        .with_feature_type(church)
        .with_feature_type(house)
        .with_feature_type(bridge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn sink_records_and_rejects_by_table() {
        let mut sink = MemorySink::default().failing_on("towns");
        sink.execute("INSERT INTO roads (id) VALUES (?)", &[])
            .expect("roads accepted");
        assert!(sink.execute("INSERT INTO towns (id) VALUES (?)", &[]).is_err());
        assert_eq!(sink.tables(), vec!["roads"]);
    }

    #[rstest]
    fn recorded_statements_expose_bound_columns() {
        let statement = RecordedStatement {
            sql: "INSERT INTO roads (id, town_id) VALUES (?, ?)".to_owned(),
            arguments: vec![
                Argument {
                    value: Value::Integer(1),
                    sql_type: SqlType::Integer,
                },
                Argument {
                    value: Value::Integer(2),
                    sql_type: SqlType::Integer,
                },
            ],
        };
        assert_eq!(statement.columns(), vec!["id", "town_id"]);
        assert_eq!(statement.value("town_id"), Some(&Value::Integer(2)));
        assert_eq!(statement.value("name"), None);
    }

    #[rstest]
    #[case("EPSG:4326", Some(4326))]
    #[case("urn:ogc:def:crs:OGC:1.3:CRS84", None)]
    fn passthrough_encoder_knows_epsg_codes(#[case] crs: &str, #[case] code: Option<i32>) {
        assert_eq!(PassthroughEncoder.native_srs_code(crs), code);
    }
}
