//! Identity of feature instances during staging.

use std::fmt;

use crate::error::WriteError;
use crate::mapping::FeatureTypeMapping;
use crate::value::{SqlType, Value};

/// Identifies a feature instance by type and identifier.
///
/// Two features with the same `FeatureId` are the same instance as far as
/// staging is concerned: the second occurrence reuses the row of the first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId {
    feature_type: String,
    identifier: String,
}

impl FeatureId {
    /// Build an identity key.
    pub fn new(feature_type: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            feature_type: feature_type.into(),
            identifier: identifier.into(),
        }
    }

    /// Feature type name.
    #[must_use]
    pub fn feature_type(&self) -> &str {
        &self.feature_type
    }

    /// Raw identifier, including any type prefix.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Convert the identifier into the primary key value of `mapping`.
    ///
    /// The type's id prefix is stripped and the remainder converted to the id
    /// column's SQL type.
    ///
    /// # Examples
    /// ```
    /// use tessera_core::{FeatureId, FeatureTypeMapping, SqlType, Value};
    ///
    /// let roads = FeatureTypeMapping::new("Road", "roads", "id", SqlType::Integer)
    ///     .with_id_prefix("ROAD_");
    /// let fid = FeatureId::new("Road", "ROAD_12");
    /// assert_eq!(fid.pk_value(&roads).unwrap(), Value::Integer(12));
    /// ```
    pub fn pk_value(&self, mapping: &FeatureTypeMapping) -> Result<Value, WriteError> {
        let id_type = match mapping.id_columns.as_slice() {
            [column] => column.sql_type,
            columns => {
                return Err(WriteError::schema_mismatch(
                    &mapping.name,
                    format!(
                        "compound feature ids are not supported ({} id columns)",
                        columns.len()
                    ),
                ));
            }
        };
        let raw = self
            .identifier
            .strip_prefix(mapping.id_prefix.as_str())
            .ok_or_else(|| self.invalid(format!("missing prefix '{}'", mapping.id_prefix)))?;
        if raw.is_empty() {
            return Err(self.invalid("identifier is empty once the prefix is removed".to_owned()));
        }
        convert_identifier(raw, id_type).map_err(|reason| self.invalid(reason))
    }

    fn invalid(&self, reason: String) -> WriteError {
        WriteError::InvalidFeatureId {
            feature_type: self.feature_type.clone(),
            id: self.identifier.clone(),
            reason,
        }
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.feature_type, self.identifier)
    }
}

fn convert_identifier(raw: &str, id_type: SqlType) -> Result<Value, String> {
    if id_type.is_integral() {
        raw.parse::<i64>()
            .map(Value::Integer)
            .map_err(|err| format!("'{raw}' is not a valid {id_type}: {err}"))
    } else {
        Ok(Value::Text(raw.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn roads(id_type: SqlType) -> FeatureTypeMapping {
        FeatureTypeMapping::new("Road", "roads", "id", id_type).with_id_prefix("ROAD_")
    }

    #[rstest]
    #[case(SqlType::Integer, "ROAD_7", Value::Integer(7))]
    #[case(SqlType::Varchar, "ROAD_a7", Value::Text("a7".into()))]
    fn strips_prefix_and_converts(
        #[case] id_type: SqlType,
        #[case] raw: &str,
        #[case] expected: Value,
    ) {
        let fid = FeatureId::new("Road", raw);
        assert_eq!(fid.pk_value(&roads(id_type)).expect("valid id"), expected);
    }

    #[rstest]
    #[case("TOWN_7")]
    #[case("ROAD_")]
    #[case("ROAD_seven")]
    fn rejects_malformed_identifiers(#[case] raw: &str) {
        let fid = FeatureId::new("Road", raw);
        let error = fid.pk_value(&roads(SqlType::Integer)).expect_err("invalid id");
        assert!(matches!(error, WriteError::InvalidFeatureId { .. }));
    }

    #[rstest]
    fn compound_ids_are_a_schema_mismatch() {
        let mut mapping = roads(SqlType::Integer);
        mapping
            .id_columns
            .push(crate::MappingField::new("roads", "region", SqlType::Integer));
        let error = FeatureId::new("Road", "ROAD_1")
            .pk_value(&mapping)
            .expect_err("compound id");
        assert!(matches!(error, WriteError::SchemaMismatch { .. }));
    }

    #[rstest]
    fn identity_ignores_nothing_but_type_and_id() {
        assert_eq!(FeatureId::new("Road", "ROAD_1"), FeatureId::new("Road", "ROAD_1"));
        assert_ne!(FeatureId::new("Road", "ROAD_1"), FeatureId::new("Town", "ROAD_1"));
    }
}
