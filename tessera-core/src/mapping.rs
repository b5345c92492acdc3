//! Schema mapping from feature types onto tables, columns and keys.
//!
//! The mapping is constructed in code by the caller; reading it from a
//! configuration format is outside this crate.

use std::collections::HashMap;

use crate::value::{SqlType, Value};

/// A typed column of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingField {
    /// Table holding the column.
    pub table: String,
    /// Column name.
    pub column: String,
    /// Declared SQL type.
    pub sql_type: SqlType,
}

impl MappingField {
    /// Describe a column.
    pub fn new(table: impl Into<String>, column: impl Into<String>, sql_type: SqlType) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            sql_type,
        }
    }
}

/// Side of a [`TableRelation`] that holds the foreign key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeySide {
    /// The `from` table references the `to` table.
    From,
    /// The `to` table references the `from` table.
    To,
}

/// How a primary key for the `to` side of a relation is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Ask the [`PrimaryKeyGenerator`](crate::PrimaryKeyGenerator).
    Generated,
    /// Reuse the value of the named column of the owning row.
    Parent(String),
}

/// One hop between two tables.
///
/// `pairs` lists the joined columns as `(from, to)`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRelation {
    /// Joined column pairs.
    pub pairs: Vec<(MappingField, MappingField)>,
    /// Which side holds the foreign key.
    pub foreign_key: ForeignKeySide,
    /// Key source for rows created on the `to` side.
    pub key_source: KeySource,
}

impl TableRelation {
    /// Relation over a single column pair.
    #[must_use]
    pub fn new(from: MappingField, to: MappingField, foreign_key: ForeignKeySide) -> Self {
        Self {
            pairs: vec![(from, to)],
            foreign_key,
            key_source: KeySource::Generated,
        }
    }

    /// Add another joined column pair.
    #[must_use]
    pub fn with_pair(mut self, from: MappingField, to: MappingField) -> Self {
        self.pairs.push((from, to));
        self
    }

    /// Override how keys for the `to` side are produced.
    #[must_use]
    pub fn with_key_source(mut self, key_source: KeySource) -> Self {
        self.key_source = key_source;
        self
    }

    /// Whether the `from` table holds the foreign key.
    #[must_use]
    pub fn is_from_fk(&self) -> bool {
        self.foreign_key == ForeignKeySide::From
    }

    /// Table on the `to` side.
    #[must_use]
    pub fn to_table(&self) -> Option<&str> {
        self.pairs.first().map(|(_, to)| to.table.as_str())
    }

    /// First `from` column.
    #[must_use]
    pub fn first_from(&self) -> Option<&MappingField> {
        self.pairs.first().map(|(from, _)| from)
    }

    /// First `to` column.
    #[must_use]
    pub fn first_to(&self) -> Option<&MappingField> {
        self.pairs.first().map(|(_, to)| to)
    }
}

/// Content backing a simple property.
#[derive(Debug, Clone, PartialEq)]
pub enum SimpleContent {
    /// A writable column.
    Column(MappingField),
    /// A constant; nothing is written.
    Constant(Value),
    /// A computed SQL expression; nothing is written.
    SqlExpression(String),
}

/// Mapping category of a property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    /// Scalar property.
    Simple {
        /// Backing content.
        content: SimpleContent,
        /// Relation chain to the property table, empty when stored inline.
        relations: Vec<TableRelation>,
    },
    /// Geometry property.
    Geometry {
        /// Spatial column.
        column: MappingField,
        /// Reference system identifier of the column, such as `EPSG:4326`.
        srs: String,
        /// Native reference system code of the column, when known.
        srs_code: Option<i32>,
        /// Relation chain to the property table, empty when stored inline.
        relations: Vec<TableRelation>,
    },
    /// Feature-valued property.
    Feature {
        /// Declared (possibly abstract) value type.
        target_type: String,
        /// One direct relation or two relations through a join table.
        relations: Vec<TableRelation>,
    },
}

/// Mapping of one property of a feature type.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyMapping {
    /// Property name.
    pub name: String,
    /// Mapping category.
    pub kind: PropertyKind,
}

impl PropertyMapping {
    /// Simple property stored in `column`.
    pub fn simple(name: impl Into<String>, column: MappingField) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Simple {
                content: SimpleContent::Column(column),
                relations: Vec::new(),
            },
        }
    }

    /// Simple property backed by non-column content.
    pub fn derived(name: impl Into<String>, content: SimpleContent) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Simple {
                content,
                relations: Vec::new(),
            },
        }
    }

    /// Geometry property stored in `column` using the given reference system.
    pub fn geometry(
        name: impl Into<String>,
        column: MappingField,
        srs: impl Into<String>,
        srs_code: Option<i32>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Geometry {
                column,
                srs: srs.into(),
                srs_code,
                relations: Vec::new(),
            },
        }
    }

    /// Feature-valued property whose values are of `target_type`.
    pub fn feature(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PropertyKind::Feature {
                target_type: target_type.into(),
                relations: Vec::new(),
            },
        }
    }

    /// Append a relation hop.
    #[must_use]
    pub fn via(mut self, relation: TableRelation) -> Self {
        match &mut self.kind {
            PropertyKind::Simple { relations, .. }
            | PropertyKind::Geometry { relations, .. }
            | PropertyKind::Feature { relations, .. } => relations.push(relation),
        }
        self
    }
}

/// Mapping of a feature type onto its table.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTypeMapping {
    /// Feature type name.
    pub name: String,
    /// Table holding one row per feature.
    pub table: String,
    /// Columns forming the feature identifier.
    pub id_columns: Vec<MappingField>,
    /// Prefix stripped from feature identifiers before they become keys.
    pub id_prefix: String,
    /// Whether features of this type may be inserted.
    pub insertable: bool,
    /// Abstract types are never instantiated directly.
    pub is_abstract: bool,
    /// Type this one may substitute for.
    pub parent: Option<String>,
    /// Property mappings in declaration order.
    pub properties: Vec<PropertyMapping>,
}

impl FeatureTypeMapping {
    /// Map a feature type onto `table`, identified by `id_column`.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        id_column: &str,
        id_type: SqlType,
    ) -> Self {
        let table_name = table.into();
        Self {
            name: name.into(),
            id_columns: vec![MappingField::new(table_name.clone(), id_column, id_type)],
            table: table_name,
            id_prefix: String::new(),
            insertable: true,
            is_abstract: false,
            parent: None,
            properties: Vec::new(),
        }
    }

    /// Set the identifier prefix.
    #[must_use]
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Add a property mapping.
    #[must_use]
    pub fn with_property(mut self, property: PropertyMapping) -> Self {
        self.properties.push(property);
        self
    }

    /// Declare the type substitutable for `parent`.
    #[must_use]
    pub fn substitutes(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Mark the type abstract.
    #[must_use]
    pub const fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Forbid inserts.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.insertable = false;
        self
    }

    /// Look up a property mapping by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyMapping> {
        self.properties.iter().find(|property| property.name == name)
    }
}

/// All feature type mappings of a store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaMapping {
    feature_types: HashMap<String, FeatureTypeMapping>,
}

impl SchemaMapping {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feature type, replacing any previous mapping of that name.
    #[must_use]
    pub fn with_feature_type(mut self, feature_type: FeatureTypeMapping) -> Self {
        self.feature_types.insert(feature_type.name.clone(), feature_type);
        self
    }

    /// Look up a feature type.
    #[must_use]
    pub fn feature_type(&self, name: &str) -> Option<&FeatureTypeMapping> {
        self.feature_types.get(name)
    }

    /// Iterate over all registered feature types.
    pub fn feature_types(&self) -> impl Iterator<Item = &FeatureTypeMapping> {
        self.feature_types.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn via_appends_relations_for_every_kind() {
        let relation = TableRelation::new(
            MappingField::new("roads", "id", SqlType::Integer),
            MappingField::new("road_names", "road_id", SqlType::Integer),
            ForeignKeySide::To,
        );
        let property = PropertyMapping::simple(
            "name",
            MappingField::new("road_names", "name", SqlType::Varchar),
        )
        .via(relation.clone());
        let PropertyKind::Simple { relations, .. } = property.kind else {
            panic!("expected a simple property");
        };
        assert_eq!(relations, vec![relation]);
    }

    #[rstest]
    fn feature_type_keeps_single_id_column() {
        let mapping = FeatureTypeMapping::new("Road", "roads", "id", SqlType::Integer)
            .with_id_prefix("ROAD_");
        assert_eq!(mapping.id_columns.len(), 1);
        assert_eq!(mapping.id_columns[0].table, "roads");
        assert!(mapping.insertable);
    }
}
