//! Errors raised while staging and writing feature graphs.

use thiserror::Error;

use crate::value::SqlType;

/// Boxed error returned by a [`StatementSink`](crate::StatementSink).
pub type SinkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failure reported by a [`PrimaryKeyGenerator`](crate::PrimaryKeyGenerator).
#[derive(Debug, Error)]
#[error("failed to generate a primary key for {table}.{column}: {reason}")]
pub struct IdGenerationError {
    /// Table the key was requested for.
    pub table: String,
    /// Key column.
    pub column: String,
    /// Human readable cause.
    pub reason: String,
}

/// Failure reported by a [`GeometryEncoder`](crate::GeometryEncoder).
#[derive(Debug, Error)]
#[error("failed to encode geometry: {reason}")]
pub struct GeometryEncodingError {
    /// Human readable cause.
    pub reason: String,
}

/// Errors that abort staging or execution of the current transaction.
///
/// Every variant is fatal for the batch being written; rolling back the
/// enclosing transaction is the caller's responsibility.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The feature graph does not fit the schema mapping.
    #[error("feature type '{feature_type}' does not match the schema mapping: {detail}")]
    SchemaMismatch {
        /// Feature type being staged.
        feature_type: String,
        /// What did not match.
        detail: String,
    },
    /// The mapped feature type forbids insertion.
    #[error("feature type '{feature_type}' is not insertable")]
    NotInsertable {
        /// Read-only feature type.
        feature_type: String,
    },
    /// A root feature carries the existence marker.
    #[error("feature '{id}' of type '{feature_type}' is already stored and cannot be inserted")]
    AlreadyPersisted {
        /// Feature type of the root.
        feature_type: String,
        /// Identifier of the root.
        id: String,
    },
    /// A feature identifier cannot be turned into a primary key value.
    #[error("feature id '{id}' of type '{feature_type}' is invalid: {reason}")]
    InvalidFeatureId {
        /// Feature type.
        feature_type: String,
        /// Raw identifier.
        id: String,
        /// Why the conversion failed.
        reason: String,
    },
    /// A feature key does not belong to the feature graph being staged.
    #[error("feature key {key} is not part of the feature graph")]
    UnknownFeature {
        /// Offending arena index.
        key: usize,
    },
    /// One column received two different literal values.
    #[error("ambiguous value for column {table}.{column}: {existing} vs {incoming}")]
    AmbiguousColumnValue {
        /// Table of the row.
        table: String,
        /// Conflicting column.
        column: String,
        /// Rendered value already staged.
        existing: String,
        /// Rendered value that was rejected.
        incoming: String,
    },
    /// A key column needed by a dependent row has not been staged.
    #[error("no value for key column {table}.{column} is available")]
    MissingForeignKeyValue {
        /// Table expected to provide the key.
        table: String,
        /// Missing key column.
        column: String,
    },
    /// Foreign key and primary key columns disagree on their SQL type.
    #[error(
        "foreign key {fk_table}.{fk_column} ({fk_type}) does not match primary key {pk_table}.{pk_column} ({pk_type})"
    )]
    TypeMismatch {
        /// Table holding the foreign key.
        fk_table: String,
        /// Foreign key column.
        fk_column: String,
        /// Declared foreign key type.
        fk_type: SqlType,
        /// Table holding the primary key.
        pk_table: String,
        /// Primary key column.
        pk_column: String,
        /// Staged primary key type.
        pk_type: SqlType,
    },
    /// No transformation path exists between two spatial reference systems.
    #[error("cannot store geometry of property '{property}' given in {geometry_srs} as {mapped_srs}")]
    UnsupportedSrs {
        /// Geometry property.
        property: String,
        /// Reference system of the incoming geometry.
        geometry_srs: String,
        /// Reference system of the mapped column.
        mapped_srs: String,
    },
    /// The property mapping needs more table hops than supported.
    #[error("property '{property}' uses {hops} table relations, which is not supported")]
    UnsupportedRelationDepth {
        /// Property being staged.
        property: String,
        /// Declared number of relations.
        hops: usize,
    },
    /// A primary key could not be generated.
    #[error(transparent)]
    IdGeneration(#[from] IdGenerationError),
    /// A geometry could not be converted to its native form.
    #[error("failed to encode geometry of property '{property}'")]
    GeometryEncoding {
        /// Geometry property.
        property: String,
        /// Encoder failure.
        #[source]
        source: GeometryEncodingError,
    },
    /// Compaction found a reference with no matching column on the surviving row.
    #[error("cannot relink reference to {table}.{column}: surviving row has no such column")]
    BrokenRelink {
        /// Table of the merged rows.
        table: String,
        /// Column that was referenced on the dropped row.
        column: String,
    },
    /// The statement sink rejected a statement.
    #[error("failed to insert into {table} ({})", .columns.join(", "))]
    Statement {
        /// Target table of the failing row.
        table: String,
        /// Columns of the failing row.
        columns: Vec<String>,
        /// Backend failure.
        #[source]
        source: SinkError,
    },
}

impl WriteError {
    pub(crate) fn schema_mismatch(feature_type: &str, detail: impl Into<String>) -> Self {
        Self::SchemaMismatch {
            feature_type: feature_type.to_owned(),
            detail: detail.into(),
        }
    }

    pub(crate) fn missing_key(table: &str, column: &str) -> Self {
        Self::MissingForeignKeyValue {
            table: table.to_owned(),
            column: column.to_owned(),
        }
    }
}
