//! Facade crate for the Tessera feature writer.
//!
//! This crate re-exports the public API of `tessera-core`. The SQLite
//! collaborators are available behind the `store-sqlite` feature.

#![forbid(unsafe_code)]

pub use tessera_core::{
    Argument, FeatureGraph, Feature, FeatureId, FeatureKey, FeatureTypeMapping, FeatureWriter,
    ForeignKeySide, GeometryEncoder, GeometryEncodingError, GraphBuilder, IdGenerationError,
    IdMode, InsertReport, KeySource, MappingField, PrimaryKeyGenerator, PropertyKind,
    PropertyMapping, PropertyValue, RowGraph, RowIndex, RowOutcome, RowReport, SchemaMapping,
    SimpleContent, SinkError, SortOutcome, SpatialValue, SqlType, StagedInsert, StatementSink,
    TableRelation, Value, WriteError, WriterConfig, compact, find_cycle, order,
};

#[cfg(feature = "store-sqlite")]
pub use tessera_core::{JsonGeometryEncoder, SqliteKeyGenerator, SqliteSink, SqliteSinkError};
