//! Write path of a feature-based geospatial store.
//!
//! A [`FeatureGraph`] of features, possibly nested, shared or cyclic, is
//! turned into SQL inserts in four steps:
//!
//! 1. [`GraphBuilder`] stages features and their properties as rows of a
//!    [`RowGraph`], following a [`SchemaMapping`]. Foreign key columns hold
//!    references to the fields they point at rather than copied values.
//! 2. [`compact`] merges equivalent property rows.
//! 3. [`order`] sorts the rows so referenced rows come first, falling back
//!    to staging order when the rows reference each other in a cycle.
//! 4. [`execute`] binds the resolved values and hands each statement to a
//!    [`StatementSink`].
//!
//! [`FeatureWriter`] runs the whole pipeline. The `store-sqlite` feature adds
//! collaborators backed by `rusqlite`.
//!
//! # Examples
//!
//! ```
//! use tessera_core::test_support::{road_network, PassthroughEncoder, SequenceKeys};
//! use tessera_core::{Feature, FeatureGraph, FeatureWriter};
//!
//! # fn main() -> Result<(), tessera_core::WriteError> {
//! let mapping = road_network();
//! let mut features = FeatureGraph::new();
//! features.insert_root(Feature::new("Road", "ROAD_1").with_simple("lanes", 2_i64));
//!
//! let staged = FeatureWriter::new(&mapping).stage(
//!     &features,
//!     SequenceKeys::default(),
//!     PassthroughEncoder,
//! )?;
//! assert_eq!(staged.rows.len(), 1);
//! assert!(!staged.outcome.is_fallback());
//! # Ok(())
//! # }
//! ```

mod builder;
mod cache;
mod config;
mod dedup;
mod error;
mod executor;
mod feature;
mod feature_id;
mod mapping;
mod rows;
mod sort;
mod store;
mod value;
mod writer;

pub mod test_support;

pub use builder::GraphBuilder;
pub use cache::MappingCache;
pub use config::{IdMode, WriterConfig};
pub use dedup::{compact, equivalent};
pub use error::{GeometryEncodingError, IdGenerationError, SinkError, WriteError};
pub use executor::{InsertStatement, RowOutcome, RowReport, execute};
pub use feature::{Feature, FeatureGraph, FeatureKey, Property, PropertyValue, SpatialValue};
pub use feature_id::FeatureId;
pub use mapping::{
    FeatureTypeMapping, ForeignKeySide, KeySource, MappingField, PropertyKind, PropertyMapping,
    SchemaMapping, SimpleContent, TableRelation,
};
pub use rows::{Adjacency, Field, FieldContent, FieldIndex, Row, RowGraph, RowIndex, RowKind};
pub use sort::{SortOutcome, find_cycle, order};
pub use store::{Argument, GeometryEncoder, PrimaryKeyGenerator, StatementSink};
pub use value::{SqlType, Value};
pub use writer::{FeatureWriter, InsertReport, StagedInsert};

#[cfg(feature = "store-sqlite")]
pub use store::{JsonGeometryEncoder, SqliteKeyGenerator, SqliteSink, SqliteSinkError};
