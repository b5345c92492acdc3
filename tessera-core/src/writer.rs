//! End-to-end insert pipeline.
//!
//! [`FeatureWriter`] stages a feature graph into rows, merges duplicate
//! property rows, orders the rows by their foreign keys and hands them to a
//! [`StatementSink`].

use log::debug;

use crate::builder::GraphBuilder;
use crate::config::WriterConfig;
use crate::dedup::compact;
use crate::error::WriteError;
use crate::executor::{RowOutcome, RowReport, execute};
use crate::feature::FeatureGraph;
use crate::feature_id::FeatureId;
use crate::mapping::SchemaMapping;
use crate::rows::{RowGraph, RowIndex};
use crate::sort::{SortOutcome, order};
use crate::store::{GeometryEncoder, PrimaryKeyGenerator, StatementSink};

/// Rows ready to be executed.
#[derive(Debug, Clone)]
pub struct StagedInsert {
    /// Identities of the root features, in input order.
    pub roots: Vec<FeatureId>,
    /// Staged and compacted rows.
    pub rows: RowGraph,
    /// Insert order, with a cycle diagnostic when the order is a fallback.
    pub outcome: SortOutcome,
    /// Number of duplicate property rows merged away.
    pub merged: usize,
}

/// Result of a completed insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertReport {
    /// Identities of the inserted root features.
    pub roots: Vec<FeatureId>,
    /// Per-row outcomes in execution order.
    pub rows: Vec<RowReport>,
    /// Rows forming a reference cycle, when one forced the fallback order.
    pub cycle: Option<Vec<RowIndex>>,
}

impl InsertReport {
    /// Number of rows actually inserted.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.rows
            .iter()
            .filter(|report| matches!(report.outcome, RowOutcome::Inserted { .. }))
            .count()
    }

    /// Number of feature rows skipped because they were already stored.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.rows.len() - self.inserted()
    }
}

/// Writes feature graphs through a schema mapping.
///
/// # Examples
/// ```
/// use tessera_core::test_support::{road_network, MemorySink, PassthroughEncoder, SequenceKeys};
/// use tessera_core::{Feature, FeatureGraph, FeatureWriter};
///
/// let mapping = road_network();
/// let mut features = FeatureGraph::new();
/// let town = features.insert(Feature::new("Town", "TOWN_2").with_simple("name", "Bonn"));
/// features.insert_root(Feature::new("Road", "ROAD_1").with_feature("town", town));
///
/// let mut sink = MemorySink::default();
/// let report = FeatureWriter::new(&mapping)
///     .insert(&features, SequenceKeys::default(), PassthroughEncoder, &mut sink)
///     .expect("insert");
///
/// assert_eq!(report.inserted(), 2);
/// assert_eq!(sink.tables(), vec!["towns", "roads"]);
/// ```
#[derive(Debug, Clone)]
pub struct FeatureWriter<'m> {
    mapping: &'m SchemaMapping,
    config: WriterConfig,
}

impl<'m> FeatureWriter<'m> {
    /// Create a writer with the default configuration.
    #[must_use]
    pub fn new(mapping: &'m SchemaMapping) -> Self {
        Self::with_config(mapping, WriterConfig::default())
    }

    /// Create a writer with an explicit configuration.
    #[must_use]
    pub const fn with_config(mapping: &'m SchemaMapping, config: WriterConfig) -> Self {
        Self { mapping, config }
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Stage, compact and order the rows for `features` without executing
    /// anything.
    ///
    /// # Errors
    /// Any [`WriteError`] raised while staging or compacting.
    pub fn stage<K, E>(
        &self,
        features: &FeatureGraph,
        keys: K,
        encoder: E,
    ) -> Result<StagedInsert, WriteError>
    where
        K: PrimaryKeyGenerator,
        E: GeometryEncoder,
    {
        let mut builder = GraphBuilder::new(self.mapping, &self.config, keys, encoder);
        let roots = builder.stage(features)?;
        let mut rows = builder.finish();
        let merged = if self.config.compact {
            compact(&mut rows)?
        } else {
            0
        };
        let outcome = order(&rows);
        debug!(
            "staged {} rows for {} root features ({merged} merged)",
            rows.len(),
            roots.len()
        );
        Ok(StagedInsert {
            roots,
            rows,
            outcome,
            merged,
        })
    }

    /// Stage `features` and insert the rows through `sink`.
    ///
    /// Execution stops at the first failing statement. Rows inserted before
    /// the failure stay in the sink; run the insert inside a transaction and
    /// roll back on error.
    ///
    /// # Errors
    /// Any [`WriteError`] raised while staging, compacting or executing.
    pub fn insert<K, E, S>(
        &self,
        features: &FeatureGraph,
        keys: K,
        encoder: E,
        mut sink: S,
    ) -> Result<InsertReport, WriteError>
    where
        K: PrimaryKeyGenerator,
        E: GeometryEncoder,
        S: StatementSink,
    {
        let staged = self.stage(features, keys, encoder)?;
        let rows = execute(
            &staged.rows,
            &staged.outcome.order,
            &mut sink,
            self.config.check_existing,
        )?;
        Ok(InsertReport {
            roots: staged.roots,
            rows,
            cycle: staged.outcome.cycle,
        })
    }
}
