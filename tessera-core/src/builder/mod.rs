//! Staging of feature graphs into rows.
//!
//! [`GraphBuilder`] walks each root feature depth first and turns features
//! and their properties into rows of a [`RowGraph`], following the schema
//! mapping. A feature row is created, and its primary key set, before any of
//! its properties are walked, so a sub-feature that points back at a feature
//! still being staged can link to that feature's key.
//!
//! Every feature is staged at most once per builder. Staging state is keyed
//! by [`FeatureId`], which makes shared sub-features collapse into a single
//! row and makes cyclic feature graphs terminate.

use std::collections::HashMap;

use log::debug;

use crate::cache::MappingCache;
use crate::config::{IdMode, WriterConfig};
use crate::error::WriteError;
use crate::feature::{FeatureGraph, FeatureKey, Property, PropertyValue, SpatialValue};
use crate::feature_id::FeatureId;
use crate::mapping::{
    FeatureTypeMapping, KeySource, MappingField, PropertyKind, SchemaMapping, SimpleContent,
    TableRelation,
};
use crate::rows::{FieldIndex, RowGraph, RowIndex, RowKind};
use crate::store::{GeometryEncoder, PrimaryKeyGenerator};
use crate::value::{SqlType, Value};

mod links;

use links::PropertyLink;

/// Where a staged feature's key can be read from.
#[derive(Debug, Clone, PartialEq)]
enum Staged {
    /// The feature has a row in the graph.
    Row(RowIndex),
    /// The feature is already stored; only its key is known.
    Existing {
        table: String,
        pk_column: String,
        pk: Value,
        sql_type: SqlType,
    },
}

/// Per-feature staging progress.
#[derive(Debug, Clone, PartialEq)]
enum StagingState {
    /// Properties of the feature are still being walked.
    Resolving(Staged),
    /// The feature and all of its properties are staged.
    Resolved(Staged),
}

impl StagingState {
    fn staged(&self) -> &Staged {
        match self {
            Self::Resolving(staged) | Self::Resolved(staged) => staged,
        }
    }
}

/// Value a column is linked to: a staged field or a literal key.
#[derive(Debug, Clone, PartialEq)]
enum Anchor {
    Field(FieldIndex),
    Literal {
        table: String,
        column: String,
        value: Value,
        sql_type: SqlType,
    },
}

/// Builds a [`RowGraph`] from feature graphs.
///
/// Several feature graphs may be staged into one builder; features shared
/// between them are staged once.
pub struct GraphBuilder<'m, K, E> {
    cache: MappingCache<'m>,
    config: &'m WriterConfig,
    keys: K,
    encoder: E,
    graph: RowGraph,
    states: HashMap<FeatureId, StagingState>,
}

impl<'m, K, E> GraphBuilder<'m, K, E>
where
    K: PrimaryKeyGenerator,
    E: GeometryEncoder,
{
    /// Create a builder over `mapping`.
    pub fn new(mapping: &'m SchemaMapping, config: &'m WriterConfig, keys: K, encoder: E) -> Self {
        Self {
            cache: MappingCache::new(mapping),
            config,
            keys,
            encoder,
            graph: RowGraph::new(),
            states: HashMap::new(),
        }
    }

    /// Stage every root of `features` and return their identities in order.
    ///
    /// # Errors
    /// Fails on the first feature or property that cannot be staged. The
    /// rows staged so far stay in the builder but should be discarded.
    pub fn stage(&mut self, features: &FeatureGraph) -> Result<Vec<FeatureId>, WriteError> {
        let mut staged = Vec::with_capacity(features.roots().len());
        for &root in features.roots() {
            let feature = features
                .get(root)
                .ok_or(WriteError::UnknownFeature { key: root.index() })?;
            if feature.existing {
                return Err(WriteError::AlreadyPersisted {
                    feature_type: feature.type_name.clone(),
                    id: feature.id.clone(),
                });
            }
            self.stage_feature(features, root)?;
            staged.push(FeatureId::new(&feature.type_name, &feature.id));
        }
        Ok(staged)
    }

    /// Rows staged so far.
    #[must_use]
    pub const fn rows(&self) -> &RowGraph {
        &self.graph
    }

    /// Finish staging and hand over the rows.
    #[must_use]
    pub fn finish(self) -> RowGraph {
        self.graph
    }

    fn stage_feature(
        &mut self,
        features: &FeatureGraph,
        key: FeatureKey,
    ) -> Result<Staged, WriteError> {
        let feature = features
            .get(key)
            .ok_or(WriteError::UnknownFeature { key: key.index() })?;
        let fid = FeatureId::new(&feature.type_name, &feature.id);
        if let Some(state) = self.states.get(&fid) {
            if matches!(state, StagingState::Resolving(_)) {
                debug!("{fid} is referenced while being staged; linking to its row");
            }
            return Ok(state.staged().clone());
        }

        let mapping = self.cache.feature_type(&feature.type_name)?;
        if mapping.is_abstract {
            return Err(WriteError::schema_mismatch(
                &mapping.name,
                "abstract feature types cannot be instantiated",
            ));
        }
        let id_column = id_column(mapping)?;

        if feature.existing {
            let staged = Staged::Existing {
                table: mapping.table.clone(),
                pk_column: id_column.column.clone(),
                pk: fid.pk_value(mapping)?,
                sql_type: id_column.sql_type,
            };
            debug!("{fid} is already stored; linking by key only");
            self.states.insert(fid, StagingState::Resolved(staged.clone()));
            return Ok(staged);
        }
        if !mapping.insertable {
            return Err(WriteError::NotInsertable {
                feature_type: mapping.name.clone(),
            });
        }

        let pk = match self.config.id_mode {
            IdMode::UseExisting => fid.pk_value(mapping)?,
            IdMode::GenerateNew => self.keys.next_pk(&mapping.table, &id_column.column)?,
        };
        let row = self.graph.add_row(&mapping.table, RowKind::Feature(fid.clone()));
        self.graph
            .set_primary_key(row, &id_column.column, id_column.sql_type, pk)?;
        debug!("staging {fid} as {row} in {}", mapping.table);
        self.states
            .insert(fid.clone(), StagingState::Resolving(Staged::Row(row)));

        for property in &feature.properties {
            self.stage_property(features, mapping, row, property)?;
        }

        self.states
            .insert(fid, StagingState::Resolved(Staged::Row(row)));
        Ok(Staged::Row(row))
    }

    fn stage_property(
        &mut self,
        features: &FeatureGraph,
        mapping: &'m FeatureTypeMapping,
        owner: RowIndex,
        property: &Property,
    ) -> Result<(), WriteError> {
        let property_mapping = mapping.property(&property.name).ok_or_else(|| {
            WriteError::schema_mismatch(
                &mapping.name,
                format!("unknown property '{}'", property.name),
            )
        })?;
        let link = PropertyLink {
            mapping,
            owner,
            property: &property.name,
        };
        match (&property_mapping.kind, &property.value) {
            (PropertyKind::Simple { content, relations }, PropertyValue::Simple(value)) => {
                self.stage_simple(link, content, relations, value)
            }
            (
                PropertyKind::Geometry {
                    column,
                    srs,
                    srs_code,
                    relations,
                },
                PropertyValue::Geometry(spatial),
            ) => {
                let (value, target_srs) =
                    self.encode_geometry(&property.name, srs, *srs_code, spatial)?;
                let row = self.property_row(link, relations)?;
                self.graph
                    .set_geometry_column(row, &column.column, value, target_srs)?;
                Ok(())
            }
            (
                PropertyKind::Feature {
                    target_type,
                    relations,
                },
                PropertyValue::Feature(key),
            ) => self.stage_feature_property(features, link, target_type, relations, *key),
            (PropertyKind::Feature { relations, .. }, PropertyValue::External(url)) => {
                self.stage_external(link, relations, url)
            }
            _ => Err(WriteError::schema_mismatch(
                &mapping.name,
                format!(
                    "value of property '{}' does not fit its mapping",
                    property.name
                ),
            )),
        }
    }

    fn stage_simple(
        &mut self,
        link: PropertyLink<'_>,
        content: &SimpleContent,
        relations: &[TableRelation],
        value: &Value,
    ) -> Result<(), WriteError> {
        let SimpleContent::Column(column) = content else {
            debug!(
                "property '{}' of {} is not backed by a column",
                link.property, link.mapping.name
            );
            return Ok(());
        };
        let row = self.property_row(link, relations)?;
        self.graph
            .set_column(row, &column.column, column.sql_type, value.clone())?;
        Ok(())
    }

    /// Encode a geometry and work out the reference system to transform to.
    fn encode_geometry(
        &self,
        property: &str,
        srs: &str,
        srs_code: Option<i32>,
        spatial: &SpatialValue,
    ) -> Result<(Value, Option<i32>), WriteError> {
        let unsupported = |geometry_srs: &str| WriteError::UnsupportedSrs {
            property: property.to_owned(),
            geometry_srs: geometry_srs.to_owned(),
            mapped_srs: srs.to_owned(),
        };
        let (native_code, target_srs) = match spatial.crs.as_deref() {
            Some(crs) if crs != srs => {
                let native = self.encoder.native_srs_code(crs);
                if native.is_some() && native == srs_code {
                    (srs_code, None)
                } else {
                    let target = srs_code.ok_or_else(|| unsupported(crs))?;
                    let native = native.ok_or_else(|| unsupported(crs))?;
                    (Some(native), Some(target))
                }
            }
            _ => (srs_code, None),
        };
        let value = self
            .encoder
            .to_native(&spatial.geometry, native_code)
            .map_err(|source| WriteError::GeometryEncoding {
                property: property.to_owned(),
                source,
            })?;
        Ok((value, target_srs))
    }

    /// Row holding a simple or geometry property.
    fn property_row(
        &mut self,
        link: PropertyLink<'_>,
        relations: &[TableRelation],
    ) -> Result<RowIndex, WriteError> {
        match relations {
            [] => Ok(link.owner),
            [relation] if relation.is_from_fk() => self.keyed_property_row(link, relation),
            [relation] => self.dependent_property_row(link, relation),
            _ => Err(WriteError::UnsupportedRelationDepth {
                property: link.property.to_owned(),
                hops: relations.len(),
            }),
        }
    }

    /// Property row referenced from the owner: find or create it by key.
    fn keyed_property_row(
        &mut self,
        link: PropertyLink<'_>,
        relation: &TableRelation,
    ) -> Result<RowIndex, WriteError> {
        let owner = link.owner;
        let Some((first_from, first_to)) = relation.pairs.first() else {
            return Err(empty_relation(link.mapping, link.property));
        };
        let pk = self.related_key(owner, relation, first_to)?;
        let row = match self.graph.find_by_primary_key(&first_to.table, &pk) {
            Some(row) => row,
            None => self.graph.add_row(&first_to.table, RowKind::Plain),
        };
        let pk_field = self
            .graph
            .set_primary_key(row, &first_to.column, first_to.sql_type, pk)?;
        self.link_checked(owner, first_from, pk_field)?;
        for (from, to) in relation.pairs.iter().skip(1) {
            let key = self.related_key(owner, relation, to)?;
            let field = self.graph.set_column(row, &to.column, to.sql_type, key)?;
            self.link_checked(owner, from, field)?;
        }
        Ok(row)
    }

    /// Property row referencing the owner: always a new row.
    fn dependent_property_row(
        &mut self,
        link: PropertyLink<'_>,
        relation: &TableRelation,
    ) -> Result<RowIndex, WriteError> {
        let table = relation
            .to_table()
            .ok_or_else(|| empty_relation(link.mapping, link.property))?;
        let row = self.graph.add_row(table, RowKind::Plain);
        for (from, to) in &relation.pairs {
            let owner_field = self.owner_column(link.owner, from)?;
            self.link_checked(row, to, owner_field)?;
        }
        Ok(row)
    }

    /// Key for a row on the `to` side of `relation`.
    fn related_key(
        &mut self,
        owner: RowIndex,
        relation: &TableRelation,
        to: &MappingField,
    ) -> Result<Value, WriteError> {
        match &relation.key_source {
            KeySource::Generated => Ok(self.keys.next_pk(&to.table, &to.column)?),
            KeySource::Parent(column) => self
                .graph
                .column(owner, column)
                .map(|field| self.graph.value(field).clone())
                .ok_or_else(|| WriteError::missing_key(self.graph.row(owner).table(), column)),
        }
    }

    /// Field of the owner row named by the `from` side of a relation.
    fn owner_column(
        &self,
        owner: RowIndex,
        from: &MappingField,
    ) -> Result<FieldIndex, WriteError> {
        self.graph
            .column(owner, &from.column)
            .ok_or_else(|| WriteError::missing_key(self.graph.row(owner).table(), &from.column))
    }

    /// Link `fk` on `row` to `target` after checking the column types agree.
    fn link_checked(
        &mut self,
        row: RowIndex,
        fk: &MappingField,
        target: FieldIndex,
    ) -> Result<FieldIndex, WriteError> {
        self.link_anchor(row, fk, Anchor::Field(target))
    }

    fn link_anchor(
        &mut self,
        row: RowIndex,
        fk: &MappingField,
        anchor: Anchor,
    ) -> Result<FieldIndex, WriteError> {
        let (pk_table, pk_column, pk_type) = match &anchor {
            Anchor::Field(field) => {
                let data = self.graph.field(*field);
                (
                    self.graph.row(data.row()).table().to_owned(),
                    data.column().to_owned(),
                    self.graph.sql_type(*field),
                )
            }
            Anchor::Literal {
                table,
                column,
                sql_type,
                ..
            } => (table.clone(), column.clone(), *sql_type),
        };
        if pk_type != fk.sql_type {
            return Err(WriteError::TypeMismatch {
                fk_table: self.graph.row(row).table().to_owned(),
                fk_column: fk.column.clone(),
                fk_type: fk.sql_type,
                pk_table,
                pk_column,
                pk_type,
            });
        }
        match anchor {
            Anchor::Field(field) => self.graph.link_column(row, &fk.column, fk.sql_type, field),
            Anchor::Literal { value, .. } => {
                self.graph.set_column(row, &fk.column, fk.sql_type, value)
            }
        }
    }
}

/// The single identifier column of a feature type.
fn id_column(mapping: &FeatureTypeMapping) -> Result<&MappingField, WriteError> {
    match mapping.id_columns.as_slice() {
        [column] => Ok(column),
        columns => Err(WriteError::schema_mismatch(
            &mapping.name,
            format!(
                "compound feature ids are not supported ({} id columns)",
                columns.len()
            ),
        )),
    }
}

fn empty_relation(mapping: &FeatureTypeMapping, property: &str) -> WriteError {
    WriteError::schema_mismatch(
        &mapping.name,
        format!("relation of property '{property}' joins no columns"),
    )
}
