//! Links between owner rows and sub-feature rows.

use log::{debug, warn};

use super::{Anchor, GraphBuilder, Staged, empty_relation};
use crate::error::WriteError;
use crate::feature::{FeatureGraph, FeatureKey};
use crate::mapping::{FeatureTypeMapping, MappingField, TableRelation};
use crate::rows::{RowIndex, RowKind};
use crate::store::{GeometryEncoder, PrimaryKeyGenerator};
use crate::value::{SqlType, Value};

/// The property being staged and the row that owns it.
#[derive(Debug, Clone, Copy)]
pub(super) struct PropertyLink<'a> {
    pub(super) mapping: &'a FeatureTypeMapping,
    pub(super) owner: RowIndex,
    pub(super) property: &'a str,
}

impl PropertyLink<'_> {
    fn empty_relation(&self) -> WriteError {
        empty_relation(self.mapping, self.property)
    }
}

impl<'m, K, E> GraphBuilder<'m, K, E>
where
    K: PrimaryKeyGenerator,
    E: GeometryEncoder,
{
    /// Stage a sub-feature and connect it to its owner.
    pub(super) fn stage_feature_property(
        &mut self,
        features: &FeatureGraph,
        link: PropertyLink<'_>,
        target_type: &str,
        relations: &[TableRelation],
        key: FeatureKey,
    ) -> Result<(), WriteError> {
        let PropertyLink {
            mapping, property, ..
        } = link;
        let sub_feature = features
            .get(key)
            .ok_or(WriteError::UnknownFeature { key: key.index() })?;
        let substitutions = self.cache.concrete_substitutions(target_type);
        if !substitutions
            .iter()
            .any(|candidate| candidate.name == sub_feature.type_name)
        {
            return Err(WriteError::schema_mismatch(
                &mapping.name,
                format!(
                    "'{}' cannot substitute for '{target_type}' in property '{property}'",
                    sub_feature.type_name
                ),
            ));
        }
        let type_name = (substitutions.len() > 1).then(|| sub_feature.type_name.clone());

        match relations {
            [] => {
                return Err(WriteError::schema_mismatch(
                    &mapping.name,
                    format!("feature property '{property}' declares no table relation"),
                ));
            }
            [_] | [_, _] => {}
            _ => {
                return Err(WriteError::UnsupportedRelationDepth {
                    property: property.to_owned(),
                    hops: relations.len(),
                });
            }
        }

        if relations.iter().any(|relation| relation.pairs.is_empty()) {
            return Err(link.empty_relation());
        }

        let sub = self.stage_feature(features, key)?;
        match relations {
            [relation] if relation.is_from_fk() => {
                self.link_owner_to_sub(link, relation, &sub, type_name)
            }
            [relation] => self.link_sub_to_owner(link, relation, &sub),
            [to_join, from_join] => {
                self.link_through_join_table(link, to_join, from_join, &sub, type_name)
            }
            _ => Ok(()),
        }
    }

    /// Record an external reference in the owner row.
    pub(super) fn stage_external(
        &mut self,
        link: PropertyLink<'_>,
        relations: &[TableRelation],
        url: &str,
    ) -> Result<(), WriteError> {
        let from = relations
            .first()
            .and_then(TableRelation::first_from)
            .ok_or_else(|| link.empty_relation())?;
        let column = self.config.external_column_for(&from.column);
        self.graph
            .set_column(link.owner, &column, SqlType::Varchar, Value::from(url))?;
        Ok(())
    }

    /// The owner row holds the foreign key to the sub-feature.
    fn link_owner_to_sub(
        &mut self,
        link: PropertyLink<'_>,
        relation: &TableRelation,
        sub: &Staged,
        type_name: Option<String>,
    ) -> Result<(), WriteError> {
        for (from, to) in &relation.pairs {
            let anchor = self.anchor(sub, to)?;
            self.link_anchor(link.owner, from, anchor)?;
        }
        if let Some(type_name) = type_name {
            let from = relation
                .first_from()
                .ok_or_else(|| link.empty_relation())?;
            let column = self.config.type_column_for(&from.column);
            self.graph
                .set_column(link.owner, &column, SqlType::Varchar, Value::Text(type_name))?;
        }
        Ok(())
    }

    /// The sub-feature row holds the foreign key to the owner.
    fn link_sub_to_owner(
        &mut self,
        link: PropertyLink<'_>,
        relation: &TableRelation,
        sub: &Staged,
    ) -> Result<(), WriteError> {
        let Staged::Row(sub_row) = sub else {
            warn!(
                "property '{}' points at a stored feature that would need an update to \
                 reference {}; link skipped",
                link.property,
                self.graph.row(link.owner).table()
            );
            return Ok(());
        };
        for (from, to) in &relation.pairs {
            let owner_field = self.owner_column(link.owner, from)?;
            self.link_checked(*sub_row, to, owner_field)?;
        }
        Ok(())
    }

    /// Owner and sub-feature are connected through a join table row.
    fn link_through_join_table(
        &mut self,
        link: PropertyLink<'_>,
        to_join: &TableRelation,
        from_join: &TableRelation,
        sub: &Staged,
        type_name: Option<String>,
    ) -> Result<(), WriteError> {
        let PropertyLink {
            owner, property, ..
        } = link;
        let (Some((owner_key, join_left)), Some((join_right, sub_key))) =
            (to_join.pairs.first(), from_join.pairs.first())
        else {
            return Err(link.empty_relation());
        };
        let join = self.graph.add_row(&join_left.table, RowKind::Plain);
        debug!("staging join row {join} in {} for '{property}'", join_left.table);
        if let Some(type_name) = type_name {
            let column = self.config.type_column.clone();
            self.graph
                .set_column(join, &column, SqlType::Varchar, Value::Text(type_name))?;
        }

        if to_join.is_from_fk() {
            let pk = self.keys.next_pk(&join_left.table, &join_left.column)?;
            let pk_field =
                self.graph
                    .set_primary_key(join, &join_left.column, join_left.sql_type, pk)?;
            self.link_checked(owner, owner_key, pk_field)?;
        } else {
            let owner_field = self.owner_column(owner, owner_key)?;
            self.link_checked(join, join_left, owner_field)?;
        }

        if from_join.is_from_fk() {
            let anchor = self.anchor(sub, sub_key)?;
            self.link_anchor(join, join_right, anchor)?;
        } else {
            let pk = self.keys.next_pk(&join_right.table, &join_right.column)?;
            let pk_field =
                self.graph
                    .set_primary_key(join, &join_right.column, join_right.sql_type, pk)?;
            match sub {
                Staged::Row(sub_row) => {
                    self.link_checked(*sub_row, sub_key, pk_field)?;
                }
                Staged::Existing { .. } => warn!(
                    "property '{property}' points at a stored feature that would need an update \
                     to reference join table {}; link skipped",
                    join_right.table
                ),
            }
        }
        Ok(())
    }

    /// What a foreign key pointing at `column` of a staged feature links to.
    fn anchor(&self, staged: &Staged, column: &MappingField) -> Result<Anchor, WriteError> {
        match staged {
            Staged::Row(row) => self
                .graph
                .column(*row, &column.column)
                .map(Anchor::Field)
                .ok_or_else(|| {
                    WriteError::missing_key(self.graph.row(*row).table(), &column.column)
                }),
            Staged::Existing {
                table,
                pk_column,
                pk,
                sql_type,
            } if *pk_column == column.column => Ok(Anchor::Literal {
                table: table.clone(),
                column: pk_column.clone(),
                value: pk.clone(),
                sql_type: *sql_type,
            }),
            Staged::Existing { table, .. } => Err(WriteError::missing_key(table, &column.column)),
        }
    }
}
