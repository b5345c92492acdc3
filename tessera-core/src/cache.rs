//! Per-pass lookup cache over a [`SchemaMapping`].

use std::collections::{HashMap, HashSet};

use crate::error::WriteError;
use crate::mapping::{FeatureTypeMapping, SchemaMapping};

/// Memoises feature type lookups for the duration of one staging pass.
///
/// Resolving the concrete substitutions of a declared property type walks
/// the `parent` links of every mapped type, so the result is cached per
/// declared type. The cache is dropped together with the builder that owns
/// it.
#[derive(Debug)]
pub struct MappingCache<'m> {
    mapping: &'m SchemaMapping,
    substitutions: HashMap<String, Vec<&'m FeatureTypeMapping>>,
}

impl<'m> MappingCache<'m> {
    /// Wrap a schema mapping.
    #[must_use]
    pub fn new(mapping: &'m SchemaMapping) -> Self {
        Self {
            mapping,
            substitutions: HashMap::new(),
        }
    }

    /// Look up the mapping of a feature type.
    pub fn feature_type(&self, name: &str) -> Result<&'m FeatureTypeMapping, WriteError> {
        self.mapping
            .feature_type(name)
            .ok_or_else(|| WriteError::schema_mismatch(name, "no mapping is defined for the type"))
    }

    /// Concrete types that may appear where `name` is declared, sorted by name.
    ///
    /// A concrete type substitutes for itself; abstract types never appear.
    pub fn concrete_substitutions(&mut self, name: &str) -> Vec<&'m FeatureTypeMapping> {
        if let Some(cached) = self.substitutions.get(name) {
            return cached.clone();
        }
        let mapping = self.mapping;
        let mut found: Vec<&'m FeatureTypeMapping> = mapping
            .feature_types()
            .filter(|candidate| !candidate.is_abstract && descends_from(mapping, candidate, name))
            .collect();
        found.sort_by(|left, right| left.name.cmp(&right.name));
        self.substitutions.insert(name.to_owned(), found.clone());
        found
    }
}

fn descends_from(mapping: &SchemaMapping, candidate: &FeatureTypeMapping, ancestor: &str) -> bool {
    let mut seen = HashSet::new();
    let mut current = Some(candidate);
    while let Some(feature_type) = current {
        if feature_type.name == ancestor {
            return true;
        }
        if !seen.insert(feature_type.name.as_str()) {
            // Substitution chains that loop never reach the ancestor.
            return false;
        }
        current = feature_type
            .parent
            .as_deref()
            .and_then(|parent| mapping.feature_type(parent));
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlType;
    use rstest::{fixture, rstest};

    #[fixture]
    fn mapping() -> SchemaMapping {
        SchemaMapping::new()
            .with_feature_type(
                FeatureTypeMapping::new("Building", "buildings", "id", SqlType::Integer)
                    .abstract_type(),
            )
            .with_feature_type(
                FeatureTypeMapping::new("House", "houses", "id", SqlType::Integer)
                    .substitutes("Building"),
            )
            .with_feature_type(
                FeatureTypeMapping::new("Church", "churches", "id", SqlType::Integer)
                    .substitutes("Building"),
            )
            .with_feature_type(
                FeatureTypeMapping::new("Chapel", "chapels", "id", SqlType::Integer)
                    .substitutes("Church"),
            )
    }

    fn names(types: &[&FeatureTypeMapping]) -> Vec<String> {
        types.iter().map(|feature_type| feature_type.name.clone()).collect()
    }

    #[rstest]
    fn abstract_type_resolves_to_transitive_concrete_types(mapping: SchemaMapping) {
        let mut cache = MappingCache::new(&mapping);
        let found = cache.concrete_substitutions("Building");
        assert_eq!(names(&found), vec!["Chapel", "Church", "House"]);
    }

    #[rstest]
    fn concrete_type_substitutes_for_itself(mapping: SchemaMapping) {
        let mut cache = MappingCache::new(&mapping);
        assert_eq!(names(&cache.concrete_substitutions("House")), vec!["House"]);
        assert_eq!(
            names(&cache.concrete_substitutions("Church")),
            vec!["Chapel", "Church"]
        );
    }

    #[rstest]
    fn unknown_type_is_a_schema_mismatch(mapping: SchemaMapping) {
        let cache = MappingCache::new(&mapping);
        let error = cache.feature_type("Bridge").expect_err("unmapped type");
        assert!(matches!(error, WriteError::SchemaMismatch { feature_type, .. } if feature_type == "Bridge"));
    }

    #[rstest]
    fn looping_parent_chain_terminates() {
        let mapping = SchemaMapping::new()
            .with_feature_type(
                FeatureTypeMapping::new("A", "a", "id", SqlType::Integer).substitutes("B"),
            )
            .with_feature_type(
                FeatureTypeMapping::new("B", "b", "id", SqlType::Integer).substitutes("A"),
            );
        let mut cache = MappingCache::new(&mapping);
        assert!(cache.concrete_substitutions("C").is_empty());
    }
}
