//! Input feature graph handed to the writer.
//!
//! Features live in an arena and point at each other through
//! [`FeatureKey`]s, so shared sub-features and cyclic structures need no
//! shared ownership.

use std::fmt;

use geo::Geometry;

use crate::value::Value;

/// Index of a feature inside a [`FeatureGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureKey(usize);

impl FeatureKey {
    /// Arena position of the feature.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Geometry together with the reference system it is expressed in.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialValue {
    /// Geometry in domain form.
    pub geometry: Geometry<f64>,
    /// Reference system identifier such as `EPSG:4326`; `None` means the
    /// mapped column's system is assumed.
    pub crs: Option<String>,
}

impl SpatialValue {
    /// Wrap a geometry that carries no reference system.
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            crs: None,
        }
    }

    /// Attach a reference system identifier.
    #[must_use]
    pub fn in_crs(mut self, crs: impl Into<String>) -> Self {
        self.crs = Some(crs.into());
        self
    }
}

/// Value of a single feature property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Scalar value for a simple property.
    Simple(Value),
    /// Geometry value for a geometry property.
    Geometry(SpatialValue),
    /// Inline sub-feature.
    Feature(FeatureKey),
    /// Reference to a resource outside the graph, usually a URL.
    External(String),
}

/// Named property of a feature.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Property name as declared by the feature type.
    pub name: String,
    /// Property value.
    pub value: PropertyValue,
}

/// A feature instance awaiting insertion.
///
/// # Examples
/// ```
/// use tessera_core::{Feature, Value};
///
/// let town = Feature::new("Town", "TOWN_1").with_simple("name", Value::from("Bonn"));
/// assert_eq!(town.properties.len(), 1);
/// assert!(!town.existing);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Name of the feature type.
    pub type_name: String,
    /// Feature identifier, including any type prefix.
    pub id: String,
    /// Existence marker: the feature is already stored and must only be linked.
    pub existing: bool,
    /// Properties in document order.
    pub properties: Vec<Property>,
}

impl Feature {
    /// Create a feature without properties.
    pub fn new(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: id.into(),
            existing: false,
            properties: Vec::new(),
        }
    }

    /// Create a feature that is already persisted.
    pub fn existing(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            existing: true,
            ..Self::new(type_name, id)
        }
    }

    /// Append a property.
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.push(Property {
            name: name.into(),
            value,
        });
        self
    }

    /// Append a simple property.
    #[must_use]
    pub fn with_simple(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with_property(name, PropertyValue::Simple(value.into()))
    }

    /// Append a geometry property.
    #[must_use]
    pub fn with_geometry(self, name: impl Into<String>, value: SpatialValue) -> Self {
        self.with_property(name, PropertyValue::Geometry(value))
    }

    /// Append a feature-valued property.
    #[must_use]
    pub fn with_feature(self, name: impl Into<String>, key: FeatureKey) -> Self {
        self.with_property(name, PropertyValue::Feature(key))
    }
}

/// Arena of features plus the ordered list of root features to insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureGraph {
    features: Vec<Feature>,
    roots: Vec<FeatureKey>,
}

impl FeatureGraph {
    /// Create an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a feature that is only reachable through other features.
    pub fn insert(&mut self, feature: Feature) -> FeatureKey {
        let key = FeatureKey(self.features.len());
        self.features.push(feature);
        key
    }

    /// Add a feature and mark it as a root of the insert.
    pub fn insert_root(&mut self, feature: Feature) -> FeatureKey {
        let key = self.insert(feature);
        self.roots.push(key);
        key
    }

    /// Append a property to a feature that is already in the graph.
    ///
    /// This is how cycles are expressed: insert both features, then link them.
    /// Returns `false` when the key does not belong to this graph.
    pub fn push_property(
        &mut self,
        key: FeatureKey,
        name: impl Into<String>,
        value: PropertyValue,
    ) -> bool {
        let Some(feature) = self.features.get_mut(key.0) else {
            return false;
        };
        feature.properties.push(Property {
            name: name.into(),
            value,
        });
        true
    }

    /// Look up a feature.
    #[must_use]
    pub fn get(&self, key: FeatureKey) -> Option<&Feature> {
        self.features.get(key.0)
    }

    /// Root features in insertion order.
    #[must_use]
    pub fn roots(&self) -> &[FeatureKey] {
        &self.roots
    }

    /// Number of features in the arena.
    #[must_use]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// Whether the arena holds no features.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}
