//! Writer configuration.

/// How primary keys of feature rows are obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum IdMode {
    /// Derive the key from the feature identifier.
    #[default]
    UseExisting,
    /// Draw a fresh key from the primary key generator.
    ///
    /// Feature identities still key on the input identifier, so shared and
    /// cyclic references collapse exactly as in [`IdMode::UseExisting`].
    GenerateNew,
}

/// Tunables for [`FeatureWriter`](crate::FeatureWriter).
///
/// # Examples
/// ```
/// use tessera_core::{IdMode, WriterConfig};
///
/// let config = WriterConfig {
///     id_mode: IdMode::GenerateNew,
///     ..WriterConfig::default()
/// };
/// assert!(config.check_existing);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct WriterConfig {
    /// Source of feature row keys.
    pub id_mode: IdMode,
    /// Prefix of the column recording the concrete type next to a foreign key.
    pub type_column_prefix: String,
    /// Column of a join table recording the concrete type of the sub-feature.
    pub type_column: String,
    /// Suffix of the column recording an external reference.
    pub external_link_suffix: String,
    /// Skip feature rows whose key is already present in the store.
    pub check_existing: bool,
    /// Merge value-identical property rows before sorting.
    pub compact: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            id_mode: IdMode::UseExisting,
            type_column_prefix: "ft_".to_owned(),
            type_column: "featuretype".to_owned(),
            external_link_suffix: "_external".to_owned(),
            check_existing: true,
            compact: true,
        }
    }
}

impl WriterConfig {
    /// Name of the disambiguation column for foreign key `column`.
    #[must_use]
    pub fn type_column_for(&self, column: &str) -> String {
        format!("{}{column}", self.type_column_prefix)
    }

    /// Name of the external reference column for `column`.
    #[must_use]
    pub fn external_column_for(&self, column: &str) -> String {
        format!("{column}{}", self.external_link_suffix)
    }
}
