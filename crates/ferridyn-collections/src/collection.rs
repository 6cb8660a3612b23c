//! Collection definitions: table layout, access patterns, and the key-build
//! instructions derived from them.
//!
//! Definitions are built once at configuration time with
//! [`CollectionDefinition::root`] or [`CollectionDefinition::child`] and are
//! read-only afterwards.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::keys::is_subset_of_key_path;
use crate::types::{DEFAULT_PARTITION_KEY, DEFAULT_SEPARATOR, DEFAULT_SORT_KEY, KeyPath};

/// Produces a fresh unique identifier for documents inserted without `_id`.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Transforms an extracted string value before it is placed in an index key.
pub type StringNormalizer = Arc<dyn Fn(&KeyPath, &str) -> String + Send + Sync>;

/// Generate a random (v4) UUID string.
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// The generator used by collections that do not supply their own.
pub fn default_id_generator() -> IdGenerator {
    Arc::new(generate_id)
}

/// Per-key value normalization hooks.
#[derive(Clone, Default)]
pub struct NormalizerOptions {
    pub string_normalizer: Option<StringNormalizer>,
}

impl NormalizerOptions {
    pub fn with_string_normalizer(
        normalizer: impl Fn(&KeyPath, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            string_normalizer: Some(Arc::new(normalizer)),
        }
    }

    pub(crate) fn normalize(&self, path: &KeyPath, value: String) -> String {
        match &self.string_normalizer {
            Some(normalize) => normalize(path, &value),
            None => value,
        }
    }
}

impl fmt::Debug for NormalizerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizerOptions")
            .field("string_normalizer", &self.string_normalizer.is_some())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Layout
// ---------------------------------------------------------------------------

/// Attribute names of the table's primary key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKeyLayout {
    pub partition_key: String,
    pub sort_key: String,
}

impl Default for PrimaryKeyLayout {
    fn default() -> Self {
        Self {
            partition_key: DEFAULT_PARTITION_KEY.to_string(),
            sort_key: DEFAULT_SORT_KEY.to_string(),
        }
    }
}

/// A secondary index on the table and the attributes holding its keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryIndexLayout {
    pub index_name: String,
    pub partition_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

/// Physical layout of the table backing one or more collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionLayout {
    pub table_name: String,
    #[serde(default)]
    pub primary_key: PrimaryKeyLayout,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key_separator: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub find_keys: Vec<SecondaryIndexLayout>,
    /// Attribute the backend treats as the expiry time (epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_attribute: Option<String>,
}

impl CollectionLayout {
    /// A layout with default `id`/`sid` key attributes and no secondary indexes.
    pub fn new(table_name: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            primary_key: PrimaryKeyLayout::default(),
            index_key_separator: None,
            find_keys: Vec::new(),
            ttl_attribute: None,
        }
    }

    pub fn primary_key(mut self, partition_key: &str, sort_key: &str) -> Self {
        self.primary_key = PrimaryKeyLayout {
            partition_key: partition_key.to_string(),
            sort_key: sort_key.to_string(),
        };
        self
    }

    pub fn separator(mut self, separator: &str) -> Self {
        self.index_key_separator = Some(separator.to_string());
        self
    }

    /// Declare a secondary index with the given key attribute names.
    pub fn find_key(mut self, index_name: &str, partition_key: &str, sort_key: Option<&str>) -> Self {
        self.find_keys.push(SecondaryIndexLayout {
            index_name: index_name.to_string(),
            partition_key: partition_key.to_string(),
            sort_key: sort_key.map(str::to_string),
        });
        self
    }

    pub fn ttl_attribute(mut self, name: &str) -> Self {
        self.ttl_attribute = Some(name.to_string());
        self
    }

    /// The separator used between index key segments.
    pub fn key_separator(&self) -> &str {
        self.index_key_separator.as_deref().unwrap_or(DEFAULT_SEPARATOR)
    }

    fn find_index(&self, index_name: &str) -> Option<&SecondaryIndexLayout> {
        self.find_keys.iter().find(|fk| fk.index_name == index_name)
    }
}

// ---------------------------------------------------------------------------
// Access patterns and derived extract keys
// ---------------------------------------------------------------------------

/// A declaration of which document fields feed an index's keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessPattern {
    pub index_name: String,
    pub partition_keys: Vec<KeyPath>,
    #[serde(default)]
    pub sort_keys: Vec<KeyPath>,
    /// Paths that must be present and non-empty in every stored document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_paths: Option<Vec<KeyPath>>,
    #[serde(skip)]
    pub options: NormalizerOptions,
}

impl AccessPattern {
    pub fn new(index_name: &str) -> Self {
        Self {
            index_name: index_name.to_string(),
            partition_keys: Vec::new(),
            sort_keys: Vec::new(),
            required_paths: None,
            options: NormalizerOptions::default(),
        }
    }

    pub fn partition_keys<P: Into<KeyPath>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.partition_keys = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn sort_keys<P: Into<KeyPath>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.sort_keys = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn required_paths<P: Into<KeyPath>>(mut self, paths: impl IntoIterator<Item = P>) -> Self {
        self.required_paths = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn string_normalizer(
        mut self,
        normalizer: impl Fn(&KeyPath, &str) -> String + Send + Sync + 'static,
    ) -> Self {
        self.options = NormalizerOptions::with_string_normalizer(normalizer);
        self
    }
}

/// The kind of key an [`ExtractKey`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Partition,
    Sort,
    Ttl,
}

/// Instructions for computing one envelope attribute from a document.
#[derive(Debug, Clone)]
pub struct ExtractKey {
    /// Storage attribute the computed value is written to.
    pub key: String,
    pub kind: KeyKind,
    pub value_paths: Vec<KeyPath>,
    pub required_paths: Option<Vec<KeyPath>>,
    pub options: NormalizerOptions,
}

// ---------------------------------------------------------------------------
// CollectionDefinition
// ---------------------------------------------------------------------------

/// Whether a collection is addressed on its own or under a parent.
#[derive(Debug, Clone)]
pub enum CollectionVariant {
    Root {
        access_patterns: Vec<AccessPattern>,
        ttl_key_path: Option<KeyPath>,
        wrapper_extract_keys: Vec<ExtractKey>,
    },
    Child {
        foreign_key_path: KeyPath,
        parent_collection_name: String,
    },
}

/// A named collection stored in a (possibly shared) table.
#[derive(Clone)]
pub struct CollectionDefinition {
    name: String,
    layout: CollectionLayout,
    variant: CollectionVariant,
    id_generator: IdGenerator,
}

impl CollectionDefinition {
    /// Start defining an independently addressed collection.
    pub fn root(name: &str, layout: CollectionLayout) -> RootCollectionBuilder {
        RootCollectionBuilder::new(name.to_string(), layout)
    }

    /// Start defining a collection whose items live under a parent's partition.
    pub fn child(
        name: &str,
        layout: CollectionLayout,
        parent_collection_name: &str,
        foreign_key_path: impl Into<KeyPath>,
    ) -> ChildCollectionBuilder {
        ChildCollectionBuilder::new(
            name.to_string(),
            layout,
            parent_collection_name.to_string(),
            foreign_key_path.into(),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout(&self) -> &CollectionLayout {
        &self.layout
    }

    pub fn variant(&self) -> &CollectionVariant {
        &self.variant
    }

    pub fn separator(&self) -> &str {
        self.layout.key_separator()
    }

    pub fn is_child(&self) -> bool {
        matches!(self.variant, CollectionVariant::Child { .. })
    }

    /// Name of the parent collection, for child collections.
    pub fn parent_collection_name(&self) -> Option<&str> {
        match &self.variant {
            CollectionVariant::Child {
                parent_collection_name,
                ..
            } => Some(parent_collection_name),
            CollectionVariant::Root { .. } => None,
        }
    }

    /// Derived key-build instructions. Always empty for child collections.
    pub fn wrapper_extract_keys(&self) -> &[ExtractKey] {
        match &self.variant {
            CollectionVariant::Root {
                wrapper_extract_keys,
                ..
            } => wrapper_extract_keys,
            CollectionVariant::Child { .. } => &[],
        }
    }

    pub fn generate_id(&self) -> String {
        (self.id_generator)()
    }
}

impl fmt::Debug for CollectionDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionDefinition")
            .field("name", &self.name)
            .field("layout", &self.layout)
            .field("variant", &self.variant)
            .finish_non_exhaustive()
    }
}

fn validate_name(name: &str, layout: &CollectionLayout) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidDefinition {
            collection: name.to_string(),
            reason: "collection name must not be empty".to_string(),
        });
    }
    if name.contains(layout.key_separator()) {
        return Err(ConfigError::InvalidDefinition {
            collection: name.to_string(),
            reason: format!(
                "collection name must not contain the key separator '{}'",
                layout.key_separator()
            ),
        });
    }
    Ok(())
}

/// Derive the per-attribute key-build instructions for a root collection.
///
/// Each access pattern yields a partition entry and, when its index has a
/// sort key attribute and the pattern declares sort paths, a sort entry.
/// A TTL path yields a single TTL entry.
fn derive_extract_keys(
    name: &str,
    layout: &CollectionLayout,
    access_patterns: &[AccessPattern],
    ttl_key_path: Option<&KeyPath>,
) -> Result<Vec<ExtractKey>, ConfigError> {
    let mut keys = Vec::new();

    for pattern in access_patterns {
        let index =
            layout
                .find_index(&pattern.index_name)
                .ok_or_else(|| ConfigError::IndexNotFound {
                    collection: name.to_string(),
                    index: pattern.index_name.clone(),
                })?;

        if pattern.partition_keys.is_empty() {
            return Err(ConfigError::InvalidDefinition {
                collection: name.to_string(),
                reason: format!(
                    "access pattern on index '{}' declares no partition key paths",
                    pattern.index_name
                ),
            });
        }

        if let Some(required) = &pattern.required_paths {
            let declared: Vec<KeyPath> = pattern
                .partition_keys
                .iter()
                .chain(&pattern.sort_keys)
                .cloned()
                .collect();
            for path in required {
                // A required path must be a declared key path or lead to one;
                // paths below a declared key would need an object-valued key.
                let covered = declared.iter().any(|d| is_subset_of_key_path(d, path));
                if !covered {
                    return Err(ConfigError::InvalidDefinition {
                        collection: name.to_string(),
                        reason: format!(
                            "required path '{path}' is not part of the keys of index '{}'",
                            pattern.index_name
                        ),
                    });
                }
            }
        }

        keys.push(ExtractKey {
            key: index.partition_key.clone(),
            kind: KeyKind::Partition,
            value_paths: pattern.partition_keys.clone(),
            required_paths: pattern.required_paths.clone(),
            options: pattern.options.clone(),
        });

        match (&index.sort_key, pattern.sort_keys.is_empty()) {
            (Some(sort_key), false) => keys.push(ExtractKey {
                key: sort_key.clone(),
                kind: KeyKind::Sort,
                value_paths: pattern.sort_keys.clone(),
                required_paths: None,
                options: pattern.options.clone(),
            }),
            (None, false) => {
                return Err(ConfigError::InvalidDefinition {
                    collection: name.to_string(),
                    reason: format!(
                        "index '{}' has no sort key but the access pattern declares sort paths",
                        pattern.index_name
                    ),
                });
            }
            (_, true) => {}
        }
    }

    if let Some(path) = ttl_key_path {
        let attribute = layout
            .ttl_attribute
            .as_ref()
            .ok_or_else(|| ConfigError::InvalidDefinition {
                collection: name.to_string(),
                reason: "a TTL key path requires a layout with a TTL attribute".to_string(),
            })?;
        keys.push(ExtractKey {
            key: attribute.clone(),
            kind: KeyKind::Ttl,
            value_paths: vec![path.clone()],
            required_paths: None,
            options: NormalizerOptions::default(),
        });
    }

    Ok(keys)
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Builder for a root collection definition.
pub struct RootCollectionBuilder {
    name: String,
    layout: CollectionLayout,
    access_patterns: Vec<AccessPattern>,
    ttl_key_path: Option<KeyPath>,
    id_generator: Option<IdGenerator>,
}

impl RootCollectionBuilder {
    fn new(name: String, layout: CollectionLayout) -> Self {
        Self {
            name,
            layout,
            access_patterns: Vec::new(),
            ttl_key_path: None,
            id_generator: None,
        }
    }

    /// Add a secondary access pattern. Patterns keep declaration order.
    pub fn access_pattern(mut self, pattern: AccessPattern) -> Self {
        self.access_patterns.push(pattern);
        self
    }

    /// Store the value at `path` (a timestamp) in the layout's TTL attribute.
    pub fn ttl_key_path(mut self, path: impl Into<KeyPath>) -> Self {
        self.ttl_key_path = Some(path.into());
        self
    }

    pub fn id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    pub fn build(self) -> Result<CollectionDefinition, ConfigError> {
        validate_name(&self.name, &self.layout)?;
        let wrapper_extract_keys = derive_extract_keys(
            &self.name,
            &self.layout,
            &self.access_patterns,
            self.ttl_key_path.as_ref(),
        )?;

        Ok(CollectionDefinition {
            name: self.name,
            layout: self.layout,
            variant: CollectionVariant::Root {
                access_patterns: self.access_patterns,
                ttl_key_path: self.ttl_key_path,
                wrapper_extract_keys,
            },
            id_generator: self.id_generator.unwrap_or_else(default_id_generator),
        })
    }
}

/// Builder for a child collection definition.
pub struct ChildCollectionBuilder {
    name: String,
    layout: CollectionLayout,
    parent_collection_name: String,
    foreign_key_path: KeyPath,
    id_generator: Option<IdGenerator>,
}

impl ChildCollectionBuilder {
    fn new(
        name: String,
        layout: CollectionLayout,
        parent_collection_name: String,
        foreign_key_path: KeyPath,
    ) -> Self {
        Self {
            name,
            layout,
            parent_collection_name,
            foreign_key_path,
            id_generator: None,
        }
    }

    pub fn id_generator(mut self, generator: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.id_generator = Some(Arc::new(generator));
        self
    }

    pub fn build(self) -> Result<CollectionDefinition, ConfigError> {
        validate_name(&self.name, &self.layout)?;
        if self.foreign_key_path.is_empty() {
            return Err(ConfigError::InvalidDefinition {
                collection: self.name,
                reason: "child collections require a foreign key path".to_string(),
            });
        }

        Ok(CollectionDefinition {
            name: self.name,
            layout: self.layout,
            variant: CollectionVariant::Child {
                foreign_key_path: self.foreign_key_path,
                parent_collection_name: self.parent_collection_name,
            },
            id_generator: self.id_generator.unwrap_or_else(default_id_generator),
        })
    }
}
