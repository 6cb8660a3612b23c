//! Core types: documents, stored items, key paths, and service limits.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A user document. Top-level documents are JSON objects.
pub type Document = Value;

/// A stored item as exchanged with the backend (attribute name to value).
pub type Item = Map<String, Value>;

/// Reserved document field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// Envelope attribute holding the user document.
pub const VALUE_ATTRIBUTE: &str = "value";

/// Envelope attribute holding the owning collection name.
pub const TYPE_ATTRIBUTE: &str = "type";

/// Default separator placed between the segments of an index key.
///
/// Multi-character so that it does not collide with ordinary field values.
pub const DEFAULT_SEPARATOR: &str = "|-|";

/// Default partition key attribute name of a collection layout.
pub const DEFAULT_PARTITION_KEY: &str = "id";

/// Default sort key attribute name of a collection layout.
pub const DEFAULT_SORT_KEY: &str = "sid";

/// Maximum number of descriptors in one transactional read (matching DynamoDB).
pub const MAX_TRANSACT_GET_ITEMS: usize = 25;

/// Maximum number of items in one transactional write (matching DynamoDB).
pub const MAX_TRANSACT_WRITE_ITEMS: usize = 100;

/// One step of a [`KeyPath`]: an object field or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Field(String),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Index(i) => write!(f, "[{i}]"),
            PathSegment::Field(name) => f.write_str(name),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(s: &str) -> Self {
        PathSegment::Field(s.to_string())
    }
}

impl From<String> for PathSegment {
    fn from(s: String) -> Self {
        PathSegment::Field(s)
    }
}

impl From<usize> for PathSegment {
    fn from(i: usize) -> Self {
        PathSegment::Index(i)
    }
}

/// An ordered sequence of fields/indices locating a value inside a document.
///
/// Equality is structural. Serialized as a JSON array, e.g.
/// `["address", "country"]` or `["tags", 0]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyPath(Vec<PathSegment>);

impl KeyPath {
    pub fn new(segments: Vec<PathSegment>) -> Self {
        Self(segments)
    }

    /// Parse a dot-separated path. All-digit segments become array indices.
    ///
    /// - `"country"` → `[Field("country")]`
    /// - `"address.city"` → `[Field("address"), Field("city")]`
    /// - `"tags.0"` → `[Field("tags"), Index(0)]`
    pub fn parse(dotted: &str) -> Self {
        if dotted.is_empty() {
            return Self::default();
        }
        let segments = dotted
            .split('.')
            .map(|seg| match seg.parse::<usize>() {
                Ok(i) => PathSegment::Index(i),
                Err(_) => PathSegment::Field(seg.to_string()),
            })
            .collect();
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Return a new path with `prefix` prepended.
    pub fn prefixed(&self, prefix: &KeyPath) -> KeyPath {
        let mut segments = prefix.0.clone();
        segments.extend(self.0.iter().cloned());
        KeyPath(segments)
    }

    /// Walk `doc` along this path.
    ///
    /// Returns `None` if any segment is missing. Index segments also match
    /// object fields with the same decimal name.
    pub fn resolve<'a>(&self, doc: &'a Value) -> Option<&'a Value> {
        let mut current = doc;
        for segment in &self.0 {
            current = match (segment, current) {
                (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
                (PathSegment::Index(i), Value::Array(arr)) => arr.get(*i)?,
                (PathSegment::Index(i), Value::Object(map)) => map.get(&i.to_string())?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                PathSegment::Field(name) if i > 0 => write!(f, ".{name}")?,
                other => write!(f, "{other}")?,
            }
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(dotted: &str) -> Self {
        KeyPath::parse(dotted)
    }
}

impl From<Vec<PathSegment>> for KeyPath {
    fn from(segments: Vec<PathSegment>) -> Self {
        KeyPath(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_dotted_path() {
        let path = KeyPath::parse("address.tags.1");
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("address".to_string()),
                PathSegment::Field("tags".to_string()),
                PathSegment::Index(1),
            ]
        );
        assert!(KeyPath::parse("").is_empty());
    }

    #[test]
    fn test_display_round_trips_fields() {
        assert_eq!(KeyPath::parse("address.city").to_string(), "address.city");
        assert_eq!(KeyPath::parse("tags.0").to_string(), "tags[0]");
    }

    #[test]
    fn test_resolve_nested_and_indexed() {
        let doc = json!({"address": {"city": "Sydney"}, "tags": ["a", "b"], "m": {"3": true}});
        assert_eq!(
            KeyPath::parse("address.city").resolve(&doc),
            Some(&json!("Sydney"))
        );
        assert_eq!(KeyPath::parse("tags.1").resolve(&doc), Some(&json!("b")));
        assert_eq!(KeyPath::parse("m.3").resolve(&doc), Some(&json!(true)));
        assert_eq!(KeyPath::parse("address.zip").resolve(&doc), None);
        assert_eq!(KeyPath::parse("tags.9").resolve(&doc), None);
        assert_eq!(KeyPath::parse("address.city.x").resolve(&doc), None);
    }

    #[test]
    fn test_empty_path_resolves_to_root() {
        let doc = json!({"a": 1});
        assert_eq!(KeyPath::default().resolve(&doc), Some(&doc));
    }

    #[test]
    fn test_serde_as_array() {
        let path: KeyPath = serde_json::from_value(json!(["tags", 0])).unwrap();
        assert_eq!(path, KeyPath::parse("tags.0"));
        assert_eq!(serde_json::to_value(&path).unwrap(), json!(["tags", 0]));
    }

    #[test]
    fn test_prefixed() {
        let path = KeyPath::parse("a.b").prefixed(&KeyPath::parse("value"));
        assert_eq!(path, KeyPath::parse("value.a.b"));
    }
}
