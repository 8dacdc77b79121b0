//! Value model for blueprint variables and module settings.
//!
//! [`OrderedMap`] keeps keys in first-insertion order so that an expanded
//! blueprint serializes in the same order it was written. [`YamlValue`] is the
//! canonical dynamically-typed value every literal decodes into.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// String-keyed map that preserves first-insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedMap<V>(IndexMap<String, V>);

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self(IndexMap::new())
    }
}

impl<V> OrderedMap<V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the map with `key` set to `value`.
    ///
    /// A new key is appended; an existing key keeps its position.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: V) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    /// Sets `key` to `value` in place, with the same ordering rules as [`Self::with`].
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.0.insert(key.into(), value);
    }

    /// Iterates over entries in insertion order.
    ///
    /// The iterator is cheap to clone, so the sequence can be restarted.
    pub fn items(&self) -> impl Iterator<Item = (&str, &V)> + Clone {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates over keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + Clone {
        self.0.keys().map(String::as_str)
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&V> {
        self.0.get(key)
    }

    /// Looks up a value mutably.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.0.get_mut(key)
    }

    /// Returns true if the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the map has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Applies a fallible transformation to every value, keeping order.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_map<W, E>(
        &self,
        mut f: impl FnMut(&str, &V) -> Result<W, E>,
    ) -> Result<OrderedMap<W>, E> {
        let mut out = OrderedMap::new();
        for (k, v) in &self.0 {
            out.insert(k.clone(), f(k, v)?);
        }
        Ok(out)
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Canonical dynamically-typed literal.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "serde_yaml::Value", into = "serde_yaml::Value")]
pub enum YamlValue {
    /// Explicit null or an empty document.
    #[default]
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer or floating point scalar.
    Number(serde_yaml::Number),
    /// String scalar.
    String(String),
    /// Ordered sequence.
    Sequence(Vec<YamlValue>),
    /// Ordered mapping with string keys.
    Mapping(OrderedMap<YamlValue>),
}

impl YamlValue {
    /// Decodes a literal from its textual form.
    ///
    /// `"3"` becomes a number, `"true"` a boolean, `"[1,2]"` a sequence and
    /// anything else that parses as plain text a string.
    ///
    /// # Errors
    ///
    /// Returns a decode error if the text is not a supported shape.
    pub fn parse_literal(text: &str) -> Result<Self, ConfigError> {
        let raw: serde_yaml::Value = serde_yaml::from_str(text).map_err(|e| {
            let location = e
                .location()
                .map(|l| format!("line {} column {}", l.line(), l.column()));
            ConfigError::decode(format!("cannot decode literal '{text}': {e}"), location)
        })?;
        Self::try_from(raw).map_err(|e| ConfigError::decode(e.0, None))
    }

    /// Returns the string contents of a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the value of a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the value of an integer number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// Returns the elements of a sequence.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Self]> {
        match self {
            Self::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the entries of a mapping.
    #[must_use]
    pub const fn as_mapping(&self) -> Option<&OrderedMap<Self>> {
        match self {
            Self::Mapping(map) => Some(map),
            _ => None,
        }
    }

    /// Returns true for null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Renders a scalar as it would appear inside interpolated text.
    ///
    /// Returns `None` for sequences and mappings.
    #[must_use]
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Null => Some(String::new()),
            Self::Bool(b) => Some(b.to_string()),
            Self::Number(n) => Some(n.to_string()),
            Self::String(s) => Some(s.clone()),
            Self::Sequence(_) | Self::Mapping(_) => None,
        }
    }

    /// Short type name used in diagnostics.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Sequence(_) => "list",
            Self::Mapping(_) => "map",
        }
    }
}

impl From<&str> for YamlValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for YamlValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for YamlValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for YamlValue {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Reason a raw YAML value has no canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueShapeError(pub String);

impl fmt::Display for ValueShapeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<serde_yaml::Value> for YamlValue {
    type Error = ValueShapeError;

    fn try_from(raw: serde_yaml::Value) -> Result<Self, Self::Error> {
        Ok(match raw {
            serde_yaml::Value::Null => Self::Null,
            serde_yaml::Value::Bool(b) => Self::Bool(b),
            serde_yaml::Value::Number(n) => Self::Number(n),
            serde_yaml::Value::String(s) => Self::String(s),
            serde_yaml::Value::Sequence(items) => Self::Sequence(
                items
                    .into_iter()
                    .map(Self::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            serde_yaml::Value::Mapping(mapping) => {
                let mut map = OrderedMap::new();
                for (k, v) in mapping {
                    let key = match k {
                        serde_yaml::Value::String(s) => s,
                        serde_yaml::Value::Number(n) => n.to_string(),
                        serde_yaml::Value::Bool(b) => b.to_string(),
                        other => {
                            return Err(ValueShapeError(format!(
                                "map keys must be scalars, found {other:?}"
                            )));
                        }
                    };
                    map.insert(key, Self::try_from(v)?);
                }
                Self::Mapping(map)
            }
            serde_yaml::Value::Tagged(tagged) => {
                return Err(ValueShapeError(format!(
                    "tagged values are not supported (found tag {})",
                    tagged.tag
                )));
            }
        })
    }
}

impl From<YamlValue> for serde_yaml::Value {
    fn from(value: YamlValue) -> Self {
        match value {
            YamlValue::Null => Self::Null,
            YamlValue::Bool(b) => Self::Bool(b),
            YamlValue::Number(n) => Self::Number(n),
            YamlValue::String(s) => Self::String(s),
            YamlValue::Sequence(items) => Self::Sequence(items.into_iter().map(Into::into).collect()),
            YamlValue::Mapping(map) => Self::Mapping(
                map.0
                    .into_iter()
                    .map(|(k, v)| (Self::String(k), v.into()))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_literal_scalars() {
        assert_eq!(YamlValue::parse_literal("3").unwrap().as_i64(), Some(3));
        assert_eq!(YamlValue::parse_literal("true").unwrap(), YamlValue::Bool(true));
        assert_eq!(YamlValue::parse_literal("foo").unwrap(), YamlValue::from("foo"));
        assert!(YamlValue::parse_literal("").unwrap().is_null());
    }

    #[test]
    fn test_parse_literal_sequence() {
        let value = YamlValue::parse_literal("[1,2]").unwrap();
        let items = value.as_sequence().expect("sequence");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_i64(), Some(1));
        assert_eq!(items[1].as_i64(), Some(2));
    }

    #[test]
    fn test_parse_literal_mapping_keeps_order() {
        let value = YamlValue::parse_literal("{z: 1, a: 2, m: 3}").unwrap();
        let keys: Vec<&str> = value.as_mapping().expect("mapping").keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_parse_literal_rejects_malformed() {
        assert!(YamlValue::parse_literal("[1, 2").is_err());
        assert!(YamlValue::parse_literal("!custom 3").is_err());
    }

    #[test]
    fn test_with_preserves_position_on_overwrite() {
        let map = OrderedMap::new()
            .with("a", YamlValue::from(1_i64))
            .with("b", YamlValue::from(2_i64))
            .with("a", YamlValue::from(9_i64));

        let items: Vec<(&str, Option<i64>)> = map.items().map(|(k, v)| (k, v.as_i64())).collect();
        assert_eq!(items, vec![("a", Some(9)), ("b", Some(2))]);
    }

    #[test]
    fn test_items_is_restartable() {
        let map = OrderedMap::new().with("x", 1).with("y", 2);
        let iter = map.items();
        let first: Vec<_> = iter.clone().collect();
        let second: Vec<_> = iter.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_yaml_round_trip_preserves_shape() {
        let text = "a: [1, two]\nb: {c: true}\n";
        let value: YamlValue = serde_yaml::from_str(text).unwrap();
        let back = serde_yaml::to_string(&value).unwrap();
        let again: YamlValue = serde_yaml::from_str(&back).unwrap();
        assert_eq!(value, again);
    }
}
