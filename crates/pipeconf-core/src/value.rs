//! The untyped configuration tree
//!
//! Represents configuration as it comes out of the raw sources, before any
//! processor or factory has looked at it. Values are scalars (string, int,
//! float, bool, null), sequences, or insertion-ordered mappings.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// A node of the untyped configuration tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// Null value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Sequence of values
    Sequence(Vec<Value>),
    /// Mapping of string keys to values
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// An empty mapping
    pub fn mapping() -> Self {
        Value::Mapping(IndexMap::new())
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get as str if this is a String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as mapping if this is a Mapping
    pub fn as_mapping(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Get as mutable mapping if this is a Mapping
    pub fn as_mapping_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Get a value by path (e.g., "receivers.otlp" or "service.pipelines.traces.receivers[0]")
    pub fn get_path(&self, path: &str) -> Result<&Value> {
        if path.is_empty() {
            return Ok(self);
        }

        let segments = parse_path(path)?;
        let mut current = self;

        for segment in &segments {
            current = match segment {
                PathSegment::Key(key) => match current {
                    Value::Mapping(map) => map
                        .get(key.as_str())
                        .ok_or_else(|| Error::path_not_found(path))?,
                    _ => return Err(Error::path_not_found(path)),
                },
                PathSegment::Index(idx) => match current {
                    Value::Sequence(seq) => {
                        seq.get(*idx).ok_or_else(|| Error::path_not_found(path))?
                    }
                    _ => return Err(Error::path_not_found(path)),
                },
            };
        }

        Ok(current)
    }

    /// Decode this tree into a typed value
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let yaml = serde_yaml::to_value(self).map_err(|e| Error::parse(e.to_string()))?;
        serde_yaml::from_value(yaml).map_err(|e| Error::parse(e.to_string()))
    }

    /// Encode a typed value as a tree
    pub fn encode<T: Serialize>(value: &T) -> Result<Value> {
        let yaml = serde_yaml::to_value(value).map_err(|e| Error::parse(e.to_string()))?;
        serde_yaml::from_value(yaml).map_err(|e| Error::parse(e.to_string()))
    }

    /// Returns the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Sequence(_) => "sequence",
            Value::Mapping(_) => "mapping",
        }
    }

    /// Merge another value into this one
    ///
    /// Merge semantics:
    /// - Mappings: Deep merge recursively
    /// - Scalars: `other` wins (last-writer-wins)
    /// - Sequences: `other` replaces entirely
    /// - Null in other: Removes the key
    /// - Type mismatch: `other` wins
    pub fn merge(&mut self, other: Value) {
        match (self, other) {
            (Value::Mapping(base), Value::Mapping(overlay)) => {
                for (key, overlay_value) in overlay {
                    if overlay_value.is_null() {
                        base.shift_remove(&key);
                    } else if let Some(base_value) = base.get_mut(&key) {
                        base_value.merge(overlay_value);
                    } else {
                        base.insert(key, overlay_value);
                    }
                }
            }
            (this, other) => {
                *this = other;
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Sequence(seq) => {
                write!(f, "[")?;
                for (i, v) in seq.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Mapping(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Value::Mapping(m)
    }
}

/// A segment in a path expression
#[derive(Debug, Clone, PartialEq)]
enum PathSegment {
    /// A key in a mapping (e.g., "receivers" in "receivers.otlp")
    Key(String),
    /// An index in a sequence (e.g., 0 in "extensions[0]")
    Index(usize),
}

/// Parse a path string into segments
/// Supports: "key", "key.subkey", "key[0]", "key[0].subkey"
fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    let mut current_key = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
            }
            '[' => {
                if !current_key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut current_key)));
                }
                let mut index_str = String::new();
                for c in chars.by_ref() {
                    if c == ']' {
                        break;
                    }
                    index_str.push(c);
                }
                let idx: usize = index_str.parse().map_err(|_| {
                    Error::parse(format!("Invalid array index in path: {}", index_str))
                })?;
                segments.push(PathSegment::Index(idx));
            }
            ']' => {
                return Err(Error::parse("Unexpected ']' in path"));
            }
            _ => {
                current_key.push(c);
            }
        }
    }

    if !current_key.is_empty() {
        segments.push(PathSegment::Key(current_key));
    }

    Ok(segments)
}
