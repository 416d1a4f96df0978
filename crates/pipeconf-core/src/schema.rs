//! JSON Schema validation for component configurations
//!
//! A factory may attach a [`Schema`] describing its configuration. The binder
//! validates the merged fragment (factory defaults plus user overrides)
//! against it before the factory unmarshals the fragment.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::value::Value;

/// Schema for validating a component configuration
#[derive(Debug, Clone)]
pub struct Schema {
    /// Compiled JSON Schema validator (wrapped in Arc for Clone)
    compiled: Arc<jsonschema::Validator>,
}

impl Schema {
    /// Load a schema from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let schema: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::parse(format!("Invalid JSON schema: {}", e)))?;
        Self::from_value(schema)
    }

    /// Load a schema from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let schema: serde_json::Value = serde_yaml::from_str(yaml)
            .map_err(|e| Error::parse(format!("Invalid YAML schema: {}", e)))?;
        Self::from_value(schema)
    }

    fn from_value(schema: serde_json::Value) -> Result<Self> {
        let compiled = jsonschema::validator_for(&schema)
            .map_err(|e| Error::parse(format!("Invalid JSON Schema: {}", e)))?;
        Ok(Self {
            compiled: Arc::new(compiled),
        })
    }

    /// Validate a Value and collect every violation
    pub fn validate_collect(&self, value: &Value) -> Vec<ValidationError> {
        let json_value = value_to_json(value);

        self.compiled
            .iter_errors(&json_value)
            .map(|e| ValidationError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect()
    }
}

/// A single validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the invalid value (e.g., "/endpoint")
    pub path: String,
    /// Error message
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Integer(i) => serde_json::Value::Number((*i).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Sequence(seq) => serde_json::Value::Array(seq.iter().map(value_to_json).collect()),
        Value::Mapping(map) => {
            let obj: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), value_to_json(v)))
                .collect();
            serde_json::Value::Object(obj)
        }
    }
}
