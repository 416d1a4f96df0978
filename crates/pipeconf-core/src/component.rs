//! Component identifiers
//!
//! Every configured component is keyed by a [`ComponentId`]: a [`Type`] naming
//! the factory that builds it, optionally followed by `/name` to tell several
//! instances of the same type apart (`otlp`, `otlp/internal`).

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Separator between the type and the name of a component id
pub const TYPE_AND_NAME_SEPARATOR: char = '/';

const MAX_NAME_LEN: usize = 1024;

fn type_regex() -> &'static Regex {
    static TYPE_RE: OnceLock<Regex> = OnceLock::new();
    TYPE_RE.get_or_init(|| Regex::new(r"^[a-zA-Z][0-9a-zA-Z_]{0,62}$").expect("type pattern compiles"))
}

fn name_regex() -> &'static Regex {
    static NAME_RE: OnceLock<Regex> = OnceLock::new();
    NAME_RE.get_or_init(|| Regex::new(r"^[^\pZ\pC\pS/]+$").expect("name pattern compiles"))
}

/// Reasons a component id cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("invalid component type {0:?}: must start with a letter and contain only letters, digits and '_' (max 63 characters)")]
    InvalidType(String),
    #[error("component id {0:?} has an empty name after '/'")]
    EmptyName(String),
    #[error("invalid component name {0:?}: must not contain spaces, control characters, symbols or '/'")]
    InvalidName(String),
    #[error("component name {0:?} exceeds 1024 characters")]
    NameTooLong(String),
}

/// The type of a component, naming the factory that creates it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type(String);

impl Type {
    /// Create a type, validating its characters
    pub fn new(ty: impl Into<String>) -> Result<Self, IdError> {
        let ty = ty.into();
        if !type_regex().is_match(&ty) {
            return Err(IdError::InvalidType(ty));
        }
        Ok(Self(ty))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for Type {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Type {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Identifier of a configured component, unique within its section
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId {
    ty: Type,
    name: Option<String>,
}

impl ComponentId {
    /// Create an id without a name
    pub fn new(ty: Type) -> Self {
        Self { ty, name: None }
    }

    /// Create an id with a name
    pub fn with_name(ty: Type, name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            ty,
            name: Some(name),
        })
    }

    pub fn component_type(&self) -> &Type {
        &self.ty
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn validate_name(name: &str) -> Result<(), IdError> {
    if name.chars().count() > MAX_NAME_LEN {
        return Err(IdError::NameTooLong(name.to_string()));
    }
    if !name_regex().is_match(name) {
        return Err(IdError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl FromStr for ComponentId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.split_once(TYPE_AND_NAME_SEPARATOR) {
            None => Ok(Self::new(Type::new(s)?)),
            Some((ty, name)) => {
                let ty = Type::new(ty.trim())?;
                let name = name.trim();
                if name.is_empty() {
                    return Err(IdError::EmptyName(s.to_string()));
                }
                Self::with_name(ty, name)
            }
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}{}{}", self.ty, TYPE_AND_NAME_SEPARATOR, name),
            None => write!(f, "{}", self.ty),
        }
    }
}

impl Serialize for ComponentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ComponentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// The five component categories of a collector configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Receiver,
    Processor,
    Exporter,
    Connector,
    Extension,
}

impl Kind {
    /// All kinds, in the order their sections are conventionally written
    pub const ALL: [Kind; 5] = [
        Kind::Receiver,
        Kind::Processor,
        Kind::Exporter,
        Kind::Connector,
        Kind::Extension,
    ];

    /// Top-level configuration key holding components of this kind
    pub fn section(&self) -> &'static str {
        match self {
            Kind::Receiver => "receivers",
            Kind::Processor => "processors",
            Kind::Exporter => "exporters",
            Kind::Connector => "connectors",
            Kind::Extension => "extensions",
        }
    }

    /// Look a kind up by its section key
    pub fn from_section(section: &str) -> Option<Kind> {
        Kind::ALL.into_iter().find(|k| k.section() == section)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Kind::Receiver => "receiver",
            Kind::Processor => "processor",
            Kind::Exporter => "exporter",
            Kind::Connector => "connector",
            Kind::Extension => "extension",
        };
        f.write_str(name)
    }
}
