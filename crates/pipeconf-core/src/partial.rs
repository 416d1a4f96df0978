//! Partially decoded configuration
//!
//! [`PartialConfig`] is the surface config processors rewrite: the tree split
//! into its sections with component ids parsed, while every component fragment
//! stays untyped. It converts back into a tree losslessly, keeping the
//! original order of sections and components.

use indexmap::IndexMap;

use crate::component::{ComponentId, Kind};
use crate::error::{Error, Result};
use crate::value::Value;

/// Top-level key of the service section
pub const SERVICE_SECTION: &str = "service";

/// Every top-level key a configuration tree may contain
pub const SECTION_KEYS: [&str; 6] = [
    "receivers",
    "processors",
    "exporters",
    "connectors",
    "extensions",
    SERVICE_SECTION,
];

/// Untyped component fragments grouped by section
pub type Components = IndexMap<ComponentId, Value>;

/// A configuration split into sections, before typed binding
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialConfig {
    pub receivers: Components,
    pub processors: Components,
    pub exporters: Components,
    pub connectors: Components,
    pub extensions: Components,
    /// Service settings, kept opaque
    pub service: Option<Value>,
    /// Top-level keys in the order they appeared in the source tree
    layout: Vec<&'static str>,
}

impl PartialConfig {
    /// Decode a tree without validating component fragments
    pub fn from_value(tree: Value) -> Result<Self> {
        let root = match tree {
            Value::Mapping(map) => map,
            Value::Null => IndexMap::new(),
            other => {
                return Err(Error::partial_config(
                    None,
                    format!("expected a mapping at the top level, got {}", other.type_name()),
                ))
            }
        };

        let mut partial = PartialConfig::default();
        for (key, value) in root {
            let section = SECTION_KEYS
                .iter()
                .copied()
                .find(|s| *s == key)
                .ok_or_else(|| {
                    Error::partial_config(Some(key.clone()), format!("unknown section '{}'", key))
                        .with_help(format!("Valid sections are: {}", SECTION_KEYS.join(", ")))
                })?;
            partial.layout.push(section);

            match Kind::from_section(section) {
                Some(kind) => *partial.components_mut(kind) = decode_components(section, value)?,
                None => partial.service = Some(value),
            }
        }
        Ok(partial)
    }

    /// Components of one kind
    pub fn components(&self, kind: Kind) -> &Components {
        match kind {
            Kind::Receiver => &self.receivers,
            Kind::Processor => &self.processors,
            Kind::Exporter => &self.exporters,
            Kind::Connector => &self.connectors,
            Kind::Extension => &self.extensions,
        }
    }

    /// Mutable components of one kind
    pub fn components_mut(&mut self, kind: Kind) -> &mut Components {
        match kind {
            Kind::Receiver => &mut self.receivers,
            Kind::Processor => &mut self.processors,
            Kind::Exporter => &mut self.exporters,
            Kind::Connector => &mut self.connectors,
            Kind::Extension => &mut self.extensions,
        }
    }

    /// Convert back into a tree
    ///
    /// Sections present in the source tree come first, in their original
    /// order. Sections that were absent are emitted after them only when a
    /// processor populated them.
    pub fn into_value(mut self) -> Value {
        let mut layout = std::mem::take(&mut self.layout);
        for section in SECTION_KEYS {
            if layout.contains(&section) {
                continue;
            }
            let populated = match Kind::from_section(section) {
                Some(kind) => !self.components(kind).is_empty(),
                None => self.service.is_some(),
            };
            if populated {
                layout.push(section);
            }
        }

        let mut root = IndexMap::with_capacity(layout.len());
        for section in layout {
            let value = match Kind::from_section(section) {
                Some(kind) => encode_components(std::mem::take(self.components_mut(kind))),
                None => match self.service.take() {
                    Some(service) => service,
                    None => continue,
                },
            };
            root.insert(section.to_string(), value);
        }
        Value::Mapping(root)
    }
}

fn decode_components(section: &str, value: Value) -> Result<Components> {
    let map = match value {
        Value::Mapping(map) => map,
        Value::Null => return Ok(Components::new()),
        other => {
            return Err(Error::partial_config(
                Some(section.to_string()),
                format!("expected a mapping, got {}", other.type_name()),
            ))
        }
    };

    let mut components = Components::with_capacity(map.len());
    for (key, fragment) in map {
        let id: ComponentId = key.parse().map_err(|e| {
            Error::partial_config(
                Some(format!("{}.{}", section, key)),
                format!("{}", e),
            )
        })?;
        if components.insert(id.clone(), fragment).is_some() {
            return Err(Error::partial_config(
                Some(format!("{}.{}", section, key)),
                format!("duplicate component id '{}'", id),
            ));
        }
    }
    Ok(components)
}

fn encode_components(components: Components) -> Value {
    Value::Mapping(
        components
            .into_iter()
            .map(|(id, fragment)| (id.to_string(), fragment))
            .collect(),
    )
}
