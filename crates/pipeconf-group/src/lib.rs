//! Receiver groups for pipeconf
//!
//! This crate provides the `group` config processor. A group is a synthetic
//! receiver standing for several concrete ones, so a pipeline can reference
//! one id instead of repeating the whole list.
//!
//! A group lists ids of receivers defined elsewhere:
//!
//! ```yaml
//! receivers:
//!   otlp: {}
//!   group/edge:
//!     members: [otlp, prometheus/self]
//! service:
//!   pipelines:
//!     metrics:
//!       receivers: [group/edge]
//!       exporters: [debug]
//! ```
//!
//! or defines its members inline:
//!
//! ```yaml
//! receivers:
//!   group/edge:
//!     otlp: {protocols: {grpc: {}}}
//!     prometheus/self: {}
//! ```
//!
//! Either way the group receiver is replaced by its members, and every
//! pipeline that referenced the group lists the members instead. A member
//! only named in a `members:` list takes its configuration from an inline
//! definition in another group, whichever group comes first.
//!
//! The processor's options live under the top-level `group` key:
//!
//! ```yaml
//! group:
//!   receiver_type: group   # receiver type treated as a group
//! ```

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use pipeconf_core::{
    ComponentId, Error, Factories, PartialConfig, Result, TypedConfigProcessor, Value,
};

/// Top-level key of the group processor's options
pub const CONFIG_KEY: &str = "group";

/// Key of the list form of a group definition
const MEMBERS_KEY: &str = "members";

/// Options of [`GroupConfigProcessor`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct GroupOptions {
    /// Receivers of this type are expanded
    pub receiver_type: String,
}

impl Default for GroupOptions {
    fn default() -> Self {
        Self {
            receiver_type: "group".into(),
        }
    }
}

/// Expands group receivers into their members
#[derive(Debug, Clone, Copy, Default)]
pub struct GroupConfigProcessor;

impl GroupConfigProcessor {
    pub fn new() -> Self {
        Self
    }
}

impl TypedConfigProcessor for GroupConfigProcessor {
    type Options = GroupOptions;

    fn config_key(&self) -> &str {
        CONFIG_KEY
    }

    fn process(
        &self,
        conf: &mut PartialConfig,
        _factories: &Factories,
        options: &GroupOptions,
    ) -> Result<()> {
        let groups: Vec<ComponentId> = conf
            .receivers
            .keys()
            .filter(|id| id.component_type() == options.receiver_type.as_str())
            .cloned()
            .collect();

        let mut expansions: IndexMap<ComponentId, Vec<ComponentId>> = IndexMap::new();
        let mut placeholders = HashSet::new();
        for group in groups {
            let fragment = conf.receivers.shift_remove(&group).unwrap_or_default();
            let members = expand_group(
                &group,
                fragment,
                options,
                &mut conf.receivers,
                &mut placeholders,
            )?;
            log::debug!("Expanded receiver group '{}' into {} member(s)", group, members.len());
            expansions.insert(group, members);
        }

        if let Some(service) = conf.service.as_mut() {
            rewrite_pipelines(service, &expansions);
        }
        Ok(())
    }
}

fn group_error(group: &ComponentId, message: impl Into<String>) -> Error {
    Error::validation(format!("receivers.{}", group), message).with_help(format!(
        "Define '{}' either as `members: [id, ...]` or as a mapping of receiver id to configuration",
        group
    ))
}

/// Insert the members of one group into `receivers`, returning their ids in order
///
/// `placeholders` holds the members a list-form group inserted without a
/// definition; an inline definition of the same id replaces them.
fn expand_group(
    group: &ComponentId,
    fragment: Value,
    options: &GroupOptions,
    receivers: &mut IndexMap<ComponentId, Value>,
    placeholders: &mut HashSet<ComponentId>,
) -> Result<Vec<ComponentId>> {
    let mut definitions = match fragment {
        Value::Mapping(map) => map,
        other => {
            return Err(group_error(
                group,
                format!("expected a mapping, got {}", other.type_name()),
            ))
        }
    };

    let mut members: Vec<(ComponentId, Option<Value>)> = Vec::new();
    if let Some(listed) = definitions.shift_remove(MEMBERS_KEY) {
        let list = match listed {
            Value::Sequence(list) => list,
            other => {
                return Err(group_error(
                    group,
                    format!(
                        "'{}' must be a list of receiver ids, got {}",
                        MEMBERS_KEY,
                        other.type_name()
                    ),
                ))
            }
        };
        if let Some(extra) = definitions.keys().next() {
            return Err(group_error(
                group,
                format!("unexpected key '{}' next to '{}'", extra, MEMBERS_KEY),
            ));
        }
        for entry in list {
            let id = entry
                .as_str()
                .ok_or_else(|| {
                    group_error(
                        group,
                        format!("member ids must be strings, got {}", entry.type_name()),
                    )
                })?
                .parse::<ComponentId>()
                .map_err(|e| group_error(group, e.to_string()))?;
            members.push((id, None));
        }
    } else {
        for (key, config) in definitions {
            let id = key
                .parse::<ComponentId>()
                .map_err(|e| group_error(group, e.to_string()))?;
            members.push((id, Some(config)));
        }
    }

    if members.is_empty() {
        return Err(group_error(group, "group has no members"));
    }

    let mut ids = Vec::with_capacity(members.len());
    for (id, config) in members {
        if id.component_type() == options.receiver_type.as_str() {
            return Err(group_error(
                group,
                format!("member '{}' is itself a group", id),
            ));
        }
        match config {
            None => {
                if !receivers.contains_key(&id) {
                    receivers.insert(id.clone(), Value::Null);
                    placeholders.insert(id.clone());
                }
            }
            Some(config) => {
                let clash = !placeholders.contains(&id)
                    && receivers.get(&id).is_some_and(|existing| *existing != config);
                if clash {
                    return Err(group_error(
                        group,
                        format!("member '{}' is already defined with a different configuration", id),
                    ));
                }
                placeholders.remove(&id);
                receivers.insert(id.clone(), config);
            }
        }
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Replace group references in every pipeline's receiver list
///
/// A member already listed is not repeated. Entries that are not groups are
/// left alone, so a receiver listed twice still fails binding.
fn rewrite_pipelines(service: &mut Value, expansions: &IndexMap<ComponentId, Vec<ComponentId>>) {
    if expansions.is_empty() {
        return;
    }
    let Some(pipelines) = service
        .as_mapping_mut()
        .and_then(|s| s.get_mut("pipelines"))
        .and_then(Value::as_mapping_mut)
    else {
        return;
    };

    for pipeline in pipelines.values_mut() {
        let Some(Value::Sequence(receivers)) = pipeline
            .as_mapping_mut()
            .and_then(|p| p.get_mut("receivers"))
        else {
            continue;
        };

        let mut rewritten: Vec<Value> = Vec::with_capacity(receivers.len());
        let mut from_groups: Vec<Value> = Vec::new();
        for entry in receivers.drain(..) {
            let expanded = entry
                .as_str()
                .and_then(|s| s.parse::<ComponentId>().ok())
                .and_then(|id| expansions.get(&id));
            match expanded {
                Some(members) => {
                    for member in members {
                        let member = Value::String(member.to_string());
                        if !rewritten.contains(&member) {
                            rewritten.push(member.clone());
                            from_groups.push(member);
                        }
                    }
                }
                None if from_groups.contains(&entry) => {}
                None => rewritten.push(entry),
            }
        }
        *receivers = rewritten;
    }
}
