//! Typed binding
//!
//! The binder turns a processed configuration tree into a [`Config`]. Every
//! component fragment is merged over its factory's defaults, checked against
//! the factory schema if there is one, and unmarshalled by the factory. The
//! service section is decoded last and its references are checked against the
//! bound components.

use crate::component::Kind;
use crate::config::{Config, ServiceConfig};
use crate::error::{Error, Result};
use crate::factory::Factories;
use crate::partial::{PartialConfig, SERVICE_SECTION};
use crate::value::Value;

/// Bind a configuration tree to the registered factories
pub fn unmarshal(tree: Value, factories: &Factories) -> Result<Config> {
    let partial = PartialConfig::from_value(tree).map_err(|e| {
        Error::binding(
            e.path.clone().unwrap_or_default(),
            e.cause.clone().unwrap_or_else(|| e.to_string()),
        )
    })?;

    let mut config = Config::default();
    for kind in Kind::ALL {
        bind_kind(&partial, kind, factories, &mut config)?;
    }

    config.service = match &partial.service {
        None | Some(Value::Null) => ServiceConfig::default(),
        Some(service) => service.decode::<ServiceConfig>().map_err(|e| {
            Error::binding(
                SERVICE_SECTION,
                e.cause.clone().unwrap_or_else(|| e.to_string()),
            )
        })?,
    };

    config.validate()?;
    Ok(config)
}

fn bind_kind(
    partial: &PartialConfig,
    kind: Kind,
    factories: &Factories,
    config: &mut Config,
) -> Result<()> {
    for (id, fragment) in partial.components(kind) {
        let path = format!("{}.{}", kind.section(), id);
        let factory = factories.get(kind, id.component_type()).ok_or_else(|| {
            let known: Vec<&str> = factories.types(kind).map(|t| t.as_str()).collect();
            Error::binding(
                &path,
                format!("unknown type '{}' for {} '{}'", id.component_type(), kind, id),
            )
            .with_help(if known.is_empty() {
                format!("No {} factories are registered", kind)
            } else {
                format!("Registered {} types: {}", kind, known.join(", "))
            })
        })?;

        // A null fragment means "use the defaults"
        let mut conf = factory
            .default_config()
            .map_err(|e| Error::binding(&path, e.cause.clone().unwrap_or_else(|| e.to_string())))?;
        if !fragment.is_null() {
            conf.merge(fragment.clone());
        }

        if let Some(schema) = factory.schema() {
            let errors = schema.validate_collect(&conf);
            if !errors.is_empty() {
                let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
                return Err(Error::binding(&path, messages.join("; ")));
            }
        }

        log::trace!("Unmarshalling {} '{}'", kind, id);
        let typed = factory
            .unmarshal(conf)
            .map_err(|e| Error::binding(&path, e.cause.clone().unwrap_or_else(|| e.to_string())))?;
        config.configs_mut(kind).insert(id.clone(), typed);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;
    use crate::error::ErrorKind;
    use crate::factory::SerdeFactory;
    use crate::schema::Schema;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, default)]
    struct OtlpConfig {
        endpoint: String,
        timeout: String,
    }

    impl Default for OtlpConfig {
        fn default() -> Self {
            Self {
                endpoint: "0.0.0.0:4317".into(),
                timeout: "5s".into(),
            }
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields, default)]
    struct DebugConfig {
        verbosity: String,
    }

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn id(s: &str) -> ComponentId {
        s.parse().unwrap()
    }

    fn factories() -> Factories {
        Factories::new()
            .with(Kind::Receiver, SerdeFactory::<OtlpConfig>::new("otlp").unwrap())
            .unwrap()
            .with(Kind::Exporter, SerdeFactory::<DebugConfig>::new("debug").unwrap())
            .unwrap()
            .with(Kind::Processor, SerdeFactory::<DebugConfig>::new("batch").unwrap())
            .unwrap()
    }

    #[test]
    fn test_bind_full_config() {
        let tree = yaml(
            r#"
receivers:
  otlp: {endpoint: "localhost:4317"}
  otlp/2: ~
processors:
  batch: {}
exporters:
  debug: {verbosity: detailed}
service:
  pipelines:
    traces:
      receivers: [otlp, otlp/2]
      processors: [batch]
      exporters: [debug]
"#,
        );
        let config = unmarshal(tree, &factories()).unwrap();

        let otlp = config.receivers[&id("otlp")]
            .downcast_ref::<OtlpConfig>()
            .unwrap();
        assert_eq!(otlp.endpoint, "localhost:4317");
        assert_eq!(otlp.timeout, "5s");

        let defaulted = config.receivers[&id("otlp/2")]
            .downcast_ref::<OtlpConfig>()
            .unwrap();
        assert_eq!(defaulted, &OtlpConfig::default());

        let pipeline = &config.service.pipelines[&id("traces")];
        assert_eq!(pipeline.receivers, vec![id("otlp"), id("otlp/2")]);
    }

    #[test]
    fn test_unknown_type() {
        let err = unmarshal(yaml("receivers:\n  jaeger: {}\n"), &factories()).unwrap_err();

        assert_eq!(err.kind, ErrorKind::Binding);
        assert_eq!(err.path.as_deref(), Some("receivers.jaeger"));
        assert!(err.help.unwrap().contains("otlp"));
    }

    #[test]
    fn test_unknown_field_in_fragment() {
        let err = unmarshal(yaml("receivers:\n  otlp: {endpont: x}\n"), &factories())
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("receivers.otlp"));
        assert!(err.to_string().contains("endpont"));
    }

    #[test]
    fn test_unknown_section() {
        let err = unmarshal(yaml("group: {}\n"), &factories()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Binding);
        assert_eq!(err.path.as_deref(), Some("group"));
    }

    #[test]
    fn test_bad_service_section() {
        let err = unmarshal(yaml("service:\n  pipelnes: {}\n"), &factories()).unwrap_err();
        assert_eq!(err.path.as_deref(), Some("service"));
    }

    #[test]
    fn test_dangling_pipeline_reference() {
        let tree = yaml(
            r#"
receivers:
  otlp: {}
exporters:
  debug: {}
service:
  pipelines:
    logs:
      receivers: [group/x]
      exporters: [debug]
"#,
        );
        let err = unmarshal(tree, &factories()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Binding);
        assert!(err.to_string().contains("group/x"));
    }

    #[test]
    fn test_schema_is_checked_after_merge() {
        let schema = Schema::from_yaml(
            "type: object\nproperties:\n  verbosity:\n    enum: [basic, normal, detailed]\n",
        )
        .unwrap();
        let factories = Factories::new()
            .with(
                Kind::Exporter,
                SerdeFactory::<DebugConfig>::new("debug")
                    .unwrap()
                    .with_schema(schema),
            )
            .unwrap();

        let err = unmarshal(yaml("exporters:\n  debug: {verbosity: loud}\n"), &factories)
            .unwrap_err();
        assert_eq!(err.path.as_deref(), Some("exporters.debug"));

        // Default verbosity is "", which the schema rejects too
        assert!(unmarshal(yaml("exporters:\n  debug: ~\n"), &factories).is_err());
        assert!(unmarshal(yaml("exporters:\n  debug: {verbosity: basic}\n"), &factories).is_ok());
    }

    #[test]
    fn test_empty_tree() {
        let config = unmarshal(Value::mapping(), &factories()).unwrap();
        assert!(config.receivers.is_empty());
        assert_eq!(config.service, ServiceConfig::default());
    }
}
