//! Typed collector configuration
//!
//! The [`Config`] type is the output of the binder: every component bound to
//! its factory's configuration type, plus the service graph settings.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::component::{ComponentId, Kind};
use crate::error::{Error, Result};
use crate::factory::ComponentConfig;
use crate::value::Value;

/// Signal types a pipeline id may name
pub const PIPELINE_SIGNALS: [&str; 4] = ["traces", "metrics", "logs", "profiles"];

/// Typed configurations of one component kind
pub type Configs = IndexMap<ComponentId, Box<dyn ComponentConfig>>;

/// Components a single pipeline wires together
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PipelineConfig {
    pub receivers: Vec<ComponentId>,
    pub processors: Vec<ComponentId>,
    pub exporters: Vec<ComponentId>,
}

/// The `service` section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Extensions to start, in order
    pub extensions: Vec<ComponentId>,
    /// Pipelines keyed by `signal[/name]`
    pub pipelines: IndexMap<ComponentId, PipelineConfig>,
    /// Collector self-telemetry settings, not interpreted here
    pub telemetry: Value,
}

/// A fully bound collector configuration
#[derive(Debug, Default)]
pub struct Config {
    pub receivers: Configs,
    pub processors: Configs,
    pub exporters: Configs,
    pub connectors: Configs,
    pub extensions: Configs,
    pub service: ServiceConfig,
}

impl Config {
    /// Typed configurations of one kind
    pub fn configs(&self, kind: Kind) -> &Configs {
        match kind {
            Kind::Receiver => &self.receivers,
            Kind::Processor => &self.processors,
            Kind::Exporter => &self.exporters,
            Kind::Connector => &self.connectors,
            Kind::Extension => &self.extensions,
        }
    }

    pub(crate) fn configs_mut(&mut self, kind: Kind) -> &mut Configs {
        match kind {
            Kind::Receiver => &mut self.receivers,
            Kind::Processor => &mut self.processors,
            Kind::Exporter => &mut self.exporters,
            Kind::Connector => &mut self.connectors,
            Kind::Extension => &mut self.extensions,
        }
    }

    /// Check that the service section only references configured components
    pub fn validate(&self) -> Result<()> {
        for ext in &self.service.extensions {
            if !self.extensions.contains_key(ext) {
                return Err(Error::binding(
                    "service.extensions",
                    format!("references extension '{}' which is not configured", ext),
                ));
            }
        }

        for (pipeline_id, pipeline) in &self.service.pipelines {
            let path = format!("service.pipelines.{}", pipeline_id);
            let signal = pipeline_id.component_type().as_str();
            if !PIPELINE_SIGNALS.contains(&signal) {
                return Err(Error::binding(
                    &path,
                    format!(
                        "unknown signal '{}'; expected one of: {}",
                        signal,
                        PIPELINE_SIGNALS.join(", ")
                    ),
                ));
            }
            if pipeline.receivers.is_empty() {
                return Err(Error::binding(&path, "must have at least one receiver"));
            }
            if pipeline.exporters.is_empty() {
                return Err(Error::binding(&path, "must have at least one exporter"));
            }

            check_references(
                &path,
                "receivers",
                &pipeline.receivers,
                &[&self.receivers, &self.connectors],
            )?;
            check_references(&path, "processors", &pipeline.processors, &[&self.processors])?;
            check_references(
                &path,
                "exporters",
                &pipeline.exporters,
                &[&self.exporters, &self.connectors],
            )?;
        }
        Ok(())
    }
}

fn check_references(
    pipeline_path: &str,
    field: &str,
    ids: &[ComponentId],
    candidates: &[&Configs],
) -> Result<()> {
    for (i, id) in ids.iter().enumerate() {
        if ids[..i].contains(id) {
            return Err(Error::binding(
                format!("{}.{}", pipeline_path, field),
                format!("references '{}' multiple times", id),
            ));
        }
        if !candidates.iter().any(|configs| configs.contains_key(id)) {
            return Err(Error::binding(
                format!("{}.{}", pipeline_path, field),
                format!("references '{}' which is not configured", id),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn id(s: &str) -> ComponentId {
        s.parse().unwrap()
    }

    fn config_with(receivers: &[&str], exporters: &[&str], service: &str) -> Config {
        let mut config = Config::default();
        for r in receivers {
            config.receivers.insert(id(r), Box::new(()));
        }
        for e in exporters {
            config.exporters.insert(id(e), Box::new(()));
        }
        config.service = serde_yaml::from_str(service).unwrap();
        config
    }

    #[test]
    fn test_valid_pipeline() {
        let config = config_with(
            &["otlp"],
            &["debug"],
            "pipelines:\n  traces:\n    receivers: [otlp]\n    exporters: [debug]\n",
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_receiver_reference() {
        let config = config_with(
            &["otlp"],
            &["debug"],
            "pipelines:\n  traces:\n    receivers: [group/x]\n    exporters: [debug]\n",
        );
        let err = config.validate().unwrap_err();

        assert_eq!(err.kind, ErrorKind::Binding);
        assert_eq!(
            err.path.as_deref(),
            Some("service.pipelines.traces.receivers")
        );
        assert!(err.to_string().contains("'group/x' which is not configured"));
    }

    #[test]
    fn test_connector_counts_as_receiver_and_exporter() {
        let mut config = config_with(
            &["otlp"],
            &["debug"],
            r#"
pipelines:
  traces:
    receivers: [otlp]
    exporters: [forward]
  traces/out:
    receivers: [forward]
    exporters: [debug]
"#,
        );
        config.connectors.insert(id("forward"), Box::new(()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_shape_errors() {
        let config = config_with(
            &["otlp"],
            &["debug"],
            "pipelines:\n  spans:\n    receivers: [otlp]\n    exporters: [debug]\n",
        );
        assert!(config.validate().unwrap_err().to_string().contains("unknown signal"));

        let config = config_with(
            &["otlp"],
            &["debug"],
            "pipelines:\n  logs:\n    receivers: [otlp]\n",
        );
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("at least one exporter"));

        let config = config_with(
            &["otlp"],
            &["debug"],
            "pipelines:\n  logs:\n    receivers: [otlp, otlp]\n    exporters: [debug]\n",
        );
        assert!(config
            .validate()
            .unwrap_err()
            .to_string()
            .contains("multiple times"));
    }

    #[test]
    fn test_missing_extension_reference() {
        let config = config_with(&[], &[], "extensions: [health_check]\n");
        let err = config.validate().unwrap_err();
        assert_eq!(err.path.as_deref(), Some("service.extensions"));
    }

    #[test]
    fn test_service_rejects_unknown_fields() {
        let result: std::result::Result<ServiceConfig, _> =
            serde_yaml::from_str("pipelnes: {}\n");
        assert!(result.is_err());
    }
}
