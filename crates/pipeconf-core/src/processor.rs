//! Configuration processors
//!
//! A config processor rewrites the untyped configuration before it is bound to
//! component factories, e.g. expanding one synthetic component into several
//! concrete ones. Each processor owns a top-level key holding its options; the
//! key is stripped from the tree so it never reaches the binder.
//!
//! Processing runs in two phases over the ordered processor list:
//!
//! 1. every processor's options are extracted, decoded and removed from the tree;
//! 2. the reduced tree becomes a [`PartialConfig`] and each processor transforms it.
//!
//! Both phases stop at the first failure. Mutations made by earlier processors
//! are not rolled back.

use std::any::Any;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::factory::Factories;
use crate::partial::{PartialConfig, SECTION_KEYS};
use crate::value::Value;

/// Decoded processor options, as produced by [`ConfigProcessor::decode_options`]
pub type ProcessorOptions = Box<dyn Any + Send + Sync>;

/// Options for processors that take none; any field is rejected
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NoOptions {}

/// A pluggable pre-binding transformation stage
///
/// Implementations must not keep state between calls: the same instance is
/// reused for every resolution cycle. Most processors implement
/// [`TypedConfigProcessor`] instead and get this trait for free.
pub trait ConfigProcessor: Send + Sync {
    /// Top-level key holding this processor's options
    fn config_key(&self) -> &str;

    /// Decode the options found under [`config_key`](Self::config_key)
    ///
    /// `None` means the key is absent and the defaults apply.
    fn decode_options(&self, conf: Option<Value>) -> Result<ProcessorOptions>;

    /// Rewrite the configuration in place
    fn process(
        &self,
        conf: &mut PartialConfig,
        factories: &Factories,
        options: &(dyn Any + Send + Sync),
    ) -> Result<()>;
}

/// A config processor with a typed options struct
///
/// Options present in the configuration are deep-merged over the serialized
/// `Options::default()` before decoding, so an options block only needs the
/// fields it overrides.
pub trait TypedConfigProcessor: Send + Sync {
    type Options: Serialize + DeserializeOwned + Default + Send + Sync + 'static;

    fn config_key(&self) -> &str;

    fn process(
        &self,
        conf: &mut PartialConfig,
        factories: &Factories,
        options: &Self::Options,
    ) -> Result<()>;
}

impl<P: TypedConfigProcessor> ConfigProcessor for P {
    fn config_key(&self) -> &str {
        TypedConfigProcessor::config_key(self)
    }

    fn decode_options(&self, conf: Option<Value>) -> Result<ProcessorOptions> {
        let defaults = P::Options::default();
        let options = match conf {
            None | Some(Value::Null) => defaults,
            Some(overrides) => {
                let mut merged = Value::encode(&defaults)?;
                merged.merge(overrides);
                merged.decode::<P::Options>()?
            }
        };
        Ok(Box::new(options))
    }

    fn process(
        &self,
        conf: &mut PartialConfig,
        factories: &Factories,
        options: &(dyn Any + Send + Sync),
    ) -> Result<()> {
        let options = options.downcast_ref::<P::Options>().ok_or_else(|| {
            Error::internal(format!(
                "options passed to config processor '{}' have the wrong type",
                TypedConfigProcessor::config_key(self)
            ))
        })?;
        TypedConfigProcessor::process(self, conf, factories, options)
    }
}

/// Check processor keys before they are used
///
/// Keys must be unique plain names and must not shadow a configuration section.
pub fn validate_processors(processors: &[Arc<dyn ConfigProcessor>]) -> Result<()> {
    let mut seen: Vec<&str> = Vec::with_capacity(processors.len());
    for processor in processors {
        let key = processor.config_key();
        if key.is_empty() {
            return Err(Error::invalid_key(key, "config key is empty"));
        }
        if let Some(c) = key.chars().find(|c| matches!(c, '.' | '[' | ']')) {
            return Err(Error::invalid_key(
                key,
                format!("config key contains '{}'", c),
            ));
        }
        if SECTION_KEYS.contains(&key) {
            return Err(Error::reserved_key(key));
        }
        if seen.contains(&key) {
            return Err(Error::duplicate_key(key));
        }
        seen.push(key);
    }
    Ok(())
}

/// Run every processor over `tree`, in order
///
/// With no processors the tree is handed back untouched.
pub fn apply_processors(
    mut tree: Value,
    factories: &Factories,
    processors: &[Arc<dyn ConfigProcessor>],
) -> Result<Value> {
    if processors.is_empty() {
        return Ok(tree);
    }

    // Strip every options block before any processor sees the configuration.
    let mut decoded = Vec::with_capacity(processors.len());
    for processor in processors {
        let key = processor.config_key();
        log::trace!("Extracting options for config processor '{}'", key);

        let sub = tree.as_mapping().and_then(|map| map.get(key)).cloned();
        let options = processor.decode_options(sub).map_err(|e| {
            let message = e.cause.clone().unwrap_or_else(|| e.to_string());
            Error::processor_options(key, message)
        })?;
        if let Some(map) = tree.as_mapping_mut() {
            map.shift_remove(key);
        }
        decoded.push(options);
    }

    let mut partial = PartialConfig::from_value(tree)?;
    for (processor, options) in processors.iter().zip(&decoded) {
        let key = processor.config_key();
        log::debug!("Applying config processor '{}'", key);
        processor
            .process(&mut partial, factories, &**options)
            .map_err(|e| Error::processor_transform(key, e))?;
    }

    Ok(partial.into_value())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::ComponentId;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    fn id(s: &str) -> ComponentId {
        s.parse().unwrap()
    }

    /// Moves a receiver from one id to another
    struct Rename {
        key: &'static str,
        from: &'static str,
        to: &'static str,
    }

    impl TypedConfigProcessor for Rename {
        type Options = NoOptions;

        fn config_key(&self) -> &str {
            self.key
        }

        fn process(&self, conf: &mut PartialConfig, _: &Factories, _: &NoOptions) -> Result<()> {
            let fragment = conf
                .receivers
                .shift_remove(&id(self.from))
                .ok_or_else(|| Error::path_not_found(format!("receivers.{}", self.from)))?;
            conf.receivers.insert(id(self.to), fragment);
            Ok(())
        }
    }

    /// Fails unless a receiver exists, marking it as seen
    struct Require {
        key: &'static str,
        id: &'static str,
    }

    impl TypedConfigProcessor for Require {
        type Options = NoOptions;

        fn config_key(&self) -> &str {
            self.key
        }

        fn process(&self, conf: &mut PartialConfig, _: &Factories, _: &NoOptions) -> Result<()> {
            let fragment = conf
                .receivers
                .get_mut(&id(self.id))
                .ok_or_else(|| Error::path_not_found(format!("receivers.{}", self.id)))?;
            *fragment = yaml("seen: true");
            Ok(())
        }
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct LabelOptions {
        label: String,
        enabled: bool,
    }

    /// Copies its options into every receiver fragment and counts invocations
    struct Label {
        calls: Arc<AtomicUsize>,
    }

    impl TypedConfigProcessor for Label {
        type Options = LabelOptions;

        fn config_key(&self) -> &str {
            "label"
        }

        fn process(
            &self,
            conf: &mut PartialConfig,
            _: &Factories,
            options: &LabelOptions,
        ) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            for fragment in conf.receivers.values_mut() {
                *fragment = Value::encode(options)?;
            }
            Ok(())
        }
    }

    struct Fail;

    impl TypedConfigProcessor for Fail {
        type Options = NoOptions;

        fn config_key(&self) -> &str {
            "fail"
        }

        fn process(&self, _: &mut PartialConfig, _: &Factories, _: &NoOptions) -> Result<()> {
            Err(Error::internal("boom"))
        }
    }

    fn label(calls: &Arc<AtomicUsize>) -> Arc<dyn ConfigProcessor> {
        Arc::new(Label {
            calls: Arc::clone(calls),
        })
    }

    #[test]
    fn test_no_processors_returns_tree_untouched() {
        let tree = yaml("receivers:\n  b: {}\n  a: {}\nunknown: {}\n");
        let out = apply_processors(tree.clone(), &Factories::new(), &[]).unwrap();

        assert_eq!(out, tree);
        let keys: Vec<_> = out
            .get_path("receivers")
            .unwrap()
            .as_mapping()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["b", "a"]);
    }

    #[test]
    fn test_order_is_preserved() {
        let rename: Arc<dyn ConfigProcessor> = Arc::new(Rename {
            key: "p1",
            from: "a",
            to: "b",
        });
        let require: Arc<dyn ConfigProcessor> = Arc::new(Require { key: "p2", id: "b" });
        let tree = yaml("receivers:\n  a: {}\n");

        let out = apply_processors(
            tree.clone(),
            &Factories::new(),
            &[Arc::clone(&rename), Arc::clone(&require)],
        )
        .unwrap();
        assert_eq!(out, yaml("receivers:\n  b: {seen: true}\n"));

        let err = apply_processors(tree, &Factories::new(), &[require, rename]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ProcessorTransform { key: "p2".into() });
        assert_eq!(err.root().kind, ErrorKind::PathNotFound);
        assert_eq!(err.root().path.as_deref(), Some("receivers.b"));
    }

    #[test]
    fn test_options_are_stripped_and_decoded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tree = yaml(
            r#"
label:
  label: edge
receivers:
  otlp: {}
"#,
        );

        let out = apply_processors(tree, &Factories::new(), &[label(&calls)]).unwrap();

        assert_eq!(
            out,
            yaml("receivers:\n  otlp: {label: edge, enabled: false}\n")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_absent_options_use_defaults() {
        let calls = Arc::new(AtomicUsize::new(0));
        let out = apply_processors(
            yaml("receivers:\n  otlp: {}\n"),
            &Factories::new(),
            &[label(&calls)],
        )
        .unwrap();

        assert_eq!(out, yaml("receivers:\n  otlp: {label: \"\", enabled: false}\n"));
    }

    #[test]
    fn test_processor_keys_never_reach_binding() {
        // Another processor's options block must not be visible as a section,
        // even when a processor names a component after a processor key.
        struct AddLabelReceiver;

        impl TypedConfigProcessor for AddLabelReceiver {
            type Options = NoOptions;

            fn config_key(&self) -> &str {
                "adder"
            }

            fn process(&self, conf: &mut PartialConfig, _: &Factories, _: &NoOptions) -> Result<()> {
                conf.receivers.insert(id("label"), Value::Null);
                Ok(())
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let tree = yaml("adder: {}\nlabel: {label: x}\nreceivers: {}\n");
        let out = apply_processors(
            tree,
            &Factories::new(),
            &[Arc::new(AddLabelReceiver), label(&calls)],
        )
        .unwrap();

        let top: Vec<_> = out.as_mapping().unwrap().keys().cloned().collect();
        assert_eq!(top, vec!["receivers"]);
        assert!(out.get_path("receivers.label").is_ok());
    }

    #[test]
    fn test_options_decode_failure_stops_before_processing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tree = yaml("label: {colour: red}\nreceivers:\n  otlp: {}\n");

        let err = apply_processors(tree, &Factories::new(), &[label(&calls)]).unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::ProcessorOptions {
                key: "label".into()
            }
        );
        assert!(err.to_string().contains("colour"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failure_aborts_remaining_processors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tree = yaml("receivers:\n  a: {}\n");

        let err = apply_processors(
            tree,
            &Factories::new(),
            &[
                Arc::new(Rename {
                    key: "p1",
                    from: "a",
                    to: "b",
                }),
                Arc::new(Fail),
                label(&calls),
            ],
        )
        .unwrap_err();

        assert_eq!(
            err.kind,
            ErrorKind::ProcessorTransform {
                key: "fail".into()
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_section_after_stripping_fails() {
        let calls = Arc::new(AtomicUsize::new(0));
        let tree = yaml("labels: {}\nreceivers: {}\n");

        let err = apply_processors(tree, &Factories::new(), &[label(&calls)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PartialConfig);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_validate_processors() {
        let calls = Arc::new(AtomicUsize::new(0));
        assert!(validate_processors(&[label(&calls), Arc::new(Fail)]).is_ok());

        let err = validate_processors(&[label(&calls), label(&calls)]).unwrap_err();
        assert!(err.to_string().contains("already registered"));

        let err = validate_processors(&[Arc::new(Require {
            key: "service",
            id: "a",
        })])
        .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Registration {
                key: "service".into()
            }
        );
    }

    #[test]
    fn test_validate_rejects_path_like_keys() {
        for key in ["", "edge.tls", "edge[0]", "edge]"] {
            let err = validate_processors(&[Arc::new(Require { key, id: "a" })]).unwrap_err();
            assert_eq!(err.kind, ErrorKind::Registration { key: key.into() });
        }

        let err = validate_processors(&[Arc::new(Require {
            key: "edge.tls",
            id: "a",
        })])
        .unwrap_err();
        assert!(err.to_string().contains("contains '.'"));
    }

    #[test]
    fn test_options_key_is_matched_literally() {
        // Nested mappings and look-alike keys are not the processor's options.
        let tree = yaml(
            r#"
edge-tls: {}
edge:
  tls: {}
receivers:
  a: {}
"#,
        );
        let require: Arc<dyn ConfigProcessor> = Arc::new(Require {
            key: "edge-tls",
            id: "a",
        });

        let err = apply_processors(tree, &Factories::new(), &[require]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::PartialConfig);
        assert_eq!(err.path.as_deref(), Some("edge"));

        let tree = yaml("edge-tls: {}\nreceivers:\n  a: {}\n");
        let require: Arc<dyn ConfigProcessor> = Arc::new(Require {
            key: "edge-tls",
            id: "a",
        });
        let out = apply_processors(tree, &Factories::new(), &[require]).unwrap();
        assert_eq!(out, yaml("receivers:\n  a: {seen: true}\n"));
    }

    #[test]
    fn test_non_mapping_tree_has_no_options() {
        let calls = Arc::new(AtomicUsize::new(0));
        let err = apply_processors(yaml("[label]"), &Factories::new(), &[label(&calls)])
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::PartialConfig);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
