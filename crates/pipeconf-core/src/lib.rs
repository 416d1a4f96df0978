//! pipeconf-core: configuration resolution and processing for telemetry collectors
//!
//! This crate turns raw configuration sources into typed component
//! configurations in three stages:
//!
//! 1. a [`MapResolver`] produces an untyped [`Value`] tree;
//! 2. config processors rewrite the tree as a [`PartialConfig`];
//! 3. the [`binder`] binds every component to its [`Factory`].
//!
//! [`ConfigProvider`] ties the stages together and relays change
//! notifications from the resolver.
//!
//! # Example
//!
//! ```
//! use pipeconf_core::{apply_processors, Factories, Value};
//!
//! let tree: Value = serde_yaml::from_str(
//!     r#"
//! receivers:
//!   otlp: {}
//! "#,
//! )
//! .unwrap();
//!
//! // With no processors the tree passes through unchanged
//! let out = apply_processors(tree.clone(), &Factories::new(), &[]).unwrap();
//! assert_eq!(out, tree);
//! ```

pub mod binder;
pub mod component;
pub mod config;
pub mod error;
pub mod factory;
pub mod partial;
pub mod processor;
pub mod provider;
pub mod resolver;
pub mod schema;
pub mod value;

pub use component::{ComponentId, Kind, Type};
pub use config::{Config, PipelineConfig, ServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use factory::{ComponentConfig, Factories, Factory, SerdeFactory};
pub use partial::PartialConfig;
pub use processor::{
    apply_processors, ConfigProcessor, NoOptions, ProcessorOptions, TypedConfigProcessor,
};
pub use provider::{ConfigProvider, ConfigProviderSettings};
pub use resolver::{
    ChangeStream, FileResolver, FileResolverOptions, FileSpec, MapResolver, StaticResolver,
};
pub use schema::Schema;
pub use value::Value;
