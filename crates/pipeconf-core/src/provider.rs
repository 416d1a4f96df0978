//! Configuration provider
//!
//! The [`ConfigProvider`] drives one resolution cycle per [`get`](ConfigProvider::get):
//! fetch the raw tree from the resolver, run the config processors over it,
//! and bind the result to the component factories.

use std::sync::Arc;

use crate::binder;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::factory::Factories;
use crate::processor::{apply_processors, validate_processors, ConfigProcessor};
use crate::resolver::{ChangeStream, MapResolver};

/// Everything a [`ConfigProvider`] is built from
pub struct ConfigProviderSettings {
    /// Source of the raw configuration tree
    pub resolver: Box<dyn MapResolver>,
    /// Config processors, applied in this order
    pub config_processors: Vec<Arc<dyn ConfigProcessor>>,
}

impl ConfigProviderSettings {
    pub fn new(resolver: impl MapResolver + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            config_processors: Vec::new(),
        }
    }

    /// Append a config processor
    pub fn with_processor(mut self, processor: impl ConfigProcessor + 'static) -> Self {
        self.config_processors.push(Arc::new(processor));
        self
    }
}

/// Produces typed configurations from a raw resolver
///
/// # Example
///
/// ```ignore
/// use pipeconf_core::{ConfigProvider, ConfigProviderSettings, FileResolver, FileSpec};
///
/// let settings = ConfigProviderSettings::new(FileResolver::new(vec![
///     FileSpec::required("collector.yaml"),
/// ]));
/// let provider = ConfigProvider::new(settings)?;
///
/// let config = provider.get(&factories).await?;
/// let mut changes = provider.watch();
/// while let Some(event) = changes.recv().await {
///     event?;
///     let config = provider.get(&factories).await?;
/// }
/// provider.shutdown().await?;
/// ```
pub struct ConfigProvider {
    resolver: Box<dyn MapResolver>,
    processors: Arc<[Arc<dyn ConfigProcessor>]>,
}

impl ConfigProvider {
    /// Build a provider, rejecting reserved or duplicate processor keys
    pub fn new(settings: ConfigProviderSettings) -> Result<Self> {
        validate_processors(&settings.config_processors)?;
        Ok(Self {
            resolver: settings.resolver,
            processors: settings.config_processors.into(),
        })
    }

    /// Keys of the registered processors, in application order
    pub fn processor_keys(&self) -> impl Iterator<Item = &str> {
        self.processors.iter().map(|p| p.config_key())
    }

    /// Resolve, process and bind the configuration
    ///
    /// Dropping the returned future cancels the cycle.
    pub async fn get(&self, factories: &Factories) -> Result<Config> {
        let tree = self.resolver.resolve().await.map_err(Error::resolution)?;
        log::debug!("Resolved configuration, applying {} processor(s)", self.processors.len());

        let tree = apply_processors(tree, factories, &self.processors)?;

        let config = binder::unmarshal(tree, factories)?;
        log::debug!(
            "Bound {} receiver(s), {} processor(s), {} exporter(s)",
            config.receivers.len(),
            config.processors.len(),
            config.exporters.len()
        );
        Ok(config)
    }

    /// Subscribe to source changes
    pub fn watch(&self) -> ChangeStream {
        self.resolver.watch()
    }

    /// Release the resolver; every outstanding [`ChangeStream`] ends
    pub async fn shutdown(self) -> Result<()> {
        log::info!("Shutting down configuration provider");
        self.resolver.shutdown().await
    }
}
