//! Component factories
//!
//! A [`Factory`] knows the configuration shape of one component type: its
//! defaults, an optional JSON schema, and how to turn an untyped fragment into
//! a typed [`ComponentConfig`]. [`Factories`] groups the factories of every
//! kind and is handed, read-only, to each config processor and to the binder.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::component::{Kind, Type};
use crate::error::{Error, Result};
use crate::schema::Schema;
use crate::value::Value;

/// A typed component configuration produced by a factory
pub trait ComponentConfig: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any + fmt::Debug + Send + Sync> ComponentConfig for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl dyn ComponentConfig {
    /// Downcast to the concrete configuration type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

/// Builds the typed configuration of one component type
pub trait Factory: Send + Sync {
    /// The component type this factory handles
    fn component_type(&self) -> &Type;

    /// Default configuration, used as the base every fragment is merged onto
    fn default_config(&self) -> Result<Value>;

    /// Schema the merged fragment must satisfy, if any
    fn schema(&self) -> Option<&Schema> {
        None
    }

    /// Convert a merged fragment into the typed configuration
    fn unmarshal(&self, conf: Value) -> Result<Box<dyn ComponentConfig>>;
}

/// A factory for any serde-deserializable configuration struct
///
/// Unknown fields are rejected only if `T` says so
/// (`#[serde(deny_unknown_fields)]`).
pub struct SerdeFactory<T> {
    ty: Type,
    schema: Option<Schema>,
    _config: PhantomData<fn() -> T>,
}

impl<T> SerdeFactory<T>
where
    T: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static,
{
    pub fn new(ty: &str) -> Result<Self> {
        Ok(Self {
            ty: Type::new(ty)?,
            schema: None,
            _config: PhantomData,
        })
    }

    /// Attach a schema checked before unmarshalling
    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = Some(schema);
        self
    }
}

impl<T> Factory for SerdeFactory<T>
where
    T: Serialize + DeserializeOwned + Default + fmt::Debug + Send + Sync + 'static,
{
    fn component_type(&self) -> &Type {
        &self.ty
    }

    fn default_config(&self) -> Result<Value> {
        Value::encode(&T::default())
    }

    fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn unmarshal(&self, conf: Value) -> Result<Box<dyn ComponentConfig>> {
        let config: T = conf.decode()?;
        Ok(Box::new(config))
    }
}

/// Registered factories, one map per component kind
#[derive(Clone, Default)]
pub struct Factories {
    receivers: IndexMap<Type, Arc<dyn Factory>>,
    processors: IndexMap<Type, Arc<dyn Factory>>,
    exporters: IndexMap<Type, Arc<dyn Factory>>,
    connectors: IndexMap<Type, Arc<dyn Factory>>,
    extensions: IndexMap<Type, Arc<dyn Factory>>,
}

impl Factories {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: Kind) -> &IndexMap<Type, Arc<dyn Factory>> {
        match kind {
            Kind::Receiver => &self.receivers,
            Kind::Processor => &self.processors,
            Kind::Exporter => &self.exporters,
            Kind::Connector => &self.connectors,
            Kind::Extension => &self.extensions,
        }
    }

    fn map_mut(&mut self, kind: Kind) -> &mut IndexMap<Type, Arc<dyn Factory>> {
        match kind {
            Kind::Receiver => &mut self.receivers,
            Kind::Processor => &mut self.processors,
            Kind::Exporter => &mut self.exporters,
            Kind::Connector => &mut self.connectors,
            Kind::Extension => &mut self.extensions,
        }
    }

    /// Register a factory; each type may be registered once per kind
    pub fn register(&mut self, kind: Kind, factory: Arc<dyn Factory>) -> Result<()> {
        let ty = factory.component_type().clone();
        let map = self.map_mut(kind);
        if map.contains_key(&ty) {
            return Err(Error::duplicate_key(format!("{} factory '{}'", kind, ty)));
        }
        map.insert(ty, factory);
        Ok(())
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, kind: Kind, factory: impl Factory + 'static) -> Result<Self> {
        self.register(kind, Arc::new(factory))?;
        Ok(self)
    }

    /// Look up the factory for a component type
    pub fn get(&self, kind: Kind, ty: &Type) -> Option<&Arc<dyn Factory>> {
        self.map(kind).get(ty)
    }

    /// Registered types of a kind, in registration order
    pub fn types(&self, kind: Kind) -> impl Iterator<Item = &Type> {
        self.map(kind).keys()
    }
}

impl fmt::Debug for Factories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Factories");
        for kind in Kind::ALL {
            let types: Vec<&str> = self.types(kind).map(Type::as_str).collect();
            dbg.field(kind.section(), &types);
        }
        dbg.finish()
    }
}
