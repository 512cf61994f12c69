//! Typed lookup for the collaborators the application loop needs (device manager, device
//! service, ...). Keys are types, usually `dyn Trait`, so "does the provider satisfy the
//! capability" is answered by the compiler when `add` is called.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::ConfigurationError;

type Entry = (&'static str, Box<dyn Any + Send + Sync>);

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<TypeId, Entry>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    ///Registers `provider` under `T`. Fails if something is already registered for `T`.
    pub fn add<T>(&self, provider: Arc<T>) -> Result<(), ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let name = std::any::type_name::<T>();
        let mut services = self.services.write().unwrap_or_else(|e| e.into_inner());
        if services.contains_key(&TypeId::of::<T>()) {
            return Err(ConfigurationError::AlreadyRegistered(name));
        }
        let provider: Box<dyn Any + Send + Sync> = Box::new(provider);
        services.insert(TypeId::of::<T>(), (name, provider));
        log::debug!("Registered service {}", name);
        Ok(())
    }

    ///Returns the removed provider, if there was one.
    pub fn remove<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let (_, provider) = self
            .services
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&TypeId::of::<T>())?;
        provider.downcast::<Arc<T>>().ok().map(|boxed| *boxed)
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<T>())
            .and_then(|(_, provider)| provider.downcast_ref::<Arc<T>>())
            .cloned()
    }

    ///Like `get`, but a missing provider is an error.
    pub fn require<T>(&self) -> Result<Arc<T>, ConfigurationError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>()
            .ok_or(ConfigurationError::MissingService(std::any::type_name::<T>()))
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let services = self.services.read().unwrap_or_else(|e| e.into_inner());
        f.debug_list()
            .entries(services.values().map(|(name, _)| name))
            .finish()
    }
}
