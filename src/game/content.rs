use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;

type Asset = Arc<dyn Any + Send + Sync>;

///Name-keyed cache of loaded assets. What an asset is and how it is read is up to the loader.
#[derive(Default)]
pub struct ContentManager {
    assets: HashMap<String, Asset>,
}

impl ContentManager {
    pub fn new() -> Self {
        Self::default()
    }

    ///Returns the cached asset called `name`, or loads and caches it.
    ///Asking for a cached name as a different type is an error.
    pub fn load_with<T, F>(&mut self, name: &str, loader: F) -> anyhow::Result<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> anyhow::Result<T>,
    {
        if let Some(asset) = self.assets.get(name) {
            return asset.clone().downcast::<T>().map_err(|_| {
                anyhow!(
                    "asset {} is already loaded as a different type than {}",
                    name,
                    std::any::type_name::<T>()
                )
            });
        }

        let asset = Arc::new(loader()?);
        self.assets.insert(name.to_owned(), asset.clone());
        log::debug!("Loaded asset {}", name);
        Ok(asset)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.assets.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    ///Drops every cached asset.
    pub fn unload(&mut self) {
        if !self.assets.is_empty() {
            log::debug!("Unloading {} assets", self.assets.len());
        }
        self.assets.clear();
    }
}

impl std::fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.assets.keys()).finish()
    }
}
