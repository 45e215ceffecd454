/// Registry of device factories, keyed by backend
///
/// The core registers the legacy backend; other backend crates register
/// themselves (see `galaxy_rhi_vulkan::register`). The requested backend is
/// resolved once, at startup.

use rustc_hash::FxHashMap;

use crate::backend::RhiType;
use crate::backend::legacy::LegacyDevice;
use crate::config::RhiConfig;
use crate::device::SharedDevice;
use crate::error::{Error, Result};
use crate::{rhi_info, rhi_warn};

const SOURCE: &str = "galaxy_rhi::BackendRegistry";

/// Creates a device for a configuration
pub type DeviceFactory = Box<dyn Fn(&RhiConfig) -> Result<SharedDevice> + Send + Sync>;

/// Map of backend to device factory
pub struct BackendRegistry {
    factories: FxHashMap<RhiType, DeviceFactory>,
}

impl BackendRegistry {
    /// Registry without any backend
    pub fn empty() -> Self {
        Self { factories: FxHashMap::default() }
    }

    /// Registry with the built-in legacy backend
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(RhiType::Legacy, |config| LegacyDevice::create_shared(config));
        registry
    }

    /// Register (or replace) the factory of `rhi_type`
    pub fn register<F>(&mut self, rhi_type: RhiType, factory: F)
    where
        F: Fn(&RhiConfig) -> Result<SharedDevice> + Send + Sync + 'static,
    {
        if self.factories.insert(rhi_type, Box::new(factory)).is_some() {
            rhi_warn!(SOURCE, "Backend '{}' registered twice, replacing", rhi_type);
        }
    }

    pub fn is_registered(&self, rhi_type: RhiType) -> bool {
        self.factories.contains_key(&rhi_type)
    }

    /// Registered backends
    pub fn backends(&self) -> Vec<RhiType> {
        let mut backends: Vec<RhiType> = self.factories.keys().copied().collect();
        backends.sort_by_key(|b| b.name());
        backends
    }

    /// Create the device requested by `config`
    ///
    /// An unregistered backend falls back to [`RhiType::default`] when
    /// `config.allow_fallback` is set. Errors raised by the factory itself
    /// are returned as is.
    pub fn create_device(&self, config: &RhiConfig) -> Result<SharedDevice> {
        let requested = config.rhi_type;
        let (rhi_type, factory) = match self.factories.get(&requested) {
            Some(factory) => (requested, factory),
            None => {
                let fallback = RhiType::default();
                match self.factories.get(&fallback) {
                    Some(factory) if config.allow_fallback => {
                        rhi_warn!(
                            SOURCE,
                            "Backend '{}' is not available, falling back to '{}'",
                            requested,
                            fallback
                        );
                        (fallback, factory)
                    }
                    _ => {
                        return Err(Error::UnsupportedBackend(format!(
                            "backend '{}' is not registered", requested
                        )));
                    }
                }
            }
        };

        let device = factory(config)?;
        rhi_info!(SOURCE, "Created '{}' device", rhi_type);
        Ok(device)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
#[path = "backend_registry_tests.rs"]
mod tests;
