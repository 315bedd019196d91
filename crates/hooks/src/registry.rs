use std::sync::Arc;

use arc_swap::ArcSwapOption;
use thiserror::Error;

use crate::module::PolicyModule;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("a policy module is already installed")]
    AlreadyInstalled,
}

/// Process-wide slot for the loaded policy module. Installed once at
/// startup; replaced only by atomic swap, so in-flight queries keep the
/// module they started with.
pub struct ModuleRegistry {
    slot: ArcSwapOption<PolicyModule>,
}

impl ModuleRegistry {
    pub const fn new() -> Self {
        Self {
            slot: ArcSwapOption::const_empty(),
        }
    }

    /// Install the module loaded at startup. Installing twice is a
    /// configuration error; use [`ModuleRegistry::swap`] to reload.
    pub fn install(&self, module: PolicyModule) -> Result<Arc<PolicyModule>, LoadError> {
        if self.slot.load_full().is_some() {
            return Err(LoadError::AlreadyInstalled);
        }
        let module = Arc::new(module);
        self.slot.store(Some(module.clone()));
        Ok(module)
    }

    /// Atomically replace the module, returning the previous one.
    pub fn swap(&self, module: PolicyModule) -> Option<Arc<PolicyModule>> {
        self.slot.swap(Some(Arc::new(module)))
    }

    pub fn current(&self) -> Option<Arc<PolicyModule>> {
        self.slot.load_full()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: ModuleRegistry = ModuleRegistry::new();

/// The process-wide registry.
pub fn global() -> &'static ModuleRegistry {
    &GLOBAL
}
