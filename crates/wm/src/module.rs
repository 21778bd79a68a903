//! Window manager module registry
//!
//! Each process builds its own registry. A module is a name plus a factory
//! producing the backend; the core instantiates exactly one per session.

use std::sync::Arc;

use crate::backend::WmBackend;
use crate::backends::stacking::StackingBackend;
use crate::config::Config;
use crate::error::{WmError, WmResult};

type Factory = Arc<dyn Fn(&Config) -> Arc<dyn WmBackend> + Send + Sync>;

#[derive(Clone)]
pub struct WmModule {
    name: String,
    factory: Factory,
}

impl std::fmt::Debug for WmModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WmModule").field("name", &self.name).finish_non_exhaustive()
    }
}

impl WmModule {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instantiate(&self, config: &Config) -> Arc<dyn WmBackend> {
        (self.factory)(config)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: Vec<WmModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the built-in backends
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(StackingBackend::NAME, |config| {
            Arc::new(StackingBackend::new(&config.stacking))
        });
        registry
    }

    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Config) -> Arc<dyn WmBackend> + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(module = %name, "registered window manager module");
        self.modules.push(WmModule {
            name,
            factory: Arc::new(factory),
        });
    }

    /// Find a module by name, ignoring case; without a name the first
    /// registered module is used
    pub fn find(&self, name: Option<&str>) -> WmResult<&WmModule> {
        let found = match name {
            Some(name) => self.modules.iter().find(|m| m.name.eq_ignore_ascii_case(name)),
            None => self.modules.first(),
        };
        found.ok_or_else(|| {
            let wanted = name.unwrap_or("<any>");
            tracing::error!(module = wanted, "window manager module not found");
            WmError::ModuleNotFound(wanted.to_string())
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.modules.iter().map(|m| m.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(registry.find(Some("STACKING")).unwrap().name(), "stacking");
    }

    #[test]
    fn first_module_wins_without_name() {
        let mut registry = ModuleRegistry::builtin();
        registry.register("other", |config| Arc::new(StackingBackend::new(&config.stacking)));
        assert_eq!(registry.find(None).unwrap().name(), "stacking");
    }

    #[test]
    fn unknown_module_is_not_found() {
        let registry = ModuleRegistry::builtin();
        assert_eq!(
            registry.find(Some("unique")).unwrap_err(),
            WmError::ModuleNotFound("unique".into())
        );
        assert!(matches!(ModuleRegistry::new().find(None), Err(WmError::ModuleNotFound(_))));
    }
}
