//! SelectorRegistry - plugin name to selector factory

use std::collections::BTreeMap;

use super::{
    CellSelector, CellSelectorConfig, LoadBalancingSelector, PreferenceSelector, ToolingSelector,
};
use crate::error::SelectorError;

/// Builds a fresh, uninitialized selector
pub type SelectorFactory = Box<dyn Fn() -> Box<dyn CellSelector> + Send + Sync>;

/// Registry of named selector plugins
pub struct SelectorRegistry {
    factories: BTreeMap<String, SelectorFactory>,
}

impl SelectorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with the built-in plugins
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(ToolingSelector::PLUGIN_NAME, || {
            Box::new(ToolingSelector::new())
        });
        registry.register(LoadBalancingSelector::PLUGIN_NAME, || {
            Box::new(LoadBalancingSelector::new())
        });
        registry.register(PreferenceSelector::PLUGIN_NAME, || {
            Box::new(PreferenceSelector::default())
        });
        registry
    }

    /// Register a plugin. A later registration under the same name wins.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn CellSelector> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Construct and initialize the selector named by `config`
    pub fn create(&self, config: &CellSelectorConfig) -> Result<Box<dyn CellSelector>, SelectorError> {
        let factory = self
            .factories
            .get(&config.plugin_name)
            .ok_or_else(|| SelectorError::UnknownPlugin(config.plugin_name.clone()))?;

        let mut selector = factory();
        selector.initialize(config)?;

        tracing::debug!(
            plugin = %config.plugin_name,
            sort_order = config.sort_order,
            "Cell selector created"
        );
        Ok(selector)
    }
}

impl Default for SelectorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for SelectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectorRegistry")
            .field("plugins", &self.plugin_names())
            .finish()
    }
}
