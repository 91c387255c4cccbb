//! Cell selection
//!
//! Before an activity is bound, the candidate cells run through an ordered
//! pipeline of selectors. Each selector filters and/or ranks the output of
//! the previous one. Selectors are plugins: they are built by name from a
//! `CellSelectorConfig` through the `SelectorRegistry`.
//!
//! ## Cancellation
//!
//! The async path observes a `CancellationSignal` before and during every
//! stage. A cancelled selection yields `SelectorError::Cancelled`, never a
//! partial candidate list.

mod builtin;
mod pipeline;
mod registry;

pub use builtin::{LoadBalancingSelector, PreferenceSelector, ToolingSelector};
pub use pipeline::CellSelectorPipeline;
pub use registry::{SelectorFactory, SelectorRegistry};

use production_model::Activity;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::cell::CellRef;
use crate::error::SelectorError;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Configuration of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSelectorConfig {
    /// Registered plugin name, e.g. "tooling"
    pub plugin_name: String,

    /// Position in the pipeline. Lower runs first; equal orders keep
    /// configuration order.
    #[serde(default)]
    pub sort_order: i32,

    /// Plugin-specific settings, interpreted in `initialize`
    #[serde(default)]
    pub settings: serde_yaml::Value,
}

impl CellSelectorConfig {
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            sort_order: 0,
            settings: serde_yaml::Value::Null,
        }
    }

    pub fn with_sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn with_settings(mut self, settings: serde_yaml::Value) -> Self {
        self.settings = settings;
        self
    }
}

/// Decode plugin settings. Absent settings yield the plugin defaults.
pub fn parse_settings<T>(plugin: &str, settings: &serde_yaml::Value) -> Result<T, SelectorError>
where
    T: DeserializeOwned + Default,
{
    if settings.is_null() {
        return Ok(T::default());
    }
    serde_yaml::from_value(settings.clone()).map_err(|e| SelectorError::invalid_config(plugin, e))
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Owner side of a cancellation flag
#[derive(Debug)]
pub struct CancellationSource {
    sender: watch::Sender<bool>,
}

impl CancellationSource {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal::from_receiver(self.sender.subscribe())
    }

    /// Trip the flag. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for CancellationSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer side of a cancellation flag
#[derive(Debug, Clone)]
pub struct CancellationSignal {
    receiver: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        Self { receiver: None }
    }

    /// Observe an existing shutdown flag (`true` = cancelled)
    pub fn from_receiver(receiver: watch::Receiver<bool>) -> Self {
        Self {
            receiver: Some(receiver),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.receiver
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Resolves once the flag is set. Pending forever if the source is
    /// dropped without cancelling.
    pub async fn cancelled(&self) {
        let Some(receiver) = &self.receiver else {
            return std::future::pending().await;
        };

        let mut receiver = receiver.clone();
        loop {
            if *receiver.borrow_and_update() {
                return;
            }
            if receiver.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

impl Default for CancellationSignal {
    fn default() -> Self {
        Self::never()
    }
}

// ---------------------------------------------------------------------------
// CellSelector
// ---------------------------------------------------------------------------

/// One stage of the cell selection pipeline.
///
/// Implementations must be deterministic for the same inputs and may return
/// an empty list. The input slice is never modified; the result is a new list.
#[async_trait::async_trait]
pub trait CellSelector: Send + Sync {
    fn name(&self) -> &str;

    /// Apply configuration. Called once, right after construction.
    fn initialize(&mut self, config: &CellSelectorConfig) -> Result<(), SelectorError> {
        let _ = config;
        Ok(())
    }

    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn select_cells(
        &self,
        activity: &Activity,
        available: &[CellRef],
    ) -> Result<Vec<CellRef>, SelectorError>;

    /// Async variant. Defaults to the sync path.
    async fn select_cells_async(
        &self,
        activity: &Activity,
        available: &[CellRef],
        cancel: &CancellationSignal,
    ) -> Result<Vec<CellRef>, SelectorError> {
        let _ = cancel;
        self.select_cells(activity, available)
    }
}
