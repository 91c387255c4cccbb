//! Dispatcher configuration - load from YAML, build the selector pipeline.
//!
//! ```yaml
//! engine_name: line-1
//! selectors:
//!   - plugin_name: tooling
//!     sort_order: 0
//!   - plugin_name: load-balancing
//!     sort_order: 1
//!   - plugin_name: preference
//!     sort_order: 2
//!     settings: { preferred: [3, 1] }
//! simulation:
//!   execution_time_ms: 20
//!   cells:
//!     - { id: 1, tools: [drill] }
//!     - { id: 2, load: 3 }
//! ```

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use production_model::ActivityClassification;
use serde::{Deserialize, Serialize};

use crate::cell::{CellId, CellProfile, SimulatedCellConfig};
use crate::error::SelectorError;
use crate::selector::{CellSelectorConfig, CellSelectorPipeline, SelectorRegistry};

/// Root dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Name the coordinator announces to cells.
    pub engine_name: String,

    /// Selector pipeline stages, in any order.
    pub selectors: Vec<CellSelectorConfig>,

    /// Simulated cells for the sim harness.
    pub simulation: SimulationConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            engine_name: "cell-dispatch".to_string(),
            selectors: Vec::new(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl DispatcherConfig {
    /// Load from a YAML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Parsing {}", path.display()))
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Build the selector pipeline from the configured stages.
    pub fn build_pipeline(
        &self,
        registry: &SelectorRegistry,
    ) -> Result<CellSelectorPipeline, SelectorError> {
        CellSelectorPipeline::from_configs(registry, &self.selectors)
    }

    /// Set the engine name.
    pub fn engine_name(mut self, name: impl Into<String>) -> Self {
        self.engine_name = name.into();
        self
    }

    /// Append a selector stage.
    pub fn selector(mut self, config: CellSelectorConfig) -> Self {
        self.selectors.push(config);
        self
    }
}

/// Simulation harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time a simulated cell needs per activity (milliseconds).
    pub execution_time_ms: u64,

    /// Result code simulated cells report.
    pub result_code: i64,

    pub cells: Vec<SimulatedCellEntry>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            execution_time_ms: 50,
            result_code: 0,
            cells: Vec::new(),
        }
    }
}

impl SimulationConfig {
    /// Get execution time as Duration.
    pub fn execution_time(&self) -> Duration {
        Duration::from_millis(self.execution_time_ms)
    }

    /// Cell setups for every configured entry
    pub fn cell_configs(&self) -> Vec<SimulatedCellConfig> {
        self.cells
            .iter()
            .map(|entry| {
                let name = entry
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Cell {}", entry.id));
                let profile = entry
                    .tools
                    .iter()
                    .fold(CellProfile::default(), |profile, tool| profile.with_tool(tool))
                    .with_load(entry.load);

                SimulatedCellConfig::new(entry.id, name)
                    .with_classification(entry.classification)
                    .with_profile(profile)
                    .with_execution_time(self.execution_time())
                    .with_result_code(self.result_code)
            })
            .collect()
    }
}

/// One simulated cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCellEntry {
    pub id: CellId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub classification: ActivityClassification,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub load: u32,
}
