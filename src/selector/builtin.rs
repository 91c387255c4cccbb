//! Built-in selector plugins

use production_model::Activity;
use serde::Deserialize;

use super::{parse_settings, CellSelector, CellSelectorConfig};
use crate::cell::{CellId, CellRef};
use crate::error::SelectorError;

// ---------------------------------------------------------------------------
// ToolingSelector
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ToolingSettings {
    tool_parameter: String,
}

impl Default for ToolingSettings {
    fn default() -> Self {
        Self {
            tool_parameter: ToolingSelector::DEFAULT_TOOL_PARAMETER.to_string(),
        }
    }
}

/// Keeps cells that have the tool the activity asks for.
///
/// The tool is read from an activity parameter (default `tool`). Activities
/// without that parameter accept every cell.
#[derive(Debug)]
pub struct ToolingSelector {
    tool_parameter: String,
}

impl ToolingSelector {
    pub const PLUGIN_NAME: &'static str = "tooling";
    pub const DEFAULT_TOOL_PARAMETER: &'static str = "tool";

    pub fn new() -> Self {
        Self {
            tool_parameter: Self::DEFAULT_TOOL_PARAMETER.to_string(),
        }
    }

    pub fn tool_parameter(&self) -> &str {
        &self.tool_parameter
    }
}

impl Default for ToolingSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl CellSelector for ToolingSelector {
    fn name(&self) -> &str {
        Self::PLUGIN_NAME
    }

    fn initialize(&mut self, config: &CellSelectorConfig) -> Result<(), SelectorError> {
        let settings: ToolingSettings = parse_settings(Self::PLUGIN_NAME, &config.settings)?;
        self.tool_parameter = settings.tool_parameter;
        Ok(())
    }

    fn select_cells(
        &self,
        activity: &Activity,
        available: &[CellRef],
    ) -> Result<Vec<CellRef>, SelectorError> {
        let tool = match activity.parameter(&self.tool_parameter) {
            None => return Ok(available.to_vec()),
            Some(serde_json::Value::String(tool)) => tool,
            Some(other) => {
                return Err(SelectorError::failed(
                    Self::PLUGIN_NAME,
                    format!(
                        "parameter '{}' of activity {} is not a string: {}",
                        self.tool_parameter,
                        activity.id(),
                        other
                    ),
                ))
            }
        };

        Ok(available
            .iter()
            .filter(|cell| cell.profile().has_tool(tool))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// LoadBalancingSelector
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoadBalancingSettings {
    max_load: Option<u32>,
}

/// Orders cells by ascending load; ties keep their incoming order.
/// With `max_load` set, busier cells are dropped.
#[derive(Debug, Default)]
pub struct LoadBalancingSelector {
    max_load: Option<u32>,
}

impl LoadBalancingSelector {
    pub const PLUGIN_NAME: &'static str = "load-balancing";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_load(mut self, max_load: u32) -> Self {
        self.max_load = Some(max_load);
        self
    }
}

impl CellSelector for LoadBalancingSelector {
    fn name(&self) -> &str {
        Self::PLUGIN_NAME
    }

    fn initialize(&mut self, config: &CellSelectorConfig) -> Result<(), SelectorError> {
        let settings: LoadBalancingSettings = parse_settings(Self::PLUGIN_NAME, &config.settings)?;
        self.max_load = settings.max_load;
        Ok(())
    }

    fn select_cells(
        &self,
        _activity: &Activity,
        available: &[CellRef],
    ) -> Result<Vec<CellRef>, SelectorError> {
        let mut loaded: Vec<(u32, CellRef)> = available
            .iter()
            .map(|cell| (cell.profile().load, cell.clone()))
            .filter(|(load, _)| self.max_load.map_or(true, |max| *load <= max))
            .collect();

        // sort_by_key is stable
        loaded.sort_by_key(|(load, _)| *load);

        Ok(loaded.into_iter().map(|(_, cell)| cell).collect())
    }
}

// ---------------------------------------------------------------------------
// PreferenceSelector
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PreferenceSettings {
    preferred: Vec<CellId>,
}

/// Moves operator-preferred cells to the front, in configured order.
/// All other cells follow in their incoming order.
#[derive(Debug, Default)]
pub struct PreferenceSelector {
    preferred: Vec<CellId>,
}

impl PreferenceSelector {
    pub const PLUGIN_NAME: &'static str = "preference";

    pub fn new(preferred: Vec<CellId>) -> Self {
        Self { preferred }
    }

    pub fn preferred(&self) -> &[CellId] {
        &self.preferred
    }
}

impl CellSelector for PreferenceSelector {
    fn name(&self) -> &str {
        Self::PLUGIN_NAME
    }

    fn initialize(&mut self, config: &CellSelectorConfig) -> Result<(), SelectorError> {
        let settings: PreferenceSettings = parse_settings(Self::PLUGIN_NAME, &config.settings)?;
        self.preferred = settings.preferred;
        Ok(())
    }

    fn select_cells(
        &self,
        _activity: &Activity,
        available: &[CellRef],
    ) -> Result<Vec<CellRef>, SelectorError> {
        let mut ranked: Vec<CellRef> = Vec::with_capacity(available.len());

        for id in &self.preferred {
            let already_ranked = ranked.iter().any(|cell| cell.id() == *id);
            if already_ranked {
                continue;
            }
            if let Some(cell) = available.iter().find(|cell| cell.id() == *id) {
                ranked.push(cell.clone());
            }
        }

        ranked.extend(
            available
                .iter()
                .filter(|cell| !self.preferred.contains(&cell.id()))
                .cloned(),
        );

        Ok(ranked)
    }
}
