//! CellSelectorPipeline - ordered chain of selector stages

use production_model::Activity;

use super::{CancellationSignal, CellSelector, CellSelectorConfig, SelectorRegistry};
use crate::cell::CellRef;
use crate::error::SelectorError;

struct Stage {
    sort_order: i32,
    selector: Box<dyn CellSelector>,
}

/// Runs selectors in ascending `sort_order`, each on the previous output
#[derive(Default)]
pub struct CellSelectorPipeline {
    stages: Vec<Stage>,
}

impl CellSelectorPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured stage through the registry
    pub fn from_configs(
        registry: &SelectorRegistry,
        configs: &[CellSelectorConfig],
    ) -> Result<Self, SelectorError> {
        let mut pipeline = Self::new();
        for config in configs {
            let selector = registry.create(config)?;
            pipeline.add(config.sort_order, selector);
        }
        Ok(pipeline)
    }

    /// Insert a stage behind every stage with an order <= `sort_order`
    pub fn add(&mut self, sort_order: i32, selector: Box<dyn CellSelector>) {
        let position = self
            .stages
            .iter()
            .position(|stage| stage.sort_order > sort_order)
            .unwrap_or(self.stages.len());
        self.stages.insert(
            position,
            Stage {
                sort_order,
                selector,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.selector.name()).collect()
    }

    pub fn start(&mut self) {
        for stage in &mut self.stages {
            stage.selector.start();
        }
    }

    pub fn stop(&mut self) {
        for stage in self.stages.iter_mut().rev() {
            stage.selector.stop();
        }
    }

    /// Filter and rank `available` for `activity`.
    ///
    /// A failing stage is logged and yields no candidates at all.
    pub fn select_cells(&self, activity: &Activity, available: &[CellRef]) -> Vec<CellRef> {
        let mut candidates = available.to_vec();

        for stage in &self.stages {
            if candidates.is_empty() {
                break;
            }
            match stage.selector.select_cells(activity, &candidates) {
                Ok(selected) => candidates = selected,
                Err(e) => {
                    tracing::warn!(
                        selector = stage.selector.name(),
                        activity_id = activity.id(),
                        error = %e,
                        "Cell selector failed, no candidates"
                    );
                    return Vec::new();
                }
            }
        }

        candidates
    }

    /// Async variant. Each stage completes before the next starts; a
    /// cancellation observed at any point aborts the whole selection.
    pub async fn select_cells_async(
        &self,
        activity: &Activity,
        available: &[CellRef],
        cancel: &CancellationSignal,
    ) -> Result<Vec<CellRef>, SelectorError> {
        let mut candidates = available.to_vec();

        for stage in &self.stages {
            if cancel.is_cancelled() {
                return Err(SelectorError::Cancelled);
            }
            if candidates.is_empty() {
                break;
            }

            let selected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SelectorError::Cancelled),
                result = stage.selector.select_cells_async(activity, &candidates, cancel) => result,
            };

            candidates = selected.map_err(|e| {
                tracing::warn!(
                    selector = stage.selector.name(),
                    activity_id = activity.id(),
                    error = %e,
                    "Async cell selector failed"
                );
                e
            })?;
        }

        Ok(candidates)
    }
}

impl std::fmt::Debug for CellSelectorPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellSelectorPipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}
