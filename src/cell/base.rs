//! CellBase - event plumbing shared by concrete cell drivers
//!
//! Drivers embed a `CellBase` and call the `publish_*` helpers instead of
//! talking to the engine channel directly. Publishing never blocks and never
//! fails: while no engine is attached (or the engine went away) the event is
//! dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use super::{CellEvent, CellId, EngineContext};
use crate::session::{ActivityCompleted, NotReadyToWork, ReadyToWork};

/// Publish counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
    /// Events handed to the engine channel
    pub published: u64,
    /// Events dropped (detached or engine gone)
    pub dropped: u64,
}

/// Identity plus engine connection of a cell
#[derive(Debug)]
pub struct CellBase {
    id: CellId,
    name: String,
    engine: RwLock<Option<EngineContext>>,

    // Stats (atomic, no locks)
    published: AtomicU64,
    dropped: AtomicU64,
}

impl CellBase {
    pub fn new(id: CellId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            engine: RwLock::new(None),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> CellId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Remember the engine connection. Replaces any previous one.
    pub fn attach(&self, context: EngineContext) {
        tracing::info!(cell = %self.id, engine = context.engine(), "Cell attached to process engine");
        let mut slot = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(context);
    }

    /// Forget the engine connection. Returns whether one existed.
    pub fn detach(&self) -> bool {
        let mut slot = self.engine.write().unwrap_or_else(PoisonError::into_inner);
        let was_attached = slot.take().is_some();
        if was_attached {
            tracing::info!(cell = %self.id, "Cell detached from process engine");
        }
        was_attached
    }

    pub fn is_attached(&self) -> bool {
        self.engine
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn publish_ready_to_work(&self, message: ReadyToWork) {
        self.publish(CellEvent::ReadyToWork {
            cell: self.id,
            message,
        });
    }

    pub fn publish_not_ready_to_work(&self, message: NotReadyToWork) {
        self.publish(CellEvent::NotReadyToWork {
            cell: self.id,
            message,
        });
    }

    pub fn publish_activity_completed(&self, message: ActivityCompleted) {
        self.publish(CellEvent::ActivityCompleted {
            cell: self.id,
            message,
        });
    }

    /// Hand an event to the engine - NEVER BLOCKS, NEVER FAILS
    fn publish(&self, event: CellEvent) {
        let slot = self.engine.read().unwrap_or_else(PoisonError::into_inner);
        let Some(context) = slot.as_ref() else {
            tracing::warn!(
                cell = %self.id,
                event = event.event_type_str(),
                session = %event.session_id(),
                "Dropping cell event, no process engine attached"
            );
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        match context.events().send(event) {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                // Engine dropped its receiver without detaching
                tracing::warn!(
                    cell = %self.id,
                    event = err.0.event_type_str(),
                    "Dropping cell event, process engine channel closed"
                );
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn stats(&self) -> PublishStats {
        PublishStats {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
