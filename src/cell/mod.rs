//! Cell contract
//!
//! A cell is a production resource (robot, machine, manual station) that
//! executes activities. The coordinating engine talks to it through commands
//! on the `Cell` trait; the cell answers through `CellEvent`s published on the
//! channel it received when the engine attached.
//!
//! Every command is a non-blocking trigger. Physical execution happens out of
//! band and comes back later as an `ActivityCompleted` event.

mod base;
mod simulated;

pub use base::{CellBase, PublishStats};
pub use simulated::{SimulatedCell, SimulatedCellConfig};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use production_model::ActivityHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::session::{
    ActivityCompleted, ActivityStart, NotReadyToWork, ReadyToWork, SequenceCompleted, SessionId,
    SessionMessage,
};

/// Resource id of a cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CellId(pub i64);

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read-only view of a cell that selectors rank on
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellProfile {
    /// Tools currently mounted or available
    pub tools: BTreeSet<String>,
    /// Current load; lower is less busy
    pub load: u32,
    pub attributes: BTreeMap<String, String>,
}

impl CellProfile {
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tools.insert(tool.into());
        self
    }

    pub fn with_load(mut self, load: u32) -> Self {
        self.load = load;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn has_tool(&self, tool: &str) -> bool {
        self.tools.contains(tool)
    }
}

/// Shared handle to a cell
pub type CellRef = Arc<dyn Cell>;

impl std::fmt::Debug for dyn Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id())
            .field("name", &self.name())
            .finish()
    }
}

/// Outbound signal of a cell
#[derive(Debug, Clone)]
pub enum CellEvent {
    ReadyToWork {
        cell: CellId,
        message: ReadyToWork,
    },
    NotReadyToWork {
        cell: CellId,
        message: NotReadyToWork,
    },
    ActivityCompleted {
        cell: CellId,
        message: ActivityCompleted,
    },
}

impl CellEvent {
    pub fn cell(&self) -> CellId {
        match self {
            Self::ReadyToWork { cell, .. }
            | Self::NotReadyToWork { cell, .. }
            | Self::ActivityCompleted { cell, .. } => *cell,
        }
    }

    pub fn session_id(&self) -> SessionId {
        match self {
            Self::ReadyToWork { message, .. } => message.session().id(),
            Self::NotReadyToWork { message, .. } => message.session().id(),
            Self::ActivityCompleted { message, .. } => message.session().id(),
        }
    }

    pub fn event_type_str(&self) -> &'static str {
        match self {
            Self::ReadyToWork { .. } => "ready_to_work",
            Self::NotReadyToWork { .. } => "not_ready_to_work",
            Self::ActivityCompleted { .. } => "activity_completed",
        }
    }
}

pub type CellEventSender = mpsc::UnboundedSender<CellEvent>;
pub type CellEventReceiver = mpsc::UnboundedReceiver<CellEvent>;

/// Handed to a cell when the coordinating engine attaches
#[derive(Debug, Clone)]
pub struct EngineContext {
    engine: String,
    events: CellEventSender,
}

impl EngineContext {
    pub fn new(engine: impl Into<String>, events: CellEventSender) -> Self {
        Self {
            engine: engine.into(),
            events,
        }
    }

    /// Context plus the receiving end the engine subscribes to
    pub fn channel(engine: impl Into<String>) -> (Self, CellEventReceiver) {
        let (events, receiver) = mpsc::unbounded_channel();
        (Self::new(engine, events), receiver)
    }

    pub fn engine(&self) -> &str {
        &self.engine
    }

    pub fn events(&self) -> &CellEventSender {
        &self.events
    }
}

/// Capability surface a production resource implements
pub trait Cell: Send + Sync {
    fn id(&self) -> CellId;

    fn name(&self) -> &str;

    fn profile(&self) -> CellProfile {
        CellProfile::default()
    }

    /// The engine connected. Returns the sessions this cell holds open so the
    /// engine can rebuild its session table.
    fn process_engine_attached(&self, context: EngineContext) -> Vec<SessionMessage>;

    /// The engine disconnected. Returns the sessions still open.
    fn process_engine_detached(&self) -> Vec<SessionMessage>;

    /// Begin executing the bound activity. Completion is reported later.
    fn start_activity(&self, activity_start: ActivityStart);

    /// The process owning `activity` is aborting. The cell stops the operation
    /// or reports completion as usual.
    fn process_aborting(&self, activity: &ActivityHandle);

    /// The dispatcher closed a sequence on one of this cell's sessions
    fn sequence_completed(&self, completed: SequenceCompleted);
}
