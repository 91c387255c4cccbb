//! Cell dispatch core
//!
//! Decides which production activities run on which cells. The dispatcher
//! and the cells agree on work through an append-only chain of session
//! messages:
//!
//! - [`session`]: the message chain (`ReadyToWork`, `ActivityStart`,
//!   `ActivityCompleted`, `SequenceCompleted`, `NotReadyToWork`)
//! - [`reference`]: routing a session to a concrete process
//! - [`cell`]: the capability surface a production resource implements
//! - [`selector`]: the pluggable pipeline ranking candidate cells
//! - [`coordinator`]: the engine side keeping the table of open sessions
//! - [`config`]: YAML configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cell_dispatch::cell::{CellId, SimulatedCell, SimulatedCellConfig};
//! use cell_dispatch::coordinator::Coordinator;
//! use cell_dispatch::selector::CellSelectorPipeline;
//! use production_model::{Activity, Process};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (mut coordinator, _events) = Coordinator::new("line-1", CellSelectorPipeline::new());
//! let cell = SimulatedCell::new(SimulatedCellConfig::new(CellId(1), "Press"));
//! coordinator.attach_cell(Arc::new(cell)).await?;
//!
//! let activity = Activity::new(1, "Press", Arc::new(Process::new(1))).into_handle();
//! coordinator.enqueue(activity).await;
//! # Ok(())
//! # }
//! ```

pub mod cell;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod reference;
pub mod selector;
pub mod session;

pub use cell::{Cell, CellEvent, CellId, CellRef};
pub use config::DispatcherConfig;
pub use coordinator::Coordinator;
pub use error::{CoordinatorError, SelectorError, SessionError};
pub use reference::ProcessReference;
pub use session::{
    ActivityCompleted, ActivityStart, NotReadyToWork, ReadyToWork, ReadyToWorkType,
    SequenceBoundary, SequenceCompleted, Session, SessionId, SessionMessage,
};
