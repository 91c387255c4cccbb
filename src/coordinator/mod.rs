//! Coordinator - the engine side of the cell session protocol
//!
//! The coordinator owns the pending activity queue, the attached cells and the
//! `SessionTable` holding every open session. It reacts to cell events:
//!
//! - `ReadyToWork`: record the session, try to bind pending work to it
//! - `NotReadyToWork`: record the pause
//! - `ActivityCompleted`: correlate by session id, close the sequence and tell
//!   the cell whether the process goes on
//!
//! Nothing is persisted. After a restart the table is rebuilt from the sessions
//! cells report when they are attached again.

mod table;

pub use table::{OpenSession, SessionTable};

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use production_model::{Activity, ActivityHandle};
use tokio::sync::watch;

use crate::cell::{CellEvent, CellEventReceiver, CellId, CellRef, EngineContext};
use crate::error::{CoordinatorError, SelectorError};
use crate::selector::{CancellationSignal, CellSelectorPipeline};
use crate::session::{
    ActivityCompleted, ReadyToWork, SequenceBoundary, Session, SessionId, SessionMessage,
    UnknownActivityAborted,
};

/// Does the pending session `ready` accept `activity`?
///
/// The session's classification must cover the activity's, its reference must
/// be empty or route to the activity's process, and every constraint must hold.
pub fn session_accepts(ready: &ReadyToWork, activity: &Activity) -> bool {
    let session = ready.session();
    session
        .accepted_classification()
        .contains(activity.classification())
        && (session.reference().is_empty() || session.reference().matches(activity.process()))
        && ready.constraints_satisfied_by(activity)
}

/// Counters of the coordinator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub dispatched: u64,
    pub completed: u64,
    pub unknown_completions: u64,
    pub aborted: u64,
}

pub struct Coordinator {
    context: EngineContext,
    cells: BTreeMap<CellId, CellRef>,
    table: SessionTable,
    pending: VecDeque<ActivityHandle>,
    pipeline: CellSelectorPipeline,
    cancel: CancellationSignal,
    stats: CoordinatorStats,
}

impl Coordinator {
    /// Create a coordinator. Cells publish on the returned receiver's channel;
    /// hand it to `run`.
    pub fn new(name: impl Into<String>, pipeline: CellSelectorPipeline) -> (Self, CellEventReceiver) {
        let (context, receiver) = EngineContext::channel(name);
        let coordinator = Self {
            context,
            cells: BTreeMap::new(),
            table: SessionTable::new(),
            pending: VecDeque::new(),
            pipeline,
            cancel: CancellationSignal::never(),
            stats: CoordinatorStats::default(),
        };
        (coordinator, receiver)
    }

    pub fn name(&self) -> &str {
        self.context.engine()
    }

    pub fn table(&self) -> &SessionTable {
        &self.table
    }

    pub fn pending(&self) -> impl Iterator<Item = &ActivityHandle> {
        self.pending.iter()
    }

    pub fn cell_ids(&self) -> Vec<CellId> {
        self.cells.keys().copied().collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    // ------------------------------------------------------------------------
    // Cell registry
    // ------------------------------------------------------------------------

    /// Attach a cell and rebuild its part of the session table from the
    /// sessions it reports.
    pub async fn attach_cell(&mut self, cell: CellRef) -> Result<(), CoordinatorError> {
        let cell_id = cell.id();
        if self.cells.contains_key(&cell_id) {
            return Err(CoordinatorError::DuplicateCell(cell_id));
        }

        let reported = cell.process_engine_attached(self.context.clone());
        tracing::info!(
            cell = %cell_id,
            name = cell.name(),
            sessions = reported.len(),
            "Cell attached"
        );
        self.cells.insert(cell_id, cell);

        for message in reported {
            self.restore(cell_id, message);
        }

        self.dispatch().await;
        Ok(())
    }

    /// Detach a cell. Its sessions leave the table; the messages the cell
    /// still holds are returned.
    pub fn detach_cell(&mut self, cell_id: CellId) -> Result<Vec<SessionMessage>, CoordinatorError> {
        let cell = self
            .cells
            .remove(&cell_id)
            .ok_or(CoordinatorError::UnknownCell(cell_id))?;

        let held = cell.process_engine_detached();
        let dropped = self.table.remove_cell(cell_id);
        tracing::info!(
            cell = %cell_id,
            dropped = dropped.len(),
            held = held.len(),
            "Cell detached"
        );
        Ok(held)
    }

    fn restore(&mut self, cell_id: CellId, message: SessionMessage) {
        tracing::debug!(
            cell = %cell_id,
            session = %message.id(),
            kind = %message.kind(),
            "Restoring reported session"
        );

        match message {
            // The completion was never acknowledged
            SessionMessage::ActivityCompleted(completed) => {
                self.close_sequence(cell_id, completed);
            }
            SessionMessage::SequenceCompleted(_) => {
                tracing::warn!(cell = %cell_id, "Ignoring closed sequence reported as open");
            }
            SessionMessage::ActivityStart(start) => {
                let activity_id = start.activity().id();
                self.pending.retain(|pending| pending.id() != activity_id);
                self.table.upsert(cell_id, start.into());
            }
            other => {
                self.table.upsert(cell_id, other);
            }
        }
    }

    // ------------------------------------------------------------------------
    // Work intake
    // ------------------------------------------------------------------------

    /// Queue an activity and try to dispatch it right away
    pub async fn enqueue(&mut self, activity: ActivityHandle) {
        tracing::debug!(
            activity_id = activity.id(),
            process_id = activity.process().id,
            activity_type = activity.activity_type(),
            "Activity queued"
        );
        self.pending.push_back(activity);
        self.dispatch().await;
    }

    /// Drop the pending work of a process and tell cells running its
    /// activities. Returns the number of dropped pending activities.
    pub fn abort_process(&mut self, process_id: i64) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|activity| activity.process().id != process_id);
        let dropped = before - self.pending.len();
        self.stats.aborted += dropped as u64;

        let running: Vec<(CellId, ActivityHandle)> = self
            .table
            .in_flight()
            .into_iter()
            .filter(|(_, start)| start.activity().process().id == process_id)
            .map(|(cell, start)| (cell, start.activity().clone()))
            .collect();

        for (cell_id, activity) in &running {
            if let Some(cell) = self.cells.get(cell_id) {
                cell.process_aborting(activity);
            }
        }

        tracing::info!(
            process_id,
            dropped,
            running = running.len(),
            "Process aborting"
        );
        self.release_idle_sessions();
        dropped
    }

    // ------------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------------

    /// Apply one cell event. A completion nobody was waiting for is absorbed
    /// and returned.
    pub async fn handle_event(&mut self, event: CellEvent) -> Option<UnknownActivityAborted> {
        match event {
            CellEvent::ReadyToWork { cell, message } => {
                if !self.cells.contains_key(&cell) {
                    tracing::warn!(cell = %cell, session = %message.session().id(), "ReadyToWork from unattached cell");
                    return None;
                }
                if self.in_flight(message.session().id()) {
                    tracing::debug!(
                        cell = %cell,
                        session = %message.session().id(),
                        "Ignoring ReadyToWork for a session with an activity in flight"
                    );
                    return None;
                }

                tracing::debug!(
                    cell = %cell,
                    session = %message.session().id(),
                    kind = %message.kind(),
                    "Session ready"
                );
                self.table.upsert(cell, message.into());
                self.dispatch().await;
                None
            }
            CellEvent::NotReadyToWork { cell, message } => {
                if !self.cells.contains_key(&cell) {
                    tracing::warn!(cell = %cell, session = %message.session().id(), "NotReadyToWork from unattached cell");
                    return None;
                }
                // A pause racing a dispatch must not hide the running activity
                if self.in_flight(message.session().id()) {
                    tracing::debug!(
                        cell = %cell,
                        session = %message.session().id(),
                        "Ignoring NotReadyToWork for a session with an activity in flight"
                    );
                    return None;
                }

                tracing::debug!(cell = %cell, session = %message.session().id(), "Session paused");
                self.table.upsert(cell, message.into());
                None
            }
            CellEvent::ActivityCompleted { cell, message } => {
                let aborted = self.complete(cell, message);
                self.release_idle_sessions();
                aborted
            }
        }
    }

    /// Does the table hold an `ActivityStart` for this session?
    fn in_flight(&self, session_id: SessionId) -> bool {
        matches!(
            self.table.get(&session_id).map(|open| &open.message),
            Some(SessionMessage::ActivityStart(_))
        )
    }

    fn complete(
        &mut self,
        cell_id: CellId,
        completed: ActivityCompleted,
    ) -> Option<UnknownActivityAborted> {
        let session_id = completed.session().id();
        let correlated = matches!(
            self.table.get(&session_id),
            Some(OpenSession { cell, message: SessionMessage::ActivityStart(start) })
                if *cell == cell_id && start.activity().id() == completed.activity().id()
        );

        if correlated {
            self.close_sequence(cell_id, completed);
            return None;
        }

        self.stats.unknown_completions += 1;
        tracing::warn!(
            cell = %cell_id,
            session = %session_id,
            activity_id = completed.activity().id(),
            "Completion for unknown session, activity aborted"
        );
        let aborted = Session::wrap_unknown_activity(completed.activity().clone());

        // Release the cell's own session so it can announce itself again
        let owned = matches!(self.table.get(&session_id), Some(open) if open.cell == cell_id);
        if owned {
            self.table.remove(&session_id);
        }
        if let Some(cell) = self.cells.get(&cell_id) {
            cell.sequence_completed(completed.complete_sequence(None, false, Vec::new()));
        }

        Some(aborted)
    }

    /// Close the sequence of a correlated completion
    fn close_sequence(&mut self, cell_id: CellId, completed: ActivityCompleted) {
        self.table.remove(&completed.session().id());
        self.stats.completed += 1;

        let activity = completed.activity();
        let process = activity.process().clone();
        let next = self
            .pending
            .iter()
            .find(|pending| pending.process().id == process.id)
            .cloned();
        let process_active = next.is_some();

        let next_cells: Vec<CellId> = match &next {
            Some(next) => {
                let attached: Vec<CellRef> = self.cells.values().cloned().collect();
                self.pipeline
                    .select_cells(next, &attached)
                    .iter()
                    .map(|cell| cell.id())
                    .collect()
            }
            None => Vec::new(),
        };

        tracing::info!(
            cell = %cell_id,
            session = %completed.session().id(),
            activity_id = activity.id(),
            success = completed.result().map(|r| r.success).unwrap_or(false),
            process_active,
            next_cells = ?next_cells,
            "Activity completed"
        );

        let sequence = completed.complete_sequence(Some(process), process_active, next_cells);
        match self.cells.get(&cell_id) {
            Some(cell) => cell.sequence_completed(sequence),
            None => tracing::warn!(cell = %cell_id, "Sequence closed for unattached cell"),
        }
    }

    // ------------------------------------------------------------------------
    // Dispatching
    // ------------------------------------------------------------------------

    async fn dispatch(&mut self) {
        let mut index = 0;
        while index < self.pending.len() {
            let activity = self.pending[index].clone();
            match self.try_dispatch(&activity).await {
                Ok(true) => {
                    self.pending.remove(index);
                }
                Ok(false) => index += 1,
                Err(SelectorError::Cancelled) => {
                    tracing::debug!("Dispatch cancelled");
                    return;
                }
                // Already logged by the pipeline
                Err(_) => index += 1,
            }
        }
        self.release_idle_sessions();
    }

    /// Close continued sessions pinned to a process that has no work left,
    /// neither queued nor running. The cell gets an inactive sequence and is
    /// free to announce an untargeted session.
    ///
    /// Only sessions that already carried an activity of the process are
    /// released. A session started for a process or instance waits for that
    /// work to arrive.
    fn release_idle_sessions(&mut self) {
        let in_flight = self.table.in_flight();
        let idle: Vec<(CellId, ReadyToWork)> = self
            .table
            .ready_sessions()
            .into_iter()
            .filter(|(_, ready)| {
                let reference = ready.session().reference();
                ready.session().process().is_some()
                    && !reference.is_empty()
                    && !self
                        .pending
                        .iter()
                        .any(|activity| reference.matches(activity.process()))
                    && !in_flight
                        .iter()
                        .any(|(_, start)| reference.matches(start.activity().process()))
            })
            .collect();

        for (cell_id, ready) in idle {
            self.table.remove(&ready.session().id());
            tracing::debug!(
                cell = %cell_id,
                session = %ready.session().id(),
                reference = %ready.session().reference(),
                "Releasing session pinned to an idle process"
            );
            if let Some(cell) = self.cells.get(&cell_id) {
                cell.sequence_completed(ready.complete_sequence(None, false, Vec::new()));
            }
        }
    }

    /// Bind `activity` to the best accepting session. Returns whether it was
    /// dispatched.
    async fn try_dispatch(&mut self, activity: &ActivityHandle) -> Result<bool, SelectorError> {
        let accepting: Vec<(CellId, ReadyToWork)> = self
            .table
            .ready_sessions()
            .into_iter()
            .filter(|(cell, ready)| self.cells.contains_key(cell) && session_accepts(ready, activity))
            .collect();
        if accepting.is_empty() {
            return Ok(false);
        }

        let candidate_ids: BTreeSet<CellId> = accepting.iter().map(|(cell, _)| *cell).collect();
        let candidates: Vec<CellRef> = candidate_ids
            .iter()
            .filter_map(|id| self.cells.get(id).cloned())
            .collect();

        let ranked = self
            .pipeline
            .select_cells_async(activity, &candidates, &self.cancel)
            .await?;

        let chosen = ranked.iter().find_map(|cell| {
            accepting
                .iter()
                .find(|(id, _)| *id == cell.id())
                .map(|(_, ready)| (cell.clone(), ready.clone()))
        });
        let Some((cell, ready)) = chosen else {
            tracing::debug!(activity_id = activity.id(), "No cell survived selection");
            return Ok(false);
        };

        let start = ready.start_activity(activity.clone());
        self.table.upsert(cell.id(), start.clone().into());
        self.stats.dispatched += 1;

        tracing::info!(
            cell = %cell.id(),
            session = %start.session().id(),
            activity_id = activity.id(),
            process_id = activity.process().id,
            "Activity dispatched"
        );
        cell.start_activity(start);
        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------------

    /// Consume cell events until the shutdown flag is set. A shutdown also
    /// cancels any selection in progress.
    pub async fn run(&mut self, mut events: CellEventReceiver, mut shutdown: watch::Receiver<bool>) {
        self.cancel = CancellationSignal::from_receiver(shutdown.clone());
        self.pipeline.start();
        tracing::info!(engine = self.name(), cells = self.cells.len(), "Coordinator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("Cell event channel closed");
                        break;
                    };
                    if let Some(aborted) = self.handle_event(event).await {
                        tracing::debug!(
                            session = %aborted.completed().session().id(),
                            "Unknown activity wrapped"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.pipeline.stop();
        tracing::info!(
            engine = self.name(),
            dispatched = self.stats.dispatched,
            completed = self.stats.completed,
            pending = self.pending.len(),
            "Coordinator shutting down"
        );
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("engine", &self.name())
            .field("cells", &self.cell_ids())
            .field("sessions", &self.table.len())
            .field("pending", &self.pending.len())
            .field("pipeline", &self.pipeline)
            .finish()
    }
}
