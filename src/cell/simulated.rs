//! SimulatedCell - reference cell driver
//!
//! Executes every activity after a fixed delay and reports a fixed result
//! code. Used by the simulation binary and by the integration tests to drive
//! the coordinator through complete session chains.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use production_model::{ActivityClassification, ActivityHandle};

use super::{Cell, CellBase, CellId, CellProfile, EngineContext, PublishStats};
use crate::session::{
    ActivityStart, ReadyToWork, ReadyToWorkType, SequenceCompleted, Session, SessionMessage,
};

/// Static setup of a simulated cell
#[derive(Debug, Clone)]
pub struct SimulatedCellConfig {
    pub id: CellId,
    pub name: String,
    pub classification: ActivityClassification,
    pub profile: CellProfile,
    pub execution_time: Duration,
    pub result_code: i64,
}

impl SimulatedCellConfig {
    pub fn new(id: CellId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            classification: ActivityClassification::PRODUCTION,
            profile: CellProfile::default(),
            execution_time: Duration::from_millis(50),
            result_code: 0,
        }
    }

    pub fn with_classification(mut self, classification: ActivityClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_profile(mut self, profile: CellProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_execution_time(mut self, execution_time: Duration) -> Self {
        self.execution_time = execution_time;
        self
    }

    pub fn with_result_code(mut self, result_code: i64) -> Self {
        self.result_code = result_code;
        self
    }
}

struct SimulatedCellInner {
    config: SimulatedCellConfig,
    base: CellBase,
    /// The one session this cell holds open, if any
    open: Mutex<Option<SessionMessage>>,
    completed: AtomicU64,
}

impl SimulatedCellInner {
    fn open(&self) -> std::sync::MutexGuard<'_, Option<SessionMessage>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_session(&self) -> ReadyToWork {
        Session::start_session(self.config.classification, ReadyToWorkType::Pull)
    }

    /// Report the outcome of a started activity
    fn finish(&self, start: ActivityStart) {
        let completed = start.create_result_with(self.config.result_code);

        {
            let mut open = self.open();
            let still_current = matches!(
                open.as_ref(),
                Some(SessionMessage::ActivityStart(current)) if current.session().id() == start.session().id()
            );
            if !still_current {
                tracing::debug!(
                    cell = %self.config.id,
                    session = %start.session().id(),
                    "Discarding completion of a session this cell no longer holds"
                );
                return;
            }
            *open = Some(completed.clone().into());
        }

        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            cell = %self.config.id,
            activity_id = completed.activity().id(),
            origin = ?completed.origin(),
            "Simulated activity finished"
        );
        self.base.publish_activity_completed(completed);
    }
}

/// In-memory cell that completes activities on a timer
#[derive(Clone)]
pub struct SimulatedCell {
    inner: Arc<SimulatedCellInner>,
}

impl SimulatedCell {
    pub fn new(config: SimulatedCellConfig) -> Self {
        let base = CellBase::new(config.id, config.name.clone());
        Self {
            inner: Arc::new(SimulatedCellInner {
                config,
                base,
                open: Mutex::new(None),
                completed: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SimulatedCellConfig {
        &self.inner.config
    }

    /// Currently open session
    pub fn open_session(&self) -> Option<SessionMessage> {
        self.inner.open().clone()
    }

    pub fn completed_activities(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    pub fn publish_stats(&self) -> PublishStats {
        self.inner.base.stats()
    }

    /// Pause a pending session. Returns false if nothing was pending.
    pub fn pause(&self) -> bool {
        let paused = {
            let mut open = self.inner.open();
            let Some(SessionMessage::ReadyToWork(ready)) = open.as_ref() else {
                return false;
            };
            let paused = ready.pause_session();
            *open = Some(paused.clone().into());
            paused
        };
        self.inner.base.publish_not_ready_to_work(paused);
        true
    }

    /// Resume a paused session. Returns false if nothing was paused.
    pub fn resume(&self) -> bool {
        let resumed = {
            let mut open = self.inner.open();
            let Some(SessionMessage::NotReadyToWork(paused)) = open.as_ref() else {
                return false;
            };
            let resumed = paused.resume_session();
            *open = Some(resumed.clone().into());
            resumed
        };
        self.inner.base.publish_ready_to_work(resumed);
        true
    }
}

impl std::fmt::Debug for SimulatedCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedCell")
            .field("id", &self.inner.config.id)
            .field("name", &self.inner.config.name)
            .finish()
    }
}

impl Cell for SimulatedCell {
    fn id(&self) -> CellId {
        self.inner.config.id
    }

    fn name(&self) -> &str {
        &self.inner.config.name
    }

    fn profile(&self) -> CellProfile {
        self.inner.config.profile.clone()
    }

    fn process_engine_attached(&self, context: EngineContext) -> Vec<SessionMessage> {
        self.inner.base.attach(context);

        // Reported sessions are recorded by the engine directly, not published
        let mut open = self.inner.open();
        let message = open.get_or_insert_with(|| self.inner.fresh_session().into());
        vec![message.clone()]
    }

    fn process_engine_detached(&self) -> Vec<SessionMessage> {
        self.inner.base.detach();
        self.inner.open().iter().cloned().collect()
    }

    fn start_activity(&self, activity_start: ActivityStart) {
        tracing::debug!(
            cell = %self.inner.config.id,
            session = %activity_start.session().id(),
            activity_id = activity_start.activity().id(),
            "Simulated activity started"
        );
        *self.inner.open() = Some(activity_start.clone().into());

        let inner = Arc::clone(&self.inner);
        let delay = inner.config.execution_time;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.finish(activity_start);
                });
            }
            // No runtime: complete synchronously
            Err(_) => inner.finish(activity_start),
        }
    }

    fn process_aborting(&self, activity: &ActivityHandle) {
        let running = matches!(
            self.inner.open().as_ref(),
            Some(SessionMessage::ActivityStart(start)) if start.activity().id() == activity.id()
        );
        if running {
            tracing::info!(
                cell = %self.inner.config.id,
                activity_id = activity.id(),
                "Aborting simulated activity"
            );
            activity.fail();
        }
    }

    fn sequence_completed(&self, completed: SequenceCompleted) {
        let next = if completed.process_active() && completed.next_cells().contains(&self.id()) {
            completed.continue_session()
        } else {
            self.inner.fresh_session()
        };

        tracing::debug!(
            cell = %self.inner.config.id,
            previous = %completed.session().id(),
            session = %next.session().id(),
            "Sequence closed, announcing availability"
        );

        *self.inner.open() = Some(next.clone().into());
        self.inner.base.publish_ready_to_work(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellEvent;
    use crate::session::{SequenceBoundary, SessionMessageKind};
    use production_model::{Activity, Process};

    fn cell(id: i64) -> SimulatedCell {
        SimulatedCell::new(
            SimulatedCellConfig::new(CellId(id), format!("Sim {}", id))
                .with_execution_time(Duration::from_millis(10))
                .with_result_code(4),
        )
    }

    fn activity(id: i64, process_id: i64) -> ActivityHandle {
        Activity::new(id, "Weld", Arc::new(Process::new(process_id))).into_handle()
    }

    fn attached_ready(cell: &SimulatedCell) -> (ReadyToWork, crate::cell::CellEventReceiver) {
        let (context, receiver) = EngineContext::channel("test");
        let sessions = cell.process_engine_attached(context);
        assert_eq!(sessions.len(), 1);
        match &sessions[0] {
            SessionMessage::ReadyToWork(ready) => (ready.clone(), receiver),
            other => panic!("Expected ReadyToWork, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_attach_reports_same_open_session() {
        let cell = cell(1);
        let (ready, _receiver) = attached_ready(&cell);
        assert_eq!(ready.kind(), ReadyToWorkType::Pull);

        // Reattaching reports the session that is still open
        let (context, _receiver) = EngineContext::channel("test");
        let again = cell.process_engine_attached(context);
        assert_eq!(again[0].id(), ready.session().id());

        let detached = cell.process_engine_detached();
        assert_eq!(detached.len(), 1);
        assert_eq!(detached[0].id(), ready.session().id());
    }

    #[test]
    fn test_start_without_runtime_completes_inline() {
        let cell = cell(2);
        let (ready, mut receiver) = attached_ready(&cell);

        cell.start_activity(ready.start_activity(activity(10, 1)));

        match receiver.try_recv().unwrap() {
            CellEvent::ActivityCompleted { cell: id, message } => {
                assert_eq!(id, CellId(2));
                assert_eq!(message.session().id(), ready.session().id());
                assert_eq!(message.result().map(|r| r.numeric), Some(4));
            }
            other => panic!("Unexpected event {:?}", other),
        }
        assert_eq!(cell.completed_activities(), 1);
        assert_eq!(
            cell.open_session().map(|m| m.kind()),
            Some(SessionMessageKind::ActivityCompleted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_with_runtime_completes_after_delay() {
        let cell = cell(3);
        let (ready, mut receiver) = attached_ready(&cell);

        cell.start_activity(ready.start_activity(activity(11, 1)));
        assert_eq!(cell.completed_activities(), 0);

        let event = receiver.recv().await.unwrap();
        assert_eq!(event.event_type_str(), "activity_completed");
        assert_eq!(cell.completed_activities(), 1);
    }

    #[test]
    fn test_abort_fails_running_activity() {
        let cell = cell(4);
        let (ready, _receiver) = attached_ready(&cell);
        let running = activity(12, 5);

        // Without a runtime start_activity completes inline, so park the start by hand
        *cell.inner.open() = Some(ready.start_activity(running.clone()).into());
        cell.process_aborting(&running);

        assert!(!running.result().unwrap().success);

        let other = activity(13, 5);
        cell.process_aborting(&other);
        assert!(other.result().is_none());
    }

    #[test]
    fn test_sequence_completed_continues_or_restarts() {
        let cell = cell(5);
        let (ready, mut receiver) = attached_ready(&cell);

        cell.sequence_completed(ready.complete_sequence(None, true, vec![CellId(5)]));
        let continued = match receiver.try_recv().unwrap() {
            CellEvent::ReadyToWork { message, .. } => message,
            other => panic!("Unexpected event {:?}", other),
        };
        assert_eq!(continued.session().id(), ready.session().id());

        cell.sequence_completed(continued.complete_sequence(None, true, vec![CellId(6)]));
        let fresh = match receiver.try_recv().unwrap() {
            CellEvent::ReadyToWork { message, .. } => message,
            other => panic!("Unexpected event {:?}", other),
        };
        assert_ne!(fresh.session().id(), ready.session().id());
    }

    #[test]
    fn test_pause_and_resume() {
        let cell = cell(6);
        let (ready, mut receiver) = attached_ready(&cell);

        assert!(!cell.resume());
        assert!(cell.pause());
        assert!(!cell.pause());
        assert!(cell.resume());

        assert!(matches!(
            receiver.try_recv().unwrap(),
            CellEvent::NotReadyToWork { .. }
        ));
        match receiver.try_recv().unwrap() {
            CellEvent::ReadyToWork { message, .. } => assert!(message.same_instance(&ready)),
            other => panic!("Unexpected event {:?}", other),
        }
    }
}
