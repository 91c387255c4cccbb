//! Coordinator: dispatch, recovery after reattach and unknown completions

use std::sync::{Arc, Mutex};
use std::time::Duration;

use cell_dispatch::cell::{
    CellBase, CellEvent, EngineContext, SimulatedCell, SimulatedCellConfig,
};
use cell_dispatch::coordinator::Coordinator;
use cell_dispatch::selector::{
    CancellationSignal, CellSelector, CellSelectorPipeline, SelectorRegistry,
};
use cell_dispatch::session::{ActivityStart, SessionMessageKind};
use cell_dispatch::{
    Cell, CellId, CellRef, DispatcherConfig, ProcessReference, ReadyToWork, ReadyToWorkType,
    SelectorError, SequenceBoundary, SequenceCompleted, Session, SessionMessage,
};
use production_model::{Activity, ActivityClassification, ActivityHandle, Process};
use tokio::sync::watch;

/// Cell that only records commands; the test drives its events by hand
struct ManualCell {
    base: CellBase,
    reported: Mutex<Vec<SessionMessage>>,
    starts: Mutex<Vec<ActivityStart>>,
    sequences: Mutex<Vec<SequenceCompleted>>,
    aborting: Mutex<Vec<i64>>,
}

impl ManualCell {
    fn new(id: i64, reported: Vec<SessionMessage>) -> Arc<Self> {
        Arc::new(Self {
            base: CellBase::new(CellId(id), format!("Manual {}", id)),
            reported: Mutex::new(reported),
            starts: Mutex::new(Vec::new()),
            sequences: Mutex::new(Vec::new()),
            aborting: Mutex::new(Vec::new()),
        })
    }

    fn starts(&self) -> Vec<ActivityStart> {
        self.starts.lock().unwrap().clone()
    }

    fn sequences(&self) -> Vec<SequenceCompleted> {
        self.sequences.lock().unwrap().clone()
    }
}

impl Cell for ManualCell {
    fn id(&self) -> CellId {
        self.base.id()
    }

    fn name(&self) -> &str {
        self.base.name()
    }

    fn process_engine_attached(&self, context: EngineContext) -> Vec<SessionMessage> {
        self.base.attach(context);
        self.reported.lock().unwrap().clone()
    }

    fn process_engine_detached(&self) -> Vec<SessionMessage> {
        self.base.detach();
        self.reported.lock().unwrap().clone()
    }

    fn start_activity(&self, activity_start: ActivityStart) {
        *self.reported.lock().unwrap() = vec![activity_start.clone().into()];
        self.starts.lock().unwrap().push(activity_start);
    }

    fn process_aborting(&self, activity: &ActivityHandle) {
        self.aborting.lock().unwrap().push(activity.id());
    }

    fn sequence_completed(&self, completed: SequenceCompleted) {
        self.reported.lock().unwrap().clear();
        self.sequences.lock().unwrap().push(completed);
    }
}

fn activity(id: i64, process_id: i64) -> ActivityHandle {
    Activity::new(id, "Mount", Arc::new(Process::new(process_id))).into_handle()
}

fn ready() -> ReadyToWork {
    Session::start_session(ActivityClassification::PRODUCTION, ReadyToWorkType::Pull)
}

fn coordinator() -> (Coordinator, cell_dispatch::cell::CellEventReceiver) {
    Coordinator::new("test-engine", CellSelectorPipeline::new())
}

#[tokio::test]
async fn reported_ready_session_receives_work() {
    let (mut coordinator, _events) = coordinator();
    let offered = ready();
    let cell = ManualCell::new(1, vec![offered.clone().into()]);

    coordinator.attach_cell(cell.clone()).await.unwrap();
    coordinator.enqueue(activity(10, 1)).await;

    let starts = cell.starts();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].session().id(), offered.session().id());
    assert_eq!(starts[0].activity().id(), 10);
    assert_eq!(coordinator.table().in_flight().len(), 1);
}

#[tokio::test]
async fn completion_after_reattach_is_correlated() {
    let (mut old_engine, _old_events) = coordinator();
    let cell = ManualCell::new(1, vec![ready().into()]);
    old_engine.attach_cell(cell.clone()).await.unwrap();
    old_engine.enqueue(activity(11, 2)).await;

    // Engine restart: the cell moves to a fresh coordinator
    let held = old_engine.detach_cell(CellId(1)).unwrap();
    assert_eq!(held[0].kind(), SessionMessageKind::ActivityStart);

    let (mut new_engine, _new_events) = coordinator();
    new_engine.attach_cell(cell.clone()).await.unwrap();
    assert_eq!(new_engine.table().in_flight().len(), 1);

    let completed = cell.starts()[0].create_result_with(0);
    let unknown = new_engine
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(1),
            message: completed,
        })
        .await;

    assert!(unknown.is_none());
    assert_eq!(new_engine.stats().completed, 1);
    assert_eq!(new_engine.stats().unknown_completions, 0);
    assert!(new_engine.table().is_empty());

    let sequences = cell.sequences();
    assert_eq!(sequences.len(), 1);
    assert!(!sequences[0].process_active());
}

#[tokio::test]
async fn unacknowledged_completion_is_closed_on_attach() {
    let start = ready().start_activity(activity(12, 3));
    let completed = start.create_result_with(0);
    let cell = ManualCell::new(1, vec![completed.into()]);

    let (mut coordinator, _events) = coordinator();
    coordinator.attach_cell(cell.clone()).await.unwrap();

    assert_eq!(coordinator.stats().completed, 1);
    assert_eq!(cell.sequences().len(), 1);
    assert_eq!(cell.sequences()[0].session().id(), start.session().id());
}

#[tokio::test]
async fn unknown_completion_is_wrapped() {
    let (mut coordinator, _events) = coordinator();
    let cell = ManualCell::new(1, Vec::new());
    coordinator.attach_cell(cell.clone()).await.unwrap();

    let stray = activity(13, 4);
    let completed = ready().start_activity(stray.clone()).create_result_with(0);
    let aborted = coordinator
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(1),
            message: completed,
        })
        .await
        .expect("completion should be unknown");

    assert!(!stray.result().unwrap().success);
    assert!(!aborted.sequence_completed().process_active());
    assert_eq!(coordinator.stats().unknown_completions, 1);
    assert_eq!(coordinator.stats().completed, 0);

    // The cell is released from its session
    assert_eq!(cell.sequences().len(), 1);
    assert!(!cell.sequences()[0].process_active());
}

#[tokio::test]
async fn process_active_when_more_work_is_queued() {
    let (mut coordinator, _events) = coordinator();
    let cell = ManualCell::new(1, vec![ready().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();

    coordinator.enqueue(activity(20, 5)).await;
    coordinator.enqueue(activity(21, 5)).await;
    assert_eq!(coordinator.pending().count(), 1);

    let completed = cell.starts()[0].create_result_with(0);
    coordinator
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(1),
            message: completed,
        })
        .await;

    let sequence = &cell.sequences()[0];
    assert!(sequence.process_active());
    assert_eq!(sequence.next_cells(), &[CellId(1)]);

    // Continuing pins the session to the process and takes the next activity
    let continued = sequence.continue_session();
    coordinator
        .handle_event(CellEvent::ReadyToWork {
            cell: CellId(1),
            message: continued.clone(),
        })
        .await;

    let starts = cell.starts();
    assert_eq!(starts.len(), 2);
    assert_eq!(starts[1].activity().id(), 21);
    assert_eq!(starts[1].session().id(), continued.session().id());
}

#[tokio::test]
async fn pinned_session_released_once_process_is_idle() {
    let (mut coordinator, _events) = coordinator();
    let worker = ManualCell::new(1, vec![ready().into()]);
    coordinator.attach_cell(worker.clone()).await.unwrap();
    coordinator.enqueue(activity(30, 42)).await;

    // Continued after an earlier activity of process 42, which still has an
    // activity running elsewhere
    let earlier = activity(29, 42);
    let pinned = ready()
        .start_activity(earlier.clone())
        .create_result_with(0)
        .complete_sequence(Some(earlier.process().clone()), true, vec![CellId(2)])
        .continue_session();
    let waiting = ManualCell::new(2, vec![pinned.clone().into()]);
    coordinator.attach_cell(waiting.clone()).await.unwrap();
    assert!(waiting.sequences().is_empty());
    assert_eq!(
        coordinator.table().ready_sessions()[0].1.session().reference(),
        &ProcessReference::ProcessId(42)
    );

    let completed = worker.starts()[0].create_result_with(0);
    coordinator
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(1),
            message: completed,
        })
        .await;

    let released = waiting.sequences();
    assert_eq!(released.len(), 1);
    assert_eq!(released[0].session().id(), pinned.session().id());
    assert!(!released[0].process_active());
    assert!(coordinator.table().ready_sessions().is_empty());
}

#[tokio::test]
async fn targeted_session_waits_for_its_process() {
    let (mut coordinator, _events) = coordinator();
    let targeted = Session::start_session_for_process(
        ActivityClassification::PRODUCTION,
        ReadyToWorkType::Pull,
        42,
    );
    let cell = ManualCell::new(1, vec![targeted.clone().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();

    // Announced ahead of the work: kept open
    assert!(cell.sequences().is_empty());
    assert_eq!(coordinator.table().ready_sessions().len(), 1);

    coordinator.enqueue(activity(31, 7)).await;
    assert!(cell.starts().is_empty());
    assert!(cell.sequences().is_empty());

    coordinator.enqueue(activity(32, 42)).await;
    let starts = cell.starts();
    assert_eq!(starts.len(), 1);
    assert_eq!(starts[0].activity().id(), 32);
    assert_eq!(starts[0].session().id(), targeted.session().id());
}

#[tokio::test]
async fn paused_session_takes_no_work_until_resumed() {
    let (mut coordinator, _events) = coordinator();
    let offered = ready();
    let cell = ManualCell::new(1, vec![offered.clone().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();

    coordinator
        .handle_event(CellEvent::NotReadyToWork {
            cell: CellId(1),
            message: offered.pause_session(),
        })
        .await;
    coordinator.enqueue(activity(40, 6)).await;
    assert!(cell.starts().is_empty());

    coordinator
        .handle_event(CellEvent::ReadyToWork {
            cell: CellId(1),
            message: offered.pause_session().resume_session(),
        })
        .await;
    assert_eq!(cell.starts().len(), 1);
    assert_eq!(coordinator.pending().count(), 0);
}

#[tokio::test]
async fn stale_pause_keeps_activity_in_flight() {
    let (mut coordinator, _events) = coordinator();
    let offered = ready();
    let cell = ManualCell::new(1, vec![offered.clone().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();
    coordinator.enqueue(activity(45, 9)).await;

    // The cell paused while the dispatch was on its way
    coordinator
        .handle_event(CellEvent::NotReadyToWork {
            cell: CellId(1),
            message: offered.pause_session(),
        })
        .await;
    assert_eq!(coordinator.table().in_flight().len(), 1);

    let start = cell.starts()[0].clone();
    let unknown = coordinator
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(1),
            message: start.create_result_with(0),
        })
        .await;

    assert!(unknown.is_none());
    assert!(start.activity().result().unwrap().success);
    assert_eq!(coordinator.stats().completed, 1);
    assert_eq!(coordinator.stats().unknown_completions, 0);
}

#[tokio::test]
async fn stale_pause_does_not_hide_activity_from_abort() {
    let (mut coordinator, _events) = coordinator();
    let offered = ready();
    let cell = ManualCell::new(1, vec![offered.clone().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();
    coordinator.enqueue(activity(46, 9)).await;

    coordinator
        .handle_event(CellEvent::NotReadyToWork {
            cell: CellId(1),
            message: offered.pause_session(),
        })
        .await;
    coordinator.abort_process(9);

    assert_eq!(*cell.aborting.lock().unwrap(), vec![46]);
}

#[tokio::test]
async fn pause_from_unattached_cell_is_ignored() {
    let (mut coordinator, _events) = coordinator();
    coordinator
        .handle_event(CellEvent::NotReadyToWork {
            cell: CellId(5),
            message: ready().pause_session(),
        })
        .await;

    assert!(coordinator.table().is_empty());
}

#[tokio::test]
async fn unknown_completion_keeps_other_cells_session() {
    let (mut coordinator, _events) = coordinator();
    let owner = ManualCell::new(1, vec![ready().into()]);
    let other = ManualCell::new(2, Vec::new());
    coordinator.attach_cell(owner.clone()).await.unwrap();
    coordinator.attach_cell(other.clone()).await.unwrap();
    coordinator.enqueue(activity(47, 9)).await;

    // Reported by the wrong cell for the owner's session
    let completed = owner.starts()[0].create_result_with(0);
    let unknown = coordinator
        .handle_event(CellEvent::ActivityCompleted {
            cell: CellId(2),
            message: completed,
        })
        .await;

    assert!(unknown.is_some());
    let in_flight = coordinator.table().in_flight();
    assert_eq!(in_flight.len(), 1);
    assert_eq!(in_flight[0].0, CellId(1));
    assert!(owner.sequences().is_empty());
    assert_eq!(other.sequences().len(), 1);
}

/// Selector that never finishes on its own
struct Stalled;

#[async_trait::async_trait]
impl CellSelector for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    fn select_cells(
        &self,
        _activity: &Activity,
        available: &[CellRef],
    ) -> Result<Vec<CellRef>, SelectorError> {
        Ok(available.to_vec())
    }

    async fn select_cells_async(
        &self,
        activity: &Activity,
        available: &[CellRef],
        _cancel: &CancellationSignal,
    ) -> Result<Vec<CellRef>, SelectorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        self.select_cells(activity, available)
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_selection_in_progress() {
    let mut pipeline = CellSelectorPipeline::new();
    pipeline.add(0, Box::new(Stalled));
    let (mut coordinator, events) = Coordinator::new("test-engine", pipeline);

    let cell = ManualCell::new(1, Vec::new());
    coordinator.attach_cell(cell.clone()).await.unwrap();
    coordinator.enqueue(activity(48, 9)).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(async move {
        coordinator.run(events, shutdown_rx).await;
        coordinator
    });

    // The announcement starts a selection that only shutdown can end
    cell.base.publish_ready_to_work(ready());
    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown_tx.send_replace(true);

    let coordinator = runner.await.unwrap();
    assert!(cell.starts().is_empty());
    assert_eq!(coordinator.stats().dispatched, 0);
    assert_eq!(coordinator.pending().count(), 1);
    assert_eq!(coordinator.table().ready_sessions().len(), 1);
}

#[tokio::test]
async fn abort_notifies_running_cell() {
    let (mut coordinator, _events) = coordinator();
    let cell = ManualCell::new(1, vec![ready().into()]);
    coordinator.attach_cell(cell.clone()).await.unwrap();

    coordinator.enqueue(activity(50, 7)).await;
    coordinator.enqueue(activity(51, 7)).await;
    coordinator.enqueue(activity(52, 8)).await;

    assert_eq!(coordinator.abort_process(7), 1);
    assert_eq!(*cell.aborting.lock().unwrap(), vec![50]);
    assert_eq!(coordinator.pending().count(), 1);
}

#[tokio::test]
async fn run_loop_completes_all_work() {
    let config = DispatcherConfig::from_yaml_str(
        r#"
engine_name: line-7
selectors:
  - plugin_name: load-balancing
"#,
    )
    .unwrap();
    let pipeline = config
        .build_pipeline(&SelectorRegistry::with_builtins())
        .unwrap();

    let cells: Vec<SimulatedCell> = (1..=3)
        .map(|id| {
            SimulatedCell::new(
                SimulatedCellConfig::new(CellId(id), format!("Sim {}", id))
                    .with_execution_time(Duration::from_millis(5)),
            )
        })
        .collect();

    let (mut coordinator, events) = Coordinator::new(config.engine_name.clone(), pipeline);
    for cell in &cells {
        coordinator.attach_cell(Arc::new(cell.clone())).await.unwrap();
    }
    for id in 1..=9 {
        coordinator.enqueue(activity(id, id % 2 + 1)).await;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = tokio::spawn(async move {
        coordinator.run(events, shutdown_rx).await;
        coordinator
    });

    let all_done = async {
        loop {
            let done: u64 = cells.iter().map(|c| c.completed_activities()).sum();
            if done == 9 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(10), all_done)
        .await
        .expect("simulation should finish");

    // Give the loop a moment to process the last completions
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send_replace(true);
    let coordinator = runner.await.unwrap();

    assert_eq!(coordinator.name(), "line-7");
    assert_eq!(coordinator.stats().dispatched, 9);
    assert_eq!(coordinator.stats().completed, 9);
    assert_eq!(coordinator.stats().unknown_completions, 0);
    assert_eq!(coordinator.pending().count(), 0);
}
