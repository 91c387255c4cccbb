//! SequenceCompleted - closes a unit of work

use production_model::ProcessHandle;
use serde::{Deserialize, Serialize};

use super::ready_to_work::ReadyToWork;
use super::Session;
use crate::cell::CellId;

/// Messages after which the dispatcher may close a sequence.
///
/// Both a pending `ReadyToWork` (nothing was started) and an
/// `ActivityCompleted` are valid sequence boundaries.
pub trait SequenceBoundary {
    fn boundary_session(&self) -> &Session;

    /// Confirm the sequence. `process_active` tells the cell whether the
    /// process goes on; `next_cells` lists the cells relevant for its next
    /// location.
    fn complete_sequence(
        &self,
        process: Option<ProcessHandle>,
        process_active: bool,
        next_cells: Vec<CellId>,
    ) -> SequenceCompleted {
        SequenceCompleted {
            session: self.boundary_session().bind_process(process),
            process_active,
            next_cells,
        }
    }
}

/// Dispatcher confirmation that a sequence is done
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceCompleted {
    session: Session,
    process_active: bool,
    #[serde(default)]
    next_cells: Vec<CellId>,
}

impl SequenceCompleted {
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn process_active(&self) -> bool {
        self.process_active
    }

    pub fn next_cells(&self) -> &[CellId] {
        &self.next_cells
    }

    /// Keep talking on the same session. Constraints are not carried over and
    /// the continuation always pulls.
    pub fn continue_session(&self) -> ReadyToWork {
        ReadyToWork::continued(self.session.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::super::{Constraint, ReadyToWorkType};
    use super::*;
    use crate::reference::ProcessReference;
    use production_model::{ActivityClassification, Process};
    use std::sync::Arc;

    #[test]
    fn test_complete_sequence_from_ready_to_work() {
        let ready = Session::start_session_with(
            ActivityClassification::SETUP,
            ReadyToWorkType::Push,
            ProcessReference::process_id(3),
            Some(vec![Constraint::Recipe { recipe_id: 1 }]),
        )
        .unwrap();

        let process = Arc::new(Process::new(3));
        let sequence = ready.complete_sequence(Some(process), true, vec![CellId(2)]);

        assert_eq!(sequence.session().id(), ready.session().id());
        assert_eq!(sequence.session().process().map(|p| p.id), Some(3));
        assert!(sequence.process_active());
        assert_eq!(sequence.next_cells(), &[CellId(2)]);
        // The predecessor keeps its unbound process
        assert!(ready.session().process().is_none());
    }

    #[test]
    fn test_continue_session_drops_constraints() {
        let ready = Session::start_session_with(
            ActivityClassification::SETUP,
            ReadyToWorkType::Push,
            ProcessReference::Empty,
            Some(vec![Constraint::Recipe { recipe_id: 1 }]),
        )
        .unwrap();

        let continued = ready
            .complete_sequence(None, true, Vec::new())
            .continue_session();

        assert_eq!(continued.session().id(), ready.session().id());
        assert!(continued.constraints().is_empty());
        assert_eq!(continued.kind(), ReadyToWorkType::Pull);
        assert_eq!(
            continued.session().accepted_classification(),
            ActivityClassification::SETUP
        );
    }

    #[test]
    fn test_sequence_completed_serde() {
        let ready = Session::start_session(ActivityClassification::PRODUCTION, ReadyToWorkType::Pull);
        let sequence = ready.complete_sequence(None, false, vec![CellId(7), CellId(9)]);

        let json = serde_json::to_string(&sequence).unwrap();
        let decoded: SequenceCompleted = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, sequence);
    }
}
