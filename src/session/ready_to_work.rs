//! ReadyToWork / NotReadyToWork - session start and pause markers

use std::sync::Arc;

use production_model::ActivityHandle;
use serde::{Deserialize, Serialize};

use super::activity::ActivityStart;
use super::constraint::Constraint;
use super::sequence::SequenceBoundary;
use super::Session;

/// How the cell asks for work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyToWorkType {
    /// Unsolicited availability announcement
    Push,
    /// Explicit request for work
    Pull,
}

impl ReadyToWorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl std::fmt::Display for ReadyToWorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct ReadyToWorkState {
    session: Session,
    kind: ReadyToWorkType,
    #[serde(default)]
    constraints: Vec<Constraint>,
}

/// Session start: the cell is available for work.
///
/// Cloning shares the same instance. `same_instance` tells whether two handles
/// are that same message, which is what pause/resume guarantees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReadyToWork {
    state: Arc<ReadyToWorkState>,
}

impl ReadyToWork {
    pub(super) fn new(session: Session, kind: ReadyToWorkType, constraints: Vec<Constraint>) -> Self {
        Self {
            state: Arc::new(ReadyToWorkState {
                session,
                kind,
                constraints,
            }),
        }
    }

    pub fn session(&self) -> &Session {
        &self.state.session
    }

    pub fn kind(&self) -> ReadyToWorkType {
        self.state.kind
    }

    /// Predicates the dispatcher must satisfy. Empty on every resumed or
    /// continued session.
    pub fn constraints(&self) -> &[Constraint] {
        &self.state.constraints
    }

    /// Do all constraints accept this activity?
    pub fn constraints_satisfied_by(&self, activity: &production_model::Activity) -> bool {
        self.state.constraints.iter().all(|c| c.check(activity))
    }

    /// Whether `other` is this very message and not merely an equal one
    pub fn same_instance(&self, other: &ReadyToWork) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// New message carrying a caller payload; everything else is copied
    pub fn with_tag(&self, tag: serde_json::Value) -> ReadyToWork {
        ReadyToWork::new(
            self.state.session.with_tag(tag),
            self.state.kind,
            self.state.constraints.clone(),
        )
    }

    /// Bind an activity to this session.
    ///
    /// Only call this on a `ReadyToWork` the dispatcher intends to fulfil; no
    /// matching is verified here.
    pub fn start_activity(&self, activity: ActivityHandle) -> ActivityStart {
        ActivityStart::new(self.state.session.bind_activity(&activity), activity)
    }

    /// Pause the session. The returned marker resumes into this instance.
    pub fn pause_session(&self) -> NotReadyToWork {
        NotReadyToWork {
            session: self.state.session.clone(),
            paused: self.clone(),
        }
    }

    /// Continuation after a sequence: constraints dropped, always pull
    pub(super) fn continued(session: Session) -> Self {
        Self::new(session, ReadyToWorkType::Pull, Vec::new())
    }
}

impl SequenceBoundary for ReadyToWork {
    fn boundary_session(&self) -> &Session {
        &self.state.session
    }
}

/// Pause marker pointing back at the `ReadyToWork` it paused
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotReadyToWork {
    session: Session,
    paused: ReadyToWork,
}

impl NotReadyToWork {
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// The paused message
    pub fn paused(&self) -> &ReadyToWork {
        &self.paused
    }

    /// Resume into the exact `ReadyToWork` that was paused
    pub fn resume_session(&self) -> ReadyToWork {
        self.paused.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use production_model::ActivityClassification;

    fn constrained() -> ReadyToWork {
        Session::start_session_with(
            ActivityClassification::PRODUCTION,
            ReadyToWorkType::Push,
            crate::reference::ProcessReference::Empty,
            Some(vec![Constraint::ActivityType {
                name: "Mount".to_string(),
            }]),
        )
        .unwrap()
    }

    #[test]
    fn test_pause_resume_returns_same_instance() {
        let ready = constrained();
        let paused = ready.pause_session();

        assert_eq!(paused.session().id(), ready.session().id());
        assert!(paused.paused().same_instance(&ready));

        let resumed = paused.resume_session();
        assert!(resumed.same_instance(&ready));
        // Resuming a pause keeps the original constraints and type
        assert_eq!(resumed.constraints().len(), 1);
        assert_eq!(resumed.kind(), ReadyToWorkType::Push);

        // Only a continuation after a sequence drops them
        let continued = resumed
            .complete_sequence(None, true, Vec::new())
            .continue_session();
        assert!(continued.constraints().is_empty());
        assert_eq!(continued.kind(), ReadyToWorkType::Pull);
    }

    #[test]
    fn test_equal_is_not_same_instance() {
        let ready = constrained();
        let json = serde_json::to_string(&ready).unwrap();
        let decoded: ReadyToWork = serde_json::from_str(&json).unwrap();

        assert_eq!(decoded, ready);
        assert!(!decoded.same_instance(&ready));
    }

    #[test]
    fn test_with_tag_copies() {
        let ready = constrained();
        let tagged = ready.with_tag(serde_json::json!("order-17"));

        assert!(ready.session().tag().is_null());
        assert_eq!(tagged.session().tag(), &serde_json::json!("order-17"));
        assert_eq!(tagged.session().id(), ready.session().id());
        assert_eq!(tagged.constraints(), ready.constraints());
        assert!(!tagged.same_instance(&ready));
    }

    #[test]
    fn test_ready_to_work_type_serde() {
        assert_eq!(
            serde_json::to_string(&ReadyToWorkType::Pull).unwrap(),
            "\"pull\""
        );
        let push: ReadyToWorkType = serde_json::from_str("\"push\"").unwrap();
        assert_eq!(push, ReadyToWorkType::Push);
    }
}
