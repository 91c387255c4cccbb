//! Session protocol between the dispatcher and a cell
//!
//! A session is one continuous conversation with a cell. It is a chain of
//! append-only messages:
//!
//! ```text
//! ReadyToWork ─► ActivityStart ─► ActivityCompleted ─► SequenceCompleted ─► ReadyToWork | end
//!      │
//!      └─► NotReadyToWork ─► (same) ReadyToWork
//! ```
//!
//! Every transition copies the predecessor's `Session` snapshot and advances
//! only the fields belonging to that transition. No message is ever modified
//! after it was built, so messages can be handed across threads and process
//! boundaries without synchronization.

mod activity;
mod constraint;
mod message;
mod ready_to_work;
mod sequence;

pub use activity::{ActivityCompleted, ActivityStart, ResultOrigin, UnknownActivityAborted};
pub use constraint::Constraint;
pub use message::{SessionEnvelope, SessionMessage, SessionMessageKind};
pub use ready_to_work::{NotReadyToWork, ReadyToWork, ReadyToWorkType};
pub use sequence::{SequenceBoundary, SequenceCompleted};

use production_model::{ActivityClassification, ActivityHandle, Identity, ProcessHandle};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::reference::ProcessReference;

/// Stable identifier of one session conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot carried by every message of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SessionContext {
    session_id: SessionId,
    classification: ActivityClassification,
    /// Not part of the wire form, the reference routes back to it
    #[serde(skip)]
    process: Option<ProcessHandle>,
    reference: ProcessReference,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    tag: serde_json::Value,
}

/// Common part of every session message.
///
/// Only the transition constructors in this module create advanced copies;
/// callers get read accessors only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Session {
    context: SessionContext,
}

impl Session {
    fn open(classification: ActivityClassification, reference: ProcessReference) -> Self {
        Self {
            context: SessionContext {
                session_id: SessionId::new(),
                classification,
                process: None,
                reference,
                tag: serde_json::Value::Null,
            },
        }
    }

    // ------------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------------

    /// Start an untargeted session
    pub fn start_session(
        classification: ActivityClassification,
        kind: ReadyToWorkType,
    ) -> ReadyToWork {
        ReadyToWork::new(
            Self::open(classification, ProcessReference::Empty),
            kind,
            Vec::new(),
        )
    }

    /// Start a session that only accepts work for one process
    pub fn start_session_for_process(
        classification: ActivityClassification,
        kind: ReadyToWorkType,
        process_id: i64,
    ) -> ReadyToWork {
        ReadyToWork::new(
            Self::open(classification, ProcessReference::process_id(process_id)),
            kind,
            Vec::new(),
        )
    }

    /// Start a session that only accepts work for one product instance
    pub fn start_session_for_instance(
        classification: ActivityClassification,
        kind: ReadyToWorkType,
        identity: Identity,
    ) -> ReadyToWork {
        ReadyToWork::new(
            Self::open(classification, ProcessReference::instance_identity(identity)),
            kind,
            Vec::new(),
        )
    }

    /// Start a session with explicit constraints.
    ///
    /// This is the entry point for callers that decode sessions from an
    /// external source, where the constraint set may be absent altogether.
    pub fn start_session_with(
        classification: ActivityClassification,
        kind: ReadyToWorkType,
        reference: ProcessReference,
        constraints: Option<Vec<Constraint>>,
    ) -> Result<ReadyToWork, SessionError> {
        let constraints = constraints.ok_or(SessionError::MissingConstraints)?;
        Ok(ReadyToWork::new(
            Self::open(classification, reference),
            kind,
            constraints,
        ))
    }

    /// Absorb a completion report that has no live session.
    ///
    /// Builds a throwaway session bound to the activity's process, marks the
    /// activity failed and closes the sequence as inactive.
    pub fn wrap_unknown_activity(activity: ActivityHandle) -> UnknownActivityAborted {
        let ready = Self::start_session_for_process(
            activity.classification(),
            ReadyToWorkType::Pull,
            activity.process().id,
        );
        let start = ready.start_activity(activity);
        start.activity().fail();

        let completed = ActivityCompleted::from_start(&start, ResultOrigin::Attached);
        let sequence = completed.complete_sequence(None, false, Vec::new());

        UnknownActivityAborted::new(completed, sequence)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn id(&self) -> SessionId {
        self.context.session_id
    }

    pub fn accepted_classification(&self) -> ActivityClassification {
        self.context.classification
    }

    pub fn process(&self) -> Option<&ProcessHandle> {
        self.context.process.as_ref()
    }

    pub fn reference(&self) -> &ProcessReference {
        &self.context.reference
    }

    pub fn tag(&self) -> &serde_json::Value {
        &self.context.tag
    }

    // ------------------------------------------------------------------------
    // Advance constructors (copy, then advance)
    // ------------------------------------------------------------------------

    /// Copy with the activity's process bound and the reference pinned to it
    fn bind_activity(&self, activity: &ActivityHandle) -> Self {
        let mut context = self.context.clone();
        context.process = Some(activity.process().clone());
        context.reference = ProcessReference::process_id(activity.process().id);
        Self { context }
    }

    /// Copy with the process replaced
    fn bind_process(&self, process: Option<ProcessHandle>) -> Self {
        let mut context = self.context.clone();
        context.process = process;
        Self { context }
    }

    /// Copy with a new tag
    fn with_tag(&self, tag: serde_json::Value) -> Self {
        let mut context = self.context.clone();
        context.tag = tag;
        Self { context }
    }
}
