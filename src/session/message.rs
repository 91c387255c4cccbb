//! SessionMessage - any message of the session chain
//!
//! Tables and transports deal with heterogeneous messages; this is the tagged
//! union over them plus a flat, serializable envelope. Activities themselves
//! never travel: an envelope carries the activity id and the receiving side
//! rebinds it to its own activity graph.

use production_model::ActivityResult;
use serde::{Deserialize, Serialize};

use super::activity::{ActivityCompleted, ActivityStart, UnknownActivityAborted};
use super::constraint::Constraint;
use super::ready_to_work::{NotReadyToWork, ReadyToWork, ReadyToWorkType};
use super::sequence::SequenceCompleted;
use super::{Session, SessionId};
use crate::cell::CellId;

/// Message kind discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMessageKind {
    ReadyToWork,
    NotReadyToWork,
    ActivityStart,
    ActivityCompleted,
    SequenceCompleted,
}

impl SessionMessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadyToWork => "ready_to_work",
            Self::NotReadyToWork => "not_ready_to_work",
            Self::ActivityStart => "activity_start",
            Self::ActivityCompleted => "activity_completed",
            Self::SequenceCompleted => "sequence_completed",
        }
    }
}

impl std::fmt::Display for SessionMessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Any message of a session chain
#[derive(Debug, Clone)]
pub enum SessionMessage {
    ReadyToWork(ReadyToWork),
    NotReadyToWork(NotReadyToWork),
    ActivityStart(ActivityStart),
    ActivityCompleted(ActivityCompleted),
    SequenceCompleted(SequenceCompleted),
}

impl SessionMessage {
    pub fn session(&self) -> &Session {
        match self {
            Self::ReadyToWork(m) => m.session(),
            Self::NotReadyToWork(m) => m.session(),
            Self::ActivityStart(m) => m.session(),
            Self::ActivityCompleted(m) => m.session(),
            Self::SequenceCompleted(m) => m.session(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.session().id()
    }

    pub fn kind(&self) -> SessionMessageKind {
        match self {
            Self::ReadyToWork(_) => SessionMessageKind::ReadyToWork,
            Self::NotReadyToWork(_) => SessionMessageKind::NotReadyToWork,
            Self::ActivityStart(_) => SessionMessageKind::ActivityStart,
            Self::ActivityCompleted(_) => SessionMessageKind::ActivityCompleted,
            Self::SequenceCompleted(_) => SessionMessageKind::SequenceCompleted,
        }
    }

    /// Flat wire form
    pub fn envelope(&self) -> SessionEnvelope {
        let mut envelope = SessionEnvelope {
            kind: self.kind(),
            session: self.session().clone(),
            ready_to_work_type: None,
            constraints: Vec::new(),
            activity_id: None,
            result: None,
            process_active: None,
            next_cells: Vec::new(),
        };

        match self {
            Self::ReadyToWork(m) => {
                envelope.ready_to_work_type = Some(m.kind());
                envelope.constraints = m.constraints().to_vec();
            }
            Self::NotReadyToWork(m) => {
                envelope.ready_to_work_type = Some(m.paused().kind());
                envelope.constraints = m.paused().constraints().to_vec();
            }
            Self::ActivityStart(m) => {
                envelope.activity_id = Some(m.activity().id());
            }
            Self::ActivityCompleted(m) => {
                envelope.activity_id = Some(m.activity().id());
                envelope.result = m.result();
            }
            Self::SequenceCompleted(m) => {
                envelope.process_active = Some(m.process_active());
                envelope.next_cells = m.next_cells().to_vec();
            }
        }

        envelope
    }
}

impl From<ReadyToWork> for SessionMessage {
    fn from(message: ReadyToWork) -> Self {
        Self::ReadyToWork(message)
    }
}

impl From<NotReadyToWork> for SessionMessage {
    fn from(message: NotReadyToWork) -> Self {
        Self::NotReadyToWork(message)
    }
}

impl From<ActivityStart> for SessionMessage {
    fn from(message: ActivityStart) -> Self {
        Self::ActivityStart(message)
    }
}

impl From<ActivityCompleted> for SessionMessage {
    fn from(message: ActivityCompleted) -> Self {
        Self::ActivityCompleted(message)
    }
}

impl From<UnknownActivityAborted> for SessionMessage {
    fn from(message: UnknownActivityAborted) -> Self {
        Self::ActivityCompleted(message.into_completed())
    }
}

impl From<SequenceCompleted> for SessionMessage {
    fn from(message: SequenceCompleted) -> Self {
        Self::SequenceCompleted(message)
    }
}

/// Serializable projection of a `SessionMessage`.
///
/// Session id, classification, reference and tag survive a round trip
/// exactly; kind-specific fields are only present for their kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEnvelope {
    pub kind: SessionMessageKind,
    pub session: Session,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_to_work_type: Option<ReadyToWorkType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<Constraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActivityResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_cells: Vec<CellId>,
}
