//! ActivityStart / ActivityCompleted - binding and finishing one activity

use production_model::{ActivityHandle, ActivityResult};
use serde::{Deserialize, Serialize};

use super::sequence::{SequenceBoundary, SequenceCompleted};
use super::Session;
use crate::error::SessionError;

/// An activity bound to a session. From here on the session is pinned to the
/// activity's process.
#[derive(Debug, Clone)]
pub struct ActivityStart {
    session: Session,
    activity: ActivityHandle,
}

impl ActivityStart {
    pub(super) fn new(session: Session, activity: ActivityHandle) -> Self {
        Self { session, activity }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn activity(&self) -> &ActivityHandle {
        &self.activity
    }

    /// Report the result the activity already carries
    pub fn create_result(&self) -> Result<ActivityCompleted, SessionError> {
        if !self.activity.is_completed() {
            return Err(SessionError::ResultMissing {
                activity_id: self.activity.id(),
            });
        }
        Ok(ActivityCompleted::from_start(self, ResultOrigin::Reported))
    }

    /// Report completion, attaching `code` if the activity has no result yet.
    ///
    /// An existing result is left untouched; `ActivityCompleted::origin` says
    /// which of the two happened.
    pub fn create_result_with(&self, code: i64) -> ActivityCompleted {
        if self.activity.is_completed() {
            return ActivityCompleted::from_start(self, ResultOrigin::Reported);
        }
        self.activity.complete(code);
        ActivityCompleted::from_start(self, ResultOrigin::Attached)
    }
}

/// Who put the result on a completed activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrigin {
    /// The activity already had its result
    Reported,
    /// The result was attached while building the completion
    Attached,
}

/// A finished activity reported back by the cell
#[derive(Debug, Clone)]
pub struct ActivityCompleted {
    session: Session,
    activity: ActivityHandle,
    origin: ResultOrigin,
}

impl ActivityCompleted {
    pub(super) fn from_start(start: &ActivityStart, origin: ResultOrigin) -> Self {
        Self {
            session: start.session.clone(),
            activity: start.activity.clone(),
            origin,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn activity(&self) -> &ActivityHandle {
        &self.activity
    }

    pub fn origin(&self) -> ResultOrigin {
        self.origin
    }

    /// Result of the wrapped activity
    pub fn result(&self) -> Option<ActivityResult> {
        self.activity.result()
    }
}

impl SequenceBoundary for ActivityCompleted {
    fn boundary_session(&self) -> &Session {
        &self.session
    }
}

/// Completion for an activity nobody had a session for.
///
/// The activity is marked failed and the fabricated session is closed with an
/// inactive sequence so bookkeeping can treat it like any other completion.
#[derive(Debug, Clone)]
pub struct UnknownActivityAborted {
    completed: ActivityCompleted,
    sequence: SequenceCompleted,
}

impl UnknownActivityAborted {
    pub(super) fn new(completed: ActivityCompleted, sequence: SequenceCompleted) -> Self {
        Self {
            completed,
            sequence,
        }
    }

    pub fn completed(&self) -> &ActivityCompleted {
        &self.completed
    }

    pub fn sequence_completed(&self) -> &SequenceCompleted {
        &self.sequence
    }

    pub fn into_completed(self) -> ActivityCompleted {
        self.completed
    }
}

impl AsRef<ActivityCompleted> for UnknownActivityAborted {
    fn as_ref(&self) -> &ActivityCompleted {
        &self.completed
    }
}
