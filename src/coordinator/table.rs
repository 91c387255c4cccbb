//! SessionTable - open sessions of all attached cells, keyed by session id

use std::collections::HashMap;

use crate::cell::CellId;
use crate::session::{ActivityStart, ReadyToWork, SessionId, SessionMessage};

/// Latest message of one open session and the cell holding it
#[derive(Debug, Clone)]
pub struct OpenSession {
    pub cell: CellId,
    pub message: SessionMessage,
}

#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionId, OpenSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest message of a session. Returns the replaced entry.
    pub fn upsert(&mut self, cell: CellId, message: SessionMessage) -> Option<OpenSession> {
        self.sessions
            .insert(message.id(), OpenSession { cell, message })
    }

    pub fn get(&self, session_id: &SessionId) -> Option<&OpenSession> {
        self.sessions.get(session_id)
    }

    pub fn remove(&mut self, session_id: &SessionId) -> Option<OpenSession> {
        self.sessions.remove(session_id)
    }

    /// Drop every session of `cell`
    pub fn remove_cell(&mut self, cell: CellId) -> Vec<OpenSession> {
        let ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, open)| open.cell == cell)
            .map(|(id, _)| *id)
            .collect();

        ids.iter()
            .filter_map(|id| self.sessions.remove(id))
            .collect()
    }

    pub fn by_cell(&self, cell: CellId) -> Vec<&OpenSession> {
        let mut open: Vec<&OpenSession> = self
            .sessions
            .values()
            .filter(|open| open.cell == cell)
            .collect();
        open.sort_by_key(|open| open.message.id());
        open
    }

    /// Sessions waiting for work, ordered by cell then session id
    pub fn ready_sessions(&self) -> Vec<(CellId, ReadyToWork)> {
        let mut ready: Vec<(CellId, ReadyToWork)> = self
            .sessions
            .values()
            .filter_map(|open| match &open.message {
                SessionMessage::ReadyToWork(ready) => Some((open.cell, ready.clone())),
                _ => None,
            })
            .collect();
        ready.sort_by_key(|(cell, ready)| (*cell, ready.session().id()));
        ready
    }

    /// Sessions with an activity being executed, ordered by cell then session id
    pub fn in_flight(&self) -> Vec<(CellId, ActivityStart)> {
        let mut running: Vec<(CellId, ActivityStart)> = self
            .sessions
            .values()
            .filter_map(|open| match &open.message {
                SessionMessage::ActivityStart(start) => Some((open.cell, start.clone())),
                _ => None,
            })
            .collect();
        running.sort_by_key(|(cell, start)| (*cell, start.session().id()));
        running
    }

    /// The in-flight session executing `activity_id`
    pub fn activity_session(&self, activity_id: i64) -> Option<&OpenSession> {
        self.sessions.values().find(|open| {
            matches!(
                &open.message,
                SessionMessage::ActivityStart(start) if start.activity().id() == activity_id
            )
        })
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
