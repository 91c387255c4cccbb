//! ProcessReference - routes a pending request to a concrete process
//!
//! A reference is pinned either to a process id or to the identity of the
//! product instance a process builds. On the wire it keeps the flat encoding
//! `{process_id, identity}` where `0` means empty and `-1` means "match by
//! identity".

use production_model::{Identity, Process};
use serde::{Deserialize, Serialize};

/// Routing key matching a request to a process
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawProcessReference", into = "RawProcessReference")]
pub enum ProcessReference {
    /// Not bound to any process
    #[default]
    Empty,
    /// Bound to a process id. Ids are positive.
    ProcessId(i64),
    /// Bound to whatever process builds the product with this identity
    InstanceIdentity(Identity),
}

impl ProcessReference {
    /// Raw id marking an empty reference
    pub const EMPTY_ID: i64 = 0;
    /// Raw id marking an identity reference
    pub const IDENTITY_ID: i64 = -1;

    /// Reference to a process id. Non-positive ids yield `Empty`.
    pub fn process_id(id: i64) -> Self {
        if id > 0 {
            Self::ProcessId(id)
        } else {
            Self::Empty
        }
    }

    pub fn instance_identity(identity: Identity) -> Self {
        Self::InstanceIdentity(identity)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    /// Does this reference route to `process`?
    ///
    /// An empty reference matches nothing. An identity reference needs the
    /// process to carry an identified product instance.
    pub fn matches(&self, process: &Process) -> bool {
        match self {
            Self::Empty => false,
            Self::ProcessId(id) => process.id == *id,
            Self::InstanceIdentity(identity) => process.identity() == Some(identity),
        }
    }

    /// Flat wire encoding
    pub fn to_raw(&self) -> RawProcessReference {
        self.clone().into()
    }
}

impl std::fmt::Display for ProcessReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::ProcessId(id) => write!(f, "process:{}", id),
            Self::InstanceIdentity(identity) => write!(f, "identity:{}", identity),
        }
    }
}

/// Flat `{process_id, identity}` form used for transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProcessReference {
    pub process_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl From<ProcessReference> for RawProcessReference {
    fn from(reference: ProcessReference) -> Self {
        match reference {
            ProcessReference::Empty => Self {
                process_id: ProcessReference::EMPTY_ID,
                identity: None,
            },
            ProcessReference::ProcessId(id) => Self {
                process_id: id,
                identity: None,
            },
            ProcessReference::InstanceIdentity(identity) => Self {
                process_id: ProcessReference::IDENTITY_ID,
                identity: Some(identity),
            },
        }
    }
}

impl From<RawProcessReference> for ProcessReference {
    fn from(raw: RawProcessReference) -> Self {
        match (raw.process_id, raw.identity) {
            (ProcessReference::IDENTITY_ID, Some(identity)) => Self::InstanceIdentity(identity),
            (id, _) => Self::process_id(id),
        }
    }
}
