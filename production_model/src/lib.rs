//! Production Model - Level 1 execution types
//!
//! The dispatch core consumes these types but does not own them: activities,
//! processes and product identities are created by the order/recipe side of the
//! control system and handed over for execution.
//!
//! ## Contents
//!
//! - `ActivityClassification` - capability bitset shared by cells and activities
//! - `Identity` / `ProductInstance` / `Process` - what an activity is executed for
//! - `Activity` - one schedulable step, with its result and tracing slots
//!
//! ## Mutation rules
//!
//! Everything here is immutable after construction except two slots on
//! `Activity`: the result (`complete` / `fail`) and the tracing payload. Those
//! are the external activity graph the dispatch core is allowed to touch, and
//! callers serialize access per activity.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;

// ============================================================================
// CLASSIFICATION
// ============================================================================

bitflags! {
    /// Kinds of activities. Cells declare the set they accept, activities
    /// carry exactly the kind they are.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ActivityClassification: u32 {
        const PRODUCTION = 0b0000_0001;
        const SETUP = 0b0000_0010;
        const PREPARATION = 0b0000_0100;
        const CLEANUP = 0b0000_1000;
        const ASSEMBLY = 0b0001_0000;
        const INSPECTION = 0b0010_0000;
    }
}

impl Default for ActivityClassification {
    fn default() -> Self {
        Self::PRODUCTION
    }
}

// ============================================================================
// IDENTITIES AND PROCESSES
// ============================================================================

/// Opaque product identity (serial number, batch number, ...). Only equality
/// is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A concrete product being built by a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductInstance {
    pub id: i64,
    /// Not every instance is identified yet (e.g. before the serial is lasered)
    pub identity: Option<Identity>,
}

impl ProductInstance {
    pub fn new(id: i64) -> Self {
        Self { id, identity: None }
    }

    pub fn identified(id: i64, identity: Identity) -> Self {
        Self {
            id,
            identity: Some(identity),
        }
    }
}

/// Recipe reference - the recipe model itself lives outside this crate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeRef {
    pub id: i64,
    pub name: String,
}

/// One in-flight execution of a recipe against a product instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub id: i64,
    pub recipe: Option<RecipeRef>,
    pub product_instance: Option<ProductInstance>,
}

impl Process {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            recipe: None,
            product_instance: None,
        }
    }

    pub fn with_recipe(mut self, id: i64, name: impl Into<String>) -> Self {
        self.recipe = Some(RecipeRef {
            id,
            name: name.into(),
        });
        self
    }

    pub fn with_product_instance(mut self, instance: ProductInstance) -> Self {
        self.product_instance = Some(instance);
        self
    }

    /// Identity of the product instance, if both are present
    pub fn identity(&self) -> Option<&Identity> {
        self.product_instance
            .as_ref()
            .and_then(|instance| instance.identity.as_ref())
    }
}

/// Shared handle to a process
pub type ProcessHandle = Arc<Process>;

// ============================================================================
// ACTIVITY RESULT
// ============================================================================

/// Result attached to a finished activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityResult {
    /// Numeric result code reported by the cell
    pub numeric: i64,
    pub success: bool,
}

impl ActivityResult {
    /// Numeric code used when an activity is failed without a cell report
    pub const FAILURE_CODE: i64 = -1;

    /// Code 0 is success, everything else is a failure variant
    pub fn from_code(code: i64) -> Self {
        Self {
            numeric: code,
            success: code == 0,
        }
    }

    pub fn failed() -> Self {
        Self {
            numeric: Self::FAILURE_CODE,
            success: false,
        }
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Errors converting an activity's tracing payload
#[derive(Error, Debug)]
pub enum TracingError {
    #[error("Tracing of activity {activity_id} cannot be converted to {target}: {source}")]
    Incompatible {
        activity_id: i64,
        target: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Base tracing every activity carries. Cell drivers may transform it into a
/// richer type with `Activity::transform_tracing`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivityTracing {
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    /// 0-100
    pub progress: u8,
    pub text: Option<String>,
}

// ============================================================================
// ACTIVITY
// ============================================================================

/// One schedulable step of a production process
#[derive(Debug)]
pub struct Activity {
    id: i64,
    activity_type: String,
    classification: ActivityClassification,
    process: ProcessHandle,
    parameters: BTreeMap<String, serde_json::Value>,
    result: RwLock<Option<ActivityResult>>,
    tracing: RwLock<serde_json::Value>,
}

/// Shared handle to an activity
pub type ActivityHandle = Arc<Activity>;

impl Activity {
    pub fn new(id: i64, activity_type: impl Into<String>, process: ProcessHandle) -> Self {
        Self {
            id,
            activity_type: activity_type.into(),
            classification: ActivityClassification::default(),
            process,
            parameters: BTreeMap::new(),
            result: RwLock::new(None),
            tracing: RwLock::new(serde_json::Value::Null),
        }
    }

    pub fn with_classification(mut self, classification: ActivityClassification) -> Self {
        self.classification = classification;
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    /// Wrap into a shared handle
    pub fn into_handle(self) -> ActivityHandle {
        Arc::new(self)
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn activity_type(&self) -> &str {
        &self.activity_type
    }

    pub fn classification(&self) -> ActivityClassification {
        self.classification
    }

    pub fn process(&self) -> &ProcessHandle {
        &self.process
    }

    pub fn parameters(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.parameters
    }

    pub fn parameter(&self, name: &str) -> Option<&serde_json::Value> {
        self.parameters.get(name)
    }

    /// Current result, `None` while the activity is still running
    pub fn result(&self) -> Option<ActivityResult> {
        *self.result.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_completed(&self) -> bool {
        self.result().is_some()
    }

    /// Attach a result for the given code. Overwrites any previous result.
    pub fn complete(&self, code: i64) {
        let mut slot = self.result.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(ActivityResult::from_code(code));
    }

    /// Attach the failure result. Overwrites any previous result.
    pub fn fail(&self) {
        let mut slot = self.result.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(ActivityResult::failed());
    }

    /// Reinterpret the tracing payload as `T` and keep it in that shape.
    ///
    /// An activity that was never traced yields `T::default()`. Fields unknown
    /// to `T` are dropped, so transforming to a narrower type is lossy.
    pub fn transform_tracing<T>(&self) -> Result<T, TracingError>
    where
        T: Serialize + DeserializeOwned + Default,
    {
        let mut slot = self.tracing.write().unwrap_or_else(PoisonError::into_inner);
        let typed = self.decode_tracing::<T>(&slot)?;
        *slot = self.encode_tracing(&typed)?;
        Ok(typed)
    }

    /// Transform to `T`, apply `update`, store the result
    pub fn update_tracing<T, F>(&self, update: F) -> Result<T, TracingError>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T),
    {
        let mut slot = self.tracing.write().unwrap_or_else(PoisonError::into_inner);
        let mut typed = self.decode_tracing::<T>(&slot)?;
        update(&mut typed);
        *slot = self.encode_tracing(&typed)?;
        Ok(typed)
    }

    fn decode_tracing<T: DeserializeOwned + Default>(
        &self,
        raw: &serde_json::Value,
    ) -> Result<T, TracingError> {
        if raw.is_null() {
            return Ok(T::default());
        }
        serde_json::from_value(raw.clone()).map_err(|source| TracingError::Incompatible {
            activity_id: self.id,
            target: std::any::type_name::<T>(),
            source,
        })
    }

    fn encode_tracing<T: Serialize>(&self, typed: &T) -> Result<serde_json::Value, TracingError> {
        serde_json::to_value(typed).map_err(|source| TracingError::Incompatible {
            activity_id: self.id,
            target: std::any::type_name::<T>(),
            source,
        })
    }
}
