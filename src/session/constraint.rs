//! Constraints a cell attaches to a genuine session start

use production_model::{Activity, Identity};
use serde::{Deserialize, Serialize};

/// Predicate over an activity that the dispatcher must satisfy before
/// binding it to the constrained session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Constraint {
    /// Only activities of this type
    ActivityType { name: String },
    /// Only activities of processes running this recipe
    Recipe { recipe_id: i64 },
    /// Only activities whose parameter `name` equals `equals`
    Parameter {
        name: String,
        equals: serde_json::Value,
    },
    /// Only activities for the product with this identity
    ProductIdentity { identity: Identity },
}

impl Constraint {
    pub fn check(&self, activity: &Activity) -> bool {
        match self {
            Self::ActivityType { name } => activity.activity_type() == name.as_str(),
            Self::Recipe { recipe_id } => activity
                .process()
                .recipe
                .as_ref()
                .map(|recipe| recipe.id == *recipe_id)
                .unwrap_or(false),
            Self::Parameter { name, equals } => activity.parameter(name) == Some(equals),
            Self::ProductIdentity { identity } => activity.process().identity() == Some(identity),
        }
    }
}
