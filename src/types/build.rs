//! Build plans and timeline actions
//!
//! A `BuildPlan` is the player-supplied input to the simulation engine:
//! an initial tower layout plus a timeline of actions. Plans are immutable
//! after ingest; runtime effects are modeled as a fold over the sorted
//! action list, never as in-place mutation of the plan.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::scenario::ModelError;

/// Default targeting priorities for a tower plan.
pub fn default_focus_priorities() -> Vec<String> {
    vec!["progress".to_string(), "lowest_hp".to_string()]
}

/// Initial tower placement in a build plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerPlan {
    pub tower_id: String,
    #[serde(default = "default_tower_count")]
    pub count: u32,
    #[serde(default)]
    pub level: u32,
    #[serde(default = "default_focus_priorities")]
    pub focus_priorities: Vec<String>,
    #[serde(default)]
    pub focus_until_death: bool,
}

fn default_tower_count() -> u32 {
    1
}

/// Timeline action kinds. Closed enumeration: unknown kinds are rejected
/// at ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Build,
    Sell,
    Upgrade,
    Modifier,
    Targeting,
    AssignWorkers,
    EconomyPolicy,
}

/// One timeline action, anchored at `(wave, at_s)`.
///
/// The `payload` carries action-specific parameters (`count`, `level`,
/// `levels`, `focus_priorities`, worker targets, policy ids); accessors in
/// the engine runtime interpret it per action type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildAction {
    pub wave: u32,
    #[serde(default)]
    pub at_s: f64,
    #[serde(rename = "type")]
    pub kind: ActionType,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

/// A scenario-bound build plan with its action timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPlan {
    pub scenario_id: String,
    #[serde(default)]
    pub towers: Vec<TowerPlan>,
    #[serde(default)]
    pub active_global_modifiers: Vec<String>,
    #[serde(default)]
    pub actions: Vec<BuildAction>,
}

impl BuildPlan {
    /// Parse and validate a plan from JSON. Actions are sorted by
    /// `(wave, at_s)` here so every consumer sees a canonical timeline.
    pub fn from_value(value: &Value) -> Result<Self, ModelError> {
        let mut plan: BuildPlan = serde_json::from_value(value.clone())?;
        for action in &plan.actions {
            if action.wave < 1 {
                return Err(ModelError::Invalid(format!(
                    "action wave must be >= 1, got {}",
                    action.wave
                )));
            }
            if action.at_s < 0.0 {
                return Err(ModelError::Invalid(format!(
                    "action at_s must be >= 0, got {}",
                    action.at_s
                )));
            }
        }
        plan.actions
            .sort_by(|a, b| a.wave.cmp(&b.wave).then(a.at_s.total_cmp(&b.at_s)));
        Ok(plan)
    }
}
