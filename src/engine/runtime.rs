//! Build-plan runtime state
//!
//! Runtime effects of timeline actions are a pure fold: before simulating
//! wave W, the initial layout plus every action with `wave <= W` (in the
//! plan's canonical order) is replayed into a fresh state. The plan itself
//! is never mutated.

use serde_json::{Map, Value};

use crate::types::{ActionType, BuildAction, BuildPlan};

/// One placed tower at runtime.
#[derive(Debug, Clone)]
pub struct RuntimeTower {
    pub tower_id: String,
    pub level: u32,
    pub focus_priorities: Vec<String>,
    pub focus_until_death: bool,
}

/// Mutable state folded from a build plan.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub towers: Vec<RuntimeTower>,
    pub active_modifier_ids: Vec<String>,
}

/// Integer payload accessor accepting numbers and numeric strings.
pub fn payload_i64(payload: &Map<String, Value>, key: &str) -> Option<i64> {
    match payload.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(i64::from(*b)),
        _ => None,
    }
}

pub fn payload_str<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

pub fn payload_bool(payload: &Map<String, Value>, key: &str) -> Option<bool> {
    match payload.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => Some(n.as_f64().unwrap_or(0.0) != 0.0),
        _ => None,
    }
}

fn payload_string_list(payload: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    payload.get(key).and_then(Value::as_array).map(|items| {
        items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect()
    })
}

/// Tower id targeted by a build action: payload override, else target_id.
pub fn build_action_tower_id(action: &BuildAction) -> String {
    payload_str(&action.payload, "tower_id")
        .unwrap_or(&action.target_id)
        .trim()
        .to_string()
}

/// Unit count of a build action: payload `count`, else a positive `value`,
/// else 1.
pub fn build_action_count(action: &BuildAction) -> i64 {
    payload_i64(&action.payload, "count")
        .unwrap_or_else(|| {
            if action.value != 0.0 {
                (action.value as i64).max(1)
            } else {
                1
            }
        })
        .max(0)
}

/// Declared level of a build action (default 0).
pub fn build_action_level(action: &BuildAction) -> i64 {
    payload_i64(&action.payload, "level").unwrap_or(0).max(0)
}

fn initial_runtime_state(build: &BuildPlan) -> RuntimeState {
    let mut towers = Vec::new();
    for plan in &build.towers {
        for _ in 0..plan.count {
            towers.push(RuntimeTower {
                tower_id: plan.tower_id.clone(),
                level: plan.level,
                focus_priorities: plan.focus_priorities.clone(),
                focus_until_death: plan.focus_until_death,
            });
        }
    }
    RuntimeState {
        towers,
        active_modifier_ids: build.active_global_modifiers.clone(),
    }
}

/// Fold one action into the runtime state. Economy actions are handled by
/// the economy accumulator and ignored here.
pub fn apply_action_to_state(state: &mut RuntimeState, action: &BuildAction) {
    match action.kind {
        ActionType::Build => {
            let tower_id = build_action_tower_id(action);
            if tower_id.is_empty() {
                return;
            }
            let count = build_action_count(action);
            let level = build_action_level(action);
            let focus_priorities = payload_string_list(&action.payload, "focus_priorities")
                .unwrap_or_else(crate::types::build::default_focus_priorities);
            let focus_until_death =
                payload_bool(&action.payload, "focus_until_death").unwrap_or(false);
            for _ in 0..count {
                state.towers.push(RuntimeTower {
                    tower_id: tower_id.clone(),
                    level: level as u32,
                    focus_priorities: focus_priorities.clone(),
                    focus_until_death,
                });
            }
        }
        ActionType::Sell => {
            if let Some(index) = state
                .towers
                .iter()
                .position(|tower| tower.tower_id == action.target_id)
            {
                state.towers.remove(index);
            }
        }
        ActionType::Upgrade => {
            let delta = payload_i64(&action.payload, "levels").unwrap_or_else(|| {
                if action.value != 0.0 {
                    action.value as i64
                } else {
                    1
                }
            });
            if let Some(tower) = state
                .towers
                .iter_mut()
                .find(|tower| tower.tower_id == action.target_id)
            {
                tower.level = (i64::from(tower.level) + delta).max(0) as u32;
            }
        }
        ActionType::Modifier => {
            let modifier_id = payload_str(&action.payload, "modifier_id")
                .unwrap_or(&action.target_id)
                .trim()
                .to_string();
            if modifier_id.is_empty() {
                return;
            }
            let enable =
                payload_bool(&action.payload, "enabled").unwrap_or(action.value >= 0.0);
            let present = state.active_modifier_ids.contains(&modifier_id);
            if enable && !present {
                state.active_modifier_ids.push(modifier_id);
            } else if !enable && present {
                state.active_modifier_ids.retain(|id| *id != modifier_id);
            }
        }
        ActionType::Targeting => {
            let priorities = payload_string_list(&action.payload, "focus_priorities")
                .unwrap_or_else(crate::types::build::default_focus_priorities);
            let sticky = payload_bool(&action.payload, "focus_until_death").unwrap_or(false);
            if let Some(tower) = state
                .towers
                .iter_mut()
                .find(|tower| tower.tower_id == action.target_id)
            {
                tower.focus_priorities = priorities;
                tower.focus_until_death = sticky;
            }
        }
        ActionType::AssignWorkers | ActionType::EconomyPolicy => {}
    }
}

/// Runtime state as of wave `wave_index`: initial layout plus every action
/// with `wave <= wave_index`.
pub fn runtime_for_wave(build: &BuildPlan, wave_index: u32) -> RuntimeState {
    let mut state = initial_runtime_state(build);
    for action in &build.actions {
        if action.wave > wave_index {
            break;
        }
        apply_action_to_state(&mut state, action);
    }
    state
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn plan(actions: Value) -> BuildPlan {
        BuildPlan::from_value(&json!({
            "scenario_id": "s",
            "towers": [{"tower_id": "arrow_tower", "count": 2, "level": 1}],
            "actions": actions
        }))
        .expect("plan")
    }

    #[test]
    fn initial_layout_expands_counts() {
        let state = runtime_for_wave(&plan(json!([])), 1);
        assert_eq!(state.towers.len(), 2);
        assert_eq!(state.towers[0].level, 1);
    }

    #[test]
    fn actions_before_wave_are_replayed_in_order() {
        let state = runtime_for_wave(
            &plan(json!([
                {"wave": 1, "at_s": 0.0, "type": "build",
                 "payload": {"tower_id": "frost_tower", "count": 1, "level": 2}},
                {"wave": 2, "at_s": 0.0, "type": "sell", "target_id": "arrow_tower"},
                {"wave": 3, "at_s": 0.0, "type": "upgrade", "target_id": "arrow_tower",
                 "payload": {"levels": 2}}
            ])),
            2,
        );
        // The wave-3 upgrade is not applied yet.
        assert_eq!(state.towers.len(), 2);
        assert!(state.towers.iter().any(|t| t.tower_id == "frost_tower"));
        assert_eq!(
            state
                .towers
                .iter()
                .filter(|t| t.tower_id == "arrow_tower")
                .count(),
            1
        );
        assert_eq!(state.towers[0].level, 1);
    }

    #[test]
    fn upgrade_clamps_at_zero() {
        let state = runtime_for_wave(
            &plan(json!([
                {"wave": 1, "at_s": 0.0, "type": "upgrade", "target_id": "arrow_tower",
                 "payload": {"levels": -5}}
            ])),
            1,
        );
        assert_eq!(state.towers[0].level, 0);
    }

    #[test]
    fn modifier_toggle_adds_and_removes() {
        let state = runtime_for_wave(
            &plan(json!([
                {"wave": 1, "at_s": 0.0, "type": "modifier", "target_id": "arsenal",
                 "payload": {"enabled": true}},
                {"wave": 1, "at_s": 0.5, "type": "modifier", "target_id": "arsenal",
                 "payload": {"enabled": false}}
            ])),
            1,
        );
        assert!(state.active_modifier_ids.is_empty());
    }

    #[test]
    fn targeting_updates_first_matching_tower() {
        let state = runtime_for_wave(
            &plan(json!([
                {"wave": 1, "at_s": 0.0, "type": "targeting", "target_id": "arrow_tower",
                 "payload": {"focus_priorities": ["highest_hp"],
                             "focus_until_death": true}}
            ])),
            1,
        );
        assert_eq!(state.towers[0].focus_priorities, vec!["highest_hp"]);
        assert!(state.towers[0].focus_until_death);
        // Only the first matching tower changes.
        assert_eq!(state.towers[1].focus_priorities.len(), 2);
    }
}
