//! Economy accumulator
//!
//! Folds per-wave resource baselines, worker income and build spending
//! (with cost inflation and the active policy) across the scenario's
//! waves, applying economy actions in timeline order.

use std::collections::BTreeMap;

use crate::types::{
    ActionType, BuildAction, BuildPlan, EconomyDefinition, EconomyPolicy, EconomyTotals,
    ScenarioDefinition, WorkerCounts,
};

use super::runtime::{
    build_action_count, build_action_level, build_action_tower_id, payload_i64, payload_str,
};

#[derive(Debug, Clone)]
struct EconomyState {
    total_workers: i64,
    workers_gold: i64,
    workers_essence: i64,
    workers_unassigned: i64,
    policy_id: String,
    build_count: i64,
}

fn initial_economy_state(scenario: &ScenarioDefinition) -> EconomyState {
    let economy = &scenario.economy;
    let total_workers = economy.initial_workers.max(0);
    let workers_gold = economy.initial_workers_gold.clamp(0, total_workers);
    let workers_essence = economy
        .initial_workers_essence
        .clamp(0, total_workers - workers_gold);
    let workers_unassigned = (total_workers - workers_gold - workers_essence).max(0);
    let policy_id = if economy.policies.contains_key(&economy.default_policy_id) {
        economy.default_policy_id.clone()
    } else {
        "balanced".to_string()
    };
    EconomyState {
        total_workers,
        workers_gold,
        workers_essence,
        workers_unassigned,
        policy_id,
        build_count: 0,
    }
}

fn resolve_policy(economy: &EconomyDefinition, policy_id: &str) -> EconomyPolicy {
    if let Some(policy) = economy.policies.get(policy_id) {
        return policy.clone();
    }
    if let Some(policy) = economy.policies.get(&economy.default_policy_id) {
        return policy.clone();
    }
    EconomyPolicy::balanced()
}

fn baseline_resources_for_wave(economy: &EconomyDefinition, wave_index: u32) -> (f64, f64) {
    for item in &economy.wave_resource_baseline {
        if item.wave == wave_index {
            return (item.gold, item.essence);
        }
    }
    (economy.default_wave_gold, economy.default_wave_essence)
}

/// Set an explicit worker distribution, shedding overflow from essence
/// first, then gold, so the total is conserved.
fn apply_worker_distribution(state: &mut EconomyState, workers_gold: i64, workers_essence: i64) {
    let mut gold = workers_gold.max(0);
    let mut essence = workers_essence.max(0);
    if gold + essence > state.total_workers {
        let mut overflow = gold + essence - state.total_workers;
        if essence >= overflow {
            essence -= overflow;
        } else {
            overflow -= essence;
            essence = 0;
            gold = (gold - overflow).max(0);
        }
    }
    state.workers_gold = gold;
    state.workers_essence = essence;
    state.workers_unassigned = (state.total_workers - gold - essence).max(0);
}

fn apply_assign_workers_action(state: &mut EconomyState, action: &BuildAction) {
    let payload = &action.payload;
    let explicit_gold =
        payload_i64(payload, "gold_workers").or_else(|| payload_i64(payload, "gold"));
    let explicit_essence =
        payload_i64(payload, "essence_workers").or_else(|| payload_i64(payload, "essence"));
    if explicit_gold.is_some() || explicit_essence.is_some() {
        let target_gold = explicit_gold.unwrap_or(state.workers_gold);
        let target_essence = explicit_essence.unwrap_or(state.workers_essence);
        apply_worker_distribution(state, target_gold, target_essence);
        return;
    }

    let resource = payload_str(payload, "resource")
        .unwrap_or(&action.target_id)
        .trim()
        .to_lowercase();
    let delta = payload_i64(payload, "count").unwrap_or(if action.value != 0.0 {
        action.value as i64
    } else {
        0
    });
    if (resource != "gold" && resource != "essence") || delta == 0 {
        return;
    }

    if delta > 0 {
        let moved = state.workers_unassigned.min(delta);
        if resource == "gold" {
            state.workers_gold += moved;
        } else {
            state.workers_essence += moved;
        }
        state.workers_unassigned -= moved;
        return;
    }

    let pool = if resource == "gold" {
        state.workers_gold
    } else {
        state.workers_essence
    };
    let amount = pool.min(delta.abs());
    if resource == "gold" {
        state.workers_gold -= amount;
    } else {
        state.workers_essence -= amount;
    }
    state.workers_unassigned += amount;
}

fn apply_economy_policy_action(
    state: &mut EconomyState,
    action: &BuildAction,
    economy: &EconomyDefinition,
) {
    let requested = payload_str(&action.payload, "policy_id")
        .or_else(|| payload_str(&action.payload, "policy"))
        .unwrap_or(&action.target_id)
        .trim()
        .to_string();
    if !requested.is_empty() && economy.policies.contains_key(&requested) {
        state.policy_id = requested;
    }
}

/// Approximate unit cost for a tower built at `level`: the first upgrade
/// step's cost as the base price plus the cost of every step up to the
/// requested level.
fn approx_build_cost(scenario: &ScenarioDefinition, tower_id: &str, level: i64) -> f64 {
    let fallback = 75.0 + 25.0 * level.max(0) as f64;
    let Some(tower) = scenario.towers.get(tower_id) else {
        return fallback;
    };
    if tower.upgrade_levels.is_empty() {
        return fallback;
    }

    let base = tower.upgrade_levels[0].cost.max(1.0);
    if level <= 1 {
        return base;
    }
    let mut extra = 0.0;
    for upgrade in &tower.upgrade_levels {
        if upgrade.level > 1 && i64::from(upgrade.level) <= level {
            extra += upgrade.cost.max(0.0);
        }
    }
    (base + extra).max(1.0)
}

/// Evaluate cumulative economy totals for a plan over the scenario waves.
pub fn evaluate_economy_totals(scenario: &ScenarioDefinition, build: &BuildPlan) -> EconomyTotals {
    let economy = &scenario.economy;
    let mut state = initial_economy_state(scenario);

    let mut actions_by_wave: BTreeMap<u32, Vec<&BuildAction>> = BTreeMap::new();
    for action in &build.actions {
        actions_by_wave.entry(action.wave).or_default().push(action);
    }

    let mut baseline_gold_total = 0.0;
    let mut baseline_essence_total = 0.0;
    let mut worker_gold_income_total = 0.0;
    let mut worker_essence_income_total = 0.0;
    let mut build_spend_gold_total = 0.0;
    let mut build_inflation_gold_total = 0.0;
    let mut build_actions_total: i64 = 0;

    for wave in &scenario.waves {
        let (baseline_gold, baseline_essence) = baseline_resources_for_wave(economy, wave.index);
        baseline_gold_total += baseline_gold;
        baseline_essence_total += baseline_essence;

        let policy = resolve_policy(economy, &state.policy_id);
        worker_gold_income_total += state.workers_gold as f64
            * economy.worker_gold_income_per_wave
            * policy.worker_gold_multiplier;
        worker_essence_income_total += state.workers_essence as f64
            * economy.worker_essence_income_per_wave
            * policy.worker_essence_multiplier;

        for &action in actions_by_wave.get(&wave.index).into_iter().flatten() {
            match action.kind {
                ActionType::AssignWorkers => {
                    apply_assign_workers_action(&mut state, action);
                    continue;
                }
                ActionType::EconomyPolicy => {
                    apply_economy_policy_action(&mut state, action, economy);
                    continue;
                }
                ActionType::Build => {}
                _ => continue,
            }

            let count = build_action_count(action);
            if count <= 0 {
                continue;
            }

            let tower_id = build_action_tower_id(action);
            let level = build_action_level(action);
            let unit_cost = approx_build_cost(scenario, &tower_id, level);
            let base_cost = unit_cost * count as f64;

            let inflation = (1.0
                + economy.build_cost_inflation_rate.max(0.0) * state.build_count as f64)
                .min(economy.build_cost_inflation_max_multiplier.max(1.0));
            let current_policy = resolve_policy(economy, &state.policy_id);
            let policy_multiplier = current_policy.build_cost_multiplier.max(0.1);
            let total_cost = base_cost * inflation * policy_multiplier;

            build_spend_gold_total += total_cost;
            build_inflation_gold_total += (total_cost - base_cost).max(0.0);
            build_actions_total += count;
            state.build_count += count;
        }
    }

    let gross_gold_income = baseline_gold_total + worker_gold_income_total;
    let gross_essence_income = baseline_essence_total + worker_essence_income_total;

    EconomyTotals {
        baseline_gold: baseline_gold_total,
        baseline_essence: baseline_essence_total,
        worker_gold_income: worker_gold_income_total,
        worker_essence_income: worker_essence_income_total,
        gross_gold_income,
        gross_essence_income,
        build_spend_gold: build_spend_gold_total,
        build_inflation_gold: build_inflation_gold_total,
        build_actions: build_actions_total,
        net_gold: gross_gold_income - build_spend_gold_total,
        net_essence: gross_essence_income,
        policy_id: state.policy_id,
        workers: WorkerCounts {
            total: state.total_workers,
            gold: state.workers_gold,
            essence: state.workers_essence,
            unassigned: state.workers_unassigned,
        },
    }
}
