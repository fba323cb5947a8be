//! Closed-form (expected-value) wave evaluation

use std::collections::BTreeMap;

use crate::types::{DotEffect, Modifier, Ruleset, ScenarioDefinition, WaveDefinition, WaveResult};

use super::runtime::RuntimeState;
use super::stats::{
    armor_damage_factor, crit_factor_expected, hit_chance, resolve_tower_stats, EPS,
};

/// Expected DPS of a DoT over its tick schedule.
fn dot_expected_dps(dot: &DotEffect, rules: &Ruleset, global_damage_factor: f64) -> f64 {
    let total_ticks = ((dot.duration_s / dot.tick_interval_s.max(EPS)) as i64).max(1);
    let mut total = dot.damage_per_tick * total_ticks as f64;
    if rules.dot_scaling_policy == crate::types::DotScalingPolicy::Global {
        total *= global_damage_factor;
    }
    total / dot.duration_s.max(EPS)
}

/// Collect the modifier lists of the active global modifier ids, in
/// activation order.
pub fn active_global_modifiers(
    scenario: &ScenarioDefinition,
    runtime: &RuntimeState,
) -> Vec<Modifier> {
    let mut modifiers = Vec::new();
    for modifier_id in &runtime.active_modifier_ids {
        if let Some(global) = scenario.global_modifiers.get(modifier_id) {
            modifiers.extend(global.modifiers.iter().cloned());
        }
    }
    modifiers
}

/// Evaluate one wave in expected mode: count-weighted enemy mix, expected
/// per-shot damage, barrier scaling and DoT contributions.
pub fn expected_wave(
    scenario: &ScenarioDefinition,
    wave: &WaveDefinition,
    runtime: &RuntimeState,
) -> WaveResult {
    let mut enemy_counts: BTreeMap<&str, u32> = BTreeMap::new();
    for spawn in &wave.spawns {
        *enemy_counts.entry(spawn.enemy_id.as_str()).or_insert(0) += spawn.count;
    }

    let total_enemies: u32 = enemy_counts.values().sum();
    if total_enemies == 0 {
        return WaveResult {
            wave: wave.index,
            potential_damage: 0.0,
            combat_damage: 0.0,
            effective_dps: 0.0,
            clear_time_s: 0.0,
            leaks: 0.0,
            enemy_hp_pool: 0.0,
            breakdown: BTreeMap::new(),
        };
    }

    let modifiers = active_global_modifiers(scenario, runtime);
    let mut per_tower_dps: BTreeMap<String, f64> = BTreeMap::new();
    let mut effective_dps = 0.0;

    for runtime_tower in &runtime.towers {
        let Some(tower_def) = scenario.towers.get(&runtime_tower.tower_id) else {
            continue;
        };
        let stats = resolve_tower_stats(tower_def, runtime_tower.level, &modifiers);
        let crit = crit_factor_expected(&stats);
        let mut tower_mix_dps = 0.0;

        for (enemy_id, count) in &enemy_counts {
            let Some(enemy) = scenario.enemies.get(*enemy_id) else {
                continue;
            };
            let weight = f64::from(*count) / f64::from(total_enemies);
            let hit = hit_chance(&stats, enemy, &scenario.rules);
            let armor_factor = armor_damage_factor(enemy, &stats, &scenario.rules);
            let direct_per_shot = stats.damage * crit * hit * armor_factor;
            let mut enemy_dps = direct_per_shot * stats.fire_rate;

            if enemy.barrier > 0.0 {
                let barrier_scale = (enemy.hp
                    + enemy.barrier / stats.barrier_damage_multiplier.max(EPS))
                    / (enemy.hp + enemy.barrier).max(EPS);
                enemy_dps *= barrier_scale;
            }

            let mut dot_dps = 0.0;
            for dot in &tower_def.dot_effects {
                dot_dps += dot_expected_dps(dot, &scenario.rules, crit);
            }
            tower_mix_dps += (enemy_dps + dot_dps) * weight;
        }

        *per_tower_dps.entry(tower_def.name.clone()).or_insert(0.0) += tower_mix_dps;
        effective_dps += tower_mix_dps;
    }

    let mut enemy_hp_pool = 0.0;
    let mut enemy_unit_pool = 0.0;
    for (enemy_id, count) in &enemy_counts {
        let Some(enemy) = scenario.enemies.get(*enemy_id) else {
            continue;
        };
        enemy_hp_pool += (enemy.hp + enemy.barrier) * f64::from(*count);
        enemy_unit_pool += enemy.hp * f64::from(*count);
    }

    let potential_damage = effective_dps * wave.duration_s;
    let combat_damage = potential_damage.min(enemy_hp_pool);
    let clear_time_s = enemy_hp_pool / effective_dps.max(EPS);
    let leaks = (enemy_hp_pool - potential_damage).max(0.0) / enemy_unit_pool.max(EPS);

    WaveResult {
        wave: wave.index,
        potential_damage,
        combat_damage,
        effective_dps,
        clear_time_s: clear_time_s.min(wave.duration_s),
        leaks,
        enemy_hp_pool,
        breakdown: per_tower_dps,
    }
}
