//! Deterministic simulation engine
//!
//! Evaluates a build plan against a scenario in three modes:
//! `expected` (closed-form), `combat` (discrete-event sampled) and
//! `monte_carlo` (averaged sampled runs). Given the same inputs and seed
//! the serialized output is byte-equal across runs and platforms.

pub mod combat;
pub mod economy;
pub mod expected;
pub mod runtime;
pub mod stats;

use std::collections::BTreeMap;

use crate::types::{BuildPlan, EvalMode, EvaluationResult, ScenarioDefinition, WaveResult};

pub use combat::simulate_wave_combat;
pub use economy::evaluate_economy_totals;
pub use expected::expected_wave;
pub use runtime::{runtime_for_wave, RuntimeState, RuntimeTower};
pub use stats::{
    apply_stat_modifiers, armor_damage_factor, crit_factor_expected, effective_armor, hit_chance,
    resolve_tower_stats, EPS,
};

/// Per-wave seed offset for combat mode.
const COMBAT_WAVE_SEED_STRIDE: i64 = 997;
/// Per-wave and per-run seed offsets for monte carlo mode.
const MONTE_CARLO_WAVE_SEED_STRIDE: i64 = 1009;
const MONTE_CARLO_RUN_SEED_STRIDE: i64 = 37;

/// Evaluate a build-plan timeline over every wave of the scenario.
pub fn evaluate_timeline(
    scenario: &ScenarioDefinition,
    build: &BuildPlan,
    dataset_version: &str,
    mode: EvalMode,
    seed: i64,
    monte_carlo_runs: u32,
) -> EvaluationResult {
    let mut wave_results: Vec<WaveResult> = Vec::new();

    for wave in &scenario.waves {
        let runtime = runtime_for_wave(build, wave.index);
        let expected = expected_wave(scenario, wave, &runtime);

        match mode {
            EvalMode::Expected => {
                wave_results.push(expected);
            }
            EvalMode::Combat => {
                let wave_seed = seed + i64::from(wave.index) * COMBAT_WAVE_SEED_STRIDE;
                let combat = simulate_wave_combat(scenario, wave, &runtime, wave_seed, true);
                // Expected potential stays side-by-side for comparability.
                wave_results.push(WaveResult {
                    wave: wave.index,
                    potential_damage: expected.potential_damage,
                    combat_damage: combat.combat_damage,
                    effective_dps: combat.effective_dps,
                    clear_time_s: combat.clear_time_s,
                    leaks: combat.leaks,
                    enemy_hp_pool: combat.enemy_hp_pool,
                    breakdown: combat.breakdown,
                });
            }
            EvalMode::MonteCarlo => {
                let runs = monte_carlo_runs.max(1);
                let mut samples: Vec<WaveResult> = Vec::with_capacity(runs as usize);
                for run_index in 0..runs {
                    let run_seed = seed
                        + i64::from(wave.index) * MONTE_CARLO_WAVE_SEED_STRIDE
                        + i64::from(run_index) * MONTE_CARLO_RUN_SEED_STRIDE;
                    samples.push(simulate_wave_combat(scenario, wave, &runtime, run_seed, true));
                }

                let count = f64::from(runs);
                let avg_combat = samples.iter().map(|s| s.combat_damage).sum::<f64>() / count;
                let avg_dps = samples.iter().map(|s| s.effective_dps).sum::<f64>() / count;
                let avg_clear = samples.iter().map(|s| s.clear_time_s).sum::<f64>() / count;
                let avg_leaks = samples.iter().map(|s| s.leaks).sum::<f64>() / count;

                let mut breakdown: BTreeMap<String, f64> = BTreeMap::new();
                for sample in &samples {
                    for (name, value) in &sample.breakdown {
                        *breakdown.entry(name.clone()).or_insert(0.0) += value / count;
                    }
                }

                wave_results.push(WaveResult {
                    wave: wave.index,
                    potential_damage: expected.potential_damage,
                    combat_damage: avg_combat,
                    effective_dps: avg_dps,
                    clear_time_s: avg_clear,
                    leaks: avg_leaks,
                    enemy_hp_pool: expected.enemy_hp_pool,
                    breakdown,
                });
            }
        }
    }

    EvaluationResult {
        mode,
        scenario_id: scenario.id.clone(),
        dataset_version: dataset_version.to_string(),
        seed,
        monte_carlo_runs: if mode == EvalMode::MonteCarlo {
            monte_carlo_runs.max(1)
        } else {
            1
        },
        wave_results,
        economy_totals: evaluate_economy_totals(scenario, build),
    }
}
