//! Build analytics
//!
//! Composes multiple engine evaluations: ranked build comparison,
//! single-parameter sensitivity sweeps and history-based forecasting.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use statrs::statistics::Statistics;

use crate::engine::evaluate_timeline;
use crate::types::{
    BuildPlan, EvalMode, EvaluationResult, EvaluationTotals, ScenarioDefinition, TowerStats,
};

/// One entry of a ranked comparison.
#[derive(Debug, Clone, Serialize)]
pub struct RankedBuild {
    pub index: usize,
    pub scenario_id: String,
    pub totals: EvaluationTotals,
    pub mode: EvalMode,
}

/// Comparison report, ranked by descending combat damage.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonReport {
    pub ranked: Vec<RankedBuild>,
}

/// Evaluate each build with a per-build seed offset and rank by combat
/// damage.
pub fn compare_builds(
    scenario: &ScenarioDefinition,
    dataset_version: &str,
    builds: &[BuildPlan],
    mode: EvalMode,
    seed: i64,
    monte_carlo_runs: u32,
) -> ComparisonReport {
    let mut ranked: Vec<RankedBuild> = builds
        .iter()
        .enumerate()
        .map(|(offset, build)| {
            let index = offset + 1;
            let result = evaluate_timeline(
                scenario,
                build,
                dataset_version,
                mode,
                seed + index as i64,
                monte_carlo_runs,
            );
            RankedBuild {
                index,
                scenario_id: build.scenario_id.clone(),
                totals: result.totals(),
                mode: result.mode,
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.totals.combat_damage.total_cmp(&a.totals.combat_damage));
    ComparisonReport { ranked }
}

/// Tower base stat scaled by a sensitivity sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepParameter {
    TowerDamageScale,
    TowerFireRateScale,
    TowerAccuracyScale,
}

fn scale_tower_stats(base: TowerStats, parameter: SweepParameter, factor: f64) -> TowerStats {
    match parameter {
        SweepParameter::TowerDamageScale => TowerStats {
            damage: base.damage * factor,
            ..base
        },
        SweepParameter::TowerFireRateScale => TowerStats {
            fire_rate: base.fire_rate * factor,
            ..base
        },
        SweepParameter::TowerAccuracyScale => TowerStats {
            accuracy: (base.accuracy * factor).clamp(0.0, 1.0),
            ..base
        },
    }
}

fn scaled_scenario(
    scenario: &ScenarioDefinition,
    parameter: SweepParameter,
    factor: f64,
) -> ScenarioDefinition {
    let mut adjusted = scenario.clone();
    for tower in adjusted.towers.values_mut() {
        tower.base_stats = scale_tower_stats(tower.base_stats, parameter, factor);
    }
    adjusted
}

/// One sweep point.
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityPoint {
    pub factor: f64,
    pub combat_damage: f64,
    pub delta_pct_vs_baseline: f64,
}

/// Sensitivity report: baseline totals plus one point per factor.
#[derive(Debug, Clone, Serialize)]
pub struct SensitivityReport {
    pub parameter: SweepParameter,
    pub baseline: EvaluationTotals,
    pub points: Vec<SensitivityPoint>,
}

/// Sweep one tower base stat across all towers and report combat-damage
/// deltas against the unscaled baseline.
pub fn sensitivity_analysis(
    scenario: &ScenarioDefinition,
    dataset_version: &str,
    build: &BuildPlan,
    parameter: SweepParameter,
    factors: &[f64],
    mode: EvalMode,
    seed: i64,
    monte_carlo_runs: u32,
) -> SensitivityReport {
    let baseline =
        evaluate_timeline(scenario, build, dataset_version, mode, seed, monte_carlo_runs);
    let baseline_totals = baseline.totals();
    let baseline_combat = baseline_totals.combat_damage;

    let points = factors
        .iter()
        .map(|&factor| {
            let adjusted = scaled_scenario(scenario, parameter, factor);
            let result = evaluate_timeline(
                &adjusted,
                build,
                dataset_version,
                mode,
                seed,
                monte_carlo_runs,
            );
            let combat = result.totals().combat_damage;
            let delta_pct = if baseline_combat.abs() > 1e-9 {
                (combat - baseline_combat) / baseline_combat * 100.0
            } else {
                0.0
            };
            SensitivityPoint {
                factor,
                combat_damage: combat,
                delta_pct_vs_baseline: delta_pct,
            }
        })
        .collect();

    SensitivityReport {
        parameter,
        baseline: baseline_totals,
        points,
    }
}

/// Forecast over prior evaluation totals.
#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub samples: usize,
    pub expected_combat_damage: f64,
    pub expected_potential_damage: f64,
    pub expected_leaks: f64,
    pub success_probability: f64,
}

fn scalar_totals(payload: &Value) -> (f64, f64, f64) {
    let totals = payload.get("totals").unwrap_or(payload);
    let number = |key: &str| totals.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    (number("combat_damage"), number("potential_damage"), number("leaks"))
}

/// Arithmetic mean of history totals (optionally appending the latest
/// evaluation) with a leak-ratio success probability.
pub fn forecast_from_history(history: &[Value], latest: Option<&EvaluationResult>) -> Forecast {
    if history.is_empty() && latest.is_none() {
        return Forecast {
            samples: 0,
            expected_combat_damage: 0.0,
            expected_potential_damage: 0.0,
            expected_leaks: 0.0,
            success_probability: 0.0,
        };
    }

    let mut combat_values: Vec<f64> = Vec::new();
    let mut potential_values: Vec<f64> = Vec::new();
    let mut leak_values: Vec<f64> = Vec::new();

    for item in history {
        let (combat, potential, leaks) = scalar_totals(item);
        combat_values.push(combat);
        potential_values.push(potential);
        leak_values.push(leaks);
    }
    if let Some(result) = latest {
        let totals = result.totals();
        combat_values.push(totals.combat_damage);
        potential_values.push(totals.potential_damage);
        leak_values.push(totals.leaks);
    }

    let samples = combat_values.len();
    let expected_combat = combat_values.iter().mean();
    let expected_potential = potential_values.iter().mean();
    let expected_leaks = leak_values.iter().mean();

    let success_probability = if expected_potential <= 1e-9 {
        0.0
    } else {
        let leak_ratio = (expected_leaks / expected_potential.max(1.0)).clamp(0.0, 1.0);
        (1.0 - leak_ratio).clamp(0.0, 1.0)
    };

    Forecast {
        samples,
        expected_combat_damage: expected_combat,
        expected_potential_damage: expected_potential,
        expected_leaks: expected_leaks,
        success_probability,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn scenario() -> ScenarioDefinition {
        ScenarioDefinition::from_value(&json!({
            "id": "s",
            "name": "S",
            "towers": [{
                "id": "arrow_tower",
                "name": "Arrow Tower",
                "base_stats": {"damage": 10.0, "fire_rate": 1.0}
            }],
            "enemies": [{"id": "raider", "name": "Raider", "hp": 50.0, "speed": 1.0}],
            "waves": [{"index": 1, "duration_s": 20.0,
                       "spawns": [{"at_s": 0.0, "enemy_id": "raider", "count": 4,
                                   "interval_s": 1.0}]}]
        }))
        .expect("scenario")
    }

    fn plan(count: u32) -> BuildPlan {
        BuildPlan::from_value(&json!({
            "scenario_id": "s",
            "towers": [{"tower_id": "arrow_tower", "count": count, "level": 0}]
        }))
        .expect("plan")
    }

    #[test]
    fn comparison_ranks_stronger_builds_first() {
        let scenario = scenario();
        let report = compare_builds(
            &scenario,
            "1.0.0",
            &[plan(1), plan(3)],
            EvalMode::Expected,
            40,
            1,
        );
        assert_eq!(report.ranked.len(), 2);
        assert_eq!(report.ranked[0].index, 2);
        assert!(
            report.ranked[0].totals.combat_damage >= report.ranked[1].totals.combat_damage
        );
    }

    #[test]
    fn sensitivity_reports_deltas_around_baseline() {
        let scenario = scenario();
        let report = sensitivity_analysis(
            &scenario,
            "1.0.0",
            &plan(1),
            SweepParameter::TowerDamageScale,
            &[0.5, 1.0, 1.5],
            EvalMode::Expected,
            7,
            1,
        );
        assert_eq!(report.points.len(), 3);
        assert!(report.points[0].delta_pct_vs_baseline < 0.0);
        assert!(report.points[1].delta_pct_vs_baseline.abs() < 1e-6);
        // Damage never exceeds the enemy pool, so +50% may saturate but
        // must not regress.
        assert!(report.points[2].delta_pct_vs_baseline >= 0.0);
    }

    #[test]
    fn accuracy_sweep_is_clamped() {
        let scenario = scenario();
        let report = sensitivity_analysis(
            &scenario,
            "1.0.0",
            &plan(1),
            SweepParameter::TowerAccuracyScale,
            &[5.0],
            EvalMode::Expected,
            7,
            1,
        );
        // Accuracy caps at 1.0: no delta versus the already-accurate base.
        assert!(report.points[0].delta_pct_vs_baseline.abs() < 1e-6);
    }

    #[test]
    fn forecast_averages_history_and_latest() {
        let history = vec![
            json!({"totals": {"combat_damage": 100.0, "potential_damage": 200.0,
                              "leaks": 10.0}}),
            json!({"totals": {"combat_damage": 300.0, "potential_damage": 400.0,
                              "leaks": 30.0}}),
        ];
        let forecast = forecast_from_history(&history, None);
        assert_eq!(forecast.samples, 2);
        assert!((forecast.expected_combat_damage - 200.0).abs() < 1e-9);
        assert!((forecast.expected_leaks - 20.0).abs() < 1e-9);
        assert!(forecast.success_probability > 0.0 && forecast.success_probability < 1.0);
    }

    #[test]
    fn empty_forecast_is_all_zero() {
        let forecast = forecast_from_history(&[], None);
        assert_eq!(forecast.samples, 0);
        assert!((forecast.success_probability - 0.0).abs() < f64::EPSILON);
    }
}
