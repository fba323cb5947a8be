//! Evaluation results and deterministic serialization
//!
//! Wave-level and aggregate outputs of the simulation engine, plus the
//! float-stabilization pass that makes serialized results byte-equal across
//! runs and platforms: every float is rounded to 10 significant digits and
//! signed zero collapses to +0.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Simulation evaluation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalMode {
    Expected,
    Combat,
    MonteCarlo,
}

impl EvalMode {
    /// Parse a host-supplied mode string. Unknown modes are rejected.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "expected" => Some(Self::Expected),
            "combat" => Some(Self::Combat),
            "monte_carlo" => Some(Self::MonteCarlo),
            _ => None,
        }
    }
}

/// Per-wave damage and leak metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveResult {
    pub wave: u32,
    pub potential_damage: f64,
    pub combat_damage: f64,
    pub effective_dps: f64,
    pub clear_time_s: f64,
    pub leaks: f64,
    pub enemy_hp_pool: f64,
    pub breakdown: BTreeMap<String, f64>,
}

/// Worker pool counts. Invariant: `gold + essence + unassigned == total`,
/// all non-negative.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub total: i64,
    pub gold: i64,
    pub essence: i64,
    pub unassigned: i64,
}

/// Cumulative economy totals across the full timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyTotals {
    pub baseline_gold: f64,
    pub baseline_essence: f64,
    pub worker_gold_income: f64,
    pub worker_essence_income: f64,
    pub gross_gold_income: f64,
    pub gross_essence_income: f64,
    pub build_spend_gold: f64,
    pub build_inflation_gold: f64,
    pub build_actions: i64,
    pub net_gold: f64,
    pub net_essence: f64,
    pub policy_id: String,
    pub workers: WorkerCounts,
}

impl Default for EconomyTotals {
    fn default() -> Self {
        Self::normalize_payload(&Value::Null)
    }
}

fn value_to_f64(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::Bool(b)) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn value_to_i64(value: Option<&Value>, default: i64) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

impl EconomyTotals {
    /// Normalize an arbitrary totals payload into a consistent shape.
    ///
    /// Missing fields default, gross income defaults to baseline + worker
    /// income, and worker counts are repaired to satisfy conservation
    /// (`gold + essence + unassigned == total`, none negative).
    pub fn normalize_payload(payload: &Value) -> Self {
        let empty = Map::new();
        let source = payload.as_object().unwrap_or(&empty);
        let workers = source
            .get("workers")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let baseline_gold = value_to_f64(source.get("baseline_gold"), 0.0);
        let baseline_essence = value_to_f64(source.get("baseline_essence"), 0.0);
        let worker_gold_income = value_to_f64(source.get("worker_gold_income"), 0.0);
        let worker_essence_income = value_to_f64(source.get("worker_essence_income"), 0.0);
        let gross_gold_income = value_to_f64(
            source.get("gross_gold_income"),
            baseline_gold + worker_gold_income,
        );
        let gross_essence_income = value_to_f64(
            source.get("gross_essence_income"),
            baseline_essence + worker_essence_income,
        );
        let build_spend_gold = value_to_f64(source.get("build_spend_gold"), 0.0);
        let build_inflation_gold = value_to_f64(source.get("build_inflation_gold"), 0.0);
        let build_actions = value_to_i64(source.get("build_actions"), 0).max(0);

        let mut total = value_to_i64(workers.get("total"), 0).max(0);
        let gold = value_to_i64(workers.get("gold"), 0).max(0);
        let essence = value_to_i64(workers.get("essence"), 0).max(0);
        let mut unassigned =
            value_to_i64(workers.get("unassigned"), total - gold - essence).max(0);

        if total <= 0 {
            total = gold + essence + unassigned;
        }
        if gold + essence + unassigned > total {
            unassigned = (total - gold - essence).max(0);
        }

        Self {
            baseline_gold,
            baseline_essence,
            worker_gold_income,
            worker_essence_income,
            gross_gold_income,
            gross_essence_income,
            build_spend_gold,
            build_inflation_gold,
            build_actions,
            net_gold: value_to_f64(
                source.get("net_gold"),
                gross_gold_income - build_spend_gold,
            ),
            net_essence: value_to_f64(source.get("net_essence"), gross_essence_income),
            policy_id: source
                .get("policy_id")
                .and_then(Value::as_str)
                .unwrap_or("balanced")
                .to_string(),
            workers: WorkerCounts {
                total,
                gold,
                essence,
                unassigned,
            },
        }
    }
}

/// Aggregate totals over all wave results plus the economy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationTotals {
    pub potential_damage: f64,
    pub combat_damage: f64,
    pub leaks: f64,
    pub economy: EconomyTotals,
}

/// Full output of one `evaluate_timeline` call.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub mode: EvalMode,
    pub scenario_id: String,
    pub dataset_version: String,
    pub seed: i64,
    pub monte_carlo_runs: u32,
    pub wave_results: Vec<WaveResult>,
    #[serde(skip)]
    pub economy_totals: EconomyTotals,
}

impl EvaluationResult {
    pub fn totals(&self) -> EvaluationTotals {
        EvaluationTotals {
            potential_damage: self.wave_results.iter().map(|w| w.potential_damage).sum(),
            combat_damage: self.wave_results.iter().map(|w| w.combat_damage).sum(),
            leaks: self.wave_results.iter().map(|w| w.leaks).sum(),
            economy: self.economy_totals.clone(),
        }
    }

    /// Serialize with the stabilization pass applied. This is the canonical
    /// wire form used for golden comparisons.
    pub fn to_stable_json(&self) -> Value {
        let mut payload = Map::new();
        payload.insert("mode".to_string(), value_of(&self.mode));
        payload.insert("scenario_id".to_string(), Value::from(self.scenario_id.clone()));
        payload.insert(
            "dataset_version".to_string(),
            Value::from(self.dataset_version.clone()),
        );
        payload.insert("seed".to_string(), Value::from(self.seed));
        payload.insert(
            "monte_carlo_runs".to_string(),
            Value::from(self.monte_carlo_runs),
        );
        payload.insert("wave_results".to_string(), value_of(&self.wave_results));
        payload.insert("totals".to_string(), value_of(&self.totals()));
        stabilize_value(Value::Object(payload))
    }
}

fn value_of<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// Round to 10 significant digits and normalize signed zero to +0.
pub fn stable_float(value: f64) -> f64 {
    const SIGNIFICANT_DIGITS: i32 = 10;
    if !value.is_finite() || value == 0.0 {
        return if value == 0.0 { 0.0 } else { value };
    }
    let magnitude = value.abs().log10().floor() as i32;
    let factor = 10f64.powi(SIGNIFICANT_DIGITS - 1 - magnitude);
    if !factor.is_finite() || factor == 0.0 {
        return value;
    }
    let rounded = (value * factor).round() / factor;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

/// Recursively apply `stable_float` to every number in a JSON tree.
pub fn stabilize_value(value: Value) -> Value {
    match value {
        Value::Number(number) => {
            if number.is_f64() {
                let stabilized = stable_float(number.as_f64().unwrap_or(0.0));
                serde_json::Number::from_f64(stabilized)
                    .map_or(Value::Number(number), Value::Number)
            } else {
                Value::Number(number)
            }
        }
        Value::Array(items) => Value::Array(items.into_iter().map(stabilize_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, item)| (key, stabilize_value(item)))
                .collect(),
        ),
        other => other,
    }
}
