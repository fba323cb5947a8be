//! Candidate quality and stability scoring
//!
//! Scores a calibration candidate for field coverage (resolved required /
//! optional addresses) and runtime stability derived from prior probe
//! counters. The penalty weights are part of the recommendation contract:
//! the same payload must always score identically.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::memory::profile::{is_placeholder_address, parse_flexible_int};

pub const MIN_STABLE_PROBE_CYCLES: i64 = 3;
pub const MIN_SNAPSHOT_OK_RATIO: f64 = 0.66;
pub const MAX_TRANSIENT_299_RATIO_FOR_STABLE: f64 = 0.33;
pub const MAX_TRANSIENT_299_CANDIDATES: f64 = 0.66;
pub const TRANSIENT_299_CLUSTER_PENALTY: f64 = 75.0;
pub const TRANSIENT_299_CONNECT_PENALTY: f64 = 16.0;
pub const MAX_CONNECT_FAILURE_PENALTY: f64 = 120.0;
pub const MAX_SNAPSHOT_STREAK_PENALTY: f64 = 60.0;
pub const MAX_CONNECT_FAILURES_FOR_SCORE: i64 = 6;
pub const MAX_SNAPSHOT_STREAK_FOR_SCORE: i64 = 6;

/// Stability counters derived from a candidate's `stability` block.
#[derive(Debug, Clone, Serialize)]
pub struct StabilityStats {
    pub has_stability_metrics: bool,
    pub snapshot_probe_count: i64,
    pub snapshot_total_count: i64,
    pub snapshot_ok_count: i64,
    pub snapshot_ok_ratio: f64,
    pub transient_299_count: i64,
    pub transient_299_ratio: f64,
    pub transient_299_excessive: bool,
    pub candidate_stable_probe: bool,
    pub candidate_stable_probe_cycles: i64,
    pub connect_failures_total_last: i64,
    pub connect_retry_success_total: i64,
    pub connect_transient_failure_count: i64,
    pub snapshot_failure_streak_max: i64,
    pub snapshot_failures_total_last: i64,
    pub stability_penalty: f64,
    pub stability_score: f64,
}

impl Default for StabilityStats {
    /// Stats for a candidate without any probe history: worst penalty,
    /// never a stable probe.
    fn default() -> Self {
        Self {
            has_stability_metrics: false,
            snapshot_probe_count: 0,
            snapshot_total_count: 0,
            snapshot_ok_count: 0,
            snapshot_ok_ratio: 0.0,
            transient_299_count: 0,
            transient_299_ratio: 0.0,
            transient_299_excessive: false,
            candidate_stable_probe: false,
            candidate_stable_probe_cycles: 0,
            connect_failures_total_last: 0,
            connect_retry_success_total: 0,
            connect_transient_failure_count: 0,
            snapshot_failure_streak_max: 0,
            snapshot_failures_total_last: 0,
            stability_penalty: 100.0,
            stability_score: 0.0,
        }
    }
}

fn stat_int(block: &Map<String, Value>, key: &str) -> i64 {
    match block.get(key) {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)).unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn first_positive(block: &Map<String, Value>, keys: &[&str]) -> i64 {
    for key in keys {
        let value = stat_int(block, key);
        if value > 0 {
            return value;
        }
    }
    0
}

impl StabilityStats {
    /// Derive stats from a candidate payload's `stability` (or legacy
    /// `stability_metrics`) block.
    pub fn from_candidate(candidate_payload: &Value) -> Self {
        let block = candidate_payload
            .get("stability")
            .or_else(|| candidate_payload.get("stability_metrics"))
            .and_then(Value::as_object);
        let Some(block) = block.filter(|b| !b.is_empty()) else {
            return Self::default();
        };

        let probe_count = first_positive(
            block,
            &["snapshot_probe_count", "probe_cycles", "probe_windows"],
        );
        let ok_count = first_positive(block, &["snapshot_ok_count", "ok_count"]);
        let mut total_count = first_positive(block, &["snapshot_total_count", "sample_count"]);
        if total_count <= 0 {
            total_count = probe_count.max(ok_count);
        }
        let transient_299_count =
            first_positive(block, &["transient_299_count", "winerr299_count"]);

        let snapshot_ok_ratio = if total_count > 0 {
            (ok_count as f64 / total_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let transient_299_ratio = if total_count > 0 {
            (transient_299_count as f64 / total_count as f64).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let connect_failures_total_last = stat_int(block, "connect_failures_total_last");
        let connect_retry_success_total = stat_int(block, "connect_retry_success_total");
        let connect_transient_failure_count = stat_int(block, "connect_transient_failure_count");
        let snapshot_failure_streak_max = stat_int(block, "snapshot_failure_streak_max");
        let snapshot_failures_total_last = stat_int(block, "snapshot_failures_total_last");

        let transient_299_excessive = transient_299_ratio >= MAX_TRANSIENT_299_RATIO_FOR_STABLE;
        let candidate_stable_probe = probe_count >= MIN_STABLE_PROBE_CYCLES
            && snapshot_ok_ratio >= MIN_SNAPSHOT_OK_RATIO
            && !transient_299_excessive;

        let mut stability_penalty = 0.0;
        if !candidate_stable_probe {
            stability_penalty += 40.0;
        }
        stability_penalty += (MIN_SNAPSHOT_OK_RATIO - snapshot_ok_ratio).max(0.0) * 45.0;

        if connect_failures_total_last > 0 {
            stability_penalty +=
                (connect_failures_total_last as f64 * 12.5).min(MAX_CONNECT_FAILURE_PENALTY);
            if connect_failures_total_last > MAX_CONNECT_FAILURES_FOR_SCORE {
                stability_penalty += 60.0;
            }
        }
        if connect_transient_failure_count > 0 {
            stability_penalty += (connect_transient_failure_count as f64
                * TRANSIENT_299_CONNECT_PENALTY)
                .min(MAX_TRANSIENT_299_CANDIDATES * 100.0);
            if connect_transient_failure_count >= 2 {
                stability_penalty += TRANSIENT_299_CLUSTER_PENALTY;
            }
        }
        if connect_retry_success_total > 0 {
            stability_penalty += (4.0 - connect_retry_success_total as f64).max(0.0);
        }
        if snapshot_failures_total_last > 0 {
            stability_penalty +=
                (snapshot_failures_total_last as f64 * 1.8).min(MAX_SNAPSHOT_STREAK_PENALTY);
        }
        if snapshot_failure_streak_max > 0 {
            stability_penalty +=
                (snapshot_failure_streak_max as f64 * 2.5).min(MAX_SNAPSHOT_STREAK_PENALTY);
            if snapshot_failure_streak_max > MAX_SNAPSHOT_STREAK_FOR_SCORE {
                stability_penalty += 45.0;
            }
        }

        if snapshot_ok_ratio < MIN_SNAPSHOT_OK_RATIO {
            stability_penalty += (MIN_SNAPSHOT_OK_RATIO - snapshot_ok_ratio) * 55.0;
        }
        if snapshot_ok_ratio < 0.25 {
            stability_penalty += (0.25 - snapshot_ok_ratio) * 180.0;
        }
        if transient_299_excessive {
            stability_penalty += 35.0;
            if transient_299_ratio >= MAX_TRANSIENT_299_RATIO_FOR_STABLE + 0.2 {
                stability_penalty += 50.0;
            }
        }
        stability_penalty += transient_299_ratio * 45.0;
        stability_penalty = stability_penalty.max(0.0);

        Self {
            has_stability_metrics: true,
            snapshot_probe_count: probe_count,
            snapshot_total_count: total_count,
            snapshot_ok_count: ok_count,
            snapshot_ok_ratio,
            transient_299_count,
            transient_299_ratio,
            transient_299_excessive,
            candidate_stable_probe,
            candidate_stable_probe_cycles: probe_count,
            connect_failures_total_last,
            connect_retry_success_total,
            connect_transient_failure_count,
            snapshot_failure_streak_max,
            snapshot_failures_total_last,
            stability_penalty,
            stability_score: (100.0 - stability_penalty).max(0.0),
        }
    }
}

/// Coverage and stability quality of one candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateQuality {
    pub valid: bool,
    pub required_fields_total: usize,
    pub resolved_required_count: usize,
    pub required_resolution_ratio: f64,
    pub missing_required_field_names: Vec<String>,
    pub unresolved_required_field_names: Vec<String>,
    pub resolved_required_field_names: Vec<String>,
    pub optional_fields_total: usize,
    pub resolved_optional_count: usize,
    pub optional_resolution_ratio: f64,
    pub resolved_optional_field_names: Vec<String>,
    #[serde(flatten)]
    pub stability: StabilityStats,
}

/// True when a field override payload carries a resolvable, non-placeholder
/// address.
pub fn field_has_resolved_address(field_payload: Option<&Value>) -> bool {
    let Some(object) = field_payload.and_then(Value::as_object) else {
        return false;
    };
    let Some(raw_address) = object.get("address") else {
        return false;
    };
    if raw_address.as_str().is_some_and(|s| s.trim().is_empty()) {
        return false;
    }
    parse_flexible_int(raw_address, "field.address")
        .map(|address| !is_placeholder_address(address as u64))
        .unwrap_or(false)
}

/// Score one candidate's field payload against the required/optional sets.
pub fn candidate_quality(
    fields_payload: &Map<String, Value>,
    required_fields: &[String],
    optional_fields: &[String],
    candidate_payload: &Value,
) -> CandidateQuality {
    let mut missing_required = Vec::new();
    let mut unresolved_required = Vec::new();
    let mut resolved_required = Vec::new();
    let mut resolved_optional = Vec::new();

    for field_name in required_fields {
        match fields_payload.get(field_name) {
            Some(spec) if spec.is_object() => {
                if field_has_resolved_address(Some(spec)) {
                    resolved_required.push(field_name.clone());
                } else {
                    unresolved_required.push(field_name.clone());
                }
            }
            _ => missing_required.push(field_name.clone()),
        }
    }

    for field_name in optional_fields {
        if field_has_resolved_address(fields_payload.get(field_name)) {
            resolved_optional.push(field_name.clone());
        }
    }

    let required_total = required_fields.len();
    let optional_total = optional_fields.len();
    let resolved_required_count = resolved_required.len();
    let resolved_optional_count = resolved_optional.len();

    CandidateQuality {
        valid: resolved_required_count == required_total,
        required_fields_total: required_total,
        resolved_required_count,
        required_resolution_ratio: if required_total > 0 {
            resolved_required_count as f64 / required_total as f64
        } else {
            0.0
        },
        missing_required_field_names: missing_required,
        unresolved_required_field_names: unresolved_required,
        resolved_required_field_names: resolved_required,
        optional_fields_total: optional_total,
        resolved_optional_count,
        optional_resolution_ratio: if optional_total > 0 {
            resolved_optional_count as f64 / optional_total as f64
        } else {
            0.0
        },
        resolved_optional_field_names: resolved_optional,
        stability: StabilityStats::from_candidate(candidate_payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_stability_block_scores_zero() {
        let stats = StabilityStats::from_candidate(&json!({"id": "c1"}));
        assert!(!stats.has_stability_metrics);
        assert!(!stats.candidate_stable_probe);
        assert!((stats.stability_score - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn clean_probe_history_is_stable() {
        let stats = StabilityStats::from_candidate(&json!({
            "stability": {
                "snapshot_probe_count": 10,
                "snapshot_ok_count": 10,
                "snapshot_total_count": 10
            }
        }));
        assert!(stats.candidate_stable_probe);
        assert!(stats.stability_score > 90.0);
        assert!(!stats.transient_299_excessive);
    }

    #[test]
    fn low_ok_ratio_fails_stability_gate() {
        let stats = StabilityStats::from_candidate(&json!({
            "stability": {
                "snapshot_probe_count": 3,
                "snapshot_ok_count": 1,
                "snapshot_total_count": 4
            }
        }));
        assert!(!stats.candidate_stable_probe);
        assert!(stats.stability_penalty > 40.0);
    }

    #[test]
    fn transient_ratio_gates_even_good_ok_ratio() {
        let stats = StabilityStats::from_candidate(&json!({
            "stability": {
                "snapshot_probe_count": 10,
                "snapshot_ok_count": 9,
                "snapshot_total_count": 10,
                "transient_299_count": 5
            }
        }));
        assert!(stats.transient_299_excessive);
        assert!(!stats.candidate_stable_probe);
    }

    #[test]
    fn placeholder_addresses_do_not_resolve() {
        assert!(!field_has_resolved_address(Some(&json!({"address": "0x0"}))));
        assert!(!field_has_resolved_address(Some(
            &json!({"address": "0xDEADBEEF"})
        )));
        assert!(field_has_resolved_address(Some(&json!({"address": "0x1400"}))));
        assert!(!field_has_resolved_address(Some(&json!({"address": ""}))));
        assert!(!field_has_resolved_address(None));
    }

    #[test]
    fn quality_counts_resolution_per_field_set() {
        let fields = json!({
            "current_wave": {"address": "0x1110"},
            "gold": {"address": "0x0"},
            "essence": {"address": "0x3330"},
            "lives": {"address": "0x4440"}
        });
        let required = vec![
            "current_wave".to_string(),
            "gold".to_string(),
            "essence".to_string(),
        ];
        let optional = vec!["lives".to_string(), "player_hp".to_string()];
        let quality = candidate_quality(
            fields.as_object().expect("object"),
            &required,
            &optional,
            &json!({}),
        );
        assert!(!quality.valid);
        assert_eq!(quality.resolved_required_count, 2);
        assert_eq!(quality.unresolved_required_field_names, vec!["gold"]);
        assert_eq!(quality.resolved_optional_count, 1);
    }
}
