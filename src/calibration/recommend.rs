//! Deterministic candidate recommendation
//!
//! Given a calibration payload, summarize each candidate, score it, and
//! pick a recommended candidate with a reproducible tiebreak. The result
//! is byte-identical across repeated runs on the same input.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::memory::backend::MemoryError;
use crate::memory::profile::{parse_flexible_int, resolve_combat_field_sets};

use super::quality::{candidate_quality, CandidateQuality};

/// Human-readable tag for the selection algorithm, embedded in payloads.
pub const CALIBRATION_CANDIDATE_ALGORITHM: &str =
    "preferred_if_valid_else_max_required_resolved_then_stability_then_active_candidate_id_then_original_order";

/// Per-candidate summary used by the bridge's inspection surface.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateSummary {
    pub id: String,
    pub profile_id: String,
    pub fields: BTreeMap<String, String>,
    pub candidate_quality: CandidateQuality,
}

/// Flattened score row entering the recommendation sort.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub id: String,
    pub valid: bool,
    pub resolved_required_fields: usize,
    pub is_active_candidate: bool,
    pub original_order: usize,
    pub has_stability_metrics: bool,
    pub candidate_stable_probe: bool,
    pub candidate_stability_score: f64,
    pub snapshot_ok_ratio: f64,
    pub transient_299_ratio: f64,
    pub transient_299_excessive: bool,
    pub candidate_stable_probe_cycles: i64,
    pub connect_failures_total_last: i64,
    pub snapshot_failure_streak_max: i64,
    pub snapshot_failures_total_last: i64,
    pub connect_transient_failure_count: i64,
    pub stability_penalty: f64,
}

/// Full recommendation report.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub algorithm: String,
    pub preferred_candidate_id: String,
    pub active_candidate_id: String,
    pub required_combat_fields: Vec<String>,
    pub optional_combat_fields: Vec<String>,
    pub recommended_candidate_id: String,
    pub reason: String,
    pub no_stable_candidate: bool,
    pub candidate_scores: Vec<CandidateScore>,
}

/// Enumerate `(id, payload, original_order)` candidate entries, assigning
/// `candidate_<n>` ids to anonymous entries and rejecting duplicates.
pub fn iter_candidate_entries(
    calibration_payload: &Value,
) -> Result<Vec<(String, Value, usize)>, MemoryError> {
    let payload = calibration_payload.as_object().ok_or_else(|| {
        MemoryError::Profile("Calibration payload must be a JSON object.".to_string())
    })?;
    let raw_candidates = payload
        .get("candidates")
        .map(|value| {
            value.as_array().ok_or_else(|| {
                MemoryError::Profile("Calibration payload has invalid 'candidates' list.".to_string())
            })
        })
        .transpose()?
        .cloned()
        .unwrap_or_default();

    let mut entries = Vec::new();
    let mut seen: Vec<String> = Vec::new();
    for (index, candidate) in raw_candidates.iter().enumerate() {
        if !candidate.is_object() {
            continue;
        }
        let candidate_id = candidate
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("candidate_{}", index + 1), str::to_string);
        if seen.contains(&candidate_id) {
            return Err(MemoryError::Profile(format!(
                "Calibration payload has duplicate candidate id: {candidate_id}"
            )));
        }
        seen.push(candidate_id.clone());
        entries.push((candidate_id, candidate.clone(), index + 1));
    }

    if entries.is_empty() {
        return Err(MemoryError::Profile(
            "Calibration payload has no candidate entries.".to_string(),
        ));
    }
    Ok(entries)
}

fn address_to_hex(value: &Value) -> String {
    parse_flexible_int(value, "address").map_or_else(
        |_| value.as_str().unwrap_or_default().to_string(),
        |parsed| format!("{:#x}", parsed as u64),
    )
}

/// Summarize every candidate: per-field addresses plus quality scores.
pub fn list_candidate_summaries(
    calibration_payload: &Value,
    required_fields: &[String],
    optional_fields: &[String],
) -> Result<Vec<CandidateSummary>, MemoryError> {
    let (required, optional) = resolve_combat_field_sets(
        calibration_payload,
        required_fields,
        optional_fields,
        "calibration payload",
    )?;
    let mut summary_fields = required.clone();
    summary_fields.extend(optional.iter().filter(|n| !required.contains(n)).cloned());

    let empty = Map::new();
    let mut summaries = Vec::new();
    for (candidate_id, candidate, _) in iter_candidate_entries(calibration_payload)? {
        let fields_payload = candidate
            .get("fields")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let mut address_map = BTreeMap::new();
        for field_name in &summary_fields {
            let rendered = fields_payload
                .get(field_name)
                .and_then(Value::as_object)
                .and_then(|obj| obj.get("address"))
                .map(address_to_hex)
                .unwrap_or_default();
            address_map.insert(field_name.clone(), rendered);
        }

        let quality = candidate_quality(fields_payload, &required, &optional, &candidate);
        summaries.push(CandidateSummary {
            id: candidate_id,
            profile_id: candidate
                .get("profile_id")
                .or_else(|| candidate.get("base_profile_id"))
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default()
                .to_string(),
            fields: address_map,
            candidate_quality: quality,
        });
    }
    Ok(summaries)
}

/// Lexicographic sort used to break ties among max-coverage contenders.
fn score_order(a: &CandidateScore, b: &CandidateScore) -> Ordering {
    u8::from(b.valid)
        .cmp(&u8::from(a.valid))
        .then_with(|| u8::from(b.candidate_stable_probe).cmp(&u8::from(a.candidate_stable_probe)))
        .then_with(|| b.candidate_stability_score.total_cmp(&a.candidate_stability_score))
        .then_with(|| a.stability_penalty.total_cmp(&b.stability_penalty))
        .then_with(|| a.connect_failures_total_last.cmp(&b.connect_failures_total_last))
        .then_with(|| a.snapshot_failure_streak_max.cmp(&b.snapshot_failure_streak_max))
        .then_with(|| b.snapshot_ok_ratio.total_cmp(&a.snapshot_ok_ratio))
        .then_with(|| a.transient_299_ratio.total_cmp(&b.transient_299_ratio))
        .then_with(|| u8::from(b.is_active_candidate).cmp(&u8::from(a.is_active_candidate)))
        .then_with(|| a.original_order.cmp(&b.original_order))
}

/// Compute the deterministic recommendation for a payload.
pub fn calibration_candidate_recommendation(
    calibration_payload: &Value,
    preferred_candidate_id: &str,
    required_fields: &[String],
    optional_fields: &[String],
) -> Result<Recommendation, MemoryError> {
    let summaries =
        list_candidate_summaries(calibration_payload, required_fields, optional_fields)?;
    let (required, optional) = resolve_combat_field_sets(
        calibration_payload,
        required_fields,
        optional_fields,
        "calibration payload",
    )?;

    let preferred = preferred_candidate_id.trim().to_string();
    let active_id = calibration_payload
        .get("active_candidate_id")
        .or_else(|| calibration_payload.get("active_candidate"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    let scores: Vec<CandidateScore> = summaries
        .iter()
        .enumerate()
        .map(|(index, summary)| {
            let quality = &summary.candidate_quality;
            CandidateScore {
                id: summary.id.clone(),
                valid: quality.valid,
                resolved_required_fields: quality.resolved_required_count,
                is_active_candidate: summary.id == active_id,
                original_order: index + 1,
                has_stability_metrics: quality.stability.has_stability_metrics,
                candidate_stable_probe: quality.stability.candidate_stable_probe,
                candidate_stability_score: quality.stability.stability_score,
                snapshot_ok_ratio: quality.stability.snapshot_ok_ratio,
                transient_299_ratio: quality.stability.transient_299_ratio,
                transient_299_excessive: quality.stability.transient_299_excessive,
                candidate_stable_probe_cycles: quality.stability.candidate_stable_probe_cycles,
                connect_failures_total_last: quality.stability.connect_failures_total_last,
                snapshot_failure_streak_max: quality.stability.snapshot_failure_streak_max,
                snapshot_failures_total_last: quality.stability.snapshot_failures_total_last,
                connect_transient_failure_count: quality
                    .stability
                    .connect_transient_failure_count,
                stability_penalty: quality.stability.stability_penalty,
            }
        })
        .collect();

    let mut recommended_id = String::new();
    let mut reason = String::new();
    let mut no_stable_candidate = false;

    let preferred_valid = !preferred.is_empty()
        && scores
            .iter()
            .any(|score| score.id == preferred && score.valid);

    if preferred_valid {
        recommended_id = preferred.clone();
        reason = "preferred_candidate_valid".to_string();
    } else {
        let max_resolved = scores
            .iter()
            .map(|score| score.resolved_required_fields)
            .max()
            .unwrap_or(0);
        let contenders: Vec<&CandidateScore> = scores
            .iter()
            .filter(|score| score.resolved_required_fields == max_resolved)
            .collect();
        let with_stability: Vec<&CandidateScore> = contenders
            .iter()
            .copied()
            .filter(|score| score.has_stability_metrics)
            .collect();
        let stable: Vec<&CandidateScore> = with_stability
            .iter()
            .copied()
            .filter(|score| {
                score.candidate_stable_probe
                    && score.candidate_stability_score > 0.0
                    && !score.transient_299_excessive
            })
            .collect();

        let pool = if !stable.is_empty() {
            stable
        } else if !with_stability.is_empty() {
            no_stable_candidate = true;
            with_stability.clone()
        } else {
            contenders
        };

        let mut sorted = pool;
        sorted.sort_by(|a, b| score_order(a, b));
        if let Some(winner) = sorted.first() {
            recommended_id = if with_stability.is_empty() || !no_stable_candidate {
                winner.id.clone()
            } else {
                String::new()
            };
            reason = if winner.is_active_candidate {
                "max_required_resolved_active_candidate_tiebreak".to_string()
            } else {
                "max_required_resolved_original_order_tiebreak".to_string()
            };
            if no_stable_candidate {
                reason = "max_required_resolved_no_stable_probe".to_string();
            }
        }
    }

    Ok(Recommendation {
        algorithm: CALIBRATION_CANDIDATE_ALGORITHM.to_string(),
        preferred_candidate_id: preferred,
        active_candidate_id: active_id,
        required_combat_fields: required,
        optional_combat_fields: optional,
        recommended_candidate_id: recommended_id,
        reason,
        no_stable_candidate,
        candidate_scores: scores,
    })
}

/// Pick the candidate id to actually use. Falls back to the full-sort
/// chooser when the recommendation abstains (no stable probe).
pub fn choose_calibration_candidate_id(
    calibration_payload: &Value,
    preferred_candidate_id: &str,
    required_fields: &[String],
    optional_fields: &[String],
) -> Result<String, MemoryError> {
    let recommendation = calibration_candidate_recommendation(
        calibration_payload,
        preferred_candidate_id,
        required_fields,
        optional_fields,
    )?;
    if !recommendation.recommended_candidate_id.is_empty() {
        return Ok(recommendation.recommended_candidate_id);
    }

    let preferred = preferred_candidate_id.trim();
    if !preferred.is_empty()
        && recommendation
            .candidate_scores
            .iter()
            .any(|score| score.id == preferred && score.valid)
    {
        return Ok(preferred.to_string());
    }

    let mut sorted: Vec<&CandidateScore> = recommendation.candidate_scores.iter().collect();
    sorted.sort_by(|a, b| score_order(a, b));
    sorted.first().map(|score| score.id.clone()).ok_or_else(|| {
        MemoryError::Profile("Calibration payload has no candidate entries.".to_string())
    })
}

/// Candidate ids in payload order.
pub fn calibration_candidate_ids(
    calibration_payload: &Value,
    required_fields: &[String],
    optional_fields: &[String],
) -> Result<Vec<String>, MemoryError> {
    Ok(
        list_candidate_summaries(calibration_payload, required_fields, optional_fields)?
            .into_iter()
            .map(|summary| summary.id)
            .collect(),
    )
}
