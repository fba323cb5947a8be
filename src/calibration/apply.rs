//! Applying calibration candidates to signature profiles
//!
//! A candidate is a named override set stacked on top of a base profile.
//! Applying it merges per-field overrides onto the base fields and yields
//! a new profile whose id is `<base>@<candidate>`.

use serde_json::{json, Map, Value};

use crate::memory::backend::MemoryError;
use crate::memory::profile::{
    parse_flexible_int, resolve_combat_field_sets, MemoryFieldSpec, MemoryProfile,
};

use super::recommend::choose_calibration_candidate_id;

fn candidate_target_profile(candidate: &Value) -> String {
    candidate
        .get("profile_id")
        .or_else(|| candidate.get("base_profile_id"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// Apply a candidate from `calibration_payload` onto `base_profile`.
///
/// When `candidate_id` is empty the deterministic recommendation picks
/// one among the candidates compatible with the base profile. Returns the
/// calibrated profile and the selected candidate id.
pub fn apply_calibration_candidate(
    base_profile: &MemoryProfile,
    calibration_payload: &Value,
    candidate_id: &str,
) -> Result<(MemoryProfile, String), MemoryError> {
    let payload = calibration_payload.as_object().ok_or_else(|| {
        MemoryError::Profile("Calibration payload must be an object.".to_string())
    })?;

    let raw_candidates = payload.get("candidates").and_then(Value::as_array);
    let raw_candidates = match raw_candidates {
        Some(items) if !items.is_empty() => items,
        _ => {
            return Err(MemoryError::Profile(
                "Calibration payload has no candidates.".to_string(),
            ))
        }
    };

    let mut seen_ids: Vec<String> = Vec::new();
    let mut compatible: Vec<(String, Value)> = Vec::new();
    for (index, raw_candidate) in raw_candidates.iter().enumerate() {
        let Some(candidate) = raw_candidate.as_object() else {
            continue;
        };
        let cid = candidate
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("candidate_{}", index + 1), str::to_string);
        if seen_ids.contains(&cid) {
            return Err(MemoryError::Profile(format!(
                "Calibration payload has duplicate candidate id: {cid}"
            )));
        }
        seen_ids.push(cid.clone());

        let target_profile = candidate_target_profile(raw_candidate);
        if !target_profile.is_empty() && target_profile != base_profile.id {
            continue;
        }
        let mut tagged = candidate.clone();
        tagged.insert("id".to_string(), Value::from(cid.clone()));
        compatible.push((cid, Value::Object(tagged)));
    }

    if compatible.is_empty() {
        return Err(MemoryError::Profile(format!(
            "Calibration payload has no candidates compatible with active profile '{}'.",
            base_profile.id
        )));
    }

    let active_candidate_id = payload
        .get("active_candidate_id")
        .or_else(|| payload.get("active_candidate"))
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();

    let selection_payload = json!({
        "active_candidate_id": active_candidate_id,
        "candidates": compatible.iter().map(|(_, v)| v.clone()).collect::<Vec<_>>(),
    });
    let selected_id = choose_calibration_candidate_id(
        &selection_payload,
        candidate_id,
        &base_profile.required_combat_fields,
        &base_profile.optional_combat_fields,
    )?;
    let selected = compatible
        .iter()
        .find(|(cid, _)| *cid == selected_id)
        .map(|(_, value)| value.clone())
        .ok_or_else(|| {
            MemoryError::Profile(format!("Calibration candidate not found: {selected_id}"))
        })?;

    let raw_fields = selected.get("fields").and_then(Value::as_object);
    let raw_fields = match raw_fields {
        Some(map) if !map.is_empty() => map,
        _ => {
            return Err(MemoryError::Profile(format!(
                "Calibration candidate '{selected_id}' has empty or invalid 'fields'."
            )))
        }
    };

    // Merge overrides onto the base field specs.
    let mut merged_fields = std::collections::BTreeMap::new();
    for (field_name, base_spec) in &base_profile.fields {
        match raw_fields.get(field_name) {
            None => {
                merged_fields.insert(field_name.clone(), base_spec.clone());
            }
            Some(override_payload) => {
                let override_map = override_payload.as_object().ok_or_else(|| {
                    MemoryError::Profile(format!(
                        "Calibration candidate '{selected_id}' field override \
                         '{field_name}' must be an object."
                    ))
                })?;
                let mut merged: Map<String, Value> = base_spec
                    .to_payload()
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                for (key, item) in override_map {
                    merged.insert(key.clone(), item.clone());
                }
                merged_fields.insert(
                    field_name.clone(),
                    MemoryFieldSpec::from_value(field_name, &Value::Object(merged))?,
                );
            }
        }
    }
    // Fields introduced only by the candidate.
    for (field_name, override_payload) in raw_fields {
        if merged_fields.contains_key(field_name) {
            continue;
        }
        if !override_payload.is_object() {
            return Err(MemoryError::Profile(format!(
                "Calibration candidate '{selected_id}' field override \
                 '{field_name}' must be an object."
            )));
        }
        merged_fields.insert(
            field_name.clone(),
            MemoryFieldSpec::from_value(field_name, override_payload)?,
        );
    }

    let mut pointer_size = base_profile.pointer_size;
    if let Some(raw_pointer) = selected
        .get("pointer_size")
        .or_else(|| selected.get("pointer_size_bytes"))
    {
        let parsed =
            parse_flexible_int(raw_pointer, &format!("candidate '{selected_id}'.pointer_size"))?;
        if ![0, 4, 8].contains(&parsed) {
            return Err(MemoryError::Profile(format!(
                "Invalid pointer_size for candidate '{selected_id}': {parsed}; expected 4 or 8."
            )));
        }
        pointer_size = parsed as u32;
    }

    let poll_ms = selected
        .get("poll_ms")
        .map(|v| parse_flexible_int(v, &format!("candidate '{selected_id}'.poll_ms")))
        .transpose()?
        .map_or(base_profile.poll_ms, |ms| ms.max(200) as u64);

    let process_name = non_empty_string(selected.get("process_name"), &base_profile.process_name);
    let module_name = non_empty_string(selected.get("module_name"), &base_profile.module_name);
    let required_admin = selected
        .get("required_admin")
        .and_then(Value::as_bool)
        .unwrap_or(base_profile.required_admin);
    let profile_id = non_empty_string(
        selected.get("result_profile_id"),
        &format!("{}@{}", base_profile.id, selected_id),
    );

    let (required_combat_fields, optional_combat_fields) = resolve_combat_field_sets(
        &selected,
        &base_profile.required_combat_fields,
        &base_profile.optional_combat_fields,
        &format!("candidate '{selected_id}'"),
    )?;

    Ok((
        MemoryProfile {
            id: profile_id,
            process_name,
            module_name,
            poll_ms,
            required_admin,
            pointer_size,
            required_combat_fields,
            optional_combat_fields,
            fields: merged_fields,
        },
        selected_id,
    ))
}

fn non_empty_string(value: Option<&Value>, fallback: &str) -> String {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(|| fallback.to_string(), str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::profile::load_memory_profile;
    use serde_json::json;

    fn base_profile() -> MemoryProfile {
        load_memory_profile(
            &json!({
                "schema_version": "live_memory_v2",
                "profiles": [{
                    "id": "steam_v1",
                    "process_name": "NordHold.exe",
                    "pointer_size": 8,
                    "fields": {
                        "current_wave": {"source": "address", "type": "int32", "address": 0},
                        "gold": {"source": "address", "type": "int32", "address": 0},
                        "essence": {"source": "address", "type": "int32", "address": 0}
                    }
                }]
            }),
            "NordHold.exe",
            "steam_v1",
        )
        .expect("base profile")
    }

    fn payload() -> Value {
        json!({
            "active_candidate_id": "combo_1",
            "candidates": [{
                "id": "combo_1",
                "profile_id": "steam_v1",
                "fields": {
                    "current_wave": {"address": "0x1110"},
                    "gold": {"address": "0x2220"},
                    "essence": {"address": "0x3330"},
                    "lives": {"source": "address", "type": "int32", "address": "0x4440"}
                }
            }]
        })
    }

    #[test]
    fn candidate_merge_overrides_addresses_and_keeps_types() {
        let base = base_profile();
        let (calibrated, selected) =
            apply_calibration_candidate(&base, &payload(), "").expect("applies");

        assert_eq!(selected, "combo_1");
        assert_eq!(calibrated.id, "steam_v1@combo_1");
        assert_eq!(calibrated.fields["current_wave"].address, 0x1110);
        // Base type survives an address-only override.
        assert_eq!(
            calibrated.fields["gold"].value_type,
            base.fields["gold"].value_type
        );
        // Candidate-only fields are added.
        assert_eq!(calibrated.fields["lives"].address, 0x4440);
        assert!(calibrated.ensure_resolved(None).is_ok());
    }

    #[test]
    fn incompatible_profile_ids_are_filtered_out() {
        let base = base_profile();
        let foreign = json!({
            "candidates": [{
                "id": "other",
                "profile_id": "gog_v2",
                "fields": {"current_wave": {"address": "0x1110"}}
            }]
        });
        assert!(apply_calibration_candidate(&base, &foreign, "").is_err());
    }

    #[test]
    fn explicit_candidate_id_is_honored_when_valid() {
        let base = base_profile();
        let multi = json!({
            "candidates": [
                {"id": "a", "fields": {
                    "current_wave": {"address": "0x1110"},
                    "gold": {"address": "0x2220"},
                    "essence": {"address": "0x3330"}
                }},
                {"id": "b", "fields": {
                    "current_wave": {"address": "0x5110"},
                    "gold": {"address": "0x5220"},
                    "essence": {"address": "0x5330"}
                }}
            ]
        });
        let (calibrated, selected) =
            apply_calibration_candidate(&base, &multi, "b").expect("applies");
        assert_eq!(selected, "b");
        assert_eq!(calibrated.fields["current_wave"].address, 0x5110);
    }
}
