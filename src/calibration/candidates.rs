//! Calibration candidate payload builder
//!
//! Assembles labelled candidate profiles from per-field scan snapshots:
//! loads the top addresses of each field's snapshot, forms the Cartesian
//! product across fields (required first, then optional) and emits a
//! schema-v2 payload with an embedded recommendation.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::memory::backend::MemoryError;
use crate::memory::profile::normalize_field_names;
use crate::memory::scanner::ScanValueType;
use crate::memory::snapshot::read_snapshot_addresses;

use super::recommend::calibration_candidate_recommendation;
use super::{CALIBRATION_CANDIDATES_SCHEMA_V1, CALIBRATION_CANDIDATES_SCHEMA_V2};

/// Build parameters with the same defaults as the promotion tooling.
#[derive(Debug, Clone)]
pub struct CandidateBuildRequest {
    pub profile_id: String,
    pub candidate_prefix: String,
    pub max_records_per_field: usize,
    pub max_candidates: usize,
    pub active_candidate_id: String,
    pub required_admin: bool,
    pub required_fields: Vec<String>,
    pub optional_fields: Vec<String>,
}

impl Default for CandidateBuildRequest {
    fn default() -> Self {
        Self {
            profile_id: String::new(),
            candidate_prefix: "artifact_combo".to_string(),
            max_records_per_field: 5,
            max_candidates: 256,
            active_candidate_id: String::new(),
            required_admin: false,
            required_fields: crate::memory::profile::default_required_fields(),
            optional_fields: crate::memory::profile::default_optional_fields(),
        }
    }
}

fn absolute_meta_path(project_root: &Path, raw: &Path) -> PathBuf {
    if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        project_root.join(raw)
    }
}

/// Build and persist a candidate payload from snapshot meta paths.
///
/// `field_snapshot_meta_paths` must cover every required field;
/// `optional_field_snapshot_meta_paths` adds optional fields in the given
/// order. Returns the payload that was written to `output_path`.
pub fn build_calibration_candidates_from_snapshots(
    project_root: &Path,
    field_snapshot_meta_paths: &[(String, PathBuf)],
    optional_field_snapshot_meta_paths: &[(String, PathBuf)],
    output_path: &Path,
    request: &CandidateBuildRequest,
) -> Result<Value, MemoryError> {
    if request.max_records_per_field == 0 {
        return Err(MemoryError::Profile(
            "max_records_per_field must be > 0.".to_string(),
        ));
    }
    if request.max_candidates == 0 {
        return Err(MemoryError::Profile("max_candidates must be > 0.".to_string()));
    }

    let required_fields = normalize_field_names(
        Some(request.required_fields.clone()),
        "required_fields",
        &[],
        false,
    )?;
    let declared_optional = normalize_field_names(
        Some(request.optional_fields.clone()),
        "optional_fields",
        &[],
        true,
    )?;

    let missing: Vec<&str> = required_fields
        .iter()
        .filter(|name| !field_snapshot_meta_paths.iter().any(|(n, _)| n == *name))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(MemoryError::Profile(format!(
            "Missing snapshot meta path(s) for required field(s): {}",
            missing.join(", ")
        )));
    }

    let mut optional_with_meta: Vec<(String, PathBuf)> = Vec::new();
    for (raw_name, raw_path) in optional_field_snapshot_meta_paths {
        let field_name = raw_name.trim().to_string();
        if field_name.is_empty() {
            return Err(MemoryError::Profile(
                "optional field snapshot map contains an empty field name.".to_string(),
            ));
        }
        if required_fields.contains(&field_name) {
            return Err(MemoryError::Profile(format!(
                "Optional field '{field_name}' conflicts with required field set."
            )));
        }
        optional_with_meta.push((field_name, raw_path.clone()));
    }

    let mut effective_optional: Vec<String> = Vec::new();
    for name in declared_optional
        .iter()
        .chain(optional_with_meta.iter().map(|(n, _)| n))
    {
        if !required_fields.contains(name) && !effective_optional.contains(name) {
            effective_optional.push(name.clone());
        }
    }

    // Load snapshot addresses in candidate-construction order: required
    // fields first, then optional fields with snapshot metas.
    let mut addresses_by_field: Vec<(String, Vec<u64>)> = Vec::new();
    let mut value_type_by_field: Map<String, Value> = Map::new();
    let mut meta_by_field = Map::new();
    let mut records_by_field = Map::new();

    let mut load_field = |field_name: &str, raw_path: &Path| -> Result<(), MemoryError> {
        let meta_path = absolute_meta_path(project_root, raw_path);
        let (addresses, value_type, records_path) =
            read_snapshot_addresses(&meta_path, request.max_records_per_field)?;
        addresses_by_field.push((field_name.to_string(), addresses));
        value_type_by_field.insert(field_name.to_string(), Value::from(value_type.as_str()));
        meta_by_field.insert(
            field_name.to_string(),
            Value::from(meta_path.display().to_string()),
        );
        records_by_field.insert(
            field_name.to_string(),
            Value::from(records_path.display().to_string()),
        );
        Ok(())
    };

    for field_name in &required_fields {
        let path = field_snapshot_meta_paths
            .iter()
            .find(|(name, _)| name == field_name)
            .map(|(_, path)| path.clone())
            .unwrap_or_default();
        load_field(field_name, &path)?;
    }
    for (field_name, path) in &optional_with_meta {
        load_field(field_name, path)?;
    }

    let combination_space: u64 = addresses_by_field
        .iter()
        .fold(1u64, |acc, (_, addrs)| acc.saturating_mul(addrs.len() as u64));

    // Cartesian product with the last field varying fastest.
    let mut candidates: Vec<Value> = Vec::new();
    let mut combination_truncated = false;
    let mut indices = vec![0usize; addresses_by_field.len()];
    'product: loop {
        if candidates.len() >= request.max_candidates {
            combination_truncated = true;
            break;
        }

        let mut fields_payload = Map::new();
        for (slot, (field_name, addresses)) in addresses_by_field.iter().enumerate() {
            fields_payload.insert(
                field_name.clone(),
                json!({
                    "source": "address",
                    "type": value_type_by_field
                        .get(field_name)
                        .cloned()
                        .unwrap_or_else(|| Value::from(ScanValueType::Int32.as_str())),
                    "address": format!("{:#x}", addresses[indices[slot]]),
                    "relative_to_module": false,
                }),
            );
        }

        let mut candidate = Map::new();
        candidate.insert(
            "id".to_string(),
            Value::from(format!("{}_{}", request.candidate_prefix, candidates.len() + 1)),
        );
        candidate.insert("required_admin".to_string(), Value::from(request.required_admin));
        candidate.insert("fields".to_string(), Value::Object(fields_payload));
        if !request.profile_id.trim().is_empty() {
            candidate.insert(
                "profile_id".to_string(),
                Value::from(request.profile_id.trim()),
            );
        }
        candidates.push(Value::Object(candidate));

        // Advance the odometer.
        let mut slot = addresses_by_field.len();
        loop {
            if slot == 0 {
                break 'product;
            }
            slot -= 1;
            indices[slot] += 1;
            if indices[slot] < addresses_by_field[slot].1.len() {
                break;
            }
            indices[slot] = 0;
        }
    }

    if candidates.is_empty() {
        return Err(MemoryError::Profile(
            "No calibration candidates were generated from provided snapshots.".to_string(),
        ));
    }

    let active_id = if request.active_candidate_id.trim().is_empty() {
        candidates[0]
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    } else {
        request.active_candidate_id.trim().to_string()
    };

    let selected_counts: Map<String, Value> = addresses_by_field
        .iter()
        .map(|(name, addrs)| (name.clone(), Value::from(addrs.len())))
        .collect();

    let mut payload = json!({
        "schema": CALIBRATION_CANDIDATES_SCHEMA_V2,
        "schema_compatibility": [
            CALIBRATION_CANDIDATES_SCHEMA_V1,
            CALIBRATION_CANDIDATES_SCHEMA_V2,
        ],
        "memory_schema_compatibility": ["live_memory_v1", "live_memory_v2"],
        "generated_at_utc": Utc::now().to_rfc3339(),
        "required_fields": required_fields.clone(),
        "optional_fields": effective_optional.clone(),
        "required_combat_fields": required_fields.clone(),
        "optional_combat_fields": effective_optional.clone(),
        "combat_field_sets": {
            "required": required_fields.clone(),
            "optional": effective_optional.clone(),
            "optional_with_snapshot_meta": optional_with_meta
                .iter()
                .map(|(n, _)| n.clone())
                .collect::<Vec<_>>(),
        },
        "source_snapshot_meta_paths": Value::Object(meta_by_field),
        "source_snapshot_records_paths": Value::Object(records_by_field),
        "selected_addresses_per_field": Value::Object(selected_counts),
        "combination_space": combination_space,
        "combination_truncated": combination_truncated,
        "active_candidate_id": active_id.clone(),
        "candidates": candidates,
    });

    let recommendation = calibration_candidate_recommendation(
        &payload,
        &active_id,
        &required_fields,
        &effective_optional,
    )?;
    if let Some(object) = payload.as_object_mut() {
        object.insert(
            "recommended_candidate_id".to_string(),
            Value::from(recommendation.recommended_candidate_id.clone()),
        );
        object.insert(
            "recommended_candidate_support".to_string(),
            serde_json::to_value(&recommendation)
                .map_err(|err| MemoryError::Backend(err.to_string()))?,
        );
    }

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|err| MemoryError::Backend(format!("create output dir failed: {err}")))?;
    }
    let rendered = serde_json::to_string_pretty(&payload)
        .map_err(|err| MemoryError::Backend(err.to_string()))?;
    std::fs::write(output_path, rendered)
        .map_err(|err| MemoryError::Backend(format!("write candidates failed: {err}")))?;

    info!(
        output = %output_path.display(),
        candidates = payload["candidates"].as_array().map_or(0, |items| items.len()),
        combination_space,
        combination_truncated,
        "calibration candidates written"
    );
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::scanner::{Candidate, ScanValue};
    use crate::memory::snapshot::write_snapshot;
    use serde_json::json;

    fn write_field_snapshot(dir: &Path, name: &str, addresses: &[u64]) -> PathBuf {
        let base = dir.join(name);
        let candidates: Vec<Candidate> = addresses
            .iter()
            .map(|address| Candidate {
                address: *address,
                value: ScanValue::Int(5),
            })
            .collect();
        let (meta_path, _, _) = write_snapshot(
            &base,
            "NordHold.exe",
            1,
            ScanValueType::Int32,
            "scan",
            json!({}),
            json!({}),
            &candidates,
            None,
        )
        .expect("snapshot writes");
        meta_path
    }

    #[test]
    fn builder_emits_cartesian_product_with_truncation_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let wave = write_field_snapshot(root, "wave", &[0x1000, 0x1004]);
        let gold = write_field_snapshot(root, "gold", &[0x2000, 0x2004]);
        let essence = write_field_snapshot(root, "essence", &[0x3000]);

        let request = CandidateBuildRequest {
            max_candidates: 3,
            ..CandidateBuildRequest::default()
        };
        let payload = build_calibration_candidates_from_snapshots(
            root,
            &[
                ("current_wave".to_string(), wave),
                ("gold".to_string(), gold),
                ("essence".to_string(), essence),
            ],
            &[],
            &root.join("worklogs/memory_calibration_candidates.json"),
            &request,
        )
        .expect("builds");

        assert_eq!(payload["combination_space"], json!(4));
        assert_eq!(payload["combination_truncated"], json!(true));
        let candidates = payload["candidates"].as_array().expect("array");
        assert_eq!(candidates.len(), 3);
        assert_eq!(candidates[0]["id"], json!("artifact_combo_1"));
        assert_eq!(payload["active_candidate_id"], json!("artifact_combo_1"));
        // Last field varies fastest in the product.
        assert_eq!(
            candidates[0]["fields"]["gold"]["address"],
            json!("0x2000")
        );
        assert_eq!(
            candidates[1]["fields"]["gold"]["address"],
            json!("0x2004")
        );
        assert_eq!(
            payload["recommended_candidate_id"],
            json!("artifact_combo_1")
        );
    }

    #[test]
    fn optional_field_conflicting_with_required_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let wave = write_field_snapshot(root, "wave", &[0x1000]);
        let gold = write_field_snapshot(root, "gold", &[0x2000]);
        let essence = write_field_snapshot(root, "essence", &[0x3000]);

        let result = build_calibration_candidates_from_snapshots(
            root,
            &[
                ("current_wave".to_string(), wave),
                ("gold".to_string(), gold.clone()),
                ("essence".to_string(), essence),
            ],
            &[("gold".to_string(), gold)],
            &root.join("out.json"),
            &CandidateBuildRequest::default(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn missing_required_snapshot_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path();
        let wave = write_field_snapshot(root, "wave", &[0x1000]);
        let result = build_calibration_candidates_from_snapshots(
            root,
            &[("current_wave".to_string(), wave)],
            &[],
            &root.join("out.json"),
            &CandidateBuildRequest::default(),
        );
        assert!(result.is_err());
    }
}
