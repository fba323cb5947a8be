//! Scan snapshot persistence
//!
//! Each scan or narrow pass persists two sibling files: a TSV of
//! `0x<addr>\t<value>` records in discovery order and a sidecar meta JSON
//! describing schema, process, value type, mode, criteria and stats.
//! Snapshot files are write-once per base path; the caller owns the path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::backend::MemoryError;
use super::profile::parse_flexible_int;
use super::scanner::{
    Candidate, NarrowCriteria, ScanConfig, ScanStats, ScanValue, ScanValueType, ValueScanner,
};

/// Schema tag written into every snapshot meta file.
pub const SNAPSHOT_SCHEMA: &str = "nordhold_memory_scan_snapshot_v1";

/// Sidecar metadata for one persisted snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub schema: String,
    pub created_at_utc: String,
    pub process_name: String,
    pub pid: u32,
    pub value_type: ScanValueType,
    pub mode: String,
    pub criteria: Value,
    #[serde(default)]
    pub source_snapshot_meta: String,
    pub records_path: String,
    pub records_count: usize,
    pub stats: Value,
}

/// Resolve `(meta, records)` paths for a snapshot base path. Accepts the
/// bare base, the `.meta.json` path or any `.json` path.
pub fn resolve_snapshot_paths(base: &Path) -> (PathBuf, PathBuf) {
    let name = base
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if let Some(stem) = name.strip_suffix(".meta.json") {
        return (
            base.to_path_buf(),
            base.with_file_name(format!("{stem}.records.tsv")),
        );
    }
    if let Some(stem) = name.strip_suffix(".json") {
        return (
            base.to_path_buf(),
            base.with_file_name(format!("{stem}.records.tsv")),
        );
    }
    (
        base.with_file_name(format!("{name}.meta.json")),
        base.with_file_name(format!("{name}.records.tsv")),
    )
}

/// Write one snapshot pair. Record order is discovery order. Returns
/// `(meta_path, records_path, records_count)`.
#[allow(clippy::too_many_arguments)]
pub fn write_snapshot(
    out_base: &Path,
    process_name: &str,
    pid: u32,
    value_type: ScanValueType,
    mode: &str,
    criteria: Value,
    stats: Value,
    candidates: &[Candidate],
    source_snapshot: Option<&Path>,
) -> Result<(PathBuf, PathBuf, usize), MemoryError> {
    let (meta_path, records_path) = resolve_snapshot_paths(out_base);
    if let Some(parent) = meta_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| MemoryError::Backend(format!("create snapshot dir failed: {err}")))?;
    }

    let mut records = fs::File::create(&records_path)
        .map_err(|err| MemoryError::Backend(format!("create records file failed: {err}")))?;
    for item in candidates {
        writeln!(records, "{:#x}\t{}", item.address, item.value.to_text())
            .map_err(|err| MemoryError::Backend(format!("write records failed: {err}")))?;
    }

    let meta = SnapshotMeta {
        schema: SNAPSHOT_SCHEMA.to_string(),
        created_at_utc: Utc::now().to_rfc3339(),
        process_name: process_name.to_string(),
        pid,
        value_type,
        mode: mode.to_string(),
        criteria,
        source_snapshot_meta: source_snapshot
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        records_path: records_path.display().to_string(),
        records_count: candidates.len(),
        stats,
    };
    let payload = serde_json::to_string_pretty(&meta)
        .map_err(|err| MemoryError::Backend(format!("serialize snapshot meta failed: {err}")))?;
    fs::write(&meta_path, payload)
        .map_err(|err| MemoryError::Backend(format!("write snapshot meta failed: {err}")))?;

    Ok((meta_path, records_path, candidates.len()))
}

/// Run a value scan and persist the resulting snapshot pair. Returns
/// `(meta_path, records_path, records_count, stats)`.
pub fn scan_to_snapshot(
    scanner: &ValueScanner<'_>,
    value_type: ScanValueType,
    target: ScanValue,
    config: &ScanConfig,
    out_base: &Path,
) -> Result<(PathBuf, PathBuf, usize, ScanStats), MemoryError> {
    let (candidates, stats) = scanner.scan_for_value(value_type, target, config);
    let criteria = serde_json::json!({
        "target_value": target.to_text(),
        "epsilon": config.epsilon,
        "step": if config.stride == 0 { value_type.width() } else { config.stride },
        "min_address": config.min_address,
        "max_address": config.max_address,
        "max_results": config.max_results,
    });
    let stats_value =
        serde_json::to_value(&stats).map_err(|err| MemoryError::Backend(err.to_string()))?;
    let (meta_path, records_path, count) = write_snapshot(
        out_base,
        scanner.process_name(),
        scanner.pid(),
        value_type,
        "scan",
        criteria,
        stats_value,
        &candidates,
        None,
    )?;
    Ok((meta_path, records_path, count, stats))
}

/// Narrow an existing snapshot against current process values and persist
/// the filtered pair, carrying a reference to the source meta.
pub fn narrow_to_snapshot(
    scanner: &ValueScanner<'_>,
    input_meta_path: &Path,
    criteria: &NarrowCriteria,
    out_base: &Path,
) -> Result<(PathBuf, PathBuf, usize), MemoryError> {
    let meta = load_meta(input_meta_path)?;
    let records_path = resolve_records_path(input_meta_path, &meta)?;
    let source = read_candidates(&records_path, meta.value_type)?;

    let (kept, stats) = scanner.narrow(&source, meta.value_type, criteria)?;
    let criteria_value = serde_json::json!({
        "mode": criteria.mode.as_str(),
        "expected_value": criteria.expected_value.map(ScanValue::to_text),
        "expected_delta": criteria.expected_delta.map(ScanValue::to_text),
        "epsilon": criteria.epsilon,
    });
    let stats_value =
        serde_json::to_value(&stats).map_err(|err| MemoryError::Backend(err.to_string()))?;
    write_snapshot(
        out_base,
        scanner.process_name(),
        scanner.pid(),
        meta.value_type,
        &format!("narrow:{}", criteria.mode.as_str()),
        criteria_value,
        stats_value,
        &kept,
        Some(input_meta_path),
    )
}

/// Load a snapshot meta file.
pub fn load_meta(meta_path: &Path) -> Result<SnapshotMeta, MemoryError> {
    let content = fs::read_to_string(meta_path).map_err(|_| {
        MemoryError::Profile(format!("Snapshot meta file not found: {}", meta_path.display()))
    })?;
    serde_json::from_str(content.trim_start_matches('\u{feff}')).map_err(|err| {
        MemoryError::Profile(format!(
            "Snapshot meta is not valid JSON: {}: {err}",
            meta_path.display()
        ))
    })
}

/// Read candidate records from a TSV file. `#`-prefixed lines are
/// comments; malformed lines are skipped.
pub fn read_candidates(
    records_path: &Path,
    value_type: ScanValueType,
) -> Result<Vec<Candidate>, MemoryError> {
    let content = fs::read_to_string(records_path).map_err(|_| {
        MemoryError::Profile(format!(
            "Snapshot records file not found: {}",
            records_path.display()
        ))
    })?;

    let mut out = Vec::new();
    for line in content.lines() {
        let row = line.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }
        let mut parts = row.split('\t');
        let (Some(addr_text), Some(value_text)) = (parts.next(), parts.next()) else {
            continue;
        };
        if parts.next().is_some() {
            continue;
        }
        let address =
            parse_flexible_int(&Value::from(addr_text), "snapshot record address")? as u64;
        let value = ScanValue::parse(value_text, value_type)?;
        out.push(Candidate { address, value });
    }
    Ok(out)
}

/// Read unique candidate addresses from a snapshot meta path, preserving
/// record order, up to `max_records` (0 = unlimited). Used by the
/// calibration candidate builder.
pub fn read_snapshot_addresses(
    meta_path: &Path,
    max_records: usize,
) -> Result<(Vec<u64>, ScanValueType, PathBuf), MemoryError> {
    let meta = load_meta(meta_path)?;
    if meta.value_type == ScanValueType::Uint64 {
        return Err(MemoryError::Profile(format!(
            "Snapshot '{}' has unsupported value_type 'uint64'. \
             Supported calibration value types: int32|float32.",
            meta_path.display()
        )));
    }

    let records_path = resolve_records_path(meta_path, &meta)?;
    let candidates = read_candidates(&records_path, meta.value_type)?;

    let mut addresses = Vec::new();
    for candidate in candidates {
        if addresses.contains(&candidate.address) {
            continue;
        }
        addresses.push(candidate.address);
        if max_records > 0 && addresses.len() >= max_records {
            break;
        }
    }

    if addresses.is_empty() {
        return Err(MemoryError::Profile(format!(
            "Snapshot records have no candidate addresses: {}",
            records_path.display()
        )));
    }
    Ok((addresses, meta.value_type, records_path))
}

fn resolve_records_path(meta_path: &Path, meta: &SnapshotMeta) -> Result<PathBuf, MemoryError> {
    let mut tried = Vec::new();

    let raw = meta.records_path.trim();
    if !raw.is_empty() {
        let normalized = raw.replace('\\', "/");
        let record_path = PathBuf::from(&normalized);
        if record_path.is_absolute() {
            tried.push(record_path);
        } else {
            if let Some(parent) = meta_path.parent() {
                tried.push(parent.join(&record_path));
            }
            tried.push(record_path);
        }
    }
    let (_, sibling) = resolve_snapshot_paths(meta_path);
    tried.push(sibling);

    for candidate in &tried {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }
    Err(MemoryError::Profile(format!(
        "Snapshot records file was not found for meta '{}'. Tried: {}",
        meta_path.display(),
        tried
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}
