//! Calibration payload discovery
//!
//! When no candidates path is supplied, walk the project root (and a few
//! ancestors, to cover bundled layouts where `_internal` sits under a
//! dist directory) for `worklogs/**/memory_calibration_candidates*.json`
//! and pick the newest by modification time, ties broken by path.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use crate::memory::backend::MemoryError;

/// File-name pattern for candidate payloads.
pub const CALIBRATION_CANDIDATES_FILE_PREFIX: &str = "memory_calibration_candidates";

fn matches_candidates_pattern(name: &str) -> bool {
    name.starts_with(CALIBRATION_CANDIDATES_FILE_PREFIX) && name.ends_with(".json")
}

/// Project roots to search: the root itself, its parent when the root is a
/// bundled `_internal` directory, and up to six ancestors that look like
/// project roots (carry `worklogs/` or `data/versions/index.json`).
pub fn calibration_project_roots(project_root: &Path) -> Vec<PathBuf> {
    fn add(roots: &mut Vec<PathBuf>, candidate: PathBuf) {
        if !roots.contains(&candidate) {
            roots.push(candidate);
        }
    }

    let mut roots: Vec<PathBuf> = Vec::new();
    add(&mut roots, project_root.to_path_buf());
    if project_root
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.eq_ignore_ascii_case("_internal"))
    {
        if let Some(parent) = project_root.parent() {
            add(&mut roots, parent.to_path_buf());
        }
    }

    let bases: Vec<PathBuf> = roots.clone();
    for base in bases {
        for ancestor in base.ancestors().skip(1).take(6) {
            if ancestor.join("worklogs").exists()
                || ancestor.join("data/versions/index.json").exists()
            {
                add(&mut roots, ancestor.to_path_buf());
            }
        }
    }
    roots
}

fn walk_json_candidates(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect();
    paths.sort();

    for path in paths {
        if path.is_dir() {
            walk_json_candidates(&path, out);
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(matches_candidates_pattern)
        {
            out.push(path);
        }
    }
}

/// Find the newest candidates payload under any discovered root's
/// `worklogs/` tree. Fails with a diagnostic listing every searched
/// location when nothing matches.
pub fn discover_latest_calibration_candidates_path(
    project_root: &Path,
) -> Result<PathBuf, MemoryError> {
    let roots = calibration_project_roots(project_root);
    let mut matches: Vec<PathBuf> = Vec::new();

    for root in &roots {
        let worklogs_root = root.join("worklogs");
        if !worklogs_root.exists() {
            continue;
        }
        let mut found = Vec::new();
        walk_json_candidates(&worklogs_root, &mut found);
        for path in found {
            if !matches.contains(&path) {
                matches.push(path);
            }
        }
    }

    if matches.is_empty() {
        let searched: Vec<String> = roots
            .iter()
            .map(|root| {
                root.join("worklogs")
                    .join(format!("{CALIBRATION_CANDIDATES_FILE_PREFIX}*.json"))
                    .display()
                    .to_string()
            })
            .collect();
        return Err(MemoryError::Profile(format!(
            "Calibration file was not provided and auto-discovery found no matches. \
             Searched: {}",
            searched.join(", ")
        )));
    }

    matches
        .into_iter()
        .max_by_key(|path| {
            let modified = fs::metadata(path)
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path.display().to_string())
        })
        .ok_or_else(|| MemoryError::Profile("Calibration discovery failed.".to_string()))
}

/// Resolve an explicit or discovered payload path.
pub fn resolve_calibration_payload_path(
    calibration_candidates_path: &str,
    project_root: &Path,
) -> Result<PathBuf, MemoryError> {
    let raw = calibration_candidates_path.trim();
    if raw.is_empty() {
        return discover_latest_calibration_candidates_path(project_root);
    }

    let raw_path = PathBuf::from(raw);
    if raw_path.is_absolute() {
        return Ok(raw_path);
    }

    let candidates: Vec<PathBuf> = calibration_project_roots(project_root)
        .into_iter()
        .map(|root| root.join(&raw_path))
        .collect();
    for candidate in &candidates {
        if candidate.exists() {
            return Ok(candidate.clone());
        }
    }
    candidates.into_iter().next().ok_or_else(|| {
        MemoryError::Profile("Calibration path resolution produced no candidates.".to_string())
    })
}

/// Load a calibration payload, resolving the path first. Returns the
/// parsed payload and the path it came from.
pub fn load_calibration_payload(
    calibration_candidates_path: &str,
    project_root: &Path,
) -> Result<(Value, PathBuf), MemoryError> {
    let path = resolve_calibration_payload_path(calibration_candidates_path, project_root)?;
    if !path.exists() {
        return Err(MemoryError::Profile(format!(
            "Calibration file not found: {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(&path)
        .map_err(|err| MemoryError::Profile(format!("Calibration file unreadable: {err}")))?;
    let payload: Value = serde_json::from_str(content.trim_start_matches('\u{feff}'))
        .map_err(|err| {
            MemoryError::Profile(format!(
                "Calibration file is not valid JSON: {}: {err}",
                path.display()
            ))
        })?;
    if !payload.is_object() {
        return Err(MemoryError::Profile(format!(
            "Calibration file must contain a JSON object: {}",
            path.display()
        )));
    }
    Ok((payload, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_walks_nested_worklogs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let worklogs = dir.path().join("worklogs/t47-signature-profile-fallback");
        fs::create_dir_all(&worklogs).expect("mkdir");
        let target = worklogs.join("memory_calibration_candidates_v2.json");
        fs::write(&target, "{}").expect("write");
        fs::write(worklogs.join("notes.json"), "{}").expect("write");

        let found =
            discover_latest_calibration_candidates_path(dir.path()).expect("discovers");
        assert_eq!(found, target);
    }

    #[test]
    fn discovery_fails_with_searched_locations() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = discover_latest_calibration_candidates_path(dir.path())
            .expect_err("nothing to discover");
        assert!(err.to_string().contains("worklogs"));
    }

    #[test]
    fn explicit_relative_path_resolves_against_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let target = dir.path().join("custom/candidates.json");
        fs::create_dir_all(target.parent().expect("parent")).expect("mkdir");
        fs::write(&target, "{\"candidates\": []}").expect("write");

        let (payload, path) =
            load_calibration_payload("custom/candidates.json", dir.path()).expect("loads");
        assert_eq!(path, target);
        assert!(payload.is_object());
    }
}
