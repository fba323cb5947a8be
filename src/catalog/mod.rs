//! Versioned dataset catalog
//!
//! Loads game datasets from local project storage: a versions index, a
//! scenario catalog and a memory-signatures payload per dataset version.
//! The repository is an explicit collaborator passed into the live bridge
//! and analytics hosts; it holds no mutable state.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

use crate::types::{ModelError, ScenarioDefinition};

/// Catalog loading failures. Surfaced to the caller, never swallowed.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("required file not found: {0}")]
    FileNotFound(PathBuf),
    #[error("invalid JSON in {path}: {detail}")]
    InvalidJson { path: PathBuf, detail: String },
    #[error("versions index error: {0}")]
    Index(String),
    #[error("dataset version not found: {0}")]
    VersionNotFound(String),
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),
    #[error("scenario '{id}' is invalid: {source}")]
    ScenarioInvalid {
        id: String,
        #[source]
        source: ModelError,
    },
}

/// Metadata for one dataset version from the index.
#[derive(Debug, Clone)]
pub struct DatasetMeta {
    pub dataset_version: String,
    pub game_version: String,
    pub build_id: String,
    pub catalog_path: PathBuf,
    pub memory_signatures_path: PathBuf,
}

/// Repository over `data/versions/index.json` and the files it references.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    project_root: PathBuf,
    versions_index_path: PathBuf,
}

impl CatalogRepository {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let versions_index_path = project_root.join("data/versions/index.json");
        Self {
            project_root,
            versions_index_path,
        }
    }

    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    fn read_json(&self, path: &Path) -> Result<Value, CatalogError> {
        let content = fs::read_to_string(path)
            .map_err(|_| CatalogError::FileNotFound(path.to_path_buf()))?;
        serde_json::from_str(content.trim_start_matches('\u{feff}')).map_err(|err| {
            CatalogError::InvalidJson {
                path: path.to_path_buf(),
                detail: err.to_string(),
            }
        })
    }

    /// Metadata for the version flagged active in the index.
    pub fn get_active_dataset_meta(&self) -> Result<DatasetMeta, CatalogError> {
        let payload = self.read_json(&self.versions_index_path)?;
        let active = payload
            .get("active_version")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                CatalogError::Index(
                    "versions/index.json does not define 'active_version'.".to_string(),
                )
            })?;
        self.get_dataset_meta(active)
    }

    /// Metadata for one explicit dataset version.
    pub fn get_dataset_meta(&self, dataset_version: &str) -> Result<DatasetMeta, CatalogError> {
        let payload = self.read_json(&self.versions_index_path)?;
        let versions = payload
            .get("versions")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for item in versions {
            if item.get("id").and_then(Value::as_str) != Some(dataset_version) {
                continue;
            }
            let catalog_rel = item
                .get("catalog_path")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            let signatures_rel = item
                .get("memory_signatures_path")
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if catalog_rel.is_empty() || signatures_rel.is_empty() {
                return Err(CatalogError::Index(format!(
                    "Version {dataset_version} is missing catalog/signatures paths."
                )));
            }
            return Ok(DatasetMeta {
                dataset_version: dataset_version.to_string(),
                game_version: item
                    .get("game_version")
                    .and_then(Value::as_str)
                    .unwrap_or(dataset_version)
                    .to_string(),
                build_id: item
                    .get("build_id")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown")
                    .to_string(),
                catalog_path: self.project_root.join(catalog_rel),
                memory_signatures_path: self.project_root.join(signatures_rel),
            });
        }
        Err(CatalogError::VersionNotFound(dataset_version.to_string()))
    }

    fn resolve_meta(&self, dataset_version: Option<&str>) -> Result<DatasetMeta, CatalogError> {
        match dataset_version {
            Some(version) if !version.trim().is_empty() => self.get_dataset_meta(version.trim()),
            _ => self.get_active_dataset_meta(),
        }
    }

    /// Load and validate one scenario from a dataset's catalog.
    pub fn load_scenario(
        &self,
        scenario_id: &str,
        dataset_version: Option<&str>,
    ) -> Result<(DatasetMeta, ScenarioDefinition), CatalogError> {
        let meta = self.resolve_meta(dataset_version)?;
        let payload = self.read_json(&meta.catalog_path)?;
        let scenarios = payload
            .get("scenarios")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        for item in scenarios {
            if item.get("id").and_then(Value::as_str) != Some(scenario_id) {
                continue;
            }
            let scenario = ScenarioDefinition::from_value(&item).map_err(|source| {
                CatalogError::ScenarioInvalid {
                    id: scenario_id.to_string(),
                    source,
                }
            })?;
            return Ok((meta, scenario));
        }
        Err(CatalogError::ScenarioNotFound(scenario_id.to_string()))
    }

    /// Load the raw memory-signatures payload for a dataset.
    pub fn load_memory_signatures(
        &self,
        dataset_version: Option<&str>,
    ) -> Result<Value, CatalogError> {
        let meta = self.resolve_meta(dataset_version)?;
        self.read_json(&meta.memory_signatures_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write_dataset(root: &Path) {
        fs::create_dir_all(root.join("data/versions")).expect("mkdir");
        fs::create_dir_all(root.join("data/catalog")).expect("mkdir");
        fs::write(
            root.join("data/versions/index.json"),
            serde_json::to_string_pretty(&json!({
                "active_version": "1.0.0",
                "versions": [{
                    "id": "1.0.0",
                    "game_version": "0.9.1",
                    "build_id": "b123",
                    "catalog_path": "data/catalog/catalog.json",
                    "memory_signatures_path": "data/catalog/signatures.json"
                }]
            }))
            .expect("render"),
        )
        .expect("write index");
        fs::write(
            root.join("data/catalog/catalog.json"),
            serde_json::to_string_pretty(&json!({
                "scenarios": [{
                    "id": "demo",
                    "name": "Demo",
                    "waves": [{"index": 1, "duration_s": 10.0}]
                }]
            }))
            .expect("render"),
        )
        .expect("write catalog");
        fs::write(
            root.join("data/catalog/signatures.json"),
            serde_json::to_string_pretty(&json!({
                "schema_version": "live_memory_v2",
                "profiles": [{
                    "id": "p1",
                    "fields": {"current_wave": {"type": "int32", "address": "0x10"}}
                }]
            }))
            .expect("render"),
        )
        .expect("write signatures");
    }

    #[test]
    fn active_version_resolves_and_scenario_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_dataset(dir.path());
        let repo = CatalogRepository::new(dir.path());

        let meta = repo.get_active_dataset_meta().expect("active meta");
        assert_eq!(meta.dataset_version, "1.0.0");
        assert_eq!(meta.build_id, "b123");

        let (meta, scenario) = repo.load_scenario("demo", None).expect("scenario");
        assert_eq!(meta.game_version, "0.9.1");
        assert_eq!(scenario.waves.len(), 1);
    }

    #[test]
    fn unknown_version_and_scenario_error_distinctly() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_dataset(dir.path());
        let repo = CatalogRepository::new(dir.path());

        assert!(matches!(
            repo.get_dataset_meta("9.9.9"),
            Err(CatalogError::VersionNotFound(_))
        ));
        assert!(matches!(
            repo.load_scenario("missing", Some("1.0.0")),
            Err(CatalogError::ScenarioNotFound(_))
        ));
    }

    #[test]
    fn signatures_payload_loads_raw() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_dataset(dir.path());
        let repo = CatalogRepository::new(dir.path());
        let payload = repo.load_memory_signatures(Some("1.0.0")).expect("loads");
        assert_eq!(
            payload["schema_version"],
            Value::from("live_memory_v2")
        );
    }
}
