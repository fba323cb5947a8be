//! Replay session store
//!
//! Append-only sessions of time-stamped game snapshots under
//! `runtime/replays/<session_id>.json`. Imports accept JSON (array or
//! object with `snapshots[]`) or CSV with an inline-JSON `build` column.
//! Snapshots are sorted by timestamp at ingest; playback is read-only.

use std::fs;
use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::types::{LiveSnapshot, ReplaySession, ReplaySnapshot, ReplaySource, SourceMode};

/// Replay import/playback failures.
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("unsupported replay format; use json or csv")]
    UnsupportedFormat,
    #[error("invalid JSON replay payload: {0}")]
    InvalidJson(String),
    #[error("replay payload contains no snapshots")]
    Empty,
    #[error("replay session not found: {0}")]
    SessionNotFound(String),
    #[error("replay session has no snapshots: {0}")]
    EmptySession(String),
    #[error("replay storage error: {0}")]
    Storage(String),
}

/// File-backed replay store rooted at `<project_root>/runtime/replays`.
#[derive(Debug, Clone)]
pub struct ReplayStore {
    replays_dir: PathBuf,
}

impl ReplayStore {
    /// Create the store, ensuring the replays directory exists.
    pub fn new(project_root: impl Into<PathBuf>) -> Result<Self, ReplayError> {
        let replays_dir = project_root.into().join("runtime/replays");
        fs::create_dir_all(&replays_dir)
            .map_err(|err| ReplayError::Storage(format!("create replays dir failed: {err}")))?;
        Ok(Self { replays_dir })
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.replays_dir.join(format!("{session_id}.json"))
    }

    /// Import a payload, persist it as a new session and return it.
    pub fn import_payload(
        &self,
        format: ReplaySource,
        content: &str,
        now_epoch_s: f64,
    ) -> Result<ReplaySession, ReplayError> {
        let snapshots = match format {
            ReplaySource::Json => parse_json_snapshots(content, now_epoch_s)?,
            ReplaySource::Csv => parse_csv_snapshots(content, now_epoch_s)?,
        };

        let session_id = format!(
            "replay-{}-{}",
            now_epoch_s as i64,
            &Uuid::new_v4().simple().to_string()[..8]
        );
        let session = ReplaySession {
            session_id: session_id.clone(),
            source: format,
            snapshots,
        };

        let rendered = serde_json::to_string_pretty(&session)
            .map_err(|err| ReplayError::Storage(format!("serialize session failed: {err}")))?;
        fs::write(self.session_path(&session_id), rendered)
            .map_err(|err| ReplayError::Storage(format!("write session failed: {err}")))?;

        info!(
            session_id = %session.session_id,
            snapshots = session.snapshots.len(),
            "replay session imported"
        );
        Ok(session)
    }

    /// Load one persisted session.
    pub fn load_session(&self, session_id: &str) -> Result<ReplaySession, ReplayError> {
        let path = self.session_path(session_id);
        let content = fs::read_to_string(&path)
            .map_err(|_| ReplayError::SessionNotFound(session_id.to_string()))?;
        let mut session: ReplaySession = serde_json::from_str(&content)
            .map_err(|err| ReplayError::InvalidJson(err.to_string()))?;
        session.session_id = session_id.to_string();
        Ok(session)
    }

    /// The most recent snapshot of a session, tagged `source_mode=replay`.
    pub fn latest_snapshot(&self, session_id: &str) -> Result<LiveSnapshot, ReplayError> {
        let session = self.load_session(session_id)?;
        let snapshot = session
            .snapshots
            .last()
            .ok_or_else(|| ReplayError::EmptySession(session_id.to_string()))?;
        Ok(LiveSnapshot {
            timestamp: snapshot.timestamp,
            wave: snapshot.wave,
            gold: snapshot.gold,
            essence: snapshot.essence,
            build: snapshot.build.clone(),
            source_mode: SourceMode::Replay,
        })
    }
}

fn snapshot_from_object(item: &Map<String, Value>, fallback_timestamp: f64) -> ReplaySnapshot {
    ReplaySnapshot {
        timestamp: item
            .get("timestamp")
            .and_then(Value::as_f64)
            .unwrap_or(fallback_timestamp),
        wave: item
            .get("wave")
            .and_then(Value::as_u64)
            .unwrap_or(0) as u32,
        gold: item.get("gold").and_then(Value::as_f64).unwrap_or(0.0),
        essence: item.get("essence").and_then(Value::as_f64).unwrap_or(0.0),
        build: item
            .get("build")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }
}

fn parse_json_snapshots(
    content: &str,
    fallback_timestamp: f64,
) -> Result<Vec<ReplaySnapshot>, ReplayError> {
    let payload: Value =
        serde_json::from_str(content).map_err(|err| ReplayError::InvalidJson(err.to_string()))?;

    let raw = match &payload {
        Value::Array(items) => items.clone(),
        Value::Object(object) => object
            .get("snapshots")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default(),
        _ => {
            return Err(ReplayError::InvalidJson(
                "payload must be a list or an object with snapshots".to_string(),
            ))
        }
    };

    let mut snapshots: Vec<ReplaySnapshot> = raw
        .iter()
        .filter_map(Value::as_object)
        .map(|item| snapshot_from_object(item, fallback_timestamp))
        .collect();
    if snapshots.is_empty() {
        return Err(ReplayError::Empty);
    }
    snapshots.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(snapshots)
}

/// Split one CSV line respecting double-quoted fields.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if chars.peek() == Some(&'"') {
                        current.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    in_quotes = true;
                }
            }
            ',' if !in_quotes => {
                fields.push(current.clone());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

fn parse_csv_snapshots(
    content: &str,
    fallback_timestamp: f64,
) -> Result<Vec<ReplaySnapshot>, ReplayError> {
    let mut lines = content.lines().filter(|line| !line.trim().is_empty());
    let Some(header_line) = lines.next() else {
        return Err(ReplayError::Empty);
    };
    let header: Vec<String> = csv_split(header_line)
        .into_iter()
        .map(|h| h.trim().to_lowercase())
        .collect();
    let column = |name: &str| header.iter().position(|h| h == name);

    let timestamp_col = column("timestamp");
    let wave_col = column("wave");
    let gold_col = column("gold");
    let essence_col = column("essence");
    let build_col = column("build");

    let mut snapshots = Vec::new();
    for line in lines {
        let fields = csv_split(line);
        let cell = |index: Option<usize>| {
            index
                .and_then(|i| fields.get(i))
                .map(|s| s.trim().to_string())
                .unwrap_or_default()
        };

        let raw_build = cell(build_col);
        let build = if raw_build.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&raw_build) {
                Ok(Value::Object(map)) => map,
                _ => {
                    let mut map = Map::new();
                    map.insert("raw".to_string(), Value::from(raw_build));
                    map
                }
            }
        };

        snapshots.push(ReplaySnapshot {
            timestamp: cell(timestamp_col).parse().unwrap_or(fallback_timestamp),
            wave: cell(wave_col).parse().unwrap_or(0),
            gold: cell(gold_col).parse().unwrap_or(0.0),
            essence: cell(essence_col).parse().unwrap_or(0.0),
            build,
        });
    }

    if snapshots.is_empty() {
        return Err(ReplayError::Empty);
    }
    snapshots.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
    Ok(snapshots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, ReplayStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ReplayStore::new(dir.path()).expect("store");
        (dir, store)
    }

    #[test]
    fn json_import_sorts_by_timestamp_and_round_trips() {
        let (_dir, store) = store();
        let session = store
            .import_payload(
                ReplaySource::Json,
                r#"[
                    {"timestamp": 20.0, "wave": 3, "gold": 50.0},
                    {"timestamp": 10.0, "wave": 2, "gold": 40.0,
                     "build": {"towers": []}}
                ]"#,
                1000.0,
            )
            .expect("imports");

        assert_eq!(session.snapshots.len(), 2);
        assert!(session.snapshots[0].timestamp < session.snapshots[1].timestamp);

        let loaded = store.load_session(&session.session_id).expect("loads");
        assert_eq!(loaded.snapshots.len(), 2);

        let latest = store.latest_snapshot(&session.session_id).expect("latest");
        assert_eq!(latest.wave, 3);
        assert_eq!(latest.source_mode, SourceMode::Replay);
    }

    #[test]
    fn csv_import_parses_inline_json_build() {
        let (_dir, store) = store();
        let content = "timestamp,wave,gold,essence,build\n\
                       5.0,1,100.0,10.0,\"{\"\"towers\"\": [], \"\"raw_memory_fields\"\": {\"\"gold\"\": 100}}\"\n\
                       7.5,2,150.0,12.0,\n";
        let session = store
            .import_payload(ReplaySource::Csv, content, 0.0)
            .expect("imports");
        assert_eq!(session.snapshots.len(), 2);
        assert!(session.snapshots[0]
            .build
            .contains_key("raw_memory_fields"));
        assert!(session.snapshots[1].build.is_empty());
    }

    #[test]
    fn empty_payload_is_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.import_payload(ReplaySource::Json, "[]", 0.0),
            Err(ReplayError::Empty)
        ));
    }

    #[test]
    fn missing_session_errors() {
        let (_dir, store) = store();
        assert!(matches!(
            store.latest_snapshot("nope"),
            Err(ReplayError::SessionNotFound(_))
        ));
    }

    #[test]
    fn object_payload_with_snapshots_key_is_accepted() {
        let (_dir, store) = store();
        let session = store
            .import_payload(
                ReplaySource::Json,
                r#"{"snapshots": [{"timestamp": 1.0, "wave": 1}]}"#,
                0.0,
            )
            .expect("imports");
        assert_eq!(session.snapshots.len(), 1);
    }
}
