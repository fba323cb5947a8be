//! Live and replay snapshot types
//!
//! Boundary contract between the live bridge and its consumers. The `build`
//! payload stays schemaless JSON (replay imports carry arbitrary shapes);
//! the bridge normalizes it against the raw-memory contract before exposure.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a snapshot came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    Memory,
    Replay,
    Synthetic,
}

/// One published game-state snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub timestamp: f64,
    pub wave: u32,
    pub gold: f64,
    pub essence: f64,
    pub build: Map<String, Value>,
    pub source_mode: SourceMode,
}

/// Origin format of an imported replay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplaySource {
    Json,
    Csv,
}

/// One time-stamped snapshot inside a replay session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySnapshot {
    pub timestamp: f64,
    #[serde(default)]
    pub wave: u32,
    #[serde(default)]
    pub gold: f64,
    #[serde(default)]
    pub essence: f64,
    #[serde(default)]
    pub build: Map<String, Value>,
}

/// An append-only imported session of snapshots, sorted by timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaySession {
    pub session_id: String,
    pub source: ReplaySource,
    pub snapshots: Vec<ReplaySnapshot>,
}
