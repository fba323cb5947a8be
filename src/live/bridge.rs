//! Live bridge state machine
//!
//! Orchestrates attach → profile load → calibration overlay → poll.
//! Owns the single process handle (through its reader) and classifies
//! itself as memory / replay / degraded with transient-error recovery:
//! exactly one retry per transient partial read, at connect and at poll.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::calibration::{
    apply_calibration_candidate, calibration_candidate_ids, calibration_candidate_recommendation,
    choose_calibration_candidate_id, list_candidate_summaries, load_calibration_payload,
};
use crate::catalog::{CatalogError, CatalogRepository};
use crate::memory::{
    default_optional_fields, default_required_fields, is_transient_read_error,
    load_memory_profile, MemoryError, MemoryProfile, MemoryReader, SystemMemoryBackend,
};
use crate::replay::ReplayStore;
use crate::types::{LiveSnapshot, SourceMode};

use super::contract::{combat_block_payload, normalize_raw_memory_values};

/// Errors surfaced by `connect`/`autoconnect` (catalog and explicit
/// calibration failures). All other failures degrade the bridge instead.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
}

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Disconnected,
    Memory,
    Replay,
    Degraded,
}

impl ConnectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Memory => "memory",
            Self::Replay => "replay",
            Self::Degraded => "degraded",
        }
    }
}

/// Parameters for one `connect` attempt. Empty strings mean "unset".
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub process_name: String,
    pub poll_ms: u64,
    pub require_admin: bool,
    /// Empty selects the catalog's active version.
    pub dataset_version: String,
    pub replay_session_id: String,
    pub signature_profile_id: String,
    pub calibration_candidates_path: String,
    pub calibration_candidate_id: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            process_name: "NordHold.exe".to_string(),
            poll_ms: 1000,
            require_admin: true,
            dataset_version: String::new(),
            replay_session_id: String::new(),
            signature_profile_id: String::new(),
            calibration_candidates_path: String::new(),
            calibration_candidate_id: String::new(),
        }
    }
}

/// Parameters for `autoconnect`.
#[derive(Debug, Clone)]
pub struct AutoconnectOptions {
    pub process_name: String,
    pub poll_ms: u64,
    pub require_admin: bool,
    pub dataset_version: String,
    pub dataset_autorefresh: bool,
    pub replay_session_id: String,
    pub signature_profile_id: String,
    pub calibration_candidates_path: String,
    pub calibration_candidate_id: String,
}

impl Default for AutoconnectOptions {
    fn default() -> Self {
        Self {
            process_name: "NordHold.exe".to_string(),
            poll_ms: 1000,
            require_admin: true,
            dataset_version: String::new(),
            dataset_autorefresh: true,
            replay_session_id: String::new(),
            signature_profile_id: String::new(),
            calibration_candidates_path: String::new(),
            calibration_candidate_id: String::new(),
        }
    }
}

/// Last recorded failure, by stage.
#[derive(Debug, Clone, Serialize)]
pub struct LastError {
    pub stage: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// Resolution detail for one required field.
#[derive(Debug, Clone, Serialize)]
pub struct FieldResolution {
    pub present: bool,
    pub resolved: bool,
    pub source: String,
    #[serde(rename = "type")]
    pub value_type: String,
    pub address: String,
    pub offsets: Vec<String>,
    pub relative_to_module: bool,
}

/// Field-coverage counts over the active profile.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct FieldCoverage {
    pub required_total: usize,
    pub required_resolved: usize,
    pub optional_total: usize,
    pub optional_resolved: usize,
}

/// Full bridge status report.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub status: String,
    pub mode: String,
    pub process_name: String,
    pub poll_ms: u64,
    pub require_admin: bool,
    pub dataset_version: String,
    pub game_build: String,
    pub signature_profile: String,
    pub calibration_candidates_path: String,
    pub calibration_candidate: String,
    pub reason: String,
    pub replay_session_id: String,
    pub memory_connected: bool,
    pub required_field_resolution: BTreeMap<String, FieldResolution>,
    pub field_coverage: FieldCoverage,
    pub calibration_quality: String,
    pub active_required_fields: Vec<String>,
    pub calibration_candidate_ids: Vec<String>,
    pub last_memory_values: Map<String, Value>,
    pub last_error: Option<LastError>,
    pub snapshot_failure_streak: u64,
    pub snapshot_failures_total: u64,
    pub snapshot_transient_failure_count: u64,
    pub connect_failures_total: u64,
    pub connect_transient_failure_count: u64,
    pub connect_retry_success_total: u64,
    pub autoconnect_enabled: bool,
    pub autoconnect_last_attempt_at: String,
    pub autoconnect_last_result: Value,
    pub dataset_autorefresh: bool,
}

fn now_epoch_s() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn error_kind(err: &MemoryError) -> &'static str {
    match err {
        MemoryError::Profile(_) => "profile_invalid",
        MemoryError::ProcessNotFound(_) => "process_not_found",
        MemoryError::PermissionDenied(_) => "permission_denied",
        MemoryError::Read(_) => "memory_read",
        MemoryError::Backend(_) => "backend",
    }
}

/// The live bridge. Explicit collaborators, no global state; the single
/// open process handle lives inside the reader.
pub struct LiveBridge {
    project_root: PathBuf,
    catalog: CatalogRepository,
    replay_store: ReplayStore,
    reader: MemoryReader,

    connected: bool,
    mode: ConnectionMode,
    process_name: String,
    poll_ms: u64,
    require_admin: bool,
    dataset_version: String,
    game_build: String,
    signature_profile: String,
    calibration_candidates_path: String,
    calibration_candidate: String,
    last_reason: String,
    replay_session_id: String,
    synthetic_wave: u32,
    memory_profile: Option<MemoryProfile>,
    required_fields: Vec<String>,
    available_candidate_ids: Vec<String>,
    last_memory_values: Map<String, Value>,
    last_error: Option<LastError>,

    snapshot_failure_streak: u64,
    snapshot_failures_total: u64,
    snapshot_transient_failure_count: u64,
    connect_failures_total: u64,
    connect_transient_failure_count: u64,
    connect_retry_success_total: u64,

    autoconnect_enabled: bool,
    autoconnect_last_attempt_at: String,
    autoconnect_last_result: Value,
    dataset_autorefresh: bool,
}

impl LiveBridge {
    /// Bridge over the system memory backend.
    pub fn new(
        catalog: CatalogRepository,
        replay_store: ReplayStore,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        Self::with_reader(
            catalog,
            replay_store,
            project_root,
            MemoryReader::new(Box::new(SystemMemoryBackend::new())),
        )
    }

    /// Bridge over an injected reader (tests substitute fake backends).
    pub fn with_reader(
        catalog: CatalogRepository,
        replay_store: ReplayStore,
        project_root: impl Into<PathBuf>,
        reader: MemoryReader,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            catalog,
            replay_store,
            reader,
            connected: false,
            mode: ConnectionMode::Disconnected,
            process_name: "NordHold.exe".to_string(),
            poll_ms: 1000,
            require_admin: true,
            dataset_version: String::new(),
            game_build: String::new(),
            signature_profile: String::new(),
            calibration_candidates_path: String::new(),
            calibration_candidate: String::new(),
            last_reason: "not_connected".to_string(),
            replay_session_id: String::new(),
            synthetic_wave: 1,
            memory_profile: None,
            required_fields: default_required_fields(),
            available_candidate_ids: Vec::new(),
            last_memory_values: Map::new(),
            last_error: None,
            snapshot_failure_streak: 0,
            snapshot_failures_total: 0,
            snapshot_transient_failure_count: 0,
            connect_failures_total: 0,
            connect_transient_failure_count: 0,
            connect_retry_success_total: 0,
            autoconnect_enabled: false,
            autoconnect_last_attempt_at: String::new(),
            autoconnect_last_result: Value::Object(Map::new()),
            dataset_autorefresh: true,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn poll_ms(&self) -> u64 {
        self.poll_ms
    }

    /// Attach per the connect sequence. Catalog failures surface to the
    /// caller; everything else is reported through the returned status.
    pub fn connect(&mut self, options: &ConnectOptions) -> Result<BridgeStatus, BridgeError> {
        self.connect_with_flags(options, None, None)
    }

    fn connect_with_flags(
        &mut self,
        options: &ConnectOptions,
        autoconnect_enabled: Option<bool>,
        dataset_autorefresh: Option<bool>,
    ) -> Result<BridgeStatus, BridgeError> {
        // One handle at a time: close whatever a prior connect held.
        self.reader.close();
        self.memory_profile = None;
        self.available_candidate_ids.clear();
        self.last_memory_values = Map::new();
        self.required_fields = default_required_fields();
        self.last_error = None;
        self.snapshot_failure_streak = 0;
        self.snapshot_failures_total = 0;
        self.snapshot_transient_failure_count = 0;
        self.connect_failures_total = 0;
        self.connect_transient_failure_count = 0;
        self.connect_retry_success_total = 0;
        let mut explicit_connect_failure_reason = String::new();

        self.process_name = if options.process_name.trim().is_empty() {
            "NordHold.exe".to_string()
        } else {
            options.process_name.clone()
        };
        self.poll_ms = options.poll_ms.max(200);
        self.require_admin = options.require_admin;
        self.calibration_candidates_path.clear();
        self.calibration_candidate.clear();
        if let Some(flag) = autoconnect_enabled {
            self.autoconnect_enabled = flag;
        }
        if let Some(flag) = dataset_autorefresh {
            self.dataset_autorefresh = flag;
        }

        let meta = if options.dataset_version.trim().is_empty() {
            self.catalog.get_active_dataset_meta()?
        } else {
            self.catalog.get_dataset_meta(options.dataset_version.trim())?
        };
        self.dataset_version = meta.dataset_version.clone();
        self.game_build = meta.build_id.clone();

        let signatures = self
            .catalog
            .load_memory_signatures(Some(&self.dataset_version))?;

        // Profile id fallbacks: requested, then with any `@candidate`
        // suffix stripped, then auto-selection by process name.
        let requested_profile_id = options.signature_profile_id.trim();
        let mut id_attempts: Vec<String> = Vec::new();
        if requested_profile_id.is_empty() {
            id_attempts.push(String::new());
        } else {
            id_attempts.push(requested_profile_id.to_string());
            if let Some((base, _)) = requested_profile_id.split_once('@') {
                let base = base.trim().to_string();
                if !base.is_empty() && !id_attempts.contains(&base) {
                    id_attempts.push(base);
                }
            }
            id_attempts.push(String::new());
        }

        let mut profile: Option<MemoryProfile> = None;
        let mut profile_load_error: Option<MemoryError> = None;
        for profile_id in &id_attempts {
            match load_memory_profile(&signatures, &self.process_name, profile_id) {
                Ok(loaded) => {
                    profile = Some(loaded);
                    break;
                }
                Err(err) => profile_load_error = Some(err),
            }
        }
        let Some(mut profile) = profile else {
            let err = profile_load_error.unwrap_or_else(|| {
                MemoryError::Profile("Unable to load memory signature profile.".to_string())
            });
            self.enter_degraded(format!("memory_profile_invalid:{err}"));
            self.replay_session_id.clear();
            self.set_last_error("connect_profile_load", &err);
            return Ok(self.status());
        };
        self.required_fields = if profile.required_combat_fields.is_empty() {
            default_required_fields()
        } else {
            profile.required_combat_fields.clone()
        };

        let requested_calibration_path = options.calibration_candidates_path.trim();
        let requested_candidate_id = options.calibration_candidate_id.trim();
        let explicit_calibration_request =
            !requested_calibration_path.is_empty() || !requested_candidate_id.is_empty();
        let implicit_calibration_discovery = !explicit_calibration_request
            && self.profile_has_unresolved_required_fields(&profile);

        if explicit_calibration_request || implicit_calibration_discovery {
            match self.apply_calibration(
                &profile,
                requested_calibration_path,
                requested_candidate_id,
            ) {
                Ok((calibrated, selected_candidate, resolved_path, candidate_ids)) => {
                    profile = calibrated;
                    self.calibration_candidates_path = resolved_path.display().to_string();
                    self.calibration_candidate = selected_candidate;
                    self.available_candidate_ids = candidate_ids;
                }
                Err(err) => {
                    if explicit_calibration_request {
                        self.enter_degraded(format!("memory_profile_invalid:{err}"));
                        self.replay_session_id.clear();
                        self.set_last_error("connect_calibration_apply", &err);
                        return Ok(self.status());
                    }
                    // Implicit discovery is best-effort; continue with
                    // the uncalibrated profile.
                }
            }
        }

        self.required_fields = if profile.required_combat_fields.is_empty() {
            default_required_fields()
        } else {
            profile.required_combat_fields.clone()
        };
        self.signature_profile = profile.id.clone();
        self.poll_ms = self.poll_ms.max(200);
        if profile.required_admin {
            self.require_admin = true;
        }
        self.memory_profile = Some(profile.clone());

        let has_process = self.reader.process_exists(&self.process_name);
        if has_process {
            if self.require_admin && !self.reader.is_admin_context() {
                self.enter_degraded("process_found_but_admin_required".to_string());
                return Ok(self.status());
            }
            match self.connect_open_and_read_with_single_retry(&profile) {
                Ok(values) => {
                    self.last_memory_values = values;
                    self.connected = true;
                    self.mode = ConnectionMode::Memory;
                    self.last_reason = "ok".to_string();
                    self.replay_session_id.clear();
                    self.last_error = None;
                    info!(
                        profile = %self.signature_profile,
                        poll_ms = self.poll_ms,
                        "live bridge entered memory mode"
                    );
                    return Ok(self.status());
                }
                Err(err) => {
                    self.reader.close();
                    self.connected = false;
                    self.mode = ConnectionMode::Degraded;
                    match &err {
                        MemoryError::Profile(_) => {
                            self.last_reason = format!("memory_profile_invalid:{err}");
                            self.set_last_error("connect_profile_validate", &err);
                        }
                        _ => {
                            self.last_reason = format!("memory_connect_failed:{err}");
                            self.set_last_error("connect_memory_open", &err);
                        }
                    }
                    explicit_connect_failure_reason = self.last_reason.clone();
                }
            }
        }

        if !options.replay_session_id.is_empty() {
            match self.replay_store.load_session(&options.replay_session_id) {
                Ok(_) => {
                    self.connected = false;
                    self.mode = ConnectionMode::Replay;
                    self.last_reason = "using_replay_fallback".to_string();
                    self.replay_session_id = options.replay_session_id.clone();
                    self.last_error = None;
                }
                Err(_) => {
                    self.enter_degraded(
                        "memory_unavailable_replay_session_not_found".to_string(),
                    );
                    self.replay_session_id.clear();
                }
            }
            return Ok(self.status());
        }

        if !explicit_connect_failure_reason.is_empty() {
            self.enter_degraded(explicit_connect_failure_reason);
            self.replay_session_id.clear();
            return Ok(self.status());
        }

        self.enter_degraded("memory_unavailable_no_replay".to_string());
        self.replay_session_id.clear();
        Ok(self.status())
    }

    /// Best-effort wrapper: try candidates in recommendation order until
    /// one reaches memory mode.
    pub fn autoconnect(
        &mut self,
        options: &AutoconnectOptions,
    ) -> Result<BridgeStatus, BridgeError> {
        self.autoconnect_enabled = true;
        self.dataset_autorefresh = options.dataset_autorefresh;
        self.autoconnect_last_attempt_at =
            Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let requested_path = options.calibration_candidates_path.trim().to_string();
        let requested_candidate = options.calibration_candidate_id.trim().to_string();
        let explicit_calibration_request =
            !requested_path.is_empty() || !requested_candidate.is_empty();

        let required = default_required_fields();
        let optional = default_optional_fields();
        let mut selected_path = requested_path.clone();
        let mut selected_candidate_id = requested_candidate.clone();
        let mut recommendation_reason = String::new();
        let mut candidate_attempt_order: Vec<String> = Vec::new();

        let preparation = load_calibration_payload(&requested_path, &self.project_root)
            .and_then(|(payload, resolved_path)| {
                let candidate_ids = calibration_candidate_ids(&payload, &required, &optional)?;
                let chosen = choose_calibration_candidate_id(
                    &payload,
                    &requested_candidate,
                    &required,
                    &optional,
                )?;
                let reason = calibration_candidate_recommendation(
                    &payload, &chosen, &required, &optional,
                )?
                .reason;
                Ok((resolved_path, candidate_ids, chosen, reason))
            });
        match preparation {
            Ok((resolved_path, candidate_ids, chosen, reason)) => {
                selected_path = resolved_path.display().to_string();
                selected_candidate_id = chosen.clone();
                recommendation_reason = reason;
                if !chosen.is_empty() {
                    candidate_attempt_order.push(chosen);
                }
                for candidate_id in candidate_ids {
                    let id = candidate_id.trim().to_string();
                    if !id.is_empty() && !candidate_attempt_order.contains(&id) {
                        candidate_attempt_order.push(id);
                    }
                }
            }
            Err(err) => {
                if explicit_calibration_request {
                    return Err(err.into());
                }
            }
        }

        if candidate_attempt_order.is_empty() {
            if selected_candidate_id.is_empty() {
                candidate_attempt_order.push(String::new());
            } else {
                candidate_attempt_order.push(selected_candidate_id.clone());
            }
        }

        let requested_dataset_version = options.dataset_version.trim().to_string();
        let selected_dataset_version = if self.dataset_autorefresh {
            String::new()
        } else {
            requested_dataset_version
        };

        let mut attempts: Vec<Value> = Vec::new();
        let mut final_candidate_id = String::new();
        let mut fallback_used = false;
        let mut last_status: Option<BridgeStatus> = None;

        for (index, attempt_candidate_id) in candidate_attempt_order.iter().enumerate() {
            let connect_options = ConnectOptions {
                process_name: options.process_name.clone(),
                poll_ms: options.poll_ms,
                require_admin: options.require_admin,
                dataset_version: selected_dataset_version.clone(),
                replay_session_id: options.replay_session_id.clone(),
                signature_profile_id: options.signature_profile_id.clone(),
                calibration_candidates_path: selected_path.clone(),
                calibration_candidate_id: attempt_candidate_id.clone(),
            };
            let status = self.connect_with_flags(
                &connect_options,
                Some(true),
                Some(self.dataset_autorefresh),
            )?;

            let candidate_final = if status.calibration_candidate.trim().is_empty() {
                attempt_candidate_id.trim().to_string()
            } else {
                status.calibration_candidate.trim().to_string()
            };
            final_candidate_id = candidate_final.clone();
            attempts.push(json!({
                "index": index + 1,
                "candidate_id": attempt_candidate_id,
                "selected_candidate_id": candidate_final,
                "mode": status.mode,
                "reason": status.reason,
                "memory_connected": status.memory_connected,
            }));

            let reached_memory = status.mode == "memory";
            last_status = Some(status);
            if reached_memory {
                fallback_used = index > 0;
                break;
            }
        }

        if final_candidate_id.is_empty() {
            final_candidate_id = self.calibration_candidate.trim().to_string();
        }
        if attempts.len() > 1 {
            fallback_used = true;
        }

        let status = last_status.unwrap_or_else(|| self.status());
        self.autoconnect_last_result = json!({
            "ok": status.mode == "memory",
            "mode": status.mode,
            "reason": status.reason,
            "dataset_version": status.dataset_version,
            "calibration_candidates_path": status.calibration_candidates_path,
            "calibration_candidate": status.calibration_candidate,
            "candidate_selection": {
                "selected_candidate_id": selected_candidate_id,
                "resolved_candidates_path": selected_path,
                "recommendation_reason": recommendation_reason,
            },
            "attempts": attempts,
            "selected_candidate_id_final": final_candidate_id,
            "fallback_used": fallback_used,
        });
        Ok(self.status())
    }

    /// Produce a snapshot for the current mode. Never fails: read
    /// failures degrade the bridge and a synthetic snapshot honoring the
    /// raw-memory contract is returned instead.
    pub fn snapshot(&mut self) -> LiveSnapshot {
        let now = now_epoch_s();

        if self.mode == ConnectionMode::Memory && self.connected {
            if let Some(profile) = self.memory_profile.clone() {
                match self.reader.read_fields(&profile) {
                    Ok(values) => {
                        self.snapshot_failure_streak = 0;
                        self.last_memory_values = normalize_raw_memory_values(&values);
                        self.last_error = None;
                        return self.snapshot_from_memory_values(now);
                    }
                    Err(err) => {
                        self.snapshot_failures_total += 1;
                        self.snapshot_failure_streak += 1;
                        if is_transient_read_error(&err.to_string()) {
                            self.snapshot_transient_failure_count += 1;
                            match self.reopen_and_read(&profile) {
                                Ok(values) => {
                                    self.connected = true;
                                    self.mode = ConnectionMode::Memory;
                                    self.last_reason = "ok".to_string();
                                    self.snapshot_failure_streak = 0;
                                    self.last_memory_values =
                                        normalize_raw_memory_values(&values);
                                    self.last_error = None;
                                    return self.snapshot_from_memory_values(now);
                                }
                                Err(retry_err) => {
                                    self.reader.close();
                                    self.enter_degraded(format!(
                                        "memory_snapshot_failed:{retry_err}"
                                    ));
                                    self.set_last_error("snapshot_memory_read", &retry_err);
                                }
                            }
                        } else {
                            self.reader.close();
                            self.enter_degraded(format!("memory_snapshot_failed:{err}"));
                            self.set_last_error("snapshot_memory_read", &err);
                        }
                    }
                }
            }
        }

        if self.mode == ConnectionMode::Replay && !self.replay_session_id.is_empty() {
            match self.replay_store.latest_snapshot(&self.replay_session_id) {
                Ok(snapshot) => return self.with_contract(snapshot),
                Err(err) => {
                    warn!(session = %self.replay_session_id, error = %err,
                          "replay snapshot failed; degrading");
                    self.enter_degraded(format!("replay_snapshot_failed:{err}"));
                    self.last_error = Some(LastError {
                        stage: "snapshot_replay_read".to_string(),
                        kind: "replay".to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }

        let mut build = Map::new();
        build.insert("towers".to_string(), Value::Array(Vec::new()));
        self.with_contract(LiveSnapshot {
            timestamp: now,
            wave: self.synthetic_wave.max(1),
            gold: 0.0,
            essence: 0.0,
            build,
            source_mode: SourceMode::Synthetic,
        })
    }

    /// Inspect a calibration payload: summaries plus the recommendation.
    pub fn inspect_calibration_candidates(
        &self,
        calibration_candidates_path: &str,
    ) -> Result<Value, MemoryError> {
        let (payload, resolved_path) =
            load_calibration_payload(calibration_candidates_path, &self.project_root)?;
        let required = default_required_fields();
        let optional = default_optional_fields();
        let summaries = list_candidate_summaries(&payload, &required, &optional)?;
        let recommendation =
            calibration_candidate_recommendation(&payload, "", &required, &optional)?;

        Ok(json!({
            "path": resolved_path.display().to_string(),
            "active_candidate_id": recommendation.active_candidate_id,
            "recommended_candidate_id": recommendation.recommended_candidate_id,
            "recommended_candidate_support": serde_json::to_value(&recommendation)
                .unwrap_or(Value::Null),
            "candidate_ids": summaries.iter().map(|s| s.id.clone()).collect::<Vec<_>>(),
            "candidates": serde_json::to_value(&summaries).unwrap_or(Value::Null),
        }))
    }

    /// Current status report.
    pub fn status(&self) -> BridgeStatus {
        let coverage = self.field_coverage();
        BridgeStatus {
            status: if self.connected {
                "connected".to_string()
            } else {
                "degraded".to_string()
            },
            mode: self.mode.as_str().to_string(),
            process_name: self.process_name.clone(),
            poll_ms: self.poll_ms,
            require_admin: self.require_admin,
            dataset_version: self.dataset_version.clone(),
            game_build: self.game_build.clone(),
            signature_profile: self.signature_profile.clone(),
            calibration_candidates_path: self.calibration_candidates_path.clone(),
            calibration_candidate: self.calibration_candidate.clone(),
            reason: self.last_reason.clone(),
            replay_session_id: self.replay_session_id.clone(),
            memory_connected: self.reader.connected(),
            required_field_resolution: self.required_field_resolution(),
            field_coverage: coverage,
            calibration_quality: Self::calibration_quality(coverage).to_string(),
            active_required_fields: self.required_fields.clone(),
            calibration_candidate_ids: self.available_candidate_ids.clone(),
            last_memory_values: self.last_memory_values.clone(),
            last_error: self.last_error.clone(),
            snapshot_failure_streak: self.snapshot_failure_streak,
            snapshot_failures_total: self.snapshot_failures_total,
            snapshot_transient_failure_count: self.snapshot_transient_failure_count,
            connect_failures_total: self.connect_failures_total,
            connect_transient_failure_count: self.connect_transient_failure_count,
            connect_retry_success_total: self.connect_retry_success_total,
            autoconnect_enabled: self.autoconnect_enabled,
            autoconnect_last_attempt_at: self.autoconnect_last_attempt_at.clone(),
            autoconnect_last_result: self.autoconnect_last_result.clone(),
            dataset_autorefresh: self.dataset_autorefresh,
        }
    }

    fn enter_degraded(&mut self, reason: String) {
        self.connected = false;
        self.mode = ConnectionMode::Degraded;
        self.last_reason = reason;
    }

    fn set_last_error(&mut self, stage: &str, err: &MemoryError) {
        self.last_error = Some(LastError {
            stage: stage.to_string(),
            kind: error_kind(err).to_string(),
            message: err.to_string(),
        });
    }

    fn apply_calibration(
        &self,
        base_profile: &MemoryProfile,
        calibration_candidates_path: &str,
        candidate_id: &str,
    ) -> Result<(MemoryProfile, String, PathBuf, Vec<String>), MemoryError> {
        let (payload, resolved_path) =
            load_calibration_payload(calibration_candidates_path, &self.project_root)?;
        let candidate_ids = calibration_candidate_ids(
            &payload,
            &self.required_fields,
            &default_optional_fields(),
        )?;
        let selected_id = choose_calibration_candidate_id(
            &payload,
            candidate_id,
            &self.required_fields,
            &default_optional_fields(),
        )?;
        let (profile, selected_candidate) =
            apply_calibration_candidate(base_profile, &payload, &selected_id)?;
        Ok((profile, selected_candidate, resolved_path, candidate_ids))
    }

    fn reopen_and_read(
        &mut self,
        profile: &MemoryProfile,
    ) -> Result<Map<String, Value>, MemoryError> {
        self.reader.close();
        let process_name = self.process_name.clone();
        self.reader.open(&process_name, profile)?;
        self.reader.read_fields(profile)
    }

    fn connect_open_and_read_with_single_retry(
        &mut self,
        profile: &MemoryProfile,
    ) -> Result<Map<String, Value>, MemoryError> {
        profile.ensure_resolved(None)?;
        let process_name = self.process_name.clone();
        let first_attempt = self
            .reader
            .open(&process_name, profile)
            .and_then(|()| self.reader.read_fields(profile));
        match first_attempt {
            Ok(values) => Ok(normalize_raw_memory_values(&values)),
            Err(err) => {
                self.connect_failures_total += 1;
                if is_transient_read_error(&err.to_string()) {
                    self.connect_transient_failure_count += 1;
                    match self.reopen_and_read(profile) {
                        Ok(values) => {
                            self.connect_retry_success_total += 1;
                            Ok(normalize_raw_memory_values(&values))
                        }
                        Err(retry_err) => {
                            self.connect_failures_total += 1;
                            Err(retry_err)
                        }
                    }
                } else {
                    Err(err)
                }
            }
        }
    }

    fn snapshot_from_memory_values(&mut self, now: f64) -> LiveSnapshot {
        let raw_values = self.last_memory_values.clone();
        let wave = super::contract::resolve_numeric_field(
            &raw_values,
            &["current_wave", "wave"],
            f64::from(self.synthetic_wave),
        ) as i64;
        let wave = wave.max(1) as u32;
        self.synthetic_wave = wave;

        let gold = super::contract::resolve_numeric_field(&raw_values, &["gold"], 0.0);
        let essence = super::contract::resolve_numeric_field(&raw_values, &["essence"], 0.0);
        let block = combat_block_payload(&raw_values);

        let mut build = Map::new();
        build.insert("towers".to_string(), Value::Array(Vec::new()));
        build.insert(
            "raw_memory_fields".to_string(),
            Value::Object(raw_values),
        );
        build.insert("combat".to_string(), json!({ "block": block }));

        self.with_contract(LiveSnapshot {
            timestamp: now,
            wave,
            gold,
            essence,
            build,
            source_mode: SourceMode::Memory,
        })
    }

    /// Post-process any snapshot so the raw-memory contract fields are
    /// present regardless of source mode.
    fn with_contract(&self, snapshot: LiveSnapshot) -> LiveSnapshot {
        let mut build = snapshot.build;
        let raw = build
            .get("raw_memory_fields")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        build.insert(
            "raw_memory_fields".to_string(),
            Value::Object(normalize_raw_memory_values(&raw)),
        );
        LiveSnapshot { build, ..snapshot }
    }

    fn field_coverage(&self) -> FieldCoverage {
        let empty = BTreeMap::new();
        let fields = self
            .memory_profile
            .as_ref()
            .map_or(&empty, |profile| &profile.fields);

        let required_total = self.required_fields.len();
        let required_resolved = self
            .required_fields
            .iter()
            .filter(|name| fields.get(*name).map_or(false, |spec| spec.resolved()))
            .count();

        let optional_names: Vec<&String> = fields
            .keys()
            .filter(|name| !self.required_fields.contains(name))
            .collect();
        let optional_resolved = optional_names
            .iter()
            .filter(|name| fields.get(**name).map_or(false, |spec| spec.resolved()))
            .count();

        FieldCoverage {
            required_total,
            required_resolved,
            optional_total: optional_names.len(),
            optional_resolved,
        }
    }

    fn calibration_quality(coverage: FieldCoverage) -> &'static str {
        if coverage.required_total > 0 && coverage.required_resolved == coverage.required_total {
            if coverage.optional_total == 0
                || coverage.optional_resolved == coverage.optional_total
            {
                return "full";
            }
            return "partial";
        }
        if coverage.required_resolved > 0 || coverage.optional_resolved > 0 {
            return "partial";
        }
        "minimal"
    }

    fn required_field_resolution(&self) -> BTreeMap<String, FieldResolution> {
        let mut details = BTreeMap::new();
        let empty = BTreeMap::new();
        let fields = self
            .memory_profile
            .as_ref()
            .map_or(&empty, |profile| &profile.fields);

        for field_name in &self.required_fields {
            let detail = match fields.get(field_name) {
                None => FieldResolution {
                    present: false,
                    resolved: false,
                    source: String::new(),
                    value_type: String::new(),
                    address: String::new(),
                    offsets: Vec::new(),
                    relative_to_module: false,
                },
                Some(spec) => FieldResolution {
                    present: true,
                    resolved: spec.resolved(),
                    source: spec.source.as_str().to_string(),
                    value_type: spec.value_type.as_str().to_string(),
                    address: format!("{:#x}", spec.address),
                    offsets: spec
                        .offsets
                        .iter()
                        .map(|offset| format!("{offset:#x}"))
                        .collect(),
                    relative_to_module: spec.relative_to_module,
                },
            };
            details.insert(field_name.clone(), detail);
        }
        details
    }

    fn profile_has_unresolved_required_fields(&self, profile: &MemoryProfile) -> bool {
        self.required_fields.iter().any(|name| {
            profile
                .fields
                .get(name)
                .map_or(true, |spec| !spec.resolved())
        })
    }
}
