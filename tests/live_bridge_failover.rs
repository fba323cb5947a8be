//! Live bridge failover tests
//!
//! Drives the bridge against a scripted in-memory backend: happy-path
//! memory mode with contract inference, single-transient recovery at
//! connect and at poll, degradation on repeated transients, the admin
//! gate, replay fallback and the implicit calibration overlay.

use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use nordscope::catalog::CatalogRepository;
use nordscope::live::{ConnectOptions, LiveBridge};
use nordscope::memory::{MemoryBackend, MemoryError, MemoryReader, MemoryRegion, ProcessHandle};
use nordscope::replay::ReplayStore;
use nordscope::types::{ReplaySource, SourceMode};
use serde_json::json;

#[derive(Clone, Copy)]
enum FailKind {
    Transient,
    Hard,
}

#[derive(Default)]
struct BackendState {
    memory: BTreeMap<u64, Vec<u8>>,
    fail_queue: VecDeque<FailKind>,
    process_present: bool,
    admin: bool,
}

#[derive(Clone)]
struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    fn new(process_present: bool, admin: bool) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState {
                process_present,
                admin,
                ..BackendState::default()
            })),
        }
    }

    fn write_i32(&self, address: u64, value: i32) {
        self.lock().memory.insert(address, value.to_le_bytes().to_vec());
    }

    fn write_f64(&self, address: u64, value: f64) {
        self.lock().memory.insert(address, value.to_le_bytes().to_vec());
    }

    fn push_failure(&self, kind: FailKind) {
        self.lock().fail_queue.push_back(kind);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl MemoryBackend for ScriptedBackend {
    fn supports_memory_read(&self) -> bool {
        true
    }

    fn find_process_id(&self, _process_name: &str) -> Option<u32> {
        self.lock().process_present.then_some(4321)
    }

    fn open_process(&self, pid: u32) -> Result<ProcessHandle, MemoryError> {
        Ok(u64::from(pid))
    }

    fn close_process(&self, _handle: ProcessHandle) {}

    fn read_memory(
        &self,
        _handle: ProcessHandle,
        address: u64,
        size: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        let mut state = self.lock();
        if let Some(kind) = state.fail_queue.pop_front() {
            return Err(match kind {
                FailKind::Transient => MemoryError::partial_read(address, size, size / 2),
                FailKind::Hard => MemoryError::os_read(address, size, 5),
            });
        }
        for (start, bytes) in &state.memory {
            let end = start + bytes.len() as u64;
            if address >= *start && address + size as u64 <= end {
                let offset = (address - start) as usize;
                return Ok(bytes[offset..offset + size].to_vec());
            }
        }
        Err(MemoryError::os_read(address, size, 998))
    }

    fn get_module_base(&self, _pid: u32, _module_name: &str) -> Option<u64> {
        Some(0)
    }

    fn readable_regions(
        &self,
        _handle: ProcessHandle,
        _min_address: u64,
        _max_address: u64,
    ) -> Vec<MemoryRegion> {
        Vec::new()
    }

    fn is_admin_context(&self) -> bool {
        self.lock().admin
    }
}

fn write_dataset(root: &Path) {
    std::fs::create_dir_all(root.join("data/versions")).expect("mkdir versions");
    std::fs::create_dir_all(root.join("data/catalog")).expect("mkdir catalog");
    std::fs::write(
        root.join("data/versions/index.json"),
        serde_json::to_string_pretty(&json!({
            "active_version": "1.0.0",
            "versions": [{
                "id": "1.0.0",
                "game_version": "0.9.4",
                "build_id": "test-build",
                "catalog_path": "data/catalog/catalog.json",
                "memory_signatures_path": "data/catalog/signatures.json"
            }]
        }))
        .expect("render"),
    )
    .expect("write index");
    std::fs::write(
        root.join("data/catalog/catalog.json"),
        serde_json::to_string_pretty(&json!({"scenarios": []})).expect("render"),
    )
    .expect("write catalog");
    std::fs::write(
        root.join("data/catalog/signatures.json"),
        serde_json::to_string_pretty(&json!({
            "schema_version": "live_memory_v2",
            "profiles": [
                {
                    "id": "direct",
                    "process_name": "NordHold.exe",
                    "required_admin": false,
                    "poll_ms": 250,
                    "fields": {
                        "current_wave": {"source": "address", "type": "int32",
                                         "address": "0x1000"},
                        "gold": {"source": "address", "type": "float64",
                                 "address": "0x2000"},
                        "essence": {"source": "address", "type": "float64",
                                    "address": "0x3000"},
                        "base_hp_current": {"source": "address", "type": "int32",
                                            "address": "0x4000"},
                        "base_hp_max": {"source": "address", "type": "int32",
                                        "address": "0x5000"},
                        "enemies_alive": {"source": "address", "type": "int32",
                                          "address": "0x6000"}
                    }
                },
                {
                    "id": "admin_gated",
                    "process_name": "NordHold.exe",
                    "required_admin": true,
                    "fields": {
                        "current_wave": {"source": "address", "type": "int32",
                                         "address": "0x1000"},
                        "gold": {"source": "address", "type": "float64",
                                 "address": "0x2000"},
                        "essence": {"source": "address", "type": "float64",
                                    "address": "0x3000"}
                    }
                },
                {
                    "id": "unresolved",
                    "process_name": "NordHold.exe",
                    "required_admin": false,
                    "fields": {
                        "current_wave": {"source": "address", "type": "int32",
                                         "address": "0x0"},
                        "gold": {"source": "address", "type": "int32", "address": "0x0"},
                        "essence": {"source": "address", "type": "int32", "address": "0x0"}
                    }
                }
            ]
        }))
        .expect("render"),
    )
    .expect("write signatures");
}

fn seed_game_memory(backend: &ScriptedBackend) {
    backend.write_i32(0x1000, 4);
    backend.write_f64(0x2000, 120.0);
    backend.write_f64(0x3000, 15.0);
    backend.write_i32(0x4000, 17);
    backend.write_i32(0x5000, 20);
    backend.write_i32(0x6000, 6);
}

fn bridge_with(backend: &ScriptedBackend, root: &Path) -> LiveBridge {
    let catalog = CatalogRepository::new(root);
    let store = ReplayStore::new(root).expect("replay store");
    LiveBridge::with_reader(
        catalog,
        store,
        root,
        MemoryReader::new(Box::new(backend.clone())),
    )
}

fn connect_direct(bridge: &mut LiveBridge) -> nordscope::live::BridgeStatus {
    bridge
        .connect(&ConnectOptions {
            require_admin: false,
            signature_profile_id: "direct".to_string(),
            ..ConnectOptions::default()
        })
        .expect("connect runs")
}

#[test]
fn memory_mode_snapshot_applies_contract_inference() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);

    let mut bridge = bridge_with(&backend, dir.path());
    let status = connect_direct(&mut bridge);
    assert_eq!(status.mode, "memory");
    assert_eq!(status.reason, "ok");
    assert_eq!(status.poll_ms, 1000);
    assert_eq!(status.calibration_quality, "full");

    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.source_mode, SourceMode::Memory);
    assert_eq!(snapshot.wave, 4);
    assert!((snapshot.gold - 120.0).abs() < 1e-9);
    assert!((snapshot.essence - 15.0).abs() < 1e-9);

    let raw = snapshot.build["raw_memory_fields"]
        .as_object()
        .expect("raw fields");
    assert_eq!(raw["leaks_total"], json!(3));
    assert_eq!(raw["is_combat_phase"], json!(true));
    assert_eq!(raw["tower_inflation_index"], json!(1.0));
    assert_eq!(raw["boss_alive"], json!(false));
    assert!(snapshot.build["combat"]["block"]["value"].is_number());
}

#[test]
fn single_transient_poll_failure_recovers_with_one_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);

    let mut bridge = bridge_with(&backend, dir.path());
    assert_eq!(connect_direct(&mut bridge).mode, "memory");

    backend.push_failure(FailKind::Transient);
    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.source_mode, SourceMode::Memory);

    let status = bridge.status();
    assert_eq!(status.mode, "memory");
    assert_eq!(status.snapshot_failures_total, 1);
    assert_eq!(status.snapshot_transient_failure_count, 1);
    assert_eq!(status.snapshot_failure_streak, 0);
}

#[test]
fn consecutive_transient_failures_degrade_and_snapshots_stay_synthetic() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);

    let mut bridge = bridge_with(&backend, dir.path());
    assert_eq!(connect_direct(&mut bridge).mode, "memory");

    backend.push_failure(FailKind::Transient);
    backend.push_failure(FailKind::Transient);
    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.source_mode, SourceMode::Synthetic);

    let status = bridge.status();
    assert_eq!(status.mode, "degraded");
    assert!(status.reason.starts_with("memory_snapshot_failed:"));
    assert!(!status.memory_connected);

    // Degraded snapshots never raise and still honor the contract.
    let degraded_snapshot = bridge.snapshot();
    assert_eq!(degraded_snapshot.source_mode, SourceMode::Synthetic);
    let raw = degraded_snapshot.build["raw_memory_fields"]
        .as_object()
        .expect("raw fields");
    assert_eq!(raw["tower_inflation_index"], json!(1.0));
    assert_eq!(raw["boss_alive"], json!(false));
    assert_eq!(raw["is_combat_phase"], json!(false));
    assert!(raw.contains_key("enemy_regen_total_per_s"));
}

#[test]
fn transient_failure_at_connect_is_recovered_by_single_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);
    backend.push_failure(FailKind::Transient);

    let mut bridge = bridge_with(&backend, dir.path());
    let status = connect_direct(&mut bridge);

    assert_eq!(status.mode, "memory");
    assert_eq!(status.connect_failures_total, 1);
    assert_eq!(status.connect_transient_failure_count, 1);
    assert_eq!(status.connect_retry_success_total, 1);
}

#[test]
fn hard_connect_failure_degrades_without_retry() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);
    backend.push_failure(FailKind::Hard);

    let mut bridge = bridge_with(&backend, dir.path());
    let status = connect_direct(&mut bridge);

    assert_eq!(status.mode, "degraded");
    assert!(status.reason.starts_with("memory_connect_failed:"));
    assert_eq!(status.connect_failures_total, 1);
    assert_eq!(status.connect_retry_success_total, 0);
}

#[test]
fn admin_gated_profile_requires_admin_context() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, false);
    seed_game_memory(&backend);

    let mut bridge = bridge_with(&backend, dir.path());
    let status = bridge
        .connect(&ConnectOptions {
            require_admin: false,
            signature_profile_id: "admin_gated".to_string(),
            ..ConnectOptions::default()
        })
        .expect("connect runs");

    assert_eq!(status.mode, "degraded");
    assert_eq!(status.reason, "process_found_but_admin_required");
}

#[test]
fn replay_fallback_serves_last_session_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(false, true);

    let store = ReplayStore::new(dir.path()).expect("replay store");
    let session = store
        .import_payload(
            ReplaySource::Json,
            r#"[
                {"timestamp": 10.0, "wave": 2, "gold": 90.0, "essence": 4.0},
                {"timestamp": 20.0, "wave": 5, "gold": 210.0, "essence": 11.0,
                 "build": {"raw_memory_fields": {"enemies_alive": 3}}}
            ]"#,
            1000.0,
        )
        .expect("imports");

    let mut bridge = bridge_with(&backend, dir.path());
    let status = bridge
        .connect(&ConnectOptions {
            require_admin: false,
            signature_profile_id: "direct".to_string(),
            replay_session_id: session.session_id.clone(),
            ..ConnectOptions::default()
        })
        .expect("connect runs");

    assert_eq!(status.mode, "replay");
    assert_eq!(status.reason, "using_replay_fallback");
    assert_eq!(status.replay_session_id, session.session_id);

    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.source_mode, SourceMode::Replay);
    assert_eq!(snapshot.wave, 5);
    let raw = snapshot.build["raw_memory_fields"]
        .as_object()
        .expect("raw fields");
    assert_eq!(raw["is_combat_phase"], json!(true));
    assert_eq!(raw["tower_inflation_index"], json!(1.0));
}

#[test]
fn missing_process_without_replay_degrades() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(false, true);

    let mut bridge = bridge_with(&backend, dir.path());
    let status = connect_direct(&mut bridge);
    assert_eq!(status.mode, "degraded");
    assert_eq!(status.reason, "memory_unavailable_no_replay");

    let snapshot = bridge.snapshot();
    assert_eq!(snapshot.source_mode, SourceMode::Synthetic);
}

#[test]
fn candidate_suffixed_profile_id_falls_back_to_base() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);

    let mut bridge = bridge_with(&backend, dir.path());
    // An `@candidate` suffix falls back to the base profile id first.
    let status = bridge
        .connect(&ConnectOptions {
            require_admin: false,
            signature_profile_id: "direct@combo_9".to_string(),
            ..ConnectOptions::default()
        })
        .expect("connect runs");
    assert_eq!(status.mode, "memory");
    assert_eq!(status.signature_profile, "direct");
}

#[test]
fn unresolved_profile_discovers_calibration_from_worklogs() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_dataset(dir.path());
    let worklogs = dir.path().join("worklogs/t12-promotion");
    std::fs::create_dir_all(&worklogs).expect("mkdir worklogs");
    std::fs::write(
        worklogs.join("memory_calibration_candidates_v2.json"),
        serde_json::to_string_pretty(&json!({
            "schema": "nordhold_memory_calibration_candidates_v2",
            "active_candidate_id": "combo_1",
            "candidates": [{
                "id": "combo_1",
                "fields": {
                    "current_wave": {"source": "address", "type": "int32",
                                     "address": "0x1000"},
                    "gold": {"source": "address", "type": "float64",
                             "address": "0x2000"},
                    "essence": {"source": "address", "type": "float64",
                                "address": "0x3000"}
                }
            }]
        }))
        .expect("render"),
    )
    .expect("write candidates");

    let backend = ScriptedBackend::new(true, true);
    seed_game_memory(&backend);
    let mut bridge = bridge_with(&backend, dir.path());
    let status = bridge
        .connect(&ConnectOptions {
            require_admin: false,
            signature_profile_id: "unresolved".to_string(),
            ..ConnectOptions::default()
        })
        .expect("connect runs");

    assert_eq!(status.mode, "memory");
    assert_eq!(status.signature_profile, "unresolved@combo_1");
    assert_eq!(status.calibration_candidate, "combo_1");
    assert!(!status.calibration_candidates_path.is_empty());
    assert_eq!(status.field_coverage.required_resolved, 3);
}
