//! Process memory subsystem
//!
//! Layered from the OS up: the backend trait and its system
//! implementation, the value scanner with snapshot persistence, signature
//! profiles, and the typed field reader used by the live bridge.

pub mod backend;
pub mod profile;
pub mod reader;
pub mod scanner;
pub mod snapshot;
pub mod system;

pub use backend::{
    is_transient_read_error, MemoryBackend, MemoryError, MemoryRegion, ProcessHandle,
    READ_FAILURE_TAG, TRANSIENT_PARTIAL_READ_CODE,
};
pub use profile::{
    default_optional_fields, default_required_fields, is_placeholder_address, load_memory_profile,
    parse_flexible_int, resolve_combat_field_sets, FieldSource, FieldType, MemoryFieldSpec,
    MemoryProfile, DEFAULT_OPTIONAL_COMBAT_FIELDS, DEFAULT_REQUIRED_COMBAT_FIELDS,
    SUPPORTED_MEMORY_SIGNATURE_SCHEMAS,
};
pub use reader::MemoryReader;
pub use scanner::{
    Candidate, NarrowCriteria, NarrowMode, NarrowStats, ScanConfig, ScanStats, ScanValue,
    ScanValueType, ValueScanner,
};
pub use snapshot::{
    load_meta, narrow_to_snapshot, read_candidates, read_snapshot_addresses,
    resolve_snapshot_paths, scan_to_snapshot, write_snapshot, SnapshotMeta, SNAPSHOT_SCHEMA,
};
pub use system::SystemMemoryBackend;
