//! Live telemetry bridge
//!
//! Connection state machine over the memory subsystem plus the
//! raw-memory contract normalization applied to every published
//! snapshot.

pub mod bridge;
pub mod contract;

pub use bridge::{
    AutoconnectOptions, BridgeError, BridgeStatus, ConnectOptions, ConnectionMode, FieldCoverage,
    FieldResolution, LastError, LiveBridge,
};
pub use contract::{
    combat_block_payload, normalize_raw_memory_values, resolve_bool_field, resolve_numeric_field,
    LIVE_RAW_MEMORY_BOOL_FIELDS, LIVE_RAW_MEMORY_NUMERIC_FIELDS,
};
