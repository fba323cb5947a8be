//! NORDSCOPE: Nordhold Operational Scope
//!
//! Live-telemetry and deterministic-simulation engine for Nordhold.
//!
//! ## Architecture
//!
//! - **Memory subsystem**: backend primitives, value scanner with
//!   snapshot persistence, signature profiles, typed field reader
//! - **Calibration layer**: candidate payloads built from scan
//!   snapshots, stability scoring, deterministic recommendation
//! - **Live bridge**: attach → profile → calibration → poll state
//!   machine with replay/synthetic fallback
//! - **Simulation engine**: seedable expected / combat / monte-carlo
//!   evaluation of build plans with an economy accumulator
//! - **Analytics**: comparison, sensitivity sweeps and forecasting on
//!   top of the engine

pub mod analytics;
pub mod calibration;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod live;
pub mod logging;
pub mod memory;
pub mod replay;
pub mod types;

// Re-export engine configuration
pub use config::EngineConfig;

// Re-export commonly used model types
pub use types::{
    BuildPlan, EvalMode, EvaluationResult, LiveSnapshot, ModelError, ScenarioDefinition,
    SourceMode,
};

// Re-export the main collaborators
pub use catalog::{CatalogRepository, DatasetMeta};
pub use engine::evaluate_timeline;
pub use live::{AutoconnectOptions, BridgeStatus, ConnectOptions, LiveBridge};
pub use memory::{MemoryBackend, MemoryError, MemoryProfile, MemoryReader, ValueScanner};
pub use replay::{ReplayError, ReplayStore};
