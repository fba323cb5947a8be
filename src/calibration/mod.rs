//! Calibration layer
//!
//! Turns per-field scan snapshots into labelled candidate profiles,
//! scores them for coverage and runtime stability, recommends one
//! deterministically, and applies candidates on top of base signature
//! profiles.

pub mod apply;
pub mod candidates;
pub mod discovery;
pub mod quality;
pub mod recommend;

/// Candidate payload schema tags.
pub const CALIBRATION_CANDIDATES_SCHEMA_V1: &str = "nordhold_memory_calibration_candidates_v1";
pub const CALIBRATION_CANDIDATES_SCHEMA_V2: &str = "nordhold_memory_calibration_candidates_v2";

pub use apply::apply_calibration_candidate;
pub use candidates::{build_calibration_candidates_from_snapshots, CandidateBuildRequest};
pub use discovery::{
    calibration_project_roots, discover_latest_calibration_candidates_path,
    load_calibration_payload, resolve_calibration_payload_path,
    CALIBRATION_CANDIDATES_FILE_PREFIX,
};
pub use quality::{candidate_quality, field_has_resolved_address, CandidateQuality, StabilityStats};
pub use recommend::{
    calibration_candidate_ids, calibration_candidate_recommendation,
    choose_calibration_candidate_id, iter_candidate_entries, list_candidate_summaries,
    CandidateScore, CandidateSummary, Recommendation, CALIBRATION_CANDIDATE_ALGORITHM,
};
