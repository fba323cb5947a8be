//! Shared data model
//!
//! Scenario catalog types, build plans, evaluation results and the live
//! snapshot boundary contract.

pub mod build;
pub mod live;
pub mod result;
pub mod scenario;

pub use build::{ActionType, BuildAction, BuildPlan, TowerPlan};
pub use live::{LiveSnapshot, ReplaySession, ReplaySnapshot, ReplaySource, SourceMode};
pub use result::{
    stabilize_value, stable_float, EconomyTotals, EvalMode, EvaluationResult, EvaluationTotals,
    WaveResult, WorkerCounts,
};
pub use scenario::{
    AccuracyBlockModel, ArmorPenetrationModel, CriticalModel, DotEffect, DotScalingPolicy,
    DotStacking, EconomyDefinition, EconomyPolicy, EnemyDefinition, GlobalModifier, ModelError,
    Modifier, ModifierOp, Ruleset, ScenarioDefinition, SpawnDefinition, TowerDefinition,
    TowerStats, UpgradeLevel, WaveDefinition, WaveResourceBaseline,
};
