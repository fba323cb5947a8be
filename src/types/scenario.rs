//! Scenario catalog model
//!
//! Validated, immutable data model for scenarios: rulesets, towers, enemies,
//! waves, global modifiers and the economy definition. Payloads are parsed
//! once at catalog load and never mutated afterwards. All enumerations are
//! closed: unknown modifier ops, stacking policies or ruleset flags are
//! rejected at ingest, not during simulation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the model validators for malformed payloads.
///
/// These are programmer/data errors: they fire at payload ingest and never
/// during simulation.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("invalid payload: {0}")]
    Invalid(String),
    #[error("missing required field: {0}")]
    MissingField(String),
    #[error("duplicate {label} id: {id}")]
    DuplicateId { label: &'static str, id: String },
}

impl From<serde_json::Error> for ModelError {
    fn from(err: serde_json::Error) -> Self {
        ModelError::Invalid(err.to_string())
    }
}

/// Stat modifier operation. Applied in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModifierOp {
    Add,
    Mul,
    Set,
    CapMax,
    CapMin,
}

/// A single stat modifier targeting one tower stat by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Modifier {
    pub target: String,
    pub op: ModifierOp,
    pub value: f64,
}

/// Stacking policy for damage-over-time effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DotStacking {
    #[default]
    RefreshDuration,
    AddStacks,
    ReplaceIfStronger,
}

/// Damage-over-time effect attached to a tower definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotEffect {
    pub id: String,
    pub damage_per_tick: f64,
    pub tick_interval_s: f64,
    pub duration_s: f64,
    #[serde(default = "default_max_stacks")]
    pub max_stacks: u32,
    #[serde(default)]
    pub stacking: DotStacking,
}

fn default_max_stacks() -> u32 {
    1
}

/// Base (or resolved) tower combat stats.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TowerStats {
    pub damage: f64,
    pub fire_rate: f64,
    #[serde(default)]
    pub crit_chance: f64,
    #[serde(default = "default_crit_multiplier")]
    pub crit_multiplier: f64,
    #[serde(default = "default_accuracy")]
    pub accuracy: f64,
    #[serde(default)]
    pub penetration: f64,
    #[serde(default = "default_barrier_multiplier")]
    pub barrier_damage_multiplier: f64,
}

fn default_crit_multiplier() -> f64 {
    1.5
}

fn default_accuracy() -> f64 {
    1.0
}

fn default_barrier_multiplier() -> f64 {
    1.0
}

/// One upgrade step. Modifiers are cumulative: resolving level L applies
/// every step with `level <= L` in ascending level order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpgradeLevel {
    pub level: u32,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Tower definition from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TowerDefinition {
    pub id: String,
    pub name: String,
    pub base_stats: TowerStats,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub upgrade_levels: Vec<UpgradeLevel>,
    #[serde(default)]
    pub dot_effects: Vec<DotEffect>,
}

/// Named set of modifiers the player can toggle scenario-wide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalModifier {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modifiers: Vec<Modifier>,
}

/// Enemy definition from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnemyDefinition {
    pub id: String,
    pub name: String,
    pub hp: f64,
    #[serde(default)]
    pub armor: f64,
    #[serde(default)]
    pub block: f64,
    #[serde(default)]
    pub barrier: f64,
    #[serde(default)]
    pub regen_per_s: f64,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl EnemyDefinition {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|item| item == tag)
    }
}

/// Spawn burst inside a wave: `count` enemies of one type starting at
/// `at_s`, one every `interval_s`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpawnDefinition {
    pub at_s: f64,
    pub enemy_id: String,
    pub count: u32,
    #[serde(default)]
    pub interval_s: f64,
}

/// One indexed wave with a duration and spawn schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveDefinition {
    pub index: u32,
    pub duration_s: f64,
    #[serde(default)]
    pub spawns: Vec<SpawnDefinition>,
}

/// Accuracy-vs-block resolution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccuracyBlockModel {
    #[default]
    LinearSubtract,
    Multiplicative,
}

/// Armor-vs-penetration resolution model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmorPenetrationModel {
    #[default]
    LinearSubtract,
    Multiplicative,
}

/// Whether DoT damage scales with the source tower only or with the
/// global crit expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DotScalingPolicy {
    #[default]
    SourceOnly,
    Global,
}

/// Critical hits: closed-form expectation or per-shot sampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalModel {
    #[default]
    Expected,
    Sampled,
}

/// Scenario-wide combat rule flags.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Ruleset {
    #[serde(default)]
    pub accuracy_block_model: AccuracyBlockModel,
    #[serde(default)]
    pub armor_penetration_model: ArmorPenetrationModel,
    #[serde(default)]
    pub barrier_inherits_armor: bool,
    #[serde(default)]
    pub dot_scaling_policy: DotScalingPolicy,
    #[serde(default)]
    pub critical_model: CriticalModel,
}

/// Named economy policy: income and build-cost multipliers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyPolicy {
    pub id: String,
    #[serde(default = "default_unit_multiplier")]
    pub worker_gold_multiplier: f64,
    #[serde(default = "default_unit_multiplier")]
    pub worker_essence_multiplier: f64,
    #[serde(default = "default_unit_multiplier")]
    pub build_cost_multiplier: f64,
}

fn default_unit_multiplier() -> f64 {
    1.0
}

impl EconomyPolicy {
    /// The neutral policy that always exists.
    pub fn balanced() -> Self {
        Self {
            id: "balanced".to_string(),
            worker_gold_multiplier: 1.0,
            worker_essence_multiplier: 1.0,
            build_cost_multiplier: 1.0,
        }
    }
}

/// Per-wave resource baseline override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaveResourceBaseline {
    pub wave: u32,
    #[serde(default)]
    pub gold: f64,
    #[serde(default)]
    pub essence: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct EconomyPayload {
    #[serde(default)]
    default_wave_gold: f64,
    #[serde(default)]
    default_wave_essence: f64,
    #[serde(default)]
    wave_resource_baseline: Vec<WaveResourceBaseline>,
    #[serde(default)]
    initial_workers: i64,
    #[serde(default)]
    initial_workers_gold: i64,
    #[serde(default)]
    initial_workers_essence: i64,
    #[serde(default)]
    worker_gold_income_per_wave: f64,
    #[serde(default)]
    worker_essence_income_per_wave: f64,
    #[serde(default)]
    build_cost_inflation_rate: f64,
    #[serde(default = "default_inflation_max")]
    build_cost_inflation_max_multiplier: f64,
    #[serde(default)]
    default_policy_id: Option<String>,
    #[serde(default)]
    policies: Vec<EconomyPolicy>,
}

fn default_inflation_max() -> f64 {
    2.0
}

impl Default for EconomyPayload {
    fn default() -> Self {
        Self {
            default_wave_gold: 0.0,
            default_wave_essence: 0.0,
            wave_resource_baseline: Vec::new(),
            initial_workers: 0,
            initial_workers_gold: 0,
            initial_workers_essence: 0,
            worker_gold_income_per_wave: 0.0,
            worker_essence_income_per_wave: 0.0,
            build_cost_inflation_rate: 0.0,
            build_cost_inflation_max_multiplier: default_inflation_max(),
            default_policy_id: None,
            policies: Vec::new(),
        }
    }
}

/// Scenario economy definition. The `balanced` policy is synthesized if the
/// payload does not declare it, and `default_policy_id` falls back to
/// `balanced` when it names an unknown policy.
#[derive(Debug, Clone, Serialize)]
pub struct EconomyDefinition {
    pub default_wave_gold: f64,
    pub default_wave_essence: f64,
    pub wave_resource_baseline: Vec<WaveResourceBaseline>,
    pub initial_workers: i64,
    pub initial_workers_gold: i64,
    pub initial_workers_essence: i64,
    pub worker_gold_income_per_wave: f64,
    pub worker_essence_income_per_wave: f64,
    pub build_cost_inflation_rate: f64,
    pub build_cost_inflation_max_multiplier: f64,
    pub default_policy_id: String,
    pub policies: BTreeMap<String, EconomyPolicy>,
}

impl Default for EconomyDefinition {
    fn default() -> Self {
        Self::from_payload(EconomyPayload::default())
    }
}

impl EconomyDefinition {
    fn from_payload(payload: EconomyPayload) -> Self {
        let mut baselines = payload.wave_resource_baseline;
        baselines.sort_by_key(|item| item.wave);

        let mut policies: BTreeMap<String, EconomyPolicy> = BTreeMap::new();
        for policy in payload.policies {
            policies.insert(policy.id.clone(), policy);
        }
        policies
            .entry("balanced".to_string())
            .or_insert_with(EconomyPolicy::balanced);

        let mut default_policy_id = payload
            .default_policy_id
            .unwrap_or_else(|| "balanced".to_string());
        if !policies.contains_key(&default_policy_id) {
            default_policy_id = "balanced".to_string();
        }

        Self {
            default_wave_gold: payload.default_wave_gold,
            default_wave_essence: payload.default_wave_essence,
            wave_resource_baseline: baselines,
            initial_workers: payload.initial_workers,
            initial_workers_gold: payload.initial_workers_gold,
            initial_workers_essence: payload.initial_workers_essence,
            worker_gold_income_per_wave: payload.worker_gold_income_per_wave,
            worker_essence_income_per_wave: payload.worker_essence_income_per_wave,
            build_cost_inflation_rate: payload.build_cost_inflation_rate,
            build_cost_inflation_max_multiplier: payload.build_cost_inflation_max_multiplier,
            default_policy_id,
            policies,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ScenarioPayload {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    rules: Ruleset,
    #[serde(default)]
    towers: Vec<TowerDefinition>,
    #[serde(default)]
    enemies: Vec<EnemyDefinition>,
    #[serde(default)]
    waves: Vec<WaveDefinition>,
    #[serde(default)]
    global_modifiers: Vec<GlobalModifier>,
    #[serde(default)]
    economy: Option<EconomyPayload>,
}

/// Immutable scenario tree, indexed for simulation access.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: Ruleset,
    pub towers: BTreeMap<String, TowerDefinition>,
    pub enemies: BTreeMap<String, EnemyDefinition>,
    pub waves: Vec<WaveDefinition>,
    pub global_modifiers: BTreeMap<String, GlobalModifier>,
    pub economy: EconomyDefinition,
}

impl ScenarioDefinition {
    /// Parse and validate a scenario object from catalog JSON.
    ///
    /// Waves are sorted by index and upgrade ladders by level so the
    /// simulation never has to re-sort. Duplicate ids are rejected.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, ModelError> {
        let payload: ScenarioPayload = serde_json::from_value(value.clone())?;

        let mut towers = BTreeMap::new();
        for mut tower in payload.towers {
            tower.upgrade_levels.sort_by_key(|item| item.level);
            if towers.insert(tower.id.clone(), tower.clone()).is_some() {
                return Err(ModelError::DuplicateId {
                    label: "tower",
                    id: tower.id,
                });
            }
        }

        let mut enemies = BTreeMap::new();
        for enemy in payload.enemies {
            if enemies.insert(enemy.id.clone(), enemy.clone()).is_some() {
                return Err(ModelError::DuplicateId {
                    label: "enemy",
                    id: enemy.id,
                });
            }
        }

        let mut global_modifiers = BTreeMap::new();
        for modifier in payload.global_modifiers {
            if global_modifiers
                .insert(modifier.id.clone(), modifier.clone())
                .is_some()
            {
                return Err(ModelError::DuplicateId {
                    label: "global modifier",
                    id: modifier.id,
                });
            }
        }

        let mut waves = payload.waves;
        waves.sort_by_key(|item| item.index);

        Ok(Self {
            id: payload.id,
            name: payload.name,
            description: payload.description,
            rules: payload.rules,
            towers,
            enemies,
            waves,
            global_modifiers,
            economy: EconomyDefinition::from_payload(payload.economy.unwrap_or_default()),
        })
    }
}
