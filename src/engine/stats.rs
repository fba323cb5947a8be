//! Tower stat resolution and hit/armor models

use crate::types::{
    AccuracyBlockModel, ArmorPenetrationModel, EnemyDefinition, Modifier, ModifierOp, Ruleset,
    TowerDefinition, TowerStats,
};

/// Shared epsilon for rate/divisor guards.
pub const EPS: f64 = 1e-9;

fn apply_modifier(value: f64, modifier: &Modifier) -> f64 {
    match modifier.op {
        ModifierOp::Add => value + modifier.value,
        ModifierOp::Mul => value * modifier.value,
        ModifierOp::Set => modifier.value,
        ModifierOp::CapMax => value.min(modifier.value),
        ModifierOp::CapMin => value.max(modifier.value),
    }
}

/// Apply modifiers in declaration order, then clamp each stat into its
/// legal range.
pub fn apply_stat_modifiers(base: TowerStats, modifiers: &[Modifier]) -> TowerStats {
    let mut damage = base.damage;
    let mut fire_rate = base.fire_rate;
    let mut crit_chance = base.crit_chance;
    let mut crit_multiplier = base.crit_multiplier;
    let mut accuracy = base.accuracy;
    let mut penetration = base.penetration;
    let mut barrier_damage_multiplier = base.barrier_damage_multiplier;

    for modifier in modifiers {
        match modifier.target.as_str() {
            "damage" => damage = apply_modifier(damage, modifier),
            "fire_rate" => fire_rate = apply_modifier(fire_rate, modifier),
            "crit_chance" => crit_chance = apply_modifier(crit_chance, modifier),
            "crit_multiplier" => crit_multiplier = apply_modifier(crit_multiplier, modifier),
            "accuracy" => accuracy = apply_modifier(accuracy, modifier),
            "penetration" => penetration = apply_modifier(penetration, modifier),
            "barrier_damage_multiplier" => {
                barrier_damage_multiplier = apply_modifier(barrier_damage_multiplier, modifier);
            }
            _ => {}
        }
    }

    TowerStats {
        damage: damage.max(0.0),
        fire_rate: fire_rate.max(EPS),
        crit_chance: crit_chance.clamp(0.0, 1.0),
        crit_multiplier: crit_multiplier.max(1.0),
        accuracy: accuracy.clamp(0.0, 1.0),
        penetration: penetration.clamp(0.0, 1.0),
        barrier_damage_multiplier: barrier_damage_multiplier.max(0.01),
    }
}

/// Resolve a tower's stats at a given level: cumulative upgrade modifiers
/// in ascending level order, then the active global modifiers.
pub fn resolve_tower_stats(
    tower: &TowerDefinition,
    level: u32,
    global_modifiers: &[Modifier],
) -> TowerStats {
    let mut modifiers: Vec<Modifier> = Vec::new();
    for upgrade in &tower.upgrade_levels {
        if upgrade.level > level {
            break;
        }
        modifiers.extend(upgrade.modifiers.iter().cloned());
    }
    modifiers.extend(global_modifiers.iter().cloned());
    apply_stat_modifiers(tower.base_stats, &modifiers)
}

/// Chance for a shot to land against a blocking enemy.
pub fn hit_chance(stats: &TowerStats, enemy: &EnemyDefinition, rules: &Ruleset) -> f64 {
    match rules.accuracy_block_model {
        AccuracyBlockModel::Multiplicative => {
            (stats.accuracy * (1.0 - enemy.block)).clamp(0.0, 1.0)
        }
        // Block is neutralized by equal or greater accuracy.
        AccuracyBlockModel::LinearSubtract => {
            (1.0 - (enemy.block - stats.accuracy).max(0.0)).clamp(0.0, 1.0)
        }
    }
}

pub fn effective_armor(enemy: &EnemyDefinition, stats: &TowerStats, rules: &Ruleset) -> f64 {
    match rules.armor_penetration_model {
        ArmorPenetrationModel::Multiplicative => {
            (enemy.armor * (1.0 - stats.penetration)).clamp(0.0, 1.0)
        }
        ArmorPenetrationModel::LinearSubtract => {
            (enemy.armor - stats.penetration).max(0.0).clamp(0.0, 1.0)
        }
    }
}

pub fn armor_damage_factor(enemy: &EnemyDefinition, stats: &TowerStats, rules: &Ruleset) -> f64 {
    (1.0 - effective_armor(enemy, stats, rules)).max(0.0)
}

/// Expected damage multiplier from criticals.
pub fn crit_factor_expected(stats: &TowerStats) -> f64 {
    (1.0 - stats.crit_chance) + stats.crit_chance * stats.crit_multiplier
}
