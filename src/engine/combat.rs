//! Discrete-event combat simulation
//!
//! Event queue keyed by `(time, serial)`; serials increase monotonically
//! so tie order is deterministic for a given seed. Sampling uses a
//! seedable ChaCha stream, reproducible across platforms.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::types::{
    DotScalingPolicy, EnemyDefinition, Ruleset, ScenarioDefinition, TowerStats, WaveDefinition,
    WaveResult,
};

use super::expected::active_global_modifiers;
use super::runtime::RuntimeState;
use super::stats::{
    armor_damage_factor, crit_factor_expected, hit_chance, resolve_tower_stats, EPS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventKind {
    TowerAttack { tower_uid: u32 },
    DotTick { enemy_uid: u32, dot_uid: u64 },
}

#[derive(Debug, Clone, Copy)]
struct Event {
    at_s: f64,
    serial: u64,
    kind: EventKind,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; invert so the earliest event pops
        // first, ties broken by ascending serial.
        other
            .at_s
            .total_cmp(&self.at_s)
            .then_with(|| other.serial.cmp(&self.serial))
    }
}

#[derive(Debug, Clone)]
struct DotState {
    effect_id: String,
    damage: f64,
    tick_interval: f64,
    end: f64,
}

struct EnemyInstance {
    uid: u32,
    definition: EnemyDefinition,
    spawn_time: f64,
    hp: f64,
    barrier: f64,
    dots: BTreeMap<u64, DotState>,
    alive: bool,
}

struct TowerInstance {
    uid: u32,
    name: String,
    dot_effects: Vec<crate::types::DotEffect>,
    stats: TowerStats,
    focus_priorities: Vec<String>,
    focus_until_death: bool,
    sticky_target_uid: Option<u32>,
}

fn target_score(enemy: &EnemyInstance, now: f64, priority: &str) -> f64 {
    let progress = (now - enemy.spawn_time).max(0.0) * enemy.definition.speed.max(0.0);
    let hp_total = enemy.hp + enemy.barrier;

    match priority {
        "progress" | "closest_to_gate" => progress,
        "lowest_hp" => -hp_total,
        "highest_hp" => hp_total,
        "fastest" => enemy.definition.speed,
        "barrier" => enemy.barrier,
        "boss_elite" => {
            if enemy.definition.has_tag("boss") || enemy.definition.has_tag("elite") {
                1.0
            } else {
                0.0
            }
        }
        "healer" => {
            if enemy.definition.has_tag("healer") {
                1.0
            } else {
                0.0
            }
        }
        "summoner" | "spawner" => {
            if enemy.definition.has_tag("summoner") || enemy.definition.has_tag("spawner") {
                1.0
            } else {
                0.0
            }
        }
        _ => progress,
    }
}

fn pick_target(now: f64, tower: &mut TowerInstance, enemies: &[EnemyInstance]) -> Option<u32> {
    let mut alive: Vec<&EnemyInstance> = enemies
        .iter()
        .filter(|enemy| enemy.alive && now >= enemy.spawn_time)
        .collect();
    if alive.is_empty() {
        return None;
    }

    if tower.focus_until_death {
        if let Some(sticky) = tower.sticky_target_uid {
            if let Some(candidate) = alive.iter().find(|enemy| enemy.uid == sticky) {
                return Some(candidate.uid);
            }
        }
    }

    let priorities: &[String] = if tower.focus_priorities.is_empty() {
        &[]
    } else {
        &tower.focus_priorities
    };
    alive.sort_by(|a, b| {
        if priorities.is_empty() {
            return target_score(b, now, "progress").total_cmp(&target_score(a, now, "progress"));
        }
        for priority in priorities {
            let score_a = target_score(a, now, priority);
            let score_b = target_score(b, now, priority);
            match score_b.total_cmp(&score_a) {
                Ordering::Equal => {}
                ordering => return ordering,
            }
        }
        Ordering::Equal
    });

    let target_uid = alive[0].uid;
    if tower.focus_until_death {
        tower.sticky_target_uid = Some(target_uid);
    }
    Some(target_uid)
}

/// Resolve one shot against a target. Returns damage actually applied
/// (barrier absorption plus hp loss).
fn apply_direct_damage(
    enemy: &mut EnemyInstance,
    stats: &TowerStats,
    rules: &Ruleset,
    rng: &mut ChaCha8Rng,
    sampled: bool,
) -> f64 {
    if !enemy.alive {
        return 0.0;
    }

    let hit = hit_chance(stats, &enemy.definition, rules);
    if sampled && rng.gen::<f64>() > hit {
        return 0.0;
    }

    let critical = if sampled {
        if rng.gen::<f64>() < stats.crit_chance {
            stats.crit_multiplier
        } else {
            1.0
        }
    } else {
        crit_factor_expected(stats)
    };

    let direct = stats.damage * critical;
    let armor_factor = armor_damage_factor(&enemy.definition, stats, rules);

    let mut total_damage = 0.0;
    if enemy.barrier > EPS {
        let barrier_factor = if rules.barrier_inherits_armor {
            armor_factor
        } else {
            1.0
        };
        let barrier_damage = direct * stats.barrier_damage_multiplier * barrier_factor;
        let absorbed = enemy.barrier.min(barrier_damage);
        enemy.barrier -= absorbed;
        total_damage += absorbed;

        let overflow = (barrier_damage - absorbed).max(0.0);
        if overflow > EPS {
            let hp_damage = overflow * armor_factor;
            let dealt = enemy.hp.min(hp_damage);
            enemy.hp -= dealt;
            total_damage += dealt;
        }
    } else {
        let hp_damage = direct * armor_factor;
        let dealt = enemy.hp.min(hp_damage);
        enemy.hp -= dealt;
        total_damage += dealt;
    }

    if enemy.hp <= EPS && enemy.barrier <= EPS {
        enemy.alive = false;
    }
    total_damage
}

fn apply_regen(enemies: &mut [EnemyInstance], delta_s: f64) {
    if delta_s <= 0.0 {
        return;
    }
    for enemy in enemies {
        if !enemy.alive || enemy.definition.regen_per_s <= EPS {
            continue;
        }
        enemy.hp = (enemy.hp + enemy.definition.regen_per_s * delta_s).min(enemy.definition.hp);
    }
}

/// Simulate one wave with the discrete-event queue. `sampled` rolls hit
/// and crit dice; expected mode uses the closed-form factors instead.
pub fn simulate_wave_combat(
    scenario: &ScenarioDefinition,
    wave: &WaveDefinition,
    runtime: &RuntimeState,
    seed: i64,
    sampled: bool,
) -> WaveResult {
    let mut rng = ChaCha8Rng::seed_from_u64(seed as u64);
    let modifiers = active_global_modifiers(scenario, runtime);

    let mut towers: Vec<TowerInstance> = Vec::new();
    for (index, runtime_tower) in runtime.towers.iter().enumerate() {
        let Some(tower_def) = scenario.towers.get(&runtime_tower.tower_id) else {
            continue;
        };
        towers.push(TowerInstance {
            uid: index as u32 + 1,
            name: tower_def.name.clone(),
            dot_effects: tower_def.dot_effects.clone(),
            stats: resolve_tower_stats(tower_def, runtime_tower.level, &modifiers),
            focus_priorities: runtime_tower.focus_priorities.clone(),
            focus_until_death: runtime_tower.focus_until_death,
            sticky_target_uid: None,
        });
    }

    let mut enemies: Vec<EnemyInstance> = Vec::new();
    let mut enemy_hp_pool = 0.0;
    let mut enemy_uid = 1u32;
    for spawn in &wave.spawns {
        let Some(enemy_def) = scenario.enemies.get(&spawn.enemy_id) else {
            continue;
        };
        for index in 0..spawn.count {
            enemies.push(EnemyInstance {
                uid: enemy_uid,
                definition: enemy_def.clone(),
                spawn_time: spawn.at_s + spawn.interval_s * f64::from(index),
                hp: enemy_def.hp,
                barrier: enemy_def.barrier,
                dots: BTreeMap::new(),
                alive: true,
            });
            enemy_uid += 1;
            enemy_hp_pool += enemy_def.hp + enemy_def.barrier;
        }
    }

    let mut events: BinaryHeap<Event> = BinaryHeap::new();
    let mut serial: u64 = 0;
    for tower in &towers {
        events.push(Event {
            at_s: 0.0,
            serial,
            kind: EventKind::TowerAttack {
                tower_uid: tower.uid,
            },
        });
        serial += 1;
    }

    let mut now = 0.0;
    let mut total_damage = 0.0;
    let mut clear_time = wave.duration_s;

    while let Some(event) = events.pop() {
        if event.at_s > wave.duration_s {
            break;
        }

        apply_regen(&mut enemies, event.at_s - now);
        now = event.at_s;

        match event.kind {
            EventKind::TowerAttack { tower_uid } => {
                let Some(tower_index) =
                    towers.iter().position(|tower| tower.uid == tower_uid)
                else {
                    continue;
                };

                let target_uid = {
                    let (enemies_ref, tower) = (&enemies[..], &mut towers[tower_index]);
                    pick_target(now, tower, enemies_ref)
                };

                if let Some(target_uid) = target_uid {
                    let tower = &towers[tower_index];
                    if let Some(enemy) = enemies
                        .iter_mut()
                        .find(|enemy| enemy.uid == target_uid)
                    {
                        total_damage += apply_direct_damage(
                            enemy,
                            &tower.stats,
                            &scenario.rules,
                            &mut rng,
                            sampled,
                        );

                        for dot in &tower.dot_effects {
                            // Per-effect stack cap across the target's
                            // active DoT states.
                            let active_count = enemy
                                .dots
                                .values()
                                .filter(|state| state.effect_id == dot.id)
                                .count() as u32;
                            if active_count >= dot.max_stacks.max(1) {
                                continue;
                            }

                            let tick_interval = dot.tick_interval_s.max(EPS);
                            let dot_uid = serial + 100_000;
                            let mut dot_damage = dot.damage_per_tick;
                            if scenario.rules.dot_scaling_policy == DotScalingPolicy::Global {
                                dot_damage *= crit_factor_expected(&tower.stats);
                            }
                            enemy.dots.insert(
                                dot_uid,
                                DotState {
                                    effect_id: dot.id.clone(),
                                    damage: dot_damage,
                                    tick_interval,
                                    end: now + dot.duration_s,
                                },
                            );
                            events.push(Event {
                                at_s: now + tick_interval,
                                serial,
                                kind: EventKind::DotTick {
                                    enemy_uid: enemy.uid,
                                    dot_uid,
                                },
                            });
                            serial += 1;
                        }
                    }
                }

                let fire_rate = towers[tower_index].stats.fire_rate.max(EPS);
                events.push(Event {
                    at_s: now + 1.0 / fire_rate,
                    serial,
                    kind: EventKind::TowerAttack { tower_uid },
                });
                serial += 1;
                continue;
            }
            EventKind::DotTick { enemy_uid, dot_uid } => {
                let Some(enemy) = enemies.iter_mut().find(|enemy| enemy.uid == enemy_uid)
                else {
                    continue;
                };
                if !enemy.alive {
                    continue;
                }
                let Some(dot_state) = enemy.dots.get(&dot_uid).cloned() else {
                    continue;
                };
                if now > dot_state.end + EPS {
                    enemy.dots.remove(&dot_uid);
                    continue;
                }

                let dealt = enemy.hp.min(dot_state.damage);
                enemy.hp -= dealt;
                total_damage += dealt;
                if enemy.hp <= EPS && enemy.barrier <= EPS {
                    enemy.alive = false;
                    enemy.dots.clear();
                    continue;
                }

                let next_tick = now + dot_state.tick_interval;
                if next_tick <= dot_state.end + EPS {
                    events.push(Event {
                        at_s: next_tick,
                        serial,
                        kind: EventKind::DotTick { enemy_uid, dot_uid },
                    });
                    serial += 1;
                } else {
                    enemy.dots.remove(&dot_uid);
                }
            }
        }

        // Early exit once nothing alive remains and no spawn is pending
        // within the wave.
        if enemies
            .iter()
            .all(|enemy| !enemy.alive || now < enemy.spawn_time)
        {
            let future_spawn_exists = enemies
                .iter()
                .any(|enemy| now < enemy.spawn_time && enemy.spawn_time <= wave.duration_s);
            if !future_spawn_exists {
                clear_time = now;
                break;
            }
        }
    }

    let alive_count = enemies
        .iter()
        .filter(|enemy| enemy.alive && enemy.spawn_time <= wave.duration_s)
        .count();
    let effective_dps = total_damage / wave.duration_s.max(EPS);

    // Per-tower attribution is an even share of total damage by tower
    // definition name. Contracted approximation, kept for golden
    // compatibility.
    let mut breakdown: BTreeMap<String, f64> = BTreeMap::new();
    if !towers.is_empty() {
        let per_tower_share = total_damage / towers.len() as f64;
        for tower in &towers {
            *breakdown.entry(tower.name.clone()).or_insert(0.0) += per_tower_share;
        }
    }

    WaveResult {
        wave: wave.index,
        potential_damage: total_damage,
        combat_damage: total_damage.min(enemy_hp_pool),
        effective_dps,
        clear_time_s: clear_time.min(wave.duration_s),
        leaks: alive_count as f64,
        enemy_hp_pool,
        breakdown,
    }
}
