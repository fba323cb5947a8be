//! Raw-memory contract normalization
//!
//! Canonicalizes the field map produced by the memory reader before it is
//! exposed on a `LiveSnapshot`. Every snapshot carries the fixed numeric
//! and boolean contract fields, resolved through an alias table with
//! published defaults; `leaks_total` and `is_combat_phase` are inferred
//! when absent.

use serde_json::{Map, Value};

/// Fixed numeric contract fields (exposed as doubles).
pub const LIVE_RAW_MEMORY_NUMERIC_FIELDS: [&str; 19] = [
    "current_wave",
    "gold",
    "essence",
    "wood",
    "stone",
    "wheat",
    "workers_total",
    "workers_free",
    "tower_inflation_index",
    "base_hp_current",
    "base_hp_max",
    "leaks_total",
    "enemies_alive",
    "boss_hp_current",
    "boss_hp_max",
    "wave_elapsed_s",
    "wave_remaining_s",
    "barrier_hp_total",
    "enemy_regen_total_per_s",
];

/// Fixed boolean contract fields.
pub const LIVE_RAW_MEMORY_BOOL_FIELDS: [&str; 2] = ["boss_alive", "is_combat_phase"];

fn aliases_for(field: &str) -> &'static [&'static str] {
    match field {
        "current_wave" => &["current_wave", "wave"],
        "workers_total" => &["workers_total", "workers", "population_total"],
        "workers_free" => &["workers_free", "free_workers", "idle_workers", "population_free"],
        "tower_inflation_index" => {
            &["tower_inflation_index", "inflation_index", "build_cost_index"]
        }
        "base_hp_current" => {
            &["base_hp_current", "base_hp", "player_hp", "current_hp", "base_health"]
        }
        "base_hp_max" => {
            &["base_hp_max", "max_player_hp", "max_hp", "player_hp_max", "base_health_max"]
        }
        "leaks_total" => &["leaks_total", "leaks", "wave_leaks", "leak_count"],
        "enemies_alive" => &["enemies_alive", "alive_enemies", "enemy_alive"],
        "boss_alive" => &["boss_alive", "is_boss_alive", "boss_present"],
        "boss_hp_current" => &["boss_hp_current", "boss_hp", "boss_health"],
        "boss_hp_max" => &["boss_hp_max", "max_boss_hp", "boss_health_max", "boss_max_hp"],
        "wave_elapsed_s" => &["wave_elapsed_s", "combat_time_s", "wave_time_s"],
        "wave_remaining_s" => {
            &["wave_remaining_s", "wave_time_left_s", "combat_time_remaining_s"]
        }
        "barrier_hp_total" => &["barrier_hp_total", "barrier_hp", "barrier_health", "shield_hp"],
        "enemy_regen_total_per_s" => {
            &["enemy_regen_total_per_s", "regen_per_s", "regen_ps", "hp_regen_per_s"]
        }
        "is_combat_phase" => &["is_combat_phase", "combat_phase", "in_combat"],
        "combat_block_value" => {
            &["combat_block_value", "combat_block", "block_value", "block"]
        }
        "combat_block_percent" => {
            &["combat_block_percent", "combat_block_pct", "block_percent", "block_pct"]
        }
        "combat_block_flat" => {
            &["combat_block_flat", "combat_block_amount", "block_flat", "block_amount"]
        }
        "gold" => &["gold"],
        "essence" => &["essence"],
        "wood" => &["wood"],
        "stone" => &["stone"],
        "wheat" => &["wheat"],
        _ => &[],
    }
}

/// Canonical combat-block field names derived from aliases at normalize
/// time.
const COMBAT_BLOCK_FIELDS: [&str; 3] = [
    "combat_block_value",
    "combat_block_percent",
    "combat_block_flat",
];

fn numeric_default(field: &str) -> f64 {
    if field == "tower_inflation_index" {
        1.0
    } else {
        0.0
    }
}

/// Resolve a numeric field through its alias list: booleans coerce to
/// 0/1, strings are parsed, unparsable aliases are skipped.
pub fn resolve_numeric_field(source: &Map<String, Value>, aliases: &[&str], default: f64) -> f64 {
    for field_name in aliases {
        let Some(raw) = source.get(*field_name) else {
            continue;
        };
        match raw {
            Value::Bool(flag) => return f64::from(i32::from(*flag)),
            Value::Number(number) => {
                if let Some(value) = number.as_f64() {
                    return value;
                }
            }
            other => {
                let text = match other {
                    Value::String(text) => text.clone(),
                    value => value.to_string(),
                };
                if let Ok(parsed) = text.trim().parse::<f64>() {
                    return parsed;
                }
            }
        }
    }
    default
}

/// Resolve a boolean field through its alias list. Accepts
/// `{1,true,yes,y,on,t}` / `{0,false,no,n,off,f,<empty>}` text forms.
pub fn resolve_bool_field(source: &Map<String, Value>, aliases: &[&str], default: bool) -> bool {
    for field_name in aliases {
        let Some(raw) = source.get(*field_name) else {
            continue;
        };
        match raw {
            Value::Bool(flag) => return *flag,
            Value::Number(number) => return number.as_f64().unwrap_or(0.0) != 0.0,
            other => {
                let text = match other {
                    Value::String(text) => text.clone(),
                    value => value.to_string(),
                };
                match text.trim().to_lowercase().as_str() {
                    "1" | "true" | "yes" | "y" | "on" | "t" => return true,
                    "0" | "false" | "no" | "n" | "off" | "f" | "" => return false,
                    _ => {}
                }
            }
        }
    }
    default
}

fn has_any_alias(source: &Map<String, Value>, aliases: &[&str]) -> bool {
    aliases.iter().any(|alias| source.contains_key(*alias))
}

/// Apply the full contract to a raw field map: alias resolution, numeric
/// and boolean coercion with published defaults, and inference for
/// `leaks_total` and `is_combat_phase`.
pub fn normalize_raw_memory_values(values: &Map<String, Value>) -> Map<String, Value> {
    let mut normalized = values.clone();

    for canonical in COMBAT_BLOCK_FIELDS {
        if normalized.contains_key(canonical) {
            continue;
        }
        let resolved = resolve_numeric_field(&normalized, aliases_for(canonical), 0.0);
        normalized.insert(canonical.to_string(), Value::from(resolved));
    }

    ensure_contract_fields(&mut normalized);
    normalized
}

fn ensure_contract_fields(values: &mut Map<String, Value>) {
    let source = values.clone();

    for field_name in LIVE_RAW_MEMORY_NUMERIC_FIELDS {
        let default = numeric_default(field_name);
        let numeric = resolve_numeric_field(&source, aliases_for(field_name), default);
        // Untouched zero-default fields stay integer zeros on the wire.
        let rendered = if numeric == 0.0 && default == 0.0 {
            Value::from(0)
        } else {
            Value::from(numeric)
        };
        values.insert(field_name.to_string(), rendered);
    }

    // Infer leaks from base HP when no direct leak field was read.
    if !has_any_alias(&source, aliases_for("leaks_total")) {
        let base_hp_current =
            resolve_numeric_field(values, &["base_hp_current"], 0.0) as i64;
        let base_hp_max = resolve_numeric_field(values, &["base_hp_max"], 0.0) as i64;
        if base_hp_max > 0 {
            let leaks = (base_hp_max - base_hp_current.max(0)).max(0);
            values.insert("leaks_total".to_string(), Value::from(leaks));
        }
    }

    for field_name in LIVE_RAW_MEMORY_BOOL_FIELDS {
        let resolved = resolve_bool_field(&source, aliases_for(field_name), false);
        values.insert(field_name.to_string(), Value::Bool(resolved));
    }

    // Infer combat phase from enemy count when no direct flag was read.
    if !has_any_alias(&source, aliases_for("is_combat_phase")) {
        let enemies_alive = resolve_numeric_field(values, &["enemies_alive"], 0.0) as i64;
        values.insert(
            "is_combat_phase".to_string(),
            Value::Bool(enemies_alive > 0),
        );
    }
}

/// Build the `combat.block` payload from normalized values.
pub fn combat_block_payload(values: &Map<String, Value>) -> Value {
    serde_json::json!({
        "value": resolve_numeric_field(values, &["combat_block_value"], 0.0),
        "percent": resolve_numeric_field(values, &["combat_block_percent"], 0.0),
        "flat": resolve_numeric_field(values, &["combat_block_flat"], 0.0),
    })
}
