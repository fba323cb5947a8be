//! Engine regression tests over the shipped dataset
//!
//! Exercises `evaluate_timeline` through `CatalogRepository` exactly the
//! way a hosting process does, covering all three modes, economy action
//! bookkeeping and the golden-fixture harness (fixtures are optional:
//! missing files skip, they never fail).

use std::path::PathBuf;

use nordscope::catalog::{CatalogRepository, DatasetMeta};
use nordscope::engine::evaluate_timeline;
use nordscope::types::{BuildPlan, EvalMode, ScenarioDefinition};
use serde_json::json;

fn project_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

fn load_baseline() -> (DatasetMeta, ScenarioDefinition) {
    CatalogRepository::new(project_root())
        .load_scenario("normal_baseline", Some("1.0.0"))
        .expect("shipped dataset loads")
}

#[test]
fn expected_mode_produces_wave_results() {
    let (meta, scenario) = load_baseline();
    let build = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [
            {"tower_id": "arrow_tower", "count": 2, "level": 1},
            {"tower_id": "frost_tower", "count": 1, "level": 0}
        ],
        "active_global_modifiers": ["village_arsenal_l3"],
        "actions": []
    }))
    .expect("plan");

    let result = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::Expected,
        42,
        1,
    );
    let totals = result.totals();

    assert_eq!(result.wave_results.len(), 3);
    assert!(totals.potential_damage > 0.0);
    assert!(totals.combat_damage >= 0.0);
    assert!(totals.combat_damage <= totals.potential_damage + 1e-9);
    assert!(totals.economy.workers.total >= 0);
}

#[test]
fn global_modifier_increases_expected_output() {
    let (meta, scenario) = load_baseline();
    let bare = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 2, "level": 1}]
    }))
    .expect("plan");
    let boosted = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 2, "level": 1}],
        "active_global_modifiers": ["village_arsenal_l3"]
    }))
    .expect("plan");

    let bare_result =
        evaluate_timeline(&scenario, &bare, &meta.dataset_version, EvalMode::Expected, 1, 1);
    let boosted_result = evaluate_timeline(
        &scenario,
        &boosted,
        &meta.dataset_version,
        EvalMode::Expected,
        1,
        1,
    );
    assert!(
        boosted_result.totals().potential_damage > bare_result.totals().potential_damage
    );
}

#[test]
fn economy_actions_apply_worker_policy_and_build_inflation() {
    let (meta, scenario) = load_baseline();
    let build = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 1, "level": 0}],
        "actions": [
            {"wave": 1, "at_s": 0.0, "type": "assign_workers",
             "payload": {"gold_workers": 3, "essence_workers": 1}},
            {"wave": 1, "at_s": 0.1, "type": "economy_policy",
             "payload": {"policy_id": "rush"}},
            {"wave": 1, "at_s": 0.2, "type": "build",
             "payload": {"tower_id": "arrow_tower", "count": 1, "level": 0}},
            {"wave": 2, "at_s": 0.0, "type": "build",
             "payload": {"tower_id": "frost_tower", "count": 1, "level": 1}},
            {"wave": 2, "at_s": 0.1, "type": "economy_policy",
             "payload": {"policy_id": "harvest"}},
            {"wave": 2, "at_s": 0.2, "type": "assign_workers",
             "payload": {"gold_workers": 1, "essence_workers": 3}}
        ]
    }))
    .expect("plan");

    let result = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::Expected,
        2026,
        1,
    );
    let economy = result.economy_totals;

    assert_eq!(economy.build_actions, 2);
    assert!(economy.build_spend_gold > 0.0);
    assert!(economy.build_inflation_gold > 0.0);
    assert!(economy.gross_gold_income > economy.build_spend_gold);
    assert!(
        (economy.net_gold - (economy.gross_gold_income - economy.build_spend_gold)).abs() < 1e-6
    );
    assert_eq!(economy.policy_id, "harvest");
    assert_eq!(economy.workers.total, 4);
    assert_eq!(economy.workers.gold, 1);
    assert_eq!(economy.workers.essence, 3);
    assert_eq!(economy.workers.unassigned, 0);
}

#[test]
fn combat_mode_with_runtime_actions_is_deterministic_for_same_seed() {
    let (meta, scenario) = load_baseline();
    let build = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 1, "level": 0}],
        "actions": [
            {"wave": 1, "at_s": 0.0, "type": "build",
             "payload": {"tower_id": "frost_tower", "count": 1, "level": 1,
                         "focus_priorities": ["barrier", "highest_hp"],
                         "focus_until_death": true}},
            {"wave": 1, "at_s": 0.2, "type": "upgrade", "target_id": "arrow_tower",
             "payload": {"levels": 2}},
            {"wave": 1, "at_s": 0.3, "type": "modifier",
             "target_id": "village_arsenal_l3", "payload": {"enabled": true}},
            {"wave": 2, "at_s": 0.0, "type": "targeting", "target_id": "arrow_tower",
             "payload": {"focus_priorities": ["highest_hp", "progress"],
                         "focus_until_death": true}}
        ]
    }))
    .expect("plan");

    let first = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::Combat,
        1337,
        1,
    );
    let second = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::Combat,
        1337,
        1,
    );

    assert_eq!(
        serde_json::to_string(&first.to_stable_json()).expect("render"),
        serde_json::to_string(&second.to_stable_json()).expect("render")
    );
    assert!(first.totals().combat_damage > 0.0);

    // Combat leaks are whole enemies, and combat damage never exceeds
    // the wave's hp pool.
    for wave in &first.wave_results {
        assert!((wave.leaks - wave.leaks.round()).abs() < 1e-9);
        assert!(wave.combat_damage <= wave.enemy_hp_pool + 1e-9);
    }
}

#[test]
fn expected_combat_damage_is_bounded_by_potential() {
    let (meta, scenario) = load_baseline();
    let build = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 1, "level": 0}]
    }))
    .expect("plan");

    let result = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::Expected,
        1337,
        1,
    );
    for wave in &result.wave_results {
        assert!(wave.combat_damage <= wave.potential_damage + 1e-9);
        assert!(wave.combat_damage <= wave.enemy_hp_pool + 1e-9);
    }
}

#[test]
fn monte_carlo_aggregation_is_seed_deterministic() {
    let (meta, scenario) = load_baseline();
    let build = BuildPlan::from_value(&json!({
        "scenario_id": "normal_baseline",
        "towers": [{"tower_id": "arrow_tower", "count": 1, "level": 0}],
        "actions": [
            {"wave": 2, "at_s": 0.0, "type": "targeting", "target_id": "arrow_tower",
             "payload": {"focus_priorities": ["highest_hp", "barrier"],
                         "focus_until_death": false}}
        ]
    }))
    .expect("plan");

    let first = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::MonteCarlo,
        111,
        32,
    );
    let second = evaluate_timeline(
        &scenario,
        &build,
        &meta.dataset_version,
        EvalMode::MonteCarlo,
        111,
        32,
    );
    assert_eq!(first.to_stable_json(), second.to_stable_json());

    let mut distinct = std::collections::BTreeSet::new();
    for seed in [111, 222, 333] {
        let result = evaluate_timeline(
            &scenario,
            &build,
            &meta.dataset_version,
            EvalMode::MonteCarlo,
            seed,
            32,
        );
        distinct.insert(format!("{:.6}", result.totals().combat_damage));
    }
    assert!(distinct.len() > 1, "seeds should produce varied outcomes");
}

/// Golden regression pairs under `runtime/golden/`: `input_<id>.json`
/// describing `{build_plan, mode, seed, monte_carlo_runs, dataset_version}`
/// and `expected_<id>.json` with the byte-exact stable serialization.
/// Missing fixtures skip the test.
#[test]
fn outputs_match_golden_fixtures() {
    let golden_dir = project_root().join("runtime/golden");
    let Ok(entries) = std::fs::read_dir(&golden_dir) else {
        eprintln!(
            "SKIP: no golden fixtures at {}, skipping golden regression",
            golden_dir.display()
        );
        return;
    };

    let mut input_paths: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("input_") && n.ends_with(".json"))
        })
        .collect();
    input_paths.sort();
    if input_paths.is_empty() {
        eprintln!("SKIP: golden directory has no input fixtures");
        return;
    }

    let repo = CatalogRepository::new(project_root());
    for input_path in input_paths {
        let fixture_id = input_path
            .file_stem()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("input_"))
            .expect("fixture id")
            .to_string();
        let expected_path = golden_dir.join(format!("expected_{fixture_id}.json"));
        assert!(
            expected_path.exists(),
            "missing golden expected fixture: {}",
            expected_path.display()
        );

        let payload: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&input_path).expect("read input"),
        )
        .expect("input json");
        let build = BuildPlan::from_value(&payload["build_plan"]).expect("build plan");
        let dataset_version = payload["dataset_version"].as_str().unwrap_or("1.0.0");
        let mode = EvalMode::parse(payload["mode"].as_str().unwrap_or("expected"))
            .expect("valid mode");

        let (meta, scenario) = repo
            .load_scenario(&build.scenario_id, Some(dataset_version))
            .expect("scenario loads");
        let actual = evaluate_timeline(
            &scenario,
            &build,
            &meta.dataset_version,
            mode,
            payload["seed"].as_i64().unwrap_or(0),
            payload["monte_carlo_runs"].as_u64().unwrap_or(1) as u32,
        )
        .to_stable_json();

        let expected: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&expected_path).expect("read expected"),
        )
        .expect("expected json");
        assert_eq!(actual, expected, "golden mismatch for fixture {fixture_id}");
    }
}
