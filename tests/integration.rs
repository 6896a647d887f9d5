//! End-to-end integration tests for the praxis engine.
//!
//! Each test loads a document the way the CLI does (from JSON or TOML text,
//! or from a file on disk) and runs a query through `Engine::run`.

use praxis::config::EngineConfig;
use praxis::csp::Value;
use praxis::document::{CompiledDocument, Format};
use praxis::engine::{Answer, Engine, Query};
use praxis::error::{PlanError, PraxisError, ScheduleError, SolveError};
use praxis::infer::{InferMode, InferenceOutcome};
use praxis::plan::Action;

fn engine() -> Engine {
    Engine::new(EngineConfig::default()).unwrap()
}

fn json(text: &str) -> CompiledDocument {
    CompiledDocument::parse(text, Format::Json).unwrap()
}

fn toml_doc(text: &str) -> CompiledDocument {
    CompiledDocument::parse(text, Format::Toml).unwrap()
}

#[test]
fn forward_chaining_is_idempotent() {
    let mut doc = json(
        r#"{
            "FACTS": ["parent(ann, bob)", "parent(bob, cid)", "parent(cid, dee)"],
            "RULES": [
                "IF parent(?x, ?y) THEN ancestor(?x, ?y)",
                "IF ancestor(?x, ?y) AND parent(?y, ?z) THEN ancestor(?x, ?z)"
            ]
        }"#,
    );
    let engine = engine();
    let first = match engine.infer(&doc, &InferMode::Forward).unwrap() {
        InferenceOutcome::Forward(inference) => inference,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(first.derived.len(), 6);

    doc.facts = first.facts.clone();
    let second = match engine.infer(&doc, &InferMode::Forward).unwrap() {
        InferenceOutcome::Forward(inference) => inference,
        other => panic!("unexpected {other:?}"),
    };
    assert!(second.derived.is_empty());
    assert_eq!(second.facts, first.facts);
}

#[test]
fn satisfiable_problem_meets_every_hard_constraint() {
    let doc = json(
        r#"{
            "VARIABLES": {"x": {"min": 0, "max": 9}, "y": {"min": 0, "max": 9}},
            "CONSTRAINTS": ["x > 3", "x + y == 10", "x != y"],
            "SOFT_CONSTRAINTS": [{"name": "small_x", "predicate": "x <= 4", "weight": 2}]
        }"#,
    );
    let solution = engine().solve(&doc).unwrap();
    let (x, y) = match (&solution.assignment["x"], &solution.assignment["y"]) {
        (Value::Int(x), Value::Int(y)) => (*x, *y),
        other => panic!("unexpected values {other:?}"),
    };
    assert!(x > 3);
    assert_eq!(x + y, 10);
    assert_ne!(x, y);
    assert_eq!(x, 4);
    assert_eq!(solution.cost, 0.0);
}

#[test]
fn contradictory_bounds_are_unsatisfiable_citing_both() {
    let doc = json(
        r#"{
            "VARIABLES": {"x": {"min": 0, "max": 9}, "y": [1, 2]},
            "CONSTRAINTS": ["x < 2", "x > 5", "y == 1"]
        }"#,
    );
    match engine().run(&doc, &Query::Solve) {
        Err(PraxisError::Solve(SolveError::Unsatisfiable { conflicts })) => {
            assert_eq!(conflicts.len(), 2);
            assert!(conflicts.contains(&"x < 2".to_string()));
            assert!(conflicts.contains(&"x > 5".to_string()));
        }
        other => panic!("expected unsatisfiable, got {other:?}"),
    }
}

const FILE_PROBLEM: &str = r#"
INITIAL_STATE = ["no_file"]
GOAL_STATE = ["has_file"]

[[OPERATORS]]
name = "create_file"
preconditions = ["not has_file"]
add = ["has_file"]
delete = ["no_file"]
"#;

#[test]
fn breadth_first_plan_is_one_action() {
    let doc = toml_doc(FILE_PROBLEM);
    let plan = engine().plan(&doc).unwrap();
    assert_eq!(plan.len(), 1);
    assert_eq!(plan.actions[0].operator, "create_file");
    assert!(plan.final_state.contains(&"has_file".parse().unwrap()));
}

#[test]
fn replaying_a_plan_reports_the_failing_step() {
    let doc = toml_doc(FILE_PROBLEM);
    let engine = engine();
    let create: Action = "create_file".parse().unwrap();

    let state = engine.validate_plan(&doc, &[create.clone()]).unwrap();
    assert!(!state.contains(&"no_file".parse().unwrap()));

    match engine.validate_plan(&doc, &[create.clone(), create]) {
        Err(PraxisError::Plan(PlanError::InvalidPlan { step, .. })) => assert_eq!(step, 2),
        other => panic!("expected an invalid plan, got {other:?}"),
    }
}

#[test]
fn unreachable_goal_reports_no_plan() {
    let mut doc = toml_doc(FILE_PROBLEM);
    doc.goal_state = praxis::infer::parse_facts(["has_file", "signed"]).unwrap();
    match engine().plan(&doc) {
        Err(PraxisError::Plan(PlanError::NoPlanFound { expanded, .. })) => assert!(expanded >= 1),
        other => panic!("expected no plan, got {other:?}"),
    }
}

#[test]
fn two_independent_chains_share_the_makespan() {
    let doc = json(
        r#"{
            "ACTIVITIES": [
                {"name": "A", "duration": 4},
                {"name": "B", "duration": 8, "after": ["A"]},
                {"name": "C", "duration": 12}
            ]
        }"#,
    );
    let schedule = engine().schedule(&doc).unwrap();
    assert_eq!(schedule.makespan, 12.0);
    assert_eq!(schedule.start_of("B"), Some(4.0));
    assert!(schedule.activities.values().all(|a| a.slack.abs() < 1e-9));
    assert!(schedule.critical_chains.contains(&vec!["A".to_string(), "B".to_string()]));
    assert!(schedule.critical_chains.contains(&vec!["C".to_string()]));
}

#[test]
fn precedence_cycles_are_reported() {
    let doc = json(
        r#"{
            "ACTIVITIES": [{"name": "a", "duration": 1}, {"name": "b", "duration": 1}],
            "PRECEDENCE": ["a -> b", "b -> a"]
        }"#,
    );
    match engine().run(&doc, &Query::Schedule) {
        Err(PraxisError::Schedule(ScheduleError::CycleDetected { cycle })) => {
            assert!(cycle.contains(&"a".to_string()) && cycle.contains(&"b".to_string()));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }
}

#[test]
fn monte_carlo_reproduces_with_the_same_seed() {
    let doc = json(
        r#"{
            "ACTIVITIES": [
                {"name": "design", "duration": 5,
                 "distribution": {"type": "triangular", "min": 3, "mode": 5, "max": 10}},
                {"name": "build", "duration": 10, "after": ["design"],
                 "distribution": {"type": "uniform", "min": 8, "max": 14}},
                {"name": "docs", "duration": 6,
                 "distribution": {"type": "discrete", "outcomes": [
                     {"value": 4, "probability": 0.5}, {"value": 9, "probability": 0.5}]}}
            ]
        }"#,
    );
    let mut config = EngineConfig::default();
    config.simulation.trials = 400;
    config.simulation.seed = 1234;
    let first = Engine::new(config.clone()).unwrap().simulate(&doc).unwrap();
    let second = Engine::new(config).unwrap().simulate(&doc).unwrap();
    assert_eq!(first, second);
    assert!(first.min >= 11.0 && first.max <= 24.0);
    assert!(first.percentiles.p50 <= first.percentiles.p95);
}

#[test]
fn flask_beats_fastapi() {
    let doc = json(
        r#"{"DECISION_TREE": {"options": [
            {"name": "Flask", "outcomes": [
                {"name": "success", "probability": 0.95, "utility": 8},
                {"name": "issues", "probability": 0.05, "utility": 3}]},
            {"name": "FastAPI", "outcomes": [
                {"name": "success", "probability": 0.8, "utility": 9},
                {"name": "issues", "probability": 0.2, "utility": 2}]}
        ]}}"#,
    );
    match engine().run(&doc, &Query::Evaluate).unwrap() {
        Answer::Evaluation(eval) => {
            assert_eq!(eval.best_choice.as_deref(), Some("Flask"));
            assert!((eval.expected_utility - 7.75).abs() < 1e-9);
            assert!((eval.options[1].expected_utility - 7.6).abs() < 1e-9);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn config_and_document_files_drive_the_engine() {
    let dir = tempfile::TempDir::new().unwrap();
    let config_path = dir.path().join("praxis.toml");
    let doc_path = dir.path().join("project.toml");

    let mut config = EngineConfig::default();
    config.schedule.horizon = Some(10.0);
    config.save(&config_path).unwrap();

    let doc = json(
        r#"{
            "RESOURCES": [{"name": "dev", "capacity": 1}],
            "ACTIVITIES": [
                {"name": "api", "duration": 6, "resources": {"dev": 1}},
                {"name": "ui", "duration": 6, "resources": {"dev": 1}}
            ]
        }"#,
    );
    doc.save(&doc_path).unwrap();

    let engine = Engine::new(EngineConfig::load(&config_path).unwrap()).unwrap();
    let loaded = CompiledDocument::load(&doc_path).unwrap();
    assert_eq!(loaded, doc);
    match engine.run(&loaded, &Query::Schedule) {
        Err(PraxisError::Schedule(ScheduleError::Infeasible { .. })) => {}
        other => panic!("expected an infeasible schedule, got {other:?}"),
    }

    let relaxed = Engine::new(EngineConfig::default()).unwrap();
    let schedule = relaxed.schedule(&loaded).unwrap();
    assert_eq!(schedule.makespan, 12.0);
}
