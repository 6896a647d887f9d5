//! Benchmarks for the reasoning components.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use praxis::csp::{self, Constraint, Domain, SolveOptions, Variable};
use praxis::infer::{Rule, forward_chain, parse_facts};
use praxis::plan::{self, Operator, PlanOptions, PlanProblem};
use praxis::schedule::{
    Activity, Distribution, Network, ScheduleOptions, ScheduleProblem, SimulationOptions, schedule,
    simulate,
};

fn bench_forward_chain(c: &mut Criterion) {
    let names: Vec<String> = (0..40).map(|i| format!("parent(p{i}, p{})", i + 1)).collect();
    let facts = parse_facts(names.iter().map(String::as_str)).unwrap();
    let rules = vec![
        Rule::parse("IF parent(?x, ?y) THEN ancestor(?x, ?y)").unwrap(),
        Rule::parse("IF ancestor(?x, ?y) AND parent(?y, ?z) THEN ancestor(?x, ?z)").unwrap(),
    ];

    c.bench_function("forward_chain_ancestors_40", |bench| {
        bench.iter(|| black_box(forward_chain(&facts, &rules, None).unwrap()))
    });
}

fn bench_queens(c: &mut Criterion) {
    let n = 8;
    let variables: Vec<Variable> = (0..n)
        .map(|i| Variable::new(format!("q{i}"), Domain::range(0, n - 1)))
        .collect();
    let mut hard = Vec::new();
    for i in 0..n {
        for j in (i + 1)..n {
            let d = j - i;
            let text = format!("q{i} != q{j} && abs(q{i} - q{j}) != {d}");
            hard.push(Constraint::parse(format!("q{i}_q{j}"), &text).unwrap());
        }
    }
    let options = SolveOptions {
        strategy: csp::SolveStrategy::FirstSolution,
        ..Default::default()
    };

    c.bench_function("csp_eight_queens", |bench| {
        bench.iter(|| black_box(csp::solve(&variables, &hard, &[], &options).unwrap()))
    });
}

fn bench_plan(c: &mut Criterion) {
    // Move a token along a line of cells.
    let cells = 12;
    let mut adjacency: Vec<String> = (0..cells - 1)
        .map(|i| format!("next(c{i}, c{})", i + 1))
        .collect();
    adjacency.push("at(c0)".into());
    let initial = parse_facts(adjacency.iter().map(String::as_str)).unwrap();
    let goal = parse_facts([format!("at(c{})", cells - 1).as_str()]).unwrap();
    let operators: Vec<Operator> = serde_json::from_str(
        r#"[{"name": "step", "parameters": ["?a", "?b"],
             "preconditions": ["at(?a)", "next(?a, ?b)"],
             "add": ["at(?b)"], "delete": ["at(?a)"]}]"#,
    )
    .unwrap();
    let problem = PlanProblem {
        initial: &initial,
        goal: &goal,
        operators: &operators,
        objects: &[],
        rules: &[],
    };

    c.bench_function("plan_breadth_first_line_12", |bench| {
        bench.iter(|| black_box(plan::plan(&problem, &PlanOptions::default()).unwrap()))
    });
}

fn project(n: usize) -> Vec<Activity> {
    (0..n)
        .map(|i| {
            let a = Activity::new(format!("t{i}"), 1.0 + (i % 5) as f64)
                .demand("crew", 1.0)
                .with_distribution(Distribution::Triangular {
                    min: 1.0,
                    mode: 2.0 + (i % 3) as f64,
                    max: 8.0,
                });
            if i >= 3 {
                a.after(&[format!("t{}", i - 3)])
            } else {
                a
            }
        })
        .collect()
}

fn bench_schedule(c: &mut Criterion) {
    let activities = project(60);
    let resources = vec![praxis::schedule::Resource::renewable("crew", 2.0)];
    let objective = Default::default();
    let problem = ScheduleProblem {
        activities: &activities,
        resources: &resources,
        precedence: &[],
        objective: &objective,
        constraints: &[],
    };

    c.bench_function("schedule_level_60", |bench| {
        bench.iter(|| black_box(schedule(&problem, &ScheduleOptions::default()).unwrap()))
    });
}

fn bench_simulate(c: &mut Criterion) {
    let activities = project(60);
    let network = Network::build(&activities, &[]).unwrap();
    let options = SimulationOptions {
        trials: 2000,
        ..Default::default()
    };

    c.bench_function("monte_carlo_60x2000", |bench| {
        bench.iter(|| black_box(simulate(&activities, &network, &options).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_forward_chain,
    bench_queens,
    bench_plan,
    bench_schedule,
    bench_simulate
);
criterion_main!(benches);

