//! State-space search.
//!
//! Search nodes live in an arena (`Vec<Node>`) and refer to their parent by
//! index; states are interned so each distinct fact set is stored once and
//! visited sets are keyed by a `usize`. Successors are generated per
//! operator in declaration order, and per operator in the deterministic
//! order of the precondition join, so ties always resolve the same way.

use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::cmp::Reverse;
use std::time::{Duration, Instant};

use crate::error::PlanError;
use crate::fact::{Bindings, FactSet, join_positive};
use crate::infer::forward_chain;

use super::heuristic::{Heuristic, HeuristicContext};
use super::{Action, Operator, Plan, PlanOptions, PlanProblem, PlanResult, SearchFailure, Strategy};

/// Depth bound used by [`Strategy::Bounded`] when none is given.
pub const DEFAULT_DEPTH_BOUND: usize = 32;

/// Plan with the heuristic selected in `options`.
pub fn plan(problem: &PlanProblem<'_>, options: &PlanOptions) -> PlanResult<Plan> {
    let heuristic = options.heuristic.build();
    plan_with(problem, options, heuristic.as_ref())
}

/// Plan with a caller-supplied heuristic (used by [`Strategy::BestFirst`]).
pub fn plan_with(
    problem: &PlanProblem<'_>,
    options: &PlanOptions,
    heuristic: &dyn Heuristic,
) -> PlanResult<Plan> {
    for op in problem.operators {
        op.validate()?;
    }
    let initial = if options.close_under_rules && !problem.rules.is_empty() {
        forward_chain(problem.initial, problem.rules, None)?.facts
    } else {
        problem.initial.clone()
    };
    let universe: Vec<String> = problem.universe().into_iter().collect();
    let ctx = HeuristicContext {
        initial: &initial,
        goal: problem.goal,
    };

    let mut search = Search {
        operators: problem.operators,
        universe: &universe,
        goal: problem.goal,
        nodes: Vec::new(),
        states: Vec::new(),
        ids: HashMap::new(),
        expanded: 0,
        budget: options.node_budget,
        deadline: options
            .time_limit_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
        deepest: 0,
        cut: false,
    };
    let root_state = search.intern(initial.clone());
    let root = search.push(root_state, None, None, 0);

    let result = match options.strategy {
        Strategy::BreadthFirst => search.breadth_first(root, options.depth_bound),
        Strategy::DepthFirst => search.depth_first(root, options.depth_bound, false),
        Strategy::Bounded => search.depth_first(
            root,
            Some(options.depth_bound.unwrap_or(DEFAULT_DEPTH_BOUND)),
            true,
        ),
        Strategy::BestFirst => search.best_first(root, options.depth_bound, heuristic, &ctx),
    };

    match result {
        Ok(goal) => {
            let plan = search.extract(goal);
            tracing::info!(
                strategy = ?options.strategy,
                heuristic = heuristic.name(),
                steps = plan.len(),
                expanded = plan.expanded,
                "plan found"
            );
            Ok(plan)
        }
        Err((reason, frontier)) => {
            let deepest = &search.nodes[search.deepest];
            tracing::info!(
                strategy = ?options.strategy,
                %reason,
                expanded = search.expanded,
                frontier,
                "no plan found"
            );
            Err(PlanError::NoPlanFound {
                reason,
                frontier,
                expanded: search.expanded,
                deepest_depth: deepest.depth,
                deepest_state: search.states[deepest.state].clone(),
            })
        }
    }
}

struct Node {
    state: usize,
    parent: Option<usize>,
    action: Option<Action>,
    depth: usize,
}

/// Failure reason plus frontier size at the time of failure.
type Failure = (SearchFailure, usize);

struct Search<'a> {
    operators: &'a [Operator],
    universe: &'a [String],
    goal: &'a FactSet,
    nodes: Vec<Node>,
    states: Vec<FactSet>,
    ids: HashMap<FactSet, usize>,
    expanded: usize,
    budget: usize,
    deadline: Option<Instant>,
    /// Arena index of the deepest node generated (first one wins ties).
    deepest: usize,
    /// Whether any node was left unexpanded because of the depth bound.
    cut: bool,
}

impl Search<'_> {
    fn intern(&mut self, state: FactSet) -> usize {
        if let Some(&id) = self.ids.get(&state) {
            return id;
        }
        let id = self.states.len();
        self.ids.insert(state.clone(), id);
        self.states.push(state);
        id
    }

    fn push(&mut self, state: usize, parent: Option<usize>, action: Option<Action>, depth: usize) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            state,
            parent,
            action,
            depth,
        });
        if depth > self.nodes[self.deepest].depth {
            self.deepest = index;
        }
        index
    }

    fn is_goal(&self, node: usize) -> bool {
        self.states[self.nodes[node].state].is_superset(self.goal)
    }

    /// Account for one expansion. `false` once the budget or deadline is spent.
    fn charge(&mut self) -> bool {
        self.expanded += 1;
        if self.expanded > self.budget {
            return false;
        }
        self.deadline.is_none_or(|d| Instant::now() < d)
    }

    /// Whether `node` sits at the bound and must not be expanded.
    fn at_bound(&mut self, node: usize, bound: Option<usize>) -> bool {
        let stop = bound.is_some_and(|b| self.nodes[node].depth >= b);
        self.cut |= stop;
        stop
    }

    fn exhausted(&self, frontier: usize) -> Failure {
        let reason = if self.cut {
            SearchFailure::DepthBound
        } else {
            SearchFailure::Exhausted
        };
        (reason, frontier)
    }

    /// Ground actions applicable in `state` and the states they lead to.
    fn successors(&self, state: usize) -> Vec<(Action, FactSet)> {
        let state = &self.states[state];
        let mut out = Vec::new();
        for op in self.operators {
            for seed in join_positive(&op.preconditions, state, Bindings::new()) {
                for bindings in self.complete(op, seed) {
                    let Some(ground) = op.ground(&bindings) else {
                        continue;
                    };
                    if ground.applicable(state) {
                        let next = ground.apply(state);
                        out.push((ground.action, next));
                    }
                }
            }
        }
        out
    }

    /// Expand `node`, interning successor states.
    fn expand(&mut self, node: usize) -> Vec<(Action, usize)> {
        let successors = self.successors(self.nodes[node].state);
        successors
            .into_iter()
            .map(|(action, next)| (action, self.intern(next)))
            .collect()
    }

    /// Extend `seed` over the object universe for parameters the positive
    /// preconditions left unbound, in parameter order.
    fn complete(&self, op: &Operator, seed: Bindings) -> Vec<Bindings> {
        let mut partial = vec![seed];
        for param in &op.parameters {
            partial = partial
                .into_iter()
                .flat_map(|b| {
                    if b.contains_key(param) {
                        vec![b]
                    } else {
                        self.universe
                            .iter()
                            .map(|object| {
                                let mut extended = b.clone();
                                extended.insert(param.clone(), object.clone());
                                extended
                            })
                            .collect()
                    }
                })
                .collect();
        }
        partial
    }

    fn extract(&self, goal: usize) -> Plan {
        let mut actions = Vec::new();
        let mut at = Some(goal);
        while let Some(n) = at {
            let node = &self.nodes[n];
            if let Some(action) = &node.action {
                actions.push(action.clone());
            }
            at = node.parent;
        }
        actions.reverse();
        Plan {
            actions,
            final_state: self.states[self.nodes[goal].state].clone(),
            expanded: self.expanded,
            generated: self.nodes.len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategies
// ---------------------------------------------------------------------------

impl Search<'_> {
    fn breadth_first(&mut self, root: usize, bound: Option<usize>) -> Result<usize, Failure> {
        let mut visited: HashSet<usize> = HashSet::from([self.nodes[root].state]);
        let mut frontier = VecDeque::from([root]);

        while let Some(node) = frontier.pop_front() {
            if self.is_goal(node) {
                return Ok(node);
            }
            if self.at_bound(node, bound) {
                continue;
            }
            if !self.charge() {
                return Err((SearchFailure::Budget, frontier.len() + 1));
            }
            let depth = self.nodes[node].depth + 1;
            for (action, state) in self.expand(node) {
                if visited.insert(state) {
                    let child = self.push(state, Some(node), Some(action), depth);
                    frontier.push_back(child);
                }
            }
        }
        Err(self.exhausted(0))
    }

    /// Depth-first search. With `reexpand`, a state is searched again when
    /// it is reached at a shallower depth than before; otherwise every state
    /// is searched once.
    fn depth_first(
        &mut self,
        root: usize,
        bound: Option<usize>,
        reexpand: bool,
    ) -> Result<usize, Failure> {
        let mut best_depth: HashMap<usize, usize> = HashMap::from([(self.nodes[root].state, 0)]);
        let mut stack = vec![root];

        while let Some(node) = stack.pop() {
            if self.is_goal(node) {
                return Ok(node);
            }
            let depth = self.nodes[node].depth;
            if reexpand && best_depth.get(&self.nodes[node].state).is_some_and(|&d| d < depth) {
                continue;
            }
            if self.at_bound(node, bound) {
                continue;
            }
            if !self.charge() {
                return Err((SearchFailure::Budget, stack.len() + 1));
            }
            let children: Vec<usize> = self
                .expand(node)
                .into_iter()
                .filter_map(|(action, state)| {
                    let seen = best_depth.get(&state).copied();
                    let fresh = match seen {
                        None => true,
                        Some(d) => reexpand && depth + 1 < d,
                    };
                    fresh.then(|| {
                        best_depth.insert(state, depth + 1);
                        (action, state)
                    })
                })
                .collect::<Vec<_>>()
                .into_iter()
                .map(|(action, state)| self.push(state, Some(node), Some(action), depth + 1))
                .collect();
            // Reversed so the first declared operator is explored first.
            stack.extend(children.into_iter().rev());
        }
        Err(self.exhausted(0))
    }

    /// Best-first search on `g + h`, or on `h` alone for greedy heuristics.
    ///
    /// Greedy search accepts the first goal state it generates; otherwise
    /// the goal is tested when a node is popped.
    fn best_first(
        &mut self,
        root: usize,
        bound: Option<usize>,
        heuristic: &dyn Heuristic,
        ctx: &HeuristicContext<'_>,
    ) -> Result<usize, Failure> {
        let greedy = heuristic.greedy();
        if greedy && self.is_goal(root) {
            return Ok(root);
        }
        let h = heuristic.estimate(&self.states[self.nodes[root].state], ctx);
        // Arena indices grow in generation order, so they break ties FIFO.
        let mut frontier = BinaryHeap::from([Reverse((h, h, root))]);
        let mut best_g: HashMap<usize, usize> = HashMap::from([(self.nodes[root].state, 0)]);

        while let Some(Reverse((_, _, node))) = frontier.pop() {
            let (state, g) = (self.nodes[node].state, self.nodes[node].depth);
            if best_g.get(&state).is_some_and(|&best| best < g) {
                continue;
            }
            if !greedy && self.is_goal(node) {
                return Ok(node);
            }
            if self.at_bound(node, bound) {
                continue;
            }
            if !self.charge() {
                return Err((SearchFailure::Budget, frontier.len() + 1));
            }
            let child_g = g + 1;
            for (action, next) in self.expand(node) {
                if best_g.get(&next).is_some_and(|&best| best <= child_g) {
                    continue;
                }
                best_g.insert(next, child_g);
                let child = self.push(next, Some(node), Some(action), child_g);
                if greedy && self.is_goal(child) {
                    return Ok(child);
                }
                let h = heuristic.estimate(&self.states[next], ctx);
                let priority = if greedy { h } else { child_g + h };
                frontier.push(Reverse((priority, h, child)));
            }
        }
        Err(self.exhausted(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::Rule;
    use crate::plan::HeuristicKind;

    fn set(items: &[&str]) -> FactSet {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn move_op() -> Operator {
        serde_json::from_str(
            r#"{"name": "move", "parameters": ["from", "to"],
                "pre": ["at(?from)", "adjacent(?from, ?to)"],
                "add": ["at(?to)"], "del": ["at(?from)"]}"#,
        )
        .unwrap()
    }

    fn corridor() -> FactSet {
        set(&[
            "at(a)",
            "adjacent(a, b)",
            "adjacent(b, a)",
            "adjacent(b, c)",
            "adjacent(c, b)",
        ])
    }

    fn run(
        initial: &FactSet,
        goal: &FactSet,
        ops: &[Operator],
        options: &PlanOptions,
    ) -> PlanResult<Plan> {
        let problem = PlanProblem {
            initial,
            goal,
            operators: ops,
            objects: &[],
            rules: &[],
        };
        plan(&problem, options)
    }

    fn steps(plan: &Plan) -> Vec<String> {
        plan.actions.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn breadth_first_creates_file_in_one_step() {
        let op: Operator = serde_json::from_str(
            r#"{"name": "create_file", "pre": ["not has_file"], "add": ["has_file"]}"#,
        )
        .unwrap();
        let plan = run(
            &set(&["no_file"]),
            &set(&["has_file"]),
            &[op],
            &PlanOptions::default(),
        )
        .unwrap();
        assert_eq!(steps(&plan), vec!["create_file"]);
        assert!(plan.final_state.contains(&"has_file".parse().unwrap()));
    }

    #[test]
    fn breadth_first_finds_shortest_route() {
        let plan = run(&corridor(), &set(&["at(c)"]), &[move_op()], &PlanOptions::default()).unwrap();
        assert_eq!(steps(&plan), vec!["move(a, b)", "move(b, c)"]);
    }

    #[test]
    fn every_strategy_and_heuristic_reaches_the_goal() {
        let goal = set(&["at(c)"]);
        let strategies = [Strategy::DepthFirst, Strategy::Bounded, Strategy::BestFirst];
        let heuristics = [
            HeuristicKind::MinimizeComplexity,
            HeuristicKind::OptimizeClarity,
            HeuristicKind::Satisfice,
        ];
        for strategy in strategies {
            for heuristic in heuristics {
                let options = PlanOptions {
                    strategy,
                    heuristic,
                    ..PlanOptions::default()
                };
                let plan = run(&corridor(), &goal, &[move_op()], &options).unwrap();
                assert!(plan.final_state.is_superset(&goal), "{strategy:?}/{heuristic:?}");
            }
        }
    }

    #[test]
    fn bounded_distinguishes_depth_bound_from_exhaustion() {
        let goal = set(&["at(c)"]);
        let options = PlanOptions {
            strategy: Strategy::Bounded,
            depth_bound: Some(1),
            ..PlanOptions::default()
        };
        let err = run(&corridor(), &goal, &[move_op()], &options).unwrap_err();
        assert!(matches!(
            err,
            PlanError::NoPlanFound { reason: SearchFailure::DepthBound, .. }
        ));

        let deeper = PlanOptions {
            depth_bound: Some(3),
            ..options
        };
        let plan = run(&corridor(), &goal, &[move_op()], &deeper).unwrap();
        assert_eq!(plan.len(), 2);
    }

    #[test]
    fn unreachable_goal_reports_deepest_state() {
        let err = run(&corridor(), &set(&["at(d)"]), &[move_op()], &PlanOptions::default())
            .unwrap_err();
        match err {
            PlanError::NoPlanFound {
                reason,
                expanded,
                deepest_depth,
                deepest_state,
                ..
            } => {
                assert_eq!(reason, SearchFailure::Exhausted);
                assert_eq!(expanded, 3);
                assert_eq!(deepest_depth, 2);
                assert!(deepest_state.contains(&"at(c)".parse().unwrap()));
            }
            other => panic!("expected NoPlanFound, got {other:?}"),
        }
    }

    #[test]
    fn node_budget_is_enforced() {
        let options = PlanOptions {
            node_budget: 1,
            ..PlanOptions::default()
        };
        let err = run(&corridor(), &set(&["at(c)"]), &[move_op()], &options).unwrap_err();
        assert!(matches!(
            err,
            PlanError::NoPlanFound { reason: SearchFailure::Budget, .. }
        ));
    }

    #[test]
    fn initial_state_is_closed_under_rules() {
        let op: Operator = serde_json::from_str(
            r#"{"name": "enter", "pre": ["can_enter"], "add": ["inside"]}"#,
        )
        .unwrap();
        let rules = vec![Rule::parse("IF door_open THEN can_enter").unwrap()];
        let initial = set(&["door_open"]);
        let goal = set(&["inside"]);
        let problem = PlanProblem {
            initial: &initial,
            goal: &goal,
            operators: std::slice::from_ref(&op),
            objects: &[],
            rules: &rules,
        };
        let plan = plan(&problem, &PlanOptions::default()).unwrap();
        assert_eq!(steps(&plan), vec!["enter"]);

        let open_world = PlanOptions {
            close_under_rules: false,
            ..PlanOptions::default()
        };
        assert!(super::plan(&problem, &open_world).is_err());
    }

    #[test]
    fn unbound_parameters_range_over_objects() {
        let op: Operator = serde_json::from_str(
            r#"{"name": "paint", "parameters": ["thing"], "pre": ["not painted(?thing)"],
                "add": ["painted(?thing)"]}"#,
        )
        .unwrap();
        let initial = FactSet::new();
        let goal = set(&["painted(fence)"]);
        let objects = vec!["barn".to_string()];
        let problem = PlanProblem {
            initial: &initial,
            goal: &goal,
            operators: std::slice::from_ref(&op),
            objects: &objects,
            rules: &[],
        };
        let plan = plan(&problem, &PlanOptions::default()).unwrap();
        assert_eq!(steps(&plan), vec!["paint(fence)"]);
    }

    struct PreferB;

    impl Heuristic for PreferB {
        fn name(&self) -> &str {
            "prefer_b"
        }

        fn estimate(&self, state: &FactSet, ctx: &HeuristicContext<'_>) -> usize {
            let at_b = state.contains(&"at(b)".parse().unwrap());
            ctx.unmet(state) * 10 + usize::from(!at_b)
        }
    }

    #[test]
    fn custom_heuristics_plug_in() {
        let goal = set(&["at(c)"]);
        let initial = corridor();
        let ops = [move_op()];
        let problem = PlanProblem {
            initial: &initial,
            goal: &goal,
            operators: &ops,
            objects: &[],
            rules: &[],
        };
        let options = PlanOptions {
            strategy: Strategy::BestFirst,
            ..PlanOptions::default()
        };
        let plan = plan_with(&problem, &options, &PreferB).unwrap();
        assert_eq!(plan.len(), 2);
    }
}
