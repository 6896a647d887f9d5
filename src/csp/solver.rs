//! Backtracking search with forward checking.
//!
//! Live domains are bitmaps over each variable's expanded value list. Every
//! pruning is pushed onto a trail; a search frame remembers the trail
//! length when it was opened and undoes back to it before trying its next
//! value. The search never recurses.

use std::collections::HashMap;

use crate::error::SolveError;

use super::{
    Assignment, Constraint, Env, SolveOptions, SolveResult, SolveStrategy, Solution, Value,
    Variable, VariableOrder, conflict, validate,
};

/// Solve a constraint problem.
///
/// Returns the best assignment under `options.strategy`, or
/// [`SolveError::Unsatisfiable`] with a minimal conflicting set of hard
/// constraints.
pub fn solve(
    variables: &[Variable],
    hard: &[Constraint],
    soft: &[Constraint],
    options: &SolveOptions,
) -> SolveResult<Solution> {
    validate(variables, hard, soft)?;
    let problem = Problem::new(variables, hard, soft)?;
    match problem.search(options)? {
        Outcome::Found(solution) => {
            tracing::info!(
                variables = variables.len(),
                cost = solution.cost,
                nodes = solution.nodes,
                "constraint problem solved"
            );
            Ok(solution)
        }
        Outcome::Exhausted { nodes } => {
            let conflicts = conflict::minimal_conflict(variables, hard, options)?;
            tracing::info!(nodes, conflicts = ?conflicts, "constraint problem unsatisfiable");
            Err(SolveError::Unsatisfiable { conflicts })
        }
    }
}

/// Result of a complete search.
pub(crate) enum Outcome {
    Found(Solution),
    Exhausted { nodes: usize },
}

/// A constraint with its variables resolved to indices.
struct Compiled<'a> {
    constraint: &'a Constraint,
    vars: Vec<usize>,
}

/// A validated problem ready to search.
pub(crate) struct Problem<'a> {
    names: Vec<&'a str>,
    index: HashMap<&'a str, usize>,
    values: Vec<Vec<Value>>,
    hard: Vec<Compiled<'a>>,
    soft: Vec<Compiled<'a>>,
    /// Hard constraint indices per variable.
    hard_of: Vec<Vec<usize>>,
    /// Number of non-unary constraints per variable.
    degree: Vec<usize>,
}

/// Evaluation view over a partial assignment.
struct PartialEnv<'p> {
    index: &'p HashMap<&'p str, usize>,
    values: &'p [Vec<Value>],
    assigned: &'p [Option<usize>],
}

impl Env for PartialEnv<'_> {
    fn lookup(&self, name: &str) -> Option<&Value> {
        let var = *self.index.get(name)?;
        self.assigned[var].map(|i| &self.values[var][i])
    }
}

struct Frame {
    var: usize,
    next: usize,
    mark: usize,
}

/// Mutable search state.
struct State {
    alive: Vec<Vec<bool>>,
    assigned: Vec<Option<usize>>,
    trail: Vec<(usize, usize)>,
}

impl State {
    fn undo(&mut self, mark: usize) {
        while self.trail.len() > mark {
            if let Some((var, value)) = self.trail.pop() {
                self.alive[var][value] = true;
            }
        }
    }

    fn prune(&mut self, var: usize, value: usize) {
        self.alive[var][value] = false;
        self.trail.push((var, value));
    }
}

impl<'a> Problem<'a> {
    /// Expects `variables` and constraints to have passed [`validate`].
    pub(crate) fn new(
        variables: &'a [Variable],
        hard: &'a [Constraint],
        soft: &'a [Constraint],
    ) -> SolveResult<Self> {
        let names: Vec<&str> = variables.iter().map(|v| v.name.as_str()).collect();
        let index: HashMap<&str, usize> = names.iter().enumerate().map(|(i, n)| (*n, i)).collect();
        let values = variables
            .iter()
            .map(|v| v.domain.values(&v.name))
            .collect::<SolveResult<Vec<_>>>()?;

        let compile = |c: &'a Constraint| Compiled {
            constraint: c,
            vars: c
                .variables()
                .into_iter()
                .filter_map(|name| index.get(name).copied())
                .collect(),
        };
        let hard: Vec<Compiled> = hard.iter().map(compile).collect();
        let soft: Vec<Compiled> = soft.iter().map(compile).collect();

        let mut hard_of = vec![Vec::new(); names.len()];
        let mut degree = vec![0; names.len()];
        for (ci, c) in hard.iter().enumerate() {
            for &v in &c.vars {
                hard_of[v].push(ci);
            }
        }
        for c in hard.iter().chain(&soft).filter(|c| c.vars.len() > 1) {
            for &v in &c.vars {
                degree[v] += 1;
            }
        }

        Ok(Self {
            names,
            index,
            values,
            hard,
            soft,
            hard_of,
            degree,
        })
    }

    fn env<'p>(&'p self, assigned: &'p [Option<usize>]) -> PartialEnv<'p> {
        PartialEnv {
            index: &self.index,
            values: &self.values,
            assigned,
        }
    }

    /// Filter domains by unary hard constraints; constant constraints are
    /// checked once. Returns `false` if anything is already violated.
    fn node_consistency(&self, state: &mut State) -> bool {
        for c in &self.hard {
            match c.vars.as_slice() {
                [] => {
                    if c.constraint.predicate.holds(&self.env(&state.assigned)) != Some(true) {
                        return false;
                    }
                }
                [var] => {
                    let var = *var;
                    for value in 0..self.values[var].len() {
                        state.assigned[var] = Some(value);
                        let ok = c.constraint.predicate.holds(&self.env(&state.assigned));
                        state.assigned[var] = None;
                        if ok != Some(true) {
                            state.alive[var][value] = false;
                        }
                    }
                    if !state.alive[var].iter().any(|&a| a) {
                        return false;
                    }
                }
                _ => {}
            }
        }
        true
    }

    fn select(&self, state: &State, order: VariableOrder) -> Option<usize> {
        let unassigned = (0..self.names.len()).filter(|&v| state.assigned[v].is_none());
        match order {
            VariableOrder::Declaration => unassigned.into_iter().next(),
            VariableOrder::MostConstrained => unassigned.min_by_key(|&v| {
                let live = state.alive[v].iter().filter(|&&a| a).count();
                (live, std::cmp::Reverse(self.degree[v]), v)
            }),
        }
    }

    /// Hard constraints on `var` whose variables are all assigned hold.
    fn consistent(&self, var: usize, state: &State) -> bool {
        let env = self.env(&state.assigned);
        self.hard_of[var].iter().all(|&ci| {
            let c = &self.hard[ci];
            c.vars.iter().any(|&v| state.assigned[v].is_none())
                || c.constraint.predicate.holds(&env) == Some(true)
        })
    }

    /// Prune values of variables left as the only unassigned one in a hard
    /// constraint on `var`. Returns `false` on a wipe-out.
    fn forward_check(&self, var: usize, state: &mut State) -> bool {
        for &ci in &self.hard_of[var] {
            let c = &self.hard[ci];
            let mut open = c.vars.iter().filter(|&&v| state.assigned[v].is_none());
            let (Some(&target), None) = (open.next(), open.next()) else {
                continue;
            };
            for value in 0..self.values[target].len() {
                if !state.alive[target][value] {
                    continue;
                }
                state.assigned[target] = Some(value);
                let ok = c.constraint.predicate.holds(&self.env(&state.assigned));
                state.assigned[target] = None;
                if ok != Some(true) {
                    state.prune(target, value);
                }
            }
            if !state.alive[target].iter().any(|&a| a) {
                return false;
            }
        }
        true
    }

    /// Cost of soft constraints whose variables are all assigned.
    fn soft_cost(&self, state: &State) -> (f64, Vec<String>) {
        let env = self.env(&state.assigned);
        let mut cost = 0.0;
        let mut violated = Vec::new();
        for c in &self.soft {
            if c.constraint.predicate.holds(&env) == Some(false) {
                cost += c.constraint.weight;
                violated.push(c.constraint.name.clone());
            }
        }
        (cost, violated)
    }

    fn assignment(&self, state: &State) -> Assignment {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(v, name)| {
                state.assigned[v].map(|i| (name.to_string(), self.values[v][i].clone()))
            })
            .collect()
    }

    /// Run the search to completion (or until the budget runs out).
    pub(crate) fn search(&self, options: &SolveOptions) -> SolveResult<Outcome> {
        let mut state = State {
            alive: self.values.iter().map(|vs| vec![true; vs.len()]).collect(),
            assigned: vec![None; self.names.len()],
            trail: Vec::new(),
        };
        if !self.node_consistency(&mut state) {
            return Ok(Outcome::Exhausted { nodes: 0 });
        }

        let wanted = match options.strategy {
            SolveStrategy::FirstSolution => Some(1),
            SolveStrategy::BestOfN(n) => Some(n.max(1)),
            SolveStrategy::BranchAndBound => None,
        };
        let bound = options.strategy == SolveStrategy::BranchAndBound;

        let mut best: Option<Solution> = None;
        let mut seen = 0usize;
        let mut nodes = 0usize;
        let mut frames: Vec<Frame> = Vec::new();
        let mut descend = true;

        loop {
            if descend {
                match self.select(&state, options.order) {
                    Some(var) => frames.push(Frame {
                        var,
                        next: 0,
                        mark: state.trail.len(),
                    }),
                    None => {
                        seen += 1;
                        let (cost, violated) = self.soft_cost(&state);
                        if best.as_ref().is_none_or(|b| cost < b.cost) {
                            tracing::debug!(cost, nodes, "improved solution");
                            best = Some(Solution {
                                assignment: self.assignment(&state),
                                cost,
                                violated,
                                nodes,
                                solutions_seen: seen,
                            });
                        }
                        let optimal = best.as_ref().is_some_and(|b| b.cost <= 0.0);
                        if wanted.is_some_and(|n| seen >= n) || optimal {
                            break;
                        }
                    }
                }
            }

            let Some(frame) = frames.last_mut() else {
                break;
            };
            let (var, mark) = (frame.var, frame.mark);
            state.undo(mark);
            state.assigned[var] = None;

            let mut advanced = false;
            while frame.next < self.values[var].len() {
                let value = frame.next;
                frame.next += 1;
                if !state.alive[var][value] {
                    continue;
                }
                nodes += 1;
                if nodes > options.node_budget {
                    tracing::warn!(nodes = options.node_budget, "solver node budget exhausted");
                    let best = best.map(|mut b| {
                        b.nodes = options.node_budget;
                        Box::new(b)
                    });
                    return Err(SolveError::BudgetExhausted {
                        nodes: options.node_budget,
                        best,
                    });
                }
                state.assigned[var] = Some(value);
                let within_bound = !bound
                    || best
                        .as_ref()
                        .is_none_or(|b| self.soft_cost(&state).0 < b.cost);
                if self.consistent(var, &state)
                    && within_bound
                    && self.forward_check(var, &mut state)
                {
                    advanced = true;
                    break;
                }
                state.undo(mark);
                state.assigned[var] = None;
            }

            if advanced {
                descend = true;
            } else {
                frames.pop();
                descend = false;
            }
        }

        Ok(match best {
            Some(mut solution) => {
                solution.nodes = nodes;
                Outcome::Found(solution)
            }
            None => Outcome::Exhausted { nodes },
        })
    }
}
