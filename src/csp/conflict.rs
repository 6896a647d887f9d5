//! Minimal conflict extraction for unsatisfiable problems.
//!
//! Hard constraints are grouped into connected components of the
//! constraint graph (constraints are linked when they share a variable).
//! Components are independent, so an unsatisfiable problem always has at
//! least one unsatisfiable component. That component is then shrunk with a
//! deletion filter: each member is dropped in turn and stays dropped if the
//! rest remains unsatisfiable. What is left is minimal: removing any one
//! member makes the remainder satisfiable.

use std::collections::HashMap;

use petgraph::unionfind::UnionFind;

use super::solver::{Outcome, Problem};
use super::{Constraint, SolveOptions, SolveResult, SolveStrategy, Variable};

/// Names of a minimal set of conflicting hard constraints.
///
/// If no single component can be shown unsatisfiable within the node
/// budget, every hard constraint is reported.
pub fn minimal_conflict(
    variables: &[Variable],
    hard: &[Constraint],
    options: &SolveOptions,
) -> SolveResult<Vec<String>> {
    let trial_options = SolveOptions {
        strategy: SolveStrategy::FirstSolution,
        ..options.clone()
    };

    for component in components(variables, hard) {
        let members: Vec<Constraint> = component.iter().map(|&i| hard[i].clone()).collect();
        if satisfiable(variables, &members, &trial_options)? != Some(false) {
            continue;
        }
        tracing::debug!(size = members.len(), "shrinking unsatisfiable component");

        let mut kept = members;
        let mut at = 0;
        while at < kept.len() {
            let mut trial = kept.clone();
            trial.remove(at);
            if satisfiable(variables, &trial, &trial_options)? == Some(false) {
                kept = trial;
            } else {
                at += 1;
            }
        }
        return Ok(kept.into_iter().map(|c| c.name).collect());
    }

    Ok(hard.iter().map(|c| c.name.clone()).collect())
}

/// Hard constraint indices grouped by shared variables, each group in
/// declaration order, groups ordered by their first member.
pub fn components(variables: &[Variable], hard: &[Constraint]) -> Vec<Vec<usize>> {
    let var_index: HashMap<&str, usize> = variables
        .iter()
        .enumerate()
        .map(|(i, v)| (v.name.as_str(), i))
        .collect();

    // Nodes: constraints first, then variables.
    let mut sets = UnionFind::<usize>::new(hard.len() + variables.len());
    for (ci, c) in hard.iter().enumerate() {
        for name in c.variables() {
            if let Some(&vi) = var_index.get(name) {
                sets.union(ci, hard.len() + vi);
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of: HashMap<usize, usize> = HashMap::new();
    for ci in 0..hard.len() {
        let root = sets.find(ci);
        let g = *group_of.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(ci);
    }
    groups
}

/// `Some(false)` when the search proves the subset unsatisfiable, `None`
/// when the budget ran out first.
fn satisfiable(
    variables: &[Variable],
    hard: &[Constraint],
    options: &SolveOptions,
) -> SolveResult<Option<bool>> {
    let scope: Vec<Variable> = variables
        .iter()
        .filter(|v| hard.iter().any(|c| c.variables().contains(&v.name.as_str())))
        .cloned()
        .collect();
    let problem = Problem::new(&scope, hard, &[])?;
    match problem.search(options) {
        Ok(Outcome::Found(_)) => Ok(Some(true)),
        Ok(Outcome::Exhausted { .. }) => Ok(Some(false)),
        Err(crate::error::SolveError::BudgetExhausted { .. }) => Ok(None),
        Err(other) => Err(other),
    }
}
