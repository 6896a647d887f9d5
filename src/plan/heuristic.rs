//! Best-first heuristics.
//!
//! Estimates are integer costs-to-go; lower is better. The built-in
//! heuristics are selected with [`HeuristicKind`]; anything implementing
//! [`Heuristic`] can be passed to [`super::plan_with`].

use serde::{Deserialize, Serialize};

use crate::fact::FactSet;

/// Read-only context a heuristic can consult.
#[derive(Debug, Clone, Copy)]
pub struct HeuristicContext<'a> {
    pub initial: &'a FactSet,
    pub goal: &'a FactSet,
}

impl HeuristicContext<'_> {
    /// Goal facts missing from `state`.
    pub fn unmet(&self, state: &FactSet) -> usize {
        state.missing(self.goal).count()
    }
}

/// A cost-to-go estimate for best-first search.
pub trait Heuristic: Send + Sync {
    fn name(&self) -> &str;

    fn estimate(&self, state: &FactSet, ctx: &HeuristicContext<'_>) -> usize;

    /// Greedy heuristics order the frontier by the estimate alone and accept
    /// the first goal state they generate.
    fn greedy(&self) -> bool {
        false
    }
}

/// Count of unmet goal facts.
#[derive(Debug, Clone, Copy, Default)]
pub struct MinimizeComplexity;

impl Heuristic for MinimizeComplexity {
    fn name(&self) -> &str {
        "minimize_complexity"
    }

    fn estimate(&self, state: &FactSet, ctx: &HeuristicContext<'_>) -> usize {
        ctx.unmet(state)
    }
}

/// `2 * unmet + extraneous`, where extraneous facts are in neither the
/// initial state nor the goal. Prefers plans that leave less behind.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeClarity;

impl Heuristic for OptimizeClarity {
    fn name(&self) -> &str {
        "optimize_clarity"
    }

    fn estimate(&self, state: &FactSet, ctx: &HeuristicContext<'_>) -> usize {
        let extraneous = state
            .iter()
            .filter(|f| !ctx.initial.contains(f) && !ctx.goal.contains(f))
            .count();
        2 * ctx.unmet(state) + extraneous
    }
}

/// Greedy on unmet goal facts; stops at the first goal state generated.
#[derive(Debug, Clone, Copy, Default)]
pub struct Satisfice;

impl Heuristic for Satisfice {
    fn name(&self) -> &str {
        "satisfice"
    }

    fn estimate(&self, state: &FactSet, ctx: &HeuristicContext<'_>) -> usize {
        ctx.unmet(state)
    }

    fn greedy(&self) -> bool {
        true
    }
}

/// Built-in heuristic selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeuristicKind {
    #[default]
    MinimizeComplexity,
    OptimizeClarity,
    Satisfice,
}

impl HeuristicKind {
    pub fn build(self) -> Box<dyn Heuristic> {
        match self {
            Self::MinimizeComplexity => Box::new(MinimizeComplexity),
            Self::OptimizeClarity => Box::new(OptimizeClarity),
            Self::Satisfice => Box::new(Satisfice),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> FactSet {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn builtin_estimates() {
        let initial = set(&["a"]);
        let goal = set(&["b", "c"]);
        let ctx = HeuristicContext {
            initial: &initial,
            goal: &goal,
        };
        let state = set(&["a", "b", "junk"]);
        assert_eq!(MinimizeComplexity.estimate(&state, &ctx), 1);
        assert_eq!(OptimizeClarity.estimate(&state, &ctx), 3);
        assert_eq!(Satisfice.estimate(&state, &ctx), 1);
        assert!(Satisfice.greedy());
        assert!(!OptimizeClarity.greedy());
        assert_eq!(HeuristicKind::OptimizeClarity.build().name(), "optimize_clarity");
    }
}
