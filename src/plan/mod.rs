//! STRIPS-style planning over fact states.
//!
//! An [`Operator`] is an action schema: parameters, precondition literals,
//! and add/delete lists. Grounding it with concrete arguments yields an
//! [`Action`]. Applying an action removes its delete list and then adds its
//! add list. [`search::plan`] looks for a sequence of actions that turns the
//! initial state into a superset of the goal.

pub mod heuristic;
pub mod search;
pub mod validate;

use std::fmt;
use std::str::FromStr;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, PlanError};
use crate::fact::{Atom, Bindings, Fact, FactSet, Literal};
use crate::infer::Rule;

pub use heuristic::{Heuristic, HeuristicContext, HeuristicKind};
pub use search::{plan, plan_with};
pub use validate::validate_plan;

/// Result type for planning operations.
pub type PlanResult<T> = std::result::Result<T, PlanError>;

// ---------------------------------------------------------------------------
// Operators and actions
// ---------------------------------------------------------------------------

/// An action schema. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operator {
    pub name: String,
    /// Parameter variable names, written with or without the leading `?`.
    #[serde(default, deserialize_with = "parameters")]
    pub parameters: Vec<String>,
    #[serde(default, alias = "pre", alias = "precondition")]
    pub preconditions: Vec<Literal>,
    #[serde(default, alias = "post", alias = "add_list")]
    pub add: Vec<Atom>,
    #[serde(default, alias = "del", alias = "delete_list")]
    pub delete: Vec<Atom>,
}

fn parameters<'de, D: serde::Deserializer<'de>>(de: D) -> Result<Vec<String>, D::Error> {
    let raw: Vec<String> = Vec::deserialize(de)?;
    Ok(raw
        .into_iter()
        .map(|p| p.trim().trim_start_matches('?').to_string())
        .collect())
}

/// An operator instantiated with concrete arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Action {
    pub operator: String,
    pub args: Vec<String>,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Fact::new(self.operator.clone(), self.args.iter().cloned()))
    }
}

impl FromStr for Action {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fact: Fact = s.parse()?;
        Ok(Self {
            operator: fact.predicate,
            args: fact.args,
        })
    }
}

impl TryFrom<String> for Action {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

/// A fully ground action: what must hold and what changes.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundAction {
    pub action: Action,
    pub requires: Vec<Fact>,
    pub forbids: Vec<Fact>,
    pub add: Vec<Fact>,
    pub delete: Vec<Fact>,
}

impl GroundAction {
    pub fn applicable(&self, state: &FactSet) -> bool {
        self.requires.iter().all(|f| state.contains(f))
            && !self.forbids.iter().any(|f| state.contains(f))
    }

    /// Preconditions that do not hold in `state`: missing required facts,
    /// then present forbidden ones.
    pub fn unmet(&self, state: &FactSet) -> Vec<Fact> {
        self.requires
            .iter()
            .filter(|f| !state.contains(f))
            .chain(self.forbids.iter().filter(|f| state.contains(f)))
            .cloned()
            .collect()
    }

    /// Delete list first, then add list.
    pub fn apply(&self, state: &FactSet) -> FactSet {
        let mut next = state.clone();
        for f in &self.delete {
            next.remove(f);
        }
        next.extend(self.add.iter().cloned());
        next
    }
}

impl Operator {
    /// Check that every variable the operator mentions is a parameter.
    pub fn validate(&self) -> PlanResult<()> {
        let invalid = |message: String| PlanError::InvalidOperator {
            operator: self.name.clone(),
            message,
        };
        for (i, p) in self.parameters.iter().enumerate() {
            if self.parameters[..i].contains(p) {
                return Err(invalid(format!("parameter ?{p} is declared twice")));
            }
        }
        let atoms = self
            .preconditions
            .iter()
            .map(|l| &l.atom)
            .chain(&self.add)
            .chain(&self.delete);
        for atom in atoms {
            if let Some(var) = atom.variables().into_iter().find(|v| !self.has_parameter(v)) {
                return Err(invalid(format!("?{var} in '{atom}' is not a parameter")));
            }
        }
        Ok(())
    }

    fn has_parameter(&self, var: &str) -> bool {
        self.parameters.iter().any(|p| p == var)
    }

    /// Ground with explicit arguments in parameter order.
    pub fn instantiate(&self, args: &[String]) -> PlanResult<GroundAction> {
        if args.len() != self.parameters.len() {
            return Err(PlanError::ArityMismatch {
                action: self.name.clone(),
                expected: self.parameters.len(),
                actual: args.len(),
            });
        }
        let bindings: Bindings = self
            .parameters
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        self.ground(&bindings).ok_or_else(|| PlanError::InvalidOperator {
            operator: self.name.clone(),
            message: "an atom has a variable that is not a parameter".into(),
        })
    }

    /// Ground under `bindings`; `None` if a parameter is unbound.
    pub fn ground(&self, bindings: &Bindings) -> Option<GroundAction> {
        let args = self
            .parameters
            .iter()
            .map(|p| bindings.get(p).cloned())
            .collect::<Option<Vec<_>>>()?;
        let pre = |negated: bool| {
            self.preconditions
                .iter()
                .filter(move |l| l.negated == negated)
                .map(|l| &l.atom)
        };
        Some(GroundAction {
            action: Action {
                operator: self.name.clone(),
                args,
            },
            requires: ground_atoms(pre(false), bindings)?,
            forbids: ground_atoms(pre(true), bindings)?,
            add: ground_atoms(self.add.iter(), bindings)?,
            delete: ground_atoms(self.delete.iter(), bindings)?,
        })
    }

    /// Constants mentioned anywhere in the schema.
    pub fn constants(&self) -> impl Iterator<Item = &str> {
        self.preconditions
            .iter()
            .map(|l| &l.atom)
            .chain(&self.add)
            .chain(&self.delete)
            .flat_map(Atom::constants)
    }
}

fn ground_atoms<'x>(
    atoms: impl Iterator<Item = &'x Atom>,
    bindings: &Bindings,
) -> Option<Vec<Fact>> {
    atoms.map(|a| a.ground(bindings)).collect()
}

// ---------------------------------------------------------------------------
// Problems and options
// ---------------------------------------------------------------------------

/// Everything a planning call reads. Borrowed from the document.
#[derive(Debug, Clone, Copy)]
pub struct PlanProblem<'a> {
    pub initial: &'a FactSet,
    pub goal: &'a FactSet,
    pub operators: &'a [Operator],
    /// Declared objects; constants of the states and operators are added.
    pub objects: &'a [String],
    /// Rules the initial state is closed under before search.
    pub rules: &'a [Rule],
}

impl PlanProblem<'_> {
    /// Declared objects in order, then every other constant in sorted order.
    pub fn universe(&self) -> IndexSet<String> {
        let mut out: IndexSet<String> = self.objects.iter().cloned().collect();
        let mut rest: Vec<String> = self
            .initial
            .constants()
            .into_iter()
            .chain(self.goal.constants())
            .chain(
                self.operators
                    .iter()
                    .flat_map(Operator::constants)
                    .map(str::to_string),
            )
            .filter(|c| !out.contains(c))
            .collect();
        rest.sort();
        rest.dedup();
        out.extend(rest);
        out
    }
}

/// Search strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    BreadthFirst,
    DepthFirst,
    BestFirst,
    /// Depth-first with a depth bound.
    Bounded,
}

/// Why a search ended without a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchFailure {
    /// The reachable space was explored completely.
    Exhausted,
    /// Nodes at the depth bound were cut off.
    DepthBound,
    /// The node budget or time limit ran out.
    Budget,
}

impl fmt::Display for SearchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Exhausted => "search space exhausted",
            Self::DepthBound => "depth bound reached",
            Self::Budget => "budget exhausted",
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanOptions {
    pub strategy: Strategy,
    pub heuristic: HeuristicKind,
    /// Required for [`Strategy::Bounded`]; also caps other strategies.
    pub depth_bound: Option<usize>,
    /// Maximum number of node expansions.
    pub node_budget: usize,
    /// Wall-clock limit in milliseconds.
    pub time_limit_ms: Option<u64>,
    /// Close the initial state under the problem's rules first.
    pub close_under_rules: bool,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            heuristic: HeuristicKind::default(),
            depth_bound: None,
            node_budget: 100_000,
            time_limit_ms: None,
            close_under_rules: true,
        }
    }
}

/// A plan that reaches the goal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    pub final_state: FactSet,
    /// Nodes expanded by the search.
    pub expanded: usize,
    /// Nodes generated by the search.
    pub generated: usize,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "{:>3}. {action}", i + 1)?;
        }
        Ok(())
    }
}
