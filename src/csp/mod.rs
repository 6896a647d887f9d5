//! Constraint satisfaction over finite domains.
//!
//! Variables take [`Value`]s from a [`Domain`]; [`Constraint`]s are
//! [`Expr`] predicates over them. Hard constraints must hold; soft
//! constraints carry a weight and only rank assignments that already
//! satisfy every hard constraint.
//!
//! The search itself lives in [`solver`]: node consistency, then an
//! explicit-stack backtracking search with forward checking. When a
//! problem is unsatisfiable, [`conflict`] reduces the hard constraints to a
//! minimal conflicting set.

pub mod conflict;
pub mod expr;
pub mod solver;

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, SolveError};

pub use expr::{Env, EvalError, Expr};
pub use solver::solve;

/// Result type for constraint solving.
pub type SolveResult<T> = std::result::Result<T, SolveError>;

/// Largest number of values a range domain may expand to.
pub const MAX_RANGE_VALUES: i64 = 1_000_000;

// ---------------------------------------------------------------------------
// Values and domains
// ---------------------------------------------------------------------------

/// A domain value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Num(f64),
    Sym(String),
}

impl Value {
    pub fn as_bool(&self) -> Result<bool, EvalError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(EvalError::Type(format!("expected a boolean, got {other}"))),
        }
    }

    pub fn as_f64(&self) -> Result<f64, EvalError> {
        match self {
            Self::Int(i) => Ok(*i as f64),
            Self::Num(n) => Ok(*n),
            other => Err(EvalError::Type(format!("expected a number, got {other}"))),
        }
    }

    /// Equality with integers and floats compared numerically.
    pub fn loosely_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Int(_) | Self::Num(_), Self::Int(_) | Self::Num(_)) => {
                self.as_f64().ok() == other.as_f64().ok()
            }
            (a, b) => a == b,
        }
    }

    /// Ordering between numbers, or between symbols. `None` across types.
    pub fn partial_cmp_value(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => Some(a.cmp(b)),
            (Self::Int(_) | Self::Num(_), Self::Int(_) | Self::Num(_)) => {
                self.as_f64().ok()?.partial_cmp(&other.as_f64().ok()?)
            }
            (Self::Sym(a), Self::Sym(b)) => Some(a.cmp(b)),
            (Self::Bool(a), Self::Bool(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Sym(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Sym(s.to_string())
    }
}

/// The values a variable may take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Domain {
    /// Enumerated values, tried in the listed order.
    Values(Vec<Value>),
    /// Inclusive integer range.
    Range {
        min: i64,
        max: i64,
        #[serde(default = "default_step")]
        step: i64,
    },
}

fn default_step() -> i64 {
    1
}

impl Domain {
    pub fn range(min: i64, max: i64) -> Self {
        Self::Range { min, max, step: 1 }
    }

    /// Expand to the concrete value list, deduplicated.
    pub fn values(&self, variable: &str) -> SolveResult<Vec<Value>> {
        let invalid = |message: String| SolveError::InvalidDomain {
            variable: variable.to_string(),
            message,
        };
        match self {
            Self::Values(values) => {
                let mut out: Vec<Value> = Vec::with_capacity(values.len());
                for v in values {
                    if !out.iter().any(|o| o.loosely_eq(v)) {
                        out.push(v.clone());
                    }
                }
                Ok(out)
            }
            Self::Range { min, max, step } => {
                if min > max {
                    return Err(invalid(format!("min {min} exceeds max {max}")));
                }
                if *step <= 0 {
                    return Err(invalid(format!("step {step} must be positive")));
                }
                let count = (max - min) / step + 1;
                if count > MAX_RANGE_VALUES {
                    return Err(invalid(format!("{count} values exceed the limit")));
                }
                Ok((0..count).map(|k| Value::Int(min + k * step)).collect())
            }
        }
    }
}

/// A named decision variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub domain: Domain,
}

impl Variable {
    pub fn new(name: impl Into<String>, domain: Domain) -> Self {
        Self {
            name: name.into(),
            domain,
        }
    }
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

/// A named predicate. Hard or soft is decided by which list it is passed in;
/// `weight` only matters for soft constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ConstraintRepr")]
pub struct Constraint {
    pub name: String,
    pub predicate: Expr,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ConstraintRepr {
    Text(String),
    Structured {
        #[serde(default)]
        name: Option<String>,
        #[serde(alias = "expr", alias = "constraint")]
        predicate: Expr,
        #[serde(default = "default_weight")]
        weight: f64,
    },
}

impl TryFrom<ConstraintRepr> for Constraint {
    type Error = ParseError;

    fn try_from(repr: ConstraintRepr) -> Result<Self, Self::Error> {
        match repr {
            ConstraintRepr::Text(text) => Constraint::parse(text.trim(), &text),
            ConstraintRepr::Structured {
                name,
                predicate,
                weight,
            } => Ok(Constraint {
                name: name.unwrap_or_else(|| predicate.to_string()),
                predicate,
                weight,
            }),
        }
    }
}

impl Constraint {
    /// Parse `text` as the predicate of a constraint called `name`.
    pub fn parse(name: impl Into<String>, text: &str) -> Result<Self, ParseError> {
        Ok(Self {
            name: name.into(),
            predicate: text.parse()?,
            weight: default_weight(),
        })
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn variables(&self) -> Vec<&str> {
        self.predicate.variables()
    }
}

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// A complete assignment in variable declaration order.
pub type Assignment = IndexMap<String, Value>;

/// How the next variable to branch on is picked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableOrder {
    /// Smallest live domain, then highest degree, then declaration order.
    #[default]
    MostConstrained,
    Declaration,
}

/// What to do once an assignment satisfying every hard constraint is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStrategy {
    /// Stop at the first satisfying assignment.
    FirstSolution,
    /// Collect up to `n` satisfying assignments, keep the cheapest.
    BestOfN(usize),
    /// Search everything, pruning on partial soft cost.
    #[default]
    BranchAndBound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    pub order: VariableOrder,
    pub strategy: SolveStrategy,
    /// Maximum number of value assignments tried.
    pub node_budget: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            order: VariableOrder::default(),
            strategy: SolveStrategy::default(),
            node_budget: 1_000_000,
        }
    }
}

/// A satisfying assignment and its soft cost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Solution {
    pub assignment: Assignment,
    /// Sum of weights of violated soft constraints.
    pub cost: f64,
    /// Names of violated soft constraints.
    pub violated: Vec<String>,
    /// Value assignments tried.
    pub nodes: usize,
    /// Satisfying assignments seen before this one was chosen.
    pub solutions_seen: usize,
}

/// Outcome of evaluating constraints against a given assignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Check {
    pub hard_violations: Vec<String>,
    pub soft_violations: Vec<String>,
    pub cost: f64,
}

impl Check {
    pub fn is_feasible(&self) -> bool {
        self.hard_violations.is_empty()
    }
}

/// Evaluate `hard` and `soft` against an arbitrary assignment.
///
/// Every referenced variable must be bound in `env`.
pub fn check_assignment(env: &dyn Env, hard: &[Constraint], soft: &[Constraint]) -> SolveResult<Check> {
    let eval = |c: &Constraint| {
        c.predicate.holds(env).ok_or_else(|| SolveError::UnknownVariable {
            constraint: c.name.clone(),
            variable: c
                .variables()
                .into_iter()
                .find(|v| env.lookup(v).is_none())
                .unwrap_or_default()
                .to_string(),
        })
    };
    let mut check = Check {
        hard_violations: Vec::new(),
        soft_violations: Vec::new(),
        cost: 0.0,
    };
    for c in hard {
        if !eval(c)? {
            check.hard_violations.push(c.name.clone());
        }
    }
    for c in soft {
        if !eval(c)? {
            check.soft_violations.push(c.name.clone());
            check.cost += c.weight;
        }
    }
    Ok(check)
}

/// Reject duplicate variables, dangling references and bad weights.
pub fn validate(variables: &[Variable], hard: &[Constraint], soft: &[Constraint]) -> SolveResult<()> {
    let mut names = HashSet::new();
    for v in variables {
        if !names.insert(v.name.as_str()) {
            return Err(SolveError::DuplicateVariable {
                variable: v.name.clone(),
            });
        }
    }
    for c in hard.iter().chain(soft) {
        if let Some(missing) = c.variables().into_iter().find(|v| !names.contains(v)) {
            return Err(SolveError::UnknownVariable {
                constraint: c.name.clone(),
                variable: missing.to_string(),
            });
        }
    }
    for c in soft {
        if !c.weight.is_finite() || c.weight < 0.0 {
            return Err(SolveError::InvalidWeight {
                constraint: c.name.clone(),
                weight: c.weight,
            });
        }
    }
    Ok(())
}
