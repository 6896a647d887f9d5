//! Rich diagnostic error types for the praxis engine.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes, help text, and source chains so callers know exactly
//! which reasoning step failed and what it got stuck on. Failures carry their
//! partial results (last fact set, frontier size, conflicting constraints)
//! as fields rather than being replaced with defaults.

use miette::Diagnostic;
use thiserror::Error;

use crate::csp::Solution;
use crate::fact::{Fact, FactSet};
use crate::plan::SearchFailure;
use crate::schedule::ScheduleConflict;

/// Top-level error type for the praxis engine.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain (error codes, help text) through to the caller.
#[derive(Debug, Error, Diagnostic)]
pub enum PraxisError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Decide(#[from] DecideError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Engine(#[from] EngineError),
}

// ---------------------------------------------------------------------------
// Parse errors
// ---------------------------------------------------------------------------

/// A fact, pattern, rule or constraint expression could not be read.
#[derive(Debug, Clone, Error, Diagnostic)]
#[error("cannot parse '{input}': {message}")]
#[diagnostic(
    code(praxis::parse),
    help(
        "Facts look like `name` or `name(a, b)`, variables start with `?`, \
         negation is `not p` or `!p`, rules are `IF a AND not b THEN c`."
    )
)]
pub struct ParseError {
    pub input: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Inference errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum InferError {
    #[error("forward chaining did not reach a fixpoint within {bound} passes ({passes} run)")]
    #[diagnostic(
        code(praxis::infer::stalled),
        help(
            "The rule set kept producing new facts past the iteration bound. \
             The last-known fact set is attached. Review the rules for \
             generators that build unbounded terms, or raise `max_inference_passes`."
        )
    )]
    Stalled {
        passes: usize,
        bound: usize,
        facts: FactSet,
    },

    #[error("circular proof dependency: {}", render_cycle(.cycle))]
    #[diagnostic(
        code(praxis::infer::circular_dependency),
        help(
            "A fact is required by its own unresolved proof and no alternative \
             rule proves it. Assert one of the facts in the cycle directly, or \
             break the cycle in the rule set."
        )
    )]
    CircularDependency { cycle: Vec<Fact> },

    #[error("unsafe rule '{rule}': variable ?{variable} does not occur in a positive antecedent")]
    #[diagnostic(
        code(praxis::infer::unsafe_rule),
        help(
            "Every variable in the consequent and in negated antecedents must be \
             bound by a positive antecedent literal."
        )
    )]
    UnsafeRule { rule: String, variable: String },

    #[error("backward chaining query '{query}' must be ground")]
    #[diagnostic(
        code(praxis::infer::non_ground_query),
        help("Replace the variables in the query with constants.")
    )]
    NonGroundQuery { query: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
}

fn render_cycle(cycle: &[Fact]) -> String {
    cycle
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

// ---------------------------------------------------------------------------
// Constraint solver errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SolveError {
    #[error("no assignment satisfies all hard constraints; conflicting: {}", .conflicts.join(", "))]
    #[diagnostic(
        code(praxis::solve::unsatisfiable),
        help(
            "The listed hard constraints cannot hold together; removing any one \
             of them makes the rest satisfiable. Relax one, or turn it into a \
             soft constraint with a weight."
        )
    )]
    Unsatisfiable { conflicts: Vec<String> },

    #[error("search budget of {nodes} nodes exhausted")]
    #[diagnostic(
        code(praxis::solve::budget_exhausted),
        help(
            "The search was cut off before it could prove optimality or \
             unsatisfiability. The best solution found so far, if any, is \
             attached. Raise `solver_node_budget` for a complete answer."
        )
    )]
    BudgetExhausted {
        nodes: usize,
        best: Option<Box<Solution>>,
    },

    #[error("constraint '{constraint}' references undeclared variable '{variable}'")]
    #[diagnostic(
        code(praxis::solve::unknown_variable),
        help("Declare the variable in VARIABLES with a domain.")
    )]
    UnknownVariable { constraint: String, variable: String },

    #[error("variable '{variable}' is declared more than once")]
    #[diagnostic(code(praxis::solve::duplicate_variable))]
    DuplicateVariable { variable: String },

    #[error("variable '{variable}' has an invalid domain: {message}")]
    #[diagnostic(
        code(praxis::solve::invalid_domain),
        help("Ranges need min <= max, a positive step and at most 1,000,000 values.")
    )]
    InvalidDomain { variable: String, message: String },

    #[error("soft constraint '{constraint}' has invalid weight {weight}")]
    #[diagnostic(
        code(praxis::solve::invalid_weight),
        help("Soft constraint weights must be finite and non-negative.")
    )]
    InvalidWeight { constraint: String, weight: f64 },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ParseError),
}

// ---------------------------------------------------------------------------
// Planner errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PlanError {
    #[error(
        "no plan found ({reason}): {expanded} nodes expanded, frontier {frontier}, \
         deepest state at depth {deepest_depth}"
    )]
    #[diagnostic(
        code(praxis::plan::no_plan_found),
        help(
            "The deepest partial state reached is attached for diagnosis. \
             Check that some operator can add each missing goal fact, or \
             raise the depth bound / node budget."
        )
    )]
    NoPlanFound {
        reason: SearchFailure,
        frontier: usize,
        expanded: usize,
        deepest_depth: usize,
        deepest_state: FactSet,
    },

    #[error("operator '{operator}' is invalid: {message}")]
    #[diagnostic(
        code(praxis::plan::invalid_operator),
        help(
            "Variables in add/delete lists and negated preconditions must be \
             operator parameters."
        )
    )]
    InvalidOperator { operator: String, message: String },

    #[error("unknown operator '{operator}'")]
    #[diagnostic(code(praxis::plan::unknown_operator))]
    UnknownOperator { operator: String },

    #[error("action '{action}' expects {expected} arguments, got {actual}")]
    #[diagnostic(code(praxis::plan::arity_mismatch))]
    ArityMismatch {
        action: String,
        expected: usize,
        actual: usize,
    },

    #[error("step {step} ({action}) is not applicable; unmet: {}", render_facts(.unmet))]
    #[diagnostic(
        code(praxis::plan::invalid_plan),
        help("An earlier action must establish (or stop deleting) the unmet facts.")
    )]
    InvalidPlan {
        step: usize,
        action: String,
        unmet: Vec<Fact>,
    },

    #[error("plan ends without reaching the goal; missing: {}", render_facts(.missing))]
    #[diagnostic(code(praxis::plan::goal_not_reached))]
    GoalNotReached { missing: Vec<Fact> },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Infer(#[from] InferError),
}

fn render_facts(facts: &[Fact]) -> String {
    facts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Schedule errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ScheduleError {
    #[error("precedence cycle detected: {}", .cycle.join(" -> "))]
    #[diagnostic(
        code(praxis::schedule::cycle_detected),
        help("The activity network must be acyclic. Remove one of the precedence links in the cycle.")
    )]
    CycleDetected { cycle: Vec<String> },

    #[error("infeasible schedule: {conflict}")]
    #[diagnostic(
        code(praxis::schedule::infeasible),
        help(
            "No start-time shift satisfies precedence and capacity within the \
             horizon. Raise the resource capacity, extend the horizon, or \
             reduce the demand of the named activity."
        )
    )]
    Infeasible { conflict: ScheduleConflict },

    #[error("'{from}' references unknown activity '{reference}'")]
    #[diagnostic(code(praxis::schedule::unknown_activity))]
    UnknownActivity { reference: String, from: String },

    #[error("activity '{activity}' requests unknown resource '{resource}'")]
    #[diagnostic(code(praxis::schedule::unknown_resource))]
    UnknownResource { activity: String, resource: String },

    #[error("activity '{name}' is declared more than once")]
    #[diagnostic(code(praxis::schedule::duplicate_activity))]
    DuplicateActivity { name: String },

    #[error("activity '{activity}' needs skill '{skill}' but resource '{resource}' does not provide it")]
    #[diagnostic(
        code(praxis::schedule::skill_mismatch),
        help("Tag the resource with the skill, or point the demand at a resource that has it.")
    )]
    SkillMismatch {
        activity: String,
        resource: String,
        skill: String,
    },

    #[error("activity '{activity}' has invalid duration {duration}")]
    #[diagnostic(
        code(praxis::schedule::invalid_duration),
        help("Durations must be finite and non-negative.")
    )]
    InvalidDuration { activity: String, duration: f64 },

    #[error("activity '{activity}' has an invalid duration distribution: {message}")]
    #[diagnostic(code(praxis::schedule::invalid_distribution))]
    InvalidDistribution { activity: String, message: String },

    #[error("objective is unbounded")]
    #[diagnostic(
        code(praxis::schedule::unbounded),
        help("Add upper bounds on the allocation variables or a limiting SUBJECT_TO constraint.")
    )]
    Unbounded,

    #[error("linear program references unknown variable '{variable}'")]
    #[diagnostic(
        code(praxis::schedule::unknown_lp_variable),
        help("Declare it under OBJECTIVE_FUNCTION.variables, or use a schedule metric such as `makespan` or `duration.<activity>`.")
    )]
    UnknownLpVariable { variable: String },

    #[error("'{expr}' is not linear: {message}")]
    #[diagnostic(
        code(praxis::schedule::non_linear),
        help(
            "Objectives and SUBJECT_TO constraints must be sums of constant \
             multiples of variables, compared with <=, >= or ==."
        )
    )]
    NonLinear { expr: String, message: String },

    #[error("sensitivity target '{target}' is invalid: {message}")]
    #[diagnostic(
        code(praxis::schedule::unknown_target),
        help("Targets are `duration.<activity>`, `capacity.<resource>` or `bound.<constraint>`.")
    )]
    UnknownTarget { target: String, message: String },

    #[error("activity '{activity}' requests invalid quantity {quantity} of '{resource}'")]
    #[diagnostic(code(praxis::schedule::invalid_demand))]
    InvalidDemand {
        activity: String,
        resource: String,
        quantity: f64,
    },

    #[error("resource '{resource}' has invalid capacity {capacity}")]
    #[diagnostic(code(praxis::schedule::invalid_capacity))]
    InvalidCapacity { resource: String, capacity: f64 },

    #[error("Monte Carlo simulation needs at least one trial")]
    #[diagnostic(code(praxis::schedule::no_trials))]
    NoTrials,

    /// Infeasible linear programs reuse the constraint solver's conflict report.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Optimization(#[from] SolveError),
}

// ---------------------------------------------------------------------------
// Decision errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum DecideError {
    #[error("node '{node}' has probability {probability} outside [0, 1]")]
    #[diagnostic(code(praxis::decide::invalid_probability))]
    InvalidProbability { node: String, probability: f64 },

    #[error("outcome '{node}' of a chance node has no probability")]
    #[diagnostic(code(praxis::decide::missing_probability))]
    MissingProbability { node: String },

    #[error("outcome probabilities of chance node '{node}' sum to {sum}, not 1")]
    #[diagnostic(
        code(praxis::decide::probabilities_do_not_sum),
        help("Normalize the outcome probabilities so they sum to 1.")
    )]
    ProbabilitiesDoNotSum { node: String, sum: f64 },

    #[error("node '{node}' has no children")]
    #[diagnostic(code(praxis::decide::empty_node))]
    EmptyNode { node: String },

    #[error("utility of node '{node}' is not finite")]
    #[diagnostic(code(praxis::decide::invalid_utility))]
    InvalidUtility { node: String },

    #[error("risk '{id}' is invalid: {message}")]
    #[diagnostic(code(praxis::decide::invalid_risk))]
    InvalidRisk { id: String, message: String },
}

// ---------------------------------------------------------------------------
// Load errors (documents and config files)
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    #[error("failed to read {path}")]
    #[diagnostic(
        code(praxis::load::read),
        help("Ensure the file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    #[diagnostic(
        code(praxis::load::parse),
        help("Documents are JSON or TOML with SCREAMING_SNAKE_CASE section names.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write {path}")]
    #[diagnostic(
        code(praxis::load::write),
        help("Ensure you have write permissions to the target directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Engine errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("invalid configuration: {message}")]
    #[diagnostic(
        code(praxis::engine::invalid_config),
        help("Check the EngineConfig fields. {message}")
    )]
    InvalidConfig { message: String },

    #[error("document has no {section} section")]
    #[diagnostic(
        code(praxis::engine::missing_section),
        help("The requested query needs the {section} section to be present.")
    )]
    MissingSection { section: String },
}

/// Convenience alias for functions returning praxis results.
pub type PraxisResult<T> = std::result::Result<T, PraxisError>;
