//! One-at-a-time sensitivity analysis.
//!
//! A target input is scaled by `1 + delta` (or set to `delta` when it is
//! zero), the whole schedule is recomputed, and the change in the objective
//! is reported as an elasticity: `(dy / y) / (dx / x)`, falling back to the
//! plain ratio `dy / dx` when either base value is zero. A perturbation that
//! makes the schedule infeasible is reported with its conflict and
//! [`Impact::Infeasible`]; the other targets are still measured.

use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::csp::expr::CmpOp;
use crate::csp::{Expr, Value};
use crate::error::ScheduleError;

use super::{
    Objective, ScheduleConflict, ScheduleOptions, ScheduleProblem, ScheduleResult, schedule,
};

/// An input that can be perturbed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Duration(String),
    Capacity(String),
    /// Right-hand side of a SUBJECT_TO constraint.
    Bound(String),
}

impl FromStr for Target {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |message: &str| ScheduleError::UnknownTarget {
            target: s.to_string(),
            message: message.to_string(),
        };
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| invalid("expected <kind>.<name>"))?;
        let name = name.to_string();
        match kind {
            "duration" => Ok(Self::Duration(name)),
            "capacity" => Ok(Self::Capacity(name)),
            "bound" => Ok(Self::Bound(name)),
            _ => Err(invalid("kind must be duration, capacity or bound")),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duration(n) => write!(f, "duration.{n}"),
            Self::Capacity(n) => write!(f, "capacity.{n}"),
            Self::Bound(n) => write!(f, "bound.{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Impact {
    High,
    Medium,
    Low,
    /// The perturbed input admits no schedule.
    Infeasible,
}

/// Elasticity magnitudes at or above which an input counts as high or
/// medium impact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub high: f64,
    pub medium: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            high: 0.5,
            medium: 0.1,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, elasticity: f64) -> Impact {
        let magnitude = elasticity.abs();
        if magnitude >= self.high {
            Impact::High
        } else if magnitude >= self.medium {
            Impact::Medium
        } else {
            Impact::Low
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SensitivityOptions {
    /// Relative perturbation.
    pub delta: f64,
    pub thresholds: Thresholds,
    pub parallel: bool,
}

impl Default for SensitivityOptions {
    fn default() -> Self {
        Self {
            delta: 0.1,
            thresholds: Thresholds::default(),
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityReport {
    pub target: String,
    pub base_input: f64,
    pub perturbed_input: f64,
    pub base_output: f64,
    /// `None` when the perturbed problem is infeasible.
    pub perturbed_output: Option<f64>,
    pub elasticity: Option<f64>,
    pub impact: Impact,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ScheduleConflict>,
}

/// Every activity duration and resource capacity.
pub fn default_targets(problem: &ScheduleProblem<'_>) -> Vec<Target> {
    problem
        .activities
        .iter()
        .map(|a| Target::Duration(a.name.clone()))
        .chain(
            problem
                .resources
                .iter()
                .map(|r| Target::Capacity(r.name.clone())),
        )
        .collect()
}

/// Perturb each target in turn and measure the objective's response.
/// An empty `targets` list means [`default_targets`].
pub fn analyze(
    problem: &ScheduleProblem<'_>,
    targets: &[Target],
    options: &SensitivityOptions,
    schedule_options: &ScheduleOptions,
) -> ScheduleResult<Vec<SensitivityReport>> {
    let base_output = schedule(problem, schedule_options)?.objective_value();
    let defaults;
    let targets = if targets.is_empty() {
        defaults = default_targets(problem);
        &defaults
    } else {
        targets
    };

    let run = |target: &Target| perturb(problem, target, base_output, options, schedule_options);
    let reports = if options.parallel {
        targets.par_iter().map(run).collect::<ScheduleResult<Vec<_>>>()?
    } else {
        targets.iter().map(run).collect::<ScheduleResult<Vec<_>>>()?
    };
    tracing::info!(
        targets = reports.len(),
        high = reports.iter().filter(|r| r.impact == Impact::High).count(),
        infeasible = reports.iter().filter(|r| r.impact == Impact::Infeasible).count(),
        "sensitivity analysis complete"
    );
    Ok(reports)
}

fn perturbed(x: f64, delta: f64) -> f64 {
    if x == 0.0 { delta } else { x * (1.0 + delta) }
}

fn perturb(
    problem: &ScheduleProblem<'_>,
    target: &Target,
    base_output: f64,
    options: &SensitivityOptions,
    schedule_options: &ScheduleOptions,
) -> ScheduleResult<SensitivityReport> {
    let unknown = |message: &str| ScheduleError::UnknownTarget {
        target: target.to_string(),
        message: message.to_string(),
    };
    let mut activities = problem.activities.to_vec();
    let mut resources = problem.resources.to_vec();
    let mut objective = problem.objective.clone();

    let (base_input, perturbed_input) = match target {
        Target::Duration(name) => {
            let a = activities
                .iter_mut()
                .find(|a| &a.name == name)
                .ok_or_else(|| unknown("no such activity"))?;
            let x = a.duration;
            a.duration = perturbed(x, options.delta);
            (x, a.duration)
        }
        Target::Capacity(name) => {
            let r = resources
                .iter_mut()
                .find(|r| &r.name == name)
                .ok_or_else(|| unknown("no such resource"))?;
            let x = r.capacity;
            r.capacity = perturbed(x, options.delta);
            (x, r.capacity)
        }
        Target::Bound(name) => {
            let program = match &mut objective {
                Objective::MinimizeCost(lp) | Objective::MaximizeQuality(lp) => lp,
                Objective::MinimizeMakespan => {
                    return Err(unknown("the objective has no SUBJECT_TO constraints"));
                }
            };
            let constraint = program
                .subject_to
                .iter_mut()
                .find(|c| &c.name == name)
                .ok_or_else(|| unknown("no such constraint"))?;
            match &mut constraint.predicate {
                Expr::Compare(op, _, rhs) if *op != CmpOp::Ne => {
                    let x = rhs
                        .eval(&std::collections::HashMap::<String, Value>::new())
                        .ok()
                        .and_then(|v| v.as_f64().ok())
                        .filter(|_| rhs.variables().is_empty())
                        .ok_or_else(|| unknown("right-hand side is not a numeric constant"))?;
                    let x1 = perturbed(x, options.delta);
                    **rhs = Expr::Const(Value::Num(x1));
                    (x, x1)
                }
                _ => return Err(unknown("constraint is not a comparison")),
            }
        }
    };

    let problem = ScheduleProblem {
        activities: &activities,
        resources: &resources,
        objective: &objective,
        ..*problem
    };
    let perturbed_output = match schedule(&problem, schedule_options) {
        Ok(s) => s.objective_value(),
        Err(ScheduleError::Infeasible { conflict }) => {
            tracing::debug!(%target, ?conflict, "perturbation is infeasible");
            return Ok(SensitivityReport {
                target: target.to_string(),
                base_input,
                perturbed_input,
                base_output,
                perturbed_output: None,
                elasticity: None,
                impact: Impact::Infeasible,
                conflict: Some(conflict),
            });
        }
        Err(e) => return Err(e),
    };

    let (dx, dy) = (perturbed_input - base_input, perturbed_output - base_output);
    let elasticity = if base_input != 0.0 && base_output != 0.0 {
        (dy / base_output) / (dx / base_input)
    } else {
        dy / dx
    };
    tracing::debug!(%target, elasticity, "perturbed");
    Ok(SensitivityReport {
        target: target.to_string(),
        base_input,
        perturbed_input,
        base_output,
        perturbed_output: Some(perturbed_output),
        elasticity: Some(elasticity),
        impact: options.thresholds.classify(elasticity),
        conflict: None,
    })
}
