//! Resource and schedule optimization.
//!
//! An activity network is built from each activity's predecessors plus the
//! document's `PRECEDENCE` links ([`network`]), timed with the critical
//! path method ([`cpm`]) and then leveled against resource capacity with a
//! serial schedule generation scheme ([`allocate`]). Cost and quality
//! objectives are linear programs over allocation variables ([`lp`]).
//! [`monte_carlo`] and [`sensitivity`] re-run the timing under sampled or
//! perturbed inputs.

pub mod allocate;
pub mod cpm;
pub mod lp;
pub mod monte_carlo;
pub mod network;
pub mod sensitivity;

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::csp::{Constraint, check_assignment};
use crate::error::ScheduleError;

pub use cpm::Timing;
pub use lp::{LinearProgram, LpSolution, LpVariable, Sense};
pub use monte_carlo::{Distribution, SimulationOptions, SimulationSummary, simulate};
pub use network::Network;
pub use sensitivity::{Impact, SensitivityOptions, SensitivityReport, analyze};

/// Result type for scheduling operations.
pub type ScheduleResult<T> = std::result::Result<T, ScheduleError>;

/// Absolute tolerance for time and capacity comparisons.
pub const EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Input model
// ---------------------------------------------------------------------------

/// A request for some quantity of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demand {
    pub resource: String,
    #[serde(default = "default_quantity")]
    pub quantity: f64,
    /// The resource must carry this skill tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,
}

fn default_quantity() -> f64 {
    1.0
}

/// Demands are written either as `{resource = quantity}` or as a list of
/// [`Demand`] tables.
#[derive(Deserialize)]
#[serde(untagged)]
enum DemandsRepr {
    Map(IndexMap<String, f64>),
    List(Vec<Demand>),
}

fn demands<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Demand>, D::Error> {
    Ok(match DemandsRepr::deserialize(deserializer)? {
        DemandsRepr::Map(map) => map
            .into_iter()
            .map(|(resource, quantity)| Demand {
                resource,
                quantity,
                skill: None,
            })
            .collect(),
        DemandsRepr::List(list) => list,
    })
}

fn default_true() -> bool {
    true
}

/// A unit of work in the activity network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,
    pub duration: f64,
    /// Duration distribution for simulation; `duration` is used otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution: Option<Distribution>,
    #[serde(default, alias = "resources", deserialize_with = "demands")]
    pub demands: Vec<Demand>,
    #[serde(default, alias = "after", alias = "depends_on")]
    pub predecessors: Vec<String>,
    /// `false` forbids overlap with any other activity.
    #[serde(default = "default_true")]
    pub can_parallel: bool,
}

impl Activity {
    pub fn new(name: impl Into<String>, duration: f64) -> Self {
        Self {
            name: name.into(),
            duration,
            distribution: None,
            demands: Vec::new(),
            predecessors: Vec::new(),
            can_parallel: true,
        }
    }

    pub fn after<S: AsRef<str>>(mut self, predecessors: &[S]) -> Self {
        self.predecessors
            .extend(predecessors.iter().map(|p| p.as_ref().to_string()));
        self
    }

    pub fn demand(mut self, resource: impl Into<String>, quantity: f64) -> Self {
        self.demands.push(Demand {
            resource: resource.into(),
            quantity,
            skill: None,
        });
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.can_parallel = false;
        self
    }

    pub fn with_distribution(mut self, distribution: Distribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    /// Total quantity requested per resource, in first-mention order.
    pub fn totals(&self) -> IndexMap<&str, f64> {
        let mut out: IndexMap<&str, f64> = IndexMap::new();
        for d in &self.demands {
            *out.entry(d.resource.as_str()).or_default() += d.quantity;
        }
        out
    }
}

/// A renewable (per time unit) or non-renewable (consumed) resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    pub capacity: f64,
    #[serde(default = "default_true")]
    pub renewable: bool,
    #[serde(default)]
    pub skills: Vec<String>,
}

impl Resource {
    pub fn renewable(name: impl Into<String>, capacity: f64) -> Self {
        Self {
            name: name.into(),
            capacity,
            renewable: true,
            skills: Vec::new(),
        }
    }

    pub fn consumable(name: impl Into<String>, capacity: f64) -> Self {
        Self {
            renewable: false,
            ..Self::renewable(name, capacity)
        }
    }
}

/// A finish-to-start link declared outside the activities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PrecedenceRepr")]
pub struct Precedence {
    pub before: String,
    pub after: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PrecedenceRepr {
    Text(String),
    Pair {
        #[serde(alias = "from")]
        before: String,
        #[serde(alias = "to")]
        after: String,
    },
}

impl TryFrom<PrecedenceRepr> for Precedence {
    type Error = String;

    fn try_from(repr: PrecedenceRepr) -> Result<Self, Self::Error> {
        match repr {
            PrecedenceRepr::Pair { before, after } => Ok(Self { before, after }),
            PrecedenceRepr::Text(text) => match text.split_once("->") {
                Some((before, after)) if !before.trim().is_empty() && !after.trim().is_empty() => {
                    Ok(Self {
                        before: before.trim().to_string(),
                        after: after.trim().to_string(),
                    })
                }
                _ => Err(format!("expected 'before -> after', got '{text}'")),
            },
        }
    }
}

/// What the schedule optimizes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "sense", rename_all = "snake_case")]
pub enum Objective {
    #[default]
    MinimizeMakespan,
    MinimizeCost(LinearProgram),
    MaximizeQuality(LinearProgram),
}

impl Objective {
    fn program(&self) -> Option<(&LinearProgram, Sense)> {
        match self {
            Self::MinimizeMakespan => None,
            Self::MinimizeCost(lp) => Some((lp, Sense::Minimize)),
            Self::MaximizeQuality(lp) => Some((lp, Sense::Maximize)),
        }
    }
}

/// Everything a scheduling call reads. Borrowed from the document.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleProblem<'a> {
    pub activities: &'a [Activity],
    pub resources: &'a [Resource],
    pub precedence: &'a [Precedence],
    pub objective: &'a Objective,
    /// Hard predicates over `start.<a>`, `finish.<a>`, `duration.<a>`,
    /// `slack.<a>` and `makespan`.
    pub constraints: &'a [Constraint],
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleOptions {
    /// Latest allowed finish. Defaults to the sum of all durations.
    pub horizon: Option<f64>,
}

// ---------------------------------------------------------------------------
// Output model
// ---------------------------------------------------------------------------

/// The first thing that made a schedule impossible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleConflict {
    Capacity {
        resource: String,
        activity: String,
        time: f64,
        requested: f64,
        capacity: f64,
    },
    Exhausted {
        resource: String,
        activity: String,
        consumed: f64,
        requested: f64,
        capacity: f64,
    },
    Exclusive {
        activity: String,
        other: String,
        time: f64,
    },
    Horizon {
        activity: String,
        time: f64,
        horizon: f64,
    },
    Constraint {
        name: String,
    },
}

impl fmt::Display for ScheduleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Capacity {
                resource,
                activity,
                time,
                requested,
                capacity,
            } => write!(
                f,
                "resource '{resource}' over capacity at t={time}: '{activity}' needs {requested} of {capacity}"
            ),
            Self::Exhausted {
                resource,
                activity,
                consumed,
                requested,
                capacity,
            } => write!(
                f,
                "non-renewable resource '{resource}' exhausted by '{activity}': \
                 {consumed} consumed, {requested} requested, capacity {capacity}"
            ),
            Self::Exclusive {
                activity,
                other,
                time,
            } => write!(f, "'{activity}' cannot overlap '{other}' at t={time}"),
            Self::Horizon {
                activity,
                time,
                horizon,
            } => write!(
                f,
                "'{activity}' starting at t={time} cannot finish within horizon {horizon}"
            ),
            Self::Constraint { name } => write!(f, "schedule constraint '{name}' violated"),
        }
    }
}

/// Placement of one activity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledActivity {
    pub start: f64,
    pub finish: f64,
    pub duration: f64,
    /// How far the start can move without delaying the makespan.
    pub slack: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schedule {
    /// Placements in declaration order.
    pub activities: IndexMap<String, ScheduledActivity>,
    /// Makespan after resource leveling.
    pub makespan: f64,
    /// Makespan of the precedence-only critical path.
    pub critical_path_length: f64,
    /// Zero-slack activities of the precedence-only network.
    pub critical_path: Vec<String>,
    /// Every zero-slack chain from a start to an end activity.
    pub critical_chains: Vec<Vec<String>>,
    pub timings: IndexMap<String, Timing>,
    /// Cumulative use of each non-renewable resource.
    pub consumption: IndexMap<String, f64>,
    /// Solution of the cost/quality program, if the objective has one.
    pub optimization: Option<LpSolution>,
}

impl Schedule {
    pub fn start_of(&self, activity: &str) -> Option<f64> {
        self.activities.get(activity).map(|a| a.start)
    }

    /// The value being optimized: the LP objective, or the makespan.
    pub fn objective_value(&self) -> f64 {
        self.optimization
            .as_ref()
            .map_or(self.makespan, |solution| solution.objective)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Time the network, level it against resources, check the schedule
/// constraints and solve the objective.
pub fn schedule(problem: &ScheduleProblem<'_>, options: &ScheduleOptions) -> ScheduleResult<Schedule> {
    validate(problem)?;
    let network = Network::build(problem.activities, problem.precedence)?;
    let durations: Vec<f64> = problem.activities.iter().map(|a| a.duration).collect();
    let cpm = cpm::analyze(&network, &durations);

    let leveled = allocate::level(problem.activities, problem.resources, &network, &cpm, options)?;
    let metrics = allocate::metrics(problem.activities, &leveled);

    let check = check_assignment(&metrics, problem.constraints, &[])?;
    if let Some(name) = check.hard_violations.into_iter().next() {
        return Err(ScheduleError::Infeasible {
            conflict: ScheduleConflict::Constraint { name },
        });
    }

    let optimization = match problem.objective.program() {
        Some((program, sense)) => Some(lp::optimize(program, sense, &metrics)?),
        None => None,
    };

    let name = |i: usize| network.name(i).to_string();
    let schedule = Schedule {
        activities: problem
            .activities
            .iter()
            .zip(&leveled.placements)
            .map(|(a, p)| (a.name.clone(), *p))
            .collect(),
        makespan: leveled.makespan,
        critical_path_length: cpm.makespan,
        critical_path: cpm.critical().map(name).collect(),
        critical_chains: cpm
            .chains(&network)
            .into_iter()
            .map(|chain| chain.into_iter().map(name).collect())
            .collect(),
        timings: problem
            .activities
            .iter()
            .zip(&cpm.timings)
            .map(|(a, t)| (a.name.clone(), *t))
            .collect(),
        consumption: leveled.consumption,
        optimization,
    };

    tracing::info!(
        activities = problem.activities.len(),
        makespan = schedule.makespan,
        critical_path_length = schedule.critical_path_length,
        "schedule complete"
    );
    Ok(schedule)
}

/// Reject malformed activities, resources and demands.
pub fn validate(problem: &ScheduleProblem<'_>) -> ScheduleResult<()> {
    let mut seen = HashSet::new();
    for r in problem.resources {
        if !r.capacity.is_finite() || r.capacity < 0.0 {
            return Err(ScheduleError::InvalidCapacity {
                resource: r.name.clone(),
                capacity: r.capacity,
            });
        }
    }
    for a in problem.activities {
        if !seen.insert(a.name.as_str()) {
            return Err(ScheduleError::DuplicateActivity {
                name: a.name.clone(),
            });
        }
        if !a.duration.is_finite() || a.duration < 0.0 {
            return Err(ScheduleError::InvalidDuration {
                activity: a.name.clone(),
                duration: a.duration,
            });
        }
        if let Some(distribution) = &a.distribution {
            distribution.sampler(&a.name)?;
        }
        for d in &a.demands {
            let resource = problem
                .resources
                .iter()
                .find(|r| r.name == d.resource)
                .ok_or_else(|| ScheduleError::UnknownResource {
                    activity: a.name.clone(),
                    resource: d.resource.clone(),
                })?;
            if !d.quantity.is_finite() || d.quantity < 0.0 {
                return Err(ScheduleError::InvalidDemand {
                    activity: a.name.clone(),
                    resource: d.resource.clone(),
                    quantity: d.quantity,
                });
            }
            if let Some(skill) = &d.skill {
                if !resource.skills.contains(skill) {
                    return Err(ScheduleError::SkillMismatch {
                        activity: a.name.clone(),
                        resource: d.resource.clone(),
                        skill: skill.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem<'a>(
        activities: &'a [Activity],
        resources: &'a [Resource],
        objective: &'a Objective,
        constraints: &'a [Constraint],
    ) -> ScheduleProblem<'a> {
        ScheduleProblem {
            activities,
            resources,
            precedence: &[],
            objective,
            constraints,
        }
    }

    #[test]
    fn parallel_chains_tie_on_makespan() {
        let activities = vec![
            Activity::new("A", 4.0),
            Activity::new("B", 8.0).after(&["A"]),
            Activity::new("C", 12.0),
        ];
        let objective = Objective::default();
        let s = schedule(
            &problem(&activities, &[], &objective, &[]),
            &ScheduleOptions::default(),
        )
        .unwrap();
        assert_eq!(s.makespan, 12.0);
        assert_eq!(s.critical_path_length, 12.0);
        assert_eq!(s.critical_path, vec!["A", "B", "C"]);
        assert_eq!(
            s.critical_chains,
            vec![vec!["A".to_string(), "B".to_string()], vec!["C".to_string()]]
        );
        assert!(s.activities.values().all(|a| a.slack == 0.0));
    }

    #[test]
    fn demands_deserialize_from_map_or_list() {
        let a: Activity = serde_json::from_str(
            r#"{"name": "build", "duration": 3, "resources": {"dev": 2}}"#,
        )
        .unwrap();
        assert_eq!(a.demands[0].quantity, 2.0);
        assert!(a.can_parallel);

        let a: Activity = serde_json::from_str(
            r#"{"name": "review", "duration": 1,
                "demands": [{"resource": "dev", "skill": "rust"}], "can_parallel": false}"#,
        )
        .unwrap();
        assert_eq!(a.demands[0].skill.as_deref(), Some("rust"));
        assert_eq!(a.demands[0].quantity, 1.0);
        assert!(!a.can_parallel);
    }

    #[test]
    fn precedence_parses_arrow_text() {
        let p: Precedence = serde_json::from_str(r#""design -> build""#).unwrap();
        assert_eq!(p.before, "design");
        assert_eq!(p.after, "build");
        assert!(serde_json::from_str::<Precedence>(r#""design""#).is_err());
    }

    #[test]
    fn validation_catches_bad_inputs() {
        let objective = Objective::default();
        let resources = vec![Resource {
            skills: vec!["rust".into()],
            ..Resource::renewable("dev", 2.0)
        }];

        let dup = vec![Activity::new("a", 1.0), Activity::new("a", 2.0)];
        assert!(matches!(
            validate(&problem(&dup, &resources, &objective, &[])),
            Err(ScheduleError::DuplicateActivity { .. })
        ));

        let unknown = vec![Activity::new("a", 1.0).demand("qa", 1.0)];
        assert!(matches!(
            validate(&problem(&unknown, &resources, &objective, &[])),
            Err(ScheduleError::UnknownResource { .. })
        ));

        let negative = vec![Activity::new("a", -1.0)];
        assert!(matches!(
            validate(&problem(&negative, &resources, &objective, &[])),
            Err(ScheduleError::InvalidDuration { .. })
        ));

        let mut skilled = Activity::new("a", 1.0).demand("dev", 1.0);
        skilled.demands[0].skill = Some("go".into());
        assert!(matches!(
            validate(&problem(&[skilled], &resources, &objective, &[])),
            Err(ScheduleError::SkillMismatch { .. })
        ));
    }

    #[test]
    fn schedule_constraints_are_checked() {
        let activities = vec![Activity::new("a", 3.0), Activity::new("b", 2.0).after(&["a"])];
        let objective = Objective::default();
        let ok = vec![Constraint::parse("deadline", "makespan <= 5").unwrap()];
        let s = schedule(
            &problem(&activities, &[], &objective, &ok),
            &ScheduleOptions::default(),
        )
        .unwrap();
        assert_eq!(s.start_of("b"), Some(3.0));

        let tight = vec![Constraint::parse("early_b", "start.b < 2").unwrap()];
        let err = schedule(
            &problem(&activities, &[], &objective, &tight),
            &ScheduleOptions::default(),
        )
        .unwrap_err();
        match err {
            ScheduleError::Infeasible {
                conflict: ScheduleConflict::Constraint { name },
            } => assert_eq!(name, "early_b"),
            other => panic!("expected constraint conflict, got {other:?}"),
        }
    }

    #[test]
    fn cost_objective_solves_linear_program() {
        let activities = vec![Activity::new("a", 10.0)];
        let objective: Objective = serde_json::from_str(
            r#"{"sense": "minimize_cost",
                "variables": [{"name": "crew", "lower": 1, "upper": 5}],
                "objective": "40 * crew",
                "subject_to": [{"name": "throughput", "predicate": "crew * 5 >= makespan"}]}"#,
        )
        .unwrap();
        let s = schedule(
            &problem(&activities, &[], &objective, &[]),
            &ScheduleOptions::default(),
        )
        .unwrap();
        let solution = s.optimization.as_ref().unwrap();
        assert!((solution.values["crew"] - 2.0).abs() < 1e-6);
        assert!((s.objective_value() - 80.0).abs() < 1e-6);
    }
}
