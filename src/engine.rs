//! The praxis engine: one entry point over every reasoning component.
//!
//! The engine holds configuration only. Each call reads the document it is
//! given and returns a fresh answer, so one engine can serve many documents
//! from many threads.

use serde::Serialize;

use crate::config::EngineConfig;
use crate::csp::{self, Solution};
use crate::decide::{self, Evaluation, RiskReport};
use crate::document::CompiledDocument;
use crate::error::{EngineError, PraxisResult};
use crate::fact::FactSet;
use crate::infer::{self, InferMode, InferOptions, InferenceOutcome};
use crate::plan::{self, Action, Plan};
use crate::schedule::sensitivity::Target;
use crate::schedule::{self, Network, Schedule, SensitivityReport, SimulationSummary};

/// A request against a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Forward chaining over `FACTS`, or a backward proof of one goal.
    Infer { mode: InferMode },
    /// Assign `VARIABLES` under `CONSTRAINTS` and `SOFT_CONSTRAINTS`.
    Solve,
    /// Search from `INITIAL_STATE` to `GOAL_STATE` with `OPERATORS`.
    Plan,
    /// Replay a given action sequence from `INITIAL_STATE`.
    ValidatePlan { actions: Vec<Action> },
    Schedule,
    Simulate,
    /// Perturb each target; an empty list perturbs every duration and
    /// capacity.
    Sensitivity { targets: Vec<Target> },
    Evaluate,
    Risks,
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Infer { .. } => "infer",
            Self::Solve => "solve",
            Self::Plan => "plan",
            Self::ValidatePlan { .. } => "validate_plan",
            Self::Schedule => "schedule",
            Self::Simulate => "simulate",
            Self::Sensitivity { .. } => "sensitivity",
            Self::Evaluate => "evaluate",
            Self::Risks => "risks",
        }
    }
}

/// The result of a [`Query`], one variant per query kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum Answer {
    Inference(InferenceOutcome),
    Solution(Solution),
    Plan(Plan),
    /// Final state of a replayed plan.
    ValidPlan(FactSet),
    Schedule(Schedule),
    Simulation(SimulationSummary),
    Sensitivity(Vec<SensitivityReport>),
    Evaluation(Evaluation),
    Risks(RiskReport),
}

/// The praxis reasoning engine.
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
}

fn missing(section: &str) -> EngineError {
    EngineError::MissingSection {
        section: section.into(),
    }
}

impl Engine {
    /// Create an engine, rejecting an unusable configuration.
    pub fn new(config: EngineConfig) -> PraxisResult<Self> {
        config.validate()?;
        tracing::info!(
            solver_node_budget = config.solver_node_budget,
            planner = ?config.planner.strategy,
            trials = config.simulation.trials,
            "initializing praxis engine"
        );
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Dispatch a query to the component that answers it.
    pub fn run(&self, doc: &CompiledDocument, query: &Query) -> PraxisResult<Answer> {
        let _span = tracing::info_span!("query", kind = query.name()).entered();
        let answer = match query {
            Query::Infer { mode } => Answer::Inference(self.infer(doc, mode)?),
            Query::Solve => Answer::Solution(self.solve(doc)?),
            Query::Plan => Answer::Plan(self.plan(doc)?),
            Query::ValidatePlan { actions } => Answer::ValidPlan(self.validate_plan(doc, actions)?),
            Query::Schedule => Answer::Schedule(self.schedule(doc)?),
            Query::Simulate => Answer::Simulation(self.simulate(doc)?),
            Query::Sensitivity { targets } => Answer::Sensitivity(self.sensitivity(doc, targets)?),
            Query::Evaluate => Answer::Evaluation(self.evaluate(doc)?),
            Query::Risks => Answer::Risks(self.risks(doc)?),
        };
        Ok(answer)
    }

    // -----------------------------------------------------------------------
    // Inference and constraints
    // -----------------------------------------------------------------------

    pub fn infer(&self, doc: &CompiledDocument, mode: &InferMode) -> PraxisResult<InferenceOutcome> {
        let options = InferOptions {
            max_passes: self.config.max_inference_passes,
        };
        Ok(infer::infer(&doc.facts, &doc.rules, mode, &options)?)
    }

    pub fn solve(&self, doc: &CompiledDocument) -> PraxisResult<Solution> {
        if doc.variables.is_empty() {
            return Err(missing("VARIABLES").into());
        }
        Ok(csp::solve(
            &doc.variables,
            &doc.constraints,
            &doc.soft_constraints,
            &self.config.solve_options(),
        )?)
    }

    // -----------------------------------------------------------------------
    // Planning
    // -----------------------------------------------------------------------

    /// An empty `GOAL_STATE` is already met: the plan is empty.
    pub fn plan(&self, doc: &CompiledDocument) -> PraxisResult<Plan> {
        Ok(plan::plan(&doc.plan_problem(), &self.config.planner)?)
    }

    /// Replay `actions` and return the state they end in.
    pub fn validate_plan(&self, doc: &CompiledDocument, actions: &[Action]) -> PraxisResult<FactSet> {
        Ok(plan::validate_plan(
            &doc.initial_state,
            &doc.goal_state,
            &doc.operators,
            actions,
        )?)
    }

    // -----------------------------------------------------------------------
    // Scheduling
    // -----------------------------------------------------------------------

    pub fn schedule(&self, doc: &CompiledDocument) -> PraxisResult<Schedule> {
        if doc.activities.is_empty() {
            return Err(missing("ACTIVITIES").into());
        }
        Ok(schedule::schedule(&doc.schedule_problem(), &self.config.schedule)?)
    }

    pub fn simulate(&self, doc: &CompiledDocument) -> PraxisResult<SimulationSummary> {
        if doc.activities.is_empty() {
            return Err(missing("ACTIVITIES").into());
        }
        schedule::validate(&doc.schedule_problem())?;
        let network = Network::build(&doc.activities, &doc.precedence)?;
        Ok(schedule::simulate(
            &doc.activities,
            &network,
            &self.config.simulation,
        )?)
    }

    pub fn sensitivity(
        &self,
        doc: &CompiledDocument,
        targets: &[Target],
    ) -> PraxisResult<Vec<SensitivityReport>> {
        if doc.activities.is_empty() {
            return Err(missing("ACTIVITIES").into());
        }
        Ok(schedule::analyze(
            &doc.schedule_problem(),
            targets,
            &self.config.sensitivity,
            &self.config.schedule,
        )?)
    }

    // -----------------------------------------------------------------------
    // Decisions
    // -----------------------------------------------------------------------

    pub fn evaluate(&self, doc: &CompiledDocument) -> PraxisResult<Evaluation> {
        let tree = doc
            .decision_tree
            .as_ref()
            .ok_or_else(|| missing("DECISION_TREE"))?;
        Ok(decide::evaluate(tree)?)
    }

    pub fn risks(&self, doc: &CompiledDocument) -> PraxisResult<RiskReport> {
        if doc.risks.is_empty() {
            return Err(missing("RISKS").into());
        }
        Ok(decide::assess(&doc.risks)?)
    }
}
