//! Engine configuration, persisted as TOML.
//!
//! Every field has a default, so a config file only needs the keys it
//! changes:
//!
//! ```toml
//! solver_node_budget = 50000
//!
//! [planner]
//! strategy = "best_first"
//! heuristic = "optimize_clarity"
//!
//! [simulation]
//! trials = 5000
//! seed = 7
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::csp::{SolveOptions, SolveStrategy, VariableOrder};
use crate::error::{EngineError, LoadError};
use crate::plan::{PlanOptions, Strategy};
use crate::schedule::{ScheduleOptions, SensitivityOptions, SimulationOptions};

/// Tunables for every component. Carries no state between calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on forward-chaining passes. The natural bound applies when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inference_passes: Option<usize>,
    /// Value assignments the constraint solver may try.
    #[serde(default = "default_solver_node_budget")]
    pub solver_node_budget: usize,
    #[serde(default)]
    pub variable_order: VariableOrder,
    #[serde(default)]
    pub solve_strategy: SolveStrategy,
    #[serde(default)]
    pub planner: PlanOptions,
    #[serde(default)]
    pub schedule: ScheduleOptions,
    #[serde(default)]
    pub simulation: SimulationOptions,
    #[serde(default)]
    pub sensitivity: SensitivityOptions,
}

fn default_solver_node_budget() -> usize {
    1_000_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_inference_passes: None,
            solver_node_budget: default_solver_node_budget(),
            variable_order: VariableOrder::default(),
            solve_strategy: SolveStrategy::default(),
            planner: PlanOptions::default(),
            schedule: ScheduleOptions::default(),
            simulation: SimulationOptions::default(),
            sensitivity: SensitivityOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Reject settings no call could run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |message: &str| {
            Err(EngineError::InvalidConfig {
                message: message.into(),
            })
        };
        if self.max_inference_passes == Some(0) {
            return invalid("max_inference_passes must be > 0");
        }
        if self.solver_node_budget == 0 {
            return invalid("solver_node_budget must be > 0");
        }
        if self.solve_strategy == SolveStrategy::BestOfN(0) {
            return invalid("solve_strategy best_of_n needs n > 0");
        }
        if self.planner.node_budget == 0 {
            return invalid("planner.node_budget must be > 0");
        }
        if self.planner.strategy == Strategy::Bounded && self.planner.depth_bound == Some(0) {
            return invalid("planner.depth_bound must be > 0 for bounded search");
        }
        if let Some(horizon) = self.schedule.horizon
            && !(horizon.is_finite() && horizon >= 0.0)
        {
            return invalid("schedule.horizon must be finite and non-negative");
        }
        if self.simulation.trials == 0 {
            return invalid("simulation.trials must be > 0");
        }
        if self.simulation.bins == 0 {
            return invalid("simulation.bins must be > 0");
        }
        let s = &self.sensitivity;
        if !(s.delta.is_finite() && s.delta > 0.0) {
            return invalid("sensitivity.delta must be a positive number");
        }
        if !(s.thresholds.medium >= 0.0 && s.thresholds.high >= s.thresholds.medium) {
            return invalid("sensitivity thresholds need 0 <= medium <= high");
        }
        Ok(())
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            order: self.variable_order,
            strategy: self.solve_strategy,
            node_budget: self.solver_node_budget,
        }
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| LoadError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        let content = toml::to_string_pretty(self).map_err(|e| LoadError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LoadError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| LoadError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::HeuristicKind;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            solver_node_budget = 500

            [planner]
            strategy = "best_first"
            heuristic = "optimize_clarity"
            "#,
        )
        .unwrap();
        assert_eq!(config.solver_node_budget, 500);
        assert_eq!(config.planner.strategy, Strategy::BestFirst);
        assert_eq!(config.planner.heuristic, HeuristicKind::OptimizeClarity);
        assert_eq!(config.planner.node_budget, 100_000);
        assert_eq!(config.simulation.trials, 1000);
        assert_eq!(config.sensitivity.thresholds.high, 0.5);
        config.validate().unwrap();
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/praxis.toml");
        let mut config = EngineConfig::default();
        config.max_inference_passes = Some(8);
        config.solve_strategy = SolveStrategy::BestOfN(3);
        config.simulation.seed = 7;
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.max_inference_passes, Some(8));
        assert_eq!(loaded.solve_strategy, SolveStrategy::BestOfN(3));
        assert_eq!(loaded.simulation.seed, 7);
        assert_eq!(loaded.solve_options().node_budget, 1_000_000);
    }

    #[test]
    fn rejects_unusable_settings() {
        let cases = [
            EngineConfig {
                solver_node_budget: 0,
                ..Default::default()
            },
            EngineConfig {
                max_inference_passes: Some(0),
                ..Default::default()
            },
            EngineConfig {
                simulation: SimulationOptions {
                    trials: 0,
                    ..Default::default()
                },
                ..Default::default()
            },
            EngineConfig {
                sensitivity: SensitivityOptions {
                    delta: 0.0,
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(matches!(
                config.validate(),
                Err(EngineError::InvalidConfig { .. })
            ));
        }
    }
}
