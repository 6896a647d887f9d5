//! Plan replay.

use crate::error::PlanError;
use crate::fact::FactSet;

use super::{Action, Operator, PlanResult};

/// Replay `actions` from `initial` and check they reach `goal`.
///
/// Returns the final state, or the first step whose preconditions fail
/// (with the unmet facts), or the goal facts still missing at the end.
pub fn validate_plan(
    initial: &FactSet,
    goal: &FactSet,
    operators: &[Operator],
    actions: &[Action],
) -> PlanResult<FactSet> {
    let mut state = initial.clone();
    for (step, action) in actions.iter().enumerate() {
        let op = operators
            .iter()
            .find(|op| op.name == action.operator)
            .ok_or_else(|| PlanError::UnknownOperator {
                operator: action.operator.clone(),
            })?;
        let ground = op.instantiate(&action.args)?;
        let unmet = ground.unmet(&state);
        if !unmet.is_empty() {
            return Err(PlanError::InvalidPlan {
                step: step + 1,
                action: action.to_string(),
                unmet,
            });
        }
        state = ground.apply(&state);
    }

    let missing: Vec<_> = state.missing(goal).cloned().collect();
    if !missing.is_empty() {
        return Err(PlanError::GoalNotReached { missing });
    }
    tracing::debug!(steps = actions.len(), "plan validated");
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fact::Fact;

    fn set(items: &[&str]) -> FactSet {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn ops() -> Vec<Operator> {
        serde_json::from_str(
            r#"[{"name": "open", "pre": ["closed"], "add": ["opened"], "del": ["closed"]},
                {"name": "enter", "pre": ["opened"], "add": ["inside"]}]"#,
        )
        .unwrap()
    }

    fn actions(items: &[&str]) -> Vec<Action> {
        items.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn valid_plan_returns_final_state() {
        let state = validate_plan(
            &set(&["closed"]),
            &set(&["inside"]),
            &ops(),
            &actions(&["open", "enter"]),
        )
        .unwrap();
        assert_eq!(state, set(&["opened", "inside"]));
    }

    #[test]
    fn reports_first_failing_step() {
        let err = validate_plan(
            &set(&["closed"]),
            &set(&["inside"]),
            &ops(),
            &actions(&["enter", "open"]),
        )
        .unwrap_err();
        match err {
            PlanError::InvalidPlan { step, unmet, .. } => {
                assert_eq!(step, 1);
                assert_eq!(unmet, vec![Fact::atom("opened")]);
            }
            other => panic!("expected InvalidPlan, got {other:?}"),
        }
    }

    #[test]
    fn reports_missing_goal_and_unknown_operators() {
        let err = validate_plan(&set(&["closed"]), &set(&["inside"]), &ops(), &actions(&["open"]))
            .unwrap_err();
        assert!(matches!(err, PlanError::GoalNotReached { ref missing } if missing.len() == 1));

        let err = validate_plan(&set(&["closed"]), &set(&[]), &ops(), &actions(&["fly"]))
            .unwrap_err();
        assert!(matches!(err, PlanError::UnknownOperator { .. }));
    }
}
