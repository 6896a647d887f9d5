//! Decision analysis: expected utility over decision trees, and the risk
//! register.
//!
//! A tree mixes three kinds of node. Terminal nodes carry a utility.
//! Chance nodes average their outcomes by probability. Decision nodes pick
//! the option with the highest expected utility, the first declared option
//! winning ties. Evaluation is backward induction from the leaves.

pub mod risk;

use serde::{Deserialize, Serialize};

use crate::error::DecideError;

pub use risk::{RankedRisk, RiskEntry, RiskReport, assess};

/// Result type for decision analysis.
pub type DecideResult<T> = std::result::Result<T, DecideError>;

/// Chance outcome probabilities must sum to 1 within this tolerance.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// A node of a decision tree. Its kind follows from which key is present:
/// `options`, `outcomes` or `utility`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecisionNode {
    Decision { options: Vec<Branch> },
    Chance { outcomes: Vec<Branch> },
    Terminal { utility: f64 },
}

/// A named edge to a child node.
///
/// Under a chance node `probability` is the outcome probability. Under a
/// decision node it is an informational prior and does not affect the
/// expected utility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
    #[serde(flatten)]
    pub node: DecisionNode,
}

impl Branch {
    pub fn new(name: impl Into<String>, node: DecisionNode) -> Self {
        Self {
            name: name.into(),
            probability: None,
            node,
        }
    }

    pub fn with_probability(mut self, probability: f64) -> Self {
        self.probability = Some(probability);
        self
    }
}

impl DecisionNode {
    pub fn terminal(utility: f64) -> Self {
        Self::Terminal { utility }
    }

    /// A chance node over `(name, probability, utility)` leaves.
    pub fn lottery(outcomes: &[(&str, f64, f64)]) -> Self {
        Self::Chance {
            outcomes: outcomes
                .iter()
                .map(|&(name, p, u)| Branch::new(name, Self::terminal(u)).with_probability(p))
                .collect(),
        }
    }
}

/// Expected utility of one option of the root decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionValue {
    pub name: String,
    pub expected_utility: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prior: Option<f64>,
}

/// The choice made at one decision node, addressed by its path from the
/// root (`root/option/outcome/...`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStep {
    pub decision: String,
    pub choice: String,
    pub expected_utility: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    /// Chosen option at the root, when the root is a decision.
    pub best_choice: Option<String>,
    pub expected_utility: f64,
    /// Every root option with its expected utility, in declaration order.
    pub options: Vec<OptionValue>,
    /// Choices at every decision node, depth first.
    pub policy: Vec<PolicyStep>,
}

/// Validate the tree and evaluate it by backward induction.
pub fn evaluate(tree: &DecisionNode) -> DecideResult<Evaluation> {
    let mut policy = Vec::new();
    let expected_utility = induct(tree, "root", &mut policy)?;

    let (best_choice, options) = match tree {
        DecisionNode::Decision { options } => {
            let values = options
                .iter()
                .map(|b| {
                    let path = format!("root/{}", b.name);
                    Ok(OptionValue {
                        name: b.name.clone(),
                        expected_utility: induct(&b.node, &path, &mut Vec::new())?,
                        prior: b.probability,
                    })
                })
                .collect::<DecideResult<Vec<_>>>()?;
            let best = policy.first().map(|step| step.choice.clone());
            (best, values)
        }
        _ => (None, Vec::new()),
    };

    tracing::info!(
        best_choice = best_choice.as_deref().unwrap_or("-"),
        expected_utility,
        decisions = policy.len(),
        "decision tree evaluated"
    );
    Ok(Evaluation {
        best_choice,
        expected_utility,
        options,
        policy,
    })
}

fn induct(node: &DecisionNode, path: &str, policy: &mut Vec<PolicyStep>) -> DecideResult<f64> {
    match node {
        DecisionNode::Terminal { utility } => {
            if utility.is_finite() {
                Ok(*utility)
            } else {
                Err(DecideError::InvalidUtility {
                    node: path.to_string(),
                })
            }
        }
        DecisionNode::Chance { outcomes } => {
            if outcomes.is_empty() {
                return Err(DecideError::EmptyNode {
                    node: path.to_string(),
                });
            }
            let mut sum = 0.0;
            let mut eu = 0.0;
            for b in outcomes {
                let child = format!("{path}/{}", b.name);
                let p = b.probability.ok_or_else(|| DecideError::MissingProbability {
                    node: child.clone(),
                })?;
                check_probability(&child, p)?;
                sum += p;
                eu += p * induct(&b.node, &child, policy)?;
            }
            if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
                return Err(DecideError::ProbabilitiesDoNotSum {
                    node: path.to_string(),
                    sum,
                });
            }
            Ok(eu)
        }
        DecisionNode::Decision { options } => {
            // Reserve this node's slot so the policy reads top-down.
            let slot = policy.len();
            policy.push(PolicyStep {
                decision: path.to_string(),
                choice: String::new(),
                expected_utility: f64::NEG_INFINITY,
            });
            let mut best: Option<(&str, f64)> = None;
            for b in options {
                let child = format!("{path}/{}", b.name);
                if let Some(prior) = b.probability {
                    check_probability(&child, prior)?;
                }
                let eu = induct(&b.node, &child, policy)?;
                if best.is_none_or(|(_, top)| eu > top) {
                    best = Some((b.name.as_str(), eu));
                }
            }
            let (choice, eu) = best.ok_or_else(|| DecideError::EmptyNode {
                node: path.to_string(),
            })?;
            policy[slot].choice = choice.to_string();
            policy[slot].expected_utility = eu;
            Ok(eu)
        }
    }
}

fn check_probability(node: &str, probability: f64) -> DecideResult<()> {
    if (0.0..=1.0).contains(&probability) {
        Ok(())
    } else {
        Err(DecideError::InvalidProbability {
            node: node.to_string(),
            probability,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framework_choice() -> DecisionNode {
        DecisionNode::Decision {
            options: vec![
                Branch::new(
                    "Flask",
                    DecisionNode::lottery(&[("success", 0.95, 8.0), ("issues", 0.05, 3.0)]),
                )
                .with_probability(0.9),
                Branch::new(
                    "FastAPI",
                    DecisionNode::lottery(&[("success", 0.8, 9.0), ("issues", 0.2, 2.0)]),
                )
                .with_probability(0.1),
            ],
        }
    }

    #[test]
    fn picks_highest_expected_utility() {
        let eval = evaluate(&framework_choice()).unwrap();
        assert_eq!(eval.best_choice.as_deref(), Some("Flask"));
        assert!((eval.expected_utility - 7.75).abs() < 1e-12);
        assert_eq!(eval.options.len(), 2);
        assert!((eval.options[0].expected_utility - 7.75).abs() < 1e-12);
        assert!((eval.options[1].expected_utility - 7.6).abs() < 1e-12);
        assert_eq!(eval.options[0].prior, Some(0.9));
    }

    #[test]
    fn deserializes_by_shape() {
        let tree: DecisionNode = serde_json::from_str(
            r#"{"options": [
                {"name": "Flask", "probability": 0.9, "outcomes": [
                    {"name": "success", "probability": 0.95, "utility": 8},
                    {"name": "issues", "probability": 0.05, "utility": 3}]},
                {"name": "FastAPI", "probability": 0.1, "outcomes": [
                    {"name": "success", "probability": 0.8, "utility": 9},
                    {"name": "issues", "probability": 0.2, "utility": 2}]}]}"#,
        )
        .unwrap();
        assert_eq!(tree, framework_choice());
    }

    #[test]
    fn nested_decisions_build_a_policy() {
        let tree = DecisionNode::Decision {
            options: vec![
                Branch::new("wait", DecisionNode::terminal(5.0)),
                Branch::new(
                    "launch",
                    DecisionNode::Chance {
                        outcomes: vec![
                            Branch::new(
                                "bug",
                                DecisionNode::Decision {
                                    options: vec![
                                        Branch::new("hotfix", DecisionNode::terminal(4.0)),
                                        Branch::new("rollback", DecisionNode::terminal(2.0)),
                                    ],
                                },
                            )
                            .with_probability(0.5),
                            Branch::new("clean", DecisionNode::terminal(10.0)).with_probability(0.5),
                        ],
                    },
                ),
            ],
        };
        let eval = evaluate(&tree).unwrap();
        assert_eq!(eval.best_choice.as_deref(), Some("launch"));
        assert_eq!(eval.expected_utility, 7.0);
        assert_eq!(eval.policy.len(), 2);
        assert_eq!(eval.policy[0].decision, "root");
        assert_eq!(eval.policy[1].decision, "root/launch/bug");
        assert_eq!(eval.policy[1].choice, "hotfix");
    }

    #[test]
    fn ties_go_to_the_first_option() {
        let tree = DecisionNode::Decision {
            options: vec![
                Branch::new("a", DecisionNode::terminal(1.0)),
                Branch::new("b", DecisionNode::terminal(1.0)),
            ],
        };
        assert_eq!(evaluate(&tree).unwrap().best_choice.as_deref(), Some("a"));
    }

    #[test]
    fn malformed_trees_are_rejected() {
        let bad_sum = DecisionNode::lottery(&[("x", 0.5, 1.0), ("y", 0.4, 1.0)]);
        assert!(matches!(
            evaluate(&bad_sum),
            Err(DecideError::ProbabilitiesDoNotSum { .. })
        ));

        let out_of_range = DecisionNode::lottery(&[("x", 1.5, 1.0), ("y", -0.5, 1.0)]);
        assert!(matches!(
            evaluate(&out_of_range),
            Err(DecideError::InvalidProbability { .. })
        ));

        let empty = DecisionNode::Decision { options: vec![] };
        assert!(matches!(evaluate(&empty), Err(DecideError::EmptyNode { .. })));

        let missing = DecisionNode::Chance {
            outcomes: vec![Branch::new("x", DecisionNode::terminal(1.0))],
        };
        assert!(matches!(
            evaluate(&missing),
            Err(DecideError::MissingProbability { .. })
        ));
    }
}
