//! Forward chaining: saturate a fact set to a fixpoint.
//!
//! Runs passes over the rules in declaration order. Within a pass a rule's
//! consequents are added as soon as it fires, so later rules in the same pass
//! already see them. Negated antecedents are evaluated against the fact set
//! as it stands when the rule is evaluated (negation-as-failure).
//!
//! A rule is only re-evaluated when one of its positive antecedent
//! predicates gained a fact since its last evaluation. Additions can only
//! make negated literals fail, so skipped rules have no new firings.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::error::InferError;
use crate::fact::{Fact, FactSet, satisfying_bindings};

use super::{InferResult, Rule, RuleIndex, validate_rules};

/// A single derived fact with the rule that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derivation {
    pub fact: Fact,
    pub rule: String,
    /// 1-based pass in which the fact was added.
    pub pass: usize,
    /// Ground positive antecedents that fired the rule.
    pub premises: Vec<Fact>,
}

/// Result of forward chaining.
#[derive(Debug, Clone, Serialize)]
pub struct Inference {
    /// Input facts plus everything derived.
    pub facts: FactSet,
    /// Derivations in the order they happened.
    pub derived: Vec<Derivation>,
    /// Passes run, including the final pass that confirmed the fixpoint.
    pub passes: usize,
}

impl Inference {
    /// Only the facts that were not part of the input.
    pub fn derived_facts(&self) -> FactSet {
        self.derived.iter().map(|d| d.fact.clone()).collect()
    }

    /// The derivation that introduced `fact`, if it was derived.
    pub fn derivation_of(&self, fact: &Fact) -> Option<&Derivation> {
        self.derived.iter().find(|d| &d.fact == fact)
    }
}

/// Natural bound on productive passes: `|rules| * facts_possible`.
///
/// `facts_possible` counts the input facts plus, per rule, the number of
/// ground instances its consequent can take over the constant universe.
pub fn pass_bound(facts: &FactSet, rules: &[Rule]) -> usize {
    let mut constants: BTreeSet<String> = facts.constants();
    for rule in rules {
        constants.extend(rule.consequent.constants().map(str::to_string));
        for lit in &rule.antecedent {
            constants.extend(lit.atom.constants().map(str::to_string));
        }
    }
    let universe = constants.len().max(1);
    let possible = rules.iter().fold(facts.len(), |acc, rule| {
        let vars = rule.consequent.variables().len() as u32;
        acc.saturating_add(universe.saturating_pow(vars))
    });
    rules.len().max(1).saturating_mul(possible.max(1))
}

/// Saturate `facts` under `rules`.
///
/// Fails with [`InferError::Stalled`] if more than the pass bound (or the
/// caller's `max_passes`, whichever is lower) productive passes run.
pub fn forward_chain(
    facts: &FactSet,
    rules: &[Rule],
    max_passes: Option<usize>,
) -> InferResult<Inference> {
    validate_rules(rules)?;

    let natural = pass_bound(facts, rules);
    let bound = max_passes.map_or(natural, |cap| cap.min(natural));
    let index = RuleIndex::new(rules);
    let labels: Vec<String> = rules.iter().enumerate().map(|(i, r)| r.label(i)).collect();

    let mut current = facts.clone();
    let mut derived: Vec<Derivation> = Vec::new();
    let mut dirty = vec![true; rules.len()];

    let mut productive = 0;
    let mut pass = 0;
    loop {
        pass += 1;
        let before = derived.len();

        for (i, rule) in rules.iter().enumerate() {
            if !dirty[i] {
                continue;
            }
            dirty[i] = false;

            for bindings in satisfying_bindings(&rule.antecedent, &current) {
                let Some(fact) = rule.consequent.ground(&bindings) else {
                    continue;
                };
                if current.contains(&fact) {
                    continue;
                }
                // Earlier firings in this loop may have added a negated atom.
                let blocked = rule
                    .antecedent
                    .iter()
                    .filter(|l| l.negated)
                    .filter_map(|l| l.atom.ground(&bindings))
                    .any(|f| current.contains(&f));
                if blocked {
                    continue;
                }
                let premises = rule
                    .antecedent
                    .iter()
                    .filter(|l| !l.negated)
                    .filter_map(|l| l.atom.ground(&bindings))
                    .collect();
                for &r in index.triggered_by(&fact.predicate) {
                    dirty[r] = true;
                }
                current.insert(fact.clone());
                derived.push(Derivation {
                    fact,
                    rule: labels[i].clone(),
                    pass,
                    premises,
                });
            }
        }

        let added = derived.len() - before;
        tracing::debug!(pass, added, total = current.len(), "forward chaining pass");
        if added == 0 {
            break;
        }
        productive += 1;
        if productive > bound {
            tracing::warn!(passes = pass, bound, "forward chaining stalled");
            return Err(InferError::Stalled {
                passes: pass,
                bound,
                facts: current,
            });
        }
    }

    tracing::info!(
        passes = pass,
        derived = derived.len(),
        facts = current.len(),
        "forward chaining reached fixpoint"
    );
    Ok(Inference {
        facts: current,
        derived,
        passes: pass,
    })
}
