//! Backward chaining: reason from a goal back to supporting facts.
//!
//! Given a ground goal, finds rules whose consequent unifies with it and
//! recursively proves their antecedents left to right. A free antecedent
//! variable is bound against asserted facts and ground rule heads; when a
//! rule with variables in its head concludes the predicate, the variable
//! also ranges over the constants of the knowledge base and each candidate
//! is proven as its own goal. Negated antecedents hold when their atom
//! cannot be proven.
//!
//! A goal that reappears on its own open proof stack is a circular
//! dependency. The search keeps trying alternative rules; only if the goal
//! stays unproven is the cycle reported as an error.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;

use crate::error::InferError;
use crate::fact::{Atom, Bindings, Fact, FactSet, Literal};

use super::{InferResult, Rule, RuleIndex, validate_rules};

/// How a proven fact is justified.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Justification {
    /// Present in the fact set.
    Asserted,
    /// Concluded by a rule from sub-proofs.
    Rule {
        rule: String,
        premises: Vec<Proof>,
        /// Ground atoms of negated antecedents shown unprovable.
        absent: Vec<Fact>,
    },
}

/// A proof tree for one fact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proof {
    pub goal: Fact,
    pub justification: Justification,
}

impl Proof {
    /// Height of the proof tree (asserted facts have depth 0).
    pub fn depth(&self) -> usize {
        match &self.justification {
            Justification::Asserted => 0,
            Justification::Rule { premises, .. } => {
                1 + premises.iter().map(Proof::depth).max().unwrap_or(0)
            }
        }
    }
}

/// Prove `goal` from `facts` and `rules`.
///
/// Returns `Ok(None)` when the goal is not provable, and
/// [`InferError::CircularDependency`] when the only routes to it loop.
pub fn prove(goal: &Atom, facts: &FactSet, rules: &[Rule]) -> InferResult<Option<Proof>> {
    validate_rules(rules)?;
    let goal = goal
        .ground(&Bindings::new())
        .ok_or_else(|| InferError::NonGroundQuery {
            query: goal.to_string(),
        })?;

    let mut prover = Prover::new(facts, rules);
    let proof = prover.prove_goal(&goal);
    match (proof, prover.first_cycle) {
        (Some(proof), _) => {
            tracing::info!(goal = %goal, depth = proof.depth(), "backward chaining proved goal");
            Ok(Some(proof))
        }
        (None, Some(cycle)) => {
            tracing::info!(goal = %goal, cycle_len = cycle.len(), "backward chaining hit a cycle");
            Err(InferError::CircularDependency { cycle })
        }
        (None, None) => {
            tracing::info!(goal = %goal, "goal not provable");
            Ok(None)
        }
    }
}

/// Per-query proof state.
struct Prover<'a> {
    facts: &'a FactSet,
    index: RuleIndex<'a>,
    labels: Vec<String>,
    /// Constants of the facts and rules, sorted.
    universe: Vec<String>,
    /// Goals whose proof is in progress, outermost first.
    stack: Vec<Fact>,
    proven: HashMap<Fact, Proof>,
    /// Goals that failed without touching a cycle.
    refuted: HashSet<Fact>,
    first_cycle: Option<Vec<Fact>>,
    cycle_hits: usize,
    /// Nesting depth of proofs started from a universe grounding. Cycles met
    /// there only mean that grounding fails; they are not reported.
    speculative: usize,
}

impl<'a> Prover<'a> {
    fn new(facts: &'a FactSet, rules: &'a [Rule]) -> Self {
        Self {
            facts,
            index: RuleIndex::new(rules),
            labels: rules.iter().enumerate().map(|(i, r)| r.label(i)).collect(),
            universe: universe(facts, rules),
            stack: Vec::new(),
            proven: HashMap::new(),
            refuted: HashSet::new(),
            first_cycle: None,
            cycle_hits: 0,
            speculative: 0,
        }
    }

    fn prove_goal(&mut self, goal: &Fact) -> Option<Proof> {
        if self.facts.contains(goal) {
            return Some(Proof {
                goal: goal.clone(),
                justification: Justification::Asserted,
            });
        }
        if let Some(proof) = self.proven.get(goal) {
            return Some(proof.clone());
        }
        if self.refuted.contains(goal) {
            return None;
        }
        if let Some(pos) = self.stack.iter().position(|g| g == goal) {
            self.cycle_hits += 1;
            if self.first_cycle.is_none() && self.speculative == 0 {
                let mut cycle = self.stack[pos..].to_vec();
                cycle.push(goal.clone());
                self.first_cycle = Some(cycle);
            }
            return None;
        }

        let hits_before = self.cycle_hits;
        self.stack.push(goal.clone());
        let candidates: Vec<(usize, &'a Rule)> =
            self.index.concluding(&goal.predicate).collect();

        let mut found = None;
        for (i, rule) in candidates {
            let Some(bindings) = rule.consequent.match_fact(goal, &Bindings::new()) else {
                continue;
            };
            if let Some((premises, absent)) = self.prove_body(&rule.antecedent, 0, bindings) {
                found = Some(Proof {
                    goal: goal.clone(),
                    justification: Justification::Rule {
                        rule: self.labels[i].clone(),
                        premises,
                        absent,
                    },
                });
                break;
            }
        }
        self.stack.pop();

        match &found {
            Some(proof) => {
                self.proven.insert(goal.clone(), proof.clone());
            }
            None if self.cycle_hits == hits_before => {
                self.refuted.insert(goal.clone());
            }
            None => {}
        }
        found
    }

    /// Prove positive literals from `at` onwards, then the negated ones.
    fn prove_body(
        &mut self,
        body: &[Literal],
        at: usize,
        bindings: Bindings,
    ) -> Option<(Vec<Proof>, Vec<Fact>)> {
        let Some(offset) = body[at..].iter().position(|l| !l.negated) else {
            return self.check_negations(body, &bindings);
        };
        let pos = at + offset;
        let pattern = body[pos].atom.substitute(&bindings);

        if let Some(fact) = pattern.ground(&bindings) {
            let proof = self.prove_goal(&fact)?;
            let (mut premises, absent) = self.prove_body(body, pos + 1, bindings)?;
            premises.insert(0, proof);
            return Some((premises, absent));
        }

        for (extended, grounded) in self.candidate_bindings(&pattern, &bindings) {
            let Some(fact) = pattern.ground(&extended) else {
                continue;
            };
            self.speculative += usize::from(grounded);
            let proof = self.prove_goal(&fact);
            self.speculative -= usize::from(grounded);
            let Some(proof) = proof else {
                continue;
            };
            if let Some((mut premises, absent)) = self.prove_body(body, pos + 1, extended) {
                premises.insert(0, proof);
                return Some((premises, absent));
            }
        }
        None
    }

    fn check_negations(
        &mut self,
        body: &[Literal],
        bindings: &Bindings,
    ) -> Option<(Vec<Proof>, Vec<Fact>)> {
        let mut absent = Vec::new();
        for literal in body.iter().filter(|l| l.negated) {
            let fact = literal.atom.ground(bindings)?;
            if self.prove_goal(&fact).is_some() {
                return None;
            }
            absent.push(fact);
        }
        Some((Vec::new(), absent))
    }

    /// Bindings for a non-ground pattern, deduplicated, in deterministic
    /// order: asserted facts, then ground rule heads, then (when an open
    /// rule head concludes the predicate) every grounding over the universe.
    /// The flag marks universe groundings.
    fn candidate_bindings(&self, pattern: &Atom, bindings: &Bindings) -> Vec<(Bindings, bool)> {
        let mut open_head = false;
        let heads: Vec<Fact> = self
            .index
            .concluding(&pattern.predicate)
            .filter_map(|(_, r)| {
                let head = r.consequent.ground(&Bindings::new());
                open_head |= head.is_none() && r.consequent.arity() == pattern.arity();
                head
            })
            .collect();
        let mut candidates: Vec<(Bindings, bool)> = self
            .facts
            .with_predicate(&pattern.predicate)
            .chain(&heads)
            .filter_map(|fact| pattern.match_fact(fact, bindings))
            .map(|b| (b, false))
            .collect();

        if open_head {
            let mut groundings = vec![bindings.clone()];
            for var in pattern.variables() {
                if bindings.contains_key(var) {
                    continue;
                }
                groundings = groundings
                    .into_iter()
                    .flat_map(|b| {
                        self.universe.iter().map(move |c| {
                            let mut next = b.clone();
                            next.insert(var.to_string(), c.clone());
                            next
                        })
                    })
                    .collect();
            }
            candidates.extend(groundings.into_iter().map(|b| (b, true)));
        }

        let mut seen: BTreeSet<Bindings> = BTreeSet::new();
        candidates.retain(|(b, _)| seen.insert(b.clone()));
        candidates
    }
}

fn universe(facts: &FactSet, rules: &[Rule]) -> Vec<String> {
    let mut constants: BTreeSet<String> = facts.constants();
    for rule in rules {
        constants.extend(rule.consequent.constants().map(str::to_string));
        for lit in &rule.antecedent {
            constants.extend(lit.atom.constants().map(str::to_string));
        }
    }
    constants.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infer::{forward_chain, parse_facts};

    fn parse_rules(texts: &[&str]) -> Vec<Rule> {
        texts.iter().map(|t| Rule::parse(t).unwrap()).collect()
    }

    fn goal(text: &str) -> Atom {
        text.parse().unwrap()
    }

    #[test]
    fn find_support_chain() {
        let facts = parse_facts(["tests_pass", "reviewed"]).unwrap();
        let rules = parse_rules(&[
            "IF tests_pass AND reviewed THEN mergeable",
            "IF mergeable THEN deployable",
        ]);
        let proof = prove(&goal("deployable"), &facts, &rules).unwrap().unwrap();
        assert_eq!(proof.depth(), 2);
        let Justification::Rule { rule, premises, .. } = &proof.justification else {
            panic!("expected rule justification");
        };
        assert_eq!(rule, "rule#1");
        assert_eq!(premises[0].goal, Fact::atom("mergeable"));
        assert!(proof.facts().contains(&Fact::atom("reviewed")));
    }

    #[test]
    fn binds_free_variables_from_facts() {
        let facts = parse_facts(["parent(ann, bob)", "parent(bob, cid)"]).unwrap();
        let rules = parse_rules(&["IF parent(?x, ?y) AND parent(?y, ?z) THEN grandparent(?x, ?z)"]);
        let proof = prove(&goal("grandparent(ann, cid)"), &facts, &rules).unwrap();
        assert!(proof.is_some());
        let none = prove(&goal("grandparent(bob, ann)"), &facts, &rules).unwrap();
        assert!(none.is_none());
    }

    fn ancestry() -> (FactSet, Vec<Rule>) {
        let facts = parse_facts(["parent(ann, bob)", "parent(bob, cid)", "parent(cid, dee)"]).unwrap();
        let rules = parse_rules(&[
            "IF parent(?x, ?y) THEN ancestor(?x, ?y)",
            "IF ancestor(?x, ?y) AND parent(?y, ?z) THEN ancestor(?x, ?z)",
        ]);
        (facts, rules)
    }

    #[test]
    fn proves_through_a_recursive_derived_predicate() {
        let (facts, rules) = ancestry();
        let proof = prove(&goal("ancestor(ann, dee)"), &facts, &rules)
            .unwrap()
            .unwrap();
        assert_eq!(proof.depth(), 3);
        let Justification::Rule { rule, premises, .. } = &proof.justification else {
            panic!("expected rule justification");
        };
        assert_eq!(rule, "rule#1");
        assert_eq!(premises[0].goal, Fact::new("ancestor", ["ann", "cid"]));
        assert_eq!(premises[1].goal, Fact::new("parent", ["cid", "dee"]));

        // Unprovable recursive queries fail quietly rather than as cycles.
        assert!(prove(&goal("ancestor(dee, ann)"), &facts, &rules).unwrap().is_none());
        assert!(prove(&goal("ancestor(bob, bob)"), &facts, &rules).unwrap().is_none());
    }

    #[test]
    fn agrees_with_forward_chaining() {
        let (mut facts, mut rules) = ancestry();
        facts.insert(Fact::new("bird", ["tweety"]));
        facts.insert(Fact::new("bird", ["pingu"]));
        facts.insert(Fact::new("penguin", ["pingu"]));
        rules.extend(parse_rules(&[
            "IF bird(?x) AND not penguin(?x) THEN flies(?x)",
            "IF flies(?x) AND ancestor(?y, ?z) THEN sky_family(?x, ?z)",
        ]));

        let forward = forward_chain(&facts, &rules, None).unwrap();
        assert!(!forward.derived.is_empty());
        for derivation in &forward.derived {
            let atom = derivation.fact.to_atom();
            let proof = prove(&atom, &facts, &rules).unwrap();
            assert!(proof.is_some(), "{} not provable backward", derivation.fact);
        }
        assert!(prove(&goal("flies(pingu)"), &facts, &rules).unwrap().is_none());
    }

    #[test]
    fn negation_as_failure() {
        let facts = parse_facts(["bird(tweety)", "bird(pingu)", "penguin(pingu)"]).unwrap();
        let rules = parse_rules(&["IF bird(?x) AND not penguin(?x) THEN flies(?x)"]);

        let proof = prove(&goal("flies(tweety)"), &facts, &rules).unwrap().unwrap();
        let Justification::Rule { absent, .. } = &proof.justification else {
            panic!("expected rule justification");
        };
        assert_eq!(absent, &vec![Fact::new("penguin", ["tweety"])]);

        assert!(prove(&goal("flies(pingu)"), &facts, &rules).unwrap().is_none());
    }

    #[test]
    fn circular_dependency_is_reported() {
        let facts = FactSet::new();
        let rules = parse_rules(&["IF q THEN p", "IF p THEN q"]);
        let err = prove(&goal("p"), &facts, &rules).unwrap_err();
        match err {
            InferError::CircularDependency { cycle } => {
                let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
                assert_eq!(names, vec!["p", "q", "p"]);
            }
            other => panic!("expected CircularDependency, got {other:?}"),
        }
    }

    #[test]
    fn cycle_with_alternative_route_still_proves() {
        let facts = parse_facts(["r"]).unwrap();
        let rules = parse_rules(&["IF q THEN p", "IF p THEN q", "IF r THEN p"]);
        let proof = prove(&goal("p"), &facts, &rules).unwrap();
        assert!(proof.is_some());
    }

    #[test]
    fn unprovable_goal_is_none_not_error() {
        let facts = parse_facts(["a"]).unwrap();
        let rules = parse_rules(&["IF b THEN c"]);
        assert!(prove(&goal("c"), &facts, &rules).unwrap().is_none());
    }

    #[test]
    fn non_ground_query_is_rejected() {
        let err = prove(&goal("p(?x)"), &FactSet::new(), &[]).unwrap_err();
        assert!(matches!(err, InferError::NonGroundQuery { .. }));
    }
}
