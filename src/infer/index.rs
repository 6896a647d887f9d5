//! Predicate-keyed rule index.
//!
//! Rules are compiled once per call into two lookups: by consequent
//! predicate (backward chaining asks "which rules conclude `p`?") and by
//! positive antecedent predicate (forward chaining asks "which rules could
//! fire again now that `p` gained a fact?").

use std::collections::HashMap;

use super::Rule;

/// Index of a rule slice by predicate.
#[derive(Debug)]
pub struct RuleIndex<'a> {
    rules: &'a [Rule],
    by_consequent: HashMap<&'a str, Vec<usize>>,
    by_antecedent: HashMap<&'a str, Vec<usize>>,
}

impl<'a> RuleIndex<'a> {
    pub fn new(rules: &'a [Rule]) -> Self {
        let mut by_consequent: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut by_antecedent: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, rule) in rules.iter().enumerate() {
            by_consequent
                .entry(rule.consequent.predicate.as_str())
                .or_default()
                .push(i);
            for predicate in rule.positive_predicates() {
                let entry = by_antecedent.entry(predicate).or_default();
                if entry.last() != Some(&i) {
                    entry.push(i);
                }
            }
        }
        Self {
            rules,
            by_consequent,
            by_antecedent,
        }
    }

    pub fn rules(&self) -> &'a [Rule] {
        self.rules
    }

    /// Rules concluding `predicate`, in declaration order.
    pub fn concluding(&self, predicate: &str) -> impl Iterator<Item = (usize, &'a Rule)> + '_ {
        self.by_consequent
            .get(predicate)
            .into_iter()
            .flatten()
            .map(|&i| (i, &self.rules[i]))
    }

    /// Indices of rules with `predicate` in a positive antecedent literal.
    pub fn triggered_by(&self, predicate: &str) -> &[usize] {
        self.by_antecedent
            .get(predicate)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_groups_by_predicate_in_declaration_order() {
        let rules = vec![
            Rule::parse("IF a AND a2 THEN goal").unwrap(),
            Rule::parse("IF b THEN other").unwrap(),
            Rule::parse("IF c AND a THEN goal").unwrap(),
        ];
        let index = RuleIndex::new(&rules);

        let concluding: Vec<usize> = index.concluding("goal").map(|(i, _)| i).collect();
        assert_eq!(concluding, vec![0, 2]);
        assert_eq!(index.concluding("missing").count(), 0);

        assert_eq!(index.triggered_by("a"), &[0, 2]);
        assert_eq!(index.triggered_by("b"), &[1]);
        assert!(index.triggered_by("goal").is_empty());
    }
}
