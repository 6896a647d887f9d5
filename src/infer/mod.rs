//! Knowledge base and rule inference.
//!
//! Rules are data, not code: an antecedent conjunction of [`Literal`]s and a
//! positive consequent [`Atom`], loaded from a document or parsed from the
//! `IF .. AND .. THEN ..` text form. Two strategies run over them:
//!
//! - [`forward::forward_chain`] saturates a fact set to a fixpoint.
//! - [`backward::prove`] proves a single goal and returns its proof tree.

pub mod backward;
pub mod forward;
pub mod index;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InferError, ParseError};
use crate::fact::{Atom, Fact, FactSet, Literal};

pub use backward::{Justification, Proof, prove};
pub use forward::{Derivation, Inference, forward_chain};
pub use index::RuleIndex;

/// Result type for inference operations.
pub type InferResult<T> = std::result::Result<T, InferError>;

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// An IF-antecedent THEN-consequent implication. Immutable once loaded.
///
/// Deserializes from either the text form or `{ name, if, then }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RuleRepr")]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "if")]
    pub antecedent: Vec<Literal>,
    #[serde(rename = "then")]
    pub consequent: Atom,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RuleRepr {
    Text(String),
    Structured {
        #[serde(default)]
        name: Option<String>,
        #[serde(rename = "if", alias = "when", default)]
        antecedent: Vec<Literal>,
        #[serde(rename = "then")]
        consequent: Atom,
    },
}

impl TryFrom<RuleRepr> for Rule {
    type Error = ParseError;

    fn try_from(repr: RuleRepr) -> Result<Self, Self::Error> {
        match repr {
            RuleRepr::Text(text) => Rule::parse(&text),
            RuleRepr::Structured {
                name,
                antecedent,
                consequent,
            } => Ok(Rule {
                name,
                antecedent,
                consequent,
            }),
        }
    }
}

impl Rule {
    pub fn new(antecedent: Vec<Literal>, consequent: Atom) -> Self {
        Self {
            name: None,
            antecedent,
            consequent,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse `IF a(?x) AND not b(?x) THEN c(?x)`.
    ///
    /// `->` / `=>` may replace `THEN`, `&` may replace `AND`, and the leading
    /// `IF` is optional. Keywords are case-insensitive.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let err = |message: &str| ParseError {
            input: text.to_string(),
            message: message.to_string(),
        };
        let trimmed = text.trim();
        let (body, head) = split_keyword(trimmed, &[" THEN ", "->", "=>"])
            .ok_or_else(|| err("missing THEN / -> between antecedent and consequent"))?;

        let body = body.trim();
        let body = if body.len() >= 3 && body[..3].eq_ignore_ascii_case("IF ") {
            &body[3..]
        } else {
            body
        };

        let mut antecedent = Vec::new();
        let mut rest = body.trim();
        while !rest.is_empty() {
            let (part, tail) = match split_keyword(rest, &[" AND ", "&&", "&"]) {
                Some((part, tail)) => (part, tail),
                None => (rest, ""),
            };
            antecedent.push(part.parse::<Literal>()?);
            rest = tail.trim();
        }

        let consequent: Literal = head.parse()?;
        if consequent.negated {
            return Err(err("consequents cannot be negated"));
        }
        Ok(Rule::new(antecedent, consequent.atom))
    }

    /// Name used in derivations and diagnostics.
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("rule#{index}"))
    }

    /// Check that every consequent / negated variable is bound positively.
    pub fn validate(&self, index: usize) -> InferResult<()> {
        let bound: Vec<&str> = self
            .antecedent
            .iter()
            .filter(|l| !l.negated)
            .flat_map(|l| l.atom.variables())
            .collect();
        let needs = self
            .consequent
            .variables()
            .into_iter()
            .chain(
                self.antecedent
                    .iter()
                    .filter(|l| l.negated)
                    .flat_map(|l| l.atom.variables()),
            );
        for var in needs {
            if !bound.contains(&var) {
                return Err(InferError::UnsafeRule {
                    rule: self.label(index),
                    variable: var.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Predicates of the positive antecedent literals.
    pub fn positive_predicates(&self) -> impl Iterator<Item = &str> {
        self.antecedent
            .iter()
            .filter(|l| !l.negated)
            .map(|l| l.atom.predicate.as_str())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IF ")?;
        for (i, lit) in self.antecedent.iter().enumerate() {
            if i > 0 {
                write!(f, " AND ")?;
            }
            write!(f, "{lit}")?;
        }
        write!(f, " THEN {}", self.consequent)
    }
}

/// Split at the first occurrence of any separator (ASCII case-insensitive).
fn split_keyword<'a>(text: &'a str, separators: &[&str]) -> Option<(&'a str, &'a str)> {
    let upper = text.to_ascii_uppercase();
    separators
        .iter()
        .filter_map(|sep| upper.find(sep).map(|pos| (pos, sep.len())))
        .min_by_key(|&(pos, _)| pos)
        .map(|(pos, len)| (&text[..pos], &text[pos + len..]))
}

/// Validate a whole rule set.
pub fn validate_rules(rules: &[Rule]) -> InferResult<()> {
    rules
        .iter()
        .enumerate()
        .try_for_each(|(i, rule)| rule.validate(i))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Which inference strategy to run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferMode {
    /// Saturate the fact set.
    Forward,
    /// Prove one ground goal.
    Backward { goal: Atom },
}

/// Tunables for an inference call.
#[derive(Debug, Clone, Default)]
pub struct InferOptions {
    /// Caller cap on productive forward-chaining passes; the natural bound
    /// applies when this is `None` or larger.
    pub max_passes: Option<usize>,
}

/// Outcome of [`infer`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceOutcome {
    Forward(Inference),
    /// `None` when the goal is not provable.
    Backward(Option<Proof>),
}

impl InferenceOutcome {
    /// Facts newly established by this call.
    pub fn derived_facts(&self) -> FactSet {
        match self {
            Self::Forward(inference) => inference.derived_facts(),
            Self::Backward(Some(proof)) => proof.facts(),
            Self::Backward(None) => FactSet::new(),
        }
    }
}

/// `infer(facts, rules, mode) -> derived_facts`.
pub fn infer(
    facts: &FactSet,
    rules: &[Rule],
    mode: &InferMode,
    options: &InferOptions,
) -> InferResult<InferenceOutcome> {
    match mode {
        InferMode::Forward => {
            forward_chain(facts, rules, options.max_passes).map(InferenceOutcome::Forward)
        }
        InferMode::Backward { goal } => prove(goal, facts, rules).map(InferenceOutcome::Backward),
    }
}

impl Proof {
    /// Every fact appearing as a premise or conclusion of this proof.
    pub fn facts(&self) -> FactSet {
        let mut out = FactSet::new();
        let mut stack = vec![self];
        while let Some(proof) = stack.pop() {
            out.insert(proof.goal.clone());
            if let Justification::Rule { premises, .. } = &proof.justification {
                stack.extend(premises.iter());
            }
        }
        out
    }
}

/// Convenience for tests and callers holding text.
pub fn parse_facts<'a>(items: impl IntoIterator<Item = &'a str>) -> Result<FactSet, ParseError> {
    items.into_iter().map(str::parse::<Fact>).collect()
}
