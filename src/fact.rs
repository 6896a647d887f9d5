//! Core fact types for the praxis engine.
//!
//! A [`Fact`] is a ground proposition: a predicate name with ordered constant
//! arguments, written `name` or `name(a, b)`. Rules and operators work over
//! [`Atom`] patterns whose [`Term`]s may be variables (`?x`), optionally
//! negated as a [`Literal`]. Matching a conjunction of literals against a
//! [`FactSet`] produces [`Bindings`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Variable name → bound constant.
pub type Bindings = BTreeMap<String, String>;

// ---------------------------------------------------------------------------
// Fact
// ---------------------------------------------------------------------------

/// A ground proposition.
///
/// Ordering is by predicate first, so all facts of one predicate are
/// contiguous inside a [`FactSet`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fact {
    /// Predicate name.
    pub predicate: String,
    /// Constant arguments.
    pub args: Vec<String>,
}

impl Fact {
    /// Create a fact from a predicate and arguments.
    pub fn new<I, S>(predicate: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            predicate: predicate.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// A fact with no arguments.
    pub fn atom(predicate: impl Into<String>) -> Self {
        Self {
            predicate: predicate.into(),
            args: Vec::new(),
        }
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Lift this fact into a (ground) pattern.
    pub fn to_atom(&self) -> Atom {
        Atom {
            predicate: self.predicate.clone(),
            terms: self.args.iter().cloned().map(Term::Const).collect(),
        }
    }
}

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.predicate)?;
        if !self.args.is_empty() {
            write!(f, "({})", self.args.join(", "))?;
        }
        Ok(())
    }
}

impl FromStr for Fact {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let atom: Atom = s.parse()?;
        atom.ground(&Bindings::new()).ok_or_else(|| ParseError {
            input: s.to_string(),
            message: "facts must be ground; variables are only allowed in rules and operators"
                .into(),
        })
    }
}

impl TryFrom<String> for Fact {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fact> for String {
    fn from(fact: Fact) -> Self {
        fact.to_string()
    }
}

// ---------------------------------------------------------------------------
// FactSet
// ---------------------------------------------------------------------------

/// A set of facts with set semantics.
///
/// Backed by a `BTreeSet`, so iteration is deterministic and equal sets hash
/// equally (the planner keys its visited set on this).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSet(BTreeSet<Fact>);

impl FactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fact. Returns `true` if it was not already present.
    pub fn insert(&mut self, fact: Fact) -> bool {
        self.0.insert(fact)
    }

    pub fn remove(&mut self, fact: &Fact) -> bool {
        self.0.remove(fact)
    }

    pub fn contains(&self, fact: &Fact) -> bool {
        self.0.contains(fact)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact> {
        self.0.iter()
    }

    /// All facts with the given predicate, in order.
    pub fn with_predicate<'a>(&'a self, predicate: &'a str) -> impl Iterator<Item = &'a Fact> + 'a {
        let start = Fact::atom(predicate);
        self.0
            .range(start..)
            .take_while(move |f| f.predicate == predicate)
    }

    /// Whether every fact of `other` is in `self`.
    pub fn is_superset(&self, other: &FactSet) -> bool {
        self.0.is_superset(&other.0)
    }

    /// Facts of `other` missing from `self`, in order.
    pub fn missing<'a>(&'a self, other: &'a FactSet) -> impl Iterator<Item = &'a Fact> + 'a {
        other.0.difference(&self.0)
    }

    /// Every constant appearing as an argument.
    pub fn constants(&self) -> BTreeSet<String> {
        self.0.iter().flat_map(|f| f.args.iter().cloned()).collect()
    }
}

impl FromIterator<Fact> for FactSet {
    fn from_iter<T: IntoIterator<Item = Fact>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<Fact> for FactSet {
    fn extend<T: IntoIterator<Item = Fact>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for FactSet {
    type Item = Fact;
    type IntoIter = std::collections::btree_set::IntoIter<Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a FactSet {
    type Item = &'a Fact;
    type IntoIter = std::collections::btree_set::Iter<'a, Fact>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FactSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, fact) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{fact}")?;
        }
        write!(f, "}}")
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// A term in a pattern: constant or variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Term {
    Const(String),
    /// Variable name without the leading `?`.
    Var(String),
}

impl Term {
    /// Parse a term token. Variables start with `?`.
    pub fn parse(token: &str) -> Result<Self, String> {
        let token = token.trim();
        if let Some(var) = token.strip_prefix('?') {
            if !is_identifier(var) {
                return Err(format!("invalid variable name '?{var}'"));
            }
            Ok(Self::Var(var.to_string()))
        } else if is_identifier(token) {
            Ok(Self::Const(token.to_string()))
        } else {
            Err(format!("invalid term '{token}'"))
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Resolve against bindings: constants resolve to themselves.
    pub fn resolve<'a>(&'a self, bindings: &'a Bindings) -> Option<&'a str> {
        match self {
            Self::Const(c) => Some(c),
            Self::Var(v) => bindings.get(v).map(String::as_str),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(c) => write!(f, "{c}"),
            Self::Var(v) => write!(f, "?{v}"),
        }
    }
}

/// A predicate applied to terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Atom {
    pub predicate: String,
    pub terms: Vec<Term>,
}

impl Atom {
    pub fn new(predicate: impl Into<String>, terms: Vec<Term>) -> Self {
        Self {
            predicate: predicate.into(),
            terms,
        }
    }

    pub fn arity(&self) -> usize {
        self.terms.len()
    }

    pub fn is_ground(&self) -> bool {
        !self.terms.iter().any(Term::is_variable)
    }

    /// Variable names in order of first appearance.
    pub fn variables(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for term in &self.terms {
            if let Term::Var(v) = term {
                if !seen.contains(&v.as_str()) {
                    seen.push(v.as_str());
                }
            }
        }
        seen
    }

    /// Instantiate into a fact if every variable is bound.
    pub fn ground(&self, bindings: &Bindings) -> Option<Fact> {
        let args = self
            .terms
            .iter()
            .map(|t| t.resolve(bindings).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;
        Some(Fact {
            predicate: self.predicate.clone(),
            args,
        })
    }

    /// Replace bound variables, leaving unbound ones in place.
    pub fn substitute(&self, bindings: &Bindings) -> Atom {
        Atom {
            predicate: self.predicate.clone(),
            terms: self
                .terms
                .iter()
                .map(|t| match t {
                    Term::Var(v) => bindings
                        .get(v)
                        .map(|c| Term::Const(c.clone()))
                        .unwrap_or_else(|| t.clone()),
                    Term::Const(_) => t.clone(),
                })
                .collect(),
        }
    }

    /// Match against a ground fact, extending `bindings`.
    pub fn match_fact(&self, fact: &Fact, bindings: &Bindings) -> Option<Bindings> {
        if self.predicate != fact.predicate || self.terms.len() != fact.args.len() {
            return None;
        }
        let mut out = bindings.clone();
        for (term, value) in self.terms.iter().zip(&fact.args) {
            match term {
                Term::Const(c) if c == value => {}
                Term::Const(_) => return None,
                Term::Var(v) => match out.get(v) {
                    Some(bound) if bound == value => {}
                    Some(_) => return None,
                    None => {
                        out.insert(v.clone(), value.clone());
                    }
                },
            }
        }
        Some(out)
    }

    /// Constants mentioned by this pattern.
    pub fn constants(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|t| match t {
            Term::Const(c) => Some(c.as_str()),
            Term::Var(_) => None,
        })
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.predicate)?;
        if !self.terms.is_empty() {
            write!(f, "(")?;
            for (i, t) in self.terms.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{t}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl FromStr for Atom {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |message: String| ParseError {
            input: s.to_string(),
            message,
        };
        let text = s.trim();
        let (name, terms) = match text.find('(') {
            Some(open) => {
                let inner = text[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| err("missing closing ')'".into()))?;
                let terms = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner
                        .split(',')
                        .map(Term::parse)
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(err)?
                };
                (text[..open].trim(), terms)
            }
            None => (text, Vec::new()),
        };
        if !is_identifier(name) {
            return Err(err(format!("invalid predicate name '{name}'")));
        }
        Ok(Atom::new(name, terms))
    }
}

impl TryFrom<String> for Atom {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Atom> for String {
    fn from(atom: Atom) -> Self {
        atom.to_string()
    }
}

/// An atom or its negation (negation-as-failure).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Literal {
    pub atom: Atom,
    pub negated: bool,
}

impl Literal {
    pub fn positive(atom: Atom) -> Self {
        Self {
            atom,
            negated: false,
        }
    }

    pub fn negative(atom: Atom) -> Self {
        Self {
            atom,
            negated: true,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            write!(f, "not ")?;
        }
        write!(f, "{}", self.atom)
    }
}

impl FromStr for Literal {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let negated_rest = text
            .strip_prefix("not ")
            .or_else(|| text.strip_prefix('!'))
            .or_else(|| text.strip_prefix('¬'));
        match negated_rest {
            Some(rest) => Ok(Literal::negative(rest.parse()?)),
            None => Ok(Literal::positive(text.parse()?)),
        }
    }
}

impl TryFrom<String> for Literal {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Literal> for String {
    fn from(literal: Literal) -> Self {
        literal.to_string()
    }
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':' | '/' | '@'))
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Join the positive literals of a conjunction against `facts`.
///
/// Returns every binding set (extending `seed`) under which all positive
/// literals hold. Negated literals are ignored here; see [`negations_hold`].
pub fn join_positive(literals: &[Literal], facts: &FactSet, seed: Bindings) -> Vec<Bindings> {
    let mut frontier = vec![seed];
    for literal in literals.iter().filter(|l| !l.negated) {
        let mut next = Vec::new();
        for bindings in &frontier {
            let pattern = literal.atom.substitute(bindings);
            if let Some(fact) = pattern.ground(bindings) {
                if facts.contains(&fact) {
                    next.push(bindings.clone());
                }
                continue;
            }
            for fact in facts.with_predicate(&pattern.predicate) {
                if let Some(extended) = pattern.match_fact(fact, bindings) {
                    next.push(extended);
                }
            }
        }
        if next.is_empty() {
            return next;
        }
        frontier = next;
    }
    frontier
}

/// Check the negated literals of a conjunction under `bindings`.
///
/// Returns `None` if a negated literal still has unbound variables.
pub fn negations_hold(literals: &[Literal], facts: &FactSet, bindings: &Bindings) -> Option<bool> {
    for literal in literals.iter().filter(|l| l.negated) {
        let fact = literal.atom.ground(bindings)?;
        if facts.contains(&fact) {
            return Some(false);
        }
    }
    Some(true)
}

/// All binding sets under which the whole conjunction holds.
pub fn satisfying_bindings(literals: &[Literal], facts: &FactSet) -> Vec<Bindings> {
    join_positive(literals, facts, Bindings::new())
        .into_iter()
        .filter(|b| negations_hold(literals, facts, b) == Some(true))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(items: &[&str]) -> FactSet {
        items.iter().map(|s| s.parse::<Fact>().unwrap()).collect()
    }

    #[test]
    fn parse_and_display_roundtrip_text() {
        let fact: Fact = "at(robot, room_1)".parse().unwrap();
        assert_eq!(fact.predicate, "at");
        assert_eq!(fact.args, vec!["robot", "room_1"]);
        assert_eq!(fact.to_string(), "at(robot, room_1)");

        let bare: Fact = "has_file".parse().unwrap();
        assert_eq!(bare.arity(), 0);
        assert_eq!(bare.to_string(), "has_file");
    }

    #[test]
    fn facts_reject_variables() {
        assert!("at(?r, room)".parse::<Fact>().is_err());
        assert!("at(robot".parse::<Fact>().is_err());
        assert!("".parse::<Fact>().is_err());
    }

    #[test]
    fn literal_negation_forms() {
        for text in ["not has_file", "!has_file", "¬has_file"] {
            let lit: Literal = text.parse().unwrap();
            assert!(lit.negated, "{text}");
            assert_eq!(lit.atom.predicate, "has_file");
        }
        let pos: Literal = "nothing_here".parse().unwrap();
        assert!(!pos.negated, "'not' prefix requires a space");
    }

    #[test]
    fn with_predicate_is_contiguous() {
        let set = facts(&["a(1)", "b(1)", "b(2)", "c"]);
        let bs: Vec<String> = set.with_predicate("b").map(|f| f.to_string()).collect();
        assert_eq!(bs, vec!["b(1)", "b(2)"]);
        assert_eq!(set.with_predicate("z").count(), 0);
    }

    #[test]
    fn join_binds_shared_variables() {
        let set = facts(&["parent(ann, bob)", "parent(bob, cid)", "parent(bob, dee)"]);
        let lits: Vec<Literal> = vec![
            "parent(?x, ?y)".parse().unwrap(),
            "parent(?y, ?z)".parse().unwrap(),
        ];
        let results = satisfying_bindings(&lits, &set);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|b| b["x"] == "ann" && b["y"] == "bob"));
    }

    #[test]
    fn negation_filters_bindings() {
        let set = facts(&["bird(tweety)", "bird(pingu)", "penguin(pingu)"]);
        let lits: Vec<Literal> = vec![
            "bird(?x)".parse().unwrap(),
            "not penguin(?x)".parse().unwrap(),
        ];
        let results = satisfying_bindings(&lits, &set);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0]["x"], "tweety");
    }

    #[test]
    fn serde_uses_text_form() {
        let fact: Fact = serde_json::from_str("\"on(a, b)\"").unwrap();
        assert_eq!(fact, Fact::new("on", ["a", "b"]));
        assert_eq!(serde_json::to_string(&fact).unwrap(), "\"on(a, b)\"");
    }
}
