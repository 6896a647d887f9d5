//! The compiled document: every section a query can read, in one value.
//!
//! Section names are the upper-case keys of the on-disk form (`FACTS`,
//! `RULES`, `VARIABLES`, ...). Every section is optional; a query that needs
//! one that is absent reports it by name. Documents load from JSON or TOML,
//! picked by file extension.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::csp::{Constraint, Domain, Variable};
use crate::decide::{DecisionNode, RiskEntry};
use crate::error::LoadError;
use crate::fact::FactSet;
use crate::infer::Rule;
use crate::plan::{Operator, PlanProblem};
use crate::schedule::{Activity, Objective, Precedence, Resource, ScheduleProblem};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct CompiledDocument {
    pub facts: FactSet,
    pub rules: Vec<Rule>,
    /// Declared as a list of `{ name, domain }` or a map from name to domain.
    #[serde(deserialize_with = "variables", skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<Variable>,
    pub constraints: Vec<Constraint>,
    pub soft_constraints: Vec<Constraint>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<String>,
    pub operators: Vec<Operator>,
    pub initial_state: FactSet,
    pub goal_state: FactSet,
    pub resources: Vec<Resource>,
    pub activities: Vec<Activity>,
    pub precedence: Vec<Precedence>,
    pub objective_function: Objective,
    pub schedule_constraints: Vec<Constraint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_tree: Option<DecisionNode>,
    pub risks: Vec<RiskEntry>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VariablesRepr {
    List(Vec<Variable>),
    Map(IndexMap<String, Domain>),
}

fn variables<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<Variable>, D::Error> {
    Ok(match VariablesRepr::deserialize(de)? {
        VariablesRepr::List(list) => list,
        VariablesRepr::Map(map) => map
            .into_iter()
            .map(|(name, domain)| Variable::new(name, domain))
            .collect(),
    })
}

/// On-disk encoding, chosen from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Toml,
}

impl Format {
    /// `.toml` is TOML; everything else is read as JSON.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

impl CompiledDocument {
    /// Load a document from a JSON or TOML file.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path).map_err(|e| LoadError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let doc = Self::parse(&content, Format::from_path(path)).map_err(|message| {
            LoadError::Parse {
                path: path.display().to_string(),
                message,
            }
        })?;
        tracing::debug!(path = %path.display(), sections = ?doc.sections(), "document loaded");
        Ok(doc)
    }

    /// Parse document text in the given format.
    pub fn parse(content: &str, format: Format) -> Result<Self, String> {
        match format {
            Format::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
            Format::Toml => toml::from_str(content).map_err(|e| e.to_string()),
        }
    }

    /// Save the document, encoding by the path's extension.
    pub fn save(&self, path: &Path) -> Result<(), LoadError> {
        let content = match Format::from_path(path) {
            Format::Json => serde_json::to_string_pretty(self).map_err(|e| e.to_string()),
            Format::Toml => toml::to_string_pretty(self).map_err(|e| e.to_string()),
        }
        .map_err(|message| LoadError::Parse {
            path: path.display().to_string(),
            message,
        })?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
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

    /// Names of the non-empty sections, in document order.
    pub fn sections(&self) -> Vec<&'static str> {
        let present = [
            ("FACTS", !self.facts.is_empty()),
            ("RULES", !self.rules.is_empty()),
            ("VARIABLES", !self.variables.is_empty()),
            ("CONSTRAINTS", !self.constraints.is_empty()),
            ("SOFT_CONSTRAINTS", !self.soft_constraints.is_empty()),
            ("OBJECTS", !self.objects.is_empty()),
            ("OPERATORS", !self.operators.is_empty()),
            ("INITIAL_STATE", !self.initial_state.is_empty()),
            ("GOAL_STATE", !self.goal_state.is_empty()),
            ("RESOURCES", !self.resources.is_empty()),
            ("ACTIVITIES", !self.activities.is_empty()),
            ("PRECEDENCE", !self.precedence.is_empty()),
            (
                "OBJECTIVE_FUNCTION",
                self.objective_function != Objective::default(),
            ),
            ("SCHEDULE_CONSTRAINTS", !self.schedule_constraints.is_empty()),
            ("DECISION_TREE", self.decision_tree.is_some()),
            ("RISKS", !self.risks.is_empty()),
        ];
        present
            .into_iter()
            .filter_map(|(name, here)| here.then_some(name))
            .collect()
    }

    pub fn plan_problem(&self) -> PlanProblem<'_> {
        PlanProblem {
            initial: &self.initial_state,
            goal: &self.goal_state,
            operators: &self.operators,
            objects: &self.objects,
            rules: &self.rules,
        }
    }

    pub fn schedule_problem(&self) -> ScheduleProblem<'_> {
        ScheduleProblem {
            activities: &self.activities,
            resources: &self.resources,
            precedence: &self.precedence,
            objective: &self.objective_function,
            constraints: &self.schedule_constraints,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csp::Value;

    const DOC: &str = r#"{
        "FACTS": ["bird(tweety)", "penguin(pingu)", "bird(pingu)"],
        "RULES": ["IF bird(?x) AND not penguin(?x) THEN flies(?x)"],
        "VARIABLES": {"x": {"min": 0, "max": 9}, "colour": ["red", "green"]},
        "CONSTRAINTS": ["x > 3"],
        "ACTIVITIES": [
            {"name": "A", "duration": 4},
            {"name": "B", "duration": 8, "predecessors": ["A"]}
        ],
        "RISKS": [{"id": "outage", "probability": 0.1, "impact": 30}]
    }"#;

    #[test]
    fn parses_sections_by_upper_case_name() {
        let doc = CompiledDocument::parse(DOC, Format::Json).unwrap();
        assert_eq!(doc.facts.len(), 3);
        assert_eq!(doc.rules.len(), 1);
        assert_eq!(doc.variables[0].name, "x");
        assert_eq!(doc.variables[0].domain, Domain::range(0, 9));
        assert_eq!(
            doc.variables[1].domain,
            Domain::Values(vec![Value::Sym("red".into()), Value::Sym("green".into())])
        );
        assert_eq!(doc.activities[1].predecessors, vec!["A"]);
        assert!(doc.decision_tree.is_none());
        assert_eq!(
            doc.sections(),
            vec!["FACTS", "RULES", "VARIABLES", "CONSTRAINTS", "ACTIVITIES", "RISKS"]
        );
    }

    #[test]
    fn empty_document_is_valid() {
        let doc = CompiledDocument::parse("{}", Format::Json).unwrap();
        assert!(doc.sections().is_empty());
        let doc = CompiledDocument::parse("", Format::Toml).unwrap();
        assert_eq!(doc, CompiledDocument::default());
    }

    #[test]
    fn toml_and_json_files_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let doc = CompiledDocument::parse(DOC, Format::Json).unwrap();
        for name in ["doc.json", "nested/doc.toml"] {
            let path = dir.path().join(name);
            doc.save(&path).unwrap();
            assert_eq!(CompiledDocument::load(&path).unwrap(), doc);
        }
    }

    #[test]
    fn load_errors_carry_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            CompiledDocument::load(&missing),
            Err(LoadError::Read { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "FACTS = [").unwrap();
        match CompiledDocument::load(&broken) {
            Err(LoadError::Parse { path, .. }) => assert!(path.ends_with("broken.toml")),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
