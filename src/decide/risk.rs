//! Risk register aggregation. Entries are ranked, never optimized.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::DecideError;

use super::DecideResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEntry {
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub probability: f64,
    pub impact: f64,
    /// Reference to a mitigation plan or operator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

impl RiskEntry {
    pub fn new(id: impl Into<String>, probability: f64, impact: f64) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            probability,
            impact,
            mitigation: None,
        }
    }

    pub fn mitigated_by(mut self, mitigation: impl Into<String>) -> Self {
        self.mitigation = Some(mitigation.into());
        self
    }

    pub fn exposure(&self) -> f64 {
        self.probability * self.impact
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedRisk {
    /// 1-based position by exposure.
    pub rank: usize,
    pub id: String,
    pub probability: f64,
    pub impact: f64,
    pub exposure: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mitigation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskReport {
    /// Highest exposure first; equal exposures keep register order.
    pub ranked: Vec<RankedRisk>,
    pub total_exposure: f64,
    /// Ids without a mitigation, in ranked order.
    pub unmitigated: Vec<String>,
}

/// Validate and rank the register by exposure (probability x impact).
pub fn assess(risks: &[RiskEntry]) -> DecideResult<RiskReport> {
    let mut ids = HashSet::new();
    for r in risks {
        let invalid = |message: String| DecideError::InvalidRisk {
            id: r.id.clone(),
            message,
        };
        if !ids.insert(r.id.as_str()) {
            return Err(invalid("duplicate id".into()));
        }
        if !(0.0..=1.0).contains(&r.probability) {
            return Err(invalid(format!("probability {} outside [0, 1]", r.probability)));
        }
        if !r.impact.is_finite() || r.impact < 0.0 {
            return Err(invalid(format!("impact {} must be finite and non-negative", r.impact)));
        }
    }

    let mut ordered: Vec<&RiskEntry> = risks.iter().collect();
    ordered.sort_by(|a, b| b.exposure().total_cmp(&a.exposure()));

    let ranked: Vec<RankedRisk> = ordered
        .into_iter()
        .enumerate()
        .map(|(i, r)| RankedRisk {
            rank: i + 1,
            id: r.id.clone(),
            probability: r.probability,
            impact: r.impact,
            exposure: r.exposure(),
            mitigation: r.mitigation.clone(),
        })
        .collect();
    let report = RiskReport {
        total_exposure: ranked.iter().map(|r| r.exposure).sum(),
        unmitigated: ranked
            .iter()
            .filter(|r| r.mitigation.is_none())
            .map(|r| r.id.clone())
            .collect(),
        ranked,
    };
    tracing::info!(
        risks = report.ranked.len(),
        total_exposure = report.total_exposure,
        unmitigated = report.unmitigated.len(),
        "risk register assessed"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranks_by_exposure_with_stable_ties() {
        let report = assess(&[
            RiskEntry::new("scope_creep", 0.5, 4.0).mitigated_by("freeze_requirements"),
            RiskEntry::new("key_person", 0.2, 10.0),
            RiskEntry::new("outage", 0.1, 30.0),
            RiskEntry::new("typo", 0.9, 0.1),
        ])
        .unwrap();
        let ids: Vec<&str> = report.ranked.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["outage", "scope_creep", "key_person", "typo"]);
        assert_eq!(report.ranked[0].rank, 1);
        assert!((report.total_exposure - 7.09).abs() < 1e-9);
        assert_eq!(report.unmitigated, vec!["outage", "key_person", "typo"]);
    }

    #[test]
    fn rejects_invalid_entries() {
        assert!(assess(&[RiskEntry::new("x", 1.2, 1.0)]).is_err());
        assert!(assess(&[RiskEntry::new("x", 0.5, -1.0)]).is_err());
        assert!(
            assess(&[RiskEntry::new("x", 0.5, 1.0), RiskEntry::new("x", 0.1, 1.0)]).is_err()
        );
        assert!(assess(&[]).unwrap().ranked.is_empty());
    }
}
