//! Matter risk scoring from the matter's findings.
//!
//! Score is 0..=100. Conflicts and unreviewed critical findings weigh most;
//! established values add a small residual exposure for high-impact facts.

use serde::{Deserialize, Serialize};

use crate::model::{FindingStatus, Impact, PipelineFinding};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub key: String,
    pub label: String,
    pub count: usize,
    pub contribution: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub score: f64,
    pub factors: Vec<RiskFactor>,
}

fn impact_weight(impact: Impact) -> f64 {
    match impact {
        Impact::Critical => 25.0,
        Impact::High => 12.0,
        Impact::Medium => 5.0,
        Impact::Low => 2.0,
        Impact::Info => 0.0,
    }
}

struct Bucket {
    key: &'static str,
    label: &'static str,
    count: usize,
    contribution: f64,
}

/// Scores a matter from all of its findings.
pub fn score(findings: &[PipelineFinding]) -> RiskAssessment {
    let mut buckets = [
        Bucket {
            key: "conflicts",
            label: "Conflicting values",
            count: 0,
            contribution: 0.0,
        },
        Bucket {
            key: "unreviewed_critical",
            label: "Critical findings awaiting review",
            count: 0,
            contribution: 0.0,
        },
        Bucket {
            key: "pending_review",
            label: "Findings awaiting review",
            count: 0,
            contribution: 0.0,
        },
        Bucket {
            key: "established_exposure",
            label: "High-impact established facts",
            count: 0,
            contribution: 0.0,
        },
    ];

    for finding in findings {
        let weight = impact_weight(finding.impact);
        let (idx, share) = match (finding.status, finding.impact) {
            (FindingStatus::Conflict, _) => (0, 1.0),
            (FindingStatus::Pending, Impact::Critical) => (1, 0.8),
            (FindingStatus::Pending, _) => (2, 0.3),
            (FindingStatus::Accepted | FindingStatus::AutoApplied, Impact::Critical | Impact::High) => {
                (3, 0.1)
            }
            _ => continue,
        };
        buckets[idx].count += 1;
        buckets[idx].contribution += weight * share;
    }

    let total: f64 = buckets.iter().map(|b| b.contribution).sum();
    let mut factors: Vec<RiskFactor> = buckets
        .iter()
        .filter(|b| b.count > 0)
        .map(|b| RiskFactor {
            key: b.key.to_string(),
            label: b.label.to_string(),
            count: b.count,
            contribution: round1(b.contribution),
        })
        .collect();
    factors.sort_by(|a, b| b.contribution.total_cmp(&a.contribution));

    RiskAssessment {
        score: round1(total.min(100.0)),
        factors,
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}
