//! Finding and FindingSet types
//!
//! A Finding is one candidate issue extracted from recon output. Findings are
//! immutable once parsed; a FindingSet keeps them in the order they appeared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a candidate privilege-escalation issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SuidBinary,
    WritableCron,
    KernelCve,
    CredentialLeak,
    MisconfiguredService,
    Other,
}

impl Category {
    /// Human-readable label used in prompts and reports
    pub fn label(&self) -> &'static str {
        match self {
            Category::SuidBinary => "SUID binary",
            Category::WritableCron => "writable cron",
            Category::KernelCve => "kernel CVE marker",
            Category::CredentialLeak => "credential leak",
            Category::MisconfiguredService => "misconfigured service",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// How strongly the recon tool itself flagged the finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    /// The tool marked the line as an exploitable vector
    Confirmed,
    /// Flagged as interesting, not marked exploitable
    Possible,
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::Confirmed => f.write_str("Confirmed"),
            Confidence::Possible => f.write_str("Possible"),
        }
    }
}

/// One structured candidate issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub category: Category,
    /// Originating line, escape codes stripped
    pub evidence: String,
    /// 1-based line number in the raw recon output
    pub line: usize,
    /// Tool section the line appeared under, if any
    pub section: Option<String>,
    pub confidence: Confidence,
}

impl Finding {
    pub fn new(
        category: Category,
        evidence: impl Into<String>,
        line: usize,
        section: Option<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            category,
            evidence: evidence.into(),
            line,
            section,
            confidence,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.confidence == Confidence::Confirmed
    }
}

/// Ordered findings from a single recon pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingSet {
    findings: Vec<Finding>,
}

impl FindingSet {
    pub fn new(findings: Vec<Finding>) -> Self {
        Self { findings }
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Finding> {
        self.findings.iter()
    }

    /// Finding by its index in appearance order
    pub fn get(&self, index: usize) -> Option<&Finding> {
        self.findings.get(index)
    }

    pub fn confirmed_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_confirmed()).count()
    }

    /// Findings ranked for display: Confirmed first, appearance order as tie-breaker
    pub fn ranked(&self) -> Vec<(usize, &Finding)> {
        let mut ranked: Vec<(usize, &Finding)> = self.findings.iter().enumerate().collect();
        // sort_by_key is stable, so equal confidence keeps appearance order
        ranked.sort_by_key(|(_, f)| !f.is_confirmed());
        ranked
    }
}

impl<'a> IntoIterator for &'a FindingSet {
    type Item = &'a Finding;
    type IntoIter = std::slice::Iter<'a, Finding>;

    fn into_iter(self) -> Self::IntoIter {
        self.findings.iter()
    }
}
