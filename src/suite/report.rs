//! Run reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{error::VerifyError, ledger::ResourceLeakWarning, protocol::ConformanceClass};

/// Result of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    /// Every assertion held.
    Passed,
    /// An assertion failed or a request could not be completed.
    Failed {
        /// Failure kind.
        kind: String,
        /// Expected and actual values.
        message: String,
    },
    /// A precondition was not met; nothing was sent.
    Skipped {
        /// Missing precondition.
        reason: String,
    },
}

impl Verdict {
    /// Verdict for a finished case body.
    #[must_use]
    pub fn from_result(result: &Result<(), VerifyError>) -> Self {
        match result {
            Ok(()) => Self::Passed,
            Err(VerifyError::Unsupported(reason)) => Self::Skipped { reason: reason.clone() },
            Err(err) => Self::Failed {
                kind: err.kind().to_owned(),
                message: err.to_string(),
            },
        }
    }

    /// Short label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passed => "PASS",
            Self::Failed { .. } => "FAIL",
            Self::Skipped { .. } => "SKIP",
        }
    }
}

/// Report of one test case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    /// Case name.
    pub name: String,
    /// Conformance class the case belongs to.
    pub class: ConformanceClass,
    /// Outcome.
    #[serde(flatten)]
    pub verdict: Verdict,
    /// Wall-clock time spent, in milliseconds.
    pub elapsed_ms: u64,
    /// Resources that could not be released afterwards.
    pub leaks: Vec<ResourceLeakWarning>,
}

impl CaseReport {
    /// Create a report.
    #[must_use]
    pub fn new(name: &str, class: ConformanceClass, verdict: Verdict, elapsed: Duration) -> Self {
        Self {
            name: name.to_owned(),
            class,
            verdict,
            elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            leaks: Vec::new(),
        }
    }
}

/// Report of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Per-case reports in execution order.
    pub cases: Vec<CaseReport>,
}

impl RunReport {
    /// Start an empty report now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            cases: Vec::new(),
        }
    }

    fn count(&self, label: &str) -> usize {
        self.cases.iter().filter(|c| c.verdict.label() == label).count()
    }

    /// Number of passed cases.
    #[must_use]
    pub fn passed(&self) -> usize { self.count("PASS") }

    /// Number of failed cases.
    #[must_use]
    pub fn failed(&self) -> usize { self.count("FAIL") }

    /// Number of skipped cases.
    #[must_use]
    pub fn skipped(&self) -> usize { self.count("SKIP") }

    /// Return `true` when any case failed.
    #[must_use]
    pub fn has_failures(&self) -> bool { self.failed() > 0 }

    /// Every leak warning of the run.
    pub fn leaks(&self) -> impl Iterator<Item = &ResourceLeakWarning> {
        self.cases.iter().flat_map(|c| c.leaks.iter())
    }

    /// Case report by name.
    #[must_use]
    pub fn case(&self, name: &str) -> Option<&CaseReport> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Render as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns the serialisation error, which only occurs for non-string map
    /// keys and therefore not for this type.
    pub fn to_json(&self) -> serde_json::Result<String> { serde_json::to_string_pretty(self) }

    /// Render as human-readable text.
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = format!("wfs-verify run started {}\n", self.started_at.to_rfc3339());
        for case in &self.cases {
            let detail = match &case.verdict {
                Verdict::Passed => String::new(),
                Verdict::Failed { kind, message } => format!(": {kind}: {message}"),
                Verdict::Skipped { reason } => format!(": {reason}"),
            };
            out.push_str(&format!(
                "{} {} [{}]{detail}\n",
                case.verdict.label(),
                case.name,
                case.class.short_name()
            ));
            for leak in &case.leaks {
                out.push_str(&format!("  warning: {leak}\n"));
            }
        }
        out.push_str(&format!(
            "{} passed, {} failed, {} skipped, {} leak warnings\n",
            self.passed(),
            self.failed(),
            self.skipped(),
            self.leaks().count()
        ));
        out
    }
}

impl Default for RunReport {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "test assertions")]

    use rstest::rstest;

    use super::*;
    use crate::ledger::ResourceKind;

    fn sample_report() -> RunReport {
        let mut report = RunReport::new();
        report.cases.push(CaseReport::new(
            "lock_all_conflict",
            ConformanceClass::LockingWfs,
            Verdict::Passed,
            Duration::from_millis(12),
        ));
        let mut failed = CaseReport::new(
            "duplicate_stored_query",
            ConformanceClass::ManageStoredQueries,
            Verdict::from_result(&Err(VerifyError::assertion("numberReturned", "1", "0"))),
            Duration::from_millis(3),
        );
        failed.leaks.push(ResourceLeakWarning {
            kind: ResourceKind::StoredQuery,
            id: "urn:example:q1".into(),
            reason: "status 500".into(),
        });
        report.cases.push(failed);
        report.cases.push(CaseReport::new(
            "paging_round_trip",
            ConformanceClass::ResultPaging,
            Verdict::from_result(&Err(VerifyError::unsupported("ImplementsResultPaging"))),
            Duration::ZERO,
        ));
        report
    }

    #[rstest]
    fn counts_verdicts() {
        let report = sample_report();
        assert_eq!((report.passed(), report.failed(), report.skipped()), (1, 1, 1));
        assert!(report.has_failures());
        assert_eq!(report.leaks().count(), 1);
    }

    #[rstest]
    fn text_lists_every_case() {
        let text = sample_report().to_text();
        assert!(text.contains("PASS lock_all_conflict"));
        assert!(text.contains("FAIL duplicate_stored_query"));
        assert!(text.contains("SKIP paging_round_trip"));
        assert!(text.contains("warning: stored query urn:example:q1"));
    }

    #[rstest]
    fn json_tags_verdicts() {
        let json = sample_report().to_json().expect("json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse");
        let cases = value.get("cases").and_then(|c| c.as_array()).expect("cases");
        let verdicts: Vec<_> = cases
            .iter()
            .filter_map(|c| c.get("verdict").and_then(|v| v.as_str()))
            .collect();
        assert_eq!(verdicts, vec!["passed", "failed", "skipped"]);
        assert!(value.get("started_at").is_some());
    }
}
