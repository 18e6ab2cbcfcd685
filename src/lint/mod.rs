//! Commit message policy.
//!
//! A small fixed rule set applied to every commit of a pull request before it
//! may be mailed. Error diagnostics fail the gate; warnings are only reported.

use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

use crate::github::CommitRecord;

// `scope: Subject` where the subject starts with a capitalized word.
// Acronyms (`doc: API ...`) do not match.
static CAPITALIZED_AFTER_SCOPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s:]+:\s+[A-Z][a-z]").unwrap());

pub const TOO_SHORT: &str = "Commit checks stopped - the message is too short";
pub const MISSING_EMPTY_LINE: &str =
    "Commit checks stopped - add an empty line after the subject line";
pub const WRONG_CASE: &str =
    "Prefixed commit message subject lines should continue with a lower case letter";
pub const TRAILING_PERIOD: &str = "The subject line should not end with a period";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintDiagnostic {
    pub severity: Severity,
    pub message: String,
}

impl LintDiagnostic {
    fn error(message: &str) -> Self {
        Self {
            severity: Severity::Error,
            message: message.to_string(),
        }
    }

    fn warning(message: &str) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for LintDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "{}", self.message),
            Severity::Warning => write!(f, "(warning) {}", self.message),
        }
    }
}

pub struct CommitPolicyLinter {
    /// Fewer lines than this means there is no room for a description.
    min_message_lines: usize,
}

impl Default for CommitPolicyLinter {
    fn default() -> Self {
        Self::new(3)
    }
}

impl CommitPolicyLinter {
    pub fn new(min_message_lines: usize) -> Self {
        Self { min_message_lines }
    }

    pub fn validate(&self, commit: &CommitRecord) -> Vec<LintDiagnostic> {
        self.validate_message(&commit.message)
    }

    pub fn validate_message(&self, message: &str) -> Vec<LintDiagnostic> {
        let lines: Vec<&str> = message.trim_end().lines().collect();
        let subject = lines.first().map(|line| line.trim()).unwrap_or_default();

        if subject.is_empty() || lines.len() < self.min_message_lines {
            return vec![LintDiagnostic::error(TOO_SHORT)];
        }
        if lines.get(1).is_some_and(|line| !line.trim().is_empty()) {
            return vec![LintDiagnostic::error(MISSING_EMPTY_LINE)];
        }

        let mut diagnostics = Vec::new();
        if CAPITALIZED_AFTER_SCOPE.is_match(subject) {
            diagnostics.push(LintDiagnostic::error(WRONG_CASE));
        }
        if subject.ends_with('.') && !subject.ends_with("...") {
            diagnostics.push(LintDiagnostic::warning(TRAILING_PERIOD));
        }
        diagnostics
    }
}

/// True if any diagnostic fails the gate.
pub fn has_errors(diagnostics: &[LintDiagnostic]) -> bool {
    diagnostics.iter().any(LintDiagnostic::is_error)
}

/// One comment body for the diagnostics of one commit.
pub fn render_report(sha: &str, diagnostics: &[LintDiagnostic]) -> String {
    let mut report = format!("There are issues in commit {}:\n", sha);
    for diagnostic in diagnostics {
        report.push_str(&format!("{}\n", diagnostic));
    }
    report
}
