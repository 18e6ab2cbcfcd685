//! The PR-level gate: checks every pull request must pass before it can be
//! mailed, and the comments explaining each failure.

use crate::bridge_config::PolicySection;
use crate::github::{CommitRecord, PullRequestInfo};
use crate::lint::{self, CommitPolicyLinter, LintDiagnostic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisallowedAddress {
    pub sha: String,
    /// `author` or `committer`
    pub role: &'static str,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateFailure {
    TooManyCommits { count: u32, max: u32 },
    /// Shas of the commits with more than one parent
    MergeCommits(Vec<String>),
    DisallowedEmails(Vec<DisallowedAddress>),
    Lint {
        sha: String,
        diagnostics: Vec<LintDiagnostic>,
    },
}

impl GateFailure {
    fn label(&self) -> &'static str {
        match self {
            GateFailure::TooManyCommits { .. } => "too many commits",
            GateFailure::MergeCommits(_) => "merge commits",
            GateFailure::DisallowedEmails(_) => "disallowed email addresses",
            GateFailure::Lint { .. } => "commit message lint",
        }
    }

    pub fn comment(&self) -> String {
        match self {
            GateFailure::TooManyCommits { count, max } => format!(
                "The pull request has {} commits. The max allowed is {}. \
                 Please split the patch series into multiple pull requests. \
                 Also consider squashing related commits.",
                count, max
            ),
            GateFailure::MergeCommits(shas) => {
                let mut text =
                    String::from("There are merge commits in this pull request:\n\n");
                for sha in shas {
                    text.push_str(&format!("    {}\n", sha));
                }
                text.push_str("\nPlease rebase the branch to remove these commits.");
                text
            }
            GateFailure::DisallowedEmails(addresses) => {
                let mut text = String::from(
                    "Some commits use email addresses that cannot receive mail:\n\n",
                );
                for address in addresses {
                    text.push_str(&format!(
                        "    {} ({}): {}\n",
                        address.sha, address.role, address.email
                    ));
                }
                text.push_str(
                    "\nPlease rewrite these commits with a real email address \
                     (`git commit --amend --reset-author`).",
                );
                text
            }
            GateFailure::Lint { sha, diagnostics } => lint::render_report(sha, diagnostics),
        }
    }
}

/// Outcome of the gate for one pull request.
#[derive(Debug, Clone, Default)]
pub struct GateReport {
    pub failures: Vec<GateFailure>,
    /// Commits with only non-blocking diagnostics
    pub warnings: Vec<(String, Vec<LintDiagnostic>)>,
}

impl GateReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// Distinct failure kinds, comma separated.
    pub fn summary(&self) -> String {
        let mut labels: Vec<&str> = Vec::new();
        for failure in &self.failures {
            let label = failure.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels.join(", ")
    }

    /// One comment per failure, then one per commit with warnings.
    pub fn comments(&self) -> Vec<String> {
        self.failures
            .iter()
            .map(GateFailure::comment)
            .chain(
                self.warnings
                    .iter()
                    .map(|(sha, diagnostics)| lint::render_report(sha, diagnostics)),
            )
            .collect()
    }
}

/// Commit count comes from the PR info so oversized PRs never list commits.
pub fn check_commit_count(pr: &PullRequestInfo, policy: &PolicySection) -> Option<GateFailure> {
    (pr.commits > policy.max_commits).then(|| GateFailure::TooManyCommits {
        count: pr.commits,
        max: policy.max_commits,
    })
}

pub fn check_commits(
    commits: &[CommitRecord],
    policy: &PolicySection,
    linter: &CommitPolicyLinter,
) -> GateReport {
    let mut report = GateReport::default();

    let merges: Vec<String> = commits
        .iter()
        .filter(|commit| commit.parent_count > 1)
        .map(|commit| commit.sha.clone())
        .collect();
    if !merges.is_empty() {
        report.failures.push(GateFailure::MergeCommits(merges));
    }

    let mut disallowed = Vec::new();
    for commit in commits {
        for (role, identity) in [("author", &commit.author), ("committer", &commit.committer)] {
            if policy.is_disallowed_email(&identity.email) {
                disallowed.push(DisallowedAddress {
                    sha: commit.sha.clone(),
                    role,
                    email: identity.email.clone(),
                });
            }
        }
    }
    if !disallowed.is_empty() {
        report.failures.push(GateFailure::DisallowedEmails(disallowed));
    }

    for commit in commits {
        let diagnostics = linter.validate(commit);
        if diagnostics.is_empty() {
            continue;
        }
        if lint::has_errors(&diagnostics) {
            report.failures.push(GateFailure::Lint {
                sha: commit.sha.clone(),
                diagnostics,
            });
        } else {
            report.warnings.push((commit.sha.clone(), diagnostics));
        }
    }

    report
}
