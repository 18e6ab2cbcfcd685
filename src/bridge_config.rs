//! Unified configuration for patchbridge.
//!
//! Reads `.patchbridge/bridge.toml` from the work repository. Every field has a
//! default, so a missing file is a valid configuration. Settings are layered
//! file → environment → CLI.
//!
//! # Configuration File Format
//!
//! ```toml
//! [project]
//! name = "PatchBridge"
//!
//! [notes]
//! notes_ref = "refs/notes/patchbridge"
//! mail_to_commit_ref = "refs/notes/mail-to-commit"
//! upstream_ref_prefix = "refs/remotes/upstream/"
//! mail_to_commit_remote = "https://github.com/example/project-notes"
//!
//! [policy]
//! max_commits = 30
//! disallowed_emails = ["*@users.noreply.github.com"]
//! min_message_lines = 3
//!
//! [github]
//! api_url = "https://api.github.com"
//! owner = "example"
//! repo = "project"
//! token_env = "GITHUB_TOKEN"
//!
//! [mail]
//! command = "./send-series"
//! timeout_secs = 120
//! archive_url = "https://lore.example.org/project"
//! ```

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Project-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSection {
    /// Name used in comments posted to pull requests
    #[serde(default = "default_project_name")]
    pub name: String,
}

fn default_project_name() -> String {
    "PatchBridge".to_string()
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: default_project_name(),
        }
    }
}

/// Where the metadata lives in the object graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotesSection {
    /// Ref holding general documents and commit notes
    #[serde(default = "default_notes_ref")]
    pub notes_ref: String,
    /// Ref holding the message-id → upstream commit mapping
    #[serde(default = "default_mail_to_commit_ref")]
    pub mail_to_commit_ref: String,
    /// Prefix turning a branch name into the upstream ref to search
    #[serde(default = "default_upstream_ref_prefix")]
    pub upstream_ref_prefix: String,
    /// Remote (URL or path) publishing the mail-to-commit ref; fetched
    /// before each upstream lookup when set
    #[serde(default)]
    pub mail_to_commit_remote: Option<String>,
}

fn default_notes_ref() -> String {
    "refs/notes/patchbridge".to_string()
}

fn default_mail_to_commit_ref() -> String {
    "refs/notes/mail-to-commit".to_string()
}

fn default_upstream_ref_prefix() -> String {
    "refs/remotes/upstream/".to_string()
}

impl Default for NotesSection {
    fn default() -> Self {
        Self {
            notes_ref: default_notes_ref(),
            mail_to_commit_ref: default_mail_to_commit_ref(),
            upstream_ref_prefix: default_upstream_ref_prefix(),
            mail_to_commit_remote: None,
        }
    }
}

/// Contribution policy enforced by the PR gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    /// Maximum number of commits in a single PR
    #[serde(default = "default_max_commits")]
    pub max_commits: u32,
    /// Glob patterns of author/committer addresses that cannot be mailed
    #[serde(default = "default_disallowed_emails")]
    pub disallowed_emails: Vec<String>,
    /// Minimum number of lines in a commit message
    #[serde(default = "default_min_message_lines")]
    pub min_message_lines: usize,
}

fn default_max_commits() -> u32 {
    30
}

fn default_disallowed_emails() -> Vec<String> {
    vec!["*@users.noreply.github.com".to_string()]
}

fn default_min_message_lines() -> usize {
    3
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            max_commits: default_max_commits(),
            disallowed_emails: default_disallowed_emails(),
            min_message_lines: default_min_message_lines(),
        }
    }
}

impl PolicySection {
    /// Whether an address matches one of the disallowed patterns.
    pub fn is_disallowed_email(&self, email: &str) -> bool {
        self.disallowed_emails
            .iter()
            .any(|pattern| pattern_matches(pattern, email))
    }
}

/// GitHub adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    /// Environment variable holding the API token
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

impl Default for GitHubSection {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            owner: None,
            repo: None,
            token_env: default_token_env(),
        }
    }
}

/// Mail adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailSection {
    /// Shell command composing and sending a series (JSON on stdin/stdout)
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,
    /// Mailing list archive; message ids are linked below it in comments
    #[serde(default)]
    pub archive_url: Option<String>,
}

fn default_mail_timeout() -> u64 {
    120
}

impl Default for MailSection {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_mail_timeout(),
            archive_url: None,
        }
    }
}

/// The complete bridge.toml configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BridgeToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub notes: NotesSection,
    #[serde(default)]
    pub policy: PolicySection,
    #[serde(default)]
    pub github: GitHubSection,
    #[serde(default)]
    pub mail: MailSection,
}

impl BridgeToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse bridge.toml")
    }

    /// Load `bridge.toml` from the given directory, or defaults if absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join("bridge.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Serialize the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize bridge.toml")
    }

    /// Apply environment overrides on top of the file settings.
    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("PATCHBRIDGE_MAX_COMMITS")
            && let Ok(max) = value.parse::<u32>()
        {
            self.policy.max_commits = max;
        }
        if let Ok(notes_ref) = std::env::var("PATCHBRIDGE_NOTES_REF")
            && !notes_ref.is_empty()
        {
            self.notes.notes_ref = notes_ref;
        }
        if let Ok(remote) = std::env::var("PATCHBRIDGE_MAIL_TO_COMMIT_REMOTE")
            && !remote.is_empty()
        {
            self.notes.mail_to_commit_remote = Some(remote);
        }
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.policy.max_commits == 0 {
            warnings.push("policy.max_commits is 0: every pull request will be rejected".to_string());
        }

        for (name, value) in [
            ("notes.notes_ref", &self.notes.notes_ref),
            ("notes.mail_to_commit_ref", &self.notes.mail_to_commit_ref),
        ] {
            if !value.starts_with("refs/") {
                warnings.push(format!("{} '{}' should start with 'refs/'", name, value));
            }
        }

        for pattern in &self.policy.disallowed_emails {
            if let Err(e) = Pattern::new(pattern) {
                warnings.push(format!(
                    "policy.disallowed_emails pattern '{}' is invalid: {}",
                    pattern, e
                ));
            }
        }

        if self.notes.notes_ref == self.notes.mail_to_commit_ref {
            warnings.push("notes.notes_ref and notes.mail_to_commit_ref are the same ref".to_string());
        }

        if self.github.owner.is_none() || self.github.repo.is_none() {
            warnings.push("github.owner and github.repo must be set to handle events".to_string());
        }

        warnings
    }
}

/// Check if a glob pattern matches a value, case-insensitively.
///
/// Invalid patterns match nothing; `validate` reports them.
pub fn pattern_matches(pattern: &str, value: &str) -> bool {
    let options = MatchOptions {
        case_sensitive: false,
        ..Default::default()
    };
    Pattern::new(pattern)
        .map(|pattern| pattern.matches_with(value, options))
        .unwrap_or(false)
}

/// Configuration combining bridge.toml with runtime settings.
///
/// Merges settings from:
/// 1. bridge.toml
/// 2. Environment variables
/// 3. CLI arguments
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Work repository holding the notes refs
    pub repo_dir: PathBuf,
    pub toml: BridgeToml,
}

impl BridgeConfig {
    /// Load configuration for a work repository.
    ///
    /// `config_path` overrides the default `.patchbridge/bridge.toml`.
    pub fn load(repo_dir: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        let repo_dir = repo_dir
            .canonicalize()
            .context("Failed to resolve repository directory")?;
        let mut toml = match config_path {
            Some(path) => BridgeToml::load(path)?,
            None => BridgeToml::load_or_default(&repo_dir.join(".patchbridge"))?,
        };
        toml.apply_env();

        Ok(Self { repo_dir, toml })
    }

    pub fn project_name(&self) -> &str {
        &self.toml.project.name
    }

    pub fn notes_ref(&self) -> &str {
        &self.toml.notes.notes_ref
    }

    pub fn mail_to_commit_ref(&self) -> &str {
        &self.toml.notes.mail_to_commit_ref
    }

    pub fn policy(&self) -> &PolicySection {
        &self.toml.policy
    }

    /// Resolve the GitHub token from the configured environment variable.
    pub fn github_token(&self) -> Result<String> {
        std::env::var(&self.toml.github.token_env).with_context(|| {
            format!(
                "GitHub token not found in environment variable {}",
                self.toml.github.token_env
            )
        })
    }

    /// `owner/repo` of the forge repository receiving pull requests.
    pub fn github_repository(&self) -> Result<(String, String)> {
        match (&self.toml.github.owner, &self.toml.github.repo) {
            (Some(owner), Some(repo)) => Ok((owner.clone(), repo.clone())),
            _ => anyhow::bail!("github.owner and github.repo must be set in bridge.toml"),
        }
    }
}
