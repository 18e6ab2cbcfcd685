//! Typed documents stored in the notes ref.
//!
//! Each document kind owns a key namespace:
//!
//! | Type                  | Key                         |
//! |-----------------------|-----------------------------|
//! | `GlobalConfig`        | `""`                        |
//! | `PatchSeriesMetadata` | pull request URL            |
//! | `PreviewMetadata`     | pull request URL + `#preview` |
//! | `MailMetadata`        | outbound message id         |
//!
//! Field names follow the JSON layout already present in existing notes refs.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Repository-wide settings, stored under the empty key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    #[serde(default)]
    pub allowed_users: Vec<String>,
    /// Fields written by other tools, preserved on rewrite
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl GlobalConfig {
    pub const KEY: &'static str = "";

    /// Forge logins are case-insensitive.
    pub fn is_allowed(&self, user: &str) -> bool {
        self.allowed_users
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(user))
    }

    /// Add a user. Returns `false` if the user was already allowed.
    ///
    /// Logins are stored lower-cased so that set merges of diverged notes
    /// cannot keep two spellings of one login.
    pub fn allow(&mut self, user: &str) -> bool {
        if self.is_allowed(user) {
            return false;
        }
        self.allowed_users.push(user.to_ascii_lowercase());
        true
    }

    /// Remove a user. Returns `false` if the user was not allowed.
    pub fn disallow(&mut self, user: &str) -> bool {
        let before = self.allowed_users.len();
        self.allowed_users
            .retain(|allowed| !allowed.eq_ignore_ascii_case(user));
        self.allowed_users.len() != before
    }
}

/// State of the submitted patch series of one pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchSeriesMetadata {
    #[serde(rename = "baseCommit")]
    pub base_commit: String,
    #[serde(rename = "baseLabel")]
    pub base_label: String,
    #[serde(rename = "headCommit")]
    pub head_commit: String,
    #[serde(rename = "headLabel")]
    pub head_label: String,
    /// Last submitted iteration, starting at 1
    pub iteration: u32,
    #[serde(
        rename = "coverLetterMessageId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub cover_letter_message_id: Option<String>,
    #[serde(rename = "pullRequestURL")]
    pub pull_request_url: String,
    #[serde(rename = "latestTag", default, skip_serializing_if = "Option::is_none")]
    pub latest_tag: Option<String>,
}

impl PatchSeriesMetadata {
    /// Iteration the next submission of this series will carry.
    pub fn next_iteration(current: Option<&Self>) -> u32 {
        current.map(|meta| meta.iteration + 1).unwrap_or(1)
    }
}

/// The last preview sent for a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewMetadata {
    /// Iteration being previewed (the next one to be submitted)
    pub iteration: u32,
    #[serde(rename = "headCommit")]
    pub head_commit: String,
    /// Bumped whenever a different head is previewed for the same iteration
    pub round: u32,
    pub tag: String,
    #[serde(rename = "messageID", default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl PreviewMetadata {
    pub fn key(pull_request_url: &str) -> String {
        format!("{}#preview", pull_request_url)
    }
}

/// Links one outbound mail to the commit it was generated from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMetadata {
    #[serde(rename = "messageID")]
    pub message_id: String,
    #[serde(rename = "originalCommit")]
    pub original_commit: String,
    #[serde(rename = "pullRequestURL")]
    pub pull_request_url: String,
    /// The commit as applied upstream, once known
    #[serde(
        rename = "commitInGitGit",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub commit_in_upstream: Option<String>,
}
