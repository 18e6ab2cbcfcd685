//! The forge collaborator: pull requests, comments, commits and users.
//!
//! The orchestrator only talks to `ForgeClient`; `GitHubClient` is the
//! REST adapter used by the binary.

pub mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::GitHubClient;

/// Pull request state as seen by the gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub author: String,
    pub base_commit: String,
    /// `owner:branch`
    pub base_label: String,
    pub base_owner: String,
    pub base_repo: String,
    pub body: String,
    /// Number of commits in the pull request
    pub commits: u32,
    pub has_comments: bool,
    pub head_commit: String,
    /// `owner:branch`
    pub head_label: String,
    pub mergeable: bool,
    pub number: u64,
    pub pull_request_url: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrComment {
    pub author: String,
    pub body: String,
    pub pr_number: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
    /// Forge account linked to the address, if any
    pub login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    pub sha: String,
    pub author: CommitIdentity,
    pub committer: CommitIdentity,
    pub message: String,
    pub parent_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForgeUser {
    pub login: String,
    pub name: Option<String>,
    /// Public email, if the user chose to show one
    pub email: Option<String>,
    pub user_type: String,
}

/// Pull request fields that can be rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullRequestField {
    Body,
    Title,
}

impl PullRequestField {
    pub fn as_str(self) -> &'static str {
        match self {
            PullRequestField::Body => "body",
            PullRequestField::Title => "title",
        }
    }
}

#[async_trait]
pub trait ForgeClient: Send + Sync {
    async fn get_pr_info(&self, pr_number: u64) -> anyhow::Result<PullRequestInfo>;

    async fn get_pr_comment(&self, comment_id: u64) -> anyhow::Result<PrComment>;

    async fn get_pr_commits(&self, pr_number: u64) -> anyhow::Result<Vec<CommitRecord>>;

    async fn get_user_info(&self, login: &str) -> anyhow::Result<ForgeUser>;

    /// Returns the URL of the new comment.
    async fn add_pr_comment(&self, pr_number: u64, text: &str) -> anyhow::Result<String>;

    async fn update_pr(
        &self,
        pr_number: u64,
        field: PullRequestField,
        value: &str,
    ) -> anyhow::Result<()>;
}
