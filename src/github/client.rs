use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    CommitIdentity, CommitRecord, ForgeClient, ForgeUser, PrComment, PullRequestField,
    PullRequestInfo,
};
use crate::bridge_config::BridgeConfig;

const USER_AGENT: &str = "patchbridge";
const COMMITS_PER_PAGE: usize = 100;

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; says nothing about scopes or expiry.
pub fn is_valid_github_token(token: &str) -> bool {
    !token.is_empty()
        && GITHUB_TOKEN_PREFIXES
            .iter()
            .any(|prefix| token.starts_with(prefix))
}

/// Pull request number from an `issue_url` such as
/// `https://api.github.com/repos/o/r/issues/59`.
pub fn pr_number_from_issue_url(url: &str) -> Option<u64> {
    let (prefix, number) = url.trim_end_matches('/').rsplit_once('/')?;
    if !prefix.ends_with("/issues") && !prefix.ends_with("/pulls") {
        return None;
    }
    number.parse().ok()
}

// ── REST response shapes (subset of fields we care about) ─────────────

#[derive(Debug, Deserialize)]
struct RawUserRef {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    name: String,
    owner: RawUserRef,
}

#[derive(Debug, Deserialize)]
struct RawBranch {
    sha: String,
    label: String,
    repo: Option<RawRepo>,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    html_url: String,
    user: RawUserRef,
    base: RawBranch,
    head: RawBranch,
    /// `null` while GitHub is still computing it
    mergeable: Option<bool>,
    #[serde(default)]
    commits: u32,
    #[serde(default)]
    comments: u32,
    #[serde(default)]
    review_comments: u32,
}

impl RawPullRequest {
    fn into_info(self) -> anyhow::Result<PullRequestInfo> {
        let base_repo = self
            .base
            .repo
            .context("Pull request base repository is missing")?;
        Ok(PullRequestInfo {
            author: self.user.login,
            base_commit: self.base.sha,
            base_label: self.base.label,
            base_owner: base_repo.owner.login,
            base_repo: base_repo.name,
            body: self.body.unwrap_or_default(),
            commits: self.commits,
            has_comments: self.comments + self.review_comments > 0,
            head_commit: self.head.sha,
            head_label: self.head.label,
            mergeable: self.mergeable.unwrap_or(false),
            number: self.number,
            pull_request_url: self.html_url,
            title: self.title,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    user: RawUserRef,
    body: Option<String>,
    issue_url: String,
}

#[derive(Debug, Deserialize)]
struct RawGitIdentity {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct RawGitCommit {
    author: RawGitIdentity,
    committer: RawGitIdentity,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    sha: String,
    commit: RawGitCommit,
    author: Option<RawUserRef>,
    committer: Option<RawUserRef>,
    #[serde(default)]
    parents: Vec<serde_json::Value>,
}

impl From<RawCommit> for CommitRecord {
    fn from(raw: RawCommit) -> Self {
        CommitRecord {
            sha: raw.sha,
            author: CommitIdentity {
                name: raw.commit.author.name,
                email: raw.commit.author.email,
                login: raw.author.map(|user| user.login),
            },
            committer: CommitIdentity {
                name: raw.commit.committer.name,
                email: raw.commit.committer.email,
                login: raw.committer.map(|user| user.login),
            },
            message: raw.commit.message,
            parent_count: raw.parents.len() as u32,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
    name: Option<String>,
    email: Option<String>,
    #[serde(rename = "type")]
    user_type: String,
}

#[derive(Debug, Deserialize)]
struct RawCreatedComment {
    html_url: String,
}

/// GitHub REST adapter for one repository.
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
}

impl GitHubClient {
    pub fn new(
        api_url: impl Into<String>,
        owner: impl Into<String>,
        repo: impl Into<String>,
        token: Option<String>,
    ) -> Self {
        if let Some(token) = &token
            && !is_valid_github_token(token)
        {
            warn!("GitHub token does not have a known prefix");
        }
        Self {
            http: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            owner: owner.into(),
            repo: repo.into(),
            token,
        }
    }

    /// Build a client from `[github]`. A missing token means anonymous access,
    /// which only suffices for read-only commands.
    pub fn from_config(config: &BridgeConfig) -> anyhow::Result<Self> {
        let (owner, repo) = config.github_repository()?;
        let token = match config.github_token() {
            Ok(token) => Some(token),
            Err(e) => {
                warn!("{e:#}");
                None
            }
        };
        Ok(Self::new(&config.toml.github.api_url, owner, repo, token))
    }

    fn repo_url(&self, path: &str) -> String {
        format!("{}/repos/{}/{}/{}", self.api_url, self.owner, self.repo, path)
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .http
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", USER_AGENT);
        match &self.token {
            Some(token) => builder.header("Authorization", format!("Bearer {}", token)),
            None => builder,
        }
    }
}

#[async_trait]
impl ForgeClient for GitHubClient {
    async fn get_pr_info(&self, pr_number: u64) -> anyhow::Result<PullRequestInfo> {
        let url = self.repo_url(&format!("pulls/{}", pr_number));
        let raw: RawPullRequest = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to send pull request query to GitHub")?
            .error_for_status()
            .context("GitHub pulls API returned error status")?
            .json()
            .await
            .context("Failed to parse pull request response from GitHub")?;
        raw.into_info()
    }

    async fn get_pr_comment(&self, comment_id: u64) -> anyhow::Result<PrComment> {
        let url = self.repo_url(&format!("issues/comments/{}", comment_id));
        let raw: RawComment = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to send comment query to GitHub")?
            .error_for_status()
            .context("GitHub comments API returned error status")?
            .json()
            .await
            .context("Failed to parse comment response from GitHub")?;
        let pr_number = pr_number_from_issue_url(&raw.issue_url)
            .with_context(|| format!("Unexpected issue URL {}", raw.issue_url))?;
        Ok(PrComment {
            author: raw.user.login,
            body: raw.body.unwrap_or_default(),
            pr_number,
        })
    }

    async fn get_pr_commits(&self, pr_number: u64) -> anyhow::Result<Vec<CommitRecord>> {
        let url = self.repo_url(&format!("pulls/{}/commits", pr_number));
        let mut commits = Vec::new();
        let mut page = 1u32;

        loop {
            let resp: Vec<RawCommit> = self
                .request(reqwest::Method::GET, &url)
                .query(&[
                    ("per_page", COMMITS_PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ])
                .send()
                .await
                .context("Failed to send commits request to GitHub")?
                .error_for_status()
                .context("GitHub commits API returned error status")?
                .json()
                .await
                .context("Failed to parse commits response from GitHub")?;

            let count = resp.len();
            commits.extend(resp.into_iter().map(CommitRecord::from));
            if count < COMMITS_PER_PAGE {
                break;
            }
            page += 1;
        }

        debug!(pr_number, count = commits.len(), "fetched pull request commits");
        Ok(commits)
    }

    async fn get_user_info(&self, login: &str) -> anyhow::Result<ForgeUser> {
        let url = format!("{}/users/{}", self.api_url, login);
        let raw: RawUser = self
            .request(reqwest::Method::GET, &url)
            .send()
            .await
            .context("Failed to send user query to GitHub")?
            .error_for_status()
            .context("GitHub users API returned error status")?
            .json()
            .await
            .context("Failed to parse user response from GitHub")?;
        Ok(ForgeUser {
            login: raw.login,
            name: raw.name,
            email: raw.email.filter(|email| !email.is_empty()),
            user_type: raw.user_type,
        })
    }

    async fn add_pr_comment(&self, pr_number: u64, text: &str) -> anyhow::Result<String> {
        let url = self.repo_url(&format!("issues/{}/comments", pr_number));
        let created: RawCreatedComment = self
            .request(reqwest::Method::POST, &url)
            .json(&serde_json::json!({ "body": text }))
            .send()
            .await
            .context("Failed to post comment to GitHub")?
            .error_for_status()
            .context("GitHub comments API returned error status")?
            .json()
            .await
            .context("Failed to parse created comment from GitHub")?;
        Ok(created.html_url)
    }

    async fn update_pr(
        &self,
        pr_number: u64,
        field: PullRequestField,
        value: &str,
    ) -> anyhow::Result<()> {
        let url = self.repo_url(&format!("pulls/{}", pr_number));
        let mut body = serde_json::Map::new();
        body.insert(field.as_str().to_string(), value.into());
        self.request(reqwest::Method::PATCH, &url)
            .json(&body)
            .send()
            .await
            .context("Failed to update pull request on GitHub")?
            .error_for_status()
            .context("GitHub pulls API returned error status")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_token_prefixes() {
        assert!(is_valid_github_token("ghp_abc123"));
        assert!(is_valid_github_token("github_pat_abc123"));
        assert!(!is_valid_github_token(""));
        assert!(!is_valid_github_token("GHP_abc123"));
    }

    #[test]
    fn test_pr_number_from_issue_url() {
        assert_eq!(
            pr_number_from_issue_url("https://api.github.com/repos/o/r/issues/59"),
            Some(59)
        );
        assert_eq!(
            pr_number_from_issue_url("https://api.github.com/repos/o/r/pulls/7/"),
            Some(7)
        );
        assert_eq!(pr_number_from_issue_url("https://api.github.com/repos/o/r"), None);
        assert_eq!(
            pr_number_from_issue_url("https://api.github.com/repos/o/r/issues/abc"),
            None
        );
    }

    fn raw_pull(mergeable: serde_json::Value) -> serde_json::Value {
        json!({
            "number": 59,
            "title": "Preview a fun fix",
            "body": null,
            "html_url": "https://github.com/owner/repo/pull/59",
            "user": {"login": "ggg"},
            "base": {
                "sha": "1111111111111111111111111111111111111111",
                "label": "owner:next",
                "repo": {"name": "repo", "owner": {"login": "owner"}}
            },
            "head": {
                "sha": "2222222222222222222222222222222222222222",
                "label": "ggg:topic",
                "repo": null
            },
            "mergeable": mergeable,
            "commits": 2,
            "comments": 0,
            "review_comments": 1
        })
    }

    #[test]
    fn test_pull_request_conversion() {
        let raw: RawPullRequest = serde_json::from_value(raw_pull(json!(true))).unwrap();
        let info = raw.into_info().unwrap();
        assert_eq!(info.author, "ggg");
        assert_eq!(info.base_owner, "owner");
        assert_eq!(info.base_repo, "repo");
        assert_eq!(info.head_label, "ggg:topic");
        assert_eq!(info.body, "");
        assert_eq!(info.commits, 2);
        assert!(info.has_comments);
        assert!(info.mergeable);
        assert_eq!(info.pull_request_url, "https://github.com/owner/repo/pull/59");
    }

    #[test]
    fn test_unknown_mergeable_is_not_mergeable() {
        let raw: RawPullRequest = serde_json::from_value(raw_pull(json!(null))).unwrap();
        assert!(!raw.into_info().unwrap().mergeable);
    }

    #[test]
    fn test_commit_conversion() {
        let raw: RawCommit = serde_json::from_value(json!({
            "sha": "3333333333333333333333333333333333333333",
            "commit": {
                "author": {"name": "A U Thor", "email": "author@example.com"},
                "committer": {"name": "C O Mitter", "email": "committer@example.com"},
                "message": "tests: add coverage\n\nSigned-off-by: A U Thor"
            },
            "author": {"login": "author"},
            "committer": null,
            "parents": [{"sha": "a"}, {"sha": "b"}]
        }))
        .unwrap();
        let record = CommitRecord::from(raw);
        assert_eq!(record.author.login.as_deref(), Some("author"));
        assert_eq!(record.committer.login, None);
        assert_eq!(record.committer.email, "committer@example.com");
        assert_eq!(record.parent_count, 2);
    }

    #[test]
    fn test_user_type_field() {
        let raw: RawUser = serde_json::from_value(json!({
            "login": "ggg",
            "name": null,
            "email": "ggg@example.com",
            "type": "User"
        }))
        .unwrap();
        assert_eq!(raw.user_type, "User");
        assert_eq!(raw.email.as_deref(), Some("ggg@example.com"));
    }

    #[test]
    fn test_repo_url() {
        let client = GitHubClient::new("https://api.github.com/", "o", "r", None);
        assert_eq!(
            client.repo_url("pulls/1"),
            "https://api.github.com/repos/o/r/pulls/1"
        );
    }
}
