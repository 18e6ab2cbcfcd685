//! Event handling for pull request pushes and comments.
//!
//! - `gate` — the checks every pull request must pass before it is mailed
//! - `commands` — the comment commands (`/allow`, `/submit`, `/cc`, ...)

pub mod commands;
pub mod gate;

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bridge_config::{BridgeConfig, PolicySection};
use crate::command::{Command, parse_command};
use crate::errors::BridgeError;
use crate::github::{CommitRecord, ForgeClient, PrComment, PullRequestInfo};
use crate::lint::CommitPolicyLinter;
use crate::mail::MailSender;
use crate::notes::{GlobalConfig, NotesStore};

pub use commands::series_tag;
pub use gate::{GateFailure, GateReport};

/// Drives one push or comment event to completion.
///
/// Holds no state across events: everything durable lives in the notes ref
/// or on the forge.
pub struct Orchestrator {
    project_name: String,
    policy: PolicySection,
    linter: CommitPolicyLinter,
    notes: NotesStore,
    forge: Arc<dyn ForgeClient>,
    mailer: Arc<dyn MailSender>,
    archive_url: Option<String>,
}

impl Orchestrator {
    pub fn new(
        config: &BridgeConfig,
        forge: Arc<dyn ForgeClient>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            project_name: config.project_name().to_string(),
            policy: config.policy().clone(),
            linter: CommitPolicyLinter::new(config.policy().min_message_lines),
            notes: NotesStore::new(&config.repo_dir, config.notes_ref()),
            forge,
            mailer,
            archive_url: config
                .toml
                .mail
                .archive_url
                .as_ref()
                .map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub fn notes(&self) -> &NotesStore {
        &self.notes
    }

    /// A push to a pull request: welcome newcomers and run the gate.
    ///
    /// Gate failures are posted and then returned as `CheckFailed`.
    pub async fn handle_push(&self, pr_number: u64) -> Result<(), BridgeError> {
        let pr = self
            .forge
            .get_pr_info(pr_number)
            .await
            .map_err(BridgeError::Transport)?;
        info!(pr = pr_number, author = %pr.author, head = %pr.head_commit, "handling push");

        let global = self.global_config()?;
        if !global.is_allowed(&pr.author) && !pr.has_comments {
            self.comment(pr_number, &self.welcome_text(&pr.author)).await?;
        }

        self.run_gate(&pr, true).await?;
        Ok(())
    }

    /// A comment on a pull request: parse and dispatch its command.
    ///
    /// Contributor-side problems are answered with a comment and do not fail
    /// the call.
    pub async fn handle_comment(&self, comment_id: u64) -> Result<(), BridgeError> {
        let comment = self
            .forge
            .get_pr_comment(comment_id)
            .await
            .map_err(BridgeError::Transport)?;

        let command = parse_command(&comment.body);
        match &command {
            Command::Unrecognized(None) => {
                debug!(comment_id, "not a command");
                return Ok(());
            }
            Command::Unrecognized(Some(verb)) => {
                info!(comment_id, verb = %verb, "ignoring unknown command");
                return Ok(());
            }
            _ => {}
        }
        info!(
            comment_id,
            pr = comment.pr_number,
            author = %comment.author,
            command = command.name(),
            "dispatching command"
        );

        let pr = self
            .forge
            .get_pr_info(comment.pr_number)
            .await
            .map_err(BridgeError::Transport)?;

        let result = self.dispatch(command, &comment, &pr).await;
        match result {
            Err(err) if err.needs_comment() => {
                warn!(pr = pr.number, error = %err, "command refused");
                self.comment(pr.number, &err.to_string()).await
            }
            Err(BridgeError::CheckFailed { summary }) => {
                info!(pr = pr.number, %summary, "command stopped by gate");
                Ok(())
            }
            Err(err) => {
                if !err.is_user_facing() {
                    error!(pr = pr.number, error = %err, "command failed");
                }
                Err(err)
            }
            Ok(()) => Ok(()),
        }
    }

    async fn dispatch(
        &self,
        command: Command,
        comment: &PrComment,
        pr: &PullRequestInfo,
    ) -> Result<(), BridgeError> {
        match command {
            Command::Allow(user) => self.allow(comment, pr, user).await,
            Command::Disallow(user) => self.disallow(comment, pr, user).await,
            Command::Submit => self.submit(comment, pr).await,
            Command::Preview => self.preview(comment, pr).await,
            Command::Cc(entries) => self.cc(pr, &entries).await,
            Command::Reject { reason } => Err(BridgeError::Authorization(reason)),
            Command::Unrecognized(_) => Ok(()),
        }
    }

    /// Run the gate, posting one comment per problem.
    ///
    /// Returns the commits when the gate passes. A failure is an error only
    /// when `fatal`; otherwise it yields `None`.
    pub async fn run_gate(
        &self,
        pr: &PullRequestInfo,
        fatal: bool,
    ) -> Result<Option<Vec<CommitRecord>>, BridgeError> {
        let (report, commits) = match gate::check_commit_count(pr, &self.policy) {
            Some(failure) => (
                GateReport {
                    failures: vec![failure],
                    warnings: Vec::new(),
                },
                Vec::new(),
            ),
            None => {
                let commits = self
                    .forge
                    .get_pr_commits(pr.number)
                    .await
                    .map_err(BridgeError::Transport)?;
                (
                    gate::check_commits(&commits, &self.policy, &self.linter),
                    commits,
                )
            }
        };

        for text in report.comments() {
            self.comment(pr.number, &text).await?;
        }

        if report.passed() {
            info!(pr = pr.number, commits = commits.len(), "gate passed");
            return Ok(Some(commits));
        }

        let summary = report.summary();
        warn!(pr = pr.number, %summary, fatal, "gate failed");
        if fatal {
            Err(BridgeError::CheckFailed { summary })
        } else {
            Ok(None)
        }
    }

    fn global_config(&self) -> Result<GlobalConfig, BridgeError> {
        Ok(self
            .notes
            .get::<GlobalConfig>(GlobalConfig::KEY)?
            .unwrap_or_default())
    }

    async fn comment(&self, pr_number: u64, text: &str) -> Result<(), BridgeError> {
        let url = self
            .forge
            .add_pr_comment(pr_number, text)
            .await
            .map_err(BridgeError::Transport)?;
        debug!(pr = pr_number, %url, "comment posted");
        Ok(())
    }

    fn welcome_text(&self, author: &str) -> String {
        format!(
            "Welcome to {project}, @{author}!\n\n\
             This pull request will be sent to the mailing list as a patch series \
             once it is ready. Each push is checked automatically; problems are \
             reported below.\n\n\
             Before you can `/submit` or `/preview` it, one of the existing \
             {project} users needs to `/allow {author}`. Please make sure your \
             GitHub profile shows a public email address so that you can receive \
             previews and replies.",
            project = self.project_name,
            author = author
        )
    }

    /// Link to a message in the list archive, or the bare id.
    fn message_link(&self, message_id: &str) -> String {
        match &self.archive_url {
            Some(base) => format!("[{id}]({base}/{id})", id = message_id, base = base),
            None => message_id.to_string(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::bridge_config::BridgeToml;
    use git2::Repository;
    use tempfile::{TempDir, tempdir};

    fn setup(
        pr: PullRequestInfo,
        commits: Vec<CommitRecord>,
    ) -> (Orchestrator, Arc<MockForge>, Arc<MockMailer>, TempDir) {
        let dir = tempdir().unwrap();
        Repository::init(dir.path()).unwrap();
        let config = BridgeConfig {
            repo_dir: dir.path().to_path_buf(),
            toml: BridgeToml::default(),
        };
        let forge = Arc::new(MockForge::new(pr, commits));
        let mailer = Arc::new(MockMailer::default());
        let orchestrator = Orchestrator::new(&config, forge.clone(), mailer.clone());
        (orchestrator, forge, mailer, dir)
    }

    fn allow(orchestrator: &Orchestrator, user: &str) {
        let mut global = GlobalConfig::default();
        global.allow(user);
        orchestrator
            .notes()
            .set(GlobalConfig::KEY, &global, true)
            .unwrap();
    }

    fn good_commit() -> CommitRecord {
        commit(HEAD, "Submit ok\n\nSigned-off-by: x", 1)
    }

    #[tokio::test]
    async fn test_push_passes_for_allowed_user() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), vec![good_commit()]);
        allow(&orchestrator, "ggg");
        orchestrator.handle_push(59).await.unwrap();
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_push_welcomes_first_timer() {
        let (orchestrator, forge, _mailer, _dir) =
            setup(pr_info("starfish"), vec![good_commit()]);
        orchestrator.handle_push(59).await.unwrap();
        let posted = forge.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].contains("Welcome"));
    }

    #[tokio::test]
    async fn test_too_many_commits_fails_push_submit_and_preview() {
        let mut pr = pr_info("ggg");
        pr.commits = 40;
        let (orchestrator, forge, mailer, _dir) = setup(pr, vec![]);
        allow(&orchestrator, "ggg");
        let fail_msg = "The pull request has 40 commits.";

        let err = orchestrator.handle_push(59).await.unwrap_err();
        assert!(err.to_string().starts_with("Failing check due"));
        assert!(forge.posted()[0].contains(fail_msg));
        forge.clear();

        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains(fail_msg));
        forge.clear();

        forge.set_comment("ggg", " /preview");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains(fail_msg));
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_too_many_commits_for_new_user_welcomes_first() {
        let mut pr = pr_info("starfish");
        pr.commits = 40;
        let (orchestrator, forge, _mailer, _dir) = setup(pr, vec![]);
        assert!(matches!(
            orchestrator.handle_push(59).await,
            Err(BridgeError::CheckFailed { .. })
        ));
        let posted = forge.posted();
        assert!(posted[0].contains("Welcome"));
        assert!(posted[1].contains("The pull request has 40 commits."));
    }

    #[tokio::test]
    async fn test_merge_commits_named_on_push() {
        let commits = vec![
            commit("BAD1FEEDBEEF", "Merge a commit\n\nSigned-off-by: x", 2),
            commit("BAD2FEEDBEEF", "Merge a commit\n\nSigned-off-by: x", 1),
            commit("BAD3FEEDBEEF", "Merge a commit\n\nSigned-off-by: x", 2),
        ];
        let mut pr = pr_info("ggg");
        pr.commits = 3;
        let (orchestrator, forge, _mailer, _dir) = setup(pr, commits);
        allow(&orchestrator, "ggg");
        assert!(orchestrator.handle_push(59).await.is_err());
        let posted = forge.posted();
        assert_eq!(posted.len(), 1);
        assert!(posted[0].contains("BAD1FEEDBEEF"));
        assert!(!posted[0].contains("BAD2FEEDBEEF"));
        assert!(posted[0].contains("BAD3FEEDBEEF"));
    }

    #[tokio::test]
    async fn test_lint_failures_posted_per_commit() {
        let commits = vec![
            commit("BAD1FEEDBEEF", "Message has no description", 1),
            commit("BAD2FEEDBEEF", "Missing blank line is bad\nhere\nSigned-off-by: x", 1),
            commit("F00DFEEDBEEF", "Successful test\n\nSigned-off-by: x", 1),
            commit("BAD5FEEDBEEF", "tests: This should be lower case\n\nSigned-off-by: x", 1),
        ];
        let mut pr = pr_info("ggg");
        pr.commits = 4;
        let (orchestrator, forge, _mailer, _dir) = setup(pr, commits);
        allow(&orchestrator, "ggg");
        let err = orchestrator.handle_push(59).await.unwrap_err();
        assert!(err.to_string().contains("Failing check due"));
        let posted = forge.posted();
        assert_eq!(posted.len(), 3);
        assert!(posted[0].contains("BAD1FEEDBEEF") && posted[0].contains("too short"));
        assert!(posted[1].contains("BAD2FEEDBEEF") && posted[1].contains("empty line"));
        assert!(posted[2].contains("BAD5FEEDBEEF") && posted[2].contains("lower case"));
    }

    #[tokio::test]
    async fn test_push_propagates_forge_failure() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), vec![good_commit()]);
        allow(&orchestrator, "ggg");
        *forge.fail_commits.lock().unwrap() = true;

        let err = orchestrator.handle_push(59).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.to_string().contains("502"));
        assert!(forge.posted().is_empty());
    }

    #[tokio::test]
    async fn test_push_propagates_comment_failure() {
        let (orchestrator, forge, _mailer, _dir) =
            setup(pr_info("starfish"), vec![good_commit()]);
        *forge.fail_comments.lock().unwrap() = true;

        let err = orchestrator.handle_push(59).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.to_string().contains("403"));
    }

    #[tokio::test]
    async fn test_failed_send_writes_no_notes() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("ggg"), vec![good_commit()]);
        allow(&orchestrator, "ggg");
        *mailer.fail.lock().unwrap() = true;
        let tip = orchestrator.notes().tip().unwrap();

        forge.set_comment("ggg", "/submit");
        let err = orchestrator.handle_comment(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));
        assert!(err.to_string().contains("smtp refused"));

        forge.set_comment("ggg", "/preview");
        let err = orchestrator.handle_comment(1).await.unwrap_err();
        assert!(matches!(err, BridgeError::Transport(_)));

        assert!(forge.posted().is_empty());
        assert_eq!(orchestrator.notes().tip().unwrap(), tip);
        assert!(
            orchestrator
                .notes()
                .get_string("https://github.com/gitgitgadget/git/pull/59")
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_plain_and_unknown_comments_are_ignored() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), vec![good_commit()]);
        forge.set_comment("ggg", "Thanks for the review!");
        orchestrator.handle_comment(1).await.unwrap();
        forge.set_comment("ggg", "/frobnicate");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted().is_empty());
    }
}
