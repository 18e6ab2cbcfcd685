use std::collections::HashSet;
use tracing::info;

use super::Orchestrator;
use crate::command::{CcEntry, parse_recipients};
use crate::errors::BridgeError;
use crate::github::{PrComment, PullRequestField, PullRequestInfo};
use crate::mail::{PatchSeriesRequest, SendMode, SentSeries};
use crate::notes::{GlobalConfig, MailMetadata, PatchSeriesMetadata, PreviewMetadata};

/// `pr-<number>/<owner>/<branch>-v<iteration>`
pub fn series_tag(number: u64, head_label: &str, iteration: u32) -> String {
    format!("pr-{}/{}-v{}", number, head_label.replace(':', "/"), iteration)
}

fn is_cc_line(line: &str) -> bool {
    line.trim_start()
        .get(..3)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("cc:"))
}

/// Recipients listed on `Cc:` lines of a pull request description.
pub fn cc_recipients(body: &str) -> Vec<CcEntry> {
    body.lines()
        .filter(|line| is_cc_line(line))
        .flat_map(|line| parse_recipients(&line.trim_start()[3..]))
        .collect()
}

/// Append one `Cc:` line, keeping the Cc block separated from the prose.
fn append_cc_line(body: &str, entry: &CcEntry) -> String {
    let line = format!("Cc: {}", entry.to_header_value());
    let trimmed = body.trim_end();
    match trimmed.lines().last() {
        None => line,
        Some(last) if is_cc_line(last) => format!("{}\n{}", trimmed, line),
        Some(_) => format!("{}\n\n{}", trimmed, line),
    }
}

impl Orchestrator {
    /// Users on the allow-list may administer it. The owner of the base
    /// repository may always do so, which bootstraps an empty list.
    fn may_administer(&self, global: &GlobalConfig, user: &str, pr: &PullRequestInfo) -> bool {
        global.is_allowed(user) || user.eq_ignore_ascii_case(&pr.base_owner)
    }

    pub(super) async fn allow(
        &self,
        comment: &PrComment,
        pr: &PullRequestInfo,
        user: Option<String>,
    ) -> Result<(), BridgeError> {
        let mut global = self.global_config()?;
        if !self.may_administer(&global, &comment.author, pr) {
            return Err(BridgeError::Authorization(format!(
                "User {} is not permitted to use `/allow` in {}.",
                comment.author, self.project_name
            )));
        }

        let target = user.unwrap_or_else(|| pr.author.clone());
        let account = self
            .forge
            .get_user_info(&target)
            .await
            .map_err(BridgeError::Transport)?;

        if !global.allow(&account.login) {
            return self
                .comment(
                    pr.number,
                    &format!(
                        "User {} already allowed to use {}.",
                        account.login, self.project_name
                    ),
                )
                .await;
        }
        self.notes.set(GlobalConfig::KEY, &global, true)?;
        info!(user = %account.login, by = %comment.author, "user allowed");

        let mut text = format!(
            "User {} is now allowed to use {}.",
            account.login, self.project_name
        );
        if account.email.is_none() {
            text.push_str(&format!(
                "\n\nWARNING: {} has no public email address set on GitHub; \
                 previews cannot be sent and replies may not reach them.",
                account.login
            ));
        }
        self.comment(pr.number, &text).await
    }

    pub(super) async fn disallow(
        &self,
        comment: &PrComment,
        pr: &PullRequestInfo,
        user: Option<String>,
    ) -> Result<(), BridgeError> {
        let mut global = self.global_config()?;
        if !self.may_administer(&global, &comment.author, pr) {
            return Err(BridgeError::Authorization(format!(
                "User {} is not permitted to use `/disallow` in {}.",
                comment.author, self.project_name
            )));
        }

        let target = user.unwrap_or_else(|| pr.author.clone());
        let text = if global.disallow(&target) {
            self.notes.set(GlobalConfig::KEY, &global, true)?;
            info!(user = %target, by = %comment.author, "user disallowed");
            format!(
                "User {} is no longer allowed to use {}.",
                target, self.project_name
            )
        } else {
            format!(
                "User {} already not allowed to use {}.",
                target, self.project_name
            )
        };
        self.comment(pr.number, &text).await
    }

    /// Checks shared by `/submit` and `/preview`, in order: authorship,
    /// allow-list, mergeability, then the gate.
    ///
    /// Returns the commits to mail, or `None` when the gate already reported
    /// a failure.
    async fn prepare_series(
        &self,
        comment: &PrComment,
        pr: &PullRequestInfo,
        verb: &str,
    ) -> Result<Option<Vec<crate::github::CommitRecord>>, BridgeError> {
        if !comment.author.eq_ignore_ascii_case(&pr.author) {
            return Err(BridgeError::Authorization(format!(
                "Only the owner of a PR can {} it!",
                verb
            )));
        }
        if !self.global_config()?.is_allowed(&comment.author) {
            return Err(BridgeError::Authorization(format!(
                "User {} is not yet permitted to use {}. \
                 Please ask one of the existing users to `/allow {}`.",
                comment.author, self.project_name, comment.author
            )));
        }
        if !pr.mergeable {
            return Err(BridgeError::Validation(format!(
                "Pull request {} does not merge cleanly. Please rebase it onto {}.",
                pr.pull_request_url, pr.base_label
            )));
        }
        self.run_gate(pr, false).await
    }

    fn series_request(
        &self,
        pr: &PullRequestInfo,
        mode: SendMode,
        metadata: &PatchSeriesMetadata,
        tag: String,
        commits: Vec<crate::github::CommitRecord>,
    ) -> PatchSeriesRequest {
        PatchSeriesRequest {
            mode,
            metadata: metadata.clone(),
            tag,
            commits,
            title: pr.title.clone(),
            description: pr.body.clone(),
            cc: cc_recipients(&pr.body)
                .iter()
                .map(CcEntry::to_header_value)
                .collect(),
            preview_recipient: None,
        }
    }

    pub(super) async fn submit(
        &self,
        comment: &PrComment,
        pr: &PullRequestInfo,
    ) -> Result<(), BridgeError> {
        let Some(commits) = self.prepare_series(comment, pr, "submit").await? else {
            return Ok(());
        };

        let previous = self
            .notes
            .get::<PatchSeriesMetadata>(&pr.pull_request_url)?;
        let iteration = PatchSeriesMetadata::next_iteration(previous.as_ref());
        let tag = series_tag(pr.number, &pr.head_label, iteration);
        let mut metadata = PatchSeriesMetadata {
            base_commit: pr.base_commit.clone(),
            base_label: pr.base_label.clone(),
            head_commit: pr.head_commit.clone(),
            head_label: pr.head_label.clone(),
            iteration,
            cover_letter_message_id: None,
            pull_request_url: pr.pull_request_url.clone(),
            latest_tag: Some(tag.clone()),
        };

        let request = self.series_request(pr, SendMode::Submit, &metadata, tag.clone(), commits);
        let sent = self
            .mailer
            .send_series(&request)
            .await
            .map_err(BridgeError::Transport)?;

        metadata.cover_letter_message_id = sent.cover_letter_message_id.clone();
        self.notes.set(&pr.pull_request_url, &metadata, true)?;
        self.record_mails(pr, &sent)?;
        info!(pr = pr.number, iteration, %tag, "series submitted");

        let id = sent.primary_message_id().unwrap_or(&tag);
        self.comment(pr.number, &format!("Submitted as {}", self.message_link(id)))
            .await
    }

    /// Per-patch metadata, and a note on each original commit naming its mail.
    fn record_mails(&self, pr: &PullRequestInfo, sent: &SentSeries) -> Result<(), BridgeError> {
        for patch in &sent.patches {
            let meta = MailMetadata {
                message_id: patch.message_id.clone(),
                original_commit: patch.original_commit.clone(),
                pull_request_url: pr.pull_request_url.clone(),
                commit_in_upstream: None,
            };
            self.notes.set(&patch.message_id, &meta, true)?;
            self.notes
                .append_commit_note(&patch.original_commit, &patch.message_id)?;
        }
        Ok(())
    }

    pub(super) async fn preview(
        &self,
        comment: &PrComment,
        pr: &PullRequestInfo,
    ) -> Result<(), BridgeError> {
        let Some(commits) = self.prepare_series(comment, pr, "preview").await? else {
            return Ok(());
        };

        let user = self
            .forge
            .get_user_info(&comment.author)
            .await
            .map_err(BridgeError::Transport)?;
        let Some(email) = user.email else {
            return Err(BridgeError::Validation(format!(
                "Could not determine the public email address of {}. \
                 Please set one in your GitHub profile to receive previews.",
                comment.author
            )));
        };

        let submitted = self
            .notes
            .get::<PatchSeriesMetadata>(&pr.pull_request_url)?;
        let iteration = PatchSeriesMetadata::next_iteration(submitted.as_ref());
        let preview_key = PreviewMetadata::key(&pr.pull_request_url);
        let round = match self.notes.get::<PreviewMetadata>(&preview_key)? {
            Some(last) if last.iteration == iteration && last.head_commit == pr.head_commit => {
                last.round
            }
            Some(last) if last.iteration == iteration => last.round + 1,
            _ => 1,
        };
        let tag = format!(
            "{}-preview{}",
            series_tag(pr.number, &pr.head_label, iteration),
            round
        );

        let metadata = PatchSeriesMetadata {
            base_commit: pr.base_commit.clone(),
            base_label: pr.base_label.clone(),
            head_commit: pr.head_commit.clone(),
            head_label: pr.head_label.clone(),
            iteration,
            cover_letter_message_id: None,
            pull_request_url: pr.pull_request_url.clone(),
            latest_tag: Some(tag.clone()),
        };
        let mut request =
            self.series_request(pr, SendMode::Preview, &metadata, tag.clone(), commits);
        request.preview_recipient = Some(email);

        let sent = self
            .mailer
            .send_series(&request)
            .await
            .map_err(BridgeError::Transport)?;

        let message_id = sent.primary_message_id().map(str::to_string);
        let preview = PreviewMetadata {
            iteration,
            head_commit: pr.head_commit.clone(),
            round,
            tag: tag.clone(),
            message_id: message_id.clone(),
        };
        self.notes.set(&preview_key, &preview, true)?;
        info!(pr = pr.number, iteration, round, %tag, "preview sent");

        let id = message_id.unwrap_or(tag);
        self.comment(
            pr.number,
            &format!("Preview email sent as {}", self.message_link(&id)),
        )
        .await
    }

    /// Add each not-yet-listed address as a `Cc:` line of the description,
    /// one description update per added address.
    pub(super) async fn cc(
        &self,
        pr: &PullRequestInfo,
        entries: &[CcEntry],
    ) -> Result<(), BridgeError> {
        let mut present: HashSet<String> = cc_recipients(&pr.body)
            .into_iter()
            .map(|entry| entry.email.to_lowercase())
            .collect();
        let mut body = pr.body.clone();

        for entry in entries {
            if !present.insert(entry.email.to_lowercase()) {
                continue;
            }
            body = append_cc_line(&body, entry);
            self.forge
                .update_pr(pr.number, PullRequestField::Body, &body)
                .await
                .map_err(BridgeError::Transport)?;
            info!(pr = pr.number, email = %entry.email, "cc added");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::bridge_config::{BridgeConfig, BridgeToml};
    use crate::github::CommitRecord;
    use git2::Repository;
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    const COMMIT_B: &str = "3333333333333333333333333333333333333333";

    fn setup(
        pr: PullRequestInfo,
        commits: Vec<CommitRecord>,
    ) -> (Orchestrator, Arc<MockForge>, Arc<MockMailer>, TempDir) {
        let dir = tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        // commit notes need a real object to attach to
        let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@test.com").unwrap();
        let oid = repo.commit(None, &sig, &sig, "b", &tree, &[]).unwrap();
        let commits = commits
            .into_iter()
            .map(|mut commit| {
                if commit.sha == COMMIT_B {
                    commit.sha = oid.to_string();
                }
                commit
            })
            .collect();

        let config = BridgeConfig {
            repo_dir: dir.path().to_path_buf(),
            toml: BridgeToml::default(),
        };
        let forge = Arc::new(MockForge::new(pr, commits));
        let mailer = Arc::new(MockMailer::default());
        let orchestrator = Orchestrator::new(&config, forge.clone(), mailer.clone());
        (orchestrator, forge, mailer, dir)
    }

    fn allow_users(orchestrator: &Orchestrator, users: &[&str]) {
        let mut global = GlobalConfig::default();
        for user in users {
            global.allow(user);
        }
        orchestrator
            .notes()
            .set(GlobalConfig::KEY, &global, true)
            .unwrap();
    }

    fn allowed(orchestrator: &Orchestrator) -> Vec<String> {
        orchestrator
            .notes()
            .get::<GlobalConfig>(GlobalConfig::KEY)
            .unwrap()
            .unwrap_or_default()
            .allowed_users
    }

    fn good_commits() -> Vec<CommitRecord> {
        vec![commit(COMMIT_B, "Submit ok\n\nSigned-off-by: x", 1)]
    }

    #[test]
    fn test_series_tag() {
        assert_eq!(series_tag(59, "somebody:master", 2), "pr-59/somebody/master-v2");
    }

    #[test]
    fn test_cc_recipients_from_body() {
        let body = "Fix things\n\nCc: A Body <abody@example.com>\ncc: <other@example.com>\nNot cc: x";
        let emails: Vec<String> = cc_recipients(body).into_iter().map(|e| e.email).collect();
        assert_eq!(emails, vec!["abody@example.com", "other@example.com"]);
    }

    #[test]
    fn test_append_cc_line_spacing() {
        let entry = CcEntry {
            name: Some("S Body".into()),
            email: "sbody@example.com".into(),
        };
        assert_eq!(append_cc_line("", &entry), "Cc: S Body <sbody@example.com>");
        assert_eq!(
            append_cc_line("Prose\n", &entry),
            "Prose\n\nCc: S Body <sbody@example.com>"
        );
        assert_eq!(
            append_cc_line("Prose\n\nCc: a@example.com", &entry),
            "Prose\n\nCc: a@example.com\nCc: S Body <sbody@example.com>"
        );
    }

    #[tokio::test]
    async fn test_allow_and_disallow_flow() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);

        forge.set_comment("ggg", "/allow  user2");
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(forge.posted()[0], "User user2 is now allowed to use PatchBridge.");
        assert_eq!(allowed(&orchestrator), vec!["ggg", "user2"]);

        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[1].contains("already allowed to use"));
        assert_eq!(allowed(&orchestrator), vec!["ggg", "user2"]);

        forge.set_comment("ggg", "/disallow  user2");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[2].contains("is no longer allowed to use"));

        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[3].contains("already not allowed to use"));
        assert_eq!(allowed(&orchestrator), vec!["ggg"]);
    }

    #[tokio::test]
    async fn test_allow_warns_about_missing_email() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        *forge.user_email.lock().unwrap() = None;

        forge.set_comment("ggg", "/allow user3");
        orchestrator.handle_comment(1).await.unwrap();
        let posted = forge.posted();
        assert!(posted[0].starts_with("User user3 is now allowed to use PatchBridge."));
        assert!(posted[0].contains("no public email address set"));
    }

    #[tokio::test]
    async fn test_allow_invalid_username() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", "/allow  bad_@@@@");
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(forge.posted()[0], "`bad_@@@@` is not a valid GitHub username.");
        assert_eq!(allowed(&orchestrator), vec!["ggg"]);
    }

    #[tokio::test]
    async fn test_allow_without_argument_targets_author() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("starfish"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", "/allow");
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(allowed(&orchestrator), vec!["ggg", "starfish"]);
    }

    #[tokio::test]
    async fn test_allow_requires_allowed_commenter() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("starfish"), good_commits());
        forge.set_comment("starfish", "/allow");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains("not permitted"));
        assert!(allowed(&orchestrator).is_empty());
    }

    #[tokio::test]
    async fn test_base_owner_bootstraps_allow_list() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("starfish"), good_commits());
        forge.set_comment("gitgitgadget", "/allow");
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(allowed(&orchestrator), vec!["starfish"]);
    }

    #[tokio::test]
    async fn test_submit_requires_pr_owner() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg", "user2"]);
        forge.set_comment("user2", "/submit");
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(forge.posted()[0], "Only the owner of a PR can submit it!");
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_allowed_user() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("starfish"), good_commits());
        forge.set_comment("starfish", "/submit");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains("is not yet permitted to use"));
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_requires_mergeable() {
        let mut pr = pr_info("ggg");
        pr.mergeable = false;
        let (orchestrator, forge, mailer, _dir) = setup(pr, good_commits());
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", "/submit");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains("does not merge cleanly"));
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submit_records_metadata_and_advances_iteration() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", "/submit   ");

        orchestrator.handle_comment(1).await.unwrap();
        let url = "https://github.com/gitgitgadget/git/pull/59";
        let meta: PatchSeriesMetadata = orchestrator.notes().get(url).unwrap().unwrap();
        assert_eq!(meta.iteration, 1);
        assert_eq!(meta.head_commit, HEAD);
        assert_eq!(meta.latest_tag.as_deref(), Some("pr-59/somebody/master-v1"));
        let cover = meta.cover_letter_message_id.clone().unwrap();
        assert_eq!(forge.posted()[0], format!("Submitted as {}", cover));

        let sent_commit = mailer.requests.lock().unwrap()[0].commits[0].sha.clone();
        let patch_id = "patch.pr-59/somebody/master-v1.1.1@example.com";
        let mail: MailMetadata = orchestrator.notes().get(patch_id).unwrap().unwrap();
        assert_eq!(mail.original_commit, sent_commit);
        assert_eq!(mail.pull_request_url, url);
        assert_eq!(
            orchestrator
                .notes()
                .get_last_commit_note(&sent_commit)
                .unwrap()
                .as_deref(),
            Some(patch_id)
        );

        // not idempotent: a second submit is the next iteration
        orchestrator.handle_comment(1).await.unwrap();
        let meta: PatchSeriesMetadata = orchestrator.notes().get(url).unwrap().unwrap();
        assert_eq!(meta.iteration, 2);
        let requests = mailer.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].tag, "pr-59/somebody/master-v2");
        assert_eq!(requests[1].mode, SendMode::Submit);
    }

    #[tokio::test]
    async fn test_submit_gate_failure_is_reported_not_fatal() {
        let mut pr = pr_info("ggg");
        pr.commits = 1;
        let (orchestrator, forge, mailer, _dir) =
            setup(pr, vec![commit("BAD1FEEDBEEF", "Merge a commit\n\nSigned-off-by: x", 2)]);
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", "/submit");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains("BAD1FEEDBEEF"));
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preview_reuses_tag_until_head_changes() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        forge.set_comment("ggg", " /preview");

        orchestrator.handle_comment(1).await.unwrap();
        orchestrator.handle_comment(1).await.unwrap();
        {
            let requests = mailer.requests.lock().unwrap();
            assert_eq!(requests[0].tag, "pr-59/somebody/master-v1-preview1");
            assert_eq!(requests[1].tag, requests[0].tag);
            assert_eq!(requests[0].mode, SendMode::Preview);
            assert_eq!(requests[0].preview_recipient.as_deref(), Some("ggg@example.com"));
        }
        assert!(forge.posted()[0].starts_with("Preview email sent as "));

        forge.pr.lock().unwrap().head_commit = "4444444444444444444444444444444444444444".into();
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(
            mailer.requests.lock().unwrap()[2].tag,
            "pr-59/somebody/master-v1-preview2"
        );

        // previews never count as submissions
        let url = "https://github.com/gitgitgadget/git/pull/59";
        assert!(
            orchestrator
                .notes()
                .get::<PatchSeriesMetadata>(url)
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_preview_requires_public_email() {
        let (orchestrator, forge, mailer, _dir) = setup(pr_info("ggg"), good_commits());
        allow_users(&orchestrator, &["ggg"]);
        *forge.user_email.lock().unwrap() = None;
        forge.set_comment("ggg", "/preview");
        orchestrator.handle_comment(1).await.unwrap();
        assert!(forge.posted()[0].contains("public email address"));
        assert!(mailer.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cc_updates_body_once_per_new_address() {
        let (orchestrator, forge, _mailer, _dir) = setup(pr_info("ggg"), good_commits());
        forge.set_comment(
            "ggg",
            "/cc \"A Body\" <abody@example.com>, \"S Body\" <sbody@example.com>",
        );
        orchestrator.handle_comment(1).await.unwrap();
        assert_eq!(forge.updates.lock().unwrap().len(), 2);
        let body = forge.pr.lock().unwrap().body.clone();
        assert!(body.ends_with("Cc: A Body <abody@example.com>\nCc: S Body <sbody@example.com>"));

        forge.set_comment(
            "ggg",
            "/cc \"T Body\" <tbody@example.com>, \"S Body\" <SBODY@example.com>",
        );
        orchestrator.handle_comment(1).await.unwrap();
        let updates = forge.updates.lock().unwrap();
        assert_eq!(updates.len(), 3);
        assert_eq!(updates[2].1, PullRequestField::Body);
        assert!(updates[2].2.ends_with("Cc: T Body <tbody@example.com>"));
        assert!(forge.posted().is_empty());
    }
}
