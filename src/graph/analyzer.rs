use anyhow::{Context, Result};
use git2::{Oid, Repository};
use std::collections::HashMap;
use tracing::{debug, info};

use crate::bridge_config::BridgeConfig;
use crate::notes::{MailMetadata, NotesStore};

/// Ancestry queries over the upstream branches, plus the links between
/// contributed commits and their upstream counterparts.
pub struct CommitGraphAnalyzer {
    notes: NotesStore,
    mail_to_commit: NotesStore,
    upstream_ref_prefix: String,
    mail_to_commit_remote: Option<String>,
}

impl CommitGraphAnalyzer {
    /// `notes` holds commit logs and mail metadata, `mail_to_commit` maps
    /// message ids to upstream commits. Both must live in the same repository.
    pub fn new(
        notes: NotesStore,
        mail_to_commit: NotesStore,
        upstream_ref_prefix: impl Into<String>,
    ) -> Self {
        Self {
            notes,
            mail_to_commit,
            upstream_ref_prefix: upstream_ref_prefix.into(),
            mail_to_commit_remote: None,
        }
    }

    /// Fetch the mail-to-commit ref from `remote` before each lookup.
    pub fn with_mail_to_commit_remote(mut self, remote: impl Into<String>) -> Self {
        self.mail_to_commit_remote = Some(remote.into());
        self
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let analyzer = Self::new(
            NotesStore::new(&config.repo_dir, config.notes_ref()),
            NotesStore::new(&config.repo_dir, config.mail_to_commit_ref()),
            config.toml.notes.upstream_ref_prefix.clone(),
        );
        match &config.toml.notes.mail_to_commit_remote {
            Some(remote) => analyzer.with_mail_to_commit_remote(remote.clone()),
            None => analyzer,
        }
    }

    fn refresh_mail_to_commit(&self) -> Result<()> {
        let Some(remote) = &self.mail_to_commit_remote else {
            return Ok(());
        };
        let outcome = self
            .mail_to_commit
            .fetch_and_sync(remote)
            .with_context(|| {
                format!(
                    "Failed to fetch {} from {}",
                    self.mail_to_commit.notes_ref(),
                    remote
                )
            })?;
        debug!(remote = %remote, ?outcome, "mail-to-commit refreshed");
        Ok(())
    }

    fn open(&self) -> Result<Repository> {
        Repository::open(self.notes.repo_dir()).context("Failed to open git repository")
    }

    /// Full ref name for an upstream branch. Fully qualified names pass through.
    pub fn branch_ref(&self, branch: &str) -> String {
        if branch.starts_with("refs/") {
            branch.to_string()
        } else {
            format!("{}{}", self.upstream_ref_prefix, branch)
        }
    }

    /// Find the merge that brought `commit` into `branch`.
    ///
    /// Walks the first-parent chain of the branch tip and returns its oldest
    /// commit that contains `commit`. That commit is necessarily a merge,
    /// unless `commit` sits on the chain itself, in which case no merge
    /// integrated it. Returns `None` if the branch does not contain `commit`.
    pub fn identify_merge_commit(&self, branch: &str, commit: &str) -> Result<Option<String>> {
        let repo = self.open()?;
        let branch_ref = self.branch_ref(branch);
        let tip = repo
            .refname_to_id(&branch_ref)
            .with_context(|| format!("Failed to resolve {}", branch_ref))?;
        let target = repo
            .revparse_single(commit)
            .and_then(|object| object.peel_to_commit())
            .with_context(|| format!("Unknown commit {}", commit))?
            .id();

        let chain = first_parent_chain(&repo, tip)?;
        let mut index = AncestryIndex::new(&repo, target);

        if !index.contains(chain[0])? {
            debug!(branch = %branch_ref, commit, "commit not integrated yet");
            return Ok(None);
        }

        // containment is monotonic along the chain: true up to the
        // integrating commit, false beyond it
        let (mut lo, mut hi) = (0usize, chain.len());
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if index.contains(chain[mid])? {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        let candidate = chain[lo];
        if candidate == target {
            debug!(branch = %branch_ref, commit, "commit is on the first-parent chain");
            return Ok(None);
        }
        debug!(
            branch = %branch_ref,
            commit,
            merge = %candidate,
            ancestry_checks = index.checks(),
            "integrating merge found"
        );
        Ok(Some(candidate.to_string()))
    }

    /// Resolve a contributed commit to the commit applied upstream.
    ///
    /// The commit's note log names the message id it was mailed as; the
    /// mail-to-commit mapping names the upstream commit for that id.
    pub fn identify_upstream_commit(&self, original_commit: &str) -> Result<Option<String>> {
        let Some(message_id) = self.notes.get_last_commit_note(original_commit)? else {
            return Ok(None);
        };
        self.refresh_mail_to_commit()?;
        let upstream = self.mail_to_commit.get_string(message_id.trim())?;
        Ok(upstream.map(|sha| sha.trim().to_string()))
    }

    /// Fill in the upstream commit of a mail whose metadata lacks it.
    ///
    /// Returns whether the metadata was updated.
    pub fn update_commit_mapping(&self, message_id: &str) -> Result<bool> {
        let Some(mut meta) = self.notes.get::<MailMetadata>(message_id)? else {
            debug!(message_id, "no mail metadata");
            return Ok(false);
        };
        if meta.commit_in_upstream.is_some() {
            return Ok(false);
        }
        self.refresh_mail_to_commit()?;
        let Some(upstream) = self.mail_to_commit.get_string(message_id)? else {
            return Ok(false);
        };

        meta.commit_in_upstream = Some(upstream.trim().to_string());
        self.notes.set(message_id, &meta, true)?;
        info!(message_id, upstream = %upstream.trim(), "commit mapping updated");
        Ok(true)
    }
}

fn first_parent_chain(repo: &Repository, tip: Oid) -> Result<Vec<Oid>> {
    let mut chain = Vec::new();
    let mut current = Some(tip);
    while let Some(oid) = current {
        chain.push(oid);
        let commit = repo.find_commit(oid)?;
        current = commit.parent_ids().next();
    }
    Ok(chain)
}

/// Memoized "does X contain the target commit" answers.
struct AncestryIndex<'r> {
    repo: &'r Repository,
    target: Oid,
    memo: HashMap<Oid, bool>,
}

impl<'r> AncestryIndex<'r> {
    fn new(repo: &'r Repository, target: Oid) -> Self {
        Self {
            repo,
            target,
            memo: HashMap::new(),
        }
    }

    fn contains(&mut self, commit: Oid) -> Result<bool> {
        if let Some(&known) = self.memo.get(&commit) {
            return Ok(known);
        }
        let contains =
            commit == self.target || self.repo.graph_descendant_of(commit, self.target)?;
        self.memo.insert(commit, contains);
        Ok(contains)
    }

    fn checks(&self) -> usize {
        self.memo.len()
    }
}
