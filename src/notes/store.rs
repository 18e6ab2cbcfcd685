use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use git2::{ErrorCode, ObjectType, Oid, Repository, Signature, TreeWalkMode, TreeWalkResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::merge::{LOG_SEPARATOR, merge_note, split_entries};
use crate::errors::NotesError;

type Result<T> = std::result::Result<T, NotesError>;

/// Result of reconciling the local notes ref with another tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The other tip was already contained in the local ref
    UpToDate,
    /// The local ref was moved forward to the other tip
    FastForward(Oid),
    /// A merge commit was written
    Merged(Oid),
}

/// Key/value documents and per-commit logs stored as git notes.
///
/// Documents are attached to the blob id of their key, commit logs to the
/// commit id. All state lives in the repository; the store itself only
/// remembers where to look.
#[derive(Debug, Clone)]
pub struct NotesStore {
    repo_dir: PathBuf,
    notes_ref: String,
}

impl NotesStore {
    pub fn new(repo_dir: impl AsRef<Path>, notes_ref: impl Into<String>) -> Self {
        Self {
            repo_dir: repo_dir.as_ref().to_path_buf(),
            notes_ref: notes_ref.into(),
        }
    }

    pub fn notes_ref(&self) -> &str {
        &self.notes_ref
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn open(&self) -> Result<Repository> {
        Ok(Repository::open(&self.repo_dir)?)
    }

    /// Object id a document key is addressed by.
    pub fn key_oid(key: &str) -> Result<Oid> {
        Ok(Oid::hash_object(ObjectType::Blob, key.as_bytes())?)
    }

    fn commit_oid(commit: &str) -> Result<Oid> {
        Oid::from_str(commit).map_err(|_| NotesError::InvalidCommitId(commit.to_string()))
    }

    /// Current tip of the notes ref, if it exists.
    pub fn tip(&self) -> Result<Option<Oid>> {
        let repo = self.open()?;
        ref_target(&repo, &self.notes_ref)
    }

    fn read(&self, oid: Oid) -> Result<Option<String>> {
        let repo = self.open()?;
        let message = match repo.find_note(Some(&self.notes_ref), oid) {
            Ok(note) => note.message().map(strip_note_newline),
            Err(e) if e.code() == ErrorCode::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(message)
    }

    fn write(&self, oid: Oid, content: &str) -> Result<()> {
        let repo = self.open()?;
        let sig = signature(&repo)?;
        repo.note(
            &sig,
            &sig,
            Some(&self.notes_ref),
            oid,
            &format!("{}\n", content),
            true,
        )?;
        debug!(notes_ref = %self.notes_ref, object = %oid, "note written");
        Ok(())
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.read(Self::key_oid(key)?)
    }

    /// Store a plain string under `key`, overwriting any previous value.
    pub fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.write(Self::key_oid(key)?, value)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_string(key)? {
            None => Ok(None),
            Some(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| NotesError::Json {
                    key: key.to_string(),
                    source,
                }),
        }
    }

    /// Store a document under `key`.
    ///
    /// Without `replace`, an existing document for `key` is an error and the
    /// ref is left untouched.
    pub fn set<T: Serialize>(&self, key: &str, doc: &T, replace: bool) -> Result<()> {
        let oid = Self::key_oid(key)?;
        if !replace && self.read(oid)?.is_some() {
            return Err(NotesError::AlreadyExists {
                key: key.to_string(),
            });
        }
        let json = serde_json::to_string(doc).map_err(|source| NotesError::Json {
            key: key.to_string(),
            source,
        })?;
        self.write(oid, &json)
    }

    /// Append an entry to a commit's note log.
    ///
    /// Returns the log as it was before the append (empty if there was none).
    pub fn append_commit_note(&self, commit: &str, text: &str) -> Result<String> {
        let oid = Self::commit_oid(commit)?;
        let prior = self.read(oid)?.unwrap_or_default();
        let updated = if prior.is_empty() {
            text.to_string()
        } else {
            format!("{}{}{}", prior, LOG_SEPARATOR, text)
        };
        self.write(oid, &updated)?;
        Ok(prior)
    }

    pub fn get_commit_notes(&self, commit: &str) -> Result<Option<String>> {
        self.read(Self::commit_oid(commit)?)
    }

    pub fn get_last_commit_note(&self, commit: &str) -> Result<Option<String>> {
        Ok(self
            .get_commit_notes(commit)?
            .and_then(|log| split_entries(&log).last().map(|entry| entry.to_string())))
    }

    /// Reconcile the local notes ref with `other_tip` (any revision spec).
    pub fn sync(&self, other_tip: &str) -> Result<SyncOutcome> {
        let repo = self.open()?;
        let other = repo.revparse_single(other_tip)?.peel_to_commit()?.id();

        let Some(local) = ref_target(&repo, &self.notes_ref)? else {
            repo.reference(&self.notes_ref, other, true, "notes: adopt remote tip")?;
            info!(notes_ref = %self.notes_ref, tip = %other, "notes ref created from other tip");
            return Ok(SyncOutcome::FastForward(other));
        };
        if local == other {
            return Ok(SyncOutcome::UpToDate);
        }

        let base = match repo.merge_base(local, other) {
            Ok(base) => base,
            Err(e) if e.code() == ErrorCode::NotFound => {
                return Err(NotesError::UnrelatedHistories {
                    local: local.to_string(),
                    other: other.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        if base == other {
            return Ok(SyncOutcome::UpToDate);
        }
        if base == local {
            repo.reference(&self.notes_ref, other, true, "notes: fast-forward")?;
            info!(notes_ref = %self.notes_ref, tip = %other, "notes ref fast-forwarded");
            return Ok(SyncOutcome::FastForward(other));
        }

        let base_notes = collect_notes(&repo, base)?;
        let other_notes = collect_notes(&repo, other)?;
        let local_notes = collect_notes(&repo, local)?;

        let names: BTreeSet<&String> = base_notes
            .keys()
            .chain(other_notes.keys())
            .chain(local_notes.keys())
            .collect();

        let mut builder = repo.treebuilder(None)?;
        let mut conflicts = 0usize;
        for name in names {
            let base_text = base_notes.get(name).map(String::as_str);
            let other_text = other_notes.get(name).map(String::as_str);
            let local_text = local_notes.get(name).map(String::as_str);
            if other_text != local_text && base_text != other_text && base_text != local_text {
                conflicts += 1;
            }
            if let Some(merged) = merge_note(base_text, other_text, local_text) {
                let blob = repo.blob(format!("{}\n", merged).as_bytes())?;
                builder.insert(name.as_str(), blob, 0o100644)?;
            }
        }
        let tree = repo.find_tree(builder.write()?)?;

        let sig = signature(&repo)?;
        let local_commit = repo.find_commit(local)?;
        let other_commit = repo.find_commit(other)?;
        let merged = repo.commit(
            Some(&self.notes_ref),
            &sig,
            &sig,
            &format!("Merge notes {} into {}", other, self.notes_ref),
            &tree,
            &[&local_commit, &other_commit],
        )?;

        info!(
            notes_ref = %self.notes_ref,
            local = %local,
            other = %other,
            merged = %merged,
            conflicts,
            "notes merged"
        );
        Ok(SyncOutcome::Merged(merged))
    }

    /// Fetch the same notes ref from `remote` (URL or path) and merge it in.
    pub fn fetch_and_sync(&self, remote: &str) -> Result<SyncOutcome> {
        let scratch = self.scratch_ref();
        {
            let repo = self.open()?;
            let mut anonymous = repo.remote_anonymous(remote)?;
            let refspec = format!("+{}:{}", self.notes_ref, scratch);
            anonymous.fetch(&[refspec.as_str()], None, None)?;
        }
        let fetched = {
            let repo = self.open()?;
            ref_target(&repo, &scratch)?
        };
        match fetched {
            Some(tip) => self.sync(&tip.to_string()),
            None => {
                debug!(remote, notes_ref = %self.notes_ref, "remote has no notes yet");
                Ok(SyncOutcome::UpToDate)
            }
        }
    }

    /// Publish the local notes ref to `remote`.
    pub fn push(&self, remote: &str) -> Result<()> {
        let repo = self.open()?;
        let mut anonymous = repo.remote_anonymous(remote)?;
        let refspec = format!("{0}:{0}", self.notes_ref);
        anonymous.push(&[refspec.as_str()], None)?;
        info!(remote, notes_ref = %self.notes_ref, "notes pushed");
        Ok(())
    }

    fn scratch_ref(&self) -> String {
        let name = self
            .notes_ref
            .strip_prefix("refs/")
            .unwrap_or(&self.notes_ref);
        format!("refs/patchbridge/fetched/{}", name)
    }
}

fn strip_note_newline(message: &str) -> String {
    message.strip_suffix('\n').unwrap_or(message).to_string()
}

fn ref_target(repo: &Repository, name: &str) -> Result<Option<Oid>> {
    match repo.refname_to_id(name) {
        Ok(oid) => Ok(Some(oid)),
        Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn signature(repo: &Repository) -> Result<Signature<'static>> {
    match repo.signature() {
        Ok(sig) => Ok(sig),
        Err(_) => Ok(Signature::now("patchbridge", "patchbridge@localhost")?),
    }
}

/// Every note in a notes commit, keyed by annotated object id (hex).
///
/// Handles fan-out trees (`ab/cdef...`) by concatenating path components.
fn collect_notes(repo: &Repository, commit: Oid) -> Result<BTreeMap<String, String>> {
    let tree = repo.find_commit(commit)?.tree()?;
    let mut blobs = Vec::new();
    tree.walk(TreeWalkMode::PreOrder, |root, entry| {
        if entry.kind() == Some(ObjectType::Blob)
            && let Some(name) = entry.name()
        {
            let object = format!("{}{}", root.replace('/', ""), name);
            blobs.push((object, entry.id()));
        }
        TreeWalkResult::Ok
    })?;

    let mut notes = BTreeMap::new();
    for (object, blob) in blobs {
        let blob = repo.find_blob(blob)?;
        let text = String::from_utf8_lossy(blob.content());
        notes.insert(object, strip_note_newline(&text));
    }
    Ok(notes)
}
