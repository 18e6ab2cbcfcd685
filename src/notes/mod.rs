//! Versioned metadata stored in git notes.
//!
//! - `store` — `NotesStore`: documents and commit logs on one notes ref,
//!   plus the sync protocol reconciling diverged tips
//! - `merge` — the three-way merge policy used by sync
//! - `documents` — typed documents living in the store

pub mod documents;
pub mod merge;
pub mod store;

pub use documents::{GlobalConfig, MailMetadata, PatchSeriesMetadata, PreviewMetadata};
pub use store::{NotesStore, SyncOutcome};
