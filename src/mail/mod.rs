//! The mail collaborator: turns a pull request into a patch series.
//!
//! Composition and delivery live outside this crate. `CommandMailer` hands
//! the request to an external program; tests use in-memory doubles.

pub mod command;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::github::CommitRecord;
use crate::notes::PatchSeriesMetadata;

pub use command::CommandMailer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SendMode {
    /// Deliver to the list
    Submit,
    /// Deliver only to the requesting user
    Preview,
}

impl SendMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SendMode::Submit => "submit",
            SendMode::Preview => "preview",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchSeriesRequest {
    pub mode: SendMode,
    pub metadata: PatchSeriesMetadata,
    /// Tag naming this iteration, e.g. `pr-59/somebody/topic-v2`
    pub tag: String,
    pub commits: Vec<CommitRecord>,
    /// Pull request title, used as the cover letter subject
    pub title: String,
    /// Pull request description, used as the cover letter body
    pub description: String,
    /// `Cc:` recipients listed in the description
    #[serde(default)]
    pub cc: Vec<String>,
    /// Address receiving a preview
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_recipient: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentPatch {
    pub original_commit: String,
    pub message_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentSeries {
    #[serde(default)]
    pub cover_letter_message_id: Option<String>,
    #[serde(default)]
    pub patches: Vec<SentPatch>,
}

impl SentSeries {
    /// The id the series is known by: the cover letter, or the single patch.
    pub fn primary_message_id(&self) -> Option<&str> {
        self.cover_letter_message_id
            .as_deref()
            .or_else(|| self.patches.first().map(|patch| patch.message_id.as_str()))
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send_series(&self, request: &PatchSeriesRequest) -> anyhow::Result<SentSeries>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_message_id_prefers_cover_letter() {
        let series = SentSeries {
            cover_letter_message_id: Some("cover@x".into()),
            patches: vec![SentPatch {
                original_commit: "abc".into(),
                message_id: "patch@x".into(),
            }],
        };
        assert_eq!(series.primary_message_id(), Some("cover@x"));
    }

    #[test]
    fn test_primary_message_id_single_patch() {
        let series = SentSeries {
            cover_letter_message_id: None,
            patches: vec![SentPatch {
                original_commit: "abc".into(),
                message_id: "patch@x".into(),
            }],
        };
        assert_eq!(series.primary_message_id(), Some("patch@x"));
        assert_eq!(SentSeries::default().primary_message_id(), None);
    }
}
