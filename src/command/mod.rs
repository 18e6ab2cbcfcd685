//! Slash commands issued in pull request comments.

pub mod parser;

use serde::Serialize;

pub use parser::{is_valid_username, parse_command, parse_recipients};

/// One recipient requested with `/cc`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CcEntry {
    pub name: Option<String>,
    pub email: String,
}

impl CcEntry {
    /// `Name <email>`, or the bare address when there is no name.
    pub fn to_header_value(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// The action a comment asks for. Exactly one per comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "argument", rename_all = "lowercase")]
pub enum Command {
    /// `/allow [user]`; `None` means the pull request author
    Allow(Option<String>),
    /// `/disallow [user]`; `None` means the pull request author
    Disallow(Option<String>),
    Submit,
    Preview,
    Cc(Vec<CcEntry>),
    /// A recognized command with an unusable argument
    Reject { reason: String },
    /// Not a command (`None`), or an unknown `/verb`
    Unrecognized(Option<String>),
}

impl Command {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Allow(_) => "allow",
            Command::Disallow(_) => "disallow",
            Command::Submit => "submit",
            Command::Preview => "preview",
            Command::Cc(_) => "cc",
            Command::Reject { .. } => "reject",
            Command::Unrecognized(_) => "unrecognized",
        }
    }
}
