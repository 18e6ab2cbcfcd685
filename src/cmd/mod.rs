//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                                             |
//! |----------|--------------------------------------------------------------|
//! | `events` | `HandlePush`, `HandleComment`                                |
//! | `graph`  | `IdentifyMerge`, `IdentifyUpstream`, `UpdateCommitMapping`   |
//! | `notes`  | `Notes`                                                      |
//! | `config` | `Config`                                                     |

pub mod config;
pub mod events;
pub mod graph;
pub mod notes;

pub use config::cmd_config;
pub use events::{cmd_handle_comment, cmd_handle_push};
pub use graph::{cmd_identify_merge, cmd_identify_upstream, cmd_update_commit_mapping};
pub use notes::cmd_notes;
