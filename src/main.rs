use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use patchbridge::bridge_config::BridgeConfig;
use patchbridge::telemetry;

mod cmd;

#[derive(Parser)]
#[command(name = "patchbridge")]
#[command(version, about = "Bridge pull requests to an email patch workflow")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Work repository holding the notes refs (defaults to the current directory)
    #[arg(long, global = true)]
    pub repo_dir: Option<PathBuf>,

    /// Path to bridge.toml. Defaults to .patchbridge/bridge.toml in the repository.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override policy.max_commits
    #[arg(long, global = true)]
    pub max_commits: Option<u32>,

    /// Override notes.notes_ref
    #[arg(long, global = true)]
    pub notes_ref: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pull request gate after a push
    HandlePush {
        /// Pull request number
        pr: u64,
    },
    /// Act on a command issued in a pull request comment
    HandleComment {
        /// Comment id
        comment_id: u64,
    },
    /// Find the merge commit that integrated a commit into an upstream branch
    IdentifyMerge {
        /// Upstream branch, or a full ref name
        branch: String,
        commit: String,
    },
    /// Find the upstream commit a contributed commit was applied as
    IdentifyUpstream { commit: String },
    /// Record the upstream commit of a mailed patch in its metadata
    UpdateCommitMapping { message_id: String },
    /// Inspect or edit the notes ref
    Notes {
        #[command(subcommand)]
        command: NotesCommands,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum NotesCommands {
    /// Print the raw note stored under a key
    Get { key: String },
    /// Store a raw note under a key, replacing any previous value
    Set { key: String, value: String },
    /// Append an entry to a commit's note log
    Append { commit: String, text: String },
    /// Print a commit's note log
    Show { commit: String },
    /// Merge another notes tip (ref name or object id) into the local ref
    Sync { other_tip: String },
    /// Fetch the notes ref from a remote and merge it
    Fetch { remote: String },
    /// Push the notes ref to a remote
    Push { remote: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    Show,
    Validate,
}

impl Cli {
    /// Load configuration and apply CLI overrides on top of file and environment.
    pub fn load_config(&self) -> Result<BridgeConfig> {
        let repo_dir = match self.repo_dir.clone() {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to get current directory")?,
        };
        let mut config = BridgeConfig::load(repo_dir, self.config.as_deref())?;
        if let Some(max) = self.max_commits {
            config.toml.policy.max_commits = max;
        }
        if let Some(notes_ref) = &self.notes_ref {
            config.toml.notes.notes_ref = notes_ref.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.verbose, cli.log_json);

    let config = cli.load_config()?;

    match &cli.command {
        Commands::HandlePush { pr } => cmd::cmd_handle_push(&config, *pr).await?,
        Commands::HandleComment { comment_id } => {
            cmd::cmd_handle_comment(&config, *comment_id).await?
        }
        Commands::IdentifyMerge { branch, commit } => {
            cmd::cmd_identify_merge(&config, branch, commit)?
        }
        Commands::IdentifyUpstream { commit } => cmd::cmd_identify_upstream(&config, commit)?,
        Commands::UpdateCommitMapping { message_id } => {
            cmd::cmd_update_commit_mapping(&config, message_id)?
        }
        Commands::Notes { command } => cmd::cmd_notes(&config, command.clone())?,
        Commands::Config { command } => cmd::cmd_config(&config, command.clone())?,
    }

    Ok(())
}
