//! Forge event handling — `patchbridge handle-push` and `handle-comment`.

use anyhow::Result;
use std::sync::Arc;

use patchbridge::bridge_config::BridgeConfig;
use patchbridge::github::GitHubClient;
use patchbridge::mail::CommandMailer;
use patchbridge::orchestrator::Orchestrator;

fn orchestrator(config: &BridgeConfig) -> Result<Orchestrator> {
    let forge = Arc::new(GitHubClient::from_config(config)?);
    let mailer = Arc::new(CommandMailer::from_config(config)?);
    Ok(Orchestrator::new(config, forge, mailer))
}

pub async fn cmd_handle_push(config: &BridgeConfig, pr: u64) -> Result<()> {
    orchestrator(config)?.handle_push(pr).await?;
    println!("Pull request #{} passed all checks.", pr);
    Ok(())
}

pub async fn cmd_handle_comment(config: &BridgeConfig, comment_id: u64) -> Result<()> {
    orchestrator(config)?.handle_comment(comment_id).await?;
    Ok(())
}
