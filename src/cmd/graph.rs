//! Commit-graph queries — `identify-merge`, `identify-upstream`,
//! `update-commit-mapping`.

use anyhow::Result;

use patchbridge::bridge_config::BridgeConfig;
use patchbridge::graph::CommitGraphAnalyzer;

pub fn cmd_identify_merge(config: &BridgeConfig, branch: &str, commit: &str) -> Result<()> {
    let analyzer = CommitGraphAnalyzer::from_config(config);
    match analyzer.identify_merge_commit(branch, commit)? {
        Some(merge) => println!("{}", merge),
        None => eprintln!("No merge commit integrated {} into {}", commit, branch),
    }
    Ok(())
}

pub fn cmd_identify_upstream(config: &BridgeConfig, commit: &str) -> Result<()> {
    let analyzer = CommitGraphAnalyzer::from_config(config);
    match analyzer.identify_upstream_commit(commit)? {
        Some(upstream) => println!("{}", upstream),
        None => eprintln!("No upstream commit known for {}", commit),
    }
    Ok(())
}

pub fn cmd_update_commit_mapping(config: &BridgeConfig, message_id: &str) -> Result<()> {
    let analyzer = CommitGraphAnalyzer::from_config(config);
    if analyzer.update_commit_mapping(message_id)? {
        println!("Updated commit mapping for {}", message_id);
    } else {
        println!("Commit mapping for {} unchanged", message_id);
    }
    Ok(())
}
