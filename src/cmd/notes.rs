//! Direct access to the notes ref — `patchbridge notes`.

use anyhow::Result;

use super::super::NotesCommands;
use patchbridge::bridge_config::BridgeConfig;
use patchbridge::notes::{NotesStore, SyncOutcome};

pub fn cmd_notes(config: &BridgeConfig, command: NotesCommands) -> Result<()> {
    let store = NotesStore::new(&config.repo_dir, config.notes_ref());

    match command {
        NotesCommands::Get { key } => match store.get_string(&key)? {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("No note for key '{}' in {}", key, store.notes_ref()),
        },
        NotesCommands::Set { key, value } => {
            store.set_string(&key, &value)?;
        }
        NotesCommands::Append { commit, text } => {
            store.append_commit_note(&commit, &text)?;
        }
        NotesCommands::Show { commit } => match store.get_commit_notes(&commit)? {
            Some(notes) => println!("{}", notes),
            None => anyhow::bail!("No notes for commit {}", commit),
        },
        NotesCommands::Sync { other_tip } => report(store.sync(&other_tip)?),
        NotesCommands::Fetch { remote } => report(store.fetch_and_sync(&remote)?),
        NotesCommands::Push { remote } => {
            store.push(&remote)?;
            println!("Pushed {} to {}", store.notes_ref(), remote);
        }
    }

    Ok(())
}

fn report(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::UpToDate => println!("Already up to date."),
        SyncOutcome::FastForward(oid) => println!("Fast-forwarded to {}", oid),
        SyncOutcome::Merged(oid) => println!("Merged as {}", oid),
    }
}
