//! Comment body parsing.
//!
//! The first token of the comment is the verb (`/allow`, `/disallow`,
//! `/submit`, `/preview`, `/cc`); the rest of the comment is its argument.

use regex::Regex;
use std::sync::LazyLock;

use super::{CcEntry, Command};

static USERNAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]+(?:-[A-Za-z0-9]+)*$").unwrap());

// `"Display Name" <addr>`, `Display Name <addr>` or `<addr>`
static NAMED_ADDRESS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^(?:"([^"]*)"|([^"<]*?))\s*<([^<>\s]+@[^<>\s]+)>$"#).unwrap());

static BARE_ADDRESS_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s<>@]+@[^\s<>@]+$").unwrap());

const MAX_USERNAME_LEN: usize = 39;

/// Forge login rules: alphanumerics and single inner hyphens, at most 39 chars.
pub fn is_valid_username(name: &str) -> bool {
    name.len() <= MAX_USERNAME_LEN && USERNAME_REGEX.is_match(name)
}

/// Parse one comment body into the command it asks for.
pub fn parse_command(body: &str) -> Command {
    let body = body.trim();
    if !body.starts_with('/') {
        return Command::Unrecognized(None);
    }

    let (verb, argument) = match body.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (body, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "/allow" => parse_user(argument).map_or_else(reject, Command::Allow),
        "/disallow" => parse_user(argument).map_or_else(reject, Command::Disallow),
        "/submit" => Command::Submit,
        "/preview" => Command::Preview,
        "/cc" => {
            let entries = parse_recipients(argument);
            if entries.is_empty() {
                Command::Unrecognized(Some(verb.to_string()))
            } else {
                Command::Cc(entries)
            }
        }
        _ => Command::Unrecognized(Some(verb.to_string())),
    }
}

fn reject(reason: String) -> Command {
    Command::Reject { reason }
}

fn parse_user(argument: &str) -> Result<Option<String>, String> {
    let Some(name) = argument.split_whitespace().next() else {
        return Ok(None);
    };
    let name = name.strip_prefix('@').unwrap_or(name);
    if is_valid_username(name) {
        Ok(Some(name.to_string()))
    } else {
        Err(format!("`{}` is not a valid GitHub username.", name))
    }
}

/// Split on commas and newlines that are not inside a quoted name.
fn split_recipients(argument: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in argument.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' | '\n' if !in_quotes => {
                parts.push(&argument[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&argument[start..]);
    parts
}

fn parse_cc_entry(entry: &str) -> Option<CcEntry> {
    let entry = entry.trim();
    if let Some(cap) = NAMED_ADDRESS_REGEX.captures(entry) {
        let name = cap
            .get(1)
            .or_else(|| cap.get(2))
            .map(|m| m.as_str().trim())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        return Some(CcEntry {
            name,
            email: cap[3].to_string(),
        });
    }
    if BARE_ADDRESS_REGEX.is_match(entry) {
        return Some(CcEntry {
            name: None,
            email: entry.to_string(),
        });
    }
    None
}

/// Addresses in a comma or newline separated recipient list. Entries without
/// an address are skipped.
pub fn parse_recipients(argument: &str) -> Vec<CcEntry> {
    split_recipients(argument)
        .into_iter()
        .filter_map(parse_cc_entry)
        .collect()
}
