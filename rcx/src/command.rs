//! Command-line construction for robocopy

use std::path::{Path, PathBuf};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::request::CopyRequest;

/// Executable launched for every copy
pub const TOOL_PROGRAM: &str = "robocopy.exe";

static LOG_FLAG: Lazy<Regex> = Lazy::new(|| Regex::new(r#"/LOG:"([^"]+)""#).unwrap());

/// Build the argument string handed to the tool.
///
/// Token order is fixed: quoted source and final destination, `/E`, `/MIR`,
/// conflict flags, `/COPY:`, `/MT:`, `/R:`, `/W:`, `/V`, `/LOG:`. A skip choice
/// emits `/XC /XN /XO` and suppresses the lone exclude-older `/XO`.
pub fn build_command_line(request: &CopyRequest, log_path: Option<&Path>) -> String {
    let options = request.options();
    let mut tokens = vec![
        quote(request.source()),
        quote(&request.final_destination()),
    ];

    if options.recurse {
        tokens.push("/E".to_string());
    }
    if options.mirror {
        tokens.push("/MIR".to_string());
    }

    if request.skips_existing() {
        tokens.push("/XC /XN /XO".to_string());
    } else if options.exclude_older {
        tokens.push("/XO".to_string());
    }

    let letters = options.attributes.letters();
    if !letters.is_empty() {
        tokens.push(format!("/COPY:{}", letters));
    }

    if let Some(threads) = options.threads {
        tokens.push(format!("/MT:{}", threads));
    }

    tokens.push(format!("/R:{}", options.retry_count));
    tokens.push(format!("/W:{}", options.retry_wait_secs));

    if options.verbose {
        tokens.push("/V".to_string());
    }

    if let Some(log_path) = log_path {
        tokens.push(format!("/LOG:{}", quote(log_path)));
    }

    tokens.join(" ")
}

fn quote(path: &Path) -> String {
    format!("\"{}\"", path.display())
}

/// Log file path carried by a `/LOG:"..."` token, if any
pub fn extract_log_path(command_line: &str) -> Option<PathBuf> {
    LOG_FLAG
        .captures(command_line)
        .and_then(|caps| caps.get(1))
        .map(|m| PathBuf::from(m.as_str()))
}

/// Split an argument string into separate arguments.
///
/// Whitespace separates arguments; double quotes group and are removed.
/// Used where the platform has no raw command-line passthrough.
pub fn split_command_line(command_line: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in command_line.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    args.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        args.push(current);
    }
    args
}
