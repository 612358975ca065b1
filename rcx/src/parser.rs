//! Line parser for robocopy console output
//!
//! Each stdout line is scanned independently for three signals: a completion
//! percentage, the file currently being processed, and the "Files : N" summary
//! count. File names are extracted by an ordered list of matchers; the first
//! one that matches wins.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static PERCENTAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").unwrap());

static TOTAL_FILES: Lazy<Regex> = Lazy::new(|| Regex::new(r"Files\s*:\s*(\d+)").unwrap());

static STATUS_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(?:New File|Newer|Older|same|modified|\*EXTRA File)\s+[\d.,]+\s*[KMG]?B?\s+(.+)$")
        .unwrap()
});

static FULL_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[A-Za-z]:\\(?:[^\\/:*?"<>|\r\n]+\\)*([^\\/:*?"<>|\r\n]+\.\w+)"#).unwrap()
});

static TRAILING_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+([^\s]+\.\w{2,4})\s*$").unwrap());

/// Keywords that gate the trailing-name matcher (case-sensitive)
const STATUS_KEYWORDS: &[&str] = &["New File", "Newer", "Older", "modified", "same"];

/// Named file matchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatcherKind {
    /// Status keyword, size column, then the file name
    StatusLine,
    /// Absolute drive-letter path ending in a file extension
    FullPath,
    /// Last whitespace-separated token with a short extension on a status line
    TrailingName,
}

/// Order in which matchers are tried
pub const MATCHER_ORDER: [MatcherKind; 3] = [
    MatcherKind::StatusLine,
    MatcherKind::FullPath,
    MatcherKind::TrailingName,
];

impl MatcherKind {
    /// File name extracted by this matcher alone
    pub fn extract(&self, line: &str) -> Option<String> {
        let captured = match self {
            MatcherKind::StatusLine => STATUS_LINE.captures(line)?.get(1)?.as_str().trim(),
            MatcherKind::FullPath => FULL_PATH.captures(line)?.get(1)?.as_str(),
            MatcherKind::TrailingName => {
                if !STATUS_KEYWORDS.iter().any(|k| line.contains(k)) {
                    return None;
                }
                TRAILING_NAME.captures(line)?.get(1)?.as_str()
            }
        };
        if captured.is_empty() {
            None
        } else {
            Some(captured.to_string())
        }
    }
}

/// File name found on a line and the matcher that found it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
    pub matcher: MatcherKind,
    pub name: String,
}

/// Every signal found on a single stdout line
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedLine {
    pub percentage: Option<f64>,
    pub current_file: Option<FileMatch>,
    pub total_files: Option<usize>,
}

impl ParsedLine {
    pub fn is_empty(&self) -> bool {
        self.percentage.is_none() && self.current_file.is_none() && self.total_files.is_none()
    }
}

/// First percentage token on the line, unclamped
pub fn parse_percentage(line: &str) -> Option<f64> {
    PERCENTAGE
        .captures(line)?
        .get(1)?
        .as_str()
        .parse::<f64>()
        .ok()
}

/// Count from a "Files : N" summary line
pub fn parse_total_files(line: &str) -> Option<usize> {
    TOTAL_FILES.captures(line)?.get(1)?.as_str().parse().ok()
}

/// Current file on the line, using the first matcher that succeeds
pub fn match_current_file(line: &str) -> Option<FileMatch> {
    MATCHER_ORDER.iter().find_map(|matcher| {
        matcher.extract(line).map(|name| FileMatch {
            matcher: *matcher,
            name,
        })
    })
}

pub fn parse_line(line: &str) -> ParsedLine {
    ParsedLine {
        percentage: parse_percentage(line),
        current_file: match_current_file(line),
        total_files: parse_total_files(line),
    }
}
