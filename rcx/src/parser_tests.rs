//! Tests for the robocopy output parser

use test_case::test_case;

use crate::parser::{
    match_current_file, parse_line, parse_percentage, parse_total_files, MatcherKind, MATCHER_ORDER,
};

#[test_case("  45.3%", Some(45.3) ; "decimal")]
#[test_case("100%", Some(100.0) ; "whole")]
#[test_case("  12 %  ", Some(12.0) ; "space before sign")]
#[test_case("New File  1024  a.txt", None ; "no percentage")]
fn test_parse_percentage(line: &str, expected: Option<f64>) {
    assert_eq!(parse_percentage(line), expected);
}

#[test]
fn test_percentage_above_hundred_is_not_clamped_here() {
    assert_eq!(parse_percentage("150%"), Some(150.0));
}

#[test]
fn test_parse_total_files() {
    let line = "    Files :       120         0       120         0         0         0";
    assert_eq!(parse_total_files(line), Some(120));
    assert_eq!(parse_total_files("  Files : *.*"), None);
    assert_eq!(parse_total_files("Dirs :  4"), None);
}

#[test]
fn test_matcher_order_is_fixed() {
    assert_eq!(
        MATCHER_ORDER,
        [MatcherKind::StatusLine, MatcherKind::FullPath, MatcherKind::TrailingName]
    );
}

#[test]
fn test_status_line_match() {
    let found = match_current_file("\t  New File  \t\t  2.5 m\tholiday photo.jpg").unwrap();
    assert_eq!(found.matcher, MatcherKind::StatusLine);
    assert_eq!(found.name, "holiday photo.jpg");

    let found = match_current_file("    *EXTRA File    1,024   old.log").unwrap();
    assert_eq!(found.matcher, MatcherKind::StatusLine);
    assert_eq!(found.name, "old.log");
}

#[test]
fn test_status_line_ignores_case() {
    let found = match_current_file("  NEWER   512   report.docx").unwrap();
    assert_eq!(found.matcher, MatcherKind::StatusLine);
    assert_eq!(found.name, "report.docx");
}

#[test]
fn test_status_line_beats_full_path() {
    // both the status and the full-path matcher accept this line
    let line = "  New File   4096   C:\\Data\\Reports\\q1.xlsx";

    assert_eq!(
        MatcherKind::FullPath.extract(line).as_deref(),
        Some("q1.xlsx")
    );
    let found = match_current_file(line).unwrap();
    assert_eq!(found.matcher, MatcherKind::StatusLine);
    assert_eq!(found.name, "C:\\Data\\Reports\\q1.xlsx");
}

#[test]
fn test_full_path_match() {
    let found = match_current_file("  ERROR 5 (0x00000005) Copying File C:\\Users\\me\\notes.txt").unwrap();
    assert_eq!(found.matcher, MatcherKind::FullPath);
    assert_eq!(found.name, "notes.txt");
}

#[test]
fn test_trailing_name_needs_status_keyword() {
    // keyword present but no size column, so only the trailing matcher applies
    let found = match_current_file("file was modified: report.pdf").unwrap();
    assert_eq!(found.matcher, MatcherKind::TrailingName);
    assert_eq!(found.name, "report.pdf");

    assert_eq!(match_current_file("copied to backup archive.zip"), None);
}

#[test]
fn test_trailing_name_keywords_are_case_sensitive() {
    assert_eq!(MatcherKind::TrailingName.extract("MODIFIED report.pdf"), None);
}

#[test]
fn test_parse_line_collects_independent_signals() {
    let parsed = parse_line("  New File  100  a.txt  45.3%");
    assert_eq!(parsed.percentage, Some(45.3));
    assert!(parsed.current_file.is_some());
    assert_eq!(parsed.total_files, None);

    assert!(parse_line("------------------------------------").is_empty());
}
