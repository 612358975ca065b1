//! Classification of robocopy exit codes

use std::fmt;
use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};

/// Lowest code that signals failed copies
pub const FAILURE_THRESHOLD: i32 = 8;

/// Lowest code that signals a fatal error
pub const FATAL_THRESHOLD: i32 = 16;

/// Overall outcome of a finished invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitClass {
    /// Codes 0-7: informational combinations, no failures
    Success,
    /// Codes 8-15: some files failed to copy
    Partial,
    /// 16 and above, or no code at all: nothing was copied
    Fatal,
}

impl ExitClass {
    pub fn from_code(code: Option<i32>) -> Self {
        match code {
            Some(c) if (0..FAILURE_THRESHOLD).contains(&c) => ExitClass::Success,
            Some(c) if (FAILURE_THRESHOLD..FATAL_THRESHOLD).contains(&c) => ExitClass::Partial,
            _ => ExitClass::Fatal,
        }
    }
}

impl fmt::Display for ExitClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitClass::Success => write!(f, "success"),
            ExitClass::Partial => write!(f, "partial failure"),
            ExitClass::Fatal => write!(f, "fatal"),
        }
    }
}

/// Human-readable meaning of an exit code
pub fn describe(code: Option<i32>) -> &'static str {
    match code {
        Some(0) => "No files were copied. No failure was encountered.",
        Some(1) => "All files were copied successfully.",
        Some(2) => "Extra files or directories were detected in the destination.",
        Some(3) => "Some files were copied. Additional files were present.",
        Some(4) => "Some mismatched files or directories were detected. No files were copied.",
        Some(5) => "Some files were copied. Some files were mismatched.",
        Some(6) => "Additional files and mismatched files exist. No files were copied.",
        Some(7) => "Files were copied, a file mismatch was present, and additional files were present.",
        Some(8) => "Several files did not copy.",
        Some(c) if (9..FATAL_THRESHOLD).contains(&c) => "Some files did not copy; other conditions were also reported.",
        Some(c) if c >= FATAL_THRESHOLD => "Serious error. Robocopy did not copy any files.",
        Some(_) => "Unknown exit code.",
        None => "The process ended without an exit code.",
    }
}

/// Exit code with its class and description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub class: ExitClass,
    pub description: String,
}

impl ExitReport {
    pub fn from_code(code: Option<i32>) -> Self {
        Self {
            code,
            class: ExitClass::from_code(code),
            description: describe(code).to_string(),
        }
    }

    /// Any code below 8 counts as overall success
    pub fn is_success(&self) -> bool {
        self.class == ExitClass::Success
    }

    /// Turn failing classes into their error variants
    pub fn into_result(self) -> Result<Self> {
        match self.class {
            ExitClass::Success => Ok(self),
            ExitClass::Partial => Err(CopyError::SubprocessPartial {
                code: self.code.unwrap_or(FAILURE_THRESHOLD),
                description: self.description,
            }),
            ExitClass::Fatal => Err(CopyError::SubprocessFatal {
                code: self.code.unwrap_or(-1),
                description: self.description,
            }),
        }
    }
}

impl fmt::Display for ExitReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "Exit code {}: {}", code, self.description),
            None => f.write_str(&self.description),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, ExitClass::Success)]
    #[case(1, ExitClass::Success)]
    #[case(3, ExitClass::Success)]
    #[case(7, ExitClass::Success)]
    #[case(8, ExitClass::Partial)]
    #[case(15, ExitClass::Partial)]
    #[case(16, ExitClass::Fatal)]
    #[case(255, ExitClass::Fatal)]
    #[case(-1, ExitClass::Fatal)]
    fn test_classification(#[case] code: i32, #[case] class: ExitClass) {
        assert_eq!(ExitClass::from_code(Some(code)), class);
    }

    #[test]
    fn test_missing_code_is_fatal() {
        assert_eq!(ExitClass::from_code(None), ExitClass::Fatal);
    }

    #[test]
    fn test_descriptions_are_distinct_for_defined_codes() {
        let mut all: Vec<&str> = (0..=8).map(|c| describe(Some(c))).collect();
        all.push(describe(Some(16)));
        let count = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), count);
        assert_eq!(describe(Some(-3)), "Unknown exit code.");
    }

    #[test]
    fn test_into_result() {
        assert!(ExitReport::from_code(Some(1)).into_result().is_ok());

        match ExitReport::from_code(Some(8)).into_result() {
            Err(CopyError::SubprocessPartial { code, .. }) => assert_eq!(code, 8),
            other => panic!("Expected SubprocessPartial, got {:?}", other),
        }

        match ExitReport::from_code(Some(16)).into_result() {
            Err(CopyError::SubprocessFatal { code, .. }) => assert_eq!(code, 16),
            other => panic!("Expected SubprocessFatal, got {:?}", other),
        }
    }

    #[test]
    fn test_report_json_shape() {
        let value = serde_json::to_value(ExitReport::from_code(Some(8))).unwrap();

        assert_eq!(value["code"], 8);
        assert_eq!(value["class"], "Partial");
        assert!(value["description"].as_str().unwrap().len() > 0);
    }
}
