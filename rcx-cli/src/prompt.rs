//! Answers for pre-flight advisories, from flags or from the terminal

use anyhow::{bail, Result};
use console::style;
use dialoguer::{theme::ColorfulTheme, Confirm, Select};

use rcx::{Advisory, Decision, FileConflictChoice};

/// How advisories get answered without asking
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionPolicy {
    /// Accept every advisory; conflicts overwrite unless `on_conflict` says otherwise
    pub assume_yes: bool,
    pub on_conflict: Option<FileConflictChoice>,
    /// Whether a person can be asked
    pub interactive: bool,
}

impl DecisionPolicy {
    /// Decision reachable from flags alone
    pub fn unattended(&self, advisory: &Advisory) -> Option<Decision> {
        match advisory {
            Advisory::FileConflicts(_) => match self.on_conflict {
                Some(choice) => Some(Decision::Conflict(choice)),
                None if self.assume_yes => Some(Decision::Proceed),
                None => None,
            },
            _ if self.assume_yes => Some(Decision::Proceed),
            _ => None,
        }
    }

    pub fn decide(&self, advisory: &Advisory) -> Result<Decision> {
        if let Some(decision) = self.unattended(advisory) {
            return Ok(decision);
        }
        if !self.interactive {
            bail!(
                "{}\nA decision is required; rerun with --yes or --on-conflict",
                advisory
            );
        }
        ask(advisory)
    }
}

fn ask(advisory: &Advisory) -> Result<Decision> {
    let theme = ColorfulTheme::default();

    match advisory {
        Advisory::FileConflicts(report) => {
            println!("\n{}", style("Existing files found").yellow().bold());
            println!("{}\n", report.summary());

            let choices = [
                "Overwrite existing files",
                "Skip existing files",
                "Cancel the copy",
            ];
            let selection = Select::with_theme(&theme)
                .with_prompt("How should existing files be handled?")
                .items(&choices)
                .default(1)
                .interact()?;

            let choice = match selection {
                0 => FileConflictChoice::Overwrite,
                1 => FileConflictChoice::Skip,
                _ => FileConflictChoice::Cancel,
            };
            Ok(Decision::Conflict(choice))
        }
        Advisory::SystemPath { .. } => {
            println!("\n{}", style("System location").red().bold());
            println!("{}\n", advisory);
            confirm(&theme, "Copying here may affect the operating system. Continue anyway?")
        }
        Advisory::InsufficientSpace(assessment) => {
            println!("\n{}", style("Insufficient disk space").red().bold());
            println!("{}\n", assessment.message());
            confirm(&theme, "The copy will likely fail partway. Continue anyway?")
        }
    }
}

fn confirm(theme: &ColorfulTheme, prompt: &str) -> Result<Decision> {
    let proceed = Confirm::with_theme(theme)
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(if proceed { Decision::Proceed } else { Decision::Abort })
}

/// Ask before launching the tool with `command_line`
pub fn confirm_execution(program: &str, command_line: &str) -> Result<bool> {
    println!("\n{}", style("About to run:").bold());
    println!("  {} {}\n", program, command_line);

    let proceed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Start the copy?")
        .default(true)
        .interact()?;
    Ok(proceed)
}
