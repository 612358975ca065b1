//! Terminal rendering of progress events and pre-flight findings

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use rcx::session::shorten_name;
use rcx::{CopyError, Notice, OutputStream, ProgressChannel, ProgressEvent, VerificationReport};

const GAUGE_LENGTH: u64 = 100;

/// Live view of one tool run
pub struct ProgressView {
    bar: ProgressBar,
    show_output: bool,
    files_total: Option<usize>,
}

impl ProgressView {
    pub fn new(show_output: bool) -> Self {
        let bar = ProgressBar::new(GAUGE_LENGTH);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {prefix:>6} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar.set_message("Preparing");
        Self::with_bar(bar, show_output)
    }

    fn with_bar(bar: ProgressBar, show_output: bool) -> Self {
        Self {
            bar,
            show_output,
            files_total: None,
        }
    }

    /// Consume events until the channel closes
    pub async fn follow(mut self, mut channel: ProgressChannel) {
        while let Some(event) = channel.recv().await {
            self.apply(&event);
        }
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }

    pub fn apply(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Started {
                program,
                command_line,
                log_path,
                ..
            } => {
                self.bar.println(format!(
                    "{} {} {}",
                    style("Running").cyan().bold(),
                    program.display(),
                    command_line
                ));
                if let Some(path) = log_path {
                    self.bar.println(format!("  Log: {}", path.display()));
                }
            }
            ProgressEvent::Output { stream, line } => match stream {
                OutputStream::Stderr => self.bar.println(format!("{}", style(line).red())),
                OutputStream::Stdout if self.show_output => self.bar.println(line),
                OutputStream::Stdout => {}
            },
            // status text, including the ETA, arrives as Status events
            ProgressEvent::Percentage { value, .. } => {
                self.bar.set_position(value.clamp(0.0, 100.0).round() as u64);
                self.bar.set_prefix(format!("{:.1}%", value));
            }
            ProgressEvent::CurrentFile {
                name,
                processed,
                total,
            } => {
                let total = total.or(self.files_total);
                let counter = match total {
                    Some(total) => format!("{}/{}", processed, total),
                    None => processed.to_string(),
                };
                self.bar
                    .set_message(format!("Copying: {} ({})", shorten_name(name), counter));
            }
            ProgressEvent::TotalFiles { total } => {
                self.files_total = Some(*total);
            }
            ProgressEvent::Status { text } => self.bar.set_message(text.clone()),
            ProgressEvent::Warning { message } => {
                self.bar
                    .println(format!("{} {}", style("warning:").yellow().bold(), message));
            }
            ProgressEvent::Finished {
                exit_code,
                cancelled,
                duration,
            } => {
                let summary = if *cancelled {
                    format!("Cancelled after {:.1}s", duration.as_secs_f64())
                } else {
                    let code = exit_code.map_or_else(|| "none".to_string(), |c| c.to_string());
                    format!("Finished in {:.1}s (exit code {})", duration.as_secs_f64(), code)
                };
                self.bar.finish_with_message(summary);
            }
        }
    }

    #[cfg(test)]
    fn position(&self) -> u64 {
        self.bar.position()
    }

    #[cfg(test)]
    fn message(&self) -> String {
        self.bar.message()
    }
}

pub fn print_notices(notices: &[Notice]) {
    for notice in notices {
        let marker = match notice {
            Notice::DiskSpaceUnavailable(_) | Notice::ConflictScanFailed(_) => style("!").yellow(),
            _ => style("i").cyan(),
        };
        println!("{} {}", marker, notice);
    }
}

/// Error text plus a remedy hint when one applies
pub fn print_error(error: &CopyError) {
    eprintln!("{} {}", style("✗").red().bold(), error);
    if let Some(remedy) = error.remedy() {
        eprintln!("  {}", style(remedy).dim());
    }
}

pub fn print_verification(report: &VerificationReport) {
    let marker = if report.is_clean() {
        style("✓").green().bold()
    } else {
        style("✗").red().bold()
    };
    println!("{} {}", marker, report.summary());

    for failed in &report.failed {
        println!("  {} ({})", failed.relative_path, failed.reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcx::ExecutionSession;

    fn hidden_view() -> ProgressView {
        ProgressView::with_bar(ProgressBar::hidden(), false)
    }

    #[test]
    fn test_percentage_moves_gauge() {
        let mut view = hidden_view();

        view.apply(&ProgressEvent::Percentage {
            value: 45.3,
            eta: None,
        });
        assert_eq!(view.position(), 45);

        view.apply(&ProgressEvent::Percentage {
            value: 180.0,
            eta: None,
        });
        assert_eq!(view.position(), 100);
    }

    #[test]
    fn test_current_file_uses_announced_total() {
        let mut view = hidden_view();

        view.apply(&ProgressEvent::TotalFiles { total: 12 });
        view.apply(&ProgressEvent::CurrentFile {
            name: "report.docx".to_string(),
            processed: 3,
            total: None,
        });

        assert_eq!(view.message(), "Copying: report.docx (3/12)");
    }

    #[test]
    fn test_counter_survives_session_updates() {
        let mut view = hidden_view();
        let mut session = ExecutionSession::new();

        for line in ["    Files :        12", "  New File   100   a.txt", "  25%"] {
            for update in session.observe_stdout_at(line, Duration::from_secs(3)) {
                view.apply(&ProgressEvent::from(update));
            }
        }

        assert_eq!(view.message(), "Copying: a.txt (1/12)");
    }

    #[test]
    fn test_status_text_replaces_message() {
        let mut view = hidden_view();

        view.apply(&ProgressEvent::Status {
            text: "Operation complete".to_string(),
        });

        assert_eq!(view.message(), "Operation complete");
    }
}
