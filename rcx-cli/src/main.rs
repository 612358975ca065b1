use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

mod config;
mod prompt;
mod render;
mod telemetry;

use config::AppConfig;
use prompt::DecisionPolicy;
use rcx::request::auto_thread_count;
use rcx::{
    build_command_line, preview_command, Advisory, ConflictReport, CopyAttributes, CopyError,
    CopyOptions, CopyRequest, Decision, DiskSpaceAssessment, FileConflictChoice, HashAlgorithm,
    Orchestrator, Preflight, PreflightStep, PreparedCopy, ProgressChannel, RunOutcome,
};
use render::ProgressView;

/// rcx failed before or around the tool (bad input, blocking check, launch error)
const EXIT_ERROR: i32 = 1;
/// The user declined, or `check` found advisories
const EXIT_ATTENTION: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "rcx")]
#[command(about = "Pre-flight checks, live progress and verification around robocopy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (overrides the configuration)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check, confirm and run a copy
    Run {
        source: PathBuf,
        destination: PathBuf,

        #[command(flatten)]
        copy: CopyFlags,

        /// Accept every warning without asking
        #[arg(short, long)]
        yes: bool,

        /// What to do with files that already exist at the destination
        #[arg(long, value_name = "overwrite|skip|cancel")]
        on_conflict: Option<FileConflictChoice>,

        /// Show the command line and ask before starting
        #[arg(long)]
        confirm: bool,

        /// Hash-compare source and destination after a successful copy
        #[arg(long, value_name = "ALGORITHM")]
        verify: Option<HashAlgorithm>,

        /// Echo every line the tool prints
        #[arg(long)]
        show_output: bool,
    },
    /// Run the pre-flight checks without copying
    Check {
        source: PathBuf,
        destination: PathBuf,

        #[command(flatten)]
        copy: CopyFlags,

        /// Print the findings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the command line that would be run
    Preview {
        source: PathBuf,
        destination: PathBuf,

        #[command(flatten)]
        copy: CopyFlags,
    },
    /// Compare file hashes between a source and a finished copy
    Verify {
        source: PathBuf,
        destination: PathBuf,

        #[arg(short, long, default_value = "sha256")]
        algorithm: HashAlgorithm,

        /// Only compare files directly inside the source
        #[arg(long)]
        no_recurse: bool,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigActions,
    },
}

#[derive(Subcommand)]
enum ConfigActions {
    /// Validate configuration file
    Validate,
    /// Show current configuration
    Show,
    /// Generate default configuration
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Copy options; each flag overrides the `[defaults]` section
#[derive(Args, Debug, Clone, Default)]
struct CopyFlags {
    /// Include subdirectories, empty ones too
    #[arg(short = 'e', long)]
    recurse: bool,

    /// Make the destination an exact mirror, deleting extra files
    #[arg(long)]
    mirror: bool,

    /// Leave newer destination files alone
    #[arg(long)]
    exclude_older: bool,

    /// Attribute letters to copy, from DATSOU
    #[arg(long, value_name = "LETTERS")]
    copy: Option<String>,

    /// Copy threads (0 = one per logical CPU)
    #[arg(long, conflicts_with = "no_multithread")]
    threads: Option<u32>,

    /// Copy with a single thread
    #[arg(long)]
    no_multithread: bool,

    /// Retries per failed file
    #[arg(long)]
    retry: Option<u32>,

    /// Seconds between retries
    #[arg(long)]
    wait: Option<u32>,

    /// Ask the tool for a shorter listing
    #[arg(long)]
    no_verbose: bool,

    /// Tool executable
    #[arg(long)]
    program: Option<PathBuf>,
}

impl CopyFlags {
    fn apply(&self, mut options: CopyOptions) -> Result<CopyOptions> {
        options.recurse |= self.recurse;
        options.mirror |= self.mirror;
        options.exclude_older |= self.exclude_older;

        if let Some(letters) = &self.copy {
            options.attributes = CopyAttributes::from_letters(letters)?;
        }
        if self.no_multithread {
            options.threads = None;
        } else if let Some(threads) = self.threads {
            options.threads = Some(if threads == 0 { auto_thread_count() } else { threads });
        }
        if let Some(retry) = self.retry {
            options.retry_count = retry;
        }
        if let Some(wait) = self.wait {
            options.retry_wait_secs = wait;
        }
        if self.no_verbose {
            options.verbose = false;
        }

        options.validate()?;
        Ok(options)
    }

    fn request(&self, config: &AppConfig, source: &Path, destination: &Path) -> Result<CopyRequest> {
        let options = self.apply(config.copy_options()?)?;
        Ok(CopyRequest::new(source, destination, options)?)
    }

    fn program(&self, config: &AppConfig) -> PathBuf {
        self.program.clone().unwrap_or_else(|| config.tool.program.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Config { action } = &cli.command {
        init_basic_logging(cli.log_level.as_deref().unwrap_or("warn"));
        return match action {
            ConfigActions::Validate => validate_config(cli.config.as_deref()).await,
            ConfigActions::Show => show_config(cli.config.as_deref()).await,
            ConfigActions::Generate { output } => generate_config(output.as_deref()).await,
        };
    }

    let config = AppConfig::load_or_default(cli.config.as_deref()).await?;
    config.validate()?;
    let guard = telemetry::initialize_logging(&config.logging, cli.log_level.as_deref())?;

    let code = match cli.command {
        Commands::Run {
            source,
            destination,
            copy,
            yes,
            on_conflict,
            confirm,
            verify,
            show_output,
        } => {
            let run = RunArgs {
                copy,
                yes,
                on_conflict,
                confirm: confirm || config.behavior.confirm_before_execution,
                verify: verify.or(config.verify_algorithm()?),
                show_output,
            };
            run_copy(&config, &source, &destination, run).await?
        }
        Commands::Check {
            source,
            destination,
            copy,
            json,
        } => check(&config, &source, &destination, &copy, json)?,
        Commands::Preview {
            source,
            destination,
            copy,
        } => {
            let request = copy.request(&config, &source, &destination)?;
            println!(
                "{} {}",
                copy.program(&config).display(),
                preview_command(&request, &config.log_directory())
            );
            0
        }
        Commands::Verify {
            source,
            destination,
            algorithm,
            no_recurse,
        } => verify(&source, &destination, algorithm, !no_recurse).await?,
        Commands::Config { .. } => 0,
    };

    drop(guard);
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn init_basic_logging(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("rcx={},rcx_cli={}", level, level))
        .with_writer(std::io::stderr)
        .try_init();
}

struct RunArgs {
    copy: CopyFlags,
    yes: bool,
    on_conflict: Option<FileConflictChoice>,
    confirm: bool,
    verify: Option<HashAlgorithm>,
    show_output: bool,
}

async fn run_copy(config: &AppConfig, source: &Path, destination: &Path, args: RunArgs) -> Result<i32> {
    let request = args.copy.request(config, source, destination)?;
    let policy = DecisionPolicy {
        assume_yes: args.yes,
        on_conflict: args.on_conflict,
        interactive: console::user_attended(),
    };

    let prepared = match tokio::task::block_in_place(|| prepare(&request, &policy)) {
        Ok(Some(prepared)) => prepared,
        Ok(None) => {
            println!("Copy aborted.");
            return Ok(EXIT_ATTENTION);
        }
        Err(e) => return report_failure(e),
    };
    render::print_notices(&prepared.notices);

    let program = args.copy.program(config);
    let log_path = config.log_directory().next_log_path();
    if args.confirm && !args.yes {
        let command_line = build_command_line(&prepared.request, log_path.as_deref());
        let program_text = program.display().to_string();
        let proceed = tokio::task::block_in_place(|| prompt::confirm_execution(&program_text, &command_line))?;
        if !proceed {
            println!("Copy aborted.");
            return Ok(EXIT_ATTENTION);
        }
    }

    let orchestrator = Arc::new(Orchestrator::with_poll_interval(config.exit_poll_interval()));
    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping the copy");
                orchestrator.cancel();
            }
        })
    };

    let (reporter, channel) = ProgressChannel::new();
    let view = tokio::spawn(ProgressView::new(args.show_output).follow(channel));

    let outcome = rcx::execute(&orchestrator, program, &prepared, log_path.as_deref(), Some(reporter)).await;
    interrupt.abort();
    if let Err(e) = view.await {
        warn!("Progress display stopped: {}", e);
    }

    let run = match outcome {
        Ok(RunOutcome::Completed(run)) => run,
        Ok(RunOutcome::Cancelled(_)) => {
            println!("Copy cancelled.");
            return Ok(EXIT_CANCELLED);
        }
        Err(e) => {
            render::print_error(&e);
            return Ok(EXIT_ERROR);
        }
    };

    println!("{}", run.exit);
    if !run.exit.is_success() {
        return Ok(run.exit.code.filter(|code| *code > 0).unwrap_or(EXIT_ERROR));
    }

    match args.verify {
        Some(algorithm) => {
            let recursive = prepared.request.options().walks_subdirectories();
            verify(prepared.request.source(), &prepared.request.final_destination(), algorithm, recursive).await
        }
        None => Ok(0),
    }
}

/// Walk the pre-flight pipeline, answering advisories through `policy`
fn prepare(request: &CopyRequest, policy: &DecisionPolicy) -> Result<Option<PreparedCopy>> {
    let mut preflight = Preflight::new(request);
    let mut step = preflight.advance()?;

    loop {
        match step {
            PreflightStep::Ready(prepared) => return Ok(Some(prepared)),
            PreflightStep::Aborted => return Ok(None),
            PreflightStep::NeedsDecision(advisory) => {
                let decision = policy.decide(&advisory)?;
                info!("Advisory answered with {:?}", decision);
                step = preflight.resolve(decision)?;
            }
        }
    }
}

fn report_failure(error: anyhow::Error) -> Result<i32> {
    match error.downcast_ref::<CopyError>() {
        Some(copy_error) => {
            render::print_error(copy_error);
            Ok(EXIT_ERROR)
        }
        None => Err(error),
    }
}

#[derive(Debug, Serialize)]
struct CheckReport {
    ready: bool,
    error: Option<String>,
    advisories: Vec<String>,
    notices: Vec<String>,
    conflicts: Option<ConflictReport>,
    disk_space: Option<DiskSpaceAssessment>,
    command_line: Option<String>,
}

/// Run every check, accepting each advisory so later checks still run
fn collect_findings(request: &CopyRequest) -> CheckReport {
    let mut report = CheckReport {
        ready: false,
        error: None,
        advisories: Vec::new(),
        notices: Vec::new(),
        conflicts: None,
        disk_space: None,
        command_line: None,
    };

    let mut preflight = Preflight::new(request);
    let mut step = preflight.advance();
    loop {
        match step {
            Ok(PreflightStep::NeedsDecision(advisory)) => {
                report.advisories.push(advisory.to_string());
                let decision = match advisory {
                    Advisory::FileConflicts(_) => Decision::Conflict(FileConflictChoice::Overwrite),
                    _ => Decision::Proceed,
                };
                step = preflight.resolve(decision);
            }
            Ok(PreflightStep::Ready(prepared)) => {
                report.ready = report.advisories.is_empty();
                report.notices = prepared.notices.iter().map(ToString::to_string).collect();
                // decisions taken above may have changed the options
                report.command_line = Some(build_command_line(&prepared.request, None));
                report.conflicts = prepared.conflicts;
                report.disk_space = prepared.disk_space;
                return report;
            }
            Ok(PreflightStep::Aborted) => return report,
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        }
    }
}

fn check(config: &AppConfig, source: &Path, destination: &Path, copy: &CopyFlags, json: bool) -> Result<i32> {
    let request = copy.request(config, source, destination)?;
    let report = collect_findings(&request);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        if let Some(error) = &report.error {
            println!("✗ {}", error);
        }
        for advisory in &report.advisories {
            println!("! {}", advisory);
        }
        for notice in &report.notices {
            println!("i {}", notice);
        }
        if report.ready {
            println!("✓ Ready to copy");
        }
    }

    Ok(if report.error.is_some() {
        EXIT_ERROR
    } else if report.ready {
        0
    } else {
        EXIT_ATTENTION
    })
}

async fn verify(source: &Path, destination: &Path, algorithm: HashAlgorithm, recursive: bool) -> Result<i32> {
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    println!("Verifying {} against {} with {}", source.display(), destination.display(), algorithm);
    let result = rcx::verify::verify_tree(source, destination, algorithm, recursive, &cancel, None).await;
    interrupt.abort();

    match result {
        Ok(report) => {
            render::print_verification(&report);
            Ok(if report.is_clean() { 0 } else { EXIT_ERROR })
        }
        Err(CopyError::Cancelled) => {
            println!("Verification cancelled.");
            Ok(EXIT_CANCELLED)
        }
        Err(e) => {
            render::print_error(&e);
            Ok(EXIT_ERROR)
        }
    }
}

async fn validate_config(config_path: Option<&Path>) -> Result<()> {
    info!("Validating configuration");

    match AppConfig::load_or_default(config_path).await.and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!("Tool: {}", config.tool.program.display());
            println!("Copy options: {}", config.defaults.attributes);
            Ok(())
        }
        Err(e) => {
            println!("✗ Configuration validation failed: {}", e);
            Err(e)
        }
    }
}

async fn show_config(config_path: Option<&Path>) -> Result<()> {
    match AppConfig::load_or_default(config_path).await {
        Ok(config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Err(e) => {
            println!("Failed to load configuration: {}", e);
            Err(e)
        }
    }
}

async fn generate_config(output_path: Option<&Path>) -> Result<()> {
    let config = AppConfig::default();

    if let Some(path) = output_path {
        config.save(path).await?;
        println!("Configuration generated at {}", path.display());
    } else {
        println!("{}", toml::to_string_pretty(&config)?);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_defaults() {
        let flags = CopyFlags {
            recurse: true,
            copy: Some("DATSOU".to_string()),
            retry: Some(2),
            no_verbose: true,
            ..Default::default()
        };

        let options = flags.apply(CopyOptions::default()).unwrap();

        assert!(options.recurse);
        assert_eq!(options.attributes.letters(), "DATSOU");
        assert_eq!(options.retry_count, 2);
        assert_eq!(options.retry_wait_secs, 5);
        assert!(!options.verbose);
    }

    #[test]
    fn test_thread_flags() {
        let single = CopyFlags {
            no_multithread: true,
            ..Default::default()
        };
        assert_eq!(single.apply(CopyOptions::default()).unwrap().threads, None);

        let auto = CopyFlags {
            threads: Some(0),
            ..Default::default()
        };
        assert_eq!(auto.apply(CopyOptions::default()).unwrap().threads, Some(auto_thread_count()));

        let too_many = CopyFlags {
            threads: Some(129),
            ..Default::default()
        };
        assert!(too_many.apply(CopyOptions::default()).is_err());
    }

    #[test]
    fn test_cli_parses_run_flags() {
        let cli = Cli::try_parse_from([
            "rcx", "run", "src", "dst", "-e", "--on-conflict", "skip", "--verify", "blake3", "--threads", "16",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                copy,
                on_conflict,
                verify,
                ..
            } => {
                assert!(copy.recurse);
                assert_eq!(copy.threads, Some(16));
                assert_eq!(on_conflict, Some(FileConflictChoice::Skip));
                assert_eq!(verify, Some(HashAlgorithm::Blake3));
            }
            _ => panic!("Expected run command"),
        }
    }

    #[test]
    fn test_threads_conflict_with_single_thread_flag() {
        assert!(Cli::try_parse_from(["rcx", "preview", "a", "b", "--threads", "4", "--no-multithread"]).is_err());
    }

    #[test]
    fn test_check_reports_conflicts_and_continues() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("music");
        let destination = temp.path().join("backup");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("song.mp3"), "new").unwrap();
        fs::create_dir_all(destination.join("music")).unwrap();
        fs::write(destination.join("music").join("song.mp3"), "old").unwrap();

        let request = CopyRequest::new(&source, &destination, CopyOptions::default()).unwrap();
        let report = collect_findings(&request);

        assert!(report.error.is_none());
        assert!(!report.ready);
        assert_eq!(report.conflicts.as_ref().map(|c| c.conflict_count), Some(1));
        assert!(report.command_line.unwrap().contains("/COPY:DAT"));
    }

    #[test]
    fn test_check_command_line_reflects_overwrite_decision() {
        let temp = TempDir::new().unwrap();
        let source = temp.path().join("music");
        let destination = temp.path().join("backup");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("song.mp3"), "new").unwrap();
        fs::create_dir_all(destination.join("music")).unwrap();
        fs::write(destination.join("music").join("song.mp3"), "old").unwrap();

        let options = CopyOptions {
            exclude_older: true,
            ..Default::default()
        };
        let request = CopyRequest::new(&source, &destination, options).unwrap();
        assert!(build_command_line(&request, None).contains("/XO"));

        let report = collect_findings(&request);

        assert_eq!(report.conflicts.as_ref().map(|c| c.conflict_count), Some(1));
        assert!(!report.command_line.unwrap().contains("/XO"));
    }

    #[test]
    fn test_check_reports_blocking_error() {
        let temp = TempDir::new().unwrap();
        let request = CopyRequest::new(temp.path().join("missing"), temp.path().join("out"), CopyOptions::default()).unwrap();

        let report = collect_findings(&request);

        assert!(!report.ready);
        assert!(report.error.is_some());
    }
}
