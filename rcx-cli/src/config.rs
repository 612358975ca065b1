use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use rcx::request::{auto_thread_count, CopyAttributes, CopyOptions, MAX_THREADS};
use rcx::{HashAlgorithm, LogDirectory, TOOL_PROGRAM};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tool: ToolSettings,
    #[serde(default)]
    pub defaults: DefaultOptions,
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub behavior: BehaviorSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_program")]
    pub program: PathBuf,
    #[serde(default = "default_exit_poll_interval_ms")]
    pub exit_poll_interval_ms: u64,
    /// Where tool log files go; `logs` beside the executable when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultOptions {
    #[serde(default)]
    pub recurse: bool,
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub exclude_older: bool,
    #[serde(default = "default_attributes")]
    pub attributes: String,
    #[serde(default = "default_true")]
    pub multithread: bool,
    /// 0 picks the logical CPU count
    #[serde(default = "default_threads")]
    pub threads: u32,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: u32,
    #[serde(default = "default_true")]
    pub verbose: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorSettings {
    #[serde(default)]
    pub confirm_before_execution: bool,
    /// Hash algorithm for a verification pass after each successful copy
    #[serde(default)]
    pub verify: Option<String>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            program: default_program(),
            exit_poll_interval_ms: default_exit_poll_interval_ms(),
            log_dir: None,
        }
    }
}

impl Default for DefaultOptions {
    fn default() -> Self {
        Self {
            recurse: false,
            mirror: false,
            exclude_older: false,
            attributes: default_attributes(),
            multithread: true,
            threads: default_threads(),
            retry_count: default_retry_count(),
            retry_wait_secs: default_retry_wait_secs(),
            verbose: true,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
            rotation: default_rotation(),
        }
    }
}

impl AppConfig {
    /// `<config dir>/rcx/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rcx").join("config.toml"))
    }

    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse configuration {}", path.display()))?;
        Ok(config)
    }

    /// An explicit path must exist; the default location falls back to built-in defaults
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path).await;
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path).await,
            _ => Ok(Self::default()),
        }
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool.program.as_os_str().is_empty() {
            anyhow::bail!("Tool program cannot be empty");
        }
        if self.tool.exit_poll_interval_ms == 0 {
            anyhow::bail!("Exit poll interval must be greater than zero");
        }

        CopyAttributes::from_letters(&self.defaults.attributes)?;
        if self.defaults.threads > MAX_THREADS {
            anyhow::bail!("Thread count {} exceeds {}", self.defaults.threads, MAX_THREADS);
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => anyhow::bail!("Unknown log level '{}'", other),
        }
        match self.logging.rotation.as_str() {
            "daily" | "hourly" | "never" => {}
            other => anyhow::bail!("Unknown log rotation '{}' (expected daily, hourly or never)", other),
        }

        self.verify_algorithm()?;
        Ok(())
    }

    /// Copy options seeded from the `[defaults]` section
    pub fn copy_options(&self) -> Result<CopyOptions> {
        let defaults = &self.defaults;
        let threads = if !defaults.multithread {
            None
        } else if defaults.threads == 0 {
            Some(auto_thread_count())
        } else {
            Some(defaults.threads)
        };

        let options = CopyOptions {
            recurse: defaults.recurse,
            mirror: defaults.mirror,
            exclude_older: defaults.exclude_older,
            attributes: CopyAttributes::from_letters(&defaults.attributes)?,
            threads,
            retry_count: defaults.retry_count,
            retry_wait_secs: defaults.retry_wait_secs,
            verbose: defaults.verbose,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn verify_algorithm(&self) -> Result<Option<HashAlgorithm>> {
        self.behavior
            .verify
            .as_deref()
            .map(|name| name.parse::<HashAlgorithm>().map_err(anyhow::Error::from))
            .transpose()
    }

    pub fn log_directory(&self) -> LogDirectory {
        match &self.tool.log_dir {
            Some(dir) => LogDirectory::at(dir),
            None => LogDirectory::beside_executable(),
        }
    }

    pub fn exit_poll_interval(&self) -> Duration {
        Duration::from_millis(self.tool.exit_poll_interval_ms)
    }
}

fn default_program() -> PathBuf { PathBuf::from(TOOL_PROGRAM) }
fn default_exit_poll_interval_ms() -> u64 { 100 }
fn default_attributes() -> String { "DAT".to_string() }
fn default_threads() -> u32 { 8 }
fn default_retry_count() -> u32 { 10 }
fn default_retry_wait_secs() -> u32 { 5 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_rotation() -> String { "daily".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_tool_conventions() {
        let config = AppConfig::default();
        config.validate().unwrap();

        let options = config.copy_options().unwrap();
        assert_eq!(options.threads, Some(8));
        assert_eq!(options.retry_count, 10);
        assert_eq!(options.retry_wait_secs, 5);
        assert_eq!(options.attributes.letters(), "DAT");
        assert!(options.verbose);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [defaults]
            recurse = true
            threads = 0

            [behavior]
            verify = "blake3"
            "#,
        )
        .unwrap();

        assert_eq!(config.tool.program, PathBuf::from(TOOL_PROGRAM));
        let options = config.copy_options().unwrap();
        assert!(options.recurse);
        assert!(options.threads.unwrap() >= 1);
        assert_eq!(config.verify_algorithm().unwrap(), Some(HashAlgorithm::Blake3));
    }

    #[test]
    fn test_multithread_off_drops_thread_flag() {
        let mut config = AppConfig::default();
        config.defaults.multithread = false;

        assert_eq!(config.copy_options().unwrap().threads, None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.defaults.attributes = "DAZ".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.logging.rotation = "weekly".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.defaults.threads = 500;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.defaults.mirror = true;

        config.save(&path).await.unwrap();
        let loaded = AppConfig::load(&path).await.unwrap();

        assert!(loaded.defaults.mirror);
    }

    #[tokio::test]
    async fn test_explicit_missing_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(AppConfig::load_or_default(Some(&temp.path().join("none.toml"))).await.is_err());
    }
}
