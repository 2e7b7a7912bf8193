//! Command-line interface for ad-job-state
//!
//! This module handles:
//! - Command-line argument parsing using clap
//! - Configuration loading and merging with arguments
//! - The informational subcommands (version, completion, config)

pub mod completion;
pub mod prompt;

use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::{Config, LogLevel};
use crate::error::Result;
use crate::export::ExportOptions;
use crate::import::ImportOptions;
use crate::utils::time::parse_cli_date;

/// Export and re-import Elasticsearch anomaly detection job state
#[derive(Parser, Debug)]
#[command(
    name = "ad-job-state",
    version,
    about = "Export and re-import the state of an anomaly detection job",
    long_about = "Packs an anomaly detection job's configuration, model snapshot, annotations
and optionally its datafeed input into a single archive, and recreates the job from
such an archive on another cluster."
)]
pub struct CliArgs {
    /// Elasticsearch URL
    #[arg(long, global = true, value_name = "URL")]
    pub url: Option<String>,

    /// Elastic Cloud ID, takes precedence over --url
    #[arg(long, global = true, value_name = "ID")]
    pub cloud_id: Option<String>,

    /// Username for basic authentication
    #[arg(short = 'u', long, global = true, value_name = "USERNAME")]
    pub username: Option<String>,

    /// Password for basic authentication, prompted for when omitted
    #[arg(
        long,
        global = true,
        env = "ES_PASSWORD",
        hide_env_values = true,
        value_name = "PASSWORD"
    )]
    pub password: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long, global = true)]
    pub ignore_certs: bool,

    /// Request timeout in seconds
    #[arg(long, global = true, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long = "config", global = true, value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// Verbose mode (debug logging)
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    /// Very verbose mode (trace logging)
    #[arg(long = "vv", global = true)]
    pub very_verbose: bool,

    /// Quiet mode (errors only, no progress bars)
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Answer yes to every confirmation
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Subcommands
    #[command(subcommand)]
    pub command: Commands,
}

/// Subcommands for ad-job-state
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export a job's state into an archive
    Export(ExportArgs),

    /// Recreate a job from an exported archive
    Import(ImportArgs),

    /// Show or validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Validate configuration file
        #[arg(long)]
        validate: bool,
    },

    /// Generate shell completion script
    Completion {
        /// Shell type (bash, zsh, fish, powershell)
        #[arg(value_name = "SHELL")]
        shell: String,
    },

    /// Show version information
    Version,
}

/// Arguments of `export`
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Job to export
    #[arg(long, value_name = "ID")]
    pub job_id: String,

    /// Export the latest snapshot at or before this date (YYYY-MM-DDTHH:MM:SS, UTC)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub snapshot_before: Option<DateTime<Utc>>,

    /// Export annotations and notifications from this date on, job creation by default
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub annotations_after: Option<DateTime<Utc>>,

    /// Export input documents from this date on
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub inputs_after: Option<DateTime<Utc>>,

    /// Export input documents up to this date
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub inputs_before: Option<DateTime<Utc>>,

    /// Also export the datafeed's input documents
    #[arg(long)]
    pub include_inputs: bool,

    /// Directory the archive is written to
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

impl ExportArgs {
    /// Convert into service options
    pub fn to_options(&self) -> ExportOptions {
        ExportOptions {
            job_id: self.job_id.clone(),
            snapshot_before: self.snapshot_before,
            annotations_after: self.annotations_after,
            inputs_after: self.inputs_after,
            inputs_before: self.inputs_before,
            include_inputs: self.include_inputs,
        }
    }

    /// Whether inputs are requested without both range bounds
    pub fn inputs_unbounded(&self) -> bool {
        self.include_inputs && (self.inputs_after.is_none() || self.inputs_before.is_none())
    }
}

/// Arguments of `import`
#[derive(Args, Debug)]
pub struct ImportArgs {
    /// Job id the archive was exported for
    #[arg(long, value_name = "ID")]
    pub job_id: String,

    /// Archive produced by `export`
    #[arg(long, value_name = "PATH")]
    pub archive: PathBuf,
}

impl ImportArgs {
    /// Convert into service options
    pub fn to_options(&self) -> ImportOptions {
        ImportOptions {
            job_id: self.job_id.clone(),
            archive: self.archive.clone(),
        }
    }
}

fn parse_date(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    parse_cli_date(value).map_err(|e| e.to_string())
}

/// CLI interface handler
pub struct CliInterface {
    /// Parsed command-line arguments
    args: CliArgs,

    /// Loaded configuration
    config: Config,
}

impl CliInterface {
    /// Create a new CLI interface from the process arguments
    ///
    /// # Returns
    /// * `Result<Self>` - New CLI interface or error
    pub fn new() -> Result<Self> {
        Self::from_args(CliArgs::parse())
    }

    /// Create a CLI interface from already parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let config = Self::load_config(&args)?;
        Ok(Self { args, config })
    }

    /// Load configuration from file and merge with arguments
    ///
    /// Validation is left to the commands that need a usable configuration,
    /// so `config --validate` can still report on a broken file.
    ///
    /// # Arguments
    /// * `args` - Command-line arguments
    ///
    /// # Returns
    /// * `Result<Config>` - Loaded configuration or error
    fn load_config(args: &CliArgs) -> Result<Config> {
        let mut config = Config::load_from_file(args.config_file.as_deref())?;
        Self::apply_args_to_config(&mut config, args);
        Ok(config)
    }

    /// Get the effective configuration
    ///
    /// # Returns
    /// * `&Config` - Reference to configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the CLI arguments
    ///
    /// # Returns
    /// * `&CliArgs` - Reference to arguments
    pub fn args(&self) -> &CliArgs {
        &self.args
    }

    /// Whether progress bars should be drawn
    pub fn show_progress(&self) -> bool {
        !self.args.quiet
    }

    /// Apply CLI arguments to configuration
    ///
    /// Overrides configuration values with CLI arguments where provided
    ///
    /// # Arguments
    /// * `config` - Configuration to modify
    fn apply_args_to_config(config: &mut Config, args: &CliArgs) {
        Self::apply_logging_args(config, args);
        Self::apply_connection_args(config, args);
        Self::apply_export_args(config, args);
    }

    /// Apply logging-related CLI arguments to configuration
    fn apply_logging_args(config: &mut Config, args: &CliArgs) {
        config.logging.level = if args.very_verbose {
            LogLevel::Trace
        } else if args.verbose {
            LogLevel::Debug
        } else if args.quiet {
            LogLevel::Error
        } else {
            config.logging.level
        };
    }

    /// Apply connection-related CLI arguments to configuration
    fn apply_connection_args(config: &mut Config, args: &CliArgs) {
        if let Some(url) = &args.url {
            config.connection.url = url.clone();
        }
        if let Some(cloud_id) = &args.cloud_id {
            config.connection.cloud_id = Some(cloud_id.clone());
        }
        if let Some(username) = &args.username {
            config.connection.username = Some(username.clone());
        }
        if args.ignore_certs {
            config.connection.ignore_certs = true;
        }
        if let Some(timeout) = args.timeout {
            config.connection.timeout = timeout;
        }
    }

    /// Apply export-related CLI arguments to configuration
    fn apply_export_args(config: &mut Config, args: &CliArgs) {
        if let Commands::Export(export) = &args.command
            && let Some(dir) = &export.output_dir
        {
            config.export.output_dir = dir.clone();
        }
    }

    /// Handle the informational subcommands
    ///
    /// # Returns
    /// * `Result<bool>` - True if subcommand was handled, false to continue
    pub fn handle_subcommand(&self) -> Result<bool> {
        match &self.args.command {
            Commands::Version => {
                self.show_version();
                Ok(true)
            }
            Commands::Completion { shell } => {
                completion::generate_completion(shell)?;
                Ok(true)
            }
            Commands::Config { show, validate } => {
                self.handle_config_command(*show, *validate)?;
                Ok(true)
            }
            Commands::Export(_) | Commands::Import(_) => Ok(false),
        }
    }

    /// Show version information
    fn show_version(&self) {
        println!("ad-job-state version {}", env!("CARGO_PKG_VERSION"));
        println!("Rust version: {}", env!("CARGO_PKG_RUST_VERSION"));
    }

    /// Handle config subcommand
    ///
    /// Without flags the effective configuration is shown.
    ///
    /// # Arguments
    /// * `show` - Whether to show configuration
    /// * `validate` - Whether to validate configuration
    ///
    /// # Returns
    /// * `Result<()>` - Success or error
    fn handle_config_command(&self, show: bool, validate: bool) -> Result<()> {
        if validate {
            self.validate_config_file();
        }

        if show || !validate {
            self.show_config()?;
        }

        Ok(())
    }

    /// Validate configuration file
    fn validate_config_file(&self) {
        let path = self.get_config_path();
        println!("Validating configuration file: {}", path.display());

        if !path.exists() {
            println!("Configuration file does not exist, defaults apply");
            return;
        }

        match Config::load_from_file(Some(&path)) {
            Ok(config) => match config.validate() {
                Ok(()) => println!("Configuration is valid"),
                Err(e) => println!("Configuration validation failed: {}", e),
            },
            Err(e) => println!("Failed to load configuration: {}", e),
        }
    }

    /// Show effective configuration
    fn show_config(&self) -> Result<()> {
        let path = self.get_config_path();
        println!("# Configuration file: {}", path.display());
        println!();
        println!("{}", self.config.to_toml()?);
        Ok(())
    }

    /// Get configuration file path (from args or default)
    fn get_config_path(&self) -> PathBuf {
        self.args
            .config_file
            .clone()
            .unwrap_or_else(Config::default_config_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    fn interface(args: &[&str]) -> CliInterface {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "").unwrap();
        let mut full = vec!["ad-job-state", "-c", config_path.to_str().unwrap()];
        full.extend_from_slice(args);
        CliInterface::from_args(parse(&full)).unwrap()
    }

    #[test]
    fn test_export_args_parsing() {
        let args = parse(&[
            "ad-job-state",
            "export",
            "--job-id",
            "web-latency",
            "--snapshot-before",
            "2024-03-01T00:00:00",
            "--include-inputs",
            "--inputs-after",
            "2024-02-01T00:00:00",
        ]);
        let Commands::Export(export) = args.command else {
            panic!("expected export");
        };
        assert_eq!(export.job_id, "web-latency");
        assert_eq!(
            export.snapshot_before,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap())
        );
        assert!(export.include_inputs);
        assert!(export.inputs_unbounded());

        let options = export.to_options();
        assert_eq!(options.job_id, "web-latency");
        assert!(options.annotations_after.is_none());
    }

    #[test]
    fn test_invalid_date_rejected() {
        let result = CliArgs::try_parse_from([
            "ad-job-state",
            "export",
            "--job-id",
            "j",
            "--snapshot-before",
            "2024-03-01",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_import_requires_archive() {
        assert!(CliArgs::try_parse_from(["ad-job-state", "import", "--job-id", "j"]).is_err());
        let args = parse(&[
            "ad-job-state",
            "import",
            "--job-id",
            "j",
            "--archive",
            "j_state.tar.gz",
        ]);
        let Commands::Import(import) = args.command else {
            panic!("expected import");
        };
        assert_eq!(import.to_options().archive, PathBuf::from("j_state.tar.gz"));
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&[
            "ad-job-state",
            "import",
            "--job-id",
            "j",
            "--archive",
            "a.tar.gz",
            "--url",
            "http://es:9200",
            "--yes",
            "-q",
        ]);
        assert_eq!(args.url.as_deref(), Some("http://es:9200"));
        assert!(args.yes);
        assert!(args.quiet);
    }

    #[test]
    fn test_args_override_config() {
        let cli = interface(&[
            "--url",
            "http://es:9200",
            "--username",
            "elastic",
            "--timeout",
            "90",
            "--ignore-certs",
            "--vv",
            "export",
            "--job-id",
            "j",
            "--output-dir",
            "/tmp/out",
        ]);
        let config = cli.config();
        assert_eq!(config.connection.url, "http://es:9200");
        assert_eq!(config.connection.username.as_deref(), Some("elastic"));
        assert_eq!(config.connection.timeout, 90);
        assert!(config.connection.ignore_certs);
        assert_eq!(config.logging.level, LogLevel::Trace);
        assert_eq!(config.export.output_dir, PathBuf::from("/tmp/out"));
    }

    #[test]
    fn test_quiet_lowers_log_level_and_hides_progress() {
        let cli = interface(&["-q", "version"]);
        assert_eq!(cli.config().logging.level, LogLevel::Error);
        assert!(!cli.show_progress());
    }

    #[test]
    fn test_handle_subcommand() {
        let cli = interface(&["version"]);
        assert!(cli.handle_subcommand().unwrap());
        let cli = interface(&["export", "--job-id", "j"]);
        assert!(!cli.handle_subcommand().unwrap());
    }
}
