//! Shell completion generation for ad-job-state
//!
//! Completion scripts are produced by `clap_complete` from the derived
//! argument definitions.

use clap::CommandFactory;
use clap_complete::{Shell, generate};
use std::io::{self, Write};

use crate::cli::CliArgs;
use crate::error::{ConfigError, Result};

/// Binary name the scripts register completions for
const BIN_NAME: &str = "ad-job-state";

/// Generate shell completion script on stdout
///
/// # Arguments
/// * `shell_name` - Shell type (bash, zsh, fish, powershell)
///
/// # Returns
/// * `Result<()>` - Success or error
pub fn generate_completion(shell_name: &str) -> Result<()> {
    let shell = parse_shell(shell_name)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_completion(shell, &mut out);
    out.flush()?;
    Ok(())
}

/// Write the completion script for `shell` into `out`
pub fn write_completion(shell: Shell, out: &mut dyn Write) {
    let mut cmd = CliArgs::command();
    generate(shell, &mut cmd, BIN_NAME, out);
}

/// Parse shell name string to Shell enum
fn parse_shell(shell_name: &str) -> Result<Shell> {
    match shell_name.to_lowercase().as_str() {
        "bash" => Ok(Shell::Bash),
        "zsh" => Ok(Shell::Zsh),
        "fish" => Ok(Shell::Fish),
        "powershell" | "pwsh" => Ok(Shell::PowerShell),
        _ => Err(ConfigError::Generic(format!(
            "Unsupported shell: {}. Supported shells: bash, zsh, fish, powershell",
            shell_name
        ))
        .into()),
    }
}
