//! Interactive prompts
//!
//! Confirmations before an export that may pull personal data off the
//! cluster, and a password prompt that does not echo.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal;
use std::io::{self, BufRead, Write};
use tracing::info;

use crate::error::{JobStateError, Result};

/// Shown before every export
pub const PII_WARNING: &str = "This operation will extract data that may include PII.";

/// Shown when inputs are exported without a complete date range
pub const UNBOUNDED_INPUTS_WARNING: &str = "Input data will be included, but no date range is \
     specified. This may result in a large amount of data being extracted.";

/// Ask the user to confirm an operation on stdin
///
/// # Arguments
/// * `warning` - Text printed before the question
///
/// # Returns
/// * `Result<bool>` - True if the user answered yes
pub fn prompt_confirmation(warning: &str) -> Result<bool> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let stdout = io::stdout();
    let mut output = stdout.lock();
    confirm_with(warning, &mut input, &mut output)
}

/// Confirmation against arbitrary streams
pub fn confirm_with(
    warning: &str,
    input: &mut dyn BufRead,
    output: &mut dyn Write,
) -> Result<bool> {
    writeln!(output, "WARNING: {}", warning)?;
    write!(output, "Do you wish to continue? (yes/no): ")?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let confirmed = is_affirmative(&answer);
    if !confirmed {
        info!("Operation aborted by the user.");
    }
    Ok(confirmed)
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "yes" | "y")
}

/// Read a password from the terminal without echoing it
///
/// Ctrl+C or Esc abort with [`JobStateError::Cancelled`].
///
/// # Arguments
/// * `prompt` - Text shown before the input
///
/// # Returns
/// * `Result<String>` - Entered password
pub fn read_password(prompt: &str) -> Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{}", prompt)?;
    stderr.flush()?;

    let outcome = {
        let _raw = RawModeGuard::enable()?;
        read_password_keys()
    };
    writeln!(stderr)?;
    outcome
}

fn read_password_keys() -> Result<String> {
    let mut password = String::new();
    loop {
        if let Event::Key(key) = event::read()? {
            match apply_key(&mut password, key) {
                KeyOutcome::Continue => {}
                KeyOutcome::Submit => return Ok(password),
                KeyOutcome::Abort => return Err(JobStateError::Cancelled),
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum KeyOutcome {
    Continue,
    Submit,
    Abort,
}

fn apply_key(password: &mut String, key: KeyEvent) -> KeyOutcome {
    if key.kind == KeyEventKind::Release {
        return KeyOutcome::Continue;
    }
    match key.code {
        KeyCode::Enter => KeyOutcome::Submit,
        KeyCode::Esc => KeyOutcome::Abort,
        KeyCode::Char('c') | KeyCode::Char('d') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            KeyOutcome::Abort
        }
        KeyCode::Backspace => {
            password.pop();
            KeyOutcome::Continue
        }
        KeyCode::Char(c) => {
            password.push(c);
            KeyOutcome::Continue
        }
        _ => KeyOutcome::Continue,
    }
}

/// Leaves raw mode when dropped
struct RawModeGuard;

impl RawModeGuard {
    fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    #[test]
    fn test_confirmation_answers() {
        for (answer, expected) in [
            ("yes\n", true),
            ("Y\n", true),
            ("  YES  \n", true),
            ("no\n", false),
            ("\n", false),
            ("yes please\n", false),
        ] {
            let mut input = answer.as_bytes();
            let mut output = Vec::new();
            let confirmed = confirm_with(PII_WARNING, &mut input, &mut output).unwrap();
            assert_eq!(confirmed, expected, "answer {:?}", answer);
            let shown = String::from_utf8(output).unwrap();
            assert!(shown.contains("PII"));
        }
    }

    #[test]
    fn test_confirmation_on_closed_stdin_declines() {
        let mut input: &[u8] = b"";
        let mut output = Vec::new();
        assert!(!confirm_with(UNBOUNDED_INPUTS_WARNING, &mut input, &mut output).unwrap());
    }

    #[test]
    fn test_password_keys() {
        let mut password = String::new();
        assert_eq!(apply_key(&mut password, key(KeyCode::Char('s'))), KeyOutcome::Continue);
        apply_key(&mut password, key(KeyCode::Char('e')));
        apply_key(&mut password, key(KeyCode::Char('x')));
        apply_key(&mut password, key(KeyCode::Backspace));
        apply_key(&mut password, key(KeyCode::Char('c')));
        assert_eq!(apply_key(&mut password, key(KeyCode::Enter)), KeyOutcome::Submit);
        assert_eq!(password, "sec");
    }

    #[test]
    fn test_password_abort() {
        let mut password = String::new();
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(apply_key(&mut password, ctrl_c), KeyOutcome::Abort);
        assert_eq!(apply_key(&mut password, key(KeyCode::Esc)), KeyOutcome::Abort);
        assert!(password.is_empty());
    }
}
