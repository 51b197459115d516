use std::io;

use crate::usecases::{
    contracts::{ApiError, ChatApi, FailureClass},
    session::SessionManager,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub credential_attempts: usize,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            credential_attempts: 3,
        }
    }
}

pub trait LoginTerminal {
    fn print_line(&mut self, line: &str) -> io::Result<()>;
    fn prompt_line(&mut self, prompt: &str) -> io::Result<Option<String>>;
    fn prompt_secret(&mut self, prompt: &str) -> io::Result<Option<String>>;
}

pub struct StdTerminal;

impl LoginTerminal for StdTerminal {
    fn print_line(&mut self, line: &str) -> io::Result<()> {
        println!("{line}");
        Ok(())
    }

    fn prompt_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        use std::io::Write;

        print!("{prompt}");
        io::stdout().flush()?;

        let mut line = String::new();
        let bytes = io::stdin().read_line(&mut line)?;
        if bytes == 0 {
            return Ok(None);
        }

        Ok(Some(line.trim().to_owned()))
    }

    fn prompt_secret(&mut self, prompt: &str) -> io::Result<Option<String>> {
        match rpassword::prompt_password(prompt) {
            Ok(password) => Ok(Some(password)),
            Err(source) if source.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(source) => Err(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Authenticated,
    ExitWithGuidance,
}

/// Prompts for credentials until the backend accepts them, then establishes
/// and persists the session.
pub async fn run_login(
    terminal: &mut dyn LoginTerminal,
    api: &dyn ChatApi,
    session: &SessionManager,
    retry_policy: &RetryPolicy,
) -> io::Result<LoginOutcome> {
    let attempts = retry_policy.credential_attempts;

    for attempt in 1..=attempts {
        let Some(username) = terminal.prompt_line("Username: ")? else {
            terminal.print_line("Input cancelled (EOF). Run chatcore login again to retry.")?;
            return Ok(LoginOutcome::ExitWithGuidance);
        };
        if username.is_empty() {
            terminal.print_line(&format!(
                "Username must not be empty. Attempts left: {}",
                attempts.saturating_sub(attempt)
            ))?;
            continue;
        }

        let Some(password) = terminal.prompt_secret("Password: ")? else {
            terminal.print_line("Input cancelled (EOF). Run chatcore login again to retry.")?;
            return Ok(LoginOutcome::ExitWithGuidance);
        };

        let tokens = match api.login(&username, &password).await {
            Ok(tokens) => tokens,
            Err(error) => {
                if !handle_login_error(terminal, &error, attempts.saturating_sub(attempt))? {
                    return Ok(LoginOutcome::ExitWithGuidance);
                }
                continue;
            }
        };

        if let Err(error) = session.establish(tokens).await {
            tracing::error!(error = %error, "session established but could not be saved");
            terminal.print_line(
                "Signed in, but the session could not be saved. You will need to sign in again next run.",
            )?;
        } else {
            terminal.print_line("Signed in. Session saved.")?;
        }

        return Ok(LoginOutcome::Authenticated);
    }

    terminal.print_line("Too many failed attempts. Please try again later.")?;
    Ok(LoginOutcome::ExitWithGuidance)
}

/// Returns whether another attempt makes sense.
fn handle_login_error(
    terminal: &mut dyn LoginTerminal,
    error: &ApiError,
    attempts_left: usize,
) -> io::Result<bool> {
    tracing::warn!(code = error.code(), error = %error, "login attempt failed");

    match error.classify() {
        FailureClass::AuthExpired | FailureClass::Conflict | FailureClass::Validation => {
            terminal.print_line(&format!(
                "Invalid username or password. Attempts left: {attempts_left}"
            ))?;
            Ok(true)
        }
        FailureClass::Transient => {
            terminal.print_line(&format!(
                "{}: backend unreachable. Check your connection and try again.",
                error.code()
            ))?;
            Ok(false)
        }
    }
}
