use std::path::Path;

use anyhow::{Context, Result};
use tokio::task::LocalSet;

use crate::{
    cli::{Cli, Command},
    domain::notification::NavigationFocus,
    infra::{config::AppConfig, error::AppError, storage_layout::StorageLayout},
    usecases::{
        bootstrap,
        client::{BootOutcome, RunExit},
        context::AppContext,
        login::{run_login, LoginOutcome, RetryPolicy, StdTerminal},
        logout::logout_and_reset,
        notification_gate::GateDecision,
        push::{self, PushOutcome},
    },
};

const BACKEND_UNREACHABLE: &str = "BACKEND_UNREACHABLE";

pub fn run(cli: Cli) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;

    LocalSet::new().block_on(&runtime, execute(cli))
}

async fn execute(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    match cli.command_or_default() {
        Command::Run => run_client(config_path).await,
        Command::Login => login(config_path).await,
        Command::Logout => logout(config_path).await,
        Command::Notify {
            payload,
            focus_chat,
        } => notify(config_path, &payload, focus_chat).await,
        Command::PushToken { token } => register_push_token(config_path, &token).await,
    }
}

async fn run_client(config_path: Option<&Path>) -> Result<()> {
    let context = bootstrap::bootstrap(config_path)?;
    let mut client = bootstrap::compose_client(&context)?;

    match client.boot().await? {
        BootOutcome::SignedOut => {
            println!("No saved session. Run `chatcore login` first.");
            return Ok(());
        }
        BootOutcome::SessionEnded => {
            println!("Session expired. Run `chatcore login` to sign in again.");
            return Ok(());
        }
        BootOutcome::Unreachable => {
            eprintln!(
                "{BACKEND_UNREACHABLE}: could not refresh the session. Saved session kept; try again later."
            );
            return Ok(());
        }
        BootOutcome::Ready {
            user_id, realtime, ..
        } => {
            tracing::info!(?user_id, realtime, "boot completed");
        }
    }

    let exit = client.run(wait_for_ctrl_c()).await;
    match exit {
        RunExit::Shutdown => println!("Stopped."),
        RunExit::SessionExpired => {
            println!("Session expired. Run `chatcore login` to sign in again.")
        }
        RunExit::LoggedOut => println!("Signed out."),
    }

    Ok(())
}

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %error, "Ctrl-C handler unavailable; running until the session ends");
        std::future::pending::<()>().await;
    }
}

async fn login(config_path: Option<&Path>) -> Result<()> {
    let context = bootstrap::bootstrap(config_path)?;
    let client = bootstrap::compose_client(&context)?;

    let mut terminal = StdTerminal;
    let outcome = run_login(
        &mut terminal,
        client.api.as_ref(),
        &client.session,
        &RetryPolicy::default(),
    )
    .await?;

    if outcome == LoginOutcome::Authenticated {
        let push =
            push::register_stored(client.store.as_ref(), client.api.as_ref(), &client.session)
                .await?;
        tracing::debug!(?push, "push token registration after login");
    }

    Ok(())
}

async fn logout(config_path: Option<&Path>) -> Result<()> {
    let context = logout_context(config_path)?;
    let client = bootstrap::compose_client(&context)?;

    let outcome = logout_and_reset(&client.session).await?;
    tracing::info!(session_found = outcome.session_found, "logout completed");
    println!("Logout completed. Saved credentials removed.");

    Ok(())
}

fn logout_context(config_path: Option<&Path>) -> Result<AppContext, AppError> {
    match bootstrap::bootstrap(config_path) {
        Ok(context) => Ok(context),
        Err(error) => {
            tracing::warn!(
                error = %error,
                "logout fallback: bootstrap failed, continuing with default config"
            );
            Ok(AppContext::new(AppConfig::default(), StorageLayout::resolve()?))
        }
    }
}

async fn notify(
    config_path: Option<&Path>,
    payload: &str,
    focus_chat: Option<String>,
) -> Result<()> {
    let payload = serde_json::from_str(payload).context("payload is not valid JSON")?;

    let context = bootstrap::bootstrap(config_path)?;
    let client = bootstrap::compose_client(&context)?;
    if client.session.restore().await? && client.session.ensure_valid_token().await {
        // Failures leave the identity unknown, which the gate treats as allow.
        let _ = client.session.load_current_user().await;
    }

    let focus = focus_chat.map(NavigationFocus::chat).unwrap_or_default();
    let (event, decision) = client.preview_notification(payload, focus);

    tracing::debug!(?event, "notification normalized");
    println!("{}", decision_line(&decision));
    Ok(())
}

async fn register_push_token(config_path: Option<&Path>, token: &str) -> Result<()> {
    let context = bootstrap::bootstrap(config_path)?;
    let client = bootstrap::compose_client(&context)?;
    if client.session.restore().await? {
        client.session.ensure_valid_token().await;
    }

    let outcome = push::save_and_register(
        client.store.as_ref(),
        client.api.as_ref(),
        &client.session,
        token,
    )
    .await?;
    println!("{}", push_line(outcome));
    Ok(())
}

fn decision_line(decision: &GateDecision) -> String {
    let verdict = if decision.suppress { "suppress" } else { "show" };
    format!("{verdict} ({})", decision.reason.as_label())
}

fn push_line(outcome: PushOutcome) -> String {
    match outcome {
        PushOutcome::NoToken => "No push token stored.".to_owned(),
        PushOutcome::Deferred => {
            "Push token saved. It will be registered after the next login.".to_owned()
        }
        PushOutcome::Registered => "Push token saved and registered.".to_owned(),
        PushOutcome::Failed(class) => {
            format!("Push token saved; registration failed ({}).", class.as_label())
        }
    }
}
