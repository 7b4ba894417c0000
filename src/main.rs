//! `portal-session` CLI: establish a Supabase session and report what the
//! store and the route guards make of it.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use portal_session::config::{ConfigError, PortalConfig};
use portal_session::provider::ProviderError;
use portal_session::provider::supabase::SupabaseAuth;
use portal_session::services::bootstrap::{BootstrapOptions, spawn_bootstrapper};
use portal_session::services::guard::{self, GuardOutcome};
use portal_session::services::refresh::{RefreshOptions, spawn_refresh_task};
use portal_session::state::store::AuthStore;
use portal_session::routes;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("auth provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("--password is required with --email")]
    MissingPassword,
    #[error("{path} is not accessible; guard redirects to {target}")]
    Redirected { path: String, target: String },
    #[error("session is still loading")]
    StillLoading,
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "portal-session", about = "Academic portal session and route-guard tool")]
struct Cli {
    #[arg(long, env = "PORTAL_EMAIL")]
    email: Option<String>,

    #[arg(long, env = "PORTAL_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "PORTAL_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    #[arg(long, env = "PORTAL_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the settled identity snapshot.
    Whoami,
    /// Evaluate the route guard for a portal path.
    Check {
        path: String,
        /// Confirm the role against the profile record.
        #[arg(long)]
        verify_role: bool,
    },
    /// Follow session changes until ctrl-c, optionally guarding a path.
    Watch {
        #[arg(long)]
        path: Option<String>,
    },
    /// Revoke the current session.
    Logout,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let config = PortalConfig::from_env()?;
    let auth = Arc::new(SupabaseAuth::from_config(&config)?);
    establish_session(&cli, &auth).await?;

    let store = AuthStore::new();
    let bootstrap = spawn_bootstrapper(auth.clone(), store.clone(), BootstrapOptions::from(&config));
    let state = bootstrap.ready().await;

    let result = match cli.command {
        Command::Whoami => {
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::Check { path, verify_role } => {
            let policy = routes::policy_for(&path);
            let outcome = if verify_role {
                guard::evaluate_verified(auth.as_ref(), &state, &policy, config.role_lookup_timeout).await
            } else {
                guard::evaluate(&state, &policy)
            };
            match outcome {
                GuardOutcome::Authorized => {
                    println!("authorized: {path}");
                    Ok(())
                }
                GuardOutcome::Redirect(target) => Err(CliError::Redirected { path, target }),
                GuardOutcome::Loading => Err(CliError::StillLoading),
            }
        }
        Command::Watch { path } => run_watch(&auth, &store, &config, path).await,
        Command::Logout => {
            auth.sign_out().await;
            println!("signed out");
            Ok(())
        }
    };

    bootstrap.shutdown().await;
    result
}

async fn establish_session(cli: &Cli, auth: &SupabaseAuth) -> Result<(), CliError> {
    if let Some(email) = &cli.email {
        let password = cli.password.as_deref().ok_or(CliError::MissingPassword)?;
        auth.sign_in_with_password(email, password).await?;
    } else if let Some(access_token) = &cli.access_token {
        auth.restore_from_tokens(access_token, cli.refresh_token.as_deref()).await?;
    }
    Ok(())
}

async fn run_watch(
    auth: &Arc<SupabaseAuth>,
    store: &AuthStore,
    config: &PortalConfig,
    path: Option<String>,
) -> Result<(), CliError> {
    let refresh = spawn_refresh_task(auth.clone(), RefreshOptions::from(config));
    let guard_task = path.map(|path| {
        let policy = routes::policy_for(&path);
        guard::install_route_guard(store, policy, move |target: &str| {
            println!("guard: {path} -> redirect {target}");
        })
    });

    let mut rx = store.subscribe();
    println!("{}", serde_json::to_string(&*rx.borrow_and_update())?);
    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => break signal.map_err(CliError::from),
            changed = rx.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let line = serde_json::to_string(&*rx.borrow_and_update())?;
                println!("{line}");
            }
        }
    };

    refresh.abort();
    if let Some(task) = guard_task {
        task.abort();
    }
    result
}
