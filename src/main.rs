use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use infisical_auth::auth::{EnvSnapshot, SessionStore};
use infisical_auth::config::{Command, Config};
use infisical_auth::CredentialResolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let (config, command) = Config::load()?;
    config.validate()?;

    // Initialize logging with a configured level
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    tracing::debug!(api_url = %config.api_url, "Configuration loaded");

    match command {
        Command::Login => login(&config).await,
        Command::Status => status(&config),
        Command::Logout => logout(&config).await,
    }
}

/// Resolve credentials and report the resulting session
async fn login(config: &Config) -> Result<()> {
    let env = EnvSnapshot::capture();
    let resolver = CredentialResolver::from_config(config, &env)
        .await
        .context("Failed to initialize credential resolver")?;

    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, cancelling authentication...");
                cancel.cancel();
            }
        })
    };

    let result = resolver.resolve(&cancel).await;
    ctrl_c.abort();

    let session = result.context("Authentication failed")?;
    println!("Authenticated via {}", session.method);
    println!("Token:      {}", session.token.redacted());
    println!("Expires at: {}", session.expires_at.to_rfc3339());
    Ok(())
}

/// Show the persisted session without contacting the backend
fn status(config: &Config) -> Result<()> {
    let Some(ref path) = config.session_file else {
        println!("Session persistence is disabled");
        return Ok(());
    };

    match SessionStore::new(path).load().context("Failed to read session file")? {
        Some(stored) => {
            println!("Logged in via {}", stored.session.method);
            println!("Expires at: {}", stored.session.expires_at.to_rfc3339());
        }
        None => println!("No active session"),
    }
    Ok(())
}

/// Discard any cached session
async fn logout(config: &Config) -> Result<()> {
    let resolver = CredentialResolver::from_config(config, &EnvSnapshot::default())
        .await
        .context("Failed to initialize credential resolver")?;
    resolver.logout().await.context("Failed to clear session")?;
    println!("Logged out");
    Ok(())
}
