//! csops-server - Customer Success operations service
//!
//! Serves the JSON API and runs the adoption-check scheduler. The
//! `create-admin` subcommand bootstraps the first ADMIN account.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::signal;
use tracing::{error, info};

use csops_common::config::Config;
use csops_common::db::init_database;
use csops_common::{auth, Role};
use csops_server::db::users::{self, NewUser};
use csops_server::services::scheduler::AdoptionScheduler;
use csops_server::{build_router, AppState};

/// Command-line arguments for csops-server
#[derive(Parser, Debug)]
#[command(name = "csops-server")]
#[command(about = "Customer Success operations service")]
#[command(version)]
struct Args {
    /// Config file (defaults to ~/.config/csops/config.toml when present)
    #[arg(short, long, env = "CSOPS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 127.0.0.1:5740
    #[arg(short, long)]
    bind: Option<String>,

    /// SQLite database file
    #[arg(short, long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create an ADMIN user and exit
    CreateAdmin {
        #[arg(long)]
        email: String,
        #[arg(long)]
        name: String,
        #[arg(long, env = "CSOPS_ADMIN_PASSWORD")]
        password: String,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(args.config.as_deref())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    if let Some(bind) = &args.bind {
        config.bind_address = bind.clone();
    }
    if let Some(database) = &args.database {
        config.database_path = database.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .init();

    info!(
        "Starting csops-server v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    info!("Database path: {}", config.database_path.display());
    let pool = match init_database(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    if let Some(Command::CreateAdmin { email, name, password }) = &args.command {
        return create_admin(&pool, email, name, password).await;
    }

    config.validate()?;
    let bind_address = config.bind_address.clone();
    let state = AppState::new(pool, config).context("Failed to initialize application state")?;

    let scheduler = Arc::new(AdoptionScheduler::new(
        state.db.clone(),
        state.event_bus.clone(),
        state.config.scheduler_interval_secs,
    ));
    let scheduler_task = scheduler.run();

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    info!("csops-server listening on http://{}", bind_address);
    info!("Health check: http://{}/health", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    scheduler_task.abort();
    info!("Server shutdown complete");
    Ok(())
}

async fn create_admin(pool: &sqlx::SqlitePool, email: &str, name: &str, password: &str) -> Result<()> {
    let email = users::normalize_email(email);
    if !email.contains('@') {
        bail!("Invalid email: {}", email);
    }
    if name.trim().is_empty() {
        bail!("Name must not be blank");
    }
    if users::find_by_email(pool, &email).await?.is_some() {
        bail!("A user with email {} already exists", email);
    }
    auth::validate_password(password)?;

    let user = users::insert(
        pool,
        &NewUser {
            email: &email,
            name,
            password_hash: &auth::hash_password(password)?,
            role: Role::Admin,
            company_id: None,
        },
    )
    .await?;
    info!(user_id = %user.id, email = %user.email, "Created admin user");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
