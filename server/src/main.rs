use std::{net::IpAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use migration::{Migrator, MigratorTrait};
use platform_authz::check_access;
use platform_db::{DbPool, SeaStore, connect};
use platform_obs::{ObsConfig, init_tracing, shutdown_tracing};
use tracing::{info, warn};

mod config;
mod http;
mod seed;

use config::AppConfig;
use http::{AppState, CheckAccessResponse, ServeConfig};

#[derive(Parser, Debug)]
#[command(name = "rbac-server", version, about = "Role-based access checks for free-text requests")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Run the HTTP server
    Serve {
        #[arg(long, env = "HOST", default_value = "0.0.0.0")]
        host: IpAddr,
        #[arg(long, env = "PORT", default_value_t = 8080)]
        port: u16,
        /// Do not apply pending migrations on startup
        #[arg(long)]
        skip_migrations: bool,
    },
    /// Apply or roll back schema migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Create demo roles and permissions
    Seed,
    /// Evaluate one request and print the decision as JSON
    Check {
        #[arg(long)]
        username: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Roll back the most recent migration
    Down,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing(ObsConfig::from_env()?)?;

    let result = run(Cli::parse()).await;
    shutdown_tracing();
    result
}

async fn run(cli: Cli) -> Result<()> {
    let config = AppConfig::load()?;
    let db = connect(&config.database)
        .await
        .context("failed to open database")?;

    match cli.cmd {
        Cmd::Serve {
            host,
            port,
            skip_migrations,
        } => {
            if skip_migrations {
                warn_on_pending(&db).await?;
            } else {
                Migrator::up(&db, None).await.context("migrations failed")?;
            }
            let state = AppState {
                store: Arc::new(SeaStore::new(db)),
                config: Arc::new(config),
            };
            http::serve(ServeConfig::new(host, port), state).await
        }
        Cmd::Migrate { action } => {
            match action {
                MigrateAction::Up => Migrator::up(&db, None).await?,
                MigrateAction::Down => Migrator::down(&db, Some(1)).await?,
            }
            info!(?action, "migrations finished");
            Ok(())
        }
        Cmd::Seed => {
            Migrator::up(&db, None).await?;
            let store = SeaStore::new(db);
            let report = seed::seed(&store).await?;
            println!(
                "seeded {} permissions, {} roles, {} grants",
                report.permissions_created, report.roles_created, report.grants_created
            );
            Ok(())
        }
        Cmd::Check { username, text } => {
            let store = SeaStore::new(db);
            let input_text = text.join(" ");
            let decision = check_access(&store, &username, &input_text).await?;
            let response = CheckAccessResponse::new(username, input_text, decision);
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

async fn warn_on_pending(db: &DbPool) -> Result<()> {
    let pending = Migrator::get_pending_migrations(db).await?;
    if !pending.is_empty() {
        warn!(
            pending = pending.len(),
            "skipping migrations with pending changes"
        );
    }
    Ok(())
}
