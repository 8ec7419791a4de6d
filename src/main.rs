use std::sync::Arc;
use std::time::Duration;

use boardsync::db::{self, PgBoardStore};
use boardsync::services::assets::{AssetError, HttpAssetFetcher, MemoryAssets};
use boardsync::{SessionDeps, SessionHandle, SessionPhase, SyncConfig};
use clap::{Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("asset client setup failed: {0}")]
    Asset(#[from] AssetError),
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
}

#[derive(Parser, Debug)]
#[command(name = "boardsync", about = "Board sync core operator tools")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply the embedded schema migrations.
    Migrate,
    /// Follow a board as a read-only observer and log what changes.
    Watch {
        board_id: Uuid,
        /// Seconds between collaborator list reports.
        #[arg(long, default_value_t = 5)]
        interval_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    if let Err(e) = dotenv {
        if !e.not_found() {
            warn!(error = %e, "failed to read .env");
        }
    }

    let cli = Cli::parse();
    match cli.command {
        Command::Migrate => run_migrate(&cli.database_url).await,
        Command::Watch { board_id, interval_secs } => run_watch(&cli.database_url, board_id, interval_secs).await,
    }
}

async fn run_migrate(database_url: &str) -> Result<(), CliError> {
    let pool = db::connect_pool(database_url).await?;
    db::run_migrations(&pool).await?;
    info!("migrations applied");
    Ok(())
}

async fn run_watch(database_url: &str, board_id: Uuid, interval_secs: u64) -> Result<(), CliError> {
    let config = SyncConfig::from_env();
    let pool = db::init_pool(database_url).await?;
    let assets = MemoryAssets::new();
    let deps = SessionDeps::new(
        Arc::new(PgBoardStore::new(pool)),
        Arc::new(assets),
        Arc::new(HttpAssetFetcher::new(config.asset_fetch_timeout)?),
    );

    let handle = SessionHandle::mount(board_id, None, deps, &config);
    let mut scene = handle.scene();
    let mut report = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let mut outcome = Ok(());

    info!(%board_id, session = %handle.session_id(), "watching board");
    loop {
        tokio::select! {
            changed = scene.changed() => {
                if changed.is_err() {
                    debug!(%board_id, "session task ended");
                    break;
                }
                let view = scene.borrow_and_update().clone();
                info!(
                    %board_id,
                    phase = ?view.phase,
                    change = ?view.change,
                    revision = view.revision,
                    elements = view.scene.elements.len(),
                    files = view.scene.files.len(),
                    "scene updated"
                );
                if view.phase == SessionPhase::NotFound {
                    outcome = Err(CliError::BoardNotFound(board_id));
                    break;
                }
            }
            _ = report.tick() => {
                let collaborators = handle.collaborators();
                let names: Vec<&str> = collaborators.iter().map(|c| c.user_name.as_str()).collect();
                info!(%board_id, count = collaborators.len(), users = ?names, "active collaborators");
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    handle.teardown().await;
    outcome
}
