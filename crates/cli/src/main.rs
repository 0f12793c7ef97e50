//! `consignd` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`   — start the API server and the notification listener.
//! - `migrate` — run pending database migrations.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;

use db::PgStore;
use engine::{ConsignmentService, WorkflowManager};
use plugins::DefaultPluginFactory;
use task::{notification_channel, TaskManager};

#[derive(Parser)]
#[command(
    name = "consignd",
    about = "Workflow orchestration engine for trade consignments",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server and the workflow notification listener.
    Serve {
        #[arg(long, default_value = "0.0.0.0:8080")]
        bind: String,
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
        /// Capacity of the active-container LRU cache.
        #[arg(long, default_value_t = 100)]
        cache_capacity: usize,
        /// Bound of the plugin notification channel.
        #[arg(long, default_value_t = 100)]
        channel_capacity: usize,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url, cache_capacity, channel_capacity } => {
            info!("Starting consignd on {bind}");
            let pool = db::pool::create_pool(&database_url, 10)
                .await
                .expect("failed to connect to database");

            let store = Arc::new(PgStore::new(pool));
            let (notification_tx, notification_rx) = notification_channel(channel_capacity);

            let task_manager = Arc::new(TaskManager::new(
                store.clone(),
                store.clone(),
                Arc::new(DefaultPluginFactory),
                notification_tx,
                cache_capacity,
            ));
            let consignments = Arc::new(ConsignmentService::new(store.clone(), store.clone()));
            let manager = WorkflowManager::new(task_manager.clone(), store, consignments.clone());
            let listener = manager.spawn_listener(notification_rx);

            let state = api::AppState { consignments, tasks: task_manager };

            tokio::select! {
                result = api::serve(&bind, state) => {
                    result.expect("server failed");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                }
            }

            // Let the listener finish in-flight notifications.
            listener.stop().await;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .expect("failed to connect to database");
            db::pool::run_migrations(&pool)
                .await
                .expect("migration failed");
            info!("Migrations applied successfully");
        }
    }
}
