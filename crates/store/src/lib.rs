//! Persistence for handoff records: per-user routing state, the agent queue,
//! and conversation transcripts.
//!
//! Two backends implement [`HandoffStore`]: [`InMemoryStore`] for tests and
//! single-process deployments, and [`SqliteStore`] for state that must survive
//! a restart.

pub mod error;
pub mod store;
pub mod store_memory;
pub mod store_sqlite;
pub mod types;

use std::sync::Arc;

use {
    handoff_config::{StoreBackend, StoreConfig},
    tracing::info,
};

pub use {
    error::{Error, Result},
    store::HandoffStore,
    store_memory::InMemoryStore,
    store_sqlite::SqliteStore,
    types::{HandoffRecord, HandoffState, StateKind, TranscriptMessage},
};

/// Run database migrations for the handoff store.
///
/// Creates the `handoff_users` and `handoff_messages` tables. Call at startup
/// before [`SqliteStore::with_pool`].
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

/// Build the backend selected by `config`.
pub async fn open_store(config: &StoreConfig) -> Result<Arc<dyn HandoffStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!(backend = "memory", "opening handoff store");
            Ok(Arc::new(InMemoryStore::new()))
        },
        StoreBackend::Sqlite => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                Error::message("store.database_url is required for the sqlite backend")
            })?;
            info!(
                backend = "sqlite",
                max_connections = config.max_connections,
                "opening handoff store"
            );
            Ok(Arc::new(SqliteStore::new(url, config.max_connections).await?))
        },
    }
}
