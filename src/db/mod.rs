//! Record store: product rows, their sync state and submitted batch handles.
//!
//! - `model`: view models returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Callers import from `catalog_sync::db`; the repository API is re-exported
//! here.

pub mod model;
pub mod repo;

use thiserror::Error;

pub use model::{HandleMember, OutstandingHandle, StatusCounts};
pub use repo::*;

/// Persistence failure. Fatal to the running sync cycle.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to encode column: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("product {id} has corrupt {column}: {detail}")]
    Corrupt {
        id: i64,
        column: &'static str,
        detail: String,
    },
}
