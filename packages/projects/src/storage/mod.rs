// ABOUTME: Project persistence layer over SQLite
// ABOUTME: Error type shared by the store and the orchestrator that wraps it

use thiserror::Error;

pub mod sqlite;

pub use sqlite::{connect_pool, ProjectStorage};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Project not found")]
    NotFound,
    #[error("Invalid stored value: {0}")]
    InvalidStatus(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
