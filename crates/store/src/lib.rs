//! Durable store — Postgres repositories for every persisted entity.
//!
//! One repository struct per concern, each holding a cheap clone of the
//! shared [`sqlx::PgPool`]. Transactions are short-lived and per-request;
//! the only multi-statement transaction is the scheduler's claiming
//! update, which uses `FOR UPDATE SKIP LOCKED` so a job runs at most once
//! per due tick even with concurrent workers.

pub mod conversations;
pub mod credentials;
pub mod errors;
pub mod jobs;
pub mod locations;
pub mod memory;
pub mod models;
pub mod personas;
pub mod token_logs;
pub mod users;

use ma_domain::error::{Error, Result};
use sqlx::postgres::PgPoolOptions;
pub use sqlx::PgPool;

/// Convert a [`sqlx::Error`] into the domain [`Error`].
///
/// `RowNotFound` maps to [`Error::NotFound`]; everything else maps to
/// [`Error::Database`].
pub(crate) fn from_sqlx(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::RowNotFound => Error::NotFound("row not found".into()),
        other => Error::Database(other.to_string()),
    }
}

/// Open the connection pool and run pending migrations.
pub async fn connect(database_url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(from_sqlx)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| Error::Database(format!("migration failed: {e}")))?;

    Ok(pool)
}
