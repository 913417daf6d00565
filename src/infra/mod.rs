use crate::{
    adapters::persistence::PostgresPersistence,
    infra::{
        db::{init_db, run_migrations},
        error::InfraError,
    },
};

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod expiry_sweeper;
pub mod face_client;
pub mod http_client;
pub mod paystack_client;
pub mod setup;
pub mod webhook_signature;

pub async fn postgres_persistence(
    database_url: &str,
    max_connections: u32,
    migrate: bool,
) -> Result<PostgresPersistence, InfraError> {
    let pool = init_db(database_url, max_connections).await?;
    if migrate {
        run_migrations(&pool).await?;
    }
    Ok(PostgresPersistence::new(pool))
}
