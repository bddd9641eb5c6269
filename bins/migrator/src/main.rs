//! Database migration runner for Donora.
//!
//! Usage:
//!   migrator up      - Apply the schema
//!   migrator down    - Drop the attachment schema
//!   migrator status  - Show migration status
//!   migrator fresh   - Drop all tables and re-run migrations

use donora_db::migration::Migrator;
use sea_orm_migration::prelude::*;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Reads DATABASE_URL and sets up its own tracing
    cli::run_cli(Migrator).await;
}
