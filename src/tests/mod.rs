mod db_tests;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use crate::{db, AppState};

/// Fresh in-memory database with the schema applied and the admin seeded.
/// A single connection keeps the in-memory database alive for the test.
pub async fn test_state() -> AppState {
    // Match the production pool: keep FK enforcement at SQLite's native
    // default (off) so delete_borrower can leave orphaned device rows.
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")
        .expect("valid in-memory connect options")
        .foreign_keys(false);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(opts)
        .await
        .expect("failed to open in-memory database");
    db::init_db(&pool).await.expect("failed to initialize schema");
    AppState {
        db_pool: pool,
        upload_dir: std::env::temp_dir().to_string_lossy().into_owned(),
    }
}

pub async fn seed_borrower(state: &AppState, name: &str, amount: f64) -> i64 {
    db::create_borrower(
        state,
        &db::NewLoan {
            name: name.to_owned(),
            number_phone: "0500000000".to_owned(),
            total_amount: amount,
            notes: String::new(),
            device_description: "initial loan".to_owned(),
            device_image: None,
            loan_date: "2025-01-01".to_owned(),
        },
    )
    .await
    .expect("failed to seed borrower")
}
