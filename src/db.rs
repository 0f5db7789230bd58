use sqlx::SqlitePool;

use crate::{
    errors::AppError,
    structs::{Borrower, Device, PaidTotal, Payment, User},
    utils, AppState,
};

/// Creates the four tables if they don't exist and seeds the admin account.
/// There is no migration system; the schema is fixed.
pub async fn init_db(pool: &SqlitePool) -> Result<(), AppError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS borrowers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            number_phone TEXT NOT NULL,
            total_amount REAL NOT NULL,
            notes TEXT
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS payments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            borrower_id INTEGER NOT NULL,
            amount_paid REAL NOT NULL,
            payment_date TEXT NOT NULL,
            device_description TEXT,
            device_image TEXT,
            FOREIGN KEY (borrower_id) REFERENCES borrowers(id)
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS devices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            borrower_id INTEGER NOT NULL,
            device_description TEXT,
            device_image TEXT,
            device_date TEXT,
            device_amount REAL,
            FOREIGN KEY (borrower_id) REFERENCES borrowers(id)
        )",
    )
    .execute(pool)
    .await?;

    let admin: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE username = $1")
        .bind("admin")
        .fetch_optional(pool)
        .await?;
    if admin.is_none() {
        let hashed = utils::hash_password("123456")?;
        sqlx::query("INSERT INTO users (email, username, password) VALUES ($1, $2, $3)")
            .bind("admin@example.com")
            .bind("admin")
            .bind(hashed)
            .execute(pool)
            .await?;
        log::info!("Seeded default admin user");
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Users

pub async fn get_user_by_username(
    state: &AppState,
    username: &str,
) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(&pool)
        .await
}

pub async fn get_user_by_email(state: &AppState, email: &str) -> Result<Option<User>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(&pool)
        .await
}

pub async fn email_in_use(state: &AppState, email: &str) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(&pool)
        .await?;
    Ok(row.is_some())
}

/// Username uniqueness check; `exclude_email`, when given, leaves that
/// account out of the match (the forgot-password flow checks against
/// everyone but the account being reset).
pub async fn username_in_use(
    state: &AppState,
    username: &str,
    exclude_email: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let row: Option<(i64,)> = match exclude_email {
        Some(email) => {
            sqlx::query_as("SELECT id FROM users WHERE username = $1 AND email != $2")
                .bind(username)
                .bind(email)
                .fetch_optional(&pool)
                .await?
        }
        None => {
            sqlx::query_as("SELECT id FROM users WHERE username = $1")
                .bind(username)
                .fetch_optional(&pool)
                .await?
        }
    };
    Ok(row.is_some())
}

pub async fn update_user_fields(
    state: &AppState,
    id: i64,
    email: Option<&str>,
    username: Option<&str>,
    password_hash: Option<&str>,
) -> Result<(), sqlx::Error> {
    let pool = state.db_pool.clone();
    // Build the query and bind parameters in order
    let mut fields = Vec::new();
    let mut param_index = 1;
    if email.is_some() {
        fields.push(format!("email = ${}", param_index));
        param_index += 1;
    }
    if username.is_some() {
        fields.push(format!("username = ${}", param_index));
        param_index += 1;
    }
    if password_hash.is_some() {
        fields.push(format!("password = ${}", param_index));
        param_index += 1;
    }
    if fields.is_empty() {
        return Ok(());
    }
    let query = format!(
        "UPDATE users SET {} WHERE id = ${}",
        fields.join(", "),
        param_index
    );

    let mut q = sqlx::query(&query);
    if let Some(email) = email {
        q = q.bind(email);
    }
    if let Some(username) = username {
        q = q.bind(username);
    }
    if let Some(password_hash) = password_hash {
        q = q.bind(password_hash);
    }
    q = q.bind(id);
    q.execute(&pool).await?;

    log::info!("User {} updated", id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Borrowers

pub async fn get_all_borrowers(state: &AppState) -> Result<Vec<Borrower>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Borrower>("SELECT * FROM borrowers")
        .fetch_all(&pool)
        .await
}

pub async fn borrower_names(state: &AppState) -> Result<Vec<String>, sqlx::Error> {
    let pool = state.db_pool.clone();
    let rows: Vec<(String,)> = sqlx::query_as("SELECT name FROM borrowers ORDER BY name")
        .fetch_all(&pool)
        .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

pub async fn get_borrower(state: &AppState, id: i64) -> Result<Option<Borrower>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Borrower>("SELECT * FROM borrowers WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await
}

/// Name uniqueness is case- and whitespace-insensitive, enforced here
/// rather than by a database constraint.
pub async fn borrower_name_exists(
    state: &AppState,
    name: &str,
    exclude_id: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let pool = state.db_pool.clone();
    let row: Option<(i64,)> = match exclude_id {
        Some(id) => {
            sqlx::query_as(
                "SELECT id FROM borrowers WHERE LOWER(TRIM(name)) = LOWER(TRIM($1)) AND id != $2",
            )
            .bind(name)
            .bind(id)
            .fetch_optional(&pool)
            .await?
        }
        None => {
            sqlx::query_as("SELECT id FROM borrowers WHERE LOWER(TRIM(name)) = LOWER(TRIM($1))")
                .bind(name)
                .fetch_optional(&pool)
                .await?
        }
    };
    Ok(row.is_some())
}

#[derive(Debug, Clone)]
pub struct NewLoan {
    pub name: String,
    pub number_phone: String,
    pub total_amount: f64,
    pub notes: String,
    pub device_description: String,
    pub device_image: Option<String>,
    /// Raw form value; empty means "today".
    pub loan_date: String,
}

/// Inserts the borrower and, when any device field was supplied, the
/// initial device row carrying the full loan amount. One transaction.
pub async fn create_borrower(state: &AppState, loan: &NewLoan) -> Result<i64, sqlx::Error> {
    let mut tx = state.db_pool.begin().await?;

    let borrower_id: i64 = sqlx::query_scalar(
        "INSERT INTO borrowers (name, number_phone, total_amount, notes)
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(&loan.name)
    .bind(&loan.number_phone)
    .bind(loan.total_amount)
    .bind(&loan.notes)
    .fetch_one(&mut *tx)
    .await?;

    let has_device = !loan.device_description.is_empty()
        || loan.device_image.is_some()
        || !loan.loan_date.is_empty();
    if has_device {
        let date = if loan.loan_date.is_empty() {
            utils::today()
        } else {
            loan.loan_date.clone()
        };
        sqlx::query(
            "INSERT INTO devices (borrower_id, device_description, device_image, device_date, device_amount)
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(borrower_id)
        .bind(&loan.device_description)
        .bind(&loan.device_image)
        .bind(date)
        .bind(loan.total_amount)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    log::info!("Borrower {} ({}) created", borrower_id, loan.name);
    Ok(borrower_id)
}

pub async fn update_borrower(
    state: &AppState,
    id: i64,
    name: &str,
    number_phone: &str,
    total_amount: f64,
    notes: &str,
) -> Result<(), sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query(
        "UPDATE borrowers SET name = $1, number_phone = $2, total_amount = $3, notes = $4 WHERE id = $5",
    )
    .bind(name)
    .bind(number_phone)
    .bind(total_amount)
    .bind(notes)
    .bind(id)
    .execute(&pool)
    .await?;
    log::info!("Borrower {} updated", id);
    Ok(())
}

/// Adds to the running total and records the increment as a new device
/// row dated `date`. One transaction.
pub async fn top_up_loan(
    state: &AppState,
    id: i64,
    amount: f64,
    description: &str,
    image: Option<String>,
    date: &str,
) -> Result<(), sqlx::Error> {
    let mut tx = state.db_pool.begin().await?;

    sqlx::query("UPDATE borrowers SET total_amount = total_amount + $1 WHERE id = $2")
        .bind(amount)
        .bind(id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "INSERT INTO devices (borrower_id, device_description, device_image, device_date, device_amount)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(description)
    .bind(image)
    .bind(date)
    .bind(amount)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("Borrower {} topped up by {}", id, amount);
    Ok(())
}

/// Removes the borrower's payments, then the borrower. Device rows are
/// deliberately left behind (see DESIGN.md).
pub async fn delete_borrower(state: &AppState, id: i64) -> Result<(), sqlx::Error> {
    let mut tx = state.db_pool.begin().await?;
    sqlx::query("DELETE FROM payments WHERE borrower_id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM borrowers WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    log::info!("Borrower {} deleted", id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Payments

#[derive(Debug, Clone, PartialEq)]
pub enum PaymentOutcome {
    Recorded,
    UnknownBorrower,
    AlreadySettled,
    ExceedsRemaining { remaining: f64 },
}

/// Resolves the borrower by exact name, checks the amount against the
/// remaining balance, and inserts — all inside one transaction, so two
/// concurrent submissions cannot both pass the check.
pub async fn record_payment(
    state: &AppState,
    borrower_name: &str,
    amount: f64,
    date: &str,
) -> Result<PaymentOutcome, sqlx::Error> {
    let mut tx = state.db_pool.begin().await?;

    let borrower: Option<(i64, f64)> =
        sqlx::query_as("SELECT id, total_amount FROM borrowers WHERE name = $1")
            .bind(borrower_name)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((borrower_id, total_amount)) = borrower else {
        return Ok(PaymentOutcome::UnknownBorrower);
    };

    let total_paid: f64 = sqlx::query_scalar(
        "SELECT COALESCE(SUM(amount_paid), 0.0) FROM payments WHERE borrower_id = $1",
    )
    .bind(borrower_id)
    .fetch_one(&mut *tx)
    .await?;

    let remaining = total_amount - total_paid;
    if remaining <= 0.0 {
        return Ok(PaymentOutcome::AlreadySettled);
    }
    if amount > remaining {
        return Ok(PaymentOutcome::ExceedsRemaining { remaining });
    }

    sqlx::query("INSERT INTO payments (borrower_id, amount_paid, payment_date) VALUES ($1, $2, $3)")
        .bind(borrower_id)
        .bind(amount)
        .bind(date)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    log::info!("Payment of {} recorded for borrower {}", amount, borrower_id);
    Ok(PaymentOutcome::Recorded)
}

pub async fn get_payment(state: &AppState, id: i64) -> Result<Option<Payment>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
        .bind(id)
        .fetch_optional(&pool)
        .await
}

pub async fn payments_for_borrower(
    state: &AppState,
    borrower_id: i64,
) -> Result<Vec<Payment>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Payment>(
        "SELECT * FROM payments WHERE borrower_id = $1 ORDER BY payment_date ASC",
    )
    .bind(borrower_id)
    .fetch_all(&pool)
    .await
}

/// Overwrites amount, date and description; the image column is only
/// touched when a replacement was uploaded. No balance re-validation.
pub async fn update_payment(
    state: &AppState,
    id: i64,
    amount: f64,
    date: &str,
    description: &str,
    image: Option<String>,
) -> Result<(), sqlx::Error> {
    let pool = state.db_pool.clone();
    match image {
        Some(filename) => {
            sqlx::query(
                "UPDATE payments SET amount_paid = $1, payment_date = $2, device_image = $3, device_description = $4 WHERE id = $5",
            )
            .bind(amount)
            .bind(date)
            .bind(filename)
            .bind(description)
            .bind(id)
            .execute(&pool)
            .await?;
        }
        None => {
            sqlx::query(
                "UPDATE payments SET amount_paid = $1, payment_date = $2, device_description = $3 WHERE id = $4",
            )
            .bind(amount)
            .bind(date)
            .bind(description)
            .bind(id)
            .execute(&pool)
            .await?;
        }
    }
    log::info!("Payment {} updated", id);
    Ok(())
}

pub async fn delete_payment(state: &AppState, id: i64) -> Result<(), sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query("DELETE FROM payments WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    log::info!("Payment {} deleted", id);
    Ok(())
}

pub async fn sum_payments_for(state: &AppState, borrower_id: i64) -> Result<f64, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_scalar("SELECT COALESCE(SUM(amount_paid), 0.0) FROM payments WHERE borrower_id = $1")
        .bind(borrower_id)
        .fetch_one(&pool)
        .await
}

pub async fn payments_by_borrower(state: &AppState) -> Result<Vec<PaidTotal>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, PaidTotal>(
        "SELECT borrower_id, SUM(amount_paid) AS total_paid FROM payments GROUP BY borrower_id",
    )
    .fetch_all(&pool)
    .await
}

pub async fn sum_all_loans(state: &AppState) -> Result<f64, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_scalar("SELECT COALESCE(SUM(total_amount), 0.0) FROM borrowers")
        .fetch_one(&pool)
        .await
}

pub async fn sum_all_payments(state: &AppState) -> Result<f64, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_scalar("SELECT COALESCE(SUM(amount_paid), 0.0) FROM payments")
        .fetch_one(&pool)
        .await
}

// ---------------------------------------------------------------------------
// Devices

pub async fn latest_device_for(
    state: &AppState,
    borrower_id: i64,
) -> Result<Option<Device>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE borrower_id = $1 ORDER BY device_date DESC LIMIT 1",
    )
    .bind(borrower_id)
    .fetch_optional(&pool)
    .await
}

pub async fn devices_for_borrower(
    state: &AppState,
    borrower_id: i64,
) -> Result<Vec<Device>, sqlx::Error> {
    let pool = state.db_pool.clone();
    sqlx::query_as::<_, Device>(
        "SELECT * FROM devices WHERE borrower_id = $1 ORDER BY device_date DESC",
    )
    .bind(borrower_id)
    .fetch_all(&pool)
    .await
}

/// Deletes the device and subtracts its amount from the owner's running
/// total (no floor at zero). Returns the owner's id, or None if the
/// device was already gone. One transaction.
pub async fn delete_device(state: &AppState, device_id: i64) -> Result<Option<i64>, sqlx::Error> {
    let mut tx = state.db_pool.begin().await?;

    let device: Option<(i64, Option<f64>)> =
        sqlx::query_as("SELECT borrower_id, device_amount FROM devices WHERE id = $1")
            .bind(device_id)
            .fetch_optional(&mut *tx)
            .await?;
    let Some((borrower_id, device_amount)) = device else {
        return Ok(None);
    };

    sqlx::query("DELETE FROM devices WHERE id = $1")
        .bind(device_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE borrowers SET total_amount = total_amount - $1 WHERE id = $2")
        .bind(device_amount.unwrap_or(0.0))
        .bind(borrower_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    log::info!("Device {} deleted, borrower {} adjusted", device_id, borrower_id);
    Ok(Some(borrower_id))
}
