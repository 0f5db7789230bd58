use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub username: String,
    /// Argon2 hash, never the plaintext.
    pub password: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Borrower {
    pub id: i64,
    pub name: String,
    pub number_phone: String,
    /// Running total of all loans handed out, mutated directly by
    /// top-ups and device deletions.
    pub total_amount: f64,
    pub notes: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Payment {
    pub id: i64,
    pub borrower_id: i64,
    pub amount_paid: f64,
    pub payment_date: String,
    pub device_description: Option<String>,
    pub device_image: Option<String>,
}

/// One loan-disbursement event; its amount is the slice of the owning
/// borrower's total_amount attributed to this event.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct Device {
    pub id: i64,
    pub borrower_id: i64,
    pub device_description: Option<String>,
    pub device_image: Option<String>,
    pub device_date: Option<String>,
    pub device_amount: Option<f64>,
}

/// Per-borrower paid sum from the grouped dashboard query.
#[derive(Deserialize, Serialize, Debug, Clone, FromRow)]
pub struct PaidTotal {
    pub borrower_id: i64,
    pub total_paid: f64,
}
