use std::collections::HashMap;
use std::path::Path;

use actix_multipart::form::tempfile::TempFile;
use actix_session::Session;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::errors::AppError;

const FLASH_KEY: &str = "flash";

pub fn hash_password(plain: &str) -> Result<String, AppError> {
    Argon2::default()
        .hash_password(plain.as_bytes(), &SaltString::generate(&mut OsRng))
        .map(|hash| hash.to_string())
        .map_err(|e| {
            log::error!("Failed to hash password: {}", e);
            AppError::PasswordError(e.to_string())
        })
}

pub fn verify_password(provided: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(provided.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Form amounts may carry thousands separators ("1,000").
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(',', "");
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Strips any path components and every character outside [A-Za-z0-9._-].
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    base.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect::<String>()
        .trim_matches('.')
        .to_string()
}

/// Stores an uploaded image under its sanitized original filename.
/// Same-name uploads overwrite. Empty file parts are ignored.
pub fn save_upload(file: &TempFile, upload_dir: &str) -> Result<Option<String>, std::io::Error> {
    let original = file.file_name.as_deref().unwrap_or("");
    if original.is_empty() {
        return Ok(None);
    }
    let filename = sanitize_filename(original);
    if filename.is_empty() {
        return Ok(None);
    }
    let dest = Path::new(upload_dir).join(&filename);
    std::fs::copy(file.file.path(), &dest)?;
    log::info!("Stored upload {}", dest.display());
    Ok(Some(filename))
}

pub fn flash(session: &Session, message: &str) {
    if let Err(e) = session.insert(FLASH_KEY, message) {
        log::error!("Failed to set flash message: {}", e);
    }
}

pub fn take_flash(session: &Session) -> Option<String> {
    session.remove_as::<String>(FLASH_KEY).and_then(|v| v.ok())
}

pub fn format_with_commas(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{}", rounded.abs() as i64);
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 && (bytes.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(*b as char);
    }
    if rounded < 0.0 {
        format!("-{}", out)
    } else {
        out
    }
}

/// Tera filter mirroring the amount formatting used across the templates.
/// Non-numeric input passes through untouched.
pub fn format_number_filter(
    value: &tera::Value,
    _args: &HashMap<String, tera::Value>,
) -> tera::Result<tera::Value> {
    match value.as_f64() {
        Some(n) => Ok(tera::Value::String(format_with_commas(n))),
        None => Ok(value.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_amounts_with_separators() {
        assert_eq!(parse_amount("1,000"), Some(1000.0));
        assert_eq!(parse_amount(" 2,500.50 "), Some(2500.5));
        assert_eq!(parse_amount("750"), Some(750.0));
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("abc"), None);
    }

    #[test]
    fn sanitizes_filenames() {
        assert_eq!(sanitize_filename("photo.jpg"), "photo.jpg");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("my photo (1).png"), "myphoto1.png");
        assert_eq!(sanitize_filename("..."), "");
    }

    #[test]
    fn formats_with_commas() {
        assert_eq!(format_with_commas(0.0), "0");
        assert_eq!(format_with_commas(1000.0), "1,000");
        assert_eq!(format_with_commas(1234567.0), "1,234,567");
        assert_eq!(format_with_commas(-2500.0), "-2,500");
        assert_eq!(format_with_commas(999.4), "999");
    }

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("123456").unwrap();
        assert!(verify_password("123456", &hash));
        assert!(!verify_password("wrong", &hash));
        assert!(!verify_password("123456", "not-a-hash"));
    }
}
