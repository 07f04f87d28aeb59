//! SMTP AUTH LOGIN primitives
//!
//! AUTH LOGIN exchanges the username and the password as two separate
//! base64 lines. Stored passwords are Argon2 PHC strings.

use crate::error::{MailError, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tracing::warn;

/// Base64 of `Username:`
pub const USERNAME_CHALLENGE: &str = "VXNlcm5hbWU6";

/// Base64 of `Password:`
pub const PASSWORD_CHALLENGE: &str = "UGFzc3dvcmQ6";

/// Decode one LOGIN credential line.
pub fn decode_login_credential(credential: &str) -> Result<String> {
    let decoded = BASE64
        .decode(credential.trim())
        .map_err(|e| MailError::SmtpProtocol(format!("Invalid base64: {}", e)))?;

    String::from_utf8(decoded)
        .map_err(|e| MailError::SmtpProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Hash password with Argon2
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let password_hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| MailError::Config(format!("Failed to hash password: {}", e)))?;

    Ok(password_hash.to_string())
}

/// Check a password against a stored PHC string. An unparsable hash never
/// verifies.
pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(stored_hash) {
        Ok(hash) => hash,
        Err(e) => {
            warn!("Stored password hash is not a valid PHC string: {}", e);
            return false;
        }
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}
