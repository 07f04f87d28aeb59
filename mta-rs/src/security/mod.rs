//! Security module
//!
//! - [`auth`]: AUTH LOGIN credential decoding and Argon2 password hashes

pub mod auth;

pub use auth::{decode_login_credential, hash_password, verify_password};
