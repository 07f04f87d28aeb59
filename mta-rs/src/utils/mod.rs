//! Utility modules
//!
//! - [`dns`]: mail exchanger lookup
//! - [`email`]: address parsing and domain helpers

pub mod dns;
pub mod email;

pub use email::validate_email;
