//! Local mailbox storage
//!
//! - [`spool`]: append-only spool files, one per local user

pub mod spool;

pub use spool::SpoolStorage;
