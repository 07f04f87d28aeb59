//! Connection admission
//!
//! Greylisting of peer IP addresses with persistent white/gray/black lists

pub mod address_list;
pub mod filter;

pub use address_list::{AddressList, ListEntry};
pub use filter::{Admission, ConnectionFilter};
