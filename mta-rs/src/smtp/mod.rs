//! SMTP server and client implementation (RFC 5321, RFC 2033)
//!
//! - [`server`]: acceptor and per-connection driver
//! - [`session`]: sans-IO server session state machine
//! - [`commands`]: fixed-width command parsing
//! - [`reply`]: reply texts
//! - [`protocol`]: SMTP/ESMTP/LMTP capability set
//! - [`client`]: outbound client used by queue delivery

pub mod client;
pub mod commands;
pub mod protocol;
pub mod reply;
pub mod server;
pub mod session;

pub use client::SmtpClient;
pub use commands::SmtpCommand;
pub use protocol::Protocols;
pub use server::SmtpServer;
pub use session::{SessionState, SmtpSession};
