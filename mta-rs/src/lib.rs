//! mta-rs: SMTP/ESMTP/LMTP mail transfer agent
//!
//! Accepts mail over SMTP, ESMTP and LMTP, delivers local recipients to
//! spool files and relays everything else to the recipient domains' mail
//! exchangers with queuing and retry.
//!
//! # Example
//!
//! ```no_run
//! use mta_rs::config::Config;
//! use mta_rs::context::AppContext;
//! use mta_rs::queue::{Deliverer, QueueRunner};
//! use mta_rs::smtp::SmtpServer;
//! use mta_rs::utils::dns::DnsMxResolver;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let resolver = Arc::new(DnsMxResolver::new(config.delivery.routes.clone()));
//!     let deliverer = Deliverer::new(&config, resolver);
//!     let ctx = Arc::new(AppContext::initialize(config)?);
//!
//!     tokio::spawn(QueueRunner::new(Arc::clone(&ctx), deliverer).run());
//!     SmtpServer::bind(ctx).await?.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration management
//! - [`context`]: Shared application state
//! - [`smtp`]: Server session, acceptor and outbound client
//! - [`queue`]: Durable queue and remote delivery
//! - [`header`]: Message header parsing and trace headers
//! - [`directory`]: Local users
//! - [`antispam`]: Connection admission lists
//! - [`storage`]: Local spool files

pub mod antispam;
pub mod buffer;
pub mod config;
pub mod context;
pub mod directory;
pub mod error;
pub mod header;
pub mod queue;
pub mod security;
pub mod smtp;
pub mod storage;
pub mod utils;

pub use config::Config;
pub use error::{MailError, Result};
