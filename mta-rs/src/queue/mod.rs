//! Durable message queue and remote delivery
//!
//! - [`message`]: one message's info/data files and id generation
//! - [`mail_queue`]: bounded slot table, local dispatch, retry sweep
//! - [`delivery`]: per-domain SMTP relay of one queued message
//! - [`runner`]: sweep ticker and delivery worker pool

pub mod delivery;
pub mod mail_queue;
pub mod message;
pub mod runner;

pub use delivery::{Deliverer, DeliveryJob, DeliveryReport};
pub use mail_queue::{MailQueue, QueueSettings, RecipientStatus, Submission};
pub use message::Message;
pub use runner::QueueRunner;
