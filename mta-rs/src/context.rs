//! Process-wide state shared by sessions and the queue runner

use crate::antispam::{Admission, ConnectionFilter};
use crate::config::Config;
use crate::directory::UserDirectory;
use crate::error::{MailError, Result};
use crate::queue::{MailQueue, QueueSettings};
use crate::smtp::protocol::Protocols;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info};

pub struct AppContext {
    config: Config,
    protocols: Protocols,
    users: Arc<UserDirectory>,
    queue: Mutex<MailQueue>,
    admission: Mutex<ConnectionFilter>,
}

impl AppContext {
    /// Load the user directory, admission lists and queue index named by
    /// `config`. Any failure here aborts startup.
    pub fn initialize(config: Config) -> Result<Self> {
        let users = UserDirectory::load(&config.users.users_file, config.smtp.mail_dir.clone())?;
        let admission = ConnectionFilter::load(&config.admission)?;
        Self::with_parts(config, users, admission)
    }

    /// Context with an explicit user directory; admission follows `config`.
    pub fn new(config: Config, users: UserDirectory) -> Result<Self> {
        let admission = ConnectionFilter::load(&config.admission)?;
        Self::with_parts(config, users, admission)
    }

    fn with_parts(config: Config, users: UserDirectory, admission: ConnectionFilter) -> Result<Self> {
        let protocols = config.protocols()?;
        let users = Arc::new(users);
        let queue = MailQueue::open(QueueSettings::from_config(&config), Arc::clone(&users))?;

        info!(
            "Context ready for {}: {} user(s), {} queued message(s)",
            config.server.domain,
            users.len(),
            queue.len()
        );

        Ok(Self {
            config,
            protocols,
            users,
            queue: Mutex::new(queue),
            admission: Mutex::new(admission),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn domain(&self) -> &str {
        &self.config.server.domain
    }

    pub fn protocols(&self) -> Protocols {
        self.protocols
    }

    pub fn users(&self) -> &UserDirectory {
        &self.users
    }

    pub fn queue(&self) -> Result<MutexGuard<'_, MailQueue>> {
        self.queue
            .lock()
            .map_err(|_| MailError::Storage("Mail queue lock poisoned".to_string()))
    }

    pub fn admit(&self, ip: &str, now: i64) -> Admission {
        match self.admission.lock() {
            Ok(mut filter) => filter.check(ip, now),
            Err(_) => {
                error!("Admission lists lock poisoned, declining {}", ip);
                Admission::Greylisted
            }
        }
    }

    pub fn sweep_admission(&self, now: i64) {
        if let Ok(mut filter) = self.admission.lock() {
            filter.sweep(now);
        }
    }

    /// Persist the queue index; called on shutdown.
    pub fn finalize(&self) -> Result<()> {
        let queue = self.queue()?;
        queue.save_index()?;
        info!("Queue index saved ({} message(s))", queue.len());
        Ok(())
    }
}
