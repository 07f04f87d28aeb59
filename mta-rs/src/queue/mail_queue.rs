//! Bounded queue of messages awaiting remote delivery
//!
//! # Architecture
//! ```text
//! session ──add_message──► local recipients ──► spool / redirect
//!                       └► remote recipients ──► [slot] ──handle_queue──► DeliveryJob
//!                                                  ▲                          │
//!                                                  └──── apply_report ◄── worker
//! ```
//!
//! Only the index (id, info path, data path, creation time) is persisted
//! here; every message keeps its own files.

use crate::config::Config;
use crate::directory::UserDirectory;
use crate::error::{MailError, Result};
use crate::storage::SpoolStorage;
use crate::utils::email::is_local;
use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::delivery::{DeliveryJob, DeliveryReport, Deliverer};
use super::message::{generate_id, Message};

/// Redirect chains longer than this are dropped
const MAX_REDIRECT_DEPTH: usize = 8;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub domain: String,
    pub queue_dir: PathBuf,
    pub queue_file: PathBuf,
    pub capacity: usize,
    pub lifetime_secs: i64,
    pub sending_delay_secs: i64,
}

impl QueueSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            domain: config.server.domain.clone(),
            queue_dir: PathBuf::from(&config.queue.queue_dir),
            queue_file: PathBuf::from(&config.queue.queue_file),
            capacity: config.queue.max_messages,
            lifetime_secs: config.queue.lifetime_secs as i64,
            sending_delay_secs: config.queue.sending_delay_secs as i64,
        }
    }
}

/// What happened to one recipient of a submitted message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientStatus {
    /// Appended to a local spool
    Delivered,
    /// Re-submitted to the user's redirect address
    Forwarded,
    /// Waiting in the queue for remote delivery
    Queued,
    Failed,
}

impl RecipientStatus {
    pub fn is_accepted(self) -> bool {
        self != RecipientStatus::Failed
    }
}

/// Per-recipient result of [`MailQueue::add_message`], in recipient order.
#[derive(Debug, Clone, Default)]
pub struct Submission {
    pub statuses: Vec<(String, RecipientStatus)>,
}

impl Submission {
    pub fn any_accepted(&self) -> bool {
        self.statuses.iter().any(|(_, s)| s.is_accepted())
    }
}

#[derive(Debug)]
struct QueueSlot {
    message: Message,
    last_attempt: Option<i64>,
    in_flight: bool,
}

pub struct MailQueue {
    settings: QueueSettings,
    users: Arc<UserDirectory>,
    slots: Vec<Option<QueueSlot>>,
}

impl MailQueue {
    pub fn new(settings: QueueSettings, users: Arc<UserDirectory>) -> Self {
        let slots = std::iter::repeat_with(|| None).take(settings.capacity).collect();
        Self {
            settings,
            users,
            slots,
        }
    }

    /// Create the queue directory and load the persisted index. A missing
    /// index is an empty queue.
    pub fn open(settings: QueueSettings, users: Arc<UserDirectory>) -> Result<Self> {
        std::fs::create_dir_all(&settings.queue_dir).map_err(|e| {
            MailError::Storage(format!(
                "Failed to create queue directory {:?}: {}",
                settings.queue_dir, e
            ))
        })?;

        let mut queue = Self::new(settings, users);
        queue.load_index()?;
        Ok(queue)
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }

    /// Queued message ids in slot order
    pub fn ids(&self) -> Vec<String> {
        self.slots
            .iter()
            .flatten()
            .map(|s| s.message.id().to_string())
            .collect()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.slots
            .iter()
            .flatten()
            .map(|s| &s.message)
            .find(|m| m.id() == id)
    }

    pub fn slot_of(&self, id: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.message.id() == id))
    }

    /// Accept a freshly stored message.
    ///
    /// Local recipients are delivered right away; the remaining ones are
    /// written back to the message's info file and the message takes a
    /// slot. A message with no remote recipient never occupies a slot and
    /// its files are removed. When the queue is full the message is
    /// rejected and its files stay on disk.
    pub fn add_message(&mut self, message: Message) -> Result<Submission> {
        self.add_message_at_depth(message, 0)
    }

    fn add_message_at_depth(&mut self, mut message: Message, depth: usize) -> Result<Submission> {
        info!("New message {} came into the mail queue", message.id());

        if self.is_full() {
            warn!("Message {} rejected: mail queue is full", message.id());
            return Err(MailError::QueueFull(self.capacity()));
        }

        message.ensure_loaded()?;

        let mut submission = Submission::default();
        let mut remote = Vec::new();
        let mut remote_indices = Vec::new();

        for rcpt in message.recipients().to_vec() {
            if is_local(&rcpt, &self.settings.domain) {
                let status = self.deliver_local(&message, &rcpt, depth);
                submission.statuses.push((rcpt, status));
            } else {
                remote_indices.push(submission.statuses.len());
                submission.statuses.push((rcpt.clone(), RecipientStatus::Queued));
                remote.push(rcpt);
            }
        }

        if remote.is_empty() {
            if let Err(e) = message.delete_files() {
                warn!("Failed to remove files of message {}: {}", message.id(), e);
            }
            return Ok(submission);
        }

        if let Err(e) = message.replace_recipients(remote) {
            error!("Message {} could not be queued: {}", message.id(), e);
            for idx in remote_indices {
                submission.statuses[idx].1 = RecipientStatus::Failed;
            }
            return Ok(submission);
        }

        // a redirect delivered above may have taken the last free slot
        if self.is_full() {
            self.grow();
        }
        let id = message.id().to_string();
        self.insert(message);
        info!("Message {} added to mail queue", id);
        self.persist();

        Ok(submission)
    }

    fn deliver_local(&mut self, message: &Message, rcpt: &str, depth: usize) -> RecipientStatus {
        debug!("Message {} local delivery to {}", message.id(), rcpt);

        let Some(user) = self.users.lookup(rcpt).cloned() else {
            error!("Could not find local recipient {}", rcpt);
            return RecipientStatus::Failed;
        };

        let data = message.data().unwrap_or_default();

        if let Some(target) = user.redirect {
            return self.forward(message, rcpt, &target, depth);
        }

        let Some(spool) = self.users.spool_path(rcpt) else {
            return RecipientStatus::Failed;
        };

        match SpoolStorage::append(&spool, message.sender(), rcpt, data) {
            Ok(()) => {
                info!("Message {} delivered locally to {}", message.id(), rcpt);
                RecipientStatus::Delivered
            }
            Err(e) => {
                error!("Message {} local delivery to {} failed: {}", message.id(), rcpt, e);
                RecipientStatus::Failed
            }
        }
    }

    fn forward(&mut self, message: &Message, rcpt: &str, target: &str, depth: usize) -> RecipientStatus {
        if depth >= MAX_REDIRECT_DEPTH {
            error!(
                "Message {} dropped for {}: redirect chain is longer than {}",
                message.id(),
                rcpt,
                MAX_REDIRECT_DEPTH
            );
            return RecipientStatus::Failed;
        }

        if self.is_full() {
            self.grow();
        }

        let copy = Message::create(
            generate_id(&self.settings.domain, Local::now()),
            message.sender().to_string(),
            vec![target.to_string()],
            message.data().unwrap_or_default().to_vec(),
            &self.settings.queue_dir,
            chrono::Utc::now().timestamp(),
        );

        let copy = match copy {
            Ok(copy) => copy,
            Err(e) => {
                error!("Message {} could not be redirected to {}: {}", message.id(), target, e);
                return RecipientStatus::Failed;
            }
        };

        info!(
            "Message {} for {} redirected to {} as {}",
            message.id(),
            rcpt,
            target,
            copy.id()
        );

        match self.add_message_at_depth(copy, depth + 1) {
            Ok(sub) if sub.any_accepted() => RecipientStatus::Forwarded,
            Ok(_) => RecipientStatus::Failed,
            Err(e) => {
                error!("Redirected copy of {} was not accepted: {}", message.id(), e);
                RecipientStatus::Failed
            }
        }
    }

    /// Change the number of slots. Occupied slots are compacted to the
    /// front; shrinking below the number of queued messages fails.
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        let occupied = self.len();
        if capacity < occupied {
            return Err(MailError::Storage(format!(
                "Cannot shrink queue to {} slots, {} messages queued",
                capacity, occupied
            )));
        }

        let mut slots: Vec<Option<QueueSlot>> = self.slots.drain(..).flatten().map(Some).collect();
        slots.resize_with(capacity, || None);
        self.slots = slots;
        Ok(())
    }

    fn grow(&mut self) {
        let capacity = (self.capacity() * 2).max(1);
        warn!("Mail queue is full, growing it to {} slots", capacity);
        // cannot fail: the new capacity is larger than the current one
        let _ = self.resize(capacity);
    }

    fn insert(&mut self, message: Message) {
        let slot = QueueSlot {
            message,
            last_attempt: None,
            in_flight: false,
        };
        match self.slots.iter_mut().find(|s| s.is_none()) {
            Some(free) => *free = Some(slot),
            None => self.slots.push(Some(slot)),
        }
    }

    fn remove_slot(&mut self, idx: usize) {
        if let Some(slot) = self.slots.get_mut(idx).and_then(Option::take) {
            if let Err(e) = slot.message.delete_files() {
                warn!("Failed to remove files of message {}: {}", slot.message.id(), e);
            }
        }
    }

    /// One sweep of the queue at time `now`.
    ///
    /// Messages older than the lifetime are dropped, in flight or not; a
    /// late report for a dropped message is ignored. Every other message
    /// whose last attempt is older than the sending delay, or that was
    /// never attempted, is marked in flight and returned as a job. A
    /// message already in flight is skipped.
    pub fn handle_queue(&mut self, now: i64) -> Vec<DeliveryJob> {
        let mut changed = false;
        let mut jobs = Vec::new();

        for idx in 0..self.slots.len() {
            let Some(slot) = self.slots[idx].as_mut() else {
                continue;
            };

            // expiry also covers a slot whose worker never reported back
            if now - slot.message.create_time() > self.settings.lifetime_secs {
                warn!(
                    "Message {} exceeded its lifetime, dropping it",
                    slot.message.id()
                );
                self.remove_slot(idx);
                changed = true;
                continue;
            }
            if slot.in_flight {
                continue;
            }

            let due = match slot.last_attempt {
                None => true,
                Some(last) => now - last > self.settings.sending_delay_secs,
            };
            if !due {
                continue;
            }

            slot.last_attempt = Some(now);
            if let Err(e) = slot.message.ensure_loaded() {
                error!("Message {} cannot be read: {}", slot.message.id(), e);
                continue;
            }

            slot.in_flight = true;
            jobs.push(DeliveryJob {
                slot: idx,
                id: slot.message.id().to_string(),
                sender: slot.message.sender().to_string(),
                recipients: slot.message.recipients().to_vec(),
                data: slot.message.data().unwrap_or_default().to_vec(),
            });
        }

        if changed {
            self.persist();
        }
        jobs
    }

    /// Fold a finished delivery attempt back into its slot. Returns `true`
    /// when the message was fully delivered and removed.
    pub fn apply_report(&mut self, report: DeliveryReport) -> bool {
        let matches = matches!(
            self.slots.get(report.slot),
            Some(Some(slot)) if slot.message.id() == report.id
        );
        if !matches {
            debug!("Report for {} no longer matches a queued message", report.id);
            return false;
        }

        if report.remaining.is_empty() {
            info!("Message {} completely sent, removed from queue", report.id);
            self.remove_slot(report.slot);
            self.persist();
            return true;
        }

        if let Some(slot) = self.slots[report.slot].as_mut() {
            slot.in_flight = false;
            if slot.message.recipients() != report.remaining.as_slice() {
                info!(
                    "Message {} partially sent, {} recipient(s) left",
                    report.id,
                    report.remaining.len()
                );
                if let Err(e) = slot.message.replace_recipients(report.remaining) {
                    error!("Failed to rewrite info of message {}: {}", report.id, e);
                }
            }
        }
        false
    }

    /// Attempt delivery of one slot right away and fold the result back.
    /// Returns `true` when the message was fully delivered.
    pub async fn send_message(&mut self, slot: usize, deliverer: &Deliverer, now: i64) -> Result<bool> {
        let job = {
            let entry = self
                .slots
                .get_mut(slot)
                .and_then(Option::as_mut)
                .ok_or_else(|| MailError::Storage(format!("Queue slot {} is empty", slot)))?;
            entry.message.ensure_loaded()?;
            entry.last_attempt = Some(now);
            entry.in_flight = true;
            DeliveryJob {
                slot,
                id: entry.message.id().to_string(),
                sender: entry.message.sender().to_string(),
                recipients: entry.message.recipients().to_vec(),
                data: entry.message.data().unwrap_or_default().to_vec(),
            }
        };

        let report = deliverer.deliver(job).await;
        Ok(self.apply_report(report))
    }

    fn persist(&self) {
        if let Err(e) = self.save_index() {
            error!("Failed to save queue index {:?}: {}", self.settings.queue_file, e);
        }
    }

    /// Write `<count>` then `<id>\n<info path>\n<data path>\n<create time>\n`
    /// per queued message.
    pub fn save_index(&self) -> Result<()> {
        let mut out = format!("{}\n", self.len());
        for slot in self.slots.iter().flatten() {
            let m = &slot.message;
            out.push_str(&format!(
                "{}\n{}\n{}\n{}\n",
                m.id(),
                m.info_path().display(),
                m.data_path().display(),
                m.create_time()
            ));
        }

        let tmp = self.settings.queue_file.with_extension("tmp");
        std::fs::write(&tmp, out)?;
        std::fs::rename(&tmp, &self.settings.queue_file)?;
        Ok(())
    }

    fn load_index(&mut self) -> Result<()> {
        let content = match std::fs::read_to_string(&self.settings.queue_file) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No queue index at {:?}, starting empty", self.settings.queue_file);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let messages = parse_index(&content)?;
        if messages.len() > self.capacity() {
            warn!(
                "Queue index lists {} messages, growing queue from {} slots",
                messages.len(),
                self.capacity()
            );
            self.resize(messages.len())?;
        }

        let count = messages.len();
        for message in messages {
            self.insert(message);
        }
        info!("Loaded {} queued message(s)", count);
        Ok(())
    }
}

fn parse_index(content: &str) -> Result<Vec<Message>> {
    let mut lines = content.lines();
    let count: usize = match lines.next() {
        Some(line) if !line.trim().is_empty() => line
            .trim()
            .parse()
            .map_err(|_| MailError::Parse(format!("Invalid queue index count: {}", line)))?,
        _ => return Ok(Vec::new()),
    };

    let mut messages = Vec::with_capacity(count);
    for _ in 0..count {
        let mut field = || {
            lines
                .next()
                .map(str::to_string)
                .ok_or_else(|| MailError::Parse("Queue index is truncated".to_string()))
        };
        let id = field()?;
        let info_path = field()?;
        let data_path = field()?;
        let create_time = field()?
            .trim()
            .parse()
            .map_err(|_| MailError::Parse(format!("Invalid creation time for {}", id)))?;
        messages.push(Message::from_index(
            id,
            Path::new(&info_path).to_path_buf(),
            Path::new(&data_path).to_path_buf(),
            create_time,
        ));
    }
    Ok(messages)
}
