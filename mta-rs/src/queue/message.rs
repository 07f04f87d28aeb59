//! Durable message record
//!
//! A message lives in its own directory under the queue directory with
//! two files: `info.txt` (sender, recipient count, one recipient per line)
//! and `data.txt` (the raw message). The queue index only references
//! these paths, so a message loaded from the index starts unloaded and
//! reads its files on first use.

use crate::error::{MailError, Result};
use chrono::{DateTime, Datelike, Local, Timelike};
use rand::Rng;
use std::fs;
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "info.txt";
const DATA_FILE: &str = "data.txt";

#[derive(Debug, Clone)]
pub struct Message {
    id: String,
    sender: String,
    recipients: Vec<String>,
    data: Option<Vec<u8>>,
    info_loaded: bool,
    create_time: i64,
    info_path: PathBuf,
    data_path: PathBuf,
}

impl Message {
    /// Create a message and write both of its files under `queue_dir`.
    pub fn create(
        id: String,
        sender: String,
        recipients: Vec<String>,
        data: Vec<u8>,
        queue_dir: &Path,
        create_time: i64,
    ) -> Result<Self> {
        let dir = queue_dir.join(storage_dir_name(&id));
        fs::create_dir_all(&dir).map_err(|e| {
            MailError::Storage(format!("Failed to create directory {:?}: {}", dir, e))
        })?;

        let message = Self {
            id,
            sender,
            recipients,
            data: Some(data),
            info_loaded: true,
            create_time,
            info_path: dir.join(INFO_FILE),
            data_path: dir.join(DATA_FILE),
        };
        message.write_data()?;
        message.write_info()?;
        Ok(message)
    }

    /// Reference a message from the persisted index without reading it.
    pub fn from_index(id: String, info_path: PathBuf, data_path: PathBuf, create_time: i64) -> Self {
        Self {
            id,
            sender: String::new(),
            recipients: Vec::new(),
            data: None,
            info_loaded: false,
            create_time,
            info_path,
            data_path,
        }
    }

    /// Rebuild a message entirely from its files.
    pub fn open(id: String, info_path: PathBuf, data_path: PathBuf, create_time: i64) -> Result<Self> {
        let mut message = Self::from_index(id, info_path, data_path, create_time);
        message.ensure_loaded()?;
        Ok(message)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    pub fn create_time(&self) -> i64 {
        self.create_time
    }

    pub fn info_path(&self) -> &Path {
        &self.info_path
    }

    pub fn data_path(&self) -> &Path {
        &self.data_path
    }

    pub fn is_loaded(&self) -> bool {
        self.info_loaded && self.data.is_some()
    }

    /// Raw message bytes. Only available once loaded.
    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    pub fn ensure_loaded(&mut self) -> Result<()> {
        if !self.info_loaded {
            self.read_info()?;
        }
        if self.data.is_none() {
            let data = fs::read(&self.data_path).map_err(|e| {
                MailError::Storage(format!("Failed to read {:?}: {}", self.data_path, e))
            })?;
            self.data = Some(data);
        }
        Ok(())
    }

    /// Narrow the recipient list and rewrite the info file in place.
    pub fn replace_recipients(&mut self, recipients: Vec<String>) -> Result<()> {
        self.recipients = recipients;
        self.info_loaded = true;
        self.write_info()
    }

    /// Remove both files and the message directory when it is empty.
    pub fn delete_files(&self) -> Result<()> {
        let mut first_error = None;
        for path in [&self.data_path, &self.info_path] {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound && first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        if let Some(dir) = self.info_path.parent() {
            let _ = fs::remove_dir(dir);
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn read_info(&mut self) -> Result<()> {
        let content = fs::read_to_string(&self.info_path).map_err(|e| {
            MailError::Storage(format!("Failed to read {:?}: {}", self.info_path, e))
        })?;
        let (sender, recipients) = parse_info(&content)?;
        self.sender = sender;
        self.recipients = recipients;
        self.info_loaded = true;
        Ok(())
    }

    fn write_info(&self) -> Result<()> {
        fs::write(&self.info_path, format_info(&self.sender, &self.recipients)).map_err(|e| {
            MailError::Storage(format!("Failed to write {:?}: {}", self.info_path, e))
        })
    }

    fn write_data(&self) -> Result<()> {
        let data = self.data.as_deref().unwrap_or_default();
        fs::write(&self.data_path, data).map_err(|e| {
            MailError::Storage(format!("Failed to write {:?}: {}", self.data_path, e))
        })
    }
}

pub fn format_info(sender: &str, recipients: &[String]) -> String {
    let mut out = format!("{}\n{}\n", sender, recipients.len());
    for rcpt in recipients {
        out.push_str(rcpt);
        out.push('\n');
    }
    out
}

pub fn parse_info(content: &str) -> Result<(String, Vec<String>)> {
    let mut lines = content.lines();
    let sender = lines
        .next()
        .ok_or_else(|| MailError::Parse("info file is empty".to_string()))?
        .to_string();
    let count: usize = lines
        .next()
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| MailError::Parse("info file has no recipient count".to_string()))?;

    let recipients: Vec<String> = lines.take(count).map(str::to_string).collect();
    if recipients.len() != count {
        return Err(MailError::Parse(format!(
            "info file lists {} of {} recipients",
            recipients.len(),
            count
        )));
    }
    Ok((sender, recipients))
}

/// `<base36(packed local time)>.<base36(16 random digits)>@<domain>`
pub fn generate_id(domain: &str, now: DateTime<Local>) -> String {
    let mut rng = rand::thread_rng();
    let random: u64 = (0..16).fold(0u64, |acc, _| acc * 10 + rng.gen_range(0..10u64));
    format!("{}.{}@{}", base36(packed_time(now)), base36(random), domain)
}

/// `sec + min*100 + hour*1e4 + mday*1e6 + mon0*1e8 + year*1e10`
pub fn packed_time(now: DateTime<Local>) -> u64 {
    u64::from(now.second())
        + u64::from(now.minute()) * 100
        + u64::from(now.hour()) * 10_000
        + u64::from(now.day()) * 1_000_000
        + u64::from(now.month0()) * 100_000_000
        + (now.year().max(0) as u64) * 10_000_000_000
}

pub fn base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
    if value == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while value > 0 {
        out.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Directory name derived from the id: its alphanumerics before the `@`.
fn storage_dir_name(id: &str) -> String {
    id.split('@')
        .next()
        .unwrap_or(id)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}
