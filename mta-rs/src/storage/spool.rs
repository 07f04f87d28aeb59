use crate::error::{MailError, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Appends delivered messages to a user's spool file.
///
/// Each record is the envelope followed by the message with CRs removed:
///
/// ```text
/// MAIL FROM: <sender>
/// RCPT TO: <recipient>
/// DATA
/// <message lines>
/// .
///
/// ```
pub struct SpoolStorage;

impl SpoolStorage {
    pub fn append(spool_path: &Path, sender: &str, recipient: &str, data: &[u8]) -> Result<()> {
        let record = Self::format_record(sender, recipient, data);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(spool_path)
            .map_err(|e| {
                MailError::Storage(format!("Failed to open spool {:?}: {}", spool_path, e))
            })?;

        file.write_all(&record).map_err(|e| {
            MailError::Storage(format!("Failed to write spool {:?}: {}", spool_path, e))
        })?;

        info!("Appended message for {} to {}", recipient, spool_path.display());
        Ok(())
    }

    pub fn format_record(sender: &str, recipient: &str, data: &[u8]) -> Vec<u8> {
        let mut record = format!("MAIL FROM: {}\nRCPT TO: {}\nDATA\n", sender, recipient).into_bytes();

        for line in data.split_inclusive(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\n").unwrap_or(line);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            record.extend_from_slice(line);
            record.push(b'\n');
        }

        record.extend_from_slice(b".\n\n");
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_record_layout() {
        let record = SpoolStorage::format_record("a@local", "b@local", b"Subject: x\r\n\r\nHi\r\n");
        assert_eq!(
            String::from_utf8(record).unwrap(),
            "MAIL FROM: a@local\nRCPT TO: b@local\nDATA\nSubject: x\n\nHi\n.\n\n"
        );
    }

    #[test]
    fn test_append_accumulates() {
        let tmp = TempDir::new().unwrap();
        let spool = tmp.path().join("b@local");

        SpoolStorage::append(&spool, "a@local", "b@local", b"one\r\n").unwrap();
        SpoolStorage::append(&spool, "c@remote", "b@local", b"two\r\n").unwrap();

        let content = std::fs::read_to_string(&spool).unwrap();
        assert_eq!(content.matches("RCPT TO: b@local\n").count(), 2);
        assert!(content.contains("DATA\none\n.\n\n"));
        assert!(content.ends_with("DATA\ntwo\n.\n\n"));
    }

    #[test]
    fn test_append_to_missing_directory_fails() {
        let result = SpoolStorage::append(Path::new("/nonexistent/dir/u"), "a@x", "u@x", b"x\r\n");
        assert!(matches!(result, Err(MailError::Storage(_))));
    }
}
