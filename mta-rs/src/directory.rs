//! Local user directory
//!
//! Users are listed in a TOML file:
//!
//! ```toml
//! [[user]]
//! address = "alice@example.org"
//! password_hash = "$argon2id$v=19$..."
//!
//! [[user]]
//! address = "bob@example.org"
//! redirect = "bob@elsewhere.net"
//! ```

use crate::error::{MailError, Result};
use crate::security::auth;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserRecord {
    pub address: String,
    #[serde(default)]
    pub password_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// On-disk layout of the users file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UsersFile {
    #[serde(default, rename = "user")]
    pub users: Vec<UserRecord>,
}

impl UsersFile {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MailError::Config(format!("Failed to read users file {}: {}", path.display(), e))
        })?;

        toml::from_str(&content)
            .map_err(|e| MailError::Config(format!("Failed to parse users file: {}", e)))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MailError::Config(format!("Failed to serialize users: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Address -> password hash / spool / redirect lookup.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: Vec<UserRecord>,
    mail_dir: String,
}

impl UserDirectory {
    pub fn new(users: Vec<UserRecord>, mail_dir: impl Into<String>) -> Self {
        Self {
            users,
            mail_dir: mail_dir.into(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P, mail_dir: impl Into<String>) -> Result<Self> {
        let file = UsersFile::from_file(path)?;
        info!("Loaded {} local user(s)", file.users.len());
        Ok(Self::new(file.users, mail_dir))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn lookup(&self, address: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|u| u.address.eq_ignore_ascii_case(address))
    }

    /// Spool file of a local user: the mail directory prefix followed by
    /// the address as stored in the directory.
    pub fn spool_path(&self, address: &str) -> Option<PathBuf> {
        self.lookup(address)
            .map(|u| PathBuf::from(format!("{}{}", self.mail_dir, u.address)))
    }

    pub fn redirect(&self, address: &str) -> Option<&str> {
        self.lookup(address).and_then(|u| u.redirect.as_deref())
    }

    pub fn verify_password(&self, address: &str, password: &str) -> bool {
        match self.lookup(address) {
            Some(user) if !user.password_hash.is_empty() => {
                auth::verify_password(password, &user.password_hash)
            }
            Some(_) => {
                debug!("User {} has no password set", address);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(address: &str, password: Option<&str>, redirect: Option<&str>) -> UserRecord {
        UserRecord {
            address: address.to_string(),
            password_hash: password
                .map(|p| auth::hash_password(p).unwrap())
                .unwrap_or_default(),
            redirect: redirect.map(str::to_string),
        }
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let dir = UserDirectory::new(vec![record("Alice@example.org", None, None)], "/mail/");
        assert!(dir.lookup("alice@EXAMPLE.org").is_some());
        assert!(dir.lookup("bob@example.org").is_none());
        assert_eq!(
            dir.spool_path("alice@example.org").unwrap(),
            PathBuf::from("/mail/Alice@example.org")
        );
    }

    #[test]
    fn test_verify_password() {
        let dir = UserDirectory::new(
            vec![
                record("a@example.org", Some("pw"), None),
                record("fwd@example.org", None, Some("x@remote.net")),
            ],
            "",
        );
        assert!(dir.verify_password("a@example.org", "pw"));
        assert!(!dir.verify_password("a@example.org", "nope"));
        assert!(!dir.verify_password("fwd@example.org", ""));
        assert!(!dir.verify_password("ghost@example.org", "pw"));
        assert_eq!(dir.redirect("fwd@example.org"), Some("x@remote.net"));
    }

    #[test]
    fn test_users_file_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("users.toml");
        let file = UsersFile {
            users: vec![record("a@example.org", None, Some("b@remote.net"))],
        };
        file.save(&path).unwrap();

        let dir = UserDirectory::load(&path, "spool/").unwrap();
        assert_eq!(dir.len(), 1);
        assert_eq!(dir.redirect("a@example.org"), Some("b@remote.net"));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = UserDirectory::load("/nonexistent/users.toml", "");
        assert!(matches!(result, Err(MailError::Config(_))));
    }
}
