use crate::error::{MailError, Result};
use crate::smtp::protocol::Protocols;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Static configuration record, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub smtp: SmtpConfig,
    pub queue: QueueConfig,
    pub delivery: DeliveryConfig,
    pub admission: AdmissionConfig,
    pub users: UsersConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Mail domain served locally. A leading `www.` is dropped on load.
    pub domain: String,
    pub listen_addr: String,
    /// Idle read timeout for a session, in seconds
    pub timeout_secs: u64,
    pub max_connections: usize,
    /// Any of `smtp`, `esmtp`, `lmtp`
    pub protocols: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SmtpConfig {
    pub max_recipients: usize,
    pub max_message_size: usize,
    pub max_headers: usize,
    /// Longest command or data line accepted, terminator excluded
    pub max_line_length: usize,
    /// Prefix of local spool files; the spool of a user is `mail_dir` + address
    pub mail_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub queue_dir: String,
    pub queue_file: String,
    pub max_messages: usize,
    pub lifetime_secs: u64,
    pub sending_delay_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub remote_port: u16,
    pub max_workers: usize,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// Drop recipients of a domain whose exchanger answered with a 5xx code
    /// instead of retrying them until the message lifetime runs out
    pub drop_on_permanent_failure: bool,
    /// Domain -> host overrides consulted before DNS
    pub routes: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub enabled: bool,
    pub init_whitelist_file: String,
    pub whitelist_file: String,
    pub graylist_file: String,
    pub blacklist_file: String,
    pub min_time_to_pass: u64,
    pub max_time_to_pass: u64,
    pub max_time_to_store: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UsersConfig {
    pub users_file: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            domain: "localhost".to_string(),
            listen_addr: "0.0.0.0:25".to_string(),
            timeout_secs: 600,
            max_connections: 20,
            protocols: vec!["smtp".to_string(), "esmtp".to_string(), "lmtp".to_string()],
        }
    }
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            max_recipients: 20,
            max_message_size: 30000,
            max_headers: 64,
            max_line_length: 4096,
            mail_dir: "/var/spool/mta-rs/mail/".to_string(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_dir: "/var/spool/mta-rs/queue/".to_string(),
            queue_file: "/var/spool/mta-rs/queue.idx".to_string(),
            max_messages: 15,
            lifetime_secs: 4 * 24 * 3600,
            sending_delay_secs: 30 * 60,
            sweep_interval_secs: 10,
        }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            remote_port: 25,
            max_workers: 4,
            connect_timeout_secs: 30,
            command_timeout_secs: 300,
            drop_on_permanent_failure: false,
            routes: HashMap::new(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            init_whitelist_file: String::new(),
            whitelist_file: String::new(),
            graylist_file: String::new(),
            blacklist_file: String::new(),
            min_time_to_pass: 120,
            max_time_to_pass: 18000,
            max_time_to_store: 1_209_600,
        }
    }
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            users_file: "users.toml".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MailError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(content)
            .map_err(|e| MailError::Config(format!("Failed to parse config: {}", e)))?;
        config.normalize();
        config.protocols()?;
        Ok(config)
    }

    fn normalize(&mut self) {
        let domain = &self.server.domain;
        if domain
            .get(..4)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case("www."))
        {
            self.server.domain = domain[4..].to_string();
        }
    }

    /// Protocol set the server offers in its greeting.
    pub fn protocols(&self) -> Result<Protocols> {
        Protocols::from_names(&self.server.protocols)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.server.max_connections, 20);
        assert_eq!(config.smtp.max_recipients, 20);
        assert_eq!(config.smtp.max_message_size, 30000);
        assert_eq!(config.smtp.max_line_length, 4096);
        assert_eq!(config.queue.max_messages, 15);
        assert_eq!(config.queue.lifetime_secs, 345_600);
        assert_eq!(config.delivery.remote_port, 25);
        assert!(!config.admission.enabled);
    }

    #[test]
    fn test_www_prefix_stripped() {
        let config = Config::from_toml("[server]\ndomain = \"WWW.example.org\"\n").unwrap();
        assert_eq!(config.server.domain, "example.org");
    }

    #[test]
    fn test_non_ascii_domain_kept() {
        let config = Config::from_toml("[server]\ndomain = \"ab€x.org\"\n").unwrap();
        assert_eq!(config.server.domain, "ab€x.org");

        let config = Config::from_toml("[server]\ndomain = \"www.€x.org\"\n").unwrap();
        assert_eq!(config.server.domain, "€x.org");
    }

    #[test]
    fn test_unknown_protocol_rejected() {
        let result = Config::from_toml("[server]\nprotocols = [\"smtp\", \"x400\"]\n");
        assert!(matches!(result, Err(MailError::Config(_))));
    }

    #[test]
    fn test_routes_table() {
        let config = Config::from_toml(
            "[delivery]\nremote_port = 2526\n[delivery.routes]\n\"example.net\" = \"127.0.0.1\"\n",
        )
        .unwrap();
        assert_eq!(config.delivery.remote_port, 2526);
        assert_eq!(
            config.delivery.routes.get("example.net").map(String::as_str),
            Some("127.0.0.1")
        );
    }
}
