#![allow(dead_code)]

use async_trait::async_trait;
use mta_rs::config::Config;
use mta_rs::context::AppContext;
use mta_rs::directory::{UserDirectory, UserRecord};
use mta_rs::utils::dns::MxResolver;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

pub const DOMAIN: &str = "local.test";

pub fn test_config(tmp: &TempDir) -> Config {
    let mut config = Config::default();
    config.server.domain = DOMAIN.to_string();
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.smtp.mail_dir = format!("{}/", tmp.path().join("mail").display());
    config.queue.queue_dir = tmp.path().join("queue").display().to_string();
    config.queue.queue_file = tmp.path().join("queue.idx").display().to_string();
    std::fs::create_dir_all(tmp.path().join("mail")).unwrap();
    config
}

pub fn user(address: &str, password: Option<&str>, redirect: Option<&str>) -> UserRecord {
    UserRecord {
        address: address.to_string(),
        password_hash: password
            .map(|p| mta_rs::security::hash_password(p).unwrap())
            .unwrap_or_default(),
        redirect: redirect.map(str::to_string),
    }
}

pub fn context(config: Config, users: Vec<UserRecord>) -> Arc<AppContext> {
    let directory = UserDirectory::new(users, config.smtp.mail_dir.clone());
    Arc::new(AppContext::new(config, directory).unwrap())
}

pub fn spool_path(tmp: &TempDir, address: &str) -> PathBuf {
    tmp.path().join("mail").join(address)
}

/// Resolver answering from a fixed table, without touching DNS.
pub struct StaticResolver(pub HashMap<String, String>);

impl StaticResolver {
    pub fn new(entries: &[(&str, &str)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(d, h)| (d.to_string(), h.to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl MxResolver for StaticResolver {
    async fn lowest_preference_exchanger(&self, domain: &str) -> Option<String> {
        self.0.get(domain).cloned()
    }
}

/// What a [`FakeExchanger`] received
#[derive(Debug, Default, Clone)]
pub struct Received {
    pub commands: Vec<String>,
    pub bodies: Vec<String>,
}

/// Minimal SMTP peer on 127.0.0.1 recording every command it is sent.
pub struct FakeExchanger {
    pub port: u16,
    pub received: Arc<Mutex<Received>>,
}

impl FakeExchanger {
    /// `rcpt_reply` is sent for every RCPT TO; everything else gets 250.
    pub async fn start(rcpt_reply: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let received = Arc::new(Mutex::new(Received::default()));
        let log = Arc::clone(&received);

        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let (read, mut write) = socket.into_split();
                    let mut lines = BufReader::new(read).lines();
                    write.write_all(b"220 fake.test ESMTP\r\n").await.unwrap();

                    while let Ok(Some(line)) = lines.next_line().await {
                        log.lock().unwrap().commands.push(line.clone());
                        let upper = line.to_ascii_uppercase();
                        let reply: &str = if upper.starts_with("RCPT") {
                            rcpt_reply
                        } else if upper == "DATA" {
                            write.write_all(b"354 go ahead\r\n").await.unwrap();
                            let mut body = String::new();
                            while let Ok(Some(data_line)) = lines.next_line().await {
                                if data_line == "." {
                                    break;
                                }
                                body.push_str(&data_line);
                                body.push('\n');
                            }
                            log.lock().unwrap().bodies.push(body);
                            "250 2.0.0 queued"
                        } else if upper == "QUIT" {
                            let _ = write.write_all(b"221 bye\r\n").await;
                            break;
                        } else {
                            "250 ok"
                        };
                        write
                            .write_all(format!("{}\r\n", reply).as_bytes())
                            .await
                            .unwrap();
                    }
                });
            }
        });

        Self { port, received }
    }

    pub fn received(&self) -> Received {
        self.received.lock().unwrap().clone()
    }
}
