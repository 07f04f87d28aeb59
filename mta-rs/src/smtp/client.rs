//! SMTP client for relaying queued mail to remote exchangers
//!
//! One [`SmtpClient`] carries one transaction for the recipients of a
//! single domain: greeting, HELO, MAIL FROM, one RCPT TO per recipient,
//! DATA, the dot-stuffed body, QUIT. Every step must be answered with a
//! 2xx or 3xx reply.

use crate::error::{MailError, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

/// A parsed (possibly multi-line) server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    pub fn is_positive(&self) -> bool {
        (200..400).contains(&self.code)
    }
}

pub struct SmtpClient<S> {
    stream: BufReader<S>,
    command_timeout: Duration,
}

impl SmtpClient<TcpStream> {
    /// Connect to `host:port` within `connect_timeout`.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self> {
        debug!("Connecting to {}:{}", host, port);
        let stream = timeout(connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| MailError::Timeout(format!("connect to {}:{}", host, port)))??;
        Ok(Self::new(stream, command_timeout))
    }
}

impl<S> SmtpClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, command_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            command_timeout,
        }
    }

    /// Run a complete transaction. The connection is left open; call
    /// [`SmtpClient::quit`] afterwards.
    pub async fn send_mail(
        &mut self,
        helo_domain: &str,
        from: &str,
        recipients: &[String],
        data: &[u8],
    ) -> Result<()> {
        let greeting = self.read_reply().await?;
        if !(200..300).contains(&greeting.code) {
            return Err(MailError::Rejected {
                code: greeting.code,
                reply: greeting.text,
            });
        }

        self.command(&format!("HELO {}", helo_domain)).await?;
        self.command(&format!("MAIL FROM:<{}>", from)).await?;
        for rcpt in recipients {
            self.command(&format!("RCPT TO:<{}>", rcpt)).await?;
        }
        self.command("DATA").await?;

        self.write_raw(&dot_stuff(data)).await?;
        self.expect_positive().await?;

        info!("Relayed message from {} to {} recipient(s)", from, recipients.len());
        Ok(())
    }

    /// Say goodbye; the reply is not checked.
    pub async fn quit(&mut self) {
        if self.write_line("QUIT").await.is_ok() {
            let _ = self.read_reply().await;
        }
        let _ = self.stream.get_mut().shutdown().await;
    }

    async fn command(&mut self, line: &str) -> Result<Reply> {
        self.write_line(line).await?;
        self.expect_positive().await
    }

    async fn expect_positive(&mut self) -> Result<Reply> {
        let reply = self.read_reply().await?;
        if reply.is_positive() {
            Ok(reply)
        } else {
            Err(MailError::Rejected {
                code: reply.code,
                reply: reply.text,
            })
        }
    }

    /// Read a reply up to its final line (`NNN text`, not `NNN-text`).
    async fn read_reply(&mut self) -> Result<Reply> {
        let mut text = String::new();

        loop {
            let mut line = String::new();
            let n = timeout(self.command_timeout, self.stream.read_line(&mut line))
                .await
                .map_err(|_| MailError::Timeout("waiting for reply".to_string()))??;
            if n == 0 {
                return Err(MailError::SmtpProtocol(
                    "Connection closed while waiting for reply".to_string(),
                ));
            }
            debug!("< {}", line.trim_end());

            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| MailError::SmtpProtocol(format!("Malformed reply: {}", line.trim_end())))?;

            text.push_str(line.get(4..).unwrap_or("").trim_end());

            // Check if this is the last line (no dash after code)
            if line.as_bytes().get(3) != Some(&b'-') {
                return Ok(Reply { code, text });
            }
            text.push('\n');
        }
    }

    async fn write_line(&mut self, line: &str) -> Result<()> {
        debug!("> {}", line);
        self.write_raw(format!("{}\r\n", line).as_bytes()).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let writer = self.stream.get_mut();
        timeout(self.command_timeout, async {
            writer.write_all(bytes).await?;
            writer.flush().await
        })
        .await
        .map_err(|_| MailError::Timeout("writing to server".to_string()))??;
        Ok(())
    }
}

/// Double leading dots, make sure the data ends with CRLF and append the
/// terminating `.` line.
pub fn dot_stuff(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 8);
    let mut at_line_start = true;
    for &b in data {
        if at_line_start && b == b'.' {
            out.push(b'.');
        }
        out.push(b);
        at_line_start = b == b'\n';
    }
    if !out.is_empty() && !out.ends_with(b"\r\n") {
        if out.ends_with(b"\n") {
            out.pop();
        }
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}
