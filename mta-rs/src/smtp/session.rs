//! Server side of one SMTP/ESMTP/LMTP connection
//!
//! The session does no I/O. The connection driver feeds it whatever bytes
//! arrive with [`SmtpSession::eat_received_data`], writes out
//! [`SmtpSession::data_to_transmit`] and reports back how much went out
//! with [`SmtpSession::transmitted`]. Once [`SmtpSession::should_close`]
//! is true every reply has been drained and the socket can be closed.
//!
//! ```text
//! BeforeHello ──HELO/EHLO/LHLO──► BeforeMail ──MAIL──► Recipients ──DATA──► Data
//!                                   ▲   │ AUTH                               │
//!                                   │   ▼                                    │
//!                                   │ WaitingAuthUsername ─► WaitingAuthPassword
//!                                   └──────────────── "." ◄──────────────────┘
//! ```

use crate::buffer::ByteBuffer;
use crate::context::AppContext;
use crate::error::MailError;
use crate::header::HeaderParser;
use crate::queue::message::{generate_id, Message};
use crate::queue::{RecipientStatus, Submission};
use crate::security::auth::{
    decode_login_credential, PASSWORD_CHALLENGE, USERNAME_CHALLENGE,
};
use crate::smtp::commands::SmtpCommand;
use crate::smtp::protocol::Protocols;
use crate::smtp::reply;
use crate::utils::email::{is_local, parse_path};
use chrono::Local;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    BeforeHello,
    BeforeMail,
    Recipients,
    Data,
    WaitingAuthUsername,
    WaitingAuthPassword,
    /// No further input is processed; pending replies are still drained.
    Closed,
}

pub struct SmtpSession {
    ctx: Arc<AppContext>,
    domain: String,
    protocols: Protocols,
    state: SessionState,
    remote_domain: String,
    authenticated: bool,
    username: Option<String>,
    sender: Option<String>,
    recipients: Vec<String>,
    message: ByteBuffer,
    accepting_data: bool,
    max_recipients: usize,
    max_message_size: usize,
    max_headers: usize,
    max_line_length: usize,
    /// Set after an overlong line until its terminator arrives
    discarding_line: bool,
    inbuf: ByteBuffer,
    outbuf: ByteBuffer,
}

impl SmtpSession {
    /// New session with the 220 greeting already queued for output.
    pub fn new(ctx: Arc<AppContext>) -> Self {
        let domain = ctx.domain().to_string();
        let protocols = ctx.protocols();
        let smtp = &ctx.config().smtp;
        let (max_recipients, max_message_size, max_headers, max_line_length) = (
            smtp.max_recipients,
            smtp.max_message_size,
            smtp.max_headers,
            smtp.max_line_length,
        );

        let mut session = Self {
            ctx,
            domain,
            protocols,
            state: SessionState::BeforeHello,
            remote_domain: String::new(),
            authenticated: false,
            username: None,
            sender: None,
            recipients: Vec::new(),
            message: ByteBuffer::new(),
            accepting_data: false,
            max_recipients,
            max_message_size,
            max_headers,
            max_line_length,
            discarding_line: false,
            inbuf: ByteBuffer::new(),
            outbuf: ByteBuffer::new(),
        };
        let greeting = reply::greeting(&session.domain, session.protocols);
        session.reply(&greeting);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn protocols(&self) -> Protocols {
        self.protocols
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn sender(&self) -> Option<&str> {
        self.sender.as_deref()
    }

    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// Append bytes read from the peer and process every complete line.
    /// Input arriving after the session closed is ignored.
    pub fn eat_received_data(&mut self, data: &[u8]) {
        if self.state == SessionState::Closed {
            return;
        }
        self.inbuf.append(data);
        self.handle_new_data();
    }

    pub fn data_to_transmit(&self) -> &[u8] {
        self.outbuf.as_slice()
    }

    pub fn transmitted(&mut self, len: usize) {
        self.outbuf.drop_first(len);
    }

    pub fn should_close(&self) -> bool {
        self.state == SessionState::Closed && self.outbuf.is_empty()
    }

    /// The peer will send nothing more.
    pub fn remote_eot(&mut self) {
        debug!("Peer {} closed its side", self.remote_domain);
        self.close();
    }

    pub fn timed_out(&mut self) {
        warn!("Session with {} timed out", self.remote_domain);
        let line = reply::timeout(&self.domain);
        self.reply(&line);
        self.close();
    }

    fn handle_new_data(&mut self) {
        while let Some(line) = self.inbuf.extract_line() {
            if self.discarding_line {
                // tail of an overlong line
                self.discarding_line = false;
                continue;
            }
            match self.state {
                SessionState::Closed => continue,
                SessionState::WaitingAuthUsername => {
                    self.fetch_username(&String::from_utf8_lossy(&line))
                }
                SessionState::WaitingAuthPassword => {
                    self.fetch_password(&String::from_utf8_lossy(&line))
                }
                SessionState::Data => self.process_data(&line),
                _ => self.process_command(&String::from_utf8_lossy(&line)),
            }
        }

        if self.inbuf.len() > self.max_line_length && self.state != SessionState::Closed {
            self.line_too_long();
        }
    }

    /// The unterminated line in `inbuf` is over the limit. A command line
    /// is dropped up to its terminator; a second overflow of the same line,
    /// or any overflow inside DATA, closes the session.
    fn line_too_long(&mut self) {
        warn!(
            "Line from {} exceeds {} bytes",
            self.remote_domain, self.max_line_length
        );
        self.inbuf.clear();
        self.reply(reply::LINE_TOO_LONG);

        if self.discarding_line || self.state == SessionState::Data {
            self.discard_message();
            self.close();
        } else {
            self.discarding_line = true;
        }
    }

    fn reply(&mut self, line: &str) {
        self.outbuf.append_str(line);
        self.outbuf.append_str("\r\n");
    }

    fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    fn internal_error(&mut self) {
        let line = reply::internal_error(&self.domain);
        self.reply(&line);
        self.close();
    }

    fn process_command(&mut self, line: &str) {
        debug!("Command from {}: {}", self.remote_domain, line);

        let command = match SmtpCommand::parse(line) {
            Ok(command) => command,
            Err(MailError::SmtpProtocol(expected)) => {
                self.reply(&reply::syntax_error(&expected));
                return;
            }
            Err(_) => {
                self.reply(reply::UNRECOGNIZED);
                return;
            }
        };

        match command {
            SmtpCommand::Hello { protocol, domain } => self.process_hello(protocol, domain),
            SmtpCommand::MailFrom(param) => self.process_mail(&param),
            SmtpCommand::RcptTo(param) => self.process_rcpt(&param),
            SmtpCommand::Data => self.process_data_command(),
            SmtpCommand::Rset => {
                self.discard_message();
                if self.state != SessionState::BeforeHello {
                    self.state = SessionState::BeforeMail;
                }
                self.reply(reply::RESET);
            }
            SmtpCommand::Noop => self.reply(reply::NOOP),
            SmtpCommand::Quit => {
                self.reply(reply::GOODBYE);
                self.close();
            }
            SmtpCommand::Auth {
                mechanism,
                initial_response,
            } => self.process_auth(&mechanism, initial_response),
            SmtpCommand::Unimplemented(_) => self.reply(reply::UNIMPLEMENTED),
            SmtpCommand::Unrecognized => self.reply(reply::UNRECOGNIZED),
        }
    }

    fn process_hello(&mut self, protocol: Protocols, domain: String) {
        if !self.protocols.intersects(protocol) {
            let line = reply::wrong_protocol(self.protocols);
            self.reply(&line);
            return;
        }
        if self.state == SessionState::Recipients {
            self.reply(reply::BAD_SEQUENCE);
            return;
        }

        info!("{} from {}", protocol_verb(protocol), domain);
        self.remote_domain = domain;
        let line = reply::hello(&self.domain, protocol);
        self.reply(&line);

        // the first hello fixes LMTP versus SMTP for the whole session
        if self.state == SessionState::BeforeHello {
            self.state = SessionState::BeforeMail;
            self.protocols = if protocol == Protocols::LMTP {
                Protocols::LMTP
            } else {
                self.protocols.without(Protocols::LMTP)
            };
        }
    }

    fn process_mail(&mut self, param: &str) {
        match self.state {
            SessionState::BeforeHello => self.reply(reply::SAY_HELLO),
            SessionState::Recipients => self.reply(reply::DUPLICATE_MAIL),
            SessionState::BeforeMail => {
                let code = self.message_start(param);
                match reply::mail(code) {
                    Some(line) => {
                        self.reply(line);
                        if code == 250 {
                            self.state = SessionState::Recipients;
                        }
                    }
                    None => self.internal_error(),
                }
            }
            _ => self.internal_error(),
        }
    }

    fn message_start(&mut self, param: &str) -> u16 {
        match parse_path(param) {
            Ok(address) => {
                info!("MAIL FROM: {}", address);
                self.sender = Some(address);
                self.recipients.clear();
                250
            }
            Err(e) => {
                warn!("Sender rejected: {}", e);
                553
            }
        }
    }

    fn process_rcpt(&mut self, param: &str) {
        match self.state {
            SessionState::BeforeHello => self.reply(reply::SAY_HELLO_RCPT),
            SessionState::BeforeMail => self.reply(reply::USE_MAIL),
            SessionState::Recipients => {
                let code = self.add_recipient(param);
                match reply::rcpt(code) {
                    Some(line) => self.reply(line),
                    None => self.internal_error(),
                }
            }
            _ => self.internal_error(),
        }
    }

    fn add_recipient(&mut self, param: &str) -> u16 {
        if self.recipients.len() >= self.max_recipients {
            warn!("Too many recipients ({})", self.recipients.len());
            return 552;
        }

        let address = match parse_path(param) {
            Ok(address) => address,
            Err(e) => {
                warn!("Recipient rejected: {}", e);
                return 553;
            }
        };

        if is_local(&address, &self.domain) && self.ctx.users().lookup(&address).is_none() {
            warn!("Unknown local mailbox {}", address);
            return 450;
        }

        info!("RCPT TO: {}", address);
        self.recipients.push(address);
        250
    }

    fn process_data_command(&mut self) {
        if self.state != SessionState::Recipients {
            self.reply(reply::SAY_MAIL);
            return;
        }
        if self.recipients.is_empty() {
            self.reply(reply::NEED_RECIPIENT);
            return;
        }
        self.state = SessionState::Data;
        self.accepting_data = true;
        self.message.clear();
        self.reply(reply::START_DATA);
    }

    fn process_data(&mut self, line: &[u8]) {
        if line == b"." {
            self.data_end();
            return;
        }

        // transparency: one leading dot was added by the client
        let line = line.strip_prefix(b".").unwrap_or(line);
        if self.accepting_data && !self.message_add_line(line) {
            self.accepting_data = false;
        }
    }

    fn message_add_line(&mut self, line: &[u8]) -> bool {
        if self.message.len() > self.max_message_size {
            return false;
        }
        self.message.append(line);
        self.message.append(b"\r\n");
        true
    }

    fn data_end(&mut self) {
        let smtp_like = self.protocols.intersects(Protocols::SMTP | Protocols::ESMTP);
        if smtp_like && self.protocols.intersects(Protocols::LMTP) {
            self.reply(reply::UNKNOWN_PROTOCOL);
            self.discard_message();
            self.close();
            return;
        }

        let outcome = self.message_data_end();
        if self.protocols == Protocols::LMTP {
            let codes: Vec<u16> = match &outcome {
                Ok(submission) => submission
                    .statuses
                    .iter()
                    .map(|(_, status)| status_code(*status))
                    .collect(),
                Err(code) => vec![*code; self.recipients.len()],
            };
            for code in codes {
                self.data_end_response(code);
            }
        } else {
            let code = match &outcome {
                Ok(submission) if submission.any_accepted() => 250,
                Ok(_) => 451,
                Err(code) => *code,
            };
            self.data_end_response(code);
        }

        self.discard_message();
        if self.state != SessionState::Closed {
            self.state = SessionState::BeforeMail;
        }
    }

    fn data_end_response(&mut self, code: u16) {
        match reply::data_end(code) {
            Some(line) => self.reply(line),
            None => self.internal_error(),
        }
    }

    /// Check the relay policy, add the trace headers and hand the message
    /// to the queue. `Err` carries the data-end code for every recipient.
    fn message_data_end(&mut self) -> std::result::Result<Submission, u16> {
        if self.message.len() > self.max_message_size {
            warn!("Message too big ({} bytes)", self.message.len());
            return Err(552);
        }

        let sender = self.sender.clone().unwrap_or_default();
        if is_local(&sender, &self.domain) {
            let same_user = self
                .username
                .as_deref()
                .is_some_and(|u| u.eq_ignore_ascii_case(&sender));
            if !self.authenticated || !same_user {
                warn!("Local sender {} is not authenticated as itself", sender);
                return Err(550);
            }
        } else if !self.recipients.iter().any(|r| is_local(r, &self.domain)) {
            warn!("Relaying from {} denied", sender);
            return Err(550);
        }

        let now = Local::now();
        let id = generate_id(&self.domain, now);

        let mut header = match HeaderParser::parse(self.message.as_slice(), self.max_headers) {
            Ok(header) => header,
            Err(e) => {
                warn!("Message {} rejected: {}", id, e);
                return Err(552);
            }
        };
        if let Err(e) = header.synthesize(&id, &self.remote_domain, &self.domain, now) {
            warn!("Message {} rejected: {}", id, e);
            return Err(552);
        }

        let queue_dir = Path::new(&self.ctx.config().queue.queue_dir);
        let message = Message::create(
            id.clone(),
            sender,
            self.recipients.clone(),
            header.to_message(),
            queue_dir,
            now.timestamp(),
        )
        .map_err(|e| {
            error!("Message {} could not be stored: {}", id, e);
            451u16
        })?;

        let mut queue = self.ctx.queue().map_err(|e| {
            error!("Message {} could not be queued: {}", id, e);
            451u16
        })?;
        queue.add_message(message).map_err(|e| {
            error!("Message {} could not be added to queue: {}", id, e);
            451u16
        })
    }

    fn discard_message(&mut self) {
        self.message.clear();
        self.sender = None;
        self.recipients.clear();
        self.accepting_data = false;
    }

    fn process_auth(&mut self, mechanism: &str, initial_response: Option<String>) {
        match self.state {
            SessionState::BeforeHello => {
                self.reply(reply::SAY_HELLO);
                return;
            }
            SessionState::BeforeMail => {}
            _ => {
                self.reply(reply::AUTH_IN_TRANSACTION);
                return;
            }
        }
        if self.authenticated {
            self.reply(reply::AUTH_DUPLICATE);
            return;
        }
        if mechanism != "LOGIN" {
            self.reply(reply::AUTH_MECHANISM);
            return;
        }

        self.state = SessionState::WaitingAuthUsername;
        match initial_response {
            Some(username) => self.fetch_username(&username),
            None => self.reply(&format!("334 {}", USERNAME_CHALLENGE)),
        }
    }

    fn fetch_username(&mut self, line: &str) {
        if line == "*" {
            self.reply(reply::AUTH_ABORTED);
            self.state = SessionState::BeforeMail;
            return;
        }

        match decode_login_credential(line) {
            Ok(username) => {
                self.username = Some(username);
                self.reply(&format!("334 {}", PASSWORD_CHALLENGE));
                self.state = SessionState::WaitingAuthPassword;
            }
            Err(_) => self.reply(reply::AUTH_BAD_BASE64),
        }
    }

    fn fetch_password(&mut self, line: &str) {
        if line == "*" {
            self.reply(reply::AUTH_ABORTED);
            self.state = SessionState::BeforeMail;
            return;
        }

        let password = match decode_login_credential(line) {
            Ok(password) => password,
            Err(_) => {
                self.reply(reply::AUTH_BAD_BASE64);
                return;
            }
        };

        let username = self.username.clone().unwrap_or_default();
        if self.ctx.users().verify_password(&username, &password) {
            info!("{} authenticated", username);
            self.authenticated = true;
            self.reply(reply::AUTH_DONE);
        } else {
            warn!("Authentication failed for {}", username);
            self.reply(reply::AUTH_FAILED);
        }
        self.state = SessionState::BeforeMail;
    }
}

fn protocol_verb(protocol: Protocols) -> &'static str {
    if protocol == Protocols::LMTP {
        "LHLO"
    } else if protocol == Protocols::ESMTP {
        "EHLO"
    } else {
        "HELO"
    }
}

fn status_code(status: RecipientStatus) -> u16 {
    match status {
        RecipientStatus::Delivered | RecipientStatus::Forwarded | RecipientStatus::Queued => 250,
        RecipientStatus::Failed => 451,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::{UserDirectory, UserRecord};
    use crate::security::auth::hash_password;
    use tempfile::TempDir;

    const DOMAIN: &str = "local.test";

    fn context(tmp: &TempDir, protocols: &[&str]) -> Arc<AppContext> {
        let mut config = Config::default();
        config.server.domain = DOMAIN.to_string();
        config.server.protocols = protocols.iter().map(|p| p.to_string()).collect();
        config.smtp.mail_dir = format!("{}/", tmp.path().display());
        config.queue.queue_dir = tmp.path().join("queue").display().to_string();
        config.queue.queue_file = tmp.path().join("queue.idx").display().to_string();

        let users = UserDirectory::new(
            vec![
                UserRecord {
                    address: "alice@local.test".to_string(),
                    password_hash: hash_password("secret").unwrap(),
                    redirect: None,
                },
                UserRecord {
                    address: "bob@local.test".to_string(),
                    password_hash: String::new(),
                    redirect: None,
                },
                UserRecord {
                    address: "carol@local.test".to_string(),
                    password_hash: String::new(),
                    redirect: None,
                },
            ],
            config.smtp.mail_dir.clone(),
        );
        Arc::new(AppContext::new(config, users).unwrap())
    }

    fn drain(session: &mut SmtpSession) -> String {
        let out = String::from_utf8_lossy(session.data_to_transmit()).into_owned();
        let len = session.data_to_transmit().len();
        session.transmitted(len);
        out
    }

    fn send(session: &mut SmtpSession, line: &str) -> String {
        session.eat_received_data(format!("{}\r\n", line).as_bytes());
        drain(session)
    }

    #[test]
    fn test_greeting_and_hello() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["smtp", "esmtp"]));
        assert_eq!(drain(&mut session), "220 local.test ESMTP Service ready\r\n");

        let out = send(&mut session, "LHLO client.test");
        assert_eq!(out, "501 5.5.5 wrong protocol version, try HELO EHLO\r\n");
        assert_eq!(session.state(), SessionState::BeforeHello);

        let out = send(&mut session, "EHLO client.test");
        assert!(out.starts_with("250-local.test Pleased to meet you\r\n"));
        assert_eq!(session.state(), SessionState::BeforeMail);
    }

    #[test]
    fn test_first_hello_fixes_protocol() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["smtp", "esmtp", "lmtp"]));
        drain(&mut session);
        send(&mut session, "LHLO client.test");
        assert_eq!(session.protocols(), Protocols::LMTP);

        let out = send(&mut session, "HELO client.test");
        assert!(out.starts_with("501 5.5.5"));
    }

    #[test]
    fn test_out_of_order_commands() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);

        assert_eq!(send(&mut session, "MAIL FROM:<a@b.test>"), "503 5.5.0 say hello first\r\n");
        send(&mut session, "EHLO c");
        assert_eq!(
            send(&mut session, "RCPT TO:<bob@local.test>"),
            "503 5.5.0 Use MAIL command to start a message\r\n"
        );
        assert_eq!(send(&mut session, "DATA"), "503 5.5.0 Say MAIL first\r\n");
        assert!(session.sender().is_none());
        assert!(session.recipients().is_empty());

        send(&mut session, "MAIL FROM:<a@b.test>");
        assert_eq!(
            send(&mut session, "MAIL FROM:<a@b.test>"),
            "503 5.5.0 duplicate MAIL command\r\n"
        );
        assert_eq!(send(&mut session, "DATA"), "503 5.5.0 Need at least one recipient\r\n");
    }

    #[test]
    fn test_recipient_checks() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");

        assert_eq!(
            send(&mut session, "RCPT TO:<ghost@local.test>"),
            "450 4.2.0 Mailbox unavailable\r\n"
        );
        assert_eq!(
            send(&mut session, "RCPT TO:<no-at-sign>"),
            "553 5.1.0 Recipient rejected\r\n"
        );
        assert_eq!(send(&mut session, "RCPT TO:<BOB@Local.Test>"), "250 2.1.5 Recipient Ok\r\n");
        assert_eq!(session.recipients(), ["BOB@Local.Test"]);
    }

    #[test]
    fn test_unknown_and_unimplemented() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        assert_eq!(send(&mut session, "VRFY bob"), "502 5.5.1 Command or feature not implemented\r\n");
        assert_eq!(send(&mut session, "STARTTLS"), "500 5.5.1 Command unrecognized\r\n");
        assert_eq!(send(&mut session, "MAIL <x@y>"), "501 5.5.2 Syntax error, FROM: expected\r\n");
    }

    #[test]
    fn test_quit_drains_before_close() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        session.eat_received_data(b"QUIT\r\nNOOP\r\n");
        assert!(!session.should_close());
        assert_eq!(drain(&mut session), "221 2.0.0 Good bye\r\n");
        assert!(session.should_close());
    }

    #[test]
    fn test_auth_login() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        send(&mut session, "EHLO c");

        assert_eq!(send(&mut session, "AUTH PLAIN"), "504 unimplemented AUTH mechanism\r\n");
        assert_eq!(send(&mut session, "AUTH LOGIN"), "334 VXNlcm5hbWU6\r\n");
        assert_eq!(
            send(&mut session, "not base64!"),
            "535 invalid BASE64 string. Please try again\r\n"
        );
        assert_eq!(session.state(), SessionState::WaitingAuthUsername);

        // alice@local.test / wrong
        assert_eq!(send(&mut session, "YWxpY2VAbG9jYWwudGVzdA=="), "334 UGFzc3dvcmQ6\r\n");
        assert_eq!(send(&mut session, "d3Jvbmc="), "535 invalid username/password\r\n");
        assert!(!session.is_authenticated());

        send(&mut session, "AUTH LOGIN YWxpY2VAbG9jYWwudGVzdA==");
        assert_eq!(send(&mut session, "c2VjcmV0"), "235 authentication done\r\n");
        assert!(session.is_authenticated());
        assert_eq!(send(&mut session, "AUTH LOGIN"), "503 duplicate AUTH command\r\n");
    }

    #[test]
    fn test_auth_abort() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "AUTH LOGIN");
        assert_eq!(send(&mut session, "*"), "501 authentication rejected by user\r\n");
        assert_eq!(session.state(), SessionState::BeforeMail);
    }

    #[test]
    fn test_open_relay_refused() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<x@elsewhere.test>");
        send(&mut session, "DATA");
        send(&mut session, "Subject: relay");
        send(&mut session, "");
        assert_eq!(send(&mut session, "."), "550 5.7.1 Message rejected\r\n");
        assert_eq!(session.state(), SessionState::BeforeMail);
    }

    #[test]
    fn test_local_sender_must_authenticate() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "MAIL FROM:<alice@local.test>");
        send(&mut session, "RCPT TO:<bob@local.test>");
        send(&mut session, "DATA");
        assert_eq!(send(&mut session, "."), "550 5.7.1 Message rejected\r\n");
    }

    #[test]
    fn test_message_too_big() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        session.max_message_size = 10;
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<bob@local.test>");
        send(&mut session, "DATA");
        send(&mut session, "0123456789");
        send(&mut session, "0123456789");
        assert_eq!(send(&mut session, "."), "552 5.3.4 Message too big\r\n");
    }

    #[test]
    fn test_lmtp_replies_per_recipient() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["lmtp"]));
        drain(&mut session);
        send(&mut session, "LHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<bob@local.test>");
        send(&mut session, "RCPT TO:<alice@local.test>");
        send(&mut session, "DATA");
        send(&mut session, "Subject: hi");
        send(&mut session, "");
        send(&mut session, "body");
        assert_eq!(send(&mut session, "."), "250 2.0.0 Ok\r\n250 2.0.0 Ok\r\n");
    }

    #[test]
    fn test_lmtp_mixed_outcomes() {
        let tmp = TempDir::new().unwrap();
        // a directory where carol's spool file should be cannot be appended to
        std::fs::create_dir(tmp.path().join("carol@local.test")).unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["lmtp"]));
        drain(&mut session);
        send(&mut session, "LHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<bob@local.test>");
        send(&mut session, "RCPT TO:<carol@local.test>");
        send(&mut session, "DATA");
        send(&mut session, "Subject: hi");
        send(&mut session, "");
        assert_eq!(
            send(&mut session, "body\r\n."),
            "250 2.0.0 Ok\r\n451 4.0.0 Local error\r\n"
        );
        assert!(tmp.path().join("bob@local.test").is_file());
    }

    #[test]
    fn test_lmtp_rejection_answers_every_recipient() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["lmtp"]));
        drain(&mut session);
        send(&mut session, "LHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<x@far.test>");
        send(&mut session, "RCPT TO:<y@far.test>");
        send(&mut session, "RCPT TO:<z@far.test>");
        send(&mut session, "DATA");
        assert_eq!(
            send(&mut session, "."),
            "550 5.7.1 Message rejected\r\n".repeat(3)
        );
        assert_eq!(session.state(), SessionState::BeforeMail);
    }

    #[test]
    fn test_overlong_line_is_bounded() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        let chunk = vec![b'A'; 1 << 20];

        session.eat_received_data(&chunk);
        assert_eq!(drain(&mut session), "500 5.5.2 Line too long\r\n");
        assert!(session.inbuf.is_empty());
        assert!(!session.should_close());

        // the same line keeps growing
        session.eat_received_data(&chunk);
        assert_eq!(drain(&mut session), "500 5.5.2 Line too long\r\n");
        assert!(session.should_close());

        for _ in 0..8 {
            session.eat_received_data(&chunk);
        }
        assert!(session.inbuf.is_empty());
    }

    #[test]
    fn test_session_resyncs_after_overlong_line() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        session.max_line_length = 16;
        drain(&mut session);

        session.eat_received_data(b"EHLO aaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(drain(&mut session), "500 5.5.2 Line too long\r\n");
        // the rest of the dropped line, then a fresh command
        assert_eq!(send(&mut session, "aaaa\r\nNOOP"), "250 2.0.0 OK, no operation done\r\n");
        assert_eq!(session.state(), SessionState::BeforeHello);
    }

    #[test]
    fn test_overlong_data_line_closes() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        session.max_line_length = 16;
        drain(&mut session);
        send(&mut session, "EHLO c");
        send(&mut session, "MAIL FROM:<a@remote.test>");
        send(&mut session, "RCPT TO:<bob@local.test>");
        send(&mut session, "DATA");

        session.eat_received_data(&[b'x'; 64]);
        assert_eq!(drain(&mut session), "500 5.5.2 Line too long\r\n");
        assert!(session.should_close());
        assert!(!tmp.path().join("bob@local.test").exists());
    }

    #[test]
    fn test_timeout_reply() {
        let tmp = TempDir::new().unwrap();
        let mut session = SmtpSession::new(context(&tmp, &["esmtp"]));
        drain(&mut session);
        session.timed_out();
        assert_eq!(
            drain(&mut session),
            "421 4.4.2 local.test Timeout, closing connection\r\n"
        );
        assert!(session.should_close());
    }
}
