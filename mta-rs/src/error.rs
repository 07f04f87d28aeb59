use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SMTP protocol error: {0}")]
    SmtpProtocol(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid email address: {0}")]
    InvalidEmail(String),

    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    #[error("Queue is full ({0} slots)")]
    QueueFull(usize),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Remote server replied {code}: {reply}")]
    Rejected { code: u16, reply: String },

    #[error("Timed out: {0}")]
    Timeout(String),
}

impl MailError {
    /// A 5xx reply from a remote server
    pub fn is_permanent(&self) -> bool {
        matches!(self, MailError::Rejected { code, .. } if (500..600).contains(code))
    }
}

pub type Result<T> = std::result::Result<T, MailError>;
