use crate::error::{MailError, Result};
use crate::smtp::protocol::Protocols;

/// Keywords that are known but answered with 502
const UNIMPLEMENTED: [&str; 8] = ["SEND", "SAML", "SOML", "VRFY", "EXPN", "HELP", "TURN", "ETRN"];

#[derive(Debug, Clone, PartialEq)]
pub enum SmtpCommand {
    /// HELO, EHLO or LHLO, tagged with the protocol it asks for
    Hello { protocol: Protocols, domain: String },
    /// Everything after `FROM:`
    MailFrom(String),
    /// Everything after `TO:`
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
    Auth {
        mechanism: String,
        initial_response: Option<String>,
    },
    Unimplemented(String),
    Unrecognized,
}

impl SmtpCommand {
    /// Parse one command line (without its terminator).
    ///
    /// Every keyword is exactly four characters, matched case-insensitively
    /// and followed by a space or the end of the line. Anything else is
    /// [`SmtpCommand::Unrecognized`]. A MAIL or RCPT without its `FROM:`
    /// or `TO:` prefix is a syntax error.
    pub fn parse(line: &str) -> Result<Self> {
        let Some(keyword) = line.get(..4) else {
            return Ok(SmtpCommand::Unrecognized);
        };
        let params = match line.as_bytes().get(4) {
            None => "",
            Some(b' ') => &line[5..],
            Some(_) => return Ok(SmtpCommand::Unrecognized),
        };
        let keyword = keyword.to_ascii_uppercase();

        let command = match keyword.as_str() {
            "HELO" => Self::hello(Protocols::SMTP, params),
            "EHLO" => Self::hello(Protocols::ESMTP, params),
            "LHLO" => Self::hello(Protocols::LMTP, params),
            "MAIL" => SmtpCommand::MailFrom(strip_keyword(params, "FROM:")?.to_string()),
            "RCPT" => SmtpCommand::RcptTo(strip_keyword(params, "TO:")?.to_string()),
            "DATA" => SmtpCommand::Data,
            "RSET" => SmtpCommand::Rset,
            "NOOP" => SmtpCommand::Noop,
            "QUIT" => SmtpCommand::Quit,
            "AUTH" => {
                let mut parts = params.split_whitespace();
                SmtpCommand::Auth {
                    mechanism: parts.next().unwrap_or("").to_ascii_uppercase(),
                    initial_response: parts.next().map(str::to_string),
                }
            }
            other if UNIMPLEMENTED.contains(&other) => SmtpCommand::Unimplemented(keyword),
            _ => SmtpCommand::Unrecognized,
        };
        Ok(command)
    }

    fn hello(protocol: Protocols, params: &str) -> Self {
        SmtpCommand::Hello {
            protocol,
            domain: params.trim().to_string(),
        }
    }
}

fn strip_keyword<'a>(params: &'a str, keyword: &str) -> Result<&'a str> {
    match params.get(..keyword.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(keyword) => Ok(&params[keyword.len()..]),
        _ => Err(MailError::SmtpProtocol(format!("{} expected", keyword))),
    }
}
