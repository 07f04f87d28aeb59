//! Reply lines sent by the server session
//!
//! Status codes computed while handling MAIL, RCPT and the end of DATA map
//! to fixed reply texts through the tables below; a code missing from a
//! table is an internal error.

use crate::smtp::protocol::Protocols;

pub const SAY_HELLO: &str = "503 5.5.0 say hello first";
pub const SAY_HELLO_RCPT: &str = "503 5.5.0 Say hello first";
pub const DUPLICATE_MAIL: &str = "503 5.5.0 duplicate MAIL command";
pub const USE_MAIL: &str = "503 5.5.0 Use MAIL command to start a message";
pub const SAY_MAIL: &str = "503 5.5.0 Say MAIL first";
pub const NEED_RECIPIENT: &str = "503 5.5.0 Need at least one recipient";
pub const BAD_SEQUENCE: &str = "503 5.5.1 Bad sequence of commands";
pub const START_DATA: &str = "354 3.3.0 Enter mail, end with <CRLF>.<CRLF>";
pub const RESET: &str = "250 2.0.0 Reset state";
pub const NOOP: &str = "250 2.0.0 OK, no operation done";
pub const GOODBYE: &str = "221 2.0.0 Good bye";
pub const UNRECOGNIZED: &str = "500 5.5.1 Command unrecognized";
pub const UNIMPLEMENTED: &str = "502 5.5.1 Command or feature not implemented";
pub const LINE_TOO_LONG: &str = "500 5.5.2 Line too long";
pub const UNKNOWN_PROTOCOL: &str =
    "521 5.5.0 Don't know the protocol version  Please use HELO/EHLO/LHLO";
pub const SERVICE_UNAVAILABLE: &str = "421 4.3.0 Service unavailable, closing connection";

pub const AUTH_IN_TRANSACTION: &str = "503 AUTH command during mail transaction forbidden";
pub const AUTH_DUPLICATE: &str = "503 duplicate AUTH command";
pub const AUTH_MECHANISM: &str = "504 unimplemented AUTH mechanism";
pub const AUTH_ABORTED: &str = "501 authentication rejected by user";
pub const AUTH_BAD_BASE64: &str = "535 invalid BASE64 string. Please try again";
pub const AUTH_FAILED: &str = "535 invalid username/password";
pub const AUTH_DONE: &str = "235 authentication done";

pub fn greeting(domain: &str, protocols: Protocols) -> String {
    format!("220 {} {} Service ready", domain, protocols.greeting_name())
}

pub fn syntax_error(expected: &str) -> String {
    format!("501 5.5.2 Syntax error, {}", expected)
}

/// Which hello commands the session would accept.
pub fn wrong_protocol(protocols: Protocols) -> String {
    let mut line = String::from("501 5.5.5 wrong protocol version, try");
    for (protocol, verb) in [
        (Protocols::LMTP, "LHLO"),
        (Protocols::SMTP, "HELO"),
        (Protocols::ESMTP, "EHLO"),
    ] {
        if protocols.intersects(protocol) {
            line.push(' ');
            line.push_str(verb);
        }
    }
    line
}

/// Reply to an accepted hello. Plain SMTP gets one line; ESMTP and LMTP
/// get the capability list.
pub fn hello(domain: &str, protocol: Protocols) -> String {
    if protocol == Protocols::SMTP {
        return format!("250 {} Pleased to meet you", domain);
    }

    let mut lines = vec![
        format!("250-{} Pleased to meet you", domain),
        "250-ENHANCEDSTATUSCODES".to_string(),
    ];
    if protocol == Protocols::ESMTP {
        lines.push("250-AUTH LOGIN".to_string());
    }
    lines.push("250 PIPELINING".to_string());
    lines.join("\r\n")
}

pub fn internal_error(domain: &str) -> String {
    format!("421 4.3.0 {} Internal server error, sorry", domain)
}

pub fn timeout(domain: &str) -> String {
    format!("421 4.4.2 {} Timeout, closing connection", domain)
}

/// Sent by the acceptor to a peer it will not serve.
pub fn not_available(domain: &str) -> String {
    format!(
        "421 {} service not available, closing transmission channel",
        domain
    )
}

pub fn mail(code: u16) -> Option<&'static str> {
    match code {
        250 => Some("250 2.1.0 Sender Ok"),
        451 => Some("451 4.1.8 Sender address rejected"),
        553 => Some("551 5.1.8 Sender address rejected"),
        _ => None,
    }
}

pub fn rcpt(code: u16) -> Option<&'static str> {
    match code {
        250 => Some("250 2.1.5 Recipient Ok"),
        251 => Some("251 2.1.5 Recipient Ok"),
        450 => Some("450 4.2.0 Mailbox unavailable"),
        451 => Some("451 4.1.8 Recipient rejected"),
        550 => Some("550 5.2.0 Mailbox unavailable"),
        551 => Some("551 5.1.2 Relaying denied"),
        552 => Some("552 5.5.3 Too many recipients"),
        553 => Some("553 5.1.0 Recipient rejected"),
        _ => None,
    }
}

pub fn data_end(code: u16) -> Option<&'static str> {
    match code {
        250 => Some("250 2.0.0 Ok"),
        451 => Some("451 4.0.0 Local error"),
        452 => Some("452 4.3.4 Quota exceeded"),
        550 => Some("550 5.7.1 Message rejected"),
        552 => Some("552 5.3.4 Message too big"),
        554 => Some("554 5.0.0 Failed"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting() {
        assert_eq!(
            greeting("mx.example.org", Protocols::ALL),
            "220 mx.example.org ESMTP/LMTP Service ready"
        );
        assert_eq!(
            greeting("mx.example.org", Protocols::SMTP),
            "220 mx.example.org SMTP Service ready"
        );
    }

    #[test]
    fn test_hello_replies() {
        assert_eq!(hello("d", Protocols::SMTP), "250 d Pleased to meet you");
        let lmtp = hello("d", Protocols::LMTP);
        assert!(lmtp.ends_with("250 PIPELINING"));
        assert!(!lmtp.contains("AUTH"));
        assert!(hello("d", Protocols::ESMTP).contains("250-AUTH LOGIN\r\n"));
    }

    #[test]
    fn test_wrong_protocol_lists_allowed_hellos() {
        assert_eq!(
            wrong_protocol(Protocols::SMTP | Protocols::ESMTP),
            "501 5.5.5 wrong protocol version, try HELO EHLO"
        );
    }

    #[test]
    fn test_tables_are_closed() {
        assert_eq!(mail(553), Some("551 5.1.8 Sender address rejected"));
        assert_eq!(rcpt(450), Some("450 4.2.0 Mailbox unavailable"));
        assert_eq!(data_end(552), Some("552 5.3.4 Message too big"));
        assert_eq!(mail(999), None);
        assert_eq!(data_end(503), None);
    }
}
