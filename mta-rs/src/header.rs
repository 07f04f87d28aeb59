//! Message header parsing and trace header synthesis
//!
//! Splits a raw message into header fields and body. Continuation lines
//! (starting with a tab or a space) are folded into the previous field.
//! The first line that is neither a field nor a continuation ends the
//! header block; a blank separator line is consumed, any other line is
//! kept as the first body line.

use crate::error::{MailError, Result};
use chrono::{DateTime, Local};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Parsed header block plus the verbatim body.
#[derive(Debug, Clone)]
pub struct HeaderParser {
    fields: Vec<HeaderField>,
    body: Vec<u8>,
    max_fields: usize,
}

impl HeaderParser {
    pub fn new(max_fields: usize) -> Self {
        Self {
            fields: Vec::new(),
            body: Vec::new(),
            max_fields,
        }
    }

    /// Parse a raw message. Fails when the message carries more header
    /// fields than allowed.
    pub fn parse(raw: &[u8], max_fields: usize) -> Result<Self> {
        let mut parser = Self::new(max_fields);
        let mut rest = raw;

        while !rest.is_empty() {
            let (line, next) = split_line(rest);

            if line.is_empty() {
                rest = next;
                break;
            }

            if line[0] == b'\t' || line[0] == b' ' {
                match parser.fields.last_mut() {
                    Some(field) => {
                        field.value.push_str("\r\n");
                        field.value.push_str(&String::from_utf8_lossy(line));
                        rest = next;
                        continue;
                    }
                    None => break,
                }
            }

            match split_field(line) {
                Some((name, value)) => {
                    parser.add(&name, &value)?;
                    rest = next;
                }
                None => break,
            }
        }

        parser.body = rest.to_vec();
        Ok(parser)
    }

    /// First value of a field, matched case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .map(|f| f.value.as_str())
    }

    /// Replace the first field with this name in place, or append it.
    pub fn set(&mut self, name: &str, value: &str) -> Result<()> {
        match self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(name))
        {
            Some(field) => {
                field.value = value.to_string();
                Ok(())
            }
            None => self.add(name, value),
        }
    }

    /// Append a field, keeping any existing field of the same name.
    pub fn add(&mut self, name: &str, value: &str) -> Result<()> {
        if self.fields.len() >= self.max_fields {
            return Err(MailError::Parse(format!(
                "too many header fields (limit {})",
                self.max_fields
            )));
        }
        self.fields.push(HeaderField {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    pub fn fields(&self) -> &[HeaderField] {
        &self.fields
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Add the trace headers of an accepted message: `Date` and
    /// `Message-ID` when missing, and always a new `Received` field.
    pub fn synthesize(
        &mut self,
        message_id: &str,
        remote_domain: &str,
        local_domain: &str,
        now: DateTime<Local>,
    ) -> Result<()> {
        if self.get("Date").is_none() {
            self.set("Date", &now.to_rfc2822())?;
        }
        if self.get("Message-ID").is_none() {
            self.set("Message-ID", &format!("<{}>", message_id))?;
        }
        self.add(
            "Received",
            &format!(
                "from {remote} (helo=[{remote}])\r\n\tby {local} with smtp id {id}; {date}",
                remote = remote_domain,
                local = local_domain,
                id = message_id,
                date = now.to_rfc2822()
            ),
        )
    }

    /// Header block in insertion order, terminated by a blank line.
    pub fn header_block(&self) -> String {
        let mut out = String::new();
        for field in &self.fields {
            out.push_str(&field.name);
            out.push_str(": ");
            out.push_str(&field.value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        out
    }

    /// Regenerated header block followed by the body.
    pub fn to_message(&self) -> Vec<u8> {
        let mut out = self.header_block().into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

/// Split off one line, without its `\n` or `\r\n` terminator.
fn split_line(data: &[u8]) -> (&[u8], &[u8]) {
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let line = &data[..pos];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            (line, &data[pos + 1..])
        }
        None => (data, &[]),
    }
}

/// `Name: value` with the colon before any whitespace. The colon and one
/// following space are dropped from the value.
fn split_field(line: &[u8]) -> Option<(String, String)> {
    let colon = line.iter().position(|&b| b == b':')?;
    let name = &line[..colon];
    if name.is_empty() || name.iter().any(|b| b.is_ascii_whitespace()) {
        return None;
    }
    let mut value = &line[colon + 1..];
    if let Some(stripped) = value.strip_prefix(b" ") {
        value = stripped;
    }
    Some((
        String::from_utf8_lossy(name).into_owned(),
        String::from_utf8_lossy(value).into_owned(),
    ))
}
