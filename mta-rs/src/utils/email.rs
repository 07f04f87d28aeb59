use crate::error::{MailError, Result};

/// Extract the mailbox from a `MAIL FROM:`/`RCPT TO:` argument.
///
/// Leading blanks and an opening `<` are skipped. A bracketed path ends at
/// the closing `>`, a bare one at the first blank, so trailing ESMTP
/// parameters are ignored. The mailbox must contain exactly one `@`.
pub fn parse_path(param: &str) -> Result<String> {
    let rest = param.trim_start_matches([' ', '\t']);
    let address = match rest.strip_prefix('<') {
        Some(inner) => match inner.find('>') {
            Some(end) => &inner[..end],
            None => inner.trim_end(),
        },
        None => rest.split([' ', '\t']).next().unwrap_or(""),
    };

    validate_email(address)?;
    Ok(address.to_string())
}

/// Exactly one `@` in the address.
pub fn validate_email(email: &str) -> Result<()> {
    if email.is_empty() {
        return Err(MailError::InvalidEmail("Email is empty".to_string()));
    }

    if email.matches('@').count() != 1 {
        return Err(MailError::InvalidEmail(format!(
            "Email must contain exactly one @: {}",
            email
        )));
    }

    Ok(())
}

/// Domain part of an address, empty when there is no `@`.
pub fn domain_of(address: &str) -> &str {
    address.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
}

pub fn is_local(address: &str, local_domain: &str) -> bool {
    domain_of(address).eq_ignore_ascii_case(local_domain)
}
