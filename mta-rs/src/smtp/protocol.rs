//! Protocol capability set negotiated by a session

use crate::error::{MailError, Result};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Small bitset over the three protocol flavors a session may speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Protocols(u8);

impl Protocols {
    pub const NONE: Protocols = Protocols(0);
    pub const SMTP: Protocols = Protocols(0b001);
    pub const ESMTP: Protocols = Protocols(0b010);
    pub const LMTP: Protocols = Protocols(0b100);
    pub const ALL: Protocols = Protocols(0b111);

    pub fn contains(self, other: Protocols) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Protocols) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: Protocols) -> Protocols {
        Protocols(self.0 & !other.0)
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Parse the `protocols` list of the configuration.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self> {
        let mut set = Protocols::NONE;
        for name in names {
            set |= match name.as_ref().to_ascii_lowercase().as_str() {
                "smtp" => Protocols::SMTP,
                "esmtp" => Protocols::ESMTP,
                "lmtp" => Protocols::LMTP,
                other => {
                    return Err(MailError::Config(format!("Unknown protocol: {}", other)));
                }
            };
        }
        Ok(set)
    }

    /// Name announced in the 220 greeting.
    pub fn greeting_name(self) -> &'static str {
        let lmtp = self.intersects(Protocols::LMTP);
        let smtp = self.intersects(Protocols::SMTP);
        let esmtp = self.intersects(Protocols::ESMTP);
        match (lmtp, esmtp, smtp) {
            (true, false, false) => "LMTP",
            (true, _, _) => "ESMTP/LMTP",
            (false, true, _) => "ESMTP",
            (false, false, true) => "SMTP",
            (false, false, false) => "(no protocols available)",
        }
    }
}

impl BitOr for Protocols {
    type Output = Protocols;

    fn bitor(self, rhs: Protocols) -> Protocols {
        Protocols(self.0 | rhs.0)
    }
}

impl BitOrAssign for Protocols {
    fn bitor_assign(&mut self, rhs: Protocols) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Protocols {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.greeting_name())
    }
}
