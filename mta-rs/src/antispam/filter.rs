use crate::config::AdmissionConfig;
use crate::error::Result;
use tracing::{debug, info, warn};

use super::address_list::AddressList;

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// First contact or retried too early; recorded in the graylist
    Greylisted,
    Blacklisted,
}

impl Admission {
    pub fn is_accepted(self) -> bool {
        self == Admission::Accept
    }
}

/// Gate on peer IP addresses using white, gray and black lists.
///
/// An unknown peer is recorded in the graylist and turned away. Once it
/// comes back after `min_time_to_pass` seconds it moves to the whitelist.
/// Peers that never come back within `max_time_to_pass` end up in the
/// blacklist, and blacklist entries are forgotten after
/// `max_time_to_store`.
pub struct ConnectionFilter {
    enabled: bool,
    init_whitelist: AddressList,
    whitelist: AddressList,
    graylist: AddressList,
    blacklist: AddressList,
    min_time_to_pass: i64,
    max_time_to_pass: i64,
    max_time_to_store: i64,
}

impl ConnectionFilter {
    pub fn load(config: &AdmissionConfig) -> Result<Self> {
        let filter = Self {
            enabled: config.enabled,
            init_whitelist: AddressList::load(&config.init_whitelist_file)?,
            whitelist: AddressList::load(&config.whitelist_file)?,
            graylist: AddressList::load(&config.graylist_file)?,
            blacklist: AddressList::load(&config.blacklist_file)?,
            min_time_to_pass: config.min_time_to_pass as i64,
            max_time_to_pass: config.max_time_to_pass as i64,
            max_time_to_store: config.max_time_to_store as i64,
        };

        if filter.enabled {
            info!(
                "Admission lists loaded: {} initial, {} white, {} gray, {} black",
                filter.init_whitelist.len(),
                filter.whitelist.len(),
                filter.graylist.len(),
                filter.blacklist.len()
            );
        }
        Ok(filter)
    }

    /// Filter that admits everyone
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            init_whitelist: AddressList::new(),
            whitelist: AddressList::new(),
            graylist: AddressList::new(),
            blacklist: AddressList::new(),
            min_time_to_pass: 0,
            max_time_to_pass: 0,
            max_time_to_store: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn check(&mut self, ip: &str, now: i64) -> Admission {
        if !self.enabled {
            return Admission::Accept;
        }

        if self.blacklist.contains(ip) {
            debug!("{} is blacklisted", ip);
            return Admission::Blacklisted;
        }

        if self.init_whitelist.contains(ip) || self.whitelist.contains(ip) {
            return Admission::Accept;
        }

        let waited = self.graylist.find(ip).map(|e| e.age(now));
        match waited {
            None => {
                info!("Greylisting new peer {}", ip);
                self.graylist.add(ip, now);
                self.persist(&[ListKind::Gray]);
                Admission::Greylisted
            }
            Some(age) if age >= self.min_time_to_pass => {
                info!("Peer {} retried after {}s, whitelisting", ip, age);
                self.graylist.remove(ip);
                self.whitelist.add(ip, now);
                self.persist(&[ListKind::Gray, ListKind::White]);
                Admission::Accept
            }
            Some(_) => Admission::Greylisted,
        }
    }

    /// Age out the graylist into the blacklist and forget old blacklist
    /// entries.
    pub fn sweep(&mut self, now: i64) {
        if !self.enabled {
            return;
        }

        let expired = self.graylist.take_older_than(self.max_time_to_pass, now);
        let forgotten = self.blacklist.take_older_than(self.max_time_to_store, now);

        for entry in &expired {
            warn!("Peer {} never retried, blacklisting", entry.address);
            self.blacklist.add(&entry.address, now);
        }

        if !expired.is_empty() || !forgotten.is_empty() {
            self.persist(&[ListKind::Gray, ListKind::Black]);
        }
    }

    pub fn graylist(&self) -> &AddressList {
        &self.graylist
    }

    pub fn whitelist(&self) -> &AddressList {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &AddressList {
        &self.blacklist
    }

    fn persist(&self, kinds: &[ListKind]) {
        for kind in kinds {
            let list = match kind {
                ListKind::White => &self.whitelist,
                ListKind::Gray => &self.graylist,
                ListKind::Black => &self.blacklist,
            };
            if let Err(e) = list.save() {
                warn!("Failed to save {:?} address list: {}", kind, e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum ListKind {
    White,
    Gray,
    Black,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_filter() -> ConnectionFilter {
        let config = AdmissionConfig {
            enabled: true,
            ..AdmissionConfig::default()
        };
        ConnectionFilter::load(&config).unwrap()
    }

    #[test]
    fn test_disabled_accepts_everyone() {
        let mut filter = ConnectionFilter::disabled();
        assert_eq!(filter.check("1.2.3.4", 0), Admission::Accept);
        assert!(filter.graylist().is_empty());
    }

    #[test]
    fn test_greylisting_flow() {
        let mut filter = enabled_filter();

        assert_eq!(filter.check("1.2.3.4", 1000), Admission::Greylisted);
        assert!(filter.graylist().contains("1.2.3.4"));

        // too early
        assert_eq!(filter.check("1.2.3.4", 1060), Admission::Greylisted);

        assert_eq!(filter.check("1.2.3.4", 1120), Admission::Accept);
        assert!(!filter.graylist().contains("1.2.3.4"));
        assert!(filter.whitelist().contains("1.2.3.4"));

        assert_eq!(filter.check("1.2.3.4", 1121), Admission::Accept);
    }

    #[test]
    fn test_sweep_blacklists_and_forgets() {
        let mut filter = enabled_filter();
        filter.check("5.6.7.8", 0);

        filter.sweep(18_000);
        assert!(filter.graylist().is_empty());
        assert!(filter.blacklist().contains("5.6.7.8"));
        assert_eq!(filter.check("5.6.7.8", 18_001), Admission::Blacklisted);

        filter.sweep(18_000 + 1_209_600);
        assert!(filter.blacklist().is_empty());
    }
}
