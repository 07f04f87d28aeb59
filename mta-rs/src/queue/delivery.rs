//! Remote delivery of one queued message
//!
//! A [`DeliveryJob`] is a snapshot of a queue slot taken under the queue
//! lock. [`Deliverer::deliver`] runs without the lock: it groups the
//! recipients by domain, resolves each domain's exchanger, and runs one
//! SMTP transaction per domain. The recipients of every domain that was
//! not fully accepted come back in the [`DeliveryReport`].

use crate::config::Config;
use crate::error::MailError;
use crate::smtp::client::SmtpClient;
use crate::utils::dns::MxResolver;
use crate::utils::email::domain_of;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct DeliveryJob {
    pub slot: usize,
    pub id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub slot: usize,
    pub id: String,
    /// Recipients still to be delivered, in their original order
    pub remaining: Vec<String>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

#[derive(Clone)]
pub struct Deliverer {
    helo_domain: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    drop_on_permanent_failure: bool,
    resolver: Arc<dyn MxResolver>,
}

impl Deliverer {
    pub fn new(config: &Config, resolver: Arc<dyn MxResolver>) -> Self {
        Self {
            helo_domain: config.server.domain.clone(),
            port: config.delivery.remote_port,
            connect_timeout: Duration::from_secs(config.delivery.connect_timeout_secs),
            command_timeout: Duration::from_secs(config.delivery.command_timeout_secs),
            drop_on_permanent_failure: config.delivery.drop_on_permanent_failure,
            resolver,
        }
    }

    pub async fn deliver(&self, job: DeliveryJob) -> DeliveryReport {
        info!(
            "Delivering message {} to {} recipient(s)",
            job.id,
            job.recipients.len()
        );

        let mut remaining = Vec::new();
        for (domain, recipients) in group_by_domain(&job.recipients) {
            match self.deliver_domain(&domain, &job, &recipients).await {
                Ok(()) => {
                    info!("Message {} delivered to domain {}", job.id, domain);
                }
                Err(e) if e.is_permanent() && self.drop_on_permanent_failure => {
                    warn!(
                        "Message {} permanently rejected by {}, dropping {} recipient(s): {}",
                        job.id,
                        domain,
                        recipients.len(),
                        e
                    );
                }
                Err(e) => {
                    warn!("Message {} not delivered to {}: {}", job.id, domain, e);
                    remaining.extend(recipients);
                }
            }
        }

        // keep the submitted order rather than the grouping order
        let remaining = job
            .recipients
            .iter()
            .filter(|r| remaining.contains(r))
            .cloned()
            .collect();

        DeliveryReport {
            slot: job.slot,
            id: job.id,
            remaining,
        }
    }

    async fn deliver_domain(
        &self,
        domain: &str,
        job: &DeliveryJob,
        recipients: &[String],
    ) -> crate::error::Result<()> {
        let host = self
            .resolver
            .lowest_preference_exchanger(domain)
            .await
            .ok_or_else(|| MailError::DnsLookup(format!("No mail exchanger for {}", domain)))?;

        let mut client =
            SmtpClient::connect(&host, self.port, self.connect_timeout, self.command_timeout).await?;
        let result = client
            .send_mail(&self.helo_domain, &job.sender, recipients, &job.data)
            .await;
        client.quit().await;
        result
    }
}

/// Recipients grouped by lowercase domain, domains in first-seen order.
pub fn group_by_domain(recipients: &[String]) -> Vec<(String, Vec<String>)> {
    let mut groups: Vec<(String, Vec<String>)> = Vec::new();
    for rcpt in recipients {
        let domain = domain_of(rcpt).to_ascii_lowercase();
        match groups.iter_mut().find(|(d, _)| *d == domain) {
            Some((_, list)) => list.push(rcpt.clone()),
            None => groups.push((domain, vec![rcpt.clone()])),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NoExchanger;

    #[async_trait]
    impl MxResolver for NoExchanger {
        async fn lowest_preference_exchanger(&self, _domain: &str) -> Option<String> {
            None
        }
    }

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_group_by_domain() {
        let groups = group_by_domain(&strings(&["a@One.test", "b@two.test", "c@one.TEST"]));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, "one.test");
        assert_eq!(groups[0].1, strings(&["a@One.test", "c@one.TEST"]));
        assert_eq!(groups[1].1, strings(&["b@two.test"]));
    }

    #[tokio::test]
    async fn test_unresolvable_domains_stay_queued() {
        let deliverer = Deliverer::new(&Config::default(), Arc::new(NoExchanger));
        let job = DeliveryJob {
            slot: 3,
            id: "X.1@local.test".to_string(),
            sender: "a@local.test".to_string(),
            recipients: strings(&["b@two.test", "a@one.test", "c@two.test"]),
            data: b"x\r\n".to_vec(),
        };

        let report = deliverer.deliver(job).await;
        assert_eq!(report.slot, 3);
        assert!(!report.is_complete());
        assert_eq!(
            report.remaining,
            strings(&["b@two.test", "a@one.test", "c@two.test"])
        );
    }
}
