//! Mail exchanger resolution
//!
//! Delivery only needs one answer per domain: the exchanger with the
//! lowest preference value. [`MxResolver`] is that seam; [`DnsMxResolver`]
//! answers it from configured routes first and DNS second.

use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use trust_dns_resolver::config::*;
use trust_dns_resolver::TokioAsyncResolver;

#[async_trait]
pub trait MxResolver: Send + Sync {
    /// Host of the lowest-preference exchanger for `domain`, or `None`
    /// when the domain cannot be resolved.
    async fn lowest_preference_exchanger(&self, domain: &str) -> Option<String>;
}

pub struct DnsMxResolver {
    resolver: TokioAsyncResolver,
    routes: HashMap<String, String>,
}

impl DnsMxResolver {
    pub fn new(routes: HashMap<String, String>) -> Self {
        let resolver = TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default());
        let routes = routes
            .into_iter()
            .map(|(domain, host)| (domain.to_ascii_lowercase(), host))
            .collect();
        Self { resolver, routes }
    }
}

#[async_trait]
impl MxResolver for DnsMxResolver {
    async fn lowest_preference_exchanger(&self, domain: &str) -> Option<String> {
        if let Some(host) = self.routes.get(&domain.to_ascii_lowercase()) {
            debug!("Using configured route {} for {}", host, domain);
            return Some(host.clone());
        }

        info!("Looking up MX records for {}", domain);
        let mx_lookup = match self.resolver.mx_lookup(domain).await {
            Ok(lookup) => lookup,
            Err(e) => {
                warn!("MX lookup failed for {}: {}", domain, e);
                return None;
            }
        };

        let exchanger = select_lowest_preference(mx_lookup.iter().map(|mx| {
            let exchange = mx.exchange().to_string().trim_end_matches('.').to_string();
            (mx.preference(), exchange)
        }));

        match &exchanger {
            Some(host) => debug!("MX for {} is {}", domain, host),
            None => warn!("No MX records found for {}", domain),
        }
        exchanger
    }
}

/// First exchanger with the minimal preference value.
pub fn select_lowest_preference<I>(records: I) -> Option<String>
where
    I: IntoIterator<Item = (u16, String)>,
{
    let mut best: Option<(u16, String)> = None;
    for (preference, host) in records {
        if host.is_empty() {
            continue;
        }
        match &best {
            Some((current, _)) if *current <= preference => {}
            _ => best = Some((preference, host)),
        }
    }
    best.map(|(_, host)| host)
}
