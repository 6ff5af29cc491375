//! Domain validator stage: batches DNS responses and removes listed domains.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::BatchSettings;
use crate::dns::DnsInfo;
use crate::error::LookupError;
use crate::lists::DomainLists;
use crate::metrics;
use crate::queue::{BoundedQueue, QueueFull};

/// Domains that survived block-list and allow-list filtering, with their response codes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidatedDomains {
    domains: BTreeMap<String, u16>,
}

impl ValidatedDomains {
    pub fn new(domains: BTreeMap<String, u16>) -> Self {
        Self { domains }
    }

    #[inline]
    pub fn domains(&self) -> &BTreeMap<String, u16> {
        &self.domains
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn into_inner(self) -> BTreeMap<String, u16> {
        self.domains
    }
}

impl<S: Into<String>> FromIterator<(S, u16)> for ValidatedDomains {
    fn from_iter<I: IntoIterator<Item = (S, u16)>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(|(d, c)| (d.into(), c)).collect())
    }
}

/// Accumulated domain → response code pairs awaiting a flush.
///
/// Flushes once `max_size` distinct domains are held or more than
/// `max_cycles` domain names were inserted, whichever comes first.
#[derive(Debug)]
pub struct Batch {
    domains: HashMap<String, u16>,
    cycles: usize,
    max_size: usize,
    max_cycles: usize,
}

impl Batch {
    pub fn new(max_size: usize, max_cycles: usize) -> Self {
        Self {
            domains: HashMap::new(),
            cycles: 0,
            max_size,
            max_cycles,
        }
    }

    /// Record every name of a response; a name already present takes the newer code.
    pub fn insert(&mut self, info: DnsInfo) {
        let (domains, code) = info.into_parts();
        self.cycles += domains.len();
        for domain in domains {
            self.domains.insert(domain, code);
        }
    }

    #[inline]
    pub fn should_flush(&self) -> bool {
        self.domains.len() >= self.max_size || self.cycles > self.max_cycles
    }

    /// Empty the batch and reset the cycle counter, keeping the allocation.
    pub fn clear(&mut self) {
        self.domains.clear();
        self.cycles = 0;
    }

    /// Number of distinct domains.
    #[inline]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Domain names inserted since the last clear, duplicates included.
    #[inline]
    pub const fn cycles(&self) -> usize {
        self.cycles
    }
}

/// The domain validator stage.
pub struct DomainValidator<L> {
    responses: BoundedQueue<DnsInfo>,
    validated: BoundedQueue<ValidatedDomains>,
    lists: L,
    batch: Batch,
    poll_interval: Duration,
}

impl<L: DomainLists> DomainValidator<L> {
    pub fn new(
        responses: BoundedQueue<DnsInfo>,
        validated: BoundedQueue<ValidatedDomains>,
        lists: L,
        settings: &BatchSettings,
    ) -> Self {
        Self {
            responses,
            validated,
            lists,
            batch: Batch::new(settings.max_batch_size, settings.max_cycles),
            poll_interval: settings.poll_interval(),
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// A failed lookup drops the batch of that cycle; the loop keeps running.
    pub fn run(&mut self, token: &CancellationToken) {
        info!("domain validator started");
        while !token.is_cancelled() {
            let Some(info) = self.responses.pop_timeout(self.poll_interval) else {
                continue;
            };
            if let Err(e) = self.process(info) {
                error!(error = %e, "list lookup failed, dropping batch");
                metrics::lookup_failure();
            }
        }
        info!(pending = self.batch.len(), "domain validator stopped");
    }

    /// Add one response to the batch, flushing when a threshold is reached.
    ///
    /// Returns `Ok(true)` when a flush happened.
    pub fn process(&mut self, info: DnsInfo) -> Result<bool, LookupError> {
        self.batch.insert(info);
        if !self.batch.should_flush() {
            return Ok(false);
        }
        self.flush()?;
        Ok(true)
    }

    /// Filter the batch against both lists and push the survivors.
    ///
    /// The batch is cleared whether or not the lookups succeed. An empty
    /// result is still pushed.
    pub fn flush(&mut self) -> Result<(), LookupError> {
        let result = self.filter_batch();
        self.batch.clear();
        let validated = result?;

        metrics::batch_flushed();
        debug!(domains = validated.len(), "batch validated");

        if let Err(QueueFull(batch)) = self.validated.try_push(validated) {
            metrics::batch_dropped();
            warn!(domains = batch.len(), "publish queue full, dropping batch");
        }
        Ok(())
    }

    fn filter_batch(&self) -> Result<ValidatedDomains, LookupError> {
        let names: Vec<&str> = self.batch.domains.keys().map(String::as_str).collect();
        let blocked = self.lists.check_blocklist(&names)?;
        let allowed = self.lists.check_allowlist(&names)?;

        let mut blocked_count = 0;
        let mut allowed_count = 0;
        let survivors = self
            .batch
            .domains
            .iter()
            .filter(|(domain, _)| {
                if blocked.get(domain.as_str()).copied().unwrap_or(false) {
                    blocked_count += 1;
                    false
                } else if allowed.get(domain.as_str()).copied().unwrap_or(false) {
                    allowed_count += 1;
                    false
                } else {
                    true
                }
            })
            .map(|(domain, code)| (domain.clone(), *code))
            .collect();

        metrics::domains_filtered("blocklist", blocked_count);
        metrics::domains_filtered("allowlist", allowed_count);

        Ok(ValidatedDomains::new(survivors))
    }
}
