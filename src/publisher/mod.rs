//! Result publisher stage and the wire document it emits.
//!
//! Every non-empty [`ValidatedDomains`] batch is serialized as
//! `{"domains":{"<name>":<code>,...}}` and handed to a [`MessagePublisher`].

mod sink;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use sink::{FilePublisher, LogPublisher};

use crate::config::PublisherSettings;
use crate::error::{PublishError, Result};
use crate::metrics;
use crate::queue::BoundedQueue;
use crate::validator::ValidatedDomains;

/// Downstream transport for serialized result documents.
pub trait MessagePublisher: Send + Sync {
    fn publish(&self, message: &str) -> std::result::Result<(), PublishError>;
}

impl<T: MessagePublisher + ?Sized> MessagePublisher for Arc<T> {
    fn publish(&self, message: &str) -> std::result::Result<(), PublishError> {
        (**self).publish(message)
    }
}

impl<T: MessagePublisher + ?Sized> MessagePublisher for Box<T> {
    fn publish(&self, message: &str) -> std::result::Result<(), PublishError> {
        (**self).publish(message)
    }
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    domains: &'a BTreeMap<String, u16>,
}

#[derive(Deserialize)]
struct Document {
    domains: BTreeMap<String, u16>,
}

/// Serialize a batch into its wire document. Keys are emitted in sorted order.
pub fn to_message(batch: &ValidatedDomains) -> serde_json::Result<String> {
    serde_json::to_string(&DocumentRef {
        domains: batch.domains(),
    })
}

/// Parse a wire document back into a batch.
pub fn from_message(message: &str) -> serde_json::Result<ValidatedDomains> {
    let document: Document = serde_json::from_str(message)?;
    Ok(ValidatedDomains::new(document.domains))
}

/// The result publisher stage.
pub struct ResultPublisher<P> {
    validated: BoundedQueue<ValidatedDomains>,
    publisher: P,
    poll_interval: Duration,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl<P: MessagePublisher> ResultPublisher<P> {
    pub fn new(
        validated: BoundedQueue<ValidatedDomains>,
        publisher: P,
        settings: &PublisherSettings,
        poll_interval: Duration,
    ) -> Self {
        Self {
            validated,
            publisher,
            poll_interval,
            retry_attempts: settings.retry_attempts.max(1),
            retry_delay: settings.retry_delay(),
        }
    }

    /// Run until `token` is cancelled.
    ///
    /// A batch that cannot be delivered after every retry is dropped.
    pub fn run(&self, token: &CancellationToken) {
        info!("result publisher started");
        while !token.is_cancelled() {
            let Some(batch) = self.validated.pop_timeout(self.poll_interval) else {
                continue;
            };
            if let Err(e) = self.publish(&batch, token) {
                error!(domains = batch.len(), error = %e, "dropping batch");
                metrics::publish_failure();
            }
        }
        info!("result publisher stopped");
    }

    /// Serialize and deliver one batch.
    ///
    /// Returns `Ok(false)` without calling the transport when the batch is
    /// empty. A failed delivery is retried until the attempts are exhausted
    /// or `token` is cancelled, in which case the last error is returned.
    pub fn publish(&self, batch: &ValidatedDomains, token: &CancellationToken) -> Result<bool> {
        if batch.is_empty() {
            debug!("empty batch, nothing to publish");
            return Ok(false);
        }

        let message = to_message(batch)?;
        let mut attempt = 1;
        loop {
            match self.publisher.publish(&message) {
                Ok(()) => {
                    debug!(domains = batch.len(), attempt, "batch published");
                    metrics::batch_published();
                    return Ok(true);
                }
                Err(e) if attempt < self.retry_attempts && !token.is_cancelled() => {
                    warn!(attempt, error = %e, "publish failed, retrying");
                    attempt += 1;
                    if !self.wait(token, self.retry_delay) {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Sleep for `delay` in poll-interval steps; returns `false` if cancelled first.
    fn wait(&self, token: &CancellationToken, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if token.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(self.poll_interval.min(deadline - now));
        }
    }
}
