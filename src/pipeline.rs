//! Wiring of the four stages and three queues.
//!
//! ```text
//! capture -> packets -> filter -> dns_info -> validator -> validated -> publisher
//! ```
//!
//! Every stage runs on its own named OS thread and shares one
//! [`CancellationToken`]. A stage that fails or panics cancels the token
//! so the whole pipeline winds down together.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{BatchSettings, Config, PublisherSettings, QueueCapacities};
use crate::dns::PacketFilter;
use crate::error::{Error, Result};
use crate::lists::DomainLists;
use crate::network::{CaptureDevice, CaptureStopper, PacketSniffer};
use crate::publisher::{MessagePublisher, ResultPublisher};
use crate::queue::BoundedQueue;
use crate::validator::DomainValidator;

/// Pipeline settings, resolved before any stage starts.
#[derive(Debug, Clone)]
pub struct Pipeline {
    capacities: QueueCapacities,
    batching: BatchSettings,
    publisher: PublisherSettings,
    token: CancellationToken,
}

impl Pipeline {
    pub fn new(
        capacities: QueueCapacities,
        batching: BatchSettings,
        publisher: PublisherSettings,
    ) -> Self {
        Self {
            capacities,
            batching,
            publisher,
            token: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.queues.capacities(),
            config.batching.clone(),
            config.publisher.clone(),
        )
    }

    /// Token shared by every stage; cancelling it stops the pipeline.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Start all four stages.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if a thread cannot be spawned; stages already
    /// running are cancelled first.
    pub fn spawn<D, L, P>(
        self,
        sniffer: PacketSniffer<D>,
        lists: L,
        publisher: P,
    ) -> Result<PipelineHandle>
    where
        D: CaptureDevice + 'static,
        L: DomainLists + 'static,
        P: MessagePublisher + 'static,
    {
        let packets = BoundedQueue::new(self.capacities.packets);
        let dns_info = BoundedQueue::new(self.capacities.dns_info);
        let validated = BoundedQueue::new(self.capacities.validated);
        let poll_interval = self.batching.poll_interval();

        let filter = PacketFilter::new(packets.clone(), dns_info.clone(), poll_interval);
        let mut validator =
            DomainValidator::new(dns_info, validated.clone(), lists, &self.batching);
        let publisher = ResultPublisher::new(validated, publisher, &self.publisher, poll_interval);

        let mut sniffer = sniffer.with_stop_token(self.token.child_token());
        let mut handle = PipelineHandle {
            stopper: sniffer.stopper(),
            token: self.token.clone(),
            stages: Vec::with_capacity(4),
        };

        let token = self.token.clone();
        handle.start("publisher", move || {
            publisher.run(&token);
            Ok(())
        })?;

        let token = self.token.clone();
        handle.start("validator", move || {
            validator.run(&token);
            Ok(())
        })?;

        let token = self.token.clone();
        handle.start("filter", move || {
            filter.run(&token);
            Ok(())
        })?;

        handle.start("capture", move || {
            sniffer.capture_into(&packets).map_err(Error::from)
        })?;

        info!(
            packets = self.capacities.packets,
            dns_info = self.capacities.dns_info,
            validated = self.capacities.validated,
            "pipeline started"
        );
        Ok(handle)
    }
}

/// Handle to a running pipeline.
pub struct PipelineHandle {
    stopper: CaptureStopper,
    token: CancellationToken,
    stages: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl PipelineHandle {
    /// Spawn `stage` on its own thread. An error or panic in the stage
    /// cancels the shared token.
    fn start<F>(&mut self, name: &'static str, stage: F) -> Result<()>
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        let token = self.token.clone();
        let spawned = thread::Builder::new().name(name.to_owned()).spawn(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(stage))
                .unwrap_or(Err(Error::StagePanicked { stage: name }));
            if let Err(e) = &result {
                error!(stage = name, error = %e, "stage failed, stopping pipeline");
                token.cancel();
            }
            result
        });
        match spawned {
            Ok(join) => {
                self.stages.push((name, join));
                Ok(())
            }
            Err(e) => {
                self.shutdown();
                Err(e.into())
            }
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Ask every stage to stop. Never blocks.
    pub fn shutdown(&self) {
        self.stopper.stop_capture();
        self.token.cancel();
    }

    /// Wait for every stage to exit.
    ///
    /// # Errors
    ///
    /// Returns the first stage error, or [`Error::StagePanicked`] if a stage panicked.
    pub fn join(self) -> Result<()> {
        let mut outcome = Ok(());
        for (stage, join) in self.stages {
            let result = join
                .join()
                .unwrap_or(Err(Error::StagePanicked { stage }));
            if let Err(e) = result
                && outcome.is_ok()
            {
                outcome = Err(e);
            }
        }
        info!("pipeline stopped");
        outcome
    }
}
