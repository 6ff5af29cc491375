//! DNS detector - passive DNS response classification.
//!
//! The detector captures DNS responses on a network interface, batches the
//! queried domain names with their response codes, removes names found on a
//! block list or an allow list, and publishes what remains as
//! `{"domains":{"<name>":<code>}}` documents.
//!
//! # Architecture
//!
//! Four stages connected by three bounded queues:
//!
//! - [`network`]: Packet capture (`PacketSniffer`) and link-layer decoding
//! - [`dns`]: DNS response parsing and the packet filter stage
//! - [`validator`]: Batching and list filtering
//! - [`publisher`]: Serialization and delivery of validated batches
//! - [`pipeline`]: Threads and queues tying the stages together
//!
//! Supporting modules: [`queue`], [`lists`], [`config`], [`metrics`], [`error`].
//!
//! # Testing
//!
//! Every external collaborator sits behind a trait, so stages can be
//! exercised without a network interface:
//!
//! ```rust
//! use dns_detector::lists::{DomainLists, StaticLists};
//!
//! let lists = StaticLists::from_patterns(["*.ads.com"], ["example.org"]);
//! let hits = lists.check_blocklist(&["tracking.ads.com"]).unwrap();
//! assert!(hits["tracking.ads.com"]);
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod lists;
pub mod metrics;
pub mod network;
pub mod pipeline;
pub mod publisher;
pub mod queue;
pub mod validator;

pub use config::Config;
pub use error::{Error, Result};
