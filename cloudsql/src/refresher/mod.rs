//! Per-instance credential refresh engine.
//!
//! One [`InstanceRefresher`] exists per instance connection name (the
//! [`Connector`](crate::Connector) deduplicates them). Each engine keeps a
//! valid [`InstanceData`] snapshot available: instance metadata, an ephemeral
//! client certificate, and the TLS client configuration assembled from both,
//! always from the same refresh cycle.
//!
//! Refreshes run on the tokio runtime in the background. Readers block only
//! while the backing cycle is in flight; steady-state reads are lock-clone-read
//! and never touch the network.

mod data;
mod error;
mod limiter;
mod source;

pub use data::{EphemeralCert, InstanceData, InstanceMetadata, IP_TYPE_PRIVATE, IP_TYPE_PUBLIC};
pub use error::{CertSubject, RefreshError};
pub use source::InstanceRefresher;
