#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(missing_debug_implementations)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

//! Client-side connector for managed cloud database instances.
//!
//! Database drivers reach managed instances through mutually-authenticated
//! TLS without the operator provisioning, rotating, or distributing client
//! certificates, and without exposing the instance to IP allow-listing.
//!
//! The crate revolves around per-instance credential refresh engines
//! ([`InstanceRefresher`]). Each engine keeps a valid short-lived client
//! certificate and the instance's current metadata on hand, assembles a
//! rustls client configuration from them, and serves "give me a connected,
//! authenticated stream" requests without touching the network on the hot
//! path. Engines self-heal: failed refreshes retry immediately, and callers
//! can force a rate-limited refresh after a handshake failure.
//!
//! The [`Connector`] is the process-wide entry point: it deduplicates engines
//! by instance connection name (`project:region:instance`) and exposes
//! [`Connector::dial`]. The control-plane client is injected behind the
//! [`admin::AdminApi`] trait; this crate implements no transport and persists
//! nothing to disk.
//!
//! Driver-specific option handling (including the Unix-socket bypass) lives
//! in the companion `cloudsql-drivers` crate.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use async_trait::async_trait;
//! # use cloudsql::admin::{AdminApi, ApiError, CreateEphemeralRequest, DatabaseInstance, SslCert};
//! # struct MyApiClient;
//! # #[async_trait]
//! # impl AdminApi for MyApiClient {
//! #     async fn get_instance(&self, _: &str, _: &str) -> Result<DatabaseInstance, ApiError> {
//! #         unimplemented!()
//! #     }
//! #     async fn create_ephemeral_cert(
//! #         &self,
//! #         _: &str,
//! #         _: &str,
//! #         _: CreateEphemeralRequest,
//! #     ) -> Result<SslCert, ApiError> {
//! #         unimplemented!()
//! #     }
//! # }
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use cloudsql::{Connector, IP_TYPE_PRIVATE};
//!
//! let connector = Connector::builder(Arc::new(MyApiClient)).build()?;
//!
//! // Private-address-only dial; the stream is TLS-handshaken and ready for
//! // the driver's wire protocol.
//! let stream = connector
//!     .dial_with("my-project:us-central1:my-db", &[IP_TYPE_PRIVATE.to_string()])
//!     .await?;
//! # drop(stream);
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod instance;
pub mod keys;
pub mod refresher;

mod connector;
mod dialer;
mod errors;
mod observability;
mod prelude;
mod tls;

pub use crate::admin::{AdminApi, ApiError};
pub use crate::connector::{Connector, ConnectorBuilder};
pub use crate::dialer::{DEFAULT_IP_TYPES, PROXY_PORT};
pub use crate::errors::{Error, Result};
pub use crate::instance::{InstanceName, InstanceNameError};
pub use crate::keys::{ClientKeyPair, KeyError};
pub use crate::refresher::{
    InstanceData, InstanceRefresher, RefreshError, IP_TYPE_PRIVATE, IP_TYPE_PUBLIC,
};
