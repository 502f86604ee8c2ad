//! The process-wide connector: a registry of per-instance refresh engines and
//! the dial surface handed to driver integrations.

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::admin::AdminApi;
use crate::dialer::{self, DEFAULT_IP_TYPES, PROXY_PORT};
use crate::errors::{Error, Result};
use crate::instance::InstanceName;
use crate::keys::ClientKeyPair;
use crate::prelude::{debug, info};
use crate::refresher::InstanceRefresher;

/// Entry point for driver integrations.
///
/// A `Connector` owns one [`InstanceRefresher`] per instance connection name
/// and guarantees at most one is ever constructed per name. Cloning the
/// connector clones a handle to the same shared state.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use async_trait::async_trait;
/// # use cloudsql::admin::{AdminApi, ApiError, CreateEphemeralRequest, DatabaseInstance, SslCert};
/// # struct MyApiClient;
/// # #[async_trait]
/// # impl AdminApi for MyApiClient {
/// #     async fn get_instance(&self, _: &str, _: &str) -> Result<DatabaseInstance, ApiError> {
/// #         unimplemented!()
/// #     }
/// #     async fn create_ephemeral_cert(
/// #         &self,
/// #         _: &str,
/// #         _: &str,
/// #         _: CreateEphemeralRequest,
/// #     ) -> Result<SslCert, ApiError> {
/// #         unimplemented!()
/// #     }
/// # }
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// use cloudsql::Connector;
/// use tokio::io::AsyncWriteExt;
///
/// let connector = Connector::builder(Arc::new(MyApiClient)).build()?;
///
/// // Blocks only while the instance's first refresh is in flight.
/// let mut stream = connector.dial("my-project:us-central1:my-db").await?;
/// stream.write_all(b"...driver protocol bytes...").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connector {
    inner: Arc<Inner>,
}

struct Inner {
    api: Arc<dyn AdminApi>,
    keys: Arc<ClientKeyPair>,
    proxy_port: u16,
    refreshers: Mutex<HashMap<InstanceName, Arc<InstanceRefresher>>>,
    closed: AtomicBool,
}

impl Debug for Connector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("proxy_port", &self.inner.proxy_port)
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Connector {
    /// Creates a builder around a ready-made Admin API client.
    pub fn builder(api: Arc<dyn AdminApi>) -> ConnectorBuilder {
        ConnectorBuilder::new(api)
    }

    /// Returns the refresh engine for `name`, creating it on first use.
    ///
    /// The first call for a name constructs the engine, which immediately
    /// arms its initial background refresh. Subsequent calls return the same
    /// engine.
    ///
    /// Must be called within a tokio runtime; the engine schedules its
    /// refresh work there.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Closed`] after [`Connector::close`].
    pub fn get_or_create(&self, name: &InstanceName) -> Result<Arc<InstanceRefresher>> {
        self.assert_open()?;
        let Ok(mut refreshers) = self.inner.refreshers.lock() else {
            return Err(Error::internal("refresher registry mutex poisoned"));
        };
        if let Some(existing) = refreshers.get(name) {
            return Ok(Arc::clone(existing));
        }
        info!("[{name}] creating credential refresh engine");
        let refresher = InstanceRefresher::new(
            name.clone(),
            Arc::clone(&self.inner.api),
            Arc::clone(&self.inner.keys),
        );
        refreshers.insert(name.clone(), Arc::clone(&refresher));
        Ok(refresher)
    }

    /// Dials `name` with the default address preference order
    /// ([`DEFAULT_IP_TYPES`]: public first, then private).
    ///
    /// # Errors
    ///
    /// See [`Connector::dial_with`].
    pub async fn dial(&self, name: &str) -> Result<TlsStream<TcpStream>> {
        let preferences: Vec<String> = DEFAULT_IP_TYPES.iter().map(|s| (*s).to_string()).collect();
        self.dial_with(name, &preferences).await
    }

    /// Returns a connected, TLS-handshaken stream to the instance, trying the
    /// given address-type preferences in order.
    ///
    /// Blocks only while the instance's backing refresh cycle is in flight;
    /// with fresh credentials the only waiting is the TCP connect and the
    /// handshake themselves.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error for a malformed name or when no
    /// assigned address matches `ip_preferences`, with the refresh cycle's
    /// error when credentials cannot be obtained, and with a dial error when
    /// the TCP connect or TLS handshake fails. Handshake failures trigger a
    /// best-effort [`Connector::force_refresh`] before surfacing; retrying is
    /// the caller's decision.
    pub async fn dial_with(
        &self,
        name: &str,
        ip_preferences: &[String],
    ) -> Result<TlsStream<TcpStream>> {
        let name = parse_name(name)?;
        let refresher = self.get_or_create(&name)?;
        dialer::dial(&refresher, ip_preferences, self.inner.proxy_port).await
    }

    /// Requests an out-of-band credential refresh for `name`.
    ///
    /// Returns `Ok(false)` when the request is denied by the per-instance
    /// rate gate (at most one accepted request per minute). Never blocks on
    /// network work, but must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Fails on a malformed name or a closed connector.
    pub fn force_refresh(&self, name: &str) -> Result<bool> {
        let name = parse_name(name)?;
        let refresher = self.get_or_create(&name)?;
        Ok(refresher.force_refresh())
    }

    /// Shuts down every refresh engine and rejects further calls with
    /// [`Error::Closed`]. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(refreshers) = self.inner.refreshers.lock() {
            for refresher in refreshers.values() {
                refresher.close();
            }
        }
        debug!("connector closed");
    }

    /// Whether [`Connector::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn assert_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Best-effort: stop engines from rearming once the last handle is gone.
        if let Ok(refreshers) = self.refreshers.lock() {
            for refresher in refreshers.values() {
                refresher.close();
            }
        }
    }
}

fn parse_name(raw: &str) -> Result<InstanceName> {
    InstanceName::new(raw).map_err(|source| Error::InvalidInstanceName {
        name: raw.to_string(),
        source,
    })
}

/// Builder for [`Connector`].
pub struct ConnectorBuilder {
    api: Arc<dyn AdminApi>,
    keys: Option<Arc<ClientKeyPair>>,
    proxy_port: u16,
}

impl Debug for ConnectorBuilder {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorBuilder")
            .field("proxy_port", &self.proxy_port)
            .finish_non_exhaustive()
    }
}

impl ConnectorBuilder {
    fn new(api: Arc<dyn AdminApi>) -> Self {
        Self {
            api,
            keys: None,
            proxy_port: PROXY_PORT,
        }
    }

    /// Uses the given key pair instead of the process-shared one.
    #[must_use]
    pub fn key_pair(mut self, keys: Arc<ClientKeyPair>) -> Self {
        self.keys = Some(keys);
        self
    }

    /// Overrides the instance-side proxy port (default [`PROXY_PORT`]).
    /// Mostly useful against local stand-in servers in tests.
    #[must_use]
    pub fn proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = port;
        self
    }

    /// Builds the connector.
    ///
    /// # Errors
    ///
    /// Fails only if no key pair was supplied and generating the
    /// process-shared one fails.
    pub fn build(self) -> Result<Connector> {
        let keys = match self.keys {
            Some(keys) => keys,
            None => ClientKeyPair::shared()?,
        };
        Ok(Connector {
            inner: Arc::new(Inner {
                api: self.api,
                keys,
                proxy_port: self.proxy_port,
                refreshers: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        })
    }
}
