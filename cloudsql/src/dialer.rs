//! Dialing: preference-ordered address selection, TCP connect, TLS handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::errors::Error;
use crate::prelude::{debug, warn};
use crate::refresher::{InstanceRefresher, IP_TYPE_PRIVATE, IP_TYPE_PUBLIC};

/// Port the instance-side proxy listens on for authenticated connections.
pub const PROXY_PORT: u16 = 3307;

/// Address-type preference order used when the caller does not specify one.
pub const DEFAULT_IP_TYPES: [&str; 2] = [IP_TYPE_PUBLIC, IP_TYPE_PRIVATE];

/// Dials the instance using one refresh-cycle snapshot: the address, the
/// client certificate, and the trust anchor all come from the same cycle.
pub(crate) async fn dial(
    refresher: &Arc<InstanceRefresher>,
    preferences: &[String],
    port: u16,
) -> Result<TlsStream<TcpStream>, Error> {
    let data = refresher.current_data().await?;
    let name = refresher.name();

    let ip = data
        .metadata()
        .preferred_ip(preferences)
        .ok_or_else(|| Error::NoMatchingIp {
            name: name.to_string(),
            preferences: preferences.to_vec(),
        })?;
    let address = SocketAddr::new(ip, port);

    debug!("[{name}] connecting to {address}");
    let stream = TcpStream::connect(address)
        .await
        .map_err(|source| Error::Connect {
            name: name.to_string(),
            address,
            source,
        })?;

    let connector = TlsConnector::from(data.tls_config());
    let server_name = ServerName::IpAddress(ip.into());
    match connector.connect(server_name, stream).await {
        Ok(tls_stream) => Ok(tls_stream),
        Err(source) => {
            // Stale credentials are the usual cause; nudge the engine. The
            // caller decides whether to retry the dial.
            warn!("[{name}] TLS handshake failed; requesting a credential refresh");
            let _ = refresher.force_refresh();
            Err(Error::Handshake {
                name: name.to_string(),
                source,
            })
        }
    }
}
