use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

#[cfg(feature = "tls")]
use std::sync::Arc;
#[cfg(feature = "tls")]
use tokio_rustls::{client::TlsStream, rustls::pki_types::ServerName, rustls::ClientConfig, TlsConnector};

use skymq_codec::ProtocolVersion;

use crate::error::MqttError;
use crate::stream::MqttStream;
use crate::Result;

/// Factory for outbound broker connections.
///
/// The whole dial, TCP connect plus the optional TLS handshake, runs under
/// one `dial_timeout` deadline.
#[derive(Clone, Debug)]
pub struct Dialer {
    /// Broker endpoint, `host:port`.
    pub server: String,
    /// Protocol generation spoken on this connection.
    pub version: ProtocolVersion,
    /// Deadline for the whole connection establishment.
    pub dial_timeout: Duration,
    /// Maximum allowed inbound packet size, 0 means unlimited.
    pub max_packet_size: u32,
}

impl Dialer {
    pub fn new<S: Into<String>>(server: S) -> Self {
        Dialer {
            server: server.into(),
            version: ProtocolVersion::V311,
            dial_timeout: Duration::from_secs(20),
            max_packet_size: 0,
        }
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    /// Dial a plain TCP endpoint.
    pub async fn tcp(&self) -> Result<MqttStream<TcpStream>> {
        let io = tokio::time::timeout(self.dial_timeout, TcpStream::connect(self.server.as_str()))
            .await
            .map_err(|_| MqttError::ConnectTimeout)??;
        io.set_nodelay(true)?;
        log::debug!("tcp connected, server: {}", self.server);
        Ok(self.framed(io))
    }

    /// Dial a TLS endpoint: TCP connect and rustls client handshake, both
    /// under the same deadline.
    #[cfg(feature = "tls")]
    pub async fn tls(&self, config: Arc<ClientConfig>) -> Result<MqttStream<TlsStream<TcpStream>>> {
        let host = self.server.rsplit_once(':').map(|(h, _)| h).unwrap_or(self.server.as_str());
        let name = ServerName::try_from(host.to_owned())
            .map_err(|_| MqttError::InvalidServerName(host.to_owned()))?;

        let io = tokio::time::timeout(self.dial_timeout, async {
            let tcp = TcpStream::connect(self.server.as_str()).await?;
            tcp.set_nodelay(true)?;
            TlsConnector::from(config).connect(name, tcp).await
        })
        .await
        .map_err(|_| MqttError::ConnectTimeout)??;
        log::debug!("tls connected, server: {}", self.server);
        Ok(self.framed(io))
    }

    /// Wraps an already-established transport, used by in-process tests and
    /// by broker ends of scripted connections.
    pub fn framed<Io>(&self, io: Io) -> MqttStream<Io>
    where
        Io: AsyncRead + AsyncWrite + Unpin,
    {
        MqttStream::new(io, self.version, self.max_packet_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_timeout() {
        // 192.0.2.0/24 is TEST-NET-1, nothing routes there
        let dialer = Dialer::new("192.0.2.1:1883").dial_timeout(Duration::from_millis(50));
        let err = dialer.tcp().await.unwrap_err();
        // either our own deadline fired or the OS refused faster
        let _ = err;
    }

    #[tokio::test]
    async fn test_tcp_dial() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = Dialer::new(addr.to_string()).tcp().await.unwrap();
        assert_eq!(stream.version(), ProtocolVersion::V311);
        accept.await.unwrap();
    }
}
