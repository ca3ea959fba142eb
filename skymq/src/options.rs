use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use bytestring::ByteString;

#[cfg(feature = "tls")]
use skymq_net::rustls;

use crate::codec::{LastWill, ProtocolVersion, QoS};
use crate::persist::Persist;
use crate::router::Router;

/// Immutable per-client session options.
///
/// Built with chained setters and handed to [`crate::client::Client::new`];
/// nothing here changes after construction.
#[derive(Clone)]
pub struct ClientOptions {
    /// Plain `host:port` endpoints; dialed with TLS when `tls_config` is set.
    pub servers: Vec<String>,
    /// Endpoints always dialed with the default TLS config.
    pub secure_servers: Vec<String>,

    /// Capacity of the shared outbound packet channel.
    pub send_chan_capacity: usize,
    /// Capacity of the shared inbound publish channel.
    pub recv_chan_capacity: usize,
    /// Capacity of the event channel feeding the fan-out loop.
    pub event_chan_capacity: usize,

    /// Reconnect delay after the first failure.
    pub first_delay: Duration,
    /// Upper bound of the reconnect delay.
    pub max_delay: Duration,
    /// Reconnect delay growth factor, >= 1.
    pub backoff_factor: f64,

    /// Deadline for dial, TLS handshake and CONNACK wait.
    pub dial_timeout: Duration,

    /// Keepalive interval; 0 disables the watchdog.
    pub keepalive: Duration,
    /// Keepalive timeout factor, >= 1.
    pub keepalive_factor: f64,

    /// Protocol generation requested on connect.
    pub version: ProtocolVersion,
    /// Fall back to v3.1.1 when a v5 connect is rejected for its version.
    pub protocol_compromise: bool,

    pub username: Option<ByteString>,
    pub password: Option<Bytes>,
    pub client_id: ByteString,
    pub clean_session: bool,
    pub last_will: Option<LastWill>,

    /// Reconnect after a session ends; when false a supervisor gives up
    /// after its session exits for any reason.
    pub auto_reconnect: bool,

    /// Maximum allowed inbound packet size, 0 means unlimited.
    pub max_packet_size: u32,

    /// Routing capability; defaults to the literal-match [`crate::router::TextRouter`].
    pub router: Option<Arc<dyn Router>>,
    /// Persistence capability; defaults to [`crate::persist::NoopPersist`].
    pub persist: Option<Arc<dyn Persist>>,

    /// TLS applied to `servers` endpoints when present.
    #[cfg(feature = "tls")]
    pub tls_config: Option<Arc<rustls::ClientConfig>>,
    /// TLS applied to `secure_servers` endpoints.
    #[cfg(feature = "tls")]
    pub default_tls_config: Option<Arc<rustls::ClientConfig>>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions {
            servers: Vec::new(),
            secure_servers: Vec::new(),
            send_chan_capacity: 1,
            recv_chan_capacity: 1,
            event_chan_capacity: 10,
            first_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(120),
            backoff_factor: 1.5,
            dial_timeout: Duration::from_secs(20),
            keepalive: Duration::from_secs(120),
            keepalive_factor: 1.5,
            version: ProtocolVersion::V311,
            protocol_compromise: false,
            username: None,
            password: None,
            client_id: ByteString::new(),
            clean_session: false,
            last_will: None,
            auto_reconnect: false,
            max_packet_size: 0,
            router: None,
            persist: None,
            #[cfg(feature = "tls")]
            tls_config: None,
            #[cfg(feature = "tls")]
            default_tls_config: None,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn server<S: Into<String>>(mut self, addr: S) -> Self {
        self.servers.push(addr.into());
        self
    }

    pub fn secure_server<S: Into<String>>(mut self, addr: S) -> Self {
        self.secure_servers.push(addr.into());
        self
    }

    pub fn send_chan_capacity(mut self, capacity: usize) -> Self {
        self.send_chan_capacity = capacity.max(1);
        self
    }

    pub fn recv_chan_capacity(mut self, capacity: usize) -> Self {
        self.recv_chan_capacity = capacity.max(1);
        self
    }

    pub fn event_chan_capacity(mut self, capacity: usize) -> Self {
        self.event_chan_capacity = capacity.max(1);
        self
    }

    /// Reconnect policy, see [`crate::backoff::Backoff`].
    pub fn backoff(mut self, first_delay: Duration, max_delay: Duration, factor: f64) -> Self {
        self.first_delay = first_delay;
        self.max_delay = max_delay;
        self.backoff_factor = factor.max(1.0);
        self
    }

    pub fn dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Keepalive ping cadence; pings go out every `interval * 3/4`, the
    /// session dies after `interval * factor` without a ping response.
    pub fn keepalive(mut self, interval: Duration, factor: f64) -> Self {
        self.keepalive = interval;
        self.keepalive_factor = factor.max(1.0);
        self
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn protocol_compromise(mut self, compromise: bool) -> Self {
        self.protocol_compromise = compromise;
        self
    }

    pub fn identity<U, P>(mut self, username: U, password: P) -> Self
    where
        U: Into<ByteString>,
        P: Into<Bytes>,
    {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn client_id<S: Into<ByteString>>(mut self, client_id: S) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn clean_session(mut self, clean_session: bool) -> Self {
        self.clean_session = clean_session;
        self
    }

    pub fn will<T, M>(mut self, topic: T, qos: QoS, retain: bool, message: M) -> Self
    where
        T: Into<ByteString>,
        M: Into<Bytes>,
    {
        self.last_will =
            Some(LastWill { qos, retain, topic: topic.into(), message: message.into(), properties: None });
        self
    }

    pub fn auto_reconnect(mut self, auto_reconnect: bool) -> Self {
        self.auto_reconnect = auto_reconnect;
        self
    }

    pub fn max_packet_size(mut self, max_packet_size: u32) -> Self {
        self.max_packet_size = max_packet_size;
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn persist(mut self, persist: Arc<dyn Persist>) -> Self {
        self.persist = Some(persist);
        self
    }

    #[cfg(feature = "tls")]
    pub fn tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.tls_config = Some(config);
        self
    }

    #[cfg(feature = "tls")]
    pub fn default_tls_config(mut self, config: Arc<rustls::ClientConfig>) -> Self {
        self.default_tls_config = Some(config);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = ClientOptions::new();
        assert_eq!(opts.send_chan_capacity, 1);
        assert_eq!(opts.recv_chan_capacity, 1);
        assert_eq!(opts.event_chan_capacity, 10);
        assert_eq!(opts.first_delay, Duration::from_secs(5));
        assert_eq!(opts.max_delay, Duration::from_secs(120));
        assert_eq!(opts.backoff_factor, 1.5);
        assert_eq!(opts.dial_timeout, Duration::from_secs(20));
        assert_eq!(opts.keepalive, Duration::from_secs(120));
        assert_eq!(opts.keepalive_factor, 1.5);
        assert_eq!(opts.version, ProtocolVersion::V311);
        assert!(!opts.auto_reconnect);
    }

    #[test]
    fn test_factor_floor() {
        let opts = ClientOptions::new()
            .backoff(Duration::from_secs(1), Duration::from_secs(2), 0.5)
            .keepalive(Duration::from_secs(4), 0.1);
        assert_eq!(opts.backoff_factor, 1.0);
        assert_eq!(opts.keepalive_factor, 1.0);
    }
}
