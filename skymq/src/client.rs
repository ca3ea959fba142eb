//! Client supervisor and public API.
//!
//! One supervisor task per configured endpoint dials, runs the session
//! logic and reconnects with exponential backoff. User calls enqueue onto a
//! shared outbound channel drained by whichever session's send pump is
//! available; inbound publishes flow through a shared channel into the
//! router-dispatch loop; completion events reach user callbacks through the
//! event fan-out loop.

use std::num::NonZeroU16;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::backoff::Backoff;
use crate::codec::{ConnectAckReason, Packet, Publish, QoS, SubscribeReturnCode};
use crate::conn::Conn;
use crate::error::ClientError;
use crate::event::{fan_out, notify_persist, Event, Handlers};
use crate::net::Dialer;
use crate::options::ClientOptions;
use crate::packet_id::{OutboundOrigin, PacketIdAllocator};
use crate::persist::{send_key, NoopPersist, Persist};
use crate::router::{Router, TextRouter};
use crate::types::{
    ConnHandler, NetHandler, PersistHandler, PubHandler, SubHandler, Topic, TopicFilter, UnsubHandler,
    CODE_CONN_FAILED, CODE_SUCCESS,
};
use crate::{ProtocolVersion, Result};

/// State shared between the public API, every session and the fan-out
/// loops.
pub(crate) struct Shared {
    pub(crate) options: ClientOptions,
    pub(crate) outbound_tx: flume::Sender<Packet>,
    pub(crate) outbound_rx: flume::Receiver<Packet>,
    pub(crate) inbound_tx: flume::Sender<Publish>,
    pub(crate) inbound_rx: flume::Receiver<Publish>,
    pub(crate) event_tx: mpsc::Sender<Event>,
    pub(crate) alloc: PacketIdAllocator,
    pub(crate) persist: Arc<dyn Persist>,
    pub(crate) router: Arc<dyn Router>,
    pub(crate) token: CancellationToken,
    pub(crate) tracker: TaskTracker,
}

/// Asynchronous MQTT client.
pub struct Client {
    shared: Arc<Shared>,
    event_rx: Option<mpsc::Receiver<Event>>,
    handlers: Handlers,
}

impl Client {
    /// Builds a client from immutable options; fails when no endpoint is
    /// configured.
    pub fn new(options: ClientOptions) -> Result<Client> {
        if options.servers.is_empty() && options.secure_servers.is_empty() {
            return Err(ClientError::NoServers.into());
        }

        let (outbound_tx, outbound_rx) = flume::bounded(options.send_chan_capacity);
        let (inbound_tx, inbound_rx) = flume::bounded(options.recv_chan_capacity);
        let (event_tx, event_rx) = mpsc::channel(options.event_chan_capacity);

        let router = options.router.clone().unwrap_or_else(|| Arc::new(TextRouter::new()));
        let persist = options.persist.clone().unwrap_or_else(|| Arc::new(NoopPersist));

        let shared = Arc::new(Shared {
            options,
            outbound_tx,
            outbound_rx,
            inbound_tx,
            inbound_rx,
            event_tx,
            alloc: PacketIdAllocator::new(),
            persist,
            router,
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        });

        Ok(Client { shared, event_rx: Some(event_rx), handlers: Handlers::default() })
    }

    /// Registers a route for inbound publishes matching `filter`.
    pub fn handle<T, F>(&self, filter: T, handler: F)
    where
        T: Into<TopicFilter>,
        F: Fn(&Publish) + Send + Sync + 'static,
    {
        let filter = filter.into();
        log::debug!("registered topic handler, filter: {}", filter);
        self.shared.router.handle(filter, Arc::new(handler));
    }

    /// Called when a publish flow completes or fails.
    pub fn on_publish(&mut self, handler: PubHandler) {
        self.handlers.publish = Some(handler);
    }

    /// Called with the per-topic server codes after a SubAck.
    pub fn on_subscribe(&mut self, handler: SubHandler) {
        self.handlers.subscribe = Some(handler);
    }

    /// Called after an UnSubAck.
    pub fn on_unsubscribe(&mut self, handler: UnsubHandler) {
        self.handlers.unsubscribe = Some(handler);
    }

    /// Called on transport and decode failures.
    pub fn on_net_error(&mut self, handler: NetHandler) {
        self.handlers.net = Some(handler);
    }

    /// Called when the persistence capability reports an error.
    pub fn on_persist_error(&mut self, handler: PersistHandler) {
        self.handlers.persist = Some(handler);
    }

    /// Spawns one supervisor per configured endpoint plus the
    /// router-dispatch and event fan-out loops.
    ///
    /// `handler` is invoked once per connection attempt with the endpoint
    /// and the CONNACK code.
    pub fn connect(&mut self, handler: Option<ConnHandler>) {
        log::debug!("connect to all servers");

        for server in self.shared.options.servers.clone() {
            self.shared.tracker.spawn(supervise(self.shared.clone(), server, false, handler.clone()));
        }
        for server in self.shared.options.secure_servers.clone() {
            self.shared.tracker.spawn(supervise(self.shared.clone(), server, true, handler.clone()));
        }

        if let Some(event_rx) = self.event_rx.take() {
            self.shared.tracker.spawn(fan_out(
                event_rx,
                self.handlers.clone(),
                self.shared.token.clone(),
            ));
        }
        self.shared.tracker.spawn(dispatch_loop(self.shared.clone()));
        self.shared.tracker.close();
    }

    /// Publishes messages, one packet each.
    ///
    /// QoS is already clamped by construction (see
    /// [`crate::types::new_publish`]). A QoS >= 1 publish without an id gets
    /// one allocated and its packet stored under `S<id>` before it is
    /// enqueued; returns once every packet is enqueued.
    pub async fn publish<I>(&self, messages: I)
    where
        I: IntoIterator<Item = Publish>,
    {
        if self.is_closing() {
            return;
        }

        for mut publish in messages {
            if publish.qos != QoS::AtMostOnce && publish.packet_id.is_none() {
                let id = self.shared.alloc.next(OutboundOrigin::Publish(publish.clone()));
                let Some(packet_id) = NonZeroU16::new(id) else {
                    self.emit(Event::Pub {
                        topic: publish.topic.clone(),
                        err: Some(ClientError::PacketIdExhausted.into()),
                    })
                    .await;
                    continue;
                };
                publish.packet_id = Some(packet_id);
                let stored =
                    self.shared.persist.store(&send_key(id), Packet::Publish(publish.clone())).await;
                notify_persist(&self.shared.event_tx, stored).await;
            }
            self.enqueue(Packet::Publish(publish)).await;
        }
    }

    /// Subscribes to topics; the result arrives through the subscribe
    /// handler once the SubAck is processed.
    pub async fn subscribe(&self, topics: Vec<Topic>) {
        if self.is_closing() {
            return;
        }
        log::debug!("subscribe, topics: {:?}", topics);

        let id = self.shared.alloc.next(OutboundOrigin::Subscribe(topics.clone()));
        let Some(packet_id) = NonZeroU16::new(id) else {
            let requested = topics
                .into_iter()
                .map(|topic| (topic.filter, SubscribeReturnCode::Success(topic.qos)))
                .collect();
            self.emit(Event::Sub { topics: requested, err: Some(ClientError::PacketIdExhausted.into()) })
                .await;
            return;
        };

        let filters = topics.into_iter().map(|topic| (topic.filter, topic.qos)).collect();
        self.enqueue(Packet::Subscribe { packet_id, filters }).await;
    }

    /// Unsubscribes from topics; the result arrives through the unsubscribe
    /// handler once the UnSubAck is processed.
    pub async fn unsubscribe(&self, topics: Vec<TopicFilter>) {
        if self.is_closing() {
            return;
        }
        log::debug!("unsubscribe, topics: {:?}", topics);

        let id = self.shared.alloc.next(OutboundOrigin::Unsubscribe(topics.clone()));
        let Some(packet_id) = NonZeroU16::new(id) else {
            self.emit(Event::Unsub { topics, err: Some(ClientError::PacketIdExhausted.into()) }).await;
            return;
        };

        self.enqueue(Packet::Unsubscribe { packet_id, filters: topics }).await;
    }

    /// Disconnects from every broker.
    ///
    /// With `force` the client token is cancelled immediately; otherwise a
    /// DisConnect packet is enqueued and the client shuts down once it is
    /// written to a transport.
    pub async fn destroy(&self, force: bool) {
        log::debug!("destroying client, force: {}", force);
        if force {
            self.shared.token.cancel();
        } else {
            self.enqueue(Packet::Disconnect).await;
        }
    }

    /// Blocks until every worker task has exited.
    pub async fn wait(&self) {
        log::info!("waiting for all workers");
        self.shared.tracker.close();
        self.shared.tracker.wait().await;
    }

    fn is_closing(&self) -> bool {
        self.shared.token.is_cancelled()
    }

    async fn enqueue(&self, pkt: Packet) {
        tokio::select! {
            _ = self.shared.token.cancelled() => {}
            _ = self.shared.outbound_tx.send_async(pkt) => {}
        }
    }

    async fn emit(&self, event: Event) {
        let _ = self.shared.event_tx.send(event).await;
    }
}

/// Per-endpoint supervisor: dial, run the session, reconnect with backoff.
async fn supervise(shared: Arc<Shared>, server: String, secure: bool, handler: Option<ConnHandler>) {
    let options = &shared.options;
    let backoff = Backoff {
        first_delay: options.first_delay,
        max_delay: options.max_delay,
        factor: options.backoff_factor,
    };
    // failures since the last successful connection
    let mut nfail: u32 = 0;
    let mut version = options.version;

    while !shared.token.is_cancelled() {
        match try_connect(&shared, &server, secure, version).await {
            Ok(conn) => {
                nfail = 0;
                log::info!("connected to server: {}", server);
                if let Some(handler) = handler.clone() {
                    let server = server.clone();
                    shared.tracker.spawn(async move { handler(&server, CODE_SUCCESS, None) });
                }
                // login success, session logic blocks until termination
                conn.logic().await;
            }
            Err(err) => {
                nfail += 1;
                log::error!("connect failed, server: {}, failures: {}, err: {:?}", server, nfail, err);
                let code = match err.downcast_ref::<ClientError>() {
                    Some(ClientError::ConnAck(code)) => *code,
                    _ => CODE_CONN_FAILED,
                };
                if options.protocol_compromise
                    && version == ProtocolVersion::V5
                    && code == ConnectAckReason::UnacceptableProtocolVersion as u8
                {
                    log::warn!("falling back to v3.1.1, server: {}", server);
                    version = ProtocolVersion::V311;
                }
                if let Some(handler) = handler.clone() {
                    let server = server.clone();
                    shared.tracker.spawn(async move { handler(&server, code, Some(&err)) });
                }
            }
        }

        if shared.token.is_cancelled() || !options.auto_reconnect {
            return;
        }

        let delay = backoff.delay(nfail);
        log::warn!("reconnecting to server: {}, delay: {:?}", server, delay);
        tokio::select! {
            _ = shared.token.cancelled() => {}
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn try_connect(
    shared: &Arc<Shared>,
    server: &str,
    secure: bool,
    version: ProtocolVersion,
) -> Result<Conn> {
    let options = &shared.options;
    let dialer = Dialer::new(server)
        .version(version)
        .dial_timeout(options.dial_timeout)
        .max_packet_size(options.max_packet_size);

    #[cfg(feature = "tls")]
    {
        let tls_config = if secure {
            options.default_tls_config.clone().or_else(|| options.tls_config.clone())
        } else {
            options.tls_config.clone()
        };
        if secure && tls_config.is_none() {
            return Err(ClientError::NoTlsConfig.into());
        }
        if let Some(config) = tls_config {
            let stream = dialer.tls(config).await?;
            return Conn::establish(shared.clone(), server.to_owned(), version, stream).await;
        }
    }
    #[cfg(not(feature = "tls"))]
    if secure {
        return Err(ClientError::NoTlsConfig.into());
    }

    let stream = dialer.tcp().await?;
    Conn::establish(shared.clone(), server.to_owned(), version, stream).await
}

/// Single-consumer loop feeding the router with inbound publishes.
async fn dispatch_loop(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            _ = shared.token.cancelled() => return,
            publish = shared.inbound_rx.recv_async() => match publish {
                Ok(publish) => shared.router.dispatch(&publish),
                Err(_) => return,
            },
        }
    }
}
