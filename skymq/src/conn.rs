//! Per-endpoint connection session.
//!
//! A session owns one transport and four loops: the send pump (drains the
//! shared outbound channel and the session-local logic-send queue), the
//! receive pump (decodes packets, routes ping responses to the keepalive
//! watchdog), the logic loop (advances the QoS state machines) and the
//! keepalive watchdog. Cancellation is two-level: the session token is a
//! child of the client token, so client shutdown stops every session while
//! a session failure stays local and the supervisor may dial a replacement.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::client::Shared;
use crate::codec::{Connect, Packet, Protocol, Publish, QoS, SubscribeReturnCode};
use crate::error::ClientError;
use crate::event::{notify_persist, Event};
use crate::net::{MqttError, MqttStream, PacketSink, PacketSource};
use crate::options::ClientOptions;
use crate::packet_id::OutboundOrigin;
use crate::persist::{recv_key, send_key};
use crate::types::{PacketId, TopicFilter, CODE_SUCCESS};
use crate::{ProtocolVersion, Result};

/// An established session, produced once the CONNACK handshake succeeded.
pub(crate) struct Conn {
    server: String,
    shared: Arc<Shared>,
    token: CancellationToken,
    logic_tx: mpsc::Sender<Packet>,
    net_rx: mpsc::Receiver<Packet>,
    ka_rx: Option<mpsc::Receiver<()>>,
    /// Inbound exactly-once publishes awaiting their PubRel.
    inbound: HashSet<PacketId>,
}

impl Conn {
    /// Spawns the send and receive pumps over `stream`, sends the Connect
    /// packet and awaits the CONNACK under the dial timeout.
    ///
    /// On any failure the session token is cancelled, which stops the pumps
    /// and drops the transport.
    pub(crate) async fn establish<Io>(
        shared: Arc<Shared>,
        server: String,
        version: ProtocolVersion,
        stream: MqttStream<Io>,
    ) -> Result<Conn>
    where
        Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let token = shared.token.child_token();
        let (sink, source) = stream.split();
        let (logic_tx, logic_rx) = mpsc::channel(1);
        let (net_tx, net_rx) = mpsc::channel(1);
        let (ka_tx, ka_rx) = mpsc::channel(1);

        shared.tracker.spawn(send_pump(sink, shared.clone(), server.clone(), logic_rx, token.clone()));
        shared.tracker.spawn(recv_pump(
            source,
            shared.clone(),
            server.clone(),
            net_tx,
            ka_tx,
            token.clone(),
        ));

        let mut conn = Conn {
            server,
            shared,
            token,
            logic_tx,
            net_rx,
            ka_rx: Some(ka_rx),
            inbound: HashSet::new(),
        };

        conn.send(connect_packet(&conn.shared.options, version)).await;

        if let Err(e) = conn.wait_connack().await {
            conn.token.cancel();
            return Err(e);
        }

        if conn.shared.options.clean_session {
            // the broker dropped its side of every flow, replaying ours is
            // meaningless
            let cleared = conn.shared.persist.clear().await;
            notify_persist(&conn.shared.event_tx, cleared).await;
        }

        Ok(conn)
    }

    /// First packet after Connect, under the dial-timeout deadline.
    async fn wait_connack(&mut self) -> Result<()> {
        match tokio::time::timeout(self.shared.options.dial_timeout, self.net_rx.recv()).await {
            Err(_) => Err(ClientError::ConnectTimeout.into()),
            Ok(None) => Err(ClientError::UnexpectedPacket.into()),
            Ok(Some(Packet::ConnAck(ack))) => {
                if ack.code == CODE_SUCCESS {
                    Ok(())
                } else {
                    Err(ClientError::ConnAck(ack.code).into())
                }
            }
            Ok(Some(other)) => {
                log::error!(
                    "expected CONNACK, got packet type: {}, server: {}",
                    other.type_byte(),
                    self.server
                );
                Err(ClientError::UnexpectedPacket.into())
            }
        }
    }

    /// Runs the session logic until the session ends; blocks the supervisor.
    pub(crate) async fn logic(mut self) {
        let options = &self.shared.options;
        if options.keepalive > Duration::ZERO {
            if let Some(ka_rx) = self.ka_rx.take() {
                self.shared.tracker.spawn(keepalive(
                    self.logic_tx.clone(),
                    ka_rx,
                    self.token.clone(),
                    options.keepalive,
                    options.keepalive_factor,
                    self.server.clone(),
                ));
            }
        }

        loop {
            let pkt = tokio::select! {
                _ = self.token.cancelled() => break,
                pkt = self.net_rx.recv() => match pkt {
                    Some(pkt) => pkt,
                    None => break,
                },
            };
            self.handle_packet(pkt).await;
        }

        // session over; stop the pumps and the watchdog, the transport goes
        // down with them
        self.token.cancel();
        log::debug!("exit logic, server: {}", self.server);
    }

    async fn handle_packet(&mut self, pkt: Packet) {
        match pkt {
            Packet::SubAck { packet_id, codes } => {
                let id = packet_id.get();
                log::trace!("received SubAck, id: {}", id);
                if let Some(OutboundOrigin::Subscribe(topics)) = self.shared.alloc.get(id) {
                    // overlay the server codes onto the requested topics,
                    // positionally, truncated to the shorter list
                    let granted: Vec<(TopicFilter, SubscribeReturnCode)> = topics
                        .iter()
                        .zip(codes.iter())
                        .map(|(topic, code)| (topic.filter.clone(), *code))
                        .collect();
                    log::debug!("subscribed topics: {:?}", granted);
                    self.emit(Event::Sub { topics: granted, err: None }).await;
                    self.shared.alloc.free(id);
                    self.persist_remove(send_key(id)).await;
                }
            }
            Packet::UnsubAck { packet_id } => {
                let id = packet_id.get();
                log::trace!("received UnSubAck, id: {}", id);
                if let Some(OutboundOrigin::Unsubscribe(topics)) = self.shared.alloc.get(id) {
                    log::debug!("unsubscribed topics: {:?}", topics);
                    self.emit(Event::Unsub { topics, err: None }).await;
                    self.shared.alloc.free(id);
                    self.persist_remove(send_key(id)).await;
                }
            }
            Packet::Publish(publish) => self.handle_inbound_publish(publish).await,
            Packet::PubAck { packet_id } => {
                let id = packet_id.get();
                log::trace!("received PubAck, id: {}", id);
                if let Some(OutboundOrigin::Publish(origin)) = self.shared.alloc.get(id) {
                    if origin.qos == QoS::AtLeastOnce {
                        log::debug!("published qos1 packet, topic: {}", origin.topic);
                        self.emit(Event::Pub { topic: origin.topic, err: None }).await;
                        self.shared.alloc.free(id);
                        self.persist_remove(send_key(id)).await;
                    }
                }
            }
            Packet::PubRec { packet_id } => {
                let id = packet_id.get();
                log::trace!("received PubRec, id: {}", id);
                if let Some(OutboundOrigin::Publish(origin)) = self.shared.alloc.get(id) {
                    if origin.qos == QoS::ExactlyOnce {
                        // id stays in flight until the PubComp
                        self.send(Packet::PubRel { packet_id }).await;
                    }
                }
            }
            Packet::PubRel { packet_id } => {
                let id = packet_id.get();
                log::trace!("received PubRel, id: {}", id);
                // inbound exactly-once: the broker releases a publish this
                // client answered with PubRec, possibly in a prior session
                let known = self.inbound.remove(&id)
                    || matches!(self.shared.persist.load(&recv_key(id)).await, Ok(Some(_)));
                if known {
                    self.persist_store(recv_key(id), Packet::PubRel { packet_id }).await;
                    self.send(Packet::PubComp { packet_id }).await;
                } else {
                    log::trace!("PubRel without matching inbound flow, id: {}", id);
                }
            }
            Packet::PubComp { packet_id } => {
                let id = packet_id.get();
                log::trace!("received PubComp, id: {}", id);
                if let Some(OutboundOrigin::Publish(origin)) = self.shared.alloc.get(id) {
                    if origin.qos == QoS::ExactlyOnce {
                        self.shared.alloc.free(id);
                        self.persist_remove(send_key(id)).await;
                        // idempotent resend; the flow is closed already, so
                        // the send pump records nothing for it and the
                        // duplicate PubComp it may provoke finds no origin
                        self.send(Packet::PubRel { packet_id }).await;
                        log::debug!("published qos2 packet, topic: {}", origin.topic);
                        self.emit(Event::Pub { topic: origin.topic, err: None }).await;
                    }
                }
            }
            other => {
                log::trace!("dropping unexpected packet, type: {}", other.type_byte());
            }
        }
    }

    async fn handle_inbound_publish(&mut self, publish: Publish) {
        log::trace!(
            "received publish, topic: {}, id: {:?}, qos: {:?}",
            publish.topic,
            publish.packet_id,
            publish.qos
        );

        // hand over to the router-dispatch loop
        tokio::select! {
            _ = self.token.cancelled() => return,
            sent = self.shared.inbound_tx.send_async(publish.clone()) => {
                if sent.is_err() {
                    return;
                }
            }
        }

        let Some(packet_id) = publish.packet_id else { return };
        let id = packet_id.get();
        match publish.qos {
            QoS::AtMostOnce => {}
            QoS::AtLeastOnce => {
                self.persist_store(recv_key(id), Packet::Publish(publish)).await;
                log::debug!("send PubAck for publish, id: {}", id);
                self.send(Packet::PubAck { packet_id }).await;
            }
            QoS::ExactlyOnce => {
                self.inbound.insert(id);
                self.persist_store(recv_key(id), Packet::Publish(publish)).await;
                log::debug!("send PubRec for publish, id: {}", id);
                self.send(Packet::PubRec { packet_id }).await;
            }
        }
    }

    /// Queues a protocol packet on the session-local logic-send channel.
    async fn send(&self, pkt: Packet) {
        tokio::select! {
            _ = self.token.cancelled() => {}
            _ = self.logic_tx.send(pkt) => {}
        }
    }

    async fn emit(&self, event: Event) {
        let _ = self.shared.event_tx.send(event).await;
    }

    async fn persist_store(&self, key: String, pkt: Packet) {
        let stored = self.shared.persist.store(&key, pkt).await;
        notify_persist(&self.shared.event_tx, stored).await;
    }

    async fn persist_remove(&self, key: String) {
        let removed = self.shared.persist.remove(&key).await;
        notify_persist(&self.shared.event_tx, removed).await;
    }
}

fn connect_packet(options: &ClientOptions, version: ProtocolVersion) -> Packet {
    Packet::Connect(Box::new(Connect {
        protocol: Protocol(version.level()),
        clean_session: options.clean_session,
        keep_alive: options.keepalive.as_secs() as u16,
        last_will: options.last_will.clone(),
        client_id: options.client_id.clone(),
        username: options.username.clone(),
        password: options.password.clone(),
        properties: None,
    }))
}

/// Drains the shared outbound channel and the session-local logic-send
/// queue, multiplexed; packets hit the wire in dequeue order.
async fn send_pump<Io>(
    mut sink: PacketSink<Io>,
    shared: Arc<Shared>,
    server: String,
    mut logic_rx: mpsc::Receiver<Packet>,
    token: CancellationToken,
) where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    log::trace!("start send pump, server: {}", server);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            pkt = shared.outbound_rx.recv_async() => {
                let Ok(pkt) = pkt else { break };
                if !write_packet(&mut sink, &shared, &server, pkt.clone(), &token).await {
                    break;
                }
                match pkt {
                    Packet::Publish(publish) if publish.qos == QoS::AtMostOnce => {
                        log::debug!("published qos0 packet, topic: {}", publish.topic);
                        let _ = shared
                            .event_tx
                            .send(Event::Pub { topic: publish.topic, err: None })
                            .await;
                    }
                    Packet::Disconnect => {
                        // graceful shutdown: the whole client stops once the
                        // DisConnect actually left the wire
                        shared.token.cancel();
                        break;
                    }
                    _ => {}
                }
            }
            pkt = logic_rx.recv() => {
                let Some(pkt) = pkt else { break };
                if !write_packet(&mut sink, &shared, &server, pkt.clone(), &token).await {
                    break;
                }
                match pkt {
                    Packet::PubRel { packet_id } => {
                        // sender persists its intent to complete the
                        // exactly-once flow; skipped for the resend of an
                        // already-closed flow
                        if shared.alloc.get(packet_id.get()).is_some() {
                            let stored = shared
                                .persist
                                .store(&send_key(packet_id.get()), Packet::PubRel { packet_id })
                                .await;
                            notify_persist(&shared.event_tx, stored).await;
                        }
                    }
                    Packet::PubAck { packet_id } => {
                        let removed = shared.persist.remove(&recv_key(packet_id.get())).await;
                        notify_persist(&shared.event_tx, removed).await;
                    }
                    Packet::PubComp { packet_id } => {
                        let removed = shared.persist.remove(&recv_key(packet_id.get())).await;
                        notify_persist(&shared.event_tx, removed).await;
                    }
                    _ => {}
                }
            }
        }
    }
    let _ = sink.close().await;
    log::trace!("exit send pump, server: {}", server);
}

/// Encode and flush; on failure emits a net event and terminates the
/// session, never the client.
async fn write_packet<Io>(
    sink: &mut PacketSink<Io>,
    shared: &Arc<Shared>,
    server: &str,
    pkt: Packet,
    token: &CancellationToken,
) -> bool
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    match sink.send(pkt).await {
        Ok(()) => true,
        Err(e) => {
            log::error!("write error, server: {}, err: {:?}", server, e);
            let _ = shared.event_tx.send(Event::Net { server: server.to_owned(), err: e.into() }).await;
            token.cancel();
            false
        }
    }
}

/// Reads decoded packets off the transport; ping responses pulse the
/// keepalive watchdog, everything else feeds the logic loop.
async fn recv_pump<Io>(
    mut source: PacketSource<Io>,
    shared: Arc<Shared>,
    server: String,
    net_tx: mpsc::Sender<Packet>,
    ka_tx: mpsc::Sender<()>,
    token: CancellationToken,
) where
    Io: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    loop {
        let item = tokio::select! {
            _ = token.cancelled() => break,
            item = source.next() => item,
        };
        match item {
            Some(Ok(Packet::PingResp)) => {
                log::debug!("received keepalive response");
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ka_tx.send(()) => {}
                }
            }
            Some(Ok(pkt)) => {
                tokio::select! {
                    _ = token.cancelled() => break,
                    sent = net_tx.send(pkt) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
            Some(Err(e)) => {
                log::error!("connection broken, server: {}, err: {:?}", server, e);
                let _ = shared.event_tx.send(Event::Net { server: server.clone(), err: e.into() }).await;
                token.cancel();
                break;
            }
            None => {
                log::info!("connection closed by peer, server: {}", server);
                let _ = shared
                    .event_tx
                    .send(Event::Net { server: server.clone(), err: MqttError::Closed.into() })
                    .await;
                token.cancel();
                break;
            }
        }
    }
    // dropping net_tx and ka_tx closes the session channels
    log::trace!("exit recv pump, server: {}", server);
}

/// Pings every `interval * 3/4`; cancels the session when no ping response
/// arrives within `interval * factor` of a ping.
async fn keepalive(
    logic_tx: mpsc::Sender<Packet>,
    mut ka_rx: mpsc::Receiver<()>,
    token: CancellationToken,
    interval: Duration,
    factor: f64,
    server: String,
) {
    log::debug!("start keepalive, server: {}", server);
    let timeout = interval.mul_f64(factor);
    let period = (interval * 3 / 4).max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // the first tick completes immediately

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        tokio::select! {
            _ = token.cancelled() => break,
            sent = logic_tx.send(Packet::PingReq) => {
                if sent.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            _ = token.cancelled() => break,
            pulse = ka_rx.recv() => match pulse {
                Some(()) => {} // pong arrived, the timeout window resets
                None => break,
            },
            _ = tokio::time::sleep(timeout) => {
                log::info!("keepalive timeout, server: {}", server);
                token.cancel();
                break;
            }
        }
    }
    log::debug!("stop keepalive, server: {}", server);
}
