use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use skymq_codec::{Codec, Packet, ProtocolVersion};

use crate::error::MqttError;
use crate::{Error, Result};

/// Write half of a split session stream, owned by the send pump.
pub type PacketSink<Io> = SplitSink<Framed<Io, Codec>, Packet>;
/// Read half of a split session stream, owned by the receive pump.
pub type PacketSource<Io> = SplitStream<Framed<Io, Codec>>;

/// A framed MQTT connection to one broker endpoint.
#[derive(Debug)]
pub struct MqttStream<Io> {
    pub io: Framed<Io, Codec>,
}

impl<Io> MqttStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(io: Io, version: ProtocolVersion, max_packet_size: u32) -> Self {
        let codec = Codec::new(version).max_packet_size(max_packet_size);
        MqttStream { io: Framed::new(io, codec) }
    }

    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.io.codec().version()
    }

    /// Splits the stream so the send and receive pumps can run as
    /// independent tasks over the same transport.
    #[inline]
    pub fn split(self) -> (PacketSink<Io>, PacketSource<Io>) {
        self.io.split()
    }

    /// Encode and flush one packet.
    #[inline]
    pub async fn send(&mut self, packet: Packet) -> Result<()> {
        self.io.send(packet).await?;
        Ok(())
    }

    #[inline]
    pub async fn flush(&mut self) -> Result<()> {
        self.io.flush().await.map_err(Error::from)
    }

    #[inline]
    pub async fn close(&mut self) -> Result<()> {
        self.io.close().await.map_err(Error::from)
    }

    /// Receive the next packet, `Ok(None)` on a clean peer close.
    #[inline]
    pub async fn recv(&mut self, tm: Duration) -> Result<Option<Packet>> {
        match tokio::time::timeout(tm, self.next()).await {
            Ok(Some(Ok(packet))) => Ok(Some(packet)),
            Ok(Some(Err(e))) => Err(e),
            Ok(None) => Ok(None),
            Err(_) => Err(MqttError::ReadTimeout.into()),
        }
    }
}

impl<Io> futures::Stream for MqttStream<Io>
where
    Io: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Packet>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let next = Pin::new(&mut self.io).poll_next(cx);
        Poll::Ready(match futures::ready!(next) {
            Some(Ok(packet)) => Some(Ok(packet)),
            Some(Err(e)) => Some(Err(Error::from(e))),
            None => None,
        })
    }
}
