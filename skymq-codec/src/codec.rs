use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{DecodeError, EncodeError};
use crate::packet::Packet;
use crate::types::MAX_REMAINING_LENGTH;
use crate::version::ProtocolVersion;
use crate::wire;
use crate::{decode, encode};

/// Frame-level codec for one protocol generation.
///
/// Inbound frames above `max_packet_size` are rejected before their body is
/// buffered; a limit of 0 disables the check.
#[derive(Debug, Clone, Default)]
pub struct Codec {
    version: ProtocolVersion,
    max_packet_size: u32,
    /// Fixed header of a frame whose body has not fully arrived.
    pending: Option<(u8, usize)>,
}

impl Codec {
    pub fn new(version: ProtocolVersion) -> Self {
        Codec { version, max_packet_size: 0, pending: None }
    }

    /// Caps the remaining length of inbound and outbound frames.
    pub fn max_packet_size(mut self, limit: u32) -> Self {
        self.max_packet_size = limit;
        self
    }

    #[inline]
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }
}

impl Decoder for Codec {
    type Item = Packet;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, DecodeError> {
        let (type_byte, body_len) = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < 2 {
                    return Ok(None);
                }
                let Some((len, consumed)) = wire::read_remaining_length(&src[1..])? else {
                    return Ok(None);
                };
                if self.max_packet_size != 0 && len > self.max_packet_size {
                    return Err(DecodeError::MaxSizeExceeded);
                }
                let type_byte = src[0];
                src.advance(1 + consumed);
                let header = (type_byte, len as usize);
                self.pending = Some(header);
                header
            }
        };

        if src.len() < body_len {
            src.reserve(body_len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let body = src.split_to(body_len).freeze();
        decode::decode_packet(self.version, type_byte, body).map(Some)
    }
}

impl Encoder<Packet> for Codec {
    type Error = EncodeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
        let body = encode::body_len(self.version, &item);
        if body as u64 > u64::from(MAX_REMAINING_LENGTH) {
            return Err(EncodeError::InvalidLength);
        }
        if self.max_packet_size != 0 && body as u32 > self.max_packet_size {
            return Err(EncodeError::OverMaxPacketSize);
        }
        dst.reserve(1 + wire::var_int_len(body) + body);
        encode::write_packet(self.version, &item, body as u32, dst)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytes::{BufMut, Bytes};
    use bytestring::ByteString;

    use super::*;
    use crate::packet::{ConnAck, Connect, SubscribeReturnCode};
    use crate::props::Properties;
    use crate::types::{Publish, QoS};

    const V3: ProtocolVersion = ProtocolVersion::V311;
    const V5: ProtocolVersion = ProtocolVersion::V5;

    fn sample_publish(qos: QoS, id: Option<u16>) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos,
            topic: ByteString::from_static("env/1"),
            packet_id: id.and_then(NonZeroU16::new),
            payload: Bytes::from_static(b"21.5"),
            properties: None,
        }
    }

    fn pid(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    fn assert_roundtrip(version: ProtocolVersion, packet: Packet) {
        let mut codec = Codec::new(version);
        let mut buf = BytesMut::new();
        codec.encode(packet.clone(), &mut buf).unwrap();
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(packet));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_roundtrips_v3() {
        assert_roundtrip(
            V3,
            Packet::Connect(Box::new(Connect {
                clean_session: true,
                keep_alive: 45,
                client_id: ByteString::from_static("r1"),
                ..Default::default()
            })),
        );
        assert_roundtrip(V3, Packet::ConnAck(ConnAck { session_present: true, code: 0, properties: None }));
        assert_roundtrip(V3, Packet::Publish(sample_publish(QoS::AtMostOnce, None)));
        assert_roundtrip(V3, Packet::Publish(sample_publish(QoS::ExactlyOnce, Some(77))));
        assert_roundtrip(V3, Packet::PubRec { packet_id: pid(77) });
        assert_roundtrip(
            V3,
            Packet::Subscribe {
                packet_id: pid(8),
                filters: vec![(ByteString::from_static("env/+"), QoS::AtLeastOnce)],
            },
        );
        assert_roundtrip(
            V3,
            Packet::SubAck {
                packet_id: pid(8),
                codes: vec![SubscribeReturnCode::Success(QoS::AtLeastOnce), SubscribeReturnCode::Failure],
            },
        );
        assert_roundtrip(
            V3,
            Packet::Unsubscribe { packet_id: pid(9), filters: vec![ByteString::from_static("env/1")] },
        );
        assert_roundtrip(V3, Packet::UnsubAck { packet_id: pid(9) });
        assert_roundtrip(V3, Packet::PingReq);
        assert_roundtrip(V3, Packet::PingResp);
        assert_roundtrip(V3, Packet::Disconnect);
    }

    #[test]
    fn test_roundtrips_v5() {
        let mut publish = sample_publish(QoS::AtLeastOnce, Some(5));
        publish.properties = Some(Properties {
            topic_alias: NonZeroU16::new(4),
            user_properties: vec![(ByteString::from_static("k"), ByteString::from_static("v"))],
            ..Default::default()
        });
        assert_roundtrip(V5, Packet::Publish(publish));
        assert_roundtrip(
            V5,
            Packet::ConnAck(ConnAck {
                session_present: false,
                code: 0,
                properties: Some(Properties { server_keepalive: Some(20), ..Default::default() }),
            }),
        );
        assert_roundtrip(
            V5,
            Packet::Subscribe {
                packet_id: pid(3),
                filters: vec![(ByteString::from_static("a"), QoS::ExactlyOnce)],
            },
        );
        assert_roundtrip(V5, Packet::UnsubAck { packet_id: pid(2) });
    }

    #[test]
    fn test_drip_fed_frame() {
        let mut codec = Codec::new(V3);
        let mut full = BytesMut::new();
        codec.encode(Packet::Publish(sample_publish(QoS::AtLeastOnce, Some(3))), &mut full).unwrap();

        // feed the frame one byte at a time
        let mut partial = BytesMut::new();
        let mut decoded = None;
        for &byte in full.iter() {
            partial.put_u8(byte);
            if let Some(packet) = codec.decode(&mut partial).unwrap() {
                decoded = Some(packet);
            }
        }
        assert!(matches!(decoded, Some(Packet::Publish(_))));
        assert!(partial.is_empty());
    }

    #[test]
    fn test_inbound_size_limit() {
        let mut codec = Codec::new(V3).max_packet_size(16);
        // header claims a 32-byte body
        let mut buf = BytesMut::from(&b"\x30\x20"[..]);
        assert!(matches!(codec.decode(&mut buf), Err(DecodeError::MaxSizeExceeded)));
    }

    #[test]
    fn test_outbound_size_limit() {
        let mut codec = Codec::new(V3).max_packet_size(8);
        let mut publish = sample_publish(QoS::AtMostOnce, None);
        publish.payload = Bytes::from(vec![0u8; 64]);
        let mut buf = BytesMut::new();
        assert!(matches!(
            codec.encode(Packet::Publish(publish), &mut buf),
            Err(EncodeError::OverMaxPacketSize)
        ));
    }
}
