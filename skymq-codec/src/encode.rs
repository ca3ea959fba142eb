use bytes::{BufMut, BytesMut};

use crate::error::EncodeError;
use crate::packet::{Connect, Packet, SubscribeReturnCode};
use crate::props::Properties;
use crate::types::{control, Publish, QoS};
use crate::version::ProtocolVersion;
use crate::wire;

#[inline]
fn str_len(s: &str) -> usize {
    2 + s.len()
}

#[inline]
fn bin_len(b: &[u8]) -> usize {
    2 + b.len()
}

// A v5 variable header always carries a property section; an unset
// `properties` field becomes the empty section, a single zero byte.
#[inline]
fn props_len(ver: ProtocolVersion, props: &Option<Properties>) -> usize {
    match ver {
        ProtocolVersion::V311 => 0,
        ProtocolVersion::V5 => props.as_ref().map_or(1, Properties::encoded_len),
    }
}

fn write_props(
    ver: ProtocolVersion,
    props: &Option<Properties>,
    dst: &mut BytesMut,
) -> Result<(), EncodeError> {
    match (ver, props) {
        (ProtocolVersion::V311, _) => Ok(()),
        (ProtocolVersion::V5, Some(p)) => p.encode(dst),
        (ProtocolVersion::V5, None) => {
            dst.put_u8(0);
            Ok(())
        }
    }
}

/// Body size of `packet` in bytes, excluding the fixed header.
pub(crate) fn body_len(ver: ProtocolVersion, packet: &Packet) -> usize {
    match packet {
        Packet::Connect(c) => {
            let mut n = str_len(c.protocol.name()) + 4; // + level, flags, keep-alive
            n += props_len(ver, &c.properties) + str_len(&c.client_id);
            if let Some(will) = &c.last_will {
                n += props_len(ver, &will.properties) + str_len(&will.topic) + bin_len(&will.message);
            }
            if let Some(username) = &c.username {
                n += str_len(username);
            }
            if let Some(password) = &c.password {
                n += bin_len(password);
            }
            n
        }
        Packet::ConnAck(ack) => 2 + props_len(ver, &ack.properties),
        Packet::Publish(p) => {
            let id = if p.qos == QoS::AtMostOnce { 0 } else { 2 };
            str_len(&p.topic) + id + props_len(ver, &p.properties) + p.payload.len()
        }
        // v5 permits the bare-id success form for all four acks
        Packet::PubAck { .. } | Packet::PubRec { .. } | Packet::PubRel { .. } | Packet::PubComp { .. } => 2,
        Packet::Subscribe { filters, .. } => {
            2 + props_len(ver, &None) + filters.iter().map(|(f, _)| str_len(f) + 1).sum::<usize>()
        }
        Packet::SubAck { codes, .. } => 2 + props_len(ver, &None) + codes.len(),
        Packet::Unsubscribe { filters, .. } => {
            2 + props_len(ver, &None) + filters.iter().map(|f| str_len(f)).sum::<usize>()
        }
        Packet::UnsubAck { .. } => 2 + props_len(ver, &None),
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => 0,
    }
}

/// Writes the fixed header and the body; `body` must come from [`body_len`]
/// with the same version.
pub(crate) fn write_packet(
    ver: ProtocolVersion,
    packet: &Packet,
    body: u32,
    dst: &mut BytesMut,
) -> Result<(), EncodeError> {
    dst.put_u8(first_byte(packet));
    wire::write_var_int(body, dst);
    write_body(ver, packet, dst)
}

fn first_byte(packet: &Packet) -> u8 {
    if let Packet::Publish(p) = packet {
        let mut flags = p.qos.value() << 1;
        if p.dup {
            flags |= 0x08;
        }
        if p.retain {
            flags |= 0x01;
        }
        return control::PUBLISH | flags;
    }
    packet.type_byte()
}

fn write_body(ver: ProtocolVersion, packet: &Packet, dst: &mut BytesMut) -> Result<(), EncodeError> {
    match packet {
        Packet::Connect(c) => write_connect(ver, c, dst),
        Packet::ConnAck(ack) => {
            dst.put_u8(u8::from(ack.session_present));
            dst.put_u8(ack.code);
            write_props(ver, &ack.properties, dst)
        }
        Packet::Publish(p) => write_publish(ver, p, dst),
        Packet::PubAck { packet_id }
        | Packet::PubRec { packet_id }
        | Packet::PubRel { packet_id }
        | Packet::PubComp { packet_id } => {
            dst.put_u16(packet_id.get());
            Ok(())
        }
        Packet::Subscribe { packet_id, filters } => {
            dst.put_u16(packet_id.get());
            write_props(ver, &None, dst)?;
            for (filter, qos) in filters {
                wire::write_string(filter, dst)?;
                dst.put_u8(qos.value());
            }
            Ok(())
        }
        Packet::SubAck { packet_id, codes } => {
            dst.put_u16(packet_id.get());
            write_props(ver, &None, dst)?;
            for code in codes {
                dst.put_u8(match code {
                    SubscribeReturnCode::Success(qos) => qos.value(),
                    SubscribeReturnCode::Failure => 0x80,
                });
            }
            Ok(())
        }
        Packet::Unsubscribe { packet_id, filters } => {
            dst.put_u16(packet_id.get());
            write_props(ver, &None, dst)?;
            for filter in filters {
                wire::write_string(filter, dst)?;
            }
            Ok(())
        }
        Packet::UnsubAck { packet_id } => {
            dst.put_u16(packet_id.get());
            write_props(ver, &None, dst)
        }
        Packet::PingReq | Packet::PingResp | Packet::Disconnect => Ok(()),
    }
}

fn write_connect(ver: ProtocolVersion, c: &Connect, dst: &mut BytesMut) -> Result<(), EncodeError> {
    wire::write_string(c.protocol.name(), dst)?;
    dst.put_u8(c.protocol.level());

    let mut flags: u8 = 0;
    if c.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &c.last_will {
        flags |= 0x04 | (will.qos.value() << 3);
        if will.retain {
            flags |= 0x20;
        }
    }
    if c.username.is_some() {
        flags |= 0x80;
    }
    if c.password.is_some() {
        flags |= 0x40;
    }
    dst.put_u8(flags);
    dst.put_u16(c.keep_alive);

    write_props(ver, &c.properties, dst)?;
    wire::write_string(&c.client_id, dst)?;
    if let Some(will) = &c.last_will {
        write_props(ver, &will.properties, dst)?;
        wire::write_string(&will.topic, dst)?;
        wire::write_bytes(&will.message, dst)?;
    }
    if let Some(username) = &c.username {
        wire::write_string(username, dst)?;
    }
    if let Some(password) = &c.password {
        wire::write_bytes(password, dst)?;
    }
    Ok(())
}

fn write_publish(ver: ProtocolVersion, p: &Publish, dst: &mut BytesMut) -> Result<(), EncodeError> {
    wire::write_string(&p.topic, dst)?;
    match (p.qos, p.packet_id) {
        (QoS::AtMostOnce, None) => {}
        (QoS::AtMostOnce, Some(_)) => return Err(EncodeError::MalformedPacket),
        (_, Some(packet_id)) => dst.put_u16(packet_id.get()),
        (_, None) => return Err(EncodeError::PacketIdRequired),
    }
    write_props(ver, &p.properties, dst)?;
    dst.put_slice(&p.payload);
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU16;

    use bytes::Bytes;
    use bytestring::ByteString;

    use super::*;
    use crate::packet::LastWill;

    const V3: ProtocolVersion = ProtocolVersion::V311;
    const V5: ProtocolVersion = ProtocolVersion::V5;

    fn encoded(ver: ProtocolVersion, packet: &Packet) -> BytesMut {
        let mut dst = BytesMut::new();
        let body = body_len(ver, packet);
        write_packet(ver, packet, body as u32, &mut dst).unwrap();
        dst
    }

    #[test]
    fn test_connect_frame() {
        let connect = Connect {
            clean_session: true,
            keep_alive: 30,
            client_id: ByteString::from_static("cli9"),
            ..Default::default()
        };
        assert_eq!(
            encoded(V3, &Packet::Connect(Box::new(connect))).as_ref(),
            b"\x10\x10\x00\x04MQTT\x04\x02\x00\x1e\x00\x04cli9"
        );
    }

    #[test]
    fn test_connect_flag_byte() {
        let connect = Connect {
            client_id: ByteString::from_static("id"),
            keep_alive: 60,
            last_will: Some(LastWill {
                qos: QoS::AtLeastOnce,
                retain: true,
                topic: ByteString::from_static("alive"),
                message: Bytes::from_static(b"gone"),
                properties: None,
            }),
            username: Some(ByteString::from_static("u")),
            password: Some(Bytes::from_static(b"pw")),
            ..Default::default()
        };
        let frame = encoded(V3, &Packet::Connect(Box::new(connect)));
        // username, password, will retain, will qos 1, will; no clean session
        assert_eq!(frame[9], 0xec);
    }

    #[test]
    fn test_publish_frames() {
        let publish = Publish {
            dup: false,
            retain: true,
            qos: QoS::AtLeastOnce,
            topic: ByteString::from_static("dev/7"),
            packet_id: NonZeroU16::new(0x0141),
            payload: Bytes::from_static(b"on"),
            properties: None,
        };
        assert_eq!(
            encoded(V3, &Packet::Publish(publish.clone())).as_ref(),
            b"\x33\x0b\x00\x05dev/7\x01\x41on"
        );
        // the same publish under v5 grows by the empty property byte
        assert_eq!(
            encoded(V5, &Packet::Publish(publish)).as_ref(),
            b"\x33\x0c\x00\x05dev/7\x01\x41\x00on"
        );

        let bare = Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: ByteString::from_static("t"),
            packet_id: None,
            payload: Bytes::from_static(b"p"),
            properties: None,
        };
        assert_eq!(encoded(V3, &Packet::Publish(bare)).as_ref(), b"\x30\x04\x00\x01tp");
    }

    #[test]
    fn test_publish_id_rules() {
        let mut dst = BytesMut::new();
        let missing = Publish {
            dup: false,
            retain: false,
            qos: QoS::ExactlyOnce,
            topic: ByteString::from_static("t"),
            packet_id: None,
            payload: Bytes::new(),
            properties: None,
        };
        assert!(matches!(
            write_packet(V3, &Packet::Publish(missing), 5, &mut dst),
            Err(EncodeError::PacketIdRequired)
        ));

        let stray = Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: ByteString::from_static("t"),
            packet_id: NonZeroU16::new(3),
            payload: Bytes::new(),
            properties: None,
        };
        assert!(matches!(
            write_packet(V3, &Packet::Publish(stray), 3, &mut dst),
            Err(EncodeError::MalformedPacket)
        ));
    }

    #[test]
    fn test_small_frames() {
        assert_eq!(
            encoded(V3, &Packet::PubAck { packet_id: NonZeroU16::new(7).unwrap() }).as_ref(),
            b"\x40\x02\x00\x07"
        );
        assert_eq!(
            encoded(V3, &Packet::PubRel { packet_id: NonZeroU16::new(9).unwrap() }).as_ref(),
            b"\x62\x02\x00\x09"
        );
        assert_eq!(encoded(V3, &Packet::PingReq).as_ref(), b"\xc0\x00");
        assert_eq!(encoded(V3, &Packet::PingResp).as_ref(), b"\xd0\x00");
        assert_eq!(encoded(V3, &Packet::Disconnect).as_ref(), b"\xe0\x00");
    }

    #[test]
    fn test_subscription_frames() {
        let subscribe = Packet::Subscribe {
            packet_id: NonZeroU16::new(2).unwrap(),
            filters: vec![(ByteString::from_static("a/b"), QoS::AtLeastOnce)],
        };
        assert_eq!(encoded(V3, &subscribe).as_ref(), b"\x82\x08\x00\x02\x00\x03a/b\x01");

        let unsubscribe = Packet::Unsubscribe {
            packet_id: NonZeroU16::new(3).unwrap(),
            filters: vec![ByteString::from_static("x")],
        };
        assert_eq!(encoded(V3, &unsubscribe).as_ref(), b"\xa2\x05\x00\x03\x00\x01x");

        let sub_ack = Packet::SubAck {
            packet_id: NonZeroU16::new(2).unwrap(),
            codes: vec![SubscribeReturnCode::Success(QoS::ExactlyOnce), SubscribeReturnCode::Failure],
        };
        assert_eq!(encoded(V3, &sub_ack).as_ref(), b"\x90\x04\x00\x02\x02\x80");
    }

    #[test]
    fn test_body_len_matches_output() {
        let packets = [
            Packet::PingReq,
            Packet::Disconnect,
            Packet::UnsubAck { packet_id: NonZeroU16::new(4).unwrap() },
        ];
        for ver in [V3, V5] {
            for packet in &packets {
                let frame = encoded(ver, packet);
                let body = body_len(ver, packet);
                assert_eq!(frame.len(), 1 + crate::wire::var_int_len(body) + body);
            }
        }
    }
}
