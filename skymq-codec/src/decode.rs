use std::num::NonZeroU16;

use bytes::Bytes;

use crate::error::DecodeError;
use crate::packet::{ConnAck, Connect, LastWill, Packet, SubscribeReturnCode};
use crate::props::Properties;
use crate::types::{Protocol, Publish, QoS, PROTOCOL_NAME};
use crate::version::ProtocolVersion;
use crate::wire;

/// Decodes one packet body; `type_byte` is the first byte of the frame.
pub(crate) fn decode_packet(
    ver: ProtocolVersion,
    type_byte: u8,
    mut body: Bytes,
) -> Result<Packet, DecodeError> {
    let flags = type_byte & 0x0f;
    match type_byte >> 4 {
        0x1 => {
            fixed_flags(flags, 0)?;
            decode_connect(ver, &mut body)
        }
        0x2 => {
            fixed_flags(flags, 0)?;
            decode_conn_ack(ver, &mut body)
        }
        0x3 => decode_publish(ver, flags, &mut body),
        0x4 => {
            fixed_flags(flags, 0)?;
            Ok(Packet::PubAck { packet_id: read_ack_id(ver, &mut body)? })
        }
        0x5 => {
            fixed_flags(flags, 0)?;
            Ok(Packet::PubRec { packet_id: read_ack_id(ver, &mut body)? })
        }
        0x6 => {
            fixed_flags(flags, 0x2)?;
            Ok(Packet::PubRel { packet_id: read_ack_id(ver, &mut body)? })
        }
        0x7 => {
            fixed_flags(flags, 0)?;
            Ok(Packet::PubComp { packet_id: read_ack_id(ver, &mut body)? })
        }
        0x8 => {
            fixed_flags(flags, 0x2)?;
            decode_subscribe(ver, &mut body)
        }
        0x9 => {
            fixed_flags(flags, 0)?;
            decode_sub_ack(ver, &mut body)
        }
        0xa => {
            fixed_flags(flags, 0x2)?;
            decode_unsubscribe(ver, &mut body)
        }
        0xb => {
            fixed_flags(flags, 0)?;
            decode_unsub_ack(ver, &mut body)
        }
        0xc => {
            fixed_flags(flags, 0)?;
            Ok(Packet::PingReq)
        }
        0xd => {
            fixed_flags(flags, 0)?;
            Ok(Packet::PingResp)
        }
        0xe => {
            fixed_flags(flags, 0)?;
            // a v5 broker may attach a reason code and properties here; the
            // session is torn down either way, so the body goes unexamined
            Ok(Packet::Disconnect)
        }
        _ => Err(DecodeError::UnsupportedPacketType),
    }
}

/// Every kind except Publish fixes its flag nibble.
fn fixed_flags(flags: u8, want: u8) -> Result<(), DecodeError> {
    if flags == want {
        Ok(())
    } else {
        Err(DecodeError::ReservedFlags)
    }
}

/// v5 tacks an optional reason code and properties onto the two-byte acks.
/// The flows in this client are keyed by packet id alone, so that tail is
/// skipped; v3.1.1 allows nothing after the id.
fn read_ack_id(ver: ProtocolVersion, body: &mut Bytes) -> Result<NonZeroU16, DecodeError> {
    let packet_id = wire::read_packet_id(body)?;
    if ver == ProtocolVersion::V311 && !body.is_empty() {
        return Err(DecodeError::InvalidLength);
    }
    Ok(packet_id)
}

fn read_props(ver: ProtocolVersion, body: &mut Bytes) -> Result<Option<Properties>, DecodeError> {
    match ver {
        ProtocolVersion::V311 => Ok(None),
        ProtocolVersion::V5 => Properties::decode(body).map(Some),
    }
}

fn decode_connect(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let name = wire::read_string(body)?;
    if name.as_bytes() != PROTOCOL_NAME.as_bytes() {
        return Err(DecodeError::InvalidProtocol);
    }
    let level = wire::read_u8(body)?;
    if level != ver.level() {
        return Err(DecodeError::UnsupportedProtocolLevel);
    }
    let flags = wire::read_u8(body)?;
    if flags & 0x01 != 0 {
        return Err(DecodeError::ReservedFlags);
    }
    let keep_alive = wire::read_u16(body)?;
    let properties = read_props(ver, body)?;
    let client_id = wire::read_string(body)?;

    let last_will = if flags & 0x04 != 0 {
        let will_props = read_props(ver, body)?;
        let topic = wire::read_string(body)?;
        let message = wire::read_bytes(body)?;
        Some(LastWill {
            qos: QoS::try_from((flags >> 3) & 0x03)?,
            retain: flags & 0x20 != 0,
            topic,
            message,
            properties: will_props,
        })
    } else if flags & 0x38 != 0 {
        // will qos or will retain without the will flag itself
        return Err(DecodeError::MalformedPacket);
    } else {
        None
    };

    let username = if flags & 0x80 != 0 { Some(wire::read_string(body)?) } else { None };
    let password = if flags & 0x40 != 0 { Some(wire::read_bytes(body)?) } else { None };

    Ok(Connect {
        protocol: Protocol(level),
        clean_session: flags & 0x02 != 0,
        keep_alive,
        last_will,
        client_id,
        username,
        password,
        properties,
    }
    .into())
}

fn decode_conn_ack(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let ack_flags = wire::read_u8(body)?;
    if ack_flags & !0x01 != 0 {
        return Err(DecodeError::ReservedFlags);
    }
    let code = wire::read_u8(body)?;
    let properties = read_props(ver, body)?;
    Ok(Packet::ConnAck(ConnAck { session_present: ack_flags & 0x01 != 0, code, properties }))
}

fn decode_publish(ver: ProtocolVersion, flags: u8, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let topic = wire::read_string(body)?;
    let packet_id = match qos {
        QoS::AtMostOnce => None,
        _ => Some(wire::read_packet_id(body)?),
    };
    let properties = read_props(ver, body)?;
    Ok(Packet::Publish(Publish {
        dup: flags & 0x08 != 0,
        retain: flags & 0x01 != 0,
        qos,
        topic,
        packet_id,
        payload: std::mem::take(body),
        properties,
    }))
}

fn decode_subscribe(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = wire::read_packet_id(body)?;
    read_props(ver, body)?;
    let mut filters = Vec::new();
    while !body.is_empty() {
        let filter = wire::read_string(body)?;
        let opts = wire::read_u8(body)?;
        filters.push((filter, QoS::try_from(opts & 0x03)?));
    }
    if filters.is_empty() {
        return Err(DecodeError::MalformedPacket);
    }
    Ok(Packet::Subscribe { packet_id, filters })
}

fn decode_sub_ack(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = wire::read_packet_id(body)?;
    read_props(ver, body)?;
    let mut codes = Vec::with_capacity(body.len());
    while !body.is_empty() {
        let code = wire::read_u8(body)?;
        codes.push(if code & 0x80 != 0 {
            SubscribeReturnCode::Failure
        } else {
            SubscribeReturnCode::Success(QoS::try_from(code)?)
        });
    }
    Ok(Packet::SubAck { packet_id, codes })
}

fn decode_unsubscribe(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = wire::read_packet_id(body)?;
    read_props(ver, body)?;
    let mut filters = Vec::new();
    while !body.is_empty() {
        filters.push(wire::read_string(body)?);
    }
    if filters.is_empty() {
        return Err(DecodeError::MalformedPacket);
    }
    Ok(Packet::Unsubscribe { packet_id, filters })
}

fn decode_unsub_ack(ver: ProtocolVersion, body: &mut Bytes) -> Result<Packet, DecodeError> {
    let packet_id = wire::read_packet_id(body)?;
    if ver == ProtocolVersion::V5 {
        Properties::decode(body)?;
        // the per-filter reason codes that follow go uninspected
    } else if !body.is_empty() {
        return Err(DecodeError::InvalidLength);
    }
    Ok(Packet::UnsubAck { packet_id })
}

#[cfg(test)]
mod tests {
    use bytestring::ByteString;

    use super::*;

    const V3: ProtocolVersion = ProtocolVersion::V311;
    const V5: ProtocolVersion = ProtocolVersion::V5;

    fn body(bytes: &'static [u8]) -> Bytes {
        Bytes::from_static(bytes)
    }

    fn pid(v: u16) -> NonZeroU16 {
        NonZeroU16::new(v).unwrap()
    }

    #[test]
    fn test_connect() {
        let pkt = decode_packet(V3, 0x10, body(b"\x00\x04MQTT\x04\x02\x00\x1e\x00\x04cli9")).unwrap();
        let Packet::Connect(c) = pkt else { panic!("not a connect") };
        assert_eq!(c.client_id, "cli9");
        assert_eq!(c.keep_alive, 30);
        assert!(c.clean_session);
        assert!(c.last_will.is_none());
        assert!(c.username.is_none() && c.password.is_none());
    }

    #[test]
    fn test_connect_with_will_and_credentials() {
        // flags 0xee: username, password, will retain, will qos 1, will, clean session
        let raw = b"\x00\x04MQTT\x04\xee\x00\x3c\x00\x02id\x00\x05alive\x00\x04gone\x00\x01u\x00\x02pw";
        let Packet::Connect(c) = decode_packet(V3, 0x10, body(raw)).unwrap() else { panic!() };
        let will = c.last_will.expect("will present");
        assert_eq!(will.topic, "alive");
        assert_eq!(will.message.as_ref(), b"gone");
        assert_eq!(will.qos, QoS::AtLeastOnce);
        assert!(will.retain);
        assert_eq!(c.username.as_deref(), Some("u"));
        assert_eq!(c.password.as_deref(), Some(&b"pw"[..]));
    }

    #[test]
    fn test_connect_rejects() {
        // wrong protocol name
        assert!(matches!(
            decode_packet(V3, 0x10, body(b"\x00\x04MQTV\x04\x02\x00\x1e\x00\x01a")),
            Err(DecodeError::InvalidProtocol)
        ));
        // v5 level on a v3 connection
        assert!(matches!(
            decode_packet(V3, 0x10, body(b"\x00\x04MQTT\x05\x02\x00\x1e\x00\x01a")),
            Err(DecodeError::UnsupportedProtocolLevel)
        ));
        // reserved connect flag bit 0
        assert!(matches!(
            decode_packet(V3, 0x10, body(b"\x00\x04MQTT\x04\x03\x00\x1e\x00\x01a")),
            Err(DecodeError::ReservedFlags)
        ));
        // will qos set while the will flag is clear
        assert!(matches!(
            decode_packet(V3, 0x10, body(b"\x00\x04MQTT\x04\x0a\x00\x1e\x00\x01a")),
            Err(DecodeError::MalformedPacket)
        ));
    }

    #[test]
    fn test_conn_ack() {
        let Packet::ConnAck(ack) = decode_packet(V3, 0x20, body(b"\x00\x05")).unwrap() else { panic!() };
        assert!(!ack.session_present);
        assert_eq!(ack.code, 5);

        let Packet::ConnAck(ack) = decode_packet(V5, 0x20, body(b"\x01\x00\x00")).unwrap() else { panic!() };
        assert!(ack.session_present);
        assert_eq!(ack.code, 0);
        assert_eq!(ack.properties, Some(Properties::default()));

        assert!(matches!(decode_packet(V3, 0x20, body(b"\x02\x00")), Err(DecodeError::ReservedFlags)));
    }

    #[test]
    fn test_publish() {
        // flags 0b0011: qos 1 + retain
        let Packet::Publish(p) = decode_packet(V3, 0x33, body(b"\x00\x05dev/7\x01\x41on")).unwrap() else {
            panic!()
        };
        assert_eq!(p.topic, "dev/7");
        assert_eq!(p.packet_id, Some(pid(0x0141)));
        assert_eq!(p.qos, QoS::AtLeastOnce);
        assert!(p.retain && !p.dup);
        assert_eq!(p.payload.as_ref(), b"on");

        // qos 0 has no packet id, the rest of the body is payload
        let Packet::Publish(p) = decode_packet(V3, 0x30, body(b"\x00\x01t payload")).unwrap() else {
            panic!()
        };
        assert!(p.packet_id.is_none());
        assert_eq!(p.payload.as_ref(), b" payload");

        // flags 0b0110 claim qos 3
        assert!(decode_packet(V3, 0x36, body(b"\x00\x01t\x00\x01")).is_err());
    }

    #[test]
    fn test_id_acks() {
        assert_eq!(decode_packet(V3, 0x40, body(b"\x00\x07")).unwrap(), Packet::PubAck { packet_id: pid(7) });
        assert_eq!(decode_packet(V3, 0x50, body(b"\x00\x08")).unwrap(), Packet::PubRec { packet_id: pid(8) });
        assert_eq!(decode_packet(V3, 0x62, body(b"\x00\x09")).unwrap(), Packet::PubRel { packet_id: pid(9) });
        assert_eq!(
            decode_packet(V3, 0x70, body(b"\x01\x00")).unwrap(),
            Packet::PubComp { packet_id: pid(256) }
        );
        assert_eq!(
            decode_packet(V3, 0xb0, body(b"\x00\x01")).unwrap(),
            Packet::UnsubAck { packet_id: pid(1) }
        );

        // PubRel must carry the 0b0010 flag nibble
        assert!(matches!(decode_packet(V3, 0x60, body(b"\x00\x09")), Err(DecodeError::ReservedFlags)));
        // a packet id of zero is never valid
        assert!(decode_packet(V3, 0x40, body(b"\x00\x00")).is_err());
        // v3 allows nothing after the id, v5 may append a reason and properties
        assert!(decode_packet(V3, 0x40, body(b"\x00\x07\x00")).is_err());
        assert!(decode_packet(V5, 0x40, body(b"\x00\x07\x10\x00")).is_ok());
    }

    #[test]
    fn test_subscriptions() {
        let Packet::Subscribe { packet_id, filters } =
            decode_packet(V3, 0x82, body(b"\x00\x02\x00\x03a/b\x01\x00\x01c\x02")).unwrap()
        else {
            panic!()
        };
        assert_eq!(packet_id, pid(2));
        assert_eq!(
            filters,
            vec![
                (ByteString::from_static("a/b"), QoS::AtLeastOnce),
                (ByteString::from_static("c"), QoS::ExactlyOnce),
            ]
        );

        let Packet::SubAck { packet_id, codes } =
            decode_packet(V3, 0x90, body(b"\x00\x02\x01\x80")).unwrap()
        else {
            panic!()
        };
        assert_eq!(packet_id, pid(2));
        assert_eq!(codes, vec![SubscribeReturnCode::Success(QoS::AtLeastOnce), SubscribeReturnCode::Failure]);

        let Packet::Unsubscribe { packet_id, filters } =
            decode_packet(V3, 0xa2, body(b"\x00\x03\x00\x01x")).unwrap()
        else {
            panic!()
        };
        assert_eq!(packet_id, pid(3));
        assert_eq!(filters, vec![ByteString::from_static("x")]);

        // an empty filter list is malformed
        assert!(decode_packet(V3, 0x82, body(b"\x00\x02")).is_err());
    }

    #[test]
    fn test_bodyless_packets() {
        assert_eq!(decode_packet(V3, 0xc0, body(b"")).unwrap(), Packet::PingReq);
        assert_eq!(decode_packet(V3, 0xd0, body(b"")).unwrap(), Packet::PingResp);
        assert_eq!(decode_packet(V3, 0xe0, body(b"")).unwrap(), Packet::Disconnect);
        assert!(matches!(decode_packet(V3, 0x00, body(b"")), Err(DecodeError::UnsupportedPacketType)));
    }
}
