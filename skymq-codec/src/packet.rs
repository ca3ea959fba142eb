use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::props::Properties;
use crate::types::{control, Protocol, Publish, QoS};

/// CONNACK code namespace of v3.1.1; 0 is the only success value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[repr(u8)]
pub enum ConnectAckReason {
    ConnectionAccepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServiceUnavailable = 3,
    BadUserNameOrPassword = 4,
    NotAuthorized = 5,
}

impl TryFrom<u8> for ConnectAckReason {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::ConnectionAccepted),
            1 => Ok(Self::UnacceptableProtocolVersion),
            2 => Ok(Self::IdentifierRejected),
            3 => Ok(Self::ServiceUnavailable),
            4 => Ok(Self::BadUserNameOrPassword),
            5 => Ok(Self::NotAuthorized),
            _ => Err(DecodeError::MalformedPacket),
        }
    }
}

impl ConnectAckReason {
    /// Human-readable meaning of the code.
    pub fn description(self) -> &'static str {
        match self {
            Self::ConnectionAccepted => "connection accepted",
            Self::UnacceptableProtocolVersion => "broker rejected the protocol version",
            Self::IdentifierRejected => "broker rejected the client id",
            Self::ServiceUnavailable => "broker unavailable",
            Self::BadUserNameOrPassword => "bad user name or password",
            Self::NotAuthorized => "not authorized",
        }
    }
}

/// Message the broker publishes on the client's behalf if the session dies
/// without a DisConnect.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LastWill {
    pub qos: QoS,
    pub retain: bool,
    pub topic: ByteString,
    pub message: Bytes,
    /// v5 will properties
    pub properties: Option<Properties>,
}

/// Session request, the first packet on every connection.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Connect {
    pub protocol: Protocol,
    /// Ask the broker to discard prior session state.
    pub clean_session: bool,
    /// Liveness interval in seconds; 0 disables the broker-side check.
    pub keep_alive: u16,
    pub last_will: Option<LastWill>,
    pub client_id: ByteString,
    pub username: Option<ByteString>,
    pub password: Option<Bytes>,
    /// v5 connect properties
    pub properties: Option<Properties>,
}

/// The broker's answer to Connect.
///
/// `code` is the raw acknowledge byte; 0 means accepted in both protocol
/// generations, and [`ConnectAckReason`] names the v3.1.1 meanings of 1
/// through 5.
#[derive(Debug, PartialEq, Eq, Clone, Default, Deserialize, Serialize)]
pub struct ConnAck {
    pub session_present: bool,
    pub code: u8,
    /// v5 connack properties
    pub properties: Option<Properties>,
}

/// Per-filter grant carried in a SubAck, positionally matching the request.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Deserialize, Serialize)]
pub enum SubscribeReturnCode {
    Success(QoS),
    Failure,
}

/// Control packets of both supported protocol generations, shaped for the
/// client side of the exchange.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Packet {
    Connect(Box<Connect>),
    ConnAck(ConnAck),
    Publish(Publish),
    /// Settles a QoS 1 publish.
    PubAck { packet_id: NonZeroU16 },
    /// Receiver's half-way answer in a QoS 2 handshake.
    PubRec { packet_id: NonZeroU16 },
    /// Sender's promise to finish a QoS 2 handshake.
    PubRel { packet_id: NonZeroU16 },
    /// Settles a QoS 2 publish.
    PubComp { packet_id: NonZeroU16 },
    Subscribe { packet_id: NonZeroU16, filters: Vec<(ByteString, QoS)> },
    /// One grant per requested filter, in request order.
    SubAck { packet_id: NonZeroU16, codes: Vec<SubscribeReturnCode> },
    Unsubscribe { packet_id: NonZeroU16, filters: Vec<ByteString> },
    UnsubAck { packet_id: NonZeroU16 },
    PingReq,
    PingResp,
    /// Graceful end of the session.
    Disconnect,
}

impl From<Connect> for Packet {
    fn from(connect: Connect) -> Packet {
        Packet::Connect(Box::new(connect))
    }
}

impl From<Publish> for Packet {
    fn from(publish: Publish) -> Packet {
        Packet::Publish(publish)
    }
}

impl Packet {
    /// Fixed-header first byte for this packet kind. For Publish this is
    /// the bare type nibble, its flag bits are filled in at encode time.
    pub fn type_byte(&self) -> u8 {
        match self {
            Packet::Connect(_) => control::CONNECT,
            Packet::ConnAck(_) => control::CONNACK,
            Packet::Publish(_) => control::PUBLISH,
            Packet::PubAck { .. } => control::PUBACK,
            Packet::PubRec { .. } => control::PUBREC,
            Packet::PubRel { .. } => control::PUBREL,
            Packet::PubComp { .. } => control::PUBCOMP,
            Packet::Subscribe { .. } => control::SUBSCRIBE,
            Packet::SubAck { .. } => control::SUBACK,
            Packet::Unsubscribe { .. } => control::UNSUBSCRIBE,
            Packet::UnsubAck { .. } => control::UNSUBACK,
            Packet::PingReq => control::PINGREQ,
            Packet::PingResp => control::PINGRESP,
            Packet::Disconnect => control::DISCONNECT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_byte_values() {
        assert_eq!(Packet::Connect(Box::default()).type_byte() >> 4, 0x1);
        assert_eq!(Packet::PubRel { packet_id: NonZeroU16::new(1).unwrap() }.type_byte(), 0x62);
        assert_eq!(Packet::PingReq.type_byte(), 0xc0);
        assert_eq!(Packet::Disconnect.type_byte(), 0xe0);
    }

    #[test]
    fn test_connack_reason_from_byte() {
        assert_eq!(ConnectAckReason::try_from(0).unwrap(), ConnectAckReason::ConnectionAccepted);
        assert_eq!(ConnectAckReason::try_from(5).unwrap(), ConnectAckReason::NotAuthorized);
        assert!(ConnectAckReason::try_from(6).is_err());
        assert_eq!(ConnectAckReason::ConnectionAccepted.description(), "connection accepted");
        assert_eq!(ConnectAckReason::ServiceUnavailable as u8, 3);
    }
}
