use std::fmt;
use std::num::NonZeroU16;

use bytes::Bytes;
use bytestring::ByteString;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;
use crate::props::Properties;

/// Protocol name carried in the Connect variable header.
pub(crate) const PROTOCOL_NAME: &str = "MQTT";
/// Protocol level byte for v3.1.1
pub const MQTT_LEVEL_311: u8 = 4;
/// Protocol level byte for v5.0
pub const MQTT_LEVEL_5: u8 = 5;

/// Largest remaining length four var-int bytes can carry.
pub(crate) const MAX_REMAINING_LENGTH: u32 = 268_435_455;

/// Fixed-header first bytes. PUBLISH carries dup/qos/retain in its low
/// nibble; PUBREL, SUBSCRIBE and UNSUBSCRIBE require flag bits 0b0010; for
/// everything else the nibble is reserved as zero.
pub(crate) mod control {
    pub(crate) const CONNECT: u8 = 0x10;
    pub(crate) const CONNACK: u8 = 0x20;
    pub(crate) const PUBLISH: u8 = 0x30;
    pub(crate) const PUBACK: u8 = 0x40;
    pub(crate) const PUBREC: u8 = 0x50;
    pub(crate) const PUBREL: u8 = 0x62;
    pub(crate) const PUBCOMP: u8 = 0x70;
    pub(crate) const SUBSCRIBE: u8 = 0x82;
    pub(crate) const SUBACK: u8 = 0x90;
    pub(crate) const UNSUBSCRIBE: u8 = 0xa2;
    pub(crate) const UNSUBACK: u8 = 0xb0;
    pub(crate) const PINGREQ: u8 = 0xc0;
    pub(crate) const PINGRESP: u8 = 0xd0;
    pub(crate) const DISCONNECT: u8 = 0xe0;
}

/// Protocol level a Connect packet announces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct Protocol(pub u8);

impl Protocol {
    #[inline]
    pub fn name(self) -> &'static str {
        PROTOCOL_NAME
    }

    #[inline]
    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol(MQTT_LEVEL_311)
    }
}

/// Delivery guarantee of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum QoS {
    /// Fire and forget
    AtMostOnce = 0,
    /// Settled by a PubAck
    AtLeastOnce = 1,
    /// Settled by the PubRec/PubRel/PubComp handshake
    ExactlyOnce = 2,
}

impl QoS {
    #[inline]
    pub fn value(&self) -> u8 {
        *self as u8
    }

    /// Forces an arbitrary byte into the valid range; anything above 2
    /// becomes exactly-once.
    #[inline]
    pub fn clamp_from(v: u8) -> QoS {
        match v {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => QoS::ExactlyOnce,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<QoS, DecodeError> {
        match v {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            _ => Err(DecodeError::MalformedPacket),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos.value()
    }
}

/// An application message, inbound or outbound.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Publish {
    /// Redelivery of an earlier attempt
    pub dup: bool,
    /// The broker keeps this as the topic's retained message
    pub retain: bool,
    pub qos: QoS,
    pub topic: ByteString,
    /// Present exactly when qos is above 0
    pub packet_id: Option<NonZeroU16>,
    pub payload: Bytes,
    /// v5 properties, None on v3.1.1
    pub properties: Option<Properties>,
}

impl fmt::Debug for Publish {
    // payloads can hold application secrets, print the size only
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Publish {{ topic: {:?}, qos: {:?}, packet_id: {:?}, dup: {}, retain: {}, payload: {} bytes }}",
            self.topic,
            self.qos,
            self.packet_id,
            self.dup,
            self.retain,
            self.payload.len()
        )
    }
}
