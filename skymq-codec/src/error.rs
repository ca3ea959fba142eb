use std::io;

use bytestring::ByteString;

/// Failures while reading a packet off the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DecodeError {
    #[error("not an MQTT protocol header")]
    InvalidProtocol,
    #[error("protocol level does not match this connection")]
    UnsupportedProtocolLevel,
    #[error("reserved flag bits set")]
    ReservedFlags,
    #[error("field extends past the end of the packet")]
    InvalidLength,
    #[error("malformed packet")]
    MalformedPacket,
    #[error("property appears more than once")]
    DuplicateProperty,
    #[error("unknown control packet type")]
    UnsupportedPacketType,
    #[error("packet exceeds the configured size limit")]
    MaxSizeExceeded,
    #[error("string field is not valid utf-8")]
    Utf8,
    #[error("io: {0}")]
    Io(ByteString),
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> DecodeError {
        DecodeError::Io(e.to_string().into())
    }
}

/// Failures while writing a packet to the wire.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodeError {
    #[error("packet exceeds the configured size limit")]
    OverMaxPacketSize,
    #[error("length field overflow")]
    InvalidLength,
    #[error("malformed packet")]
    MalformedPacket,
    #[error("publish above qos 0 requires a packet id")]
    PacketIdRequired,
    #[error("io: {0}")]
    Io(ByteString),
}

impl From<io::Error> for EncodeError {
    fn from(e: io::Error) -> EncodeError {
        EncodeError::Io(e.to_string().into())
    }
}
