//! MQTT packet codec for the skymq client.
//!
//! One [`Packet`] model spans both supported protocol generations; a
//! [`Codec`] is built for a [`ProtocolVersion`] and speaks that generation
//! on the wire. v5 property sections are modelled by [`Properties`].

#![deny(unsafe_code)]

pub mod error;
pub mod packet;
pub mod props;
pub mod types;
pub mod version;

mod codec;
mod decode;
mod encode;
mod wire;

pub use codec::Codec;
pub use packet::{ConnAck, Connect, ConnectAckReason, LastWill, Packet, SubscribeReturnCode};
pub use props::Properties;
pub use types::{Protocol, Publish, QoS};
pub use version::ProtocolVersion;
