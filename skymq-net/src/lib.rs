//! Client-side transport factory: dials a broker endpoint (TCP, optionally
//! TLS) under a deadline and hands back a framed MQTT stream.

#![deny(unsafe_code)]

mod dialer;
mod error;
mod stream;

pub use dialer::Dialer;
pub use error::MqttError;
#[cfg(feature = "tls")]
pub use rustls;
pub use stream::{MqttStream, PacketSink, PacketSource};

pub type Error = anyhow::Error;
pub type Result<T> = anyhow::Result<T, Error>;
