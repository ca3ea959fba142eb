#![deny(unsafe_code)]

//! # Overall Example
//! ```rust,no_run
//! use skymq::client::Client;
//! use skymq::options::ClientOptions;
//! use skymq::types::Topic;
//! use skymq::QoS;
//!
//! #[tokio::main]
//! async fn main() -> skymq::Result<()> {
//!     let mut client = Client::new(
//!         ClientOptions::new()
//!             .server("127.0.0.1:1883")
//!             .client_id("sensor-17")
//!             .clean_session(true),
//!     )?;
//!
//!     // the default TextRouter matches filters literally; plug in your own
//!     // Router implementation for wildcard matching
//!     client.handle("metrics/temp", |publish| {
//!         println!("{} -> {} bytes", publish.topic, publish.payload.len());
//!     });
//!     client.connect(None);
//!
//!     client.subscribe(vec![Topic::new("metrics/temp", QoS::AtLeastOnce)]).await;
//!     client.wait().await;
//!     Ok(())
//! }
//! ```

/// Client Core Components
pub mod backoff; // Reconnect delay computation
pub mod client; // Client supervisor and public API
pub mod error; // Client error kinds
pub mod event; // Event fan-out to user handlers
pub mod options; // Immutable session options
pub mod packet_id; // Packet-id allocation and the in-flight side-table
pub mod persist; // In-flight packet persistence capability
pub mod router; // Inbound publish routing capability
pub mod types; // Common data types

mod conn; // Per-endpoint connection session

/// External Crate Re-exports
pub use skymq_codec as codec;
pub use skymq_net as net;

pub use codec::{ProtocolVersion, Publish, QoS};
pub use error::ClientError;
pub use net::{Error, Result};
