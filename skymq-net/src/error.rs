use skymq_codec::error::{DecodeError, EncodeError};

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    /// MQTT decoding error
    #[error("Decoding error: {0:?}")]
    Decode(#[from] DecodeError),
    /// MQTT encoding error
    #[error("Encoding error: {0:?}")]
    Encode(#[from] EncodeError),
    /// Dial or TLS handshake did not finish within the dial timeout
    #[error("Connect timeout")]
    ConnectTimeout,
    /// Read timeout
    #[error("Read timeout")]
    ReadTimeout,
    /// The peer closed the connection
    #[error("Connection closed by peer")]
    Closed,
    /// Invalid server name for the TLS handshake
    #[error("Invalid server name: {0}")]
    InvalidServerName(String),
}
