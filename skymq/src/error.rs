/// Client-level failures surfaced through handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The broker did not answer the Connect packet within the dial timeout.
    #[error("connection timeout")]
    ConnectTimeout,
    /// The broker rejected the connection with this CONNACK byte.
    #[error("CONNACK failure: {0}")]
    ConnAck(u8),
    /// The first packet after Connect was not a CONNACK.
    #[error("unexpected packet while waiting for CONNACK")]
    UnexpectedPacket,
    /// All 65535 packet ids are in flight; retry later.
    #[error("packet id space exhausted")]
    PacketIdExhausted,
    /// No plain or secure endpoint was configured.
    #[error("no server provided, won't work")]
    NoServers,
    /// A secure endpoint was configured without any TLS client config.
    #[error("no TLS config for secure server")]
    NoTlsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connack_code_roundtrip() {
        let e = ClientError::ConnAck(4);
        assert_eq!(e.to_string(), "CONNACK failure: 4");
        let any: crate::Error = e.into();
        assert_eq!(any.downcast_ref::<ClientError>(), Some(&ClientError::ConnAck(4)));
    }
}
