use std::sync::Arc;

use bytes::Bytes;
use bytestring::ByteString;

use crate::codec::{Publish, QoS, SubscribeReturnCode};
use crate::Error;

/// 16-bit packet identifier; 0 is reserved as "unassigned".
pub type PacketId = u16;

/// A topic filter, possibly containing wildcards.
pub type TopicFilter = ByteString;

/// CONNACK code for an accepted connection.
pub const CODE_SUCCESS: u8 = 0;
/// Sentinel code reported for failures that carry no broker CONNACK byte.
pub const CODE_CONN_FAILED: u8 = u8::MAX;

/// One entry of a subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub filter: TopicFilter,
    pub qos: QoS,
}

impl Topic {
    pub fn new<T: Into<ByteString>>(filter: T, qos: QoS) -> Self {
        Topic { filter: filter.into(), qos }
    }
}

/// Builds an outbound publish; `qos` is clamped into the valid 0..=2 range
/// on ingress.
pub fn new_publish<T, P>(topic: T, payload: P, qos: u8, retain: bool) -> Publish
where
    T: Into<ByteString>,
    P: Into<Bytes>,
{
    Publish {
        dup: false,
        retain,
        qos: QoS::clamp_from(qos),
        topic: topic.into(),
        packet_id: None,
        payload: payload.into(),
        properties: None,
    }
}

/// Called once per connection attempt with the endpoint, the CONNACK code
/// (or [`CODE_CONN_FAILED`]) and the failure, if any.
pub type ConnHandler = Arc<dyn Fn(&str, u8, Option<&Error>) + Send + Sync>;
/// Called when a publish flow completes or fails, with its topic.
pub type PubHandler = Arc<dyn Fn(&str, Option<&Error>) + Send + Sync>;
/// Called when a subscribe flow completes, with the per-topic server codes.
pub type SubHandler = Arc<dyn Fn(&[(TopicFilter, SubscribeReturnCode)], Option<&Error>) + Send + Sync>;
/// Called when an unsubscribe flow completes.
pub type UnsubHandler = Arc<dyn Fn(&[TopicFilter], Option<&Error>) + Send + Sync>;
/// Called on transport and decode failures, with the endpoint.
pub type NetHandler = Arc<dyn Fn(&str, &Error) + Send + Sync>;
/// Called when the persistence capability reports an error.
pub type PersistHandler = Arc<dyn Fn(&Error) + Send + Sync>;
/// Called for each inbound publish dispatched to a matching route.
pub type TopicHandler = Arc<dyn Fn(&Publish) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_publish_clamps_qos() {
        assert_eq!(new_publish("t", "p", 0, false).qos, QoS::AtMostOnce);
        assert_eq!(new_publish("t", "p", 2, false).qos, QoS::ExactlyOnce);
        assert_eq!(new_publish("t", "p", 7, false).qos, QoS::ExactlyOnce);
        assert!(new_publish("t", "p", 1, true).retain);
        assert!(new_publish("t", "p", 1, true).packet_id.is_none());
    }
}
