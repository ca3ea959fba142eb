//! Routing capability for inbound publishes.
//!
//! The client invokes [`Router::dispatch`] for every publish taken off the
//! shared inbound channel. The wildcard-aware matcher of a full deployment
//! is an external collaborator; [`TextRouter`] ships as the default and
//! matches filters literally.

use dashmap::DashMap;

use crate::codec::Publish;
use crate::types::{TopicFilter, TopicHandler};

pub trait Router: Send + Sync {
    /// Registers `handler` for publishes whose topic matches `filter`.
    fn handle(&self, filter: TopicFilter, handler: TopicHandler);

    /// Routes one inbound publish to the matching handlers.
    fn dispatch(&self, publish: &Publish);
}

/// Literal-match router: a filter matches only its exact topic string.
#[derive(Default)]
pub struct TextRouter {
    routes: DashMap<TopicFilter, TopicHandler>,
}

impl TextRouter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Router for TextRouter {
    fn handle(&self, filter: TopicFilter, handler: TopicHandler) {
        self.routes.insert(filter, handler);
    }

    fn dispatch(&self, publish: &Publish) {
        match self.routes.get(&*publish.topic) {
            Some(handler) => handler.value()(publish),
            None => log::trace!("no route for topic: {}", publish.topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use bytes::Bytes;

    use super::*;
    use crate::QoS;

    fn publish(topic: &'static str) -> Publish {
        Publish {
            dup: false,
            retain: false,
            qos: QoS::AtMostOnce,
            topic: topic.into(),
            packet_id: None,
            payload: Bytes::new(),
            properties: None,
        }
    }

    #[test]
    fn test_text_router_dispatch() {
        let router = TextRouter::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        router.handle("a/b".into(), Arc::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));

        router.dispatch(&publish("a/b"));
        router.dispatch(&publish("a/b"));
        router.dispatch(&publish("a/c"));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
