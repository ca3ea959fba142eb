//! Tagged events and the single-consumer fan-out loop that routes them to
//! user callbacks.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::SubscribeReturnCode;
use crate::types::{NetHandler, PersistHandler, PubHandler, SubHandler, TopicFilter, UnsubHandler};
use crate::Error;

/// One completed (or failed) flow, tagged by kind.
pub(crate) enum Event {
    Pub { topic: TopicFilter, err: Option<Error> },
    Sub { topics: Vec<(TopicFilter, SubscribeReturnCode)>, err: Option<Error> },
    Unsub { topics: Vec<TopicFilter>, err: Option<Error> },
    Net { server: String, err: Error },
    Persist { err: Error },
}

/// User callbacks, one per event kind; all optional.
#[derive(Clone, Default)]
pub(crate) struct Handlers {
    pub(crate) publish: Option<PubHandler>,
    pub(crate) subscribe: Option<SubHandler>,
    pub(crate) unsubscribe: Option<UnsubHandler>,
    pub(crate) net: Option<NetHandler>,
    pub(crate) persist: Option<PersistHandler>,
}

/// Drains the event channel until the client token is cancelled or all
/// senders are gone.
pub(crate) async fn fan_out(mut rx: mpsc::Receiver<Event>, handlers: Handlers, token: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        match event {
            Event::Pub { topic, err } => {
                if let Some(h) = handlers.publish.as_ref() {
                    h(&topic, err.as_ref());
                }
            }
            Event::Sub { topics, err } => {
                if let Some(h) = handlers.subscribe.as_ref() {
                    h(&topics, err.as_ref());
                }
            }
            Event::Unsub { topics, err } => {
                if let Some(h) = handlers.unsubscribe.as_ref() {
                    h(&topics, err.as_ref());
                }
            }
            Event::Net { server, err } => {
                if let Some(h) = handlers.net.as_ref() {
                    h(&server, &err);
                }
            }
            Event::Persist { err } => {
                if let Some(h) = handlers.persist.as_ref() {
                    h(&err);
                }
            }
        }
    }
}

/// Forwards a persistence failure, dropping it silently only when the event
/// queue is gone.
pub(crate) async fn notify_persist(tx: &mpsc::Sender<Event>, result: crate::Result<()>) {
    if let Err(err) = result {
        let _ = tx.send(Event::Persist { err }).await;
    }
}
