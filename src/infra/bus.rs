//! In-process change bus over a tokio broadcast channel.
//!
//! Each subscription runs a forwarding task that filters by topic and calls
//! the handler. Slow subscribers that fall behind lose events (logged) rather
//! than blocking publishers.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::application::repos::{BusSubscription, ChangeBus, ChangeHandler, RemoteError};
use crate::domain::entities::ChangeEvent;

#[derive(Debug, Clone)]
struct TopicEvent {
    topic: Arc<str>,
    event: ChangeEvent,
}

pub struct LocalChangeBus {
    tx: broadcast::Sender<TopicEvent>,
}

impl LocalChangeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish `event` on `topic`; returns how many subscriptions received it.
    /// Without subscribers the event is dropped.
    pub fn publish(&self, topic: &str, event: ChangeEvent) -> usize {
        let subscriber_count = self.tx.receiver_count();
        debug!(topic, profile_id = %event.id, subscriber_count, "Change event published");
        self.tx
            .send(TopicEvent {
                topic: Arc::from(topic),
                event,
            })
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalChangeBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl ChangeBus for LocalChangeBus {
    fn subscribe(
        &self,
        topic: &str,
        handler: ChangeHandler,
    ) -> Result<BusSubscription, RemoteError> {
        let runtime = Handle::try_current().map_err(|_| RemoteError::Unavailable)?;
        let mut rx = self.tx.subscribe();
        let topic = topic.to_string();

        let forwarder = runtime.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) if *message.topic == *topic => handler(message.event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(topic = %topic, missed, "Change subscriber lagged; events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Ok(BusSubscription::new(move || forwarder.abort()))
    }
}
