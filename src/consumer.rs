//! Consumer registration and the ack/reject sentinel a consumer callback
//! returns.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;

use amq_protocol::protocol::basic::AMQPProperties;

/// A fully assembled `Basic.Deliver` handed to a consumer callback.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub consumer_tag: String,
    pub delivery_tag: u64,
    pub redelivered: bool,
    pub exchange: String,
    pub routing_key: String,
    pub properties: AMQPProperties,
    pub body: Bytes,
}

/// What the engine does with a delivery once the consumer callback
/// resolves. `Leave` means the callback declined to ack or reject; the
/// delivery stays unacknowledged on the broker. When the consumer was
/// registered with `no_ack`, the broker already considers every delivery
/// settled and none of these produce a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckDecision {
    Ack,
    Reject { requeue: bool },
    Leave,
}

pub type ConsumerFuture = Pin<Box<dyn Future<Output = AckDecision> + Send + 'static>>;

/// A per-delivery consumer callback. Like the connection-level callbacks,
/// this may `await`; the engine drives it to completion before sending the
/// resulting `Basic.Ack`/`Basic.Reject`.
pub trait ConsumerCallback: Send + Sync {
    fn deliver(&self, delivery: Delivery) -> ConsumerFuture;
}

impl<F, Fut> ConsumerCallback for F
where
    F: Fn(Delivery) -> Fut + Send + Sync,
    Fut: Future<Output = AckDecision> + Send + 'static,
{
    fn deliver(&self, delivery: Delivery) -> ConsumerFuture {
        Box::pin((self)(delivery))
    }
}

/// One registered consumer: `{queue-name, callback, options}`. The queue
/// name isn't tracked here (the broker already scopes deliveries to a
/// consumer tag), but `no_ack` must be, since it decides whether the engine
/// is allowed to send `Basic.Ack`/`Basic.Reject` back at all.
#[derive(Clone)]
pub struct ConsumerEntry {
    pub callback: Arc<dyn ConsumerCallback>,
    pub no_ack: bool,
}

/// Per-channel registry of active consumer tags.
#[derive(Default)]
pub struct ConsumerTable {
    consumers: HashMap<String, ConsumerEntry>,
}

impl ConsumerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, consumer_tag: String, callback: Arc<dyn ConsumerCallback>, no_ack: bool) {
        self.consumers.insert(consumer_tag, ConsumerEntry { callback, no_ack });
    }

    pub fn unregister(&mut self, consumer_tag: &str) -> Option<ConsumerEntry> {
        self.consumers.remove(consumer_tag)
    }

    pub fn get(&self, consumer_tag: &str) -> Option<ConsumerEntry> {
        self.consumers.get(consumer_tag).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn clear(&mut self) {
        self.consumers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_delivery(consumer_tag: &str) -> Delivery {
        Delivery {
            consumer_tag: consumer_tag.to_string(),
            delivery_tag: 1,
            redelivered: false,
            exchange: String::new(),
            routing_key: "rk".into(),
            properties: AMQPProperties::default(),
            body: Bytes::from_static(b"payload"),
        }
    }

    #[tokio::test]
    async fn registered_callback_decides_ack() {
        let mut table = ConsumerTable::new();
        table.register(
            "ctag-1".into(),
            Arc::new(|_d: Delivery| async { AckDecision::Ack }),
            false,
        );

        let entry = table.get("ctag-1").expect("registered");
        assert!(!entry.no_ack);
        let decision = entry.callback.deliver(sample_delivery("ctag-1")).await;
        assert_eq!(decision, AckDecision::Ack);
    }

    #[test]
    fn unregister_removes_the_consumer() {
        let mut table = ConsumerTable::new();
        table.register(
            "ctag-1".into(),
            Arc::new(|_: Delivery| async { AckDecision::Ack }),
            false,
        );
        assert!(table.unregister("ctag-1").is_some());
        assert!(table.get("ctag-1").is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn no_ack_consumers_are_tracked_separately() {
        let mut table = ConsumerTable::new();
        table.register(
            "ctag-2".into(),
            Arc::new(|_: Delivery| async { AckDecision::Leave }),
            true,
        );
        assert!(table.get("ctag-2").expect("registered").no_ack);
    }
}
