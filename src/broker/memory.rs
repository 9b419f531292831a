//! In-process broker

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::{Broker, Consumer, Delivery, MessageProperties};
use crate::{FluidError, Result};

struct QueueState {
    sender: mpsc::UnboundedSender<Delivery>,
    /// Taken by the single consumer
    receiver: Option<mpsc::UnboundedReceiver<Delivery>>,
    auto_delete: bool,
}

struct ConsumerState {
    queue: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct State {
    queues: HashMap<String, QueueState>,
    consumers: HashMap<String, ConsumerState>,
}

/// Broker that routes messages between tasks of one process.
///
/// Behaves like the AMQP default exchange: a message published with a routing
/// key is delivered to the queue of the same name, or dropped when there is
/// none. Each queue accepts a single consumer.
pub struct MemoryBroker {
    state: Mutex<State>,
    closed: CancellationToken,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create an open broker with no queues
    pub fn new() -> Self {
        Self { state: Mutex::new(State::default()), closed: CancellationToken::new() }
    }

    /// Number of declared queues
    pub fn queue_count(&self) -> usize {
        self.lock().queues.len()
    }

    /// Whether a queue with this name exists
    pub fn has_queue(&self, name: &str) -> bool {
        self.lock().queues.contains_key(name)
    }

    /// Number of live consumer registrations
    pub fn consumer_count(&self) -> usize {
        self.lock().consumers.len()
    }

    /// Whether [`Broker::close`] has been called
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self, operation: &str) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(FluidError::broker_error(operation, "connection closed"));
        }
        Ok(())
    }

    fn insert_queue(state: &mut State, name: &str, auto_delete: bool) {
        state.queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueState { sender, receiver: Some(receiver), auto_delete }
        });
    }
}

#[async_trait::async_trait]
impl Broker for MemoryBroker {
    async fn declare_reply_queue(&self) -> Result<String> {
        self.ensure_open("queue declare")?;
        let name = format!("amq.gen-{}", Uuid::new_v4().simple());
        Self::insert_queue(&mut self.lock(), &name, true);
        debug!(queue = %name, "Declared reply queue");
        Ok(name)
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.ensure_open("queue declare")?;
        if name.is_empty() {
            return Err(FluidError::broker_error("queue declare", "queue name must not be empty"));
        }
        Self::insert_queue(&mut self.lock(), name, false);
        debug!(queue = %name, "Declared queue");
        Ok(())
    }

    async fn publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()> {
        if self.closed.is_cancelled() {
            return Err(FluidError::publish_failed(routing_key, "connection closed"));
        }

        let state = self.lock();
        match state.queues.get(routing_key) {
            Some(queue) => {
                trace!(queue = %routing_key, bytes = body.len(), "Routing message");
                // A dropped receiver means the consumer went away; AMQP would
                // keep the message in the queue, nobody reads it either way.
                let _ = queue.sender.send(Delivery { properties, body });
            }
            None => {
                debug!(queue = %routing_key, "Dropping unroutable message");
            }
        }
        Ok(())
    }

    async fn consume(&self, queue: &str) -> Result<Consumer> {
        self.ensure_open("consume")?;

        let mut state = self.lock();
        let receiver = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| FluidError::broker_error("consume", format!("no queue '{}'", queue)))?
            .receiver
            .take()
            .ok_or_else(|| {
                FluidError::broker_error("consume", format!("queue '{}' already has a consumer", queue))
            })?;

        let tag = format!("ctag-{}", Uuid::new_v4().simple());
        let cancel = CancellationToken::new();
        state
            .consumers
            .insert(tag.clone(), ConsumerState { queue: queue.to_string(), cancel: cancel.clone() });
        drop(state);

        debug!(queue = %queue, consumer_tag = %tag, "Started consumer");

        let closed = self.closed.clone();
        let deliveries = futures::stream::unfold(Some(receiver), move |receiver| {
            let cancel = cancel.clone();
            let closed = closed.clone();
            async move {
                let mut receiver = receiver?;
                tokio::select! {
                    biased;
                    _ = closed.cancelled() => {
                        Some((Err(FluidError::broker_error("consume", "connection closed")), None))
                    }
                    _ = cancel.cancelled() => None,
                    delivery = receiver.recv() => {
                        delivery.map(|delivery| (Ok(delivery), Some(receiver)))
                    }
                }
            }
        })
        .boxed();

        Ok(Consumer { tag, deliveries })
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        let mut state = self.lock();
        let consumer = state.consumers.remove(consumer_tag).ok_or_else(|| FluidError::Teardown {
            consumer_tag: consumer_tag.to_string(),
            reason: "unknown consumer tag".to_string(),
        })?;
        consumer.cancel.cancel();

        if state.queues.get(&consumer.queue).is_some_and(|q| q.auto_delete) {
            state.queues.remove(&consumer.queue);
            debug!(queue = %consumer.queue, "Deleted auto-delete queue");
        }
        debug!(consumer_tag = %consumer_tag, "Cancelled consumer");
        Ok(())
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.ensure_open("queue delete")?;
        let mut state = self.lock();
        if state.queues.remove(name).is_none() {
            return Err(FluidError::broker_error("queue delete", format!("no queue '{}'", name)));
        }
        state.consumers.retain(|_, consumer| {
            let keep = consumer.queue != name;
            if !keep {
                consumer.cancel.cancel();
            }
            keep
        });
        debug!(queue = %name, "Deleted queue");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if self.closed.is_cancelled() {
            return Ok(());
        }
        self.closed.cancel();

        let mut state = self.lock();
        state.consumers.clear();
        state.queues.clear();
        info!("Memory broker closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn routes_by_queue_name() {
        let broker = MemoryBroker::new();
        broker.declare_queue("work").await.unwrap();
        let mut consumer = broker.consume("work").await.unwrap();

        let props = MessageProperties::default().with_correlation_id("c1").with_reply_to("r1");
        broker.publish("work", props.clone(), b"hello".to_vec()).await.unwrap();
        broker.publish("elsewhere", props.clone(), b"lost".to_vec()).await.unwrap();

        let delivery = consumer.deliveries.next().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"hello");
        assert_eq!(delivery.properties, props);
    }

    #[tokio::test]
    async fn reply_queues_are_unique_and_auto_deleted() {
        let broker = MemoryBroker::new();
        let a = broker.declare_reply_queue().await.unwrap();
        let b = broker.declare_reply_queue().await.unwrap();
        assert_ne!(a, b);
        assert_eq!(broker.queue_count(), 2);

        let mut consumer = broker.consume(&a).await.unwrap();
        assert_eq!(broker.consumer_count(), 1);
        broker.cancel(&consumer.tag).await.unwrap();

        assert!(!broker.has_queue(&a));
        assert!(broker.has_queue(&b));
        assert_eq!(broker.consumer_count(), 0);
        assert!(consumer.deliveries.next().await.is_none());
    }

    #[tokio::test]
    async fn second_consumer_is_rejected() {
        let broker = MemoryBroker::new();
        broker.declare_queue("work").await.unwrap();
        let _first = broker.consume("work").await.unwrap();
        assert!(matches!(broker.consume("work").await, Err(FluidError::Broker { .. })));
    }

    #[tokio::test]
    async fn cancelling_unknown_tag_is_a_teardown_error() {
        let broker = MemoryBroker::new();
        assert!(matches!(broker.cancel("nope").await, Err(FluidError::Teardown { .. })));
    }

    #[tokio::test]
    async fn deleting_a_queue_ends_its_consumer() {
        let broker = MemoryBroker::new();
        let unused = broker.declare_reply_queue().await.unwrap();
        broker.declare_queue("work").await.unwrap();
        let mut consumer = broker.consume("work").await.unwrap();

        broker.delete_queue(&unused).await.unwrap();
        broker.delete_queue("work").await.unwrap();

        assert_eq!(broker.queue_count(), 0);
        assert_eq!(broker.consumer_count(), 0);
        assert!(consumer.deliveries.next().await.is_none());
        assert!(matches!(broker.delete_queue("work").await, Err(FluidError::Broker { .. })));
    }

    #[tokio::test]
    async fn close_fails_consumers_and_publishers() {
        let broker = MemoryBroker::new();
        broker.declare_queue("work").await.unwrap();
        let mut consumer = broker.consume("work").await.unwrap();

        broker.close().await.unwrap();

        let next = consumer.deliveries.next().await.unwrap();
        assert!(matches!(next, Err(FluidError::Broker { .. })));
        assert!(consumer.deliveries.next().await.is_none());

        let publish = broker.publish("work", MessageProperties::default(), vec![]).await;
        assert!(matches!(publish, Err(FluidError::Publish { .. })));
        assert!(broker.declare_reply_queue().await.is_err());
    }
}
