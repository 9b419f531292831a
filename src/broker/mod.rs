//! Message broker abstraction
//!
//! A [`Broker`] owns one logical connection/channel and provides the handful of
//! primitives the request/reply protocol needs: queue declaration and
//! deletion, publish to the default exchange, consume, and consumer
//! cancellation.
//!
//! Two implementations ship with the crate:
//! - [`MemoryBroker`]: in-process queues, always available
//! - `AmqpBroker`: RabbitMQ through `lapin`, behind the `amqp` feature

use futures::stream::BoxStream;

use crate::Result;

pub mod memory;

#[cfg(feature = "amqp")]
pub mod amqp;

pub use memory::MemoryBroker;

#[cfg(feature = "amqp")]
pub use amqp::AmqpBroker;

/// Subset of AMQP basic properties used by the protocol
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageProperties {
    /// Pairs a reply with the request that caused it
    pub correlation_id: Option<String>,
    /// Queue the service should publish replies to
    pub reply_to: Option<String>,
}

impl MessageProperties {
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }
}

/// A message handed to a consumer
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub properties: MessageProperties,
    pub body: Vec<u8>,
}

/// Stream of deliveries for one consumer registration
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

/// Active consumer registration
pub struct Consumer {
    /// Tag used to cancel the registration
    pub tag: String,
    /// Deliveries in broker order; ends when the consumer is cancelled
    pub deliveries: DeliveryStream,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer").field("tag", &self.tag).finish_non_exhaustive()
    }
}

/// Connection to a message broker
///
/// Implementations must be safe to share between concurrent sessions: each
/// session declares its own reply queue and consumer on the same connection.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Declare a server-named, exclusive, auto-delete queue and return its name.
    ///
    /// The queue disappears once its consumer is cancelled.
    async fn declare_reply_queue(&self) -> Result<String>;

    /// Declare a named queue (idempotent).
    async fn declare_queue(&self, name: &str) -> Result<()>;

    /// Publish `body` to the default exchange with `routing_key` as queue name.
    ///
    /// Messages for queues that do not exist are dropped, as AMQP does.
    async fn publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Start consuming `queue` with automatic acknowledgement.
    async fn consume(&self, queue: &str) -> Result<Consumer>;

    /// Cancel a consumer registration.
    async fn cancel(&self, consumer_tag: &str) -> Result<()>;

    /// Delete a queue and drop any messages still in it.
    ///
    /// Used for reply queues that never got a consumer, which auto-delete
    /// would otherwise keep until the connection closes.
    async fn delete_queue(&self, name: &str) -> Result<()>;

    /// Close the connection. Outstanding consumers end with an error.
    async fn close(&self) -> Result<()>;
}
