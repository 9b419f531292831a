//! Test utilities: frame fixtures and a scripted service end
//!
//! The scripted service stands in for the simulation producer so tests can
//! decide exactly which replies arrive, in which order, with which
//! correlation ids.

#![cfg(any(test, feature = "benchmark"))]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;

use crate::broker::{Broker, Consumer, MessageProperties, MemoryBroker};
use crate::types::{Frame, Request};
use crate::{FluidError, Result, wire};

/// Install a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Frame whose values rise linearly from 0 to 1 across the field.
pub fn gradient_frame(frame_id: i32, width: i32, height: i32) -> Frame {
    let count = (width.max(0) * height.max(0)) as usize;
    let denominator = count.saturating_sub(1).max(1) as f32;
    let pixels = (0..count).map(|i| i as f32 / denominator).collect();
    Frame::new(frame_id, width, height, pixels)
}

/// Frame filled with a single value.
pub fn uniform_frame(frame_id: i32, width: i32, height: i32, value: f32) -> Frame {
    let count = (width.max(0) * height.max(0)) as usize;
    Frame::new(frame_id, width, height, vec![value; count])
}

/// A request as seen by the service end.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub request: Request,
    pub correlation_id: String,
    pub reply_to: String,
}

/// Service end whose replies are driven by the test.
pub struct ScriptedService<B: Broker = MemoryBroker> {
    broker: Arc<B>,
    consumer: Consumer,
}

impl<B: Broker> ScriptedService<B> {
    /// Declare and consume `queue` on `broker`.
    pub async fn start(broker: Arc<B>, queue: &str) -> Result<Self> {
        broker.declare_queue(queue).await?;
        let consumer = broker.consume(queue).await?;
        Ok(Self { broker, consumer })
    }

    /// Wait for the next request.
    pub async fn next_request(&mut self) -> Result<RecordedRequest> {
        let delivery = self
            .consumer
            .deliveries
            .next()
            .await
            .ok_or_else(|| FluidError::broker_error("consume", "request queue closed"))??;

        let request = wire::decode_request(&delivery.body)?;
        let correlation_id = delivery
            .properties
            .correlation_id
            .ok_or_else(|| FluidError::decode_error("request", "missing correlation id"))?;
        let reply_to = delivery
            .properties
            .reply_to
            .ok_or_else(|| FluidError::decode_error("request", "missing reply_to"))?;

        Ok(RecordedRequest { request, correlation_id, reply_to })
    }

    /// Reply to `to` with `frame`.
    pub async fn reply(&self, to: &RecordedRequest, frame: &Frame) -> Result<()> {
        self.reply_raw(&to.reply_to, Some(&to.correlation_id), wire::encode_frame(frame)).await
    }

    /// Publish an arbitrary body to a reply queue.
    pub async fn reply_raw(
        &self,
        reply_to: &str,
        correlation_id: Option<&str>,
        body: Vec<u8>,
    ) -> Result<()> {
        let mut properties = MessageProperties::default();
        properties.correlation_id = correlation_id.map(str::to_string);
        self.broker.publish(reply_to, properties, body).await
    }
}

/// Memory broker whose publishes, consumes or cancels can be made to fail.
#[derive(Default)]
pub struct FaultyBroker {
    pub inner: MemoryBroker,
    fail_publish: AtomicBool,
    fail_consume: AtomicBool,
    fail_cancel: AtomicBool,
}

impl FaultyBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publishes(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn fail_consumes(&self, fail: bool) {
        self.fail_consume.store(fail, Ordering::SeqCst);
    }

    /// Make `cancel` report an error without releasing the consumer.
    pub fn fail_cancels(&self, fail: bool) {
        self.fail_cancel.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Broker for FaultyBroker {
    async fn declare_reply_queue(&self) -> Result<String> {
        self.inner.declare_reply_queue().await
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.inner.declare_queue(name).await
    }

    async fn publish(
        &self,
        routing_key: &str,
        properties: MessageProperties,
        body: Vec<u8>,
    ) -> Result<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(FluidError::publish_failed(routing_key, "injected channel error"));
        }
        self.inner.publish(routing_key, properties, body).await
    }

    async fn consume(&self, queue: &str) -> Result<Consumer> {
        if self.fail_consume.load(Ordering::SeqCst) {
            return Err(FluidError::broker_error("consume", "injected channel error"));
        }
        self.inner.consume(queue).await
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<()> {
        if self.fail_cancel.load(Ordering::SeqCst) {
            return Err(FluidError::Teardown {
                consumer_tag: consumer_tag.to_string(),
                reason: "injected channel error".to_string(),
            });
        }
        self.inner.cancel(consumer_tag).await
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        self.inner.delete_queue(name).await
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gradient_spans_unit_interval() {
        let frame = gradient_frame(0, 4, 4);
        assert_eq!(frame.pixels.len(), 16);
        assert_eq!(frame.pixels[0], 0.0);
        assert_eq!(frame.pixels[15], 1.0);
    }

    #[tokio::test]
    async fn scripted_service_sees_published_requests() {
        let broker = Arc::new(MemoryBroker::new());
        let mut service = ScriptedService::start(Arc::clone(&broker), "work").await.unwrap();

        let props = MessageProperties::default().with_correlation_id("c").with_reply_to("r");
        broker.publish("work", props, wire::encode_request(&Request::new(2, 3, 4))).await.unwrap();

        let recorded = service.next_request().await.unwrap();
        assert_eq!(recorded.request, Request::new(2, 3, 4));
        assert_eq!(recorded.correlation_id, "c");
        assert_eq!(recorded.reply_to, "r");
    }
}
