//! Service end of the protocol: turns requests into frame streams
//!
//! [`SimulationService`] consumes the request queue and answers every request
//! with `num_frames` frames published to its reply queue. What goes into each
//! frame is up to a [`Simulation`]; [`SourceSplat`] is a small deterministic
//! one used by the demo and the tests.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::broker::{Broker, Delivery, MessageProperties};
use crate::session::REQUEST_QUEUE;
use crate::types::{Frame, Request};
use crate::{Result, wire};

/// Produces the scalar field for one frame of a request.
pub trait Simulation: Send + Sync + 'static {
    /// Row-major values for `frame_id`, ideally `width * height` of them in `[0, 1]`.
    fn step(&self, request: &Request, frame_id: i32) -> Vec<f32>;
}

/// Gaussian density splats drifting along each source's direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceSplat {
    /// Splat standard deviation at frame 0, in cells
    pub radius: f32,
    /// Fraction of the direction vector travelled per frame
    pub speed: f32,
    /// Relative radius growth per frame
    pub spread: f32,
}

impl Default for SourceSplat {
    fn default() -> Self {
        Self { radius: 4.0, speed: 0.1, spread: 0.05 }
    }
}

impl Simulation for SourceSplat {
    fn step(&self, request: &Request, frame_id: i32) -> Vec<f32> {
        let width = request.width.max(0) as usize;
        let height = request.height.max(0) as usize;
        let mut field = vec![0.0f32; width * height];

        let t = frame_id.max(0) as f32;
        let sigma = (self.radius * (1.0 + self.spread * t)).max(f32::EPSILON);
        let denominator = 2.0 * sigma * sigma;

        for source in &request.sources {
            let cx = source.position.x + source.direction.x * self.speed * t;
            let cy = source.position.y + source.direction.y * self.speed * t;
            for (index, cell) in field.iter_mut().enumerate() {
                let dx = (index % width) as f32 - cx;
                let dy = (index / width) as f32 - cy;
                *cell += (-(dx * dx + dy * dy) / denominator).exp();
            }
        }

        for cell in &mut field {
            *cell = cell.min(1.0);
        }
        field
    }
}

/// Counters reported when the service stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceStats {
    pub requests: usize,
    pub frames: usize,
    /// Requests dropped for missing properties or a bad body
    pub skipped: usize,
}

/// Consumes requests and publishes simulated frames back.
pub struct SimulationService<B: Broker, S: Simulation> {
    broker: Arc<B>,
    simulation: S,
    request_queue: String,
}

impl<B: Broker, S: Simulation> SimulationService<B, S> {
    pub fn new(broker: Arc<B>, simulation: S) -> Self {
        Self { broker, simulation, request_queue: REQUEST_QUEUE.to_string() }
    }

    pub fn with_request_queue(mut self, queue: impl Into<String>) -> Self {
        self.request_queue = queue.into();
        self
    }

    /// Run on a background task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<Result<ServiceStats>> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    /// Serve requests until `cancel` fires or the consumer ends.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ServiceStats> {
        self.broker.declare_queue(&self.request_queue).await?;
        let mut consumer = self.broker.consume(&self.request_queue).await?;
        info!(queue = %self.request_queue, "Simulation service started");

        let mut stats = ServiceStats::default();
        let outcome = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                next = consumer.deliveries.next() => next,
            };

            match next {
                Some(Ok(delivery)) => {
                    if let Err(e) = self.handle(delivery, &cancel, &mut stats).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => break Err(e),
                None => {
                    debug!("Request consumer ended");
                    break Ok(());
                }
            }
        };

        if let Err(e) = self.broker.cancel(&consumer.tag).await {
            debug!(consumer_tag = %consumer.tag, "Request consumer teardown failed: {}", e);
        }
        info!(
            requests = stats.requests,
            frames = stats.frames,
            skipped = stats.skipped,
            "Simulation service stopped"
        );
        outcome.map(|()| stats)
    }

    async fn handle(
        &self,
        delivery: Delivery,
        cancel: &CancellationToken,
        stats: &mut ServiceStats,
    ) -> Result<()> {
        let (Some(correlation_id), Some(reply_to)) =
            (delivery.properties.correlation_id, delivery.properties.reply_to)
        else {
            warn!("Dropping request without correlation id or reply queue");
            stats.skipped += 1;
            return Ok(());
        };

        let request = match wire::decode_request(&delivery.body).and_then(|r| r.validate().map(|()| r)) {
            Ok(request) => request,
            Err(e) => {
                warn!(correlation_id = %correlation_id, "Dropping request: {}", e);
                stats.skipped += 1;
                return Ok(());
            }
        };

        debug!(
            correlation_id = %correlation_id,
            reply_to = %reply_to,
            num_frames = request.num_frames,
            "Simulating request"
        );
        stats.requests += 1;

        for frame_id in 0..request.num_frames {
            if cancel.is_cancelled() {
                break;
            }
            let pixels = self.simulation.step(&request, frame_id);
            let frame = Frame::new(frame_id, request.width, request.height, pixels);
            let properties = MessageProperties::default().with_correlation_id(correlation_id.clone());
            self.broker.publish(&reply_to, properties, wire::encode_frame(&frame)).await?;
            stats.frames += 1;
            trace!(correlation_id = %correlation_id, frame_id, "Frame published");
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
