//! Consumer task driving one session's reply stream

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::SessionSummary;
use super::completion::{CompletionPolicy, CompletionTracker};
use crate::broker::{Broker, Consumer};
use crate::types::Frame;
use crate::{FluidError, Result, wire};

/// Set of correlation ids with a session in flight on one client
pub(crate) type Registry = Arc<Mutex<HashSet<String>>>;

/// Holds a correlation id in the registry until dropped
#[derive(Debug)]
pub(crate) struct CorrelationGuard {
    id: String,
    registry: Registry,
}

impl CorrelationGuard {
    /// Reserve a fresh id, regenerating on the (unlikely) collision.
    pub(crate) fn reserve(registry: &Registry) -> Self {
        let mut ids = registry.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if ids.insert(id.clone()) {
                return Self { id, registry: Arc::clone(registry) };
            }
            warn!(correlation_id = %id, "Correlation id collision, regenerating");
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

impl Drop for CorrelationGuard {
    fn drop(&mut self) {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.id);
    }
}

/// Per-session state owned by the consumer task
pub(crate) struct CorrelationContext {
    pub(crate) guard: CorrelationGuard,
    pub(crate) reply_queue: String,
    pub(crate) expected_frames: i32,
    pub(crate) policy: CompletionPolicy,
    pub(crate) timeout: Option<Duration>,
}

/// Channels and tokens the consumer task reports through
pub(crate) struct SessionChannels {
    pub(crate) frames: mpsc::UnboundedSender<Result<Frame>>,
    pub(crate) completion: oneshot::Sender<Result<SessionSummary>>,
    pub(crate) cancel: CancellationToken,
}

/// Filter, decode and forward replies until the session completes or fails,
/// then release the consumer.
pub(crate) async fn run_session<B: Broker>(
    broker: Arc<B>,
    context: CorrelationContext,
    mut consumer: Consumer,
    channels: SessionChannels,
) {
    let started = Instant::now();
    let correlation_id = context.guard.id().to_string();
    let mut tracker = CompletionTracker::new(context.policy, context.expected_frames);
    let mut delivered = 0usize;
    let mut foreign = 0usize;

    let timeout = context.timeout;
    let deadline = async move {
        // A deadline past the clock's range never fires.
        match timeout.and_then(|duration| started.checked_add(duration)) {
            Some(deadline) => tokio::time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    debug!(
        correlation_id = %correlation_id,
        reply_queue = %context.reply_queue,
        expected = context.expected_frames,
        "Session consumer started"
    );

    let outcome: Result<SessionSummary> = loop {
        let next = tokio::select! {
            biased;
            _ = channels.cancel.cancelled() => break Err(FluidError::Cancelled),
            _ = &mut deadline => {
                break Err(FluidError::Timeout { duration: timeout.unwrap_or_default() })
            }
            next = consumer.deliveries.next() => next,
        };

        let delivery = match next {
            Some(Ok(delivery)) => delivery,
            Some(Err(e)) => break Err(e),
            None => {
                break Err(FluidError::broker_error(
                    "consume",
                    "reply consumer ended before the last frame",
                ));
            }
        };

        if delivery.properties.correlation_id.as_deref() != Some(correlation_id.as_str()) {
            foreign += 1;
            trace!(correlation_id = %correlation_id, "Ignoring reply for another session");
            continue;
        }

        let frame = match wire::decode_frame(&delivery.body) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(correlation_id = %correlation_id, "Skipping undecodable reply: {}", e);
                continue;
            }
        };

        let frame_id = frame.frame_id;
        if frame.is_truncated() {
            debug!(
                frame_id,
                pixels = frame.pixels.len(),
                declared = frame.declared_len(),
                "Frame payload shorter than declared"
            );
        }

        let done = tracker.observe(frame_id);
        if channels.frames.send(Ok(frame)).is_err() {
            break Err(FluidError::Cancelled);
        }
        delivered += 1;
        trace!(correlation_id = %correlation_id, frame_id, delivered, "Frame delivered");

        if done {
            break Ok(SessionSummary {
                correlation_id: correlation_id.clone(),
                frames_delivered: delivered,
                elapsed: started.elapsed(),
            });
        }
    };

    // Teardown happens exactly once, whichever way the loop ended.
    if let Err(e) = broker.cancel(&consumer.tag).await {
        warn!(correlation_id = %correlation_id, consumer_tag = %consumer.tag, "Consumer teardown failed: {}", e);
    }
    drop(consumer);

    match &outcome {
        Ok(summary) => info!(
            correlation_id = %correlation_id,
            frames = summary.frames_delivered,
            ignored = foreign,
            "Session completed in {:?}",
            summary.elapsed
        ),
        Err(FluidError::Cancelled) => {
            debug!(correlation_id = %correlation_id, delivered, "Session cancelled");
            let _ = channels.frames.send(Err(FluidError::Cancelled));
        }
        Err(e) => {
            error!(correlation_id = %correlation_id, delivered, "Session aborted: {}", e);
            let _ = channels.frames.send(Err(duplicate_error(e)));
        }
    }

    drop(context.guard);
    let _ = channels.completion.send(outcome);
}

/// Copy of a session-ending error for the second listener.
pub(crate) fn duplicate_error(error: &FluidError) -> FluidError {
    match error {
        FluidError::Cancelled => FluidError::Cancelled,
        FluidError::Timeout { duration } => FluidError::Timeout { duration: *duration },
        FluidError::Broker { operation, reason, .. } => {
            FluidError::broker_error(operation.clone(), reason.clone())
        }
        other => FluidError::broker_error("session", other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_release_ids_on_drop() {
        let registry: Registry = Arc::default();
        let a = CorrelationGuard::reserve(&registry);
        let b = CorrelationGuard::reserve(&registry);
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.lock().unwrap().len(), 2);

        drop(a);
        assert_eq!(registry.lock().unwrap().len(), 1);
        assert!(registry.lock().unwrap().contains(b.id()));
    }

    #[test]
    fn duplicated_errors_keep_their_kind() {
        let timeout = FluidError::Timeout { duration: Duration::from_millis(5) };
        assert!(matches!(
            duplicate_error(&timeout),
            FluidError::Timeout { duration } if duration == Duration::from_millis(5)
        ));
        assert!(matches!(duplicate_error(&FluidError::Cancelled), FluidError::Cancelled));
        let broker = FluidError::broker_error("consume", "connection closed");
        assert!(duplicate_error(&broker).to_string().contains("connection closed"));
    }
}
