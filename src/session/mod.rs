//! Correlation-keyed request/reply sessions
//!
//! [`RpcClient::submit`] publishes one [`Request`] and returns a [`Session`]:
//! a stream of the [`Frame`]s the service sends back, plus a [`Completion`]
//! future that resolves once the session ends.
//!
//! Every session gets its own exclusive reply queue and a fresh correlation
//! id, so any number of sessions can share one broker connection. Replies
//! whose correlation id does not match are dropped without surfacing.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use futures::StreamExt;
//! use fluidstream::{MemoryBroker, Request, RpcClient};
//!
//! # #[tokio::main]
//! # async fn main() -> fluidstream::Result<()> {
//! let client = RpcClient::new(Arc::new(MemoryBroker::new()));
//! let mut session = client.submit(Request::new(3, 64, 64)).await?;
//!
//! while let Some(frame) = session.next().await {
//!     let frame = frame?;
//!     println!("frame {} ({} cells)", frame.frame_id, frame.pixel_count());
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use futures::Stream;
use pin_project_lite::pin_project;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use crate::broker::{Broker, MessageProperties};
use crate::types::{Frame, Request};
use crate::{FluidError, Result, wire};

mod completion;
mod driver;


pub use completion::CompletionPolicy;

pub(crate) use driver::duplicate_error;
use driver::{CorrelationContext, CorrelationGuard, Registry, SessionChannels};

/// Well-known queue the simulation service consumes requests from
pub const REQUEST_QUEUE: &str = "fluid_request";

/// Per-submission options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubmitOptions {
    /// Give up if the session has not completed after this long
    pub timeout: Option<Duration>,
    /// How the last frame is recognised
    pub policy: CompletionPolicy,
}

impl SubmitOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Outcome of a session that completed normally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub correlation_id: String,
    /// Frames handed to the stream, duplicates included
    pub frames_delivered: usize,
    /// Time from the start of consumption to completion
    pub elapsed: Duration,
}

impl SessionSummary {
    /// Average time per delivered frame
    pub fn time_per_frame(&self) -> Duration {
        match u32::try_from(self.frames_delivered) {
            Ok(0) | Err(_) => Duration::ZERO,
            Ok(n) => self.elapsed / n,
        }
    }
}

/// Client side of the request/reply protocol over one broker connection.
pub struct RpcClient<B: Broker> {
    broker: Arc<B>,
    request_queue: String,
    defaults: SubmitOptions,
    outstanding: Registry,
    shutdown: CancellationToken,
}

impl<B: Broker> RpcClient<B> {
    /// Create a client publishing to [`REQUEST_QUEUE`]
    pub fn new(broker: Arc<B>) -> Self {
        Self {
            broker,
            request_queue: REQUEST_QUEUE.to_string(),
            defaults: SubmitOptions::default(),
            outstanding: Registry::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Publish requests to a different queue
    pub fn with_request_queue(mut self, queue: impl Into<String>) -> Self {
        self.request_queue = queue.into();
        self
    }

    /// Options used by [`RpcClient::submit`]
    pub fn with_default_options(mut self, options: SubmitOptions) -> Self {
        self.defaults = options;
        self
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    pub fn request_queue(&self) -> &str {
        &self.request_queue
    }

    /// Number of sessions that have not finished yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Submit with the client's default options
    pub async fn submit(&self, request: Request) -> Result<Session> {
        self.submit_with(request, self.defaults).await
    }

    /// Publish `request` and start consuming its replies.
    ///
    /// Fails before any frame is produced if the request is invalid, the reply
    /// queue cannot be declared, or the publish is rejected.
    pub async fn submit_with(&self, request: Request, options: SubmitOptions) -> Result<Session> {
        request.validate()?;
        if self.shutdown.is_cancelled() {
            return Err(FluidError::publish_failed(&self.request_queue, "client closed"));
        }

        let guard = CorrelationGuard::reserve(&self.outstanding);
        let correlation_id = guard.id().to_string();

        let reply_queue = self.broker.declare_reply_queue().await?;
        let properties = MessageProperties::default()
            .with_correlation_id(correlation_id.clone())
            .with_reply_to(reply_queue.clone());
        let body = wire::encode_request(&request);

        debug!(
            correlation_id = %correlation_id,
            reply_queue = %reply_queue,
            bytes = body.len(),
            "Publishing request"
        );
        // Replies published before the consumer starts wait in the reply queue.
        let started = match self.broker.publish(&self.request_queue, properties, body).await {
            Ok(()) => self.broker.consume(&reply_queue).await,
            Err(e) => Err(e),
        };
        let consumer = match started {
            Ok(consumer) => consumer,
            Err(e) => {
                if let Err(cleanup) = self.broker.delete_queue(&reply_queue).await {
                    warn!(reply_queue = %reply_queue, "Releasing unused reply queue failed: {}", cleanup);
                }
                return Err(e);
            }
        };

        info!(
            correlation_id = %correlation_id,
            num_frames = request.num_frames,
            width = request.width,
            height = request.height,
            sources = request.sources.len(),
            "Submitted request"
        );

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let cancel = self.shutdown.child_token();

        let context = CorrelationContext {
            guard,
            reply_queue: reply_queue.clone(),
            expected_frames: request.num_frames,
            policy: options.policy,
            timeout: options.timeout,
        };
        let channels = SessionChannels {
            frames: frame_tx,
            completion: completion_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(driver::run_session(Arc::clone(&self.broker), context, consumer, channels));

        Ok(Session {
            correlation_id,
            reply_queue,
            frames: FrameStream {
                inner: UnboundedReceiverStream::new(frame_rx),
                guard: cancel.clone().drop_guard(),
            },
            completion: Completion { receiver: completion_rx },
            cancel,
        })
    }

    /// Cancel every outstanding session and close the broker connection.
    pub async fn close(&self) -> Result<()> {
        info!(outstanding = self.outstanding(), "Closing RPC client");
        self.shutdown.cancel();
        self.broker.close().await
    }
}

impl<B: Broker> Drop for RpcClient<B> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// One submitted request's reply stream.
///
/// Yields frames in arrival order and ends after the completing frame. A
/// failed session yields one `Err` and then ends. Dropping the session (or its
/// [`FrameStream`]) cancels it.
#[derive(Debug)]
pub struct Session {
    correlation_id: String,
    reply_queue: String,
    frames: FrameStream,
    completion: Completion,
    cancel: CancellationToken,
}

impl Session {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn reply_queue(&self) -> &str {
        &self.reply_queue
    }

    /// Stop consuming; the stream ends with [`FluidError::Cancelled`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this session when triggered
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the session to end, discarding frames not yet read.
    pub async fn completion(self) -> Result<SessionSummary> {
        let Session { frames, completion, .. } = self;
        // Keep the receiver alive so the driver does not see a hang-up.
        let _frames = frames;
        completion.await
    }

    /// Split into the frame stream and the completion future.
    pub fn into_parts(self) -> (FrameStream, Completion) {
        (self.frames, self.completion)
    }
}

impl Stream for Session {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames).poll_next(cx)
    }
}

pin_project! {
    /// Frames of one session; cancels the session when dropped
    pub struct FrameStream {
        #[pin]
        inner: UnboundedReceiverStream<Result<Frame>>,
        guard: DropGuard,
    }
}

impl std::fmt::Debug for FrameStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameStream").finish_non_exhaustive()
    }
}

impl Stream for FrameStream {
    type Item = Result<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project().inner.poll_next(cx)
    }
}

/// Resolves once with the session outcome
#[derive(Debug)]
pub struct Completion {
    receiver: oneshot::Receiver<Result<SessionSummary>>,
}

impl Future for Completion {
    type Output = Result<SessionSummary>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.receiver).poll(cx)) {
            Ok(outcome) => Poll::Ready(outcome),
            // Driver task went away without reporting, e.g. runtime shutdown.
            Err(_) => Poll::Ready(Err(FluidError::Cancelled)),
        }
    }
}
