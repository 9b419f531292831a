//! Host-facing controller tying sessions, buffer and playback together
//!
//! A [`FluidController`] owns one [`RpcClient`], the shared [`FrameBuffer`]
//! and a [`PlaybackScheduler`]. At most one submission is active: submitting
//! again, resizing or clearing abandons the previous session, and a frame from
//! an abandoned session never lands in the buffer.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fluidstream::{ClientConfig, ControllerEvent, FluidController, MemoryBroker, Source, Vec2};
//!
//! # #[tokio::main]
//! # async fn main() -> fluidstream::Result<()> {
//! let broker = Arc::new(MemoryBroker::new());
//! let mut controller = FluidController::new(broker, &ClientConfig::default());
//!
//! let source = Source::from_drag(Vec2::new(40.0, 40.0), Vec2::new(60.0, 50.0));
//! let mut submission = controller.submit_request(30, 250, 250, [source]).await?;
//!
//! while let Some(event) = submission.next_event().await {
//!     controller.tick();
//!     if let ControllerEvent::Completed { per_frame, .. } = event {
//!         println!("{:?} per frame", per_frame);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::Broker;
use crate::buffer::FrameBuffer;
use crate::config::{AutoPlay, ClientConfig};
use crate::pixel::ImageSurface;
use crate::playback::PlaybackScheduler;
use crate::session::{RpcClient, Session, SessionSummary, duplicate_error};
use crate::types::{Request, Source};
use crate::{FluidError, Result};

/// Progress notifications for one submission
#[derive(Debug)]
pub enum ControllerEvent {
    /// A frame was appended to the buffer
    FrameReceived {
        frame_id: i32,
        /// Frames buffered so far for this submission
        received: usize,
        /// `received / num_frames`, capped at 1
        progress: f32,
    },
    /// The session completed normally
    Completed { frames: usize, elapsed: Duration, per_frame: Duration },
    /// The session ended without completing
    Failed(FluidError),
}

/// Handle to an accepted submission.
#[derive(Debug)]
pub struct Submission {
    correlation_id: String,
    events: mpsc::UnboundedReceiver<ControllerEvent>,
    completion: oneshot::Receiver<Result<SessionSummary>>,
}

impl Submission {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Next event, or `None` once the submission has ended.
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<ControllerEvent> {
        self.events.try_recv().ok()
    }

    /// Wait for the session outcome, discarding unread events.
    pub async fn completion(self) -> Result<SessionSummary> {
        self.completion.await.unwrap_or(Err(FluidError::Cancelled))
    }
}

struct ActiveSubmission {
    correlation_id: String,
    cancel: CancellationToken,
    /// Set once the session completes, consumed by autoplay
    ready: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Collaborator-facing entry point.
pub struct FluidController<B: Broker> {
    client: RpcClient<B>,
    buffer: FrameBuffer,
    playback: PlaybackScheduler,
    autoplay: AutoPlay,
    active: Option<ActiveSubmission>,
}

impl<B: Broker> FluidController<B> {
    pub fn new(broker: Arc<B>, config: &ClientConfig) -> Self {
        let client = RpcClient::new(broker)
            .with_request_queue(config.request_queue.clone())
            .with_default_options(config.submit_options());
        let buffer = FrameBuffer::new();
        let playback =
            PlaybackScheduler::new(buffer.clone(), config.surface_width, config.surface_height);
        Self { client, buffer, playback, autoplay: config.autoplay, active: None }
    }

    /// Abandon any active session, reset the display and submit a new request.
    pub async fn submit_request(
        &mut self,
        num_frames: i32,
        width: i32,
        height: i32,
        sources: impl IntoIterator<Item = Source>,
    ) -> Result<Submission> {
        let request = Request::new(num_frames, width, height).with_sources(sources);
        request.validate()?;

        self.abandon();
        self.playback.stop();
        self.playback.clear();
        let generation = self.buffer.reset();

        let session = self.client.submit(request).await?;
        let correlation_id = session.correlation_id().to_string();
        let cancel = session.cancel_token();
        let ready = Arc::new(AtomicBool::new(false));

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (completion_tx, completion_rx) = oneshot::channel();
        let task = tokio::spawn(deliver(
            session,
            self.buffer.clone(),
            generation,
            num_frames,
            event_tx,
            completion_tx,
            Arc::clone(&ready),
        ));

        self.active =
            Some(ActiveSubmission { correlation_id: correlation_id.clone(), cancel, ready, task });
        if self.autoplay == AutoPlay::Immediately {
            self.playback.start();
        }

        Ok(Submission { correlation_id, events: event_rx, completion: completion_rx })
    }

    /// Abandon the active session and start over on a surface of the new size.
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.abandon();
        self.playback.resize(width, height);
    }

    /// Abandon the active session and drop all frames. The connection stays open.
    pub fn on_clear(&mut self) {
        self.playback.stop();
        self.abandon();
        self.buffer.reset();
        self.playback.clear();
    }

    /// Advance playback by one frame.
    pub fn tick(&mut self) -> Option<i32> {
        if self.autoplay == AutoPlay::OnCompletion {
            if let Some(active) = &self.active {
                if active.ready.swap(false, Ordering::AcqRel) {
                    debug!(correlation_id = %active.correlation_id, "Starting playback after completion");
                    self.playback.start();
                }
            }
        }
        self.playback.tick()
    }

    pub fn start(&mut self) {
        self.playback.start();
    }

    pub fn stop(&mut self) {
        self.playback.stop();
    }

    pub fn surface(&self) -> &ImageSurface {
        self.playback.surface()
    }

    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn playback(&self) -> &PlaybackScheduler {
        &self.playback
    }

    pub fn client(&self) -> &RpcClient<B> {
        &self.client
    }

    /// Correlation id of the active submission
    pub fn active_correlation_id(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.correlation_id.as_str())
    }

    /// Stop playback, abandon the active session and close the connection.
    pub async fn close(&mut self) -> Result<()> {
        self.playback.stop();
        let active = self.active.take();
        if let Some(active) = &active {
            active.cancel.cancel();
        }
        self.client.close().await?;
        if let Some(active) = active {
            let _ = active.task.await;
        }
        info!("Controller closed");
        Ok(())
    }

    fn abandon(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(correlation_id = %active.correlation_id, "Abandoning active session");
            active.cancel.cancel();
        }
    }
}

/// Move frames from `session` into `buffer` until it ends or is abandoned.
async fn deliver(
    session: Session,
    buffer: FrameBuffer,
    generation: u64,
    expected: i32,
    events: mpsc::UnboundedSender<ControllerEvent>,
    completion: oneshot::Sender<Result<SessionSummary>>,
    ready: Arc<AtomicBool>,
) {
    let correlation_id = session.correlation_id().to_string();
    let (mut frames, outcome) = session.into_parts();
    let mut received = 0usize;

    while let Some(item) = frames.next().await {
        // Session errors are reported once, through the completion.
        let Ok(frame) = item else { continue };
        let frame_id = frame.frame_id;
        if !buffer.append_if_generation(generation, frame) {
            debug!(correlation_id = %correlation_id, "Buffer was reset, stopping delivery");
            break;
        }
        received += 1;
        let progress = (received as f32 / expected.max(1) as f32).min(1.0);
        let _ = events.send(ControllerEvent::FrameReceived { frame_id, received, progress });
    }
    drop(frames);

    let result = outcome.await;
    match &result {
        Ok(summary) => {
            ready.store(true, Ordering::Release);
            info!(
                correlation_id = %correlation_id,
                frames = summary.frames_delivered,
                "Time per frame: {:?}",
                summary.time_per_frame()
            );
            let _ = events.send(ControllerEvent::Completed {
                frames: summary.frames_delivered,
                elapsed: summary.elapsed,
                per_frame: summary.time_per_frame(),
            });
        }
        Err(e) => {
            let _ = events.send(ControllerEvent::Failed(duplicate_error(e)));
        }
    }
    let _ = completion.send(result);
}
