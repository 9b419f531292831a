//! Streaming client for a remote fluid simulation service.
//!
//! A host submits simulation parameters (frame count, field size, sources) to
//! a service over a message broker and gets back a stream of frames, one per
//! time step. Frames are buffered as they arrive and played back at the host's
//! cadence onto a greyscale image.
//!
//! # Features
//!
//! - **Concurrent sessions**: each request gets its own reply queue and
//!   correlation id over one shared connection
//! - **Progressive display**: playback starts while frames are still arriving
//! - **Deadlines and cancellation**: sessions never wait forever unless asked to
//! - **In-process broker**: the full protocol runs without RabbitMQ, with the
//!   `amqp` feature for the real thing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use fluidstream::{Broker, ClientConfig, Fluid, SimulationService, SourceSplat, Source, Vec2};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::default();
//!     let mut controller = Fluid::in_memory(&config)?;
//!
//!     // Serve requests in-process. Declaring the queue up front keeps the
//!     // first request from being dropped before the service subscribes.
//!     let broker = controller.client().broker().clone();
//!     broker.declare_queue(&config.request_queue).await?;
//!     let service = SimulationService::new(broker, SourceSplat::default());
//!     let _service = service.spawn(CancellationToken::new());
//!
//!     let source = Source::from_drag(Vec2::new(50.0, 50.0), Vec2::new(80.0, 60.0));
//!     let submission = controller.submit_request(60, 250, 250, [source]).await?;
//!     let summary = submission.completion().await?;
//!     println!("{} frames, {:?} per frame", summary.frames_delivered, summary.time_per_frame());
//!
//!     while controller.tick().is_some() {}
//!     std::fs::write("frame.pgm", controller.surface().to_pgm())?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

// Core types and error handling
mod error;
#[cfg_attr(any(test, feature = "benchmark"), path = "test_utils.rs")]
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;
pub mod types;
pub mod wire;

// Transport and protocol
pub mod broker;
pub mod service;
pub mod session;

// Display pipeline
pub mod buffer;
pub mod config;
pub mod controller;
pub mod pixel;
pub mod playback;

// Core exports
pub use error::*;
pub use types::*;

pub use broker::{Broker, MemoryBroker};
#[cfg(feature = "amqp")]
pub use broker::AmqpBroker;

pub use buffer::FrameBuffer;
pub use config::{AutoPlay, ClientConfig};
pub use controller::{ControllerEvent, FluidController, Submission};
pub use pixel::ImageSurface;
pub use playback::PlaybackScheduler;
pub use service::{ServiceStats, Simulation, SimulationService, SourceSplat};
pub use session::{CompletionPolicy, RpcClient, Session, SessionSummary, SubmitOptions};

/// Entry point for building a [`FluidController`] from configuration.
///
/// # Examples
///
/// ## In-process broker
/// ```rust
/// use fluidstream::{ClientConfig, Fluid};
///
/// # #[tokio::main]
/// # async fn main() -> fluidstream::Result<()> {
/// let controller = Fluid::in_memory(&ClientConfig::default())?;
/// assert_eq!(controller.surface().width(), 250);
/// # Ok(())
/// # }
/// ```
pub struct Fluid;

impl Fluid {
    /// Controller over a fresh [`MemoryBroker`].
    ///
    /// The broker is reachable through `controller.client().broker()` for
    /// running a [`SimulationService`] next to it.
    pub fn in_memory(config: &ClientConfig) -> Result<FluidController<MemoryBroker>> {
        config.validate()?;
        Ok(FluidController::new(Arc::new(MemoryBroker::new()), config))
    }

    /// Controller over an AMQP connection to `config.broker_url`.
    ///
    /// # Errors
    ///
    /// Returns [`FluidError::Connection`] if the broker cannot be reached or
    /// the handshake fails.
    ///
    /// ```rust,no_run
    /// use fluidstream::{ClientConfig, Fluid};
    ///
    /// # #[tokio::main]
    /// # async fn main() -> fluidstream::Result<()> {
    /// let config = ClientConfig::default().with_env_overrides()?;
    /// let controller = Fluid::connect(&config).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[cfg(feature = "amqp")]
    pub async fn connect(config: &ClientConfig) -> Result<FluidController<AmqpBroker>> {
        config.validate()?;
        let broker = AmqpBroker::connect(&config.broker_url).await?;
        Ok(FluidController::new(Arc::new(broker), config))
    }
}
