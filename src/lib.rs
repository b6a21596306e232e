//! # bundle-dl
//!
//! Fetch a user-selected set of remote resources and deliver them as one
//! compressed archive, with live progress and cooperative cancellation.
//!
//! ## Design Philosophy
//!
//! bundle-dl is designed to be:
//! - **Boundary-aware** - The coordinator never fetches; a worker behind a
//!   message channel does, and hands bytes back as base64 frames
//! - **Partial-failure tolerant** - One broken resource never costs the rest
//!   of the archive
//! - **Library-first** - No CLI or UI; fetch and persistence are capabilities
//!   the embedding application can replace
//! - **Event-driven** - Consumers subscribe to progress events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use bundle_dl::{Config, ResourceDescriptor, ResourceKind, TransferOrchestrator, TransferRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.persist.output_dir = "./downloads".into();
//!
//!     let orchestrator = TransferOrchestrator::from_config(config)?;
//!     let session = orchestrator.session();
//!
//!     // Subscribe to progress
//!     let mut events = session.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("[{:?}] {:.0}% {}", event.phase, event.percent, event.message);
//!         }
//!     });
//!
//!     // Cancel on Ctrl+C
//!     tokio::spawn(bundle_dl::cancel_on_signal(session.clone()));
//!
//!     let request = TransferRequest {
//!         resources: vec![
//!             ResourceDescriptor::new("https://example.com/a.png", "a.png", ResourceKind::File),
//!             ResourceDescriptor::new("https://example.com/b.pdf", "b.pdf", ResourceKind::Attachment),
//!         ],
//!         text: Some("Post body".to_string()),
//!         title: Some("My post".to_string()),
//!         ..Default::default()
//!     };
//!     let result = orchestrator.run(&session, request).await?;
//!     println!("{}", result.message);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// ZIP archive assembly
pub mod archive;
/// The fetch boundary: capability trait, HTTP implementation and worker
pub mod boundary;
/// Chunked base64 transport codec
pub mod codec;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Persistence capability and its disk implementation
pub mod persist;
/// Progress aggregation and cancellation
pub mod progress;
/// Retry logic with exponential backoff
pub mod retry;
/// Archive vs individual routing
pub mod router;
/// Transfer orchestration (decomposed into focused submodules)
pub mod transfer;
/// Core types and events
pub mod types;
/// Utility functions
pub mod utils;

// Re-export commonly used types
pub use archive::{ArchiveAssembler, ArchiveBlob, ArchiveState};
pub use boundary::{FetchBoundary, FetchRequest, HttpFetchBoundary, RawResponse};
pub use codec::ChunkedCodec;
pub use config::{Config, FileCollisionAction};
pub use error::{Error, Result, Severity};
pub use persist::{DiskPersist, PersistFile, PersistSource, PersistedFile};
pub use progress::{ProgressCoordinator, ProgressSink, ProgressState};
pub use router::TransferRouter;
pub use transfer::{TransferOrchestrator, TransferSession};
pub use types::{
    ArchiveReceipt, FetchedPayload, IndividualResult, MediaClass, Outcome, Phase, ProgressEvent,
    ResourceDescriptor, ResourceKind, RunCounts, RunResult, RunStatus, TransferHandle,
    TransferMode, TransferPlan, TransferRequest,
};

/// Cancel `session` when the process receives a termination signal
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// Spawn it next to a run; if the run finishes first the cancellation is a no-op.
pub async fn cancel_on_signal(session: TransferSession) {
    wait_for_signal().await;
    if !session.cancel() {
        tracing::debug!("Signal received after the run finished");
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration may fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("Received SIGTERM signal"),
                _ = sigint.recv() => tracing::info!("Received SIGINT signal (Ctrl+C)"),
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
