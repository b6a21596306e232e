//! Transfer orchestration: the top-level driver of a run.
//!
//! Split into focused submodules:
//! - [`session`] - Caller-facing session handle and the run's working context
//! - [`orchestration`] - Run lifecycle and terminal-state handling
//! - [`dispatch`] - Per-resource loop, routing and individual dispatch
//! - [`finalization`] - Archive finalization, persistence and the completion join
//!
//! State machine of one run:
//!
//! ```text
//! Idle -> Preparing -> PerResourceLoop -> {ArchiveFinalizing | IndividualDispatch}
//!      -> AwaitingIndividualCompletions -> Completed
//! ```
//!
//! `Errored` is reachable from every non-terminal state; `Cancelled` from the
//! loop, archive finalization and the completion join.

use std::sync::Arc;

use crate::boundary::{FetchBoundary, HttpFetchBoundary};
use crate::config::Config;
use crate::error::Result;
use crate::persist::{DiskPersist, PersistFile};
use crate::progress::ProgressSink;
use crate::router::TransferRouter;

mod dispatch;
mod finalization;
mod orchestration;
mod session;


pub use session::TransferSession;

/// Drives transfer runs over a fetch boundary and a persistence capability
///
/// # Example
///
/// ```no_run
/// use bundle_dl::{Config, ResourceDescriptor, ResourceKind, TransferOrchestrator, TransferRequest};
///
/// # async fn example() -> bundle_dl::Result<()> {
/// let orchestrator = TransferOrchestrator::from_config(Config::default())?;
/// let session = orchestrator.session();
///
/// let mut events = session.subscribe();
/// tokio::spawn(async move {
///     while let Ok(event) = events.recv().await {
///         println!("{:>5.1}% {}", event.percent, event.message);
///     }
/// });
///
/// let request = TransferRequest {
///     resources: vec![ResourceDescriptor::new(
///         "https://example.com/files/a.png",
///         "a.png",
///         ResourceKind::File,
///     )],
///     title: Some("My post".into()),
///     ..TransferRequest::default()
/// };
/// let result = orchestrator.run(&session, request).await?.into_result()?;
/// println!("{}", result.message);
/// # Ok(())
/// # }
/// ```
pub struct TransferOrchestrator {
    config: Arc<Config>,
    router: TransferRouter,
    boundary: Arc<dyn FetchBoundary>,
    persist: Arc<dyn PersistFile>,
    fallback: Option<Arc<dyn PersistFile>>,
    sink: Option<Arc<dyn ProgressSink>>,
}

impl std::fmt::Debug for TransferOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferOrchestrator")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("fallback", &self.fallback.is_some())
            .field("sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

impl TransferOrchestrator {
    /// Create an orchestrator over explicit capabilities
    ///
    /// Fails with [`Error::Config`](crate::Error::Config) if `config` is inconsistent.
    pub fn new(
        config: Config,
        boundary: Arc<dyn FetchBoundary>,
        persist: Arc<dyn PersistFile>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            router: TransferRouter::new(&config),
            config: Arc::new(config),
            boundary,
            persist,
            fallback: None,
            sink: None,
        })
    }

    /// Create an orchestrator fetching over HTTP and persisting to disk
    ///
    /// Uses `persist.fallback_dir` as the fallback destination when set.
    pub fn from_config(config: Config) -> Result<Self> {
        let boundary = Arc::new(HttpFetchBoundary::new(&config.fetch)?);
        let persist = Arc::new(DiskPersist::from_config(&config)?);
        let fallback = DiskPersist::fallback_from_config(&config)?;
        let orchestrator = Self::new(config, boundary, persist)?;
        Ok(match fallback {
            Some(fallback) => orchestrator.with_fallback(Arc::new(fallback)),
            None => orchestrator,
        })
    }

    /// Retry a failed archive write on `fallback` before giving up
    pub fn with_fallback(mut self, fallback: Arc<dyn PersistFile>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Forward every progress event of every session to `sink`
    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// The validated configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// A fresh session for one run
    pub fn session(&self) -> TransferSession {
        TransferSession::new(self.sink.clone())
    }
}
