//! Progress aggregation and cooperative cancellation for one transfer run
//!
//! A [`ProgressCoordinator`] is created per run and passed explicitly to every
//! component. Clones share state, so concurrent individual-persist tasks can
//! report through the same coordinator: the status line is last-write-wins and
//! the byte counter only accumulates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::types::{Phase, ProgressEvent};

/// Capacity of the event broadcast channel; slow subscribers skip ahead
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Passive observer of progress events
///
/// Called synchronously by the emitting task after the coordinator's state is
/// released, so a sink may call back into the coordinator (e.g. to cancel).
/// Implementations must not block. Sink calls from concurrent emitters may
/// interleave; the broadcast stream keeps the accepted order.
pub trait ProgressSink: Send + Sync {
    /// Receive one event
    fn on_event(&self, event: &ProgressEvent);
}

impl ProgressSink for broadcast::Sender<ProgressEvent> {
    fn on_event(&self, event: &ProgressEvent) {
        // No receivers is fine
        self.send(event.clone()).ok();
    }
}

/// Snapshot of a run's progress
#[derive(Clone, Debug, PartialEq)]
pub struct ProgressState {
    /// Phase of the latest accepted event
    pub phase: Phase,
    /// Latest status line
    pub message: String,
    /// Overall percent (0.0 to 100.0)
    pub percent: f32,
    /// Bytes accumulated so far
    pub cumulative_bytes: u64,
    /// Whether cancellation was requested; never cleared within a run
    pub cancelled: bool,
}

struct Inner {
    state: Mutex<ProgressState>,
    cumulative_bytes: AtomicU64,
    cancel: CancellationToken,
    event_tx: broadcast::Sender<ProgressEvent>,
    sink: Option<Arc<dyn ProgressSink>>,
}

/// Aggregates progress from every step of a run and carries its cancellation flag
#[derive(Clone)]
pub struct ProgressCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProgressCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressCoordinator")
            .field("state", &self.snapshot())
            .finish()
    }
}

impl Default for ProgressCoordinator {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProgressCoordinator {
    /// Create a coordinator for a fresh run, optionally forwarding events to `sink`
    pub fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ProgressState {
                    phase: Phase::Preparing,
                    message: String::new(),
                    percent: 0.0,
                    cumulative_bytes: 0,
                    cancelled: false,
                }),
                cumulative_bytes: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                event_tx,
                sink,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        // A panicking emitter cannot leave the state half-written; keep going.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Record progress and notify observers
    ///
    /// `percent` never moves backwards within a run; `bytes` is added to the
    /// cumulative counter. Returns `false` (and drops the event) once a
    /// terminal phase has been reached.
    pub fn emit(
        &self,
        phase: Phase,
        message: impl Into<String>,
        percent: Option<f32>,
        bytes: Option<u64>,
    ) -> bool {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            return false;
        }

        let total = match bytes {
            Some(n) => self.inner.cumulative_bytes.fetch_add(n, Ordering::Relaxed) + n,
            None => self.inner.cumulative_bytes.load(Ordering::Relaxed),
        };
        if let Some(p) = percent {
            state.percent = state.percent.max(p.clamp(0.0, 100.0));
        }
        if phase == Phase::Completed {
            state.percent = 100.0;
        }
        state.phase = phase;
        state.message = message.into();
        state.cumulative_bytes = total;

        let event = ProgressEvent {
            phase,
            message: state.message.clone(),
            percent: state.percent,
            cumulative_bytes: (total > 0).then_some(total),
        };
        tracing::trace!(?phase, percent = event.percent, message = %event.message, "progress");
        // Sending never waits on receivers, so it stays under the lock to keep order
        self.inner.event_tx.send(event.clone()).ok();
        drop(state);

        if let Some(sink) = &self.inner.sink {
            sink.on_event(&event);
        }
        true
    }

    /// Emit the `completed` terminal event
    pub fn complete(&self, message: impl Into<String>) -> bool {
        self.emit(Phase::Completed, message, Some(100.0), None)
    }

    /// Emit the `error` terminal event
    pub fn fail(&self, message: impl Into<String>) -> bool {
        self.emit(Phase::Error, message, None, None)
    }

    /// Emit the `cancelled` terminal event
    pub fn finish_cancelled(&self, message: impl Into<String>) -> bool {
        self.emit(Phase::Cancelled, message, None, None)
    }

    /// Request cooperative cancellation
    ///
    /// Idempotent. Returns `false` without effect if the run already reached a
    /// terminal phase.
    pub fn request_cancel(&self) -> bool {
        let mut state = self.lock();
        if state.phase.is_terminal() {
            return false;
        }
        if !state.cancelled {
            tracing::info!("Cancellation requested");
        }
        state.cancelled = true;
        self.inner.cancel.cancel();
        true
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Token that fires when cancellation is requested
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Bytes accumulated so far
    pub fn cumulative_bytes(&self) -> u64 {
        self.inner.cumulative_bytes.load(Ordering::Relaxed)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }
}

/// Maps a step's own 0-100 progress into a sub-range of the run's overall percent
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PercentSlice {
    /// Overall percent at the start of the step
    pub start: f32,
    /// Overall percent at the end of the step
    pub end: f32,
}

impl PercentSlice {
    /// A slice covering `start..end`
    pub fn new(start: f32, end: f32) -> Self {
        Self { start, end }
    }

    /// Overall percent for a step that is `step_percent` done
    pub fn at(&self, step_percent: f32) -> f32 {
        let fraction = step_percent.clamp(0.0, 100.0) / 100.0;
        self.start + (self.end - self.start) * fraction
    }
}
