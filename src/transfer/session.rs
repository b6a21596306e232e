//! Run-scoped state: the caller-facing session and the orchestrator's working context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinSet;

use crate::archive::ArchiveAssembler;
use crate::error::{Error, Result};
use crate::persist::PersistedFile;
use crate::progress::{PercentSlice, ProgressCoordinator, ProgressSink};
use crate::types::{
    ArchiveReceipt, IndividualResult, Outcome, ProgressEvent, ResourceDescriptor, TransferHandle,
    TransferMode, TransferRequest,
};
use crate::utils::{NameRegistry, filename_from_url};

/// Overall percent after preparation
pub(super) const PREPARED_PERCENT: f32 = 5.0;
/// Loop start without a text payload
const LOOP_START_PERCENT: f32 = 10.0;
/// Loop start when a text payload is included
const LOOP_START_WITH_TEXT_PERCENT: f32 = 15.0;
/// Loop end; the rest is compression and persistence
const LOOP_END_PERCENT: f32 = 80.0;
/// Overall percent while the archive is written
pub(super) const PERSIST_PERCENT: f32 = 95.0;

/// Handle on one transfer run
///
/// Created by [`TransferOrchestrator::session`](super::TransferOrchestrator::session)
/// before the run starts, so callers can subscribe to progress and cancel from
/// another task. Clones refer to the same run. A session drives exactly one run.
#[derive(Clone)]
pub struct TransferSession {
    progress: ProgressCoordinator,
    handles: Arc<Mutex<Vec<TransferHandle>>>,
    started: Arc<AtomicBool>,
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("progress", &self.progress)
            .field("handles", &self.handles())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}

impl TransferSession {
    pub(super) fn new(sink: Option<Arc<dyn ProgressSink>>) -> Self {
        Self {
            progress: ProgressCoordinator::new(sink),
            handles: Arc::new(Mutex::new(Vec::new())),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Progress and cancellation state of the run
    pub fn progress(&self) -> &ProgressCoordinator {
        &self.progress
    }

    /// Receive progress events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.progress.subscribe()
    }

    /// Request cooperative cancellation; `false` if the run already finished
    pub fn cancel(&self) -> bool {
        self.progress.request_cancel()
    }

    /// Handles issued to individual persists so far
    pub fn handles(&self) -> Vec<TransferHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(super) fn track(&self, handle: TransferHandle) {
        self.handles
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    pub(super) fn begin(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::invalid_state("run", "session already used"));
        }
        Ok(())
    }
}

/// What a dispatched transfer stands for
#[derive(Clone, Debug)]
pub(super) enum Subject {
    Resource(ResourceDescriptor),
    Text,
}

/// An individual persist handed off to the persistence capability
#[derive(Debug)]
pub(super) struct Dispatched {
    pub(super) subject: Subject,
    pub(super) name: String,
    pub(super) handle: TransferHandle,
    pub(super) settled: bool,
}

/// Settlement reported by a join task
pub(super) type Settled = (TransferHandle, Result<PersistedFile>);

/// Working state of one run, owned by the orchestrator's control flow
pub(super) struct RunContext {
    pub(super) selected: Vec<ResourceDescriptor>,
    pub(super) text: Option<String>,
    pub(super) title: Option<String>,
    pub(super) mode: TransferMode,
    pub(super) assembler: ArchiveAssembler,
    pub(super) names: NameRegistry,
    pub(super) results: Vec<IndividualResult>,
    pub(super) text_outcome: Option<Outcome>,
    /// Set once the archive has been persisted
    pub(super) archive: Option<ArchiveReceipt>,
    pub(super) dispatched: Vec<Dispatched>,
    pub(super) pending: JoinSet<Settled>,
    /// Selected descriptors the loop has reached
    pub(super) attempted: usize,
    pub(super) started_at: DateTime<Utc>,
}

impl RunContext {
    pub(super) fn new(request: TransferRequest) -> Self {
        let prefix = request
            .auto_rename
            .then(|| request.title.clone().unwrap_or_else(|| "post".to_string()));
        let selected: Vec<ResourceDescriptor> = request
            .selected()
            .cloned()
            .map(|mut descriptor| {
                if descriptor.suggested_name.trim().is_empty() {
                    descriptor.suggested_name = filename_from_url(&descriptor.source_url);
                }
                descriptor
            })
            .collect();
        Self {
            selected,
            text: request.text,
            title: request.title,
            mode: request.mode,
            assembler: ArchiveAssembler::new(),
            names: NameRegistry::with_prefix(prefix.as_deref()),
            results: Vec::new(),
            text_outcome: None,
            archive: None,
            dispatched: Vec::new(),
            pending: JoinSet::new(),
            attempted: 0,
            started_at: Utc::now(),
        }
    }

    pub(super) fn total(&self) -> usize {
        self.selected.len()
    }

    /// Percent range of the `index`-th selected descriptor
    pub(super) fn resource_slice(&self, index: usize) -> PercentSlice {
        let start = if self.text.is_some() {
            LOOP_START_WITH_TEXT_PERCENT
        } else {
            LOOP_START_PERCENT
        };
        let range = LOOP_END_PERCENT - start;
        let total = self.total().max(1) as f32;
        PercentSlice::new(
            start + range * index as f32 / total,
            start + range * (index + 1) as f32 / total,
        )
    }

    pub(super) fn loop_start_percent(&self) -> f32 {
        self.resource_slice(0).start
    }

    pub(super) fn record(&mut self, subject: Subject, outcome: Outcome) {
        match subject {
            Subject::Resource(descriptor) => {
                self.results.push(IndividualResult {
                    descriptor,
                    outcome,
                })
            }
            Subject::Text => self.text_outcome = Some(outcome),
        }
    }

    /// Record the settlement of a dispatched handle
    pub(super) fn settle(&mut self, handle: TransferHandle, outcome: Outcome) {
        let Some(dispatched) = self
            .dispatched
            .iter_mut()
            .find(|d| d.handle == handle && !d.settled)
        else {
            tracing::warn!(handle = %handle, "settlement for unknown transfer handle");
            return;
        };
        dispatched.settled = true;
        let subject = dispatched.subject.clone();
        self.record(subject, outcome);
    }

    /// Dispatched handles that have not settled yet
    pub(super) fn unsettled(&self) -> Vec<TransferHandle> {
        self.dispatched
            .iter()
            .filter(|d| !d.settled)
            .map(|d| d.handle)
            .collect()
    }

    /// Settle every outstanding dispatch with `outcome`
    pub(super) fn settle_remaining(&mut self, outcome: impl Fn() -> Outcome) {
        for handle in self.unsettled() {
            self.settle(handle, outcome());
        }
    }

    /// Rewrite archive outcomes after the archive was lost
    pub(super) fn discard_archived(&mut self, outcome: impl Fn() -> Outcome) {
        for result in &mut self.results {
            if matches!(result.outcome, Outcome::Archived { .. }) {
                result.outcome = outcome();
            }
        }
        if matches!(self.text_outcome, Some(Outcome::Archived { .. })) {
            self.text_outcome = Some(outcome());
        }
    }

    /// Record descriptors the loop never reached
    pub(super) fn skip_unattempted(&mut self, reason: &str) {
        let remaining: Vec<ResourceDescriptor> =
            self.selected.iter().skip(self.attempted).cloned().collect();
        self.attempted = self.selected.len();
        for descriptor in remaining {
            self.record(
                Subject::Resource(descriptor),
                Outcome::Skipped {
                    reason: reason.to_string(),
                },
            );
        }
    }

    /// Suggested names of failed descriptors, in result order
    pub(super) fn failed_names(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, Outcome::Failed { .. }))
            .map(|r| r.descriptor.suggested_name.as_str())
            .collect()
    }
}
