//! Run lifecycle and terminal-state handling

use std::sync::Arc;

use chrono::Utc;

use super::TransferOrchestrator;
use super::session::{PREPARED_PERCENT, RunContext, TransferSession};
use crate::boundary::BoundaryWorker;
use crate::error::{Error, Result};
use crate::types::{Outcome, Phase, RunCounts, RunResult, RunStatus, TransferMode, TransferRequest};
use crate::utils::format_bytes;

impl TransferOrchestrator {
    /// Execute one transfer run
    ///
    /// Returns `Err` only when the run cannot start: the session was already
    /// used, or nothing is selected (no fetch is attempted then). Once started,
    /// every run ends in a [`RunResult`] whose status is completed, errored or
    /// cancelled. Per-resource failures never stop the run; they are reported
    /// in [`RunResult::individual_results`] and in the final message.
    pub async fn run(
        &self,
        session: &TransferSession,
        request: TransferRequest,
    ) -> Result<RunResult> {
        session.begin()?;
        let progress = session.progress();

        if request.is_empty() {
            tracing::debug!("nothing selected, refusing to start");
            progress.fail("No files selected");
            return Err(Error::NothingSelected);
        }

        let mut ctx = RunContext::new(request);
        tracing::info!(
            resources = ctx.total(),
            text = ctx.text.is_some(),
            mode = ?ctx.mode,
            "Starting transfer run"
        );
        tracing::debug!(state = "preparing");
        progress.emit(
            Phase::Preparing,
            format!("Preparing to download {} files...", ctx.total()),
            Some(PREPARED_PERCENT),
            None,
        );

        let outcome = self.drive(session, &mut ctx).await;
        Ok(self.finish(session, ctx, outcome).await)
    }

    async fn drive(&self, session: &TransferSession, ctx: &mut RunContext) -> Result<()> {
        match ctx.mode {
            TransferMode::Archive => {
                let (fetcher, worker) =
                    BoundaryWorker::spawn(Arc::clone(&self.boundary), &self.config);
                tracing::debug!(state = "per_resource_loop");
                let looped = self.run_resource_loop(session, ctx, &fetcher).await;
                // Closing the channel stops an idle worker
                drop(fetcher);
                if session.progress().is_cancelled() {
                    worker.abort();
                } else if let Err(e) = worker.await {
                    tracing::warn!(error = %e, "boundary worker ended abnormally");
                }
                looped?;
                self.add_text_entry(session, ctx)?;
                self.finalize_archive(session, ctx).await?;
            }
            TransferMode::Individual => {
                tracing::debug!(state = "individual_dispatch");
                self.run_individual_dispatch(session, ctx).await?;
            }
        }
        self.await_individual(session, ctx).await
    }

    /// Settle the run into its terminal state and emit the final event
    async fn finish(
        &self,
        session: &TransferSession,
        mut ctx: RunContext,
        outcome: Result<()>,
    ) -> RunResult {
        let progress = session.progress();

        let (status, error) = match outcome {
            Ok(()) => (RunStatus::Completed, None),
            Err(Error::Aborted) => {
                tracing::info!(attempted = ctx.attempted, "Transfer run cancelled");
                self.cancel_outstanding(&mut ctx).await;
                if ctx.archive.is_none() {
                    ctx.assembler.abort();
                    ctx.discard_archived(|| Outcome::Skipped {
                        reason: "archive discarded after cancellation".to_string(),
                    });
                }
                ctx.skip_unattempted("cancelled before transfer");
                (RunStatus::Cancelled, None)
            }
            Err(e) => {
                tracing::error!(error = %e, code = e.error_code(), "Transfer run failed");
                // Transfers already handed off are independent of the archive
                if self.await_individual(session, &mut ctx).await.is_err() {
                    self.cancel_outstanding(&mut ctx).await;
                }
                if ctx.archive.is_none() {
                    ctx.assembler.abort();
                    ctx.discard_archived(|| Outcome::failed(&e));
                }
                ctx.skip_unattempted("run failed before transfer");
                (RunStatus::Errored, Some(e))
            }
        };

        let counts = RunCounts::tally(&ctx.results);
        let cumulative_bytes = progress.cumulative_bytes();
        let message = summary(status, &ctx, &counts, cumulative_bytes, error.as_ref());
        match status {
            RunStatus::Completed => progress.complete(message.clone()),
            RunStatus::Cancelled => progress.finish_cancelled(message.clone()),
            RunStatus::Errored => progress.fail(message.clone()),
        };
        tracing::info!(
            ?status,
            archived = counts.archived,
            persisted = counts.persisted,
            failed = counts.failed,
            skipped = counts.skipped,
            bytes = cumulative_bytes,
            "Transfer run finished"
        );

        RunResult {
            status,
            archive: ctx.archive,
            individual_results: ctx.results,
            text_outcome: ctx.text_outcome,
            counts,
            message,
            cumulative_bytes,
            started_at: ctx.started_at,
            finished_at: Utc::now(),
            error,
        }
    }
}

/// Final status line of a run
fn summary(
    status: RunStatus,
    ctx: &RunContext,
    counts: &RunCounts,
    cumulative_bytes: u64,
    error: Option<&Error>,
) -> String {
    let mut message = match status {
        RunStatus::Completed if ctx.total() == 0 => {
            "Download completed! Text content saved".to_string()
        }
        RunStatus::Completed => format!(
            "Download completed! {}/{} files ({}) saved",
            counts.succeeded(),
            ctx.total(),
            format_bytes(cumulative_bytes)
        ),
        RunStatus::Cancelled => format!(
            "Download cancelled: {}/{} files saved",
            counts.succeeded(),
            ctx.total()
        ),
        RunStatus::Errored => match error {
            Some(e) => format!("Download failed: {e}"),
            None => "Download failed".to_string(),
        },
    };

    if status == RunStatus::Completed && counts.persisted > 0 {
        message.push_str(&format!(" + {} individually", counts.persisted));
    }
    let failed = ctx.failed_names();
    if !failed.is_empty() {
        message.push_str(&format!("; failed: {}", failed.join(", ")));
    }
    if matches!(ctx.text_outcome, Some(Outcome::Failed { .. })) {
        message.push_str("; text content failed");
    }
    if status == RunStatus::Completed && counts.skipped > 0 {
        message.push_str(&format!("; {} skipped", counts.skipped));
    }
    message
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IndividualResult, ResourceDescriptor, ResourceKind, TransferHandle};

    fn context(n: usize) -> RunContext {
        RunContext::new(TransferRequest {
            resources: (0..n)
                .map(|i| {
                    ResourceDescriptor::new(
                        format!("u{i}"),
                        format!("f{i}.png"),
                        ResourceKind::File,
                    )
                })
                .collect(),
            ..TransferRequest::default()
        })
    }

    #[test]
    fn summary_lists_failures_and_individual_saves() {
        let mut ctx = context(3);
        let descriptors = ctx.selected.clone();
        ctx.results = vec![
            IndividualResult {
                descriptor: descriptors[0].clone(),
                outcome: Outcome::Archived {
                    path: "f0.png".into(),
                    bytes: 10,
                },
            },
            IndividualResult {
                descriptor: descriptors[1].clone(),
                outcome: Outcome::failed(&Error::Fetch {
                    status: 404,
                    url: "u1".into(),
                }),
            },
            IndividualResult {
                descriptor: descriptors[2].clone(),
                outcome: Outcome::Persisted {
                    name: "f2.png".into(),
                    handle: TransferHandle(1),
                },
            },
        ];
        let counts = RunCounts::tally(&ctx.results);
        let message = summary(RunStatus::Completed, &ctx, &counts, 2048, None);
        assert_eq!(
            message,
            "Download completed! 2/3 files (2 KB) saved + 1 individually; failed: f1.png"
        );
    }

    #[test]
    fn summary_reports_structural_error() {
        let ctx = context(1);
        let message = summary(
            RunStatus::Errored,
            &ctx,
            &RunCounts::default(),
            0,
            Some(&Error::Persistence("disk full".into())),
        );
        assert_eq!(message, "Download failed: persistence failed: disk full");
    }

    #[test]
    fn summary_of_text_only_run() {
        let ctx = context(0);
        let message = summary(RunStatus::Completed, &ctx, &RunCounts::default(), 5, None);
        assert_eq!(message, "Download completed! Text content saved");
    }
}
