//! Per-resource loop: fetch, route, then archive or dispatch each descriptor

use std::sync::Arc;

use super::TransferOrchestrator;
use super::session::{Dispatched, RunContext, Subject, TransferSession};
use crate::boundary::BoundaryFetcher;
use crate::error::{Error, Result};
use crate::persist::PersistSource;
use crate::types::{Outcome, Phase, TransferPlan};
use crate::utils::format_bytes;

/// Name of the text entry before prefixing
pub(super) const TEXT_ENTRY_NAME: &str = "content.txt";

impl TransferOrchestrator {
    /// Fetch every selected descriptor across the boundary and act on its plan
    ///
    /// Per-resource failures are recorded and the loop moves on. Cancellation is
    /// checked before each descriptor.
    pub(super) async fn run_resource_loop(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
        fetcher: &BoundaryFetcher,
    ) -> Result<()> {
        let progress = session.progress();
        let total = ctx.total();

        for index in 0..total {
            if progress.is_cancelled() {
                return Err(Error::Aborted);
            }
            ctx.attempted = index + 1;
            let descriptor = ctx.selected[index].clone();
            let name = descriptor.suggested_name.clone();
            let slice = ctx.resource_slice(index);

            if let Some(plan) = self.router.pre_route(&descriptor) {
                tracing::debug!(name = %name, ?plan, "routing video without fetching");
                self.dispatch(
                    session,
                    ctx,
                    Subject::Resource(descriptor.clone()),
                    PersistSource::Url(descriptor.source_url.clone()),
                    &name,
                )
                .await;
                progress.emit(
                    Phase::Processing,
                    format!("Downloading video: {name} (individual download)"),
                    Some(slice.end),
                    None,
                );
                continue;
            }

            let label = format!("{}/{}: {}", index + 1, total, name);
            let ceiling = self.router.ceiling_for(&name);
            let payload = match fetcher
                .fetch(&descriptor, ceiling, &label, slice, progress)
                .await
            {
                Ok(payload) => payload,
                Err(Error::Aborted) => {
                    ctx.record(
                        Subject::Resource(descriptor),
                        Outcome::Skipped {
                            reason: "cancelled".to_string(),
                        },
                    );
                    return Err(Error::Aborted);
                }
                Err(e) if e.is_per_resource() => {
                    tracing::warn!(
                        url = %descriptor.source_url,
                        name = %name,
                        error = %e,
                        "Resource failed, continuing with the next one"
                    );
                    progress.emit(
                        Phase::Processing,
                        format!("Failed to download: {name} ({e})"),
                        Some(slice.end),
                        None,
                    );
                    ctx.record(Subject::Resource(descriptor), Outcome::failed(&e));
                    continue;
                }
                Err(e) => {
                    ctx.record(Subject::Resource(descriptor), Outcome::failed(&e));
                    return Err(e);
                }
            };

            let size = payload.byte_length;
            match self.router.classify(&descriptor, &payload) {
                TransferPlan::Archive => {
                    let path = ctx.names.claim(&name);
                    ctx.assembler.add_entry(path.clone(), payload.bytes)?;
                    progress.emit(
                        Phase::Processing,
                        format!(
                            "Added {}/{}: {} ({}) - Total: {}",
                            index + 1,
                            total,
                            path,
                            format_bytes(size),
                            format_bytes(progress.cumulative_bytes())
                        ),
                        Some(slice.end),
                        None,
                    );
                    ctx.record(
                        Subject::Resource(descriptor),
                        Outcome::Archived { path, bytes: size },
                    );
                }
                TransferPlan::IndividualPersist => {
                    tracing::debug!(name = %name, bytes = size, "too large for the archive, persisting individually");
                    self.dispatch(
                        session,
                        ctx,
                        Subject::Resource(descriptor),
                        PersistSource::Bytes(payload.bytes),
                        &name,
                    )
                    .await;
                    progress.emit(
                        Phase::Processing,
                        format!("Downloaded individually: {name} ({})", format_bytes(size)),
                        Some(slice.end),
                        None,
                    );
                }
                TransferPlan::Rejected(reason) => {
                    tracing::warn!(name = %name, %reason, "Resource rejected");
                    progress.emit(
                        Phase::Processing,
                        format!("Skipped {name}: {reason}"),
                        Some(slice.end),
                        None,
                    );
                    ctx.record(
                        Subject::Resource(descriptor),
                        Outcome::Skipped {
                            reason: reason.to_string(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Dispatch every selected descriptor by URL and the text payload as its own file
    pub(super) async fn run_individual_dispatch(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let progress = session.progress();
        let total = ctx.total();

        for index in 0..total {
            if progress.is_cancelled() {
                return Err(Error::Aborted);
            }
            ctx.attempted = index + 1;
            let descriptor = ctx.selected[index].clone();
            let name = descriptor.suggested_name.clone();
            let source = PersistSource::Url(descriptor.source_url.clone());
            self.dispatch(session, ctx, Subject::Resource(descriptor), source, &name)
                .await;
            progress.emit(
                Phase::Processing,
                format!("Started {}/{}: {}", index + 1, total, name),
                Some(ctx.resource_slice(index).end),
                None,
            );
        }

        if let Some(text) = ctx.text.clone() {
            if progress.is_cancelled() {
                return Err(Error::Aborted);
            }
            self.dispatch(
                session,
                ctx,
                Subject::Text,
                PersistSource::Bytes(text.into_bytes()),
                TEXT_ENTRY_NAME,
            )
            .await;
        }
        Ok(())
    }

    /// Hand one transfer to the persistence capability and queue its settlement
    ///
    /// A transfer that fails to start is recorded as failed right away. Bytes
    /// written for URL sources are added to the run's cumulative counter once
    /// they settle.
    pub(super) async fn dispatch(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
        subject: Subject,
        source: PersistSource,
        suggested_name: &str,
    ) {
        let name = ctx.names.claim(suggested_name);
        // Bytes handed over as a payload were already counted when fetched
        let counts_bytes = matches!(source, PersistSource::Url(_));
        match self.persist.persist(source, &name).await {
            Ok(handle) => {
                session.track(handle);
                let persist = Arc::clone(&self.persist);
                let progress = session.progress().clone();
                let task_name = name.clone();
                ctx.pending.spawn(async move {
                    let result = persist.settle(handle).await;
                    match &result {
                        Ok(file) => {
                            progress.emit(
                                Phase::Processing,
                                format!("Saved {} ({})", task_name, format_bytes(file.bytes)),
                                None,
                                counts_bytes.then_some(file.bytes),
                            );
                        }
                        Err(e) => {
                            tracing::warn!(name = %task_name, handle = %handle, error = %e, "Individual transfer failed");
                        }
                    }
                    (handle, result)
                });
                ctx.dispatched.push(Dispatched {
                    subject,
                    name,
                    handle,
                    settled: false,
                });
            }
            Err(e) => {
                tracing::warn!(name = %name, error = %e, "Individual transfer failed to start");
                ctx.record(subject, Outcome::failed(&e));
            }
        }
    }
}
