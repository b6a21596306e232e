//! Archive finalization, archive persistence and the individual-transfer join

use std::time::Duration;

use futures::stream::{self, StreamExt};

use super::TransferOrchestrator;
use super::dispatch::TEXT_ENTRY_NAME;
use super::session::{PERSIST_PERCENT, RunContext, TransferSession};
use crate::archive::ArchiveBlob;
use crate::error::{Error, Result};
use crate::persist::{PersistFile, PersistSource, PersistedFile};
use crate::types::{ArchiveReceipt, Outcome, Phase, TransferHandle};
use crate::utils::{format_bytes, sanitize_filename};

/// Cancellation requests sent to the persistence capability at once
const CANCEL_CONCURRENCY: usize = 8;
/// How long cancelled transfers get to settle before their join tasks are aborted
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Archive name for a run titled `title`
pub(super) fn archive_name(title: Option<&str>) -> String {
    let base = title.filter(|t| !t.trim().is_empty()).unwrap_or("post");
    format!("{}.zip", sanitize_filename(base))
}

/// File name a settled transfer ended up under
fn persisted_name(file: &PersistedFile, requested: &str) -> String {
    file.path
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| requested.to_string())
}

impl TransferOrchestrator {
    /// Add the text payload to the archive
    pub(super) fn add_text_entry(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let Some(text) = ctx.text.clone() else {
            return Ok(());
        };
        if session.progress().is_cancelled() {
            return Err(Error::Aborted);
        }
        let path = ctx.names.claim(TEXT_ENTRY_NAME);
        let bytes = text.len() as u64;
        ctx.assembler.add_text(path.clone(), text)?;
        session.progress().emit(
            Phase::Processing,
            format!("Added text content as {path}"),
            None,
            None,
        );
        ctx.text_outcome = Some(Outcome::Archived { path, bytes });
        Ok(())
    }

    /// Compress the accumulated entries and persist the archive
    ///
    /// An archive without entries is not written.
    pub(super) async fn finalize_archive(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let progress = session.progress();
        if ctx.assembler.entry_count() == 0 {
            if progress.is_cancelled() {
                return Err(Error::Aborted);
            }
            tracing::debug!("no archive entries, skipping archive");
            ctx.assembler.abort();
            return Ok(());
        }

        tracing::debug!(state = "archive_finalizing", entries = ctx.assembler.entry_count());
        let blob = ctx
            .assembler
            .finalize(self.config.compression_level, progress)
            .await?;

        let name = archive_name(ctx.title.as_deref());
        progress.emit(
            Phase::Persisting,
            format!("Saving {name} ({})...", format_bytes(blob.bytes.len() as u64)),
            Some(PERSIST_PERCENT),
            None,
        );
        let receipt = self.persist_archive(session, blob, &name).await?;
        tracing::info!(
            name = %receipt.name,
            entries = receipt.entry_count,
            compressed = receipt.compressed_bytes,
            uncompressed = receipt.uncompressed_bytes,
            "Archive saved"
        );
        ctx.archive = Some(receipt);
        Ok(())
    }

    /// Write the archive, retrying once on the fallback destination
    async fn persist_archive(
        &self,
        session: &TransferSession,
        blob: ArchiveBlob,
        name: &str,
    ) -> Result<ArchiveReceipt> {
        let ArchiveBlob {
            bytes,
            entry_count,
            uncompressed_bytes,
        } = blob;
        let compressed_bytes = bytes.len() as u64;
        let retry_bytes = self.fallback.as_ref().map(|_| bytes.clone());

        let file = match self.save(session, self.persist.as_ref(), bytes, name).await {
            Ok(file) => file,
            Err(Error::Aborted) => return Err(Error::Aborted),
            Err(e) => {
                let (Some(fallback), Some(bytes)) = (self.fallback.as_ref(), retry_bytes) else {
                    return Err(into_persistence(e));
                };
                tracing::warn!(error = %e, "Archive write failed, trying fallback destination");
                session.progress().emit(
                    Phase::Persisting,
                    format!("Saving {name} failed, retrying at fallback location..."),
                    None,
                    None,
                );
                match self.save(session, fallback.as_ref(), bytes, name).await {
                    Ok(file) => file,
                    Err(Error::Aborted) => return Err(Error::Aborted),
                    Err(fallback_err) => {
                        return Err(Error::Persistence(format!(
                            "{e}; fallback also failed: {fallback_err}"
                        )));
                    }
                }
            }
        };

        Ok(ArchiveReceipt {
            name: persisted_name(&file, name),
            handle: file.handle,
            entry_count,
            compressed_bytes,
            uncompressed_bytes,
        })
    }

    /// Persist `bytes` on `persist` and wait for it, unless the run is cancelled first
    async fn save(
        &self,
        session: &TransferSession,
        persist: &dyn PersistFile,
        bytes: Vec<u8>,
        name: &str,
    ) -> Result<PersistedFile> {
        let cancel = session.progress().cancel_token();
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        let handle = persist.persist(PersistSource::Bytes(bytes), name).await?;
        tokio::select! {
            result = persist.settle(handle) => result,
            _ = cancel.cancelled() => {
                persist.cancel(handle).await;
                Err(Error::Aborted)
            }
        }
    }

    /// Wait for every dispatched individual transfer to settle
    pub(super) async fn await_individual(
        &self,
        session: &TransferSession,
        ctx: &mut RunContext,
    ) -> Result<()> {
        let outstanding = ctx.pending.len();
        if outstanding == 0 {
            return Ok(());
        }
        tracing::debug!(state = "awaiting_individual_completions", outstanding);
        session.progress().emit(
            Phase::Waiting,
            format!("Waiting for {outstanding} individual transfer(s) to complete..."),
            None,
            None,
        );

        let cancel = session.progress().cancel_token().clone();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Aborted),
                next = ctx.pending.join_next() => next,
            };
            match next {
                None => break,
                Some(Ok((handle, result))) => {
                    let outcome = settled_outcome(ctx, handle, result);
                    ctx.settle(handle, outcome);
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Individual transfer task failed");
                }
            }
        }

        // Only reachable when a join task panicked
        ctx.settle_remaining(|| Outcome::Failed {
            code: "persistence_error".to_string(),
            error: "transfer task ended without a result".to_string(),
        });
        Ok(())
    }

    /// Cancel and drain every outstanding individual transfer
    pub(super) async fn cancel_outstanding(&self, ctx: &mut RunContext) {
        let unsettled = ctx.unsettled();
        let cancelled: usize = stream::iter(unsettled.iter().copied())
            .map(|handle| self.persist.cancel(handle))
            .buffer_unordered(CANCEL_CONCURRENCY)
            .filter(|was_in_flight| futures::future::ready(*was_in_flight))
            .count()
            .await;
        tracing::debug!(
            outstanding = unsettled.len(),
            cancelled,
            "cancelled individual transfers"
        );

        let drained = tokio::time::timeout(CANCEL_GRACE_PERIOD, async {
            while let Some(joined) = ctx.pending.join_next().await {
                if let Ok((handle, result)) = joined {
                    let outcome = match result {
                        Err(Error::Aborted) => Outcome::Skipped {
                            reason: "cancelled".to_string(),
                        },
                        other => settled_outcome(ctx, handle, other),
                    };
                    ctx.settle(handle, outcome);
                }
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(
                remaining = ctx.pending.len(),
                "Individual transfers ignored cancellation, aborting their join tasks"
            );
            ctx.pending.abort_all();
            while ctx.pending.join_next().await.is_some() {}
        }
        ctx.settle_remaining(|| Outcome::Skipped {
            reason: "cancelled".to_string(),
        });
    }
}

fn settled_outcome(
    ctx: &RunContext,
    handle: TransferHandle,
    result: Result<PersistedFile>,
) -> Outcome {
    match result {
        Ok(file) => {
            let requested = ctx
                .dispatched
                .iter()
                .find(|d| d.handle == handle)
                .map(|d| d.name.as_str())
                .unwrap_or_default();
            Outcome::Persisted {
                name: persisted_name(&file, requested),
                handle,
            }
        }
        Err(e) => Outcome::failed(&e),
    }
}

fn into_persistence(error: Error) -> Error {
    match error {
        Error::Persistence(_) => error,
        other => Error::Persistence(other.to_string()),
    }
}
