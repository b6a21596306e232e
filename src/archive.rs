//! Incremental ZIP assembly
//!
//! Entries are buffered in memory while the run fetches resources and written
//! out in one compression pass by [`ArchiveAssembler::finalize`]. The state
//! machine is `Empty -> Accumulating -> Finalizing -> Finalized | Aborted`;
//! every mutator fails with [`Error::InvalidState`] once finalization started.

use std::io::{Cursor, Write};

use zip::CompressionMethod;
use zip::write::FileOptions;

use crate::error::{Error, Result};
use crate::progress::ProgressCoordinator;
use crate::types::Phase;
use crate::utils::{file_name_component, format_bytes};

/// Overall percent reported when compression starts
const COMPRESS_PERCENT: f32 = 90.0;

/// Lifecycle of an [`ArchiveAssembler`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveState {
    /// Nothing added yet
    Empty,
    /// At least one entry or the text entry was added
    Accumulating,
    /// Compression in progress
    Finalizing,
    /// Blob produced; frozen
    Finalized,
    /// Discarded without producing a blob
    Aborted,
}

impl ArchiveState {
    fn as_str(&self) -> &'static str {
        match self {
            ArchiveState::Empty => "empty",
            ArchiveState::Accumulating => "accumulating",
            ArchiveState::Finalizing => "finalizing",
            ArchiveState::Finalized => "finalized",
            ArchiveState::Aborted => "aborted",
        }
    }

    fn accepts_entries(&self) -> bool {
        matches!(self, ArchiveState::Empty | ArchiveState::Accumulating)
    }
}

impl std::fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finalized archive ready to be persisted
#[derive(Clone, Debug)]
pub struct ArchiveBlob {
    /// Compressed ZIP bytes
    pub bytes: Vec<u8>,
    /// Number of entries, text entry included
    pub entry_count: usize,
    /// Sum of entry sizes before compression
    pub uncompressed_bytes: u64,
}

/// Accumulates `(path, bytes)` entries and an optional text entry into one ZIP
///
/// Paths are written as given; callers resolve collisions beforehand.
#[derive(Debug)]
pub struct ArchiveAssembler {
    state: ArchiveState,
    entries: Vec<(String, Vec<u8>)>,
    text: Option<(String, String)>,
    uncompressed_bytes: u64,
}

impl Default for ArchiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ArchiveAssembler {
    /// Create an empty assembler
    pub fn new() -> Self {
        Self {
            state: ArchiveState::Empty,
            entries: Vec::new(),
            text: None,
            uncompressed_bytes: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> ArchiveState {
        self.state
    }

    /// Entries added so far, text entry included
    pub fn entry_count(&self) -> usize {
        self.entries.len() + usize::from(self.text.is_some())
    }

    /// Sum of entry sizes added so far
    pub fn uncompressed_bytes(&self) -> u64 {
        self.uncompressed_bytes
    }

    /// Add a binary entry
    ///
    /// Entries sit at the archive root; `path` is reduced to its file name.
    pub fn add_entry(&mut self, path: impl Into<String>, bytes: Vec<u8>) -> Result<()> {
        if !self.state.accepts_entries() {
            return Err(Error::invalid_state("add entry", self.state.as_str()));
        }
        let path = file_name_component(&path.into());
        tracing::debug!(path = %path, bytes = bytes.len(), "adding archive entry");
        self.uncompressed_bytes += bytes.len() as u64;
        self.entries.push((path, bytes));
        self.state = ArchiveState::Accumulating;
        Ok(())
    }

    /// Add the text entry; allowed at most once
    pub fn add_text(&mut self, path: impl Into<String>, text: impl Into<String>) -> Result<()> {
        if !self.state.accepts_entries() {
            return Err(Error::invalid_state("add text", self.state.as_str()));
        }
        if self.text.is_some() {
            return Err(Error::invalid_state("add text", "text entry already present"));
        }
        let text = text.into();
        self.uncompressed_bytes += text.len() as u64;
        self.text = Some((file_name_component(&path.into()), text));
        self.state = ArchiveState::Accumulating;
        Ok(())
    }

    /// Discard everything added so far
    ///
    /// A finalized assembler keeps its state; its blob was already handed out.
    pub fn abort(&mut self) {
        if self.state == ArchiveState::Finalized {
            return;
        }
        if !self.entries.is_empty() {
            tracing::debug!(entries = self.entry_count(), "discarding archive entries");
        }
        self.entries.clear();
        self.text = None;
        self.state = ArchiveState::Aborted;
    }

    /// Compress everything into one ZIP blob
    ///
    /// Compression runs on the blocking pool with DEFLATE at `level`. A
    /// cancellation seen before compression starts aborts the assembler; one
    /// that arrives during compression lets it finish and discards the blob.
    /// Emits `compressing` events before and after the compression step.
    pub async fn finalize(
        &mut self,
        level: u32,
        progress: &ProgressCoordinator,
    ) -> Result<ArchiveBlob> {
        if !self.state.accepts_entries() {
            return Err(Error::invalid_state("finalize", self.state.as_str()));
        }
        if progress.is_cancelled() {
            self.abort();
            return Err(Error::Aborted);
        }

        self.state = ArchiveState::Finalizing;
        let entry_count = self.entry_count();
        let uncompressed_bytes = self.uncompressed_bytes;
        let entries = std::mem::take(&mut self.entries);
        let text = self.text.take();

        progress.emit(
            Phase::Compressing,
            format!("Creating ZIP file with {entry_count} entries..."),
            Some(COMPRESS_PERCENT),
            None,
        );
        tracing::debug!(entry_count, uncompressed_bytes, level, "compressing archive");

        let result = tokio::task::spawn_blocking(move || write_zip(entries, text, level))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(format!("compression task failed: {e}"))))
            .and_then(|r| r);

        let bytes = match result {
            Ok(bytes) => bytes,
            Err(e) => {
                self.state = ArchiveState::Aborted;
                return Err(e);
            }
        };

        if progress.is_cancelled() {
            tracing::debug!(bytes = bytes.len(), "discarding archive compressed after cancellation");
            self.state = ArchiveState::Aborted;
            return Err(Error::Aborted);
        }

        progress.emit(
            Phase::Compressing,
            format!(
                "ZIP file created ({} from {})",
                format_bytes(bytes.len() as u64),
                format_bytes(uncompressed_bytes)
            ),
            Some(COMPRESS_PERCENT),
            None,
        );
        self.state = ArchiveState::Finalized;
        Ok(ArchiveBlob {
            bytes,
            entry_count,
            uncompressed_bytes,
        })
    }
}

fn write_zip(
    entries: Vec<(String, Vec<u8>)>,
    text: Option<(String, String)>,
    level: u32,
) -> Result<Vec<u8>> {
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level.min(9) as i32));

    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (path, bytes) in entries {
        zip.start_file(path, options)?;
        zip.write_all(&bytes)?;
    }
    if let Some((path, text)) = text {
        zip.start_file(path, options)?;
        zip.write_all(text.as_bytes())?;
    }
    Ok(zip.finish()?.into_inner())
}
