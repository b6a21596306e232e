//! Core types for bundle-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of an individual persist operation, issued by a [`PersistFile`](crate::persist::PersistFile)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferHandle(pub u64);

impl TransferHandle {
    /// Get the inner value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransferHandle {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TransferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a resource came from on the source page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// The post's main file
    #[default]
    File,
    /// An attachment listed under the post
    Attachment,
}

/// A resource selected for transfer
///
/// Immutable once created; consumed once per transfer attempt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// URL the bytes are fetched from
    pub source_url: String,
    /// Name the resource is persisted under (before prefixing and de-duplication)
    pub suggested_name: String,
    /// File or attachment
    #[serde(default)]
    pub kind: ResourceKind,
    /// Size announced by the source page, if known
    #[serde(default)]
    pub size_hint_bytes: Option<u64>,
    /// Whether the user selected this resource
    #[serde(default = "default_selected")]
    pub selected: bool,
}

fn default_selected() -> bool {
    true
}

impl ResourceDescriptor {
    /// Create a selected descriptor with no size hint
    pub fn new(
        source_url: impl Into<String>,
        suggested_name: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        Self {
            source_url: source_url.into(),
            suggested_name: suggested_name.into(),
            kind,
            size_hint_bytes: None,
            selected: true,
        }
    }

    /// Lowercase extension of the suggested name, without the dot
    pub fn extension(&self) -> Option<String> {
        crate::utils::extension_of(&self.suggested_name)
    }
}

/// Size class that decides which absolute ceiling applies
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaClass {
    /// Video-class extension (mp4, webm, ...)
    Video,
    /// Everything else
    Standard,
}

impl MediaClass {
    /// Classify a file name against a set of lowercase video extensions
    pub fn of(name: &str, video_extensions: &[String]) -> Self {
        match crate::utils::extension_of(name) {
            Some(ext) if video_extensions.iter().any(|v| v.eq_ignore_ascii_case(&ext)) => {
                MediaClass::Video
            }
            _ => MediaClass::Standard,
        }
    }

    /// The absolute ceiling for this class
    pub fn ceiling(&self, limits: &crate::config::SizeLimits) -> u64 {
        match self {
            MediaClass::Video => limits.video_ceiling,
            MediaClass::Standard => limits.standard_ceiling,
        }
    }
}

/// Bytes fetched across the boundary for one descriptor
///
/// Owned by the step that produced it until handed to the archive or to persistence.
#[derive(Clone, Debug)]
pub struct FetchedPayload {
    /// The descriptor that was fetched
    pub descriptor: ResourceDescriptor,
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// Content type declared by the server (empty when absent)
    pub declared_content_type: String,
    /// Length of `bytes`
    pub byte_length: u64,
}

impl FetchedPayload {
    /// Build a payload, deriving `byte_length` from the bytes
    pub fn new(
        descriptor: ResourceDescriptor,
        bytes: Vec<u8>,
        declared_content_type: impl Into<String>,
    ) -> Self {
        let byte_length = bytes.len() as u64;
        Self {
            descriptor,
            bytes,
            declared_content_type: declared_content_type.into(),
            byte_length,
        }
    }
}

/// Why the router refused a payload
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    /// Larger than the absolute ceiling of its media class
    TooLarge {
        /// Applicable ceiling
        limit: u64,
        /// Payload size
        actual: u64,
    },
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::TooLarge { limit, actual } => {
                write!(f, "too large: {actual} bytes (limit: {limit} bytes)")
            }
        }
    }
}

/// Terminal action chosen for one descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferPlan {
    /// Add to the shared archive
    Archive,
    /// Save as its own file
    IndividualPersist,
    /// Do not transfer
    Rejected(RejectReason),
}

/// Phase of a transfer run, as reported in progress events
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Validating the request
    Preparing,
    /// Fetching a resource
    Downloading,
    /// Routing, decoding or adding a resource
    Processing,
    /// Compressing the archive
    Compressing,
    /// Writing the archive
    Persisting,
    /// Waiting for individual transfers to settle
    Waiting,
    /// Run finished (possibly with partial failures)
    Completed,
    /// Run failed
    Error,
    /// Run cancelled by the user
    Cancelled,
}

impl Phase {
    /// Whether no further events follow this phase
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Completed | Phase::Error | Phase::Cancelled)
    }
}

/// Progress update surfaced to observers
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Current phase
    pub phase: Phase,
    /// Human-readable status line
    pub message: String,
    /// Overall run progress (0.0 to 100.0)
    pub percent: f32,
    /// Bytes fetched so far in this run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative_bytes: Option<u64>,
}

/// Final status of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// All steps ran; individual resources may still have failed
    Completed,
    /// A structural failure ended the run
    Errored,
    /// The user cancelled the run
    Cancelled,
}

/// What happened to one descriptor
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Added to the archive under `path`
    Archived {
        /// Entry path inside the archive
        path: String,
        /// Entry size
        bytes: u64,
    },
    /// Saved individually
    Persisted {
        /// Name the file was saved under
        name: String,
        /// Handle issued by the persistence primitive
        handle: TransferHandle,
    },
    /// Fetching, decoding or persisting failed
    Failed {
        /// Machine-readable error code
        code: String,
        /// Error message
        error: String,
    },
    /// Not transferred (rejected by the router or left behind by a cancellation)
    Skipped {
        /// Why
        reason: String,
    },
}

impl Outcome {
    pub(crate) fn failed(error: &Error) -> Self {
        Outcome::Failed {
            code: error.error_code().to_string(),
            error: error.to_string(),
        }
    }

    /// Whether the resource was transferred
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Archived { .. } | Outcome::Persisted { .. })
    }
}

/// Per-descriptor result of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndividualResult {
    /// The descriptor
    pub descriptor: ResourceDescriptor,
    /// What happened to it
    pub outcome: Outcome,
}

/// Outcome counts of a run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    /// Added to the archive
    pub archived: usize,
    /// Saved individually
    pub persisted: usize,
    /// Failed
    pub failed: usize,
    /// Rejected or not attempted
    pub skipped: usize,
}

impl RunCounts {
    /// Tally a list of results
    pub fn tally(results: &[IndividualResult]) -> Self {
        let mut counts = Self::default();
        for result in results {
            match result.outcome {
                Outcome::Archived { .. } => counts.archived += 1,
                Outcome::Persisted { .. } => counts.persisted += 1,
                Outcome::Failed { .. } => counts.failed += 1,
                Outcome::Skipped { .. } => counts.skipped += 1,
            }
        }
        counts
    }

    /// Archived plus persisted
    pub fn succeeded(&self) -> usize {
        self.archived + self.persisted
    }
}

/// The persisted archive of a completed run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveReceipt {
    /// File name the archive was saved under
    pub name: String,
    /// Handle issued by the persistence primitive
    pub handle: TransferHandle,
    /// Number of entries (text entry included)
    pub entry_count: usize,
    /// Size of the compressed archive
    pub compressed_bytes: u64,
    /// Sum of entry sizes before compression
    pub uncompressed_bytes: u64,
}

/// Whether the run bundles resources or saves each one on its own
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Fetch across the boundary and bundle into one archive
    #[default]
    Archive,
    /// Persist every resource individually by URL; no archive is built
    Individual,
}

/// Input of one run
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TransferRequest {
    /// Resources offered to the user; only `selected` ones are transferred
    pub resources: Vec<ResourceDescriptor>,
    /// Post text to include as `content.txt`, if requested
    #[serde(default)]
    pub text: Option<String>,
    /// Post title, used for the archive name and for prefixing
    #[serde(default)]
    pub title: Option<String>,
    /// Prefix every persisted name with the sanitized title
    #[serde(default)]
    pub auto_rename: bool,
    /// Archive or individual transfers
    #[serde(default)]
    pub mode: TransferMode,
}

impl TransferRequest {
    /// Selected descriptors, in input order
    pub fn selected(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.resources.iter().filter(|d| d.selected)
    }

    /// Whether there is anything to transfer
    pub fn is_empty(&self) -> bool {
        self.selected().next().is_none() && self.text.is_none()
    }
}

/// Final report of a run
#[derive(Debug)]
pub struct RunResult {
    /// Terminal status
    pub status: RunStatus,
    /// The persisted archive, if one was produced
    pub archive: Option<ArchiveReceipt>,
    /// One entry per selected descriptor, in the order their terminal action completed
    pub individual_results: Vec<IndividualResult>,
    /// What happened to the text payload, if one was requested
    pub text_outcome: Option<Outcome>,
    /// Tallies of `individual_results`
    pub counts: RunCounts,
    /// Final status line
    pub message: String,
    /// Bytes fetched across the boundary
    pub cumulative_bytes: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run reached its terminal phase
    pub finished_at: DateTime<Utc>,
    /// The structural failure, when `status` is [`RunStatus::Errored`]
    pub error: Option<Error>,
}

impl RunResult {
    /// Turn an errored run into `Err`, keeping completed and cancelled runs as `Ok`
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(error) if self.status == RunStatus::Errored => Err(error),
            other => {
                self.error = other;
                Ok(self)
            }
        }
    }
}
