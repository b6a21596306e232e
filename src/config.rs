//! Configuration types for bundle-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, path::PathBuf, time::Duration};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Size ceilings applied to fetched resources
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SizeLimits {
    /// Largest payload allowed inside the archive (default: 100 MiB)
    ///
    /// Larger non-video payloads are persisted individually instead.
    #[serde(default = "default_archive_entry_ceiling")]
    pub archive_entry_ceiling: u64,

    /// Absolute ceiling for non-video resources (default: 2 GiB)
    #[serde(default = "default_standard_ceiling")]
    pub standard_ceiling: u64,

    /// Absolute ceiling for video-class resources (default: 4 GiB)
    #[serde(default = "default_video_ceiling")]
    pub video_ceiling: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            archive_entry_ceiling: default_archive_entry_ceiling(),
            standard_ceiling: default_standard_ceiling(),
            video_ceiling: default_video_ceiling(),
        }
    }
}

/// Chunking parameters for the transport codec
///
/// Work is split into two tiers. The text tier cuts a payload into
/// message-sized frames; the byte tier walks each frame in small slices.
/// Cancellation is polled after every byte slice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Byte-tier slice size (default: 100 KiB)
    #[serde(default = "default_byte_chunk_size")]
    pub byte_chunk_size: usize,

    /// Text-tier frame size, also the largest message sent across the boundary (default: 10 MiB)
    #[serde(default = "default_text_chunk_size")]
    pub text_chunk_size: usize,

    /// Inputs at or below this size are transcoded in one pass (default: 10 MiB)
    #[serde(default = "default_chunking_threshold")]
    pub chunking_threshold: usize,

    /// Yield to the scheduler after this many byte-tier slices (default: 100)
    #[serde(default = "default_yield_every_byte_chunks")]
    pub yield_every_byte_chunks: usize,

    /// Yield to the scheduler after this many text-tier frames (default: 5)
    #[serde(default = "default_yield_every_text_chunks")]
    pub yield_every_text_chunks: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            byte_chunk_size: default_byte_chunk_size(),
            text_chunk_size: default_text_chunk_size(),
            chunking_threshold: default_chunking_threshold(),
            yield_every_byte_chunks: default_yield_every_byte_chunks(),
            yield_every_text_chunks: default_yield_every_text_chunks(),
        }
    }
}

/// Routing between the archive and individual transfers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Extensions (lowercase, without dot) treated as video-class
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Send video-class resources straight to persistence by URL, without fetching them
    /// across the boundary (default: true)
    #[serde(default = "default_true")]
    pub direct_video_transfers: bool,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            video_extensions: default_video_extensions(),
            direct_video_transfers: true,
        }
    }
}

/// HTTP settings used on the privileged side of the boundary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout (default: 300 seconds)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Maximum redirects followed per request (default: 10)
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Headers added on the credentialed retry after a 401/403 (e.g. Cookie, Authorization)
    #[serde(default)]
    pub credential_headers: HashMap<String, String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
            max_redirects: default_max_redirects(),
            credential_headers: HashMap::new(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// What to do when a persisted file name already exists on disk
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCollisionAction {
    /// Append (1), (2), etc. to the filename
    #[default]
    Rename,
    /// Replace the existing file
    Overwrite,
    /// Fail the transfer
    Skip,
}

/// Disk persistence settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistConfig {
    /// Directory that receives archives and individual files (default: "./downloads")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Secondary directory tried when writing the archive to `output_dir` fails
    #[serde(default)]
    pub fallback_dir: Option<PathBuf>,

    /// File collision handling
    #[serde(default)]
    pub file_collision: FileCollisionAction,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            fallback_dir: None,
            file_collision: FileCollisionAction::default(),
        }
    }
}

/// Main configuration for a [`TransferOrchestrator`](crate::TransferOrchestrator)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Size ceilings
    #[serde(default)]
    pub limits: SizeLimits,

    /// Codec chunking
    #[serde(default)]
    pub chunking: ChunkConfig,

    /// Deflate level used when finalizing the archive (0-9, default: 6)
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,

    /// Archive vs individual routing
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Boundary HTTP settings
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Retry policy for boundary fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Disk persistence
    #[serde(default)]
    pub persist: PersistConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            limits: SizeLimits::default(),
            chunking: ChunkConfig::default(),
            compression_level: default_compression_level(),
            routing: RoutingConfig::default(),
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            persist: PersistConfig::default(),
        }
    }
}

impl Config {
    /// Check the configuration for inconsistent settings
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.byte_chunk_size == 0 {
            return Err(Error::config(
                "byte chunk size must be positive",
                "chunking.byte_chunk_size",
            ));
        }
        if chunking.text_chunk_size < 4 {
            return Err(Error::config(
                "text chunk size must hold at least one base64 quantum",
                "chunking.text_chunk_size",
            ));
        }
        if chunking.yield_every_byte_chunks == 0 || chunking.yield_every_text_chunks == 0 {
            return Err(Error::config(
                "yield intervals must be positive",
                "chunking.yield_every_byte_chunks",
            ));
        }
        if self.compression_level > 9 {
            return Err(Error::config(
                format!("compression level {} is outside 0-9", self.compression_level),
                "compression_level",
            ));
        }
        let limits = &self.limits;
        if limits.archive_entry_ceiling > limits.standard_ceiling {
            return Err(Error::config(
                "archive entry ceiling exceeds the standard ceiling",
                "limits.archive_entry_ceiling",
            ));
        }
        if limits.standard_ceiling > limits.video_ceiling {
            return Err(Error::config(
                "standard ceiling exceeds the video ceiling",
                "limits.standard_ceiling",
            ));
        }
        Ok(())
    }
}

fn default_archive_entry_ceiling() -> u64 {
    100 * MIB
}

fn default_standard_ceiling() -> u64 {
    2 * GIB
}

fn default_video_ceiling() -> u64 {
    4 * GIB
}

fn default_byte_chunk_size() -> usize {
    100 * KIB as usize
}

fn default_text_chunk_size() -> usize {
    10 * MIB as usize
}

fn default_chunking_threshold() -> usize {
    10 * MIB as usize
}

fn default_yield_every_byte_chunks() -> usize {
    100
}

fn default_yield_every_text_chunks() -> usize {
    5
}

fn default_compression_level() -> u32 {
    6
}

fn default_video_extensions() -> Vec<String> {
    vec![
        "mp4".into(),
        "webm".into(),
        "avi".into(),
        "mkv".into(),
        "mov".into(),
    ]
}

fn default_true() -> bool {
    true
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_user_agent() -> String {
    concat!("bundle-dl/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_max_redirects() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("downloads")
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
