//! The "save to disk" capability
//!
//! A [`PersistFile`] accepts bytes or a URL plus a suggested name and hands
//! back a [`TransferHandle`] as soon as the transfer is under way. Callers
//! [`settle`](PersistFile::settle) the handle to wait for the outcome, or
//! [`cancel`](PersistFile::cancel) it best-effort.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, FetchConfig, FileCollisionAction};
use crate::error::{Error, Result};
use crate::types::TransferHandle;
use crate::utils::{file_name_component, get_unique_path};

/// What to persist
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PersistSource {
    /// Bytes already held by the coordinator
    Bytes(Vec<u8>),
    /// A URL the persistence side downloads itself
    Url(String),
}

impl PersistSource {
    fn describe(&self) -> String {
        match self {
            PersistSource::Bytes(bytes) => format!("{} bytes", bytes.len()),
            PersistSource::Url(url) => url.clone(),
        }
    }
}

/// A transfer that settled successfully
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PersistedFile {
    /// Handle the transfer was issued
    pub handle: TransferHandle,
    /// Where the file ended up
    pub path: PathBuf,
    /// Bytes written
    pub bytes: u64,
}

/// Privileged "save to disk" primitive
#[async_trait]
pub trait PersistFile: Send + Sync {
    /// Start persisting `source` under `suggested_name`
    ///
    /// Returns once the transfer is accepted; failures after that point surface
    /// from [`settle`](Self::settle).
    async fn persist(&self, source: PersistSource, suggested_name: &str) -> Result<TransferHandle>;

    /// Wait for the transfer behind `handle` to finish
    async fn settle(&self, handle: TransferHandle) -> Result<PersistedFile>;

    /// Best-effort cancellation; returns whether `handle` was still in flight
    async fn cancel(&self, handle: TransferHandle) -> bool;
}

struct InFlight {
    cancel: CancellationToken,
    // Taken by the first `settle`; the token stays so the handle remains cancellable
    task: Option<JoinHandle<Result<PersistedFile>>>,
}

/// [`PersistFile`] writing into a directory on the local filesystem
///
/// Name collisions with existing files follow the configured
/// [`FileCollisionAction`]. Suggested names are reduced to a single file-name
/// component, so nothing is written outside the directory. URL sources are
/// streamed to disk with `reqwest`. Data lands in a `.part` sibling that is
/// renamed into place on success; a cancelled or failed transfer removes only
/// that partial file.
pub struct DiskPersist {
    dir: PathBuf,
    collision: FileCollisionAction,
    client: reqwest::Client,
    next_handle: AtomicU64,
    in_flight: Mutex<HashMap<TransferHandle, InFlight>>,
}

impl std::fmt::Debug for DiskPersist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskPersist")
            .field("dir", &self.dir)
            .field("collision", &self.collision)
            .finish_non_exhaustive()
    }
}

impl DiskPersist {
    /// Persist into `dir`
    pub fn new(
        dir: impl Into<PathBuf>,
        collision: FileCollisionAction,
        fetch: &FetchConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(fetch.timeout)
            .user_agent(fetch.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(fetch.max_redirects))
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;
        Ok(Self {
            dir: dir.into(),
            collision,
            client,
            next_handle: AtomicU64::new(1),
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Primary persistence into `persist.output_dir`
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.persist.output_dir,
            config.persist.file_collision,
            &config.fetch,
        )
    }

    /// Secondary persistence into `persist.fallback_dir`, when configured
    pub fn fallback_from_config(config: &Config) -> Result<Option<Self>> {
        config
            .persist
            .fallback_dir
            .as_ref()
            .map(|dir| Self::new(dir, config.persist.file_collision, &config.fetch))
            .transpose()
    }

    /// Directory files are written into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<TransferHandle, InFlight>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl PersistFile for DiskPersist {
    async fn persist(&self, source: PersistSource, suggested_name: &str) -> Result<TransferHandle> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::Persistence(format!("cannot create {}: {}", self.dir.display(), e))
        })?;
        let name = file_name_component(suggested_name);
        let path = get_unique_path(&self.dir.join(name), self.collision)?;

        let handle = TransferHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        tracing::debug!(
            handle = %handle,
            source = %source.describe(),
            path = %path.display(),
            "persisting file"
        );

        let task = tokio::spawn(write_source(
            self.client.clone(),
            source,
            path,
            handle,
            cancel.clone(),
        ));
        self.in_flight().insert(
            handle,
            InFlight {
                cancel,
                task: Some(task),
            },
        );
        Ok(handle)
    }

    async fn settle(&self, handle: TransferHandle) -> Result<PersistedFile> {
        let task = self
            .in_flight()
            .get_mut(&handle)
            .and_then(|entry| entry.task.take())
            .ok_or_else(|| {
                Error::Persistence(format!("unknown or already settled transfer handle {handle}"))
            })?;
        let result = task.await;
        self.in_flight().remove(&handle);
        result.map_err(|e| Error::Persistence(format!("transfer {handle} panicked: {e}")))?
    }

    async fn cancel(&self, handle: TransferHandle) -> bool {
        match self.in_flight().get(&handle) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }
}

async fn write_source(
    client: reqwest::Client,
    source: PersistSource,
    path: PathBuf,
    handle: TransferHandle,
    cancel: CancellationToken,
) -> Result<PersistedFile> {
    let partial = partial_path(&path);
    let result = tokio::select! {
        result = write_to(&client, source, &partial) => result,
        _ = cancel.cancelled() => Err(Error::Aborted),
    };

    let result = match result {
        Ok(bytes) => tokio::fs::rename(&partial, &path)
            .await
            .map(|()| bytes)
            .map_err(|e| {
                Error::Persistence(format!("cannot move file into {}: {}", path.display(), e))
            }),
        Err(e) => Err(e),
    };

    match result {
        Ok(bytes) => Ok(PersistedFile {
            handle,
            path,
            bytes,
        }),
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&partial).await
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                tracing::warn!(
                    path = %partial.display(),
                    error = %remove_err,
                    "Failed to remove partial file"
                );
            }
            Err(e)
        }
    }
}

/// `<name>.part` next to `path`
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

async fn create(path: &Path) -> Result<tokio::fs::File> {
    tokio::fs::File::create(path)
        .await
        .map_err(|e| Error::Persistence(format!("cannot create {}: {}", path.display(), e)))
}

async fn write_to(client: &reqwest::Client, source: PersistSource, path: &Path) -> Result<u64> {
    match source {
        PersistSource::Bytes(bytes) => {
            let mut file = create(path).await?;
            file.write_all(&bytes).await?;
            file.flush().await?;
            Ok(bytes.len() as u64)
        }
        PersistSource::Url(url) => {
            // Nothing touches the disk until the server answered with content
            let mut response = client.get(&url).send().await?;
            if !response.status().is_success() {
                return Err(Error::Fetch {
                    status: response.status().as_u16(),
                    url,
                });
            }
            let mut file = create(path).await?;
            let mut written = 0u64;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;
            Ok(written)
        }
    }
}
