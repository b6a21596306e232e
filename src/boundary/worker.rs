use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{FetchBoundary, FetchRequest, RawResponse, validate_response};
use crate::codec::{ChunkedCodec, Frames};
use crate::config::{Config, RetryConfig};
use crate::error::{Error, Result};
use crate::progress::{PercentSlice, ProgressCoordinator};
use crate::retry::fetch_with_retry;
use crate::types::{FetchedPayload, Phase, ResourceDescriptor};
use crate::utils::format_bytes;

/// Pending requests queued for the worker before senders wait
const BOUNDARY_CHANNEL_BUFFER: usize = 16;

/// Steps of one boundary fetch, each reported at a fixed point of the resource's slice
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchStep {
    /// Request accepted by the worker
    Starting,
    /// Request sent to the network
    Fetching,
    /// Response validated
    Processing,
    /// Encoding the body for transport
    Converting,
    /// Bytes decoded on the coordinator side
    Ready,
}

impl FetchStep {
    /// Progress of the step within its resource (0 to 100)
    pub fn percent(&self) -> f32 {
        match self {
            FetchStep::Starting => 0.0,
            FetchStep::Fetching => 25.0,
            FetchStep::Processing => 50.0,
            FetchStep::Converting => 75.0,
            FetchStep::Ready => 100.0,
        }
    }

    fn phase(&self) -> Phase {
        match self {
            FetchStep::Starting | FetchStep::Fetching => Phase::Downloading,
            FetchStep::Processing | FetchStep::Converting | FetchStep::Ready => Phase::Processing,
        }
    }
}

/// A fetch request travelling to the worker, with its reply slot
struct BoundaryCall {
    descriptor: ResourceDescriptor,
    ceiling: u64,
    label: String,
    slice: PercentSlice,
    progress: ProgressCoordinator,
    reply: oneshot::Sender<Result<BoundaryReply>>,
}

impl BoundaryCall {
    fn report(&self, step: FetchStep, message: String) {
        self.progress
            .emit(step.phase(), message, Some(self.slice.at(step.percent())), None);
    }
}

/// Validated body, encoded for the trip back
struct BoundaryReply {
    frames: Frames,
    content_type: String,
    byte_length: u64,
}

/// Task on the privileged side of the boundary
///
/// Serves one request at a time until every [`BoundaryFetcher`] is dropped.
pub struct BoundaryWorker {
    boundary: Arc<dyn FetchBoundary>,
    codec: ChunkedCodec,
    retry: RetryConfig,
    calls: mpsc::Receiver<BoundaryCall>,
}

impl BoundaryWorker {
    /// Spawn a worker fetching through `boundary` and return its client
    pub fn spawn(
        boundary: Arc<dyn FetchBoundary>,
        config: &Config,
    ) -> (BoundaryFetcher, JoinHandle<()>) {
        let (calls_tx, calls_rx) = mpsc::channel(BOUNDARY_CHANNEL_BUFFER);
        let codec = ChunkedCodec::new(config.chunking.clone());
        let worker = BoundaryWorker {
            boundary,
            codec: codec.clone(),
            retry: config.retry.clone(),
            calls: calls_rx,
        };
        let handle = tokio::spawn(worker.run());
        (
            BoundaryFetcher {
                calls: calls_tx,
                codec,
            },
            handle,
        )
    }

    async fn run(mut self) {
        while let Some(call) = self.calls.recv().await {
            let result = self.handle(&call).await;
            if let Err(e) = &result {
                tracing::debug!(url = %call.descriptor.source_url, error = %e, "boundary fetch failed");
            }
            // The caller may have stopped waiting after a cancellation
            call.reply.send(result).ok();
        }
        tracing::debug!("boundary worker stopped");
    }

    async fn handle(&self, call: &BoundaryCall) -> Result<BoundaryReply> {
        let url = call.descriptor.source_url.as_str();
        let cancel = call.progress.cancel_token();

        call.report(FetchStep::Starting, format!("Starting download: {}", call.label));
        call.report(FetchStep::Fetching, format!("Fetching {}...", call.label));

        let response = fetch_with_retry(&self.retry, || async move {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            self.fetch_once(url, call.ceiling).await
        })
        .await?;

        let byte_length = response.bytes.len() as u64;
        call.report(
            FetchStep::Processing,
            format!("Processing {} ({})...", call.label, format_bytes(byte_length)),
        );
        call.report(
            FetchStep::Converting,
            format!("Converting {} for transfer...", call.label),
        );

        let frames = self.codec.encode_frames(&response.bytes, cancel).await?;
        Ok(BoundaryReply {
            frames,
            content_type: response.content_type,
            byte_length,
        })
    }

    /// One validated fetch, retrying once with credentials on a 401/403
    async fn fetch_once(&self, url: &str, ceiling: u64) -> Result<RawResponse> {
        let request = FetchRequest {
            url: url.to_string(),
            credentialed: false,
            max_bytes: Some(ceiling),
        };
        let mut response = self.boundary.fetch(&request).await?;

        if response.is_auth_rejection() && self.boundary.has_credentials() {
            tracing::debug!(url, status = response.status, "retrying with credentials");
            let credentialed = FetchRequest {
                credentialed: true,
                ..request
            };
            response = self.boundary.fetch(&credentialed).await?;
        }

        validate_response(&response, url, ceiling)?;
        Ok(response)
    }
}

/// Coordinator-side client of a [`BoundaryWorker`]
#[derive(Clone, Debug)]
pub struct BoundaryFetcher {
    calls: mpsc::Sender<BoundaryCall>,
    codec: ChunkedCodec,
}

impl BoundaryFetcher {
    /// Fetch `descriptor` across the boundary
    ///
    /// `ceiling` is the absolute size limit for the descriptor's media class,
    /// enforced by the worker on the raw body and again while decoding.
    /// Progress is reported inside `slice` of the run's overall percent.
    pub async fn fetch(
        &self,
        descriptor: &ResourceDescriptor,
        ceiling: u64,
        label: &str,
        slice: PercentSlice,
        progress: &ProgressCoordinator,
    ) -> Result<FetchedPayload> {
        if progress.is_cancelled() {
            return Err(Error::Aborted);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let call = BoundaryCall {
            descriptor: descriptor.clone(),
            ceiling,
            label: label.to_string(),
            slice,
            progress: progress.clone(),
            reply: reply_tx,
        };
        self.calls
            .send(call)
            .await
            .map_err(|_| Error::Boundary("boundary worker is not running".into()))?;
        let reply = tokio::select! {
            reply = reply_rx => {
                reply.map_err(|_| Error::Boundary("boundary worker dropped the request".into()))??
            }
            _ = progress.cancel_token().cancelled() => return Err(Error::Aborted),
        };

        let bytes = self
            .codec
            .decode_frames(&reply.frames, ceiling, progress.cancel_token())
            .await?;
        if bytes.len() as u64 != reply.byte_length {
            return Err(Error::Encoding(format!(
                "decoded {} bytes, boundary sent {}",
                bytes.len(),
                reply.byte_length
            )));
        }

        progress.emit(
            FetchStep::Ready.phase(),
            format!("Ready: {label}"),
            Some(slice.at(FetchStep::Ready.percent())),
            Some(reply.byte_length),
        );
        Ok(FetchedPayload::new(descriptor.clone(), bytes, reply.content_type))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkConfig;
    use crate::types::ResourceKind;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays queued responses per URL and records every request
    #[derive(Default)]
    struct ScriptedBoundary {
        responses: Mutex<HashMap<String, VecDeque<RawResponse>>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedBoundary {
        fn respond(&self, url: &str, status: u16, body: &[u8], content_type: &str) {
            self.responses
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default()
                .push_back(RawResponse {
                    status,
                    bytes: body.to_vec(),
                    content_type: content_type.to_string(),
                });
        }

        fn requests(&self) -> Vec<FetchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl FetchBoundary for ScriptedBoundary {
        async fn fetch(&self, request: &FetchRequest) -> Result<RawResponse> {
            self.requests.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.get_mut(&request.url);
            Ok(match queue {
                Some(q) if q.len() > 1 => q.pop_front().unwrap(),
                Some(q) => q.front().cloned().unwrap_or_default(),
                None => RawResponse {
                    status: 404,
                    ..RawResponse::default()
                },
            })
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.chunking = ChunkConfig {
            byte_chunk_size: 6,
            text_chunk_size: 16,
            chunking_threshold: 0,
            yield_every_byte_chunks: 1,
            yield_every_text_chunks: 1,
        };
        config.retry.initial_delay = Duration::from_millis(1);
        config.retry.max_delay = Duration::from_millis(2);
        config.retry.jitter = false;
        config
    }

    fn descriptor(url: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(url, "file.bin", ResourceKind::File)
    }

    #[tokio::test]
    async fn payload_round_trips_through_frames() {
        let boundary = Arc::new(ScriptedBoundary::default());
        let body: Vec<u8> = (0..200u8).collect();
        boundary.respond("u", 200, &body, "application/octet-stream");

        let (fetcher, _worker) = BoundaryWorker::spawn(boundary.clone(), &test_config());
        let progress = ProgressCoordinator::default();
        let payload = fetcher
            .fetch(&descriptor("u"), 1000, "1/1 file.bin", PercentSlice::new(10.0, 80.0), &progress)
            .await
            .unwrap();

        assert_eq!(payload.bytes, body);
        assert_eq!(payload.byte_length, 200);
        assert_eq!(payload.declared_content_type, "application/octet-stream");
        assert_eq!(progress.cumulative_bytes(), 200);
        assert_eq!(boundary.requests()[0].max_bytes, Some(1000));
    }

    #[tokio::test]
    async fn steps_are_reported_inside_the_slice() {
        let boundary = Arc::new(ScriptedBoundary::default());
        boundary.respond("u", 200, b"abc", "image/png");
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary, &test_config());
        let progress = ProgressCoordinator::default();
        let mut rx = progress.subscribe();

        fetcher
            .fetch(&descriptor("u"), 1000, "a.png", PercentSlice::new(20.0, 40.0), &progress)
            .await
            .unwrap();

        let mut percents = Vec::new();
        while let Ok(event) = rx.try_recv() {
            percents.push(event.percent);
        }
        assert_eq!(percents, vec![20.0, 25.0, 30.0, 35.0, 40.0]);
    }

    #[tokio::test]
    async fn auth_rejection_is_retried_with_credentials() {
        let boundary = Arc::new(ScriptedBoundary::default());
        boundary.respond("u", 403, b"", "");
        boundary.respond("u", 200, b"ok", "text/plain");
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary.clone(), &test_config());

        let payload = fetcher
            .fetch(&descriptor("u"), 100, "f", PercentSlice::new(0.0, 100.0), &ProgressCoordinator::default())
            .await
            .unwrap();
        assert_eq!(payload.bytes, b"ok".to_vec());

        let requests = boundary.requests();
        assert_eq!(requests.len(), 2);
        assert!(!requests[0].credentialed);
        assert!(requests[1].credentialed);
    }

    #[tokio::test]
    async fn not_found_fails_without_retry() {
        let boundary = Arc::new(ScriptedBoundary::default());
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary.clone(), &test_config());

        let result = fetcher
            .fetch(&descriptor("missing"), 100, "f", PercentSlice::new(0.0, 100.0), &ProgressCoordinator::default())
            .await;
        assert!(matches!(result, Err(Error::Fetch { status: 404, .. })));
        assert_eq!(boundary.requests().len(), 1);
    }

    #[tokio::test]
    async fn server_error_is_retried() {
        let boundary = Arc::new(ScriptedBoundary::default());
        boundary.respond("u", 503, b"busy", "text/plain");
        boundary.respond("u", 200, b"done", "text/plain");
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary.clone(), &test_config());

        let payload = fetcher
            .fetch(&descriptor("u"), 100, "f", PercentSlice::new(0.0, 100.0), &ProgressCoordinator::default())
            .await
            .unwrap();
        assert_eq!(payload.bytes, b"done".to_vec());
        assert_eq!(boundary.requests().len(), 2);
    }

    #[tokio::test]
    async fn validation_failures_surface_per_resource() {
        let boundary = Arc::new(ScriptedBoundary::default());
        boundary.respond("empty", 200, b"", "image/png");
        boundary.respond("page", 200, b"<html>login</html>", "text/html");
        boundary.respond("big", 200, &[0; 11], "image/png");
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary, &test_config());
        let progress = ProgressCoordinator::default();
        let slice = PercentSlice::new(0.0, 100.0);

        assert!(matches!(
            fetcher.fetch(&descriptor("empty"), 10, "f", slice, &progress).await,
            Err(Error::EmptyResponse)
        ));
        assert!(matches!(
            fetcher.fetch(&descriptor("page"), 100, "f", slice, &progress).await,
            Err(Error::DisguisedErrorPage)
        ));
        assert!(matches!(
            fetcher.fetch(&descriptor("big"), 10, "f", slice, &progress).await,
            Err(Error::SizeExceeded {
                limit: 10,
                actual: 11
            })
        ));
    }

    #[tokio::test]
    async fn cancelled_run_never_reaches_the_boundary() {
        let boundary = Arc::new(ScriptedBoundary::default());
        boundary.respond("u", 200, b"x", "text/plain");
        let (fetcher, _worker) = BoundaryWorker::spawn(boundary.clone(), &test_config());
        let progress = ProgressCoordinator::default();
        progress.request_cancel();

        let result = fetcher
            .fetch(&descriptor("u"), 100, "f", PercentSlice::new(0.0, 100.0), &progress)
            .await;
        assert!(matches!(result, Err(Error::Aborted)));
        assert!(boundary.requests().is_empty());
    }

    #[tokio::test]
    async fn worker_stops_when_clients_are_dropped() {
        let (fetcher, worker) =
            BoundaryWorker::spawn(Arc::new(ScriptedBoundary::default()), &test_config());
        drop(fetcher);
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker exits")
            .unwrap();
    }
}
