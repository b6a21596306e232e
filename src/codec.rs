//! Chunked base64 transcoding for moving bytes across the boundary
//!
//! Large payloads are cut into frames no longer than
//! [`ChunkConfig::text_chunk_size`] characters, so each frame fits in one
//! boundary message. Each frame is processed in byte-tier slices of about
//! [`ChunkConfig::byte_chunk_size`] bytes. The cancellation token is polled
//! after every slice and the task yields to the scheduler at fixed intervals,
//! so a multi-gigabyte transcode never holds the executor for long.
//!
//! Decoding writes straight into one preallocated output buffer. Slice `n` of
//! the input lands at a fixed offset, so no intermediate buffers grow while
//! decoding.
//!
//! Output is identical to a one-shot `STANDARD` (padded) base64 transcoding:
//! frames are aligned to 3 input bytes / 4 output characters, so concatenating
//! them yields the same string.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio_util::sync::CancellationToken;

use crate::config::ChunkConfig;
use crate::error::{Error, Result};

/// Transport-safe text representation of a payload, split into message-sized frames
pub type Frames = Vec<String>;

/// Reversible bytes <-> base64 transcoder with bounded work per step
#[derive(Clone, Debug)]
pub struct ChunkedCodec {
    config: ChunkConfig,
}

impl ChunkedCodec {
    /// Create a codec with the given chunking parameters
    pub fn new(config: ChunkConfig) -> Self {
        Self { config }
    }

    /// Raw bytes per byte-tier slice (multiple of 3)
    fn slice_bytes(&self) -> usize {
        (self.config.byte_chunk_size / 3).max(1) * 3
    }

    /// Characters per byte-tier slice when decoding (multiple of 4)
    fn slice_chars(&self) -> usize {
        self.slice_bytes() / 3 * 4
    }

    /// Characters per text-tier frame (multiple of 4)
    fn frame_chars(&self) -> usize {
        (self.config.text_chunk_size / 4).max(1) * 4
    }

    /// Raw bytes per text-tier frame
    fn frame_bytes(&self) -> usize {
        self.frame_chars() / 4 * 3
    }

    fn pacer(&self) -> Pacer {
        Pacer {
            byte_chunks: 0,
            text_chunks: 0,
            yield_every_byte: self.config.yield_every_byte_chunks.max(1),
            yield_every_text: self.config.yield_every_text_chunks.max(1),
        }
    }

    /// Encode `bytes` into transport frames
    ///
    /// Fails with [`Error::Aborted`] if `cancel` fires between slices.
    pub async fn encode_frames(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<Frames> {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        let expected = base64::encoded_len(bytes.len(), true).ok_or_else(|| {
            Error::Encoding(format!("{} bytes overflow the encoded length", bytes.len()))
        })?;

        if bytes.len() <= self.config.chunking_threshold.min(self.frame_bytes()) {
            let text = STANDARD.encode(bytes);
            return if text.len() == expected {
                Ok(vec![text])
            } else {
                Err(Error::Encoding(format!(
                    "encoded {} characters, expected {}",
                    text.len(),
                    expected
                )))
            };
        }

        tracing::debug!(
            bytes = bytes.len(),
            frame_bytes = self.frame_bytes(),
            "encoding in chunks"
        );

        let mut pacer = self.pacer();
        let mut frames = Vec::with_capacity(bytes.len().div_ceil(self.frame_bytes()));
        let mut produced = 0usize;
        for frame in bytes.chunks(self.frame_bytes()) {
            let capacity = base64::encoded_len(frame.len(), true)
                .ok_or_else(|| Error::Encoding("frame length overflow".into()))?;
            let mut text = String::with_capacity(capacity);
            for slice in frame.chunks(self.slice_bytes()) {
                STANDARD.encode_string(slice, &mut text);
                pacer.after_byte_chunk(cancel).await?;
            }
            produced += text.len();
            frames.push(text);
            pacer.after_text_chunk(cancel).await?;
        }

        if produced != expected {
            return Err(Error::Encoding(format!(
                "encoded {produced} characters, expected {expected}"
            )));
        }
        Ok(frames)
    }

    /// Encode `bytes` into a single transport string
    pub async fn encode(&self, bytes: &[u8], cancel: &CancellationToken) -> Result<String> {
        Ok(self.encode_frames(bytes, cancel).await?.concat())
    }

    /// Decode transport frames back into bytes
    ///
    /// Fails with [`Error::SizeExceeded`] before allocating if the decoded length
    /// would exceed `limit`, and with [`Error::Encoding`] on malformed input.
    pub async fn decode_frames<S: AsRef<str>>(
        &self,
        frames: &[S],
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let parts: Vec<&[u8]> = frames.iter().map(|f| f.as_ref().as_bytes()).collect();
        self.decode_parts(&parts, limit, cancel).await
    }

    /// Decode a single transport string back into bytes
    pub async fn decode(
        &self,
        text: &str,
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let parts: Vec<&[u8]> = text.as_bytes().chunks(self.frame_chars()).collect();
        self.decode_parts(&parts, limit, cancel).await
    }

    async fn decode_parts(
        &self,
        parts: &[&[u8]],
        limit: u64,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }

        let decoded_len = decoded_len(parts)?;
        if decoded_len as u64 > limit {
            return Err(Error::SizeExceeded {
                limit,
                actual: decoded_len as u64,
            });
        }

        let total_chars: usize = parts.iter().map(|p| p.len()).sum();
        if total_chars <= self.config.chunking_threshold && parts.len() <= 1 {
            let input = parts.first().copied().unwrap_or_default();
            return STANDARD
                .decode(input)
                .map_err(|e| Error::Encoding(e.to_string()));
        }

        tracing::debug!(
            chars = total_chars,
            frames = parts.len(),
            decoded_len,
            "decoding in chunks"
        );

        // Decoder writes are bounded by a padded-length estimate, so leave room for it.
        let mut out = vec![0u8; decoded_len + 3];
        let mut offset = 0usize;
        let mut pacer = self.pacer();
        for part in parts {
            for slice in part.chunks(self.slice_chars()) {
                let written = STANDARD
                    .decode_slice(slice, &mut out[offset..])
                    .map_err(|e| Error::Encoding(e.to_string()))?;
                offset += written;
                pacer.after_byte_chunk(cancel).await?;
            }
            pacer.after_text_chunk(cancel).await?;
        }

        if offset != decoded_len {
            return Err(Error::Encoding(format!(
                "decoded {offset} bytes, expected {decoded_len}"
            )));
        }
        out.truncate(offset);
        Ok(out)
    }
}

/// Exact decoded length of a framed base64 payload
///
/// Every frame must be a whole number of 4-character quanta and only the
/// final frame may carry padding.
fn decoded_len(parts: &[&[u8]]) -> Result<usize> {
    let mut total = 0usize;
    for (idx, part) in parts.iter().enumerate() {
        if part.len() % 4 != 0 {
            return Err(Error::Encoding(format!(
                "frame {idx} has length {} which is not a multiple of 4",
                part.len()
            )));
        }
        let padding = part.iter().rev().take(2).take_while(|&&b| b == b'=').count();
        if padding > 0 && idx + 1 != parts.len() {
            return Err(Error::Encoding(format!(
                "frame {idx} is padded but is not the final frame"
            )));
        }
        total += part.len() / 4 * 3 - padding;
    }
    Ok(total)
}

/// Tracks slice counts, polls cancellation and yields at fixed intervals
struct Pacer {
    byte_chunks: usize,
    text_chunks: usize,
    yield_every_byte: usize,
    yield_every_text: usize,
}

impl Pacer {
    async fn after_byte_chunk(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        self.byte_chunks += 1;
        if self.byte_chunks % self.yield_every_byte == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }

    async fn after_text_chunk(&mut self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Aborted);
        }
        self.text_chunks += 1;
        if self.text_chunks % self.yield_every_text == 0 {
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    /// Tiny chunks so every tier and boundary is exercised on small inputs
    fn small_codec() -> ChunkedCodec {
        ChunkedCodec::new(ChunkConfig {
            byte_chunk_size: 4,
            text_chunk_size: 10,
            chunking_threshold: 0,
            yield_every_byte_chunks: 2,
            yield_every_text_chunks: 1,
        })
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 37 % 256) as u8).collect()
    }

    #[tokio::test]
    async fn chunked_round_trip_matches_one_shot_base64() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        for len in 0..64 {
            let bytes = sample(len);
            let text = codec.encode(&bytes, &cancel).await.unwrap();
            assert_eq!(text, STANDARD.encode(&bytes), "encoding of {len} bytes");
            let back = codec.decode(&text, u64::MAX, &cancel).await.unwrap();
            assert_eq!(back, bytes, "round trip of {len} bytes");
        }
    }

    #[tokio::test]
    async fn default_config_uses_single_pass_for_small_inputs() {
        let codec = ChunkedCodec::new(ChunkConfig::default());
        let cancel = CancellationToken::new();
        let bytes = sample(1000);
        let frames = codec.encode_frames(&bytes, &cancel).await.unwrap();
        assert_eq!(frames.len(), 1);
        let back = codec.decode_frames(&frames, u64::MAX, &cancel).await.unwrap();
        assert_eq!(back, bytes);
    }

    #[tokio::test]
    async fn frames_never_exceed_text_chunk_size() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let frames = codec.encode_frames(&sample(100), &cancel).await.unwrap();
        assert!(frames.len() > 1);
        for frame in &frames {
            assert!(frame.len() <= 10, "frame of {} chars", frame.len());
            assert_eq!(frame.len() % 4, 0);
        }
        let back = codec.decode_frames(&frames, u64::MAX, &cancel).await.unwrap();
        assert_eq!(back, sample(100));
    }

    #[tokio::test]
    async fn decode_rejects_out_of_range_characters() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let result = codec.decode("AAAA!!!!AAAA", u64::MAX, &cancel).await;
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[tokio::test]
    async fn decode_rejects_truncated_input() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let result = codec.decode("QUJD RA", u64::MAX, &cancel).await;
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[tokio::test]
    async fn decode_rejects_padding_in_an_inner_frame() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let frames = vec!["QQ==".to_string(), "QUJD".to_string()];
        let result = codec.decode_frames(&frames, u64::MAX, &cancel).await;
        assert!(matches!(result, Err(Error::Encoding(_))));
    }

    #[tokio::test]
    async fn decode_enforces_limit_before_allocating() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let text = STANDARD.encode(sample(30));
        match codec.decode(&text, 29, &cancel).await {
            Err(Error::SizeExceeded { limit, actual }) => {
                assert_eq!(limit, 29);
                assert_eq!(actual, 30);
            }
            other => panic!("expected SizeExceeded, got {other:?}"),
        }
        assert!(codec.decode(&text, 30, &cancel).await.is_ok());
    }

    #[tokio::test]
    async fn cancelled_token_aborts_encode_and_decode() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            codec.encode(&sample(50), &cancel).await,
            Err(Error::Aborted)
        ));
        assert!(matches!(
            codec.decode("QUJD", u64::MAX, &cancel).await,
            Err(Error::Aborted)
        ));
    }

    #[tokio::test]
    async fn cancellation_between_slices_stops_the_encode() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        // Another task gets to run at the first yield point and cancels.
        let handle = tokio::spawn(async move { trigger.cancel() });
        let result = codec.encode(&sample(10_000), &cancel).await;
        handle.await.unwrap();
        assert!(matches!(result, Err(Error::Aborted)));
    }

    #[test]
    fn chunked_encode_yields_between_slices() {
        let codec = small_codec();
        let cancel = CancellationToken::new();
        let bytes = sample(64);

        let mut task = tokio_test::task::spawn(codec.encode_frames(&bytes, &cancel));
        tokio_test::assert_pending!(task.poll());
        assert!(task.is_woken());

        let frames = loop {
            if let std::task::Poll::Ready(result) = task.poll() {
                break result.unwrap();
            }
        };
        assert_eq!(frames.concat(), STANDARD.encode(&bytes));
    }

    #[test]
    fn decoded_len_counts_padding_once() {
        assert_eq!(decoded_len(&[&b"QUJD"[..], &b"RA=="[..]]).unwrap(), 4);
        assert_eq!(decoded_len(&[&b"QUI="[..]]).unwrap(), 2);
        assert_eq!(decoded_len(&[]).unwrap(), 0);
    }
}
