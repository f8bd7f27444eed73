//! HTTP camera source.
//!
//! Connects lazily on the first read. A `multipart/*` response is scanned for
//! JPEG SOI/EOI markers; any other response is treated as a snapshot endpoint
//! and re-fetched for every frame. A broken stream is dropped and reconnected
//! on the next call.

use std::io::Read;
use std::time::{Duration, Instant};

use super::{decode_frame, FrameSource};
use crate::error::PipelineError;
use crate::frame::Frame;

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct MjpegSettings {
    pub url: String,
    pub timeout: Duration,
    /// Minimum spacing between snapshot fetches.
    pub snapshot_interval: Duration,
}

impl Default for MjpegSettings {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:81/stream".to_string(),
            timeout: Duration::from_secs(10),
            snapshot_interval: Duration::from_millis(200),
        }
    }
}

enum HttpStream {
    Mjpeg(MjpegStream),
    Snapshot,
}

pub struct MjpegSource {
    settings: MjpegSettings,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    last_fetch_at: Option<Instant>,
    frame_count: u64,
}

impl MjpegSource {
    pub fn new(settings: MjpegSettings) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(settings.timeout)
            .timeout_read(settings.timeout)
            .build();
        Self {
            settings,
            agent,
            stream: None,
            last_fetch_at: None,
            frame_count: 0,
        }
    }

    fn connect(&mut self) -> Result<(), PipelineError> {
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .map_err(|e| {
                PipelineError::SourceFailed(format!("connect {}: {}", self.settings.url, e))
            })?;
        let content_type = response.header("Content-Type").unwrap_or("").to_lowercase();
        if content_type.contains("multipart") {
            log::info!("{}: mjpeg stream ({})", self.name(), content_type);
            self.stream = Some(HttpStream::Mjpeg(MjpegStream::new(response.into_reader())));
        } else {
            log::info!("{}: snapshot endpoint ({})", self.name(), content_type);
            self.stream = Some(HttpStream::Snapshot);
        }
        Ok(())
    }

    fn fetch_snapshot(&mut self) -> Result<Vec<u8>, PipelineError> {
        if let Some(last) = self.last_fetch_at {
            let elapsed = last.elapsed();
            if elapsed < self.settings.snapshot_interval {
                std::thread::sleep(self.settings.snapshot_interval - elapsed);
            }
        }
        self.last_fetch_at = Some(Instant::now());
        let response = self
            .agent
            .get(&self.settings.url)
            .call()
            .map_err(|e| PipelineError::SourceFailed(format!("fetch snapshot: {}", e)))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| PipelineError::SourceFailed(format!("read snapshot: {}", e)))?;
        if bytes.is_empty() {
            return Err(PipelineError::InvalidFrame("empty snapshot".to_string()));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegSource {
    fn name(&self) -> String {
        format!("mjpeg {}", self.settings.url)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, PipelineError> {
        if self.stream.is_none() {
            self.connect()?;
        }
        let jpeg = match self.stream.as_mut() {
            Some(HttpStream::Mjpeg(stream)) => match stream.read_next_jpeg() {
                Ok(bytes) => bytes,
                Err(err) => {
                    self.stream = None;
                    return Err(err);
                }
            },
            Some(HttpStream::Snapshot) => self.fetch_snapshot()?,
            None => return Err(PipelineError::SourceFailed("not connected".to_string())),
        };
        self.frame_count += 1;
        decode_frame(&jpeg, self.frame_count).map(Some)
    }
}

struct MjpegStream {
    reader: Box<dyn Read + Send + Sync>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    fn new(reader: Box<dyn Read + Send + Sync>) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
        }
    }

    fn read_next_jpeg(&mut self) -> Result<Vec<u8>, PipelineError> {
        let mut chunk = vec![0u8; 8192];
        loop {
            if let Some((start, end)) = find_jpeg_bounds(&self.buffer) {
                let frame = self.buffer[start..end].to_vec();
                self.buffer.drain(..end);
                return Ok(frame);
            }

            let read = self
                .reader
                .read(&mut chunk)
                .map_err(|e| PipelineError::SourceFailed(format!("read mjpeg chunk: {}", e)))?;
            if read == 0 {
                return Err(PipelineError::SourceFailed(
                    "mjpeg stream ended".to_string(),
                ));
            }
            self.buffer.extend_from_slice(&chunk[..read]);

            if self.buffer.len() > MAX_JPEG_BYTES * 2 {
                let drain_len = self.buffer.len() - 2;
                self.buffer.drain(..drain_len);
            }
        }
    }
}

fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}
