//! MJPEG over HTTP capture via `reqwest`.
//!
//! A part's `Content-Length` header, when present, fixes the payload length.
//! Otherwise the payload runs from the JPEG start marker to the first end
//! marker, which truncates JPEGs carrying an embedded thumbnail.

use crate::frame::{Frame, FrameError};
use std::io::{ErrorKind, Read};
use std::time::Duration;
use thiserror::Error;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const READ_CHUNK: usize = 16 * 1024;
const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("could not open stream {url}: {reason}")]
    Unreachable { url: String, reason: String },
    #[error("stream {url} answered HTTP {status}")]
    BadStatus { url: String, status: u16 },
    #[error("stream ended")]
    Ended,
    #[error("frame exceeded {0} bytes without an end marker")]
    Oversized(usize),
    #[error("read failed: {0}")]
    Read(#[from] std::io::Error),
    #[error("frame: {0}")]
    Frame(#[from] FrameError),
}

/// Source of decoded frames for the recognition loop.
pub trait FrameSource {
    fn read_frame(&mut self) -> Result<Frame, CaptureError>;
}

/// Splits a byte stream into consecutive JPEG payloads.
pub struct MjpegReader<R> {
    inner: R,
    buf: Vec<u8>,
    sequence: u64,
    /// `Content-Length` of the part whose payload is at the head of `buf`.
    expected: Option<usize>,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(READ_CHUNK * 4),
            sequence: 0,
            expected: None,
        }
    }

    /// Next complete `FFD8 .. FFD9` payload. Bytes between parts (boundaries,
    /// part headers) are discarded once the payload start is found.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, CaptureError> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(start) = find(&self.buf, &JPEG_SOI) {
                if start > 0 {
                    self.expected = content_length(&self.buf[..start]);
                    self.buf.drain(..start);
                }
                if let Some(end) = self.payload_end() {
                    let jpeg = self.buf.drain(..end).collect();
                    self.expected = None;
                    return Ok(jpeg);
                }
            }

            if self.buf.len() > MAX_FRAME_BYTES {
                self.buf.clear();
                self.expected = None;
                return Err(CaptureError::Oversized(MAX_FRAME_BYTES));
            }

            let n = match self.inner.read(&mut chunk) {
                Ok(0) => return Err(CaptureError::Ended),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

impl<R> MjpegReader<R> {
    /// End of the payload starting at `buf[0]`, once it is fully buffered.
    fn payload_end(&self) -> Option<usize> {
        if let Some(len) = self.expected {
            if self.buf.len() < len {
                return None;
            }
            if self.buf[..len].ends_with(&JPEG_EOI) {
                return Some(len);
            }
            tracing::debug!(content_length = len, "part length disagrees with markers");
        }
        find(&self.buf[2..], &JPEG_EOI).map(|rel| rel + 4)
    }
}

impl<R: Read> FrameSource for MjpegReader<R> {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        let jpeg = self.next_jpeg()?;
        self.sequence += 1;
        Ok(Frame::decode_jpeg(&jpeg, self.sequence)?)
    }
}

fn find(haystack: &[u8], needle: &[u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == needle)
}

/// Last `Content-Length` header among the bytes preceding a payload.
fn content_length(preamble: &[u8]) -> Option<usize> {
    String::from_utf8_lossy(preamble)
        .lines()
        .filter_map(|line| line.split_once(':'))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .filter_map(|(_, value)| value.trim().parse().ok())
        .last()
}

/// Live MJPEG stream. Dropping it closes the connection.
pub struct MjpegStream {
    url: String,
    reader: MjpegReader<reqwest::blocking::Response>,
}

impl MjpegStream {
    /// Open the stream. No request timeout is set: the body is endless.
    pub fn connect(url: &str) -> Result<Self, CaptureError> {
        let unreachable = |e: reqwest::Error| CaptureError::Unreachable {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(None::<Duration>)
            .build()
            .map_err(unreachable)?;
        let response = client.get(url).send().map_err(unreachable)?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaptureError::BadStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        tracing::info!(
            url,
            content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-"),
            "stream opened"
        );

        Ok(Self {
            url: url.to_string(),
            reader: MjpegReader::new(response),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl FrameSource for MjpegStream {
    fn read_frame(&mut self) -> Result<Frame, CaptureError> {
        self.reader.read_frame()
    }
}
