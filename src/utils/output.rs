/// Bounded output collection
///
/// Each stream is drained on its own thread into a buffer that stops
/// growing at the ceiling but keeps reading, so the child never blocks on a
/// full pipe. Truncation is explicit: a marker is appended and the stream is
/// flagged.
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How a captured stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputIntegrity {
    /// Read to EOF within the ceiling
    Complete,
    /// More bytes arrived than the ceiling allows
    Truncated,
    /// The pipe failed mid-read
    ReadError,
    /// A descendant kept the pipe open past the collection deadline
    CollectionTimedOut,
}

impl fmt::Display for OutputIntegrity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputIntegrity::Complete => write!(f, "complete"),
            OutputIntegrity::Truncated => write!(f, "truncated"),
            OutputIntegrity::ReadError => write!(f, "read_error"),
            OutputIntegrity::CollectionTimedOut => write!(f, "collection_timed_out"),
        }
    }
}

/// Marker appended to a stream cut at `limit` bytes.
pub fn truncation_marker(limit: usize) -> String {
    format!("\n<output truncated: exceeded {} bytes>", limit)
}

/// Bytes of a truncated stream's end kept for diagnostics.
pub const TAIL_BYTES: usize = 16 * 1024;

/// A fully collected stream, decoded as UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedStream {
    pub text: String,
    /// Bytes the child actually wrote
    pub total_bytes: usize,
    pub integrity: OutputIntegrity,
    /// Last [`TAIL_BYTES`] of the stream, set only when it was truncated
    pub tail: Option<String>,
}

impl CapturedStream {
    pub fn empty() -> Self {
        Self::lost(OutputIntegrity::Complete)
    }

    fn lost(integrity: OutputIntegrity) -> Self {
        Self {
            text: String::new(),
            total_bytes: 0,
            integrity,
            tail: None,
        }
    }

    pub fn truncated(&self) -> bool {
        self.integrity == OutputIntegrity::Truncated
    }

    /// Text to search for diagnostics: the end of the stream when the head
    /// was kept and the rest dropped.
    pub fn diagnostic_text(&self) -> &str {
        self.tail.as_deref().unwrap_or(&self.text)
    }
}

/// Byte buffer that keeps at most `limit` bytes from the head, plus a
/// rolling window of the most recent overflow, and counts everything.
#[derive(Debug)]
pub struct BoundedBuffer {
    limit: usize,
    data: Vec<u8>,
    overflow: Vec<u8>,
    total: usize,
}

impl BoundedBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            data: Vec::with_capacity(limit.min(64 * 1024)),
            overflow: Vec::new(),
            total: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.total = self.total.saturating_add(chunk.len());
        let room = self.limit.saturating_sub(self.data.len());
        let take = room.min(chunk.len());
        self.data.extend_from_slice(&chunk[..take]);

        self.overflow.extend_from_slice(&chunk[take..]);
        if self.overflow.len() > 2 * TAIL_BYTES {
            let excess = self.overflow.len() - TAIL_BYTES;
            self.overflow.drain(..excess);
        }
    }

    /// Last `TAIL_BYTES` of everything pushed, decoded.
    fn tail(&self) -> String {
        let from_overflow = self.overflow.len().min(TAIL_BYTES);
        let from_data = (TAIL_BYTES - from_overflow).min(self.data.len());

        let mut window = Vec::with_capacity(from_data + from_overflow);
        window.extend_from_slice(&self.data[self.data.len() - from_data..]);
        window.extend_from_slice(&self.overflow[self.overflow.len() - from_overflow..]);

        // The window may open mid-character.
        String::from_utf8_lossy(&window)
            .trim_start_matches('\u{FFFD}')
            .to_string()
    }

    pub fn overflowed(&self) -> bool {
        self.total > self.limit
    }

    /// Decode the kept bytes. On overflow the text is cut back to a char
    /// boundary no later than `limit` and the marker appended.
    pub fn finish(self, integrity: OutputIntegrity) -> CapturedStream {
        let overflowed = self.overflowed();
        let tail = overflowed.then(|| self.tail());
        let mut text = String::from_utf8_lossy(&self.data).into_owned();

        let integrity = if overflowed {
            // Replacement characters can grow the decoded text.
            let mut cut = text.len().min(self.limit);
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            text.truncate(cut);
            if text.ends_with('\u{FFFD}') && !self.data.ends_with("\u{FFFD}".as_bytes()) {
                // A multi-byte char split by the ceiling.
                text.pop();
            }
            text.push_str(&truncation_marker(self.limit));
            OutputIntegrity::Truncated
        } else {
            integrity
        };

        CapturedStream {
            text,
            total_bytes: self.total,
            integrity,
            tail,
        }
    }
}

/// Drain `stream` until EOF into a bounded buffer.
pub fn drain_stream<R: Read>(mut stream: R, limit: usize) -> CapturedStream {
    let mut buffer = BoundedBuffer::new(limit);
    let mut chunk = [0u8; 8192];

    let integrity = loop {
        match stream.read(&mut chunk) {
            Ok(0) => break OutputIntegrity::Complete,
            Ok(n) => buffer.push(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::debug!("Output stream read failed: {}", e);
                break OutputIntegrity::ReadError;
            }
        }
    };

    buffer.finish(integrity)
}

/// Background reader for one child stream.
pub struct StreamCollector {
    rx: Receiver<CapturedStream>,
    handle: Option<JoinHandle<()>>,
}

impl StreamCollector {
    pub fn spawn<R: Read + Send + 'static>(stream: Option<R>, limit: usize) -> Self {
        let (tx, rx) = bounded(1);
        let handle = match stream {
            Some(stream) => Some(thread::spawn(move || {
                let _ = tx.send(drain_stream(stream, limit));
            })),
            None => {
                let _ = tx.send(CapturedStream::empty());
                None
            }
        };
        Self { rx, handle }
    }

    /// Wait until `deadline` for the reader to hit EOF.
    pub fn finish(mut self, deadline: Instant) -> CapturedStream {
        let wait = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(wait) {
            Ok(captured) => {
                if let Some(handle) = self.handle.take() {
                    let _ = handle.join();
                }
                captured
            }
            Err(RecvTimeoutError::Timeout) => {
                // The reader thread is left to finish on its own.
                log::warn!("Output collection did not reach EOF before the deadline");
                CapturedStream::lost(OutputIntegrity::CollectionTimedOut)
            }
            Err(RecvTimeoutError::Disconnected) => CapturedStream::lost(OutputIntegrity::ReadError),
        }
    }
}

/// Grace period for readers after the child has been reaped.
pub const COLLECTION_GRACE: Duration = Duration::from_secs(2);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn small_stream_is_complete() {
        let captured = drain_stream(Cursor::new(b"hello\n".to_vec()), 1024);
        assert_eq!(captured.text, "hello\n");
        assert_eq!(captured.integrity, OutputIntegrity::Complete);
        assert!(!captured.truncated());
    }

    #[test]
    fn exact_limit_is_not_truncated() {
        let captured = drain_stream(Cursor::new(vec![b'x'; 100]), 100);
        assert_eq!(captured.text.len(), 100);
        assert!(!captured.truncated());
    }

    #[test]
    fn overflow_keeps_limit_plus_marker() {
        let captured = drain_stream(Cursor::new(vec![b'x'; 50_000]), 1000);
        assert!(captured.truncated());
        assert_eq!(captured.total_bytes, 50_000);
        assert_eq!(
            captured.text,
            format!("{}{}", "x".repeat(1000), truncation_marker(1000))
        );
    }

    #[test]
    fn truncation_backs_off_to_char_boundary() {
        // "é" is two bytes; a ceiling of 3 splits the second one.
        let captured = drain_stream(Cursor::new("ééé".as_bytes().to_vec()), 3);
        assert!(captured.truncated());
        assert_eq!(captured.text, format!("é{}", truncation_marker(3)));
    }

    #[test]
    fn truncated_stream_keeps_its_end() {
        let mut bytes = vec![b'w'; 3 * TAIL_BYTES];
        bytes.extend_from_slice(b"\nKeyError: 'missing'\n");
        let captured = drain_stream(Cursor::new(bytes), 1000);

        assert!(captured.truncated());
        assert!(!captured.text.contains("KeyError"));
        let tail = captured.tail.as_deref().unwrap();
        assert_eq!(tail.len(), TAIL_BYTES);
        assert!(tail.ends_with("KeyError: 'missing'\n"));
        assert_eq!(captured.diagnostic_text(), tail);
    }

    #[test]
    fn short_overflow_tail_includes_kept_head() {
        let captured = drain_stream(Cursor::new(b"0123456789".to_vec()), 4);
        assert_eq!(captured.tail.as_deref(), Some("0123456789"));
    }

    #[test]
    fn complete_stream_has_no_tail() {
        let captured = drain_stream(Cursor::new(b"done\n".to_vec()), 100);
        assert!(captured.tail.is_none());
        assert_eq!(captured.diagnostic_text(), "done\n");
    }

    #[test]
    fn collector_handles_missing_stream() {
        let collector = StreamCollector::spawn(None::<Cursor<Vec<u8>>>, 10);
        let captured = collector.finish(Instant::now() + Duration::from_secs(1));
        assert_eq!(captured, CapturedStream::empty());
    }

    #[test]
    fn collector_reads_on_thread() {
        let collector = StreamCollector::spawn(Some(Cursor::new(b"abc".to_vec())), 10);
        let captured = collector.finish(Instant::now() + Duration::from_secs(5));
        assert_eq!(captured.text, "abc");
    }

    #[test]
    fn integrity_display() {
        assert_eq!(OutputIntegrity::Truncated.to_string(), "truncated");
        assert_eq!(
            OutputIntegrity::CollectionTimedOut.to_string(),
            "collection_timed_out"
        );
    }
}
