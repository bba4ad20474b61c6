//! Deterministic in-memory sinks for driving a session in tests.
//!
//! [`ScriptInput`] plays back scripted wire bytes with full control over
//! chunk boundaries, which is exactly what exercising the resumable parser
//! needs: each `try_fill` reveals one more chunk, exact reads pull through
//! chunk boundaries the way a blocking socket read would, and
//! `take_at_most` serves only what is currently revealed. [`CaptureOutput`]
//! records everything the session emits.

use crate::sink::{InputSink, OutputSink};
use std::collections::VecDeque;

/// Scripted [`InputSink`]: wire bytes delivered chunk by chunk.
///
/// Once the script runs dry, `try_fill` reports false, which a driver
/// treats as the peer closing the transport.
#[derive(Debug, Default)]
pub struct ScriptInput {
    chunks: VecDeque<Vec<u8>>,
    available: VecDeque<u8>,
}

impl ScriptInput {
    /// An empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A script that delivers `bytes` as a single chunk.
    #[must_use]
    pub fn with_bytes(bytes: &[u8]) -> Self {
        let mut input = Self::new();
        input.push_chunk(bytes.to_vec());
        input
    }

    /// Append a chunk to the script.
    pub fn push_chunk(&mut self, chunk: impl Into<Vec<u8>>) {
        self.chunks.push_back(chunk.into());
    }

    fn reveal_next_chunk(&mut self) -> bool {
        match self.chunks.pop_front() {
            Some(chunk) => {
                self.available.extend(chunk);
                true
            }
            None => false,
        }
    }
}

impl InputSink for ScriptInput {
    fn is_empty(&self) -> bool {
        self.available.is_empty()
    }

    fn try_fill(&mut self) -> bool {
        self.reveal_next_chunk()
    }

    fn take_exact(&mut self, dst: &mut [u8]) -> bool {
        while self.available.len() < dst.len() {
            if !self.reveal_next_chunk() {
                return false;
            }
        }
        for slot in dst.iter_mut() {
            *slot = self.available.pop_front().expect("length checked above");
        }
        true
    }

    fn take_at_most(&mut self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.available.len());
        for slot in dst.iter_mut().take(n) {
            *slot = self.available.pop_front().expect("length checked above");
        }
        n
    }
}

/// Recording [`OutputSink`].
///
/// Pushed bytes accumulate and stay inspectable; `flush` marks them as
/// drained so the driver's "close sent and output empty" exit works.
#[derive(Debug, Default)]
pub struct CaptureOutput {
    written: Vec<u8>,
    unflushed: usize,
    refuse: bool,
}

impl CaptureOutput {
    /// An empty capture.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pushed byte so far, flushed or not.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.written
    }

    /// Make all subsequent pushes fail, simulating a dead transport.
    pub fn refuse_writes(&mut self) {
        self.refuse = true;
    }
}

impl OutputSink for CaptureOutput {
    fn push(&mut self, bytes: &[u8]) -> bool {
        if self.refuse {
            return false;
        }
        self.written.extend_from_slice(bytes);
        self.unflushed += bytes.len();
        true
    }

    fn flush(&mut self, _blocking: bool) {
        self.unflushed = 0;
    }

    fn is_empty(&self) -> bool {
        self.unflushed == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_script_input_chunk_boundaries() {
        let mut input = ScriptInput::new();
        input.push_chunk(vec![1, 2]);
        input.push_chunk(vec![3]);

        assert!(input.is_empty());
        assert!(input.try_fill());

        let mut buf = [0u8; 4];
        // Only the revealed chunk is served without blocking.
        assert_eq!(input.take_at_most(&mut buf), 2);
        assert_eq!(&buf[..2], &[1, 2]);

        // Exact reads pull through chunk boundaries.
        assert!(input.take_exact(&mut buf[..1]));
        assert_eq!(buf[0], 3);

        // Script dry: both paths report it.
        assert!(!input.try_fill());
        assert!(!input.take_exact(&mut buf[..1]));
    }

    #[test]
    fn test_capture_output_flush_tracking() {
        let mut output = CaptureOutput::new();
        assert!(output.is_empty());

        assert!(output.push(&[1, 2, 3]));
        assert!(!output.is_empty());

        output.flush(false);
        assert!(output.is_empty());
        assert_eq!(output.bytes(), &[1, 2, 3]);

        output.refuse_writes();
        assert!(!output.push(&[4]));
        assert_eq!(output.bytes(), &[1, 2, 3]);
    }
}
