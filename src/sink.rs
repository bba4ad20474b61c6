//! Byte-sink contracts between a session and its transport.
//!
//! A [`Session`](crate::Session) never touches the socket for data transfer;
//! it consumes bytes from an [`InputSink`] and stages bytes into an
//! [`OutputSink`]. The traits describe exactly the synchronous buffer
//! semantics the session relies on; [`StreamInputSink`] and
//! [`StreamOutputSink`] provide buffered implementations over
//! `std::net::TcpStream` for callers without their own buffer layer.

use bytes::{Buf, BytesMut};
use std::io::{self, Read, Write};
use std::net::TcpStream;

/// Byte source the session reads frames from.
pub trait InputSink {
    /// Returns true when no buffered bytes are available.
    fn is_empty(&self) -> bool;

    /// Attempt a non-blocking fill from the transport.
    ///
    /// Returns false when nothing could be buffered: end of stream, a
    /// transport error, or no data despite a readiness signal. The driver
    /// treats a false after read-readiness as a disconnect.
    fn try_fill(&mut self) -> bool;

    /// Fill `dst` completely, blocking on the transport if needed.
    ///
    /// Returns false if the bytes cannot be produced (end of stream, error,
    /// or a configured read deadline expiring on a trickling peer).
    fn take_exact(&mut self, dst: &mut [u8]) -> bool;

    /// Move up to `dst.len()` buffered bytes into `dst`, returning the count.
    ///
    /// Never blocks; may return 0 when nothing is buffered.
    fn take_at_most(&mut self, dst: &mut [u8]) -> usize;
}

/// Byte destination the session writes frames into.
pub trait OutputSink {
    /// Stage bytes for transmission.
    ///
    /// May block on back-pressure. A false return is fatal: the session
    /// marks itself abnormally closed and stops.
    fn push(&mut self, bytes: &[u8]) -> bool;

    /// Write staged bytes to the transport.
    ///
    /// With `blocking` false, writes whatever the transport accepts without
    /// waiting; with `blocking` true, drains the whole buffer.
    fn flush(&mut self, blocking: bool);

    /// Returns true when nothing is staged.
    fn is_empty(&self) -> bool;
}

impl<T: InputSink + ?Sized> InputSink for &mut T {
    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }

    fn try_fill(&mut self) -> bool {
        (**self).try_fill()
    }

    fn take_exact(&mut self, dst: &mut [u8]) -> bool {
        (**self).take_exact(dst)
    }

    fn take_at_most(&mut self, dst: &mut [u8]) -> usize {
        (**self).take_at_most(dst)
    }
}

impl<T: OutputSink + ?Sized> OutputSink for &mut T {
    fn push(&mut self, bytes: &[u8]) -> bool {
        (**self).push(bytes)
    }

    fn flush(&mut self, blocking: bool) {
        (**self).flush(blocking);
    }

    fn is_empty(&self) -> bool {
        (**self).is_empty()
    }
}

const FILL_CHUNK: usize = 4096;
const INITIAL_CAPACITY: usize = 8192;

/// Default staging limit past which [`StreamOutputSink::push`] drains
/// synchronously instead of growing the buffer.
pub const DEFAULT_HIGH_WATER: usize = 256 * 1024;

/// Buffered [`InputSink`] over a `TcpStream`.
///
/// The stream is left in blocking mode between calls; non-blocking reads
/// toggle `O_NONBLOCK` for their duration. Callers wanting a bounded wait on
/// trickling peers can arm `TcpStream::set_read_timeout`; an expired
/// deadline surfaces as a failed [`InputSink::take_exact`].
#[derive(Debug)]
pub struct StreamInputSink {
    stream: TcpStream,
    buf: BytesMut,
}

impl StreamInputSink {
    /// Wrap a stream. Use `TcpStream::try_clone` when the same socket also
    /// backs a [`StreamOutputSink`].
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
        }
    }
}

impl InputSink for StreamInputSink {
    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn try_fill(&mut self) -> bool {
        if self.stream.set_nonblocking(true).is_err() {
            return false;
        }
        let result = fill_once(&mut self.stream, &mut self.buf);
        let _ = self.stream.set_nonblocking(false);
        matches!(result, Ok(n) if n > 0)
    }

    fn take_exact(&mut self, dst: &mut [u8]) -> bool {
        while self.buf.len() < dst.len() {
            match fill_once(&mut self.stream, &mut self.buf) {
                Ok(0) | Err(_) => return false,
                Ok(_) => {}
            }
        }
        dst.copy_from_slice(&self.buf.split_to(dst.len()));
        true
    }

    fn take_at_most(&mut self, dst: &mut [u8]) -> usize {
        if self.buf.is_empty() {
            let _ = self.try_fill();
        }
        let n = dst.len().min(self.buf.len());
        dst[..n].copy_from_slice(&self.buf.split_to(n));
        n
    }
}

/// One read from the stream into the buffer, retrying on EINTR.
fn fill_once(stream: &mut TcpStream, buf: &mut BytesMut) -> io::Result<usize> {
    let mut chunk = [0u8; FILL_CHUNK];
    loop {
        match stream.read(&mut chunk) {
            Ok(n) => {
                buf.extend_from_slice(&chunk[..n]);
                return Ok(n);
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

/// Buffered [`OutputSink`] over a `TcpStream`.
///
/// Bytes are staged in memory and drained opportunistically; once staging
/// exceeds the high-water mark, [`OutputSink::push`] drains synchronously.
/// Any write failure marks the sink broken, after which `push` reports the
/// fatal condition.
#[derive(Debug)]
pub struct StreamOutputSink {
    stream: TcpStream,
    buf: BytesMut,
    high_water: usize,
    broken: bool,
}

impl StreamOutputSink {
    /// Wrap a stream with the default high-water mark.
    #[must_use]
    pub fn new(stream: TcpStream) -> Self {
        Self::with_high_water(stream, DEFAULT_HIGH_WATER)
    }

    /// Wrap a stream, draining synchronously once `high_water` bytes are
    /// staged.
    #[must_use]
    pub fn with_high_water(stream: TcpStream, high_water: usize) -> Self {
        Self {
            stream,
            buf: BytesMut::with_capacity(INITIAL_CAPACITY),
            high_water,
            broken: false,
        }
    }

    fn drain(&mut self, blocking: bool) {
        if self.broken {
            return;
        }
        if !blocking && self.stream.set_nonblocking(true).is_err() {
            self.broken = true;
            return;
        }
        while !self.buf.is_empty() {
            match self.stream.write(&self.buf) {
                Ok(0) => {
                    self.broken = true;
                    break;
                }
                Ok(n) => self.buf.advance(n),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock && !blocking => break,
                Err(_) => {
                    self.broken = true;
                    break;
                }
            }
        }
        if !blocking {
            let _ = self.stream.set_nonblocking(false);
        }
    }
}

impl OutputSink for StreamOutputSink {
    fn push(&mut self, bytes: &[u8]) -> bool {
        if self.broken {
            return false;
        }
        self.buf.extend_from_slice(bytes);
        if self.buf.len() > self.high_water {
            self.drain(true);
        }
        !self.broken
    }

    fn flush(&mut self, blocking: bool) {
        self.drain(blocking);
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
