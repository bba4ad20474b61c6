//! WebSocket session: resumable inbound framer, outbound framer, and the
//! cooperative `process` driver.
//!
//! A [`Session`] owns the two byte sinks of an upgraded connection and a
//! borrowed socket handle used only for readiness waits. All work happens
//! inside [`Session::process`]: the sole suspension point flushes staged
//! output, waits for socket readiness, and drains inbound frames, invoking
//! the registered message callbacks synchronously in wire-arrival order.
//!
//! The inbound parser is resumable: a frame's payload may arrive across any
//! number of reads, and the stored mask is rotated after each partial read
//! so unmasking picks up at the correct key byte. Control frames may appear
//! between the fragments of a data message without disturbing reassembly.

use crate::frame::{apply_mask, encode_header, rotate_mask, CloseCode, Opcode, ProtocolError};
use crate::readiness::await_readiness;
use crate::sink::{InputSink, OutputSink};
use std::mem;
use std::os::fd::AsFd;
use std::time::Duration;
use tracing::{debug, trace};

/// Default cap on a reassembled message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum size of a reassembled data message. Exceeding it closes the
    /// connection with [`CloseCode::MessageTooLong`].
    pub max_message_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum reassembled message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }
}

/// A server-side WebSocket session over an upgraded connection.
///
/// `S` is the socket handle used for readiness waits (any `AsFd`; typically
/// a `TcpStream` or a borrow of one). The session never closes or shuts
/// down the socket; tearing down the transport is the caller's job once
/// [`Session::process`] returns false.
pub struct Session<S, In, Out> {
    socket: S,
    input: In,
    output: Out,
    config: SessionConfig,

    open: bool,
    sent_close: bool,
    close_code: Option<u16>,

    // Reassembly state for the in-progress data message. `pending_left > 0`
    // means a frame's payload is mid-read; `pending_fin` means the last data
    // frame did not carry FIN and a continuation is owed.
    pending_opcode: Option<Opcode>,
    pending_fin: bool,
    pending_left: u64,
    pending_mask: [u8; 4],
    pending_buf: Vec<u8>,

    text_handler: Option<Box<dyn FnMut(String)>>,
    binary_handler: Option<Box<dyn FnMut(Vec<u8>)>>,
    ping_handler: Option<Box<dyn FnMut(Vec<u8>)>>,
    pong_handler: Option<Box<dyn FnMut(Vec<u8>)>>,
}

impl<S, In, Out> std::fmt::Debug for Session<S, In, Out>
where
    S: std::fmt::Debug,
    In: std::fmt::Debug,
    Out: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("socket", &self.socket)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("config", &self.config)
            .field("open", &self.open)
            .field("sent_close", &self.sent_close)
            .field("close_code", &self.close_code)
            .field("pending_opcode", &self.pending_opcode)
            .field("pending_fin", &self.pending_fin)
            .field("pending_left", &self.pending_left)
            .field("pending_mask", &self.pending_mask)
            .field("pending_buf", &self.pending_buf)
            .field("text_handler", &self.text_handler.is_some())
            .field("binary_handler", &self.binary_handler.is_some())
            .field("ping_handler", &self.ping_handler.is_some())
            .field("pong_handler", &self.pong_handler.is_some())
            .finish()
    }
}

impl<S, In, Out> Session<S, In, Out>
where
    In: InputSink,
    Out: OutputSink,
{
    /// Create a session over an already-upgraded connection.
    ///
    /// Normally reached through [`accept_upgrade`](crate::accept_upgrade);
    /// use this directly when the handshake happened elsewhere.
    #[must_use]
    pub fn from_upgraded(socket: S, input: In, output: Out, config: SessionConfig) -> Self {
        Self {
            socket,
            input,
            output,
            config,
            open: true,
            sent_close: false,
            close_code: None,
            pending_opcode: None,
            pending_fin: false,
            pending_left: 0,
            pending_mask: [0; 4],
            pending_buf: Vec::new(),
            text_handler: None,
            binary_handler: None,
            ping_handler: None,
            pong_handler: None,
        }
    }

    /// Whether the session is logically alive.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// The recorded close reason, once there is one.
    ///
    /// Raw u16 so peer-supplied codes outside the named set survive intact;
    /// match against [`CloseCode`] values for the semantic set.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        self.close_code
    }

    /// Register the text-message callback. Unset handlers drop deliveries.
    pub fn on_text(&mut self, handler: impl FnMut(String) + 'static) {
        self.text_handler = Some(Box::new(handler));
    }

    /// Register the binary-message callback.
    pub fn on_binary(&mut self, handler: impl FnMut(Vec<u8>) + 'static) {
        self.binary_handler = Some(Box::new(handler));
    }

    /// Register the ping callback, invoked after the pong response is
    /// already enqueued.
    pub fn on_ping(&mut self, handler: impl FnMut(Vec<u8>) + 'static) {
        self.ping_handler = Some(Box::new(handler));
    }

    /// Register the pong callback.
    pub fn on_pong(&mut self, handler: impl FnMut(Vec<u8>) + 'static) {
        self.pong_handler = Some(Box::new(handler));
    }

    /// Enqueue a text message.
    pub fn send_text(&mut self, text: &str) {
        if !self.open || self.sent_close {
            return;
        }
        self.send_header(true, Opcode::Text, text.len() as u64);
        self.push_output(text.as_bytes());
    }

    /// Enqueue a binary message.
    pub fn send_binary(&mut self, payload: &[u8]) {
        if !self.open || self.sent_close {
            return;
        }
        self.send_header(true, Opcode::Binary, payload.len() as u64);
        self.push_output(payload);
    }

    /// Enqueue a ping. The payload must be at most 125 bytes.
    pub fn ping(&mut self, payload: &[u8]) {
        debug_assert!(payload.len() <= 125, "control payload limit is 125 bytes");
        if !self.open || self.sent_close {
            return;
        }
        self.send_header(true, Opcode::Ping, payload.len() as u64);
        self.push_output(payload);
    }

    /// Enqueue a pong. The payload must be at most 125 bytes.
    pub fn pong(&mut self, payload: &[u8]) {
        debug_assert!(payload.len() <= 125, "control payload limit is 125 bytes");
        if !self.open || self.sent_close {
            return;
        }
        self.send_header(true, Opcode::Pong, payload.len() as u64);
        self.push_output(payload);
    }

    /// Enqueue a Close frame and stop accepting outbound traffic.
    ///
    /// Synthetic codes ([`CloseCode::NoStatus`], [`CloseCode::Abnormal`])
    /// are recorded but produce an empty close payload, since they must not
    /// appear on the wire. A second close is suppressed entirely.
    pub fn close(&mut self, code: CloseCode) {
        self.send_close_raw(code.into());
    }

    fn send_close_raw(&mut self, code: u16) {
        if self.sent_close {
            trace!(code, "close suppressed, already sent");
            return;
        }
        if !self.open {
            return;
        }
        debug!(code, "sending close");
        self.close_code = Some(code);
        if CloseCode::is_synthetic_u16(code) {
            self.send_header(true, Opcode::Close, 0);
        } else {
            self.send_header(true, Opcode::Close, 2);
            self.push_output(&code.to_be_bytes());
        }
        self.sent_close = true;
    }

    fn send_header(&mut self, fin: bool, opcode: Opcode, payload_len: u64) {
        let (header, len) = encode_header(fin, opcode, payload_len);
        self.push_output(&header[..len]);
    }

    fn push_output(&mut self, bytes: &[u8]) {
        if !self.output.push(bytes) {
            debug!("output sink rejected write, closing abnormally");
            self.open = false;
            self.close_code = Some(CloseCode::Abnormal.into());
        }
    }

    /// Record a violation, send the matching Close, and stop frame reading.
    fn protocol_violation(&mut self, error: ProtocolError) -> bool {
        debug!(%error, "protocol violation");
        self.send_close_raw(error.close_code().into());
        false
    }

    /// Read with `take_exact`, closing with POLICY_VIOLATION on failure.
    ///
    /// Headers and control payloads are read synchronously; a sink that
    /// cannot produce the bytes (trickle deadline, transport fault) ends
    /// the session.
    fn read_exact_or_close(&mut self, dst: &mut [u8]) -> bool {
        if self.input.take_exact(dst) {
            true
        } else {
            debug!("exact read failed, closing with policy violation");
            self.send_close_raw(CloseCode::PolicyViolation.into());
            false
        }
    }

    /// One framer step: resume the current payload or parse a new header.
    ///
    /// Returns false when frame processing must stop for this tick.
    fn read_frames(&mut self) -> bool {
        if self.pending_left > 0 {
            self.read_pending()
        } else {
            self.read_frame()
        }
    }

    #[allow(clippy::too_many_lines)] // Single, explicit header-parse sequence.
    fn read_frame(&mut self) -> bool {
        debug_assert_eq!(self.pending_left, 0, "header read while payload pending");

        // Client frames are 6 to 14 bytes of header; start with the fixed
        // part plus the mask, which is always present for client frames.
        let mut header = [0u8; 14];
        if !self.read_exact_or_close(&mut header[..6]) {
            return false;
        }

        if header[0] & 0x70 != 0 {
            return self.protocol_violation(ProtocolError::ReservedBits);
        }
        if header[1] & 0x80 == 0 {
            return self.protocol_violation(ProtocolError::UnmaskedFrame);
        }

        let fin = header[0] & 0x80 != 0;
        let opcode = match Opcode::from_u8(header[0] & 0x0F) {
            Ok(opcode) => opcode,
            Err(error) => return self.protocol_violation(error),
        };
        let mut len = u64::from(header[1] & 0x7F);
        let mut mask = [header[2], header[3], header[4], header[5]];

        if opcode.is_control() {
            if len > 125 {
                return self.protocol_violation(ProtocolError::ControlFrameTooLarge(len));
            }
            if !fin {
                return self.protocol_violation(ProtocolError::FragmentedControlFrame);
            }
        }
        if opcode == Opcode::Continuation && !self.pending_fin {
            // Can't continue what you haven't started.
            return self.protocol_violation(ProtocolError::OrphanContinuation);
        }
        if self.pending_fin && matches!(opcode, Opcode::Text | Opcode::Binary) {
            // A new data message can't start until the current one is done.
            return self.protocol_violation(ProtocolError::InterleavedDataFrame);
        }

        if len == 126 {
            // Two more bytes: the 16-bit length; the mask moves back.
            if !self.read_exact_or_close(&mut header[6..8]) {
                return false;
            }
            len = u64::from(u16::from_be_bytes([header[2], header[3]]));
            mask = [header[4], header[5], header[6], header[7]];
        } else if len == 127 {
            // Eight more bytes: the 64-bit length; the mask moves back.
            if !self.read_exact_or_close(&mut header[6..14]) {
                return false;
            }
            let mut extended = [0u8; 8];
            extended.copy_from_slice(&header[2..10]);
            len = u64::from_be_bytes(extended);
            if len >> 63 != 0 {
                return self.protocol_violation(ProtocolError::LengthOverflow);
            }
            mask = [header[10], header[11], header[12], header[13]];
        }

        if opcode.is_control() {
            // Safe to overwrite between fragments, never inside a frame.
            self.pending_mask = mask;
            return self.read_control_frame(opcode, len as usize);
        }

        let projected = self.pending_buf.len() as u64 + len;
        if projected > self.config.max_message_size as u64 {
            return self.protocol_violation(ProtocolError::MessageTooLong {
                size: projected,
                max: self.config.max_message_size,
            });
        }

        if !self.pending_fin {
            self.pending_opcode = Some(opcode);
        }
        self.pending_fin = !fin;
        self.pending_left = len;
        self.pending_mask = mask;

        if self.pending_left == 0 {
            // Empty frame: nothing to resume, finish it here.
            return self.finish_frame();
        }
        true
    }

    /// Resume the current frame's payload from whatever is buffered.
    fn read_pending(&mut self) -> bool {
        let pos = self.pending_buf.len();
        let want = self.pending_left as usize;
        self.pending_buf.resize(pos + want, 0);

        let read = self.input.take_at_most(&mut self.pending_buf[pos..]);
        apply_mask(&mut self.pending_buf[pos..pos + read], self.pending_mask);
        self.pending_buf.truncate(pos + read);
        self.pending_left -= read as u64;

        if self.pending_left > 0 {
            // More of this frame later; rotate the mask so the next chunk
            // starts XORing at the right key byte.
            self.pending_mask = rotate_mask(self.pending_mask, read % 4);
            return true;
        }

        self.finish_frame()
    }

    /// The current frame is fully read; deliver the message if it is done.
    fn finish_frame(&mut self) -> bool {
        if self.pending_fin {
            // Frame finished, message not: a continuation is owed.
            return true;
        }

        let payload = mem::take(&mut self.pending_buf);
        let opcode = self.pending_opcode.take();
        match opcode {
            Some(Opcode::Text) => match String::from_utf8(payload) {
                Ok(text) => {
                    trace!(len = text.len(), "text message");
                    if let Some(handler) = &mut self.text_handler {
                        handler(text);
                    }
                }
                Err(_) => return self.protocol_violation(ProtocolError::InvalidUtf8),
            },
            Some(Opcode::Binary) => {
                trace!(len = payload.len(), "binary message");
                if let Some(handler) = &mut self.binary_handler {
                    handler(payload);
                }
            }
            _ => debug_assert!(false, "finished a frame with no data message"),
        }
        true
    }

    /// Read and dispatch a control frame. The payload is at most 125 bytes
    /// and is read synchronously.
    fn read_control_frame(&mut self, opcode: Opcode, len: usize) -> bool {
        let mut payload = vec![0u8; len];
        if !self.read_exact_or_close(&mut payload) {
            return false;
        }
        apply_mask(&mut payload, self.pending_mask);

        match opcode {
            Opcode::Ping => {
                // Pong first, then the callback, so the reply is ahead of
                // anything the handler enqueues. Flush without blocking to
                // get it onto the wire early.
                self.pong(&payload);
                self.output.flush(false);
                if let Some(handler) = &mut self.ping_handler {
                    handler(payload);
                }
                true
            }
            Opcode::Pong => {
                if let Some(handler) = &mut self.pong_handler {
                    handler(payload);
                }
                true
            }
            Opcode::Close => {
                if payload.len() >= 2 {
                    let code = u16::from_be_bytes([payload[0], payload[1]]);
                    debug!(code, "peer close");
                    self.send_close_raw(code);
                } else {
                    debug!("peer close without status");
                    self.send_close_raw(CloseCode::NoStatus.into());
                }
                // Don't read anything more.
                false
            }
            _ => unreachable!("dispatched a data opcode as control"),
        }
    }

    /// The read-readiness arm of the driver: fill if needed, then drain
    /// frames while input remains and the framer wants to continue.
    fn handle_readable(&mut self) -> bool {
        if self.input.is_empty() && !self.input.try_fill() {
            // Readiness said readable but there is nothing: disconnect.
            debug!("transport closed by peer");
            self.close_code = Some(CloseCode::Abnormal.into());
            self.open = false;
            return false;
        }

        while self.read_frames() && !self.input.is_empty() {}
        true
    }
}

impl<S, In, Out> Session<S, In, Out>
where
    S: AsFd,
    In: InputSink,
    Out: OutputSink,
{
    /// Drive the session for one tick, waiting up to `timeout_secs`
    /// (fractional seconds, microsecond precision) for socket readiness.
    ///
    /// Returns true while the session should keep being driven; false once
    /// it is finished and may be torn down. A timeout is a normal tick and
    /// returns true.
    #[must_use]
    pub fn process(&mut self, timeout_secs: f32) -> bool {
        if !self.open {
            return false;
        }

        self.output.flush(false);

        if self.sent_close && self.output.is_empty() {
            // Our close is on the wire; nothing left to wait for.
            self.open = false;
            return false;
        }

        let want_read = !self.sent_close;
        let want_write = !self.output.is_empty();
        let timeout = Duration::try_from_secs_f32(timeout_secs).unwrap_or(Duration::ZERO);

        let ready = match await_readiness(&self.socket, want_read, want_write, timeout) {
            Ok(ready) => ready,
            Err(error) => {
                // Interrupted waits count as a timed-out tick.
                trace!(%error, "readiness wait failed");
                return true;
            }
        };
        if !ready.any() {
            return true;
        }

        if ready.writable {
            self.output.flush(false);
        }
        if ready.readable && !self.handle_readable() {
            return false;
        }
        true
    }
}
