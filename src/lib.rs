//! Server-side WebSocket endpoint (RFC 6455).
//!
//! # Overview
//!
//! This crate takes over an already-upgraded TCP byte stream and mediates
//! framed, masked message exchange with a single client: the HTTP upgrade
//! handshake, the inbound framing state machine, and the outbound framer.
//! The heart of it is a resumable frame parser that tolerates arbitrary TCP
//! chunking, carries the per-byte mask rotation across partial reads,
//! enforces protocol conformance, and interleaves control frames between
//! the fragments of a data message.
//!
//! Everything is single-threaded and cooperative: one driver owns a
//! [`Session`] and pumps it with [`Session::process`], the sole suspension
//! point. Data transfer goes through caller-provided [`InputSink`] /
//! [`OutputSink`] buffers; the socket handle itself is used only for
//! readiness waits and is never closed by the session.
//!
//! Out of scope: TLS, extensions (permessage-deflate), client-role
//! behavior, and multi-session multiplexing.
//!
//! # Module Structure
//!
//! - `frame`: wire primitives (opcodes, close codes, masking, headers)
//! - `handshake`: HTTP upgrade negotiation (RFC 6455 Section 4)
//! - `session`: the session state machine and `process` driver
//! - `sink`: byte-buffer contracts plus `TcpStream`-backed implementations
//! - [`testing`]: deterministic in-memory sinks for tests
//!
//! # Example
//!
//! ```no_run
//! use std::io::Read;
//! use std::net::TcpListener;
//! use ws_endpoint::{accept_upgrade, HttpRequest, StreamInputSink, StreamOutputSink};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let listener = TcpListener::bind("127.0.0.1:8080")?;
//!     let (mut stream, _) = listener.accept()?;
//!
//!     // A real server parses the request head precisely; this demo just
//!     // assumes one read captures it.
//!     let mut head = [0u8; 2048];
//!     let n = stream.read(&mut head)?;
//!     let request = HttpRequest::parse(&head[..n])?;
//!
//!     let input = StreamInputSink::new(stream.try_clone()?);
//!     let output = StreamOutputSink::new(stream.try_clone()?);
//!     let mut session = accept_upgrade(&request, stream, input, output)?;
//!
//!     session.on_text(|text| println!("message: {text}"));
//!     while session.process(1.0) {}
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)] // One audited allow for poller registration in `readiness`.
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

mod frame;
mod handshake;
mod readiness;
mod session;
mod sink;
pub mod testing;

pub use frame::{
    apply_mask, encode_header, rotate_mask, CloseCode, Opcode, ProtocolError, MAX_HEADER_LEN,
};
pub use handshake::{
    accept_upgrade, accept_upgrade_with_config, compute_accept_key, validate_upgrade,
    HandshakeError, HttpRequest,
};
pub use session::{Session, SessionConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use sink::{
    InputSink, OutputSink, StreamInputSink, StreamOutputSink, DEFAULT_HIGH_WATER,
};
