//! One-shot socket readiness waits for the session driver.
//!
//! Each `Session::process` tick waits on the socket for read and/or write
//! readiness with a bounded timeout, then acts on whichever direction fired.
//! The wait is a single-descriptor, single-shot poll; registration state is
//! not kept between ticks.

use polling::{Event, Events, Poller};
use std::io;
use std::os::fd::{AsFd, AsRawFd};
use std::time::Duration;

/// Poller key for the lone registered descriptor.
const SOCKET_KEY: usize = 0;

/// Readiness reported for a socket.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Readiness {
    /// The socket has bytes to read (or the peer hung up).
    pub readable: bool,
    /// The socket can accept writes.
    pub writable: bool,
}

impl Readiness {
    pub(crate) const fn any(self) -> bool {
        self.readable || self.writable
    }
}

/// Wait up to `timeout` for the requested readiness on `socket`.
///
/// Returns all-false readiness on timeout. At least one of `want_read` and
/// `want_write` must be set.
#[allow(unsafe_code)]
pub(crate) fn await_readiness<S: AsFd>(
    socket: &S,
    want_read: bool,
    want_write: bool,
    timeout: Duration,
) -> io::Result<Readiness> {
    debug_assert!(want_read || want_write, "waiting with no interest");

    let interest = match (want_read, want_write) {
        (true, true) => Event::all(SOCKET_KEY),
        (true, false) => Event::readable(SOCKET_KEY),
        (false, true) => Event::writable(SOCKET_KEY),
        (false, false) => Event::none(SOCKET_KEY),
    };

    let poller = Poller::new()?;
    // SAFETY: the descriptor is borrowed from `socket` for the duration of
    // this call and is removed from the poller before returning, so it
    // outlives its registration.
    unsafe {
        poller.add(socket.as_fd().as_raw_fd(), interest)?;
    }

    let mut events = Events::new();
    let wait_result = poller.wait(&mut events, Some(timeout));
    let _ = poller.delete(socket.as_fd());
    wait_result?;

    let mut readiness = Readiness::default();
    for event in events.iter() {
        if event.key == SOCKET_KEY {
            readiness.readable |= event.readable;
            readiness.writable |= event.writable;
        }
    }
    Ok(readiness)
}
