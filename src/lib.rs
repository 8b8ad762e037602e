//! In-guest bridge between a host clipboard daemon and the X11 selection
//! service: a single-threaded, event-driven implementation of the X11
//! selection-exchange protocol (`TARGETS` negotiation, `INCR` chunked
//! transfer in both directions, XFixes ownership tracking) coordinated with
//! an out-of-process daemon speaking a small framed message protocol over a
//! local socket.
//!
//! The crate is organized around two boundary interfaces: [`x11::X11Display`]
//! (XLib-equivalent calls and an event pump) and [`proto::DaemonChannel`]
//! (the framed duplex message channel). Everything else, [`selection`]'s
//! ownership bookkeeping, [`inbound`]'s guest→client fetches,
//! [`outbound`]'s client→guest serving, and [`coordinator`]'s event pump,
//! is pure logic driven through those two interfaces, which is what makes
//! it unit-testable without a real X server or socket.

pub mod atoms;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod proto;
pub mod selection;
pub mod x11;

use std::os::unix::net::UnixStream;

use error::{BridgeError, Result};

pub use config::BridgeConfig;
pub use coordinator::Coordinator;
pub use error::BridgeError as Error;

/// Connects a [`Coordinator`] to a real X server and a real daemon socket.
///
/// This is the only place in the crate that touches an actual connection;
/// everything it builds on top (`Coordinator` and below) is reachable
/// through trait objects and is exercised in tests against fakes instead.
pub struct Bridge {
    coordinator: Coordinator<UnixStream>,
}

impl Bridge {
    /// Opens the X display and connects to the daemon at
    /// `config.socket_path`, failing per spec.md §7's bootstrap-errors-are-
    /// fatal rule if either cannot be established.
    pub fn connect(config: &BridgeConfig) -> Result<Self> {
        let display = x11::X11rbDisplay::open()?;
        let stream = UnixStream::connect(&config.socket_path).map_err(|e| BridgeError::ChannelIo {
            description: format!("connecting to {}: {e}", config.socket_path.display()),
        })?;
        stream.set_nonblocking(true).map_err(|e| BridgeError::ChannelIo { description: e.to_string() })?;

        let coordinator = Coordinator::new(Box::new(display), stream, config)?;
        Ok(Self { coordinator })
    }

    /// Runs the event loop until a fatal error occurs. Never returns `Ok`.
    pub fn run(&mut self) -> Result<()> {
        self.coordinator.run()
    }

    /// Runs a single iteration of the event loop. Exposed for embedders
    /// that want to interleave the bridge with their own loop rather than
    /// hand it a dedicated thread.
    pub fn tick(&mut self) -> Result<()> {
        self.coordinator.tick()
    }
}
