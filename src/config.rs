//! Bridge-wide configuration knobs. No CLI parsing happens here, the
//! embedding binary builds a `BridgeConfig` however it likes (env vars, a
//! flags crate, a config file) and hands it to [`crate::Bridge::connect`].

use std::path::PathBuf;
use std::time::Duration;

/// Default local socket path used by the reference daemon this bridge talks
/// to. Purely a convenience default; the embedder is free to override it.
pub const DEFAULT_SOCKET_PATH: &str = "/run/x11-selection-bridge.sock";

/// Default wait passed to the Coordinator's outer multiplex call. Short
/// enough that a caller polling for shutdown notices it promptly, long
/// enough not to spin.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Path to the `AF_UNIX` socket the daemon listens on.
    pub socket_path: PathBuf,
    /// Threaded through only as a boolean (spec.md §6's "CLI/config"); the
    /// bridge itself always logs at `trace` level for per-request state
    /// transitions, and it is the embedder's installed logger that decides
    /// what's visible.
    pub verbose: bool,
    /// Timeout passed to the Coordinator's `mio::Poll::poll` call.
    pub poll_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            verbose: false,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}
