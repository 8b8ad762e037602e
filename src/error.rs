use std::fmt;

/// Errors the bridge can report to its embedder.
///
/// Most protocol-level failures (a refused `SelectionRequest`, a missing
/// target, a daemon `NONE` reply) are *not* represented here, they are
/// terminal replies produced by the state machine, not `Err` values. This
/// type exists for the handful of things spec.md §7 calls fatal, plus
/// internal invariant violations worth surfacing rather than silently
/// ignoring.
#[non_exhaustive]
#[derive(Debug)]
pub enum BridgeError {
    /// Could not open a connection to the X server.
    DisplayUnavailable { description: String },
    /// Interning one or more required atoms failed.
    AtomInternFailed { description: String },
    /// The X server does not advertise the XFixes extension.
    XFixesUnavailable,
    /// A selection id other than `CLIPBOARD`/`PRIMARY` was used where only
    /// those two are accepted.
    UnsupportedSelection,
    /// Creating the hidden selection-proxy window failed.
    WindowCreationFailed { description: String },
    /// An X11 protocol call failed in a way that isn't a plain refusal.
    X11Protocol { description: String },
    /// The daemon channel's underlying stream returned an I/O error.
    ChannelIo { description: String },
    /// Catch-all for conditions that should be unreachable.
    Unknown { description: String },
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::DisplayUnavailable { description } => {
                write!(f, "could not open the X display: {description}")
            }
            BridgeError::AtomInternFailed { description } => {
                write!(f, "failed to intern atoms: {description}")
            }
            BridgeError::XFixesUnavailable => {
                write!(f, "the X server does not support the XFixes extension")
            }
            BridgeError::UnsupportedSelection => {
                write!(f, "only CLIPBOARD and PRIMARY selections are supported")
            }
            BridgeError::WindowCreationFailed { description } => {
                write!(f, "failed to create the selection proxy window: {description}")
            }
            BridgeError::X11Protocol { description } => {
                write!(f, "X11 protocol error: {description}")
            }
            BridgeError::ChannelIo { description } => {
                write!(f, "daemon channel I/O error: {description}")
            }
            BridgeError::Unknown { description } => write!(f, "{description}"),
        }
    }
}

impl std::error::Error for BridgeError {}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

pub(crate) fn into_unknown<E: fmt::Display>(error: E) -> BridgeError {
    BridgeError::Unknown { description: error.to_string() }
}

pub(crate) fn into_protocol<E: fmt::Display>(error: E) -> BridgeError {
    BridgeError::X11Protocol { description: error.to_string() }
}
