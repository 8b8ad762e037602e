pub mod channel;
pub mod message;

pub use channel::{peer_credentials, ConnectionHandle, DaemonChannel, DaemonServer, DaemonSink, PeerCredentials};
pub use message::{ClipboardType, DaemonMessage, MessageType, SelectionId};
