//! Framed, non-blocking duplex channel to the daemon (spec.md §4.1).
//!
//! Mirrors `examples/original_source/src/udscs.h`'s `udscs_connection`: a
//! send queue that resumes partial writes, and an inbound assembler that
//! only surfaces a message once its full header+payload have arrived. The
//! original exposes this through C callbacks invoked from `udscs_client_handle_fds`;
//! this crate instead has the caller drain completed messages after each
//! readiness notification, which composes more naturally with Rust ownership
//! and is exactly as observable to the Coordinator (messages surface in
//! `send`-call order, one `disconnect` transition, no silent drops).

use std::collections::{HashMap, VecDeque};
use std::io::{self, ErrorKind, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};

use log::{trace, warn};

use super::message::{DaemonMessage, Header, HEADER_LEN};

#[derive(Debug)]
enum ReadState {
    Header { buf: Vec<u8> },
    Payload { header: Header, buf: Vec<u8> },
}

impl Default for ReadState {
    fn default() -> Self {
        ReadState::Header { buf: Vec::with_capacity(HEADER_LEN) }
    }
}

/// A framed duplex channel to a single daemon peer.
///
/// Once `disconnected()` becomes true (a write or read failed), every
/// subsequent `send`/`service_readable`/`service_writable` call is a no-op;
/// `take_disconnect_event` reports the transition exactly once.
pub struct DaemonChannel<T> {
    stream: T,
    read_state: ReadState,
    write_queue: VecDeque<Vec<u8>>,
    write_offset: usize,
    completed: VecDeque<DaemonMessage>,
    disconnected: bool,
    disconnect_reported: bool,
}

impl<T: Read + Write> DaemonChannel<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            read_state: ReadState::default(),
            write_queue: VecDeque::new(),
            write_offset: 0,
            completed: VecDeque::new(),
            disconnected: false,
            disconnect_reported: false,
        }
    }

    pub fn disconnected(&self) -> bool {
        self.disconnected
    }

    /// Enqueues a message for delivery. Messages are written in the order
    /// `send` was called. A no-op once disconnected.
    pub fn send(&mut self, message: DaemonMessage) {
        if self.disconnected {
            return;
        }
        self.write_queue.push_back(message.encode());
    }

    /// Returns true if there is queued (or partially-written) outbound data.
    pub fn wants_write(&self) -> bool {
        !self.disconnected && !self.write_queue.is_empty()
    }

    /// Drains every fully-assembled inbound message produced so far.
    pub fn take_messages(&mut self) -> Vec<DaemonMessage> {
        self.completed.drain(..).collect()
    }

    /// Returns `true` exactly once, the first time this channel observes a
    /// disconnect; `false` on every subsequent call.
    pub fn take_disconnect_event(&mut self) -> bool {
        if self.disconnected && !self.disconnect_reported {
            self.disconnect_reported = true;
            true
        } else {
            false
        }
    }

    /// Call when the underlying fd is readable. Reads whatever is
    /// available (non-blocking) and advances the header/payload assembler.
    pub fn service_readable(&mut self) {
        if self.disconnected {
            return;
        }
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    trace!("daemon channel: peer closed the connection");
                    self.disconnected = true;
                    return;
                }
                Ok(n) => self.feed(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("daemon channel: read error: {e}");
                    self.disconnected = true;
                    return;
                }
            }
        }
    }

    /// Call when the underlying fd is writable. Resumes any partial write.
    pub fn service_writable(&mut self) {
        if self.disconnected {
            return;
        }
        while let Some(buf) = self.write_queue.front() {
            match self.stream.write(&buf[self.write_offset..]) {
                Ok(0) => {
                    warn!("daemon channel: write returned 0, treating as disconnect");
                    self.disconnected = true;
                    return;
                }
                Ok(n) => {
                    self.write_offset += n;
                    if self.write_offset >= buf.len() {
                        self.write_queue.pop_front();
                        self.write_offset = 0;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("daemon channel: write error: {e}");
                    self.disconnected = true;
                    return;
                }
            }
        }
    }

    fn feed(&mut self, mut data: &[u8]) {
        while !data.is_empty() {
            match &mut self.read_state {
                ReadState::Header { buf } => {
                    let need = HEADER_LEN - buf.len();
                    let take = need.min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if buf.len() == HEADER_LEN {
                        let header = Header::decode(buf.as_slice().try_into().unwrap());
                        let size = header.size as usize;
                        self.read_state = ReadState::Payload { header, buf: Vec::with_capacity(size) };
                    }
                }
                ReadState::Payload { header, buf } => {
                    let need = header.size as usize - buf.len();
                    let take = need.min(data.len());
                    buf.extend_from_slice(&data[..take]);
                    data = &data[take..];
                    if buf.len() == header.size as usize {
                        let header = *header;
                        let payload = std::mem::take(buf);
                        self.completed.push_back(DaemonMessage::new(
                            header.kind,
                            header.arg1,
                            header.arg2,
                            payload,
                        ));
                        self.read_state = ReadState::default();
                    }
                }
            }
        }
    }
}

impl<T: AsRawFd> AsRawFd for DaemonChannel<T> {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

/// Send-only view of a daemon channel. `InboundFetcher` and `OutboundServer`
/// take `&mut dyn DaemonSink` rather than a concrete `DaemonChannel<T>` so
/// they can be unit-tested without a real stream type, mirroring the way
/// `X11Display` decouples them from a real X connection.
pub trait DaemonSink {
    fn enqueue(&mut self, message: DaemonMessage);
}

impl<T: Read + Write> DaemonSink for DaemonChannel<T> {
    fn enqueue(&mut self, message: DaemonMessage) {
        self.send(message);
    }
}

/// Opaque handle identifying one connection to a [`DaemonServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle(u64);

/// Credentials of a connected peer, read once via `SO_PEERCRED` at accept
/// time (mirrors `udscs_get_peer_cred`). The bridge core never consults
/// these itself (spec.md Non-goals); they are exposed for the embedding
/// daemon to use for access control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

#[cfg(target_os = "linux")]
pub fn peer_credentials(fd: RawFd) -> io::Result<PeerCredentials> {
    use std::mem;

    let mut ucred: libc::ucred = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::ucred>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut ucred as *mut libc::ucred as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(PeerCredentials { pid: ucred.pid, uid: ucred.uid, gid: ucred.gid })
}

/// Server-side sibling of [`DaemonChannel`]: owns a table of connections
/// keyed by an opaque handle with attached user data, and can fan a message
/// out to every connection (spec.md §4.1).
pub struct DaemonServer<T, U> {
    next_handle: u64,
    connections: HashMap<ConnectionHandle, (DaemonChannel<T>, PeerCredentials, U)>,
}

impl<T: Read + Write, U> DaemonServer<T, U> {
    pub fn new() -> Self {
        Self { next_handle: 0, connections: HashMap::new() }
    }

    /// Registers a newly-accepted connection, returning its handle.
    pub fn insert(&mut self, stream: T, credentials: PeerCredentials, user_data: U) -> ConnectionHandle {
        let handle = ConnectionHandle(self.next_handle);
        self.next_handle += 1;
        self.connections.insert(handle, (DaemonChannel::new(stream), credentials, user_data));
        handle
    }

    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<U> {
        self.connections.remove(&handle).map(|(_, _, user_data)| user_data)
    }

    pub fn channel_mut(&mut self, handle: ConnectionHandle) -> Option<&mut DaemonChannel<T>> {
        self.connections.get_mut(&handle).map(|(channel, _, _)| channel)
    }

    pub fn user_data_mut(&mut self, handle: ConnectionHandle) -> Option<&mut U> {
        self.connections.get_mut(&handle).map(|(_, _, user_data)| user_data)
    }

    pub fn peer_credentials(&self, handle: ConnectionHandle) -> Option<PeerCredentials> {
        self.connections.get(&handle).map(|(_, creds, _)| *creds)
    }

    pub fn handles(&self) -> impl Iterator<Item = ConnectionHandle> + '_ {
        self.connections.keys().copied()
    }

    /// Queues `message` for delivery to every connected peer. Connections
    /// are serviced independently, so one slow peer does not block delivery
    /// to the others (each still needs its own readiness notification to
    /// actually flush).
    pub fn write_all(&mut self, message: &DaemonMessage) {
        for (channel, _, _) in self.connections.values_mut() {
            channel.send(message.clone());
        }
    }
}

impl<T: Read + Write, U> Default for DaemonServer<T, U> {
    fn default() -> Self {
        Self::new()
    }
}
