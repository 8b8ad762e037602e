//! Wire types for the local daemon protocol: selection ids, clipboard types,
//! and the message envelope that `DaemonChannel` frames on the wire.
//!
//! The header is `(type: u32, arg1: u32, arg2: u32, size: u32)`, little
//! endian, followed by `size` bytes of payload. See spec.md §6 and
//! `examples/original_source/src/udscs.h`.

use std::convert::TryFrom;

/// Fixed header size in bytes: four `u32` fields.
pub const HEADER_LEN: usize = 16;

/// Selection id as it appears on the wire. Only `Clipboard` and `Primary` are
/// accepted by this bridge; `Secondary` is recognized (so a caller can tell
/// it apart from a malformed value) but every operation on it is refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SelectionId {
    Clipboard = 0,
    Primary = 1,
    Secondary = 2,
}

impl SelectionId {
    pub fn supported(self) -> bool {
        matches!(self, SelectionId::Clipboard | SelectionId::Primary)
    }
}

impl TryFrom<u32> for SelectionId {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SelectionId::Clipboard),
            1 => Ok(SelectionId::Primary),
            2 => Ok(SelectionId::Secondary),
            _ => Err(()),
        }
    }
}

impl From<SelectionId> for u32 {
    fn from(value: SelectionId) -> u32 {
        value as u32
    }
}

/// The bridge's own payload-semantics enumeration, independent of any X11
/// atom. Wire values must remain stable (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipboardType {
    None = 0,
    Utf8Text = 1,
    ImagePng = 2,
    ImageBmp = 3,
    ImageTiff = 4,
    ImageJpg = 5,
}

impl ClipboardType {
    /// All non-`None` types, in the declared enumeration order used when
    /// intersecting a target catalog (spec.md §4.4 step 3, §4.5 step 3).
    pub const ALL: [ClipboardType; 5] = [
        ClipboardType::Utf8Text,
        ClipboardType::ImagePng,
        ClipboardType::ImageBmp,
        ClipboardType::ImageTiff,
        ClipboardType::ImageJpg,
    ];

    /// MIME/X11-target atom names equivalent to this type, in preference
    /// order (the first one found in a TARGETS list wins).
    pub const fn atom_names(self) -> &'static [&'static str] {
        match self {
            ClipboardType::None => &[],
            ClipboardType::Utf8Text => {
                &["UTF8_STRING", "text/plain;charset=UTF-8", "text/plain;charset=utf-8"]
            }
            ClipboardType::ImagePng => &["image/png"],
            ClipboardType::ImageBmp => &["image/bmp"],
            ClipboardType::ImageTiff => &["image/tiff"],
            ClipboardType::ImageJpg => &["image/jpeg"],
        }
    }
}

impl TryFrom<u32> for ClipboardType {
    type Error = ();

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ClipboardType::None),
            1 => Ok(ClipboardType::Utf8Text),
            2 => Ok(ClipboardType::ImagePng),
            3 => Ok(ClipboardType::ImageBmp),
            4 => Ok(ClipboardType::ImageTiff),
            5 => Ok(ClipboardType::ImageJpg),
            _ => Err(()),
        }
    }
}

impl From<ClipboardType> for u32 {
    fn from(value: ClipboardType) -> u32 {
        value as u32
    }
}

/// Message type codes relevant to this bridge. The daemon protocol has more
/// message types in the original (display config, file transfer, etc); this
/// bridge only needs the clipboard-related ones plus the resolution report
/// it forwards on the guest's behalf (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    GuestXorgResolution,
    ClipboardGrab,
    ClipboardRequest,
    ClipboardData,
    ClipboardRelease,
    /// A message type this bridge doesn't recognize; carried through so a
    /// framing error isn't raised just because the daemon speaks a superset
    /// protocol.
    Other(u32),
}

impl From<u32> for MessageType {
    fn from(value: u32) -> Self {
        match value {
            1 => MessageType::GuestXorgResolution,
            2 => MessageType::ClipboardGrab,
            3 => MessageType::ClipboardRequest,
            4 => MessageType::ClipboardData,
            5 => MessageType::ClipboardRelease,
            other => MessageType::Other(other),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(value: MessageType) -> u32 {
        match value {
            MessageType::GuestXorgResolution => 1,
            MessageType::ClipboardGrab => 2,
            MessageType::ClipboardRequest => 3,
            MessageType::ClipboardData => 4,
            MessageType::ClipboardRelease => 5,
            MessageType::Other(v) => v,
        }
    }
}

/// A single framed message, header fields plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonMessage {
    pub kind: MessageType,
    pub arg1: u32,
    pub arg2: u32,
    pub payload: Vec<u8>,
}

impl DaemonMessage {
    pub fn new(kind: MessageType, arg1: u32, arg2: u32, payload: Vec<u8>) -> Self {
        Self { kind, arg1, arg2, payload }
    }

    pub fn clipboard_grab(selection: SelectionId, types: &[ClipboardType]) -> Self {
        let mut payload = Vec::with_capacity(types.len() * 4);
        for t in types {
            payload.extend_from_slice(&u32::from(*t).to_le_bytes());
        }
        Self::new(MessageType::ClipboardGrab, selection.into(), 0, payload)
    }

    pub fn clipboard_request(selection: SelectionId, ty: ClipboardType) -> Self {
        Self::new(MessageType::ClipboardRequest, selection.into(), ty.into(), Vec::new())
    }

    pub fn clipboard_data(selection: SelectionId, ty: ClipboardType, bytes: Vec<u8>) -> Self {
        Self::new(MessageType::ClipboardData, selection.into(), ty.into(), bytes)
    }

    pub fn clipboard_release(selection: SelectionId) -> Self {
        Self::new(MessageType::ClipboardRelease, selection.into(), 0, Vec::new())
    }

    pub fn guest_xorg_resolution(width: u32, height: u32) -> Self {
        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&width.to_le_bytes());
        payload.extend_from_slice(&height.to_le_bytes());
        Self::new(MessageType::GuestXorgResolution, 0, 0, payload)
    }

    /// Parses the payload of a `CLIPBOARD_GRAB` message into the advertised
    /// type list. Unknown type values are dropped rather than erroring; a
    /// forward-compatible daemon may advertise types we don't recognize.
    pub fn parse_grab_types(&self) -> Vec<ClipboardType> {
        self.payload
            .chunks_exact(4)
            .filter_map(|chunk| {
                let raw = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                ClipboardType::try_from(raw).ok()
            })
            .collect()
    }

    /// Encodes the header + payload onto the wire, little-endian.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&u32::from(self.kind).to_le_bytes());
        buf.extend_from_slice(&self.arg1.to_le_bytes());
        buf.extend_from_slice(&self.arg2.to_le_bytes());
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }
}

/// The four header fields, decoded but not yet carrying a payload.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Header {
    pub kind: MessageType,
    pub arg1: u32,
    pub arg2: u32,
    pub size: u32,
}

impl Header {
    pub(crate) fn decode(bytes: &[u8; HEADER_LEN]) -> Self {
        let kind = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let arg1 = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let arg2 = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let size = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Self { kind: MessageType::from(kind), arg1, arg2, size }
    }
}
