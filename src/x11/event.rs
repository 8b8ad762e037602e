//! Normalized X11 events fed to the `Coordinator` (spec.md §4.6's dispatch
//! table). Keeps the rest of the crate from depending on x11rb's verbose
//! per-extension event types directly.

use x11rb::protocol::xproto::{Atom, Window};

use crate::proto::SelectionId;

/// A `SelectionRequest` event, snapshotted so it can be queued
/// (spec.md §3's `OutboundRequest.x_event_snapshot`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionRequestSnapshot {
    pub requestor: Window,
    pub selection: SelectionId,
    pub target: Atom,
    /// The property the requestor asked us to write into, or `None` if it
    /// left the choice to us (pre-ICCCM-2 clients; we fall back to
    /// `target` as the property atom in that case).
    pub property: Option<Atom>,
    pub time: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum X11Event {
    /// XFixes reported a selection ownership change. `owner` is `None` if
    /// nobody owns it any more.
    SelectionOwnerChanged { selection: SelectionId, owner: Option<Window> },
    /// XFixes reported that the previous owner's window was destroyed or
    /// its client closed, treated identically to an ownership change to
    /// `None` (spec.md §4.6).
    SelectionOwnerGone { selection: SelectionId },
    /// `SelectionNotify(target=TARGETS)`.
    TargetsNotify { selection: SelectionId, requestor: Window, property: Option<Atom> },
    /// `SelectionNotify` for a target other than `TARGETS`.
    DataNotify { selection: SelectionId, requestor: Window, target: Atom, property: Option<Atom> },
    /// `PropertyNotify(state=NewValue)` on a property we're watching.
    PropertyNewValue { window: Window, atom: Atom },
    /// `PropertyNotify(state=Delete)` on a property we're watching.
    PropertyDeleted { window: Window, atom: Atom },
    /// A local application requested our selection data.
    SelectionRequest(SelectionRequestSnapshot),
    /// `SelectionClear`, no-op per spec.md §4.6 (XFixes delivers the
    /// authoritative transition), kept only so callers can log it.
    SelectionClear { selection: SelectionId },
    /// Anything the Coordinator doesn't act on.
    Unhandled,
}
