//! Per-selection ownership and advertised-type bookkeeping (spec.md §3, §4.3).

use x11rb::protocol::xproto::Atom;

use crate::atoms::TypedAtom;
use crate::proto::{ClipboardType, SelectionId};

/// Cap on `advertised_types` and on the number of atoms tracked per
/// selection, matching the original's fixed-size bookkeeping arrays
/// (`clipboard_x11_targets[256][256]`).
pub const MAX_ADVERTISED_TYPES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    None,
    /// A local X11 application owns the selection.
    Guest,
    /// The daemon owns the selection on behalf of the remote peer.
    Client,
}

/// Cleanup work the `Coordinator` must perform after an ownership
/// transition (spec.md §3 invariants, §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Fail every queued `InboundRequest` for this selection with a `NONE`
    /// reply and clear `InboundFetcher` state.
    CancelInboundRequests,
    /// Refuse every queued `OutboundRequest` for this selection with
    /// `property = None` and free any in-flight INCR buffer.
    RefuseOutboundRequests,
    /// Send `CLIPBOARD_RELEASE` to the daemon (only on `Guest -> None`).
    SendClipboardRelease,
}

#[derive(Debug, Default)]
pub struct SelectionRecord {
    owner: Owner,
    advertised_types: Vec<TypedAtom>,
    pending_targets_notifies: u32,
}

impl Default for Owner {
    fn default() -> Self {
        Owner::None
    }
}

impl SelectionRecord {
    pub fn owner(&self) -> Owner {
        self.owner
    }

    pub fn advertised_types(&self) -> &[TypedAtom] {
        &self.advertised_types
    }

    pub fn type_is_advertised(&self, ty: ClipboardType) -> bool {
        self.advertised_types.iter().any(|entry| entry.ty == ty)
    }

    pub fn atom_for_type(&self, ty: ClipboardType) -> Option<Atom> {
        self.advertised_types.iter().find(|entry| entry.ty == ty).map(|entry| entry.atom)
    }

    pub fn pending_targets_notifies(&self) -> u32 {
        self.pending_targets_notifies
    }
}

/// Owns the two [`SelectionRecord`]s this bridge tracks (CLIPBOARD and
/// PRIMARY, SECONDARY is not supported, spec.md §9).
#[derive(Debug, Default)]
pub struct SelectionState {
    clipboard: SelectionRecord,
    primary: SelectionRecord,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, selection: SelectionId) -> &SelectionRecord {
        match selection {
            SelectionId::Clipboard => &self.clipboard,
            SelectionId::Primary => &self.primary,
            SelectionId::Secondary => {
                unreachable!("SECONDARY must be rejected before reaching SelectionState")
            }
        }
    }

    fn record_mut(&mut self, selection: SelectionId) -> &mut SelectionRecord {
        match selection {
            SelectionId::Clipboard => &mut self.clipboard,
            SelectionId::Primary => &mut self.primary,
            SelectionId::Secondary => {
                unreachable!("SECONDARY must be rejected before reaching SelectionState")
            }
        }
    }

    /// Transitions `selection`'s owner, returning the cleanup actions the
    /// `Coordinator` must carry out. Enforces spec.md §3's ownership-change
    /// invariants: a transition away from `Guest` cancels inbound requests,
    /// a transition away from `Client` refuses outbound requests, and only
    /// `Guest -> None` sends a release to the daemon.
    pub fn set_owner(&mut self, selection: SelectionId, new_owner: Owner) -> Vec<CleanupAction> {
        let record = self.record_mut(selection);
        let previous = record.owner;
        let mut actions = Vec::new();

        if previous == Owner::Guest && new_owner != Owner::Guest {
            actions.push(CleanupAction::CancelInboundRequests);
            if new_owner == Owner::None {
                actions.push(CleanupAction::SendClipboardRelease);
            }
        }
        if previous == Owner::Client && new_owner != Owner::Client {
            actions.push(CleanupAction::RefuseOutboundRequests);
        }

        record.owner = new_owner;
        if new_owner != previous {
            record.advertised_types.clear();
        }
        actions
    }

    /// Records a freshly-negotiated target catalog, capped at
    /// [`MAX_ADVERTISED_TYPES`].
    pub fn record_types(&mut self, selection: SelectionId, types: Vec<TypedAtom>) {
        let record = self.record_mut(selection);
        record.advertised_types = types;
        record.advertised_types.truncate(MAX_ADVERTISED_TYPES);
    }

    /// Call when a `TARGETS` conversion is issued; increments the
    /// outstanding-notify counter so stale replies can be detected.
    pub fn expect_targets_notify(&mut self, selection: SelectionId) {
        self.record_mut(selection).pending_targets_notifies += 1;
    }

    /// Call on receiving a `SelectionNotify(target=TARGETS)`. Returns
    /// `true` if this is the last outstanding reply (the one worth
    /// honoring); `false` if a newer request has since been issued and
    /// this reply is stale.
    pub fn consume_targets_notify(&mut self, selection: SelectionId) -> bool {
        let record = self.record_mut(selection);
        if record.pending_targets_notifies == 0 {
            return false;
        }
        record.pending_targets_notifies -= 1;
        record.pending_targets_notifies == 0
    }
}
