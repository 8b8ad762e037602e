//! The client→guest path: serves `SelectionRequest` events from local X11
//! applications with data fetched from the daemon (spec.md §4.5).

use std::collections::VecDeque;

use log::trace;
use x11rb::protocol::xproto::{Atom, Window};

use crate::atoms::TypedAtom;
use crate::error::{BridgeError, Result};
use crate::proto::{ClipboardType, DaemonMessage, DaemonSink, SelectionId};
use crate::selection::{CleanupAction, Owner, SelectionState};
use crate::x11::{SelectionRequestSnapshot, X11Display};

#[derive(Debug)]
enum ActiveServe {
    /// Sent `CLIPBOARD_REQUEST` to the daemon, waiting for `CLIPBOARD_DATA`
    /// before replying to `snapshot`.
    AwaitingData { snapshot: SelectionRequestSnapshot, ty: ClipboardType },
    /// Streaming a reply in `INCR` chunks, one per `PropertyNotify(PropertyDelete)`.
    IncrSend { buffer: Vec<u8>, cursor: usize, requestor: Window, property: Atom, target_atom: Atom },
}

#[derive(Debug, Default)]
struct PerSelection {
    queue: VecDeque<SelectionRequestSnapshot>,
    active: Option<ActiveServe>,
}

/// Serves local X11 applications on behalf of the daemon, one request at a
/// time per selection, queueing the rest.
#[derive(Debug, Default)]
pub struct OutboundServer {
    clipboard: PerSelection,
    primary: PerSelection,
}

impl OutboundServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn per_selection(&mut self, selection: SelectionId) -> &mut PerSelection {
        match selection {
            SelectionId::Clipboard => &mut self.clipboard,
            SelectionId::Primary => &mut self.primary,
            SelectionId::Secondary => {
                unreachable!("SECONDARY must be rejected before reaching OutboundServer")
            }
        }
    }

    /// `CLIPBOARD_GRAB(selection, [types])` from the daemon (spec.md §4.5a).
    /// Returns the cleanup actions the `Coordinator` must run against
    /// whichever component previously owned the selection.
    pub fn handle_clipboard_grab(
        &mut self,
        display: &mut dyn X11Display,
        state: &mut SelectionState,
        selection: SelectionId,
        types: Vec<ClipboardType>,
    ) -> Result<Vec<CleanupAction>> {
        let mut negotiated = Vec::with_capacity(types.len());
        for ty in types {
            if let Some(atom) = display.atoms().atoms_for_type(ty).into_iter().next() {
                negotiated.push(TypedAtom { ty, atom });
            }
        }
        state.record_types(selection, negotiated);

        let selection_atom = display.atoms().atom_for_selection(selection).ok_or(BridgeError::UnsupportedSelection)?;
        let window = display.selection_window();
        display.set_selection_owner(selection_atom, Some(window))?;
        Ok(state.set_owner(selection, Owner::Client))
    }

    /// `CLIPBOARD_RELEASE(selection)` from the daemon (spec.md §4.5a).
    pub fn handle_clipboard_release(
        &mut self,
        display: &mut dyn X11Display,
        state: &mut SelectionState,
        selection: SelectionId,
    ) -> Result<Vec<CleanupAction>> {
        let selection_atom = display.atoms().atom_for_selection(selection).ok_or(BridgeError::UnsupportedSelection)?;
        display.set_selection_owner(selection_atom, None)?;
        Ok(state.set_owner(selection, Owner::None))
    }

    /// An X11 `SelectionRequest` event (spec.md §4.5b/c).
    pub fn handle_selection_request(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        snapshot: SelectionRequestSnapshot,
    ) -> Result<()> {
        let selection = snapshot.selection;
        self.per_selection(selection).queue.push_back(snapshot);
        self.process_head(display, daemon, state, selection)
    }

    /// `CLIPBOARD_DATA(selection, type, bytes)` from the daemon, the reply
    /// to a pending `AwaitingData` request (spec.md §4.5 "Receiving data").
    pub fn handle_clipboard_data(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
        ty: ClipboardType,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let matches_active =
            matches!(&self.per_selection(selection).active, Some(ActiveServe::AwaitingData { ty: t, .. }) if *t == ty);

        if !matches_active {
            let was_awaiting = matches!(self.per_selection(selection).active, Some(ActiveServe::AwaitingData { .. }));
            if was_awaiting {
                if let Some(ActiveServe::AwaitingData { snapshot, .. }) = self.per_selection(selection).active.take() {
                    self.send_notify(display, snapshot, None)?;
                }
                return self.process_head(display, daemon, state, selection);
            }
            trace!("outbound: discarding unmatched CLIPBOARD_DATA for {selection:?}");
            return Ok(());
        }

        let Some(ActiveServe::AwaitingData { snapshot, .. }) = self.per_selection(selection).active.take() else {
            unreachable!("matches_active implies an AwaitingData entry")
        };

        let max_prop_size = display.max_prop_size();
        let property = snapshot.property.unwrap_or(snapshot.target);

        if bytes.len() <= max_prop_size {
            display.change_property8(snapshot.requestor, property, snapshot.target, &bytes)?;
            self.send_notify(display, snapshot, Some(property))?;
            self.process_head(display, daemon, state, selection)
        } else {
            let requestor = snapshot.requestor;
            let target_atom = snapshot.target;
            display.watch_property_changes(requestor)?;
            let incr_atom = display.atoms().control().INCR;
            display.change_property32(requestor, property, incr_atom, &[bytes.len() as u32])?;
            self.send_notify(display, snapshot, Some(property))?;
            self.per_selection(selection).active =
                Some(ActiveServe::IncrSend { buffer: bytes, cursor: 0, requestor, property, target_atom });
            Ok(())
        }
    }

    /// `PropertyNotify(PropertyDelete)` on `window` while INCR-send is active
    /// for `selection` (spec.md §4.5's INCR-send tick). A no-op if
    /// `selection`'s active serve isn't an INCR-send to `window`, the
    /// caller doesn't know in advance which selection a bare window/atom
    /// pair belongs to, so it tries every selection.
    pub fn handle_property_delete(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
        window: Window,
    ) -> Result<()> {
        let (requestor, property, target_atom, chunk, done) = {
            let per = self.per_selection(selection);
            let Some(ActiveServe::IncrSend { buffer, cursor, requestor, property, target_atom }) = &mut per.active
            else {
                return Ok(());
            };
            if *requestor != window {
                return Ok(());
            }
            let max_prop_size = display.max_prop_size();
            let remaining = buffer.len() - *cursor;
            let take = remaining.min(max_prop_size);
            let chunk = buffer[*cursor..*cursor + take].to_vec();
            *cursor += take;
            (*requestor, *property, *target_atom, chunk, take == 0)
        };

        display.change_property8(requestor, property, target_atom, &chunk)?;

        if done {
            self.per_selection(selection).active = None;
            self.process_head(display, daemon, state, selection)
        } else {
            Ok(())
        }
    }

    /// Refuses every queued request and the active one (if it hadn't
    /// replied yet) for `selection`, and frees any in-flight INCR buffer
    /// (spec.md §3: owner leaving `Client`).
    pub fn refuse_all(&mut self, display: &mut dyn X11Display, selection: SelectionId) -> Result<()> {
        let per = self.per_selection(selection);
        let mut to_refuse: Vec<SelectionRequestSnapshot> = per.queue.drain(..).collect();
        if let Some(ActiveServe::AwaitingData { snapshot, .. }) = per.active.take() {
            to_refuse.insert(0, snapshot);
        }
        // An active IncrSend buffer is simply dropped; it already sent its
        // one SelectionNotify, so no further reply is owed.
        for snapshot in to_refuse {
            self.send_notify(display, snapshot, None)?;
        }
        Ok(())
    }

    fn process_head(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
    ) -> Result<()> {
        loop {
            if self.per_selection(selection).active.is_some() {
                return Ok(());
            }
            let Some(snapshot) = self.per_selection(selection).queue.pop_front() else {
                return Ok(());
            };

            if state.record(selection).owner() != Owner::Client {
                self.send_notify(display, snapshot, None)?;
                continue;
            }

            let multiple_atom = display.atoms().control().MULTIPLE;
            if snapshot.target == multiple_atom {
                self.send_notify(display, snapshot, None)?;
                continue;
            }

            let targets_atom = display.atoms().control().TARGETS;
            if snapshot.target == targets_atom {
                self.serve_targets(display, state, selection, snapshot)?;
                continue;
            }

            let classified = display.atoms().classify_target(snapshot.target);
            let matched = classified.filter(|ty| state.record(selection).type_is_advertised(*ty));
            match matched {
                Some(ty) => {
                    daemon.enqueue(DaemonMessage::clipboard_request(selection, ty));
                    self.per_selection(selection).active = Some(ActiveServe::AwaitingData { snapshot, ty });
                    return Ok(());
                }
                None => {
                    self.send_notify(display, snapshot, None)?;
                }
            }
        }
    }

    /// `TARGETS` request: synthesize the list and write it as a 32-bit
    /// `ATOM` property (spec.md §4.5 step 3).
    fn serve_targets(
        &mut self,
        display: &mut dyn X11Display,
        state: &SelectionState,
        selection: SelectionId,
        snapshot: SelectionRequestSnapshot,
    ) -> Result<()> {
        let targets_atom = display.atoms().control().TARGETS;
        let atom_type = display.atoms().control().ATOM;
        let mut list = vec![targets_atom];
        for entry in state.record(selection).advertised_types() {
            list.extend(display.atoms().atoms_for_type(entry.ty));
        }

        let property = snapshot.property.unwrap_or(snapshot.target);
        display.change_property32(snapshot.requestor, property, atom_type, &list)?;
        self.send_notify(display, snapshot, Some(property))
    }

    fn send_notify(
        &self,
        display: &mut dyn X11Display,
        snapshot: SelectionRequestSnapshot,
        property: Option<Atom>,
    ) -> Result<()> {
        let selection_atom =
            display.atoms().atom_for_selection(snapshot.selection).ok_or(BridgeError::UnsupportedSelection)?;
        display.send_selection_notify(snapshot.requestor, selection_atom, snapshot.target, property, snapshot.time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Full coverage against a fake X11Display (targets synthesis, INCR
    // send, ownership-change refusal) lives in `tests/outbound_server.rs`.

    #[test]
    fn new_server_has_no_queued_work() {
        let mut server = OutboundServer::new();
        assert!(server.per_selection(SelectionId::Clipboard).queue.is_empty());
        assert!(server.per_selection(SelectionId::Primary).active.is_none());
    }
}
