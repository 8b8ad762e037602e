//! The guest→client path: fetches data from whatever local X11 application
//! owns a selection and posts it to the daemon (spec.md §4.4).

use std::collections::VecDeque;

use log::{trace, warn};
use x11rb::protocol::xproto::Atom;

use crate::error::{BridgeError, Result};
use crate::proto::{ClipboardType, DaemonMessage, DaemonSink, SelectionId};
use crate::selection::{Owner, SelectionState};
use crate::x11::X11Display;

/// Matches the teacher's own `u32::MAX / 4` long-length idiom: ask the X
/// server for the whole property in one call rather than pre-sizing the
/// request from the reported length.
const FETCH_ALL: u32 = u32::MAX / 4;

/// Past this size, the assembled INCR buffer is dropped immediately after
/// being handed to the daemon rather than reused for the next request
/// (spec.md §4.4 step 4).
const INBOUND_BUFFER_RELEASE_THRESHOLD: usize = 512 * 1024;

#[derive(Debug)]
enum Active {
    AwaitingSelectionNotify { ty: ClipboardType },
    AwaitingIncrChunks { ty: ClipboardType, buf: Vec<u8> },
}

#[derive(Debug, Default)]
struct PerSelection {
    queue: VecDeque<ClipboardType>,
    active: Option<Active>,
}

/// Drives `XConvertSelection`/`SelectionNotify`/`PropertyNotify` on behalf of
/// the daemon, one request at a time per selection, queueing the rest.
#[derive(Debug, Default)]
pub struct InboundFetcher {
    clipboard: PerSelection,
    primary: PerSelection,
}

impl InboundFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn per_selection(&mut self, selection: SelectionId) -> &mut PerSelection {
        match selection {
            SelectionId::Clipboard => &mut self.clipboard,
            SelectionId::Primary => &mut self.primary,
            SelectionId::Secondary => {
                unreachable!("SECONDARY must be rejected before reaching InboundFetcher")
            }
        }
    }

    /// Kicks off a `TARGETS` conversion when a fresh, non-self owner takes a
    /// selection (spec.md §4.4 trigger (a)). The caller owns
    /// `SelectionState::expect_targets_notify`.
    pub fn request_targets(&self, display: &mut dyn X11Display, selection: SelectionId) -> Result<()> {
        let atoms = display.atoms();
        let selection_atom = atoms.atom_for_selection(selection).ok_or(BridgeError::UnsupportedSelection)?;
        let targets_atom = atoms.control().TARGETS;
        display.convert_selection(selection_atom, targets_atom, targets_atom)?;
        trace!("inbound: requested TARGETS for {selection:?}");
        Ok(())
    }

    /// `SelectionNotify` whose target was `TARGETS` (spec.md §4.4 targets phase).
    pub fn handle_targets_notify(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &mut SelectionState,
        selection: SelectionId,
        property: Option<Atom>,
    ) -> Result<()> {
        if !state.consume_targets_notify(selection) {
            trace!("inbound: dropping stale TARGETS reply for {selection:?}");
            return Ok(());
        }

        let Some(property) = property else {
            trace!("inbound: TARGETS request for {selection:?} was refused");
            return Ok(());
        };

        let window = display.selection_window();
        let raw = display.get_property(true, window, property, FETCH_ALL)?;
        if raw.format != 32 {
            warn!("inbound: TARGETS property for {selection:?} had format {}, ignoring", raw.format);
            return Ok(());
        }
        let advertised: Vec<Atom> =
            raw.value.chunks_exact(4).map(|c| Atom::from_le_bytes([c[0], c[1], c[2], c[3]])).collect();

        let atoms = display.atoms();
        let mut negotiated = Vec::new();
        for ty in ClipboardType::ALL {
            if let Some(atom) = atoms.atoms_for_type(ty).into_iter().find(|a| advertised.contains(a)) {
                negotiated.push(crate::atoms::TypedAtom { ty, atom });
            }
        }

        if negotiated.is_empty() {
            trace!("inbound: {selection:?} owner advertised no recognized targets");
            return Ok(());
        }

        let types: Vec<ClipboardType> = negotiated.iter().map(|entry| entry.ty).collect();
        state.record_types(selection, negotiated);
        let cleanup = state.set_owner(selection, Owner::Guest);
        debug_assert!(cleanup.is_empty(), "None -> Guest should never require cleanup");
        daemon.enqueue(DaemonMessage::clipboard_grab(selection, &types));
        Ok(())
    }

    /// `CLIPBOARD_REQUEST(selection, type)` from the daemon (spec.md §4.4 data
    /// phase, step 1-2).
    pub fn handle_clipboard_request(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
        ty: ClipboardType,
    ) -> Result<()> {
        let record = state.record(selection);
        if record.owner() != Owner::Guest || !record.type_is_advertised(ty) {
            daemon.enqueue(DaemonMessage::clipboard_data(selection, ClipboardType::None, Vec::new()));
            return Ok(());
        }

        let per = self.per_selection(selection);
        let was_idle = per.queue.is_empty() && per.active.is_none();
        per.queue.push_back(ty);
        if was_idle {
            self.start_next(display, state, selection)?;
        }
        Ok(())
    }

    /// `SelectionNotify` for a target other than `TARGETS` (spec.md §4.4 data
    /// phase, steps 3 and 5).
    pub fn handle_selection_notify(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
        property: Option<Atom>,
    ) -> Result<()> {
        let Some(Active::AwaitingSelectionNotify { ty }) = self.per_selection(selection).active else {
            trace!("inbound: SelectionNotify for {selection:?} with no active request, ignoring");
            return Ok(());
        };

        let Some(property) = property else {
            self.fail_active(daemon, selection);
            return self.start_next(display, state, selection);
        };

        let window = display.selection_window();
        let raw = display.get_property(false, window, property, FETCH_ALL)?;
        let incr_atom = display.atoms().control().INCR;

        if raw.type_atom == incr_atom {
            if raw.format != 32 || raw.value.len() < 4 {
                warn!("inbound: malformed INCR sentinel for {selection:?}");
                self.fail_active(daemon, selection);
                return self.start_next(display, state, selection);
            }
            let lower_bound = u32::from_le_bytes(raw.value[..4].try_into().unwrap()) as usize;
            display.watch_property_changes(window)?;
            display.delete_property(window, property)?;
            self.per_selection(selection).active =
                Some(Active::AwaitingIncrChunks { ty, buf: Vec::with_capacity(lower_bound.min(INBOUND_BUFFER_RELEASE_THRESHOLD)) });
            return Ok(());
        }

        display.delete_property(window, property)?;
        daemon.enqueue(DaemonMessage::clipboard_data(selection, ty, raw.value));
        self.per_selection(selection).active = None;
        self.start_next(display, state, selection)
    }

    /// `PropertyNotify(NewValue)` while INCR-receive is active (spec.md §4.4
    /// data phase, step 4).
    pub fn handle_property_new_value(
        &mut self,
        display: &mut dyn X11Display,
        daemon: &mut dyn DaemonSink,
        state: &SelectionState,
        selection: SelectionId,
    ) -> Result<()> {
        if !matches!(self.per_selection(selection).active, Some(Active::AwaitingIncrChunks { .. })) {
            return Ok(());
        }

        let window = display.selection_window();
        let property = display.atoms().atom_for_selection(selection).ok_or(BridgeError::UnsupportedSelection)?;
        let raw = display.get_property(true, window, property, FETCH_ALL)?;

        let Some(Active::AwaitingIncrChunks { ty, buf }) = &mut self.per_selection(selection).active else {
            return Ok(());
        };

        if raw.value.is_empty() {
            let ty = *ty;
            let bytes = std::mem::take(buf);
            if bytes.len() > INBOUND_BUFFER_RELEASE_THRESHOLD {
                trace!("inbound: releasing oversized INCR buffer for {selection:?} ({} bytes)", bytes.len());
            }
            daemon.enqueue(DaemonMessage::clipboard_data(selection, ty, bytes));
            self.per_selection(selection).active = None;
            self.start_next(display, state, selection)
        } else {
            buf.extend_from_slice(&raw.value);
            Ok(())
        }
    }

    /// Cancels every queued and active request for `selection` with a `NONE`
    /// reply and clears all fetcher state (spec.md §3: owner leaving `Guest`).
    pub fn cancel_all(&mut self, daemon: &mut dyn DaemonSink, selection: SelectionId) {
        let per = self.per_selection(selection);
        let outstanding = per.queue.len() + usize::from(per.active.is_some());
        per.queue.clear();
        per.active = None;
        for _ in 0..outstanding {
            daemon.enqueue(DaemonMessage::clipboard_data(selection, ClipboardType::None, Vec::new()));
        }
    }

    fn fail_active(&mut self, daemon: &mut dyn DaemonSink, selection: SelectionId) {
        daemon.enqueue(DaemonMessage::clipboard_data(selection, ClipboardType::None, Vec::new()));
        self.per_selection(selection).active = None;
    }

    fn start_next(&mut self, display: &mut dyn X11Display, state: &SelectionState, selection: SelectionId) -> Result<()> {
        let ty = match self.per_selection(selection).queue.pop_front() {
            Some(ty) => ty,
            None => return Ok(()),
        };

        let target = state
            .record(selection)
            .atom_for_type(ty)
            .ok_or(BridgeError::UnsupportedSelection)?;
        let atoms = display.atoms();
        let selection_atom = atoms.atom_for_selection(selection).ok_or(BridgeError::UnsupportedSelection)?;
        // Use the selection atom itself as the rendezvous property, not TARGETS,
        // so a CLIPBOARD fetch and a PRIMARY fetch never collide on the same
        // property of selection_window (spec.md §4.4 step 2, §5).
        let property = selection_atom;

        self.per_selection(selection).active = Some(Active::AwaitingSelectionNotify { ty });
        display.convert_selection(selection_atom, target, property)?;
        trace!("inbound: fetching {ty:?} for {selection:?}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atoms::TypedAtom;

    // Full state-machine coverage (targets negotiation, INCR receive,
    // ownership-change cancellation) lives in `tests/inbound_fetcher.rs`
    // against the fake X11Display; this module only covers the bookkeeping
    // that doesn't need one.

    #[test]
    fn cancel_all_on_empty_fetcher_enqueues_nothing() {
        struct Sink(Vec<DaemonMessage>);
        impl DaemonSink for Sink {
            fn enqueue(&mut self, message: DaemonMessage) {
                self.0.push(message);
            }
        }

        let mut fetcher = InboundFetcher::new();
        let mut sink = Sink(Vec::new());
        fetcher.cancel_all(&mut sink, SelectionId::Clipboard);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn typed_atom_ordering_matches_enumeration() {
        // Sanity check that ClipboardType::ALL drives the negotiation order
        // used by `handle_targets_notify`, per spec.md §4.4 step 3.
        let order: Vec<ClipboardType> = ClipboardType::ALL.to_vec();
        assert_eq!(order[0], ClipboardType::Utf8Text);
        assert_eq!(order.last().copied(), Some(ClipboardType::ImageJpg));
        let _ = TypedAtom { ty: ClipboardType::Utf8Text, atom: 0 };
    }
}
