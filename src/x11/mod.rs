//! The `X11Display` boundary: XLib-equivalent calls and an event pump,
//! backed by `x11rb` (the same XCB-protocol foundation the teacher crate
//! uses for its Linux backend). Kept as a trait so the rest of the bridge
//! (`InboundFetcher`, `OutboundServer`, `Coordinator`) can be driven by a
//! fake implementation in tests without a real X server.

pub mod event;

use std::os::unix::io::RawFd;

use log::{trace, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xfixes::{self, ConnectionExt as _, SelectionEventMask};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ConnectionExt as _, CreateWindowAux, EventMask,
    PropMode, Property, SelectionNotifyEvent, Time, Window, WindowClass, SELECTION_NOTIFY_EVENT,
};
use x11rb::protocol::Event as RawEvent;
use x11rb::rust_connection::RustConnection;
use x11rb::{COPY_DEPTH_FROM_PARENT, COPY_FROM_PARENT};

use crate::atoms::AtomTable;
use crate::error::{into_protocol, into_unknown, BridgeError, Result};
use crate::proto::SelectionId;

pub use event::{SelectionRequestSnapshot, X11Event};

/// A single property read, with its declared type/format carried along so
/// callers can tell an `INCR` sentinel apart from real data.
#[derive(Debug, Clone)]
pub struct PropertyValue {
    pub type_atom: Atom,
    pub format: u8,
    pub value: Vec<u8>,
}

/// XLib-equivalent calls and an event pump. One implementation
/// ([`X11rbDisplay`]) talks to a real X server; tests substitute a fake.
pub trait X11Display {
    fn atoms(&self) -> &AtomTable;
    fn selection_window(&self) -> Window;
    fn max_prop_size(&self) -> usize;

    fn convert_selection(&mut self, selection: Atom, target: Atom, property: Atom) -> Result<()>;
    fn get_property(&mut self, delete: bool, window: Window, property: Atom, long_length: u32) -> Result<PropertyValue>;
    fn delete_property(&mut self, window: Window, property: Atom) -> Result<()>;
    fn change_property8(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u8]) -> Result<()>;
    fn change_property32(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u32]) -> Result<()>;
    fn set_selection_owner(&mut self, selection: Atom, owner: Option<Window>) -> Result<()>;
    fn get_selection_owner(&mut self, selection: Atom) -> Result<Option<Window>>;
    fn send_selection_notify(
        &mut self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Option<Atom>,
        time: u32,
    ) -> Result<()>;
    /// Selects `PropertyChangeMask` on `window` (used on the requestor
    /// during outbound INCR, and on our own selection window during
    /// inbound INCR).
    fn watch_property_changes(&mut self, window: Window) -> Result<()>;

    fn flush(&mut self) -> Result<()>;

    /// Pops one pending event, or `None` if the queue is empty right now.
    /// Never blocks. The `Coordinator` calls this in a loop until it
    /// returns `None` (spec.md §5: XLib buffers events internally, so a
    /// single readiness notification may hide more than one event).
    fn poll_event(&mut self) -> Result<Option<X11Event>>;

    fn as_raw_fd(&self) -> RawFd;
}

/// A real connection to an X server, via x11rb.
pub struct X11rbDisplay {
    conn: RustConnection,
    atoms: AtomTable,
    selection_window: Window,
    max_prop_size: usize,
}

impl X11rbDisplay {
    pub fn open() -> Result<Self> {
        let (conn, screen_num) = RustConnection::connect(None).map_err(|e| BridgeError::DisplayUnavailable {
            description: e.to_string(),
        })?;

        if conn.extension_information(xfixes::X11_EXTENSION_NAME).map_err(into_unknown)?.is_none() {
            return Err(BridgeError::XFixesUnavailable);
        }
        conn.xfixes_query_version(5, 0).map_err(into_unknown)?.reply().map_err(into_unknown)?;

        let atoms = AtomTable::new(&conn)?;

        let screen =
            conn.setup().roots.get(screen_num).ok_or_else(|| BridgeError::DisplayUnavailable {
                description: "no screen found".into(),
            })?;
        let root = screen.root;

        let selection_window = conn.generate_id().map_err(into_unknown)?;
        let event_mask = EventMask::PROPERTY_CHANGE | EventMask::STRUCTURE_NOTIFY;
        conn.create_window(
            COPY_DEPTH_FROM_PARENT,
            selection_window,
            root,
            0,
            0,
            1,
            1,
            0,
            WindowClass::INPUT_OUTPUT,
            COPY_FROM_PARENT,
            &CreateWindowAux::new().event_mask(event_mask),
        )
        .map_err(|e| BridgeError::WindowCreationFailed { description: e.to_string() })?;

        // Subscribed on the root window, matching the original
        // (`vdagent-x11.c`'s `XFixesSelectSelectionInput` calls), any
        // window can receive these, and reusing the root window avoids
        // tying the subscription to the proxy window's lifetime.
        let selection_event_mask = u32::from(
            SelectionEventMask::SET_SELECTION_OWNER
                | SelectionEventMask::SELECTION_WINDOW_DESTROY
                | SelectionEventMask::SELECTION_CLIENT_CLOSE,
        );
        for selection in [atoms.control().CLIPBOARD, atoms.control().PRIMARY] {
            conn.xfixes_select_selection_input(root, selection, selection_event_mask)
                .map_err(into_unknown)?;
        }

        conn.flush().map_err(into_unknown)?;

        // `maximum_request_bytes` already folds in the BIG-REQUESTS
        // extension the way `XExtendedMaxRequestSize` does, falling back to
        // the plain maximum otherwise (spec.md §4.5).
        let max_prop_size = conn
            .maximum_request_bytes()
            .saturating_sub(100)
            .min(256 * 1024);

        Ok(Self { conn, atoms, selection_window, max_prop_size })
    }

    fn decode_xfixes_selection(&self, event: xfixes::SelectionNotifyEvent) -> X11Event {
        let Some(selection) = self.atoms.selection_for_atom(event.selection) else {
            return X11Event::Unhandled;
        };
        match event.subtype {
            xfixes::SelectionEvent::SET_SELECTION_OWNER => {
                if event.owner == self.selection_window {
                    // We just grabbed it ourselves; the selection-window
                    // trick (spec.md §9) distinguishes this from a local
                    // app taking ownership.
                    X11Event::Unhandled
                } else if event.owner == x11rb::NONE {
                    X11Event::SelectionOwnerChanged { selection, owner: None }
                } else {
                    X11Event::SelectionOwnerChanged { selection, owner: Some(event.owner) }
                }
            }
            xfixes::SelectionEvent::SELECTION_WINDOW_DESTROY
            | xfixes::SelectionEvent::SELECTION_CLIENT_CLOSE => {
                X11Event::SelectionOwnerGone { selection }
            }
            _ => X11Event::Unhandled,
        }
    }

    fn decode_selection_notify(&self, event: SelectionNotifyEvent) -> X11Event {
        let Some(selection) = self.atoms.selection_for_atom(event.selection) else {
            return X11Event::Unhandled;
        };
        let property = if event.property == x11rb::NONE { None } else { Some(event.property) };
        if event.target == self.atoms.control().TARGETS {
            X11Event::TargetsNotify { selection, requestor: event.requestor, property }
        } else {
            X11Event::DataNotify { selection, requestor: event.requestor, target: event.target, property }
        }
    }

    fn decode_raw(&self, event: RawEvent) -> X11Event {
        match event {
            RawEvent::XfixesSelectionNotify(e) => self.decode_xfixes_selection(e),
            RawEvent::SelectionNotify(e) => self.decode_selection_notify(e),
            RawEvent::PropertyNotify(e) => match e.state {
                Property::NEW_VALUE => X11Event::PropertyNewValue { window: e.window, atom: e.atom },
                Property::DELETE => X11Event::PropertyDeleted { window: e.window, atom: e.atom },
                _ => X11Event::Unhandled,
            },
            RawEvent::SelectionRequest(e) => {
                let Some(selection) = self.atoms.selection_for_atom(e.selection) else {
                    return X11Event::Unhandled;
                };
                let property = if e.property == x11rb::NONE { None } else { Some(e.property) };
                X11Event::SelectionRequest(SelectionRequestSnapshot {
                    requestor: e.requestor,
                    selection,
                    target: e.target,
                    property,
                    time: e.time,
                })
            }
            RawEvent::SelectionClear(e) => {
                match self.atoms.selection_for_atom(e.selection) {
                    Some(selection) => X11Event::SelectionClear { selection },
                    None => X11Event::Unhandled,
                }
            }
            RawEvent::DestroyNotify(_) => X11Event::Unhandled,
            _ => {
                trace!("unhandled X11 event: {event:?}");
                X11Event::Unhandled
            }
        }
    }
}

impl X11Display for X11rbDisplay {
    fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    fn selection_window(&self) -> Window {
        self.selection_window
    }

    fn max_prop_size(&self) -> usize {
        self.max_prop_size
    }

    fn convert_selection(&mut self, selection: Atom, target: Atom, property: Atom) -> Result<()> {
        self.conn
            .convert_selection(self.selection_window, selection, target, property, Time::CURRENT_TIME)
            .map_err(into_protocol)?;
        self.flush()
    }

    fn get_property(&mut self, delete: bool, window: Window, property: Atom, long_length: u32) -> Result<PropertyValue> {
        let reply = self
            .conn
            .get_property(delete, window, property, AtomEnum::ANY, 0, long_length)
            .map_err(into_protocol)?
            .reply()
            .map_err(into_protocol)?;
        Ok(PropertyValue { type_atom: reply.type_, format: reply.format, value: reply.value })
    }

    fn delete_property(&mut self, window: Window, property: Atom) -> Result<()> {
        self.conn.delete_property(window, property).map_err(into_protocol)?;
        self.flush()
    }

    fn change_property8(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u8]) -> Result<()> {
        self.conn
            .change_property8(PropMode::REPLACE, window, property, type_atom, data)
            .map_err(into_protocol)?;
        self.flush()
    }

    fn change_property32(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u32]) -> Result<()> {
        self.conn
            .change_property32(PropMode::REPLACE, window, property, type_atom, data)
            .map_err(into_protocol)?;
        self.flush()
    }

    fn set_selection_owner(&mut self, selection: Atom, owner: Option<Window>) -> Result<()> {
        self.conn
            .set_selection_owner(owner.unwrap_or(x11rb::NONE), selection, Time::CURRENT_TIME)
            .map_err(into_protocol)?;
        self.flush()
    }

    fn get_selection_owner(&mut self, selection: Atom) -> Result<Option<Window>> {
        let owner = self.conn.get_selection_owner(selection).map_err(into_protocol)?.reply().map_err(into_protocol)?.owner;
        Ok(if owner == x11rb::NONE { None } else { Some(owner) })
    }

    fn send_selection_notify(
        &mut self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Option<Atom>,
        time: u32,
    ) -> Result<()> {
        let event = SelectionNotifyEvent {
            response_type: SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time,
            requestor,
            selection,
            target,
            property: property.unwrap_or(x11rb::NONE),
        };
        self.conn.send_event(false, requestor, EventMask::NO_EVENT, event).map_err(into_protocol)?;
        self.flush()
    }

    fn watch_property_changes(&mut self, window: Window) -> Result<()> {
        self.conn
            .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(EventMask::PROPERTY_CHANGE))
            .map_err(into_protocol)?;
        self.flush()
    }

    fn flush(&mut self) -> Result<()> {
        self.conn.flush().map_err(into_unknown)
    }

    fn poll_event(&mut self) -> Result<Option<X11Event>> {
        match self.conn.poll_for_event().map_err(into_unknown)? {
            Some(event) => Ok(Some(self.decode_raw(event))),
            None => Ok(None),
        }
    }

    fn as_raw_fd(&self) -> RawFd {
        use std::os::unix::io::AsRawFd;
        self.conn.stream().as_raw_fd()
    }
}

impl Drop for X11rbDisplay {
    fn drop(&mut self) {
        if let Err(e) = self.conn.destroy_window(self.selection_window) {
            warn!("failed to destroy the selection proxy window: {e}");
            return;
        }
        let _ = self.conn.flush();
    }
}
