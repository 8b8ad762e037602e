//! A fake `X11Display` for integration tests: no real X server, just a
//! property store, an owner table, and an injectable event queue. Lets the
//! Coordinator/InboundFetcher/OutboundServer test suites drive the full
//! state machine deterministically.

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::os::unix::io::{AsRawFd, RawFd};

use x11_selection_bridge::atoms::AtomTable;
use x11_selection_bridge::error::Result;
use x11_selection_bridge::proto::{DaemonMessage, DaemonSink};
use x11_selection_bridge::x11::{PropertyValue, X11Display, X11Event};

use x11rb::protocol::xproto::{Atom, Window};

pub const SELECTION_WINDOW: Window = 1;

/// Captures everything sent to the daemon, in order, for a test's
/// assertions (spec.md §8 invariants 2/3).
#[derive(Debug, Default)]
pub struct RecordingSink(pub Vec<DaemonMessage>);

impl DaemonSink for RecordingSink {
    fn enqueue(&mut self, message: DaemonMessage) {
        self.0.push(message);
    }
}

/// One call the fake recorded, for assertions like "exactly one
/// `SelectionNotify` was sent" (spec.md §8 invariants 2/3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ConvertSelection { selection: Atom, target: Atom, property: Atom },
    DeleteProperty { window: Window, property: Atom },
    ChangeProperty8 { window: Window, property: Atom, type_atom: Atom, data: Vec<u8> },
    ChangeProperty32 { window: Window, property: Atom, type_atom: Atom, data: Vec<u32> },
    SetSelectionOwner { selection: Atom, owner: Option<Window> },
    SendSelectionNotify { requestor: Window, selection: Atom, target: Atom, property: Option<Atom> },
    WatchPropertyChanges { window: Window },
}

pub struct FakeDisplay {
    atoms: AtomTable,
    max_prop_size: usize,
    properties: HashMap<(Window, Atom), PropertyValue>,
    owners: HashMap<Atom, Option<Window>>,
    events: VecDeque<X11Event>,
    pub calls: Vec<Call>,
    /// A real, always-valid fd for `as_raw_fd()` to return, `/dev/null` is
    /// readable (EOF) and registers cleanly with `mio::Poll`, unlike a
    /// sentinel like `-1` which `epoll_ctl` would reject outright.
    fd_source: File,
}

impl FakeDisplay {
    pub fn new() -> Self {
        Self {
            atoms: AtomTable::synthetic(),
            max_prop_size: 16 * 1024,
            properties: HashMap::new(),
            owners: HashMap::new(),
            events: VecDeque::new(),
            calls: Vec::new(),
            fd_source: File::open("/dev/null").expect("/dev/null must be openable"),
        }
    }

    pub fn with_max_prop_size(mut self, size: usize) -> Self {
        self.max_prop_size = size;
        self
    }

    /// Simulates an X11 owner writing `value` (format 8, `type_atom`) onto
    /// one of our windows, used to set up the reply an `XConvertSelection`
    /// would eventually produce.
    pub fn seed_property8(&mut self, window: Window, property: Atom, type_atom: Atom, value: Vec<u8>) {
        self.properties.insert((window, property), PropertyValue { type_atom, format: 8, value });
    }

    /// Same as [`Self::seed_property8`] but format 32 (used for `INCR`
    /// sentinels and `ATOM` lists).
    pub fn seed_property32(&mut self, window: Window, property: Atom, type_atom: Atom, value: &[u32]) {
        let bytes = value.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.properties.insert((window, property), PropertyValue { type_atom, format: 32, value: bytes });
    }

    pub fn property(&self, window: Window, property: Atom) -> Option<&PropertyValue> {
        self.properties.get(&(window, property))
    }

    pub fn push_event(&mut self, event: X11Event) {
        self.events.push_back(event);
    }

    pub fn calls_matching<'a>(&'a self, mut pred: impl FnMut(&Call) -> bool + 'a) -> impl Iterator<Item = &'a Call> {
        self.calls.iter().filter(move |c| pred(c))
    }
}

impl Default for FakeDisplay {
    fn default() -> Self {
        Self::new()
    }
}

impl X11Display for FakeDisplay {
    fn atoms(&self) -> &AtomTable {
        &self.atoms
    }

    fn selection_window(&self) -> Window {
        SELECTION_WINDOW
    }

    fn max_prop_size(&self) -> usize {
        self.max_prop_size
    }

    fn convert_selection(&mut self, selection: Atom, target: Atom, property: Atom) -> Result<()> {
        self.calls.push(Call::ConvertSelection { selection, target, property });
        Ok(())
    }

    fn get_property(&mut self, delete: bool, window: Window, property: Atom, _long_length: u32) -> Result<PropertyValue> {
        let value = self.properties.get(&(window, property)).cloned().unwrap_or(PropertyValue {
            type_atom: 0,
            format: 8,
            value: Vec::new(),
        });
        if delete {
            self.properties.remove(&(window, property));
        }
        Ok(value)
    }

    fn delete_property(&mut self, window: Window, property: Atom) -> Result<()> {
        self.calls.push(Call::DeleteProperty { window, property });
        self.properties.remove(&(window, property));
        Ok(())
    }

    fn change_property8(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u8]) -> Result<()> {
        self.calls.push(Call::ChangeProperty8 { window, property, type_atom, data: data.to_vec() });
        self.properties.insert((window, property), PropertyValue { type_atom, format: 8, value: data.to_vec() });
        Ok(())
    }

    fn change_property32(&mut self, window: Window, property: Atom, type_atom: Atom, data: &[u32]) -> Result<()> {
        self.calls.push(Call::ChangeProperty32 { window, property, type_atom, data: data.to_vec() });
        let bytes = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.properties.insert((window, property), PropertyValue { type_atom, format: 32, value: bytes });
        Ok(())
    }

    fn set_selection_owner(&mut self, selection: Atom, owner: Option<Window>) -> Result<()> {
        self.calls.push(Call::SetSelectionOwner { selection, owner });
        self.owners.insert(selection, owner);
        Ok(())
    }

    fn get_selection_owner(&mut self, selection: Atom) -> Result<Option<Window>> {
        Ok(self.owners.get(&selection).copied().flatten())
    }

    fn send_selection_notify(
        &mut self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Option<Atom>,
        _time: u32,
    ) -> Result<()> {
        self.calls.push(Call::SendSelectionNotify { requestor, selection, target, property });
        Ok(())
    }

    fn watch_property_changes(&mut self, window: Window) -> Result<()> {
        self.calls.push(Call::WatchPropertyChanges { window });
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<X11Event>> {
        Ok(self.events.pop_front())
    }

    fn as_raw_fd(&self) -> RawFd {
        self.fd_source.as_raw_fd()
    }
}
