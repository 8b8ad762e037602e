//! The event pump and orchestrator (spec.md §4.6). Owns every other
//! component and is the only thing that calls into more than one of them.

use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use log::warn;
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use x11rb::protocol::xproto::Window;

use crate::config::BridgeConfig;
use crate::error::{into_unknown, Result};
use crate::inbound::InboundFetcher;
use crate::outbound::OutboundServer;
use crate::proto::{ClipboardType, DaemonChannel, DaemonMessage, MessageType, SelectionId};
use crate::selection::{CleanupAction, Owner, SelectionState};
use crate::x11::{X11Display, X11Event};

const X11_TOKEN: Token = Token(0);
const DAEMON_TOKEN: Token = Token(1);

/// Owns the X11 display, the daemon channel, and every stateful component,
/// and drives them from a single `mio::Poll` wait (spec.md §5's
/// single-threaded, cooperative scheduling model).
pub struct Coordinator<T> {
    display: Box<dyn X11Display>,
    daemon: DaemonChannel<T>,
    state: SelectionState,
    inbound: InboundFetcher,
    outbound: OutboundServer,
    poll: Poll,
    events: Events,
    poll_timeout: Duration,
}

impl<T: Read + Write + AsRawFd> Coordinator<T> {
    pub fn new(display: Box<dyn X11Display>, daemon_stream: T, config: &BridgeConfig) -> Result<Self> {
        let poll = Poll::new().map_err(into_unknown)?;

        let mut x11_fd = display.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&mut x11_fd), X11_TOKEN, Interest::READABLE)
            .map_err(into_unknown)?;

        let mut daemon_fd = daemon_stream.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&mut daemon_fd), DAEMON_TOKEN, Interest::READABLE | Interest::WRITABLE)
            .map_err(into_unknown)?;

        Ok(Self {
            display,
            daemon: DaemonChannel::new(daemon_stream),
            state: SelectionState::new(),
            inbound: InboundFetcher::new(),
            outbound: OutboundServer::new(),
            poll,
            events: Events::with_capacity(16),
            poll_timeout: config.poll_timeout,
        })
    }

    /// Runs the event loop until a fatal error occurs. Never returns `Ok`.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.tick()?;
        }
    }

    /// One iteration of the loop described in spec.md §4.6: wait for
    /// readiness, drive the daemon channel, then drain every pending X11
    /// event, repeatedly, since the underlying library buffers events
    /// internally and a single readiness notification may hide more than
    /// one (spec.md §5).
    pub fn tick(&mut self) -> Result<()> {
        match self.poll.poll(&mut self.events, Some(self.poll_timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(into_unknown(e)),
        }

        self.daemon.service_readable();
        self.daemon.service_writable();
        if self.daemon.take_disconnect_event() {
            warn!("coordinator: daemon channel disconnected");
        }

        for message in self.daemon.take_messages() {
            self.dispatch_daemon_message(message)?;
        }

        self.drain_x11_events()?;
        // Final flush: any X11 writes issued while handling daemon messages
        // or events above must reach the server even if nothing else wakes
        // the loop before the next caller-supplied timeout (spec.md §5).
        self.display.flush()?;
        Ok(())
    }

    fn drain_x11_events(&mut self) -> Result<()> {
        while let Some(event) = self.display.poll_event()? {
            self.dispatch_x11_event(event)?;
        }
        Ok(())
    }

    fn dispatch_daemon_message(&mut self, message: DaemonMessage) -> Result<()> {
        match message.kind {
            MessageType::ClipboardRequest => {
                let Ok(selection) = SelectionId::try_from(message.arg1) else {
                    warn!("coordinator: CLIPBOARD_REQUEST with invalid selection id {}", message.arg1);
                    return Ok(());
                };
                let Ok(ty) = ClipboardType::try_from(message.arg2) else {
                    warn!("coordinator: CLIPBOARD_REQUEST with invalid type {}", message.arg2);
                    return Ok(());
                };
                if !selection.supported() {
                    warn!("coordinator: CLIPBOARD_REQUEST for unsupported selection {selection:?}");
                    return Ok(());
                }
                self.inbound.handle_clipboard_request(
                    self.display.as_mut(),
                    &mut self.daemon,
                    &self.state,
                    selection,
                    ty,
                )?;
            }
            MessageType::ClipboardGrab => {
                let Ok(selection) = SelectionId::try_from(message.arg1) else {
                    warn!("coordinator: CLIPBOARD_GRAB with invalid selection id {}", message.arg1);
                    return Ok(());
                };
                if !selection.supported() {
                    warn!("coordinator: CLIPBOARD_GRAB for unsupported selection {selection:?}");
                    return Ok(());
                }
                let types = message.parse_grab_types();
                let cleanup =
                    self.outbound.handle_clipboard_grab(self.display.as_mut(), &mut self.state, selection, types)?;
                self.apply_cleanup(selection, cleanup)?;
            }
            MessageType::ClipboardData => {
                let Ok(selection) = SelectionId::try_from(message.arg1) else {
                    warn!("coordinator: CLIPBOARD_DATA with invalid selection id {}", message.arg1);
                    return Ok(());
                };
                let Ok(ty) = ClipboardType::try_from(message.arg2) else {
                    warn!("coordinator: CLIPBOARD_DATA with invalid type {}", message.arg2);
                    return Ok(());
                };
                if !selection.supported() {
                    warn!("coordinator: CLIPBOARD_DATA for unsupported selection {selection:?}");
                    return Ok(());
                }
                self.outbound.handle_clipboard_data(
                    self.display.as_mut(),
                    &mut self.daemon,
                    &self.state,
                    selection,
                    ty,
                    message.payload,
                )?;
            }
            MessageType::ClipboardRelease => {
                let Ok(selection) = SelectionId::try_from(message.arg1) else {
                    warn!("coordinator: CLIPBOARD_RELEASE with invalid selection id {}", message.arg1);
                    return Ok(());
                };
                if !selection.supported() {
                    warn!("coordinator: CLIPBOARD_RELEASE for unsupported selection {selection:?}");
                    return Ok(());
                }
                let cleanup = self.outbound.handle_clipboard_release(self.display.as_mut(), &mut self.state, selection)?;
                self.apply_cleanup(selection, cleanup)?;
            }
            MessageType::GuestXorgResolution | MessageType::Other(_) => {
                // Display-resolution reporting is an external collaborator's
                // concern (spec.md §1's out-of-scope list); anything else
                // unrecognized is forward-compatible noise.
            }
        }
        Ok(())
    }

    fn dispatch_x11_event(&mut self, event: X11Event) -> Result<()> {
        match event {
            X11Event::SelectionOwnerChanged { selection, owner } => {
                if owner == Some(self.display.selection_window()) {
                    return Ok(());
                }
                let cleanup = self.state.set_owner(selection, Owner::None);
                self.apply_cleanup(selection, cleanup)?;
                if owner.is_some() {
                    self.state.expect_targets_notify(selection);
                    self.inbound.request_targets(self.display.as_mut(), selection)?;
                }
            }
            X11Event::SelectionOwnerGone { selection } => {
                let cleanup = self.state.set_owner(selection, Owner::None);
                self.apply_cleanup(selection, cleanup)?;
            }
            X11Event::TargetsNotify { selection, property, .. } => {
                self.inbound.handle_targets_notify(
                    self.display.as_mut(),
                    &mut self.daemon,
                    &mut self.state,
                    selection,
                    property,
                )?;
            }
            X11Event::DataNotify { selection, property, .. } => {
                self.inbound.handle_selection_notify(
                    self.display.as_mut(),
                    &mut self.daemon,
                    &self.state,
                    selection,
                    property,
                )?;
            }
            X11Event::PropertyNewValue { window, .. } => {
                if window == self.display.selection_window() {
                    for selection in [SelectionId::Clipboard, SelectionId::Primary] {
                        self.inbound.handle_property_new_value(
                            self.display.as_mut(),
                            &mut self.daemon,
                            &self.state,
                            selection,
                        )?;
                    }
                }
            }
            X11Event::PropertyDeleted { window, .. } => {
                self.outbound_property_delete(window)?;
            }
            X11Event::SelectionRequest(snapshot) => {
                if snapshot.selection.supported() {
                    self.outbound.handle_selection_request(self.display.as_mut(), &mut self.daemon, &self.state, snapshot)?;
                }
            }
            X11Event::SelectionClear { .. } | X11Event::Unhandled => {}
        }
        Ok(())
    }

    /// `PropertyNotify(PropertyDelete)` doesn't carry a selection id, only a
    /// window, find whichever selection's active INCR-send targets this
    /// requestor (spec.md §4.6's dispatch table).
    fn outbound_property_delete(&mut self, window: Window) -> Result<()> {
        for selection in [SelectionId::Clipboard, SelectionId::Primary] {
            self.outbound.handle_property_delete(self.display.as_mut(), &mut self.daemon, &self.state, selection, window)?;
        }
        Ok(())
    }

    fn apply_cleanup(&mut self, selection: SelectionId, actions: Vec<CleanupAction>) -> Result<()> {
        for action in actions {
            match action {
                CleanupAction::CancelInboundRequests => self.inbound.cancel_all(&mut self.daemon, selection),
                CleanupAction::RefuseOutboundRequests => self.outbound.refuse_all(self.display.as_mut(), selection)?,
                CleanupAction::SendClipboardRelease => {
                    self.daemon.send(DaemonMessage::clipboard_release(selection))
                }
            }
        }
        Ok(())
    }
}
