//! `InboundFetcher` state-machine coverage against `FakeDisplay`: targets
//! negotiation, single-shot and `INCR` data fetches, ownership-change
//! cancellation, and stale-reply rejection.

mod common;

use common::{FakeDisplay, RecordingSink, SELECTION_WINDOW};

use x11_selection_bridge::atoms::TypedAtom;
use x11_selection_bridge::inbound::InboundFetcher;
use x11_selection_bridge::proto::{ClipboardType, MessageType, SelectionId};
use x11_selection_bridge::selection::{Owner, SelectionState};
use x11_selection_bridge::x11::X11Display;

#[test]
fn targets_negotiation_grabs_on_recognized_target() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    let targets_atom = display.atoms().control().TARGETS;
    let utf8_atom = display.atoms().control().UTF8_STRING;

    state.expect_targets_notify(SelectionId::Clipboard);
    fetcher.request_targets(&mut display, SelectionId::Clipboard).unwrap();

    display.seed_property32(SELECTION_WINDOW, targets_atom, display.atoms().control().ATOM, &[utf8_atom]);

    fetcher
        .handle_targets_notify(&mut display, &mut sink, &mut state, SelectionId::Clipboard, Some(targets_atom))
        .unwrap();

    assert_eq!(state.record(SelectionId::Clipboard).owner(), Owner::Guest);
    assert!(state.record(SelectionId::Clipboard).type_is_advertised(ClipboardType::Utf8Text));

    assert_eq!(sink.0.len(), 1);
    assert_eq!(sink.0[0].kind, MessageType::ClipboardGrab);
    assert_eq!(sink.0[0].parse_grab_types(), vec![ClipboardType::Utf8Text]);
}

#[test]
fn stale_targets_reply_is_ignored_until_the_last_one() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    let targets_atom = display.atoms().control().TARGETS;
    let utf8_atom = display.atoms().control().UTF8_STRING;
    display.seed_property32(SELECTION_WINDOW, targets_atom, display.atoms().control().ATOM, &[utf8_atom]);

    // Two owner changes fire before either TARGETS reply lands.
    state.expect_targets_notify(SelectionId::Clipboard);
    state.expect_targets_notify(SelectionId::Clipboard);

    fetcher
        .handle_targets_notify(&mut display, &mut sink, &mut state, SelectionId::Clipboard, Some(targets_atom))
        .unwrap();
    assert!(sink.0.is_empty(), "the first (stale) reply must not grab anything");
    assert_eq!(state.record(SelectionId::Clipboard).owner(), Owner::None);

    fetcher
        .handle_targets_notify(&mut display, &mut sink, &mut state, SelectionId::Clipboard, Some(targets_atom))
        .unwrap();
    assert_eq!(sink.0.len(), 1, "the second reply is the authoritative one");
}

fn guest_with_utf8(display: &FakeDisplay, state: &mut SelectionState) -> u32 {
    let utf8_atom = display.atoms().control().UTF8_STRING;
    state.set_owner(SelectionId::Clipboard, Owner::Guest);
    state.record_types(SelectionId::Clipboard, vec![TypedAtom { ty: ClipboardType::Utf8Text, atom: utf8_atom }]);
    utf8_atom
}

#[test]
fn single_shot_data_fetch_delivers_bytes() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    let utf8_atom = guest_with_utf8(&display, &mut state);
    let clipboard_atom = display.atoms().control().CLIPBOARD;

    fetcher
        .handle_clipboard_request(&mut display, &mut sink, &state, SelectionId::Clipboard, ClipboardType::Utf8Text)
        .unwrap();
    assert!(sink.0.is_empty(), "no reply until the SelectionNotify arrives");

    display.seed_property8(SELECTION_WINDOW, clipboard_atom, utf8_atom, b"hello".to_vec());
    fetcher
        .handle_selection_notify(&mut display, &mut sink, &state, SelectionId::Clipboard, Some(clipboard_atom))
        .unwrap();

    assert_eq!(sink.0.len(), 1);
    assert_eq!(sink.0[0].kind, MessageType::ClipboardData);
    assert_eq!(sink.0[0].payload, b"hello");
}

#[test]
fn incr_receive_reassembles_chunks_in_order() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    let utf8_atom = guest_with_utf8(&display, &mut state);
    let clipboard_atom = display.atoms().control().CLIPBOARD;
    let incr_atom = display.atoms().control().INCR;

    fetcher
        .handle_clipboard_request(&mut display, &mut sink, &state, SelectionId::Clipboard, ClipboardType::Utf8Text)
        .unwrap();

    display.seed_property32(SELECTION_WINDOW, clipboard_atom, incr_atom, &[10]);
    fetcher
        .handle_selection_notify(&mut display, &mut sink, &state, SelectionId::Clipboard, Some(clipboard_atom))
        .unwrap();
    assert!(sink.0.is_empty());

    display.seed_property8(SELECTION_WINDOW, clipboard_atom, utf8_atom, b"abcde".to_vec());
    fetcher.handle_property_new_value(&mut display, &mut sink, &state, SelectionId::Clipboard).unwrap();
    assert!(sink.0.is_empty(), "still assembling");

    display.seed_property8(SELECTION_WINDOW, clipboard_atom, utf8_atom, b"fghij".to_vec());
    fetcher.handle_property_new_value(&mut display, &mut sink, &state, SelectionId::Clipboard).unwrap();
    assert!(sink.0.is_empty());

    display.seed_property8(SELECTION_WINDOW, clipboard_atom, utf8_atom, Vec::new());
    fetcher.handle_property_new_value(&mut display, &mut sink, &state, SelectionId::Clipboard).unwrap();

    assert_eq!(sink.0.len(), 1);
    assert_eq!(sink.0[0].payload, b"abcdefghij");
}

#[test]
fn ownership_change_cancels_queued_and_active_requests() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    guest_with_utf8(&display, &mut state);

    fetcher
        .handle_clipboard_request(&mut display, &mut sink, &state, SelectionId::Clipboard, ClipboardType::Utf8Text)
        .unwrap();
    fetcher
        .handle_clipboard_request(&mut display, &mut sink, &state, SelectionId::Clipboard, ClipboardType::Utf8Text)
        .unwrap();
    sink.0.clear();

    fetcher.cancel_all(&mut sink, SelectionId::Clipboard);

    assert_eq!(sink.0.len(), 2, "one active plus one queued request, both refused");
    for message in &sink.0 {
        assert_eq!(message.kind, MessageType::ClipboardData);
        assert_eq!(message.arg2, u32::from(ClipboardType::None));
    }
}

#[test]
fn request_for_unadvertised_type_is_refused_immediately() {
    let mut display = FakeDisplay::new();
    let mut sink = RecordingSink::default();
    let mut state = SelectionState::new();
    let mut fetcher = InboundFetcher::new();

    guest_with_utf8(&display, &mut state);

    fetcher
        .handle_clipboard_request(&mut display, &mut sink, &state, SelectionId::Clipboard, ClipboardType::ImagePng)
        .unwrap();

    assert_eq!(sink.0.len(), 1);
    assert_eq!(sink.0[0].arg2, u32::from(ClipboardType::None));
}
