//! End-to-end tests for the bridge actor

use super::*;
use crate::midi::MidiMessage;
use crate::protocol::MessageKind;
use crate::session::memory::Mutation;
use crate::session::{ClipSlotFlags, MemorySession, SlotEvent, TransportFlags};
use crate::transport::RecordingTransport;

fn options() -> BridgeOptions {
    BridgeOptions {
        poll_interval: Duration::from_secs(60),
        ..BridgeOptions::default()
    }
}

fn make_session() -> Arc<MemorySession> {
    let session = MemorySession::new(4);
    let drums = session.add_track("Drums", 0xFF8000);
    session.add_track("Bass", 0x00FF00);
    session.add_return_track("Verb", 0x0000FF);
    session.set_slot_flags_at(drums, 0, ClipSlotFlags::with_clip()).unwrap();
    session.select_track(drums).unwrap();
    session.clear_mutations();
    Arc::new(session)
}

fn start(session: &Arc<MemorySession>) -> (Arc<RecordingTransport>, BridgeHandle) {
    let transport = Arc::new(RecordingTransport::new());
    let handle = BridgeHandle::spawn(session.clone(), transport.clone(), options());
    (transport, handle)
}

/// Let notifications raised by earlier commands run through the queue
async fn settle(handle: &BridgeHandle) {
    for _ in 0..4 {
        assert!(handle.flush().await);
    }
}

fn kinds(transport: &RecordingTransport) -> Vec<MessageKind> {
    transport.frames().iter().map(Frame::kind).collect()
}

fn count(transport: &RecordingTransport, kind: MessageKind) -> usize {
    transport.frames().iter().filter(|f| f.kind() == kind).count()
}

fn payloads_of(transport: &RecordingTransport, kind: MessageKind) -> Vec<String> {
    transport
        .frames()
        .iter()
        .filter(|f| f.kind() == kind)
        .map(|f| f.payload().to_string())
        .collect()
}

fn start_with_interval(
    session: &Arc<MemorySession>,
    poll_interval: Duration,
) -> (Arc<RecordingTransport>, BridgeHandle) {
    let transport = Arc::new(RecordingTransport::new());
    let options = BridgeOptions { poll_interval, ..BridgeOptions::default() };
    let handle = BridgeHandle::spawn(session.clone(), transport.clone(), options);
    (transport, handle)
}

fn bank(name: &str, parameters: &[&str]) -> crate::session::memory::BankSpec {
    crate::session::memory::BankSpec {
        name: name.to_string(),
        parameters: parameters.iter().map(|p| p.to_string()).collect(),
    }
}

fn last_grid(transport: &RecordingTransport) -> Option<String> {
    transport
        .frames()
        .iter()
        .rev()
        .find(|f| f.kind() == MessageKind::ClipGrid)
        .map(|f| f.payload().to_string())
}

#[tokio::test]
async fn test_startup_snapshot() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;

    let sent = kinds(&transport);
    assert_eq!(
        &sent[..8],
        &[
            MessageKind::TrackNames,
            MessageKind::TrackColors,
            MessageKind::ReturnTrackNames,
            MessageKind::ReturnColors,
            MessageKind::SelectedTrack,
            MessageKind::SelectedReturn,
            MessageKind::SelectedScene,
            MessageKind::ClipGrid,
        ]
    );
    assert_eq!(last_grid(&transport).unwrap(), "1000-0000-0000-0000/0000-0000-0000-0000");
    assert!(transport.short_messages().is_empty());

    // 4 global subjects + 2 tracks * 4 slots * 2 events
    assert_eq!(session.subscription_count(), 20);
    assert!(session.is_armed(session.tracks()[0]));
}

#[tokio::test]
async fn test_transport_flag_edges_across_polls() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    assert!(handle.poll_now().await);
    session.set_transport_flags(TransportFlags { can_undo: true, can_redo: false });
    assert!(handle.poll_now().await);
    assert!(handle.poll_now().await);
    session.set_transport_flags(TransportFlags::default());
    assert!(handle.poll_now().await);
    assert!(handle.poll_now().await);

    assert_eq!(
        transport.short_messages(),
        vec![
            MidiMessage::NoteOn { channel: 2, note: 0, velocity: 0x64 },
            MidiMessage::NoteOff { channel: 2, note: 0, velocity: 0x64 },
        ]
    );
    assert_eq!(transport.sent().len(), 2);
}

#[tokio::test]
async fn test_idle_polls_send_nothing() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    for _ in 0..5 {
        handle.poll_now().await;
    }
    assert!(transport.sent().is_empty());
    assert!(handle.stats().await.unwrap().polls >= 6);
}

#[tokio::test]
async fn test_fire_frame_plays_clip_and_updates_grid() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;

    handle.handle_frame(vec![0xF0, 9, 1, 0, 0, 0xF7]);
    settle(&handle).await;
    handle.poll_now().await;

    let slot = session.slot_at(session.tracks()[0], 0).unwrap();
    assert!(session.clip_slot_flags(slot).unwrap().is_playing);
    assert_eq!(
        last_grid(&transport).unwrap(),
        "1100-0000-0000-0000/0000-0000-0000-0000"
    );
}

#[tokio::test]
async fn test_out_of_range_fire_is_discarded() {
    let session = make_session();
    let (_transport, handle) = start(&session);
    settle(&handle).await;

    handle.handle_frame(vec![0xF0, 9, 1, 10, 0, 0xF7]);
    settle(&handle).await;

    assert!(session.mutations().iter().all(|m| !matches!(m, Mutation::FireClip { .. })));
    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.commands_discarded, 1);
    assert_eq!(stats.commands_applied, 0);
}

#[tokio::test]
async fn test_malformed_frame_keeps_bridge_running() {
    let session = make_session();
    let (_transport, handle) = start(&session);

    handle.handle_frame(vec![0xF0, 9, 1, 0xF7]);
    handle.handle_frame(vec![0xF0, 0x33, 0xF7]);
    handle.handle_frame(vec![0xF0, 10, 0, 0, 0xF7]);
    settle(&handle).await;

    let stats = handle.stats().await.unwrap();
    assert_eq!(stats.protocol_errors, 2);
    assert_eq!(stats.commands_applied, 1);

    let slot = session.slot_at(session.tracks()[0], 0).unwrap();
    assert!(!session.clip_slot_flags(slot).unwrap().has_clip);
}

#[tokio::test]
async fn test_invalid_copy_destination_has_no_effect() {
    let session = make_session();
    let (_transport, handle) = start(&session);
    settle(&handle).await;

    handle.handle_frame(vec![0xF0, 11, 0, 0, 1, 9, 0xF7]);
    settle(&handle).await;

    assert!(session.mutations().iter().all(|m| !matches!(m, Mutation::DuplicateClipTo { .. })));
    let bass = session.tracks()[1];
    for index in 0..4 {
        let slot = session.slot_at(bass, index).unwrap();
        assert!(!session.clip_slot_flags(slot).unwrap().has_clip);
    }
}

#[tokio::test]
async fn test_track_select_control_sends_selection() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    // CC ch 2 #4 = select track
    handle.handle_midi(&[0xB1, 4, 1]);
    settle(&handle).await;

    assert_eq!(payloads_of(&transport, MessageKind::SelectedTrack), vec!["1"]);
    assert_eq!(payloads_of(&transport, MessageKind::SelectedReturn), vec!["none selected"]);
    assert_eq!(count(&transport, MessageKind::SelectedScene), 1);

    let (drums, bass) = (session.tracks()[0], session.tracks()[1]);
    assert!(session.is_armed(bass));
    assert!(!session.is_armed(drums));
}

#[tokio::test]
async fn test_track_select_picks_first_device_once() {
    let session = make_session();
    let bass = session.tracks()[1];
    session.add_device(bass, "Operator", vec![bank("Osc", &["Coarse"])]);
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.handle_midi(&[0xB1, 4, 1]);
    settle(&handle).await;

    assert_eq!(count(&transport, MessageKind::SelectedTrack), 1);
    assert_eq!(payloads_of(&transport, MessageKind::BankName), vec!["Osc"]);
    assert_eq!(count(&transport, MessageKind::AvailableDevices), 1);
    assert_eq!(count(&transport, MessageKind::ParameterNames), 1);
}

#[tokio::test]
async fn test_startup_device_pick_sends_device_once() {
    let session = make_session();
    let drums = session.tracks()[0];
    session.add_device(drums, "Drum Rack", vec![bank("Macros", &["Tune"])]);
    let (transport, handle) = start(&session);
    settle(&handle).await;

    assert_eq!(count(&transport, MessageKind::SelectedTrack), 1);
    assert_eq!(payloads_of(&transport, MessageKind::BankName), vec!["Macros"]);
    assert_eq!(count(&transport, MessageKind::SelectedDevice), 1);
}

#[tokio::test]
async fn test_return_select_past_end_reports_master() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.handle_midi(&[0xB1, 5, 7]);
    settle(&handle).await;

    let frames = transport.frames();
    assert_eq!(frames[0].payload(), "not found");
    assert_eq!(frames[1].kind(), MessageKind::SelectedReturn);
    assert_eq!(frames[1].payload(), "1");
}

#[tokio::test]
async fn test_clip_scene_select_sends_scene_once() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.handle_midi(&[0xB1, 15, 2]);
    settle(&handle).await;
    assert_eq!(payloads_of(&transport, MessageKind::SelectedScene), vec!["2"]);
    assert_eq!(session.selected_scene(), Some(session.scenes()[2]));

    // same scene again: no notification, the echo comes from the command
    transport.take();
    handle.handle_midi(&[0xB1, 15, 2]);
    settle(&handle).await;
    assert_eq!(payloads_of(&transport, MessageKind::SelectedScene), vec!["2"]);
}

#[tokio::test]
async fn test_bank_navigation_sends_device_once() {
    let session = make_session();
    let drums = session.tracks()[0];
    let device = session.add_device(
        drums,
        "Drum Rack",
        vec![bank("Macros", &["Tune"]), bank("Mix", &["Level"])],
    );
    session.select_device(device).unwrap();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.handle_midi(&[0xB0, 32, 127]);
    settle(&handle).await;
    assert_eq!(payloads_of(&transport, MessageKind::BankName), vec!["Mix"]);
    assert_eq!(payloads_of(&transport, MessageKind::ParameterNames), vec!["Level"]);

    // already on the last bank
    transport.take();
    handle.handle_midi(&[0xB0, 32, 127]);
    settle(&handle).await;
    assert_eq!(payloads_of(&transport, MessageKind::BankName), vec!["Mix"]);
    assert_eq!(count(&transport, MessageKind::BankNames), 1);
}

#[tokio::test]
async fn test_button_release_does_nothing() {
    let session = make_session();
    session.set_transport_flags(TransportFlags { can_undo: true, can_redo: false });
    let (_transport, handle) = start(&session);
    settle(&handle).await;

    handle.handle_midi(&[0x9F, 101, 0]);
    settle(&handle).await;
    assert!(!session.mutations().contains(&Mutation::Undo));

    handle.handle_midi(&[0x9F, 101, 127]);
    settle(&handle).await;
    assert!(session.mutations().contains(&Mutation::Undo));
}

#[tokio::test]
async fn test_new_track_resends_mixer_and_attaches_listeners() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    let keys = session.add_track("Keys", 0x123456);
    settle(&handle).await;

    assert_eq!(payloads_of(&transport, MessageKind::TrackNames), vec!["Drums,Bass,Keys"]);

    let slot = session.slot_at(keys, 3).unwrap();
    assert_eq!(session.subscribers(Subject::ClipSlot(slot, SlotEvent::HasClip)), 1);
    assert_eq!(session.subscribers(Subject::ClipSlot(slot, SlotEvent::IsTriggered)), 1);

    // the grid waits for the poll like any other push
    assert_eq!(count(&transport, MessageKind::ClipGrid), 0);
    handle.poll_now().await;
    assert_eq!(count(&transport, MessageKind::ClipGrid), 1);
    assert_eq!(last_grid(&transport).unwrap().split('/').count(), 3);
}

#[tokio::test]
async fn test_track_storm_is_throttled() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    for i in 0..5 {
        session.add_track(&format!("Track {}", i), 0);
    }
    settle(&handle).await;
    settle(&handle).await;

    assert_eq!(count(&transport, MessageKind::TrackNames), 5);
    assert_eq!(count(&transport, MessageKind::ClipGrid), 0);

    handle.poll_now().await;
    assert_eq!(count(&transport, MessageKind::ClipGrid), 1);
    assert_eq!(last_grid(&transport).unwrap().split('/').count(), 7);
}

#[tokio::test]
async fn test_deleted_scene_releases_slot_listeners() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    assert_eq!(session.subscription_count(), 20);

    // CC ch 2 #16 = delete scene
    handle.handle_midi(&[0xB1, 16, 3]);
    settle(&handle).await;
    handle.poll_now().await;

    assert_eq!(session.subscription_count(), 16);
    assert_eq!(last_grid(&transport).unwrap(), "1000-0000-0000/0000-0000-0000");
}

#[tokio::test]
async fn test_shutdown_releases_everything() {
    let session = make_session();
    let (_transport, handle) = start(&session);
    settle(&handle).await;

    assert_eq!(handle.shutdown().await, Some(20));
    assert_eq!(session.subscription_count(), 0);

    // later calls see a stopped actor
    assert!(!handle.flush().await);
    assert_eq!(handle.stats().await, None);
}

#[tokio::test]
async fn test_device_id_change_resyncs() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.update_options(BridgeOptions {
        device_id: 0x22,
        ..options()
    });
    settle(&handle).await;

    let frames = transport.frames();
    assert!(!frames.is_empty());
    assert!(frames.iter().all(|f| f.device_id() == 0x22));
    assert!(frames.iter().any(|f| f.kind() == MessageKind::ClipGrid));
}

#[tokio::test]
async fn test_send_failures_are_counted() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;

    transport.set_failing(true);
    handle.resync();
    settle(&handle).await;

    let stats = handle.stats().await.unwrap();
    assert!(stats.send_failures >= 8);
    assert!(handle.poll_now().await);
}

#[tokio::test]
async fn test_quantize_settings_flow_through_controls() {
    let session = make_session();
    let (_transport, handle) = start(&session);
    settle(&handle).await;

    handle.handle_midi(&[0xB1, 0, 8]); // grid 1/32
    handle.handle_midi(&[0xB1, 1, 75]); // strength 75%
    handle.handle_midi(&[0x9F, 99, 127]); // quantize
    settle(&handle).await;

    let quantized = session.mutations().into_iter().find_map(|m| match m {
        Mutation::Quantize(settings) => Some(settings),
        _ => None,
    });
    let settings = quantized.unwrap();
    assert_eq!(settings.grid, 8);
    assert_eq!(settings.strength, 0.75);
}

#[tokio::test(start_paused = true)]
async fn test_poll_tick_sends_transport_edges() {
    let session = make_session();
    let (transport, handle) = start_with_interval(&session, Duration::from_millis(300));
    settle(&handle).await;
    transport.take();

    session.set_transport_flags(TransportFlags { can_undo: true, can_redo: false });
    tokio::time::sleep(Duration::from_millis(310)).await;
    settle(&handle).await;
    assert_eq!(
        transport.short_messages(),
        vec![MidiMessage::NoteOn { channel: 2, note: 0, velocity: 0x64 }]
    );

    session.set_transport_flags(TransportFlags::default());
    tokio::time::sleep(Duration::from_millis(300)).await;
    settle(&handle).await;
    assert_eq!(
        transport.short_messages(),
        vec![
            MidiMessage::NoteOn { channel: 2, note: 0, velocity: 0x64 },
            MidiMessage::NoteOff { channel: 2, note: 0, velocity: 0x64 },
        ]
    );

    // idle ticks add nothing
    tokio::time::sleep(Duration::from_millis(900)).await;
    settle(&handle).await;
    assert_eq!(transport.sent().len(), 2);
    assert!(handle.stats().await.unwrap().polls >= 6);
}

#[tokio::test(start_paused = true)]
async fn test_new_poll_interval_resets_ticker() {
    let session = make_session();
    let (transport, handle) = start(&session);
    settle(&handle).await;
    transport.take();

    handle.update_options(BridgeOptions {
        poll_interval: Duration::from_millis(50),
        ..options()
    });
    settle(&handle).await;

    session.set_transport_flags(TransportFlags { can_undo: false, can_redo: true });
    tokio::time::sleep(Duration::from_millis(60)).await;
    settle(&handle).await;

    // without the reset the first tick would be a minute away
    assert_eq!(
        transport.short_messages(),
        vec![MidiMessage::NoteOn { channel: 2, note: 2, velocity: 0x64 }]
    );
    assert_eq!(transport.frames().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_clip_slot_storm_yields_one_grid_per_interval() {
    let session = make_session();
    let (transport, handle) = start_with_interval(&session, Duration::from_millis(300));
    settle(&handle).await;
    tokio::time::sleep(Duration::from_millis(310)).await;
    settle(&handle).await;
    transport.take();

    let bass = session.tracks()[1];
    for index in 0..4 {
        session.set_slot_flags_at(bass, index, ClipSlotFlags::with_clip()).unwrap();
    }
    settle(&handle).await;
    assert_eq!(count(&transport, MessageKind::ClipGrid), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    settle(&handle).await;
    assert_eq!(count(&transport, MessageKind::ClipGrid), 1);
    assert_eq!(
        last_grid(&transport).unwrap(),
        "1000-0000-0000-0000/1000-1000-1000-1000"
    );
}
