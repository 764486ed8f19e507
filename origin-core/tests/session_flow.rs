//! Session integration tests.
//!
//! Drives a full session through scripted room traffic and checks what it
//! sends, vetoes and reports.

use origin_core::protocol::{ClientInfo, Incoming, Outgoing, Packet, Profile, RoomEntity, Tile};
use origin_core::testing::{
    assert_nothing_sent, assert_sent, entity, player, speech_packet, users_packet,
    MemoryOutfitStore, TestHarness,
};
use origin_core::{
    ChatKind, Intercept, Notification, OutboundPacket, RoomEntities, RoomUser, SessionConfig,
    TransportEvent, Verdict,
};
use std::time::Duration;
use tokio::time::sleep;

fn room() -> Vec<RoomUser> {
    vec![
        player(1, "alice", "xyz", "m"),
        player(2, "bob", "hd-180", "F"),
        player(3, "carol", "ch-210", "?"),
    ]
}

async fn harness_in_room() -> TestHarness {
    let harness = TestHarness::new();
    harness.enter_room(&room()).await;
    harness
}

fn profile_updated() -> TransportEvent {
    TransportEvent::ProfileUpdated(Profile {
        name: "me".into(),
        figure: "fig".into(),
    })
}

fn moved(name: &str, x: i32, y: i32) -> TransportEvent {
    TransportEvent::EntityUpdated(RoomEntity {
        index: 9,
        name: name.to_string(),
        figure: String::new(),
        gender: String::new(),
        kind: Default::default(),
        tile: Tile { x, y, z: 0.0 },
    })
}

// ============================================================================
// Commands
// ============================================================================

#[tokio::test]
async fn test_follow_command_is_vetoed_and_sets_target() {
    let harness = harness_in_room().await;

    let verdict = harness.type_chat(":follow alice").await;

    assert_eq!(verdict, Verdict::Block);
    assert_eq!(harness.session.target().await.as_deref(), Some("alice"));
    assert!(harness.logged("Following alice").await);
    assert_nothing_sent(&harness);
}

#[tokio::test]
async fn test_copy_command_sends_male_outfit_code() {
    let harness = harness_in_room().await;

    let verdict = harness.type_chat(":copy alice").await;

    assert_eq!(verdict, Verdict::Block);
    assert_eq!(
        harness.sent(),
        vec![OutboundPacket::update_figure("@l@D@Yxyz@E@AM@JH@AH@R@@")]
    );
    assert!(harness.logged("Copied outfit from alice").await);
}

#[tokio::test]
async fn test_copy_female_and_unknown_gender() {
    let harness = harness_in_room().await;

    assert!(harness.session.copy_outfit("bob").await);
    assert!(harness.session.copy_outfit("carol").await);

    assert_eq!(
        harness.sent(),
        vec![
            OutboundPacket::update_figure("@l@D@Yhd-180@E@AF@JH@AH@R@@"),
            OutboundPacket::update_figure("ch-210"),
        ]
    );
}

#[tokio::test]
async fn test_copy_unknown_user_logs_miss() {
    let harness = harness_in_room().await;

    assert_eq!(harness.type_chat(":copy zed").await, Verdict::Block);

    assert_nothing_sent(&harness);
    assert!(harness.logged("zed not found").await);
}

#[tokio::test]
async fn test_ordinary_chat_is_forwarded() {
    let harness = harness_in_room().await;

    assert_eq!(harness.type_chat("hello :follow bob").await, Verdict::Forward);
    assert_eq!(harness.session.target().await, None);
}

#[tokio::test]
async fn test_shout_and_whisper_commands_are_intercepted() {
    let harness = harness_in_room().await;

    let shout = Packet::outgoing(Outgoing::Shout).string(":mimicoff");
    assert_eq!(harness.intercept(shout).await, Verdict::Block);
    assert!(!harness.session.status().await.mimic_enabled);

    let whisper = Packet::outgoing(Outgoing::Whisper).string(":mimicon");
    assert_eq!(harness.intercept(whisper).await, Verdict::Block);
    assert!(harness.session.status().await.mimic_enabled);
}

#[tokio::test]
async fn test_bad_commands_are_vetoed_without_effect() {
    let harness = harness_in_room().await;

    assert_eq!(harness.type_chat(":dance").await, Verdict::Block);
    assert_eq!(harness.type_chat(":follow").await, Verdict::Block);
    assert_eq!(harness.type_chat(":").await, Verdict::Block);

    assert_eq!(harness.session.target().await, None);
    assert_nothing_sent(&harness);
}

#[tokio::test]
async fn test_custom_command_prefix() {
    let harness = TestHarness::with_config(SessionConfig::new().with_command_prefix('!'));
    harness.enter_room(&room()).await;

    assert_eq!(harness.type_chat(":follow alice").await, Verdict::Forward);
    assert_eq!(harness.type_chat("!follow alice").await, Verdict::Block);
    assert_eq!(harness.session.target().await.as_deref(), Some("alice"));
}

// ============================================================================
// Mimic
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_mimic_repeats_target_after_delay() {
    let harness = harness_in_room().await;
    harness.session.follow_user("bob").await;

    assert_eq!(harness.say(2, "Hello There").await, Verdict::Forward);

    sleep(Duration::from_millis(499)).await;
    assert_nothing_sent(&harness);

    sleep(Duration::from_millis(1001)).await;
    assert_eq!(harness.sent(), vec![OutboundPacket::chat("HeLlO ThErE")]);
}

#[tokio::test(start_paused = true)]
async fn test_mimic_ignores_other_users() {
    let harness = harness_in_room().await;
    harness.session.follow_user("bob").await;

    harness.say(1, "not bob").await;
    harness.say(42, "who am i").await;

    sleep(Duration::from_secs(2)).await;
    assert_nothing_sent(&harness);
}

#[tokio::test(start_paused = true)]
async fn test_mimic_shout_and_whisper() {
    let harness = harness_in_room().await;
    harness.session.follow_user("bob").await;

    harness
        .intercept(speech_packet(Incoming::Shout, 2, "loud"))
        .await;
    harness
        .intercept(speech_packet(Incoming::Whisper, 2, "psst"))
        .await;

    sleep(Duration::from_secs(2)).await;
    let sent = harness.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.contains(&OutboundPacket::shout("LoUd")));
    assert!(sent.contains(&OutboundPacket::whisper("bob", "PsSt")));
}

#[tokio::test(start_paused = true)]
async fn test_mimic_off_cancels_pending_reply() {
    let harness = harness_in_room().await;
    harness.session.follow_user("bob").await;

    harness.say(2, "too late").await;
    sleep(Duration::from_millis(100)).await;
    harness.type_chat(":mimicoff").await;

    sleep(Duration::from_secs(2)).await;
    assert_nothing_sent(&harness);

    harness.type_chat(":mimicon").await;
    harness.say(2, "again").await;
    sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.sent(), vec![OutboundPacket::chat("AgAiN")]);
}

#[tokio::test(start_paused = true)]
async fn test_target_change_drops_pending_reply() {
    let harness = harness_in_room().await;
    harness.session.follow_user("bob").await;

    harness.say(2, "first").await;
    harness.session.follow_user("alice").await;
    sleep(Duration::from_secs(2)).await;
    assert_nothing_sent(&harness);

    harness.say(2, "second").await;
    harness.session.stop_following().await;
    sleep(Duration::from_secs(2)).await;
    assert_nothing_sent(&harness);
    assert!(harness.logged("Stopped following alice").await);
}

#[tokio::test(start_paused = true)]
async fn test_custom_mimic_delay() {
    let config = SessionConfig::new()
        .with_mimic_delay(Duration::from_millis(10)..Duration::from_millis(20));
    let harness = TestHarness::with_config(config);
    harness.enter_room(&room()).await;
    harness.session.follow_user("alice").await;

    harness.say(1, "hey").await;
    sleep(Duration::from_millis(20)).await;
    assert_eq!(harness.sent(), vec![OutboundPacket::chat("HeY")]);
}

// ============================================================================
// Room membership
// ============================================================================

#[tokio::test]
async fn test_join_events_only_for_new_players() {
    let mut harness = TestHarness::new();
    harness.enter_room(&room()[..1]).await;
    harness.intercept(users_packet(&room())).await;

    let lines = harness.log_lines().await;
    let joins: Vec<_> = lines.iter().filter(|l| l.starts_with("[Join]")).collect();
    assert_eq!(joins.len(), 3);

    let chat_kinds: Vec<ChatKind> = harness
        .drain_notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Chat(event) => Some(event.kind),
            _ => None,
        })
        .collect();
    assert!(chat_kinds.iter().all(|k| *k == ChatKind::Join));
    assert_eq!(chat_kinds.len(), 3);
}

#[tokio::test]
async fn test_room_enter_publishes_empty_list() {
    let mut harness = harness_in_room().await;
    assert_eq!(harness.session.load_users().await.len(), 3);
    harness.drain_notifications();

    harness
        .intercept(Packet::incoming(Incoming::RoomReady))
        .await;

    let lists: Vec<Vec<String>> = harness
        .drain_notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::UsersUpdated(names) => Some(names),
            _ => None,
        })
        .collect();
    assert_eq!(lists, vec![Vec::<String>::new()]);
    assert!(harness.session.load_users().await.is_empty());
}

#[tokio::test]
async fn test_user_left() {
    let harness = harness_in_room().await;

    harness
        .intercept(Packet::incoming(Incoming::UserLeft).string("2"))
        .await;
    assert!(harness.logged("[Leave] - [bob] Left the room").await);
    assert_eq!(harness.session.load_users().await, vec!["alice", "carol"]);

    // Unparsable and unknown indices change nothing.
    harness
        .intercept(Packet::incoming(Incoming::UserLeft).string("two"))
        .await;
    harness
        .intercept(Packet::incoming(Incoming::UserLeft).string("77"))
        .await;
    assert_eq!(harness.session.load_users().await.len(), 2);
}

#[tokio::test]
async fn test_chat_from_unknown_index() {
    let mut harness = harness_in_room().await;
    harness.drain_notifications();

    harness.say(55, "hi").await;

    let events: Vec<_> = harness
        .drain_notifications()
        .into_iter()
        .filter_map(|n| match n {
            Notification::Chat(event) => Some(event),
            _ => None,
        })
        .collect();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].username, "Unknown");
    assert_eq!(events[0].user_id, 55);
    assert_eq!(events[0].kind, ChatKind::Chat);
}

#[tokio::test]
async fn test_malformed_packets_are_dropped() {
    let harness = harness_in_room().await;

    let truncated = Packet::incoming(Incoming::Chat).int(2);
    assert_eq!(harness.intercept(truncated).await, Verdict::Forward);

    let bad_users = Packet::incoming(Incoming::Users).int(1).string("oops");
    assert_eq!(harness.intercept(bad_users).await, Verdict::Forward);
    assert_eq!(harness.session.load_users().await.len(), 3);
}

// ============================================================================
// Follow
// ============================================================================

#[tokio::test]
async fn test_follow_moves_with_target() {
    let harness = harness_in_room().await;
    harness.session.follow_user("alice").await;

    harness.session.handle(moved("bob", 1, 1)).await;
    assert_nothing_sent(&harness);

    harness.session.handle(moved("alice", 4, 7)).await;
    assert_sent(&harness, &OutboundPacket::move_to(4, 7));

    harness.type_chat(":followoff").await;
    harness.session.handle(moved("alice", 5, 7)).await;
    assert_eq!(harness.sent().len(), 1);

    harness.type_chat(":followon").await;
    harness.session.handle(moved("alice", 70_000, 7)).await;
    assert_eq!(harness.sent().len(), 1);
}

#[tokio::test]
async fn test_no_target_no_move() {
    let harness = harness_in_room().await;
    harness.session.handle(moved("", 1, 1)).await;
    harness.session.handle(moved("alice", 1, 1)).await;
    assert_nothing_sent(&harness);
}

// ============================================================================
// Presets
// ============================================================================

#[tokio::test]
async fn test_save_and_apply_preset() {
    let harness = harness_in_room().await;

    assert!(
        harness
            .session
            .save_outfit_from_username("bob", "bobs look")
            .await
    );
    assert!(harness.logged("Outfit saved successfully: bobs look").await);
    assert_eq!(harness.session.outfit_names().await, vec!["bobs look"]);

    assert!(harness.session.apply_outfit("bobs look").await);
    assert_eq!(
        harness.sent(),
        vec![OutboundPacket::update_figure("@l@D@Yhd-180@E@AF@JH@AH@R@@")]
    );
    assert!(harness.logged("Outfit applied: bobs look").await);

    let raw = harness.store.contents().await.unwrap();
    assert!(raw.contains("\"outfits\""));
}

#[tokio::test]
async fn test_apply_missing_preset() {
    let harness = harness_in_room().await;

    assert!(!harness.session.apply_outfit("nope").await);
    assert!(harness.logged("Outfit not found: nope").await);
    assert_nothing_sent(&harness);
}

#[tokio::test]
async fn test_save_from_unknown_user() {
    let harness = harness_in_room().await;
    assert!(!harness.session.save_outfit_from_username("zed", "x").await);
    assert!(harness.session.outfit_names().await.is_empty());
    assert_eq!(harness.store.contents().await, None);
}

#[tokio::test]
async fn test_corrupt_preset_file_reads_empty() {
    let harness = TestHarness::with_store(
        SessionConfig::default(),
        MemoryOutfitStore::with_contents("{\"outfits\": [oops"),
    );

    assert!(harness.session.outfit_names().await.is_empty());
    assert!(harness.logged("Error decoding outfit save-file").await);

    // Saving replaces the broken document.
    assert!(harness.session.save_outfit("fresh", "fig").await);
    assert_eq!(harness.session.outfit_names().await, vec!["fresh"]);
}

#[tokio::test]
async fn test_load_outfit() {
    let harness = TestHarness::with_store(
        SessionConfig::default(),
        MemoryOutfitStore::with_contents(r#"{"outfits": {"party": {"figure": "f-1"}}}"#),
    );

    let outfit = harness.session.load_outfit("party").await.unwrap();
    assert_eq!(outfit.figure, "f-1");
    assert!(harness.session.load_outfit("work").await.is_none());
}

// ============================================================================
// Mute, room reload, lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_muted_packet_starts_countdown() {
    let harness = harness_in_room().await;

    harness
        .intercept(Packet::incoming(Incoming::Muted).int(2))
        .await;
    assert_eq!(harness.session.status().await.mute.remaining_seconds, 2);

    harness
        .intercept(Packet::incoming(Incoming::StillMuted).int(2))
        .await;

    sleep(Duration::from_millis(2500)).await;
    assert!(!harness.session.mute().is_muted().await);
}

#[tokio::test]
async fn test_profile_update_reloads_known_room() {
    let harness = harness_in_room().await;

    harness.session.handle(profile_updated()).await;
    assert_nothing_sent(&harness);

    let flat_info = Packet::outgoing(Outgoing::GetFlatInfo).bytes(b"1234".to_vec());
    assert_eq!(harness.intercept(flat_info).await, Verdict::Forward);

    harness.session.handle(profile_updated()).await;
    assert_eq!(harness.sent(), vec![OutboundPacket::go_to_flat(b"1234".to_vec())]);

    let status = harness.session.status().await;
    assert_eq!(status.room_id.as_deref(), Some("1234"));
    assert_eq!(status.own_name.as_deref(), Some("me"));
}

#[tokio::test]
async fn test_room_reload_keeps_raw_room_id_bytes() {
    let harness = harness_in_room().await;
    let room_id = vec![0xff, 0x31, 0x32];

    let flat_info = Packet::outgoing(Outgoing::GetFlatInfo).bytes(room_id.clone());
    harness.intercept(flat_info).await;
    harness.session.handle(profile_updated()).await;

    assert_eq!(harness.sent(), vec![OutboundPacket::go_to_flat(room_id)]);
    assert_eq!(
        harness.session.status().await.room_id.as_deref(),
        Some("\u{fffd}12")
    );
}

#[tokio::test]
async fn test_lifecycle_events_have_no_verdict() {
    let harness = TestHarness::new();
    assert_eq!(
        harness
            .session
            .handle(TransportEvent::Initialized { connected: true })
            .await,
        None
    );
    assert_eq!(harness.session.handle(TransportEvent::Disconnected).await, None);
}

#[tokio::test]
async fn test_send_failure_is_not_fatal() {
    let harness = harness_in_room().await;
    harness.transport.close();

    assert!(!harness.session.copy_outfit("alice").await);
    assert!(!harness.logged("Copied outfit").await);
}

#[tokio::test]
async fn test_status_reflects_toggles() {
    let harness = harness_in_room().await;
    let status = harness.session.status().await;
    assert!(status.mimic_enabled && status.follow_enabled);
    assert_eq!(status.target, None);
    assert_eq!(status.users, 3);

    harness.session.follow_user("bob").await;
    harness.session.follow_off();
    harness.session.mimic_off().await;

    let status = harness.session.status().await;
    assert_eq!(status.target.as_deref(), Some("bob"));
    assert!(!status.mimic_enabled);
    assert!(!status.follow_enabled);
}

#[tokio::test]
async fn test_run_consumes_stream_until_end() {
    let harness = TestHarness::new();
    let users = room();
    harness.room.upsert(users.iter().map(entity)).await;

    let events = vec![
        TransportEvent::Connected {
            host: "game.example".into(),
            port: 30000,
            client: ClientInfo {
                identifier: "flash".into(),
                version: "1".into(),
            },
        },
        TransportEvent::Intercept(Intercept::new(Packet::incoming(Incoming::RoomReady))),
        TransportEvent::Intercept(Intercept::new(users_packet(&users))),
        TransportEvent::Intercept(Intercept::new(
            Packet::outgoing(Outgoing::Chat).string(":copy alice"),
        )),
    ];

    harness.session.run(futures::stream::iter(events)).await;

    assert_eq!(harness.session.load_users().await.len(), 3);
    assert_eq!(
        harness.sent(),
        vec![OutboundPacket::update_figure("@l@D@Yxyz@E@AM@JH@AH@R@@")]
    );
    assert_eq!(harness.room.entities().await.len(), 3);
}
