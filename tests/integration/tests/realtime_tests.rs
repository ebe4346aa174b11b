//! Realtime scenarios over the in-process hub
//!
//! Run with: cargo test -p integration-tests --test realtime_tests

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chat_core::{MessageStatus, RealtimeEvent, Snowflake, UserStatus};
use chat_realtime::{ReactionOp, SubmitOptions};
use integration_tests::{settle, TestConnection, TestHub, ALICE, BOB, CAROL, GRACE, TYPING_TIMEOUT};

fn received_sequences(conn: &mut TestConnection) -> Vec<u64> {
    conn.drain()
        .iter()
        .filter_map(|e| match e.as_ref() {
            RealtimeEvent::ReceiveMessage(m) => Some(m.sequence),
            _ => None,
        })
        .collect()
}

fn presence_flips(events: &[Arc<RealtimeEvent>], status: UserStatus) -> usize {
    events
        .iter()
        .filter(|e| matches!(e.as_ref(), RealtimeEvent::PresenceChanged(p) if p.user_id == ALICE && p.status == status))
        .count()
}

fn typing_flags_of(events: &[Arc<RealtimeEvent>], user: Snowflake) -> Vec<bool> {
    events
        .iter()
        .filter_map(|e| match e.as_ref() {
            RealtimeEvent::UserTyping(typing) if typing.user_id == user => Some(typing.is_typing),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Ordering and self-echo
// ============================================================================

#[tokio::test]
async fn messages_fan_out_in_room_order_without_self_echo() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let mut alice_phone = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    settle().await;
    alice.drain();
    alice_phone.drain();
    bob.drain();

    for i in 1..=5 {
        let message = t
            .hub
            .send_message(&alice.id, room.id, format!("message {i}"), SubmitOptions::default())
            .await?;
        assert_eq!(message.sequence, i);
    }
    settle().await;

    assert_eq!(received_sequences(&mut bob), vec![1, 2, 3, 4, 5]);
    // The sender's other device stays in sync; the sending socket gets its ack directly
    assert_eq!(received_sequences(&mut alice_phone), vec![1, 2, 3, 4, 5]);
    assert!(received_sequences(&mut alice).is_empty());
    Ok(())
}

#[tokio::test]
async fn concurrent_senders_share_one_room_order() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;
    let mut carol = t.connect_to(CAROL, room.id).await;
    settle().await;
    carol.drain();

    let mut tasks = Vec::new();
    for conn in [alice.id.clone(), bob.id.clone()] {
        let hub = Arc::clone(&t.hub);
        let room_id = room.id;
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                hub.send_message(&conn, room_id, format!("{conn} #{i}"), SubmitOptions::default())
                    .await
                    .map(|_| ())?;
            }
            Ok::<_, chat_core::DomainError>(())
        }));
    }
    for task in tasks {
        task.await??;
    }
    settle().await;

    let seen = received_sequences(&mut carol);
    assert_eq!(seen, (1..=20).collect::<Vec<u64>>());
    Ok(())
}

// ============================================================================
// Receipts
// ============================================================================

#[tokio::test]
async fn fan_out_records_delivery_and_read_notifies_author() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;

    let sent = t
        .hub
        .send_message(&alice.id, room.id, "ping".to_string(), SubmitOptions::default())
        .await?;

    let mut delivered = false;
    for _ in 0..50 {
        let message = t.hub.pipeline().message(sent.id).await?;
        if message.delivered_to.iter().any(|d| d.user_id == BOB) {
            assert_eq!(message.status, MessageStatus::Delivered);
            delivered = true;
            break;
        }
        settle().await;
    }
    assert!(delivered, "delivery to bob was never recorded");

    assert!(t.hub.mark_read(&bob.id, sent.id).await?);
    assert!(!t.hub.mark_read(&bob.id, sent.id).await?);

    let event = alice.next_named("messageRead").await?;
    let RealtimeEvent::MessageRead(read) = event.as_ref() else {
        panic!("expected messageRead");
    };
    assert_eq!(read.user_id, BOB);
    assert_eq!(read.message_id, sent.id);
    Ok(())
}

#[tokio::test]
async fn reading_backfills_delivery_for_offline_member() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let carol = t.connect_to(CAROL, room.id).await;
    t.hub.disconnect(&carol.id).await;

    let sent = t
        .hub
        .send_message(&alice.id, room.id, "while you were out".to_string(), SubmitOptions::default())
        .await?;
    settle().await;
    let message = t.hub.pipeline().message(sent.id).await?;
    assert!(message.delivered_to.iter().all(|d| d.user_id != CAROL));

    // Back online on a new connection, still a member of the room
    let carol = t.connect(CAROL).await;
    assert!(t.hub.mark_read(&carol.id, sent.id).await?);

    let message = t.hub.pipeline().message(sent.id).await?;
    assert!(message.read_by.iter().any(|r| r.user_id == CAROL));
    assert!(message.delivered_to.iter().any(|d| d.user_id == CAROL));
    Ok(())
}

// ============================================================================
// Capacity, rate limits and failures
// ============================================================================

#[tokio::test]
async fn full_room_rejects_join() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("tiny", 2).await;
    let _alice = t.connect_to(ALICE, room.id).await;
    let _bob = t.connect_to(BOB, room.id).await;

    let carol = t.connect(CAROL).await;
    let err = t.hub.join_room(&carol.id, room.id).await.unwrap_err();
    assert!(err.is_capacity());
    assert!(t.hub.registry().rooms_for_connection(&carol.id).is_empty());
    Ok(())
}

#[tokio::test]
async fn sender_is_throttled_after_budget() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;

    for i in 0..20 {
        t.hub
            .send_message(&alice.id, room.id, format!("burst {i}"), SubmitOptions::default())
            .await?;
    }
    let err = t
        .hub
        .send_message(&alice.id, room.id, "one too many".to_string(), SubmitOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_rate_limited());
    assert_eq!(t.messages.len(), 20);
    Ok(())
}

#[tokio::test]
async fn failed_persistence_is_surfaced_and_keeps_sequence() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    settle().await;
    bob.drain();

    t.messages.fail_next_writes(2);
    let err = t
        .hub
        .send_message(&alice.id, room.id, "lost?".to_string(), SubmitOptions::default())
        .await
        .unwrap_err();
    let failed = err.failed_message().expect("failed message is returned");
    assert_eq!(failed.status, MessageStatus::Failed);
    assert_eq!(failed.sequence, 0);
    assert_eq!(failed.content, "lost?");

    let next = t
        .hub
        .send_message(&alice.id, room.id, "retry".to_string(), SubmitOptions::default())
        .await?;
    assert_eq!(next.sequence, 1);

    settle().await;
    assert_eq!(received_sequences(&mut bob), vec![1]);
    Ok(())
}

#[tokio::test]
async fn invalid_content_never_reaches_the_room() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    settle().await;
    bob.drain();

    let too_long = "x".repeat(t.hub.config().max_message_length + 1);
    for content in ["   ".to_string(), too_long] {
        let err = t
            .hub
            .send_message(&alice.id, room.id, content, SubmitOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }

    settle().await;
    assert!(bob.drain().is_empty());
    assert!(t.messages.is_empty());
    Ok(())
}

// ============================================================================
// Presence and typing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;
    settle().await;
    alice.drain();

    assert!(t.hub.typing(&bob.id, room.id, true)?);
    settle().await;
    let started = typing_flags_of(&alice.drain(), BOB);
    assert_eq!(started, vec![true]);

    tokio::time::sleep(TYPING_TIMEOUT + Duration::from_millis(100)).await;
    settle().await;
    let stopped = typing_flags_of(&alice.drain(), BOB);
    assert_eq!(stopped, vec![false]);
    assert!(!t.hub.presence().is_typing(BOB, room.id));
    Ok(())
}

#[tokio::test]
async fn typing_cleared_on_leave() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;
    settle().await;
    alice.drain();

    assert!(t.hub.typing(&bob.id, room.id, true)?);
    t.hub.leave_room(&bob.id, room.id).await?;
    assert!(!t.hub.presence().is_typing(BOB, room.id));

    settle().await;
    assert_eq!(typing_flags_of(&alice.drain(), BOB), vec![true, false]);
    Ok(())
}

#[tokio::test]
async fn typing_cleared_on_send() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;
    settle().await;
    alice.drain();

    assert!(t.hub.typing(&bob.id, room.id, true)?);
    t.hub
        .send_message(&bob.id, room.id, "done typing".to_string(), SubmitOptions::default())
        .await?;
    assert!(!t.hub.presence().is_typing(BOB, room.id));

    settle().await;
    let events = alice.drain();
    assert_eq!(typing_flags_of(&events, BOB), vec![true, false]);
    // The stop lands before the message it was cleared by
    let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
    assert_eq!(names, vec!["userTyping", "userTyping", "receiveMessage"]);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn disconnect_goes_offline_once_after_grace() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    settle().await;
    bob.drain();

    t.hub.disconnect(&alice.id).await;
    tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
    assert_eq!(presence_flips(&bob.drain(), UserStatus::Offline), 0);
    assert_eq!(t.hub.presence().presence(ALICE).status, UserStatus::Online);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert_eq!(presence_flips(&bob.drain(), UserStatus::Offline), 1);
    assert_eq!(t.hub.presence().presence(ALICE).status, UserStatus::Offline);
    assert!(t.users.get(ALICE).and_then(|u| u.last_seen).is_some());

    tokio::time::sleep(GRACE * 2).await;
    assert_eq!(presence_flips(&bob.drain(), UserStatus::Offline), 0);
    Ok(())
}

// ============================================================================
// Message lifecycle
// ============================================================================

#[tokio::test]
async fn reactions_broadcast_only_on_change() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let mut alice = t.connect_to(ALICE, room.id).await;
    let bob = t.connect_to(BOB, room.id).await;
    let sent = t
        .hub
        .send_message(&alice.id, room.id, "react to me".to_string(), SubmitOptions::default())
        .await?;
    settle().await;
    alice.drain();

    let state = t.hub.react(&bob.id, sent.id, "👍", ReactionOp::Add).await?;
    assert_eq!(state.reactions.len(), 1);
    assert_eq!(state.reactions[0].count, 1);

    let again = t.hub.react(&bob.id, sent.id, "👍", ReactionOp::Add).await?;
    assert_eq!(again.reactions[0].count, 1);
    settle().await;

    assert_eq!(alice.drain_names(), vec!["reactionUpdated"]);

    let removed = t.hub.react(&bob.id, sent.id, "👍", ReactionOp::Remove).await?;
    assert!(removed.reactions.is_empty());
    Ok(())
}

#[tokio::test]
async fn edits_and_deletes_reach_the_room() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    let sent = t
        .hub
        .send_message(&alice.id, room.id, "typo".to_string(), SubmitOptions::default())
        .await?;

    let err = t
        .hub
        .edit_message(&bob.id, sent.id, "not yours".to_string())
        .await
        .unwrap_err();
    assert!(err.is_authorization());

    t.hub.edit_message(&alice.id, sent.id, "fixed".to_string()).await?;
    let updated = bob.next_named("messageUpdated").await?;
    let RealtimeEvent::MessageUpdated(message) = updated.as_ref() else {
        panic!("expected messageUpdated");
    };
    assert_eq!(message.content, "fixed");

    let deleted = t.hub.delete_message(&alice.id, sent.id).await?;
    assert!(!deleted.purged);
    bob.next_named("messageDeleted").await?;

    let history = t.hub.history(&bob.id, room.id, 50, false).await?;
    assert!(history.messages.is_empty());
    let with_deleted = t.hub.history(&bob.id, room.id, 50, true).await?;
    assert_eq!(with_deleted.messages.len(), 1);
    Ok(())
}

#[tokio::test]
async fn leaving_detaches_every_device() -> Result<()> {
    let t = TestHub::new();
    let room = t.room("general", 10).await;
    let alice = t.connect_to(ALICE, room.id).await;
    let mut alice_phone = t.connect_to(ALICE, room.id).await;
    let mut bob = t.connect_to(BOB, room.id).await;
    settle().await;
    alice_phone.drain();
    bob.drain();

    let left = t.hub.leave_room(&alice.id, room.id).await?;
    assert_eq!(left.user_id, ALICE);
    bob.next_named("leftRoom").await?;

    assert!(!t.hub.membership().is_member(room.id, ALICE).await?);
    assert!(t.hub.registry().rooms_for_connection(&alice_phone.id).is_empty());

    t.hub
        .send_message(&bob.id, room.id, "anyone?".to_string(), SubmitOptions::default())
        .await?;
    settle().await;
    assert!(received_sequences(&mut alice_phone).is_empty());
    Ok(())
}
