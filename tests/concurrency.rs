//! Concurrency tests: replay/live boundary, ordering, isolation, and
//! memory pressure.

use crossbeam_channel::{unbounded, Receiver, Sender};
use herald::{
    CloseReason, DisconnectHandle, Frame, HubConfig, NotificationHub, NotificationPayload, RecipientId,
    RetentionPolicy, Sequence, SessionConfig, SessionOutcome, StreamSession, Transport,
    TransportError,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

struct ChannelTransport(Sender<Frame>);

impl Transport for ChannelTransport {
    fn send(&mut self, frame: &Frame) -> Result<(), TransportError> {
        self.0.send(frame.clone()).map_err(|_| TransportError::Closed)
    }
}

fn spawn(session: StreamSession) -> (Receiver<Frame>, DisconnectHandle, JoinHandle<SessionOutcome>) {
    let (tx, rx) = unbounded();
    let disconnect = session.disconnect_handle();
    let worker = thread::spawn(move || session.run(&mut ChannelTransport(tx)));
    (rx, disconnect, worker)
}

/// Collect notification sequences until `last` arrives.
fn collect_until(frames: &Receiver<Frame>, last: u64) -> Vec<u64> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut seen = Vec::new();
    while seen.last() != Some(&last) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match frames.recv_timeout(remaining) {
            Ok(Frame::Notification(event)) => seen.push(event.sequence.0),
            Ok(_) => {}
            Err(_) => panic!("timed out after {:?}", seen),
        }
    }
    seen
}

fn test_hub(config: HubConfig, members: &[&str]) -> Arc<NotificationHub> {
    let (hub, directory) = NotificationHub::in_memory(config).unwrap();
    for member in members {
        directory.insert(RecipientId::new(*member));
    }
    Arc::new(hub)
}

#[test]
fn test_connect_during_publish_delivers_exactly_once() {
    const EVENTS: u64 = 200;

    for round in 0..20 {
        let hub = test_hub(HubConfig::default(), &["alice"]);
        let alice = RecipientId::new("alice");

        let producer = {
            let hub = Arc::clone(&hub);
            let alice = alice.clone();
            thread::spawn(move || {
                for i in 1..=EVENTS {
                    hub.publish(&alice, NotificationPayload::system(format!("n{}", i)))
                        .unwrap();
                }
            })
        };

        // Land the connect somewhere inside the publish run.
        for _ in 0..round * 10 {
            thread::yield_now();
        }
        let (frames, disconnect, worker) = spawn(hub.connect(&alice, None).unwrap());

        producer.join().unwrap();
        let seen = collect_until(&frames, EVENTS);
        assert_eq!(seen, (1..=EVENTS).collect::<Vec<_>>(), "round {}", round);

        disconnect.disconnect();
        worker.join().unwrap();
    }
}

#[test]
fn test_concurrent_producers_keep_total_order() {
    const PRODUCERS: u64 = 4;
    const PER_PRODUCER: u64 = 50;

    let hub = test_hub(HubConfig::default(), &["alice"]);
    let alice = RecipientId::new("alice");
    let (frames, disconnect, worker) = spawn(hub.connect(&alice, None).unwrap());

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let hub = Arc::clone(&hub);
            let alice = alice.clone();
            thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    hub.publish(&alice, NotificationPayload::new_answer(p, i, "answer"))
                        .unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let total = PRODUCERS * PER_PRODUCER;
    let seen = collect_until(&frames, total);
    assert_eq!(seen, (1..=total).collect::<Vec<_>>());

    disconnect.disconnect();
    let outcome = worker.join().unwrap();
    assert_eq!(outcome.cursor, Some(Sequence(total)));
}

#[test]
fn test_stalled_session_does_not_affect_others() {
    let config = HubConfig {
        session: SessionConfig {
            buffer_size: 4,
            ..Default::default()
        },
        ..Default::default()
    };
    let hub = test_hub(config, &["alice", "bob"]);
    let alice = RecipientId::new("alice");
    let bob = RecipientId::new("bob");

    // Alice's stream is registered but nobody drains it.
    let stalled = hub.connect(&alice, None).unwrap();
    let (bob_frames, bob_disconnect, bob_worker) = spawn(hub.connect(&bob, None).unwrap());

    let started = Instant::now();
    let mut dropped = 0;
    for i in 1..=100u64 {
        dropped += hub
            .publish(&alice, NotificationPayload::system(format!("a{}", i)))
            .unwrap()
            .fan_out
            .dropped;
        hub.publish(&bob, NotificationPayload::system(format!("b{}", i)))
            .unwrap();
    }
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(dropped, 1);
    assert_eq!(hub.session_count(&alice), 0);

    assert_eq!(collect_until(&bob_frames, 100).len(), 100);
    bob_disconnect.disconnect();
    bob_worker.join().unwrap();

    // Its client is long gone; running it just closes it.
    let outcome = stalled.run(&mut ChannelTransport(unbounded().0));
    assert_eq!(outcome.reason, CloseReason::ClientDisconnected);

    // Nothing was lost: the log still has every event after its cursor.
    let batch = hub.replay_after(&alice, Some(Sequence(4))).unwrap();
    assert!(!batch.truncated);
    assert_eq!(batch.events.len(), 96);
}

#[test]
fn test_overflowed_session_reports_buffer_overflow() {
    let config = HubConfig {
        session: SessionConfig {
            buffer_size: 2,
            ..Default::default()
        },
        ..Default::default()
    };
    let hub = test_hub(config, &["alice"]);
    let alice = RecipientId::new("alice");

    let stalled = hub.connect(&alice, None).unwrap();
    for i in 1..=3 {
        hub.publish(&alice, NotificationPayload::system(format!("{}", i)))
            .unwrap();
    }

    let (tx, frames) = unbounded();
    let outcome = stalled.run(&mut ChannelTransport(tx));
    assert_eq!(outcome.reason, CloseReason::BufferOverflow);
    assert_eq!(outcome.cursor, Some(Sequence(2)));

    let delivered: Vec<u64> = frames.try_iter().filter_map(|f| f.sequence()).map(|s| s.0).collect();
    assert_eq!(delivered, vec![1, 2]);

    // Reconnecting from the cursor picks up the rest.
    let batch = hub.replay_after(&alice, outcome.cursor).unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.events[0].sequence, Sequence(3));
}

#[test]
fn test_memory_pressure_never_reuses_sequences() {
    let config = HubConfig {
        retention: RetentionPolicy::count(8),
        max_recipients: Some(2),
        ..Default::default()
    };
    let hub = test_hub(config, &["a", "b", "c"]);
    let (a, b, c) = (RecipientId::new("a"), RecipientId::new("b"), RecipientId::new("c"));

    hub.publish(&a, NotificationPayload::system("a1")).unwrap();
    hub.publish(&b, NotificationPayload::system("b1")).unwrap();
    hub.publish(&c, NotificationPayload::system("c1")).unwrap();

    // a's log was evicted; its history is gone but its head is kept.
    assert_eq!(hub.latest_sequence(&a), Sequence(1));
    let batch = hub.replay_after(&a, Some(Sequence(0))).unwrap();
    assert!(batch.truncated);
    assert!(batch.events.is_empty());

    let next = hub.publish(&a, NotificationPayload::system("a2")).unwrap();
    assert_eq!(next.sequence(), Sequence(2));
}
