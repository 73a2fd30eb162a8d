//! Concurrency tests: many endpoints joining one channel at once.
//!
//! Whatever order the joins land in, every pair of members must be told
//! exactly once which side offers, and membership must stay consistent.
//!
//! Verification command: `cargo test --test concurrent_joins`

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;

use meshcall_proto::codec;
use meshcall_proto::signal::{ClientEvent, PeerId, ServerEvent};
use meshcall_relay::registry::Registry;
use meshcall_relay::relay::start_server;

const ENDPOINTS: usize = 16;

/// Checks that the collected `addPeer` events describe every unordered pair
/// exactly once from each side, with exactly one offerer per pair.
fn assert_one_offerer_per_pair(ids: &[PeerId], received: &HashMap<PeerId, Vec<ServerEvent>>) {
    // (receiver, peer) -> should_create_offer
    let mut told: HashMap<(PeerId, PeerId), bool> = HashMap::new();
    for (receiver, events) in received {
        for event in events {
            if let ServerEvent::AddPeer {
                peer_id,
                should_create_offer,
            } = event
            {
                let previous = told.insert((receiver.clone(), peer_id.clone()), *should_create_offer);
                assert!(previous.is_none(), "{receiver} told about {peer_id} twice");
            }
        }
    }

    for (i, a) in ids.iter().enumerate() {
        for b in &ids[i + 1..] {
            let a_offers = told
                .get(&(a.clone(), b.clone()))
                .unwrap_or_else(|| panic!("{a} never told about {b}"));
            let b_offers = told
                .get(&(b.clone(), a.clone()))
                .unwrap_or_else(|| panic!("{b} never told about {a}"));
            assert!(
                a_offers ^ b_offers,
                "pair {a}/{b} must have exactly one offerer"
            );
        }
    }
    assert_eq!(told.len(), ids.len() * (ids.len() - 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registry_joins_pick_one_offerer_per_pair() {
    let registry = Arc::new(Registry::new());
    let mut receivers = Vec::new();
    for _ in 0..ENDPOINTS {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.connect(tx);
        receivers.push((id, rx));
    }

    let joins: Vec<_> = receivers
        .iter()
        .map(|(id, _)| {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            tokio::spawn(async move { registry.join(&id, "lobby", &Value::Null) })
        })
        .collect();
    let mut prior_counts = Vec::new();
    for join in joins {
        prior_counts.push(join.await.unwrap().unwrap());
    }

    // Serialized joins see 0, 1, .., n-1 prior members in some order.
    prior_counts.sort_unstable();
    assert_eq!(prior_counts, (0..ENDPOINTS).collect::<Vec<_>>());

    let ids: Vec<PeerId> = receivers.iter().map(|(id, _)| id.clone()).collect();
    let mut received = HashMap::new();
    for (id, rx) in &mut receivers {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if !matches!(event, ServerEvent::Connected { .. }) {
                events.push(event);
            }
        }
        received.insert(id.clone(), events);
    }

    assert_one_offerer_per_pair(&ids, &received);
    assert!(registry.is_consistent());
    assert_eq!(registry.members("lobby").map(|m| m.len()), Some(ENDPOINTS));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_and_disconnects_stay_consistent() {
    let registry = Arc::new(Registry::new());
    let mut handles = Vec::new();

    for i in 0..ENDPOINTS {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            let (tx, _rx) = mpsc::unbounded_channel();
            let id = registry.connect(tx);
            registry.join(&id, "lobby", &Value::Null).unwrap();
            if i % 2 == 0 {
                registry.join(&id, "side", &Value::Null).unwrap();
            }
            tokio::task::yield_now().await;
            if i % 3 == 0 {
                registry.disconnect(&id);
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(registry.is_consistent());
    let expected_left = (0..ENDPOINTS).filter(|i| i % 3 != 0).count();
    assert_eq!(registry.endpoint_count(), expected_left);
    assert_eq!(
        registry.members("lobby").map(|m| m.len()),
        Some(expected_left)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_websocket_joins_pick_one_offerer_per_pair() {
    const CLIENTS: usize = 6;
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay");
    let url = format!("ws://{addr}/ws");

    let mut clients = Vec::new();
    for _ in 0..CLIENTS {
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();
        let first = ws.next().await.unwrap().unwrap();
        let id = match codec::decode_server(first.to_text().unwrap()).unwrap() {
            ServerEvent::Connected { peer_id } => peer_id,
            other => panic!("expected connected, got {other:?}"),
        };
        clients.push((id, ws));
    }

    let ids: Vec<PeerId> = clients.iter().map(|(id, _)| id.clone()).collect();
    let tasks: Vec<_> = clients
        .into_iter()
        .map(|(id, mut ws)| {
            tokio::spawn(async move {
                let join = ClientEvent::Join {
                    channel: "lobby".into(),
                    userdata: Value::Null,
                };
                let text = codec::encode_client(&join).unwrap();
                ws.send(tungstenite::Message::Text(text.into()))
                    .await
                    .unwrap();

                // Each client hears about every other one exactly once.
                let mut events = Vec::new();
                while events.len() < CLIENTS - 1 {
                    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
                        .await
                        .expect("recv timed out")
                        .unwrap()
                        .unwrap();
                    if let tungstenite::Message::Text(text) = msg {
                        events.push(codec::decode_server(text.as_str()).unwrap());
                    }
                }
                (id, events)
            })
        })
        .collect();

    let mut received = HashMap::new();
    for task in tasks {
        let (id, events) = task.await.unwrap();
        received.insert(id, events);
    }

    let senders: HashSet<&PeerId> = received.keys().collect();
    assert_eq!(senders.len(), CLIENTS);
    assert_one_offerer_per_pair(&ids, &received);
}
