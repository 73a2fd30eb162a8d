//! End-to-end peering over a real relay with the loopback negotiation stack.
//!
//! Each participant runs [`drive`] with its own [`LoopbackFactory`]; the
//! tests watch the application events and the recorded stack calls.
//!
//! Verification command: `cargo test --test peering_mesh`

use std::collections::HashSet;
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, oneshot};

use meshcall::config::{ClientConfig, MediaConfig};
use meshcall::negotiation::loopback::LoopbackFactory;
use meshcall::peering::{PeeringEvent, drive, drive_with_config};
use meshcall::signaling::{SignalingClient, SignalingError};
use meshcall_proto::signal::{PeerId, SdpType};
use meshcall_relay::relay::start_server;

// =============================================================================
// Helpers
// =============================================================================

struct Participant {
    id: PeerId,
    factory: LoopbackFactory,
    events: mpsc::UnboundedReceiver<PeeringEvent>,
    shutdown: Option<oneshot::Sender<()>>,
    task: tokio::task::JoinHandle<Result<(), SignalingError>>,
}

impl Participant {
    async fn join(url: &str, label: &str, channel: &str) -> Self {
        let signaling = SignalingClient::connect(url, Duration::from_secs(5))
            .await
            .expect("connect to relay");
        let id = signaling.local_id().clone();
        let factory = LoopbackFactory::new(label);
        let (events_tx, events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn({
            let factory = factory.clone();
            let channel = channel.to_string();
            async move {
                drive(
                    signaling,
                    factory,
                    &channel,
                    json!({"name": "test"}),
                    &MediaConfig::default(),
                    events_tx,
                    async move {
                        let _ = shutdown_rx.await;
                    },
                )
                .await
            }
        });

        Self {
            id,
            factory,
            events,
            shutdown: Some(shutdown_tx),
            task,
        }
    }

    /// Waits until `pred` matches an event, returning it.
    async fn wait_for(&mut self, pred: impl Fn(&PeeringEvent) -> bool) -> PeeringEvent {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.expect("event stream ended");
                if pred(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("timed out waiting for peering event")
    }

    /// Collects the peers this participant reports as connected until
    /// `expected` have connected.
    async fn wait_connected(&mut self, expected: &[&PeerId]) {
        let mut connected = HashSet::new();
        while connected.len() < expected.len() {
            if let PeeringEvent::PeerConnected { peer_id } = self
                .wait_for(|e| matches!(e, PeeringEvent::PeerConnected { .. }))
                .await
            {
                connected.insert(peer_id);
            }
        }
        let expected: HashSet<PeerId> = expected.iter().map(|p| (*p).clone()).collect();
        assert_eq!(connected, expected);
    }

    async fn leave(mut self) -> Result<(), SignalingError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("driver did not stop")
            .expect("driver panicked")
    }
}

async fn start_relay() -> String {
    let (addr, _handle) = start_server("127.0.0.1:0")
        .await
        .expect("failed to start test relay");
    format!("ws://{addr}/ws")
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn two_participants_connect() {
    let url = start_relay().await;
    let mut alice = Participant::join(&url, "alice", "room").await;
    settle().await;
    let mut bob = Participant::join(&url, "bob", "room").await;

    let added = alice
        .wait_for(|e| matches!(e, PeeringEvent::PeerAdded { .. }))
        .await;
    assert_eq!(
        added,
        PeeringEvent::PeerAdded {
            peer_id: bob.id.clone(),
            should_create_offer: false,
        }
    );

    alice.wait_connected(&[&bob.id]).await;
    bob.wait_connected(&[&alice.id]).await;

    // The later joiner offered, the earlier one answered.
    let at_alice = alice.factory.record(&bob.id).unwrap();
    assert_eq!(at_alice.remote_description.unwrap().kind, SdpType::Offer);
    assert_eq!(at_alice.local_description.unwrap().kind, SdpType::Answer);

    let at_bob = bob.factory.record(&alice.id).unwrap();
    assert_eq!(at_bob.remote_description.unwrap().kind, SdpType::Answer);

    alice.leave().await.unwrap();
    bob.leave().await.unwrap();
}

#[tokio::test]
async fn three_participants_form_a_full_mesh() {
    let url = start_relay().await;
    let mut a = Participant::join(&url, "a", "mesh").await;
    settle().await;
    let mut b = Participant::join(&url, "b", "mesh").await;
    settle().await;
    let mut c = Participant::join(&url, "c", "mesh").await;

    a.wait_connected(&[&b.id, &c.id]).await;
    b.wait_connected(&[&a.id, &c.id]).await;
    c.wait_connected(&[&a.id, &b.id]).await;

    // Candidates gathered on each side reached the other.
    settle().await;
    for (local, remote) in [(&a, &b), (&a, &c), (&b, &c), (&c, &a)] {
        let record = local.factory.record(&remote.id).unwrap();
        assert!(
            !record.remote_candidates.is_empty(),
            "no candidates from {} at {}",
            remote.id,
            local.id
        );
    }

    // One participant leaves; the others drop it.
    let c_id = c.id.clone();
    c.leave().await.unwrap();
    for p in [&mut a, &mut b] {
        let removed = p
            .wait_for(|e| matches!(e, PeeringEvent::PeerRemoved { .. }))
            .await;
        assert_eq!(
            removed,
            PeeringEvent::PeerRemoved {
                peer_id: c_id.clone()
            }
        );
        assert!(p.factory.record(&c_id).unwrap().closed);
    }

    a.leave().await.unwrap();
    b.leave().await.unwrap();
}

#[tokio::test]
async fn leaving_closes_every_local_session() {
    let url = start_relay().await;
    let mut a = Participant::join(&url, "a", "room").await;
    settle().await;
    let mut b = Participant::join(&url, "b", "room").await;
    a.wait_connected(&[&b.id]).await;
    b.wait_connected(&[&a.id]).await;

    let factory = a.factory.clone();
    let b_id = b.id.clone();
    a.leave().await.unwrap();
    assert!(factory.record(&b_id).unwrap().closed);

    b.leave().await.unwrap();
}

#[tokio::test]
async fn drive_with_config_uses_configured_channel_and_media() {
    let url = start_relay().await;
    let config = ClientConfig::from_toml_str(&format!(
        "[signaling]\nserver_url = \"{url}\"\nchannel = \"configured\"\nconnect_timeout_secs = 5\n\
         [media]\nuse_video = false\nice_servers = [\"turn:turn.example.org:3478\"]\n"
    ))
    .unwrap();

    let config_media = config.media.clone();
    let factory = LoopbackFactory::new("configured");
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let task = tokio::spawn({
        let factory = factory.clone();
        async move {
            drive_with_config(&config, factory, events_tx, async move {
                let _ = shutdown_rx.await;
            })
            .await
        }
    });
    settle().await;

    let mut other = Participant::join(&url, "other", "configured").await;
    let added = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert_eq!(
        added,
        Some(PeeringEvent::PeerAdded {
            peer_id: other.id.clone(),
            should_create_offer: false,
        })
    );
    let connected = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap();
    assert_eq!(
        connected,
        Some(PeeringEvent::PeerConnected {
            peer_id: other.id.clone()
        })
    );
    assert_eq!(factory.peers(), vec![other.id.clone()]);
    let media = factory.record(&other.id).unwrap().media;
    assert_eq!(media, config_media);
    assert_eq!(media.ice_servers, vec!["turn:turn.example.org:3478".to_string()]);
    assert!(!media.use_video);
    other
        .wait_for(|e| matches!(e, PeeringEvent::PeerConnected { .. }))
        .await;

    let _ = shutdown_tx.send(());
    task.await.unwrap().unwrap();
    other.leave().await.unwrap();
}

#[tokio::test]
async fn drive_with_config_reports_unreachable_relay() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let config = ClientConfig::from_toml_str(&format!(
        "[signaling]\nserver_url = \"ws://{addr}/ws\"\nconnect_timeout_secs = 2\n"
    ))
    .unwrap();
    let (events_tx, _events) = mpsc::unbounded_channel();
    let result =
        drive_with_config(&config, LoopbackFactory::new("x"), events_tx, async {}).await;
    assert!(matches!(result, Err(SignalingError::Transport(_))));
}
