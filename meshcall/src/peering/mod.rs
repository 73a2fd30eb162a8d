//! Peering client for full-mesh calls.
//!
//! Reacts to relay events and keeps one [`PeerSession`] per remote peer in
//! the channel. The relay decides who offers: the endpoint told
//! `should_create_offer` drives the handshake, the other side answers.
//!
//! # Peer Lifecycle
//!
//! 1. `addPeer` arrives; the factory creates a connection with the local
//!    media attached and a [`CandidateSink`] for gathered candidates
//! 2. The offerer sends its offer; the answerer waits for it
//! 3. Descriptions and candidates are applied as they arrive
//! 4. `removePeer` (or local disconnect) closes the connection and the
//!    application is told to release anything rendered for the peer

mod driver;
pub mod session;

use std::collections::HashMap;

use meshcall_proto::signal::{
    ClientEvent, IceCandidate, PeerId, SdpType, ServerEvent, SessionDescription,
};
use tokio::sync::mpsc;

use crate::config::MediaConfig;
use crate::negotiation::{CandidateSink, NegotiationError, PeerConnectionFactory};

pub use driver::{drive, drive_with_config};
pub use session::{PeerSession, PeerState};

/// Events emitted by the [`PeeringClient`] for the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeeringEvent {
    /// A session for a new remote peer was created.
    PeerAdded {
        /// Remote peer.
        peer_id: PeerId,
        /// Whether this side is sending the offer.
        should_create_offer: bool,
    },
    /// Both descriptions are applied; media will flow once connectivity is
    /// established.
    PeerConnected {
        /// Remote peer.
        peer_id: PeerId,
    },
    /// The session was closed; rendered output for the peer should go.
    PeerRemoved {
        /// Remote peer.
        peer_id: PeerId,
    },
    /// The negotiation stack failed for this peer.
    NegotiationFailed {
        /// Remote peer.
        peer_id: PeerId,
        /// Human-readable failure.
        reason: String,
    },
}

/// Per-endpoint peering state machine.
///
/// Requests for the relay go out through `outbound`; application
/// notifications through `events`. Both are unbounded so handling an event
/// never waits on a slow consumer.
pub struct PeeringClient<F: PeerConnectionFactory> {
    factory: F,
    media: MediaConfig,
    sessions: HashMap<PeerId, PeerSession<F::Connection>>,
    outbound: mpsc::UnboundedSender<ClientEvent>,
    events: mpsc::UnboundedSender<PeeringEvent>,
}

impl<F: PeerConnectionFactory> PeeringClient<F> {
    /// Creates a client with no sessions and default media settings.
    pub fn new(
        factory: F,
        outbound: mpsc::UnboundedSender<ClientEvent>,
        events: mpsc::UnboundedSender<PeeringEvent>,
    ) -> Self {
        Self {
            factory,
            media: MediaConfig::default(),
            sessions: HashMap::new(),
            outbound,
            events,
        }
    }

    /// Use `media` for every connection created from now on.
    #[must_use]
    pub fn with_media(mut self, media: MediaConfig) -> Self {
        self.media = media;
        self
    }

    /// State of the session with `peer_id`, if any.
    pub fn state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.sessions.get(peer_id).map(PeerSession::state)
    }

    /// Number of live sessions.
    pub fn peer_count(&self) -> usize {
        self.sessions.len()
    }

    /// Remote peers with a session, sorted.
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        peers.sort();
        peers
    }

    /// Apply one event from the relay.
    pub async fn handle(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connected { peer_id } => {
                tracing::debug!(peer_id = %peer_id, "signaling session established");
            }
            ServerEvent::AddPeer {
                peer_id,
                should_create_offer,
            } => self.add_peer(peer_id, should_create_offer).await,
            ServerEvent::SessionDescription {
                peer_id,
                session_description,
            } => self.apply_description(peer_id, session_description).await,
            ServerEvent::IceCandidate {
                peer_id,
                ice_candidate,
            } => self.apply_candidate(&peer_id, ice_candidate).await,
            ServerEvent::RemovePeer { peer_id } => self.remove_peer(&peer_id),
        }
    }

    /// Close every session, as on losing the signaling connection.
    pub fn disconnect(&mut self) {
        let mut peers: Vec<PeerId> = self.sessions.keys().cloned().collect();
        peers.sort();
        for peer_id in peers {
            self.remove_peer(&peer_id);
        }
    }

    async fn add_peer(&mut self, peer_id: PeerId, should_create_offer: bool) {
        if self.sessions.contains_key(&peer_id) {
            tracing::debug!(peer_id = %peer_id, "already connected to peer, ignoring addPeer");
            return;
        }

        let sink = CandidateSink::new(peer_id.clone(), self.outbound.clone());
        let connection = match self.factory.create(&peer_id, &self.media, sink) {
            Ok(connection) => connection,
            Err(e) => {
                self.fail(&peer_id, &e);
                return;
            }
        };
        tracing::info!(peer_id = %peer_id, should_create_offer, "adding peer");
        self.notify(PeeringEvent::PeerAdded {
            peer_id: peer_id.clone(),
            should_create_offer,
        });

        let session = self
            .sessions
            .entry(peer_id.clone())
            .or_insert_with(|| PeerSession::new(connection));
        if !should_create_offer {
            return;
        }

        match session.offer().await {
            Ok(offer) => self.relay_description(&peer_id, offer),
            Err(e) => self.fail(&peer_id, &e),
        }
    }

    async fn apply_description(&mut self, peer_id: PeerId, description: SessionDescription) {
        let Some(session) = self.sessions.get_mut(&peer_id) else {
            tracing::debug!(peer_id = %peer_id, kind = %description.kind, "description for unknown peer, ignoring");
            return;
        };

        let result = match description.kind {
            SdpType::Offer => session.accept_offer(description).await.map(Some),
            SdpType::Answer => session.accept_answer(description).await.map(|()| None),
        };

        match result {
            Ok(answer) => {
                if let Some(answer) = answer {
                    self.relay_description(&peer_id, answer);
                }
                tracing::info!(peer_id = %peer_id, "peer connected");
                self.notify(PeeringEvent::PeerConnected { peer_id });
            }
            Err(e) if e.is_stack_failure() => self.fail(&peer_id, &e),
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, err = %e, "ignoring session description");
            }
        }
    }

    async fn apply_candidate(&mut self, peer_id: &PeerId, candidate: IceCandidate) {
        let Some(session) = self.sessions.get_mut(peer_id) else {
            tracing::debug!(peer_id = %peer_id, "candidate for unknown peer, ignoring");
            return;
        };
        if let Err(e) = session.add_candidate(candidate).await {
            tracing::warn!(peer_id = %peer_id, err = %e, "failed to add ICE candidate");
        }
    }

    fn remove_peer(&mut self, peer_id: &PeerId) {
        let Some(mut session) = self.sessions.remove(peer_id) else {
            tracing::debug!(peer_id = %peer_id, "removePeer for unknown peer, ignoring");
            return;
        };
        session.close();
        tracing::info!(peer_id = %peer_id, "peer removed");
        self.notify(PeeringEvent::PeerRemoved {
            peer_id: peer_id.clone(),
        });
    }

    fn relay_description(&self, peer_id: &PeerId, description: SessionDescription) {
        let request = ClientEvent::RelaySessionDescription {
            peer_id: peer_id.clone(),
            session_description: description,
        };
        if self.outbound.send(request).is_err() {
            tracing::debug!(peer_id = %peer_id, "outbound closed, dropping description");
        }
    }

    fn fail(&self, peer_id: &PeerId, err: &NegotiationError) {
        tracing::warn!(peer_id = %peer_id, err = %err, "negotiation failed");
        self.notify(PeeringEvent::NegotiationFailed {
            peer_id: peer_id.clone(),
            reason: err.to_string(),
        });
    }

    fn notify(&self, event: PeeringEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("application event receiver dropped");
        }
    }
}
