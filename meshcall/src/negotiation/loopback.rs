//! Loopback negotiation stack for testing.
//!
//! Produces deterministic SDP, gathers one local candidate per applied local
//! description, and records every call in a table shared by the factory and
//! all connections it created. No network or media is involved.

use std::collections::HashMap;
use std::sync::Arc;

use meshcall_proto::signal::{IceCandidate, PeerId, SdpType, SessionDescription};
use parking_lot::Mutex;

use crate::config::MediaConfig;

use super::{CandidateSink, NegotiationError, PeerConnection, PeerConnectionFactory};

/// Stack operation a [`LoopbackFactory`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopbackFailure {
    CreateConnection,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
}

/// Everything one loopback connection was asked to do.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoopbackRecord {
    /// Media settings the connection was created with.
    pub media: MediaConfig,
    /// Last description applied locally.
    pub local_description: Option<SessionDescription>,
    /// Last description applied from the remote side.
    pub remote_description: Option<SessionDescription>,
    /// Remote candidates in arrival order.
    pub remote_candidates: Vec<IceCandidate>,
    /// Whether `close` was called.
    pub closed: bool,
}

type Records = Arc<Mutex<HashMap<PeerId, LoopbackRecord>>>;

/// Factory for [`LoopbackConnection`]s.
///
/// Clones share the same record table, so a test can keep one clone and
/// inspect what a peering client did with the other.
#[derive(Debug, Clone)]
pub struct LoopbackFactory {
    label: String,
    failure: Option<LoopbackFailure>,
    records: Records,
}

impl LoopbackFactory {
    /// Creates a factory whose SDP and candidates are tagged with `label`.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            failure: None,
            records: Arc::default(),
        }
    }

    /// Makes every connection fail at `failure`.
    #[must_use]
    pub const fn with_failure(mut self, failure: LoopbackFailure) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Snapshot of the calls made on the connection to `peer_id`.
    #[must_use]
    pub fn record(&self, peer_id: &PeerId) -> Option<LoopbackRecord> {
        self.records.lock().get(peer_id).cloned()
    }

    /// Peers a connection was created for, sorted.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.records.lock().keys().cloned().collect();
        peers.sort();
        peers
    }
}

impl PeerConnectionFactory for LoopbackFactory {
    type Connection = LoopbackConnection;

    fn create(
        &self,
        peer_id: &PeerId,
        media: &MediaConfig,
        candidates: CandidateSink,
    ) -> Result<LoopbackConnection, NegotiationError> {
        if self.failure == Some(LoopbackFailure::CreateConnection) {
            return Err(NegotiationError::CreateConnection(format!(
                "loopback refused connection to {peer_id}"
            )));
        }
        self.records.lock().insert(
            peer_id.clone(),
            LoopbackRecord {
                media: media.clone(),
                ..LoopbackRecord::default()
            },
        );
        Ok(LoopbackConnection {
            label: self.label.clone(),
            peer_id: peer_id.clone(),
            failure: self.failure,
            records: Arc::clone(&self.records),
            candidates,
            gathered: 0,
        })
    }
}

/// In-process peer connection created by [`LoopbackFactory`].
#[derive(Debug)]
pub struct LoopbackConnection {
    label: String,
    peer_id: PeerId,
    failure: Option<LoopbackFailure>,
    records: Records,
    candidates: CandidateSink,
    gathered: u32,
}

impl LoopbackConnection {
    fn fails_at(&self, op: LoopbackFailure) -> bool {
        self.failure == Some(op)
    }

    fn update(&self, f: impl FnOnce(&mut LoopbackRecord)) {
        if let Some(record) = self.records.lock().get_mut(&self.peer_id) {
            f(record);
        }
    }

    fn sdp(&self, kind: SdpType) -> String {
        format!(
            "v=0\r\no={} 0 0 IN IP4 127.0.0.1\r\ns=loopback {kind} to {}\r\n",
            self.label, self.peer_id
        )
    }
}

impl PeerConnection for LoopbackConnection {
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if self.fails_at(LoopbackFailure::CreateOffer) {
            return Err(NegotiationError::CreateDescription {
                kind: SdpType::Offer,
                reason: "loopback failure".into(),
            });
        }
        Ok(SessionDescription::offer(self.sdp(SdpType::Offer)))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if self.fails_at(LoopbackFailure::CreateAnswer) {
            return Err(NegotiationError::CreateDescription {
                kind: SdpType::Answer,
                reason: "loopback failure".into(),
            });
        }
        Ok(SessionDescription::answer(self.sdp(SdpType::Answer)))
    }

    async fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.fails_at(LoopbackFailure::SetLocalDescription) {
            return Err(NegotiationError::SetLocalDescription {
                kind: description.kind,
                reason: "loopback failure".into(),
            });
        }
        self.update(|r| r.local_description = Some(description));

        // Gathering starts once a local description is in place.
        let candidate = IceCandidate::new(
            0,
            format!(
                "candidate:{} 1 udp 2122260223 127.0.0.1 {} typ host",
                self.label,
                50_000 + self.gathered
            ),
        );
        self.gathered += 1;
        if !self.candidates.emit(candidate) {
            tracing::debug!(peer_id = %self.peer_id, "candidate sink closed");
        }
        Ok(())
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.fails_at(LoopbackFailure::SetRemoteDescription) {
            return Err(NegotiationError::SetRemoteDescription(
                "loopback failure".into(),
            ));
        }
        self.update(|r| r.remote_description = Some(description));
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if self.fails_at(LoopbackFailure::AddIceCandidate) {
            return Err(NegotiationError::AddIceCandidate("loopback failure".into()));
        }
        self.update(|r| r.remote_candidates.push(candidate));
        Ok(())
    }

    fn close(&mut self) {
        self.update(|r| r.closed = true);
    }
}
