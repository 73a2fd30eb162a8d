//! Seam to the local peer-connection negotiation stack.
//!
//! The peering client never produces or parses SDP itself. It drives a
//! [`PeerConnection`] per remote peer through the offer/answer handshake and
//! feeds it remote candidates; the stack hands back locally gathered
//! candidates through a [`CandidateSink`]. Implementations include:
//! - [`loopback::LoopbackFactory`]: in-process recording stack for testing
//!
//! A production factory wraps a real WebRTC stack and attaches the local
//! media source to every connection it creates.

pub mod loopback;

use std::future::Future;

use meshcall_proto::signal::{ClientEvent, IceCandidate, PeerId, SdpType, SessionDescription};
use tokio::sync::mpsc;

use crate::config::MediaConfig;
use crate::peering::session::PeerState;

/// Errors reported by the negotiation stack or by the peer session driving it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    /// The stack could not create a connection object.
    #[error("failed to create peer connection: {0}")]
    CreateConnection(String),
    /// Offer or answer generation failed.
    #[error("failed to create {kind}: {reason}")]
    CreateDescription {
        /// Which description was being created.
        kind: SdpType,
        /// Stack-provided reason.
        reason: String,
    },
    /// Applying the local description failed.
    #[error("{kind} setLocalDescription failed: {reason}")]
    SetLocalDescription {
        /// Which description was being applied.
        kind: SdpType,
        /// Stack-provided reason.
        reason: String,
    },
    /// Applying the remote description failed.
    #[error("setRemoteDescription failed: {0}")]
    SetRemoteDescription(String),
    /// The stack rejected a remote candidate.
    #[error("addIceCandidate failed: {0}")]
    AddIceCandidate(String),
    /// A description arrived that does not fit the session's state.
    #[error("unexpected {kind} while {state}")]
    UnexpectedDescription {
        /// Kind of the description received.
        kind: SdpType,
        /// State the session was in.
        state: PeerState,
    },
    /// The session has already been closed.
    #[error("peer session is closed")]
    Closed,
}

impl NegotiationError {
    /// Whether the error is a stack failure (as opposed to a description that
    /// simply arrived at the wrong time).
    #[must_use]
    pub const fn is_stack_failure(&self) -> bool {
        !matches!(self, Self::UnexpectedDescription { .. } | Self::Closed)
    }
}

/// A negotiated peer connection to one remote endpoint.
///
/// All methods mirror the standard peer-connection operations. Payloads are
/// opaque to the caller.
pub trait PeerConnection: Send {
    /// Generate a local offer.
    fn create_offer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, NegotiationError>> + Send;

    /// Generate a local answer to the remote offer already applied.
    fn create_answer(
        &mut self,
    ) -> impl Future<Output = Result<SessionDescription, NegotiationError>> + Send;

    /// Apply a locally generated description.
    fn set_local_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Apply a description received from the remote peer.
    fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Feed a candidate received from the remote peer. Candidates may arrive
    /// before any description; buffering them is the stack's concern.
    fn add_ice_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> impl Future<Output = Result<(), NegotiationError>> + Send;

    /// Release the connection and anything rendered from it.
    fn close(&mut self);
}

/// Creates peer connections with the local media source attached.
pub trait PeerConnectionFactory: Send {
    /// Connection type produced by this factory.
    type Connection: PeerConnection;

    /// Create a connection to `peer_id`, capturing local media and reaching
    /// the ICE servers as `media` says. Locally gathered candidates must be
    /// pushed into `candidates`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::CreateConnection`] if the stack cannot
    /// allocate the connection.
    fn create(
        &self,
        peer_id: &PeerId,
        media: &MediaConfig,
        candidates: CandidateSink,
    ) -> Result<Self::Connection, NegotiationError>;
}

/// Handle through which a connection publishes locally gathered candidates.
///
/// Each candidate becomes a `relayICECandidate` request addressed to the
/// remote peer the sink was created for.
#[derive(Debug, Clone)]
pub struct CandidateSink {
    peer_id: PeerId,
    outbound: mpsc::UnboundedSender<ClientEvent>,
}

impl CandidateSink {
    /// Creates a sink relaying to `peer_id` over `outbound`.
    #[must_use]
    pub const fn new(peer_id: PeerId, outbound: mpsc::UnboundedSender<ClientEvent>) -> Self {
        Self { peer_id, outbound }
    }

    /// The remote peer candidates are addressed to.
    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Queue a candidate for relay. Returns `false` if the signaling side has
    /// shut down.
    pub fn emit(&self, candidate: IceCandidate) -> bool {
        self.outbound
            .send(ClientEvent::RelayIceCandidate {
                peer_id: self.peer_id.clone(),
                ice_candidate: candidate,
            })
            .is_ok()
    }
}
