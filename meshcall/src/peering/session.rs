//! Per-peer negotiation state.
//!
//! A [`PeerSession`] wraps one [`PeerConnection`] and walks it through the
//! offer/answer handshake:
//!
//! ```text
//! absent ─addPeer(offer=false)─▶ PendingOffer ─offer─▶ Connected
//! absent ─addPeer(offer=true)──▶ PendingAnswer ─answer─▶ Connected
//! any live state ─removePeer / disconnect─▶ Closed
//! ```
//!
//! A stack failure moves the session to [`PeerState::Failed`]; it stays
//! registered so it is still torn down normally.

use std::fmt;

use meshcall_proto::signal::{IceCandidate, SdpType, SessionDescription};

use crate::negotiation::{NegotiationError, PeerConnection};

/// Negotiation state of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Waiting for the remote offer.
    PendingOffer,
    /// Local offer sent, waiting for the remote answer.
    PendingAnswer,
    /// Both descriptions applied; media flows asynchronously.
    Connected,
    /// The negotiation stack reported an error; the session never connects.
    Failed,
    /// Torn down.
    Closed,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PendingOffer => "pending-offer",
            Self::PendingAnswer => "pending-answer",
            Self::Connected => "connected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One negotiated connection attempt to a remote peer.
pub struct PeerSession<C> {
    state: PeerState,
    connection: C,
}

impl<C: PeerConnection> PeerSession<C> {
    /// Wraps a fresh connection; the session starts waiting for an offer.
    pub const fn new(connection: C) -> Self {
        Self {
            state: PeerState::PendingOffer,
            connection,
        }
    }

    /// Current state.
    pub const fn state(&self) -> PeerState {
        self.state
    }

    /// Borrow the underlying connection.
    pub const fn connection(&self) -> &C {
        &self.connection
    }

    /// Create an offer and apply it locally. On success the session waits
    /// for the answer and the offer is returned for relay.
    ///
    /// # Errors
    ///
    /// Any stack error; the session moves to [`PeerState::Failed`].
    pub async fn offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        self.ensure_open()?;
        let result: Result<SessionDescription, NegotiationError> = async {
            let offer = self.connection.create_offer().await?;
            self.connection.set_local_description(offer.clone()).await?;
            Ok(offer)
        }
        .await;
        self.settle(result, PeerState::PendingAnswer)
    }

    /// Apply a remote offer, then create and apply the answer. On success the
    /// session is connected and the answer is returned for relay.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::UnexpectedDescription`] if the session is not
    /// waiting for an offer (state unchanged); any stack error moves the
    /// session to [`PeerState::Failed`].
    pub async fn accept_offer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.expect_state(PeerState::PendingOffer, SdpType::Offer)?;
        let result: Result<SessionDescription, NegotiationError> = async {
            self.connection.set_remote_description(offer).await?;
            let answer = self.connection.create_answer().await?;
            self.connection.set_local_description(answer.clone()).await?;
            Ok(answer)
        }
        .await;
        self.settle(result, PeerState::Connected)
    }

    /// Apply the remote answer to our offer.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::UnexpectedDescription`] if no answer is awaited;
    /// a stack error moves the session to [`PeerState::Failed`].
    pub async fn accept_answer(
        &mut self,
        answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.expect_state(PeerState::PendingAnswer, SdpType::Answer)?;
        let result = self.connection.set_remote_description(answer).await;
        self.settle(result, PeerState::Connected)
    }

    /// Feed a remote candidate to the stack. Allowed in every state except
    /// [`PeerState::Closed`]; a rejected candidate does not fail the session.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] after teardown, or the stack's error.
    pub async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.connection.add_ice_candidate(candidate).await
    }

    /// Close the connection. Idempotent.
    pub fn close(&mut self) {
        if self.state != PeerState::Closed {
            self.connection.close();
            self.state = PeerState::Closed;
        }
    }

    const fn ensure_open(&self) -> Result<(), NegotiationError> {
        if matches!(self.state, PeerState::Closed) {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    fn expect_state(&self, wanted: PeerState, kind: SdpType) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        if self.state == wanted {
            Ok(())
        } else {
            Err(NegotiationError::UnexpectedDescription {
                kind,
                state: self.state,
            })
        }
    }

    fn settle<T>(
        &mut self,
        result: Result<T, NegotiationError>,
        next: PeerState,
    ) -> Result<T, NegotiationError> {
        self.state = if result.is_ok() { next } else { PeerState::Failed };
        result
    }
}
