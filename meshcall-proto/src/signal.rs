//! Signaling event types exchanged between endpoints and the relay.
//!
//! Every frame on the wire is a JSON object of the form
//! `{"event": "<name>", "data": <payload>}`. [`ClientEvent`] covers the
//! events an endpoint sends to the relay, [`ServerEvent`] the events the
//! relay emits to a specific endpoint.
//!
//! The handshake payloads ([`IceCandidate`], [`SessionDescription`]) are
//! opaque to the relay. Their documented fields are typed so malformed shapes
//! are rejected at decode time, and every other field is kept in `extra` so
//! forwarding re-emits exactly what the sender provided.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Session identifier of a connected endpoint.
///
/// Assigned by the relay when the connection is accepted and stable for the
/// lifetime of that connection. Clients treat it as an opaque string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an existing identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh, time-ordered session id (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Returns the string representation of this id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A network path candidate gathered by a peer's negotiation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Index of the media line this candidate belongs to.
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: u32,
    /// The candidate attribute line.
    pub candidate: String,
    /// Any additional fields supplied by the sender (e.g. `sdpMid`).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IceCandidate {
    /// Creates a candidate with no extra fields.
    pub fn new(sdp_m_line_index: u32, candidate: impl Into<String>) -> Self {
        Self {
            sdp_m_line_index,
            candidate: candidate.into(),
            extra: Map::new(),
        }
    }
}

/// Which half of the offer/answer handshake a description is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Sent by the designated offerer.
    Offer,
    /// Sent back by the answering side.
    Answer,
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Offer => f.write_str("offer"),
            Self::Answer => f.write_str("answer"),
        }
    }
}

/// A session description produced by a peer's negotiation stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer.
    #[serde(rename = "type")]
    pub kind: SdpType,
    /// The SDP body.
    pub sdp: String,
    /// Any additional fields supplied by the sender.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionDescription {
    /// Creates an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }

    /// Creates an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }
}

/// Payload of a `part` request.
///
/// Accepts both `{"channel": "name"}` and a bare `"name"` string on decode;
/// always encodes as the object form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "PartRepr")]
pub struct PartRequest {
    /// Channel to leave.
    pub channel: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PartRepr {
    Object { channel: String },
    Bare(String),
}

impl From<PartRepr> for PartRequest {
    fn from(repr: PartRepr) -> Self {
        match repr {
            PartRepr::Object { channel } | PartRepr::Bare(channel) => Self { channel },
        }
    }
}

/// Events sent by an endpoint to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    /// Join a channel, creating it if needed.
    #[serde(rename = "join")]
    Join {
        /// Channel name.
        channel: String,
        /// Opaque application metadata; not interpreted by the relay.
        #[serde(default)]
        userdata: Value,
    },

    /// Leave a channel.
    #[serde(rename = "part")]
    Part(PartRequest),

    /// Forward a locally gathered candidate to `peer_id`.
    #[serde(rename = "relayICECandidate")]
    RelayIceCandidate {
        /// Target endpoint.
        peer_id: PeerId,
        /// Candidate to forward verbatim.
        ice_candidate: IceCandidate,
    },

    /// Forward a local offer or answer to `peer_id`.
    #[serde(rename = "relaySessionDescription")]
    RelaySessionDescription {
        /// Target endpoint.
        peer_id: PeerId,
        /// Description to forward verbatim.
        session_description: SessionDescription,
    },
}

impl ClientEvent {
    /// Builds a `part` request for `channel`.
    pub fn part(channel: impl Into<String>) -> Self {
        Self::Part(PartRequest {
            channel: channel.into(),
        })
    }

    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Part(_) => "part",
            Self::RelayIceCandidate { .. } => "relayICECandidate",
            Self::RelaySessionDescription { .. } => "relaySessionDescription",
        }
    }
}

/// Events the relay emits to a single endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once after the connection is accepted, carrying the session id.
    #[serde(rename = "connected")]
    Connected {
        /// The id assigned to the receiving endpoint.
        peer_id: PeerId,
    },

    /// Start negotiating a peer connection with `peer_id`.
    #[serde(rename = "addPeer")]
    AddPeer {
        /// The other endpoint of the pair.
        peer_id: PeerId,
        /// Whether the receiver is the designated offerer for this pair.
        should_create_offer: bool,
    },

    /// Tear down the peer connection with `peer_id`.
    #[serde(rename = "removePeer")]
    RemovePeer {
        /// The endpoint that left (or that the receiver left).
        peer_id: PeerId,
    },

    /// A candidate relayed from `peer_id`.
    #[serde(rename = "iceCandidate")]
    IceCandidate {
        /// The endpoint that produced the candidate.
        peer_id: PeerId,
        /// The candidate as received from the sender.
        ice_candidate: IceCandidate,
    },

    /// A session description relayed from `peer_id`.
    #[serde(rename = "sessionDescription")]
    SessionDescription {
        /// The endpoint that produced the description.
        peer_id: PeerId,
        /// The description as received from the sender.
        session_description: SessionDescription,
    },
}

impl ServerEvent {
    /// Wire name of this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::AddPeer { .. } => "addPeer",
            Self::RemovePeer { .. } => "removePeer",
            Self::IceCandidate { .. } => "iceCandidate",
            Self::SessionDescription { .. } => "sessionDescription",
        }
    }

    /// The remote endpoint this event concerns.
    #[must_use]
    pub const fn peer_id(&self) -> &PeerId {
        match self {
            Self::Connected { peer_id }
            | Self::AddPeer { peer_id, .. }
            | Self::RemovePeer { peer_id }
            | Self::IceCandidate { peer_id, .. }
            | Self::SessionDescription { peer_id, .. } => peer_id,
        }
    }
}
