//! Endpoint registry: channel membership and event routing.
//!
//! The [`Registry`] owns every connected endpoint and every non-empty
//! channel. Joining a channel pairs the newcomer with each existing member
//! (`addPeer` to both sides, the newcomer always offers); parting or
//! disconnecting unpairs it (`removePeer` to both sides). Handshake payloads
//! are forwarded untouched to exactly one target.
//!
//! All state sits behind a single mutex and every operation holds it for its
//! whole duration, so an endpoint's channel set and the channel member sets
//! always agree, and events reach each endpoint in the order the operations
//! were serialized. Emission is a non-blocking send on the endpoint's
//! unbounded queue; nothing waits on the remote side.

use std::collections::{HashMap, HashSet};

use meshcall_proto::signal::{IceCandidate, PeerId, ServerEvent, SessionDescription};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

/// Outbound queue feeding one endpoint's WebSocket writer.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Errors returned for protocol misuse. None of them change state or emit
/// events.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// The endpoint is not (or no longer) registered.
    #[error("unknown endpoint {0}")]
    UnknownEndpoint(PeerId),
    /// The endpoint is already a member of the channel.
    #[error("{peer_id} already joined {channel}")]
    AlreadyJoined {
        /// Endpoint that tried to join.
        peer_id: PeerId,
        /// Channel it is already in.
        channel: String,
    },
    /// The endpoint is not a member of the channel.
    #[error("{peer_id} is not in {channel}")]
    NotInChannel {
        /// Endpoint that tried to part.
        peer_id: PeerId,
        /// Channel it is not in.
        channel: String,
    },
}

/// Outcome of a relay request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The event was queued for the target.
    Delivered,
    /// The target is not registered; the payload was discarded.
    Dropped,
}

struct Endpoint {
    sender: EventSender,
    channels: HashSet<String>,
}

#[derive(Default)]
struct Inner {
    endpoints: HashMap<PeerId, Endpoint>,
    channels: HashMap<String, HashSet<PeerId>>,
}

impl Inner {
    fn emit(&self, to: &PeerId, event: ServerEvent) -> Delivery {
        let Some(endpoint) = self.endpoints.get(to) else {
            return Delivery::Dropped;
        };
        if endpoint.sender.send(event).is_err() {
            // Writer already gone; the disconnect for it is on its way.
            tracing::trace!(peer_id = %to, "event queue closed");
        }
        Delivery::Delivered
    }

    fn part(&mut self, peer_id: &PeerId, channel: &str) -> Result<usize, RegistryError> {
        let endpoint = self
            .endpoints
            .get_mut(peer_id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(peer_id.clone()))?;
        if !endpoint.channels.remove(channel) {
            return Err(RegistryError::NotInChannel {
                peer_id: peer_id.clone(),
                channel: channel.to_string(),
            });
        }

        let remaining: Vec<PeerId> = match self.channels.get_mut(channel) {
            Some(members) => {
                members.remove(peer_id);
                members.iter().cloned().collect()
            }
            None => Vec::new(),
        };
        if remaining.is_empty() {
            self.channels.remove(channel);
        }

        for member in &remaining {
            self.emit(
                member,
                ServerEvent::RemovePeer {
                    peer_id: peer_id.clone(),
                },
            );
            self.emit(
                peer_id,
                ServerEvent::RemovePeer {
                    peer_id: member.clone(),
                },
            );
        }

        Ok(remaining.len())
    }
}

/// In-memory endpoint and channel registry.
///
/// Thread-safe via a single [`Mutex`]; see the module docs for the ordering
/// guarantees this gives.
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new endpoint and returns its freshly assigned id.
    ///
    /// The endpoint's first event is [`ServerEvent::Connected`] carrying that
    /// id.
    pub fn connect(&self, sender: EventSender) -> PeerId {
        let mut inner = self.inner.lock();
        let mut peer_id = PeerId::generate();
        while inner.endpoints.contains_key(&peer_id) {
            peer_id = PeerId::generate();
        }
        if sender
            .send(ServerEvent::Connected {
                peer_id: peer_id.clone(),
            })
            .is_err()
        {
            tracing::trace!(peer_id = %peer_id, "event queue closed before handshake");
        }
        inner.endpoints.insert(
            peer_id.clone(),
            Endpoint {
                sender,
                channels: HashSet::new(),
            },
        );
        peer_id
    }

    /// Adds `peer_id` to `channel`, pairing it with every existing member.
    ///
    /// Each existing member receives `addPeer(peer_id, false)` and the joiner
    /// receives `addPeer(member, true)`. Returns the number of members that
    /// were already in the channel.
    ///
    /// `userdata` is application metadata the registry does not interpret.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyJoined`] for a duplicate join and
    /// [`RegistryError::UnknownEndpoint`] for an unregistered id. Neither
    /// changes state or emits events.
    pub fn join(
        &self,
        peer_id: &PeerId,
        channel: &str,
        userdata: &Value,
    ) -> Result<usize, RegistryError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let endpoint = inner
            .endpoints
            .get(peer_id)
            .ok_or_else(|| RegistryError::UnknownEndpoint(peer_id.clone()))?;
        if endpoint.channels.contains(channel) {
            return Err(RegistryError::AlreadyJoined {
                peer_id: peer_id.clone(),
                channel: channel.to_string(),
            });
        }

        tracing::debug!(peer_id = %peer_id, channel = %channel, userdata = %userdata, "join");

        let existing: Vec<PeerId> = inner
            .channels
            .get(channel)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default();

        for member in &existing {
            inner.emit(
                member,
                ServerEvent::AddPeer {
                    peer_id: peer_id.clone(),
                    should_create_offer: false,
                },
            );
            inner.emit(
                peer_id,
                ServerEvent::AddPeer {
                    peer_id: member.clone(),
                    should_create_offer: true,
                },
            );
        }

        inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .insert(peer_id.clone());
        if let Some(endpoint) = inner.endpoints.get_mut(peer_id) {
            endpoint.channels.insert(channel.to_string());
        }

        Ok(existing.len())
    }

    /// Removes `peer_id` from `channel` and unpairs it from the remaining
    /// members.
    ///
    /// Membership is updated first; then every remaining member receives
    /// `removePeer(peer_id)` and the departing endpoint receives
    /// `removePeer(member)` for each of them. Returns the number of remaining
    /// members.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotInChannel`] if the endpoint is not a member and
    /// [`RegistryError::UnknownEndpoint`] for an unregistered id.
    pub fn part(&self, peer_id: &PeerId, channel: &str) -> Result<usize, RegistryError> {
        self.inner.lock().part(peer_id, channel)
    }

    /// Parts every channel `peer_id` is in, then forgets the endpoint.
    ///
    /// Returns `false` (and does nothing) if the endpoint was not registered,
    /// so repeated calls are harmless.
    pub fn disconnect(&self, peer_id: &PeerId) -> bool {
        let mut inner = self.inner.lock();
        let Some(endpoint) = inner.endpoints.get(peer_id) else {
            return false;
        };
        let channels: Vec<String> = endpoint.channels.iter().cloned().collect();
        for channel in &channels {
            if let Err(e) = inner.part(peer_id, channel) {
                tracing::warn!(peer_id = %peer_id, channel = %channel, error = %e, "part during disconnect failed");
            }
        }
        inner.endpoints.remove(peer_id);
        true
    }

    /// Forwards a candidate from `from` to `to` as `iceCandidate`.
    ///
    /// A target that is no longer registered is not an error: the payload is
    /// dropped and [`Delivery::Dropped`] returned.
    pub fn relay_ice_candidate(
        &self,
        from: &PeerId,
        to: &PeerId,
        ice_candidate: IceCandidate,
    ) -> Delivery {
        self.inner.lock().emit(
            to,
            ServerEvent::IceCandidate {
                peer_id: from.clone(),
                ice_candidate,
            },
        )
    }

    /// Forwards an offer or answer from `from` to `to` as
    /// `sessionDescription`. Same delivery rules as
    /// [`relay_ice_candidate`](Self::relay_ice_candidate).
    pub fn relay_session_description(
        &self,
        from: &PeerId,
        to: &PeerId,
        session_description: SessionDescription,
    ) -> Delivery {
        self.inner.lock().emit(
            to,
            ServerEvent::SessionDescription {
                peer_id: from.clone(),
                session_description,
            },
        )
    }

    /// Returns whether `peer_id` is currently registered.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.inner.lock().endpoints.contains_key(peer_id)
    }

    /// Returns whether `peer_id` is a member of `channel`.
    pub fn is_member(&self, peer_id: &PeerId, channel: &str) -> bool {
        self.inner
            .lock()
            .channels
            .get(channel)
            .is_some_and(|members| members.contains(peer_id))
    }

    /// Returns the members of `channel`, or `None` if it has none.
    pub fn members(&self, channel: &str) -> Option<Vec<PeerId>> {
        self.inner
            .lock()
            .channels
            .get(channel)
            .map(|members| members.iter().cloned().collect())
    }

    /// Returns the channels `peer_id` belongs to, or `None` if it is not
    /// registered.
    pub fn channels_of(&self, peer_id: &PeerId) -> Option<Vec<String>> {
        self.inner
            .lock()
            .endpoints
            .get(peer_id)
            .map(|endpoint| endpoint.channels.iter().cloned().collect())
    }

    /// Number of registered endpoints.
    pub fn endpoint_count(&self) -> usize {
        self.inner.lock().endpoints.len()
    }

    /// Number of channels with at least one member.
    pub fn channel_count(&self) -> usize {
        self.inner.lock().channels.len()
    }

    /// Checks that every endpoint's channel set matches the channel member
    /// sets, and that no empty channel is kept around.
    pub fn is_consistent(&self) -> bool {
        let inner = self.inner.lock();
        let forward = inner.endpoints.iter().all(|(id, endpoint)| {
            endpoint.channels.iter().all(|channel| {
                inner
                    .channels
                    .get(channel)
                    .is_some_and(|members| members.contains(id))
            })
        });
        let backward = inner.channels.iter().all(|(name, members)| {
            !members.is_empty()
                && members.iter().all(|id| {
                    inner
                        .endpoints
                        .get(id)
                        .is_some_and(|endpoint| endpoint.channels.contains(name))
                })
        });
        forward && backward
    }
}
