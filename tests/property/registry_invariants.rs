//! Property-based tests for the endpoint registry.
//!
//! Drives random sequences of connect/join/part/disconnect against a
//! [`Registry`] and checks after every step that:
//! 1. Endpoint channel sets and channel member sets agree.
//! 2. A successful join with `k` prior members emits exactly `k` offers to
//!    the joiner and `k` non-offer `addPeer`s to the members.
//! 3. A rejected join or part emits nothing.
//! 4. A successful part with `k` remaining members emits `2k` `removePeer`s.

use std::collections::HashMap;

use proptest::prelude::*;
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use meshcall_proto::signal::{PeerId, ServerEvent};
use meshcall_relay::registry::Registry;

const CHANNELS: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug, Clone)]
enum Op {
    Connect,
    Join(usize, usize),
    Part(usize, usize),
    Disconnect(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        1 => Just(Op::Connect),
        4 => (0..6usize, 0..CHANNELS.len()).prop_map(|(e, c)| Op::Join(e, c)),
        2 => (0..6usize, 0..CHANNELS.len()).prop_map(|(e, c)| Op::Part(e, c)),
        1 => (0..6usize).prop_map(Op::Disconnect),
    ]
}

struct Harness {
    registry: Registry,
    endpoints: Vec<(PeerId, UnboundedReceiver<ServerEvent>)>,
}

impl Harness {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
            endpoints: Vec::new(),
        }
    }

    /// Drains every receiver and counts events by (receiver, event).
    fn drain_all(&mut self) -> HashMap<PeerId, Vec<ServerEvent>> {
        let mut out = HashMap::new();
        for (id, rx) in &mut self.endpoints {
            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            out.insert(id.clone(), events);
        }
        out
    }

    fn total(events: &HashMap<PeerId, Vec<ServerEvent>>) -> usize {
        events.values().map(Vec::len).sum()
    }
}

proptest! {
    #[test]
    fn registry_invariants_hold(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut h = Harness::new();

        for op in ops {
            match op {
                Op::Connect => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    let id = h.registry.connect(tx);
                    h.endpoints.push((id, rx));
                    let events = h.drain_all();
                    prop_assert_eq!(Harness::total(&events), 1);
                }
                Op::Join(e, c) => {
                    if h.endpoints.is_empty() {
                        continue;
                    }
                    let id = h.endpoints[e % h.endpoints.len()].0.clone();
                    let channel = CHANNELS[c];
                    let was_member = h.registry.is_member(&id, channel);
                    let result = h.registry.join(&id, channel, &Value::Null);
                    let events = h.drain_all();

                    if was_member || !h.registry.contains(&id) {
                        prop_assert!(result.is_err());
                        prop_assert_eq!(Harness::total(&events), 0);
                    } else {
                        let k = result.expect("join of non-member succeeds");
                        let to_joiner = events.get(&id).cloned().unwrap_or_default();
                        prop_assert_eq!(to_joiner.len(), k);
                        let joiner_offers = to_joiner.iter().all(|ev| matches!(
                            ev,
                            ServerEvent::AddPeer { should_create_offer: true, .. }
                        ));
                        prop_assert!(joiner_offers);
                        prop_assert_eq!(Harness::total(&events), 2 * k);
                        for (other, evs) in &events {
                            if other != &id {
                                let expected = ServerEvent::AddPeer {
                                    peer_id: id.clone(),
                                    should_create_offer: false,
                                };
                                let told_to_answer = evs.iter().all(|ev| *ev == expected);
                                prop_assert!(told_to_answer, "{} got {:?}", other, evs);
                            }
                        }
                    }
                }
                Op::Part(e, c) => {
                    if h.endpoints.is_empty() {
                        continue;
                    }
                    let id = h.endpoints[e % h.endpoints.len()].0.clone();
                    let channel = CHANNELS[c];
                    let was_member = h.registry.is_member(&id, channel);
                    let result = h.registry.part(&id, channel);
                    let events = h.drain_all();

                    if was_member {
                        let k = result.expect("part of member succeeds");
                        prop_assert_eq!(Harness::total(&events), 2 * k);
                        prop_assert_eq!(events.get(&id).map_or(0, Vec::len), k);
                        prop_assert!(!h.registry.is_member(&id, channel));
                    } else {
                        prop_assert!(result.is_err());
                        prop_assert_eq!(Harness::total(&events), 0);
                    }
                }
                Op::Disconnect(e) => {
                    if h.endpoints.is_empty() {
                        continue;
                    }
                    let id = h.endpoints[e % h.endpoints.len()].0.clone();
                    let channels = h.registry.channels_of(&id);
                    let expected: usize = channels
                        .iter()
                        .flatten()
                        .map(|ch| h.registry.members(ch).map_or(0, |m| m.len() - 1))
                        .sum();
                    let existed = h.registry.disconnect(&id);
                    let events = h.drain_all();

                    prop_assert_eq!(existed, channels.is_some());
                    prop_assert_eq!(Harness::total(&events), 2 * expected);
                    prop_assert!(!h.registry.contains(&id));
                }
            }
            prop_assert!(h.registry.is_consistent());
        }
    }
}
