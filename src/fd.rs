//! The failure detector (§4.5): a subscribable liveness oracle producing
//! `{crash, pid}` events, with reference-counted subscriptions so multiple
//! in-flight transactions watching the same peer don't cause premature
//! unsubscription (Design Note "FD reference counting"). The miss-counter
//! heartbeat scheme is grounded in the teacher's
//! `free_node_manager::free_node_heartbeat: BTreeMap<EndpointId, u32>` plus
//! its `HEARTBEAT_DEAD_THRESHOLD`.

use std::collections::HashMap;

use crate::common::{IOCtx, NodeId, TimerInput};
use crate::message::{FdMessage, NetworkMessage};

/// Missed heartbeats before a peer is suspected. Mirrors the teacher's
/// `HEARTBEAT_DEAD_THRESHOLD` constant.
const HEARTBEAT_DEAD_THRESHOLD: u32 = 6;

#[derive(Debug, Default)]
pub struct FailureDetector {
  self_node: NodeId,
  /// Peers this node is watching, and how many transactions have
  /// subscribed to each (`subscribe++` / `unsubscribe--`; an FD call only
  /// happens on the 0<->1 transitions, per Design Note).
  watched: HashMap<NodeId, u32>,
  misses: HashMap<NodeId, u32>,
  suspected: HashMap<NodeId, bool>,
}

impl FailureDetector {
  pub fn new(self_node: NodeId) -> FailureDetector {
    FailureDetector { self_node, watched: HashMap::new(), misses: HashMap::new(), suspected: HashMap::new() }
  }

  /// `subscribe(pid)`: begins watching `peer` if this is the first
  /// subscriber, otherwise just bumps the refcount.
  pub fn subscribe(&mut self, peer: &NodeId) {
    let count = self.watched.entry(peer.clone()).or_insert(0);
    *count += 1;
    self.misses.entry(peer.clone()).or_insert(0);
  }

  /// `unsubscribe(pid)`: drops the refcount; once it reaches zero the peer
  /// is no longer watched and its bookkeeping is removed.
  pub fn unsubscribe(&mut self, peer: &NodeId) {
    if let Some(count) = self.watched.get_mut(peer) {
      *count = count.saturating_sub(1);
      if *count == 0 {
        self.watched.remove(peer);
        self.misses.remove(peer);
        self.suspected.remove(peer);
      }
    }
  }

  pub fn is_watched(&self, peer: &NodeId) -> bool {
    self.watched.contains_key(peer)
  }

  pub fn is_suspected(&self, peer: &NodeId) -> bool {
    *self.suspected.get(peer).unwrap_or(&false)
  }

  /// Sends a heartbeat to every watched peer and arms the next tick.
  pub fn on_heartbeat_tick<IO: IOCtx>(&mut self, io_ctx: &mut IO, interval_ms: u64) {
    for count in self.misses.values_mut() {
      *count += 1;
    }
    for peer in self.watched.keys().cloned().collect::<Vec<_>>() {
      io_ctx.send(&peer, NetworkMessage::Fd(FdMessage::Heartbeat { from: self.self_node.clone() }));
    }
    io_ctx.defer(interval_ms, TimerInput::FdHeartbeatTick);
  }

  /// Records a received heartbeat from `from` and acks it straight back.
  /// Subscriptions are one-directional (an RTM subscribes to its TM, never
  /// the reverse), so without this ack a live TM would never hear back
  /// from peers it isn't itself watching, and every one of its
  /// subscribers would eventually suspect it regardless of liveness.
  pub fn on_heartbeat<IO: IOCtx>(&mut self, io_ctx: &mut IO, from: &NodeId) {
    self.reset_miss(from);
    io_ctx.send(from, NetworkMessage::Fd(FdMessage::HeartbeatAck { from: self.self_node.clone() }));
  }

  /// Records a received heartbeat ack from `from`, resetting its miss
  /// counter. Unlike `on_heartbeat`, never sends anything back, so a
  /// mutually-watching pair exchanges one heartbeat and one ack per tick
  /// rather than looping forever.
  pub fn on_heartbeat_ack(&mut self, from: &NodeId) {
    self.reset_miss(from);
  }

  fn reset_miss(&mut self, from: &NodeId) {
    if self.watched.contains_key(from) {
      self.misses.insert(from.clone(), 0);
      self.suspected.insert(from.clone(), false);
    }
  }

  /// Called once per heartbeat period, after `on_heartbeat_tick`, to check
  /// miss counts and emit `{crash, pid}` to this node's own local
  /// subscribers (the TM/RTM actors watching `peer` for takeover).
  pub fn check_suspicions<IO: IOCtx>(&mut self, io_ctx: &mut IO) -> Vec<NodeId> {
    let mut newly_suspected = Vec::new();
    for (peer, misses) in &self.misses {
      if *misses >= HEARTBEAT_DEAD_THRESHOLD && !*self.suspected.get(peer).unwrap_or(&false) {
        newly_suspected.push(peer.clone());
      }
    }
    for peer in &newly_suspected {
      self.suspected.insert(peer.clone(), true);
      io_ctx.send(
        &self.self_node.clone(),
        NetworkMessage::Fd(FdMessage::Crash { pid: peer.clone(), cookie: None }),
      );
    }
    newly_suspected
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::common::{Timestamp, TraceEvent};

  struct NullIo {
    rand: rand_xorshift::XorShiftRng,
    sent: Vec<(NodeId, NetworkMessage)>,
  }
  impl IOCtx for NullIo {
    fn rand(&mut self) -> &mut rand_xorshift::XorShiftRng {
      &mut self.rand
    }
    fn now(&mut self) -> Timestamp {
      crate::common::mk_t(0)
    }
    fn send(&mut self, to: &NodeId, msg: NetworkMessage) {
      self.sent.push((to.clone(), msg));
    }
    fn defer(&mut self, _after_ms: u64, _timer: TimerInput) {}
    fn trace(&mut self, _event: TraceEvent) {}
  }

  fn io() -> NullIo {
    use rand::SeedableRng;
    NullIo { rand: rand_xorshift::XorShiftRng::from_seed([3; 16]), sent: Vec::new() }
  }

  #[test]
  fn refcounted_subscribe_requires_matching_unsubscribes() {
    let mut fd = FailureDetector::new(NodeId("self".into()));
    let peer = NodeId("peer".into());
    fd.subscribe(&peer);
    fd.subscribe(&peer);
    fd.unsubscribe(&peer);
    assert!(fd.is_watched(&peer));
    fd.unsubscribe(&peer);
    assert!(!fd.is_watched(&peer));
  }

  #[test]
  fn suspects_peer_after_threshold_missed_heartbeats() {
    let mut fd = FailureDetector::new(NodeId("self".into()));
    let peer = NodeId("peer".into());
    fd.subscribe(&peer);
    let mut io_ctx = io();
    for _ in 0..HEARTBEAT_DEAD_THRESHOLD {
      fd.on_heartbeat_tick(&mut io_ctx, 100);
    }
    let suspected = fd.check_suspicions(&mut io_ctx);
    assert_eq!(suspected, vec![peer.clone()]);
    assert!(fd.is_suspected(&peer));
  }

  #[test]
  fn heartbeat_ack_received_resets_suspicion() {
    let mut fd = FailureDetector::new(NodeId("self".into()));
    let peer = NodeId("peer".into());
    fd.subscribe(&peer);
    let mut io_ctx = io();
    for _ in 0..HEARTBEAT_DEAD_THRESHOLD {
      fd.on_heartbeat_tick(&mut io_ctx, 100);
    }
    fd.on_heartbeat_ack(&peer);
    let suspected = fd.check_suspicions(&mut io_ctx);
    assert!(suspected.is_empty());
  }

  #[test]
  fn received_heartbeat_is_acked_back_to_sender() {
    let mut fd = FailureDetector::new(NodeId("self".into()));
    let peer = NodeId("peer".into());
    let mut io_ctx = io();
    // Not watched: a TM never subscribes to its RTMs, but still owes the
    // RTM an ack so the RTM's own miss counter gets reset.
    fd.on_heartbeat(&mut io_ctx, &peer);
    assert_eq!(
      io_ctx.sent,
      vec![(peer.clone(), NetworkMessage::Fd(FdMessage::HeartbeatAck { from: NodeId("self".into()) }))]
    );
  }
}
