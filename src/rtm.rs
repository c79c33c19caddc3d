//! RTM descriptors and membership maintenance (§4.5). The TM periodically
//! re-resolves its R replica positions; below a configured threshold of
//! known RTMs it reverts to an initialization handler that refuses new
//! commits until membership is restored.

use serde::{Deserialize, Serialize};

use crate::common::{Key, NodeId};
use crate::config::Config;

/// `(ring_key, rtm_pid?, index in 0..R-1, acceptor_pid?)`, refreshed by
/// periodic lookup.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RtmDescriptor {
  pub ring_key: Key,
  pub pid: Option<NodeId>,
  pub index: u32,
  pub acceptor_pid: Option<NodeId>,
}

impl RtmDescriptor {
  pub fn is_known(&self) -> bool {
    self.pid.is_some()
  }
}

/// Owns the TM's view of its R−1 RTM replica positions (indices `1..R`;
/// index `0` is the TM's own node and is always "known").
#[derive(Debug)]
pub struct RtmMembership {
  descriptors: Vec<RtmDescriptor>,
  rtm_min_known: u32,
}

impl RtmMembership {
  pub fn new(replica_keys: Vec<Key>, config: &Config) -> RtmMembership {
    let descriptors = replica_keys
      .into_iter()
      .enumerate()
      .map(|(index, ring_key)| RtmDescriptor { ring_key, pid: None, index: index as u32, acceptor_pid: None })
      .collect();
    RtmMembership { descriptors, rtm_min_known: config.rtm_min_known }
  }

  pub fn descriptors(&self) -> &[RtmDescriptor] {
    &self.descriptors
  }

  pub fn ring_keys(&self) -> Vec<Key> {
    self.descriptors.iter().map(|d| d.ring_key.clone()).collect()
  }

  pub fn update(&mut self, ring_key: &Key, pid: Option<NodeId>, acceptor_pid: Option<NodeId>) {
    if let Some(d) = self.descriptors.iter_mut().find(|d| &d.ring_key == ring_key) {
      d.pid = pid;
      d.acceptor_pid = acceptor_pid;
    }
  }

  fn known_count(&self) -> u32 {
    self.descriptors.iter().filter(|d| d.is_known()).count() as u32
  }

  /// Whether the TM has enough known RTMs to accept new commits. Below
  /// this threshold the TM is in initialization mode (§4.5, open design
  /// parameter recorded in DESIGN.md).
  pub fn is_ready(&self) -> bool {
    // Own node (the TM itself) always counts as one known replica position.
    self.known_count() + 1 >= self.rtm_min_known
  }

  pub fn known_pids(&self) -> Vec<NodeId> {
    self.descriptors.iter().filter_map(|d| d.pid.clone()).collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn cfg(min_known: u32) -> Config {
    Config { rtm_min_known: min_known, ..Config::default() }
  }

  #[test]
  fn starts_not_ready_with_no_known_rtms() {
    let membership = RtmMembership::new(vec![Key("a".into()), Key("b".into())], &cfg(3));
    assert!(!membership.is_ready());
  }

  #[test]
  fn becomes_ready_once_enough_rtms_resolve() {
    let mut membership = RtmMembership::new(vec![Key("a".into()), Key("b".into())], &cfg(3));
    membership.update(&Key("a".into()), Some(NodeId("n-a".into())), None);
    assert!(membership.is_ready());
  }
}
