//! The DHT routing / replication-factor collaborator (§4.6). Out of scope
//! for this core's implementation, but given a concrete trait so the rest
//! of the crate can be written and tested against it.

use crate::common::{Key, NodeId};

pub trait Overlay: Send {
  /// Routes `key` to the node currently responsible for it.
  fn route(&self, key: &Key) -> NodeId;

  /// Returns the `R` replica keys covering `key`'s position on the ring,
  /// in a stable order (index 0 is the key's primary position).
  fn replica_keys(&self, key: &Key) -> Vec<Key>;
}

/// A fixed, sorted-node-list consistent-hashing ring, used as the
/// reference/test `Overlay` implementation and by the simulation harness.
/// Production deployments supply their own, typically backed by the
/// boot/directory service — the core is generic over the trait, not this
/// type.
#[derive(Debug, Clone)]
pub struct RingOverlay {
  nodes: Vec<NodeId>,
  replication_factor: usize,
}

impl RingOverlay {
  pub fn new(mut nodes: Vec<NodeId>, replication_factor: u32) -> RingOverlay {
    nodes.sort();
    RingOverlay { nodes, replication_factor: replication_factor as usize }
  }

  pub fn nodes(&self) -> &[NodeId] {
    &self.nodes
  }

  fn primary_index(&self, key: &Key) -> usize {
    if self.nodes.is_empty() {
      return 0;
    }
    (hash_str(&key.0) as usize) % self.nodes.len()
  }
}

impl Overlay for RingOverlay {
  fn route(&self, key: &Key) -> NodeId {
    let idx = self.primary_index(key);
    self.nodes[idx].clone()
  }

  /// Replica keys are the same logical key suffixed with a replica index;
  /// each resolves (via `route`) to a distinct ring position walking
  /// forward from the primary, wrapping modulo the node count.
  fn replica_keys(&self, key: &Key) -> Vec<Key> {
    let primary = self.primary_index(key);
    let n = self.nodes.len().max(1);
    (0..self.replication_factor)
      .map(|offset| {
        let idx = (primary + offset) % n;
        Key(format!("{}#r{}", key.0, idx))
      })
      .collect()
  }
}

/// FNV-1a, deterministic across runs (unlike `std::hash`'s randomized
/// default), so the simulator's routing is reproducible across seeds.
fn hash_str(s: &str) -> u64 {
  let mut hash: u64 = 0xcbf29ce484222325;
  for byte in s.as_bytes() {
    hash ^= *byte as u64;
    hash = hash.wrapping_mul(0x100000001b3);
  }
  hash
}

#[cfg(test)]
mod tests {
  use super::*;

  fn nodes() -> Vec<NodeId> {
    vec![NodeId("a".into()), NodeId("b".into()), NodeId("c".into()), NodeId("d".into())]
  }

  #[test]
  fn routing_is_deterministic_across_calls() {
    let overlay = RingOverlay::new(nodes(), 3);
    let key = Key("0".into());
    assert_eq!(overlay.route(&key), overlay.route(&key));
  }

  #[test]
  fn replica_keys_returns_replication_factor_many_distinct_keys() {
    let overlay = RingOverlay::new(nodes(), 3);
    let replicas = overlay.replica_keys(&Key("0".into()));
    assert_eq!(replicas.len(), 3);
    let unique: std::collections::HashSet<_> = replicas.iter().collect();
    assert_eq!(unique.len(), 3);
  }
}
