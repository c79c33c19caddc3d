/// The enumerated config surface of the commit core (spec §6). Every
/// option here is read by the TM/RTM, TP, Paxos, or FD actors; nothing in
/// this struct touches the anti-entropy or pub/sub layers beyond passing
/// their knobs through unread (those subsystems are out of scope here).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
  /// Number of replicas per key; also the number of RTMs per transaction (R).
  pub replication_factor: u32,
  /// Majority threshold. Must satisfy `2 * quorum_factor > replication_factor`.
  pub quorum_factor: u32,
  /// Base delay, in milliseconds, for takeover timers. `tid_isdone` fires
  /// at roughly `2 * tx_timeout_ms`; the stale-id sweep at `3 * tx_timeout_ms`.
  pub tx_timeout_ms: u64,
  /// Period, in milliseconds, of TM RTM-descriptor rediscovery.
  pub tx_rtm_update_interval_ms: u64,
  /// Minimum number of known RTMs below which the TM reverts to
  /// initialization mode and refuses new commits (open design parameter,
  /// see DESIGN.md "RTM replacement threshold").
  pub rtm_min_known: u32,

  // Anti-entropy knobs. Not consumed by this core; carried through so a
  // deployment's repair subsystem can read them from the same config.
  pub rep_update_activate: bool,
  pub rep_update_fpr: f64,
  pub rep_update_max_items: u32,
  pub rep_update_interval_ms: u64,
}

impl Config {
  /// Returns `true` iff `votes` constitutes a majority quorum, i.e.
  /// `votes >= ceil((R+1)/2)`.
  pub fn is_quorum(&self, votes: u32) -> bool {
    votes >= self.quorum_factor
  }
}

impl Default for Config {
  fn default() -> Config {
    let replication_factor = 3;
    Config {
      replication_factor,
      quorum_factor: majority(replication_factor),
      tx_timeout_ms: 5_000,
      tx_rtm_update_interval_ms: 10_000,
      rtm_min_known: 3,
      rep_update_activate: false,
      rep_update_fpr: 0.01,
      rep_update_max_items: 1_000,
      rep_update_interval_ms: 30_000,
    }
  }
}

/// `ceil((r+1)/2)`, the majority quorum size for a replica set of size `r`.
pub fn majority(r: u32) -> u32 {
  (r + 2) / 2
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn majority_quorum_sizes() {
    assert_eq!(majority(1), 1);
    assert_eq!(majority(2), 2);
    assert_eq!(majority(3), 2);
    assert_eq!(majority(4), 3);
    assert_eq!(majority(5), 3);
  }

  #[test]
  fn quorum_factor_validated_by_construction() {
    let config = Config::default();
    assert!(2 * config.quorum_factor > config.replication_factor);
  }
}
