use std::collections::{HashMap, HashSet};

use crate::common::{Decision, NodeId, PaxosId};

#[derive(Debug, Default)]
struct LearnerState {
  /// Distinct acceptors that have reported accepting each value.
  accepted_by: HashMap<Decision, HashSet<NodeId>>,
  decided: Option<Decision>,
}

/// Counts R distinct `Accepted` notifications per `paxos_id`; the first
/// value accepted by a majority is the decided value (§4.4). A learner
/// may be re-seeded by takeover without violating safety: re-seeding
/// clears local bookkeeping but the acceptors replay their already-
/// accepted values on resubscription (`AcceptorTable::subscribe`), so a
/// previously decided value is always recovered, never overwritten.
#[derive(Debug, Default)]
pub struct LearnerTable {
  state: HashMap<PaxosId, LearnerState>,
  quorum: u32,
}

impl LearnerTable {
  pub fn with_quorum(quorum: u32) -> LearnerTable {
    LearnerTable { state: HashMap::new(), quorum }
  }

  /// Records one acceptor's `Accepted(value)` for `paxos_id`. Returns
  /// `Some(value)` exactly once, the instant this report brings some
  /// value's count to the majority threshold; once decided, `decided`
  /// never changes (I3) and further reports are no-ops.
  pub fn observe_accepted(&mut self, paxos_id: &PaxosId, from: &NodeId, value: Decision) -> Option<Decision> {
    let quorum = self.quorum.max(1);
    let state = self.state.entry(paxos_id.clone()).or_default();
    if state.decided.is_some() {
      return None;
    }
    let set = state.accepted_by.entry(value).or_default();
    set.insert(from.clone());
    if set.len() as u32 >= quorum {
      state.decided = Some(value);
      Some(value)
    } else {
      None
    }
  }

  pub fn decided(&self, paxos_id: &PaxosId) -> Option<Decision> {
    self.state.get(paxos_id).and_then(|s| s.decided)
  }

  /// Drops bookkeeping for `paxos_id` so a fresh takeover can re-subscribe
  /// cleanly; any already-decided value is recovered via acceptor replay.
  pub fn reseed(&mut self, paxos_id: &PaxosId) {
    self.state.remove(paxos_id);
  }

  /// Removes a transaction's learner state entirely, part of GC (§4.2).
  pub fn delete_ids(&mut self, paxos_ids: &[PaxosId]) {
    for id in paxos_ids {
      self.state.remove(id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::common::{Key, TxId};

  fn pid() -> PaxosId {
    PaxosId(TxId(7), Key("k".into()))
  }

  #[test]
  fn decides_once_majority_of_distinct_acceptors_agree() {
    let mut learner = LearnerTable::with_quorum(2);
    assert_eq!(learner.observe_accepted(&pid(), &NodeId("a".into()), Decision::Prepared), None);
    assert_eq!(
      learner.observe_accepted(&pid(), &NodeId("b".into()), Decision::Prepared),
      Some(Decision::Prepared)
    );
  }

  #[test]
  fn decision_is_final_even_if_conflicting_value_reported_later() {
    let mut learner = LearnerTable::with_quorum(2);
    learner.observe_accepted(&pid(), &NodeId("a".into()), Decision::Prepared);
    learner.observe_accepted(&pid(), &NodeId("b".into()), Decision::Prepared);
    assert_eq!(learner.observe_accepted(&pid(), &NodeId("c".into()), Decision::Abort), None);
    assert_eq!(learner.decided(&pid()), Some(Decision::Prepared));
  }

  #[test]
  fn duplicate_acceptor_report_does_not_double_count() {
    let mut learner = LearnerTable::with_quorum(2);
    learner.observe_accepted(&pid(), &NodeId("a".into()), Decision::Prepared);
    assert_eq!(learner.observe_accepted(&pid(), &NodeId("a".into()), Decision::Prepared), None);
  }
}
