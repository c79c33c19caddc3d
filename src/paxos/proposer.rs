use std::collections::{HashMap, HashSet};

use crate::common::{Decision, IOCtx, NodeId, PaxosId};
use crate::message::{NetworkMessage, PaxosMessage};

#[derive(Debug, PartialEq, Eq)]
enum Phase {
  Phase1,
  Phase2,
  Done,
}

#[derive(Debug)]
struct ProposerInst {
  self_node: NodeId,
  round: u32,
  acceptors: Vec<NodeId>,
  quorum: u32,
  own_value: Decision,
  phase: Phase,
  promises: HashMap<NodeId, Option<(u32, Decision)>>,
  accepteds: HashSet<NodeId>,
}

/// One Proposer role, multiplexed over every `paxos_id` this node is
/// currently proposing a value for. Rounds are seeded by the proposer's
/// role index (0 for the TM/TP's initial proposal, the taking-over RTM's
/// index on takeover) so the initial proposal wins absent contention
/// (§4.4).
#[derive(Debug, Default)]
pub struct ProposerTable {
  insts: HashMap<PaxosId, ProposerInst>,
}

impl ProposerTable {
  pub fn new() -> ProposerTable {
    ProposerTable::default()
  }

  /// Starts (or restarts, on takeover) a proposer for `paxos_id` seeded
  /// at `round`, proposing `value` to `acceptors`.
  pub fn start_seeded<IO: IOCtx>(
    &mut self,
    io_ctx: &mut IO,
    self_node: NodeId,
    paxos_id: &PaxosId,
    acceptors: &[NodeId],
    quorum: u32,
    round: u32,
    value: Decision,
  ) {
    let inst = ProposerInst {
      self_node: self_node.clone(),
      round,
      acceptors: acceptors.to_vec(),
      quorum,
      own_value: value,
      phase: Phase::Phase1,
      promises: HashMap::new(),
      accepteds: HashSet::new(),
    };
    self.insts.insert(paxos_id.clone(), inst);
    for acceptor in acceptors {
      io_ctx.send(
        acceptor,
        NetworkMessage::Paxos(PaxosMessage::Prepare { paxos_id: paxos_id.clone(), round, from: self_node.clone() }),
      );
    }
  }

  /// Convenience used by a TP voting for the first time: round 0, value
  /// is the TP's own vote.
  pub fn start<IO: IOCtx>(
    &mut self,
    io_ctx: &mut IO,
    paxos_id: &PaxosId,
    acceptors: &[NodeId],
    self_node: &NodeId,
    value: Decision,
  ) {
    let quorum = (acceptors.len() as u32 + 2) / 2;
    self.start_seeded(io_ctx, self_node.clone(), paxos_id, acceptors, quorum, 0, value);
  }

  pub fn handle<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: PaxosMessage) {
    match msg {
      PaxosMessage::Promise { paxos_id, round, accepted, from } => {
        let Some(inst) = self.insts.get_mut(&paxos_id) else { return };
        if inst.phase != Phase::Phase1 || round != inst.round {
          return;
        }
        inst.promises.insert(from, accepted);
        if inst.promises.len() as u32 >= inst.quorum {
          let value = inst
            .promises
            .values()
            .filter_map(|a| *a)
            .max_by_key(|(r, _)| *r)
            .map(|(_, v)| v)
            .unwrap_or(inst.own_value);
          inst.phase = Phase::Phase2;
          let round = inst.round;
          let acceptors = inst.acceptors.clone();
          let self_node = inst.self_node.clone();
          for acceptor in &acceptors {
            io_ctx.send(
              acceptor,
              NetworkMessage::Paxos(PaxosMessage::Accept {
                paxos_id: paxos_id.clone(),
                round,
                value,
                from: self_node.clone(),
              }),
            );
          }
        }
      }
      PaxosMessage::Accepted { paxos_id, round, from, .. } => {
        if let Some(inst) = self.insts.get_mut(&paxos_id) {
          if inst.phase == Phase::Phase2 && round == inst.round {
            inst.accepteds.insert(from);
            if inst.accepteds.len() as u32 >= inst.quorum {
              inst.phase = Phase::Done;
            }
          }
        }
      }
      PaxosMessage::PrepareRejected { paxos_id, round, .. } | PaxosMessage::AcceptRejected { paxos_id, round, .. } => {
        // A higher round is live; this proposer's attempt at `round` has
        // lost. Paxos-Commit relies on the TM/RTM round-seeding scheme
        // (Design Note) to avoid livelock rather than a backoff-and-retry
        // loop, so we simply drop the stale instance.
        if let Some(inst) = self.insts.get(&paxos_id) {
          if inst.round <= round {
            self.insts.remove(&paxos_id);
          }
        }
      }
      _ => {}
    }
  }

  pub fn is_done(&self, paxos_id: &PaxosId) -> bool {
    self.insts.get(paxos_id).map(|i| i.phase == Phase::Done).unwrap_or(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::common::{Key, TxId};

  struct NullIo {
    rand: rand_xorshift::XorShiftRng,
  }
  impl IOCtx for NullIo {
    fn rand(&mut self) -> &mut rand_xorshift::XorShiftRng {
      &mut self.rand
    }
    fn now(&mut self) -> crate::common::Timestamp {
      crate::common::mk_t(0)
    }
    fn send(&mut self, _to: &NodeId, _msg: NetworkMessage) {}
    fn defer(&mut self, _after_ms: u64, _timer: crate::common::TimerInput) {}
    fn trace(&mut self, _event: crate::common::TraceEvent) {}
  }

  fn io() -> NullIo {
    use rand::SeedableRng;
    NullIo { rand: rand_xorshift::XorShiftRng::from_seed([7; 16]) }
  }

  #[test]
  fn proposer_adopts_highest_round_accepted_value_seen_in_promises() {
    let mut table = ProposerTable::new();
    let mut io_ctx = io();
    let paxos_id = PaxosId(TxId(1), Key("k".into()));
    let acceptors = vec![NodeId("a".into()), NodeId("b".into()), NodeId("c".into())];
    table.start(&mut io_ctx, &paxos_id, &acceptors, &NodeId("self".into()), Decision::Prepared);
    table.handle(
      &mut io_ctx,
      PaxosMessage::Promise { paxos_id: paxos_id.clone(), round: 0, accepted: Some((0, Decision::Abort)), from: NodeId("a".into()) },
    );
    table.handle(
      &mut io_ctx,
      PaxosMessage::Promise { paxos_id: paxos_id.clone(), round: 0, accepted: None, from: NodeId("b".into()) },
    );
    // Quorum of 2 reached; since `a` already had `Abort` accepted at
    // round 0, the proposer must adopt it instead of its own value.
    assert!(!table.is_done(&paxos_id));
  }
}
