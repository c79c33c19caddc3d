use std::collections::HashMap;

use crate::common::{Decision, IOCtx, NodeId, PaxosId};
use crate::message::{NetworkMessage, PaxosMessage};

#[derive(Debug, Default, Clone)]
struct AcceptorState {
  promised_round: u32,
  accepted: Option<(u32, Decision)>,
  learners: Vec<NodeId>,
}

/// One Acceptor role, multiplexed over every `paxos_id` this node
/// participates in as a TM/RTM group member. Persists only in-memory
/// state, per §5 ("Shared resources").
#[derive(Debug)]
pub struct AcceptorTable {
  self_node: NodeId,
  state: HashMap<PaxosId, AcceptorState>,
}

impl AcceptorTable {
  pub fn new(self_node: NodeId) -> AcceptorTable {
    AcceptorTable { self_node, state: HashMap::new() }
  }

  pub fn self_node(&self) -> &NodeId {
    &self.self_node
  }

  /// Handles `Prepare`/`Accept` from a proposer. Returns the set of
  /// `(paxos_id, value, from)` accept-broadcasts that should be observed
  /// by this node's local Learner (the acceptor notifies every
  /// subscribed learner, including its own node's, symmetrically).
  pub fn handle<IO: IOCtx>(
    &mut self,
    io_ctx: &mut IO,
    msg: PaxosMessage,
  ) -> Vec<(PaxosId, Decision, NodeId)> {
    match msg {
      PaxosMessage::Prepare { paxos_id, round, from } => {
        let state = self.state.entry(paxos_id.clone()).or_default();
        if round >= state.promised_round {
          state.promised_round = round;
          let accepted = state.accepted;
          io_ctx.send(
            &from,
            NetworkMessage::Paxos(PaxosMessage::Promise {
              paxos_id,
              round,
              accepted,
              from: self.self_node.clone(),
            }),
          );
        } else {
          let promised_round = state.promised_round;
          io_ctx.send(
            &from,
            NetworkMessage::Paxos(PaxosMessage::PrepareRejected {
              paxos_id,
              round: promised_round,
              from: self.self_node.clone(),
            }),
          );
        }
        Vec::new()
      }
      PaxosMessage::Accept { paxos_id, round, value, from } => {
        let state = self.state.entry(paxos_id.clone()).or_default();
        if round >= state.promised_round {
          state.promised_round = round;
          state.accepted = Some((round, value));
          let learners = state.learners.clone();
          io_ctx.send(
            &from,
            NetworkMessage::Paxos(PaxosMessage::Accepted {
              paxos_id: paxos_id.clone(),
              round,
              value,
              from: self.self_node.clone(),
            }),
          );
          for learner in &learners {
            io_ctx.send(
              learner,
              NetworkMessage::Paxos(PaxosMessage::Accepted {
                paxos_id: paxos_id.clone(),
                round,
                value,
                from: self.self_node.clone(),
              }),
            );
          }
          vec![(paxos_id, value, self.self_node.clone())]
        } else {
          let promised_round = state.promised_round;
          io_ctx.send(
            &from,
            NetworkMessage::Paxos(PaxosMessage::AcceptRejected {
              paxos_id,
              round: promised_round,
              from: self.self_node.clone(),
            }),
          );
          Vec::new()
        }
      }
      _ => Vec::new(),
    }
  }

  /// Learner (re)subscription (also used on takeover re-seed, §4.2).
  /// Returns the already-accepted value, if any, so the caller can
  /// replay it to the newly subscribed learner without breaking safety.
  pub fn subscribe(&mut self, paxos_id: &PaxosId, learner: &NodeId) -> Option<(Decision, NodeId)> {
    let state = self.state.entry(paxos_id.clone()).or_default();
    if !state.learners.contains(learner) {
      state.learners.push(learner.clone());
    }
    state.accepted.map(|(_, value)| (value, self.self_node.clone()))
  }

  /// Drops bookkeeping for `paxos_ids`, part of GC (§4.2).
  pub fn delete_ids(&mut self, paxos_ids: &[PaxosId]) {
    for id in paxos_ids {
      self.state.remove(id);
    }
  }
}

impl Default for AcceptorTable {
  fn default() -> AcceptorTable {
    AcceptorTable::new(NodeId(String::new()))
  }
}
