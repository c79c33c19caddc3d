//! Paxos per key-replica (§4.4). One consensus instance per `paxos_id =
//! (tx_id, key_replica)`; the acceptors of every such instance are the
//! fixed TM/RTM group for that transaction (R of them), so that the
//! decided vote for a replica survives the coordinating TM's crash. The
//! proposer role is driven by the TP that owns the replica (its initial
//! vote) or by a taking-over RTM (forcing `abort`); the acceptor and
//! learner roles live on the TM/RTM nodes.

pub mod acceptor;
pub mod learner;
pub mod proposer;

use crate::common::{Decision, IOCtx, NodeId, PaxosId};
use crate::message::PaxosMessage;

/// Bundles the Acceptor and Learner roles that co-occur on every TM/RTM
/// node for a transaction. Kept as one actor (rather than two) since they
/// always act together here; each still owns a disjoint table, so no
/// invariant from §5 ("no shared mutable structures across actors") is
/// weakened by the bundling.
#[derive(Debug)]
pub struct PaxosActor {
  pub acceptors: acceptor::AcceptorTable,
  pub learners: learner::LearnerTable,
  /// Used only when this TM/RTM node takes over an undecided transaction
  /// and must drive its own proposer (§4.2). A TP's own proposer lives in
  /// `TpActor`, not here; the two never address the same `paxos_id`.
  pub proposers: proposer::ProposerTable,
}

impl PaxosActor {
  pub fn new(self_node: NodeId, quorum: u32) -> PaxosActor {
    PaxosActor {
      acceptors: acceptor::AcceptorTable::new(self_node),
      learners: learner::LearnerTable::with_quorum(quorum),
      proposers: proposer::ProposerTable::new(),
    }
  }

  /// Handles every Paxos-addressed message this node receives: `Prepare`/
  /// `Accept` (acceptor role), `SubscribeLearner`/`StartProposer`
  /// (self-addressed commands), and `Promise`/`PrepareRejected`/
  /// `Accepted`/`AcceptRejected` (takeover-proposer role). Returns newly
  /// decided `(paxos_id, value)` pairs for the caller to report to the
  /// local TM/RTM table.
  pub fn handle<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: PaxosMessage) -> Vec<(PaxosId, Decision)> {
    match msg {
      PaxosMessage::SubscribeLearner { paxos_id, learner } => {
        return self.subscribe_learner(io_ctx, &paxos_id, &learner).into_iter().collect();
      }
      PaxosMessage::StartProposer { paxos_id, acceptors, quorum, round, value } => {
        let self_node = self.acceptors.self_node().clone();
        self.proposers.start_seeded(io_ctx, self_node, &paxos_id, &acceptors, quorum, round, value);
        return Vec::new();
      }
      PaxosMessage::DeleteIds { paxos_ids } => {
        self.acceptors.delete_ids(&paxos_ids);
        self.learners.delete_ids(&paxos_ids);
        return Vec::new();
      }
      PaxosMessage::Accepted { ref paxos_id, value, ref from, .. } => {
        // Feed the co-located learner with every acceptor's vote, not only
        // this node's own (§4.4 "R*N Paxos instances" needs a majority of
        // *distinct* acceptors observed, not just self), in addition to the
        // takeover-proposer's own phase-2 bookkeeping.
        let decided: Vec<(PaxosId, Decision)> = self
          .learners
          .observe_accepted(paxos_id, from, value)
          .into_iter()
          .map(|value| (paxos_id.clone(), value))
          .collect();
        self.proposers.handle(io_ctx, msg);
        return decided;
      }
      PaxosMessage::Promise { .. } | PaxosMessage::PrepareRejected { .. } | PaxosMessage::AcceptRejected { .. } => {
        self.proposers.handle(io_ctx, msg);
        return Vec::new();
      }
      _ => {}
    }
    let accepted_broadcasts = self.acceptors.handle(io_ctx, msg);
    let mut decided = Vec::new();
    for (paxos_id, value, from) in accepted_broadcasts {
      if let Some(value) = self.learners.observe_accepted(&paxos_id, &from, value) {
        decided.push((paxos_id, value));
      }
    }
    decided
  }

  /// Re-seed a learner for `paxos_id` during RTM takeover (§4.2 "Takeover
  /// procedure"): a learner may be re-seeded without violating safety,
  /// since the acceptor replays its already-accepted value, if any, to
  /// every newly-subscribed learner.
  pub fn reseed_learner(&mut self, paxos_id: &PaxosId) {
    self.learners.reseed(paxos_id);
  }

  pub fn subscribe_learner<IO: IOCtx>(
    &mut self,
    io_ctx: &mut IO,
    paxos_id: &PaxosId,
    learner: &NodeId,
  ) -> Option<(PaxosId, Decision)> {
    let mut decided = None;
    if let Some((value, from)) = self.acceptors.subscribe(paxos_id, learner) {
      if let Some(value) = self.learners.observe_accepted(paxos_id, &from, value) {
        decided = Some((paxos_id.clone(), value));
      }
    }
    let _ = io_ctx;
    decided
  }
}
