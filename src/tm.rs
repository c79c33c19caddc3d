//! The Transaction Manager / Replicated Transaction Manager (§4.2): the
//! largest single module, driving the commit state machine that ties
//! TLog validation (via the TP) to per-key Paxos decisions. TM and RTM
//! share this identical state machine, differentiated only by
//! `role_index` — mirroring the teacher's TM/RM split in
//! `stmpaxos2pc_tm.rs`/`stmpaxos2pc_rm.rs`, generalized from a single
//! coordinator-and-N-participants shape to the TM-plus-R-RTMs shape this
//! spec calls for.

use std::collections::HashMap;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::common::{Decision, IOCtx, ItemId, Key, NodeId, PaxosId, Status, TimerInput, TraceEvent, TxId};
use crate::config::Config;
use crate::message::{FdMessage, NetworkMessage, PaxosMessage, TmMessage, TpMessage};
use crate::overlay::Overlay;
use crate::rtm::{RtmDescriptor, RtmMembership};
use crate::tlog::{TLog, TLogEntry};

/// One TLog entry's worth of Paxos state at the TM/RTM (§3, ItemState).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemState {
  pub item_id: ItemId,
  pub tx_id: TxId,
  pub tlog_entry: TLogEntry,
  /// One `(paxos_id, rtlog, tp_pid?)` per replica of `tlog_entry.key`; the
  /// `tp_pid` is filled in as each TP's `register_TP` arrives.
  pub paxids_rtlogs_tps: Vec<(PaxosId, TLogEntry, Option<NodeId>)>,
  pub num_prepared: u32,
  pub num_abort: u32,
  pub decision: Option<Decision>,
  pub status: Status,
  pub hold_back: Vec<TmMessage>,
}

impl ItemState {
  fn record_vote(&mut self, decision: Decision) {
    match decision {
      Decision::Prepared => self.num_prepared += 1,
      Decision::Abort => self.num_abort += 1,
    }
  }
}

/// A transaction's state at the TM/RTM (§3, TxState).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxState {
  pub tx_id: TxId,
  pub client: NodeId,
  pub clients_id: u64,
  pub tm_pid: NodeId,
  pub rtms: Vec<RtmDescriptor>,
  pub items: Vec<ItemId>,
  /// The fixed TM+RTM acceptor group every `paxos_id` of this transaction
  /// shares (§4.4's architectural resolution: Paxos is decided among the
  /// TM/RTM group, not the key's own replica set).
  pub acceptors: Vec<NodeId>,
  pub role_index: u32,
  pub num_paxdecided: u32,
  pub num_tps_registered: u32,
  pub decision: Option<Decision>,
  pub status: Status,
  pub hold_back: Vec<TmMessage>,
}

impl TxState {
  fn total_items(&self) -> u32 {
    self.items.len() as u32
  }
}

#[derive(Debug)]
pub struct TmActor {
  self_node: NodeId,
  config: Config,
  txs: HashMap<TxId, TxState>,
  items: HashMap<ItemId, ItemState>,
  paxos_to_item: HashMap<PaxosId, ItemId>,
  rtm_membership: RtmMembership,
  /// `register_TP` addressed to an `item_id` this RTM hasn't learned about
  /// yet (its `init_RTM` lost the race against the TP's direct send, §4.2
  /// "Hold-back buffers"). Drained in FIFO order the instant the matching
  /// `init_RTM` creates the `ItemState` (I5).
  held_by_item: HashMap<ItemId, Vec<TmMessage>>,
  /// `learner_decide` addressed to a `paxos_id` this RTM can't yet map back
  /// to an `item_id` (same race, via `paxos_to_item`).
  held_by_paxos: HashMap<PaxosId, Vec<TmMessage>>,
}

impl TmActor {
  pub fn new(self_node: NodeId, config: Config, rtm_ring_keys: Vec<Key>) -> TmActor {
    let rtm_membership = RtmMembership::new(rtm_ring_keys, &config);
    TmActor {
      self_node,
      config,
      txs: HashMap::new(),
      items: HashMap::new(),
      paxos_to_item: HashMap::new(),
      rtm_membership,
      held_by_item: HashMap::new(),
      held_by_paxos: HashMap::new(),
    }
  }

  pub fn rtm_membership(&self) -> &RtmMembership {
    &self.rtm_membership
  }

  pub fn rtm_membership_mut(&mut self) -> &mut RtmMembership {
    &mut self.rtm_membership
  }

  pub fn self_node(&self) -> &NodeId {
    &self.self_node
  }

  pub fn is_ready(&self) -> bool {
    self.rtm_membership.is_ready()
  }

  pub fn tx(&self, tx_id: &TxId) -> Option<&TxState> {
    self.txs.get(tx_id)
  }

  // ---------------------------------------------------------------------------------------------
  //  commit(TLog) -> commit | abort
  // ---------------------------------------------------------------------------------------------

  /// `commit(TLog)`, dispatched by a local client. If this TM is not yet
  /// ready (fewer than `rtm_min_known` RTMs resolved, §4.5), the commit is
  /// rejected outright with `connection` — the "forward to a ready TM"
  /// path described in §4.5 requires a directory-service lookup this core
  /// does not own (see DESIGN.md "RTM replacement threshold"); the
  /// `ForwardedCommit` message exists for a deployment that supplies one.
  pub fn handle_commit<IO: IOCtx, O: Overlay>(
    &mut self,
    io_ctx: &mut IO,
    overlay: &O,
    client: NodeId,
    clients_id: u64,
    tlog: TLog,
  ) -> Result<TxId, crate::error::TxError> {
    if !self.is_ready() {
      io_ctx.send(
        &client,
        NetworkMessage::Tm(TmMessage::CommitReply { clients_id, decision: Decision::Abort }),
      );
      return Err(crate::error::TxError::Connection);
    }
    if tlog.is_empty() {
      return Err(crate::error::TxError::Unknown("empty TLog".to_string()));
    }

    let tx_id = TxId(io_ctx.rand().next_u64());
    let rtm_pids = self.rtm_membership.known_pids();
    let mut acceptors = vec![self.self_node.clone()];
    acceptors.extend(rtm_pids.iter().cloned());

    let mut item_ids = Vec::new();
    let mut item_states = Vec::new();
    for entry in &tlog {
      let item_id = ItemId(io_ctx.rand().next_u64());
      let replica_keys = overlay.replica_keys(&entry.key);
      let paxids_rtlogs_tps: Vec<(PaxosId, TLogEntry, Option<NodeId>)> = replica_keys
        .iter()
        .map(|replica_key| (PaxosId(tx_id, replica_key.clone()), entry.clone(), None))
        .collect();

      for (paxos_id, rtlog, _) in &paxids_rtlogs_tps {
        let tp_node = overlay.route(&rtlog.key);
        io_ctx.send(
          &tp_node,
          NetworkMessage::Tp(TpMessage::InitTp {
            tx_id,
            rtms: self.rtm_membership.descriptors().to_vec(),
            acceptors: acceptors.clone(),
            tm: self.self_node.clone(),
            rtlog: rtlog.clone(),
            item_id,
            paxos_id: paxos_id.clone(),
          }),
        );
        // Seed this node's learner for `paxos_id` against every acceptor in
        // the TM+RTM group (§2 "seeds the local learner with R*N Paxos
        // instances"), not just this node's own co-located acceptor —
        // otherwise the learner can never see a majority of distinct
        // accepts and every transaction would have to wait for takeover to
        // resolve. Symmetric with how `takeover` re-subscribes (§4.2).
        for acceptor in &acceptors {
          io_ctx.send(
            acceptor,
            NetworkMessage::Paxos(PaxosMessage::SubscribeLearner {
              paxos_id: paxos_id.clone(),
              learner: self.self_node.clone(),
            }),
          );
        }
        self.paxos_to_item.insert(paxos_id.clone(), item_id);
      }

      item_states.push(ItemState {
        item_id,
        tx_id,
        tlog_entry: entry.clone(),
        paxids_rtlogs_tps,
        num_prepared: 0,
        num_abort: 0,
        decision: None,
        status: Status::Ok,
        hold_back: Vec::new(),
      });
      item_ids.push(item_id);
    }

    let tx_state = TxState {
      tx_id,
      client: client.clone(),
      clients_id,
      tm_pid: self.self_node.clone(),
      rtms: self.rtm_membership.descriptors().to_vec(),
      items: item_ids,
      acceptors: acceptors.clone(),
      role_index: 0,
      num_paxdecided: 0,
      num_tps_registered: 0,
      decision: None,
      status: Status::Ok,
      hold_back: Vec::new(),
    };

    for rtm in rtm_pids {
      io_ctx.send(
        &rtm,
        NetworkMessage::Tm(TmMessage::InitRtm {
          tx_state: tx_state.clone(),
          item_states: item_states.clone(),
          role_index: self.rtm_role_index(&tx_state, &rtm),
        }),
      );
    }

    for item in item_states {
      self.items.insert(item.item_id, item);
    }
    self.txs.insert(tx_id, tx_state);
    io_ctx.trace(TraceEvent::CommitStarted(tx_id));
    io_ctx.defer(2 * self.config.tx_timeout_ms, TimerInput::TidIsDone(tx_id));
    Ok(tx_id)
  }

  fn rtm_role_index(&self, tx_state: &TxState, rtm: &NodeId) -> u32 {
    tx_state
      .rtms
      .iter()
      .find(|d| d.pid.as_ref() == Some(rtm))
      .map(|d| d.index)
      .unwrap_or(0)
  }

  // ---------------------------------------------------------------------------------------------
  //  init_RTM: an RTM receiving its replicated copy of TxState/ItemStates
  // ---------------------------------------------------------------------------------------------

  pub fn handle_init_rtm<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: TmMessage) {
    let TmMessage::InitRtm { tx_state, item_states, role_index } = msg else { return };
    let tx_id = tx_state.tx_id;
    let item_ids: Vec<ItemId> = item_states.iter().map(|i| i.item_id).collect();
    let mut all_paxos_ids = Vec::new();
    for item in &item_states {
      for (paxos_id, _, _) in &item.paxids_rtlogs_tps {
        // Same fix as `handle_commit`: subscribe against every acceptor in
        // the TM+RTM group, not just this node's own, or this RTM's
        // learner can never independently observe a majority.
        for acceptor in &tx_state.acceptors {
          io_ctx.send(
            acceptor,
            NetworkMessage::Paxos(PaxosMessage::SubscribeLearner {
              paxos_id: paxos_id.clone(),
              learner: self.self_node.clone(),
            }),
          );
        }
        self.paxos_to_item.insert(paxos_id.clone(), item.item_id);
        all_paxos_ids.push(paxos_id.clone());
      }
      self.items.insert(item.item_id, item.clone());
    }
    let mut tx_state = tx_state;
    tx_state.role_index = role_index;
    tx_state.status = Status::Ok;
    if role_index != 0 {
      // §4.5: an RTM watches the TM it is standing by for, so a crash
      // suspicion can drive takeover without waiting for `tid_isdone`.
      io_ctx.send(&self.self_node.clone(), NetworkMessage::Fd(FdMessage::Subscribe { peer: tx_state.tm_pid.clone() }));
    }
    self.txs.insert(tx_id, tx_state);
    io_ctx.defer(2 * self.config.tx_timeout_ms, TimerInput::TidIsDone(tx_id));

    // I5: this RTM is now `Ok` for `tx_id`/these `item_id`s. Replay, in
    // FIFO order, anything that arrived for them before `init_RTM` did.
    for item_id in item_ids {
      if let Some(held) = self.held_by_item.remove(&item_id) {
        for held_msg in held {
          self.dispatch_held(io_ctx, held_msg);
        }
      }
    }
    for paxos_id in all_paxos_ids {
      if let Some(held) = self.held_by_paxos.remove(&paxos_id) {
        for held_msg in held {
          self.dispatch_held(io_ctx, held_msg);
        }
      }
    }
  }

  /// Replays one previously-held-back message through its ordinary handler.
  fn dispatch_held<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: TmMessage) {
    match msg {
      TmMessage::RegisterTp { .. } => self.handle_register_tp(io_ctx, msg),
      TmMessage::LearnerDecide { .. } => {
        self.handle_learner_decide(io_ctx, msg);
      }
      _ => {}
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  register_TP
  // ---------------------------------------------------------------------------------------------

  pub fn handle_register_tp<IO: IOCtx>(&mut self, _io_ctx: &mut IO, msg: TmMessage) {
    let TmMessage::RegisterTp { tx_id, item_id, paxos_id, tp_pid } = msg else { return };
    let Some(item) = self.items.get_mut(&item_id) else {
      // This RTM's `init_RTM` hasn't arrived yet (§4.2 "init_RTM and
      // learner_decide may race"); hold back rather than drop (I5).
      self.held_by_item.entry(item_id).or_default().push(TmMessage::RegisterTp {
        tx_id,
        item_id,
        paxos_id,
        tp_pid,
      });
      return;
    };
    if let Some(slot) = item.paxids_rtlogs_tps.iter_mut().find(|(pid, _, _)| *pid == paxos_id) {
      slot.2 = Some(tp_pid);
    }
    if let Some(tx) = self.txs.get_mut(&tx_id) {
      tx.num_tps_registered += 1;
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  learner_decide: a per-key-replica Paxos instance has decided
  // ---------------------------------------------------------------------------------------------

  /// Returns `Some((tx_id, decision))` the instant the whole transaction
  /// newly decides, so the caller can drive garbage collection.
  pub fn handle_learner_decide<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: TmMessage) -> Option<(TxId, Decision)> {
    let TmMessage::LearnerDecide { paxos_id, decision } = msg else { return None };
    let Some(item_id) = self.paxos_to_item.get(&paxos_id).copied() else {
      // Same race as `register_TP`: this RTM doesn't yet know `paxos_id`.
      self.held_by_paxos.entry(paxos_id.clone()).or_default().push(TmMessage::LearnerDecide { paxos_id, decision });
      return None;
    };
    let item = self.items.get_mut(&item_id)?;
    if item.decision.is_some() {
      return None;
    }
    item.record_vote(decision);
    let quorum = self.config.quorum_factor;
    let item_decision = if item.num_prepared >= quorum {
      Some(Decision::Prepared)
    } else if item.num_abort >= quorum {
      Some(Decision::Abort)
    } else {
      None
    };
    let Some(item_decision) = item_decision else { return None };
    item.decision = Some(item_decision);
    let tx_id = item.tx_id;
    io_ctx.trace(TraceEvent::ItemDecided(tx_id, item_id, item_decision));

    let tx = self.txs.get_mut(&tx_id)?;
    tx.num_paxdecided += 1;
    if tx.decision.is_some() {
      return None;
    }
    if item_decision == Decision::Abort {
      // I4: any single aborted item forces the whole transaction to abort,
      // independent of whether every item has reported yet.
      tx.decision = Some(Decision::Abort);
    } else if tx.num_paxdecided >= tx.total_items() {
      tx.decision = Some(Decision::Prepared);
    }
    let tx_decision = tx.decision?;
    io_ctx.trace(TraceEvent::TxDecided(tx_id, tx_decision));
    self.finish_transaction(io_ctx, tx_id, tx_decision);
    Some((tx_id, tx_decision))
  }

  // ---------------------------------------------------------------------------------------------
  //  Garbage collection (§4.2 "Garbage collection")
  // ---------------------------------------------------------------------------------------------

  fn finish_transaction<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId, decision: Decision) {
    let Some(tx) = self.txs.get(&tx_id).cloned() else { return };

    for item_id in &tx.items {
      let Some(item) = self.items.get(item_id) else { continue };
      for (paxos_id, rtlog, tp_pid) in &item.paxids_rtlogs_tps {
        if let Some(tp_pid) = tp_pid {
          io_ctx.send(
            tp_pid,
            NetworkMessage::Tp(TpMessage::CommitReply { paxos_id: paxos_id.clone(), rtlog: rtlog.clone(), decision }),
          );
        }
      }
    }

    io_ctx.send(&tx.client, NetworkMessage::Tm(TmMessage::CommitReply { clients_id: tx.clients_id, decision }));

    for rtm in self.rtm_membership.known_pids() {
      io_ctx.send(&rtm, NetworkMessage::Tm(TmMessage::Delete { tx_id, decision }));
    }

    io_ctx.defer(self.config.tx_timeout_ms, TimerInput::LearnerDeleteIds(tx_id));
  }

  /// Handles a peer TM/RTM's `tx_tm_rtm_delete`: an RTM (never the
  /// originating TM, which drives its own `finish_transaction`) drops its
  /// copy once it has both seen every TP registration and the TM's delete.
  pub fn handle_delete<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: TmMessage) {
    let TmMessage::Delete { tx_id, decision: _ } = msg else { return };
    if let Some(tx) = self.txs.get(&tx_id) {
      if tx.num_tps_registered >= tx.total_items() {
        self.garbage_collect(io_ctx, tx_id);
      }
    }
  }

  /// The delayed `learner_deleteids` sweep: drops Paxos/TM bookkeeping for
  /// `tx_id`, absorbing late learner traffic first (§4.2).
  pub fn handle_learner_delete_ids<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId) {
    self.garbage_collect_inner(io_ctx, tx_id);
  }

  fn garbage_collect<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId) {
    self.garbage_collect_inner(io_ctx, tx_id);
    io_ctx.trace(TraceEvent::TxGarbageCollected(tx_id));
  }

  fn garbage_collect_inner<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId) {
    if let Some(tx) = self.txs.remove(&tx_id) {
      if tx.role_index != 0 {
        io_ctx.send(&self.self_node.clone(), NetworkMessage::Fd(FdMessage::Unsubscribe { peer: tx.tm_pid.clone() }));
      }
      let mut paxos_ids = Vec::new();
      for item_id in tx.items {
        if let Some(item) = self.items.remove(&item_id) {
          for (paxos_id, _, _) in item.paxids_rtlogs_tps {
            self.paxos_to_item.remove(&paxos_id);
            paxos_ids.push(paxos_id);
          }
        }
      }
      if !paxos_ids.is_empty() {
        io_ctx.send(&self.self_node.clone(), NetworkMessage::Paxos(PaxosMessage::DeleteIds { paxos_ids }));
      }
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Failure-detector-driven takeover (§4.5, §2 "FD")
  // ---------------------------------------------------------------------------------------------

  /// A peer this RTM was watching (via FD subscription in `handle_init_rtm`)
  /// is now suspected crashed. Every still-undecided transaction for which
  /// that peer was the TM begins takeover, exactly as the `tid_isdone`
  /// timeout path does.
  pub fn handle_peer_crash<IO: IOCtx>(&mut self, io_ctx: &mut IO, pid: NodeId) {
    let suspect_txs: Vec<TxId> = self
      .txs
      .values()
      .filter(|tx| tx.role_index != 0 && tx.tm_pid == pid && tx.decision.is_none())
      .map(|tx| tx.tx_id)
      .collect();
    for tx_id in suspect_txs {
      self.takeover(io_ctx, tx_id);
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Timeout / takeover (§4.2 "Takeover procedure", §5 "Timeouts")
  // ---------------------------------------------------------------------------------------------

  /// `tid_isdone`: fires ~2x `tx_timeout_ms` after commit was dispatched.
  /// The originating TM (`role_index == 0`) simply lets its own commit
  /// continue running; any RTM whose transaction is still undecided
  /// begins a takeover.
  pub fn handle_tid_is_done<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId) {
    let Some(tx) = self.txs.get(&tx_id) else { return };
    if tx.decision.is_some() || tx.role_index == 0 {
      return;
    }
    self.takeover(io_ctx, tx_id);
  }

  /// An RTM decides (via timeout or FD suspicion) to take over: seeds its
  /// own role index as the Paxos round, re-initializes a learner for
  /// every still-undecided `paxos_id`, propagates the subscription to
  /// every acceptor, then drives a proposer with `abort`. Paxos safety
  /// guarantees any pre-existing decision is preserved (§4.4).
  pub fn takeover<IO: IOCtx>(&mut self, io_ctx: &mut IO, tx_id: TxId) {
    let Some(tx) = self.txs.get(&tx_id).cloned() else { return };
    if tx.decision.is_some() {
      return;
    }
    io_ctx.trace(TraceEvent::TakeoverStarted(tx_id, tx.role_index));

    let quorum = self.config.quorum_factor;
    for item_id in &tx.items {
      let Some(item) = self.items.get(item_id) else { continue };
      if item.decision.is_some() {
        continue;
      }
      for (paxos_id, _, _) in &item.paxids_rtlogs_tps {
        for acceptor in &tx.acceptors {
          io_ctx.send(
            acceptor,
            NetworkMessage::Paxos(PaxosMessage::SubscribeLearner {
              paxos_id: paxos_id.clone(),
              learner: self.self_node.clone(),
            }),
          );
        }
        io_ctx.send(
          &self.self_node.clone(),
          NetworkMessage::Paxos(PaxosMessage::StartProposer {
            paxos_id: paxos_id.clone(),
            acceptors: tx.acceptors.clone(),
            quorum,
            round: tx.role_index,
            value: Decision::Abort,
          }),
        );
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::common::{mk_t, Timestamp};
  use crate::overlay::RingOverlay;
  use crate::tlog::Op;

  struct RecordingIo {
    rand: rand_xorshift::XorShiftRng,
    sent: Vec<(NodeId, NetworkMessage)>,
    deferred: Vec<(u64, TimerInput)>,
    traced: Vec<TraceEvent>,
  }

  impl IOCtx for RecordingIo {
    fn rand(&mut self) -> &mut rand_xorshift::XorShiftRng {
      &mut self.rand
    }
    fn now(&mut self) -> Timestamp {
      mk_t(0)
    }
    fn send(&mut self, to: &NodeId, msg: NetworkMessage) {
      self.sent.push((to.clone(), msg));
    }
    fn defer(&mut self, after_ms: u64, timer: TimerInput) {
      self.deferred.push((after_ms, timer));
    }
    fn trace(&mut self, event: TraceEvent) {
      self.traced.push(event);
    }
  }

  fn io() -> RecordingIo {
    use rand::SeedableRng;
    RecordingIo {
      rand: rand_xorshift::XorShiftRng::from_seed([9; 16]),
      sent: Vec::new(),
      deferred: Vec::new(),
      traced: Vec::new(),
    }
  }

  fn ready_tm() -> TmActor {
    let config = Config { rtm_min_known: 1, ..Config::default() };
    let mut tm = TmActor::new(NodeId("tm".into()), config, vec![Key("rtm0".into()), Key("rtm1".into())]);
    tm.rtm_membership_mut().update(&Key("rtm0".into()), Some(NodeId("rtm0".into())), None);
    tm.rtm_membership_mut().update(&Key("rtm1".into()), Some(NodeId("rtm1".into())), None);
    tm
  }

  fn write_tlog(key: &str, value: &str) -> TLog {
    vec![TLogEntry { op: Op::Write, key: Key(key.into()), value: Some(value.as_bytes().to_vec()), version_read: 0, ok: true }]
  }

  #[test]
  fn commit_rejected_outright_when_tm_not_ready() {
    let mut tm = TmActor::new(NodeId("tm".into()), Config::default(), vec![Key("a".into())]);
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into())], 1);
    let result = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v"));
    assert!(result.is_err());
  }

  #[test]
  fn commit_mints_tx_and_dispatches_init_tp_to_every_replica() {
    let mut tm = ready_tm();
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into()), NodeId("n2".into()), NodeId("n3".into())], 3);
    let tx_id = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v")).unwrap();
    assert!(tm.tx(&tx_id).is_some());
    let init_tp_count = io_ctx
      .sent
      .iter()
      .filter(|(_, msg)| matches!(msg, NetworkMessage::Tp(TpMessage::InitTp { .. })))
      .count();
    assert_eq!(init_tp_count, 3);
  }

  #[test]
  fn transaction_decides_commit_once_every_item_majority_prepares() {
    let mut tm = ready_tm();
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into()), NodeId("n2".into()), NodeId("n3".into())], 3);
    let tx_id = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v")).unwrap();
    let item_id = tm.tx(&tx_id).unwrap().items[0];
    let item = tm.items.get(&item_id).unwrap().clone();
    let paxos_ids: Vec<PaxosId> = item.paxids_rtlogs_tps.iter().map(|(p, _, _)| p.clone()).collect();

    let mut decided = None;
    for paxos_id in paxos_ids.iter().take(2) {
      decided = tm.handle_learner_decide(
        &mut io_ctx,
        TmMessage::LearnerDecide { paxos_id: paxos_id.clone(), decision: Decision::Prepared },
      );
    }
    assert_eq!(decided, Some((tx_id, Decision::Prepared)));
    assert!(io_ctx.sent.iter().any(|(to, msg)| {
      to == &NodeId("client".into())
        && matches!(msg, NetworkMessage::Tm(TmMessage::CommitReply { decision: Decision::Prepared, .. }))
    }));
  }

  #[test]
  fn single_aborted_item_forces_whole_transaction_to_abort() {
    let mut tm = ready_tm();
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into()), NodeId("n2".into()), NodeId("n3".into())], 3);
    let tx_id = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v")).unwrap();
    let item_id = tm.tx(&tx_id).unwrap().items[0];
    let item = tm.items.get(&item_id).unwrap().clone();
    let paxos_ids: Vec<PaxosId> = item.paxids_rtlogs_tps.iter().map(|(p, _, _)| p.clone()).collect();

    let mut decided = None;
    for paxos_id in paxos_ids.iter().take(2) {
      decided = tm.handle_learner_decide(
        &mut io_ctx,
        TmMessage::LearnerDecide { paxos_id: paxos_id.clone(), decision: Decision::Abort },
      );
    }
    assert_eq!(decided, Some((tx_id, Decision::Abort)));
  }

  #[test]
  fn rtm_ignores_tid_is_done_for_already_decided_tx() {
    let mut tm = ready_tm();
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into()), NodeId("n2".into()), NodeId("n3".into())], 3);
    let tx_id = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v")).unwrap();
    if let Some(tx) = tm.txs.get_mut(&tx_id) {
      tx.decision = Some(Decision::Prepared);
      tx.role_index = 1;
    }
    let before = io_ctx.sent.len();
    tm.handle_tid_is_done(&mut io_ctx, tx_id);
    assert_eq!(io_ctx.sent.len(), before);
  }

  #[test]
  fn rtm_takeover_starts_a_local_proposer_per_undecided_paxos_id() {
    let mut tm = ready_tm();
    let mut io_ctx = io();
    let overlay = RingOverlay::new(vec![NodeId("tm".into()), NodeId("n2".into()), NodeId("n3".into())], 3);
    let tx_id = tm.handle_commit(&mut io_ctx, &overlay, NodeId("client".into()), 1, write_tlog("k", "v")).unwrap();
    if let Some(tx) = tm.txs.get_mut(&tx_id) {
      tx.role_index = 1;
    }
    tm.takeover(&mut io_ctx, tx_id);
    assert!(io_ctx.sent.iter().any(|(_, msg)| matches!(msg, NetworkMessage::Paxos(PaxosMessage::StartProposer { .. }))));
  }

  /// §4.5 "FD": an RTM subscribes to its TM's liveness on `init_RTM`, and a
  /// `{crash, pid}` suspicion for that TM drives takeover for every
  /// still-undecided transaction it led — the same response `tid_isdone`
  /// produces, but triggered by suspicion instead of a weak timeout.
  #[test]
  fn peer_crash_drives_takeover_for_matching_undecided_transactions() {
    let mut rtm = TmActor::new(NodeId("rtm1".into()), Config { rtm_min_known: 1, ..Config::default() }, vec![]);
    let mut io_ctx = io();

    let tx_id = TxId(7);
    let item_id = ItemId(1);
    let paxos_id = PaxosId(tx_id, Key("k#r0".into()));
    let item_state = ItemState {
      item_id,
      tx_id,
      tlog_entry: TLogEntry { op: Op::Write, key: Key("k".into()), value: Some(b"v".to_vec()), version_read: 0, ok: true },
      paxids_rtlogs_tps: vec![(
        paxos_id.clone(),
        TLogEntry { op: Op::Write, key: Key("k".into()), value: Some(b"v".to_vec()), version_read: 0, ok: true },
        None,
      )],
      num_prepared: 0,
      num_abort: 0,
      decision: None,
      status: Status::Ok,
      hold_back: Vec::new(),
    };
    let tx_state = TxState {
      tx_id,
      client: NodeId("client".into()),
      clients_id: 1,
      tm_pid: NodeId("tm".into()),
      rtms: vec![],
      items: vec![item_id],
      acceptors: vec![NodeId("tm".into()), NodeId("rtm1".into())],
      role_index: 1,
      num_paxdecided: 0,
      num_tps_registered: 0,
      decision: None,
      status: Status::Ok,
      hold_back: Vec::new(),
    };
    rtm.handle_init_rtm(&mut io_ctx, TmMessage::InitRtm { tx_state, item_states: vec![item_state], role_index: 1 });
    assert!(io_ctx.sent.iter().any(|(_, msg)| matches!(
      msg,
      NetworkMessage::Fd(crate::message::FdMessage::Subscribe { peer }) if peer == &NodeId("tm".into())
    )));

    io_ctx.sent.clear();
    rtm.handle_peer_crash(&mut io_ctx, NodeId("tm".into()));
    assert!(io_ctx.sent.iter().any(|(_, msg)| matches!(msg, NetworkMessage::Paxos(PaxosMessage::StartProposer { .. }))));
  }

  /// §4.2 "init_RTM and learner_decide may race": a `register_TP` landing
  /// at an RTM before its `init_RTM` must be held back, not dropped, and
  /// replayed the instant `init_RTM` arrives (I5).
  #[test]
  fn register_tp_arriving_before_init_rtm_is_held_back_and_replayed() {
    let mut rtm = TmActor::new(NodeId("rtm1".into()), Config { rtm_min_known: 1, ..Config::default() }, vec![]);
    let mut io_ctx = io();

    let tx_id = TxId(1);
    let item_id = ItemId(1);
    let paxos_id = PaxosId(tx_id, Key("k#r0".into()));
    rtm.handle_register_tp(
      &mut io_ctx,
      TmMessage::RegisterTp { tx_id, item_id, paxos_id: paxos_id.clone(), tp_pid: NodeId("tp".into()) },
    );
    // Not yet known: no item to register against.
    assert!(rtm.items.get(&item_id).is_none());

    let item_state = ItemState {
      item_id,
      tx_id,
      tlog_entry: TLogEntry { op: Op::Write, key: Key("k".into()), value: Some(b"v".to_vec()), version_read: 0, ok: true },
      paxids_rtlogs_tps: vec![(
        paxos_id,
        TLogEntry { op: Op::Write, key: Key("k".into()), value: Some(b"v".to_vec()), version_read: 0, ok: true },
        None,
      )],
      num_prepared: 0,
      num_abort: 0,
      decision: None,
      status: Status::Ok,
      hold_back: Vec::new(),
    };
    let tx_state = TxState {
      tx_id,
      client: NodeId("client".into()),
      clients_id: 1,
      tm_pid: NodeId("tm".into()),
      rtms: vec![],
      items: vec![item_id],
      acceptors: vec![NodeId("tm".into()), NodeId("rtm1".into())],
      role_index: 1,
      num_paxdecided: 0,
      num_tps_registered: 0,
      decision: None,
      status: Status::Ok,
      hold_back: Vec::new(),
    };
    rtm.handle_init_rtm(
      &mut io_ctx,
      TmMessage::InitRtm { tx_state, item_states: vec![item_state], role_index: 1 },
    );

    // The held-back register_TP was replayed: the TP is now registered.
    let item = rtm.items.get(&item_id).unwrap();
    assert_eq!(item.paxids_rtlogs_tps[0].2, Some(NodeId("tp".into())));
    assert_eq!(rtm.tx(&tx_id).unwrap().num_tps_registered, 1);
  }
}
