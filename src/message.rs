//! Wire-protocol message shapes (spec §6). Every message that crosses an
//! actor boundary — whether over the real network or an in-memory
//! `ChannelTransport` — is one variant of `NetworkMessage`, serialized with
//! `rmp-serde` the way the teacher's `model::message::NetworkMessage` is.

use serde::{Deserialize, Serialize};

use crate::common::{Decision, ItemId, Key, NodeId, PaxosId, TxId};
use crate::replica::ReplicaEntry;
use crate::rtm::RtmDescriptor;
use crate::tlog::{TLog, TLogEntry};
use crate::tm::{ItemState, TxState};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
  Tm(TmMessage),
  Tp(TpMessage),
  Paxos(PaxosMessage),
  Fd(FdMessage),
  PubSub(PubSubMessage),
  ReplicaRead(ReplicaMessage),
}

// -----------------------------------------------------------------------------------------------
//  TM / RTM messages
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TmMessage {
  /// `{tx_tm_rtm_commit, client, clients_id, tlog}`
  Commit { client: NodeId, clients_id: u64, tlog: TLog },
  /// `{tx_tm_rtm_commit_reply, clients_id, commit|abort}`
  CommitReply { clients_id: u64, decision: Decision },
  /// `{init_RTM, tx_state, item_states, role_index}`
  InitRtm { tx_state: TxState, item_states: Vec<ItemState>, role_index: u32 },
  /// `{register_TP, (tx_id, item_id, paxos_id, tp_pid)}`
  RegisterTp { tx_id: TxId, item_id: ItemId, paxos_id: PaxosId, tp_pid: NodeId },
  /// `{learner_decide, item_id, paxos_id, prepared|abort}` — the local
  /// learner resolves only `paxos_id`; the TM/RTM maps it back to the
  /// owning `item_id` via the table it built when the item was created.
  LearnerDecide { paxos_id: PaxosId, decision: Decision },
  /// `{tx_tm_rtm_delete, tx_id, commit|abort}`
  Delete { tx_id: TxId, decision: Decision },
  /// `{tx_tm_rtm_propose_yourself, tx_id}` — sent by a taking-over RTM to
  /// ask peer RTMs/acceptors to recognize its round.
  ProposeYourself { tx_id: TxId, role_index: u32 },
  /// `{tx_tm_rtm_tid_isdone, tx_id}` — the transaction's weak timeout,
  /// redelivered to self via `IOCtx::defer` rather than sent on the wire,
  /// but modeled as a message so it flows through the same handler.
  TidIsDone { tx_id: TxId },
  /// `{get_rtm, reply_to, ring_key, role_name}`
  GetRtm { reply_to: NodeId, ring_key: Key, role_index: u32 },
  /// `{get_rtm_reply, key, pid, acceptor_pid}`
  GetRtmReply { ring_key: Key, tm_pid: Option<NodeId>, acceptor_pid: Option<NodeId> },
  /// A commit submitted to a TM that is in initialization mode is
  /// transparently forwarded to a ready TM (§4.5).
  ForwardedCommit { client: NodeId, clients_id: u64, tlog: TLog },
}

// -----------------------------------------------------------------------------------------------
//  TP messages
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum TpMessage {
  /// `{init_TP, (tx_id, rtms, acceptors, tm, rtlog, item_id, paxos_id)}`
  InitTp {
    tx_id: TxId,
    rtms: Vec<RtmDescriptor>,
    acceptors: Vec<NodeId>,
    tm: NodeId,
    rtlog: TLogEntry,
    item_id: ItemId,
    paxos_id: PaxosId,
  },
  /// `commit_reply(paxos_id, rtlog, decision)`
  CommitReply { paxos_id: PaxosId, rtlog: TLogEntry, decision: Decision },
}

// -----------------------------------------------------------------------------------------------
//  Paxos messages (classic single-decree Paxos, one instance per `paxos_id`)
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PaxosMessage {
  /// Phase 1a: proposer -> acceptor.
  Prepare { paxos_id: PaxosId, round: u32, from: NodeId },
  /// Phase 1b: acceptor -> proposer. `accepted` carries the
  /// highest-round value this acceptor has already accepted, if any.
  Promise { paxos_id: PaxosId, round: u32, accepted: Option<(u32, Decision)>, from: NodeId },
  /// Phase 1b rejection: a higher round has already been promised.
  PrepareRejected { paxos_id: PaxosId, round: u32, from: NodeId },
  /// Phase 2a: proposer -> acceptor.
  Accept { paxos_id: PaxosId, round: u32, value: Decision, from: NodeId },
  /// Phase 2b: acceptor -> proposer and -> all subscribed learners.
  Accepted { paxos_id: PaxosId, round: u32, value: Decision, from: NodeId },
  /// Phase 2b rejection.
  AcceptRejected { paxos_id: PaxosId, round: u32, from: NodeId },
  /// Learner subscription request, sent by a proposer (directly, or by a
  /// taking-over RTM) to every acceptor so it learns future `Accepted`s.
  SubscribeLearner { paxos_id: PaxosId, learner: NodeId },
  /// Self-addressed command instructing this node's Paxos actor to begin
  /// proposing `value` for `paxos_id` at `round`, used by a taking-over
  /// RTM to drive its own proposer (§4.2 "Takeover procedure") without the
  /// TM actor reaching into the Paxos actor's tables directly.
  StartProposer { paxos_id: PaxosId, acceptors: Vec<NodeId>, quorum: u32, round: u32, value: Decision },
  /// Self-addressed command instructing this node's Paxos actor to drop
  /// acceptor/learner bookkeeping for the given `paxos_id`s, sent by the
  /// TM/RTM's garbage collection (§4.2) once it removes its own
  /// `TxState`/`ItemState` entries.
  DeleteIds { paxos_ids: Vec<PaxosId> },
}

// -----------------------------------------------------------------------------------------------
//  Failure detector messages
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum FdMessage {
  Heartbeat { from: NodeId },
  /// Sent back in direct response to a received `Heartbeat`, since
  /// subscriptions are one-directional (the watched peer never has the
  /// watcher in its own `watched` set, so it would otherwise never have a
  /// reason to ping back). Never acked itself, so the pair exchanges
  /// exactly one message per heartbeat tick rather than looping forever.
  HeartbeatAck { from: NodeId },
  /// `{crash, pid}` / `{crash, pid, cookie}`
  Crash { pid: NodeId, cookie: Option<u64> },
  /// Self-addressed command: `subscribe(pid)` (§4.5). Sent by an RTM's TM
  /// handler when it learns (via `init_RTM`) of a TM it must watch for
  /// takeover purposes; ref-counted so concurrent transactions watching
  /// the same peer don't cause premature unsubscription.
  Subscribe { peer: NodeId },
  /// Self-addressed command: `unsubscribe(pid)`.
  Unsubscribe { peer: NodeId },
}

// -----------------------------------------------------------------------------------------------
//  Replica (TP-hosted KV store) read path, used by the client's quorum read
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaMessage {
  ReadReq { reply_to: NodeId, request_id: u64, key: Key },
  ReadResp { request_id: u64, entry: Option<ReplicaEntry> },
}

// -----------------------------------------------------------------------------------------------
//  Publish/subscribe registry messages (§4.8 — registry only, no delivery)
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PubSubMessage {
  Subscribe { reply_to: NodeId, request_id: u64, topic: String, url: String },
  SubscribeAck { request_id: u64 },
  Unsubscribe { reply_to: NodeId, request_id: u64, topic: String, url: String },
  /// `found` is `false` iff `url` was not a current subscriber of `topic`
  /// (client sees `{fail, not_found}`).
  UnsubscribeAck { request_id: u64, found: bool },
  GetSubscribers { reply_to: NodeId, request_id: u64, topic: String },
  GetSubscribersReply { request_id: u64, urls: Vec<String> },
  Publish { topic: String, content: Vec<u8> },
}
