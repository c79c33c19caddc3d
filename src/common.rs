use rand::RngCore;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::message::NetworkMessage;

// -----------------------------------------------------------------------------------------------
//  Identifiers
// -----------------------------------------------------------------------------------------------

/// The address of a node process in the overlay. Routing/transport treat
/// this opaquely; only `Overlay`/`Transport` implementations interpret it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub String);

/// An opaque, hashable key in the DHT key space.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub String);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ItemId(pub u64);

/// Identifies one Paxos consensus instance: one per `(tx_id, key_replica)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PaxosId(pub TxId, pub Key);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub u128);

pub fn mk_t(millis: u128) -> Timestamp {
  Timestamp(millis)
}

pub fn cur_timestamp() -> Timestamp {
  mk_t(SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis())
}

impl Timestamp {
  pub fn add_ms(&self, ms: u64) -> Timestamp {
    Timestamp(self.0 + ms as u128)
  }
}

pub fn mk_txid(rand: &mut XorShiftRng) -> TxId {
  TxId(rand.next_u64())
}

pub fn mk_item_id(rand: &mut XorShiftRng) -> ItemId {
  ItemId(rand.next_u64())
}

// -----------------------------------------------------------------------------------------------
//  Decision / status tri-states (I3, I5)
// -----------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
  Prepared,
  Abort,
}

/// Status progression is monotonic `New -> Uninitialized -> Ok` (I5);
/// messages addressed to an entry not yet `Ok` are queued on its hold-back
/// buffer and replayed FIFO upon promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
  New,
  Uninitialized,
  Ok,
}

// -----------------------------------------------------------------------------------------------
//  Timer inputs (delayed self-messages, Design Note "Delayed self-messages")
// -----------------------------------------------------------------------------------------------

/// A message an actor sent to itself via `IOCtx::defer`, to be redelivered
/// once its deadline elapses. This replaces a timer wheel: every "wait and
/// see" in the protocol is expressed as one of these instead of a sleep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerInput {
  /// Fires at ~2x `tx_timeout_ms` after a commit was dispatched; triggers
  /// RTM takeover consideration unless the transaction has already decided.
  TidIsDone(TxId),
  /// Fires at ~3x `tx_timeout_ms`; sweeps any stale, already-GC'd `tx_id`
  /// bookkeeping left over from a delayed `learner_deleteids`.
  StaleIdSweep(TxId),
  /// Periodic RTM-descriptor rediscovery tick (`tx_rtm_update_interval_ms`).
  RtmRediscoverTick,
  /// Periodic failure-detector heartbeat tick.
  FdHeartbeatTick,
  /// Delayed `learner_deleteids`, scheduled once a transaction decides, to
  /// absorb late learner traffic before Paxos state is dropped.
  LearnerDeleteIds(TxId),
}

// -----------------------------------------------------------------------------------------------
//  Structured simulation trace events
// -----------------------------------------------------------------------------------------------

/// Protocol-level events pushed through `IOCtx::trace`, generalizing the
/// teacher's `GeneralTraceMessage`/`SlaveTraceMessage` hooks. The
/// deterministic simulator asserts on these directly instead of scraping
/// log text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
  CommitStarted(TxId),
  ItemDecided(TxId, ItemId, Decision),
  TxDecided(TxId, Decision),
  TakeoverStarted(TxId, u32),
  TxGarbageCollected(TxId),
}

// -----------------------------------------------------------------------------------------------
//  IOCtx: the side-effect capability threaded through every actor handler
// -----------------------------------------------------------------------------------------------

/// Every side effect an actor can have — reading the clock, generating
/// randomness, sending a message, scheduling a delayed self-message, or
/// emitting a trace event — goes through this trait, never performed
/// directly. This keeps handler logic deterministic and lets the same
/// handler code run against a real clock/socket or a simulated one.
pub trait IOCtx {
  fn rand(&mut self) -> &mut XorShiftRng;

  fn now(&mut self) -> Timestamp;

  fn send(&mut self, to: &NodeId, msg: NetworkMessage);

  /// Schedule `timer` to be redelivered to this actor's own mailbox after
  /// approximately `after_ms` milliseconds.
  fn defer(&mut self, after_ms: u64, timer: TimerInput);

  fn trace(&mut self, event: TraceEvent);
}
