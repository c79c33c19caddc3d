//! The Transaction Participant (TP, §4.3): the DHT node process hosting a
//! replica of a key touched by a transaction. One `TpActor` per node,
//! multiplexing over every key it hosts — mirroring how the teacher's
//! `TabletState` owns one `RelationalTablet` but is driven by a single
//! actor loop per tablet group.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::common::{Decision, IOCtx, ItemId, Key, NodeId, PaxosId, TxId};
use crate::message::{NetworkMessage, PaxosMessage, TmMessage, TpMessage};
use crate::paxos::proposer::ProposerTable;
use crate::rtm::RtmDescriptor;
use crate::tlog::{Op, TLogEntry};

/// A key's committed state, per the data model (§3): `(key, value,
/// version, write_lock, read_lock)`. Owned exclusively by the TP actor
/// hosting it; no other actor ever mutates it directly (§5).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReplicaEntry {
  pub key: Key,
  pub value: Vec<u8>,
  pub version: u64,
}

#[derive(Debug, Default)]
struct LockState {
  write_lock: bool,
  read_lock: u32,
}

/// Bookkeeping for one in-flight `init_TP` this TP has accepted a vote for,
/// kept until `commit_reply` arrives.
#[derive(Debug)]
struct PendingVote {
  tx_id: TxId,
  item_id: ItemId,
  key: Key,
  rtlog: TLogEntry,
  rtms: Vec<RtmDescriptor>,
  took_write_lock: bool,
  took_read_lock: bool,
  /// Set once `commit_reply` has been applied, so a late-duplicate
  /// `commit_reply` (or one that raced `init_TP`, per §4.3) is idempotent.
  resolved: bool,
}

#[derive(Debug)]
pub struct TpActor {
  self_node: NodeId,
  /// Committed data this node hosts a replica for.
  store: HashMap<Key, ReplicaEntry>,
  locks: HashMap<Key, LockState>,
  pending: HashMap<PaxosId, PendingVote>,
  /// `commit_reply`s that raced ahead of the matching `init_TP` (the TM
  /// re-registering late); applied as soon as `init_TP` arrives.
  early_commit_replies: HashMap<PaxosId, Decision>,
  proposers: ProposerTable,
}

impl TpActor {
  pub fn new(self_node: NodeId) -> TpActor {
    TpActor {
      self_node,
      store: HashMap::new(),
      locks: HashMap::new(),
      pending: HashMap::new(),
      early_commit_replies: HashMap::new(),
      proposers: ProposerTable::new(),
    }
  }

  fn version_of(&self, key: &Key) -> u64 {
    self.store.get(key).map(|e| e.version).unwrap_or(0)
  }

  /// Validate `rtlog` against the local replica (§4.3 step 1): a read is
  /// prepared iff the stored version matches; a write is prepared iff the
  /// stored version matches AND no write-lock is currently held (I6: stale
  /// `version_read` writes abort).
  fn validate(&self, entry: &TLogEntry) -> bool {
    let current = self.version_of(&entry.key);
    match entry.op {
      Op::Read => current == entry.version_read,
      Op::Write => {
        let locked = self.locks.get(&entry.key).map(|l| l.write_lock).unwrap_or(false);
        current == entry.version_read && !locked
      }
    }
  }

  fn take_lock(&mut self, entry: &TLogEntry) -> (bool, bool) {
    let lock = self.locks.entry(entry.key.clone()).or_default();
    match entry.op {
      Op::Read => {
        lock.read_lock += 1;
        (false, true)
      }
      Op::Write => {
        lock.write_lock = true;
        (true, false)
      }
    }
  }

  fn release_lock(&mut self, key: &Key, took_write_lock: bool, took_read_lock: bool) {
    if let Some(lock) = self.locks.get_mut(key) {
      if took_write_lock {
        lock.write_lock = false;
      }
      if took_read_lock {
        lock.read_lock = lock.read_lock.saturating_sub(1);
      }
    }
  }

  /// `init_TP`: steps 1-4 of §4.3.
  pub fn handle_init_tp<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: TpMessage) {
    let TpMessage::InitTp { tx_id, rtms, acceptors, tm, rtlog, item_id, paxos_id } = msg else {
      return;
    };

    // A commit_reply may have raced ahead of this init_TP (late TM
    // registration); if so, release the (never-taken) lock idempotently
    // and skip re-voting — §4.3's explicit MUST.
    if let Some(decision) = self.early_commit_replies.remove(&paxos_id) {
      self.apply_decision(&rtlog, decision);
      return;
    }

    let prepared = self.validate(&rtlog);
    let (took_write_lock, took_read_lock) =
      if prepared { self.take_lock(&rtlog) } else { (false, false) };
    let vote = if prepared { Decision::Prepared } else { Decision::Abort };

    self.pending.insert(
      paxos_id.clone(),
      PendingVote {
        tx_id,
        item_id,
        key: rtlog.key.clone(),
        rtlog: rtlog.clone(),
        rtms: rtms.clone(),
        took_write_lock,
        took_read_lock,
        resolved: false,
      },
    );

    // Step 3: register with every RTM.
    for rtm in &rtms {
      if let Some(pid) = &rtm.pid {
        io_ctx.send(
          pid,
          NetworkMessage::Tm(TmMessage::RegisterTp {
            tx_id,
            item_id,
            paxos_id: paxos_id.clone(),
            tp_pid: self.self_node.clone(),
          }),
        );
      }
    }

    // Step 4: drive the local proposer for `paxos_id` with our vote.
    self.proposers.start(io_ctx, &paxos_id, &acceptors, &tm, vote);
  }

  pub fn handle_commit_reply<IO: IOCtx>(&mut self, _io_ctx: &mut IO, msg: TpMessage) {
    let TpMessage::CommitReply { paxos_id, rtlog, decision } = msg else { return };
    if let Some(mut pending) = self.pending.remove(&paxos_id) {
      if !pending.resolved {
        pending.resolved = true;
        self.release_lock(&pending.key, pending.took_write_lock, pending.took_read_lock);
        self.apply_decision(&rtlog, decision);
      }
    } else {
      // init_TP has not arrived yet; remember the decision so the lock
      // taken by the (not-yet-processed) init_TP is released idempotently.
      self.early_commit_replies.insert(paxos_id, decision);
    }
  }

  fn apply_decision(&mut self, rtlog: &TLogEntry, decision: Decision) {
    if let (Decision::Prepared, Op::Write) = (decision, rtlog.op) {
      let version = self.version_of(&rtlog.key) + 1;
      self.store.insert(
        rtlog.key.clone(),
        ReplicaEntry { key: rtlog.key.clone(), value: rtlog.value.clone().unwrap_or_default(), version },
      );
    }
  }

  pub fn handle_paxos<IO: IOCtx>(&mut self, io_ctx: &mut IO, msg: PaxosMessage) {
    self.proposers.handle(io_ctx, msg);
  }

  pub fn read_local(&self, key: &Key) -> Option<ReplicaEntry> {
    self.store.get(key).cloned()
  }

  /// Direct (non-transactional) local write, used by the single-key
  /// `write(key, value)` client call once it has collected Paxos-Commit
  /// approval; version bump mirrors `apply_decision`.
  pub fn force_write(&mut self, key: &Key, value: Vec<u8>) {
    let version = self.version_of(key) + 1;
    self.store.insert(key.clone(), ReplicaEntry { key: key.clone(), value, version });
  }
}

pub type TpRegistry = BTreeMap<Key, ReplicaEntry>;

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tlog::Op;

  fn read_entry(key: &str, version: u64) -> TLogEntry {
    TLogEntry { op: Op::Read, key: Key(key.to_string()), value: None, version_read: version, ok: true }
  }

  fn write_entry(key: &str, version: u64, value: &str) -> TLogEntry {
    TLogEntry {
      op: Op::Write,
      key: Key(key.to_string()),
      value: Some(value.as_bytes().to_vec()),
      version_read: version,
      ok: true,
    }
  }

  fn tp() -> TpActor {
    TpActor::new(NodeId("n1".to_string()))
  }

  #[test]
  fn read_of_absent_key_prepares_against_version_zero() {
    let tp = tp();
    assert!(tp.validate(&read_entry("k", 0)));
    assert!(!tp.validate(&read_entry("k", 1)));
  }

  #[test]
  fn write_with_stale_version_aborts() {
    let mut tp = tp();
    tp.store.insert(Key("k".into()), ReplicaEntry { key: Key("k".into()), value: vec![1], version: 1 });
    assert!(!tp.validate(&write_entry("k", 0, "v")));
    assert!(tp.validate(&write_entry("k", 1, "v")));
  }

  #[test]
  fn write_lock_blocks_concurrent_write_validation() {
    let mut tp = tp();
    let entry = write_entry("k", 0, "v1");
    tp.take_lock(&entry);
    assert!(!tp.validate(&write_entry("k", 0, "v2")));
  }

  #[test]
  fn commit_reply_idempotent_release_before_init_tp() {
    let mut tp = tp();
    let paxos_id = PaxosId(TxId(1), Key("k".into()));
    tp.early_commit_replies.insert(paxos_id.clone(), Decision::Abort);
    assert!(tp.pending.get(&paxos_id).is_none());
  }
}
