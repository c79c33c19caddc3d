//! The TLog and the client-side transaction it buffers (§4.1). A
//! transaction is client-local and buffered: reads consult the log before
//! touching the ring, writes are purely tentative until `tx_commit`
//! freezes the log and hands it to the local TM.

use serde::{Deserialize, Serialize};

use crate::common::Key;
use crate::error::TxError;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
  Read,
  Write,
}

/// One TLog entry: `(op, key, value?, version_read, status)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TLogEntry {
  pub op: Op,
  pub key: Key,
  pub value: Option<Vec<u8>>,
  pub version_read: u64,
  /// `status: ok | fail` — a failed read "poisons" the key for the rest
  /// of the transaction (its cached failure is replayed on re-read)
  /// until `tx_revert_last_op` undoes it.
  pub ok: bool,
}

pub type TLog = Vec<TLogEntry>;

/// Injected by the runtime so `Transaction` can issue a quorum read without
/// depending on the TM/transport modules directly. Production wiring
/// implements this against the real `Overlay` + `Transport`; tests back it
/// with an in-process `TpActor` map.
pub trait QuorumReader {
  /// Perform a quorum read of `key` across its R replicas, returning the
  /// value and version agreed on by a majority, or an error.
  fn quorum_read(&mut self, key: &Key) -> Result<(Vec<u8>, u64), TxError>;
}

/// A client-local, buffered transaction. Owns its own TLog; nothing here
/// is visible to any other actor until `freeze()` hands the log to the TM.
#[derive(Debug, Default)]
pub struct Transaction {
  log: TLog,
  /// Single-step undo: the log as it was immediately before the last
  /// operation. `tx_revert_last_op` restores exactly this and nothing
  /// further — spec explicitly limits undo to one step.
  undo: Option<TLog>,
}

impl Transaction {
  pub fn new() -> Transaction {
    Transaction::default()
  }

  fn last_version_read(&self, key: &Key) -> u64 {
    self.log.iter().rev().find(|e| &e.key == key).map(|e| e.version_read).unwrap_or(0)
  }

  fn cached(&self, key: &Key) -> Option<&TLogEntry> {
    self.log.iter().rev().find(|e| &e.key == key)
  }

  fn push(&mut self, entry: TLogEntry) {
    self.undo = Some(self.log.clone());
    self.log.push(entry);
  }

  /// `tx_read(tx, key)`: cache hit returns the cached value without
  /// touching the ring; a miss issues a quorum read and appends the
  /// result (or the failure) to the log.
  pub fn read<Q: QuorumReader>(&mut self, reader: &mut Q, key: &Key) -> Result<Vec<u8>, TxError> {
    if let Some(entry) = self.cached(key) {
      return if entry.ok {
        Ok(entry.value.clone().unwrap_or_default())
      } else {
        Err(TxError::NotFound)
      };
    }
    match reader.quorum_read(key) {
      Ok((value, version)) => {
        self.push(TLogEntry {
          op: Op::Read,
          key: key.clone(),
          value: Some(value.clone()),
          version_read: version,
          ok: true,
        });
        Ok(value)
      }
      Err(err) => {
        self.push(TLogEntry {
          op: Op::Read,
          key: key.clone(),
          value: None,
          version_read: 0,
          ok: false,
        });
        Err(err)
      }
    }
  }

  /// `tx_write(tx, key, value)`: tentative entry carrying the latest
  /// `version_read` for `key` (from a prior read on it, or 0).
  pub fn write(&mut self, key: &Key, value: Vec<u8>) {
    let version_read = self.last_version_read(key);
    self.push(TLogEntry { op: Op::Write, key: key.clone(), value: Some(value), version_read, ok: true });
  }

  /// `tx_revert_last_op(tx)`: one-step undo only.
  pub fn revert_last_op(&mut self) {
    if let Some(prev) = self.undo.take() {
      self.log = prev;
    }
  }

  /// Consumes the transaction, returning the frozen TLog for `tx_commit`.
  pub fn freeze(self) -> TLog {
    self.log
  }

  pub fn log(&self) -> &TLog {
    &self.log
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct FakeQuorum {
    responses: std::collections::HashMap<String, Result<(Vec<u8>, u64), TxError>>,
  }

  impl QuorumReader for FakeQuorum {
    fn quorum_read(&mut self, key: &Key) -> Result<(Vec<u8>, u64), TxError> {
      self.responses.get(&key.0).cloned().unwrap_or(Err(TxError::NotFound))
    }
  }

  #[test]
  fn read_your_writes_within_a_transaction() {
    let mut tx = Transaction::new();
    let mut reader = FakeQuorum { responses: Default::default() };
    tx.write(&Key("k".into()), b"v".to_vec());
    let got = tx.read(&mut reader, &Key("k".into())).unwrap();
    assert_eq!(got, b"v".to_vec());
  }

  #[test]
  fn failed_read_poisons_key_until_reverted() {
    let mut tx = Transaction::new();
    let mut reader = FakeQuorum { responses: Default::default() };
    assert!(tx.read(&mut reader, &Key("k".into())).is_err());
    assert!(tx.read(&mut reader, &Key("k".into())).is_err());
    tx.revert_last_op();
    // Reverting the poisoned read removes the entry; a fresh write then
    // succeeds exactly as a single direct call would.
    tx.write(&Key("k".into()), b"v".to_vec());
    assert_eq!(tx.read(&mut reader, &Key("k".into())).unwrap(), b"v".to_vec());
  }

  #[test]
  fn revert_after_write_restores_prior_log() {
    let mut tx = Transaction::new();
    let mut reader = FakeQuorum { responses: Default::default() };
    tx.write(&Key("k".into()), b"v1".to_vec());
    let before_second = tx.log().clone();
    tx.write(&Key("k".into()), b"v2".to_vec());
    tx.revert_last_op();
    assert_eq!(tx.log().clone(), before_second);
    let _ = reader;
  }
}
