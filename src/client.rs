//! The client-visible API (§4.1, §6 "Client API"). A `Client` is a thin,
//! synchronous facade over `Transport`: it mints request ids for its own
//! calls and blocks on its own inbox for the matching reply, mirroring the
//! single-outstanding-request style of the teacher's `bin/client/main.rs`
//! prompt loop, generalized into a reusable library type instead of a REPL
//! tied to stdin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use crate::common::{Decision, Key, NodeId};
use crate::error::{TxError, TxResult};
use crate::message::{NetworkMessage, PubSubMessage, ReplicaMessage, TmMessage};
use crate::overlay::Overlay;
use crate::tlog::{QuorumReader, Transaction, TLog};
use crate::transport::Transport;

/// How long the client waits for a reply before surfacing `timeout` (§7).
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A transaction handle returned by `tx_start()`. Thin wrapper around
/// `Transaction` so the client API reads the way §6 describes it
/// (`tx_start`/`tx_read`/`tx_write`/`tx_commit`) instead of exposing the
/// TLog type directly.
pub struct TxHandle {
  inner: Transaction,
}

pub struct Client<T: Transport, O: Overlay> {
  self_node: NodeId,
  tm_node: NodeId,
  transport: T,
  overlay: O,
  inbox: Receiver<NetworkMessage>,
  next_request_id: AtomicU64,
  timeout: Duration,
}

impl<T: Transport, O: Overlay> Client<T, O> {
  pub fn new(self_node: NodeId, tm_node: NodeId, transport: T, overlay: O, inbox: Receiver<NetworkMessage>) -> Client<T, O> {
    Client { self_node, tm_node, transport, overlay, inbox, next_request_id: AtomicU64::new(1), timeout: DEFAULT_TIMEOUT }
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Client<T, O> {
    self.timeout = timeout;
    self
  }

  fn fresh_request_id(&self) -> u64 {
    self.next_request_id.fetch_add(1, Ordering::Relaxed)
  }

  /// Blocks on this client's inbox until `matcher` extracts a result from
  /// some arriving message, or `self.timeout` elapses (`{fail, timeout}`,
  /// §7), or the inbox is disconnected (`{fail, connection}`).
  fn recv_matching<F, R>(&self, mut matcher: F) -> TxResult<R>
  where
    F: FnMut(&NetworkMessage) -> Option<R>,
  {
    let deadline = Instant::now() + self.timeout;
    loop {
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        return Err(TxError::Timeout);
      }
      match self.inbox.recv_timeout(remaining) {
        Ok(msg) => {
          if let Some(result) = matcher(&msg) {
            return Ok(result);
          }
          // Not the reply we're waiting for (e.g. a stray late reply from
          // a prior, already-timed-out call); keep waiting.
        }
        Err(RecvTimeoutError::Timeout) => return Err(TxError::Timeout),
        Err(RecvTimeoutError::Disconnected) => return Err(TxError::Connection),
      }
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Single-key read/write (§6)
  // ---------------------------------------------------------------------------------------------

  /// `read(key)`: a quorum read across `key`'s R replicas.
  pub fn read(&mut self, key: &Key) -> TxResult<Vec<u8>> {
    self.quorum_read(key).map(|(value, _version)| value)
  }

  /// `write(key, value)`: sugar over a single-entry transaction, per §6.
  pub fn write(&mut self, key: &Key, value: Vec<u8>) -> TxResult<()> {
    let mut tx = self.tx_start();
    self.tx_write(&mut tx, key, value);
    self.tx_commit(tx)
  }

  /// Issues a `ReadReq` to every replica of `key` and waits for a majority
  /// of identically-versioned responses, surfacing `not_found` if no
  /// replica holds a committed version and `abort` (via the caller) if
  /// quorum can't be reached — mirroring the "partition isolates >= R/2
  /// replicas" design note (§9).
  fn quorum_read(&mut self, key: &Key) -> TxResult<(Vec<u8>, u64)> {
    let replicas = self.overlay.replica_keys(key);
    let request_id = self.fresh_request_id();
    for replica_key in &replicas {
      let node = self.overlay.route(replica_key);
      self.transport.send(
        &node,
        NetworkMessage::ReplicaRead(ReplicaMessage::ReadReq { reply_to: self.self_node.clone(), request_id, key: key.clone() }),
      );
    }

    let quorum = (replicas.len() as u32 + 2) / 2;
    let mut tally: HashMap<u64, (Vec<u8>, u32)> = HashMap::new();
    let mut responses = 0u32;
    let deadline = Instant::now() + self.timeout;
    loop {
      if responses >= replicas.len() as u32 {
        break;
      }
      let remaining = deadline.saturating_duration_since(Instant::now());
      if remaining.is_zero() {
        break;
      }
      match self.inbox.recv_timeout(remaining) {
        Ok(NetworkMessage::ReplicaRead(ReplicaMessage::ReadResp { request_id: rid, entry })) if rid == request_id => {
          responses += 1;
          if let Some(entry) = entry {
            let slot = tally.entry(entry.version).or_insert_with(|| (entry.value.clone(), 0));
            slot.1 += 1;
          }
        }
        Ok(_) => continue,
        Err(RecvTimeoutError::Timeout) => break,
        Err(RecvTimeoutError::Disconnected) => return Err(TxError::Connection),
      }
    }

    let winner = tally.into_iter().max_by_key(|(version, (_, count))| (*count, *version));
    match winner {
      Some((version, (value, count))) if count >= quorum => Ok((value, version)),
      Some(_) => Err(TxError::Abort),
      None if responses == 0 => Err(TxError::Timeout),
      None => Err(TxError::NotFound),
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Transactions (§4.1, §6)
  // ---------------------------------------------------------------------------------------------

  pub fn tx_start(&self) -> TxHandle {
    TxHandle { inner: Transaction::new() }
  }

  /// `tx_read(tx, key)`: a TLog cache hit short-circuits the ring; a miss
  /// issues a quorum read via this client's own `QuorumReader` impl.
  pub fn tx_read(&mut self, tx: &mut TxHandle, key: &Key) -> TxResult<Vec<u8>> {
    let mut reader = ClientQuorumReader { client: self };
    tx.inner.read(&mut reader, key)
  }

  pub fn tx_write(&mut self, tx: &mut TxHandle, key: &Key, value: Vec<u8>) {
    tx.inner.write(key, value);
  }

  /// `tx_revert_last_op(tx)`: one-step undo only.
  pub fn tx_revert_last_op(&mut self, tx: &mut TxHandle) {
    tx.inner.revert_last_op();
  }

  /// `tx_commit(tx)`: freezes the TLog and submits it to the local TM.
  pub fn tx_commit(&mut self, tx: TxHandle) -> TxResult<()> {
    let tlog: TLog = tx.inner.freeze();
    if tlog.is_empty() {
      return Err(TxError::Unknown("empty TLog".to_string()));
    }
    let clients_id = self.fresh_request_id();
    self.transport.send(
      &self.tm_node.clone(),
      NetworkMessage::Tm(TmMessage::Commit { client: self.self_node.clone(), clients_id, tlog }),
    );
    let decision = self.recv_matching(|msg| match msg {
      NetworkMessage::Tm(TmMessage::CommitReply { clients_id: cid, decision }) if *cid == clients_id => Some(*decision),
      _ => None,
    })?;
    match decision {
      Decision::Prepared => Ok(()),
      Decision::Abort => Err(TxError::Abort),
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Publish/subscribe (§4.8, §6)
  // ---------------------------------------------------------------------------------------------

  fn pubsub_home(&self, topic: &str) -> NodeId {
    self.overlay.route(&Key(topic.to_string()))
  }

  pub fn subscribe(&mut self, topic: &str, url: &str) -> TxResult<()> {
    let request_id = self.fresh_request_id();
    let home = self.pubsub_home(topic);
    self.transport.send(
      &home,
      NetworkMessage::PubSub(PubSubMessage::Subscribe {
        reply_to: self.self_node.clone(),
        request_id,
        topic: topic.to_string(),
        url: url.to_string(),
      }),
    );
    self.recv_matching(|msg| match msg {
      NetworkMessage::PubSub(PubSubMessage::SubscribeAck { request_id: rid }) if *rid == request_id => Some(()),
      _ => None,
    })
  }

  pub fn unsubscribe(&mut self, topic: &str, url: &str) -> TxResult<()> {
    let request_id = self.fresh_request_id();
    let home = self.pubsub_home(topic);
    self.transport.send(
      &home,
      NetworkMessage::PubSub(PubSubMessage::Unsubscribe {
        reply_to: self.self_node.clone(),
        request_id,
        topic: topic.to_string(),
        url: url.to_string(),
      }),
    );
    let found = self.recv_matching(|msg| match msg {
      NetworkMessage::PubSub(PubSubMessage::UnsubscribeAck { request_id: rid, found }) if *rid == request_id => Some(*found),
      _ => None,
    })?;
    if found {
      Ok(())
    } else {
      Err(TxError::NotFound)
    }
  }

  pub fn get_subscribers(&mut self, topic: &str) -> TxResult<Vec<String>> {
    let request_id = self.fresh_request_id();
    let home = self.pubsub_home(topic);
    self.transport.send(
      &home,
      NetworkMessage::PubSub(PubSubMessage::GetSubscribers { reply_to: self.self_node.clone(), request_id, topic: topic.to_string() }),
    );
    self.recv_matching(|msg| match msg {
      NetworkMessage::PubSub(PubSubMessage::GetSubscribersReply { request_id: rid, urls }) if *rid == request_id => Some(urls.clone()),
      _ => None,
    })
  }

  /// `publish(topic, content)`: fire-and-forget, per §6 (`ok` always).
  pub fn publish(&mut self, topic: &str, content: Vec<u8>) {
    let home = self.pubsub_home(topic);
    self.transport.send(&home, NetworkMessage::PubSub(PubSubMessage::Publish { topic: topic.to_string(), content }));
  }
}

/// Adapts `Client::quorum_read` to the `QuorumReader` trait `Transaction`
/// needs, without `Transaction` depending on `Client`/`Transport` directly.
struct ClientQuorumReader<'a, T: Transport, O: Overlay> {
  client: &'a mut Client<T, O>,
}

impl<'a, T: Transport, O: Overlay> QuorumReader for ClientQuorumReader<'a, T, O> {
  fn quorum_read(&mut self, key: &Key) -> TxResult<(Vec<u8>, u64)> {
    self.client.quorum_read(key)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::common::NodeId;
  use crate::message::FdMessage;
  use crate::overlay::RingOverlay;
  use crate::transport::ChannelTransport;
  use std::sync::mpsc;

  fn mk_client() -> (Client<ChannelTransport, RingOverlay>, mpsc::Sender<NetworkMessage>) {
    let transport = ChannelTransport::new();
    let (tx, rx) = mpsc::channel();
    transport.register(NodeId("client".into()), tx.clone());
    let overlay = RingOverlay::new(vec![NodeId("tm".into())], 1);
    let client = Client::new(NodeId("client".into()), NodeId("tm".into()), transport, overlay, rx)
      .with_timeout(Duration::from_millis(200));
    (client, tx)
  }

  #[test]
  fn tx_commit_times_out_with_no_reply() {
    let (mut client, _tx) = mk_client();
    let mut tx = client.tx_start();
    client.tx_write(&mut tx, &Key("k".into()), b"v".to_vec());
    assert_eq!(client.tx_commit(tx), Err(TxError::Timeout));
  }

  #[test]
  fn tx_commit_returns_abort_on_abort_reply() {
    let (mut client, tx_sender) = mk_client();
    let mut tx = client.tx_start();
    client.tx_write(&mut tx, &Key("k".into()), b"v".to_vec());
    // Fabricate a reply as if sent by the TM, keyed on whatever clients_id
    // the commit used (the first id this client mints, so 1).
    tx_sender.send(NetworkMessage::Tm(TmMessage::CommitReply { clients_id: 1, decision: Decision::Abort })).unwrap();
    assert_eq!(client.tx_commit(tx), Err(TxError::Abort));
  }

  #[test]
  fn stray_unrelated_message_does_not_satisfy_the_wait() {
    let (mut client, tx_sender) = mk_client();
    tx_sender.send(NetworkMessage::Fd(FdMessage::Heartbeat { from: NodeId("x".into()) })).unwrap();
    tx_sender.send(NetworkMessage::Tm(TmMessage::CommitReply { clients_id: 1, decision: Decision::Prepared })).unwrap();
    let mut tx = client.tx_start();
    client.tx_write(&mut tx, &Key("k".into()), b"v".to_vec());
    assert_eq!(client.tx_commit(tx), Ok(()));
  }
}
