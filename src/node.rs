//! Process topology (§2.1): a `NodeRuntime` owns one OS thread per actor
//! role, each draining a private `std::sync::mpsc` mailbox and driven by
//! its own `IOCtx`, mirroring the teacher's `ProdSlaveIOCtx`/`tasks`/
//! `TIMER_INCREMENT` polling loop and per-group `Sender` map
//! (`bin/transact/server.rs`), generalized from Slave/Tablet/Coord roles
//! to TM/TP/Paxos/FD/PubSub roles.

use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use crate::common::{cur_timestamp, IOCtx, NodeId, TimerInput, Timestamp, TraceEvent};
use crate::config::Config;
use crate::fd::FailureDetector;
use crate::message::{FdMessage, NetworkMessage, PubSubMessage, TmMessage, TpMessage};
use crate::overlay::Overlay;
use crate::paxos::PaxosActor;
use crate::pubsub::PubSubRegistry;
use crate::replica::TpActor;
use crate::tm::TmActor;
use crate::transport::Transport;

/// The granularity at which deferred self-sends are polled, mirroring the
/// teacher's `TIMER_INCREMENT` (250 microseconds).
const TIMER_INCREMENT: Duration = Duration::from_micros(250);

pub enum ActorInput {
  Net(NetworkMessage),
  Timer(TimerInput),
}

/// One role's `IOCtx`: self-addressed sends loop back through the node's
/// local router without touching `Transport`; everything else goes out
/// over it. `defer` registers into a `tasks` side table drained by a
/// dedicated timer thread, exactly as the teacher's `ProdSlaveIOCtx` does.
pub struct RoleIoCtx<T: Transport> {
  self_node: NodeId,
  rand: XorShiftRng,
  transport: T,
  local_router: Sender<NetworkMessage>,
  tasks: Arc<Mutex<BTreeMap<Timestamp, Vec<TimerInput>>>>,
}

impl<T: Transport> IOCtx for RoleIoCtx<T> {
  fn rand(&mut self) -> &mut XorShiftRng {
    &mut self.rand
  }

  fn now(&mut self) -> Timestamp {
    cur_timestamp()
  }

  fn send(&mut self, to: &NodeId, msg: NetworkMessage) {
    if to == &self.self_node {
      let _ = self.local_router.send(msg);
    } else {
      self.transport.send(to, msg);
    }
  }

  fn defer(&mut self, after_ms: u64, timer: TimerInput) {
    let deadline = self.now().add_ms(after_ms);
    self.tasks.lock().unwrap().entry(deadline).or_default().push(timer);
  }

  fn trace(&mut self, event: TraceEvent) {
    tracing::debug!(?event, "trace");
  }
}

fn spawn_timer_thread(to_self: Sender<ActorInput>, tasks: Arc<Mutex<BTreeMap<Timestamp, Vec<TimerInput>>>>) {
  thread::spawn(move || loop {
    thread::sleep(TIMER_INCREMENT);
    let now = cur_timestamp();
    let mut tasks = tasks.lock().unwrap();
    while let Some((&deadline, _)) = tasks.iter().next() {
      if deadline > now {
        break;
      }
      for timer in tasks.remove(&deadline).unwrap() {
        if to_self.send(ActorInput::Timer(timer)).is_err() {
          return;
        }
      }
    }
  });
}

fn mk_role_io<T: Transport + Clone>(
  self_node: NodeId,
  rand_seed: [u8; 16],
  transport: T,
  local_router: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
) -> RoleIoCtx<T> {
  let tasks = Arc::new(Mutex::new(BTreeMap::new()));
  spawn_timer_thread(to_self, tasks.clone());
  RoleIoCtx { self_node, rand: XorShiftRng::from_seed(rand_seed), transport, local_router, tasks }
}

/// One physical DHT node: TM (own commits) + RTM (standby for R−1 peer
/// transactions) on one thread, the per-key-hosted TP on another, the
/// bundled Acceptor/Proposer/Learner on a third, the failure detector on a
/// fourth, the pub/sub registry on a fifth — wired together by a router
/// thread that fans inbound `NetworkMessage`s to the right mailbox, the
/// way the teacher's Slave dispatches by `tablet_group_id`/`coord_group_id`.
pub struct NodeRuntime {
  pub self_node: NodeId,
  pub local_router: Sender<NetworkMessage>,
  tm_tx: Sender<ActorInput>,
  tp_tx: Sender<ActorInput>,
  paxos_tx: Sender<ActorInput>,
  fd_tx: Sender<ActorInput>,
  pubsub_tx: Sender<ActorInput>,
}

impl NodeRuntime {
  pub fn new<T, O>(self_node: NodeId, config: Config, transport: T, overlay: Arc<O>, rand_seed: [u8; 16]) -> NodeRuntime
  where
    T: Transport + Clone + 'static,
    O: Overlay + Sync + 'static,
  {
    let (router_tx, router_rx) = mpsc::channel::<NetworkMessage>();
    let (tm_tx, tm_rx) = mpsc::channel::<ActorInput>();
    let (tp_tx, tp_rx) = mpsc::channel::<ActorInput>();
    let (paxos_tx, paxos_rx) = mpsc::channel::<ActorInput>();
    let (fd_tx, fd_rx) = mpsc::channel::<ActorInput>();
    let (pubsub_tx, pubsub_rx) = mpsc::channel::<ActorInput>();

    spawn_router(router_rx, tm_tx.clone(), tp_tx.clone(), paxos_tx.clone(), fd_tx.clone(), pubsub_tx.clone());

    spawn_tm(self_node.clone(), config.clone(), transport.clone(), overlay.clone(), router_tx.clone(), tm_tx.clone(), tm_rx, rand_seed);
    spawn_tp(self_node.clone(), transport.clone(), router_tx.clone(), tp_tx.clone(), tp_rx, rand_seed);
    spawn_paxos(self_node.clone(), config.clone(), transport.clone(), router_tx.clone(), paxos_tx.clone(), paxos_rx, rand_seed);
    spawn_fd(self_node.clone(), config.clone(), transport.clone(), router_tx.clone(), fd_tx.clone(), fd_rx, rand_seed);
    spawn_pubsub(self_node.clone(), transport.clone(), router_tx.clone(), pubsub_tx.clone(), pubsub_rx, rand_seed);

    NodeRuntime { self_node, local_router: router_tx, tm_tx, tp_tx, paxos_tx, fd_tx, pubsub_tx }
  }

  /// Entry point for messages arriving off the wire (the production
  /// binary's TCP accept loop, or a simulation harness draining a
  /// `ChannelTransport` peer receiver).
  pub fn deliver(&self, msg: NetworkMessage) {
    let _ = self.local_router.send(msg);
  }

  pub fn submit_commit(&self, msg: TmMessage) {
    let _ = self.tm_tx.send(ActorInput::Net(NetworkMessage::Tm(msg)));
  }
}

fn spawn_router(
  router_rx: Receiver<NetworkMessage>,
  tm_tx: Sender<ActorInput>,
  tp_tx: Sender<ActorInput>,
  paxos_tx: Sender<ActorInput>,
  fd_tx: Sender<ActorInput>,
  pubsub_tx: Sender<ActorInput>,
) {
  thread::spawn(move || {
    for msg in router_rx {
      match &msg {
        NetworkMessage::Tm(_) => {
          let _ = tm_tx.send(ActorInput::Net(msg));
        }
        NetworkMessage::Tp(_) | NetworkMessage::ReplicaRead(_) => {
          let _ = tp_tx.send(ActorInput::Net(msg));
        }
        NetworkMessage::Paxos(_) => {
          // A Paxos message may be addressed to this node's role as a TM/
          // RTM acceptor-learner, or to a TP's own proposer (it owns one
          // for the keys it hosts); both tables key on the same
          // `paxos_id` space independently, so broadcasting is safe — an
          // irrelevant entry is simply absent and the handler no-ops.
          let _ = paxos_tx.send(ActorInput::Net(msg.clone()));
          let _ = tp_tx.send(ActorInput::Net(msg));
        }
        NetworkMessage::Fd(_) => {
          // A `Crash` suspicion may be addressed to this node's TM/RTM
          // takeover logic as well as to the FD's own bookkeeping (e.g. a
          // `Subscribe`/`Unsubscribe` self-command); broadcasting is safe,
          // same reasoning as the Paxos dual-routing above.
          let _ = tm_tx.send(ActorInput::Net(msg.clone()));
          let _ = fd_tx.send(ActorInput::Net(msg));
        }
        NetworkMessage::PubSub(_) => {
          let _ = pubsub_tx.send(ActorInput::Net(msg));
        }
      }
    }
  });
}

fn spawn_tm<T, O>(
  self_node: NodeId,
  config: Config,
  transport: T,
  overlay: Arc<O>,
  router_tx: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
  rx: Receiver<ActorInput>,
  rand_seed: [u8; 16],
) where
  T: Transport + Clone + 'static,
  O: Overlay + Sync + 'static,
{
  thread::spawn(move || {
    let mut io_ctx = mk_role_io(self_node.clone(), rand_seed, transport, router_tx, to_self);
    let rtm_ring_keys = overlay.replica_keys(&crate::common::Key(self_node.0.clone()));
    let rtm_update_interval_ms = config.tx_rtm_update_interval_ms;
    let mut tm = TmActor::new(self_node.clone(), config, rtm_ring_keys);
    io_ctx.defer(0, TimerInput::RtmRediscoverTick);
    for input in rx {
      match input {
        ActorInput::Net(NetworkMessage::Tm(msg)) => match msg {
          TmMessage::Commit { client, clients_id, tlog } | TmMessage::ForwardedCommit { client, clients_id, tlog } => {
            let _ = tm.handle_commit(&mut io_ctx, overlay.as_ref(), client, clients_id, tlog);
          }
          TmMessage::InitRtm { .. } => tm.handle_init_rtm(&mut io_ctx, msg),
          TmMessage::RegisterTp { .. } => tm.handle_register_tp(&mut io_ctx, msg),
          TmMessage::LearnerDecide { .. } => {
            tm.handle_learner_decide(&mut io_ctx, msg);
          }
          TmMessage::Delete { .. } => tm.handle_delete(&mut io_ctx, msg),
          TmMessage::ProposeYourself { tx_id, .. } => tm.takeover(&mut io_ctx, tx_id),
          TmMessage::TidIsDone { tx_id } => tm.handle_tid_is_done(&mut io_ctx, tx_id),
          TmMessage::GetRtm { reply_to, ring_key, role_index } => {
            let pid = overlay.route(&ring_key);
            io_ctx.send(
              &reply_to,
              NetworkMessage::Tm(TmMessage::GetRtmReply { ring_key, tm_pid: Some(pid.clone()), acceptor_pid: Some(pid) }),
            );
            let _ = role_index;
          }
          TmMessage::GetRtmReply { ring_key, tm_pid, acceptor_pid } => {
            tm.rtm_membership_mut().update(&ring_key, tm_pid, acceptor_pid);
          }
          TmMessage::CommitReply { .. } => {}
        },
        ActorInput::Net(NetworkMessage::Fd(FdMessage::Crash { pid, .. })) => tm.handle_peer_crash(&mut io_ctx, pid),
        ActorInput::Net(_) => {}
        ActorInput::Timer(TimerInput::TidIsDone(tx_id)) => tm.handle_tid_is_done(&mut io_ctx, tx_id),
        ActorInput::Timer(TimerInput::LearnerDeleteIds(tx_id)) => tm.handle_learner_delete_ids(&mut io_ctx, tx_id),
        ActorInput::Timer(TimerInput::RtmRediscoverTick) => {
          // §4.5: periodically re-resolve every RTM replica position via
          // an unreliable lookup, updating the descriptor on reply.
          for ring_key in tm.rtm_membership().ring_keys() {
            let target = overlay.route(&ring_key);
            io_ctx.send(
              &target,
              NetworkMessage::Tm(TmMessage::GetRtm { reply_to: self_node.clone(), ring_key, role_index: 0 }),
            );
          }
          io_ctx.defer(rtm_update_interval_ms, TimerInput::RtmRediscoverTick);
        }
        ActorInput::Timer(TimerInput::StaleIdSweep(_)) => {}
        ActorInput::Timer(TimerInput::FdHeartbeatTick) => {}
      }
    }
  });
}

fn spawn_tp<T: Transport + Clone + 'static>(
  self_node: NodeId,
  transport: T,
  router_tx: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
  rx: Receiver<ActorInput>,
  rand_seed: [u8; 16],
) {
  thread::spawn(move || {
    let mut io_ctx = mk_role_io(self_node.clone(), rand_seed, transport, router_tx, to_self);
    let mut tp = TpActor::new(self_node);
    for input in rx {
      match input {
        ActorInput::Net(NetworkMessage::Tp(msg @ TpMessage::InitTp { .. })) => tp.handle_init_tp(&mut io_ctx, msg),
        ActorInput::Net(NetworkMessage::Tp(msg @ TpMessage::CommitReply { .. })) => tp.handle_commit_reply(&mut io_ctx, msg),
        ActorInput::Net(NetworkMessage::Paxos(msg)) => tp.handle_paxos(&mut io_ctx, msg),
        ActorInput::Net(NetworkMessage::ReplicaRead(crate::message::ReplicaMessage::ReadReq { reply_to, request_id, key })) => {
          let entry = tp.read_local(&key);
          io_ctx.send(&reply_to, NetworkMessage::ReplicaRead(crate::message::ReplicaMessage::ReadResp { request_id, entry }));
        }
        _ => {}
      }
    }
  });
}

fn spawn_paxos<T: Transport + Clone + 'static>(
  self_node: NodeId,
  config: Config,
  transport: T,
  router_tx: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
  rx: Receiver<ActorInput>,
  rand_seed: [u8; 16],
) {
  let learner_decide_target = self_node.clone();
  thread::spawn(move || {
    let mut io_ctx = mk_role_io(self_node.clone(), rand_seed, transport, router_tx, to_self);
    let mut paxos = PaxosActor::new(self_node, config.quorum_factor);
    for input in rx {
      if let ActorInput::Net(NetworkMessage::Paxos(msg)) = input {
        let decided = paxos.handle(&mut io_ctx, msg);
        for (paxos_id, decision) in decided {
          io_ctx.send(
            &learner_decide_target,
            NetworkMessage::Tm(TmMessage::LearnerDecide { paxos_id, decision }),
          );
        }
      }
    }
  });
}

fn spawn_fd<T: Transport + Clone + 'static>(
  self_node: NodeId,
  config: Config,
  transport: T,
  router_tx: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
  rx: Receiver<ActorInput>,
  rand_seed: [u8; 16],
) {
  thread::spawn(move || {
    let mut io_ctx = mk_role_io(self_node.clone(), rand_seed, transport, router_tx, to_self);
    let mut fd = FailureDetector::new(self_node);
    io_ctx.defer(0, TimerInput::FdHeartbeatTick);
    for input in rx {
      match input {
        ActorInput::Net(NetworkMessage::Fd(FdMessage::Heartbeat { from })) => fd.on_heartbeat(&mut io_ctx, &from),
        ActorInput::Net(NetworkMessage::Fd(FdMessage::HeartbeatAck { from })) => fd.on_heartbeat_ack(&from),
        ActorInput::Net(NetworkMessage::Fd(FdMessage::Crash { .. })) => {}
        ActorInput::Net(NetworkMessage::Fd(FdMessage::Subscribe { peer })) => fd.subscribe(&peer),
        ActorInput::Net(NetworkMessage::Fd(FdMessage::Unsubscribe { peer })) => fd.unsubscribe(&peer),
        ActorInput::Timer(TimerInput::FdHeartbeatTick) => {
          fd.on_heartbeat_tick(&mut io_ctx, config.tx_timeout_ms / 10);
          fd.check_suspicions(&mut io_ctx);
        }
        _ => {}
      }
    }
  });
}

fn spawn_pubsub<T: Transport + Clone + 'static>(
  self_node: NodeId,
  transport: T,
  router_tx: Sender<NetworkMessage>,
  to_self: Sender<ActorInput>,
  rx: Receiver<ActorInput>,
  rand_seed: [u8; 16],
) {
  thread::spawn(move || {
    let mut io_ctx = mk_role_io(self_node, rand_seed, transport, router_tx, to_self);
    let mut registry = PubSubRegistry::new();
    for input in rx {
      if let ActorInput::Net(NetworkMessage::PubSub(msg)) = input {
        match msg {
          PubSubMessage::Subscribe { reply_to, request_id, topic, url } => {
            registry.subscribe(&topic, &url);
            io_ctx.send(&reply_to, NetworkMessage::PubSub(PubSubMessage::SubscribeAck { request_id }));
          }
          PubSubMessage::Unsubscribe { reply_to, request_id, topic, url } => {
            let found = registry.unsubscribe(&topic, &url).is_ok();
            io_ctx.send(&reply_to, NetworkMessage::PubSub(PubSubMessage::UnsubscribeAck { request_id, found }));
          }
          PubSubMessage::GetSubscribers { reply_to, request_id, topic } => {
            let urls = registry.get_subscribers(&topic);
            io_ctx.send(&reply_to, NetworkMessage::PubSub(PubSubMessage::GetSubscribersReply { request_id, urls }));
          }
          PubSubMessage::Publish { .. } => {}
          PubSubMessage::SubscribeAck { .. }
          | PubSubMessage::UnsubscribeAck { .. }
          | PubSubMessage::GetSubscribersReply { .. } => {}
        }
      }
    }
    let _ = io_ctx.rand();
  });
}
