use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use clap::{arg, App};
use rand::{RngCore, SeedableRng};
use rand_xorshift::XorShiftRng;

use ringtx::common::NodeId;
use ringtx::config::Config;
use ringtx::node::NodeRuntime;
use ringtx::overlay::RingOverlay;
use ringtx::transport::{recv_framed, TcpTransport, SERVER_PORT};

/// Boots one physical DHT node: binds the accept loop, wires up the ring
/// overlay from the peer list given on the command line, and starts the
/// TM/TP/Paxos/FD/PubSub actor threads via `NodeRuntime`. Mirrors the
/// teacher's `bin/transact/server.rs` entry point, generalized from one
/// Slave-per-process to one `ringtx` node-per-process.
fn main() {
  tracing_subscriber::fmt::init();

  let matches = App::new("ringtx-server")
    .version("0.2.0")
    .author("Pasindu M. <pasindumuth@gmail.com>")
    .arg(arg!(-i --ip <VALUE>).required(true).help("The IP address of the current host."))
    .arg(arg!(--id <VALUE>).required(true).help("This node's id in the ring overlay."))
    .arg(arg!(--peers <VALUE>).required(true).help("Comma-separated list of every node id in the ring, including this one."))
    .get_matches();

  let this_ip = matches.value_of("ip").unwrap().to_string();
  let self_node = NodeId(matches.value_of("id").unwrap().to_string());
  let peers: Vec<NodeId> = matches.value_of("peers").unwrap().split(',').map(|id| NodeId(id.trim().to_string())).collect();

  let config = Config::default();
  let overlay = Arc::new(RingOverlay::new(peers, config.replication_factor));
  let transport = TcpTransport::new();

  let mut rand = XorShiftRng::from_entropy();
  let mut rand_seed = [0u8; 16];
  rand.fill_bytes(&mut rand_seed);

  let runtime = NodeRuntime::new(self_node.clone(), config, transport, overlay, rand_seed);

  let listener = TcpListener::bind(format!("{}:{}", this_ip, SERVER_PORT)).expect("failed to bind server port");
  tracing::info!(node = ?self_node, addr = %this_ip, "ringtx node listening");
  for stream in listener.incoming() {
    let stream = match stream {
      Ok(stream) => stream,
      Err(err) => {
        tracing::warn!(%err, "failed to accept connection");
        continue;
      }
    };
    let runtime_handle = runtime.local_router.clone();
    thread::spawn(move || {
      let mut stream = stream;
      loop {
        let data = match recv_framed(&mut stream) {
          Ok(data) => data,
          Err(_) => return, // peer closed the connection
        };
        match rmp_serde::from_slice(&data) {
          Ok(msg) => {
            let _ = runtime_handle.send(msg);
          }
          Err(err) => tracing::warn!(%err, "dropping malformed inbound message"),
        }
      }
    });
  }
}
