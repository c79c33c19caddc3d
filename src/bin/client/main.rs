use std::io::Write;
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use clap::{arg, App};

use ringtx::client::Client;
use ringtx::common::{Key, NodeId};
use ringtx::message::NetworkMessage;
use ringtx::overlay::RingOverlay;
use ringtx::transport::{recv_framed, TcpTransport, SERVER_PORT};

fn prompt(name: &str) -> String {
  let mut line = String::new();
  print!("{}", name);
  std::io::stdout().flush().unwrap();
  std::io::stdin().read_line(&mut line).expect("Error: could not read a line");
  line.trim().to_string()
}

/// An interactive REPL over the client API (§6). Mirrors the teacher's
/// `bin/transact/client.rs` prompt loop and threading model — one accept
/// thread reads replies addressed to this client off the wire and hands
/// them to the blocking `Client` calls via an in-process channel.
fn main() {
  let matches = App::new("ringtx-client")
    .version("0.2.0")
    .author("Pasindu M. <pasindumuth@gmail.com>")
    .arg(arg!(-i --ip <VALUE>).required(true).help("The IP address this client listens on for replies."))
    .arg(arg!(--target <VALUE>).required(true).help("The node id of the TM this client sends commits to."))
    .get_matches();

  let this_ip = matches.value_of("ip").unwrap().to_string();
  let tm_node = NodeId(matches.value_of("target").unwrap().to_string());
  let self_node = NodeId(this_ip.clone());

  let (inbox_tx, inbox_rx) = mpsc::channel::<NetworkMessage>();

  // Accept thread: every reply the TM/TPs/pub-sub registry address back to
  // this client arrives over its own inbound connection, exactly as the
  // teacher's client listens for responses on its own `EndpointId`.
  {
    let inbox_tx = inbox_tx.clone();
    let this_ip = this_ip.clone();
    thread::spawn(move || {
      let listener = TcpListener::bind(format!("{}:{}", this_ip, SERVER_PORT)).expect("failed to bind client port");
      for stream in listener.incoming() {
        let stream = match stream {
          Ok(stream) => stream,
          Err(_) => continue,
        };
        let inbox_tx = inbox_tx.clone();
        thread::spawn(move || {
          let mut stream = stream;
          loop {
            let data = match recv_framed(&mut stream) {
              Ok(data) => data,
              Err(_) => return,
            };
            if let Ok(msg) = rmp_serde::from_slice(&data) {
              let _ = inbox_tx.send(msg);
            }
          }
        });
      }
    });
  }

  let transport = TcpTransport::new();
  let overlay = RingOverlay::new(vec![tm_node.clone()], 1);
  let mut client = Client::new(self_node, tm_node, transport, overlay, inbox_rx);
  let mut tx = None;

  println!("ringtx client. Commands: read <key> | write <key> <value> | tx_start | tx_read <key> | tx_write <key> <value> | tx_revert | tx_commit | subscribe <topic> <url> | unsubscribe <topic> <url> | subscribers <topic> | publish <topic> <content> | exit");
  loop {
    let input = prompt("> ");
    let mut parts = input.splitn(3, ' ');
    let cmd = parts.next().unwrap_or("");
    match cmd {
      "exit" => break,
      "read" => {
        let Some(key) = parts.next() else { println!("usage: read <key>"); continue };
        match client.read(&Key(key.to_string())) {
          Ok(value) => println!("ok: {}", String::from_utf8_lossy(&value)),
          Err(err) => println!("fail: {}", err),
        }
      }
      "write" => {
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else { println!("usage: write <key> <value>"); continue };
        match client.write(&Key(key.to_string()), value.as_bytes().to_vec()) {
          Ok(()) => println!("ok"),
          Err(err) => println!("fail: {}", err),
        }
      }
      "tx_start" => {
        tx = Some(client.tx_start());
        println!("ok");
      }
      "tx_read" => {
        let Some(key) = parts.next() else { println!("usage: tx_read <key>"); continue };
        let Some(active) = tx.as_mut() else { println!("fail: no active transaction, run tx_start first"); continue };
        match client.tx_read(active, &Key(key.to_string())) {
          Ok(value) => println!("ok: {}", String::from_utf8_lossy(&value)),
          Err(err) => println!("fail: {}", err),
        }
      }
      "tx_write" => {
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else { println!("usage: tx_write <key> <value>"); continue };
        let Some(active) = tx.as_mut() else { println!("fail: no active transaction, run tx_start first"); continue };
        client.tx_write(active, &Key(key.to_string()), value.as_bytes().to_vec());
        println!("ok");
      }
      "tx_revert" => {
        let Some(active) = tx.as_mut() else { println!("fail: no active transaction"); continue };
        client.tx_revert_last_op(active);
        println!("ok");
      }
      "tx_commit" => {
        let Some(active) = tx.take() else { println!("fail: no active transaction"); continue };
        match client.tx_commit(active) {
          Ok(()) => println!("ok: commit"),
          Err(err) => println!("fail: {}", err),
        }
      }
      "subscribe" => {
        let (Some(topic), Some(url)) = (parts.next(), parts.next()) else { println!("usage: subscribe <topic> <url>"); continue };
        match client.subscribe(topic, url) {
          Ok(()) => println!("ok"),
          Err(err) => println!("fail: {}", err),
        }
      }
      "unsubscribe" => {
        let (Some(topic), Some(url)) = (parts.next(), parts.next()) else { println!("usage: unsubscribe <topic> <url>"); continue };
        match client.unsubscribe(topic, url) {
          Ok(()) => println!("ok"),
          Err(err) => println!("fail: {}", err),
        }
      }
      "subscribers" => {
        let Some(topic) = parts.next() else { println!("usage: subscribers <topic>"); continue };
        match client.get_subscribers(topic) {
          Ok(urls) => println!("ok: {:?}", urls),
          Err(err) => println!("fail: {}", err),
        }
      }
      "publish" => {
        let (Some(topic), Some(content)) = (parts.next(), parts.next()) else { println!("usage: publish <topic> <content>"); continue };
        client.publish(topic, content.as_bytes().to_vec());
        println!("ok");
      }
      "" => {}
      _ => println!("unrecognized command: {}", cmd),
    }
  }
}
