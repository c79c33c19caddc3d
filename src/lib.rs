//! `ringtx`: the replicated transaction commit core of a peer-to-peer,
//! chord-like key-value store — Paxos-Commit over a structured overlay
//! with replication factor R. See `SPEC_FULL.md` for the full module map;
//! `README`-level orientation lives in each module's doc comment.

pub mod client;
pub mod common;
pub mod config;
pub mod error;
pub mod fd;
pub mod message;
pub mod node;
pub mod overlay;
pub mod paxos;
pub mod pubsub;
pub mod replica;
pub mod rtm;
pub mod tlog;
pub mod tm;
pub mod transport;

pub use client::Client;
pub use config::Config;
pub use error::{TxError, TxResult};
