//! The publish/subscribe topic registry (§4.8, supplemented). The
//! distillation names the pub/sub layer itself out of scope but tests
//! subscribe/unsubscribe idempotence directly (§8); this module owns only
//! the topic -> subscriber-set bookkeeping those operations need, and
//! hands actual delivery off to an injected `Publisher`.

use std::collections::{BTreeSet, HashMap};

use crate::error::TxError;

/// Delivers `content` for `topic` to one subscriber `url`. The out-of-scope
/// HTTP fan-out (or any other transport) implements this; the registry
/// itself never performs I/O.
pub trait Publisher {
  fn deliver(&mut self, url: &str, topic: &str, content: &[u8]);
}

#[derive(Debug, Default)]
pub struct PubSubRegistry {
  topics: HashMap<String, BTreeSet<String>>,
}

impl PubSubRegistry {
  pub fn new() -> PubSubRegistry {
    PubSubRegistry::default()
  }

  /// `subscribe(topic, url)`: idempotent — a repeated subscribe leaves the
  /// set unchanged rather than erroring.
  pub fn subscribe(&mut self, topic: &str, url: &str) {
    self.topics.entry(topic.to_string()).or_default().insert(url.to_string());
  }

  /// `unsubscribe(topic, url)`: `not_found` if `url` was not subscribed.
  pub fn unsubscribe(&mut self, topic: &str, url: &str) -> Result<(), TxError> {
    match self.topics.get_mut(topic) {
      Some(urls) if urls.remove(url) => Ok(()),
      _ => Err(TxError::NotFound),
    }
  }

  pub fn get_subscribers(&self, topic: &str) -> Vec<String> {
    self.topics.get(topic).map(|urls| urls.iter().cloned().collect()).unwrap_or_default()
  }

  /// `publish(topic, content)`: hands the current subscriber list to
  /// `publisher` for delivery; always succeeds from the registry's point
  /// of view (an empty subscriber list is not an error, per §6).
  pub fn publish<P: Publisher>(&self, publisher: &mut P, topic: &str, content: &[u8]) {
    for url in self.get_subscribers(topic) {
      publisher.deliver(&url, topic, content);
    }
  }
}
