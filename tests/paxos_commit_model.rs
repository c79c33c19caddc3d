//! Model-checks the agreement property the `paxos::acceptor`/`proposer`
//! pair relies on (§4.4, §8 "Safety under takeover"): once a majority of
//! acceptors has accepted a value for some `paxos_id`, no later round —
//! including a takeover RTM's — can get a *different* value accepted by a
//! majority. The state here mirrors `AcceptorState`'s fields directly
//! (`promised_round`, `accepted`); this is an abstract companion to that
//! module, not a re-implementation of it.
//!
//! Two rounds are modeled: round 0 is the original TM proposing the TP's
//! vote (`Prepared`, in this scenario); round 1 is a takeover RTM
//! proposing `Abort`, seeded at a higher round per §4.2's takeover
//! procedure. Three acceptors, quorum 2 — the TM+R-1 RTM acceptor group
//! for `replication_factor = 3`.

use std::collections::BTreeMap;

use stateright::{Checker, Model, Property};

const ACCEPTOR_COUNT: usize = 3;
const QUORUM: usize = 2;
const ROUNDS: [u32; 2] = [0, 1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Decision {
  Prepared,
  Abort,
}

/// The default value each round's proposer starts out wanting to propose,
/// absent any already-accepted value it must adopt instead.
fn default_value(round: u32) -> Decision {
  if round == 0 {
    Decision::Prepared
  } else {
    Decision::Abort
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AcceptorState {
  promised: Option<u32>,
  accepted: Option<(u32, Decision)>,
}

impl Default for AcceptorState {
  fn default() -> AcceptorState {
    AcceptorState { promised: None, accepted: None }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PaxosState {
  acceptors: [AcceptorState; ACCEPTOR_COUNT],
  /// `promises[round][acceptor]` = the `accepted` value that acceptor
  /// reported back at the moment it promised `round`, mirroring the
  /// `Promise { accepted, .. }` wire message in `message.rs`.
  promises: BTreeMap<u32, BTreeMap<usize, Option<(u32, Decision)>>>,
}

impl Default for PaxosState {
  fn default() -> PaxosState {
    PaxosState { acceptors: Default::default(), promises: BTreeMap::new() }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum PaxosAction {
  /// Acceptor `acceptor` processes a `Prepare` for `round`.
  Prepare { round: u32, acceptor: usize },
  /// Acceptor `acceptor` processes an `Accept` for `round`, once the
  /// proposer for that round has a promise quorum to compute a value from.
  Accept { round: u32, acceptor: usize },
}

struct PaxosCommitModel;

impl PaxosCommitModel {
  /// The value a round's proposer would send in its `Accept`, adopting
  /// the highest-round already-accepted value among its promise quorum if
  /// one exists — exactly `ProposerTable::handle`'s Promise-processing
  /// rule, generalized to an arbitrary quorum of promises.
  fn proposal_value(round: u32, promises_for_round: &BTreeMap<usize, Option<(u32, Decision)>>) -> Decision {
    promises_for_round
      .values()
      .filter_map(|accepted| *accepted)
      .max_by_key(|(r, _)| *r)
      .map(|(_, value)| value)
      .unwrap_or_else(|| default_value(round))
  }
}

impl Model for PaxosCommitModel {
  type State = PaxosState;
  type Action = PaxosAction;

  fn init_states(&self) -> Vec<Self::State> {
    vec![PaxosState::default()]
  }

  fn actions(&self, state: &Self::State, actions: &mut Vec<Self::Action>) {
    for &round in &ROUNDS {
      for acceptor in 0..ACCEPTOR_COUNT {
        let promised = state.acceptors[acceptor].promised;
        if promised.map(|p| round > p).unwrap_or(true) {
          actions.push(PaxosAction::Prepare { round, acceptor });
        }
        let has_quorum = state.promises.get(&round).map(|p| p.len() >= QUORUM).unwrap_or(false);
        let may_accept = promised.map(|p| round >= p).unwrap_or(true);
        if has_quorum && may_accept {
          actions.push(PaxosAction::Accept { round, acceptor });
        }
      }
    }
  }

  fn next_state(&self, state: &Self::State, action: Self::Action) -> Option<Self::State> {
    let mut next = state.clone();
    match action {
      PaxosAction::Prepare { round, acceptor } => {
        let already_promised = next.acceptors[acceptor].promised;
        if already_promised.map(|p| round <= p).unwrap_or(false) {
          return None;
        }
        let carried_accepted = next.acceptors[acceptor].accepted;
        next.acceptors[acceptor].promised = Some(round);
        next.promises.entry(round).or_default().insert(acceptor, carried_accepted);
        Some(next)
      }
      PaxosAction::Accept { round, acceptor } => {
        let promised = next.acceptors[acceptor].promised;
        if promised.map(|p| round < p).unwrap_or(false) {
          return None;
        }
        let promises_for_round = next.promises.get(&round)?;
        if promises_for_round.len() < QUORUM {
          return None;
        }
        let value = Self::proposal_value(round, promises_for_round);
        next.acceptors[acceptor].accepted = Some((round, value));
        next.acceptors[acceptor].promised = Some(next.acceptors[acceptor].promised.map(|p| p.max(round)).unwrap_or(round));
        Some(next)
      }
    }
  }

  fn properties(&self) -> Vec<Property<Self>> {
    vec![Property::always("no two values ever both reach a majority", |_, state| {
      let prepared_votes = state.acceptors.iter().filter(|a| matches!(a.accepted, Some((_, Decision::Prepared)))).count();
      let abort_votes = state.acceptors.iter().filter(|a| matches!(a.accepted, Some((_, Decision::Abort)))).count();
      !(prepared_votes >= QUORUM && abort_votes >= QUORUM)
    })]
  }
}

#[test]
fn takeover_round_never_overturns_an_already_decided_value() {
  PaxosCommitModel.checker().spawn_bfs().join().assert_properties();
}
