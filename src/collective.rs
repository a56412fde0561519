//! Collective communication boundary between chains.
//!
//! The warmup controller only needs one primitive: an all-gather that doubles
//! as a barrier. Every chain contributes a numeric vector and blocks until
//! all peers have contributed, then every chain receives the full set of
//! contributions in rank order. Peer failure is a first-class outcome, not a
//! hang: an aborting chain wakes all waiters with [`CollectiveError`], and an
//! optional timeout bounds the wait when a peer silently stops iterating.

use std::error::Error;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Failure modes of the synchronization point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectiveError {
    /// A peer chain aborted (fatal init error, interrupt, or timeout);
    /// the group must stop warmup instead of waiting for it.
    PeerAborted { rank: usize },
    /// No full group formed within the configured timeout.
    Timeout,
    /// A caller passed a rank outside `0..num_chains`.
    InvalidRank { rank: usize },
}

impl fmt::Display for CollectiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CollectiveError::PeerAborted { rank } => {
                write!(f, "chain {} aborted before reaching the barrier", rank)
            }
            CollectiveError::Timeout => {
                write!(f, "timed out waiting for peer chains at the barrier")
            }
            CollectiveError::InvalidRank { rank } => {
                write!(f, "rank {} is outside the chain group", rank)
            }
        }
    }
}

impl Error for CollectiveError {}

/// Fixed group of peer chains bound to a communication context.
///
/// The handle's lifetime is exactly the run's lifetime; the group size never
/// changes after construction.
pub trait Collective: Send + Sync {
    /// Number of participating chains.
    fn num_chains(&self) -> usize;

    /// Contributes `payload` for `rank` and blocks until every chain has
    /// contributed, then returns all contributions indexed by rank.
    ///
    /// Payload lengths may differ between chains; each chain gets back
    /// exactly what its peers sent.
    fn all_gather(&self, rank: usize, payload: &[f64]) -> Result<Vec<Vec<f64>>, CollectiveError>;

    /// Marks `rank` as failed and wakes every chain blocked at the barrier.
    /// Idempotent; the first abort wins.
    fn abort(&self, rank: usize);
}

struct Round {
    generation: u64,
    contributions: Vec<Option<Vec<f64>>>,
    arrived: usize,
    result: Option<Arc<Vec<Vec<f64>>>>,
    aborted: Option<usize>,
}

struct Shared {
    n: usize,
    round: Mutex<Round>,
    cv: Condvar,
}

/// In-process [`Collective`] over a fixed set of chain threads.
///
/// Clone one handle per chain thread. The gather is a generation-counted
/// barrier: the last arrival of a round assembles the result and advances the
/// generation, waking the waiters. A chain can be at most one round ahead of
/// its slowest peer, so a round's result is never overwritten before every
/// waiter has taken its copy.
#[derive(Clone)]
pub struct ThreadCollective {
    shared: Arc<Shared>,
    timeout: Option<Duration>,
}

impl ThreadCollective {
    /// Creates a group of `num_chains` with an unbounded barrier wait.
    pub fn new(num_chains: usize) -> Self {
        Self::with_timeout(num_chains, None)
    }

    /// Creates a group whose barrier waits fail with
    /// [`CollectiveError::Timeout`] after `timeout`.
    pub fn with_timeout(num_chains: usize, timeout: Option<Duration>) -> Self {
        assert!(num_chains > 0, "a chain group cannot be empty");
        Self {
            shared: Arc::new(Shared {
                n: num_chains,
                round: Mutex::new(Round {
                    generation: 0,
                    contributions: (0..num_chains).map(|_| None).collect(),
                    arrived: 0,
                    result: None,
                    aborted: None,
                }),
                cv: Condvar::new(),
            }),
            timeout,
        }
    }
}

impl Collective for ThreadCollective {
    fn num_chains(&self) -> usize {
        self.shared.n
    }

    fn all_gather(&self, rank: usize, payload: &[f64]) -> Result<Vec<Vec<f64>>, CollectiveError> {
        if rank >= self.shared.n {
            return Err(CollectiveError::InvalidRank { rank });
        }

        let mut round = self
            .shared
            .round
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(failed) = round.aborted {
            return Err(CollectiveError::PeerAborted { rank: failed });
        }

        let my_generation = round.generation;
        round.contributions[rank] = Some(payload.to_vec());
        round.arrived += 1;

        if round.arrived == self.shared.n {
            let gathered: Vec<Vec<f64>> = round
                .contributions
                .iter_mut()
                .map(|slot| slot.take().expect("every rank contributed this round"))
                .collect();
            let gathered = Arc::new(gathered);
            round.result = Some(Arc::clone(&gathered));
            round.generation += 1;
            round.arrived = 0;
            self.shared.cv.notify_all();
            return Ok((*gathered).clone());
        }

        let deadline = self.timeout.map(|t| Instant::now() + t);
        loop {
            if let Some(failed) = round.aborted {
                return Err(CollectiveError::PeerAborted { rank: failed });
            }
            if round.generation != my_generation {
                let result = round
                    .result
                    .as_ref()
                    .expect("a finished round always leaves a result");
                return Ok((**result).clone());
            }
            round = match deadline {
                None => self
                    .shared
                    .cv
                    .wait(round)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        // Mark the group failed so peers stop waiting too.
                        round.aborted = Some(rank);
                        self.shared.cv.notify_all();
                        return Err(CollectiveError::Timeout);
                    }
                    let (guard, _timed_out) = self
                        .shared
                        .cv
                        .wait_timeout(round, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    guard
                }
            };
        }
    }

    fn abort(&self, rank: usize) {
        let mut round = self
            .shared
            .round
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if round.aborted.is_none() {
            round.aborted = Some(rank);
        }
        self.shared.cv.notify_all();
    }
}
