//! Loss injection.
//!
//! The sender runs every transmission (first send or retransmission) through
//! a [`LossSource`] before it reaches the transport.  A dropped transmission
//! is never written to the stream; the sender only learns about it through
//! the missing ACK and its retransmission timer.
//!
//! | Source         | Behaviour                                        |
//! |----------------|--------------------------------------------------|
//! | [`RandomLoss`] | Drops with a fixed probability, optionally seeded |
//! | [`DropOnce`]   | Drops the first transmission of listed segments  |
//! | [`NoLoss`]     | Delivers everything                              |

use std::collections::BTreeSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SessionConfig;

/// Outcome of a loss decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Deliver,
    Drop,
}

/// Decides, per transmission, whether a segment reaches the peer.
pub trait LossSource: Send {
    fn decide(&mut self, seq: u32) -> Verdict;
}

/// Independent Bernoulli loss with a fixed drop probability.
#[derive(Debug)]
pub struct RandomLoss {
    drop_probability: f64,
    rng: StdRng,
}

impl RandomLoss {
    /// Loss source seeded from the operating system.
    pub fn new(drop_probability: f64) -> Self {
        Self {
            drop_probability,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Loss source whose decisions repeat across runs.
    pub fn seeded(drop_probability: f64, seed: u64) -> Self {
        Self {
            drop_probability,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Loss source for a session: seeded when `config.seed` is set.
    pub fn for_config(config: &SessionConfig) -> Self {
        match config.seed {
            Some(seed) => Self::seeded(config.drop_probability, seed),
            None => Self::new(config.drop_probability),
        }
    }
}

impl LossSource for RandomLoss {
    fn decide(&mut self, _seq: u32) -> Verdict {
        if self.rng.random::<f64>() < self.drop_probability {
            Verdict::Drop
        } else {
            Verdict::Deliver
        }
    }
}

/// Drops the first transmission of each listed sequence number and delivers
/// everything else, including the retransmissions.
#[derive(Debug, Default)]
pub struct DropOnce {
    pending: BTreeSet<u32>,
}

impl DropOnce {
    pub fn new(seqs: impl IntoIterator<Item = u32>) -> Self {
        Self {
            pending: seqs.into_iter().collect(),
        }
    }
}

impl LossSource for DropOnce {
    fn decide(&mut self, seq: u32) -> Verdict {
        if self.pending.remove(&seq) {
            Verdict::Drop
        } else {
            Verdict::Deliver
        }
    }
}

/// A lossless channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoLoss;

impl LossSource for NoLoss {
    fn decide(&mut self, _seq: u32) -> Verdict {
        Verdict::Deliver
    }
}
