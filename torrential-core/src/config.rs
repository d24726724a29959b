//! Simulation parameters and their validation.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::rng::SimRng;

/// Inclusive capacity range, in chunks per tick.
///
/// Parses from the command-line `min,max` syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateRange {
    /// Lower bound, inclusive
    pub min: u32,
    /// Upper bound, inclusive
    pub max: u32,
}

impl RateRange {
    /// A degenerate range that always samples to `rate`.
    pub fn fixed(rate: u32) -> Self {
        Self {
            min: rate,
            max: rate,
        }
    }

    /// Samples a capacity uniformly from the range.
    pub fn sample(&self, rng: &mut SimRng) -> u32 {
        rng.sample_inclusive(self.min, self.max)
    }
}

impl fmt::Display for RateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.min, self.max)
    }
}

impl FromStr for RateRange {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (min, max) = s
            .split_once(',')
            .ok_or_else(|| format!("expected min,max but got `{s}`"))?;
        let min = min
            .trim()
            .parse()
            .map_err(|_| format!("invalid minimum `{min}`"))?;
        let max = max
            .trim()
            .parse()
            .map_err(|_| format!("invalid maximum `{max}`"))?;
        Ok(Self { min, max })
    }
}

/// Policy constants steering neighbourhood maintenance.
///
/// The defaults are the classic values; they can be tuned without
/// changing the semantics of the tick pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmPolicy {
    /// Reciprocation slots per peer: offers go to the first
    /// `reciprocation_set` entries of the interested list, the last of
    /// which is the optimistic-unchoke slot
    pub reciprocation_set: usize,
    /// Neighbourhood size sampling aims for
    pub desired_peers: usize,
    /// Refill the interested list when it shrinks below this
    pub refill_threshold: usize,
    /// Re-evaluate the top reciprocation slots every this many ticks
    pub reorder_cadence: u64,
    /// Rotate the optimistic-unchoke slot every this many ticks
    pub unchoke_cadence: u64,
    /// Churn out unhelpable neighbours every this many ticks
    pub churn_cadence: u64,
}

impl Default for SwarmPolicy {
    fn default() -> Self {
        Self {
            reciprocation_set: 5,
            desired_peers: 40,
            refill_threshold: 20,
            reorder_cadence: 10,
            unchoke_cadence: 30,
            churn_cadence: 120,
        }
    }
}

/// Full configuration for one swarm simulation.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    /// Total peer count, seeder included
    pub peers: usize,
    /// Chunks in the complete torrent
    pub chunks: usize,
    /// Per-tick probability that a disconnected peer joins
    pub join_prob: f64,
    /// Per-tick probability that a connected peer leaves
    pub leave_prob: f64,
    /// Upload capacity range sampled per peer
    pub upload: RateRange,
    /// Download capacity range sampled per peer
    pub download: RateRange,
    /// Peers that download but never upload
    pub freeriders: usize,
    /// Seed for the simulation RNG; `None` seeds from system entropy
    pub seed: Option<u64>,
    /// Neighbourhood maintenance constants
    pub policy: SwarmPolicy,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            peers: 0,
            chunks: 0,
            join_prob: 0.2,
            leave_prob: 0.01,
            upload: RateRange::fixed(10),
            download: RateRange::fixed(100),
            freeriders: 0,
            seed: None,
            policy: SwarmPolicy::default(),
        }
    }
}

impl SwarmConfig {
    /// Checks every constraint the engine relies on.
    ///
    /// # Errors
    /// - `Error::Configuration` - Any violated constraint, with a
    ///   one-line description
    pub fn validate(&self) -> Result<()> {
        if self.peers < 2 {
            return Err(Error::Configuration(
                "you cannot have fewer than two peers".into(),
            ));
        }
        if self.chunks < 2 {
            return Err(Error::Configuration(
                "you cannot have fewer than two chunks".into(),
            ));
        }
        if !(self.join_prob > 0.0 && self.join_prob <= 1.0) {
            return Err(Error::Configuration(format!(
                "join probability {} is not in (0, 1]",
                self.join_prob
            )));
        }
        if !(self.leave_prob >= 0.0 && self.leave_prob < self.join_prob) {
            return Err(Error::Configuration(format!(
                "leave probability {} must be in [0, join probability)",
                self.leave_prob
            )));
        }
        if self.upload.min > self.upload.max {
            return Err(Error::Configuration(format!(
                "upload range {} is empty",
                self.upload
            )));
        }
        if self.download.min > self.download.max {
            return Err(Error::Configuration(format!(
                "download range {} is empty",
                self.download
            )));
        }
        if self.freeriders >= self.peers {
            return Err(Error::Configuration(format!(
                "{} freeriders leaves no seeder among {} peers",
                self.freeriders, self.peers
            )));
        }
        if self.policy.reciprocation_set == 0 {
            return Err(Error::Configuration(
                "the reciprocation set cannot be empty".into(),
            ));
        }
        if self.policy.desired_peers == 0 {
            return Err(Error::Configuration(
                "the desired neighbourhood cannot be empty".into(),
            ));
        }
        Ok(())
    }
}
