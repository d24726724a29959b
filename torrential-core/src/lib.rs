//! Torrential - discrete-time simulation of a BitTorrent-style swarm.
#![warn(missing_docs)]
#![warn(clippy::missing_errors_doc)]
//!
//! A fixed population of peers tries to acquire every chunk of a single
//! file by trading with one another over repeated ticks. The engine
//! models the emergent dynamics of rarest-first chunk selection,
//! tit-for-tat reciprocation, optimistic unchoking, and freerider
//! behaviour under configurable churn.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use torrential_core::{HumanSink, RateRange, Simulator, SwarmConfig};
//!
//! # fn main() -> torrential_core::Result<()> {
//! let config = SwarmConfig {
//!     peers: 50,
//!     chunks: 100,
//!     upload: RateRange { min: 8, max: 12 },
//!     seed: Some(12345),
//!     ..SwarmConfig::default()
//! };
//!
//! let mut sim = Simulator::new(config, Arc::new(HumanSink))?;
//! while !sim.all_done() {
//!     sim.tick();
//! }
//! println!("done after {} ticks", sim.tick_count());
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - **[`Pool`]**: a fixed-capacity slab owning every peer, with
//!   generation-checked handles and an address-sorted free list
//! - **[`Peer`]**: one swarm participant and its trading operations
//! - **[`Simulator`]**: the per-tick pipeline moving peers between the
//!   connected and disconnected pools and resolving offers under
//!   capacity constraints
//! - **[`EventSink`]**: where connects, transfers, and finishes are
//!   reported

pub mod config;
pub mod error;
pub mod events;
pub mod peer;
pub mod pool;
pub mod rng;
pub mod sim;
pub mod stats;

pub use config::{RateRange, SwarmConfig, SwarmPolicy};
pub use error::{Error, Result};
pub use events::{Event, EventSink, HumanSink, MachineSink, NullSink, RecordingSink};
pub use peer::{ConsideredOffer, Neighbor, Offer, Peer, PeerId, PeerRef, SourcedOffer, SwarmView};
pub use pool::{Handle, Pool};
pub use rng::SimRng;
pub use sim::{Simulator, UploadBudgets};
pub use stats::{StatsSink, SwarmReport};
