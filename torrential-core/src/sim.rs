//! The swarm simulator: two peer pools and the per-tick pipeline.
//!
//! Each tick runs `admit → periodic maintenance → counter bump → gather
//! offers → distribute offers → accept offers → evict`. The three offer
//! stages fan out over the connected peers in parallel; everything that
//! moves peers between pools or reshapes neighbourhoods runs
//! single-threaded, so the parallel stages only ever read shared state.
//! The one cross-peer mutable datum, each sender's remaining upload
//! budget, lives in [`UploadBudgets`] and is claimed by compare-and-swap.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::SwarmConfig;
use crate::error::Result;
use crate::events::EventSink;
use crate::peer::{ConsideredOffer, Neighbor, Peer, PeerId, PeerRef, SourcedOffer, SwarmView};
use crate::pool::{Handle, Pool};
use crate::rng::SimRng;

/// Per-peer upload budgets for the current tick, indexed by peer id.
///
/// Re-armed to each sender's upload rate at the end of offer
/// generation. During acceptance the recipients race to claim units;
/// whichever order the compare-and-swap resolves in is the order the
/// simulator models, so at most `upload_rate` claims succeed per sender
/// per tick and nothing stronger is promised.
#[derive(Debug)]
pub struct UploadBudgets {
    remaining: Vec<AtomicU32>,
}

impl UploadBudgets {
    /// Creates a zeroed budget table for `capacity` peer ids.
    pub fn new(capacity: usize) -> Self {
        Self {
            remaining: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
        }
    }

    /// Re-arms one sender's budget for the coming acceptance stage.
    pub fn arm(&self, id: PeerId, rate: u32) {
        self.remaining[id as usize].store(rate, Ordering::Release);
    }

    /// Claims one upload unit from `id`, failing once the budget is
    /// spent.
    pub fn try_take(&self, id: PeerId) -> bool {
        let slot = &self.remaining[id as usize];
        let mut current = slot.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return false;
            }
            match slot.compare_exchange(current, current - 1, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Units left for `id` this tick.
    pub fn remaining(&self, id: PeerId) -> u32 {
        self.remaining[id as usize].load(Ordering::Acquire)
    }
}

/// Offers gathered in one tick, keyed by recipient.
type OfferMap = HashMap<PeerRef, Vec<SourcedOffer>>;

/// The whole shebang: both peer pools, the RNG, and the tick loop.
pub struct Simulator {
    config: SwarmConfig,
    connected: Pool<Peer>,
    disconnected: Pool<Peer>,
    budgets: UploadBudgets,
    rng: SimRng,
    events: Arc<dyn EventSink>,
    ticks: u64,
}

impl Simulator {
    /// Builds the initial population.
    ///
    /// One seeder starts connected with the whole file; everyone else
    /// starts disconnected with nothing, the freeriders with no upload
    /// capacity at all. Ids are assigned sequentially from zero.
    ///
    /// # Errors
    /// - `Error::Configuration` - `config` violates a constraint
    pub fn new(config: SwarmConfig, events: Arc<dyn EventSink>) -> Result<Self> {
        config.validate()?;

        let mut rng = config
            .seed
            .map(SimRng::from_seed)
            .unwrap_or_else(SimRng::from_entropy);
        info!(
            seed = rng.seed(),
            peers = config.peers,
            chunks = config.chunks,
            "swarm constructed"
        );

        let mut connected = Pool::new(config.peers);
        let mut disconnected = Pool::new(config.peers);
        let mut next_id: PeerId = 0;

        let sample = |rng: &mut SimRng| (config.upload.sample(rng), config.download.sample(rng));

        // One seeder with every chunk, already in the swarm.
        let (up, down) = sample(&mut rng);
        connected
            .construct(Peer::new(next_id, up, down, config.chunks, true))
            .expect("pool sized for the whole population");
        next_id += 1;

        for _ in 0..config.peers - 1 - config.freeriders {
            let (up, down) = sample(&mut rng);
            disconnected
                .construct(Peer::new(next_id, up, down, config.chunks, false))
                .expect("pool sized for the whole population");
            next_id += 1;
        }

        for _ in 0..config.freeriders {
            let down = config.download.sample(&mut rng);
            disconnected
                .construct(Peer::new(next_id, 0, down, config.chunks, false))
                .expect("pool sized for the whole population");
            next_id += 1;
        }

        let budgets = UploadBudgets::new(config.peers);
        Ok(Self {
            config,
            connected,
            disconnected,
            budgets,
            rng,
            events,
            ticks: 0,
        })
    }

    /// Ticks completed so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// The seed this run can be reproduced from.
    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    /// Peers currently in the swarm.
    pub fn connected_peers(&self) -> impl Iterator<Item = &Peer> {
        self.connected.iter()
    }

    /// Peers currently out of the swarm.
    pub fn disconnected_peers(&self) -> impl Iterator<Item = &Peer> {
        self.disconnected.iter()
    }

    /// True once every peer, connected or not, owns the whole file.
    pub fn all_done(&self) -> bool {
        self.connected.iter().all(Peer::has_everything)
            && self.disconnected.iter().all(Peer::has_everything)
    }

    /// Runs one iteration of the simulator.
    pub fn tick(&mut self) {
        self.ticks += 1;
        self.events.tick(self.ticks);

        self.admit_peers();
        self.periodic_tasks();
        self.advance_counters();

        let offers = self.gather_offers();
        self.distribute_offers(offers);
        self.accept_all();

        self.evict_peers();

        debug!(
            tick = self.ticks,
            connected = self.connected.len(),
            disconnected = self.disconnected.len(),
            "tick complete"
        );
    }

    /// Moves joining peers into the swarm, seeding their neighbourhoods.
    fn admit_peers(&mut self) {
        for handle in self.disconnected.handles() {
            if !self.rng.random_bool(self.config.join_prob) {
                continue;
            }

            let Some(id) = self.disconnected.get(handle).map(|p| p.id) else {
                continue;
            };
            let neighbors = self.random_peers(self.config.policy.desired_peers, &[id]);

            let mut peer = self
                .disconnected
                .destroy(handle)
                .expect("joining peer vanished from the disconnected pool");
            peer.counter = 0;
            debug_assert!(peer.interested_list.is_empty());
            peer.interested_list = neighbors.into_iter().map(Neighbor::new).collect();

            let (up, down) = (peer.upload_rate, peer.download_rate);
            self.connected
                .construct(peer)
                .expect("pool sized for the whole population");
            self.events.connect(id, up, down);
        }
    }

    /// Moves leaving peers out of the swarm.
    fn evict_peers(&mut self) {
        for handle in self.connected.handles() {
            if !self.rng.random_bool(self.config.leave_prob) {
                continue;
            }

            let mut peer = self
                .connected
                .destroy(handle)
                .expect("leaving peer vanished from the connected pool");
            self.events.disconnect(peer.id);
            peer.on_disconnect();
            self.disconnected
                .construct(peer)
                .expect("pool sized for the whole population");
        }
    }

    /// Keeps every connected peer's neighbourhood healthy.
    ///
    /// Runs the cadenced maintenance actions: refill a thin interested
    /// list, re-evaluate the reciprocation slots, rotate the optimistic
    /// unchoke, and periodically churn out neighbours this peer has
    /// nothing left for. Without the churn, neighbourhoods freeze once
    /// everyone nearby has the chunks this peer can offer.
    fn periodic_tasks(&mut self) {
        let policy = self.config.policy;

        for handle in self.connected.handles() {
            let Some(peer) = self.connected.get(handle) else {
                continue;
            };
            let id = peer.id;
            let counter = peer.counter;
            let current_ids: Vec<PeerId> =
                peer.interested_list.iter().map(|n| n.peer.id).collect();

            if current_ids.len() < policy.refill_threshold {
                let mut ignore = current_ids.clone();
                ignore.push(id);
                let fresh = self.random_peers(policy.desired_peers, &ignore);
                if let Some(peer) = self.connected.get_mut(handle) {
                    peer.interested_list
                        .extend(fresh.into_iter().map(Neighbor::new));
                }
            }

            if counter % policy.reorder_cadence == 0 {
                let cannot_help = self.unhelpable(handle);
                if let Some(peer) = self.connected.get_mut(handle) {
                    peer.reorder_peers(&cannot_help);
                }
            }

            if counter % policy.unchoke_cadence == 0 {
                if let Some(peer) = self.connected.get_mut(handle) {
                    peer.random_unchoke(&mut self.rng, policy.reciprocation_set);
                }
            }

            if counter % policy.churn_cadence == 0 {
                let cannot_help = self.unhelpable(handle);
                if cannot_help.is_empty() {
                    continue;
                }

                // Exclusions are snapshotted before the removal so the
                // churned-out neighbours cannot be re-sampled right back.
                let mut ignore: Vec<PeerId> = self
                    .connected
                    .get(handle)
                    .map(|p| p.interested_list.iter().map(|n| n.peer.id).collect())
                    .unwrap_or_default();
                ignore.push(id);

                let mut missing = 0;
                if let Some(peer) = self.connected.get_mut(handle) {
                    peer.interested_list
                        .retain(|n| !cannot_help.contains(&n.peer.id));
                    missing = policy.desired_peers.saturating_sub(peer.interested_list.len());
                }

                let fresh = self.random_peers(missing, &ignore);
                if let Some(peer) = self.connected.get_mut(handle) {
                    peer.interested_list
                        .extend(fresh.into_iter().map(Neighbor::new));
                }
            }
        }
    }

    /// Bumps every connected peer's per-connection tick counter.
    fn advance_counters(&mut self) {
        for peer in self.connected.iter_mut() {
            peer.counter += 1;
        }
    }

    /// Runs every connected peer's offer generation in parallel.
    ///
    /// A single mutex guards insertion into the shared map. Once every
    /// sender has spoken, the upload budgets are re-armed for the
    /// acceptance stage.
    fn gather_offers(&mut self) -> OfferMap {
        let k = self.config.policy.reciprocation_set;
        let map = Mutex::new(OfferMap::new());

        {
            let view = SwarmView::new(&self.connected);
            self.connected.par_entries().for_each(|(handle, peer)| {
                let offers = peer.make_offers(&view, k);
                if offers.is_empty() {
                    return;
                }
                let from = PeerRef {
                    id: peer.id,
                    handle,
                };
                let mut shared = map.lock().unwrap();
                for offer in offers {
                    shared.entry(offer.to).or_default().push(SourcedOffer {
                        from,
                        chunks: offer.chunks,
                    });
                }
            });
        }

        for peer in self.connected.iter() {
            self.budgets.arm(peer.id, peer.upload_rate);
        }

        map.into_inner().unwrap()
    }

    /// Lets every recipient rank its inbound offers.
    ///
    /// The ranking reads the pool immutably and runs in parallel per
    /// recipient; the ranked lists are then stored in a short
    /// sequential pass, consuming the map.
    fn distribute_offers(&mut self, offers: OfferMap) {
        let ranked: Vec<(Handle, Vec<ConsideredOffer>)> = {
            let view = SwarmView::new(&self.connected);
            offers
                .into_par_iter()
                .filter_map(|(to, inbound)| {
                    let peer = view.resolve(to)?;
                    Some((to.handle, peer.consider_offers(inbound, &view)))
                })
                .collect()
        };

        for (handle, considered) in ranked {
            if let Some(peer) = self.connected.get_mut(handle) {
                peer.considered_offers = considered;
            }
        }
    }

    /// Runs every connected peer's acceptance walk in parallel.
    fn accept_all(&mut self) {
        let budgets = &self.budgets;
        let events = &*self.events;
        self.connected
            .par_iter_mut()
            .for_each(|peer| peer.accept_offers(budgets, events));
    }

    /// Samples up to `want` connected peers uniformly, excluding peers
    /// that already own everything and the ids in `ignore`.
    fn random_peers(&mut self, want: usize, ignore: &[PeerId]) -> Vec<PeerRef> {
        if want == 0 {
            return Vec::new();
        }

        let mut candidates: Vec<PeerRef> = self
            .connected
            .entries()
            .filter(|(_, peer)| !peer.has_everything() && !ignore.contains(&peer.id))
            .map(|(handle, peer)| PeerRef {
                id: peer.id,
                handle,
            })
            .collect();

        if candidates.len() > want {
            self.rng.shuffle(&mut candidates);
            candidates.truncate(want);
        }
        candidates
    }

    /// Ids of neighbourhood entries this peer has nothing for,
    /// including entries whose reference has gone stale.
    fn unhelpable(&self, handle: Handle) -> HashSet<PeerId> {
        let Some(peer) = self.connected.get(handle) else {
            return HashSet::new();
        };
        let view = SwarmView::new(&self.connected);
        peer.interested_list
            .iter()
            .filter_map(|n| match view.resolve(n.peer) {
                Some(other) if peer.has_something_for(other) => None,
                _ => Some(n.peer.id),
            })
            .collect()
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        // The pools assert emptiness on drop; the peers they still own
        // at the end of a run are not leaks.
        self.connected.clear();
        self.disconnected.clear();
    }
}
