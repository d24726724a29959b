//! A peer in the swarm: identity, capacities, owned chunks, and the
//! neighbourhood it trades with.
//!
//! Offers flow in three steps each tick. A peer *makes* offers to the
//! top of its interested list, rarest chunk first; recipients *consider*
//! everything offered to them, ranking by how rare each chunk looks from
//! where they sit; then each recipient *accepts* down the ranking until
//! its download capacity or the senders' upload budgets run out.

use std::collections::HashSet;

use crate::events::EventSink;
use crate::pool::{Handle, Pool};
use crate::rng::SimRng;
use crate::sim::UploadBudgets;

/// Stable peer identity, unique for the simulation lifetime.
pub type PeerId = u32;

/// Reference to a connected peer: its stable id plus the pool handle of
/// its current incarnation.
///
/// The handle goes stale when the peer leaves the connected set, so a
/// kept `PeerRef` fails resolution instead of pointing at whatever
/// moved into the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerRef {
    /// Stable id
    pub id: PeerId,
    /// Slot of the current incarnation in the connected pool
    pub handle: Handle,
}

/// One entry of a peer's interested list.
#[derive(Debug, Clone, Copy)]
pub struct Neighbor {
    /// Who the entry refers to
    pub peer: PeerRef,
    /// Chunks this neighbour sent us since the last reorder
    pub contributed: i64,
}

impl Neighbor {
    /// A fresh entry with no recorded contributions.
    pub fn new(peer: PeerRef) -> Self {
        Self {
            peer,
            contributed: 0,
        }
    }
}

/// An outbound offer: chunks proposed to one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    /// The recipient
    pub to: PeerRef,
    /// Chunk indices proposed, rarest first
    pub chunks: Vec<usize>,
}

/// An inbound offer as seen by its recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcedOffer {
    /// The sender
    pub from: PeerRef,
    /// Chunk indices proposed
    pub chunks: Vec<usize>,
}

/// A single flattened offer awaiting acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsideredOffer {
    /// The sender
    pub from: PeerRef,
    /// The chunk proposed
    pub chunk: usize,
}

/// Read-only view of the connected set, scoped to one pipeline stage.
///
/// Resolution validates the handle's generation, so entries referring
/// to peers that have since disconnected come back as `None`.
#[derive(Debug, Clone, Copy)]
pub struct SwarmView<'a> {
    connected: &'a Pool<Peer>,
}

impl<'a> SwarmView<'a> {
    /// Wraps the connected pool for the duration of a stage.
    pub fn new(connected: &'a Pool<Peer>) -> Self {
        Self { connected }
    }

    /// Resolves a reference to a shared borrow of the peer, or `None`
    /// if the reference is stale.
    pub fn resolve(&self, peer: PeerRef) -> Option<&'a Peer> {
        self.connected.get(peer.handle).filter(|p| p.id == peer.id)
    }
}

/// A participant in the swarm.
#[derive(Debug)]
pub struct Peer {
    /// Stable id, assigned at construction
    pub id: PeerId,
    /// Chunks per tick this peer may send, in aggregate
    pub upload_rate: u32,
    /// Chunks per tick this peer may accept
    pub download_rate: u32,
    /// Ticks since this peer last connected
    pub counter: u64,
    /// Bit i set iff this peer owns chunk i; never resized
    pub chunks: Vec<bool>,
    /// The neighbourhood, reciprocation slots first
    pub interested_list: Vec<Neighbor>,
    /// Ranked inbound offers, alive between the consider and accept
    /// stages of one tick
    pub considered_offers: Vec<ConsideredOffer>,
    done: bool,
}

impl Peer {
    /// Creates a peer owning either nothing or the whole file.
    pub fn new(id: PeerId, upload_rate: u32, download_rate: u32, num_chunks: usize, seeded: bool) -> Self {
        Self {
            id,
            upload_rate,
            download_rate,
            counter: 0,
            chunks: vec![seeded; num_chunks],
            interested_list: Vec::new(),
            considered_offers: Vec::new(),
            done: seeded,
        }
    }

    /// True once every chunk is owned. Never reverts.
    pub fn has_everything(&self) -> bool {
        self.done
    }

    /// True iff this peer owns a chunk `other` lacks.
    pub fn has_something_for(&self, other: &Peer) -> bool {
        self.chunks
            .iter()
            .zip(&other.chunks)
            .any(|(mine, theirs)| *mine && !*theirs)
    }

    /// Counts, for each chunk, how many neighbours own it.
    ///
    /// Stale neighbourhood entries contribute nothing.
    pub fn chunk_popularity(&self, view: &SwarmView<'_>) -> Vec<usize> {
        let mut popularity = vec![0usize; self.chunks.len()];
        for neighbor in &self.interested_list {
            let Some(other) = view.resolve(neighbor.peer) else {
                continue;
            };
            for (count, owned) in popularity.iter_mut().zip(&other.chunks) {
                if *owned {
                    *count += 1;
                }
            }
        }
        popularity
    }

    /// Builds this tick's offers to the top of the interested list.
    ///
    /// Chunks are proposed rarest first (ties to the lower index) and
    /// round-robinned across the first `k` reciprocation slots, up to
    /// `upload_rate` chunks per recipient in total. Recipients that
    /// already own everything, or whose reference has gone stale, issue
    /// nothing.
    pub fn make_offers(&self, view: &SwarmView<'_>, k: usize) -> Vec<Offer> {
        if self.interested_list.is_empty() || self.upload_rate == 0 {
            return Vec::new();
        }

        let popularity = self.chunk_popularity(view);
        let mut rarest: Vec<usize> = (0..self.chunks.len()).filter(|&i| self.chunks[i]).collect();
        rarest.sort_by_key(|&i| (popularity[i], i));

        // The reciprocation set: the first k slots that still resolve.
        let recipients: Vec<(PeerRef, &Peer)> = self
            .interested_list
            .iter()
            .take(k)
            .filter_map(|n| view.resolve(n.peer).map(|p| (n.peer, p)))
            .collect();
        if recipients.is_empty() {
            return Vec::new();
        }

        let mut offers: Vec<Offer> = recipients
            .iter()
            .map(|(peer, _)| Offer {
                to: *peer,
                chunks: Vec::new(),
            })
            .collect();

        // One cursor into `rarest` per recipient; everything behind a
        // cursor is either owned by that recipient or already offered.
        let mut cursors = vec![0usize; recipients.len()];
        let budget = self.upload_rate as usize * recipients.len();
        let mut issued = 0;

        while issued < budget {
            let mut progressed = false;
            for (slot, (_, target)) in recipients.iter().enumerate() {
                if issued >= budget {
                    break;
                }
                if target.has_everything() {
                    continue;
                }
                while cursors[slot] < rarest.len() && target.chunks[rarest[cursors[slot]]] {
                    cursors[slot] += 1;
                }
                if cursors[slot] >= rarest.len() {
                    continue;
                }
                offers[slot].chunks.push(rarest[cursors[slot]]);
                cursors[slot] += 1;
                issued += 1;
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        offers
    }

    /// Ranks the offers made to this peer this tick.
    ///
    /// Flattens the inbound offers and sorts them ascending by how
    /// common each chunk is in this peer's own neighbourhood, so the
    /// locally rarest chunks are accepted first. Ties break by source
    /// id then chunk index, which keeps the ranking deterministic no
    /// matter what order the offer map was filled in.
    pub fn consider_offers(
        &self,
        inbound: Vec<SourcedOffer>,
        view: &SwarmView<'_>,
    ) -> Vec<ConsideredOffer> {
        let popularity = self.chunk_popularity(view);

        let mut considered: Vec<ConsideredOffer> = inbound
            .into_iter()
            .flat_map(|offer| {
                let from = offer.from;
                offer
                    .chunks
                    .into_iter()
                    .map(move |chunk| ConsideredOffer { from, chunk })
            })
            .collect();
        considered.sort_by_key(|offer| (popularity[offer.chunk], offer.from.id, offer.chunk));
        considered
    }

    /// Walks the ranked offers and accepts up to `download_rate` of
    /// them.
    ///
    /// Every examined offer credits its source's contribution count
    /// first: the source tried, even if the chunk turns out to be
    /// owned already or the source's upload budget is spent. Each
    /// accepted transfer decrements the source's budget, flips the
    /// chunk bit, and is reported to the sink. Completing the file
    /// fires the finish event exactly once.
    pub fn accept_offers(&mut self, budgets: &UploadBudgets, events: &dyn EventSink) {
        let offers = std::mem::take(&mut self.considered_offers);
        let mut downloaded = 0u32;

        for offer in offers {
            if downloaded >= self.download_rate {
                break;
            }
            if let Some(n) = self
                .interested_list
                .iter_mut()
                .find(|n| n.peer == offer.from)
            {
                n.contributed += 1;
            }
            if self.chunks[offer.chunk] {
                continue;
            }
            if !budgets.try_take(offer.from.id) {
                continue;
            }
            events.transmit(offer.from.id, offer.chunk, self.id);
            self.chunks[offer.chunk] = true;
            downloaded += 1;
        }

        if !self.done && self.chunks.iter().all(|&owned| owned) {
            self.done = true;
            events.finished(self.id, self.chunks.len());
        }
    }

    /// Re-evaluates the reciprocation slots.
    ///
    /// Entries this peer has nothing for sink to the bottom; the rest
    /// sort by contributions, best first. All counts reset afterwards.
    pub fn reorder_peers(&mut self, cannot_help: &HashSet<PeerId>) {
        for neighbor in &mut self.interested_list {
            if cannot_help.contains(&neighbor.peer.id) {
                neighbor.contributed = i64::MIN;
            }
        }
        self.interested_list
            .sort_by(|a, b| b.contributed.cmp(&a.contributed));
        for neighbor in &mut self.interested_list {
            neighbor.contributed = 0;
        }
    }

    /// Rotates a uniformly chosen peer into the optimistic-unchoke slot
    /// (position `k - 1`). No-op when the list has no one to rotate in.
    pub fn random_unchoke(&mut self, rng: &mut SimRng, k: usize) {
        if self.interested_list.len() <= k {
            return;
        }
        let chosen = rng.random_range(k as u64 - 1, self.interested_list.len() as u64) as usize;
        self.interested_list.swap(k - 1, chosen);
    }

    /// Drops the neighbourhood; it is rebuilt on reconnect.
    pub fn on_disconnect(&mut self) {
        self.interested_list.clear();
        self.interested_list.shrink_to_fit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Event, RecordingSink};

    /// Builds a connected pool and links the first peer to the rest.
    fn swarm(chunk_maps: &[&[bool]], upload_rate: u32) -> (Pool<Peer>, Vec<Handle>) {
        let mut pool = Pool::new(chunk_maps.len());
        let mut handles = Vec::new();
        for (i, map) in chunk_maps.iter().enumerate() {
            let seeded = map.iter().all(|&owned| owned);
            let mut peer = Peer::new(i as PeerId + 1, upload_rate, 1, map.len(), seeded);
            peer.chunks = map.to_vec();
            handles.push(pool.construct(peer).unwrap());
        }
        let refs: Vec<PeerRef> = handles
            .iter()
            .enumerate()
            .skip(1)
            .map(|(i, &handle)| PeerRef {
                id: i as PeerId + 1,
                handle,
            })
            .collect();
        let first = pool.get_mut(handles[0]).unwrap();
        first.interested_list = refs.into_iter().map(Neighbor::new).collect();
        (pool, handles)
    }

    fn offers_of(pool: &Pool<Peer>, handle: Handle, k: usize) -> Vec<Offer> {
        let view = SwarmView::new(pool);
        pool.get(handle).unwrap().make_offers(&view, k)
    }

    #[test]
    fn offers_single_chunk() {
        let (mut pool, handles) = swarm(&[&[true], &[false]], 1);
        let offers = offers_of(&pool, handles[0], 5);

        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].to.id, 2);
        assert_eq!(offers[0].chunks, [0]);
        pool.clear();
    }

    #[test]
    fn offers_nothing_when_owning_nothing() {
        let (mut pool, handles) = swarm(&[&[false], &[false]], 1);
        let offers = offers_of(&pool, handles[0], 5);

        // An empty offer list to the neighbour is fine; chunks are not.
        if let Some(offer) = offers.first() {
            assert_eq!(offer.to.id, 2);
            assert!(offer.chunks.is_empty());
        }
        pool.clear();
    }

    #[test]
    fn offers_nothing_when_everyone_is_done() {
        let (mut pool, handles) = swarm(&[&[true], &[true]], 1);
        let offers = offers_of(&pool, handles[0], 5);

        if let Some(offer) = offers.first() {
            assert!(offer.chunks.is_empty());
        }
        pool.clear();
    }

    #[test]
    fn offers_pick_the_right_chunk() {
        let (mut pool, handles) = swarm(&[&[false, false, true], &[false, false, false]], 1);
        let offers = offers_of(&pool, handles[0], 5);

        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].chunks, [2]);
        pool.clear();
    }

    #[test]
    fn offers_multiple_chunks_rarity_ordered() {
        let (mut pool, handles) = swarm(&[&[true, false, true], &[false, false, false]], 2);
        let offers = offers_of(&pool, handles[0], 5);

        assert_eq!(offers.len(), 1);
        // Both candidates have popularity 0; the tie goes to the lower
        // chunk index.
        assert_eq!(offers[0].chunks, [0, 2]);
        pool.clear();
    }

    #[test]
    fn offers_respect_upload_budget() {
        let (mut pool, handles) = swarm(&[&[true, false, true], &[false, false, false]], 1);
        let offers = offers_of(&pool, handles[0], 5);

        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].chunks, [0]);
        pool.clear();
    }

    #[test]
    fn offers_prefer_rare_over_common() {
        // Neighbour 2 owns chunk 0, neighbour 3 owns nothing: chunk 1 is
        // rarer from the sender's point of view and goes out first.
        let (mut pool, handles) = swarm(
            &[&[true, true], &[true, false], &[false, false]],
            1,
        );
        let offers = offers_of(&pool, handles[0], 5);

        assert_eq!(offers.len(), 2);
        assert_eq!(offers[0].to.id, 2);
        assert_eq!(offers[0].chunks, [1]);
        assert_eq!(offers[1].to.id, 3);
        assert_eq!(offers[1].chunks, [1]);
        pool.clear();
    }

    #[test]
    fn offers_go_only_to_the_reciprocation_set() {
        let chunkless = [[false]; 7];
        let mut maps: Vec<&[bool]> = vec![&[true]];
        maps.extend(chunkless.iter().map(|m| &m[..]));
        let (mut pool, handles) = swarm(&maps, 1);
        let offers = offers_of(&pool, handles[0], 5);

        // Seven interested neighbours, but only the top five slots see
        // offers, in list order.
        assert_eq!(offers.len(), 5);
        let ids: Vec<PeerId> = offers.iter().map(|o| o.to.id).collect();
        assert_eq!(ids, [2, 3, 4, 5, 6]);
        pool.clear();
    }

    #[test]
    fn stale_neighbours_are_skipped() {
        let (mut pool, handles) = swarm(&[&[true], &[false]], 1);
        // The neighbour leaves; the reference in the interested list
        // goes stale rather than dangling.
        pool.destroy(handles[1]).unwrap();

        let offers = offers_of(&pool, handles[0], 5);
        assert!(offers.is_empty());

        let view = SwarmView::new(&pool);
        let popularity = pool.get(handles[0]).unwrap().chunk_popularity(&view);
        assert_eq!(popularity, [0]);
        pool.clear();
    }

    #[test]
    fn has_everything_tracks_completion() {
        let mut peer = Peer::new(1, 2, 3, 3, false);
        peer.chunks = vec![true, false, true];
        assert!(!peer.has_everything());

        let seeder = Peer::new(2, 2, 3, 3, true);
        assert!(seeder.has_everything());
    }

    #[test]
    fn has_something_for_compares_bitmaps() {
        let mut a = Peer::new(1, 1, 1, 3, false);
        let mut b = Peer::new(2, 1, 1, 3, false);
        a.chunks = vec![true, false, false];
        b.chunks = vec![true, true, false];

        assert!(!a.has_something_for(&b));
        assert!(b.has_something_for(&a));
    }

    #[test]
    fn consider_ranks_by_local_rarity() {
        // Self's neighbourhood: one peer owning chunks 0 and 1, one
        // owning chunk 1 only. Local popularity: c0=1, c1=2, c2=0.
        let (mut pool, handles) = swarm(
            &[
                &[false, false, false],
                &[true, true, false],
                &[false, true, false],
            ],
            1,
        );
        let view = SwarmView::new(&pool);
        let me = pool.get(handles[0]).unwrap();
        let src = PeerRef {
            id: 2,
            handle: handles[1],
        };

        let considered = me.consider_offers(
            vec![SourcedOffer {
                from: src,
                chunks: vec![0, 1, 2],
            }],
            &view,
        );

        let ranked: Vec<usize> = considered.iter().map(|o| o.chunk).collect();
        assert_eq!(ranked, [2, 0, 1]);
        pool.clear();
    }

    #[test]
    fn accept_honours_budgets_and_credits_sources() {
        let (mut pool, handles) = swarm(&[&[false, false, false], &[true, true, true]], 1);
        let src = PeerRef {
            id: 2,
            handle: handles[1],
        };

        let budgets = UploadBudgets::new(4);
        budgets.arm(2, 1); // the source may upload once

        let sink = RecordingSink::new();
        let me = pool.get_mut(handles[0]).unwrap();
        me.download_rate = 2;
        me.considered_offers = (0..3)
            .map(|chunk| ConsideredOffer { from: src, chunk })
            .collect();
        me.accept_offers(&budgets, &sink);

        // One transfer landed; the other two died on the spent budget
        // but still credited the source for trying.
        assert_eq!(me.chunks, [true, false, false]);
        assert_eq!(me.interested_list[0].contributed, 3);
        assert!(me.considered_offers.is_empty());
        assert_eq!(sink.take(), vec![Event::Transmit(2, 0, 1)]);
        assert_eq!(budgets.remaining(2), 0);
        pool.clear();
    }

    #[test]
    fn accept_stops_at_download_capacity() {
        let (mut pool, handles) = swarm(&[&[false, false], &[true, true]], 1);
        let src = PeerRef {
            id: 2,
            handle: handles[1],
        };

        let budgets = UploadBudgets::new(4);
        budgets.arm(2, 10);

        let sink = RecordingSink::new();
        let me = pool.get_mut(handles[0]).unwrap();
        me.download_rate = 1;
        me.considered_offers = vec![
            ConsideredOffer { from: src, chunk: 0 },
            ConsideredOffer { from: src, chunk: 1 },
        ];
        me.accept_offers(&budgets, &sink);

        assert_eq!(me.chunks, [true, false]);
        // The second offer was never examined, so no credit for it.
        assert_eq!(me.interested_list[0].contributed, 1);
        pool.clear();
    }

    #[test]
    fn accept_skips_chunks_already_owned() {
        let (mut pool, handles) = swarm(&[&[true, false], &[true, true]], 1);
        let src = PeerRef {
            id: 2,
            handle: handles[1],
        };

        let budgets = UploadBudgets::new(4);
        budgets.arm(2, 10);

        let sink = RecordingSink::new();
        let me = pool.get_mut(handles[0]).unwrap();
        me.download_rate = 1;
        me.considered_offers = vec![
            ConsideredOffer { from: src, chunk: 0 },
            ConsideredOffer { from: src, chunk: 1 },
        ];
        me.accept_offers(&budgets, &sink);

        // The owned chunk consumed no download slot; the second offer
        // still fit under the capacity of one.
        assert_eq!(me.chunks, [true, true]);
        assert_eq!(sink.take(), vec![Event::Transmit(2, 1, 1), Event::Finished(1, 2)]);
        pool.clear();
    }

    #[test]
    fn finish_event_fires_exactly_once() {
        let (mut pool, handles) = swarm(&[&[false], &[true]], 1);
        let src = PeerRef {
            id: 2,
            handle: handles[1],
        };

        let budgets = UploadBudgets::new(4);
        budgets.arm(2, 10);
        let sink = RecordingSink::new();

        let me = pool.get_mut(handles[0]).unwrap();
        me.considered_offers = vec![ConsideredOffer { from: src, chunk: 0 }];
        me.accept_offers(&budgets, &sink);
        assert!(me.has_everything());
        assert_eq!(
            sink.take(),
            vec![Event::Transmit(2, 0, 1), Event::Finished(1, 1)]
        );

        // Another pass with nothing to do reports nothing.
        me.accept_offers(&budgets, &sink);
        assert!(sink.take().is_empty());
        pool.clear();
    }

    #[test]
    fn reorder_sinks_unhelpable_peers_and_resets_counts() {
        let mut peer = Peer::new(1, 1, 1, 1, false);
        let dummy = |id: PeerId, pool: &mut Pool<Peer>| {
            let handle = pool.construct(Peer::new(id, 1, 1, 1, false)).unwrap();
            PeerRef { id, handle }
        };
        let mut pool = Pool::new(3);
        let a = dummy(10, &mut pool);
        let b = dummy(11, &mut pool);
        let c = dummy(12, &mut pool);
        peer.interested_list = vec![
            Neighbor { peer: a, contributed: 3 },
            Neighbor { peer: b, contributed: 9 },
            Neighbor { peer: c, contributed: 5 },
        ];

        // b contributed the most but we have nothing left for it.
        peer.reorder_peers(&HashSet::from([11]));

        let order: Vec<PeerId> = peer.interested_list.iter().map(|n| n.peer.id).collect();
        assert_eq!(order, [12, 10, 11]);
        assert!(peer.interested_list.iter().all(|n| n.contributed == 0));
        pool.clear();
    }

    #[test]
    fn unchoke_rotates_within_bounds() {
        let mut pool = Pool::new(8);
        let refs: Vec<PeerRef> = (0..8)
            .map(|i| {
                let handle = pool.construct(Peer::new(i + 10, 1, 1, 1, false)).unwrap();
                PeerRef { id: i + 10, handle }
            })
            .collect();

        let mut peer = Peer::new(1, 1, 1, 1, false);
        peer.interested_list = refs.iter().copied().map(Neighbor::new).collect();
        let before: HashSet<PeerId> = peer.interested_list.iter().map(|n| n.peer.id).collect();

        let mut rng = SimRng::from_seed(99);
        for _ in 0..50 {
            peer.random_unchoke(&mut rng, 5);
            // Still a permutation of the same set, top four untouched.
            let now: HashSet<PeerId> = peer.interested_list.iter().map(|n| n.peer.id).collect();
            assert_eq!(now, before);
            let top: Vec<PeerId> = peer.interested_list[..4].iter().map(|n| n.peer.id).collect();
            assert_eq!(top, [10, 11, 12, 13]);
        }

        // A list no longer than the reciprocation set never rotates.
        peer.interested_list.truncate(5);
        let frozen: Vec<PeerId> = peer.interested_list.iter().map(|n| n.peer.id).collect();
        peer.random_unchoke(&mut rng, 5);
        let after: Vec<PeerId> = peer.interested_list.iter().map(|n| n.peer.id).collect();
        assert_eq!(frozen, after);
        pool.clear();
    }

    #[test]
    fn disconnect_clears_the_neighbourhood() {
        let mut pool = Pool::new(1);
        let handle = pool.construct(Peer::new(2, 1, 1, 1, false)).unwrap();
        let mut peer = Peer::new(1, 1, 1, 1, false);
        peer.interested_list = vec![Neighbor::new(PeerRef { id: 2, handle })];

        peer.on_disconnect();
        assert!(peer.interested_list.is_empty());
        pool.clear();
    }
}
