//! Run statistics.
//!
//! [`StatsSink`] wraps any [`EventSink`] and counts what flows through
//! it, so a driver can report on a run without the engine knowing
//! anything about metrics. Counters are atomic because transfer and
//! finish events arrive from parallel stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::events::EventSink;
use crate::peer::PeerId;

/// Totals observed over a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwarmReport {
    /// Ticks simulated
    pub ticks: u64,
    /// Admissions into the swarm
    pub connects: u64,
    /// Evictions out of the swarm
    pub disconnects: u64,
    /// Accepted chunk transfers
    pub transfers: u64,
    /// Peers that completed the file
    pub finishes: u64,
}

impl SwarmReport {
    /// Generates a human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!("Swarm report ({} ticks)\n", self.ticks));
        summary.push_str(&format!("  connects:    {}\n", self.connects));
        summary.push_str(&format!("  disconnects: {}\n", self.disconnects));
        summary.push_str(&format!("  transfers:   {}\n", self.transfers));
        summary.push_str(&format!("  finishes:    {}\n", self.finishes));
        if self.ticks > 0 {
            summary.push_str(&format!(
                "  throughput:  {:.2} chunks/tick\n",
                self.transfers as f64 / self.ticks as f64
            ));
        }
        summary
    }
}

/// Sink decorator that counts events before forwarding them.
pub struct StatsSink {
    inner: Arc<dyn EventSink>,
    ticks: AtomicU64,
    connects: AtomicU64,
    disconnects: AtomicU64,
    transfers: AtomicU64,
    finishes: AtomicU64,
}

impl StatsSink {
    /// Wraps `inner`, counting everything that passes through.
    pub fn new(inner: Arc<dyn EventSink>) -> Self {
        Self {
            inner,
            ticks: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            transfers: AtomicU64::new(0),
            finishes: AtomicU64::new(0),
        }
    }

    /// Snapshot of the totals so far.
    pub fn report(&self) -> SwarmReport {
        SwarmReport {
            ticks: self.ticks.load(Ordering::Acquire),
            connects: self.connects.load(Ordering::Acquire),
            disconnects: self.disconnects.load(Ordering::Acquire),
            transfers: self.transfers.load(Ordering::Acquire),
            finishes: self.finishes.load(Ordering::Acquire),
        }
    }
}

impl EventSink for StatsSink {
    fn tick(&self, n: u64) {
        self.ticks.fetch_add(1, Ordering::AcqRel);
        self.inner.tick(n);
    }

    fn connect(&self, id: PeerId, up: u32, down: u32) {
        self.connects.fetch_add(1, Ordering::AcqRel);
        self.inner.connect(id, up, down);
    }

    fn disconnect(&self, id: PeerId) {
        self.disconnects.fetch_add(1, Ordering::AcqRel);
        self.inner.disconnect(id);
    }

    fn transmit(&self, src: PeerId, chunk: usize, dst: PeerId) {
        self.transfers.fetch_add(1, Ordering::AcqRel);
        self.inner.transmit(src, chunk, dst);
    }

    fn finished(&self, id: PeerId, total_chunks: usize) {
        self.finishes.fetch_add(1, Ordering::AcqRel);
        self.inner.finished(id, total_chunks);
    }
}
