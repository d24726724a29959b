//! Simulation output.
//!
//! The engine reports what happens through an [`EventSink`] handed to
//! the simulator at construction. Two stdout sinks mirror the classic
//! output modes: prose for humans, a one-record-per-line grammar for
//! machines. The transfer and finish callbacks fire from parallel
//! stages, so sinks take `&self` and must be `Send + Sync`.

use std::sync::Mutex;

use crate::peer::PeerId;

/// Receiver for everything observable about a run.
pub trait EventSink: Send + Sync {
    /// A new tick began.
    fn tick(&self, n: u64);

    /// A peer was admitted into the connected set.
    fn connect(&self, id: PeerId, up: u32, down: u32);

    /// A peer was evicted from the connected set.
    fn disconnect(&self, id: PeerId);

    /// A chunk transfer was accepted.
    fn transmit(&self, src: PeerId, chunk: usize, dst: PeerId);

    /// A peer acquired its last missing chunk.
    fn finished(&self, id: PeerId, total_chunks: usize);
}

/// Prose output for watching a run by eye. Tick records are omitted.
#[derive(Debug, Default)]
pub struct HumanSink;

impl EventSink for HumanSink {
    fn tick(&self, _n: u64) {}

    fn connect(&self, id: PeerId, up: u32, down: u32) {
        println!("Peer {id} connecting (up: {up}, down: {down})");
    }

    fn disconnect(&self, id: PeerId) {
        println!("Peer {id} disconnecting");
    }

    fn transmit(&self, src: PeerId, chunk: usize, dst: PeerId) {
        println!("Peer {src} sending chunk {chunk} to {dst}");
    }

    fn finished(&self, id: PeerId, total_chunks: usize) {
        println!("Peer {id} finished ({total_chunks} total chunks)");
    }
}

/// One-record-per-line output for downstream tooling.
///
/// ```text
/// t <tick>
/// c <id> <up> <down>
/// d <id>
/// x <src> <chunk> <dst>
/// f <id> <total_chunks>
/// ```
#[derive(Debug, Default)]
pub struct MachineSink;

impl EventSink for MachineSink {
    fn tick(&self, n: u64) {
        println!("t {n}");
    }

    fn connect(&self, id: PeerId, up: u32, down: u32) {
        println!("c {id} {up} {down}");
    }

    fn disconnect(&self, id: PeerId) {
        println!("d {id}");
    }

    fn transmit(&self, src: PeerId, chunk: usize, dst: PeerId) {
        println!("x {src} {chunk} {dst}");
    }

    fn finished(&self, id: PeerId, total_chunks: usize) {
        println!("f {id} {total_chunks}");
    }
}

/// Sink that discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn tick(&self, _n: u64) {}
    fn connect(&self, _id: PeerId, _up: u32, _down: u32) {}
    fn disconnect(&self, _id: PeerId) {}
    fn transmit(&self, _src: PeerId, _chunk: usize, _dst: PeerId) {}
    fn finished(&self, _id: PeerId, _total_chunks: usize) {}
}

/// A recorded event, for assertions and embedding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// `tick(n)`
    Tick(u64),
    /// `connect(id, up, down)`
    Connect(PeerId, u32, u32),
    /// `disconnect(id)`
    Disconnect(PeerId),
    /// `transmit(src, chunk, dst)`
    Transmit(PeerId, usize, PeerId),
    /// `finished(id, total_chunks)`
    Finished(PeerId, usize),
}

/// Sink that appends every event to an in-memory log.
#[derive(Debug, Default)]
pub struct RecordingSink {
    log: Mutex<Vec<Event>>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drains and returns everything recorded so far.
    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut self.log.lock().unwrap())
    }

    /// Copies out everything recorded so far.
    pub fn snapshot(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl EventSink for RecordingSink {
    fn tick(&self, n: u64) {
        self.push(Event::Tick(n));
    }

    fn connect(&self, id: PeerId, up: u32, down: u32) {
        self.push(Event::Connect(id, up, down));
    }

    fn disconnect(&self, id: PeerId) {
        self.push(Event::Disconnect(id));
    }

    fn transmit(&self, src: PeerId, chunk: usize, dst: PeerId) {
        self.push(Event::Transmit(src, chunk, dst));
    }

    fn finished(&self, id: PeerId, total_chunks: usize) {
        self.push(Event::Finished(id, total_chunks));
    }
}
