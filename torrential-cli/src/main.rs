//! Torrential CLI - drives a swarm simulation from the command line.

use std::sync::Arc;

use clap::Parser;
use torrential_core::{
    EventSink, HumanSink, MachineSink, RateRange, Simulator, StatsSink, SwarmConfig,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "torrential")]
#[command(about = "Torrential - the BitTorrent swarm simulator")]
struct Cli {
    /// Peers in the simulation
    #[arg(short, long)]
    peers: usize,

    /// Chunks in the complete torrent
    #[arg(short, long)]
    chunks: usize,

    /// Per-tick probability that a disconnected peer joins
    #[arg(long, default_value_t = 0.2)]
    join_prob: f64,

    /// Per-tick probability that a connected peer leaves
    #[arg(long, default_value_t = 0.01)]
    leave_prob: f64,

    /// Upload capacity range in chunks per tick, as min,max
    #[arg(long, default_value = "10,10")]
    upload: RateRange,

    /// Download capacity range in chunks per tick, as min,max
    #[arg(long, default_value = "100,100")]
    download: RateRange,

    /// Peers that download but never upload
    #[arg(long, default_value_t = 0)]
    freeriders: usize,

    /// Emit machine-readable records instead of prose
    #[arg(long)]
    machine: bool,

    /// Print run totals to stderr when the swarm completes
    #[arg(long)]
    stats: bool,

    /// Seed for a reproducible run (defaults to system entropy)
    #[arg(long)]
    seed: Option<u64>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = SwarmConfig {
        peers: cli.peers,
        chunks: cli.chunks,
        join_prob: cli.join_prob,
        leave_prob: cli.leave_prob,
        upload: cli.upload,
        download: cli.download,
        freeriders: cli.freeriders,
        seed: cli.seed,
        ..SwarmConfig::default()
    };

    let output: Arc<dyn EventSink> = if cli.machine {
        Arc::new(MachineSink)
    } else {
        Arc::new(HumanSink)
    };
    let stats = cli.stats.then(|| Arc::new(StatsSink::new(output.clone())));
    let sink: Arc<dyn EventSink> = match &stats {
        Some(stats) => stats.clone(),
        None => output,
    };

    let mut sim = match Simulator::new(config, sink) {
        Ok(sim) => sim,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };

    while !sim.all_done() {
        sim.tick();
    }

    println!("Finished in {} ticks (seconds)", sim.tick_count());
    if let Some(stats) = stats {
        eprint!("{}", stats.report().summary());
    }
}
