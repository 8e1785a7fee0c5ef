//! Concord Deterministic Simulator CLI
//!
//! Drive a cluster of consensus managers over a simulated network and report
//! how many proposals committed.
//!
//! # Example
//!
//! ```bash
//! # Ten majority-vote proposals across five members
//! concord-sim --nodes 5 --proposals 10
//!
//! # BFT with one silent member and 5% packet loss
//! concord-sim -m bft -n 4 --silent 1 --loss 0.05
//! ```

use clap::{Parser, ValueEnum};
use concord_node::{Mechanism, ProposalHandle, ProtocolConfig};
use concord_simulation::{NetworkConfig, SimulatedCluster, SimulationError};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MechanismArg {
    Majority,
    Bft,
}

impl From<MechanismArg> for Mechanism {
    fn from(arg: MechanismArg) -> Self {
        match arg {
            MechanismArg::Majority => Mechanism::MajorityVote,
            MechanismArg::Bft => Mechanism::Bft,
        }
    }
}

/// Concord Deterministic Simulator
///
/// Given the same seed, produces identical results every run.
#[derive(Parser, Debug)]
#[command(name = "concord-sim")]
#[command(version, about, long_about = None)]
struct Args {
    /// Number of cluster members
    #[arg(short = 'n', long, default_value = "4")]
    nodes: usize,

    /// Agreement mechanism
    #[arg(short = 'm', long, value_enum, default_value = "majority")]
    mechanism: MechanismArg,

    /// Random seed for deterministic simulation
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Number of proposals to submit
    #[arg(short = 'p', long, default_value = "10")]
    proposals: usize,

    /// Interval between proposals in milliseconds
    #[arg(long, default_value = "100")]
    interval_ms: u64,

    /// Packet loss rate (0.0-1.0)
    #[arg(long, default_value = "0.0")]
    loss: f64,

    /// One-way network latency in milliseconds
    #[arg(long, default_value = "20")]
    latency_ms: u64,

    /// Proposal timeout in milliseconds
    #[arg(long, default_value = "2000")]
    timeout_ms: u64,

    /// Number of members cut off from the network for the whole run
    #[arg(long, default_value = "0")]
    silent: usize,

    /// Extra time after the last proposal for outcomes to settle, in seconds
    #[arg(short = 'd', long, default_value = "10")]
    drain: u64,
}

fn main() -> Result<(), SimulationError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,concord_simulation=info")),
        )
        .init();

    let args = Args::parse();

    info!(
        nodes = args.nodes,
        mechanism = ?args.mechanism,
        seed = args.seed,
        proposals = args.proposals,
        loss = args.loss,
        silent = args.silent,
        "Starting simulation"
    );

    let config = ProtocolConfig::new(args.mechanism.into())
        .with_timeout(Duration::from_millis(args.timeout_ms));
    let network = NetworkConfig::default()
        .with_latency(Duration::from_millis(args.latency_ms))
        .with_packet_loss(args.loss);

    let mut cluster = SimulatedCluster::new(args.nodes, config, network, args.seed)?;

    let members = cluster.members();
    for member in members.iter().rev().take(args.silent) {
        cluster.isolate(member);
    }

    let interval = Duration::from_millis(args.interval_ms);
    let mut handles: Vec<ProposalHandle> = Vec::with_capacity(args.proposals);
    for i in 0..args.proposals {
        // BFT proposals go to whoever the first member believes leads.
        let proposer = match args.mechanism {
            MechanismArg::Majority => members[i % members.len()].clone(),
            MechanismArg::Bft => cluster
                .manager(&members[0])
                .and_then(|m| m.leader().cloned())
                .unwrap_or_else(|| members[0].clone()),
        };
        handles.push(cluster.propose(&proposer, format!("key-{}", i % 4), json!(i))?);
        cluster.run_for(interval);
    }
    cluster.run_for(Duration::from_secs(args.drain));

    let mut accepted = 0usize;
    let mut failed = 0usize;
    let mut pending = 0usize;
    for handle in &mut handles {
        match handle.try_result() {
            Some(result) if result.accepted => accepted += 1,
            Some(result) => {
                failed += 1;
                if let Some(error) = result.error {
                    warn!(key = %result.key, error = %error, "Proposal failed");
                }
            }
            None => pending += 1,
        }
    }

    let stats = cluster.stats();
    println!("\n=== Simulation Complete ===");
    println!("Submitted:  {}", handles.len());
    println!("Accepted:   {accepted}");
    println!("Failed:     {failed}");
    println!("Pending:    {pending}");
    println!(
        "Completion: {:.2}%",
        accepted as f64 / handles.len().max(1) as f64 * 100.0
    );
    println!("\n=== Network ===");
    println!("Sent:       {}", stats.messages_sent);
    println!("Delivered:  {}", stats.messages_delivered);
    println!("Dropped:    {}", stats.messages_dropped());

    println!("\n=== Committed State ===");
    if let Some(observer) = members.first().and_then(|m| cluster.manager(m)) {
        for (key, value) in observer.state() {
            println!("{key} = {value}");
        }
    }

    Ok(())
}
