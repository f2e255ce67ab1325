use std::fs::File;
use std::io::BufWriter;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quorum::{ChaosScenario, FaultKind, SimConfig, Simulator};

/// Deterministic event-driven simulator of the Raft consensus protocol.
#[derive(Debug, Parser)]
#[command(name = "quorum", version, about)]
struct Args {
    /// Cluster size.
    #[arg(long, default_value_t = 5)]
    nodes: usize,

    /// Virtual time budget in seconds.
    #[arg(long, default_value_t = 60.0)]
    max_time: f64,

    /// PRNG seed; identical seeds reproduce identical runs.
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Per-message drop probability [0, 1].
    #[arg(long, default_value_t = 0.05)]
    message_drop_rate: f64,

    /// Minimum message delay in seconds.
    #[arg(long, default_value_t = 0.01)]
    message_delay_min: f64,

    /// Maximum message delay in seconds.
    #[arg(long, default_value_t = 0.1)]
    message_delay_max: f64,

    /// Probability of duplicating a delivery [0, 1].
    #[arg(long, default_value_t = 0.0)]
    duplicate_rate: f64,

    /// Extra delay jitter in seconds.
    #[arg(long, default_value_t = 0.0)]
    jitter: f64,

    /// Minimum election timeout in seconds.
    #[arg(long, default_value_t = 0.15)]
    election_timeout_min: f64,

    /// Maximum election timeout in seconds.
    #[arg(long, default_value_t = 0.3)]
    election_timeout_max: f64,

    /// Leader heartbeat interval in seconds.
    #[arg(long, default_value_t = 0.05)]
    heartbeat_interval: f64,

    /// Run a chaos scenario during the simulation.
    #[arg(long, default_value_t = false)]
    chaos: bool,

    /// Which chaos scenario to run.
    #[arg(long, value_enum, default_value = "network-partition")]
    chaos_scenario: ChaosScenario,

    /// Crash this node at one third of the run (repeatable).
    #[arg(long)]
    crash: Vec<u64>,

    /// Submit this many client commands, spread over the middle of the
    /// run.
    #[arg(long, default_value_t = 0)]
    submit: usize,

    /// Write the event trace as JSON lines to this path.
    #[arg(long)]
    trace_out: Option<String>,
}

impl Args {
    fn to_config(&self) -> SimConfig {
        SimConfig {
            nodes: self.nodes,
            max_time: self.max_time,
            seed: self.seed,
            message_drop_rate: self.message_drop_rate,
            message_delay_min: self.message_delay_min,
            message_delay_max: self.message_delay_max,
            duplicate_rate: self.duplicate_rate,
            jitter: self.jitter,
            election_timeout_min: self.election_timeout_min,
            election_timeout_max: self.election_timeout_max,
            heartbeat_interval: self.heartbeat_interval,
            chaos: self.chaos,
            chaos_scenario: self.chaos_scenario,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.to_config();
    let mut simulator = Simulator::start(config)?;
    if args.trace_out.is_some() {
        simulator.enable_tracing();
    }

    for &node in &args.crash {
        simulator.inject_fault(
            FaultKind::Crash(quorum::NodeId::new(node)),
            args.max_time / 3.0,
        )?;
    }
    for i in 0..args.submit {
        let at = args.max_time * (0.25 + 0.5 * i as f64 / args.submit.max(1) as f64);
        simulator.submit_at(at, format!("cmd-{i}").into_bytes());
    }

    let processed = simulator.run();

    let status = simulator.status();
    println!("{}", simulator.status_json()?);
    eprintln!(
        "processed {processed} events over {:.2}s of virtual time; leader: {}, term {}",
        status.now,
        status
            .leader_id
            .map_or("none".to_string(), |id| format!("N{id}")),
        status.term,
    );

    if let (Some(path), Some(trace)) = (&args.trace_out, simulator.trace()) {
        let mut w = BufWriter::new(File::create(path)?);
        trace.export(&mut w)?;
        eprintln!(
            "trace: {} events, hash {:016x} -> {path}",
            trace.len(),
            trace.hash()
        );
    }

    Ok(())
}
