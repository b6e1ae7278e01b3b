//! Entry point for `ping-pong-ring`.
//!
//! `node` joins a real ring over TCP; `simulate` runs an in-memory ring and
//! reports what every node did.

use clap::{Args, Parser, Subcommand, ValueEnum};
use color_print::cformat;
use ping_pong_ring::{
    config::{ConnectPolicy, DemandSchedule, FaultPlan, NodeConfig, RegenerationPolicy, Timing},
    log,
    peer::Peer,
    ring::{LocalRing, SimulationSettings},
};
use std::{error::Error, time::Duration};

/// Ring mutual exclusion with circulating Ping/Pong tokens.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Run one node of a TCP ring.
    Node(NodeArgs),
    /// Run a ring of in-memory nodes and print per-node statistics.
    Simulate(SimulateArgs),
}

#[derive(Args)]
struct NodeArgs {
    /// This node's address (host:port).
    address: String,

    /// The successor's address (host:port).
    successor: String,

    /// Originate the first Ping/Pong pair. Exactly one node of the ring sets this.
    #[arg(short, long)]
    initiate: bool,

    /// Lose the Ping forwarded in this round. Round 1 is the first Ping this node forwards.
    #[arg(long)]
    lose_ping_round: Option<u64>,

    /// Lose the Pong forwarded in this round, counted like --lose-ping-round.
    #[arg(long)]
    lose_pong_round: Option<u64>,

    /// Time spent in the critical section.
    #[arg(long, default_value_t = 5_000)]
    cs_duration_ms: u64,

    /// Delay before asking for the critical section, after startup and after each exit.
    #[arg(long, default_value_t = 30_000)]
    wants_cs_after_ms: u64,

    /// Ask for the critical section at random with this many requests per second instead.
    #[arg(long)]
    poisson_rate: Option<f64>,

    /// Seed for --poisson-rate.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Pause before each token is sent.
    #[arg(long, default_value_t = 1_000)]
    forward_delay_ms: u64,

    /// Attempts to reach the successor at startup.
    #[arg(long, default_value_t = 10)]
    connect_attempts: u32,

    /// Pause between attempts to reach the successor.
    #[arg(long, default_value_t = 500)]
    connect_backoff_ms: u64,

    /// Generation of tokens rebuilt after a loss: `advance` (|value| + 1) or
    /// `same-generation` (|value|, lets downstream nodes rebuild again).
    #[arg(long, value_enum, default_value_t = Regeneration::Advance)]
    regeneration: Regeneration,
}

#[derive(Args)]
struct SimulateArgs {
    /// Ring size.
    #[arg(short, long, default_value_t = 5)]
    nodes: usize,

    /// Ticks to run.
    #[arg(short, long, default_value_t = 1_000)]
    ticks: u64,

    #[arg(long, default_value_t = 5)]
    cs_ticks: u64,

    #[arg(long, default_value_t = 30)]
    wants_cs_ticks: u64,

    /// Make node 0 lose the Ping forwarded in this round. Rounds start at 1.
    #[arg(long)]
    lose_ping_round: Option<u64>,

    /// Make node 0 lose the Pong forwarded in this round.
    #[arg(long)]
    lose_pong_round: Option<u64>,

    /// Generation of tokens rebuilt after a loss: `advance` (|value| + 1) or
    /// `same-generation` (|value|, lets downstream nodes rebuild again).
    #[arg(long, value_enum, default_value_t = Regeneration::Advance)]
    regeneration: Regeneration,
}

/// Magnitude of tokens rebuilt after a loss.
#[derive(Clone, Copy, ValueEnum)]
enum Regeneration {
    /// One generation above the surviving token.
    Advance,
    /// Same generation as the surviving token.
    SameGeneration,
}

impl From<Regeneration> for RegenerationPolicy {
    fn from(regeneration: Regeneration) -> Self {
        match regeneration {
            Regeneration::Advance => Self::Advance,
            Regeneration::SameGeneration => Self::SameGeneration,
        }
    }
}

impl NodeArgs {
    fn into_config(self) -> Result<NodeConfig, Box<dyn Error + Send + Sync>> {
        let demand = match self.poisson_rate {
            Some(rate) => DemandSchedule::Poisson { rate, seed: self.seed },
            None => DemandSchedule::Fixed(Duration::from_millis(self.wants_cs_after_ms)),
        };

        let config = NodeConfig {
            address: self.address,
            successor: self.successor,
            originate: self.initiate,
            faults: FaultPlan::new(self.lose_ping_round, self.lose_pong_round)?,
            timing: Timing {
                cs_duration: Duration::from_millis(self.cs_duration_ms),
                demand,
                forward_delay: Duration::from_millis(self.forward_delay_ms),
            },
            connect: ConnectPolicy {
                attempts: self.connect_attempts,
                backoff: Duration::from_millis(self.connect_backoff_ms),
            },
            regeneration: self.regeneration.into(),
        };
        config.validate()?;

        Ok(config)
    }
}

fn simulate(args: SimulateArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let faults = FaultPlan::new(args.lose_ping_round, args.lose_pong_round)?;
    let regeneration = RegenerationPolicy::from(args.regeneration);
    let settings = SimulationSettings {
        cs_ticks: args.cs_ticks,
        wants_cs_ticks: Some(args.wants_cs_ticks),
    };

    let mut ring = LocalRing::new_with(args.nodes, settings, |index, node| {
        let node = node.with_regeneration(regeneration);
        if index == 0 {
            node.with_faults(faults)
        } else {
            node
        }
    })?;
    ring.start(0);
    ring.run(args.ticks);

    for node in ring.nodes() {
        let stats = node.stats();
        log::info(&cformat!(
            "<bold>{}</bold>: cs entries <bold>{}</bold>, regenerations <bold>{}</bold>, incarnations <bold>{}</bold>, forwarded <bold>{}</bold>, suppressed <bold>{}</bold>",
            node.address(),
            stats.cs_entries,
            stats.regenerations,
            stats.incarnations,
            stats.forwarded,
            stats.suppressed
        ));
    }

    let (pings, pongs) = ring.live_tokens();
    log::info(&cformat!(
        "After <bold>{}</bold> ticks: at most <bold>{}</bold> node(s) in the critical section at once, <bold>{}</bold> Ping(s) and <bold>{}</bold> Pong(s) alive",
        ring.ticks(),
        ring.max_concurrent_cs(),
        pings,
        pongs
    ));

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    log::init(cli.verbose);

    match cli.mode {
        Mode::Node(args) => {
            let config = args.into_config()?;
            log::info(&cformat!(
                "Starting node <bold>{}</bold> with successor <bold>{}</bold>",
                config.address,
                config.successor
            ));
            Peer::new(config).run().await?;
        }
        Mode::Simulate(args) => simulate(args)?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn node_args(extra: &[&str]) -> NodeArgs {
        let args = ["ping-pong-ring", "node", "127.0.0.1:5000", "127.0.0.1:5001"];
        let cli = Cli::try_parse_from(args.iter().chain(extra)).unwrap();
        match cli.mode {
            Mode::Node(args) => args,
            Mode::Simulate(_) => panic!("parsed the wrong subcommand"),
        }
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fault_rounds_are_passed_through_unchanged() {
        let config = node_args(&["--lose-ping-round", "1", "--lose-pong-round", "3"])
            .into_config()
            .unwrap();
        assert_eq!(config.faults, FaultPlan::new(Some(1), Some(3)).unwrap());

        assert!(node_args(&["--lose-ping-round", "0"]).into_config().is_err());
    }

    #[test]
    fn regeneration_defaults_to_advance() {
        let config = node_args(&[]).into_config().unwrap();
        assert_eq!(config.regeneration, RegenerationPolicy::Advance);

        let config = node_args(&["--regeneration", "same-generation"]).into_config().unwrap();
        assert_eq!(config.regeneration, RegenerationPolicy::SameGeneration);
    }

    fn node_help(argument: &str) -> String {
        let command = Cli::command();
        let node = command.find_subcommand("node").unwrap();
        let argument = node.get_arguments().find(|a| a.get_id() == argument).unwrap();
        argument.get_help().unwrap().to_string()
    }

    #[test]
    fn help_explains_rounds_and_regeneration() {
        assert!(node_help("lose_ping_round").contains("Round 1 is the first Ping"));

        let help = node_help("regeneration");
        assert!(help.contains("same-generation"));
        assert!(help.contains("|value| + 1"));
    }
}
