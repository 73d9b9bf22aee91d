//! Sync an empty chain from a set of simulated peers.
//!
//! Peers are served from memory by a deterministic runtime, so a run is fully reproducible from
//! its seed. Some peers can be made silent (never answer) or forked (serve a competing chain).
//!
//! # Usage
//!
//! ```sh
//! cargo run --release --features simulator --bin simulate -- --peers 8 --height 10000 --silent 2 --forked 1
//! ```

use clap::{value_parser, Arg, Command};
use commonware_runtime::{deterministic, Clock, Metrics, Runner};
use initial_sync::{
    engine::{Config, Engine},
    mocks::{Behavior, Chain, Coordinator, Network},
};
use std::time::Duration;
use tracing::{error, info};

fn main() {
    // Parse arguments
    let matches = Command::new("simulate")
        .about("sync a chain from simulated peers")
        .arg(
            Arg::new("peers")
                .long("peers")
                .required(false)
                .default_value("4")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .required(false)
                .default_value("1000")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("silent")
                .long("silent")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("forked")
                .long("forked")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("batch-size")
                .long("batch-size")
                .required(false)
                .default_value("64")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("lookahead")
                .long("lookahead")
                .required(false)
                .default_value("8")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("latency")
                .long("latency")
                .required(false)
                .default_value("100")
                .help("milliseconds before a peer answers")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .required(false)
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("verbose")
                .long("verbose")
                .required(false)
                .num_args(0),
        )
        .get_matches();
    let peers = *matches.get_one::<u64>("peers").unwrap();
    let height = *matches.get_one::<u64>("height").unwrap();
    let silent = *matches.get_one::<u64>("silent").unwrap();
    let forked = *matches.get_one::<u64>("forked").unwrap();
    let batch_size = *matches.get_one::<u64>("batch-size").unwrap();
    let lookahead = *matches.get_one::<usize>("lookahead").unwrap();
    let latency = Duration::from_millis(*matches.get_one::<u64>("latency").unwrap());
    let seed = *matches.get_one::<u64>("seed").unwrap();

    // Create logger
    let level = if matches.get_flag("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();
    if silent + forked >= peers {
        error!("at least one peer must be honest");
        std::process::exit(1);
    }

    // Run the simulation
    let cfg = deterministic::Config::new()
        .with_seed(seed)
        .with_timeout(Some(Duration::from_secs(24 * 60 * 60)));
    let executor = deterministic::Runner::new(cfg);
    executor.start(|context| async move {
        let chain = Chain::new(0);
        let coordinator = Coordinator::new((0..peers).map(|peer| (peer, height)).collect());
        let cfg = Config {
            batch_size,
            lookahead,
            ..Config::new(chain.clone(), coordinator)
        };
        let (engine, mailbox) = match Engine::new(context.with_label("engine"), cfg) {
            Ok(engine) => engine,
            Err(err) => {
                error!(?err, "invalid configuration");
                return;
            }
        };
        let network = Network::new(context.with_label("network"), mailbox, latency);
        for peer in 0..silent {
            network.set_behavior(peer, Behavior::Silent);
        }
        for peer in silent..silent + forked {
            network.set_behavior(peer, Behavior::Forked);
        }

        let started = context.current();
        info!(peers, height, silent, forked, seed, "starting sync");
        let handle = engine.start(network.clone());
        match handle.await {
            Ok(Ok(head)) => {
                let elapsed = context
                    .current()
                    .duration_since(started)
                    .unwrap_or_default();
                info!(
                    head,
                    requests = network.requests().len(),
                    bad = chain.bad().len(),
                    ?elapsed,
                    "synced"
                );
            }
            Ok(Err(err)) => error!(?err, "sync failed"),
            Err(err) => error!(?err, "engine aborted"),
        }
        println!("{}", context.encode());
    });
}
