use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use gossip_election::cluster::local::LocalFabric;
use gossip_election::shutdown::run_until_signal;
use gossip_election::{ElectionConfig, LeaderElection};

#[derive(Parser, Debug)]
#[command(name = "gossip-election")]
#[command(about = "In-process demo of per-topic Raft-style leader election")]
struct Args {
    /// Number of members to run in this process
    #[arg(long, default_value = "3")]
    nodes: usize,

    /// Election topic (group name)
    #[arg(long, default_value = "demo")]
    topic: String,

    /// Base election timeout in milliseconds
    #[arg(long, default_value = "300")]
    election_timeout_ms: u64,

    /// Leader heartbeat interval in milliseconds
    #[arg(long, default_value = "30")]
    heartbeat_interval_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = ElectionConfig::new()
        .with_election_timeout_ms(args.election_timeout_ms)
        .with_heartbeat_interval_ms(args.heartbeat_interval_ms)
        .with_vote_timeout_ms(args.election_timeout_ms);

    tracing::info!(
        nodes = args.nodes,
        topic = %args.topic,
        election_timeout_ms = config.election_timeout_ms,
        heartbeat_interval_ms = config.heartbeat_interval_ms,
        "Starting in-process election group"
    );

    let fabric = LocalFabric::new();
    let mut drivers = Vec::new();
    for i in 0..args.nodes {
        let handle = fabric.join(&format!("node-{}", i)).await;
        let election = LeaderElection::new(Arc::new(handle), args.topic.clone(), config.clone());

        let mut events = election.listen();
        let member_id = election.member_id().to_string();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                tracing::info!(
                    member_id = %member_id,
                    role = %event.role(),
                    term = event.term(),
                    at = %event.at(),
                    "election event"
                );
            }
        });

        election.start().await?;
        drivers.push(election);
    }

    run_until_signal(&drivers).await?;

    Ok(())
}
