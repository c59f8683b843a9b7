use tokio::signal::unix::{signal, SignalKind};

use crate::election::LeaderElection;

/// Runs a group of election drivers until SIGTERM or SIGINT arrives, then
/// walks each one through its shutdown: timers stop, the in-flight vote
/// round is cancelled, and the member silently drops out of its topics.
///
/// Returns once every driver has stopped. Failing to install the signal
/// handlers is the only error.
pub async fn run_until_signal(elections: &[LeaderElection]) -> std::io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, stopping election drivers");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, stopping election drivers");
        }
    }

    for election in elections {
        tracing::debug!(
            member_id = %election.member_id(),
            topic = %election.topic(),
            "stopping election driver"
        );
        election.shutdown().await;
    }

    Ok(())
}
