//! Per-topic Raft-style leader election on top of a gossip cluster
//! membership layer (election only, no log replication).

pub mod cluster;
pub mod config;
pub mod election;
pub mod error;
pub mod shutdown;

pub use cluster::{Cluster, Member, Message};
pub use config::ElectionConfig;
pub use election::{ElectionEvent, LeaderElection, LeaderView, Role};
pub use error::{ElectionError, Result};
