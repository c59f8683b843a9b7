use std::sync::Arc;

use crate::cluster::{Cluster, Member};

/// Metadata value a member gossips under its topic key to register as an
/// election participant.
pub const LEADER_ELECTION: &str = "leader-election";

/// Looks up the remote members participating in one election topic.
pub struct PeerDiscovery {
    cluster: Arc<dyn Cluster>,
    topic: String,
}

impl PeerDiscovery {
    pub fn new(cluster: Arc<dyn Cluster>, topic: impl Into<String>) -> Self {
        Self {
            cluster,
            topic: topic.into(),
        }
    }

    /// Snapshot of all remote members whose gossiped metadata registers them
    /// in this topic. Recomputed on every call; the set may churn between
    /// calls within a single election round.
    pub async fn find_peers(&self) -> Vec<Member> {
        let mut peers = Vec::new();
        for member in self.cluster.other_members().await {
            let metadata = self.cluster.metadata(&member).await;
            if metadata.get(&self.topic).map(String::as_str) == Some(LEADER_ELECTION) {
                peers.push(member);
            }
        }
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::local::LocalFabric;

    #[tokio::test]
    async fn test_find_peers_filters_on_topic_metadata() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;
        let b = fabric.join("b").await;
        let c = fabric.join("c").await;

        b.update_metadata_property("orders", LEADER_ELECTION)
            .await
            .unwrap();
        // Same topic key, wrong value: not a participant
        c.update_metadata_property("orders", "observer")
            .await
            .unwrap();

        let discovery = PeerDiscovery::new(Arc::new(a), "orders");
        let peers = discovery.find_peers().await;

        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "b");
    }

    #[tokio::test]
    async fn test_find_peers_excludes_self_and_other_topics() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;
        let b = fabric.join("b").await;

        a.update_metadata_property("orders", LEADER_ELECTION)
            .await
            .unwrap();
        b.update_metadata_property("billing", LEADER_ELECTION)
            .await
            .unwrap();

        let discovery = PeerDiscovery::new(Arc::new(a), "orders");
        assert!(discovery.find_peers().await.is_empty());
    }
}
