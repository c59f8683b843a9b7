//! In-process cluster fabric.
//!
//! Backs the integration tests and the demo binary with a deterministic
//! stand-in for the gossip layer: a registry of member handles wired
//! together through channels, with directed link blocking to simulate
//! partitions and member removal to simulate crashes. Metadata updates are
//! visible to every member immediately (gossip convergence is modeled as
//! instantaneous).

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{broadcast, oneshot, RwLock};

use super::{Cluster, Member, Message};
use crate::error::{ElectionError, Result};

const INBOUND_BUFFER: usize = 128;

// std Mutex: held for O(1) map operations only, and the cleanup guard must
// lock from a non-async Drop.
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Message>>>>;

struct MemberSlot {
    member: Member,
    metadata: HashMap<String, String>,
    inbound: broadcast::Sender<Message>,
    pending: PendingMap,
}

#[derive(Default)]
struct FabricInner {
    slots: RwLock<HashMap<String, MemberSlot>>,
    blocked: RwLock<HashSet<(String, String)>>,
}

impl FabricInner {
    /// Routes a message to `address`: replies matching a pending request are
    /// resolved directly, everything else lands on the member's inbound
    /// stream. Blocked links and unknown addresses drop the message, the
    /// same way a lossy network or a dead host would.
    async fn deliver(&self, from: &str, address: &str, message: Message) {
        if self
            .blocked
            .read()
            .await
            .contains(&(from.to_string(), address.to_string()))
        {
            return;
        }

        let slots = self.slots.read().await;
        let Some(slot) = slots.get(address) else {
            return;
        };

        let waiter = slot
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&message.correlation_id);
        if let Some(waiter) = waiter {
            let _ = waiter.send(message);
            return;
        }

        let _ = slot.inbound.send(message);
    }
}

/// An in-process cluster of members joined through [`LocalFabric::join`].
#[derive(Clone, Default)]
pub struct LocalFabric {
    inner: Arc<FabricInner>,
}

impl LocalFabric {
    pub fn new() -> Self {
        Self::default()
    }

    fn address_of(id: &str) -> String {
        format!("local:{}", id)
    }

    /// Registers a member and returns its cluster handle.
    pub async fn join(&self, id: &str) -> LocalMember {
        let member = Member::new(id, Self::address_of(id));
        let (inbound, _) = broadcast::channel(INBOUND_BUFFER);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let slot = MemberSlot {
            member: member.clone(),
            metadata: HashMap::new(),
            inbound: inbound.clone(),
            pending: pending.clone(),
        };
        self.inner
            .slots
            .write()
            .await
            .insert(member.address.clone(), slot);

        LocalMember {
            inner: self.inner.clone(),
            member,
            inbound,
            pending,
        }
    }

    /// Removes a member, simulating a crash: in-flight requests to it time
    /// out and later sends are dropped.
    pub async fn remove(&self, id: &str) -> bool {
        self.inner
            .slots
            .write()
            .await
            .remove(&Self::address_of(id))
            .is_some()
    }

    /// Blocks the link between two members in both directions.
    pub async fn block(&self, a: &str, b: &str) {
        let a = Self::address_of(a);
        let b = Self::address_of(b);
        let mut blocked = self.inner.blocked.write().await;
        blocked.insert((a.clone(), b.clone()));
        blocked.insert((b, a));
    }

    /// Restores the link between two members.
    pub async fn heal(&self, a: &str, b: &str) {
        let a = Self::address_of(a);
        let b = Self::address_of(b);
        let mut blocked = self.inner.blocked.write().await;
        blocked.remove(&(a.clone(), b.clone()));
        blocked.remove(&(b, a));
    }

    /// Removes every link block.
    pub async fn heal_all(&self) {
        self.inner.blocked.write().await.clear();
    }

    pub async fn members(&self) -> Vec<Member> {
        self.inner
            .slots
            .read()
            .await
            .values()
            .map(|slot| slot.member.clone())
            .collect()
    }
}

/// One member's handle onto the fabric; implements [`Cluster`].
pub struct LocalMember {
    inner: Arc<FabricInner>,
    member: Member,
    inbound: broadcast::Sender<Message>,
    pending: PendingMap,
}

#[async_trait]
impl Cluster for LocalMember {
    fn member(&self) -> Member {
        self.member.clone()
    }

    async fn other_members(&self) -> Vec<Member> {
        self.inner
            .slots
            .read()
            .await
            .values()
            .filter(|slot| slot.member.id != self.member.id)
            .map(|slot| slot.member.clone())
            .collect()
    }

    async fn metadata(&self, member: &Member) -> HashMap<String, String> {
        self.inner
            .slots
            .read()
            .await
            .get(&member.address)
            .map(|slot| slot.metadata.clone())
            .unwrap_or_default()
    }

    async fn update_metadata_property(&self, key: &str, value: &str) -> Result<()> {
        let mut slots = self.inner.slots.write().await;
        let slot = slots.get_mut(&self.member.address).ok_or_else(|| {
            ElectionError::ClusterUnavailable(format!("member {} has left", self.member.id))
        })?;
        slot.metadata.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn listen(&self) -> broadcast::Receiver<Message> {
        self.inbound.subscribe()
    }

    async fn send(&self, address: &str, message: Message) -> Result<()> {
        self.inner
            .deliver(&self.member.address, address, message)
            .await;
        Ok(())
    }

    async fn request_response(&self, address: &str, message: Message) -> Result<Message> {
        let correlation_id = message.correlation_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(correlation_id.clone(), tx);

        // Reaps the pending entry even when the caller's deadline cancels
        // this future mid-await; a blocked or dead peer never resolves the
        // oneshot.
        let _guard = PendingGuard {
            pending: self.pending.clone(),
            correlation_id,
        };

        self.inner
            .deliver(&self.member.address, address, message)
            .await;

        rx.await
            .map_err(|_| ElectionError::Transport(format!("no response from {}", address)))
    }
}

struct PendingGuard {
    pending: PendingMap,
    correlation_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.correlation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;
        let b = fabric.join("b").await;

        let mut b_inbound = b.listen();
        let b_address = b.member().address;
        tokio::spawn(async move {
            let request = b_inbound.recv().await.unwrap();
            let reply = Message::reply(&request, &b.member().address, &"pong").unwrap();
            b.send(&request.sender, reply).await.unwrap();
        });

        let request = Message::request("t/ping", &a.member().address, &"ping").unwrap();
        let reply = timeout(
            Duration::from_secs(1),
            a.request_response(&b_address, request),
        )
        .await
        .expect("reply within deadline")
        .unwrap();

        assert_eq!(reply.data_as::<String>().unwrap(), "pong");
    }

    #[tokio::test]
    async fn test_metadata_is_visible_to_other_members() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;
        let b = fabric.join("b").await;

        a.update_metadata_property("demo", "leader-election")
            .await
            .unwrap();

        let peers = b.other_members().await;
        assert_eq!(peers.len(), 1);
        let metadata = b.metadata(&peers[0]).await;
        assert_eq!(metadata.get("demo").map(String::as_str), Some("leader-election"));
    }

    #[tokio::test]
    async fn test_blocked_link_drops_requests() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;
        let b = fabric.join("b").await;
        let b_address = b.member().address.clone();

        fabric.block("a", "b").await;

        let request = Message::request("t/ping", &a.member().address, &"ping").unwrap();
        let result = timeout(
            Duration::from_millis(100),
            a.request_response(&b_address, request),
        )
        .await;
        assert!(result.is_err(), "request across a blocked link must hang");
    }

    #[tokio::test]
    async fn test_removed_member_cannot_update_metadata() {
        let fabric = LocalFabric::new();
        let a = fabric.join("a").await;

        assert!(fabric.remove("a").await);
        let err = a
            .update_metadata_property("demo", "leader-election")
            .await
            .unwrap_err();
        assert!(matches!(err, ElectionError::ClusterUnavailable(_)));
    }
}
