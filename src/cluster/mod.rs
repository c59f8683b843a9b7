//! The cluster membership collaborator consumed by the election driver.
//!
//! The gossip layer itself lives outside this crate; the driver only needs
//! the capabilities below: discover members and their gossiped metadata,
//! advertise a metadata property, and exchange correlated messages.

pub mod local;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;

/// A cluster member as reported by the membership layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Cluster-unique id, stable for the member's lifetime.
    pub id: String,
    /// Transport address messages to this member are sent to.
    pub address: String,
}

impl Member {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// A transport message. The payload encoding is the transport's concern;
/// the election protocol only relies on the qualifier, the sender address,
/// and the correlation id linking a response to its request.
#[derive(Debug, Clone)]
pub struct Message {
    pub qualifier: String,
    pub sender: String,
    pub correlation_id: String,
    pub data: serde_json::Value,
}

impl Message {
    /// Builds a request message with a fresh correlation id.
    pub fn request<T: Serialize>(
        qualifier: impl Into<String>,
        sender: impl Into<String>,
        data: &T,
    ) -> Result<Self> {
        Ok(Self {
            qualifier: qualifier.into(),
            sender: sender.into(),
            correlation_id: Uuid::new_v4().to_string(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Builds a reply to `request`, echoing its correlation id so the
    /// transport can route it back to the waiting caller.
    pub fn reply<T: Serialize>(
        request: &Message,
        sender: impl Into<String>,
        data: &T,
    ) -> Result<Self> {
        Ok(Self {
            qualifier: request.qualifier.clone(),
            sender: sender.into(),
            correlation_id: request.correlation_id.clone(),
            data: serde_json::to_value(data)?,
        })
    }

    /// Decodes the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

/// Capabilities the election driver consumes from the cluster layer.
#[async_trait]
pub trait Cluster: Send + Sync {
    /// The local member (id and address).
    fn member(&self) -> Member;

    /// All currently known remote members.
    async fn other_members(&self) -> Vec<Member>;

    /// The gossiped metadata of `member`. Unknown members yield an empty map.
    async fn metadata(&self, member: &Member) -> HashMap<String, String>;

    /// Advertise a metadata property on the local member.
    async fn update_metadata_property(&self, key: &str, value: &str) -> Result<()>;

    /// Subscribe to all inbound transport messages.
    fn listen(&self) -> broadcast::Receiver<Message>;

    /// One-way send to a member address.
    async fn send(&self, address: &str, message: Message) -> Result<()>;

    /// Correlated request/response round-trip. Resolution may never happen
    /// (dead or partitioned peer); callers bound the wait with a deadline.
    async fn request_response(&self, address: &str, message: Message) -> Result<Message>;
}
