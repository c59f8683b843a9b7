//! Topic-scoped election protocol messages.
//!
//! For a topic `T` the protocol owns two qualifiers, `T/vote` and
//! `T/heartbeat`. The qualifier namespace is part of the external interface;
//! peers running other implementations match on it.

use serde::{Deserialize, Serialize};

use crate::cluster::Message;
use crate::error::Result;

const VOTE: &str = "vote";
const HEARTBEAT: &str = "heartbeat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub granted: bool,
    pub member_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub term: u64,
    pub member_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub member_id: String,
    pub term: u64,
}

pub fn vote_qualifier(topic: &str) -> String {
    format!("{}/{}", topic, VOTE)
}

pub fn heartbeat_qualifier(topic: &str) -> String {
    format!("{}/{}", topic, HEARTBEAT)
}

pub fn is_vote(topic: &str, qualifier: &str) -> bool {
    qualifier == vote_qualifier(topic)
}

pub fn is_heartbeat(topic: &str, qualifier: &str) -> bool {
    qualifier == heartbeat_qualifier(topic)
}

pub fn vote_request(sender: &str, topic: &str, request: &VoteRequest) -> Result<Message> {
    Message::request(vote_qualifier(topic), sender, request)
}

pub fn heartbeat_request(sender: &str, topic: &str, request: &HeartbeatRequest) -> Result<Message> {
    Message::request(heartbeat_qualifier(topic), sender, request)
}

pub fn vote_response(request: &Message, sender: &str, response: &VoteResponse) -> Result<Message> {
    Message::reply(request, sender, response)
}

pub fn heartbeat_response(
    request: &Message,
    sender: &str,
    response: &HeartbeatResponse,
) -> Result<Message> {
    Message::reply(request, sender, response)
}
