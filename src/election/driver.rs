use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::cluster::{Cluster, Member, Message};
use crate::config::ElectionConfig;
use crate::election::discovery::{PeerDiscovery, LEADER_ELECTION};
use crate::election::protocol::{
    self, HeartbeatRequest, HeartbeatResponse, VoteRequest, VoteResponse,
};
use crate::election::state::{ElectionEvent, ElectionState, HeartbeatOutcome, LeaderView, Role};
use crate::election::term::TermRegister;
use crate::election::timer;
use crate::error::{ElectionError, Result};

const EVENT_BUFFER: usize = 64;
const COMMAND_BUFFER: usize = 32;

/// Internal signals fed back into the driver loop by RPC tasks.
enum Command {
    /// A candidate vote round resolved.
    RoundFinished { term: u64, won: bool },
    /// A strictly higher term was seen on a heartbeat response.
    TermObserved { term: u64 },
}

/// Per-topic leader election driver.
///
/// One driver exists per (member, topic) pair. It advertises the member in
/// the topic's election group, dispatches inbound vote and heartbeat
/// requests, runs candidate vote rounds, sends leader heartbeats, and
/// publishes [`ElectionEvent`]s in transition order.
///
/// Terms are held in memory only; a restarted member rejoins at term 0 and
/// catches up from heartbeats, so election safety is not guaranteed across
/// process restarts.
pub struct LeaderElection {
    topic: String,
    cluster: Arc<dyn Cluster>,
    config: ElectionConfig,
    local: Member,
    term: Arc<TermRegister>,
    state: Arc<RwLock<ElectionState>>,
    events: broadcast::Sender<ElectionEvent>,
    command_tx: mpsc::Sender<Command>,
    command_rx: Mutex<Option<mpsc::Receiver<Command>>>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElection {
    pub fn new(cluster: Arc<dyn Cluster>, topic: impl Into<String>, config: ElectionConfig) -> Self {
        let topic = topic.into();
        let local = cluster.member();
        let term = Arc::new(TermRegister::new(0));
        let state = Arc::new(RwLock::new(ElectionState::new(local.id.as_str(), term.clone())));
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);

        Self {
            topic,
            cluster,
            config,
            local,
            term,
            state,
            events,
            command_tx,
            command_rx: Mutex::new(Some(command_rx)),
            cancel: CancellationToken::new(),
            worker: Mutex::new(None),
        }
    }

    /// Joins the election group and spawns the driver loop. The member
    /// enters Follower and is ready to vote once this returns. The only
    /// fatal failure is an unreachable cluster.
    pub async fn start(&self) -> Result<()> {
        let command_rx = self
            .command_rx
            .lock()
            .await
            .take()
            .ok_or(ElectionError::AlreadyStarted)?;

        self.cluster
            .update_metadata_property(&self.topic, LEADER_ELECTION)
            .await?;
        let inbound = self.cluster.listen();

        let driver = ElectionLoop {
            topic: self.topic.clone(),
            cluster: self.cluster.clone(),
            config: self.config.clone(),
            local: self.local.clone(),
            term: self.term.clone(),
            state: self.state.clone(),
            events: self.events.clone(),
            discovery: PeerDiscovery::new(self.cluster.clone(), self.topic.clone()),
            inbound,
            command_tx: self.command_tx.clone(),
            command_rx,
            cancel: self.cancel.clone(),
            election_deadline: Instant::now(),
            heartbeat: timer::heartbeat_interval(self.config.heartbeat_interval_ms),
            round: None,
        };
        *self.worker.lock().await = Some(tokio::spawn(driver.run()));

        Ok(())
    }

    pub async fn current_role(&self) -> Role {
        self.state.read().await.role()
    }

    pub async fn current_term(&self) -> u64 {
        self.term.current()
    }

    pub async fn leader_view(&self) -> LeaderView {
        self.state.read().await.leader_view()
    }

    /// Subscribe to role-change events. The channel is bounded; a lagging
    /// subscriber loses the oldest events rather than blocking the election
    /// loop.
    pub fn listen(&self) -> broadcast::Receiver<ElectionEvent> {
        self.events.subscribe()
    }

    pub fn member_id(&self) -> &str {
        &self.local.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stops timers, cancels the in-flight vote round, and unsubscribes
    /// from the cluster. In-flight RPCs are abandoned without effect.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.lock().await.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for LeaderElection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The single-writer event loop owning every role/term/leader mutation.
struct ElectionLoop {
    topic: String,
    cluster: Arc<dyn Cluster>,
    config: ElectionConfig,
    local: Member,
    term: Arc<TermRegister>,
    state: Arc<RwLock<ElectionState>>,
    events: broadcast::Sender<ElectionEvent>,
    discovery: PeerDiscovery,
    inbound: broadcast::Receiver<Message>,
    command_tx: mpsc::Sender<Command>,
    command_rx: mpsc::Receiver<Command>,
    cancel: CancellationToken,
    election_deadline: Instant,
    heartbeat: time::Interval,
    round: Option<JoinHandle<()>>,
}

impl ElectionLoop {
    async fn run(mut self) {
        tracing::info!(
            member_id = %self.local.id,
            topic = %self.topic,
            "election driver started"
        );
        // Role entry at start: every subscriber sees the initial Follower.
        let _ = self.events.send(ElectionEvent::follower(self.term.current()));
        self.rearm_election_timer();

        loop {
            let role = self.state.read().await.role();

            tokio::select! {
                _ = self.cancel.cancelled() => break,

                message = self.inbound.recv() => match message {
                    Ok(message) => self.dispatch(message).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "inbound stream lagging, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                Some(command) = self.command_rx.recv() => {
                    self.handle_command(command).await;
                }

                _ = time::sleep_until(self.election_deadline), if role != Role::Leader => {
                    self.on_election_timeout().await;
                }

                _ = self.heartbeat.tick(), if role == Role::Leader => {
                    self.send_heartbeats().await;
                }
            }
        }

        if let Some(round) = self.round.take() {
            round.abort();
        }
        tracing::info!(member_id = %self.local.id, topic = %self.topic, "election driver stopped");
    }

    fn rearm_election_timer(&mut self) {
        self.election_deadline =
            Instant::now() + timer::random_election_timeout(self.config.election_timeout_ms);
    }

    /// Publishes a role-entry event and applies its timer consequences.
    fn publish(&mut self, event: ElectionEvent) {
        match event.role() {
            Role::Follower => {
                if let Some(round) = self.round.take() {
                    round.abort();
                }
                self.rearm_election_timer();
            }
            Role::Candidate => {
                self.rearm_election_timer();
            }
            Role::Leader => {
                if let Some(round) = self.round.take() {
                    round.abort();
                }
                // Fresh interval: the first tick fires immediately, so a new
                // leader announces itself before rivals time out again.
                self.heartbeat = timer::heartbeat_interval(self.config.heartbeat_interval_ms);
            }
        }
        tracing::info!(
            member_id = %self.local.id,
            topic = %self.topic,
            term = event.term(),
            role = %event.role(),
            "role transition"
        );
        let _ = self.events.send(event);
    }

    async fn dispatch(&mut self, message: Message) {
        if protocol::is_vote(&self.topic, &message.qualifier) {
            self.on_vote_request(message).await;
        } else if protocol::is_heartbeat(&self.topic, &message.qualifier) {
            self.on_heartbeat_request(message).await;
        }
        // Anything else on the transport stream is not ours.
    }

    async fn on_vote_request(&mut self, message: Message) {
        let request: VoteRequest = match message.data_as() {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "dropping malformed vote request");
                return;
            }
        };

        let (granted, event) = {
            let mut state = self.state.write().await;
            // Grant only from Follower, and only for terms strictly ahead of
            // our own. Granting does not advance the local term.
            let granted = self.term.is_before(request.term) && state.role() == Role::Follower;
            let event = match state.role() {
                // A candidate that observes a competing election yields.
                Role::Candidate => state.become_follower(request.term),
                // A leader outbid by a newer election steps down.
                Role::Leader if self.term.is_before(request.term) => {
                    state.become_follower(request.term)
                }
                _ => None,
            };
            (granted, event)
        };
        if let Some(event) = event {
            self.publish(event);
        }

        tracing::debug!(
            member_id = %self.local.id,
            from = %message.sender,
            term = request.term,
            granted,
            "vote request"
        );

        let response = VoteResponse {
            granted,
            member_id: self.local.id.clone(),
        };
        match protocol::vote_response(&message, &self.local.address, &response) {
            Ok(reply) => self.send_reply(message.sender, reply),
            Err(err) => tracing::debug!(error = %err, "vote reply encode failed"),
        }
    }

    async fn on_heartbeat_request(&mut self, message: Message) {
        let request: HeartbeatRequest = match message.data_as() {
            Ok(request) => request,
            Err(err) => {
                tracing::debug!(error = %err, "dropping malformed heartbeat");
                return;
            }
        };

        let outcome = {
            self.state
                .write()
                .await
                .heartbeat(&request.member_id, request.term)
        };
        match outcome {
            HeartbeatOutcome::Accepted { event: Some(event) } => self.publish(event),
            HeartbeatOutcome::Accepted { event: None } => {
                if self.state.read().await.role() != Role::Leader {
                    self.rearm_election_timer();
                }
                tracing::trace!(
                    member_id = %self.local.id,
                    leader = %request.member_id,
                    term = request.term,
                    "heartbeat"
                );
            }
            HeartbeatOutcome::Stale => {
                tracing::trace!(
                    member_id = %self.local.id,
                    from = %request.member_id,
                    term = request.term,
                    "stale heartbeat ignored"
                );
            }
        }

        // Always reply with the current term; a stale leader learns the
        // newer term from this response.
        let response = HeartbeatResponse {
            member_id: self.local.id.clone(),
            term: self.term.current(),
        };
        match protocol::heartbeat_response(&message, &self.local.address, &response) {
            Ok(reply) => self.send_reply(message.sender, reply),
            Err(err) => tracing::debug!(error = %err, "heartbeat reply encode failed"),
        }
    }

    /// Replies are fire-and-forget; the loop never waits on the transport.
    fn send_reply(&self, target: String, reply: Message) {
        let cluster = self.cluster.clone();
        tokio::spawn(async move {
            if let Err(err) = cluster.send(&target, reply).await {
                tracing::debug!(target = %target, error = %err, "reply send failed");
            }
        });
    }

    async fn on_election_timeout(&mut self) {
        // A round still pending from the previous term is void.
        if let Some(round) = self.round.take() {
            round.abort();
        }

        let event = { self.state.write().await.become_candidate() };
        let round_term = event.term();
        self.publish(event);

        let peers = self.discovery.find_peers().await;
        tracing::info!(
            member_id = %self.local.id,
            topic = %self.topic,
            term = round_term,
            peers = peers.len(),
            "election timeout, requesting votes"
        );

        if peers.is_empty() {
            // Majority of one.
            let event = { self.state.write().await.finish_round(round_term, true) };
            if let Some(event) = event {
                self.publish(event);
            }
            return;
        }

        self.round = Some(self.spawn_vote_round(round_term, peers));
    }

    fn spawn_vote_round(&self, round_term: u64, peers: Vec<Member>) -> JoinHandle<()> {
        let cluster = self.cluster.clone();
        let topic = self.topic.clone();
        let local_address = self.local.address.clone();
        let command_tx = self.command_tx.clone();
        let vote_timeout = Duration::from_millis(self.config.vote_timeout_ms);
        // Peer grants required for a majority of the peers+1 member group,
        // counting the implicit self-vote.
        let needed = (peers.len() + 1) / 2;

        tokio::spawn(async move {
            let mut requests: FuturesUnordered<_> = peers
                .into_iter()
                .map(|peer| {
                    let cluster = cluster.clone();
                    let topic = topic.clone();
                    let local_address = local_address.clone();
                    async move {
                        let request = match protocol::vote_request(
                            &local_address,
                            &topic,
                            &VoteRequest { term: round_term },
                        ) {
                            Ok(request) => request,
                            Err(err) => {
                                tracing::debug!(error = %err, "vote request encode failed");
                                return None;
                            }
                        };
                        match time::timeout(
                            vote_timeout,
                            cluster.request_response(&peer.address, request),
                        )
                        .await
                        {
                            Ok(Ok(reply)) => reply.data_as::<VoteResponse>().ok(),
                            Ok(Err(err)) => {
                                tracing::debug!(peer = %peer.id, error = %err, "vote request failed");
                                None
                            }
                            Err(_) => {
                                let err = ElectionError::Timeout(peer.address.clone());
                                tracing::debug!(peer = %peer.id, error = %err, "vote request failed");
                                None
                            }
                        }
                    }
                })
                .collect();

            let collect = async {
                let mut yes = 0usize;
                while let Some(response) = requests.next().await {
                    let Some(response) = response else { continue };
                    tracing::debug!(
                        voter = %response.member_id,
                        granted = response.granted,
                        term = round_term,
                        "vote response"
                    );
                    if response.granted {
                        yes += 1;
                        if yes >= needed {
                            return true;
                        }
                    }
                }
                false
            };
            let won = time::timeout(vote_timeout, collect).await.unwrap_or(false);

            let _ = command_tx
                .send(Command::RoundFinished {
                    term: round_term,
                    won,
                })
                .await;
        })
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::RoundFinished { term, won } => {
                self.round = None;
                let event = { self.state.write().await.finish_round(term, won) };
                match event {
                    Some(event) => self.publish(event),
                    // The machine left Candidate (or the term moved on)
                    // while the round was in flight.
                    None => tracing::debug!(term, won, "stale vote round outcome dropped"),
                }
            }
            Command::TermObserved { term } => {
                let event = { self.state.write().await.observe_term(term) };
                if let Some(event) = event {
                    self.publish(event);
                }
            }
        }
    }

    /// Best-effort heartbeat fan-out; unresponsive peers are tolerated.
    async fn send_heartbeats(&mut self) {
        let heartbeat_term = self.term.current();
        let peers = self.discovery.find_peers().await;
        let rpc_timeout = Duration::from_millis(self.config.election_timeout_ms);

        tracing::trace!(
            member_id = %self.local.id,
            term = heartbeat_term,
            peers = peers.len(),
            "heartbeat round"
        );

        for peer in peers {
            let cluster = self.cluster.clone();
            let topic = self.topic.clone();
            let local = self.local.clone();
            let command_tx = self.command_tx.clone();
            tokio::spawn(async move {
                let request = match protocol::heartbeat_request(
                    &local.address,
                    &topic,
                    &HeartbeatRequest {
                        term: heartbeat_term,
                        member_id: local.id.clone(),
                    },
                ) {
                    Ok(request) => request,
                    Err(err) => {
                        tracing::debug!(error = %err, "heartbeat encode failed");
                        return;
                    }
                };
                match time::timeout(rpc_timeout, cluster.request_response(&peer.address, request))
                    .await
                {
                    Ok(Ok(reply)) => {
                        if let Ok(response) = reply.data_as::<HeartbeatResponse>() {
                            // The register is only raised on the loop, where
                            // observe_term can still see the term this round
                            // was sent under. Equal or older response terms
                            // can never move the register.
                            if response.term > heartbeat_term {
                                let _ = command_tx
                                    .send(Command::TermObserved {
                                        term: response.term,
                                    })
                                    .await;
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(peer = %peer.id, error = %err, "heartbeat failed")
                    }
                    Err(_) => tracing::trace!(peer = %peer.id, "heartbeat timed out"),
                }
            });
        }
    }
}
