#[derive(Debug, Clone)]
pub struct ElectionConfig {
    /// Base election timeout; the effective timeout is drawn uniformly
    /// from [election_timeout_ms, 2 * election_timeout_ms) on each re-arm.
    pub election_timeout_ms: u64,
    /// Leader heartbeat period; keep well below the election timeout.
    pub heartbeat_interval_ms: u64,
    /// Deadline for a candidate to collect a majority of votes.
    pub vote_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_ms: 300,
            heartbeat_interval_ms: 30,
            vote_timeout_ms: 300,
        }
    }
}

impl ElectionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_election_timeout_ms(mut self, ms: u64) -> Self {
        self.election_timeout_ms = ms;
        self
    }

    pub fn with_heartbeat_interval_ms(mut self, ms: u64) -> Self {
        self.heartbeat_interval_ms = ms;
        self
    }

    pub fn with_vote_timeout_ms(mut self, ms: u64) -> Self {
        self.vote_timeout_ms = ms;
        self
    }
}
