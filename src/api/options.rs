use crate::raft_log::Index;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunables for a raft node. Every field is optional; `None` picks a default suitable for a LAN.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    /// How often a leader sends AppendEntries to idle followers.
    pub heartbeat_interval: Option<Duration>,
    /// Election timeouts are drawn uniformly from `[min, max]`.
    pub election_timeout_min: Option<Duration>,
    pub election_timeout_max: Option<Duration>,
    /// Upper bound on a single outbound RPC, connection setup included.
    pub rpc_timeout: Option<Duration>,
    /// Byte budget for entries in one AppendEntries request.
    pub max_size_per_msg: Option<u64>,
    /// Byte budget for entries handed to the application in one batch.
    pub max_apply_batch_size: Option<u64>,
    /// Committed entries buffered for the application before the node waits.
    pub apply_channel_capacity: Option<usize>,
    /// Index the application has already applied to its state machine, for restarts. Entries up
    /// to here aren't delivered again.
    pub applied: Option<Index>,
}

/// `RaftOptions` with defaults filled in and cross-field constraints checked.
#[derive(Clone, Debug)]
pub struct RaftConfig {
    pub heartbeat_interval: Duration,
    pub election_timeout_min: Duration,
    pub election_timeout_max: Duration,
    pub rpc_timeout: Duration,
    pub max_size_per_msg: u64,
    pub max_apply_batch_size: u64,
    pub apply_channel_capacity: usize,
    pub applied: Index,
}

impl RaftConfig {
    fn validate(&self) -> Result<(), &'static str> {
        if self.heartbeat_interval >= self.election_timeout_min {
            return Err("Election minimum timeout must be greater than leader's heartbeat interval");
        }
        if self.election_timeout_min >= self.election_timeout_max {
            return Err("Election minimum timeout must be less than maximum timeout");
        }
        if self.rpc_timeout >= self.election_timeout_min {
            return Err("RPC timeout must be less than the election minimum timeout");
        }
        if self.max_size_per_msg == 0 || self.max_apply_batch_size == 0 {
            return Err("Message and apply batch sizes must be non-zero");
        }
        if self.apply_channel_capacity == 0 {
            return Err("Apply channel capacity must be non-zero");
        }

        Ok(())
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        RaftConfig::from_options_unchecked(RaftOptions::default())
    }
}

impl RaftConfig {
    fn from_options_unchecked(options: RaftOptions) -> Self {
        RaftConfig {
            heartbeat_interval: options.heartbeat_interval.unwrap_or(Duration::from_millis(100)),
            election_timeout_min: options.election_timeout_min.unwrap_or(Duration::from_millis(500)),
            election_timeout_max: options.election_timeout_max.unwrap_or(Duration::from_millis(1500)),
            rpc_timeout: options.rpc_timeout.unwrap_or(Duration::from_millis(300)),
            max_size_per_msg: options.max_size_per_msg.unwrap_or(1024 * 1024),
            max_apply_batch_size: options.max_apply_batch_size.unwrap_or(4 * 1024 * 1024),
            apply_channel_capacity: options.apply_channel_capacity.unwrap_or(128),
            applied: options.applied.unwrap_or(0),
        }
    }
}

impl TryFrom<RaftOptions> for RaftConfig {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let config = RaftConfig::from_options_unchecked(options);

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RaftConfig::try_from(RaftOptions::default()).unwrap();
        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.election_timeout_min, Duration::from_millis(500));
        assert_eq!(config.election_timeout_max, Duration::from_millis(1500));
        assert_eq!(config.rpc_timeout, Duration::from_millis(300));
        assert_eq!(config.applied, 0);
    }

    #[test]
    fn rejects_inconsistent_timeouts() {
        let heartbeat_too_slow = RaftOptions {
            heartbeat_interval: Some(Duration::from_millis(600)),
            ..Default::default()
        };
        assert!(RaftConfig::try_from(heartbeat_too_slow).is_err());

        let inverted_range = RaftOptions {
            election_timeout_min: Some(Duration::from_millis(800)),
            election_timeout_max: Some(Duration::from_millis(700)),
            ..Default::default()
        };
        assert!(RaftConfig::try_from(inverted_range).is_err());

        let rpc_too_slow = RaftOptions {
            rpc_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(RaftConfig::try_from(rpc_too_slow).is_err());

        let zero_batch = RaftOptions {
            max_apply_batch_size: Some(0),
            ..Default::default()
        };
        assert!(RaftConfig::try_from(zero_batch).is_err());
    }
}
