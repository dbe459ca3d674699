use crate::api::types::RaftReplicationLevel;
use crate::replica::ReplicaOptions;
use std::convert::TryFrom;
use tokio::time::Duration;

/// Tuning for a raft node. Every field is optional; unset fields get a default that works for a
/// small cluster on a local network.
#[derive(Clone, Debug, Default)]
pub struct RaftOptions {
    pub leader_heartbeat_duration: Option<Duration>,
    pub follower_min_timeout: Option<Duration>,
    pub follower_max_timeout: Option<Duration>,
    /// How long the leader waits on a single RequestVote/AppendEntries/TimeoutNow call.
    pub peer_rpc_timeout: Option<Duration>,
    /// How long a client call is remembered for de-duplication, measured from when it was first seen.
    pub retry_cache_expiry: Option<Duration>,
    pub max_entries_per_append_entries: Option<usize>,
}

pub(super) struct RaftOptionsValidated {
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
    pub peer_rpc_timeout: Duration,
    pub retry_cache_expiry: Duration,
    pub max_entries_per_append_entries: usize,
}

impl RaftOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.leader_heartbeat_duration >= self.follower_min_timeout {
            return Err("Follower minimum timeout must be greater than leader's heartbeat");
        }
        if self.follower_min_timeout >= self.follower_max_timeout {
            return Err("Follower minimum timeout must be less than maximum timeout");
        }
        if self.peer_rpc_timeout >= self.follower_min_timeout {
            return Err("Peer RPC timeout must be less than the follower's minimum timeout");
        }
        if self.retry_cache_expiry == Duration::from_secs(0) {
            return Err("Retry cache expiry must be greater than zero");
        }
        if self.max_entries_per_append_entries == 0 {
            return Err("AppendEntries must be allowed to carry at least 1 entry");
        }

        Ok(())
    }
}

impl TryFrom<RaftOptions> for RaftOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftOptions) -> Result<Self, Self::Error> {
        let values = RaftOptionsValidated {
            leader_heartbeat_duration: options.leader_heartbeat_duration.unwrap_or(Duration::from_millis(100)),
            follower_min_timeout: options.follower_min_timeout.unwrap_or(Duration::from_millis(500)),
            follower_max_timeout: options.follower_max_timeout.unwrap_or(Duration::from_millis(1500)),
            peer_rpc_timeout: options.peer_rpc_timeout.unwrap_or(Duration::from_millis(300)),
            retry_cache_expiry: options.retry_cache_expiry.unwrap_or(Duration::from_secs(5)),
            max_entries_per_append_entries: options.max_entries_per_append_entries.unwrap_or(64),
        };

        values.validate()?;
        Ok(values)
    }
}

impl From<RaftOptionsValidated> for ReplicaOptions {
    fn from(options: RaftOptionsValidated) -> Self {
        ReplicaOptions {
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            follower_min_timeout: options.follower_min_timeout,
            follower_max_timeout: options.follower_max_timeout,
            peer_rpc_timeout: options.peer_rpc_timeout,
            retry_cache_expiry: options.retry_cache_expiry,
            max_entries_per_append_entries: options.max_entries_per_append_entries,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RaftClientOptions {
    /// How long a single attempt may take before it's abandoned and retried.
    pub request_timeout: Option<Duration>,
    /// Pause between attempts. A leader hint is followed without it, but not twice in a row.
    pub retry_interval: Option<Duration>,
    pub max_attempts: Option<u32>,
    /// Level used by `send()` and `send_async()`.
    pub default_replication_level: Option<RaftReplicationLevel>,
}

pub(super) struct RaftClientOptionsValidated {
    pub request_timeout: Duration,
    pub retry_interval: Duration,
    pub max_attempts: u32,
    pub default_replication_level: RaftReplicationLevel,
}

impl RaftClientOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.request_timeout == Duration::from_secs(0) {
            return Err("Request timeout must be greater than zero");
        }
        if self.max_attempts == 0 {
            return Err("Client must be allowed at least 1 attempt");
        }

        Ok(())
    }
}

impl TryFrom<RaftClientOptions> for RaftClientOptionsValidated {
    type Error = &'static str;

    fn try_from(options: RaftClientOptions) -> Result<Self, Self::Error> {
        let values = RaftClientOptionsValidated {
            request_timeout: options.request_timeout.unwrap_or(Duration::from_secs(3)),
            retry_interval: options.retry_interval.unwrap_or(Duration::from_millis(100)),
            max_attempts: options.max_attempts.unwrap_or(30),
            default_replication_level: options
                .default_replication_level
                .unwrap_or(RaftReplicationLevel::Majority),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = RaftOptionsValidated::try_from(RaftOptions::default()).unwrap();
        assert_eq!(options.leader_heartbeat_duration, Duration::from_millis(100));
        assert_eq!(options.retry_cache_expiry, Duration::from_secs(5));
        assert_eq!(options.max_entries_per_append_entries, 64);

        let client_options = RaftClientOptionsValidated::try_from(RaftClientOptions::default()).unwrap();
        assert_eq!(client_options.max_attempts, 30);
        assert_eq!(client_options.default_replication_level, RaftReplicationLevel::Majority);
    }

    #[test]
    fn timeouts_must_be_ordered() {
        let heartbeat_too_slow = RaftOptions {
            leader_heartbeat_duration: Some(Duration::from_millis(600)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(heartbeat_too_slow).is_err());

        let min_above_max = RaftOptions {
            follower_min_timeout: Some(Duration::from_millis(2000)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(min_above_max).is_err());

        let rpc_too_slow = RaftOptions {
            peer_rpc_timeout: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(rpc_too_slow).is_err());
    }

    #[test]
    fn zero_values_rejected() {
        let no_batch = RaftOptions {
            max_entries_per_append_entries: Some(0),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(no_batch).is_err());

        let no_expiry = RaftOptions {
            retry_cache_expiry: Some(Duration::from_secs(0)),
            ..Default::default()
        };
        assert!(RaftOptionsValidated::try_from(no_expiry).is_err());

        let no_attempts = RaftClientOptions {
            max_attempts: Some(0),
            ..Default::default()
        };
        assert!(RaftClientOptionsValidated::try_from(no_attempts).is_err());
    }
}
