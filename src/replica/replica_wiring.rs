use crate::actor::WeakActorClient;
use crate::commitlog::{Index, Log};
use crate::replica::election::{ElectionConfig, ElectionState};
use crate::replica::local_state::{InMemoryLocalState, LocalStateStore};
use crate::replica::peers::{ClusterTracker, InvalidCluster, ReplicaId, ReplicaMetadata};
use crate::replica::replica::{Replica, ReplicaConfig};
use crate::replica::write_ahead_log;
use crate::replica::{CommitStream, ElectionStateChangeListener, WriteAheadLogEntry};
use crate::server::RpcServerShutdownHandle;
use std::io;
use std::time::Duration;

/// Validated timing and batching knobs for one replica.
#[derive(Clone, Debug)]
pub(crate) struct ReplicaOptions {
    pub(crate) leader_heartbeat_duration: Duration,
    pub(crate) follower_min_timeout: Duration,
    pub(crate) follower_max_timeout: Duration,
    pub(crate) peer_rpc_timeout: Duration,
    pub(crate) retry_cache_expiry: Duration,
    pub(crate) max_entries_per_append_entries: usize,
}

pub(crate) struct ReplicaStorage<L> {
    pub(crate) log: L,
    pub(crate) local_state: LocalStateStore,
    pub(crate) applied_checkpoint: Option<Index>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum CreateReplicaError {
    #[error("invalid cluster: {0}")]
    InvalidCluster(#[from] InvalidCluster),
    #[error("failed to initialize log: {0}")]
    LogInitialization(#[from] io::Error),
}

pub(crate) fn create_replica<L>(
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_members: Vec<ReplicaMetadata>,
    storage: ReplicaStorage<L>,
    options: ReplicaOptions,
    server_shutdown_handle: RpcServerShutdownHandle,
    actor_client: WeakActorClient,
) -> Result<(Replica<L>, CommitStream, ElectionStateChangeListener), CreateReplicaError>
where
    L: Log<WriteAheadLogEntry> + 'static,
{
    let cluster_tracker = ClusterTracker::create_valid_cluster(&logger, my_replica_id.clone(), cluster_members)?;

    let (write_ahead_log, commit_stream) =
        write_ahead_log::wired(logger.clone(), storage.log, storage.applied_checkpoint)?;

    let local_state = Box::new(InMemoryLocalState::new(my_replica_id.clone(), storage.local_state));

    let (election_state, election_state_change_listener) = ElectionState::new_follower(
        ElectionConfig {
            my_replica_id,
            leader_heartbeat_duration: options.leader_heartbeat_duration,
            follower_min_timeout: options.follower_min_timeout,
            follower_max_timeout: options.follower_max_timeout,
        },
        actor_client.clone(),
    );

    let replica = Replica::new(ReplicaConfig {
        logger,
        cluster_tracker,
        local_state,
        election_state,
        write_ahead_log,
        applied_checkpoint: storage.applied_checkpoint,
        actor_client,
        server_shutdown_handle,
        leader_heartbeat_duration: options.leader_heartbeat_duration,
        peer_rpc_timeout: options.peer_rpc_timeout,
        retry_cache_expiry: options.retry_cache_expiry,
        max_entries_per_append_entries: options.max_entries_per_append_entries,
    });

    Ok((replica, commit_stream, election_state_change_listener))
}
