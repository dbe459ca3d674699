use crate::actor::{ActorClient, ReplicaActor};
use crate::api::event_bus::RaftEventListener;
use crate::api::node::RaftNode;
use crate::api::options::{RaftOptions, RaftOptionsValidated};
use crate::api::state_machine::StateMachine;
use crate::api::storage::RaftStorage;
use crate::api::types::RaftMemberInfo;
use crate::commitlog::Index;
use crate::replica::{
    CreateReplicaError, InvalidCluster, ReplicaId, ReplicaMetadata, ReplicaStorage, StateMachineApplier,
};
use crate::server::RpcServer;
use crate::{replica, server};
use std::convert::TryFrom;
use std::error::Error;
use std::io;
use std::net::{SocketAddr, SocketAddrV4};

const ACTOR_QUEUE_SIZE: usize = 64;

pub struct RaftNodeConfig {
    pub my_replica_id: String,
    pub cluster_members: Vec<RaftMemberInfo>,
    /// Pass a clone of a previous node's storage to restart that node.
    pub storage: RaftStorage,
    pub state_machine: Box<dyn StateMachine + Send>,
    pub info_logger: slog::Logger,
    pub options: RaftOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftNodeCreationError {
    #[error("Invalid cluster info: {0}")]
    InvalidClusterInfo(Box<dyn Error + Send + Sync>),
    #[error("Illegal options for configuring node: {0}")]
    IllegalOptions(String),
    #[error("Log initialization failure: {0}")]
    LogInitialization(io::Error),
    // We will need to relax this later when adding membership changes.
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
}

/// Starts a raft node: its replica actor, state machine applier and gRPC server. Must be called
/// from within a tokio runtime.
pub async fn create_raft_node(config: RaftNodeConfig) -> Result<RaftNode, RaftNodeCreationError> {
    let root_logger = config
        .info_logger
        .new(slog::o!("ReplicaId" => config.my_replica_id.clone()));

    let my_member_info =
        my_info(&config.my_replica_id, &config.cluster_members).ok_or(RaftNodeCreationError::MeNotInCluster)?;
    let my_server_addr = raft_rpc_server_addr(my_member_info);

    let options = RaftOptionsValidated::try_from(config.options)
        .map_err(|e| RaftNodeCreationError::IllegalOptions(e.to_string()))?;

    let cluster_members: Vec<ReplicaMetadata> = config.cluster_members.into_iter().map(ReplicaMetadata::from).collect();

    let storage = ReplicaStorage {
        log: config.storage.log.clone(),
        local_state: config.storage.local_state.clone(),
        applied_checkpoint: Index::from_u64(config.state_machine.last_applied_index()),
    };

    let (actor_client, actor_queue_rx) = ActorClient::new(ACTOR_QUEUE_SIZE);

    let (server_shutdown_handle, server_shutdown_signal) = server::shutdown_signal();

    let (replica, commit_stream, election_state_change_listener) = replica::create_replica(
        root_logger.clone(),
        ReplicaId::new(config.my_replica_id.clone()),
        cluster_members,
        storage,
        options.into(),
        server_shutdown_handle,
        actor_client.weak(),
    )
    .map_err(RaftNodeCreationError::from)?;

    let replica_actor = ReplicaActor::new(root_logger.clone(), actor_queue_rx, replica);
    let actor_task = tokio::spawn(replica_actor.run_event_loop());

    let applier = StateMachineApplier::new(
        root_logger.clone(),
        commit_stream,
        config.state_machine,
        actor_client.weak(),
    );
    tokio::spawn(applier.run());

    let replica_raft_server = RpcServer::new(root_logger, actor_client.weak());
    let server_task = tokio::spawn(replica_raft_server.run(my_server_addr, server_shutdown_signal));

    Ok(RaftNode::new(
        config.my_replica_id,
        actor_client,
        RaftEventListener::new(election_state_change_listener),
        actor_task,
        server_task,
    ))
}

fn my_info<'a>(my_replica_id: &str, cluster_members: &'a [RaftMemberInfo]) -> Option<&'a RaftMemberInfo> {
    cluster_members
        .iter()
        .find(|member_info| member_info.replica_id == my_replica_id)
}

fn raft_rpc_server_addr(member_info: &RaftMemberInfo) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(member_info.ip_addr, member_info.raft_rpc_port))
}

impl From<CreateReplicaError> for RaftNodeCreationError {
    fn from(e: CreateReplicaError) -> Self {
        match e {
            CreateReplicaError::InvalidCluster(InvalidCluster::MeNotInCluster) => RaftNodeCreationError::MeNotInCluster,
            CreateReplicaError::InvalidCluster(e) => RaftNodeCreationError::InvalidClusterInfo(Box::new(e)),
            CreateReplicaError::LogInitialization(e) => RaftNodeCreationError::LogInitialization(e),
        }
    }
}
