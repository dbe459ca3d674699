use crate::grpc::{ProtoLeaderHint, ProtoReplicationLevel};
use crate::replica;
use std::convert::TryFrom;
use std::net::Ipv4Addr;
use std::num::TryFromIntError;

/// One member of the static cluster.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftMemberInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_rpc_port: u16,
}

impl From<RaftMemberInfo> for replica::ReplicaMetadata {
    fn from(member_info: RaftMemberInfo) -> Self {
        Self::new(
            replica::ReplicaId::new(member_info.replica_id),
            member_info.ip_addr,
            member_info.raft_rpc_port,
        )
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftLeaderInfo {
    pub replica_id: String,
    pub ip_addr: Ipv4Addr,
    pub raft_rpc_port: u16,
}

impl From<replica::LeaderRedirectInfo> for RaftLeaderInfo {
    fn from(internal_leader: replica::LeaderRedirectInfo) -> Self {
        Self {
            replica_id: internal_leader.replica_id.into_inner(),
            ip_addr: internal_leader.ip_addr,
            raft_rpc_port: internal_leader.port,
        }
    }
}

impl TryFrom<ProtoLeaderHint> for RaftLeaderInfo {
    type Error = TryFromIntError;

    /// Fails if the port doesn't fit a u16.
    fn try_from(hint: ProtoLeaderHint) -> Result<Self, Self::Error> {
        Ok(Self {
            replica_id: hint.replica_id,
            ip_addr: Ipv4Addr::from(hint.ip),
            raft_rpc_port: u16::try_from(hint.port)?,
        })
    }
}

/// When a client call gets its reply.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaftReplicationLevel {
    /// Once the command is stored by a majority of the cluster and applied by the leader.
    Majority,
    /// Like `Majority`, and additionally every member of the cluster has stored the command.
    All,
}

impl From<RaftReplicationLevel> for ProtoReplicationLevel {
    fn from(level: RaftReplicationLevel) -> Self {
        match level {
            RaftReplicationLevel::Majority => ProtoReplicationLevel::Majority,
            RaftReplicationLevel::All => ProtoReplicationLevel::All,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaftRole {
    Leader,
    Candidate,
    Follower,
}

impl From<replica::ReplicaRole> for RaftRole {
    fn from(role: replica::ReplicaRole) -> Self {
        match role {
            replica::ReplicaRole::Leader => RaftRole::Leader,
            replica::ReplicaRole::Candidate => RaftRole::Candidate,
            replica::ReplicaRole::Follower => RaftRole::Follower,
        }
    }
}

/// Point in time view of one replica. Index values of 0 mean "none".
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftStatus {
    pub replica_id: String,
    pub term: u64,
    pub role: RaftRole,
    pub leader_id: Option<String>,
    pub commit_index: u64,
    pub last_applied_index: u64,
    pub last_log_index: u64,
    pub retry_cache_size: usize,
}

impl From<replica::ReplicaStatus> for RaftStatus {
    fn from(status: replica::ReplicaStatus) -> Self {
        RaftStatus {
            replica_id: status.replica_id.into_inner(),
            term: status.term.as_u64(),
            role: RaftRole::from(status.role),
            leader_id: status.leader_id.map(|id| id.into_inner()),
            commit_index: status.commit_index.map_or(0, |i| i.as_u64()),
            last_applied_index: status.last_applied_index.map_or(0, |i| i.as_u64()),
            last_log_index: status.last_log_index.map_or(0, |i| i.as_u64()),
            retry_cache_size: status.retry_cache_size,
        }
    }
}
