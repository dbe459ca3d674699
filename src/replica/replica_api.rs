use crate::api::StateMachineOutput;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::peers::{ReplicaId, ReplicaMetadata};
use crate::replica::WriteAheadLogEntry;
use bytes::Bytes;
use std::io;
use std::net::Ipv4Addr;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReplicationLevel {
    /// Reply once the entry is committed (stored by a majority) and applied.
    Majority,
    /// Additionally hold the reply until every cluster member has stored the entry.
    All,
}

#[derive(Debug)]
pub(crate) struct ClientRequestInput {
    pub(crate) client_id: u64,
    pub(crate) call_id: u64,
    pub(crate) data: Bytes,
    pub(crate) replication_level: ReplicationLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClientRequestOutput {
    pub(crate) entry_term: Term,
    pub(crate) entry_index: Index,
    pub(crate) state_machine_output: StateMachineOutput,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ClientRequestError {
    #[error("I'm not leader")]
    NotLeader(Option<LeaderRedirectInfo>),

    // The client should retry the same call. The key is free again, so the retry will execute.
    #[error("Retry cache entry expired before the request was applied")]
    RetryCacheEntryExpired,

    // The client should retry the same call, likely on another replica.
    #[error("Lost leadership before the request was applied")]
    LeadershipLost,

    #[error("Failed to persist log: {0}")]
    LocalIoError(io::Error),

    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderRedirectInfo {
    pub(crate) replica_id: ReplicaId,
    pub(crate) ip_addr: Ipv4Addr,
    pub(crate) port: u16,
}

impl From<&ReplicaMetadata> for LeaderRedirectInfo {
    fn from(metadata: &ReplicaMetadata) -> Self {
        LeaderRedirectInfo {
            replica_id: metadata.replica_id().clone(),
            ip_addr: metadata.ip_addr(),
            port: metadata.port(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct RequestVoteInput {
    pub(crate) candidate_term: Term,
    pub(crate) candidate_id: ReplicaId,
    pub(crate) candidate_last_log_entry: Option<(Term, Index)>,
}

#[derive(Debug)]
pub(crate) struct RequestVoteOutput {
    pub(crate) vote_granted: bool,
    pub(crate) current_term: Term,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum RequestVoteError {
    #[error("Requesting candidate is not in the cluster")]
    CandidateNotInCluster,
    #[error("Requesting candidate's term is out of date")]
    RequestTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
    // "Previous log entry" is the log entry immediately preceding the new ones in AppendEntriesInput.
    pub(crate) leader_previous_log_entry: Option<(Term, Index)>,
    pub(crate) leader_commit_index: Option<Index>,
    pub(crate) new_entries: Vec<WriteAheadLogEntry>,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesOutput {
    // Nothing
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum AppendEntriesError {
    #[error("Client is not in cluster")]
    ClientNotInCluster,
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are missing previous log entry")]
    ServerMissingPreviousLogEntry { next_index_hint: Index },
    #[error("We (server) had an IO failure: {0:?}")]
    ServerIoError(io::Error),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TimeoutNowInput {
    pub(crate) leader_term: Term,
    pub(crate) leader_id: ReplicaId,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum TimeoutNowError {
    #[error("Client is not in cluster")]
    ClientNotInCluster,
    #[error("Client's term is out of date")]
    ClientTermOutOfDate(TermOutOfDateInfo),
    #[error("We (server) are unavailable because actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TransferLeadershipOutput {
    pub(crate) new_leader_candidate: ReplicaId,
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum TransferLeadershipError {
    #[error("I'm not leader")]
    NotLeader(Option<LeaderRedirectInfo>),
    #[error("There is no peer to transfer leadership to")]
    NoPeers,
    #[error("Replica actor is dead RIP")]
    ActorExited,
}

#[derive(Debug)]
pub(crate) struct TermOutOfDateInfo {
    pub(crate) current_term: Term,
}

#[derive(Debug)]
pub(crate) struct RequestVoteReplyFromPeer {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) result: RequestVoteResult,
}

#[derive(Debug)]
pub(crate) enum RequestVoteResult {
    VoteGranted,
    VoteNotGranted { peer_term: Term },
    RetryableFailure,
    MalformedReply,
}

#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeer {
    pub(crate) descriptor: AppendEntriesReplyFromPeerDescriptor,
    pub(crate) result: Result<(), AppendEntriesReplyFromPeerError>,
}

// This is basically info about the original request
#[derive(Debug)]
pub(crate) struct AppendEntriesReplyFromPeerDescriptor {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) seq_no: u64,
    pub(crate) previous_log_entry_index: Option<Index>,
    pub(crate) num_log_entries: usize,
}

#[derive(Debug)]
pub(crate) enum AppendEntriesReplyFromPeerError {
    PeerMissingPreviousLogEntry { next_index_hint: Option<Index> },
    RetryableFailure(String),
    StaleTerm { new_term: Term },
}

/// LeaderTimerTick contains info for a single tick of a leader's per-peer timer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct LeaderTimerTick {
    pub(crate) peer_id: ReplicaId,
    pub(crate) term: Term,
}

/// FollowerTimeoutTick identifies the timer that fired and how many times it had been reset at
/// that moment. If either has changed by the time the actor handles the tick, the tick is stale.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FollowerTimeoutTick {
    pub(crate) timer_id: u64,
    pub(crate) reset_seq: u64,
}

/// AppliedEntry is reported by the state machine applier after it has applied a committed entry.
/// No-op entries are never given to the state machine, so they have no output.
#[derive(Debug)]
pub(crate) struct AppliedEntry {
    pub(crate) index: Index,
    pub(crate) output: Option<StateMachineOutput>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ReplicaRole {
    Leader,
    Candidate,
    Follower,
}

#[derive(Debug, Clone)]
pub(crate) struct ReplicaStatus {
    pub(crate) replica_id: ReplicaId,
    pub(crate) term: Term,
    pub(crate) role: ReplicaRole,
    pub(crate) leader_id: Option<ReplicaId>,
    pub(crate) commit_index: Option<Index>,
    pub(crate) last_applied_index: Option<Index>,
    pub(crate) last_log_index: Option<Index>,
    pub(crate) retry_cache_size: usize,
}
