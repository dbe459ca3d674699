use crate::actor::WeakActorClient;
use crate::api::StateMachineOutput;
use crate::commitlog::{Index, Log};
use crate::grpc::{
    proto_append_entries_error, proto_append_entries_result, proto_request_vote_error, proto_request_vote_result,
    proto_timeout_now_error, proto_timeout_now_result, ProtoAppendEntriesReq, ProtoAppendEntriesResult,
    ProtoLogEntry, ProtoRequestVoteReq, ProtoTimeoutNowReq,
};
use crate::replica::election::{CurrentLeader, ElectionState, PeerStateUpdate};
use crate::replica::local_state::{PersistentLocalState, Term};
use crate::replica::peer_client::PeerClient;
use crate::replica::peers::{ClusterTracker, Peer, ReplicaId};
use crate::replica::replica_api::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, AppendEntriesReplyFromPeer,
    AppendEntriesReplyFromPeerDescriptor, AppendEntriesReplyFromPeerError, AppliedEntry, ClientRequestError,
    ClientRequestInput, ClientRequestOutput, FollowerTimeoutTick, LeaderRedirectInfo, LeaderTimerTick,
    ReplicaRole, ReplicaStatus, ReplicationLevel, RequestVoteError, RequestVoteInput, RequestVoteOutput,
    RequestVoteReplyFromPeer, RequestVoteResult, TermOutOfDateInfo, TimeoutNowError, TimeoutNowInput,
    TransferLeadershipError, TransferLeadershipOutput,
};
use crate::replica::retry_cache::{ClientRequestCallback, Expiry, RetryCache, RetryCacheKey, RetryCacheLookup};
use crate::replica::write_ahead_log::{CommandEntry, EntryPayload, WriteAheadLog, WriteAheadLogEntry};
use crate::server::{RpcServerShutdownHandle, ShutdownCause};
use std::collections::{BTreeMap, HashSet};
use std::{cmp, io};
use tokio::time::error::Elapsed;
use tokio::time::Duration;
use tonic::Status;

pub(super) struct ReplicaConfig<L>
where
    L: Log<WriteAheadLogEntry>,
{
    pub(super) logger: slog::Logger,
    pub(super) cluster_tracker: ClusterTracker,
    pub(super) local_state: Box<dyn PersistentLocalState + Send>,
    pub(super) election_state: ElectionState,
    pub(super) write_ahead_log: WriteAheadLog<L>,
    pub(super) applied_checkpoint: Option<Index>,
    pub(super) actor_client: WeakActorClient,
    pub(super) server_shutdown_handle: RpcServerShutdownHandle,
    pub(super) leader_heartbeat_duration: Duration,
    pub(super) peer_rpc_timeout: Duration,
    pub(super) retry_cache_expiry: Duration,
    pub(super) max_entries_per_append_entries: usize,
}

/// A fault after which the replica can't safely keep going. The actor stops when it sees one.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ReplicaFault {
    #[error("log store IO failure while {action}: {source}")]
    LogIo { action: &'static str, source: io::Error },
}

/// A client request whose entry is in the log but not yet applied. Leader only.
#[derive(Debug)]
struct PendingRequest {
    key: RetryCacheKey,
    term: Term,
    replication_level: ReplicationLevel,
}

pub(crate) struct Replica<L>
where
    L: Log<WriteAheadLogEntry>,
{
    logger: slog::Logger,
    my_replica_id: ReplicaId,
    cluster_tracker: ClusterTracker,
    local_state: Box<dyn PersistentLocalState + Send>,
    election_state: ElectionState,
    write_ahead_log: WriteAheadLog<L>,
    retry_cache: RetryCache,
    // Leader bookkeeping, cleared when leadership is lost.
    pending_requests: BTreeMap<Index, PendingRequest>,
    held_replies: BTreeMap<Index, (RetryCacheKey, ClientRequestOutput)>,
    last_applied_index: Option<Index>,
    fault: Option<ReplicaFault>,
    actor_client: WeakActorClient,
    leader_heartbeat_duration: Duration,
    peer_rpc_timeout: Duration,
    max_entries_per_append_entries: usize,
    // Server shuts down when the replica is dropped.
    server_shutdown_handle: RpcServerShutdownHandle,
}

impl<L> Replica<L>
where
    L: Log<WriteAheadLogEntry> + 'static,
{
    pub(super) fn new(config: ReplicaConfig<L>) -> Self {
        Replica {
            logger: config.logger,
            my_replica_id: config.cluster_tracker.my_replica_id().clone(),
            cluster_tracker: config.cluster_tracker,
            local_state: config.local_state,
            election_state: config.election_state,
            write_ahead_log: config.write_ahead_log,
            retry_cache: RetryCache::new(config.retry_cache_expiry),
            pending_requests: BTreeMap::new(),
            held_replies: BTreeMap::new(),
            last_applied_index: config.applied_checkpoint,
            fault: None,
            actor_client: config.actor_client,
            leader_heartbeat_duration: config.leader_heartbeat_duration,
            peer_rpc_timeout: config.peer_rpc_timeout,
            max_entries_per_append_entries: config.max_entries_per_append_entries,
            server_shutdown_handle: config.server_shutdown_handle,
        }
    }

    pub(crate) fn take_fault(&mut self) -> Option<ReplicaFault> {
        self.fault.take()
    }

    /// Stops serving RPCs right away instead of when the replica is dropped.
    pub(crate) fn shut_down_server(&mut self, cause: ShutdownCause) {
        self.server_shutdown_handle.shut_down(cause);
    }

    pub(crate) fn status(&self) -> ReplicaStatus {
        let leader_id = match self.election_state.current_leader() {
            CurrentLeader::Me => Some(self.my_replica_id.clone()),
            CurrentLeader::Other(leader) => Some(leader.replica_id),
            CurrentLeader::Unknown => None,
        };

        ReplicaStatus {
            replica_id: self.my_replica_id.clone(),
            term: self.local_state.current_term(),
            role: self.election_state.role(),
            leader_id,
            commit_index: self.write_ahead_log.commit_index(),
            last_applied_index: self.last_applied_index,
            last_log_index: self.write_ahead_log.latest_index(),
            retry_cache_size: self.retry_cache.len(),
        }
    }

    // ------- Client requests --------

    pub(crate) fn handle_client_request(&mut self, input: ClientRequestInput, callback: ClientRequestCallback) {
        match self.election_state.current_leader() {
            CurrentLeader::Me => { /* carry on */ }
            CurrentLeader::Other(leader) => return callback.send(Err(ClientRequestError::NotLeader(Some(leader)))),
            CurrentLeader::Unknown => return callback.send(Err(ClientRequestError::NotLeader(None))),
        }

        let key = RetryCacheKey {
            client_id: input.client_id,
            call_id: input.call_id,
        };
        match self.retry_cache.get_or_create(key, Some(callback)) {
            RetryCacheLookup::Created => { /* carry on */ }
            lookup => {
                slog::debug!(self.logger, "Duplicate client call {:?}: {:?}", key, lookup);
                return;
            }
        }

        // > If command received from client: append entry to local log,
        // > respond after entry applied to state machine (§5.3)
        let term = self.local_state.current_term();
        let new_entry = WriteAheadLogEntry {
            term,
            payload: EntryPayload::Command(CommandEntry {
                client_id: input.client_id,
                call_id: input.call_id,
                data: input.data,
            }),
        };
        let appended_index = match self.write_ahead_log.append(new_entry) {
            Ok(index) => index,
            Err(e) => {
                let e = self.record_fault("appending client command", e);
                self.retry_cache
                    .fail(key, || ClientRequestError::LocalIoError(io::Error::new(e.kind(), e.to_string())));
                return;
            }
        };
        slog::debug!(self.logger, "Appended client call {:?} at {:?}", key, appended_index);

        self.pending_requests.insert(
            appended_index,
            PendingRequest {
                key,
                term,
                replication_level: input.replication_level,
            },
        );

        // No need to wait for the next heartbeat.
        self.replicate_to_idle_peers(term);
        // Single member cluster commits right away.
        self.advance_leader_commit_index();
    }

    pub(crate) fn retry_cache_get_or_create(&mut self, key: RetryCacheKey) -> RetryCacheLookup {
        self.retry_cache.get_or_create(key, None)
    }

    pub(crate) async fn next_expired_retry_cache_key(&mut self) -> RetryCacheKey {
        self.retry_cache.next_expired().await
    }

    pub(crate) fn handle_retry_cache_expiry(&mut self, key: RetryCacheKey) {
        match self.retry_cache.expire(key) {
            Expiry::Removed(lifetime) => {
                slog::debug!(self.logger, "Retry cache entry {:?} expired after {:?}", key, lifetime)
            }
            Expiry::Rearmed => slog::debug!(self.logger, "Retry cache entry {:?} still waits for replicas", key),
            Expiry::Missing => {}
        }
    }

    pub(crate) fn handle_entry_applied(&mut self, applied: AppliedEntry) {
        self.last_applied_index = cmp::max(self.last_applied_index, Some(applied.index));

        let pending = match self.pending_requests.remove(&applied.index) {
            Some(pending) => pending,
            // Follower, no-op entry, or an entry from before we became leader.
            None => return,
        };

        let output = ClientRequestOutput {
            entry_term: pending.term,
            entry_index: applied.index,
            state_machine_output: applied.output.unwrap_or(StateMachineOutput::NoData),
        };

        match pending.replication_level {
            ReplicationLevel::Majority => {
                self.retry_cache.complete(pending.key, output);
            }
            ReplicationLevel::All => {
                // Applied, so a retry must wait for this reply instead of running it again.
                self.retry_cache.hold(pending.key);
                self.held_replies.insert(applied.index, (pending.key, output));
                self.release_held_replies();
            }
        }
    }

    /// Replies to ALL-level requests once every peer has stored their entry.
    fn release_held_replies(&mut self) {
        let leader_state = match self.election_state.leader_state() {
            Some(leader_state) => leader_state,
            None => return,
        };

        // If every peer stored index N, they stored every index before it too.
        let ready: Vec<Index> = self
            .held_replies
            .keys()
            .take_while(|index| leader_state.all_peers_matched(**index))
            .cloned()
            .collect();

        for index in ready {
            if let Some((key, output)) = self.held_replies.remove(&index) {
                self.retry_cache.complete(key, output);
            }
        }
    }

    // ------- RequestVote --------

    pub(crate) fn server_handle_request_vote(
        &mut self,
        input: RequestVoteInput,
    ) -> Result<RequestVoteOutput, RequestVoteError> {
        // Ensure candidate is known member.
        if !self.cluster_tracker.contains_member(&input.candidate_id) {
            return Err(RequestVoteError::CandidateNotInCluster);
        }

        // Read our local term/vote state as 1 atomic action.
        let (current_term, mut opt_voted_for) = self.local_state.voted_for_current_term();

        // 1. Reply false if term < currentTerm (§5.1)
        if input.candidate_term < current_term {
            slog::info!(self.logger, "Not granting vote. Client term is out of date.");
            return Err(RequestVoteError::RequestTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        if self.local_state.store_term_if_increased(input.candidate_term) {
            self.become_follower(None);
            slog::info!(
                self.logger,
                "Observed increased term {:?} in RequestVote call. Election state: {:?}",
                input.candidate_term,
                self.election_state
            );
            // New term, so we haven't voted yet.
            opt_voted_for = None;
        }
        let not_granted = Ok(RequestVoteOutput {
            vote_granted: false,
            current_term: input.candidate_term,
        });

        // 2. If votedFor is null or candidateId, and candidate’s log is at
        // least as up-to-date as receiver’s log, grant vote (§5.2, §5.4).
        if let Some(voted_for) = opt_voted_for {
            if *voted_for != input.candidate_id {
                slog::info!(self.logger, "Not granting vote. We already voted for {:?}.", voted_for);
                return not_granted;
            }
        }

        if !Self::is_candidate_log_gte_mine(self.write_ahead_log.latest_entry(), input.candidate_last_log_entry) {
            slog::info!(self.logger, "Not granting vote. Candidate log is out of date.");
            return not_granted;
        }

        let granted = self
            .local_state
            .store_vote_for_term_if_unvoted(input.candidate_term, input.candidate_id.clone())
            || matches!(
                self.local_state.voted_for_current_term(),
                (term, Some(voted_for)) if term == input.candidate_term && *voted_for == input.candidate_id
            );
        if !granted {
            slog::info!(self.logger, "Not granting vote. Lost race to persist vote.");
            return not_granted;
        }

        slog::info!(self.logger, "Voting for {:?} in term {:?}.", input.candidate_id, input.candidate_term);
        // Granting a vote counts as hearing from a viable leader.
        self.election_state.reset_timeout_if_follower();

        Ok(RequestVoteOutput {
            vote_granted: true,
            current_term: input.candidate_term,
        })
    }

    fn is_candidate_log_gte_mine(
        my_last_entry: Option<(Term, Index)>,
        candidate_last_entry: Option<(Term, Index)>,
    ) -> bool {
        // > If the logs have last entries with different terms, then
        // > the log with the later term is more up-to-date. If the logs
        // > end with the same term, then whichever log is longer is
        // > more up-to-date.
        // Tuples compare term first then index, and an empty log (None) is the least up to date.
        candidate_last_entry >= my_last_entry
    }

    pub(crate) fn handle_request_vote_reply_from_peer(&mut self, reply: RequestVoteReplyFromPeer) {
        if let RequestVoteResult::VoteNotGranted { peer_term } = reply.result {
            if self.local_state.store_term_if_increased(peer_term) {
                slog::info!(
                    self.logger,
                    "Peer {:?} has higher term {:?}. Abandoning candidacy.",
                    reply.peer_id,
                    peer_term
                );
                self.become_follower(None);
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.term {
            slog::info!(
                self.logger,
                "Received vote for outdated term {:?}, current term: {:?}.",
                reply.term,
                current_term,
            );
            return;
        }

        match reply.result {
            RequestVoteResult::VoteGranted => {
                let num_votes_received = match self.election_state.add_vote_if_candidate(reply.peer_id) {
                    Some(v) => v,
                    None => {
                        slog::info!(
                            self.logger,
                            "Received vote for term {:?} after transitioning to election state: {:?}",
                            reply.term,
                            self.election_state,
                        );
                        return;
                    }
                };

                let num_voting_replicas = self.cluster_tracker.num_voting_replicas();
                slog::info!(
                    self.logger,
                    "Received {}/{} votes for term {:?}",
                    num_votes_received,
                    num_voting_replicas,
                    reply.term,
                );

                if num_votes_received >= Self::get_majority_count(num_voting_replicas) {
                    self.become_leader(reply.term);
                }
            }
            RequestVoteResult::VoteNotGranted { .. } => {
                slog::info!(
                    self.logger,
                    "Vote not granted from {:?} for term {:?}",
                    reply.peer_id,
                    reply.term,
                );
            }
            RequestVoteResult::RetryableFailure | RequestVoteResult::MalformedReply => {
                if !self.election_state.is_candidate() {
                    return;
                }
                match self.cluster_tracker.peer(&reply.peer_id) {
                    Some(peer) => self.spawn_request_vote(peer.clone(), reply.term, Some(self.leader_heartbeat_duration)),
                    None => slog::error!(
                        self.logger,
                        "Peer {:?} not found while retrying RequestVote. Wtf!",
                        reply.peer_id
                    ),
                }
            }
        }
    }

    fn get_majority_count(num_voting_replicas: usize) -> usize {
        (num_voting_replicas / 2) + 1
    }

    // ------- Election timeouts --------

    pub(crate) fn handle_follower_timeout(&mut self, tick: FollowerTimeoutTick) {
        if !self.election_state.is_current_timeout(&tick) {
            slog::debug!(self.logger, "Ignoring stale follower timeout {:?}", tick);
            return;
        }

        self.start_election();
    }

    fn start_election(&mut self) {
        // Write-ahead log style: Vote for self on local state before transitioning to candidate.
        let new_term = self.local_state.increment_term_and_vote_for_self();
        self.election_state.transition_to_candidate_and_vote_for_self();
        slog::info!(
            self.logger,
            "Starting election for term {:?}. Election state: {:?}",
            new_term,
            self.election_state,
        );

        if Self::get_majority_count(self.cluster_tracker.num_voting_replicas()) <= 1 {
            self.become_leader(new_term);
            return;
        }

        let peers: Vec<Peer> = self.cluster_tracker.iter_peers().cloned().collect();
        for peer in peers {
            self.spawn_request_vote(peer, new_term, None);
        }
    }

    fn spawn_request_vote(&self, peer: Peer, term: Term, delay: Option<Duration>) {
        tokio::task::spawn(Self::call_peer_request_vote(
            self.logger.new(slog::o!("Peer" => peer.metadata.replica_id().as_str().to_string())),
            peer.client,
            peer.metadata.replica_id().clone(),
            self.new_request_vote_request(term),
            self.peer_rpc_timeout,
            delay,
            self.actor_client.clone(),
            term,
        ));
    }

    fn new_request_vote_request(&self, term: Term) -> ProtoRequestVoteReq {
        let (last_log_entry_term, last_log_entry_index) = match self.write_ahead_log.latest_entry() {
            None => (0, 0),
            Some((term, index)) => (term.as_u64(), index.as_u64()),
        };

        ProtoRequestVoteReq {
            client_node_id: self.my_replica_id.as_str().to_string(),
            term: term.as_u64(),
            last_log_entry_index,
            last_log_entry_term,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_peer_request_vote(
        logger: slog::Logger,
        mut peer_client: PeerClient,
        peer_id: ReplicaId,
        rpc_request: ProtoRequestVoteReq,
        rpc_timeout: Duration,
        delay: Option<Duration>,
        callback: WeakActorClient,
        term: Term,
    ) {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        slog::debug!(logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.request_vote(rpc_request)).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        let callback_result = match rpc_reply {
            Ok(Ok(rpc_result)) => match rpc_result.result {
                Some(proto_request_vote_result::Result::Ok(success_reply)) => {
                    if success_reply.vote_granted {
                        RequestVoteResult::VoteGranted
                    } else {
                        RequestVoteResult::VoteNotGranted {
                            peer_term: Term::new(success_reply.current_term),
                        }
                    }
                }
                Some(proto_request_vote_result::Result::Err(err)) => match err.err {
                    Some(proto_request_vote_error::Err::ServerFault(fault)) => {
                        slog::warn!(logger, "RequestVote Service Fault: {:?}", fault.message);
                        RequestVoteResult::RetryableFailure
                    }
                    None => RequestVoteResult::MalformedReply,
                },
                None => RequestVoteResult::MalformedReply,
            },
            Ok(Err(rpc_status)) => {
                slog::warn!(logger, "Un-modeled failure from RequestVote RPC call: {:?}", rpc_status);
                RequestVoteResult::RetryableFailure
            }
            Err(_timeout) => RequestVoteResult::RetryableFailure,
        };

        let callback_input = RequestVoteReplyFromPeer {
            peer_id,
            term,
            result: callback_result,
        };

        let _ = callback.notify_request_vote_reply_from_peer(callback_input).await;
    }

    fn become_leader(&mut self, term: Term) {
        // Peers start out right after our last entry, so the first AppendEntries carries the no-op.
        self.election_state.transition_to_leader(
            term,
            self.cluster_tracker.peer_ids(),
            self.write_ahead_log.latest_index(),
        );
        slog::info!(self.logger, "Became leader for term {:?}.", term);

        // Entries from earlier terms only commit indirectly, once an entry from our own term
        // commits. Don't make them wait for a client.
        let no_op = WriteAheadLogEntry {
            term,
            payload: EntryPayload::NoOp,
        };
        if let Err(e) = self.write_ahead_log.append(no_op) {
            self.record_fault("appending leader no-op", e);
            return;
        }

        self.advance_leader_commit_index();
    }

    fn become_follower(&mut self, leader: Option<LeaderRedirectInfo>) {
        if self.election_state.role() == ReplicaRole::Leader {
            slog::info!(
                self.logger,
                "Lost leadership. Failing {} pending client calls.",
                self.retry_cache.len()
            );
            self.pending_requests.clear();
            self.held_replies.clear();
            self.retry_cache.clear(|| ClientRequestError::LeadershipLost);
        }

        self.election_state.transition_to_follower(leader);
    }

    // ------- TimeoutNow / leadership transfer --------

    pub(crate) fn server_handle_timeout_now(&mut self, input: TimeoutNowInput) -> Result<(), TimeoutNowError> {
        if !self.cluster_tracker.contains_member(&input.leader_id) {
            return Err(TimeoutNowError::ClientNotInCluster);
        }

        let current_term = self.local_state.current_term();
        if input.leader_term < current_term {
            return Err(TimeoutNowError::ClientTermOutOfDate(TermOutOfDateInfo { current_term }));
        }
        if self.local_state.store_term_if_increased(input.leader_term) {
            self.become_follower(None);
        }
        if self.election_state.role() == ReplicaRole::Leader {
            slog::warn!(self.logger, "Ignoring TimeoutNow from {:?}, we are leader.", input.leader_id);
            return Ok(());
        }

        slog::info!(self.logger, "Leader {:?} asked us to take over.", input.leader_id);
        self.start_election();
        Ok(())
    }

    pub(crate) fn handle_transfer_leadership(&mut self) -> Result<TransferLeadershipOutput, TransferLeadershipError> {
        let leader_state = match self.election_state.current_leader() {
            CurrentLeader::Me => match self.election_state.leader_state() {
                Some(leader_state) => leader_state,
                None => return Err(TransferLeadershipError::NotLeader(None)),
            },
            CurrentLeader::Other(leader) => return Err(TransferLeadershipError::NotLeader(Some(leader))),
            CurrentLeader::Unknown => return Err(TransferLeadershipError::NotLeader(None)),
        };

        let new_leader_candidate = leader_state
            .most_caught_up_peer()
            .ok_or(TransferLeadershipError::NoPeers)?;
        let peer = self
            .cluster_tracker
            .peer(&new_leader_candidate)
            .cloned()
            .ok_or(TransferLeadershipError::NoPeers)?;

        let term = self.local_state.current_term();
        slog::info!(
            self.logger,
            "Transferring leadership of term {:?} to {:?}.",
            term,
            new_leader_candidate
        );
        tokio::task::spawn(Self::call_peer_timeout_now(
            self.logger.new(slog::o!("Peer" => new_leader_candidate.as_str().to_string())),
            peer.client,
            ProtoTimeoutNowReq {
                client_node_id: self.my_replica_id.as_str().to_string(),
                term: term.as_u64(),
            },
            self.peer_rpc_timeout,
        ));

        // Stop accepting writes right away. Whoever wins the next election takes over.
        self.become_follower(None);

        Ok(TransferLeadershipOutput { new_leader_candidate })
    }

    async fn call_peer_timeout_now(
        logger: slog::Logger,
        mut peer_client: PeerClient,
        rpc_request: ProtoTimeoutNowReq,
        rpc_timeout: Duration,
    ) {
        slog::debug!(logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.timeout_now(rpc_request)).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply {
            Ok(Ok(rpc_result)) => match rpc_result.result {
                Some(proto_timeout_now_result::Result::Ok(_)) => {}
                Some(proto_timeout_now_result::Result::Err(err)) => match err.err {
                    Some(proto_timeout_now_error::Err::StaleTerm(stale)) => slog::info!(
                        logger,
                        "Peer is already past our term, at {:?}",
                        stale.current_term
                    ),
                    other => slog::warn!(logger, "TimeoutNow rejected: {:?}", other),
                },
                None => slog::warn!(logger, "Malformed TimeoutNow result"),
            },
            // Followers time out on their own eventually.
            Ok(Err(rpc_status)) => slog::warn!(logger, "TimeoutNow RPC failed: {:?}", rpc_status),
            Err(_timeout) => slog::warn!(logger, "Timed out calling TimeoutNow"),
        }
    }

    // ------- AppendEntries (server side) --------

    pub(crate) fn server_handle_append_entries(
        &mut self,
        input: AppendEntriesInput,
    ) -> Result<AppendEntriesOutput, AppendEntriesError> {
        // Ensure leader is known member.
        let leader_info = match self.cluster_tracker.metadata(&input.leader_id) {
            Some(metadata) => LeaderRedirectInfo::from(metadata),
            None => return Err(AppendEntriesError::ClientNotInCluster),
        };

        // 1. Reply false if term < currentTerm (§5.1)
        let current_term = self.local_state.current_term();
        if input.leader_term < current_term {
            return Err(AppendEntriesError::ClientTermOutOfDate(TermOutOfDateInfo {
                current_term,
            }));
        }

        // > If RPC request or response contains term T > currentTerm:
        // > set currentTerm = T, convert to follower (§5.1)
        // A candidate that hears from a leader of its own term also steps down.
        let increased = self.local_state.store_term_if_increased(input.leader_term);
        match self.election_state.role() {
            ReplicaRole::Follower if !increased => self.election_state.set_leader_if_unknown(&leader_info),
            ReplicaRole::Leader if !increased => {
                slog::error!(
                    self.logger,
                    "{:?} claims to lead our term {:?}. Stepping down.",
                    input.leader_id,
                    current_term
                );
                self.become_follower(Some(leader_info));
            }
            _ => self.become_follower(Some(leader_info)),
        }
        self.election_state.reset_timeout_if_follower();

        // 2. Reply false if [my] log doesn't contain an entry at [leader's]
        // prevLogIndex whose term matches [leader's] prevLogTerm (§5.3)
        if let Some((leader_prev_entry_term, leader_prev_entry_index)) = input.leader_previous_log_entry {
            match self.write_ahead_log.read(leader_prev_entry_index) {
                Ok(Some(my_previous_log_entry)) if my_previous_log_entry.term == leader_prev_entry_term => {}
                Ok(Some(_)) => {
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry {
                        next_index_hint: leader_prev_entry_index,
                    })
                }
                Ok(None) => {
                    let after_my_log = self
                        .write_ahead_log
                        .latest_index()
                        .map(|i| i.plus(1))
                        .unwrap_or_else(Index::start_index);
                    return Err(AppendEntriesError::ServerMissingPreviousLogEntry {
                        next_index_hint: cmp::min(after_my_log, leader_prev_entry_index),
                    });
                }
                Err(e) => return Err(self.server_io_error("reading previous log entry", e)),
            };
        }

        // 3. If [my] existing entry conflicts with [leader's new entries]
        // (same index but different terms), delete [my] existing entry and
        // all that follow it (§5.3)
        // 4. Append any new entries not already in the log
        let previous_index_u64 = input.leader_previous_log_entry.map_or(0, |(_, index)| index.as_u64());
        let num_new_entries = input.new_entries.len();
        let mut next_entry_index = Index::new(previous_index_u64 + 1);
        let mut truncated = false;
        for new_entry in input.new_entries {
            if !truncated {
                let opt_existing_entry = match self.write_ahead_log.read(next_entry_index) {
                    Ok(opt_existing_entry) => opt_existing_entry,
                    Err(e) => return Err(self.server_io_error("reading log entry", e)),
                };

                if let Some(existing_entry) = opt_existing_entry {
                    if existing_entry.term == new_entry.term {
                        // 4. (already have it)
                        next_entry_index = next_entry_index.plus(1);
                        continue;
                    }

                    // 3. (delete)
                    if let Err(e) = self.write_ahead_log.truncate(next_entry_index) {
                        return Err(self.server_io_error("truncating log", e));
                    }
                }
                // Nothing after this point in our log anymore.
                truncated = true;
            }

            // 4. (append)
            let appended_index = match self.write_ahead_log.append(new_entry) {
                Ok(index) => index,
                Err(e) => return Err(self.server_io_error("appending log entry", e)),
            };
            assert_eq!(
                appended_index, next_entry_index,
                "Appended log entry to unexpected index."
            );

            next_entry_index = next_entry_index.plus(1);
        }

        // 5. If leaderCommit > commitIndex, set commitIndex = min(leaderCommit, index of last new entry)
        let index_of_last_new_entry = Index::from_u64(previous_index_u64 + num_new_entries as u64);
        if let (Some(leader_commit_index), Some(index_of_last_new_entry)) =
            (input.leader_commit_index, index_of_last_new_entry)
        {
            let new_commit_index = cmp::min(leader_commit_index, index_of_last_new_entry);
            let advanced = match self.write_ahead_log.ratchet_fwd_commit_index(new_commit_index) {
                Ok(advanced) => advanced,
                Err(e) => return Err(self.server_io_error("persisting commit index", e)),
            };
            if advanced {
                if let Err(e) = self.write_ahead_log.publish_committed_entries() {
                    return Err(self.server_io_error("publishing committed entries", e));
                }
            }
        }

        Ok(AppendEntriesOutput {})
    }

    fn server_io_error(&mut self, action: &'static str, e: io::Error) -> AppendEntriesError {
        AppendEntriesError::ServerIoError(self.record_fault(action, e))
    }

    /// Records a fatal local IO failure and returns a copy of the error for the caller.
    fn record_fault(&mut self, action: &'static str, e: io::Error) -> io::Error {
        slog::error!(self.logger, "Log store IO failure while {}: {:?}", action, e);
        let copy = io::Error::new(e.kind(), e.to_string());
        if self.fault.is_none() {
            self.fault = Some(ReplicaFault::LogIo { action, source: e });
        }
        copy
    }

    // ------- AppendEntries (leader side) --------

    pub(crate) fn handle_leader_timer(&mut self, input: LeaderTimerTick) {
        let current_term = self.local_state.current_term();
        if current_term != input.term {
            slog::warn!(
                self.logger,
                "Received leader heartbeat for outdated term {:?}, current term: {:?}",
                input.term,
                current_term
            );
            return;
        }

        self.replicate_to_peer(&input.peer_id, current_term);
    }

    fn replicate_to_idle_peers(&mut self, current_term: Term) {
        let peer_ids = match self.election_state.leader_state() {
            Some(leader_state) => leader_state.peer_ids(),
            None => HashSet::new(),
        };
        for peer_id in peer_ids {
            self.replicate_to_peer(&peer_id, current_term);
        }
    }

    fn replicate_to_peer(&mut self, peer_id: &ReplicaId, current_term: Term) {
        match self.try_replicate_to_peer(peer_id, current_term) {
            Ok(_) => {}
            Err(HandleLeaderTimerError::NoLongerLeader) => {
                slog::info!(self.logger, "Received leader timer event but no longer leader.")
            }
            Err(HandleLeaderTimerError::PeerConcurrencyThrottle) => {
                slog::debug!(self.logger, "Request to peer {:?} already outstanding", peer_id)
            }
            Err(HandleLeaderTimerError::DiskRead(index, e)) => {
                slog::error!(self.logger, "Failed to read log entry at index {:?}", index);
                self.record_fault("reading log for replication", e);
            }
            Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(index)) => {
                self.record_fault(
                    "reading log for replication",
                    io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("peer tracker points at missing log entry {:?}", index),
                    ),
                );
            }
            Err(HandleLeaderTimerError::UnknownPeer) => {
                slog::error!(self.logger, "Peer {:?} is missing from cluster or leader state", peer_id)
            }
        }
    }

    fn try_replicate_to_peer(&mut self, peer_id: &ReplicaId, current_term: Term) -> Result<(), HandleLeaderTimerError> {
        let peer = match self.cluster_tracker.peer(peer_id) {
            Some(peer) => peer.clone(),
            None => return Err(HandleLeaderTimerError::UnknownPeer),
        };
        let leader_state = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => return Err(HandleLeaderTimerError::NoLongerLeader),
        };
        let peer_state = match leader_state.peer_state_mut(peer_id) {
            Some(peer_state) => peer_state,
            None => return Err(HandleLeaderTimerError::UnknownPeer),
        };

        // One outstanding request per peer; no pipelining. Throughput comes from batching.
        if peer_state.has_outstanding_request() {
            return Err(HandleLeaderTimerError::PeerConcurrencyThrottle);
        }

        let (next_index, opt_previous_index) = peer_state.next_and_previous_log_index();
        let previous_log_entry = match opt_previous_index {
            None => None,
            Some(previous_index) => match self.write_ahead_log.read(previous_index) {
                Ok(Some(entry)) => Some((entry.term, previous_index)),
                Ok(None) => return Err(HandleLeaderTimerError::UnexpectedMissingLogEntry(previous_index)),
                Err(e) => return Err(HandleLeaderTimerError::DiskRead(previous_index, e)),
            },
        };
        let new_entries = self
            .write_ahead_log
            .read_range(next_index, self.max_entries_per_append_entries)
            .map_err(|e| HandleLeaderTimerError::DiskRead(next_index, e))?;

        // Only claim a seq no once nothing can fail anymore, or the peer would look busy forever.
        let seq_no = peer_state.next_seq_no();
        peer_state.reset_heartbeat_timer();

        let descriptor = AppendEntriesReplyFromPeerDescriptor {
            peer_id: peer_id.clone(),
            term: current_term,
            seq_no,
            previous_log_entry_index: opt_previous_index,
            num_log_entries: new_entries.len(),
        };
        let proto_request = build_append_entries_request(
            current_term,
            &self.my_replica_id,
            previous_log_entry,
            self.write_ahead_log.commit_index(),
            new_entries,
        );

        tokio::task::spawn(Self::call_peer_append_entries(
            self.logger
                .new(slog::o!("Peer" => peer_id.as_str().to_string(), "SeqNo" => seq_no)),
            peer.client,
            proto_request,
            self.peer_rpc_timeout,
            self.actor_client.clone(),
            descriptor,
        ));

        Ok(())
    }

    async fn call_peer_append_entries(
        logger: slog::Logger,
        mut peer_client: PeerClient,
        rpc_request: ProtoAppendEntriesReq,
        rpc_timeout: Duration,
        callback: WeakActorClient,
        descriptor: AppendEntriesReplyFromPeerDescriptor,
    ) {
        slog::debug!(logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = tokio::time::timeout(rpc_timeout, peer_client.append_entries(rpc_request)).await;
        slog::debug!(logger, "ClientWire - {:?}", rpc_reply);

        let callback_input = AppendEntriesReplyFromPeer {
            descriptor,
            result: Self::convert_append_entries_rpc_reply(rpc_reply),
        };

        let _ = callback.notify_append_entries_reply_from_peer(callback_input).await;
    }

    fn convert_append_entries_rpc_reply(
        rpc_reply: Result<Result<ProtoAppendEntriesResult, Status>, Elapsed>,
    ) -> Result<(), AppendEntriesReplyFromPeerError> {
        match rpc_reply {
            Ok(Ok(rpc_result)) => match rpc_result.result {
                Some(proto_append_entries_result::Result::Ok(_)) => Ok(()),
                Some(proto_append_entries_result::Result::Err(err)) => match err.err {
                    Some(proto_append_entries_error::Err::ServerFault(payload)) => Err(
                        AppendEntriesReplyFromPeerError::RetryableFailure(format!(
                            "Explicit server fault: {:?}",
                            payload.message
                        )),
                    ),
                    Some(proto_append_entries_error::Err::StaleTerm(payload)) => {
                        Err(AppendEntriesReplyFromPeerError::StaleTerm {
                            new_term: Term::new(payload.current_term),
                        })
                    }
                    Some(proto_append_entries_error::Err::MissingLog(payload)) => {
                        Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry {
                            next_index_hint: Index::from_u64(payload.next_index_hint),
                        })
                    }
                    Some(proto_append_entries_error::Err::ClientNotInCluster(_)) => {
                        // Retry in case peer is out of date. Not expecting this in practice.
                        Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                            "Peer doesn't think we're in the cluster. Wtf?".into(),
                        ))
                    }
                    None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                        "Malformed AppendEntries Err".into(),
                    )),
                },
                None => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                    "Malformed AppendEntries Result".into(),
                )),
            },
            Ok(Err(rpc_status)) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(format!(
                "Un-modeled failure from AppendEntries RPC call: {:?}",
                rpc_status
            ))),
            Err(_timeout) => Err(AppendEntriesReplyFromPeerError::RetryableFailure(
                "Timed out calling AppendEntries".into(),
            )),
        }
    }

    pub(crate) fn handle_append_entries_reply_from_peer(&mut self, reply: AppendEntriesReplyFromPeer) {
        let logger = self.logger.new(slog::o!(
            "Peer" => reply.descriptor.peer_id.as_str().to_string(),
            "SeqNo" => reply.descriptor.seq_no,
        ));
        slog::debug!(logger, "AE reply from peer result: {:?}", reply.result);

        // A higher term anywhere means we're done, whatever we were doing.
        if let Err(AppendEntriesReplyFromPeerError::StaleTerm { new_term }) = &reply.result {
            if self.local_state.store_term_if_increased(*new_term) {
                slog::info!(logger, "Rejected by peer because my term is stale. Stepping down.");
                self.become_follower(None);
                return;
            }
        }

        let current_term = self.local_state.current_term();
        if current_term != reply.descriptor.term {
            slog::info!(
                logger,
                "Received AE reply for outdated term {:?}, but we're on term {:?}",
                reply.descriptor.term,
                current_term
            );
            return;
        }

        let leader_state = match self.election_state.leader_state_mut() {
            Some(leader_state) => leader_state,
            None => {
                slog::info!(logger, "No longer leader");
                return;
            }
        };

        // 1. Classify the reply
        let peer_log_update = match reply.result {
            Err(AppendEntriesReplyFromPeerError::StaleTerm { .. }) => {
                slog::warn!(logger, "Peer sent StaleTerm without a higher term. Treating as generic failure.");
                PeerStateUpdate::OtherError
            }
            Err(AppendEntriesReplyFromPeerError::PeerMissingPreviousLogEntry { next_index_hint }) => {
                slog::info!(logger, "Peer is missing previous log entry. Hint: {:?}", next_index_hint);
                PeerStateUpdate::PeerLogBehind { next_index_hint }
            }
            Err(AppendEntriesReplyFromPeerError::RetryableFailure(err_msg)) => {
                // Next heartbeat retries.
                slog::warn!(logger, "AE failure: {}", err_msg);
                PeerStateUpdate::OtherError
            }
            Ok(_) => PeerStateUpdate::Success {
                previous_log_entry: reply.descriptor.previous_log_entry_index,
                num_entries_replicated: reply.descriptor.num_log_entries,
            },
        };
        let wants_follow_up = !matches!(peer_log_update, PeerStateUpdate::OtherError);

        // 2. Update peer log tracker
        let peer_state = match leader_state.peer_state_mut(&reply.descriptor.peer_id) {
            Some(peer_state) => peer_state,
            None => {
                slog::warn!(logger, "Peer not found while handling AE reply");
                return;
            }
        };
        if !peer_state.handle_append_entries_result(&logger, reply.descriptor.seq_no, peer_log_update) {
            return;
        }
        let (next_index, _) = peer_state.next_and_previous_log_index();

        // 3. Check for majority replication and apply new commits.
        self.advance_leader_commit_index();
        self.release_held_replies();

        // 4. Keep going while the peer is behind, instead of waiting for the next heartbeat.
        // > If last log index ≥ nextIndex for a follower: send
        // > AppendEntries RPC with log entries starting at nextIndex
        let peer_is_behind = matches!(self.write_ahead_log.latest_index(), Some(latest) if latest >= next_index);
        if wants_follow_up && peer_is_behind {
            self.replicate_to_peer(&reply.descriptor.peer_id, current_term);
        }
    }

    fn advance_leader_commit_index(&mut self) {
        let tentative_new_commit_index = match (self.election_state.leader_state(), self.write_ahead_log.latest_index()) {
            (Some(leader_state), Some(my_latest_index)) => {
                match Self::get_cluster_commit_index(my_latest_index, leader_state.peers_matched_indexes()) {
                    Some(index) => index,
                    None => return,
                }
            }
            _ => return,
        };

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let current_term = self.local_state.current_term();
        match self
            .write_ahead_log
            .ratchet_fwd_commit_index_if_valid(tentative_new_commit_index, current_term)
        {
            Ok(true) => {
                slog::debug!(self.logger, "Commit index is now {:?}", tentative_new_commit_index);
                if let Err(e) = self.write_ahead_log.publish_committed_entries() {
                    self.record_fault("publishing committed entries", e);
                }
            }
            Ok(false) => {}
            Err(e) => {
                self.record_fault("confirming new commit index", e);
            }
        }
    }

    /// Highest index stored by a majority of the cluster, leader included.
    fn get_cluster_commit_index(leader_latest_index: Index, peers_matched_indexes: Vec<Option<Index>>) -> Option<Index> {
        let mut matched_indexes = peers_matched_indexes;
        matched_indexes.push(Some(leader_latest_index));
        // Ascending, None first.
        matched_indexes.sort();

        // The k-th largest value is stored by at least k members. We need k = majority.
        let majority = Self::get_majority_count(matched_indexes.len());
        matched_indexes[matched_indexes.len() - majority]
    }
}

enum HandleLeaderTimerError {
    NoLongerLeader,
    PeerConcurrencyThrottle,
    DiskRead(Index, io::Error),
    UnexpectedMissingLogEntry(Index),
    UnknownPeer,
}

fn build_append_entries_request(
    current_term: Term,
    my_id: &ReplicaId,
    previous_log_entry_metadata: Option<(Term, Index)>,
    commit_index: Option<Index>,
    new_entries: Vec<WriteAheadLogEntry>,
) -> ProtoAppendEntriesReq {
    let (previous_log_entry_term, previous_log_entry_index) = match previous_log_entry_metadata {
        None => (0, 0),
        Some((term, idx)) => (term.as_u64(), idx.as_u64()),
    };

    ProtoAppendEntriesReq {
        client_node_id: my_id.as_str().to_string(),
        term: current_term.as_u64(),
        commit_index: commit_index.map_or(0, |ci| ci.as_u64()),
        previous_log_entry_term,
        previous_log_entry_index,
        new_entries: new_entries.into_iter().map(ProtoLogEntry::from).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::commitlog::InMemoryLog;
    use crate::replica::{
        create_replica, CommitStream, LocalStateStore, ReplicaMetadata, ReplicaOptions, ReplicaStorage,
    };
    use crate::server::{shutdown_signal, RpcServerShutdownSignal};
    use bytes::Bytes;
    use std::net::Ipv4Addr;

    type Repl = Replica<InMemoryLog<WriteAheadLogEntry>>;

    /// A replica "me" in a cluster with "a" and "b". Nothing listens at the peers' addresses, and
    /// the actor queue is gone, so timers and peer RPCs go nowhere. Tests drive the handlers.
    struct Fixture {
        replica: Repl,
        _commit_stream: CommitStream,
        _shutdown_signal: RpcServerShutdownSignal,
    }

    fn fixture() -> Fixture {
        let members = ["me", "a", "b"]
            .iter()
            .enumerate()
            .map(|(i, id)| ReplicaMetadata::new(ReplicaId::new(*id), Ipv4Addr::LOCALHOST, 1 + i as u16))
            .collect();
        let (actor_client, _rx) = ActorClient::new(10);
        let (shutdown_handle, shutdown_signal) = shutdown_signal();

        let (replica, commit_stream, _listener) = create_replica(
            slog::Logger::root(slog::Discard, slog::o!()),
            ReplicaId::new("me"),
            members,
            ReplicaStorage {
                log: InMemoryLog::create(),
                local_state: LocalStateStore::default(),
                applied_checkpoint: None,
            },
            ReplicaOptions {
                leader_heartbeat_duration: Duration::from_secs(10),
                follower_min_timeout: Duration::from_secs(30),
                follower_max_timeout: Duration::from_secs(60),
                peer_rpc_timeout: Duration::from_millis(100),
                retry_cache_expiry: Duration::from_secs(30),
                max_entries_per_append_entries: 16,
            },
            shutdown_handle,
            actor_client.weak(),
        )
        .unwrap();

        Fixture {
            replica,
            _commit_stream: commit_stream,
            _shutdown_signal: shutdown_signal,
        }
    }

    fn vote_request(candidate: &str, term: u64, last_entry: Option<(u64, u64)>) -> RequestVoteInput {
        RequestVoteInput {
            candidate_term: Term::new(term),
            candidate_id: ReplicaId::new(candidate),
            candidate_last_log_entry: last_entry.map(|(t, i)| (Term::new(t), Index::new(i))),
        }
    }

    fn append_request(
        leader: &str,
        term: u64,
        previous_entry: Option<(u64, u64)>,
        commit_index: u64,
        new_entries: Vec<WriteAheadLogEntry>,
    ) -> AppendEntriesInput {
        AppendEntriesInput {
            leader_term: Term::new(term),
            leader_id: ReplicaId::new(leader),
            leader_previous_log_entry: previous_entry.map(|(t, i)| (Term::new(t), Index::new(i))),
            leader_commit_index: Index::from_u64(commit_index),
            new_entries,
        }
    }

    fn command(term: u64, data: &'static str) -> WriteAheadLogEntry {
        WriteAheadLogEntry {
            term: Term::new(term),
            payload: EntryPayload::Command(CommandEntry {
                client_id: 1,
                call_id: 1,
                data: Bytes::from_static(data.as_bytes()),
            }),
        }
    }

    fn log_contents(replica: &Repl) -> Vec<WriteAheadLogEntry> {
        replica.write_ahead_log.read_range(Index::start_index(), 100).unwrap()
    }

    fn granted(result: Result<RequestVoteOutput, RequestVoteError>) -> bool {
        result.unwrap().vote_granted
    }

    #[tokio::test]
    async fn one_vote_per_term() {
        let mut replica = fixture().replica;

        assert!(granted(replica.server_handle_request_vote(vote_request("a", 1, None))));
        // Asking again is fine, a second candidate is not.
        assert!(granted(replica.server_handle_request_vote(vote_request("a", 1, None))));
        assert!(!granted(replica.server_handle_request_vote(vote_request("b", 1, None))));

        // Next term, fresh vote.
        assert!(granted(replica.server_handle_request_vote(vote_request("b", 2, None))));
        assert_eq!(replica.local_state.current_term(), Term::new(2));
    }

    #[tokio::test]
    async fn stale_vote_request_is_rejected() {
        let mut replica = fixture().replica;
        replica
            .server_handle_append_entries(append_request("a", 5, None, 0, vec![]))
            .unwrap();

        match replica.server_handle_request_vote(vote_request("b", 3, None)) {
            Err(RequestVoteError::RequestTermOutOfDate(info)) => assert_eq!(info.current_term, Term::new(5)),
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(replica.local_state.current_term(), Term::new(5));
    }

    #[tokio::test]
    async fn candidate_with_older_log_is_refused() {
        let mut replica = fixture().replica;
        replica
            .server_handle_append_entries(append_request("a", 2, None, 0, vec![command(1, "x"), command(2, "y")]))
            .unwrap();

        assert!(!granted(replica.server_handle_request_vote(vote_request("b", 3, Some((1, 5))))));
        assert!(granted(replica.server_handle_request_vote(vote_request("b", 3, Some((2, 2))))));
    }

    #[tokio::test]
    async fn higher_term_vote_request_demotes_leader() {
        let mut replica = fixture().replica;
        replica.start_election();
        replica.become_leader(Term::new(1));
        assert_eq!(replica.election_state.role(), ReplicaRole::Leader);
        // The leader's no-op.
        assert_eq!(replica.write_ahead_log.latest_entry(), Some((Term::new(1), Index::new(1))));

        assert!(granted(replica.server_handle_request_vote(vote_request("a", 2, Some((1, 1))))));
        assert_eq!(replica.election_state.role(), ReplicaRole::Follower);
        assert_eq!(replica.local_state.current_term(), Term::new(2));
    }

    #[tokio::test]
    async fn conflicting_suffix_is_replaced() {
        let mut replica = fixture().replica;
        replica
            .server_handle_append_entries(append_request(
                "a",
                1,
                None,
                0,
                vec![command(1, "a1"), command(1, "a2"), command(1, "a3")],
            ))
            .unwrap();

        replica
            .server_handle_append_entries(append_request("b", 2, Some((1, 1)), 0, vec![command(2, "b2")]))
            .unwrap();

        assert_eq!(log_contents(&replica), vec![command(1, "a1"), command(2, "b2")]);

        // A repeated, already stored batch changes nothing.
        replica
            .server_handle_append_entries(append_request("b", 2, Some((1, 1)), 0, vec![command(2, "b2")]))
            .unwrap();
        assert_eq!(log_contents(&replica), vec![command(1, "a1"), command(2, "b2")]);
    }

    #[tokio::test]
    async fn candidate_steps_down_for_leader_of_same_term() {
        let mut replica = fixture().replica;
        replica.start_election();
        assert_eq!(replica.election_state.role(), ReplicaRole::Candidate);
        let term = replica.local_state.current_term();

        replica
            .server_handle_append_entries(append_request("a", term.as_u64(), None, 0, vec![]))
            .unwrap();

        assert_eq!(replica.election_state.role(), ReplicaRole::Follower);
        assert_eq!(replica.local_state.current_term(), term);
        match replica.election_state.current_leader() {
            CurrentLeader::Other(leader) => assert_eq!(leader.replica_id, ReplicaId::new("a")),
            other => panic!("Unexpected leader {:?}", other),
        }
    }

    #[tokio::test]
    async fn commit_index_is_capped_at_last_new_entry() {
        let mut replica = fixture().replica;

        replica
            .server_handle_append_entries(append_request("a", 1, None, 5, vec![command(1, "x"), command(1, "y")]))
            .unwrap();
        assert_eq!(replica.write_ahead_log.commit_index(), Some(Index::new(2)));

        // Leader knows more is committed, but we can't tell whether we hold it yet.
        replica
            .server_handle_append_entries(append_request("a", 1, Some((1, 1)), 5, vec![]))
            .unwrap();
        assert_eq!(replica.write_ahead_log.commit_index(), Some(Index::new(2)));

        replica
            .server_handle_append_entries(append_request("a", 1, Some((1, 2)), 3, vec![command(1, "z"), command(1, "w")]))
            .unwrap();
        assert_eq!(replica.write_ahead_log.commit_index(), Some(Index::new(3)));
    }

    #[tokio::test]
    async fn missing_previous_entry_returns_hint() {
        let mut replica = fixture().replica;

        match replica.server_handle_append_entries(append_request("a", 1, Some((1, 5)), 0, vec![])) {
            Err(AppendEntriesError::ServerMissingPreviousLogEntry { next_index_hint }) => {
                assert_eq!(next_index_hint, Index::new(1))
            }
            other => panic!("Unexpected result {:?}", other),
        }

        replica
            .server_handle_append_entries(append_request("a", 1, None, 0, vec![command(1, "x"), command(1, "y")]))
            .unwrap();
        match replica.server_handle_append_entries(append_request("a", 2, Some((2, 2)), 0, vec![command(2, "z")])) {
            Err(AppendEntriesError::ServerMissingPreviousLogEntry { next_index_hint }) => {
                assert_eq!(next_index_hint, Index::new(2))
            }
            other => panic!("Unexpected result {:?}", other),
        }
        assert_eq!(log_contents(&replica).len(), 2);
    }

    #[tokio::test]
    async fn stale_append_entries_is_rejected() {
        let mut replica = fixture().replica;
        replica
            .server_handle_append_entries(append_request("a", 3, None, 0, vec![]))
            .unwrap();

        match replica.server_handle_append_entries(append_request("b", 2, None, 0, vec![command(2, "x")])) {
            Err(AppendEntriesError::ClientTermOutOfDate(info)) => assert_eq!(info.current_term, Term::new(3)),
            other => panic!("Unexpected result {:?}", other),
        }
        assert!(log_contents(&replica).is_empty());
    }

    fn opt_index(v: u64) -> Option<Index> {
        Index::from_u64(v)
    }

    #[test]
    fn test_commit_checker_logic() {
        fn run(expected: u64, leader: u64, peers: Vec<u64>) {
            let peers = peers.into_iter().map(opt_index).collect();
            assert_eq!(
                opt_index(expected),
                Repl::get_cluster_commit_index(Index::new(leader), peers),
                "leader={} expected={}",
                leader,
                expected
            );
        }

        // 1-cluster
        run(5, 5, vec![]);

        // 2-cluster: both must have it
        run(0, 5, vec![0]);
        run(3, 5, vec![3]);

        // 3-cluster
        run(0, 9, vec![0, 0]);
        run(9, 9, vec![0, 9]);
        run(8, 9, vec![8, 0]);
        run(9, 9, vec![8, 9]);

        // 4-cluster
        run(0, 9, vec![0, 0, 0]);
        run(0, 9, vec![0, 0, 9]);
        run(8, 9, vec![0, 8, 9]);
        run(8, 9, vec![7, 8, 9]);

        // 5-cluster
        run(0, 9, vec![0, 0, 0, 0]);
        run(0, 9, vec![0, 0, 0, 9]);
        run(8, 9, vec![0, 0, 8, 9]);
        run(8, 9, vec![0, 7, 8, 9]);
        run(8, 9, vec![6, 7, 8, 9]);
        run(7, 9, vec![7, 7, 0, 0]);

        // Ordering doesn't matter
        run(8, 9, vec![6, 0, 8, 9]);
        run(7, 9, vec![0, 0, 7, 0, 8, 9]);
    }

    #[test]
    fn test_log_up_to_date_comparison() {
        let entry = |term: u64, index: u64| Some((Term::new(term), Index::new(index)));

        assert!(Repl::is_candidate_log_gte_mine(None, None));
        assert!(Repl::is_candidate_log_gte_mine(None, entry(1, 1)));
        assert!(!Repl::is_candidate_log_gte_mine(entry(1, 1), None));

        // Higher last term wins even with a shorter log.
        assert!(Repl::is_candidate_log_gte_mine(entry(2, 10), entry(3, 4)));
        assert!(!Repl::is_candidate_log_gte_mine(entry(3, 4), entry(2, 10)));

        // Same last term, longer (or equal) log wins.
        assert!(Repl::is_candidate_log_gte_mine(entry(3, 4), entry(3, 4)));
        assert!(Repl::is_candidate_log_gte_mine(entry(3, 4), entry(3, 5)));
        assert!(!Repl::is_candidate_log_gte_mine(entry(3, 5), entry(3, 4)));
    }
}
