use crate::api::options::{RaftClientOptions, RaftClientOptionsValidated};
use crate::api::state_machine::StateMachineOutput;
use crate::api::types::{RaftLeaderInfo, RaftMemberInfo, RaftReplicationLevel};
use crate::grpc::{
    proto_client_reply, proto_transfer_leadership_result, ProtoClientRequest, ProtoNotLeader, ProtoReplicationLevel,
};
use crate::replica::PeerClient;
use bytes::Bytes;
use std::convert::TryFrom;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tonic::Status;

pub struct RaftClientConfig {
    pub cluster_members: Vec<RaftMemberInfo>,
    pub info_logger: slog::Logger,
    pub options: RaftClientOptions,
}

/// RaftClient submits commands to a raft cluster. It finds the leader on its own, and retries
/// every call with the same (client ID, call ID) until it's answered, so the cluster executes each
/// call at most once however many attempts it took.
///
/// Clones share the client ID and the call ID sequence.
#[derive(Clone)]
pub struct RaftClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    logger: slog::Logger,
    client_id: u64,
    next_call_id: AtomicU64,
    members: Vec<ClusterMember>,
    // Index into `members` of who we currently think is leader.
    leader_guess: Mutex<usize>,
    options: RaftClientOptionsValidated,
}

struct ClusterMember {
    replica_id: String,
    client: PeerClient,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftClientReply {
    pub call_id: u64,
    pub output: StateMachineOutput,
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientError {
    #[error("Gave up after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    // Only for `send_async()`.
    #[error("Background task for call failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum RaftClientCreationError {
    #[error("Cluster has no members")]
    NoMembers,
    #[error("Illegal options for configuring client: {0}")]
    IllegalOptions(String),
    #[error("Can't create RPC client for member {replica_id}: {reason}")]
    InvalidMember { replica_id: String, reason: String },
}

/// One attempt against one member.
enum Attempt<T> {
    Done(T),
    NotLeader(Option<RaftLeaderInfo>),
    Failed(String),
}

/// A hint with a port we can't dial is as good as no hint.
fn leader_hint(not_leader: ProtoNotLeader) -> Option<RaftLeaderInfo> {
    not_leader.leader.and_then(|hint| RaftLeaderInfo::try_from(hint).ok())
}

impl RaftClient {
    pub fn new(config: RaftClientConfig) -> Result<Self, RaftClientCreationError> {
        if config.cluster_members.is_empty() {
            return Err(RaftClientCreationError::NoMembers);
        }
        let options = RaftClientOptionsValidated::try_from(config.options)
            .map_err(|e| RaftClientCreationError::IllegalOptions(e.to_string()))?;

        let mut members = Vec::with_capacity(config.cluster_members.len());
        for member in config.cluster_members {
            let client = PeerClient::new(member.ip_addr, member.raft_rpc_port).map_err(|e| {
                RaftClientCreationError::InvalidMember {
                    replica_id: member.replica_id.clone(),
                    reason: e.to_string(),
                }
            })?;
            members.push(ClusterMember {
                replica_id: member.replica_id,
                client,
            });
        }

        let client_id = rand::random::<u64>();
        let logger = config.info_logger.new(slog::o!("ClientId" => client_id));
        // Spread fresh clients over the cluster rather than all probing the first member.
        let leader_guess = rand::random::<usize>() % members.len();

        Ok(RaftClient {
            inner: Arc::new(ClientInner {
                logger,
                client_id,
                next_call_id: AtomicU64::new(1),
                members,
                leader_guess: Mutex::new(leader_guess),
                options,
            }),
        })
    }

    pub fn client_id(&self) -> u64 {
        self.inner.client_id
    }

    /// The call ID the next `send*()` call will use.
    pub fn peek_next_call_id(&self) -> u64 {
        self.inner.next_call_id.load(Ordering::SeqCst)
    }

    pub async fn send(&self, data: Bytes) -> Result<RaftClientReply, RaftClientError> {
        self.send_with_level(data, self.inner.options.default_replication_level)
            .await
    }

    pub async fn send_with_level(
        &self,
        data: Bytes,
        replication_level: RaftReplicationLevel,
    ) -> Result<RaftClientReply, RaftClientError> {
        let call_id = self.inner.take_call_id();
        self.inner.submit(call_id, data, replication_level).await
    }

    /// Like `send()`, but the call runs on its own task. The call ID is assigned right away, so calls
    /// are numbered in the order `send_async()` was called, though they may complete in any order.
    pub fn send_async(&self, data: Bytes) -> PendingReply {
        self.send_async_with_level(data, self.inner.options.default_replication_level)
    }

    pub fn send_async_with_level(&self, data: Bytes, replication_level: RaftReplicationLevel) -> PendingReply {
        let call_id = self.inner.take_call_id();
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.submit(call_id, data, replication_level).await });

        PendingReply { call_id, handle }
    }

    /// Asks the current leader to hand leadership to its most caught up peer. Returns the ID of the
    /// member that was asked to take over.
    pub async fn change_leader(&self) -> Result<String, RaftClientError> {
        let new_leader_candidate = self
            .inner
            .call_leader("TransferLeadership", |mut peer_client| async move {
                let reply = peer_client.transfer_leadership().await?;
                Ok::<_, Status>(match reply.result {
                    Some(proto_transfer_leadership_result::Result::Ok(ok)) => {
                        Attempt::Done(ok.new_leader_candidate_id)
                    }
                    Some(proto_transfer_leadership_result::Result::NotLeader(not_leader)) => {
                        Attempt::NotLeader(leader_hint(not_leader))
                    }
                    Some(proto_transfer_leadership_result::Result::ServerFault(fault)) => {
                        Attempt::Failed(fault.message)
                    }
                    None => Attempt::Failed("Malformed TransferLeadership reply".into()),
                })
            })
            .await?;

        self.inner.guess_leader(&new_leader_candidate);
        Ok(new_leader_candidate)
    }
}

impl ClientInner {
    fn take_call_id(&self) -> u64 {
        self.next_call_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn submit(
        &self,
        call_id: u64,
        data: Bytes,
        replication_level: RaftReplicationLevel,
    ) -> Result<RaftClientReply, RaftClientError> {
        let request = ProtoClientRequest {
            client_id: self.client_id,
            call_id,
            data: data.to_vec(),
            replication_level: ProtoReplicationLevel::from(replication_level) as i32,
        };

        let output = self
            .call_leader("ClientRequest", |mut peer_client| {
                let request = request.clone();
                async move {
                    let reply = peer_client.submit_client_request(request).await?;
                    Ok::<_, Status>(match reply.result {
                        Some(proto_client_reply::Result::Ok(ok)) if ok.has_data => {
                            Attempt::Done(StateMachineOutput::Data(Bytes::from(ok.data)))
                        }
                        Some(proto_client_reply::Result::Ok(_)) => Attempt::Done(StateMachineOutput::NoData),
                        Some(proto_client_reply::Result::Failure(failure)) => {
                            Attempt::Done(StateMachineOutput::Failure(failure.message))
                        }
                        Some(proto_client_reply::Result::NotLeader(not_leader)) => {
                            Attempt::NotLeader(leader_hint(not_leader))
                        }
                        Some(proto_client_reply::Result::ServerFault(fault)) => Attempt::Failed(fault.message),
                        None => Attempt::Failed("Malformed ClientRequest reply".into()),
                    })
                }
            })
            .await?;

        Ok(RaftClientReply { call_id, output })
    }

    /// Runs `attempt` against whoever we think is leader until it's done or we run out of attempts.
    async fn call_leader<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> Result<T, RaftClientError>
    where
        F: FnMut(PeerClient) -> Fut,
        Fut: Future<Output = Result<Attempt<T>, Status>>,
    {
        let mut last_error = String::new();
        let mut skipped_wait = false;

        for attempt_no in 1..=self.options.max_attempts {
            let member = self.current_leader_guess();
            let peer_client = self.members[member].client.clone();

            let outcome = match tokio::time::timeout(self.options.request_timeout, attempt(peer_client)).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(status)) => Attempt::Failed(format!("RPC failure: {}", status)),
                Err(_) => Attempt::Failed("Timed out".into()),
            };

            match outcome {
                Attempt::Done(output) => return Ok(output),
                Attempt::NotLeader(Some(leader)) => {
                    slog::debug!(
                        self.logger,
                        "{} attempt {} redirected to {}",
                        operation,
                        attempt_no,
                        leader.replica_id
                    );
                    last_error = format!("Redirected to {}", leader.replica_id);
                    if self.follow_redirect(member, &leader.replica_id) {
                        // Go straight to the new leader, at most once in a row.
                        if !skipped_wait {
                            skipped_wait = true;
                            continue;
                        }
                    } else {
                        self.probe_next_member(member);
                    }
                }
                Attempt::NotLeader(None) => {
                    last_error = format!("{} doesn't know who the leader is", self.members[member].replica_id);
                    self.probe_next_member(member);
                }
                Attempt::Failed(message) => {
                    slog::warn!(
                        self.logger,
                        "{} attempt {} to {} failed: {}",
                        operation,
                        attempt_no,
                        self.members[member].replica_id,
                        message
                    );
                    last_error = message;
                    self.probe_next_member(member);
                }
            }

            skipped_wait = false;
            tokio::time::sleep(self.options.retry_interval).await;
        }

        Err(RaftClientError::RetriesExhausted {
            attempts: self.options.max_attempts,
            last_error,
        })
    }

    fn current_leader_guess(&self) -> usize {
        *self.leader_guess.lock().expect("RaftClient mutex guard poison")
    }

    /// Returns false if the hint isn't useful: an unknown member, or the member that sent it.
    fn follow_redirect(&self, from_member: usize, leader_id: &str) -> bool {
        match self.members.iter().position(|m| m.replica_id == leader_id) {
            Some(leader) if leader != from_member => {
                *self.leader_guess.lock().expect("RaftClient mutex guard poison") = leader;
                true
            }
            _ => false,
        }
    }

    fn guess_leader(&self, leader_id: &str) {
        if let Some(leader) = self.members.iter().position(|m| m.replica_id == leader_id) {
            *self.leader_guess.lock().expect("RaftClient mutex guard poison") = leader;
        }
    }

    fn probe_next_member(&self, failed_member: usize) {
        let mut guess = self.leader_guess.lock().expect("RaftClient mutex guard poison");
        // Another call may have found the leader in the meantime.
        if *guess == failed_member {
            *guess = (failed_member + 1) % self.members.len();
        }
    }
}

/// PendingReply resolves to the reply of a call started with `send_async()`. The call keeps going
/// even if this is dropped.
pub struct PendingReply {
    call_id: u64,
    handle: JoinHandle<Result<RaftClientReply, RaftClientError>>,
}

impl PendingReply {
    pub fn call_id(&self) -> u64 {
        self.call_id
    }
}

impl Future for PendingReply {
    type Output = Result<RaftClientReply, RaftClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or_else(|e| Err(RaftClientError::TaskFailed(e.to_string()))))
    }
}
