use crate::actor::WeakActorClient;
use crate::api::StateMachineOutput;
use crate::commitlog::Index;
use crate::grpc::grpc_raft_server::{GrpcRaft, GrpcRaftServer};
use crate::grpc::{
    proto_append_entries_error, proto_append_entries_result, proto_client_reply, proto_request_vote_error,
    proto_request_vote_result, proto_timeout_now_error, proto_timeout_now_result, proto_transfer_leadership_result,
    ProtoAppendEntriesError, ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoAppendEntriesSuccess,
    ProtoClientNotInCluster, ProtoClientReply, ProtoClientReplyFailure, ProtoClientReplyOk, ProtoClientRequest,
    ProtoClientStaleTerm, ProtoLeaderHint, ProtoNotLeader, ProtoReplicationLevel, ProtoRequestVoteError,
    ProtoRequestVoteReq, ProtoRequestVoteResult, ProtoRequestVoteSuccess, ProtoServerFault,
    ProtoServerMissingPreviousLog, ProtoTimeoutNowError, ProtoTimeoutNowReq, ProtoTimeoutNowResult,
    ProtoTimeoutNowSuccess, ProtoTransferLeadershipReq, ProtoTransferLeadershipResult,
    ProtoTransferLeadershipSuccess,
};
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, ClientRequestError, ClientRequestInput,
    ClientRequestOutput, LeaderRedirectInfo, ReplicaId, ReplicationLevel, RequestVoteError, RequestVoteInput,
    RequestVoteOutput, Term, TimeoutNowError, TimeoutNowInput, TransferLeadershipError, TransferLeadershipOutput,
    WriteAheadLogEntry,
};
use crate::server::RpcServerShutdownSignal;
use bytes::Bytes;
use std::convert::TryFrom;
use std::net::SocketAddr;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer is the type that implements the Raft gRPC interface. It only converts between wire
/// and replica types; every decision is made by the replica actor.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RpcServer { logger, local_replica }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, shutdown_signal: RpcServerShutdownSignal) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let shutdown_logger = logger.clone();
        let shutdown = async move {
            let cause = shutdown_signal.await;
            slog::info!(shutdown_logger, "Shutting down server: {:?}", cause);
        };

        // TODO:2 if server port is unavailable, signal back to caller.
        let result = Server::builder()
            .add_service(GrpcRaftServer::new(self))
            .serve_with_shutdown(socket_addr, shutdown)
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    // ------- RequestVote --------

    async fn handle_request_vote(&self, rpc_request: ProtoRequestVoteReq) -> Result<ProtoRequestVoteResult, Status> {
        let app_input = Self::convert_request_vote_input(rpc_request)?;
        let app_result = self.local_replica.request_vote(app_input).await;
        let rpc_reply = Self::convert_request_vote_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_request_vote_input(rpc_request: ProtoRequestVoteReq) -> Result<RequestVoteInput, Status> {
        let candidate_last_log_entry =
            convert_log_entry_metadata(rpc_request.last_log_entry_term, rpc_request.last_log_entry_index)?;

        Ok(RequestVoteInput {
            candidate_term: convert_term(rpc_request.term)?,
            candidate_id: ReplicaId::new(rpc_request.client_node_id),
            candidate_last_log_entry,
        })
    }

    fn convert_request_vote_result(app_result: Result<RequestVoteOutput, RequestVoteError>) -> ProtoRequestVoteResult {
        let vote_reply = |vote_granted: bool, current_term: Term| ProtoRequestVoteResult {
            result: Some(proto_request_vote_result::Result::Ok(ProtoRequestVoteSuccess {
                vote_granted,
                current_term: current_term.as_u64(),
            })),
        };

        match app_result {
            Ok(ok) => vote_reply(ok.vote_granted, ok.current_term),
            // Candidate will never win our vote, no point in retrying.
            Err(RequestVoteError::CandidateNotInCluster) => vote_reply(false, Term::new(0)),
            Err(RequestVoteError::RequestTermOutOfDate(term_info)) => vote_reply(false, term_info.current_term),
            Err(RequestVoteError::ActorExited) => ProtoRequestVoteResult {
                result: Some(proto_request_vote_result::Result::Err(ProtoRequestVoteError {
                    err: Some(proto_request_vote_error::Err::ServerFault(server_fault_replica_exited())),
                })),
            },
        }
    }

    // ------- AppendEntries --------

    async fn handle_append_entries(
        &self,
        rpc_request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        let app_input = Self::convert_append_entries_input(rpc_request)?;
        let app_result = self.local_replica.append_entries(app_input).await;
        let rpc_reply = Self::convert_append_entries_result(app_result);
        Ok(rpc_reply)
    }

    fn convert_append_entries_input(rpc_request: ProtoAppendEntriesReq) -> Result<AppendEntriesInput, Status> {
        let leader_previous_log_entry = convert_log_entry_metadata(
            rpc_request.previous_log_entry_term,
            rpc_request.previous_log_entry_index,
        )?;

        let mut new_entries = Vec::with_capacity(rpc_request.new_entries.len());
        for proto_entry in rpc_request.new_entries {
            let entry = WriteAheadLogEntry::try_from(proto_entry)
                .map_err(|e| Status::invalid_argument(format!("Malformed log entry: {}", e)))?;
            new_entries.push(entry);
        }

        Ok(AppendEntriesInput {
            leader_term: convert_term(rpc_request.term)?,
            leader_id: ReplicaId::new(rpc_request.client_node_id),
            leader_previous_log_entry,
            leader_commit_index: Index::from_u64(rpc_request.commit_index),
            new_entries,
        })
    }

    fn convert_append_entries_result(
        app_result: Result<AppendEntriesOutput, AppendEntriesError>,
    ) -> ProtoAppendEntriesResult {
        let err = match app_result {
            Ok(_) => {
                return ProtoAppendEntriesResult {
                    result: Some(proto_append_entries_result::Result::Ok(ProtoAppendEntriesSuccess {
                        // Empty
                    })),
                }
            }
            Err(AppendEntriesError::ClientNotInCluster) => {
                proto_append_entries_error::Err::ClientNotInCluster(ProtoClientNotInCluster {
                    // Nothing
                })
            }
            Err(AppendEntriesError::ClientTermOutOfDate(term_info)) => {
                proto_append_entries_error::Err::StaleTerm(ProtoClientStaleTerm {
                    current_term: term_info.current_term.as_u64(),
                })
            }
            Err(AppendEntriesError::ServerMissingPreviousLogEntry { next_index_hint }) => {
                proto_append_entries_error::Err::MissingLog(ProtoServerMissingPreviousLog {
                    next_index_hint: next_index_hint.as_u64(),
                })
            }
            Err(AppendEntriesError::ServerIoError(_)) => proto_append_entries_error::Err::ServerFault(ProtoServerFault {
                message: "Local IO failure".to_string(),
            }),
            Err(AppendEntriesError::ActorExited) => {
                proto_append_entries_error::Err::ServerFault(server_fault_replica_exited())
            }
        };

        ProtoAppendEntriesResult {
            result: Some(proto_append_entries_result::Result::Err(ProtoAppendEntriesError {
                err: Some(err),
            })),
        }
    }

    // ------- TimeoutNow --------

    async fn handle_timeout_now(&self, rpc_request: ProtoTimeoutNowReq) -> Result<ProtoTimeoutNowResult, Status> {
        let app_input = TimeoutNowInput {
            leader_term: convert_term(rpc_request.term)?,
            leader_id: ReplicaId::new(rpc_request.client_node_id),
        };
        let app_result = self.local_replica.timeout_now(app_input).await;

        let err = match app_result {
            Ok(()) => {
                return Ok(ProtoTimeoutNowResult {
                    result: Some(proto_timeout_now_result::Result::Ok(ProtoTimeoutNowSuccess {})),
                })
            }
            Err(TimeoutNowError::ClientNotInCluster) => {
                proto_timeout_now_error::Err::ClientNotInCluster(ProtoClientNotInCluster {})
            }
            Err(TimeoutNowError::ClientTermOutOfDate(term_info)) => {
                proto_timeout_now_error::Err::StaleTerm(ProtoClientStaleTerm {
                    current_term: term_info.current_term.as_u64(),
                })
            }
            Err(TimeoutNowError::ActorExited) => proto_timeout_now_error::Err::ServerFault(server_fault_replica_exited()),
        };

        Ok(ProtoTimeoutNowResult {
            result: Some(proto_timeout_now_result::Result::Err(ProtoTimeoutNowError { err: Some(err) })),
        })
    }

    // ------- Client surface --------

    async fn handle_client_request(&self, rpc_request: ProtoClientRequest) -> Result<ProtoClientReply, Status> {
        let call_id = rpc_request.call_id;
        let app_input = Self::convert_client_request_input(rpc_request)?;
        let app_result = self.local_replica.client_request(app_input).await;
        Ok(Self::convert_client_request_result(call_id, app_result))
    }

    fn convert_client_request_input(rpc_request: ProtoClientRequest) -> Result<ClientRequestInput, Status> {
        let replication_level = match ProtoReplicationLevel::from_i32(rpc_request.replication_level) {
            Some(ProtoReplicationLevel::Majority) => ReplicationLevel::Majority,
            Some(ProtoReplicationLevel::All) => ReplicationLevel::All,
            None => {
                return Err(Status::invalid_argument(format!(
                    "Unknown replication level {}",
                    rpc_request.replication_level
                )))
            }
        };

        Ok(ClientRequestInput {
            client_id: rpc_request.client_id,
            call_id: rpc_request.call_id,
            data: Bytes::from(rpc_request.data),
            replication_level,
        })
    }

    fn convert_client_request_result(
        call_id: u64,
        app_result: Result<ClientRequestOutput, ClientRequestError>,
    ) -> ProtoClientReply {
        let result = match app_result {
            Ok(output) => match output.state_machine_output {
                StateMachineOutput::Data(data) => proto_client_reply::Result::Ok(ProtoClientReplyOk {
                    has_data: true,
                    data: data.to_vec(),
                }),
                StateMachineOutput::NoData => proto_client_reply::Result::Ok(ProtoClientReplyOk {
                    has_data: false,
                    data: vec![],
                }),
                StateMachineOutput::Failure(message) => {
                    proto_client_reply::Result::Failure(ProtoClientReplyFailure { message })
                }
            },
            Err(ClientRequestError::NotLeader(leader)) => proto_client_reply::Result::NotLeader(convert_not_leader(leader)),
            // Everything else is worth retrying, possibly on another replica.
            Err(e) => proto_client_reply::Result::ServerFault(ProtoServerFault { message: e.to_string() }),
        };

        ProtoClientReply {
            call_id,
            result: Some(result),
        }
    }

    async fn handle_transfer_leadership(&self) -> Result<ProtoTransferLeadershipResult, Status> {
        let app_result = self.local_replica.transfer_leadership().await;
        Ok(Self::convert_transfer_leadership_result(app_result))
    }

    fn convert_transfer_leadership_result(
        app_result: Result<TransferLeadershipOutput, TransferLeadershipError>,
    ) -> ProtoTransferLeadershipResult {
        let result = match app_result {
            Ok(output) => proto_transfer_leadership_result::Result::Ok(ProtoTransferLeadershipSuccess {
                new_leader_candidate_id: output.new_leader_candidate.into_inner(),
            }),
            Err(TransferLeadershipError::NotLeader(leader)) => {
                proto_transfer_leadership_result::Result::NotLeader(convert_not_leader(leader))
            }
            Err(e) => proto_transfer_leadership_result::Result::ServerFault(ProtoServerFault { message: e.to_string() }),
        };

        ProtoTransferLeadershipResult { result: Some(result) }
    }
}

fn convert_term(term: u64) -> Result<Term, Status> {
    match term {
        0 => Err(Status::invalid_argument("Term 0 is not a valid term")),
        term => Ok(Term::new(term)),
    }
}

fn convert_log_entry_metadata(log_entry_term: u64, log_entry_index: u64) -> Result<Option<(Term, Index)>, Status> {
    match (log_entry_term, log_entry_index) {
        (0, 0) => Ok(None),
        (0, _) => Err(Status::invalid_argument("LogEntryTerm 0 and LogEntryIndex non-0")),
        (_, 0) => Err(Status::invalid_argument("LogEntryIndex 0 and LogEntryTerm non-0")),
        (term, index) => Ok(Some((Term::new(term), Index::new(index)))),
    }
}

fn convert_not_leader(leader: Option<LeaderRedirectInfo>) -> ProtoNotLeader {
    ProtoNotLeader {
        leader: leader.map(|leader| ProtoLeaderHint {
            replica_id: leader.replica_id.into_inner(),
            ip: u32::from(leader.ip_addr),
            port: u32::from(leader.port),
        }),
    }
}

fn server_fault_replica_exited() -> ProtoServerFault {
    ProtoServerFault {
        message: "Server internal replica task has exited".to_string(),
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RpcServer {
    async fn request_vote(
        &self,
        rpc_request_wrapped: Request<ProtoRequestVoteReq>,
    ) -> Result<Response<ProtoRequestVoteResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_request_vote(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_append_entries(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn timeout_now(
        &self,
        rpc_request_wrapped: Request<ProtoTimeoutNowReq>,
    ) -> Result<Response<ProtoTimeoutNowResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_timeout_now(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn submit_client_request(
        &self,
        rpc_request_wrapped: Request<ProtoClientRequest>,
    ) -> Result<Response<ProtoClientReply>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(
            self.logger,
            "ServerWire - ClientRequest(client={}, call={})",
            rpc_request.client_id,
            rpc_request.call_id
        );
        let rpc_result = self.handle_client_request(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn transfer_leadership(
        &self,
        _rpc_request_wrapped: Request<ProtoTransferLeadershipReq>,
    ) -> Result<Response<ProtoTransferLeadershipResult>, Status> {
        slog::debug!(self.logger, "ServerWire - TransferLeadership");
        let rpc_result = self.handle_transfer_leadership().await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
