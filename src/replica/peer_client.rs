use crate::grpc::grpc_raft_client::GrpcRaftClient;
use crate::grpc::{
    ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoClientReply, ProtoClientRequest, ProtoRequestVoteReq,
    ProtoRequestVoteResult, ProtoTimeoutNowReq, ProtoTimeoutNowResult, ProtoTransferLeadershipReq,
    ProtoTransferLeadershipResult,
};
use std::net::Ipv4Addr;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};
use tonic::Status;

/// PeerClient is a cheaply cloneable gRPC client to one cluster member. The connection is
/// established lazily on first use and re-established after failures, so a client can be created
/// for a member that isn't running yet.
#[derive(Clone)]
pub(crate) struct PeerClient {
    inner: GrpcRaftClient<Channel>,
}

impl PeerClient {
    pub(crate) fn new(ip: Ipv4Addr, port: u16) -> Result<Self, ConnectError> {
        let url = format!("http://{}:{}", ip, port);
        let endpoint = Endpoint::from_shared(url)?;
        let channel = endpoint.connect_lazy()?;

        Ok(PeerClient {
            inner: GrpcRaftClient::new(channel),
        })
    }

    pub(crate) async fn request_vote(&mut self, request: ProtoRequestVoteReq) -> Result<ProtoRequestVoteResult, Status> {
        self.inner.request_vote(request).await.map(|r| r.into_inner())
    }

    pub(crate) async fn append_entries(
        &mut self,
        request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        self.inner.append_entries(request).await.map(|r| r.into_inner())
    }

    pub(crate) async fn timeout_now(&mut self, request: ProtoTimeoutNowReq) -> Result<ProtoTimeoutNowResult, Status> {
        self.inner.timeout_now(request).await.map(|r| r.into_inner())
    }

    pub(crate) async fn submit_client_request(&mut self, request: ProtoClientRequest) -> Result<ProtoClientReply, Status> {
        self.inner.submit_client_request(request).await.map(|r| r.into_inner())
    }

    pub(crate) async fn transfer_leadership(&mut self) -> Result<ProtoTransferLeadershipResult, Status> {
        self.inner
            .transfer_leadership(ProtoTransferLeadershipReq {})
            .await
            .map(|r| r.into_inner())
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] uri::InvalidUri),
    #[error("transport failure: {0}")]
    Transport(#[from] tonic::transport::Error),
}
