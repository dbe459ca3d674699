// ------- Shared -------

// Index and term value 0 means "none" everywhere in this file.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoServerFault {
    #[prost(string, tag="1")]
    pub message: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientStaleTerm {
    #[prost(uint64, tag="1")]
    pub current_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientNotInCluster {
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLeaderHint {
    #[prost(string, tag="1")]
    pub replica_id: ::prost::alloc::string::String,
    /// IPv4 address as big-endian u32.
    #[prost(uint32, tag="2")]
    pub ip: u32,
    #[prost(uint32, tag="3")]
    pub port: u32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoNotLeader {
    /// Absent when this replica doesn't know who the leader is.
    #[prost(message, optional, tag="1")]
    pub leader: ::core::option::Option<ProtoLeaderHint>,
}
// ------- RequestVote -------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteReq {
    #[prost(string, tag="1")]
    pub client_node_id: ::prost::alloc::string::String,
    #[prost(uint64, tag="2")]
    pub term: u64,
    #[prost(uint64, tag="3")]
    pub last_log_entry_index: u64,
    #[prost(uint64, tag="4")]
    pub last_log_entry_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteResult {
    #[prost(oneof="proto_request_vote_result::Result", tags="1, 2")]
    pub result: ::core::option::Option<proto_request_vote_result::Result>,
}
/// Nested message and enum types in `ProtoRequestVoteResult`.
pub mod proto_request_vote_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag="1")]
        Ok(super::ProtoRequestVoteSuccess),
        #[prost(message, tag="2")]
        Err(super::ProtoRequestVoteError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteSuccess {
    #[prost(bool, tag="1")]
    pub vote_granted: bool,
    #[prost(uint64, tag="2")]
    pub current_term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoRequestVoteError {
    #[prost(oneof="proto_request_vote_error::Err", tags="1")]
    pub err: ::core::option::Option<proto_request_vote_error::Err>,
}
/// Nested message and enum types in `ProtoRequestVoteError`.
pub mod proto_request_vote_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag="1")]
        ServerFault(super::ProtoServerFault),
    }
}
// ------- AppendEntries -------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesReq {
    #[prost(string, tag="1")]
    pub client_node_id: ::prost::alloc::string::String,
    #[prost(uint64, tag="2")]
    pub term: u64,
    #[prost(uint64, tag="3")]
    pub commit_index: u64,
    #[prost(uint64, tag="4")]
    pub previous_log_entry_term: u64,
    #[prost(uint64, tag="5")]
    pub previous_log_entry_index: u64,
    #[prost(message, repeated, tag="6")]
    pub new_entries: ::prost::alloc::vec::Vec<ProtoLogEntry>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoLogEntry {
    #[prost(uint64, tag="1")]
    pub term: u64,
    #[prost(oneof="proto_log_entry::Payload", tags="2, 3")]
    pub payload: ::core::option::Option<proto_log_entry::Payload>,
}
/// Nested message and enum types in `ProtoLogEntry`.
pub mod proto_log_entry {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Payload {
        #[prost(message, tag="2")]
        NoOp(super::ProtoNoOp),
        #[prost(message, tag="3")]
        Command(super::ProtoCommand),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoNoOp {
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoCommand {
    #[prost(uint64, tag="1")]
    pub client_id: u64,
    #[prost(uint64, tag="2")]
    pub call_id: u64,
    #[prost(bytes="vec", tag="3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesResult {
    #[prost(oneof="proto_append_entries_result::Result", tags="1, 2")]
    pub result: ::core::option::Option<proto_append_entries_result::Result>,
}
/// Nested message and enum types in `ProtoAppendEntriesResult`.
pub mod proto_append_entries_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag="1")]
        Ok(super::ProtoAppendEntriesSuccess),
        #[prost(message, tag="2")]
        Err(super::ProtoAppendEntriesError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesSuccess {
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoAppendEntriesError {
    #[prost(oneof="proto_append_entries_error::Err", tags="1, 2, 3, 4")]
    pub err: ::core::option::Option<proto_append_entries_error::Err>,
}
/// Nested message and enum types in `ProtoAppendEntriesError`.
pub mod proto_append_entries_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag="1")]
        ServerFault(super::ProtoServerFault),
        #[prost(message, tag="2")]
        StaleTerm(super::ProtoClientStaleTerm),
        #[prost(message, tag="3")]
        MissingLog(super::ProtoServerMissingPreviousLog),
        #[prost(message, tag="4")]
        ClientNotInCluster(super::ProtoClientNotInCluster),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoServerMissingPreviousLog {
    /// The next index the leader should try for this follower.
    #[prost(uint64, tag="1")]
    pub next_index_hint: u64,
}
// ------- TimeoutNow -------

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowReq {
    #[prost(string, tag="1")]
    pub client_node_id: ::prost::alloc::string::String,
    #[prost(uint64, tag="2")]
    pub term: u64,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowResult {
    #[prost(oneof="proto_timeout_now_result::Result", tags="1, 2")]
    pub result: ::core::option::Option<proto_timeout_now_result::Result>,
}
/// Nested message and enum types in `ProtoTimeoutNowResult`.
pub mod proto_timeout_now_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag="1")]
        Ok(super::ProtoTimeoutNowSuccess),
        #[prost(message, tag="2")]
        Err(super::ProtoTimeoutNowError),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowSuccess {
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTimeoutNowError {
    #[prost(oneof="proto_timeout_now_error::Err", tags="1, 2, 3")]
    pub err: ::core::option::Option<proto_timeout_now_error::Err>,
}
/// Nested message and enum types in `ProtoTimeoutNowError`.
pub mod proto_timeout_now_error {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Err {
        #[prost(message, tag="1")]
        ServerFault(super::ProtoServerFault),
        #[prost(message, tag="2")]
        StaleTerm(super::ProtoClientStaleTerm),
        #[prost(message, tag="3")]
        ClientNotInCluster(super::ProtoClientNotInCluster),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientRequest {
    #[prost(uint64, tag="1")]
    pub client_id: u64,
    #[prost(uint64, tag="2")]
    pub call_id: u64,
    #[prost(bytes="vec", tag="3")]
    pub data: ::prost::alloc::vec::Vec<u8>,
    #[prost(enumeration="ProtoReplicationLevel", tag="4")]
    pub replication_level: i32,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientReply {
    #[prost(uint64, tag="1")]
    pub call_id: u64,
    #[prost(oneof="proto_client_reply::Result", tags="2, 3, 4, 5")]
    pub result: ::core::option::Option<proto_client_reply::Result>,
}
/// Nested message and enum types in `ProtoClientReply`.
pub mod proto_client_reply {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag="2")]
        Ok(super::ProtoClientReplyOk),
        #[prost(message, tag="3")]
        Failure(super::ProtoClientReplyFailure),
        #[prost(message, tag="4")]
        NotLeader(super::ProtoNotLeader),
        #[prost(message, tag="5")]
        ServerFault(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientReplyOk {
    #[prost(bool, tag="1")]
    pub has_data: bool,
    #[prost(bytes="vec", tag="2")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoClientReplyFailure {
    #[prost(string, tag="1")]
    pub message: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTransferLeadershipReq {
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTransferLeadershipResult {
    #[prost(oneof="proto_transfer_leadership_result::Result", tags="1, 2, 3")]
    pub result: ::core::option::Option<proto_transfer_leadership_result::Result>,
}
/// Nested message and enum types in `ProtoTransferLeadershipResult`.
pub mod proto_transfer_leadership_result {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Result {
        #[prost(message, tag="1")]
        Ok(super::ProtoTransferLeadershipSuccess),
        #[prost(message, tag="2")]
        NotLeader(super::ProtoNotLeader),
        #[prost(message, tag="3")]
        ServerFault(super::ProtoServerFault),
    }
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ProtoTransferLeadershipSuccess {
    #[prost(string, tag="1")]
    pub new_leader_candidate_id: ::prost::alloc::string::String,
}
// ------- Client surface -------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ProtoReplicationLevel {
    Majority = 0,
    All = 1,
}
# [doc = r" Generated client implementations."] pub mod grpc_raft_client { # ! [allow (unused_variables , dead_code , missing_docs)] use tonic :: codegen :: * ; # [doc = " Replica-to-replica RPCs plus the client-facing submission surface."] pub struct GrpcRaftClient < T > { inner : tonic :: client :: Grpc < T > , } impl GrpcRaftClient < tonic :: transport :: Channel > { # [doc = r" Attempt to create a new client by connecting to a given endpoint."] pub async fn connect < D > (dst : D) -> Result < Self , tonic :: transport :: Error > where D : std :: convert :: TryInto < tonic :: transport :: Endpoint > , D :: Error : Into < StdError > , { let conn = tonic :: transport :: Endpoint :: new (dst) ? . connect () . await ? ; Ok (Self :: new (conn)) } } impl < T > GrpcRaftClient < T > where T : tonic :: client :: GrpcService < tonic :: body :: BoxBody > , T :: ResponseBody : Body + HttpBody + Send + 'static , T :: Error : Into < StdError > , < T :: ResponseBody as HttpBody > :: Error : Into < StdError > + Send , { pub fn new (inner : T) -> Self { let inner = tonic :: client :: Grpc :: new (inner) ; Self { inner } } pub fn with_interceptor (inner : T , interceptor : impl Into < tonic :: Interceptor >) -> Self { let inner = tonic :: client :: Grpc :: with_interceptor (inner , interceptor) ; Self { inner } } pub async fn request_vote (& mut self , request : impl tonic :: IntoRequest < super :: ProtoRequestVoteReq > ,) -> Result < tonic :: Response < super :: ProtoRequestVoteResult > , tonic :: Status > { self . inner . ready () . await . map_err (| e | { tonic :: Status :: new (tonic :: Code :: Unknown , format ! ("Service was not ready: {}" , e . into ())) }) ? ; let codec = tonic :: codec :: ProstCodec :: default () ; let path = http :: uri :: PathAndQuery :: from_static ("/raft.GrpcRaft/RequestVote") ; self . inner . unary (request . into_request () , path , codec) . await } pub async fn append_entries (& mut self , request : impl tonic :: IntoRequest < super :: ProtoAppendEntriesReq > ,) -> Result < tonic :: Response < super :: ProtoAppendEntriesResult > , tonic :: Status > { self . inner . ready () . await . map_err (| e | { tonic :: Status :: new (tonic :: Code :: Unknown , format ! ("Service was not ready: {}" , e . into ())) }) ? ; let codec = tonic :: codec :: ProstCodec :: default () ; let path = http :: uri :: PathAndQuery :: from_static ("/raft.GrpcRaft/AppendEntries") ; self . inner . unary (request . into_request () , path , codec) . await } pub async fn timeout_now (& mut self , request : impl tonic :: IntoRequest < super :: ProtoTimeoutNowReq > ,) -> Result < tonic :: Response < super :: ProtoTimeoutNowResult > , tonic :: Status > { self . inner . ready () . await . map_err (| e | { tonic :: Status :: new (tonic :: Code :: Unknown , format ! ("Service was not ready: {}" , e . into ())) }) ? ; let codec = tonic :: codec :: ProstCodec :: default () ; let path = http :: uri :: PathAndQuery :: from_static ("/raft.GrpcRaft/TimeoutNow") ; self . inner . unary (request . into_request () , path , codec) . await } pub async fn submit_client_request (& mut self , request : impl tonic :: IntoRequest < super :: ProtoClientRequest > ,) -> Result < tonic :: Response < super :: ProtoClientReply > , tonic :: Status > { self . inner . ready () . await . map_err (| e | { tonic :: Status :: new (tonic :: Code :: Unknown , format ! ("Service was not ready: {}" , e . into ())) }) ? ; let codec = tonic :: codec :: ProstCodec :: default () ; let path = http :: uri :: PathAndQuery :: from_static ("/raft.GrpcRaft/SubmitClientRequest") ; self . inner . unary (request . into_request () , path , codec) . await } pub async fn transfer_leadership (& mut self , request : impl tonic :: IntoRequest < super :: ProtoTransferLeadershipReq > ,) -> Result < tonic :: Response < super :: ProtoTransferLeadershipResult > , tonic :: Status > { self . inner . ready () . await . map_err (| e | { tonic :: Status :: new (tonic :: Code :: Unknown , format ! ("Service was not ready: {}" , e . into ())) }) ? ; let codec = tonic :: codec :: ProstCodec :: default () ; let path = http :: uri :: PathAndQuery :: from_static ("/raft.GrpcRaft/TransferLeadership") ; self . inner . unary (request . into_request () , path , codec) . await } } impl < T : Clone > Clone for GrpcRaftClient < T > { fn clone (& self) -> Self { Self { inner : self . inner . clone () , } } } impl < T > std :: fmt :: Debug for GrpcRaftClient < T > { fn fmt (& self , f : & mut std :: fmt :: Formatter < '_ >) -> std :: fmt :: Result { write ! (f , "GrpcRaftClient {{ ... }}") } } }# [doc = r" Generated server implementations."] pub mod grpc_raft_server { # ! [allow (unused_variables , dead_code , missing_docs)] use tonic :: codegen :: * ; # [doc = "Generated trait containing gRPC methods that should be implemented for use with GrpcRaftServer."] # [async_trait] pub trait GrpcRaft : Send + Sync + 'static { async fn request_vote (& self , request : tonic :: Request < super :: ProtoRequestVoteReq >) -> Result < tonic :: Response < super :: ProtoRequestVoteResult > , tonic :: Status > ; async fn append_entries (& self , request : tonic :: Request < super :: ProtoAppendEntriesReq >) -> Result < tonic :: Response < super :: ProtoAppendEntriesResult > , tonic :: Status > ; async fn timeout_now (& self , request : tonic :: Request < super :: ProtoTimeoutNowReq >) -> Result < tonic :: Response < super :: ProtoTimeoutNowResult > , tonic :: Status > ; async fn submit_client_request (& self , request : tonic :: Request < super :: ProtoClientRequest >) -> Result < tonic :: Response < super :: ProtoClientReply > , tonic :: Status > ; async fn transfer_leadership (& self , request : tonic :: Request < super :: ProtoTransferLeadershipReq >) -> Result < tonic :: Response < super :: ProtoTransferLeadershipResult > , tonic :: Status > ; } # [doc = " Replica-to-replica RPCs plus the client-facing submission surface."] # [derive (Debug)] pub struct GrpcRaftServer < T : GrpcRaft > { inner : _Inner < T > , } struct _Inner < T > (Arc < T > , Option < tonic :: Interceptor >) ; impl < T : GrpcRaft > GrpcRaftServer < T > { pub fn new (inner : T) -> Self { let inner = Arc :: new (inner) ; let inner = _Inner (inner , None) ; Self { inner } } pub fn with_interceptor (inner : T , interceptor : impl Into < tonic :: Interceptor >) -> Self { let inner = Arc :: new (inner) ; let inner = _Inner (inner , Some (interceptor . into ())) ; Self { inner } } } impl < T , B > Service < http :: Request < B >> for GrpcRaftServer < T > where T : GrpcRaft , B : HttpBody + Send + Sync + 'static , B :: Error : Into < StdError > + Send + 'static , { type Response = http :: Response < tonic :: body :: BoxBody > ; type Error = Never ; type Future = BoxFuture < Self :: Response , Self :: Error > ; fn poll_ready (& mut self , _cx : & mut Context < '_ >) -> Poll < Result < () , Self :: Error >> { Poll :: Ready (Ok (())) } fn call (& mut self , req : http :: Request < B >) -> Self :: Future { let inner = self . inner . clone () ; match req . uri () . path () { "/raft.GrpcRaft/RequestVote" => { # [allow (non_camel_case_types)] struct RequestVoteSvc < T : GrpcRaft > (pub Arc < T >) ; impl < T : GrpcRaft > tonic :: server :: UnaryService < super :: ProtoRequestVoteReq > for RequestVoteSvc < T > { type Response = super :: ProtoRequestVoteResult ; type Future = BoxFuture < tonic :: Response < Self :: Response > , tonic :: Status > ; fn call (& mut self , request : tonic :: Request < super :: ProtoRequestVoteReq >) -> Self :: Future { let inner = self . 0 . clone () ; let fut = async move { (* inner) . request_vote (request) . await } ; Box :: pin (fut) } } let inner = self . inner . clone () ; let fut = async move { let interceptor = inner . 1 . clone () ; let inner = inner . 0 ; let method = RequestVoteSvc (inner) ; let codec = tonic :: codec :: ProstCodec :: default () ; let mut grpc = if let Some (interceptor) = interceptor { tonic :: server :: Grpc :: with_interceptor (codec , interceptor) } else { tonic :: server :: Grpc :: new (codec) } ; let res = grpc . unary (method , req) . await ; Ok (res) } ; Box :: pin (fut) } "/raft.GrpcRaft/AppendEntries" => { # [allow (non_camel_case_types)] struct AppendEntriesSvc < T : GrpcRaft > (pub Arc < T >) ; impl < T : GrpcRaft > tonic :: server :: UnaryService < super :: ProtoAppendEntriesReq > for AppendEntriesSvc < T > { type Response = super :: ProtoAppendEntriesResult ; type Future = BoxFuture < tonic :: Response < Self :: Response > , tonic :: Status > ; fn call (& mut self , request : tonic :: Request < super :: ProtoAppendEntriesReq >) -> Self :: Future { let inner = self . 0 . clone () ; let fut = async move { (* inner) . append_entries (request) . await } ; Box :: pin (fut) } } let inner = self . inner . clone () ; let fut = async move { let interceptor = inner . 1 . clone () ; let inner = inner . 0 ; let method = AppendEntriesSvc (inner) ; let codec = tonic :: codec :: ProstCodec :: default () ; let mut grpc = if let Some (interceptor) = interceptor { tonic :: server :: Grpc :: with_interceptor (codec , interceptor) } else { tonic :: server :: Grpc :: new (codec) } ; let res = grpc . unary (method , req) . await ; Ok (res) } ; Box :: pin (fut) } "/raft.GrpcRaft/TimeoutNow" => { # [allow (non_camel_case_types)] struct TimeoutNowSvc < T : GrpcRaft > (pub Arc < T >) ; impl < T : GrpcRaft > tonic :: server :: UnaryService < super :: ProtoTimeoutNowReq > for TimeoutNowSvc < T > { type Response = super :: ProtoTimeoutNowResult ; type Future = BoxFuture < tonic :: Response < Self :: Response > , tonic :: Status > ; fn call (& mut self , request : tonic :: Request < super :: ProtoTimeoutNowReq >) -> Self :: Future { let inner = self . 0 . clone () ; let fut = async move { (* inner) . timeout_now (request) . await } ; Box :: pin (fut) } } let inner = self . inner . clone () ; let fut = async move { let interceptor = inner . 1 . clone () ; let inner = inner . 0 ; let method = TimeoutNowSvc (inner) ; let codec = tonic :: codec :: ProstCodec :: default () ; let mut grpc = if let Some (interceptor) = interceptor { tonic :: server :: Grpc :: with_interceptor (codec , interceptor) } else { tonic :: server :: Grpc :: new (codec) } ; let res = grpc . unary (method , req) . await ; Ok (res) } ; Box :: pin (fut) } "/raft.GrpcRaft/SubmitClientRequest" => { # [allow (non_camel_case_types)] struct SubmitClientRequestSvc < T : GrpcRaft > (pub Arc < T >) ; impl < T : GrpcRaft > tonic :: server :: UnaryService < super :: ProtoClientRequest > for SubmitClientRequestSvc < T > { type Response = super :: ProtoClientReply ; type Future = BoxFuture < tonic :: Response < Self :: Response > , tonic :: Status > ; fn call (& mut self , request : tonic :: Request < super :: ProtoClientRequest >) -> Self :: Future { let inner = self . 0 . clone () ; let fut = async move { (* inner) . submit_client_request (request) . await } ; Box :: pin (fut) } } let inner = self . inner . clone () ; let fut = async move { let interceptor = inner . 1 . clone () ; let inner = inner . 0 ; let method = SubmitClientRequestSvc (inner) ; let codec = tonic :: codec :: ProstCodec :: default () ; let mut grpc = if let Some (interceptor) = interceptor { tonic :: server :: Grpc :: with_interceptor (codec , interceptor) } else { tonic :: server :: Grpc :: new (codec) } ; let res = grpc . unary (method , req) . await ; Ok (res) } ; Box :: pin (fut) } "/raft.GrpcRaft/TransferLeadership" => { # [allow (non_camel_case_types)] struct TransferLeadershipSvc < T : GrpcRaft > (pub Arc < T >) ; impl < T : GrpcRaft > tonic :: server :: UnaryService < super :: ProtoTransferLeadershipReq > for TransferLeadershipSvc < T > { type Response = super :: ProtoTransferLeadershipResult ; type Future = BoxFuture < tonic :: Response < Self :: Response > , tonic :: Status > ; fn call (& mut self , request : tonic :: Request < super :: ProtoTransferLeadershipReq >) -> Self :: Future { let inner = self . 0 . clone () ; let fut = async move { (* inner) . transfer_leadership (request) . await } ; Box :: pin (fut) } } let inner = self . inner . clone () ; let fut = async move { let interceptor = inner . 1 . clone () ; let inner = inner . 0 ; let method = TransferLeadershipSvc (inner) ; let codec = tonic :: codec :: ProstCodec :: default () ; let mut grpc = if let Some (interceptor) = interceptor { tonic :: server :: Grpc :: with_interceptor (codec , interceptor) } else { tonic :: server :: Grpc :: new (codec) } ; let res = grpc . unary (method , req) . await ; Ok (res) } ; Box :: pin (fut) } _ => Box :: pin (async move { Ok (http :: Response :: builder () . status (200) . header ("grpc-status" , "12") . header ("content-type" , "application/grpc") . body (tonic :: body :: BoxBody :: empty ()) . unwrap ()) }) , } } } impl < T : GrpcRaft > Clone for GrpcRaftServer < T > { fn clone (& self) -> Self { let inner = self . inner . clone () ; Self { inner } } } impl < T : GrpcRaft > Clone for _Inner < T > { fn clone (& self) -> Self { Self (self . 0 . clone () , self . 1 . clone ()) } } impl < T : std :: fmt :: Debug > std :: fmt :: Debug for _Inner < T > { fn fmt (& self , f : & mut std :: fmt :: Formatter < '_ >) -> std :: fmt :: Result { write ! (f , "{:?}" , self . 0) } } impl < T : GrpcRaft > tonic :: transport :: NamedService for GrpcRaftServer < T > { const NAME : & 'static str = "raft.GrpcRaft" ; } }