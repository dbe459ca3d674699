mod actor;
mod api;
mod commitlog;
mod replica;
mod server;
mod grpc {
    include!("../generated/raft.rs");
}

pub use api::create_raft_node;
pub use api::PendingReply;
pub use api::RaftClient;
pub use api::RaftClientConfig;
pub use api::RaftClientCreationError;
pub use api::RaftClientError;
pub use api::RaftClientOptions;
pub use api::RaftClientReply;
pub use api::RaftCommittedEntry;
pub use api::RaftElectionState;
pub use api::RaftEvent;
pub use api::RaftEventListener;
pub use api::RaftLeaderInfo;
pub use api::RaftLogEntry;
pub use api::RaftLogPayload;
pub use api::RaftMemberInfo;
pub use api::RaftNode;
pub use api::RaftNodeConfig;
pub use api::RaftNodeCreationError;
pub use api::RaftNodeExited;
pub use api::RaftOptions;
pub use api::RaftReplicationLevel;
pub use api::RaftRetryCacheEntry;
pub use api::RaftRole;
pub use api::RaftStatus;
pub use api::RaftStorage;
pub use api::StateMachine;
pub use api::StateMachineOutput;

// Learning 1: `create::{root_mod}` should not have any code. Just `mod` and `pub use` statements.
// Learning 2: All `mod` statements, anywhere, should not be `pub`. Only export `pub` via individual
//             use statements.
//
// This keeps the `crate::{root_mod}` root_mod only responsible for exporting types to the rest of
// crate, and allows me to organize my root_mod impl however I want.
