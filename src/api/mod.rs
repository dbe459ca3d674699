//! This mod is meant to hold most of the code for the library's client-facing API.
mod client;
mod event_bus;
mod node;
mod options;
mod state_machine;
mod storage;
mod types;
mod wiring;

pub use client::PendingReply;
pub use client::RaftClient;
pub use client::RaftClientConfig;
pub use client::RaftClientCreationError;
pub use client::RaftClientError;
pub use client::RaftClientReply;
pub use event_bus::RaftElectionState;
pub use event_bus::RaftEvent;
pub use event_bus::RaftEventListener;
pub use node::RaftNode;
pub use node::RaftNodeExited;
pub use node::RaftRetryCacheEntry;
pub use options::RaftClientOptions;
pub use options::RaftOptions;
pub use state_machine::RaftCommittedEntry;
pub use state_machine::StateMachine;
pub use state_machine::StateMachineOutput;
pub use storage::RaftLogEntry;
pub use storage::RaftLogPayload;
pub use storage::RaftStorage;
pub use types::RaftLeaderInfo;
pub use types::RaftMemberInfo;
pub use types::RaftReplicationLevel;
pub use types::RaftRole;
pub use types::RaftStatus;
pub use wiring::create_raft_node;
pub use wiring::RaftNodeConfig;
pub use wiring::RaftNodeCreationError;
