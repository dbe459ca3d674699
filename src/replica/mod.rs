// `crate::replica` itself holds no code. Only `mod` and `pub(crate) use` statements, so the rest
// of the crate depends on the exported types and not on how this module is laid out inside.
mod applier;
mod election;
mod local_state;
mod peer_client;
mod peers;
mod raft_rpcs;
mod replica;
mod replica_api;
mod replica_wiring;
mod retry_cache;
mod write_ahead_log;

pub(crate) use applier::StateMachineApplier;
pub(crate) use election::ElectionStateChangeListener;
pub(crate) use election::ElectionStateSnapshot;
pub(crate) use local_state::LocalStateStore;
pub(crate) use local_state::Term;
pub(crate) use peer_client::PeerClient;
pub(crate) use peers::InvalidCluster;
pub(crate) use peers::ReplicaId;
pub(crate) use peers::ReplicaMetadata;
pub(crate) use replica::Replica;
pub(crate) use replica_api::*;
pub(crate) use replica_wiring::create_replica;
pub(crate) use replica_wiring::CreateReplicaError;
pub(crate) use replica_wiring::ReplicaOptions;
pub(crate) use replica_wiring::ReplicaStorage;
pub(crate) use retry_cache::RetryCacheKey;
pub(crate) use retry_cache::RetryCacheLookup;
pub(crate) use write_ahead_log::CommandEntry;
pub(crate) use write_ahead_log::CommitStream;
pub(crate) use write_ahead_log::CommittedEntry;
pub(crate) use write_ahead_log::EntryPayload;
pub(crate) use write_ahead_log::WriteAheadLogEntry;
