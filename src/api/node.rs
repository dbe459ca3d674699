use crate::actor::ActorClient;
use crate::api::event_bus::RaftEventListener;
use crate::api::types::RaftStatus;
use crate::replica::{RetryCacheKey, RetryCacheLookup};
use tokio::task::JoinHandle;

/// RaftNode is a running replica: its actor, its state machine applier, and its gRPC server.
/// Dropping the node (or calling `shutdown()`) stops all of them.
pub struct RaftNode {
    replica_id: String,
    actor_client: ActorClient,
    event_listener: RaftEventListener,
    actor_task: JoinHandle<()>,
    server_task: JoinHandle<()>,
}

#[derive(Debug, thiserror::Error)]
#[error("Raft node has exited")]
pub struct RaftNodeExited;

/// What `retry_cache_get_or_create()` found for the given call.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RaftRetryCacheEntry {
    /// Nothing was cached. There is now a pending entry, which expires like any other.
    Created,
    Pending,
    Completed,
}

impl RaftNode {
    pub(super) fn new(
        replica_id: String,
        actor_client: ActorClient,
        event_listener: RaftEventListener,
        actor_task: JoinHandle<()>,
        server_task: JoinHandle<()>,
    ) -> Self {
        RaftNode {
            replica_id,
            actor_client,
            event_listener,
            actor_task,
            server_task,
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub async fn status(&self) -> Result<RaftStatus, RaftNodeExited> {
        self.actor_client
            .status()
            .await
            .map(RaftStatus::from)
            .map_err(|_| RaftNodeExited)
    }

    pub fn event_listener(&self) -> RaftEventListener {
        self.event_listener.clone()
    }

    /// Registers a pending call in this node's retry cache without submitting anything. A client
    /// that later sends the same call waits on the entry until it expires, then executes normally.
    pub async fn retry_cache_get_or_create(
        &self,
        client_id: u64,
        call_id: u64,
    ) -> Result<RaftRetryCacheEntry, RaftNodeExited> {
        let lookup = self
            .actor_client
            .retry_cache_get_or_create(RetryCacheKey { client_id, call_id })
            .await
            .map_err(|_| RaftNodeExited)?;

        Ok(match lookup {
            RetryCacheLookup::Created => RaftRetryCacheEntry::Created,
            RetryCacheLookup::Pending => RaftRetryCacheEntry::Pending,
            RetryCacheLookup::Completed => RaftRetryCacheEntry::Completed,
        })
    }

    /// Stops the node and waits until its server no longer listens, so the port can be reused
    /// right away (e.g. to restart the node from the same storage).
    pub async fn shutdown(self) {
        let RaftNode {
            actor_client,
            actor_task,
            server_task,
            ..
        } = self;

        // Last strong client. The actor exits, and its replica takes the server down with it.
        drop(actor_client);
        let _ = actor_task.await;
        let _ = server_task.await;
    }
}
