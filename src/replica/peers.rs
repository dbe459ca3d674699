use crate::replica::peer_client::{ConnectError, PeerClient};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

/// ReplicaId...or maybe it should be NodeId or ServerId. Idk.
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) struct ReplicaId(String);

impl ReplicaId {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        ReplicaId(id.into())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Debug for ReplicaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ReplicaMetadata {
    replica_id: ReplicaId,
    ip_addr: Ipv4Addr,
    port: u16,
}

impl ReplicaMetadata {
    pub(crate) fn new(replica_id: ReplicaId, ip_addr: Ipv4Addr, port: u16) -> Self {
        ReplicaMetadata {
            replica_id,
            ip_addr,
            port,
        }
    }

    pub(crate) fn replica_id(&self) -> &ReplicaId {
        &self.replica_id
    }

    pub(crate) fn ip_addr(&self) -> Ipv4Addr {
        self.ip_addr
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }
}

#[derive(Clone)]
pub(crate) struct Peer {
    pub(crate) metadata: ReplicaMetadata,
    pub(crate) client: PeerClient,
}

/// ClusterTracker holds the static cluster membership and a lazily connected client per peer.
pub(crate) struct ClusterTracker {
    my_replica_metadata: ReplicaMetadata,
    peers: HashMap<ReplicaId, Peer>,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum InvalidCluster {
    #[error("my replica ID not in cluster config")]
    MeNotInCluster,
    #[error("replica ID {0:?} appears more than once in cluster config")]
    DuplicateReplicaId(ReplicaId),
    #[error("can't create client for peer {0:?}: {1}")]
    PeerClient(ReplicaId, ConnectError),
}

impl ClusterTracker {
    pub(crate) fn create_valid_cluster(
        logger: &slog::Logger,
        my_replica_id: ReplicaId,
        cluster_members: Vec<ReplicaMetadata>,
    ) -> Result<Self, InvalidCluster> {
        let mut my_replica_metadata = None;
        let mut peers = HashMap::with_capacity(cluster_members.len());
        let mut seen = HashSet::with_capacity(cluster_members.len());

        for member in cluster_members {
            if !seen.insert(member.replica_id().clone()) {
                return Err(InvalidCluster::DuplicateReplicaId(member.replica_id().clone()));
            }

            if member.replica_id() == &my_replica_id {
                my_replica_metadata.replace(member);
                continue;
            }

            slog::info!(
                logger,
                "Creating client for peer {:?} at {}:{}",
                member.replica_id(),
                member.ip_addr(),
                member.port()
            );
            let client = PeerClient::new(member.ip_addr(), member.port())
                .map_err(|e| InvalidCluster::PeerClient(member.replica_id().clone(), e))?;
            peers.insert(
                member.replica_id().clone(),
                Peer {
                    metadata: member,
                    client,
                },
            );
        }

        let my_replica_metadata = my_replica_metadata.ok_or(InvalidCluster::MeNotInCluster)?;

        Ok(ClusterTracker {
            my_replica_metadata,
            peers,
        })
    }

    pub(crate) fn my_replica_id(&self) -> &ReplicaId {
        self.my_replica_metadata.replica_id()
    }

    pub(crate) fn contains_member(&self, replica_id: &ReplicaId) -> bool {
        self.my_replica_id() == replica_id || self.peers.contains_key(replica_id)
    }

    pub(crate) fn metadata(&self, replica_id: &ReplicaId) -> Option<&ReplicaMetadata> {
        if self.my_replica_id() == replica_id {
            Some(&self.my_replica_metadata)
        } else {
            self.peers.get(replica_id).map(|peer| &peer.metadata)
        }
    }

    pub(crate) fn peer(&self, replica_id: &ReplicaId) -> Option<&Peer> {
        self.peers.get(replica_id)
    }

    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peers.keys().cloned().collect()
    }

    pub(crate) fn iter_peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    pub(crate) fn num_voting_replicas(&self) -> usize {
        self.peers.len() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str, port: u16) -> ReplicaMetadata {
        ReplicaMetadata::new(ReplicaId::new(id), Ipv4Addr::LOCALHOST, port)
    }

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn cluster_tracker_membership() {
        let members = vec![member("r1", 7001), member("r2", 7002), member("r3", 7003)];
        let tracker = ClusterTracker::create_valid_cluster(&logger(), ReplicaId::new("r2"), members).unwrap();

        assert_eq!(tracker.my_replica_id(), &ReplicaId::new("r2"));
        assert_eq!(tracker.num_voting_replicas(), 3);
        assert!(tracker.contains_member(&ReplicaId::new("r1")));
        assert!(tracker.contains_member(&ReplicaId::new("r2")));
        assert!(!tracker.contains_member(&ReplicaId::new("r4")));
        assert!(tracker.peer(&ReplicaId::new("r2")).is_none());
        assert_eq!(tracker.metadata(&ReplicaId::new("r3")).map(|m| m.port()), Some(7003));

        let mut peer_ids: Vec<_> = tracker.peer_ids().into_iter().collect();
        peer_ids.sort();
        assert_eq!(peer_ids, vec![ReplicaId::new("r1"), ReplicaId::new("r3")]);
    }

    #[tokio::test]
    async fn cluster_tracker_rejects_invalid_config() {
        let result = ClusterTracker::create_valid_cluster(&logger(), ReplicaId::new("r9"), vec![member("r1", 7001)]);
        assert!(matches!(result, Err(InvalidCluster::MeNotInCluster)));

        let result = ClusterTracker::create_valid_cluster(
            &logger(),
            ReplicaId::new("r1"),
            vec![member("r1", 7001), member("r1", 7002)],
        );
        assert!(matches!(result, Err(InvalidCluster::DuplicateReplicaId(_))));
    }
}
