#![allow(dead_code)]

use bytes::Bytes;
use chrono::Utc;
use raft_rsm::{
    RaftClient, RaftClientConfig, RaftClientOptions, RaftCommittedEntry, RaftLogPayload, RaftMemberInfo, RaftNode,
    RaftNodeConfig, RaftOptions, RaftRole, RaftStatus, RaftStorage, StateMachine, StateMachineOutput,
};
use slog::Drain;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use tokio::time::{Duration, Instant};

pub const HEARTBEAT: Duration = Duration::from_millis(50);
pub const ELECTION_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(10);

/// Set this to a directory to get one log file per replica instead of terminal output.
const LOG_DIR_ENV_VAR: &str = "RAFT_TEST_LOG_DIR";

/// A command as it sits in some replica's log.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoggedCommand {
    pub term: u64,
    pub client_id: u64,
    pub call_id: u64,
    pub data: Bytes,
}

/// Echoes every command back to the client and remembers what it applied.
pub struct RecordingStateMachine {
    applied: Arc<Mutex<Vec<RaftCommittedEntry>>>,
    last_applied_index: u64,
}

impl RecordingStateMachine {
    pub fn new() -> (Self, Arc<Mutex<Vec<RaftCommittedEntry>>>) {
        let applied = Arc::new(Mutex::new(Vec::new()));
        let state_machine = RecordingStateMachine {
            applied: applied.clone(),
            last_applied_index: 0,
        };
        (state_machine, applied)
    }
}

impl StateMachine for RecordingStateMachine {
    fn apply_committed_entry(&mut self, entry: RaftCommittedEntry) -> StateMachineOutput {
        assert!(
            entry.index > self.last_applied_index,
            "Applied {} after {}",
            entry.index,
            self.last_applied_index
        );
        self.last_applied_index = entry.index;
        let output = StateMachineOutput::Data(entry.data.clone());
        self.applied.lock().unwrap().push(entry);
        output
    }

    // Nothing survives a restart, so a restarted node replays the whole committed log.
    fn last_applied_index(&self) -> u64 {
        0
    }
}

pub struct Cluster {
    name: String,
    options: RaftOptions,
    members: Vec<RaftMemberInfo>,
    storages: Vec<RaftStorage>,
    nodes: Vec<Option<RaftNode>>,
    applied: Vec<Arc<Mutex<Vec<RaftCommittedEntry>>>>,
    // Every leader observed so far, by term.
    leaders_by_term: Mutex<HashMap<u64, String>>,
}

impl Cluster {
    /// Starts `num_members` nodes listening on `port_base..port_base + num_members`. Every test
    /// in a binary needs its own port range.
    pub async fn start(name: &str, num_members: usize, port_base: u16, options: RaftOptions) -> Cluster {
        let members = (0..num_members).map(|i| member_info(port_base, i)).collect();
        let mut cluster = Cluster {
            name: name.to_string(),
            options,
            members,
            storages: (0..num_members).map(|_| RaftStorage::new()).collect(),
            nodes: (0..num_members).map(|_| None).collect(),
            applied: (0..num_members).map(|_| Arc::new(Mutex::new(Vec::new()))).collect(),
            leaders_by_term: Mutex::new(HashMap::new()),
        };
        for i in 0..num_members {
            cluster.restart(i).await;
        }
        cluster
    }

    pub fn default_options() -> RaftOptions {
        RaftOptions {
            leader_heartbeat_duration: Some(HEARTBEAT),
            follower_min_timeout: Some(HEARTBEAT * 6),
            follower_max_timeout: Some(HEARTBEAT * 12),
            peer_rpc_timeout: Some(HEARTBEAT * 4),
            ..RaftOptions::default()
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn replica_id(&self, i: usize) -> &str {
        &self.members[i].replica_id
    }

    pub fn index_of(&self, replica_id: &str) -> usize {
        self.members
            .iter()
            .position(|m| m.replica_id == replica_id)
            .unwrap_or_else(|| panic!("Unknown replica {}", replica_id))
    }

    pub fn node(&self, i: usize) -> &RaftNode {
        self.nodes[i].as_ref().unwrap_or_else(|| panic!("Replica {} is not running", i))
    }

    pub fn is_alive(&self, i: usize) -> bool {
        self.nodes[i].is_some()
    }

    pub fn alive(&self) -> Vec<usize> {
        (0..self.size()).filter(|i| self.is_alive(*i)).collect()
    }

    /// Stops replica `i`. Its storage is kept for a later `restart(i)`.
    pub async fn kill(&mut self, i: usize) {
        let node = self.nodes[i].take().unwrap_or_else(|| panic!("Replica {} already dead", i));
        println!("Killing {}", self.members[i].replica_id);
        node.shutdown().await;
    }

    /// (Re)starts replica `i` from its storage, with a fresh state machine.
    pub async fn restart(&mut self, i: usize) {
        assert!(self.nodes[i].is_none(), "Replica {} already running", i);
        let replica_id = self.members[i].replica_id.clone();
        println!("Starting {}", replica_id);

        let (state_machine, applied) = RecordingStateMachine::new();
        let node = raft_rsm::create_raft_node(RaftNodeConfig {
            my_replica_id: replica_id.clone(),
            cluster_members: self.members.clone(),
            storage: self.storages[i].clone(),
            state_machine: Box::new(state_machine),
            info_logger: test_logger(&self.name, &replica_id),
            options: self.options.clone(),
        })
        .await
        .expect("Failed to create raft node");

        self.nodes[i] = Some(node);
        self.applied[i] = applied;
    }

    pub fn client(&self, options: RaftClientOptions) -> RaftClient {
        RaftClient::new(RaftClientConfig {
            cluster_members: self.members.clone(),
            info_logger: test_logger(&self.name, "client"),
            options,
        })
        .expect("Failed to create client")
    }

    /// A client that only ever talks to replica `i`.
    pub fn client_for(&self, i: usize, options: RaftClientOptions) -> RaftClient {
        RaftClient::new(RaftClientConfig {
            cluster_members: vec![self.members[i].clone()],
            info_logger: test_logger(&self.name, "client"),
            options,
        })
        .expect("Failed to create client")
    }

    pub async fn status(&self, i: usize) -> RaftStatus {
        self.node(i).status().await.expect("Node exited")
    }

    /// Waits until exactly one alive replica leads the highest term any alive replica is in, and
    /// returns it.
    pub async fn wait_for_leader(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(leader) = self.current_leader().await {
                return leader;
            }
            assert!(Instant::now() < deadline, "No leader elected within {:?}", timeout);
            tokio::time::sleep(HEARTBEAT).await;
        }
    }

    async fn current_leader(&self) -> Option<usize> {
        let mut statuses = Vec::new();
        for i in self.alive() {
            statuses.push((i, self.status(i).await));
        }
        self.record_leaders(&statuses);
        let max_term = statuses.iter().map(|(_, s)| s.term).max()?;
        let leaders: Vec<usize> = statuses
            .iter()
            .filter(|(_, s)| s.term == max_term && s.role == RaftRole::Leader)
            .map(|(i, _)| *i)
            .collect();
        match leaders.as_slice() {
            [leader] => Some(*leader),
            [] => None,
            _ => panic!("Two leaders in term {}: {:?}", max_term, leaders),
        }
    }

    /// Panics if two replicas ever lead the same term. Terms live in the storage, so this holds
    /// across restarts too.
    fn record_leaders(&self, statuses: &[(usize, RaftStatus)]) {
        let mut leaders_by_term = self.leaders_by_term.lock().unwrap();
        for (_, status) in statuses.iter().filter(|(_, s)| s.role == RaftRole::Leader) {
            let leader = leaders_by_term
                .entry(status.term)
                .or_insert_with(|| status.replica_id.clone());
            assert_eq!(
                leader, &status.replica_id,
                "Two leaders in term {}",
                status.term
            );
        }
    }

    /// Every (term, leader) pair observed by `wait_for_leader()` so far.
    pub fn leaders_by_term(&self) -> Vec<(u64, String)> {
        let mut leaders: Vec<(u64, String)> = self.leaders_by_term.lock().unwrap().clone().into_iter().collect();
        leaders.sort();
        leaders
    }

    /// The commands in replica `i`'s log, whether it's running or not.
    pub fn logged_commands(&self, i: usize) -> Vec<LoggedCommand> {
        self.storages[i]
            .log_entries()
            .expect("Failed to read log")
            .into_iter()
            .filter_map(|entry| match entry.payload {
                RaftLogPayload::NoOp => None,
                RaftLogPayload::Command {
                    client_id,
                    call_id,
                    data,
                } => Some(LoggedCommand {
                    term: entry.term,
                    client_id,
                    call_id,
                    data,
                }),
            })
            .collect()
    }

    pub fn storage(&self, i: usize) -> &RaftStorage {
        &self.storages[i]
    }

    pub fn applied(&self, i: usize) -> Vec<RaftCommittedEntry> {
        self.applied[i].lock().unwrap().clone()
    }

    /// Polls `condition` until it holds.
    pub async fn wait_until<F>(&self, what: &str, timeout: Duration, mut condition: F)
    where
        F: FnMut(&Cluster) -> bool,
    {
        let deadline = Instant::now() + timeout;
        while !condition(self) {
            assert!(Instant::now() < deadline, "Timed out waiting until {}", what);
            tokio::time::sleep(HEARTBEAT).await;
        }
    }

    pub async fn shutdown(mut self) {
        for i in self.alive() {
            self.kill(i).await;
        }
    }
}

pub fn payload(s: impl Into<String>) -> Bytes {
    Bytes::from(s.into())
}

fn member_info(port_base: u16, id: usize) -> RaftMemberInfo {
    RaftMemberInfo {
        replica_id: format!("replica-{}", id + 1),
        ip_addr: Ipv4Addr::LOCALHOST,
        raft_rpc_port: port_base + id as u16,
    }
}

fn test_logger(test_name: &str, replica_id: &str) -> slog::Logger {
    match std::env::var(LOG_DIR_ENV_VAR) {
        Ok(directory) => create_root_logger_for_file(&directory, test_name, replica_id),
        Err(_) => create_root_logger_for_stdout(test_name, replica_id),
    }
}

fn create_root_logger_for_file(directory_prefix: &str, test_name: &str, replica_id: &str) -> slog::Logger {
    let now = Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
    let directory = format!("{}/{}", directory_prefix, test_name);
    fs::create_dir_all(&directory).unwrap();
    let log_path = format!("{}/{}_{}_info.log", directory, replica_id, now);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .unwrap();

    let decorator = slog_term::PlainDecorator::new(file);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(drain, slog::o!("Test" => test_name.to_string()))
}

fn create_root_logger_for_stdout(test_name: &str, replica_id: &str) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().filter_level(slog::Level::Info).fuse();

    slog::Logger::root(
        drain,
        slog::o!("Test" => test_name.to_string(), "Node" => replica_id.to_string()),
    )
}
