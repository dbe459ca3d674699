use crate::commitlog::{InMemoryLog, Index, Log};
use crate::replica::{EntryPayload, LocalStateStore, WriteAheadLogEntry};
use bytes::Bytes;
use std::io;

/// RaftStorage is everything a node persists: its log, its commit index, and its current term and
/// vote. Clones share the same storage, so creating a node again from a clone of the handle
/// behaves like restarting a process on the same disk.
#[derive(Clone)]
pub struct RaftStorage {
    pub(super) log: InMemoryLog<WriteAheadLogEntry>,
    pub(super) local_state: LocalStateStore,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RaftLogEntry {
    pub index: u64,
    pub term: u64,
    pub payload: RaftLogPayload,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RaftLogPayload {
    /// Appended by every leader at the start of its term.
    NoOp,
    Command { client_id: u64, call_id: u64, data: Bytes },
}

impl RaftStorage {
    pub fn new() -> Self {
        RaftStorage {
            log: InMemoryLog::create(),
            local_state: LocalStateStore::default(),
        }
    }

    /// Every entry currently in the log, in index order.
    pub fn log_entries(&self) -> Result<Vec<RaftLogEntry>, io::Error> {
        let entries = self.log.read_range(Index::start_index(), self.log.next_index().as_u64() as usize)?;

        Ok(entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| RaftLogEntry {
                index: i as u64 + 1,
                term: entry.term.as_u64(),
                payload: match entry.payload {
                    EntryPayload::NoOp => RaftLogPayload::NoOp,
                    EntryPayload::Command(command) => RaftLogPayload::Command {
                        client_id: command.client_id,
                        call_id: command.call_id,
                        data: command.data,
                    },
                },
            })
            .collect())
    }

    pub fn current_term(&self) -> u64 {
        self.local_state.current_term().as_u64()
    }

    /// Highest index persisted as committed, or 0.
    pub fn commit_index(&self) -> u64 {
        self.log.persisted_commit_index().map_or(0, |i| i.as_u64())
    }
}

impl Default for RaftStorage {
    fn default() -> Self {
        Self::new()
    }
}
