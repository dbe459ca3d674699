//! Raft's view of the generic commit log: terms on every entry, conflict truncation, the commit
//! index, and the stream of committed entries that feeds the state machine.

mod commit_stream;
mod log;
mod log_entry;
mod wiring;

pub(crate) use commit_stream::CommitStream;
pub(crate) use commit_stream::CommittedEntry;
pub(crate) use log_entry::CommandEntry;
pub(crate) use log_entry::EntryPayload;
pub(crate) use log_entry::WriteAheadLogEntry;

pub(super) use log::WriteAheadLog;
pub(super) use wiring::wired;
