use crate::commitlog;
use crate::commitlog::Index;
use crate::replica::local_state::Term;
use crate::replica::write_ahead_log::commit_stream::{CommitStreamPublisher, CommittedEntry};
use crate::replica::WriteAheadLogEntry;
use std::{cmp, io};

const PUBLISH_BATCH_SIZE: usize = 64;

/// WriteAheadLog is the raft-specific log facade.
///
/// Note: A log entry has 3 states (not modeled directly in code):
/// 1. Persisted - written to disk, not yet replicated to majority
/// 2. Committed - written to disk, replicated to majority
/// 3. Applied - a committed entry that has also been applied to the state machine
///
/// A log entry's state has no global truth. Each replica will have their own local view of what
/// state the log entry is in.
///
/// This type only knows about "published": committed entries handed to the commit stream. The
/// state machine applier consumes that stream and reports back when it has applied an entry.
pub(in super::super) struct WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    // Application's info/debug log.
    logger: slog::Logger,

    // This is the log that we're replicating.
    log: L,
    // Metadata about the highest log entry that we've locally written. It must be updated atomically.
    latest_entry_metadata: Option<(Term, Index)>,

    // Commit stream to publish committed entries to. Consumed by the state machine applier task.
    commit_stream: CommitStreamPublisher,
    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<Index>,
    // Index of highest log entry published to the commit stream. None if nothing is published.
    last_published_index: Option<Index>,
}

impl<L> WriteAheadLog<L>
where
    L: commitlog::Log<WriteAheadLogEntry>,
{
    /// Initializes from whatever `log` already holds. `applied_checkpoint` is the highest index
    /// the state machine has already applied; only entries after it are published.
    pub(super) fn new(
        logger: slog::Logger,
        log: L,
        commit_stream: CommitStreamPublisher,
        applied_checkpoint: Option<Index>,
    ) -> Result<Self, io::Error> {
        let latest_entry_metadata = match log.next_index().checked_minus(1) {
            None => None,
            Some(latest_index) => match log.read(latest_index)? {
                Some(entry) => Some((entry.term, latest_index)),
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("log entry {:?} is missing before the log's next index", latest_index),
                    ))
                }
            },
        };
        let latest_index = latest_entry_metadata.map(|(_, index)| index);

        // Neither can be ahead of our log, but clamp them anyway. Anything the state machine
        // applied was committed, even if the commit index write didn't make it to disk.
        let applied_checkpoint = cmp::min(applied_checkpoint, latest_index);
        let commit_index = cmp::max(cmp::min(log.persisted_commit_index(), latest_index), applied_checkpoint);
        let last_published_index = applied_checkpoint;

        slog::info!(
            logger,
            "Initialized write ahead log. Latest entry: {:?}, commit index: {:?}, applied checkpoint: {:?}",
            latest_entry_metadata,
            commit_index,
            applied_checkpoint,
        );

        let mut wal = WriteAheadLog {
            logger,
            log,
            latest_entry_metadata,
            commit_stream,
            commit_index,
            last_published_index,
        };
        wal.publish_committed_entries()?;

        Ok(wal)
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, Index)> {
        self.latest_entry_metadata
    }

    pub(crate) fn latest_index(&self) -> Option<Index> {
        self.latest_entry_metadata.map(|(_, index)| index)
    }

    pub(crate) fn read(&self, index: Index) -> Result<Option<WriteAheadLogEntry>, io::Error> {
        self.log.read(index)
    }

    pub(crate) fn read_range(&self, start: Index, max_entries: usize) -> Result<Vec<WriteAheadLogEntry>, io::Error> {
        self.log.read_range(start, max_entries)
    }

    fn read_required(&self, index: Index) -> Result<WriteAheadLogEntry, io::Error> {
        match self.read(index)? {
            Some(entry) => Ok(entry),
            None => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("expected log entry at index {:?}", index),
            )),
        }
    }

    /// Remove anything starting at `index` and later. Committed entries can never be removed.
    pub(crate) fn truncate(&mut self, index: Index) -> Result<(), io::Error> {
        if let Some(commit_index) = self.commit_index {
            assert!(
                index > commit_index,
                "Can't truncate committed entries. Truncate index {:?}, commit index {:?}",
                index,
                commit_index,
            );
        }

        let mut new_latest_entry_metadata = None;
        if let Some(new_latest_entry_index) = index.checked_minus(1) {
            new_latest_entry_metadata = Some((self.read_required(new_latest_entry_index)?.term, new_latest_entry_index));
        }

        // Only update state after we've successfully read what the new state will be.
        self.log.truncate(index)?;
        slog::info!(self.logger, "Truncated log from index {:?}", index);

        self.latest_entry_metadata = new_latest_entry_metadata;
        Ok(())
    }

    pub(crate) fn append(&mut self, entry: WriteAheadLogEntry) -> Result<Index, io::Error> {
        let appended_term = entry.term;
        let appended_index = self.log.append(entry)?;
        // Only update state after log action completes.
        self.latest_entry_metadata = Some((appended_term, appended_index));

        Ok(appended_index)
    }

    pub(crate) fn commit_index(&self) -> Option<Index> {
        self.commit_index
    }

    /// Leader path. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: Index,
        current_term: Term,
    ) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if tentative_new_commit_index <= ci) {
            return Ok(false);
        }

        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        let entry = self.read_required(tentative_new_commit_index)?;
        if entry.term != current_term {
            return Ok(false);
        }

        self.ratchet_fwd_commit_index_unchecked(tentative_new_commit_index)?;
        Ok(true)
    }

    /// Follower path. A leader may know of a lower commit index than we do (e.g. right after it
    /// was elected), so anything that isn't forward progress is ignored.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: Index) -> Result<bool, io::Error> {
        if matches!(self.commit_index, Some(ci) if new_commit_index <= ci) {
            return Ok(false);
        }

        self.ratchet_fwd_commit_index_unchecked(new_commit_index)?;
        Ok(true)
    }

    fn ratchet_fwd_commit_index_unchecked(&mut self, new_commit_index: Index) -> Result<(), io::Error> {
        // Assert we only mark as committed if we have the entry locally.
        let latest_locally_written_index = self
            .latest_index()
            .expect("Can't ratchet commit index forward if we don't have any local logs");
        assert!(
            latest_locally_written_index >= new_commit_index,
            "Can't ratchet commit index forwards past our local log. Expected [latest log] {:?} >= {:?} [input]",
            latest_locally_written_index,
            new_commit_index,
        );

        self.log.persist_commit_index(new_commit_index)?;
        self.commit_index.replace(new_commit_index);
        Ok(())
    }

    /// Publishes all committed but unpublished entries to the commit stream, in order.
    pub(crate) fn publish_committed_entries(&mut self) -> Result<(), io::Error> {
        let commit_index = match self.commit_index {
            Some(ci) => ci,
            None => return Ok(()),
        };

        loop {
            let next_index = match self.last_published_index {
                None => Index::start_index(),
                Some(published) if published >= commit_index => return Ok(()),
                Some(published) => published.plus(1),
            };
            let max_entries = cmp::min(PUBLISH_BATCH_SIZE as u64, commit_index.as_u64() - next_index.as_u64() + 1);

            let entries = self.read_range(next_index, max_entries as usize)?;
            if entries.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("committed log entry {:?} is missing", next_index),
                ));
            }

            let mut index = next_index;
            for entry in entries {
                self.commit_stream.publish(
                    &self.logger,
                    CommittedEntry {
                        term: entry.term,
                        index,
                        payload: entry.payload,
                    },
                );
                self.last_published_index.replace(index);
                index = index.plus(1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitlog::{InMemoryLog, Log};
    use crate::replica::write_ahead_log::commit_stream::{self, CommitStream};
    use crate::replica::{CommandEntry, EntryPayload};
    use bytes::Bytes;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn command(term: u64, call_id: u64) -> WriteAheadLogEntry {
        WriteAheadLogEntry {
            term: Term::new(term),
            payload: EntryPayload::Command(CommandEntry {
                client_id: 1,
                call_id,
                data: Bytes::from(format!("call-{}", call_id)),
            }),
        }
    }

    fn new_wal(
        log: InMemoryLog<WriteAheadLogEntry>,
        checkpoint: Option<Index>,
    ) -> (WriteAheadLog<InMemoryLog<WriteAheadLogEntry>>, CommitStream) {
        let (publisher, stream) = commit_stream::new();
        let wal = WriteAheadLog::new(logger(), log, publisher, checkpoint).unwrap();
        (wal, stream)
    }

    async fn assert_published(stream: &mut CommitStream, expected_indexes: &[u64]) {
        for expected in expected_indexes {
            let committed = stream.recv().await.unwrap();
            assert_eq!(committed.index, Index::new(*expected));
        }
    }

    #[tokio::test]
    async fn empty_log() {
        let (wal, _stream) = new_wal(InMemoryLog::create(), None);
        assert_eq!(wal.latest_entry(), None);
        assert_eq!(wal.commit_index(), None);
    }

    #[tokio::test]
    async fn append_and_truncate_track_latest_entry() {
        let (mut wal, _stream) = new_wal(InMemoryLog::create(), None);

        wal.append(command(1, 1)).unwrap();
        wal.append(command(1, 2)).unwrap();
        wal.append(command(2, 3)).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(2), Index::new(3))));

        wal.truncate(Index::new(2)).unwrap();
        assert_eq!(wal.latest_entry(), Some((Term::new(1), Index::new(1))));

        wal.truncate(Index::new(1)).unwrap();
        assert_eq!(wal.latest_entry(), None);
    }

    #[tokio::test]
    async fn leader_only_commits_entries_from_current_term() {
        let (mut wal, mut stream) = new_wal(InMemoryLog::create(), None);
        wal.append(command(1, 1)).unwrap();
        wal.append(command(2, 2)).unwrap();

        // Entry 1 is from an older term, so it can't be committed by counting replicas.
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(1), Term::new(2)).unwrap());
        assert_eq!(wal.commit_index(), None);

        // Committing entry 2 commits entry 1 indirectly.
        assert!(wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        assert!(!wal.ratchet_fwd_commit_index_if_valid(Index::new(2), Term::new(2)).unwrap());
        wal.publish_committed_entries().unwrap();
        assert_published(&mut stream, &[1, 2]).await;
    }

    #[tokio::test]
    async fn follower_commit_index_never_moves_backwards() {
        let (mut wal, _stream) = new_wal(InMemoryLog::create(), None);
        wal.append(command(1, 1)).unwrap();
        wal.append(command(1, 2)).unwrap();

        assert!(wal.ratchet_fwd_commit_index(Index::new(2)).unwrap());
        assert!(!wal.ratchet_fwd_commit_index(Index::new(1)).unwrap());
        assert_eq!(wal.commit_index(), Some(Index::new(2)));
    }

    #[test]
    #[should_panic]
    fn truncating_committed_entry_panics() {
        let (mut wal, _stream) = new_wal(InMemoryLog::create(), None);
        wal.append(command(1, 1)).unwrap();
        wal.ratchet_fwd_commit_index(Index::new(1)).unwrap();
        let _ = wal.truncate(Index::new(1));
    }

    #[tokio::test]
    async fn restart_resumes_from_persisted_state() {
        let log = InMemoryLog::create();
        {
            let (mut wal, _stream) = new_wal(log.clone(), None);
            for call_id in 1..=5 {
                wal.append(command(3, call_id)).unwrap();
            }
            wal.ratchet_fwd_commit_index_if_valid(Index::new(4), Term::new(3)).unwrap();
        }
        assert_eq!(log.persisted_commit_index(), Some(Index::new(4)));

        // State machine says it already applied up to 2, so only 3 and 4 are re-published.
        let (wal, mut stream) = new_wal(log, Some(Index::new(2)));
        assert_eq!(wal.latest_entry(), Some((Term::new(3), Index::new(5))));
        assert_eq!(wal.commit_index(), Some(Index::new(4)));
        assert_published(&mut stream, &[3, 4]).await;
        drop(wal);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    async fn applied_checkpoint_counts_as_committed() {
        let log = InMemoryLog::create();
        {
            let (mut wal, _stream) = new_wal(log.clone(), None);
            for call_id in 1..=3 {
                wal.append(command(1, call_id)).unwrap();
            }
        }

        // Commit index never hit disk, but the state machine applied up to 2.
        let (mut wal, mut stream) = new_wal(log, Some(Index::new(2)));
        assert_eq!(wal.commit_index(), Some(Index::new(2)));

        wal.ratchet_fwd_commit_index(Index::new(3)).unwrap();
        wal.publish_committed_entries().unwrap();
        assert_published(&mut stream, &[3]).await;
    }
}
