use crate::commitlog::Index;
use crate::replica::{EntryPayload, Term};
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) struct CommittedEntry {
    pub(crate) term: Term,
    pub(crate) index: Index,
    pub(crate) payload: EntryPayload,
}

pub(super) fn new() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let publisher = CommitStreamPublisher { sender: Some(tx) };
    let stream = CommitStream {
        receiver: rx,
        last_received: None,
    };

    (publisher, stream)
}

/// Write side, owned by the write-ahead log.
pub(super) struct CommitStreamPublisher {
    // None once the reader has gone away.
    sender: Option<mpsc::UnboundedSender<CommittedEntry>>,
}

impl CommitStreamPublisher {
    pub(super) fn publish(&mut self, logger: &slog::Logger, committed_entry: CommittedEntry) {
        let sender = match &self.sender {
            Some(sender) => sender,
            None => return,
        };

        if let Err(mpsc::error::SendError(entry)) = sender.send(committed_entry) {
            slog::warn!(
                logger,
                "Commit stream reader is gone. Dropping {:?} and every entry after it.",
                entry.index
            );
            self.sender = None;
        }
    }
}

/// CommitStream yields committed entries in index order, each exactly once per replica
/// incarnation. The first entry may be anywhere in the log (entries the state machine already
/// holds are skipped), but after that there are no gaps. It ends when the replica's
/// write-ahead log is dropped.
pub(crate) struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
    last_received: Option<Index>,
}

impl CommitStream {
    pub(crate) async fn recv(&mut self) -> Option<CommittedEntry> {
        let committed_entry = self.receiver.recv().await?;

        if let Some(last) = self.last_received {
            assert_eq!(
                committed_entry.index,
                last.plus(1),
                "Commit stream must not skip or repeat entries"
            );
        }
        self.last_received.replace(committed_entry.index);

        Some(committed_entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(index: u64) -> CommittedEntry {
        CommittedEntry {
            term: Term::new(1),
            index: Index::new(index),
            payload: EntryPayload::NoOp,
        }
    }

    #[tokio::test]
    async fn stream_starts_anywhere_then_is_contiguous() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let (mut publisher, mut stream) = new();

        publisher.publish(&logger, entry(4));
        publisher.publish(&logger, entry(5));
        assert_eq!(stream.recv().await.unwrap().index, Index::new(4));
        assert_eq!(stream.recv().await.unwrap().index, Index::new(5));

        drop(publisher);
        assert!(stream.recv().await.is_none());
    }

    #[tokio::test]
    #[should_panic(expected = "must not skip or repeat")]
    async fn gap_in_stream_panics() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let (mut publisher, mut stream) = new();

        publisher.publish(&logger, entry(1));
        publisher.publish(&logger, entry(3));
        stream.recv().await;
        stream.recv().await;
    }

    #[test]
    fn publishing_without_reader_is_harmless() {
        let logger = slog::Logger::root(slog::Discard, slog::o!());
        let (mut publisher, stream) = new();
        drop(stream);

        publisher.publish(&logger, entry(1));
        publisher.publish(&logger, entry(2));
        assert!(publisher.sender.is_none());
    }
}
