use crate::actor::WeakActorClient;
use crate::api::{RaftCommittedEntry, StateMachine};
use crate::replica::{AppliedEntry, CommitStream, CommittedEntry, EntryPayload};

/// StateMachineApplier feeds committed entries, in index order, to the application's state
/// machine on its own task, then tells the replica what each entry produced.
pub(crate) struct StateMachineApplier {
    logger: slog::Logger,
    commit_stream: CommitStream,
    state_machine: Box<dyn StateMachine + Send>,
    replica: WeakActorClient,
}

impl StateMachineApplier {
    pub(crate) fn new(
        logger: slog::Logger,
        commit_stream: CommitStream,
        state_machine: Box<dyn StateMachine + Send>,
        replica: WeakActorClient,
    ) -> Self {
        StateMachineApplier {
            logger,
            commit_stream,
            state_machine,
            replica,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(committed_entry) = self.commit_stream.recv().await {
            let applied_entry = self.apply(committed_entry);
            if self.replica.entry_applied(applied_entry).await.is_err() {
                break;
            }
        }

        slog::info!(self.logger, "Replica is gone. State machine applier exiting.");
    }

    fn apply(&mut self, committed_entry: CommittedEntry) -> AppliedEntry {
        let output = match committed_entry.payload {
            // Leader bookkeeping only. The application never sees these.
            EntryPayload::NoOp => None,
            EntryPayload::Command(command) => {
                let output = self.state_machine.apply_committed_entry(RaftCommittedEntry {
                    term: committed_entry.term.as_u64(),
                    index: committed_entry.index.as_u64(),
                    client_id: command.client_id,
                    call_id: command.call_id,
                    data: command.data,
                });
                Some(output)
            }
        };
        slog::debug!(self.logger, "Applied entry {:?}", committed_entry.index);

        AppliedEntry {
            index: committed_entry.index,
            output,
        }
    }
}
