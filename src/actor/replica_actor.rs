use crate::actor::Event;
use crate::commitlog::Log;
use crate::replica::{Replica, WriteAheadLogEntry};
use crate::server::ShutdownCause;
use tokio::sync::mpsc;

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<L>
where
    L: Log<WriteAheadLogEntry>,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: Replica<L>,
}

impl<L> ReplicaActor<L>
where
    L: Log<WriteAheadLogEntry> + Send + 'static,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: Replica<L>) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        loop {
            tokio::select! {
                event = self.receiver.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        slog::info!(self.logger, "All actor clients dropped. Replica is shutting down.");
                        break;
                    }
                },
                expired_key = self.replica.next_expired_retry_cache_key() => {
                    self.replica.handle_retry_cache_expiry(expired_key);
                }
            }

            if let Some(fault) = self.replica.take_fault() {
                slog::crit!(self.logger, "Replica hit a fatal fault and is stopping: {}", fault);
                self.replica.shut_down_server(ShutdownCause::ReplicaFault(fault.to_string()));
                break;
            }
        }
        // Dropping the replica stops its timers and its RPC server.
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and come back as an event to this actor.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::ClientRequest(input, callback) => {
                self.replica.handle_client_request(input, callback);
            }
            Event::RequestVote(input, callback) => {
                let result = self.replica.server_handle_request_vote(input);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(input) => {
                self.replica.handle_request_vote_reply_from_peer(input);
            }
            Event::AppendEntries(input, callback) => {
                let result = self.replica.server_handle_append_entries(input);
                callback.send(result);
            }
            Event::AppendEntriesReplyFromPeer(input) => {
                self.replica.handle_append_entries_reply_from_peer(input);
            }
            Event::TimeoutNow(input, callback) => {
                let result = self.replica.server_handle_timeout_now(input);
                callback.send(result);
            }
            Event::TransferLeadership(callback) => {
                let result = self.replica.handle_transfer_leadership();
                callback.send(result);
            }
            Event::LeaderTimer(input) => {
                self.replica.handle_leader_timer(input);
            }
            Event::FollowerTimeout(input) => {
                self.replica.handle_follower_timeout(input);
            }
            Event::EntryApplied(input) => {
                self.replica.handle_entry_applied(input);
            }
            Event::RetryCacheGetOrCreate(key, callback) => {
                callback.send(Ok(self.replica.retry_cache_get_or_create(key)));
            }
            Event::Status(callback) => {
                callback.send(Ok(self.replica.status()));
            }
        }
    }
}
