use crate::actor::{Callback, Event};
use crate::replica;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
#[error("Replica actor is dead RIP")]
pub(crate) struct ActorExited;

/// ActorClient keeps the replica actor alive. Once every ActorClient is dropped, the actor drains
/// its queue and exits.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// WeakActorClient can talk to the actor without keeping it alive. Used by everything the actor
/// owns or spawns, so that dropping the last ActorClient shuts the replica down.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn retry_cache_get_or_create(
        &self,
        key: replica::RetryCacheKey,
    ) -> Result<replica::RetryCacheLookup, ActorExited> {
        self.call(|callback| Event::RetryCacheGetOrCreate(key, callback), || ActorExited)
            .await
    }

    pub(crate) async fn status(&self) -> Result<replica::ReplicaStatus, ActorExited> {
        self.call(Event::Status, || ActorExited).await
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        input: replica::RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::RequestVoteReplyFromPeer(input)).await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        input: replica::AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        self.send(Event::AppendEntriesReplyFromPeer(input)).await
    }

    pub(crate) async fn leader_timer(&self, input: replica::LeaderTimerTick) -> Result<(), ActorExited> {
        self.send(Event::LeaderTimer(input)).await
    }

    pub(crate) async fn follower_timeout(&self, input: replica::FollowerTimeoutTick) -> Result<(), ActorExited> {
        self.send(Event::FollowerTimeout(input)).await
    }

    pub(crate) async fn entry_applied(&self, input: replica::AppliedEntry) -> Result<(), ActorExited> {
        self.send(Event::EntryApplied(input)).await
    }

    async fn call<O, E>(&self, event: impl FnOnce(Callback<O, E>) -> Event, actor_exited: fn() -> E) -> Result<O, E>
    where
        O: Debug,
        E: Error,
    {
        let (tx, rx) = oneshot::channel();
        self.send(event(Callback(tx))).await.map_err(|_| actor_exited())?;

        // The actor drops pending callbacks when it exits.
        rx.await.unwrap_or_else(|_| Err(actor_exited()))
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        self.sender.send(event).await.map_err(|_| ActorExited)
    }
}

macro_rules! upgrade_or {
    ($self:ident, $exited:expr) => {
        match $self.upgrade() {
            Some(client) => client,
            None => return Err($exited),
        }
    };
}

impl WeakActorClient {
    fn upgrade(&self) -> Option<ActorClient> {
        self.sender.upgrade().map(|sender| ActorClient { sender })
    }

    pub(crate) async fn client_request(
        &self,
        input: replica::ClientRequestInput,
    ) -> Result<replica::ClientRequestOutput, replica::ClientRequestError> {
        self.call(
            |callback| Event::ClientRequest(input, callback),
            || replica::ClientRequestError::ActorExited,
        )
        .await
    }

    pub(crate) async fn request_vote(
        &self,
        input: replica::RequestVoteInput,
    ) -> Result<replica::RequestVoteOutput, replica::RequestVoteError> {
        self.call(
            |callback| Event::RequestVote(input, callback),
            || replica::RequestVoteError::ActorExited,
        )
        .await
    }

    pub(crate) async fn append_entries(
        &self,
        input: replica::AppendEntriesInput,
    ) -> Result<replica::AppendEntriesOutput, replica::AppendEntriesError> {
        self.call(
            |callback| Event::AppendEntries(input, callback),
            || replica::AppendEntriesError::ActorExited,
        )
        .await
    }

    pub(crate) async fn timeout_now(&self, input: replica::TimeoutNowInput) -> Result<(), replica::TimeoutNowError> {
        self.call(
            |callback| Event::TimeoutNow(input, callback),
            || replica::TimeoutNowError::ActorExited,
        )
        .await
    }

    pub(crate) async fn transfer_leadership(
        &self,
    ) -> Result<replica::TransferLeadershipOutput, replica::TransferLeadershipError> {
        self.call(Event::TransferLeadership, || {
            replica::TransferLeadershipError::ActorExited
        })
        .await
    }

    // Holds a strong client only while enqueueing. A caller waiting on a slow reply (e.g. a client
    // request waiting to commit) must not keep the replica alive.
    async fn call<O, E>(&self, event: impl FnOnce(Callback<O, E>) -> Event, actor_exited: fn() -> E) -> Result<O, E>
    where
        O: Debug,
        E: Error,
    {
        let (tx, rx) = oneshot::channel();
        {
            let client = upgrade_or!(self, actor_exited());
            client.send(event(Callback(tx))).await.map_err(|_| actor_exited())?;
        }

        rx.await.unwrap_or_else(|_| Err(actor_exited()))
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(
        &self,
        input: replica::RequestVoteReplyFromPeer,
    ) -> Result<(), ActorExited> {
        upgrade_or!(self, ActorExited)
            .notify_request_vote_reply_from_peer(input)
            .await
    }

    pub(crate) async fn notify_append_entries_reply_from_peer(
        &self,
        input: replica::AppendEntriesReplyFromPeer,
    ) -> Result<(), ActorExited> {
        upgrade_or!(self, ActorExited)
            .notify_append_entries_reply_from_peer(input)
            .await
    }

    pub(crate) async fn leader_timer(&self, input: replica::LeaderTimerTick) -> Result<(), ActorExited> {
        upgrade_or!(self, ActorExited).leader_timer(input).await
    }

    pub(crate) async fn follower_timeout(&self, input: replica::FollowerTimeoutTick) -> Result<(), ActorExited> {
        upgrade_or!(self, ActorExited).follower_timeout(input).await
    }

    pub(crate) async fn entry_applied(&self, input: replica::AppliedEntry) -> Result<(), ActorExited> {
        upgrade_or!(self, ActorExited).entry_applied(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replica::{LeaderTimerTick, ReplicaId, Term};

    fn tick() -> LeaderTimerTick {
        LeaderTimerTick {
            peer_id: ReplicaId::new("peer"),
            term: Term::new(1),
        }
    }

    #[tokio::test]
    async fn weak_client_does_not_keep_actor_alive() {
        let (client, mut rx) = ActorClient::new(10);
        let weak = client.weak();

        weak.leader_timer(tick()).await.unwrap();
        assert!(matches!(rx.recv().await, Some(Event::LeaderTimer(_))));

        drop(client);
        assert!(weak.leader_timer(tick()).await.is_err());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropped_callback_maps_to_actor_exited() {
        let (client, mut rx) = ActorClient::new(10);

        let actor = tokio::spawn(async move {
            // Receive the event and drop it without replying, like an exiting actor would.
            let event = rx.recv().await;
            assert!(matches!(event, Some(Event::Status(_))));
        });

        assert!(client.status().await.is_err());
        actor.await.unwrap();
    }
}
