use crate::replica;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::oneshot;

// Handlers must never block the actor. Anything slow (peer RPCs, applying to the state machine)
// runs on another task and reports back with one of the `*FromPeer`/`EntryApplied` events.
#[derive(Debug)]
pub(crate) enum Event {
    // Leader: dedupe through the retry cache, append, replicate. Reply once applied.
    // Candidate/Follower: redirect.
    ClientRequest(
        replica::ClientRequestInput,
        Callback<replica::ClientRequestOutput, replica::ClientRequestError>,
    ),

    // All: grant vote if applicable (includes write to disk). Step down on higher term.
    RequestVote(
        replica::RequestVoteInput,
        Callback<replica::RequestVoteOutput, replica::RequestVoteError>,
    ),

    // Candidate: count vote, become leader on majority.
    // Leader/Follower: discard, unless the reply carries a higher term.
    RequestVoteReplyFromPeer(replica::RequestVoteReplyFromPeer),

    // All: step down if applicable, reconcile log, advance commit index. Reset follower timeout.
    AppendEntries(
        replica::AppendEntriesInput,
        Callback<replica::AppendEntriesOutput, replica::AppendEntriesError>,
    ),

    // Leader: update peer progress, advance commit index, send follow-up if the peer is behind.
    // Candidate/Follower: discard, unless the reply carries a higher term.
    AppendEntriesReplyFromPeer(replica::AppendEntriesReplyFromPeer),

    // Follower: start an election right away.
    TimeoutNow(replica::TimeoutNowInput, Callback<(), replica::TimeoutNowError>),

    // Leader: ask the most caught up peer to start an election, then step down.
    TransferLeadership(Callback<replica::TransferLeadershipOutput, replica::TransferLeadershipError>),

    // Leader: send AppendEntries to one peer.
    LeaderTimer(replica::LeaderTimerTick),

    // Follower/Candidate: start a new election, unless the tick is stale.
    FollowerTimeout(replica::FollowerTimeoutTick),

    // All: track last applied. Leader: release the reply waiting on this entry.
    EntryApplied(replica::AppliedEntry),

    RetryCacheGetOrCreate(replica::RetryCacheKey, Callback<replica::RetryCacheLookup, super::ActorExited>),

    Status(Callback<replica::ReplicaStatus, super::ActorExited>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(pub(crate) oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub(crate) fn send(self, message: Result<O, E>) {
        // Caller may have given up waiting.
        let _ = self.0.send(message);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}
