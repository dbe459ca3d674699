use crate::commitlog::Index;
use crate::replica::election::timers::LeaderTimerHandle;
use crate::replica::ReplicaId;
use std::cmp;
use std::collections::{HashMap, HashSet};

pub(crate) struct LeaderStateTracker {
    peer_state: HashMap<ReplicaId, PeerState>,
}

impl LeaderStateTracker {
    pub(super) fn new(peer_state: HashMap<ReplicaId, PeerState>) -> Self {
        LeaderStateTracker { peer_state }
    }

    pub(crate) fn peer_state_mut(&mut self, peer_id: &ReplicaId) -> Option<&mut PeerState> {
        self.peer_state.get_mut(peer_id)
    }

    pub(crate) fn peer_ids(&self) -> HashSet<ReplicaId> {
        self.peer_state.keys().cloned().collect()
    }

    pub(crate) fn peers_matched_indexes(&self) -> Vec<Option<Index>> {
        self.peer_state.values().map(PeerState::matched).collect()
    }

    /// Returns true if every peer is known to store the entry at `index`.
    pub(crate) fn all_peers_matched(&self, index: Index) -> bool {
        self.peer_state
            .values()
            .all(|peer_state| peer_state.matched().map_or(false, |matched| matched >= index))
    }

    /// The peer with the most replicated log is the best candidate to take over leadership.
    /// Ties go to the smallest ID so the choice is deterministic.
    pub(crate) fn most_caught_up_peer(&self) -> Option<ReplicaId> {
        self.peer_state
            .iter()
            .max_by(|(id_a, state_a), (id_b, state_b)| {
                state_a
                    .matched()
                    .cmp(&state_b.matched())
                    .then_with(|| id_b.cmp(id_a))
            })
            .map(|(peer_id, _)| peer_id.clone())
    }
}

pub(crate) struct PeerState {
    // Held to send heartbeats for this peer
    leader_timer_handler: LeaderTimerHandle,

    // > index of the next log entry to send to that server
    // > (initialized to leader last log index + 1)
    next: Index,
    // > index of highest log entry known to be replicated on server
    // > (initialized to 0, increases monotonically)
    matched: Option<Index>,

    // SeqNo is a logical clock of this leader's requests to this peer. A reply is only accepted
    // if it is for a request newer than the last accepted reply, which drops reordered replies.
    last_sent_seq_no: u64,
    last_received_seq_no: u64,
}

impl PeerState {
    pub(super) fn new(leader_timer_handler: LeaderTimerHandle, leader_last_log_index: Option<Index>) -> Self {
        PeerState {
            leader_timer_handler,
            next: leader_last_log_index
                .map(|i| i.plus(1))
                .unwrap_or_else(Index::start_index),
            matched: None,
            last_sent_seq_no: 0,
            last_received_seq_no: 0,
        }
    }

    pub(crate) fn next_and_previous_log_index(&self) -> (Index, Option<Index>) {
        (self.next, self.next.checked_minus(1))
    }

    pub(crate) fn matched(&self) -> Option<Index> {
        self.matched
    }

    /// Applies the outcome of an AppendEntries call. Returns false if the reply was stale and
    /// dropped.
    pub(crate) fn handle_append_entries_result(
        &mut self,
        logger: &slog::Logger,
        received_seq_no: u64,
        update: PeerStateUpdate,
    ) -> bool {
        if !self.ratchet_fwd_received_seq_no(received_seq_no) {
            slog::warn!(
                logger,
                "Dropping out of date seq-no({:?}): {:?}",
                received_seq_no,
                update
            );
            return false;
        }

        match update {
            PeerStateUpdate::OtherError => { /* No action */ }
            PeerStateUpdate::Success {
                previous_log_entry,
                num_entries_replicated,
            } => {
                self.update_log(previous_log_entry, num_entries_replicated);
            }
            PeerStateUpdate::PeerLogBehind { next_index_hint } => {
                self.rewind_log(logger, next_index_hint);
            }
        }

        true
    }

    fn update_log(&mut self, previous_log_entry: Option<Index>, num_entries_replicated: usize) {
        // A successful call, even an empty heartbeat, proves the peer's log matches ours up to
        // and including the last entry of the call.
        let new_matched = match (previous_log_entry, num_entries_replicated) {
            (None, 0) => return,
            (None, n) => Index::new_usize(n),
            (Some(prev), n) => prev.plus(n as u64),
        };

        self.matched = cmp::max(self.matched, Some(new_matched));
        self.next = cmp::max(self.next, new_matched.plus(1));
    }

    fn rewind_log(&mut self, logger: &slog::Logger, next_index_hint: Option<Index>) {
        // Entries up to `matched` are known to be on the peer, so never go back past them.
        let floor = self.matched.map(|m| m.plus(1)).unwrap_or_else(Index::start_index);

        let one_back = match self.next.checked_minus(1) {
            Some(one_back) => one_back,
            None => {
                slog::warn!(logger, "Can't rewind peer log, already at beginning of log.");
                return;
            }
        };

        // The peer's hint lets us skip a whole diverging suffix at once. Never move forward
        // because of it; the peer could return garbage.
        let tentative = match next_index_hint {
            Some(hint) => cmp::min(one_back, hint),
            None => one_back,
        };

        if tentative < floor {
            slog::warn!(
                logger,
                "Peer asked to rewind to {:?}, behind its matched index {:?}. Clamping.",
                tentative,
                self.matched
            );
        }
        self.next = cmp::max(tentative, floor);
    }

    pub(crate) fn has_outstanding_request(&self) -> bool {
        self.last_received_seq_no < self.last_sent_seq_no
    }

    pub(crate) fn next_seq_no(&mut self) -> u64 {
        self.last_sent_seq_no += 1;
        self.last_sent_seq_no
    }

    /// returns true if the state was mutated.
    fn ratchet_fwd_received_seq_no(&mut self, received_seq_no: u64) -> bool {
        if self.last_received_seq_no < received_seq_no && received_seq_no <= self.last_sent_seq_no {
            self.last_received_seq_no = received_seq_no;
            true
        } else {
            false
        }
    }

    pub(crate) fn reset_heartbeat_timer(&self) {
        self.leader_timer_handler.reset_heartbeat_timer();
    }
}

#[derive(Debug)]
pub(crate) enum PeerStateUpdate {
    Success {
        previous_log_entry: Option<Index>,
        num_entries_replicated: usize,
    },
    PeerLogBehind {
        next_index_hint: Option<Index>,
    },
    OtherError,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::ActorClient;
    use crate::replica::Term;
    use std::time::Duration;

    fn logger() -> slog::Logger {
        slog::Logger::root(slog::Discard, slog::o!())
    }

    fn peer_state(client: &ActorClient, leader_last_log_index: Option<Index>) -> PeerState {
        let timer = LeaderTimerHandle::spawn_timer_task(
            Duration::from_secs(60),
            client.weak(),
            ReplicaId::new("peer"),
            Term::new(1),
        );
        PeerState::new(timer, leader_last_log_index)
    }

    fn send_and_receive(state: &mut PeerState, update: PeerStateUpdate) -> bool {
        let seq_no = state.next_seq_no();
        assert!(state.has_outstanding_request());
        let accepted = state.handle_append_entries_result(&logger(), seq_no, update);
        assert!(!state.has_outstanding_request());
        accepted
    }

    #[tokio::test]
    async fn starts_right_after_leader_log() {
        let (client, _rx) = ActorClient::new(10);

        let state = peer_state(&client, None);
        assert_eq!(state.next_and_previous_log_index(), (Index::new(1), None));

        let state = peer_state(&client, Some(Index::new(7)));
        assert_eq!(
            state.next_and_previous_log_index(),
            (Index::new(8), Some(Index::new(7)))
        );
        assert_eq!(state.matched(), None);
    }

    #[tokio::test]
    async fn success_moves_matched_and_next_forward_only() {
        let (client, _rx) = ActorClient::new(10);
        let mut state = peer_state(&client, Some(Index::new(4)));

        // Heartbeat at prev=4 proves the peer has 1..=4.
        send_and_receive(
            &mut state,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(4)),
                num_entries_replicated: 0,
            },
        );
        assert_eq!(state.matched(), Some(Index::new(4)));
        assert_eq!(state.next_and_previous_log_index().0, Index::new(5));

        send_and_receive(
            &mut state,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(4)),
                num_entries_replicated: 3,
            },
        );
        assert_eq!(state.matched(), Some(Index::new(7)));
        assert_eq!(state.next_and_previous_log_index().0, Index::new(8));

        // A late success for an older range doesn't move anything backwards.
        send_and_receive(
            &mut state,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(2)),
                num_entries_replicated: 1,
            },
        );
        assert_eq!(state.matched(), Some(Index::new(7)));
        assert_eq!(state.next_and_previous_log_index().0, Index::new(8));
    }

    #[tokio::test]
    async fn rewind_uses_hint_and_never_passes_matched() {
        let (client, _rx) = ActorClient::new(10);
        let mut state = peer_state(&client, Some(Index::new(10)));

        // No hint: one step back.
        send_and_receive(&mut state, PeerStateUpdate::PeerLogBehind { next_index_hint: None });
        assert_eq!(state.next_and_previous_log_index().0, Index::new(10));

        // Hint skips the whole gap.
        send_and_receive(
            &mut state,
            PeerStateUpdate::PeerLogBehind {
                next_index_hint: Some(Index::new(4)),
            },
        );
        assert_eq!(state.next_and_previous_log_index().0, Index::new(4));

        // A hint ahead of us is ignored beyond the single step back.
        send_and_receive(
            &mut state,
            PeerStateUpdate::PeerLogBehind {
                next_index_hint: Some(Index::new(9)),
            },
        );
        assert_eq!(state.next_and_previous_log_index().0, Index::new(3));

        send_and_receive(
            &mut state,
            PeerStateUpdate::Success {
                previous_log_entry: Some(Index::new(2)),
                num_entries_replicated: 2,
            },
        );
        assert_eq!(state.matched(), Some(Index::new(4)));

        // Rewind is clamped right after matched.
        send_and_receive(
            &mut state,
            PeerStateUpdate::PeerLogBehind {
                next_index_hint: Some(Index::new(1)),
            },
        );
        assert_eq!(state.next_and_previous_log_index().0, Index::new(5));
    }

    #[tokio::test]
    async fn rewind_stops_at_start_of_log() {
        let (client, _rx) = ActorClient::new(10);
        let mut state = peer_state(&client, None);

        send_and_receive(&mut state, PeerStateUpdate::PeerLogBehind { next_index_hint: None });
        assert_eq!(state.next_and_previous_log_index(), (Index::new(1), None));
    }

    #[tokio::test]
    async fn stale_replies_are_dropped() {
        let (client, _rx) = ActorClient::new(10);
        let mut state = peer_state(&client, Some(Index::new(2)));

        let first = state.next_seq_no();
        let second = state.next_seq_no();

        let success = || PeerStateUpdate::Success {
            previous_log_entry: Some(Index::new(2)),
            num_entries_replicated: 1,
        };
        assert!(state.handle_append_entries_result(&logger(), second, success()));
        assert!(!state.handle_append_entries_result(&logger(), first, success()));
        // Never sent.
        assert!(!state.handle_append_entries_result(&logger(), second + 1, success()));
        assert_eq!(state.matched(), Some(Index::new(3)));
    }

    #[tokio::test]
    async fn tracker_picks_most_caught_up_peer() {
        let (client, _rx) = ActorClient::new(10);
        let mut peers = HashMap::new();
        for id in &["a", "b", "c"] {
            peers.insert(ReplicaId::new(*id), peer_state(&client, Some(Index::new(5))));
        }
        let mut tracker = LeaderStateTracker::new(peers);

        // Nobody matched anything yet, smallest ID wins the tie.
        assert_eq!(tracker.most_caught_up_peer(), Some(ReplicaId::new("a")));
        assert!(!tracker.all_peers_matched(Index::new(1)));

        for (id, n) in &[("a", 1), ("b", 3), ("c", 2)] {
            let state = tracker.peer_state_mut(&ReplicaId::new(*id)).unwrap();
            send_and_receive(
                state,
                PeerStateUpdate::Success {
                    previous_log_entry: Some(Index::new(2)),
                    num_entries_replicated: *n,
                },
            );
        }

        assert_eq!(tracker.most_caught_up_peer(), Some(ReplicaId::new("b")));
        assert!(tracker.all_peers_matched(Index::new(3)));
        assert!(!tracker.all_peers_matched(Index::new(4)));

        let mut matched = tracker.peers_matched_indexes();
        matched.sort();
        assert_eq!(
            matched,
            vec![Some(Index::new(3)), Some(Index::new(4)), Some(Index::new(5))]
        );
    }
}
