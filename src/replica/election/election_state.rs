use crate::actor::WeakActorClient;
use crate::commitlog::Index;
use crate::replica::election::state_change_listener::ElectionStateChangeNotifier;
use crate::replica::election::timers::{FollowerTimerHandle, LeaderTimerHandle};
use crate::replica::election::{state_change_listener, LeaderStateTracker, PeerState};
use crate::replica::{
    ElectionStateChangeListener, ElectionStateSnapshot, FollowerTimeoutTick, LeaderRedirectInfo, ReplicaId,
    ReplicaRole, Term,
};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

#[derive(Clone)]
pub(crate) struct ElectionConfig {
    pub my_replica_id: ReplicaId,
    pub leader_heartbeat_duration: Duration,
    pub follower_min_timeout: Duration,
    pub follower_max_timeout: Duration,
}

/// ElectionState holds the state specific to the current role in an election, along with the
/// timers that role needs. Its methods are responsible for "what" to do. It is NOT responsible
/// for validating anything specific to logs, terms, peers, etc. or knowing "when" to do something.
pub(crate) struct ElectionState {
    state: State,
    config: ElectionConfig,
    actor_client: WeakActorClient,
    state_change_notifier: ElectionStateChangeNotifier,
    last_timer_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum CurrentLeader {
    Me,
    Other(LeaderRedirectInfo),
    Unknown,
}

impl ElectionState {
    /// `new_follower()` creates a new ElectionState instance that starts out as a follower.
    pub(crate) fn new_follower(
        config: ElectionConfig,
        actor_client: WeakActorClient,
    ) -> (Self, ElectionStateChangeListener) {
        let mut last_timer_id = 0;
        let initial_state = State::Follower(FollowerState {
            leader: None,
            follower_timeout_tracker: Self::spawn_follower_timer(&mut last_timer_id, &config, &actor_client),
        });
        let (notifier, listener) = state_change_listener::new(Self::snapshot(&initial_state));

        let election_state = Self {
            state: initial_state,
            config,
            actor_client,
            state_change_notifier: notifier,
            last_timer_id,
        };

        (election_state, listener)
    }

    fn spawn_follower_timer(
        last_timer_id: &mut u64,
        config: &ElectionConfig,
        actor_client: &WeakActorClient,
    ) -> FollowerTimerHandle {
        *last_timer_id += 1;
        FollowerTimerHandle::spawn_timer_task(
            *last_timer_id,
            config.follower_min_timeout,
            config.follower_max_timeout,
            actor_client.clone(),
        )
    }

    fn new_follower_timer(&mut self) -> FollowerTimerHandle {
        Self::spawn_follower_timer(&mut self.last_timer_id, &self.config, &self.actor_client)
    }

    pub(crate) fn transition_to_follower(&mut self, new_leader: Option<LeaderRedirectInfo>) {
        self.state = State::Follower(FollowerState {
            leader: new_leader,
            follower_timeout_tracker: self.new_follower_timer(),
        });
        self.notify_new_state();
    }

    pub(crate) fn transition_to_candidate_and_vote_for_self(&mut self) {
        let mut cs = CandidateState {
            received_votes_from: HashSet::with_capacity(3),
            follower_timeout_tracker: self.new_follower_timer(),
        };

        // Vote for self
        cs.received_votes_from.insert(self.config.my_replica_id.clone());

        self.state = State::Candidate(cs);
        self.notify_new_state();
    }

    pub(crate) fn transition_to_leader(
        &mut self,
        term: Term,
        peer_ids: HashSet<ReplicaId>,
        last_log_index: Option<Index>,
    ) {
        let mut peer_state = HashMap::with_capacity(peer_ids.len());
        for peer_id in peer_ids {
            let leader_timer_handle = LeaderTimerHandle::spawn_timer_task(
                self.config.leader_heartbeat_duration,
                self.actor_client.clone(),
                peer_id.clone(),
                term,
            );
            peer_state.insert(peer_id, PeerState::new(leader_timer_handle, last_log_index));
        }

        self.state = State::Leader(LeaderStateTracker::new(peer_state));
        self.notify_new_state();
    }

    fn snapshot(state: &State) -> ElectionStateSnapshot {
        match state {
            State::Leader(_) => ElectionStateSnapshot::Leader,
            State::Candidate(_) => ElectionStateSnapshot::Candidate,
            State::Follower(FollowerState { leader: None, .. }) => ElectionStateSnapshot::FollowerNoLeader,
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => ElectionStateSnapshot::Follower(leader_info.clone()),
        }
    }

    fn notify_new_state(&self) {
        self.state_change_notifier
            .notify_new_state(Self::snapshot(&self.state));
    }

    pub(crate) fn role(&self) -> ReplicaRole {
        match &self.state {
            State::Leader(_) => ReplicaRole::Leader,
            State::Candidate(_) => ReplicaRole::Candidate,
            State::Follower(_) => ReplicaRole::Follower,
        }
    }

    pub(crate) fn current_leader(&self) -> CurrentLeader {
        match &self.state {
            State::Leader(_) => CurrentLeader::Me,
            State::Candidate(_) => CurrentLeader::Unknown,
            State::Follower(FollowerState { leader: None, .. }) => CurrentLeader::Unknown,
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => CurrentLeader::Other(leader_info.clone()),
        }
    }

    pub(crate) fn reset_timeout_if_follower(&self) {
        if let State::Follower(fs) = &self.state {
            fs.follower_timeout_tracker.reset_timeout();
        }
    }

    /// Returns true if the tick comes from the timer we are currently running and nothing reset
    /// it since. Leaders run no election timer, so every tick is stale for them.
    pub(crate) fn is_current_timeout(&self, tick: &FollowerTimeoutTick) -> bool {
        match &self.state {
            State::Leader(_) => false,
            State::Candidate(cs) => cs.follower_timeout_tracker.is_current(tick),
            State::Follower(fs) => fs.follower_timeout_tracker.is_current(tick),
        }
    }

    pub(crate) fn set_leader_if_unknown(&mut self, leader: &LeaderRedirectInfo) {
        if let State::Follower(fs) = &mut self.state {
            if fs.leader.is_none() {
                fs.leader.replace(leader.clone());
                self.notify_new_state();
            }
        }
    }

    /// Return number of votes received if candidate, or None if no longer Candidate.
    pub(crate) fn add_vote_if_candidate(&mut self, vote_from: ReplicaId) -> Option<usize> {
        if let State::Candidate(cs) = &mut self.state {
            cs.received_votes_from.insert(vote_from);
            Some(cs.received_votes_from.len())
        } else {
            None
        }
    }

    pub(crate) fn is_candidate(&self) -> bool {
        matches!(self.state, State::Candidate(_))
    }

    pub(crate) fn leader_state(&self) -> Option<&LeaderStateTracker> {
        if let State::Leader(tracker) = &self.state {
            Some(tracker)
        } else {
            None
        }
    }

    pub(crate) fn leader_state_mut(&mut self) -> Option<&mut LeaderStateTracker> {
        if let State::Leader(tracker) = &mut self.state {
            Some(tracker)
        } else {
            None
        }
    }
}

impl fmt::Debug for ElectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            State::Leader(_) => write!(f, "Leader"),
            State::Candidate(cs) => write!(f, "Candidate(Votes={})", cs.received_votes_from.len()),
            State::Follower(FollowerState {
                leader: Some(leader_info),
                ..
            }) => write!(f, "Follower(Leader={:?})", leader_info.replica_id),
            State::Follower(FollowerState { leader: None, .. }) => write!(f, "Follower(Leader=None)"),
        }
    }
}

enum State {
    Leader(LeaderStateTracker),
    Candidate(CandidateState),
    Follower(FollowerState),
}

struct CandidateState {
    received_votes_from: HashSet<ReplicaId>,
    follower_timeout_tracker: FollowerTimerHandle,
}

struct FollowerState {
    leader: Option<LeaderRedirectInfo>,
    follower_timeout_tracker: FollowerTimerHandle,
}
