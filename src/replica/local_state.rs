use crate::replica::peers::ReplicaId;
use std::fmt;
use std::sync::{Arc, Mutex};

#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash)]
pub(crate) struct Term(u64);

impl Term {
    pub(crate) fn new(term: u64) -> Self {
        Term(term)
    }

    pub(crate) fn as_u64(&self) -> u64 {
        self.0
    }

    pub(crate) fn incr(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PersistentLocalState is used whenever the Raft paper requires that something is persisted to a
/// durable store to guarantee safety. Not everything that uses disk has to go through this, only
/// algorithm-correctness-critical ones.
///
/// Store methods should be implemented atomically via a CAS like operation. Similar to most CAS
/// method signatures, the CAS store methods will return true if we have mutated state.
pub(crate) trait PersistentLocalState {
    /// Set current term to `new_term` atomically, iff it is larger than current term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_term_if_increased(&mut self, new_term: Term) -> bool;

    /// Store our vote for the latest term iff the latest term (internal state) is the same term as
    /// the one provided, and we have not stored a vote for the latest term.
    ///
    /// CAS: Return true if we successfully mutated state.
    fn store_vote_for_term_if_unvoted(&mut self, expected_current_term: Term, vote: ReplicaId) -> bool;

    /// Return the new term. Used when transitioning to candidate.
    fn increment_term_and_vote_for_self(&mut self) -> Term;

    fn current_term(&self) -> Term;
    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>);
}

/// LocalStateStore is the "disk" that term and vote are written to. Clones share the same
/// storage, so a replica re-created from a clone observes everything the previous incarnation
/// persisted.
#[derive(Clone, Default)]
pub(crate) struct LocalStateStore {
    durable: Arc<Mutex<TermAndVote>>,
}

#[derive(Default)]
struct TermAndVote {
    current_term: Term,
    voted_for_this_term: Option<Arc<ReplicaId>>,
}

impl Default for Term {
    fn default() -> Self {
        Term::new(0)
    }
}

impl LocalStateStore {
    pub(crate) fn current_term(&self) -> Term {
        self.with_durable(|state| state.current_term)
    }

    fn with_durable<T>(&self, f: impl FnOnce(&mut TermAndVote) -> T) -> T {
        let mut state = self.durable.lock().expect("LocalStateStore mutex guard poison");
        f(&mut state)
    }
}

/// InMemoryLocalState is one replica's view of its LocalStateStore. Every method reads and writes
/// under a single lock acquisition, which is what makes the CAS methods atomic.
pub(crate) struct InMemoryLocalState {
    store: LocalStateStore,
    my_replica_id: Arc<ReplicaId>,
}

impl InMemoryLocalState {
    pub(crate) fn new(my_replica_id: ReplicaId, store: LocalStateStore) -> Self {
        InMemoryLocalState {
            store,
            my_replica_id: Arc::new(my_replica_id),
        }
    }
}

impl PersistentLocalState for InMemoryLocalState {
    fn store_term_if_increased(&mut self, new_term: Term) -> bool {
        self.store.with_durable(|state| {
            if new_term <= state.current_term {
                false
            } else {
                state.current_term = new_term;
                state.voted_for_this_term = None;
                true
            }
        })
    }

    fn store_vote_for_term_if_unvoted(&mut self, expected_term: Term, vote: ReplicaId) -> bool {
        self.store.with_durable(|state| {
            if expected_term == state.current_term && state.voted_for_this_term.is_none() {
                state.voted_for_this_term.replace(Arc::new(vote));
                true
            } else {
                false
            }
        })
    }

    fn increment_term_and_vote_for_self(&mut self) -> Term {
        let me = self.my_replica_id.clone();
        self.store.with_durable(|state| {
            state.current_term.incr();
            state.voted_for_this_term.replace(me);
            state.current_term
        })
    }

    fn current_term(&self) -> Term {
        self.store.current_term()
    }

    fn voted_for_current_term(&self) -> (Term, Option<Arc<ReplicaId>>) {
        self.store
            .with_durable(|state| (state.current_term, state.voted_for_this_term.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_state(id: &str, store: &LocalStateStore) -> InMemoryLocalState {
        InMemoryLocalState::new(ReplicaId::new(id), store.clone())
    }

    #[test]
    fn term_only_increases() {
        let mut state = local_state("r1", &LocalStateStore::default());

        assert!(state.store_term_if_increased(Term::new(3)));
        assert!(!state.store_term_if_increased(Term::new(3)));
        assert!(!state.store_term_if_increased(Term::new(2)));
        assert_eq!(state.current_term(), Term::new(3));
    }

    #[test]
    fn one_vote_per_term() {
        let mut state = local_state("r1", &LocalStateStore::default());
        state.store_term_if_increased(Term::new(1));

        assert!(!state.store_vote_for_term_if_unvoted(Term::new(2), ReplicaId::new("r2")));
        assert!(state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new("r2")));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new("r3")));

        let (term, voted_for) = state.voted_for_current_term();
        assert_eq!(term, Term::new(1));
        assert_eq!(voted_for.as_deref(), Some(&ReplicaId::new("r2")));

        // New term clears the vote.
        state.store_term_if_increased(Term::new(2));
        assert_eq!(state.voted_for_current_term(), (Term::new(2), None));
    }

    #[test]
    fn candidate_votes_for_itself() {
        let mut state = local_state("r1", &LocalStateStore::default());

        assert_eq!(state.increment_term_and_vote_for_self(), Term::new(1));
        assert!(!state.store_vote_for_term_if_unvoted(Term::new(1), ReplicaId::new("r2")));
        let (_, voted_for) = state.voted_for_current_term();
        assert_eq!(voted_for.as_deref(), Some(&ReplicaId::new("r1")));
    }

    #[test]
    fn restart_keeps_term_and_vote() {
        let store = LocalStateStore::default();
        {
            let mut state = local_state("r1", &store);
            state.store_term_if_increased(Term::new(4));
            state.store_vote_for_term_if_unvoted(Term::new(4), ReplicaId::new("r5"));
        }

        let restarted = local_state("r1", &store);
        let (term, voted_for) = restarted.voted_for_current_term();
        assert_eq!(term, Term::new(4));
        assert_eq!(voted_for.as_deref(), Some(&ReplicaId::new("r5")));
    }
}
