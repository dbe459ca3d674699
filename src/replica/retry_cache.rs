use crate::actor::Callback;
use crate::replica::{ClientRequestError, ClientRequestOutput};
use std::collections::HashMap;
use std::future;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};
use tokio_util::time::{delay_queue, DelayQueue};

pub(crate) type ClientRequestCallback = Callback<ClientRequestOutput, ClientRequestError>;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub(crate) struct RetryCacheKey {
    pub(crate) client_id: u64,
    pub(crate) call_id: u64,
}

/// RetryCache makes client calls at-most-once on the leader. A call is identified by its
/// (client ID, call ID); retries of the same call reuse the key.
///
/// Entry lifecycle:
/// - Created as pending on first sight. The caller is expected to append the command.
/// - While pending, duplicates are attached as extra waiters. They are never re-executed.
/// - Held once the command is applied but its reply must wait for more replicas (ALL level).
///   Duplicates still wait, and expiry only re-arms the timer, since the command has run.
/// - Completed when the reply is released. Every waiter gets the same output, and later
///   duplicates are answered from the cache.
/// - Removed once `expiry` has elapsed since creation (pending or completed). Waiters of a
///   pending entry are failed with a retriable error.
pub(crate) struct RetryCache {
    expiry: Duration,
    entries: HashMap<RetryCacheKey, CacheEntry>,
    expirations: DelayQueue<RetryCacheKey>,
}

struct CacheEntry {
    created_at: Instant,
    expiration: delay_queue::Key,
    state: CacheEntryState,
}

enum CacheEntryState {
    Pending(Vec<ClientRequestCallback>),
    Held(Vec<ClientRequestCallback>),
    Completed(ClientRequestOutput),
}

#[derive(Debug, PartialEq)]
pub(crate) enum RetryCacheLookup {
    /// First time we've seen this call. Caller must execute it.
    Created,
    /// Already executing, or executed with the reply held back. The waiter (if any) was attached.
    Pending,
    /// Already executed. The waiter (if any) was answered with the cached output.
    Completed,
}

impl RetryCache {
    pub(crate) fn new(expiry: Duration) -> Self {
        RetryCache {
            expiry,
            entries: HashMap::new(),
            expirations: DelayQueue::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn get_or_create(
        &mut self,
        key: RetryCacheKey,
        waiter: Option<ClientRequestCallback>,
    ) -> RetryCacheLookup {
        match self.entries.get_mut(&key) {
            Some(entry) => match &mut entry.state {
                CacheEntryState::Pending(waiters) | CacheEntryState::Held(waiters) => {
                    waiters.extend(waiter);
                    RetryCacheLookup::Pending
                }
                CacheEntryState::Completed(output) => {
                    if let Some(waiter) = waiter {
                        waiter.send(Ok(output.clone()));
                    }
                    RetryCacheLookup::Completed
                }
            },
            None => {
                let expiration = self.expirations.insert(key, self.expiry);
                self.entries.insert(
                    key,
                    CacheEntry {
                        created_at: Instant::now(),
                        expiration,
                        state: CacheEntryState::Pending(waiter.into_iter().collect()),
                    },
                );
                RetryCacheLookup::Created
            }
        }
    }

    /// Marks an applied entry whose reply is held back. It no longer expires into a fresh key.
    /// Returns false if the entry is gone or isn't pending.
    pub(crate) fn hold(&mut self, key: RetryCacheKey) -> bool {
        match self.entries.get_mut(&key) {
            Some(entry) => match std::mem::replace(&mut entry.state, CacheEntryState::Held(Vec::new())) {
                CacheEntryState::Pending(waiters) => {
                    entry.state = CacheEntryState::Held(waiters);
                    true
                }
                previous => {
                    entry.state = previous;
                    false
                }
            },
            None => false,
        }
    }

    /// Marks a pending or held entry completed and replies to all of its waiters. Returns false if
    /// the entry is gone (expired or cleared) or was already completed.
    pub(crate) fn complete(&mut self, key: RetryCacheKey, output: ClientRequestOutput) -> bool {
        let entry = match self.entries.get_mut(&key) {
            Some(entry) => entry,
            None => return false,
        };

        match std::mem::replace(&mut entry.state, CacheEntryState::Completed(output.clone())) {
            CacheEntryState::Pending(waiters) | CacheEntryState::Held(waiters) => {
                for waiter in waiters {
                    waiter.send(Ok(output.clone()));
                }
                true
            }
            previous @ CacheEntryState::Completed(_) => {
                entry.state = previous;
                false
            }
        }
    }

    /// Removes a pending entry whose execution failed, so a retry can execute it again.
    pub(crate) fn fail(&mut self, key: RetryCacheKey, make_error: impl Fn() -> ClientRequestError) {
        if let Some(CacheEntry {
            state: CacheEntryState::Pending(_),
            ..
        }) = self.entries.get(&key)
        {
            if let Some(entry) = self.entries.remove(&key) {
                self.expirations.remove(&entry.expiration);
                entry.fail_waiters(&make_error);
            }
        }
    }

    /// Drops every entry. Waiters of pending entries get `make_error()`.
    pub(crate) fn clear(&mut self, make_error: impl Fn() -> ClientRequestError) {
        for (_, entry) in self.entries.drain() {
            entry.fail_waiters(&make_error);
        }
        self.expirations.clear();
    }

    /// Resolves to the key of the next entry whose expiry has elapsed. Never resolves while the
    /// cache is empty; callers re-create this future after every mutation, so that's fine.
    pub(crate) async fn next_expired(&mut self) -> RetryCacheKey {
        future::poll_fn(|cx| self.poll_next_expired(cx)).await
    }

    fn poll_next_expired(&mut self, cx: &mut Context<'_>) -> Poll<RetryCacheKey> {
        match self.expirations.poll_expired(cx) {
            Poll::Ready(Some(Ok(expired))) => Poll::Ready(expired.into_inner()),
            // Timer errors only happen when the runtime is shutting down.
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) | Poll::Pending => Poll::Pending,
        }
    }

    /// Handles a key `next_expired()` returned. Held entries get a new timer and keep their
    /// waiters, everything else is removed.
    pub(crate) fn expire(&mut self, key: RetryCacheKey) -> Expiry {
        let entry = match self.entries.get_mut(&key) {
            Some(entry) => entry,
            None => return Expiry::Missing,
        };

        if let CacheEntryState::Held(waiters) = &mut entry.state {
            // Callers that gave up already.
            waiters.retain(|waiter| !waiter.is_closed());
            entry.expiration = self.expirations.insert(key, self.expiry);
            return Expiry::Rearmed;
        }

        match self.entries.remove(&key) {
            Some(entry) => {
                let lifetime = entry.created_at.elapsed();
                entry.fail_waiters(&|| ClientRequestError::RetryCacheEntryExpired);
                Expiry::Removed(lifetime)
            }
            None => Expiry::Missing,
        }
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Expiry {
    /// Entry is gone, after living this long.
    Removed(Duration),
    /// Entry's reply is still held back, so it was kept.
    Rearmed,
    /// Nothing to expire.
    Missing,
}

impl CacheEntry {
    fn fail_waiters(self, make_error: &dyn Fn() -> ClientRequestError) {
        match self.state {
            CacheEntryState::Pending(waiters) | CacheEntryState::Held(waiters) => {
                for waiter in waiters {
                    waiter.send(Err(make_error()));
                }
            }
            CacheEntryState::Completed(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::StateMachineOutput;
    use crate::commitlog::Index;
    use crate::replica::Term;
    use bytes::Bytes;
    use tokio::sync::oneshot;

    const KEY: RetryCacheKey = RetryCacheKey {
        client_id: 11,
        call_id: 3,
    };

    fn waiter() -> (
        ClientRequestCallback,
        oneshot::Receiver<Result<ClientRequestOutput, ClientRequestError>>,
    ) {
        let (tx, rx) = oneshot::channel();
        (Callback(tx), rx)
    }

    fn output(data: &'static str) -> ClientRequestOutput {
        ClientRequestOutput {
            entry_term: Term::new(1),
            entry_index: Index::new(4),
            state_machine_output: StateMachineOutput::Data(Bytes::from_static(data.as_bytes())),
        }
    }

    #[tokio::test]
    async fn duplicate_calls_share_one_execution() {
        let mut cache = RetryCache::new(Duration::from_secs(5));
        let (w1, rx1) = waiter();
        let (w2, rx2) = waiter();

        assert_eq!(cache.get_or_create(KEY, Some(w1)), RetryCacheLookup::Created);
        assert_eq!(cache.get_or_create(KEY, Some(w2)), RetryCacheLookup::Pending);
        assert_eq!(cache.len(), 1);

        assert!(cache.complete(KEY, output("done")));
        assert_eq!(rx1.await.unwrap().unwrap(), output("done"));
        assert_eq!(rx2.await.unwrap().unwrap(), output("done"));

        // Completing twice is a no-op.
        assert!(!cache.complete(KEY, output("again")));

        // A retry after completion is answered from the cache.
        let (w3, rx3) = waiter();
        assert_eq!(cache.get_or_create(KEY, Some(w3)), RetryCacheLookup::Completed);
        assert_eq!(rx3.await.unwrap().unwrap(), output("done"));
    }

    #[tokio::test]
    async fn different_calls_are_independent() {
        let mut cache = RetryCache::new(Duration::from_secs(5));
        let other_call = RetryCacheKey { call_id: 4, ..KEY };
        let other_client = RetryCacheKey { client_id: 12, ..KEY };

        assert_eq!(cache.get_or_create(KEY, None), RetryCacheLookup::Created);
        assert_eq!(cache.get_or_create(other_call, None), RetryCacheLookup::Created);
        assert_eq!(cache.get_or_create(other_client, None), RetryCacheLookup::Created);
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test]
    async fn pending_entry_expires_from_creation_time() {
        tokio::time::pause();
        let expiry = Duration::from_secs(5);
        let mut cache = RetryCache::new(expiry);
        let (w1, rx1) = waiter();
        cache.get_or_create(KEY, Some(w1));

        // Not expired before the deadline.
        tokio::time::advance(expiry - Duration::from_millis(1)).await;
        assert!(tokio::time::timeout(Duration::from_millis(0), cache.next_expired())
            .await
            .is_err());

        let expired_key = tokio::time::timeout(Duration::from_secs(1), cache.next_expired())
            .await
            .unwrap();
        assert_eq!(expired_key, KEY);

        match cache.expire(KEY) {
            Expiry::Removed(lifetime) => assert!(lifetime >= expiry),
            other => panic!("Unexpected expiry {:?}", other),
        }
        assert!(matches!(
            rx1.await.unwrap(),
            Err(ClientRequestError::RetryCacheEntryExpired)
        ));

        // The key is free again.
        assert_eq!(cache.get_or_create(KEY, None), RetryCacheLookup::Created);
    }

    #[tokio::test]
    async fn completed_entry_also_expires() {
        tokio::time::pause();
        let mut cache = RetryCache::new(Duration::from_secs(1));
        cache.get_or_create(KEY, None);
        cache.complete(KEY, output("done"));

        let expired_key = tokio::time::timeout(Duration::from_secs(2), cache.next_expired())
            .await
            .unwrap();
        assert!(matches!(cache.expire(expired_key), Expiry::Removed(_)));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.expire(expired_key), Expiry::Missing);
    }

    #[tokio::test]
    async fn clear_fails_pending_waiters() {
        tokio::time::pause();
        let mut cache = RetryCache::new(Duration::from_secs(1));
        let (w1, rx1) = waiter();
        cache.get_or_create(KEY, Some(w1));

        cache.clear(|| ClientRequestError::LeadershipLost);
        assert_eq!(cache.len(), 0);
        assert!(matches!(rx1.await.unwrap(), Err(ClientRequestError::LeadershipLost)));

        // Nothing left to expire.
        assert!(tokio::time::timeout(Duration::from_secs(2), cache.next_expired())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn failed_execution_frees_the_key() {
        let mut cache = RetryCache::new(Duration::from_secs(5));
        let (w1, rx1) = waiter();
        cache.get_or_create(KEY, Some(w1));

        cache.fail(KEY, || ClientRequestError::LocalIoError(std::io::ErrorKind::Other.into()));
        assert!(matches!(rx1.await.unwrap(), Err(ClientRequestError::LocalIoError(_))));
        assert_eq!(cache.get_or_create(KEY, None), RetryCacheLookup::Created);
    }

    #[tokio::test]
    async fn failed_entry_timer_does_not_expire_its_successor() {
        tokio::time::pause();
        let mut cache = RetryCache::new(Duration::from_secs(5));
        cache.get_or_create(KEY, None);

        tokio::time::advance(Duration::from_secs(3)).await;
        cache.fail(KEY, || ClientRequestError::LeadershipLost);
        assert_eq!(cache.get_or_create(KEY, None), RetryCacheLookup::Created);

        // The first entry's deadline passes without anything expiring.
        assert!(tokio::time::timeout(Duration::from_secs(4), cache.next_expired())
            .await
            .is_err());
        let expired_key = tokio::time::timeout(Duration::from_secs(2), cache.next_expired())
            .await
            .unwrap();
        assert_eq!(expired_key, KEY);
    }

    #[tokio::test]
    async fn held_entry_outlives_expiry_until_released() {
        tokio::time::pause();
        let mut cache = RetryCache::new(Duration::from_secs(1));
        let (w1, rx1) = waiter();
        cache.get_or_create(KEY, Some(w1));
        assert!(cache.hold(KEY));
        assert!(!cache.hold(KEY));

        // The first caller gives up; a retry of the same call must not run it again.
        drop(rx1);
        for _ in 0..3 {
            let expired_key = tokio::time::timeout(Duration::from_secs(2), cache.next_expired())
                .await
                .unwrap();
            assert_eq!(cache.expire(expired_key), Expiry::Rearmed);
        }
        let (w2, rx2) = waiter();
        assert_eq!(cache.get_or_create(KEY, Some(w2)), RetryCacheLookup::Pending);

        assert!(cache.complete(KEY, output("done")));
        assert_eq!(rx2.await.unwrap().unwrap(), output("done"));

        // Once released it expires like any completed entry.
        let expired_key = tokio::time::timeout(Duration::from_secs(2), cache.next_expired())
            .await
            .unwrap();
        assert!(matches!(cache.expire(expired_key), Expiry::Removed(_)));
    }
}
