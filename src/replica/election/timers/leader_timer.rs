use crate::replica::election::timers::time::{Clock, RealClock};
use crate::{actor, replica};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{Duration, Instant};

/// Paces heartbeats from the leader to one peer. Dropping the handle stops the task.
pub(crate) struct LeaderTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    heartbeat_duration: Duration,
    next_heartbeat_time: Mutex<Option<Instant>>,
    clock: C,
}

struct LeaderTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    actor_client: actor::WeakActorClient,
    event: replica::LeaderTimerTick,
    clock: C,
}

impl LeaderTimerHandle {
    pub(crate) fn spawn_timer_task(
        heartbeat_duration: Duration,
        actor_client: actor::WeakActorClient,
        peer_id: replica::ReplicaId,
        term: replica::Term,
    ) -> Self {
        let (task, handle) = LeaderTimerTask::new(heartbeat_duration, actor_client, peer_id, term, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> LeaderTimerHandle<C> {
    /// Pushes back the next heartbeat, because we just sent something to this peer.
    pub(crate) fn reset_heartbeat_timer(&self) {
        self.shared.reset_heartbeat_timer();
    }
}

impl<C: Clock> Shared<C> {
    fn reset_heartbeat_timer(&self) {
        let new_timeout = self.clock.now() + self.heartbeat_duration;
        self.next_heartbeat_time
            .lock()
            .expect("LeaderTimer next_heartbeat_time mutex guard poison")
            .replace(new_timeout);
    }

    fn take_next_heartbeat_time(&self) -> Option<Instant> {
        self.next_heartbeat_time
            .lock()
            .expect("LeaderTimer next_heartbeat_time mutex guard poison")
            .take()
    }
}

impl<C: Clock> LeaderTimerTask<C> {
    fn new(
        heartbeat_duration: Duration,
        actor_client: actor::WeakActorClient,
        peer_id: replica::ReplicaId,
        term: replica::Term,
        clock: C,
    ) -> (Self, LeaderTimerHandle<C>) {
        let shared = Arc::new(Shared {
            heartbeat_duration,
            next_heartbeat_time: Mutex::new(None),
            clock: clock.clone(),
        });

        let task = LeaderTimerTask {
            weak_shared: Arc::downgrade(&shared),
            actor_client,
            event: replica::LeaderTimerTick { peer_id, term },
            clock,
        };
        let handle = LeaderTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        // The deadline starts out empty, so the first tick is published immediately. A newly
        // elected leader announces itself to every peer right away.
        loop {
            let shared = match self.weak_shared.upgrade() {
                Some(shared) => shared,
                // No longer leader for this term.
                None => return,
            };

            match shared.take_next_heartbeat_time() {
                Some(wake_time) => {
                    drop(shared);
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // Nothing was sent to this peer for a whole heartbeat duration.
                    let _ = self.actor_client.leader_timer(self.event.clone()).await;
                    shared.reset_heartbeat_timer();
                }
            }
        }
    }
}
