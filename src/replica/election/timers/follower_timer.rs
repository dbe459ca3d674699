use crate::actor;
use crate::replica::election::timers::time::{Clock, RealClock};
use crate::replica::FollowerTimeoutTick;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::time::{Duration, Instant};

/// Drives the election timeout of a follower or candidate. The timer task lives as long as this
/// handle does. Every tick carries the timer's ID and the number of resets seen so far, so the
/// actor can tell whether a tick raced with a reset or belongs to a replaced timer.
pub(crate) struct FollowerTimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    timer_id: u64,
    timeout_range: RangeInclusive<Duration>,
    next_wake_time: Mutex<Option<Instant>>,
    reset_seq: AtomicU64,
    clock: C,
}

struct FollowerTimerTask<C: Clock> {
    weak_shared: Weak<Shared<C>>,
    actor_client: actor::WeakActorClient,
    clock: C,
    // Static wait between two consecutive ticks. If the actor ignored the previous tick, the
    // timer was reset, so this only throttles a backed-up actor queue.
    timeout_backoff: Duration,
}

impl FollowerTimerHandle {
    pub(crate) fn spawn_timer_task(
        timer_id: u64,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: actor::WeakActorClient,
    ) -> Self {
        let (task, handle) = FollowerTimerTask::new(timer_id, min_timeout, max_timeout, actor_client, RealClock);
        tokio::task::spawn(task.run());

        handle
    }
}

impl<C: Clock + Send + Sync + 'static> FollowerTimerHandle<C> {
    pub(crate) fn reset_timeout(&self) {
        self.shared.reset_timeout();
    }

    /// Returns true if `tick` was produced by this timer and no reset happened since.
    pub(crate) fn is_current(&self, tick: &FollowerTimeoutTick) -> bool {
        tick.timer_id == self.shared.timer_id && tick.reset_seq == self.shared.reset_seq.load(Ordering::Acquire)
    }
}

impl<C: Clock> Shared<C> {
    fn reset_timeout(&self) {
        let wake_time = self.clock.now() + self.clock.pick_timeout(&self.timeout_range);

        // Bump the seq under the lock so a tick can't observe the new seq with the old deadline.
        let mut next_wake_time = self
            .next_wake_time
            .lock()
            .expect("FollowerTimer next_wake_time mutex guard poison");
        self.reset_seq.fetch_add(1, Ordering::AcqRel);
        next_wake_time.replace(wake_time);
    }

    fn take_wake_time(&self) -> Option<Instant> {
        self.next_wake_time
            .lock()
            .expect("FollowerTimer next_wake_time mutex guard poison")
            .take()
    }

    fn current_tick(&self) -> FollowerTimeoutTick {
        FollowerTimeoutTick {
            timer_id: self.timer_id,
            reset_seq: self.reset_seq.load(Ordering::Acquire),
        }
    }
}

impl<C: Clock + Send + Sync + 'static> FollowerTimerTask<C> {
    fn new(
        timer_id: u64,
        min_timeout: Duration,
        max_timeout: Duration,
        actor_client: actor::WeakActorClient,
        clock: C,
    ) -> (Self, FollowerTimerHandle<C>) {
        let shared = Arc::new(Shared {
            timer_id,
            timeout_range: RangeInclusive::new(min_timeout, max_timeout),
            next_wake_time: Mutex::new(None),
            reset_seq: AtomicU64::new(0),
            clock: clock.clone(),
        });

        // Timer task must have a deadline when it starts, otherwise it would fire immediately.
        shared.reset_timeout();

        let task = FollowerTimerTask {
            weak_shared: Arc::downgrade(&shared),
            actor_client,
            clock,
            timeout_backoff: min_timeout,
        };
        let handle = FollowerTimerHandle { shared };

        (task, handle)
    }

    async fn run(mut self) {
        loop {
            // The handle has dropped, which means we are no longer a follower/candidate under
            // this timer. Exit without starting a new election.
            let shared = match self.weak_shared.upgrade() {
                Some(shared) => shared,
                None => return,
            };

            match shared.take_wake_time() {
                Some(wake_time) => {
                    drop(shared);
                    self.clock.sleep_until(wake_time).await;
                }
                None => {
                    // We slept until the last deadline and nobody pushed it back.
                    let tick = shared.current_tick();
                    drop(shared);
                    let _ = self.actor_client.follower_timeout(tick).await;
                    let backoff_deadline = self.clock.now() + self.timeout_backoff;
                    self.clock.sleep_until(backoff_deadline).await;
                }
            }
        }
    }
}
