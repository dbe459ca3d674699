use rand::Rng;
use std::ops::RangeInclusive;
#[cfg(test)]
use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Clock is the time source of the election timers: when is now, how to wait for a deadline, and
/// how to pick a randomized election timeout.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);

    fn pick_timeout(&self, range: &RangeInclusive<Duration>) -> Duration;
}

#[derive(Copy, Clone)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }

    fn pick_timeout(&self, range: &RangeInclusive<Duration>) -> Duration {
        rand::thread_rng().gen_range(range.clone())
    }
}

/// Creates a clock that only moves when its controller says so. Timeouts picked by a mock clock
/// are always the low end of the range.
#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let start = Instant::now();
    let (now_tx, now_rx) = watch::channel(start);

    let controller = MockClockController {
        now: now_tx,
        _keep_open: now_rx.clone(),
        start,
    };

    (MockClock { now: now_rx }, controller)
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    now: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now.borrow() < deadline {
            if self.now.changed().await.is_err() {
                // Controller is gone, time stands still forever.
                std::future::pending::<()>().await;
            }
        }
    }

    fn pick_timeout(&self, range: &RangeInclusive<Duration>) -> Duration {
        *range.start()
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    now: watch::Sender<Instant>,
    // A watch channel without receivers refuses new values.
    _keep_open: watch::Receiver<Instant>,
    start: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn now(&self) -> Instant {
        *self.now.borrow()
    }

    pub(crate) fn elapsed_time(&self) -> Duration {
        self.now() - self.start
    }

    /// Moves time forward in one jump. Sleepers only learn they're past their deadline, not by
    /// how much, so advance in steps smaller than what the test wants to observe.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let new_now = self.now() + duration;
        self.now.send(new_now).expect("MockClock channel closed");
    }
}
