use crate::replica::LeaderRedirectInfo;
use tokio::sync::watch;

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ElectionStateSnapshot {
    Leader,
    Candidate,
    Follower(LeaderRedirectInfo),
    FollowerNoLeader,
}

pub(super) fn new(initial_state: ElectionStateSnapshot) -> (ElectionStateChangeNotifier, ElectionStateChangeListener) {
    let (tx, rx) = watch::channel(initial_state);

    (ElectionStateChangeNotifier { tx }, ElectionStateChangeListener { rx })
}

pub(super) struct ElectionStateChangeNotifier {
    tx: watch::Sender<ElectionStateSnapshot>,
}

impl ElectionStateChangeNotifier {
    /// Publishes `new_state` unless it's what listeners already have. A candidate starting another
    /// election, for example, isn't a change anybody can observe.
    pub(super) fn notify_new_state(&self, new_state: ElectionStateSnapshot) {
        if *self.tx.borrow() == new_state {
            return;
        }
        // Nobody listening is fine.
        let _ = self.tx.send(new_state);
    }
}

/// Observes the latest election state. A listener that falls behind only sees the most recent
/// state, not every state in between.
#[derive(Clone)]
pub(crate) struct ElectionStateChangeListener {
    rx: watch::Receiver<ElectionStateSnapshot>,
}

impl ElectionStateChangeListener {
    pub(crate) fn current(&self) -> ElectionStateSnapshot {
        self.rx.borrow().clone()
    }

    /// Waits for the next change. Returns None once the replica is gone.
    pub(crate) async fn next(&mut self) -> Option<ElectionStateSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    #[tokio::test]
    async fn repeated_state_is_not_an_event() {
        let (notifier, mut listener) = new(ElectionStateSnapshot::FollowerNoLeader);

        notifier.notify_new_state(ElectionStateSnapshot::Candidate);
        assert_eq!(listener.next().await, Some(ElectionStateSnapshot::Candidate));

        notifier.notify_new_state(ElectionStateSnapshot::Candidate);
        assert!(tokio::time::timeout(Duration::from_millis(10), listener.next())
            .await
            .is_err());

        notifier.notify_new_state(ElectionStateSnapshot::Leader);
        assert_eq!(listener.next().await, Some(ElectionStateSnapshot::Leader));
    }

    #[tokio::test]
    async fn slow_listener_sees_latest_state_only() {
        let (notifier, mut listener) = new(ElectionStateSnapshot::FollowerNoLeader);

        notifier.notify_new_state(ElectionStateSnapshot::Candidate);
        notifier.notify_new_state(ElectionStateSnapshot::Leader);
        assert_eq!(listener.next().await, Some(ElectionStateSnapshot::Leader));
        assert_eq!(listener.current(), ElectionStateSnapshot::Leader);

        drop(notifier);
        assert_eq!(listener.next().await, None);
    }
}
