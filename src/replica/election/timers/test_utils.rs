use crate::actor::Event;
use crate::replica::{FollowerTimeoutTick, LeaderTimerTick};
use std::time::Duration;
use tokio::sync::mpsc;

/// Stands in for the replica actor and checks what timer tasks push into its queue.
pub(super) struct TestUtilActor {
    rx: mpsc::Receiver<Event>,
    quiet_period: Duration,
}

impl TestUtilActor {
    pub(super) fn new(rx: mpsc::Receiver<Event>) -> Self {
        TestUtilActor {
            rx,
            quiet_period: Duration::from_millis(10),
        }
    }

    async fn recv(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
            .expect("Expected event")
    }

    pub(super) async fn assert_leader_heartbeat_event(&mut self, expected_leader_heartbeat: LeaderTimerTick) {
        match self.recv().await {
            Event::LeaderTimer(event) => assert_eq!(event, expected_leader_heartbeat),
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_follower_timeout_event(&mut self) -> FollowerTimeoutTick {
        match self.recv().await {
            Event::FollowerTimeout(tick) => tick,
            other => panic!("Unexpected event {:?}", other),
        }
    }

    pub(super) async fn assert_no_event(&mut self) {
        tokio::time::timeout(self.quiet_period, self.rx.recv())
            .await
            .expect_err("Expected timeout");
    }
}
