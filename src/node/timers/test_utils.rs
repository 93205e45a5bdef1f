use crate::node::timers::timer::TimerEvent;
use std::time::Duration;
use tokio::sync::mpsc;

/// Wraps the node side of a timer's event channel with assertions that can't hang a test.
pub(super) struct TestUtilReceiver {
    rx: mpsc::Receiver<TimerEvent>,
    quiet_period: Duration,
}

impl TestUtilReceiver {
    pub(super) fn new(rx: mpsc::Receiver<TimerEvent>) -> Self {
        TestUtilReceiver {
            rx,
            quiet_period: Duration::from_millis(10),
        }
    }

    pub(super) async fn recv(&mut self) -> TimerEvent {
        self.recv_with_sanity_timeout().await.expect("Expected an event")
    }

    pub(super) async fn recv_assert_closed(&mut self) {
        if let Some(event) = self.recv_with_sanity_timeout().await {
            panic!("Expected closed channel, got {:?}", event);
        }
    }

    /// Waits a little (real time) and asserts nothing arrived.
    pub(super) async fn assert_no_event(&mut self) {
        if let Ok(event) = tokio::time::timeout(self.quiet_period, self.rx.recv()).await {
            panic!("Expected no event, got {:?}", event);
        }
    }

    async fn recv_with_sanity_timeout(&mut self) -> Option<TimerEvent> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv())
            .await
            .expect("Unexpected timeout")
    }
}
