#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;
use tokio::time::Instant;

/// Source of time for the node's timers. Production uses tokio's clock; tests drive a
/// `MockClock` by hand so timer behavior is deterministic.
#[async_trait::async_trait]
pub(crate) trait Clock: Clone {
    fn now(&self) -> Instant;

    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone, Default)]
pub(crate) struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let start = Instant::now();
    let (tx, rx) = watch::channel(start);

    (
        MockClock { now: rx },
        MockClockController {
            now: tx,
            start,
        },
    )
}

/// Time only moves when the paired `MockClockController` advances it.
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
                // Controller is gone, time will never reach the deadline.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    now: watch::Sender<Instant>,
    start: Instant,
}

#[cfg(test)]
impl MockClockController {
    pub(crate) fn elapsed(&self) -> Duration {
        *self.now.borrow() - self.start
    }

    /// Moves time forward. Sleepers whose deadline has passed return, but only once they're
    /// scheduled; advance in steps smaller than the interval being observed.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let next = *self.now.borrow() + duration;
        // Fails only when every clock has been dropped, in which case nobody is sleeping.
        let _ = self.now.send(next);
    }
}
