use crate::node::timers::time::{Clock, RealClock};
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};
use tokio::time::{Duration, Instant};

/// What a timer tells the node when it fires.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum TimerEvent {
    ElectionTimeout,
    Heartbeat,
}

/// TimerHandle controls a long-lived background task that sends `event` every time a randomly
/// chosen duration from `timeout_range` passes without a `reset()`. After firing, the timer
/// re-arms itself with a fresh duration.
///
/// The election timer uses a range (randomized timeouts avoid split votes); the heartbeat timer
/// uses a single fixed duration.
pub(crate) struct TimerHandle<C: Clock = RealClock> {
    shared: Arc<Shared<C>>,
}

struct Shared<C: Clock> {
    timeout_range: RangeInclusive<Duration>,
    clock: C,
    armed: AtomicBool,
    stopped: AtomicBool,
    next_fire_time: Mutex<Option<Instant>>,
    wakeup: Notify,
}

struct TimerTask<C: Clock> {
    shared: Arc<Shared<C>>,
    clock: C,
    event: TimerEvent,
    events: mpsc::Sender<TimerEvent>,
}

impl TimerHandle {
    pub(crate) fn election_timer(
        min_timeout: Duration,
        max_timeout: Duration,
        events: mpsc::Sender<TimerEvent>,
    ) -> Self {
        Self::spawn(min_timeout..=max_timeout, TimerEvent::ElectionTimeout, events, RealClock)
    }

    pub(crate) fn heartbeat_timer(interval: Duration, events: mpsc::Sender<TimerEvent>) -> Self {
        Self::spawn(interval..=interval, TimerEvent::Heartbeat, events, RealClock)
    }
}

impl<C: Clock + Send + Sync + 'static> TimerHandle<C> {
    /// The task starts disarmed; nothing fires until `start()`.
    fn spawn(
        timeout_range: RangeInclusive<Duration>,
        event: TimerEvent,
        events: mpsc::Sender<TimerEvent>,
        clock: C,
    ) -> Self {
        let shared = Arc::new(Shared {
            timeout_range,
            clock: clock.clone(),
            armed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            next_fire_time: Mutex::new(None),
            wakeup: Notify::new(),
        });

        let task = TimerTask {
            shared: shared.clone(),
            clock,
            event,
            events,
        };
        tokio::task::spawn(task.run());

        TimerHandle { shared }
    }

    /// Arms the timer with a fresh timeout. Starting an armed timer just resets it.
    pub(crate) fn start(&self) {
        self.shared.push_back_deadline();
        self.shared.armed.store(true, Ordering::Release);
        self.shared.wakeup.notify_one();
    }

    /// Disarms the timer. The task stays alive, ready for the next `start()`.
    pub(crate) fn stop(&self) {
        self.shared.armed.store(false, Ordering::Release);
    }

    /// Pushes the deadline back by a fresh timeout. No-op while disarmed.
    pub(crate) fn reset(&self) {
        if self.shared.armed.load(Ordering::Acquire) {
            self.shared.push_back_deadline();
        }
    }

    /// Ends the background task for good.
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown();
    }
}

impl<C: Clock> Drop for TimerHandle<C> {
    fn drop(&mut self) {
        self.shared.shutdown();
    }
}

impl<C: Clock> Shared<C> {
    fn push_back_deadline(&self) {
        let timeout = if self.timeout_range.start() == self.timeout_range.end() {
            *self.timeout_range.start()
        } else {
            rand::thread_rng().gen_range(self.timeout_range.clone())
        };
        let deadline = self.clock.now() + timeout;
        self.next_fire_time
            .lock()
            .expect("TimerHandle next_fire_time mutex guard poison")
            .replace(deadline);
    }

    fn next_fire_time(&self) -> Option<Instant> {
        *self
            .next_fire_time
            .lock()
            .expect("TimerTask next_fire_time mutex guard poison")
    }

    fn shutdown(&self) {
        self.armed.store(false, Ordering::Release);
        self.stopped.store(true, Ordering::Release);
        self.wakeup.notify_one();
    }
}

impl<C: Clock + Send + Sync + 'static> TimerTask<C> {
    async fn run(mut self) {
        loop {
            if self.shared.stopped.load(Ordering::Acquire) {
                return;
            }

            let deadline = match self.shared.next_fire_time() {
                Some(deadline) if self.shared.armed.load(Ordering::Acquire) => deadline,
                _ => {
                    self.shared.wakeup.notified().await;
                    continue;
                }
            };

            if self.clock.now() < deadline {
                // Resets only move the deadline; we notice after waking at the old one. Wakeups
                // from start() or shutdown() cut the sleep short.
                tokio::select! {
                    _ = self.clock.sleep_until(deadline) => {}
                    _ = self.shared.wakeup.notified() => {}
                }
                continue;
            }

            // A whole timeout passed without a reset.
            if self.events.send(self.event).await.is_err() {
                return;
            }
            if self.shared.armed.load(Ordering::Acquire) {
                self.shared.push_back_deadline();
            }
        }
    }
}
