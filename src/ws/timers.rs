//! Timers driven by the connection task: the keep-alive heartbeat, the
//! send watchdog and the reconnect delay.
//!
//! None of these spawn tasks. Each exposes a future that the connection loop
//! polls from `tokio::select!`; a stopped timer's future never resolves.

use std::future;
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at, sleep_until};

/// Periodic keep-alive. At most one interval exists at a time.
#[derive(Debug)]
pub(crate) struct Heartbeat {
    period: Duration,
    interval: Option<Interval>,
}

impl Heartbeat {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            interval: None,
        }
    }

    /// Start ticking, first tick one period from now.
    ///
    /// Returns `false` and leaves the running interval untouched if already started.
    pub(crate) fn start(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }

        let mut interval = interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.interval = Some(interval);
        true
    }

    pub(crate) fn stop(&mut self) {
        self.interval = None;
    }

    pub(crate) fn is_running(&self) -> bool {
        self.interval.is_some()
    }

    pub(crate) async fn tick(&mut self) {
        match &mut self.interval {
            Some(interval) => {
                interval.tick().await;
            }
            None => future::pending().await,
        }
    }
}

/// One-shot deadline that can be re-armed or cleared.
#[derive(Debug, Default)]
pub(crate) struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    pub(crate) fn set(&mut self, after: Duration) {
        self.at = Some(Instant::now() + after);
    }

    pub(crate) fn clear(&mut self) {
        self.at = None;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.at.is_some()
    }

    /// Resolves once the deadline passes, clearing it.
    pub(crate) async fn elapsed(&mut self) {
        match self.at {
            Some(at) => {
                sleep_until(at).await;
                self.at = None;
            }
            None => future::pending().await,
        }
    }
}

/// Fails a send that is not followed by inbound traffic in time.
#[derive(Debug)]
pub(crate) struct Watchdog {
    timeout: Duration,
    deadline: Deadline,
}

impl Watchdog {
    pub(crate) fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: Deadline::default(),
        }
    }

    pub(crate) fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Arm to `timeout` from now unless already armed.
    ///
    /// The deadline runs from the oldest send not yet followed by inbound
    /// traffic; later sends do not push it back.
    pub(crate) fn arm(&mut self) {
        if !self.deadline.is_set() {
            self.deadline.set(self.timeout);
        }
    }

    pub(crate) fn cancel(&mut self) {
        self.deadline.clear();
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.deadline.is_set()
    }

    pub(crate) async fn expired(&mut self) {
        self.deadline.elapsed().await;
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::{advance, timeout};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_ticks_once_per_period() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        assert!(heartbeat.start(), "first start arms the interval");

        let started = Instant::now();
        heartbeat.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(1));
        heartbeat.tick().await;
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_start_is_idempotent() {
        let mut heartbeat = Heartbeat::new(Duration::from_secs(1));
        assert!(heartbeat.start(), "first start arms the interval");

        advance(Duration::from_millis(600)).await;
        assert!(!heartbeat.start(), "second start is a no-op");

        // The original schedule is kept: next tick at 1s, not 1.6s.
        let started = Instant::now();
        heartbeat.tick().await;
        assert_eq!(started.elapsed(), Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_heartbeat_never_ticks() {
        let mut heartbeat = Heartbeat::new(Duration::from_millis(10));
        heartbeat.start();
        heartbeat.stop();

        assert!(!heartbeat.is_running(), "stopped");
        let ticked = timeout(Duration::from_secs(1), heartbeat.tick()).await;
        assert!(ticked.is_err(), "a stopped heartbeat must not tick");
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_expires_after_timeout_and_disarms() {
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        watchdog.arm();

        let started = Instant::now();
        watchdog.expired().await;

        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(!watchdog.is_armed(), "one-shot");
    }

    #[tokio::test(start_paused = true)]
    async fn later_sends_do_not_push_the_deadline_back() {
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        watchdog.arm();
        advance(Duration::from_secs(3)).await;
        watchdog.arm();

        let started = Instant::now();
        watchdog.expired().await;
        assert_eq!(
            started.elapsed(),
            Duration::from_secs(2),
            "deadline runs from the first send"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn arming_after_cancel_starts_a_fresh_deadline() {
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        watchdog.arm();
        advance(Duration::from_secs(3)).await;
        watchdog.cancel();
        watchdog.arm();

        let started = Instant::now();
        watchdog.expired().await;
        assert_eq!(started.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_watchdog_never_expires() {
        let mut watchdog = Watchdog::new(Duration::from_millis(10));
        watchdog.arm();
        watchdog.cancel();

        let expired = timeout(Duration::from_secs(1), watchdog.expired()).await;
        assert!(expired.is_err(), "cancelled watchdog must not fire");
    }
}
