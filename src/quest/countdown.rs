use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::debug;

/// Countdowns re-sample at most this often.
pub const TICK_PERIOD: Duration = Duration::from_millis(1000);

/// Source of wall-clock time in unix seconds.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> i64;
}

/// Wall clock via chrono.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Wall time sampled once, then advanced by the tokio clock.
///
/// Immune to wall-clock jumps, and follows paused time in tests.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    anchor_secs: i64,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp())
    }

    pub fn starting_at(unix_secs: i64) -> Self {
        Self {
            anchor_secs: unix_secs,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> i64 {
        self.anchor_secs + self.anchor.elapsed().as_secs() as i64
    }
}

/// Seconds left until `deadline`. Never negative; 0 when absent.
pub fn remaining_secs(deadline: Option<i64>, now: i64) -> u64 {
    match deadline {
        Some(d) if d > now => (d - now) as u64,
        _ => 0,
    }
}

/// Floor-divided day/hour/minute/second split of a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Breakdown {
    pub days: u64,
    pub hours: u64,
    pub minutes: u64,
    pub seconds: u64,
}

impl Breakdown {
    pub fn from_secs(secs: u64) -> Self {
        Self {
            days: secs / 86_400,
            hours: (secs % 86_400) / 3_600,
            minutes: (secs % 3_600) / 60,
            seconds: secs % 60,
        }
    }

    pub fn total_secs(&self) -> u64 {
        self.days * 86_400 + self.hours * 3_600 + self.minutes * 60 + self.seconds
    }

    /// Coarse form used by staking timers: `"1d 1h"`.
    pub fn day_hour(&self) -> String {
        format!("{}d {}h", self.days, self.hours)
    }

    /// Fine form used by claim cooldowns, dropping leading zero units:
    /// `"1h 1m 1s"`, `"42s"`.
    pub fn compact(&self) -> String {
        if self.days > 0 {
            format!("{}d {}h {}m", self.days, self.hours, self.minutes)
        } else if self.hours > 0 {
            format!("{}h {}m {}s", self.hours, self.minutes, self.seconds)
        } else if self.minutes > 0 {
            format!("{}m {}s", self.minutes, self.seconds)
        } else {
            format!("{}s", self.seconds)
        }
    }
}

impl fmt::Display for Breakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.compact())
    }
}

type ExpiredFn = Arc<dyn Fn() + Send + Sync>;

/// A live countdown to a deadline.
///
/// Publishes remaining seconds through a watch channel, at most once per
/// [`TICK_PERIOD`]. Values never increase and stop at 0. `on_expired` runs
/// once when a running countdown reaches 0; a deadline already past when
/// observed reports 0 without ticking or signalling. Dropping the handle
/// cancels the tick task.
pub struct CountdownHandle {
    tx: Arc<watch::Sender<u64>>,
    rx: watch::Receiver<u64>,
    clock: Arc<dyn Clock>,
    on_expired: ExpiredFn,
    deadline: Option<i64>,
    task: Option<JoinHandle<()>>,
}

impl CountdownHandle {
    /// Start counting down. Must be called inside a tokio runtime when the
    /// deadline lies in the future.
    pub fn start(
        deadline: Option<i64>,
        clock: Arc<dyn Clock>,
        on_expired: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let (tx, rx) = watch::channel(0);
        let mut handle = Self {
            tx: Arc::new(tx),
            rx,
            clock,
            on_expired: Arc::new(on_expired),
            deadline: None,
            task: None,
        };
        handle.set_deadline(deadline);
        handle
    }

    /// Replace the deadline. Cancels any scheduled tick first.
    pub fn set_deadline(&mut self, deadline: Option<i64>) {
        self.cancel();
        self.deadline = deadline;

        let remaining = remaining_secs(deadline, self.clock.now());
        self.tx.send_replace(remaining);

        let Some(deadline) = deadline else {
            return;
        };
        if remaining == 0 {
            debug!(deadline, "deadline already passed");
            return;
        }

        let tx = self.tx.clone();
        let clock = self.clock.clone();
        let on_expired = self.on_expired.clone();
        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_PERIOD);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // First tick completes immediately; the current value is already published.
            interval.tick().await;

            loop {
                interval.tick().await;
                let sampled = remaining_secs(Some(deadline), clock.now());
                let mut remaining = sampled;
                tx.send_if_modified(|current| {
                    // Wall clocks can step backwards; never count up.
                    remaining = sampled.min(*current);
                    if remaining != *current {
                        *current = remaining;
                        true
                    } else {
                        false
                    }
                });

                if remaining == 0 {
                    debug!(deadline, "countdown expired");
                    on_expired();
                    break;
                }
            }
        }));
    }

    /// Stop ticking. The last published value stays.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn deadline(&self) -> Option<i64> {
        self.deadline
    }

    /// Latest published remaining seconds.
    pub fn remaining(&self) -> u64 {
        *self.rx.borrow()
    }

    pub fn breakdown(&self) -> Breakdown {
        Breakdown::from_secs(self.remaining())
    }

    /// Receiver that wakes on every published change.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.rx.clone()
    }

    /// True while a tick task is scheduled.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for CountdownHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for CountdownHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountdownHandle")
            .field("deadline", &self.deadline)
            .field("remaining", &self.remaining())
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const T0: i64 = 1_700_000_000;

    fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_remaining_secs() {
        assert_eq!(remaining_secs(None, T0), 0);
        assert_eq!(remaining_secs(Some(T0 - 5), T0), 0);
        assert_eq!(remaining_secs(Some(T0), T0), 0);
        assert_eq!(remaining_secs(Some(T0 + 90), T0), 90);
    }

    #[test]
    fn test_breakdown_display_forms() {
        let b = Breakdown::from_secs(3661);
        assert_eq!(b, Breakdown { days: 0, hours: 1, minutes: 1, seconds: 1 });
        assert_eq!(b.compact(), "1h 1m 1s");
        assert_eq!(b.day_hour(), "0d 1h");

        assert_eq!(Breakdown::from_secs(90_000).day_hour(), "1d 1h");
        assert_eq!(Breakdown::from_secs(90_000).compact(), "1d 1h 0m");
        assert_eq!(Breakdown::from_secs(59).compact(), "59s");
        assert_eq!(Breakdown::from_secs(0).to_string(), "0s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_past_deadline_reports_zero_without_ticking() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();

        let handle = CountdownHandle::start(Some(T0 - 10), clock, on_expired);

        assert_eq!(handle.remaining(), 0);
        assert!(!handle.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_deadline_is_zero() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();

        let handle = CountdownHandle::start(None, clock, on_expired);

        assert_eq!(handle.remaining(), 0);
        assert!(!handle.is_running());
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_down_to_zero_and_expires_once() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();

        let handle = CountdownHandle::start(Some(T0 + 3), clock, on_expired);
        let mut rx = handle.subscribe();
        let mut seen = vec![*rx.borrow_and_update()];

        while rx.changed().await.is_ok() {
            let v = *rx.borrow_and_update();
            seen.push(v);
            if v == 0 {
                break;
            }
        }

        assert_eq!(seen, vec![3, 2, 1, 0]);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 1);
        assert!(!handle.is_running());
        assert_eq!(handle.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaches_zero_within_one_tick_of_deadline() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();
        let started = Instant::now();

        let _handle = CountdownHandle::start(Some(T0 + 30), clock, on_expired);
        while expired.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }

        let took = started.elapsed();
        assert!(took >= Duration::from_secs(30));
        assert!(took <= Duration::from_secs(30) + TICK_PERIOD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_tick() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();

        let handle = CountdownHandle::start(Some(T0 + 2), clock, on_expired);
        assert!(handle.is_running());
        drop(handle);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_deadline_restarts() {
        let clock = Arc::new(MonotonicClock::starting_at(T0));
        let (expired, on_expired) = counter();

        let mut handle = CountdownHandle::start(Some(T0 + 2), clock, on_expired);
        handle.set_deadline(Some(T0 + 100));
        assert_eq!(handle.remaining(), 100);

        // The old deadline would have fired by now
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(expired.load(Ordering::SeqCst), 0);
        assert_eq!(handle.remaining(), 95);

        handle.set_deadline(None);
        assert_eq!(handle.remaining(), 0);
        assert!(!handle.is_running());
    }

    /// Clock that can be stepped backwards.
    struct SteppedClock(std::sync::atomic::AtomicI64);

    impl Clock for SteppedClock {
        fn now(&self) -> i64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backwards_clock_never_counts_up() {
        let clock = Arc::new(SteppedClock(std::sync::atomic::AtomicI64::new(T0)));
        let (_expired, on_expired) = counter();

        let handle = CountdownHandle::start(Some(T0 + 10), clock.clone(), on_expired);
        clock.0.store(T0 + 4, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(handle.remaining(), 6);

        clock.0.store(T0 - 20, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.remaining(), 6);
    }

    proptest! {
        #[test]
        fn prop_remaining_never_negative(deadline in -10_000i64..10_000, now in -10_000i64..10_000) {
            let r = remaining_secs(Some(deadline), now);
            prop_assert_eq!(r as i64, (deadline - now).max(0));
        }

        #[test]
        fn prop_breakdown_recomposes(secs in 0u64..10_000_000) {
            let b = Breakdown::from_secs(secs);
            prop_assert_eq!(b.total_secs(), secs);
            prop_assert!(b.hours < 24 && b.minutes < 60 && b.seconds < 60);
        }
    }
}
