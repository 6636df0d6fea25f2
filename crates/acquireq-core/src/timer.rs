//! Clock and single-shot timer service.
//!
//! Offers expire through timers spawned on the tokio runtime. Each timer is
//! tagged with a generation number so a callback can tell whether it is still
//! the resource's current timer once it runs.

use std::{
    future::Future,
    sync::atomic::{AtomicI64, AtomicU64, Ordering},
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

/// Source of wall-clock time for deadlines
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// Stored as milliseconds since the epoch so it can be shared without a lock.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(start.timestamp_millis()),
        }
    }

    /// Move the clock forward (or backward, for negative durations)
    pub fn advance(&self, by: chrono::Duration) {
        self.millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Wall clock driven by tokio's timer.
///
/// Reads `Utc::now()` once at construction and then follows
/// [`tokio::time::Instant`], so paused-time tests see deadlines and timer
/// delays move together.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin_wall: Utc::now(),
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.origin.elapsed())
            .map_or(self.origin_wall, |elapsed| self.origin_wall + elapsed)
    }
}

/// Time left until `deadline`, clamped at zero
#[must_use]
pub fn remaining(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

/// Identifies one scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerTicket(u64);

/// Handle to a pending single-shot timer.
///
/// Dropping the handle detaches the timer; call [`OfferTimer::cancel`] to stop
/// it from firing.
#[derive(Debug)]
pub struct OfferTimer {
    ticket: TimerTicket,
    deadline: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl OfferTimer {
    #[must_use]
    pub const fn ticket(&self) -> TimerTicket {
        self.ticket
    }

    /// The offer deadline this timer was armed for
    #[must_use]
    pub const fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the timer. A callback already running is aborted at its next
    /// await point.
    pub fn cancel(self) {
        self.handle.abort();
    }
}

/// Spawns single-shot timers on the current tokio runtime
#[derive(Debug, Default)]
pub struct TimerService {
    next_ticket: AtomicU64,
}

impl TimerService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` once after `delay`.
    ///
    /// The callback receives the ticket of the timer that fired it.
    pub fn schedule<F, Fut>(
        &self,
        delay: Duration,
        deadline: DateTime<Utc>,
        callback: F,
    ) -> OfferTimer
    where
        F: FnOnce(TimerTicket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let ticket = TimerTicket(self.next_ticket.fetch_add(1, Ordering::Relaxed));
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(ticket).await;
        });
        OfferTimer {
            ticket,
            deadline,
            handle,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, AtomicUsize},
        Arc,
    };

    use super::*;

    #[test]
    fn test_remaining_clamps_past_deadlines() {
        let now = Utc::now();
        assert_eq!(remaining(now - chrono::Duration::seconds(10), now), Duration::ZERO);
        assert_eq!(
            remaining(now + chrono::Duration::seconds(3), now),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(chrono::Duration::seconds(5));
        assert_eq!(
            clock.now().timestamp_millis(),
            (start + chrono::Duration::seconds(5)).timestamp_millis()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_clock_follows_paused_time() {
        let clock = TokioClock::new();
        let start = clock.now();
        tokio::time::advance(Duration::from_secs(90)).await;
        assert_eq!(clock.now() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let service = TimerService::new();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);

        let timer = service.schedule(Duration::from_secs(5), Utc::now(), move |_| async move {
            flag.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
        assert!(timer.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let service = TimerService::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let timer = service.schedule(Duration::from_secs(1), Utc::now(), move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_tickets_are_distinct() {
        let service = TimerService::new();
        let a = service.schedule(Duration::from_secs(60), Utc::now(), |_| async {});
        let b = service.schedule(Duration::from_secs(60), Utc::now(), |_| async {});
        assert_ne!(a.ticket(), b.ticket());
        a.cancel();
        b.cancel();
    }
}
