//! Interval + deadline + cancellation polling, shared by the principal and propagation waiters.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollWindow {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollWindow {
    pub fn new(interval: Duration, max_wait: Duration) -> Self { Self { interval, max_wait } }
}

/// Result of one check.
#[derive(Debug)]
pub enum PollStep<T, E> {
    Ready(T),
    /// Not yet; the optional error is kept as the last observed failure.
    Pending(Option<E>),
    /// Stop polling, the condition can never be met.
    Abort(E),
}

#[derive(Debug)]
pub struct Polled<T> {
    pub value: T,
    pub attempts: u32,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum PollError<E> {
    TimedOut { elapsed: Duration, attempts: u32, last: Option<E> },
    Cancelled { elapsed: Duration, attempts: u32 },
    Aborted { error: E, attempts: u32, elapsed: Duration },
}

/// Sleep for `duration` unless `cancel` fires first. Returns `false` when cancelled.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Run `check` until it is ready, the window's `max_wait` elapses, or `cancel` fires.
///
/// The first check runs immediately. The last sleep is clipped to the deadline so one final
/// check always happens at the deadline itself. Cancellation is observed during checks and
/// during sleeps.
pub async fn poll_until<T, E, F, Fut>(
    window: PollWindow,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<Polled<T>, PollError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollStep<T, E>>,
{
    let start = Instant::now();
    let deadline = start + window.max_wait;
    let mut attempts = 0u32;
    let mut last = None;
    loop {
        if cancel.is_cancelled() {
            return Err(PollError::Cancelled { elapsed: start.elapsed(), attempts });
        }
        attempts += 1;
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PollError::Cancelled { elapsed: start.elapsed(), attempts }),
            step = check(attempts) => step,
        };
        match step {
            PollStep::Ready(value) => return Ok(Polled { value, attempts, elapsed: start.elapsed() }),
            PollStep::Abort(error) => return Err(PollError::Aborted { error, attempts, elapsed: start.elapsed() }),
            PollStep::Pending(err) => {
                if err.is_some() { last = err; }
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(PollError::TimedOut { elapsed: now - start, attempts, last });
        }
        let nap = window.interval.min(deadline - now);
        if !sleep_or_cancel(nap, cancel).await {
            return Err(PollError::Cancelled { elapsed: start.elapsed(), attempts });
        }
    }
}
