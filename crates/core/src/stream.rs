//! Cancellable multiplexed stream.
//!
//! [`cancellable`] merges three independent waits into one ordered stream:
//!
//! - the next value of a source stream, yielded as `Some(value)`
//! - an optional idle timer, yielded as a `None` tick
//! - a [`CancellationToken`], which ends the stream once observed
//!
//! Only one pull from the source is outstanding at a time. The timer is
//! re-armed after every emission, so a tick marks a full interval without
//! source values.
//!
//! When several waits are ready in the same poll, cancellation wins over a
//! source value and a source value wins over a tick. Callers and tests
//! should not depend on that ordering.

use std::{pin::Pin, time::Duration};

use futures::{Stream, StreamExt};
use tokio::time::{Instant, Sleep, sleep};
use tokio_util::sync::CancellationToken;

/// Options for [`cancellable`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CancellableOptions {
    /// Emit a `None` tick after this long without any other emission
    pub interval: Option<Duration>,
    /// On cancellation, finish the outstanding pull (and timer) and yield
    /// their results instead of dropping them
    pub drain_pending: bool,
}

impl CancellableOptions {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_optional_interval(mut self, interval: Option<Duration>) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_drain_pending(mut self, drain_pending: bool) -> Self {
        self.drain_pending = drain_pending;
        self
    }
}

enum Wake<T> {
    Cancelled,
    Value(T),
    Exhausted,
    Tick,
}

/// Wrap `source` so it stops as soon as `token` is cancelled and ticks while
/// idle.
///
/// The returned stream ends when the token is cancelled or the source is
/// exhausted, whichever is observed first. Dropping it drops the source and
/// every outstanding wait.
///
/// With `drain_pending`, a cancelled stream first waits for the outstanding
/// source pull and yields its value (if the source produced one), then waits
/// for the outstanding timer and yields its tick. A source that never
/// produces again therefore never lets a draining stream finish.
pub fn cancellable<S>(
    source: S,
    token: CancellationToken,
    options: CancellableOptions,
) -> impl Stream<Item = Option<S::Item>>
where
    S: Stream,
{
    async_stream::stream! {
        let mut source = Box::pin(source);
        let mut timer: Option<Pin<Box<Sleep>>> = options.interval.map(|period| Box::pin(sleep(period)));
        let cancelled = token.cancelled();
        tokio::pin!(cancelled);

        loop {
            // Cancellation is only observed here, so a draining stream drains
            // even when the token fired between two pulls.
            let wake = tokio::select! {
                biased;
                _ = &mut cancelled => Wake::Cancelled,
                value = source.next() => match value {
                    Some(value) => Wake::Value(value),
                    None => Wake::Exhausted,
                },
                _ = tick(&mut timer) => Wake::Tick,
            };

            match wake {
                Wake::Cancelled => {
                    if options.drain_pending {
                        if let Some(value) = source.next().await {
                            yield Some(value);
                        }
                        if let Some(timer) = timer.as_mut() {
                            timer.as_mut().await;
                            yield None;
                        }
                    }
                    break;
                }
                Wake::Exhausted => break,
                Wake::Value(value) => yield Some(value),
                Wake::Tick => yield None,
            }

            if let (Some(period), Some(timer)) = (options.interval, timer.as_mut()) {
                timer.as_mut().reset(Instant::now() + period);
            }
        }
    }
}

async fn tick(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(timer) => timer.as_mut().await,
        None => std::future::pending().await,
    }
}
