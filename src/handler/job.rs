use std::pin::Pin;
use std::task::Context;
use std::time::Duration;

use futures::Future;
use futures_timer::Delay;

/// A background job run periodically.
#[derive(Debug)]
pub(crate) struct PeriodicJob {
    interval: Duration,
    delay: Delay,
}

impl PeriodicJob {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            delay: Delay::new(interval),
        }
    }

    /// Returns `true` if the interval elapsed since the job last ran.
    ///
    /// The timer is rearmed and registered with the current task.
    pub fn poll_ready(&mut self, cx: &mut Context<'_>) -> bool {
        if Future::poll(Pin::new(&mut self.delay), cx).is_ready() {
            self.delay.reset(self.interval);
            // register the waker for the next tick
            let _ = Future::poll(Pin::new(&mut self.delay), cx);
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use std::task::Poll;

    use futures::future::poll_fn;

    use super::*;

    #[tokio::test]
    async fn fires_after_interval() {
        let mut job = PeriodicJob::new(Duration::from_millis(20));
        assert!(!poll_fn(|cx| Poll::Ready(job.poll_ready(cx))).await);
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(poll_fn(|cx| Poll::Ready(job.poll_ready(cx))).await);
        assert!(!poll_fn(|cx| Poll::Ready(job.poll_ready(cx))).await);
    }
}
