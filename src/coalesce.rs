//! Rate limiting for high-frequency value streams.
//!
//! [`Throttle`] is the synchronous core: it lets at most one value through per
//! interval and remembers the newest value it held back. [`CoalescingChannel`]
//! drives a throttle from a background task, emitting held-back values when
//! their window closes and flushing the last one when the stream ends.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    last_emit: Option<Instant>,
    pending: Option<T>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            pending: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns the value if its window is open, otherwise holds it as pending.
    pub fn offer(&mut self, value: T, now: Instant) -> Option<T> {
        match self.last_emit {
            Some(last) if now.saturating_duration_since(last) < self.interval => {
                self.pending = Some(value);
                None
            }
            _ => {
                self.last_emit = Some(now);
                self.pending = None;
                Some(value)
            }
        }
    }

    /// When a held-back value becomes due.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (&self.pending, self.last_emit) {
            (Some(_), Some(last)) => Some(last + self.interval),
            _ => None,
        }
    }

    pub fn poll_due(&mut self, now: Instant) -> Option<T> {
        let deadline = self.next_deadline()?;
        if now < deadline {
            return None;
        }
        self.last_emit = Some(now);
        self.pending.take()
    }

    /// Ends the stream: returns the held-back value and resets the window.
    pub fn finish(&mut self) -> Option<T> {
        self.last_emit = None;
        self.pending.take()
    }

    pub fn cancel(&mut self) {
        self.last_emit = None;
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Background task accepting frequent writes and delivering them at a bounded rate.
pub struct CoalescingChannel<T> {
    sender: mpsc::UnboundedSender<T>,
    task: JoinHandle<()>,
}

impl<T: Send + 'static> CoalescingChannel<T> {
    pub fn spawn<F>(interval: Duration, mut sink: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let (sender, mut receiver) = mpsc::unbounded_channel::<T>();
        let task = tokio::spawn(async move {
            let mut throttle = Throttle::new(interval);
            loop {
                let deadline = throttle.next_deadline();
                tokio::select! {
                    received = receiver.recv() => match received {
                        Some(value) => {
                            if let Some(value) = throttle.offer(value, Instant::now()) {
                                sink(value);
                            }
                        }
                        None => {
                            if let Some(value) = throttle.finish() {
                                sink(value);
                            }
                            break;
                        }
                    },
                    _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                        if let Some(value) = throttle.poll_due(Instant::now()) {
                            sink(value);
                        }
                    }
                }
            }
        });
        Self { sender, task }
    }

    pub fn push(&self, value: T) -> bool {
        self.sender.send(value).is_ok()
    }

    /// Closes the stream and waits for the trailing flush.
    pub async fn close(self) {
        drop(self.sender);
        if let Err(error) = self.task.await {
            if !error.is_cancelled() {
                tracing::warn!(error = %error, "coalescing task failed");
            }
        }
    }

    /// Drops anything still pending without flushing.
    pub fn cancel(self) {
        self.task.abort();
    }
}
