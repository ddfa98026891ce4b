use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Fixed extra delay applied once the window is full, so a burst of
/// blocked callers does not stampede the instant a slot frees up.
const FULL_WINDOW_BACKOFF: Duration = Duration::from_millis(250);

/// Sliding-window request limiter: at most `max_requests` in any
/// rolling `window`. A full window makes `acquire` wait for capacity
/// instead of failing the request.
///
/// The trim-and-append of the window happens under a single lock, so
/// concurrent callers cannot both observe a free slot and overfill it.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    max_requests: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl SlidingWindowLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            timestamps: Mutex::new(VecDeque::with_capacity(max_requests)),
        }
    }

    /// Broker default: 100 requests per rolling 60 seconds
    pub fn per_minute(max_requests: usize) -> Self {
        Self::new(max_requests, Duration::from_secs(60))
    }

    /// Claim one request slot, sleeping until the window has room.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut timestamps = self.timestamps.lock().await;
                let now = Instant::now();
                while timestamps
                    .front()
                    .is_some_and(|t| now.duration_since(*t) >= self.window)
                {
                    timestamps.pop_front();
                }

                if timestamps.len() < self.max_requests {
                    timestamps.push_back(now);
                    return;
                }

                // Oldest entry determines when the next slot opens
                let oldest = *timestamps.front().unwrap_or(&now);
                self.window.saturating_sub(now.duration_since(oldest))
            };

            tracing::debug!(wait_ms = wait.as_millis() as u64, "rate limit window full, waiting");
            tokio::time::sleep(wait + FULL_WINDOW_BACKOFF).await;
        }
    }

    /// Slots currently consumed in the window (diagnostics)
    pub async fn in_flight(&self) -> usize {
        let mut timestamps = self.timestamps.lock().await;
        let now = Instant::now();
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= self.window)
        {
            timestamps.pop_front();
        }
        timestamps.len()
    }
}
