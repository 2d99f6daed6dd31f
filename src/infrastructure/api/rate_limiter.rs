use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

/// Spacer applied between requests once the burst threshold is reached.
const BURST_SPACER: Duration = Duration::from_secs(1);

/// Rolling-window rate limiter over the timestamps of recent requests.
///
/// At most `requests_per_minute` acquisitions succeed in any rolling window;
/// past `burst_limit` a one-second spacer slows the caller down. The wait is
/// computed under the window lock but slept outside it, so a throttled call
/// never blocks unrelated callers from recording their own slots.
pub struct RateLimiter {
    window: Mutex<VecDeque<Instant>>,
    requests_per_minute: usize,
    burst_limit: usize,
    window_len: Duration,
}

enum Admission {
    Proceed,
    Spacer,
    Wait(Duration),
}

impl RateLimiter {
    pub fn new(requests_per_minute: usize, burst_limit: usize) -> Self {
        Self::with_window(requests_per_minute, burst_limit, Duration::from_secs(60))
    }

    /// Window override for tests; production always uses one minute.
    pub fn with_window(
        requests_per_minute: usize,
        burst_limit: usize,
        window_len: Duration,
    ) -> Self {
        Self {
            window: Mutex::new(VecDeque::new()),
            requests_per_minute: requests_per_minute.max(1),
            burst_limit: burst_limit.max(1),
            window_len,
        }
    }

    /// Wait until a request slot is available, then claim it.
    pub async fn acquire(&self) {
        loop {
            let admission = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                while let Some(front) = window.front() {
                    if now.duration_since(*front) >= self.window_len {
                        window.pop_front();
                    } else {
                        break;
                    }
                }

                if window.len() >= self.requests_per_minute {
                    // Slot opens when the oldest timestamp ages out.
                    let oldest = *window.front().unwrap_or(&now);
                    Admission::Wait(self.window_len.saturating_sub(now.duration_since(oldest)))
                } else if window.len() >= self.burst_limit {
                    window.push_back(now);
                    Admission::Spacer
                } else {
                    window.push_back(now);
                    Admission::Proceed
                }
            };

            match admission {
                Admission::Proceed => return,
                Admission::Spacer => {
                    tokio::time::sleep(BURST_SPACER).await;
                    return;
                }
                Admission::Wait(d) => {
                    debug!("Rate limit window full, waiting {:?}", d);
                    tokio::time::sleep(d.max(Duration::from_millis(10))).await;
                }
            }
        }
    }

    /// Requests recorded in the current window (for health reporting).
    pub async fn window_count(&self) -> usize {
        let mut window = self.window.lock().await;
        let now = Instant::now();
        while let Some(front) = window.front() {
            if now.duration_since(*front) >= self.window_len {
                window.pop_front();
            } else {
                break;
            }
        }
        window.len()
    }
}
