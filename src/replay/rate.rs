use std::thread;
use std::time::{Duration, Instant};

/// Keeps a loop near a target frequency, like a ROS `Rate`.
/// A non-positive rate never sleeps.
#[derive(Debug)]
pub struct Rate {
    period: Option<Duration>,
    next: Instant,
}

impl Rate {
    pub fn new(hz: f64) -> Self {
        let period = (hz > 0.0 && hz.is_finite()).then(|| Duration::from_secs_f64(1.0 / hz));
        Self {
            period,
            next: Instant::now(),
        }
    }

    pub fn is_unconstrained(&self) -> bool {
        self.period.is_none()
    }

    pub fn reset(&mut self) {
        self.next = Instant::now();
    }

    /// Sleeps until one period after the previous deadline. Falling more
    /// than a period behind restarts the schedule from now.
    pub fn sleep(&mut self) {
        let Some(period) = self.period else {
            return;
        };
        self.next += period;
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        } else if now - self.next > period {
            self.next = now;
        }
    }
}
