use std::time::Instant;

use crate::report::JitterSummary;

/// Wall-clock tick pacing statistics: how far each observed tick start
/// strayed from the nominal period.
pub struct TickClock {
    period_ns: u128,
    last: Option<Instant>,
    samples: u64,
    max_ns: i128,
    abs_sum_ns: u128,
}

impl TickClock {
    pub fn new(period_ns: u128) -> Self {
        Self {
            period_ns,
            last: None,
            samples: 0,
            max_ns: 0,
            abs_sum_ns: 0,
        }
    }

    /// Records a tick start. Returns the jitter against the previous one, or
    /// `None` for the first tick.
    pub fn observe(&mut self, start: Instant) -> Option<i128> {
        let last = self.last.replace(start)?;
        let actual = start.saturating_duration_since(last).as_nanos() as i128;
        let jitter = actual - self.period_ns as i128;
        self.samples += 1;
        if jitter.abs() > self.max_ns.abs() {
            self.max_ns = jitter;
        }
        self.abs_sum_ns += jitter.unsigned_abs();
        Some(jitter)
    }

    pub fn max(&self) -> i128 {
        self.max_ns
    }

    pub fn avg_abs(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.abs_sum_ns as f64 / self.samples as f64
        }
    }

    pub fn summary(&self) -> JitterSummary {
        JitterSummary {
            samples: self.samples,
            max_ns: self.max(),
            mean_abs_ns: self.avg_abs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn first_tick_has_no_jitter() {
        let mut clock = TickClock::new(1_000_000);
        assert_eq!(clock.observe(Instant::now()), None);
        assert_eq!(clock.summary().samples, 0);
    }

    #[test]
    fn tracks_late_and_early_ticks() {
        let mut clock = TickClock::new(1_000_000);
        let t0 = Instant::now();
        clock.observe(t0);
        assert_eq!(clock.observe(t0 + Duration::from_micros(1_300)), Some(300_000));
        assert_eq!(clock.observe(t0 + Duration::from_micros(2_200)), Some(-100_000));
        assert_eq!(clock.max(), 300_000);
        assert_eq!(clock.avg_abs(), 200_000.0);
    }
}
