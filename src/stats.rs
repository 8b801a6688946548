use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};

/// How one record/replay cycle ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Captured and replayed.
    Generated,
    /// Capture held a non-finite sample; nothing was replayed.
    InvalidSamples,
    /// Generator refused the waveform or the trigger.
    GenerationFailed,
    /// Cross routing had no partner capture to replay yet.
    NoSource,
    /// Stop was requested mid-capture.
    Cancelled,
}

/// Cycle statistics for one channel, with *all-time* totals and a
/// *sliding 1 s window* rate.
#[derive(Debug)]
pub struct Counter {
    pub cycles: usize,
    pub generated: usize,
    pub skipped: usize,
    pub failed: usize,
    /// All-time number of samples captured
    pub samples: usize,
    pub t_begin: Instant,

    // --- sliding window fields ---
    window: Duration,
    events: VecDeque<(Instant, usize)>,
    samples_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            cycles: 0,
            generated: 0,
            skipped: 0,
            failed: 0,
            samples: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            events: VecDeque::new(),
            samples_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    /// Record a finished cycle that captured `samples` samples.
    pub fn record(&mut self, outcome: CycleOutcome, samples: usize) {
        self.record_at(Instant::now(), outcome, samples);
    }

    fn record_at(&mut self, now: Instant, outcome: CycleOutcome, samples: usize) {
        match outcome {
            CycleOutcome::Cancelled => return,
            CycleOutcome::Generated => self.generated += 1,
            CycleOutcome::InvalidSamples | CycleOutcome::NoSource => self.skipped += 1,
            CycleOutcome::GenerationFailed => self.failed += 1,
        }
        self.cycles += 1;
        self.samples += samples;

        self.events.push_back((now, samples));
        self.samples_in_window += samples;
        self.evict(now);
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, n)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.samples_in_window -= n;
            } else {
                break;
            }
        }
    }

    /// Cycles per second over the sliding window.
    pub fn cycle_rate(&self) -> f64 {
        self.events.len() as f64 / self.window.as_secs_f64().max(1e-6)
    }

    /// Captured mega-samples per second over the sliding window.
    pub fn sample_rate(&self) -> f64 {
        self.samples_in_window as f64 / self.window.as_secs_f64().max(1e-6) / 1e6
    }

    /// Long-term average cycle rate since `t_begin`.
    pub fn average_cycle_rate(&self) -> f64 {
        self.cycles as f64 / self.t_begin.elapsed().as_secs_f64().max(1e-6)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_land_in_their_buckets() {
        let mut c = Counter::new();
        c.record(CycleOutcome::Generated, 100);
        c.record(CycleOutcome::Generated, 100);
        c.record(CycleOutcome::InvalidSamples, 100);
        c.record(CycleOutcome::NoSource, 100);
        c.record(CycleOutcome::GenerationFailed, 100);
        c.record(CycleOutcome::Cancelled, 100);

        assert_eq!(c.cycles, 5);
        assert_eq!(c.generated, 2);
        assert_eq!(c.skipped, 2);
        assert_eq!(c.failed, 1);
        assert_eq!(c.samples, 500);
    }

    #[test]
    fn window_forgets_old_cycles() {
        let mut c = Counter::new();
        let start = Instant::now();
        c.record_at(start, CycleOutcome::Generated, 1_000_000);
        c.record_at(start, CycleOutcome::Generated, 1_000_000);
        assert_eq!(c.cycle_rate(), 2.0);
        assert_eq!(c.sample_rate(), 2.0);

        c.record_at(
            start + Duration::from_millis(1500),
            CycleOutcome::Generated,
            500_000,
        );
        assert_eq!(c.cycle_rate(), 1.0);
        assert_eq!(c.sample_rate(), 0.5);
        assert_eq!(c.cycles, 3);
    }
}
