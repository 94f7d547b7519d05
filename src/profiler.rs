//! Lightweight tick profiling.
//!
//! An observability sidecar for room workers: the worker times the
//! whole tick and the broadcast flush and periodically logs a summary
//! through tracing. Further sections can be opened with `begin` or
//! `time`; sections may nest. Disabled, nothing here runs and nothing
//! here is required for correctness.
//!
//! Enable with the `profile` feature:
//! ```bash
//! cargo test --release --features profile
//! ```

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::info;

/// Timing figures for one named section.
#[derive(Debug, Clone, Copy)]
pub struct SectionStats {
    pub total: Duration,
    pub count: u64,
    pub best: Duration,
    pub worst: Duration,
}

impl SectionStats {
    fn empty() -> Self {
        Self {
            total: Duration::ZERO,
            count: 0,
            best: Duration::MAX,
            worst: Duration::ZERO,
        }
    }

    pub fn avg(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

/// Accumulates timing for named, possibly nested, sections.
#[derive(Default)]
pub struct Profiler {
    sections: HashMap<&'static str, SectionStats>,
    /// Stack of currently open sections.
    open: Vec<(&'static str, Instant)>,
    ticks: u64,
}

impl Profiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, name: &'static str) {
        self.open.push((name, Instant::now()));
    }

    pub fn end(&mut self) {
        if let Some((name, started)) = self.open.pop() {
            self.record(name, started.elapsed());
        }
    }

    fn record(&mut self, name: &'static str, elapsed: Duration) {
        let stats = self.sections.entry(name).or_insert_with(SectionStats::empty);
        stats.total += elapsed;
        stats.count += 1;
        if elapsed < stats.best {
            stats.best = elapsed;
        }
        if elapsed > stats.worst {
            stats.worst = elapsed;
        }
    }

    /// Time a section using a closure.
    pub fn time<F, R>(&mut self, name: &'static str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.begin(name);
        let result = f();
        self.end();
        result
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    pub fn section(&self, name: &str) -> Option<&SectionStats> {
        self.sections.get(name)
    }

    /// Log a per-section summary through tracing, heaviest first.
    pub fn log_summary(&self, room_id: &str) {
        let mut grand_total = Duration::ZERO;
        let mut rows: Vec<(&'static str, SectionStats)> = Vec::with_capacity(self.sections.len());
        for (name, stats) in &self.sections {
            grand_total += stats.total;
            rows.push((*name, *stats));
        }
        rows.sort_by_key(|(_, stats)| std::cmp::Reverse(stats.total));

        for (name, stats) in rows {
            let share = if grand_total.is_zero() {
                0.0
            } else {
                stats.total.as_secs_f64() / grand_total.as_secs_f64() * 100.0
            };
            info!(
                room = room_id,
                section = name,
                avg = ?stats.avg(),
                worst = ?stats.worst,
                share = format!("{share:.1}%"),
                "tick section"
            );
        }
        if self.ticks > 0 {
            let avg_tick = grand_total / self.ticks as u32;
            info!(room = room_id, ticks = self.ticks, ?avg_tick, "tick summary");
        }
    }

    pub fn reset(&mut self) {
        self.sections.clear();
        self.open.clear();
        self.ticks = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_sections_accumulate() {
        let mut profiler = Profiler::new();
        for _ in 0..3 {
            profiler.time("tick", || sleep(Duration::from_millis(2)));
            profiler.tick();
        }
        let stats = profiler.section("tick").unwrap();
        assert_eq!(stats.count, 3);
        assert!(stats.total >= Duration::from_millis(6));
        assert!(stats.avg() >= Duration::from_millis(2));
        assert!(stats.worst >= stats.best);
        assert_eq!(profiler.tick_count(), 3);
    }

    #[test]
    fn test_nested_sections() {
        let mut profiler = Profiler::new();
        profiler.begin("tick");
        profiler.time("broadcast", || sleep(Duration::from_millis(1)));
        profiler.end();
        assert!(profiler.section("tick").is_some());
        assert!(profiler.section("broadcast").is_some());
    }

    #[test]
    fn test_end_without_begin_is_a_no_op() {
        let mut profiler = Profiler::new();
        profiler.end();
        assert!(profiler.section("tick").is_none());
    }

    #[test]
    fn test_reset() {
        let mut profiler = Profiler::new();
        profiler.time("tick", || {});
        profiler.tick();
        profiler.reset();
        assert!(profiler.section("tick").is_none());
        assert_eq!(profiler.tick_count(), 0);
    }
}
