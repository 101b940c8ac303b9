//! Wall-clock timing of named program sections.
use log::info;
use std::cell::RefCell;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
pub struct SectionTiming {
    pub name: String,
    pub calls: usize,
    pub total: Duration,
}

/// Accumulates the wall time spent in named sections.
///
/// Sections are entered with [`ComputingTimer::scope`] and left when the returned guard is
/// dropped. Sections are reported in the order they were first entered.
#[derive(Debug, Default)]
pub struct ComputingTimer {
    sections: RefCell<Vec<SectionTiming>>,
}

/// Records the time until it is dropped.
#[must_use = "The section ends when the guard is dropped"]
pub struct TimerScope<'a> {
    timer: &'a ComputingTimer,
    name: &'static str,
    start: Instant,
}

impl Drop for TimerScope<'_> {
    fn drop(&mut self) {
        self.timer.record(self.name, self.start.elapsed());
    }
}

impl ComputingTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope(&self, name: &'static str) -> TimerScope<'_> {
        TimerScope {
            timer: self,
            name,
            start: Instant::now(),
        }
    }

    fn record(&self, name: &str, elapsed: Duration) {
        let mut sections = self.sections.borrow_mut();
        match sections.iter_mut().find(|section| section.name == name) {
            Some(section) => {
                section.calls += 1;
                section.total += elapsed;
            }
            None => sections.push(SectionTiming {
                name: name.to_string(),
                calls: 1,
                total: elapsed,
            }),
        }
    }

    pub fn sections(&self) -> Vec<SectionTiming> {
        self.sections.borrow().clone()
    }

    pub fn total(&self) -> Duration {
        self.sections.borrow().iter().map(|section| section.total).sum()
    }

    /// Logs one line per section.
    pub fn log_summary(&self) {
        let total = self.total().as_secs_f64();
        for section in self.sections.borrow().iter() {
            let seconds = section.total.as_secs_f64();
            let share = if total > 0.0 { 100.0 * seconds / total } else { 0.0 };
            info!(
                "  {:<12} {:>4} calls {:>10.4} s {:>6.1} %",
                section.name, section.calls, seconds, share
            );
        }
    }

    pub fn reset(&self) {
        self.sections.borrow_mut().clear();
    }
}
