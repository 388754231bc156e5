//! A minimal named-section timer, the counterpart of the source library's
//! `Timer` (`timer->start("Iteration")` / `timer->stop("Iteration")` in
//! `BiCGStab.h`). Sections may nest; a section's total is the sum of every
//! start/stop pair recorded under its name, keyed by the full path of
//! currently-open section names so the same label at different nesting
//! depths stays distinct.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

struct TimerState {
    stack: Vec<(String, Instant)>,
    totals: HashMap<String, Duration>,
    counts: HashMap<String, usize>,
}

/// Accumulates wall-clock time spent in named sections across a solve.
/// Cheap to pass around (`Arc<Timer>` in the source library); here a
/// `Timer` is handed to a solver as `Option<&Timer>` and used only if
/// present, matching `BiCGStab`'s optional `timer` field.
pub struct Timer {
    state: Mutex<TimerState>,
}

impl Timer {
    pub fn new() -> Self {
        Timer { state: Mutex::new(TimerState { stack: Vec::new(), totals: HashMap::new(), counts: HashMap::new() }) }
    }

    /// Push `name` onto the open-section stack, keyed by its full nested
    /// path so `"Iteration"` inside `"Solve"` is distinct from a top-level
    /// `"Iteration"`.
    pub fn start(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let path = full_path(&state.stack, name);
        state.stack.push((path, Instant::now()));
    }

    /// Pop the most recently started section and fold its elapsed time
    /// into that path's running total. Panics if `name` does not match the
    /// innermost open section, the same misuse `BiCGStab`'s unconditional
    /// `timer->stop(...)` would otherwise silently mismeasure.
    pub fn stop(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let (path, started) = state.stack.pop().expect("stop called with no section open");
        assert!(path.ends_with(name), "stop({name}) does not match open section {path}");
        let elapsed = started.elapsed();
        *state.totals.entry(path.clone()).or_insert(Duration::ZERO) += elapsed;
        *state.counts.entry(path).or_insert(0) += 1;
    }

    /// Total time and call count recorded for a section path, for
    /// reporting once a solve finishes.
    pub fn summary(&self, path: &str) -> Option<(Duration, usize)> {
        let state = self.state.lock().unwrap();
        let total = state.totals.get(path).copied();
        let count = state.counts.get(path).copied();
        total.zip(count)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

fn full_path(stack: &[(String, Instant)], name: &str) -> String {
    if stack.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", stack.last().unwrap().0, name)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn single_section_accumulates_across_calls() {
        let timer = Timer::new();
        for _ in 0..3 {
            timer.start("Iteration");
            sleep(Duration::from_millis(1));
            timer.stop("Iteration");
        }
        let (total, count) = timer.summary("Iteration").unwrap();
        assert_eq!(count, 3);
        assert!(total >= Duration::from_millis(3));
    }

    #[test]
    #[should_panic(expected = "does not match")]
    fn mismatched_stop_panics() {
        let timer = Timer::new();
        timer.start("Outer");
        timer.stop("Inner");
    }

    #[test]
    fn nested_sections_get_distinct_paths() {
        let timer = Timer::new();
        timer.start("Solve");
        timer.start("Iteration");
        timer.stop("Iteration");
        timer.stop("Solve");
        assert!(timer.summary("Solve/Iteration").is_some());
        assert!(timer.summary("Iteration").is_none());
    }
}
