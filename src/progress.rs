//! Progress reporting.
//!
//! The executor reports per-phase progress through a [`Progress`] sink:
//! `init` with the step total, `step` as work happens, `done` at the end.
//! Frontends (terminal bars and the like) live outside this crate; the
//! built-in implementations are the silent [`NullProgress`] and the
//! fractional combinator that splits one parent indicator across phases.
//!
//! A [`FractionalProgress`] owns a span of `total_weight` units on the
//! parent. Each phase gets a [`SubProgress`] worth `weight` units; the sub
//! rescales its local step count into that span, so the parent advances
//! monotonically no matter how many steps each phase turns out to have.

/// Sink for progress events.
pub trait Progress {
    /// Announces the total number of steps to come.
    fn init(&mut self, steps: u64);
    /// Records `n` completed steps.
    fn step(&mut self, n: u64);
    /// Marks the span complete.
    fn done(&mut self);
}

/// Progress sink that discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgress;

impl Progress for NullProgress {
    fn init(&mut self, _steps: u64) {}
    fn step(&mut self, _n: u64) {}
    fn done(&mut self) {}
}

/// Splits a parent indicator into weighted sub-spans.
pub struct FractionalProgress<'a> {
    parent: &'a mut dyn Progress,
    total_weight: u64,
}

impl<'a> FractionalProgress<'a> {
    /// Wraps `parent`, which will see `total_weight` units in total.
    pub fn new(parent: &'a mut dyn Progress, total_weight: u64) -> Self {
        Self {
            parent,
            total_weight,
        }
    }

    /// Initializes the parent with the combined weight.
    pub fn init(&mut self) {
        self.parent.init(self.total_weight);
    }

    /// Completes the parent indicator.
    pub fn done(&mut self) {
        self.parent.done();
    }

    /// Starts a sub-indicator worth `weight` units of the parent.
    ///
    /// Sub-indicators are used one at a time; each finishes its span in
    /// `done` even if it saw fewer steps than announced.
    pub fn sub(&mut self, weight: u64) -> SubProgress<'_, 'a> {
        SubProgress {
            fraction: self,
            weight,
            steps: 0,
            current: 0,
            reported: 0,
        }
    }
}

/// One weighted span of a [`FractionalProgress`].
pub struct SubProgress<'p, 'a> {
    fraction: &'p mut FractionalProgress<'a>,
    weight: u64,
    steps: u64,
    current: u64,
    reported: u64,
}

impl Progress for SubProgress<'_, '_> {
    fn init(&mut self, steps: u64) {
        self.steps = steps;
        self.current = 0;
    }

    fn step(&mut self, n: u64) {
        if self.steps == 0 {
            return;
        }
        self.current = (self.current + n).min(self.steps);
        let target =
            ((self.weight as u128 * self.current as u128) / self.steps as u128) as u64;
        if target > self.reported {
            self.fraction.parent.step(target - self.reported);
            self.reported = target;
        }
    }

    fn done(&mut self) {
        if self.weight > self.reported {
            self.fraction.parent.step(self.weight - self.reported);
            self.reported = self.weight;
        }
    }
}
