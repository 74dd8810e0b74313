//! Per-calculator step history and rollback.
//!
//! Every committed step pushes a snapshot of the pre-commit state onto a
//! small ring. Stepping back pops the newest snapshot, so a commit followed
//! by one step-back restores the exact pre-commit values.

use std::collections::VecDeque;

/// Electrical state of a two-terminal calculator.
///
/// `potential` holds the terminal potentials of the last committed step,
/// `old_potential` the step before. `old_current` is the committed current
/// of the last step (the "previous" current of the companion equations) and
/// `old_old_current` the one before that.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BranchState {
    /// Present current (terminal 0 -> terminal 1 through the device)
    pub current: f64,
    /// Present voltage (potential 0 - potential 1)
    pub voltage: f64,
    pub potential: [f64; 2],
    pub old_potential: [f64; 2],
    pub old_current: f64,
    pub old_old_current: f64,
    /// Running maximum of |voltage| over committed steps
    pub max_abs_voltage: f64,
    /// Running maximum of |current| over committed steps
    pub max_abs_current: f64,
}

impl BranchState {
    /// Voltage of the last committed step.
    pub fn previous_voltage(&self) -> f64 {
        self.potential[0] - self.potential[1]
    }

    /// Voltage two committed steps back.
    pub fn previous_previous_voltage(&self) -> f64 {
        self.old_potential[0] - self.old_potential[1]
    }

    /// Shift the history by one step, taking the solved terminal potentials.
    pub fn commit(&mut self, p0: f64, p1: f64) {
        self.voltage = p0 - p1;
        self.old_potential = self.potential;
        self.potential = [p0, p1];
        self.old_old_current = self.old_current;
        self.old_current = self.current;
        self.max_abs_voltage = self.max_abs_voltage.max(self.voltage.abs());
        self.max_abs_current = self.max_abs_current.max(self.current.abs());
    }
}

/// Bounded stack of saved states with a reversed-step counter.
#[derive(Debug, Clone)]
pub struct StateRing<T> {
    saved: VecDeque<T>,
    depth: usize,
    steps_reversed: usize,
}

impl<T: Clone> StateRing<T> {
    /// Create a ring keeping at most `depth` snapshots (minimum 1).
    pub fn new(depth: usize) -> Self {
        let depth = depth.max(1);
        Self {
            saved: VecDeque::with_capacity(depth),
            depth,
            steps_reversed: 0,
        }
    }

    /// Save a snapshot for a newly committed step.
    pub fn push(&mut self, state: T) {
        if self.saved.len() == self.depth {
            self.saved.pop_front();
        }
        self.saved.push_back(state);
        self.steps_reversed = self.steps_reversed.saturating_sub(1);
    }

    /// Take the newest snapshot back, if the saved depth allows it.
    pub fn pop(&mut self) -> Option<T> {
        if self.steps_reversed >= self.depth {
            return None;
        }
        let state = self.saved.pop_back()?;
        self.steps_reversed += 1;
        Some(state)
    }

    /// Whether a step-back would succeed.
    pub fn can_pop(&self) -> bool {
        self.steps_reversed < self.depth && !self.saved.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn len(&self) -> usize {
        self.saved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.saved.is_empty()
    }

    pub fn steps_reversed(&self) -> usize {
        self.steps_reversed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_shifts_history() {
        let mut s = BranchState {
            current: 2.0,
            ..Default::default()
        };
        s.commit(5.0, 1.0);
        s.current = 3.0;
        s.commit(7.0, 1.0);
        assert_eq!(s.previous_voltage(), 6.0);
        assert_eq!(s.previous_previous_voltage(), 4.0);
        assert_eq!(s.old_current, 3.0);
        assert_eq!(s.old_old_current, 2.0);
        assert_eq!(s.max_abs_voltage, 6.0);
        assert_eq!(s.max_abs_current, 3.0);
    }

    #[test]
    fn test_ring_is_bounded_by_depth() {
        let mut ring = StateRing::new(2);
        ring.push(1);
        ring.push(2);
        ring.push(3);
        assert_eq!(ring.len(), 2);
        assert_eq!(ring.pop(), Some(3));
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), None);
        assert_eq!(ring.steps_reversed(), 2);
    }

    #[test]
    fn test_reversed_counter_limits_rollback() {
        let mut ring = StateRing::new(2);
        ring.push(1);
        ring.push(2);
        assert_eq!(ring.pop(), Some(2));
        assert_eq!(ring.pop(), Some(1));
        // One new commit only frees one reversal
        ring.push(10);
        ring.push(11);
        assert_eq!(ring.steps_reversed(), 0);
        assert!(ring.can_pop());
        assert_eq!(ring.pop(), Some(11));
    }
}
