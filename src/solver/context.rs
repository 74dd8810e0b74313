//! Per-step simulation context.
//!
//! Carries the step time, the step width and every flag a calculator can
//! raise while a step is being solved. Nothing here outlives the step: it
//! is reset by [`StepContext::begin_step`].

use crate::circuit::{DeviceId, IntegrationScheme};

/// Why a device asked for the step to be solved again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelinearizationCause {
    /// A switch started conducting
    SwitchedOn,
    /// A switch stopped conducting
    SwitchedOff,
    /// A nonlinear capacitance was pulled back after a current sign flip
    CapacitanceRollback,
}

/// A request to re-solve the present step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelinearizationEvent {
    pub device: DeviceId,
    pub cause: RelinearizationCause,
}

/// Mutable state shared by all calculators for one time step.
#[derive(Debug, Clone, Default)]
pub struct StepContext {
    time: f64,
    dt: f64,
    scheme: IntegrationScheme,
    initializing: bool,
    events: Vec<RelinearizationEvent>,
    switch_error: bool,
    matrix_stale: bool,
    parameter_changed: bool,
    switch_events: usize,
}

impl StepContext {
    pub fn new(scheme: IntegrationScheme) -> Self {
        Self {
            scheme,
            ..Default::default()
        }
    }

    /// Start a new step at `time` with width `dt`, clearing all flags.
    pub fn begin_step(&mut self, time: f64, dt: f64, initializing: bool) {
        self.time = time;
        self.dt = dt;
        self.initializing = initializing;
        self.events.clear();
        self.switch_error = false;
        self.matrix_stale = false;
        self.parameter_changed = false;
        self.switch_events = 0;
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn scheme(&self) -> IntegrationScheme {
        self.scheme
    }

    /// Capacitors with an initial voltage act as voltage sources.
    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Record a request to re-solve.
    ///
    /// Switch transitions put the step into switch-error mode, which
    /// suspends nonlinear capacitance updates until the next step.
    pub fn request(&mut self, device: DeviceId, cause: RelinearizationCause) {
        match cause {
            RelinearizationCause::SwitchedOn | RelinearizationCause::SwitchedOff => {
                self.switch_error = true;
                self.switch_events += 1;
            }
            RelinearizationCause::CapacitanceRollback => self.parameter_changed = true,
        }
        self.matrix_stale = true;
        self.events.push(RelinearizationEvent { device, cause });
    }

    /// A conductance changed outside of a relinearization request.
    pub fn mark_matrix_stale(&mut self) {
        self.matrix_stale = true;
    }

    /// A nonlinear parameter (capacitance, inductance, resistance) was
    /// committed to a new value.
    pub fn note_parameter_change(&mut self) {
        self.parameter_changed = true;
        self.matrix_stale = true;
    }

    /// Take and clear the matrix-stale flag.
    pub fn take_matrix_stale(&mut self) -> bool {
        std::mem::take(&mut self.matrix_stale)
    }

    /// Whether the last solve must be repeated.
    pub fn needs_resolve(&self) -> bool {
        !self.events.is_empty()
    }

    /// Drain the pending events of the last solve.
    pub fn take_events(&mut self) -> Vec<RelinearizationEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn events(&self) -> &[RelinearizationEvent] {
        &self.events
    }

    /// Some switch toggled earlier in this step.
    pub fn in_switch_error(&self) -> bool {
        self.switch_error
    }

    /// Some nonlinear parameter changed in this step.
    pub fn parameter_changed(&self) -> bool {
        self.parameter_changed
    }

    /// Number of switch transitions in this step.
    pub fn switch_events(&self) -> usize {
        self.switch_events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_request_sets_error_mode() {
        let mut ctx = StepContext::new(IntegrationScheme::BackwardEuler);
        ctx.begin_step(1e-6, 1e-6, false);
        assert!(!ctx.needs_resolve());

        ctx.request(DeviceId(3), RelinearizationCause::SwitchedOn);
        assert!(ctx.needs_resolve());
        assert!(ctx.in_switch_error());
        assert!(!ctx.parameter_changed());

        let events = ctx.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].device, DeviceId(3));
        // Error mode persists for the rest of the step
        assert!(!ctx.needs_resolve());
        assert!(ctx.in_switch_error());
        assert!(ctx.take_matrix_stale());
        assert!(!ctx.take_matrix_stale());
    }

    #[test]
    fn test_begin_step_clears_flags() {
        let mut ctx = StepContext::new(IntegrationScheme::Trapezoidal);
        ctx.begin_step(0.0, 1e-6, true);
        ctx.request(DeviceId(0), RelinearizationCause::CapacitanceRollback);
        assert!(ctx.parameter_changed());

        ctx.begin_step(1e-6, 1e-6, false);
        assert!(!ctx.parameter_changed());
        assert!(!ctx.in_switch_error());
        assert!(!ctx.is_initializing());
        assert_eq!(ctx.switch_events(), 0);
        assert_eq!(ctx.scheme(), IntegrationScheme::Trapezoidal);
    }
}
