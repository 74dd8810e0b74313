//! Passive calculators: Resistor, Capacitor, Inductor.

use log::debug;

use super::companion::{
    capacitor_conductance, capacitor_current, capacitor_history, inductor_conductance,
    inductor_current, inductor_history, inject,
};
use super::history::BranchState;
use crate::characteristic::Characteristic;
use crate::circuit::DeviceId;
use crate::solver::{
    RelinearizationCause, StepContext, SystemMatrix, CAPACITANCE_COMMIT_RATIO, MAX_RESISTANCE,
    MIN_INDUCTANCE, MIN_RESISTANCE,
};

/// Relative change `|a - b| / (a + b)` used by the nonlinear commit rule.
fn relative_change(old: f64, new: f64) -> f64 {
    ((old - new) / (old + new)).abs()
}

/// A resistor, optionally following a resistance characteristic R(|v|).
#[derive(Debug, Clone)]
pub struct Resistor {
    pub(crate) conductance: f64,
    characteristic: Option<Characteristic>,
}

impl Resistor {
    /// Create a linear resistor. The value is clamped to the supported range.
    pub fn new(resistance: f64) -> Self {
        let r = resistance.clamp(MIN_RESISTANCE, MAX_RESISTANCE);
        Self {
            conductance: 1.0 / r,
            characteristic: None,
        }
    }

    /// Create a resistor whose table holds R(|v|).
    ///
    /// The conductance is taken from the reciprocal interpolation so that
    /// reluctance-like tables spanning decades stay well behaved.
    pub fn nonlinear(characteristic: Characteristic) -> Self {
        let conductance = clamp_conductance(characteristic.interpolate_inverse(0.0));
        Self {
            conductance,
            characteristic: Some(characteristic),
        }
    }

    pub fn conductance(&self) -> f64 {
        self.conductance
    }

    pub fn resistance(&self) -> f64 {
        1.0 / self.conductance
    }

    pub fn characteristic(&self) -> Option<&Characteristic> {
        self.characteristic.as_ref()
    }

    /// Swap the curve of a nonlinear device. It applies from the next step.
    pub(crate) fn replace_characteristic(&mut self, characteristic: Characteristic) -> bool {
        match &mut self.characteristic {
            Some(current) => {
                *current = characteristic;
                true
            }
            None => false,
        }
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, terminals: [usize; 2]) {
        m.stamp_conductance(terminals, self.conductance);
    }

    pub(crate) fn compute_current(&self, state: &mut BranchState, v: f64) {
        state.voltage = v;
        state.current = self.conductance * v;
    }

    pub(crate) fn prepare(&mut self, name: &str, state: &BranchState, ctx: &mut StepContext) {
        let Some(characteristic) = &self.characteristic else {
            return;
        };
        let g = clamp_conductance(characteristic.interpolate_inverse(state.previous_voltage().abs()));
        if relative_change(self.conductance, g) > CAPACITANCE_COMMIT_RATIO {
            debug!(
                "{}: conductance {:.4e} -> {:.4e} S at t={:.6e}",
                name,
                self.conductance,
                g,
                ctx.time()
            );
            self.conductance = g;
            ctx.note_parameter_change();
        }
    }
}

fn clamp_conductance(g: f64) -> f64 {
    g.clamp(1.0 / MAX_RESISTANCE, 1.0 / MIN_RESISTANCE)
}

/// Mutable part of a capacitor that is saved with each committed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacitorState {
    /// Capacitance presently stamped into A
    pub capacitance: f64,
    /// `1 - C_new / C` for a pending (uncommitted) capacitance change
    pub ratio: f64,
    /// Current correction `-ratio * i_prev` applied while a change is pending
    pub correction: f64,
}

/// A capacitor with an optional C(|v|) characteristic and initial voltage.
#[derive(Debug, Clone)]
pub struct Capacitor {
    pub(crate) dynamics: CapacitorState,
    initial_voltage: f64,
    init_branch: Option<usize>,
    characteristic: Option<Characteristic>,
}

impl Capacitor {
    pub fn new(capacitance: f64) -> Self {
        Self {
            dynamics: CapacitorState {
                capacitance,
                ratio: 0.0,
                correction: 0.0,
            },
            initial_voltage: 0.0,
            init_branch: None,
            characteristic: None,
        }
    }

    /// Capacitance following `characteristic` at the branch voltage magnitude.
    pub fn nonlinear(characteristic: Characteristic) -> Self {
        let mut capacitor = Self::new(characteristic.interpolate(0.0));
        capacitor.characteristic = Some(characteristic);
        capacitor
    }

    pub(crate) fn set_initial_voltage(&mut self, voltage: f64, branch: usize) {
        self.initial_voltage = voltage;
        self.init_branch = Some(branch);
        if let Some(characteristic) = &self.characteristic {
            self.dynamics.capacitance = characteristic.interpolate(voltage.abs());
        }
    }

    pub(crate) fn offset_branch(&mut self, offset: usize) {
        if let Some(z) = self.init_branch.as_mut() {
            *z += offset;
        }
    }

    pub fn capacitance(&self) -> f64 {
        self.dynamics.capacitance
    }

    pub fn initial_voltage(&self) -> f64 {
        self.initial_voltage
    }

    /// Branch row used by the initial-voltage bootstrap, if any.
    pub fn init_branch(&self) -> Option<usize> {
        self.init_branch
    }

    pub fn characteristic(&self) -> Option<&Characteristic> {
        self.characteristic.as_ref()
    }

    /// Swap the curve of a nonlinear device. It applies from the next step.
    pub(crate) fn replace_characteristic(&mut self, characteristic: Characteristic) -> bool {
        match &mut self.characteristic {
            Some(current) => {
                *current = characteristic;
                true
            }
            None => false,
        }
    }

    fn bootstrapping(&self, ctx: &StepContext) -> Option<usize> {
        self.init_branch.filter(|_| ctx.is_initializing())
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, terminals: [usize; 2], ctx: &StepContext) {
        if let Some(z) = self.bootstrapping(ctx) {
            m.stamp_branch(terminals, z);
            return;
        }
        let g = capacitor_conductance(ctx.scheme(), self.dynamics.capacitance, ctx.dt());
        m.stamp_conductance(terminals, g);
        if let Some(z) = self.init_branch {
            // Unused branch row stays regular
            m.add(z, z, 1.0);
        }
    }

    pub(crate) fn stamp_rhs(&self, b: &mut [f64], terminals: [usize; 2], state: &BranchState, ctx: &StepContext) {
        if let Some(z) = self.bootstrapping(ctx) {
            b[z] += self.initial_voltage;
            return;
        }
        let h = capacitor_history(
            ctx.scheme(),
            self.dynamics.capacitance,
            ctx.dt(),
            state.previous_voltage(),
            state.previous_previous_voltage(),
            state.old_current,
        );
        inject(b, terminals, h - self.dynamics.correction);
    }

    /// Re-evaluate a nonlinear capacitance from the last committed voltage.
    ///
    /// A change larger than the commit ratio is applied to the matrix at
    /// once; a smaller one is carried as a current correction.
    pub(crate) fn prepare(&mut self, name: &str, state: &BranchState, ctx: &mut StepContext) {
        let Some(characteristic) = &self.characteristic else {
            return;
        };
        if self.bootstrapping(ctx).is_some() {
            self.dynamics.ratio = 0.0;
            self.dynamics.correction = 0.0;
            return;
        }

        let c = self.dynamics.capacitance;
        let c_new = characteristic.interpolate(state.previous_voltage().abs());
        self.dynamics.ratio = 1.0 - c_new / c;
        self.dynamics.correction = -self.dynamics.ratio * state.old_current;

        if relative_change(c, c_new) > CAPACITANCE_COMMIT_RATIO {
            debug!(
                "{}: capacitance {:.4e} -> {:.4e} F at t={:.6e}",
                name,
                c,
                c_new,
                ctx.time()
            );
            self.dynamics = CapacitorState {
                capacitance: c_new,
                ratio: 0.0,
                correction: 0.0,
            };
            ctx.note_parameter_change();
        }
    }

    pub(crate) fn compute_current(
        &mut self,
        id: DeviceId,
        state: &mut BranchState,
        p: &[f64],
        terminals: [usize; 2],
        ctx: &mut StepContext,
    ) {
        let v = p[terminals[0]] - p[terminals[1]];
        state.voltage = v;
        if let Some(z) = self.bootstrapping(ctx) {
            state.current = p[z];
            return;
        }

        let i_prev = state.old_current;
        let mut current = capacitor_current(
            ctx.scheme(),
            self.dynamics.capacitance,
            ctx.dt(),
            v,
            state.previous_voltage(),
            state.previous_previous_voltage(),
            i_prev,
        );

        let pending = self.dynamics.ratio != 0.0;
        if pending && !ctx.in_switch_error() && (current + self.dynamics.correction) * i_prev < 0.0 {
            // The correction would flip the current: take the new capacitance
            self.dynamics = CapacitorState {
                capacitance: (1.0 - self.dynamics.ratio) * self.dynamics.capacitance,
                ratio: 0.0,
                correction: 0.0,
            };
            ctx.request(id, RelinearizationCause::CapacitanceRollback);
        } else {
            current += self.dynamics.correction;
        }
        state.current = current;
    }
}

/// An inductor, optionally following an L(|i|) characteristic.
#[derive(Debug, Clone)]
pub struct Inductor {
    pub(crate) inductance: f64,
    characteristic: Option<Characteristic>,
    coupled: bool,
    /// `v' / L`, or `(L^-1 v')_k` when coupled
    w_prev: f64,
}

impl Inductor {
    pub fn new(inductance: f64) -> Self {
        Self {
            inductance: inductance.max(MIN_INDUCTANCE),
            characteristic: None,
            coupled: false,
            w_prev: 0.0,
        }
    }

    pub fn nonlinear(characteristic: Characteristic) -> Self {
        let mut inductor = Self::new(characteristic.interpolate(0.0));
        inductor.characteristic = Some(characteristic);
        inductor
    }

    pub fn inductance(&self) -> f64 {
        self.inductance
    }

    pub fn characteristic(&self) -> Option<&Characteristic> {
        self.characteristic.as_ref()
    }

    /// Swap the curve of a nonlinear device. It applies from the next step.
    pub(crate) fn replace_characteristic(&mut self, characteristic: Characteristic) -> bool {
        match &mut self.characteristic {
            Some(current) => {
                *current = characteristic;
                true
            }
            None => false,
        }
    }

    /// Member of a coupled group; the group owns the A stamp.
    pub fn is_coupled(&self) -> bool {
        self.coupled
    }

    pub(crate) fn mark_coupled(&mut self) {
        self.coupled = true;
    }

    pub(crate) fn set_weighted_voltage_prev(&mut self, w_prev: f64) {
        self.w_prev = w_prev;
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, terminals: [usize; 2], ctx: &StepContext) {
        if !self.coupled {
            m.stamp_conductance(terminals, inductor_conductance(ctx.scheme(), self.inductance, ctx.dt()));
        }
    }

    pub(crate) fn stamp_rhs(&self, b: &mut [f64], terminals: [usize; 2], state: &BranchState, ctx: &StepContext) {
        let h = inductor_history(
            ctx.scheme(),
            ctx.dt(),
            state.old_current,
            state.old_old_current,
            self.w_prev,
        );
        inject(b, terminals, -h);
    }

    pub(crate) fn prepare(&mut self, name: &str, state: &BranchState, ctx: &mut StepContext) {
        if let Some(characteristic) = &self.characteristic {
            let l_new = characteristic.interpolate(state.old_current.abs()).max(MIN_INDUCTANCE);
            if relative_change(self.inductance, l_new) > CAPACITANCE_COMMIT_RATIO {
                debug!(
                    "{}: inductance {:.4e} -> {:.4e} H at t={:.6e}",
                    name,
                    self.inductance,
                    l_new,
                    ctx.time()
                );
                self.inductance = l_new;
                ctx.note_parameter_change();
            }
        }
        if !self.coupled {
            self.w_prev = state.previous_voltage() / self.inductance;
        }
    }

    pub(crate) fn compute_current(&self, state: &mut BranchState, v: f64, ctx: &StepContext) {
        if !self.coupled {
            self.apply_weighted_voltage(state, v, v / self.inductance, ctx);
        }
    }

    /// Set the current from the present weighted voltage `w`.
    pub(crate) fn apply_weighted_voltage(&self, state: &mut BranchState, v: f64, w: f64, ctx: &StepContext) {
        state.voltage = v;
        state.current = inductor_current(
            ctx.scheme(),
            ctx.dt(),
            state.old_current,
            state.old_old_current,
            w,
            self.w_prev,
        );
    }
}
