//! Device calculators for companion-model stamping.
//!
//! This module provides every element the network can hold:
//! - Passive: Resistor, Capacitor, Inductor (each optionally nonlinear)
//! - Sources: Voltage Source, Current Source, driven by a [`TimeFunction`]
//! - Switches: Diode, Thyristor, Ideal Switch, IGBT, MOSFET
//! - Coupled inductor groups
//!
//! A [`Device`] is a tagged record: the shared two-terminal bookkeeping
//! (terminals, [`BranchState`], rollback history) plus a [`DeviceKind`]
//! carrying the variant parameters. The companion equations are free
//! functions in [`companion`] selected by the integration scheme.

pub mod companion;
mod coupled;
mod history;
mod linear;
mod sources;
mod switches;

pub use coupled::{cholesky_inverse, CoupledInductorGroup, CouplingValue, MutualCoupling};
pub use history::{BranchState, StateRing};
pub use linear::{Capacitor, CapacitorState, Inductor, Resistor};
pub use sources::{CurrentSource, SourceInputs, TimeFunction, VoltageLimits, VoltageSource, Waveform};
pub use switches::{Conduction, Switch, SwitchKind, SwitchParams, SwitchState};

use crate::characteristic::Characteristic;
use crate::circuit::DeviceId;
use crate::solver::{StepContext, SystemMatrix};

/// Variant part of a device.
#[derive(Debug, Clone)]
pub enum DeviceKind {
    Resistor(Resistor),
    Capacitor(Capacitor),
    Inductor(Inductor),
    VoltageSource(VoltageSource),
    CurrentSource(CurrentSource),
    Switch(Switch),
}

impl DeviceKind {
    /// Short type name used in log output.
    pub fn type_name(&self) -> &'static str {
        match self {
            DeviceKind::Resistor(_) => "resistor",
            DeviceKind::Capacitor(_) => "capacitor",
            DeviceKind::Inductor(_) => "inductor",
            DeviceKind::VoltageSource(_) => "voltage source",
            DeviceKind::CurrentSource(_) => "current source",
            DeviceKind::Switch(_) => "switch",
        }
    }

    fn dynamics(&self) -> Dynamics {
        match self {
            DeviceKind::Resistor(r) => Dynamics::Resistor(r.conductance),
            DeviceKind::Capacitor(c) => Dynamics::Capacitor(c.dynamics),
            DeviceKind::Inductor(l) => Dynamics::Inductor(l.inductance),
            DeviceKind::Switch(s) => Dynamics::Switch(s.dynamics),
            DeviceKind::VoltageSource(_) | DeviceKind::CurrentSource(_) => Dynamics::Stateless,
        }
    }

    fn restore(&mut self, dynamics: Dynamics) {
        match (self, dynamics) {
            (DeviceKind::Resistor(r), Dynamics::Resistor(g)) => r.conductance = g,
            (DeviceKind::Capacitor(c), Dynamics::Capacitor(d)) => c.dynamics = d,
            (DeviceKind::Inductor(l), Dynamics::Inductor(value)) => l.inductance = value,
            (DeviceKind::Switch(s), Dynamics::Switch(d)) => s.dynamics = d,
            _ => {}
        }
    }

    fn function_mut(&mut self) -> Option<&mut TimeFunction> {
        match self {
            DeviceKind::VoltageSource(v) => Some(v.function_mut()),
            DeviceKind::CurrentSource(i) => Some(i.function_mut()),
            _ => None,
        }
    }
}

/// Variant state that changes while simulating.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Dynamics {
    Stateless,
    Resistor(f64),
    Capacitor(CapacitorState),
    Inductor(f64),
    Switch(SwitchState),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Snapshot {
    state: BranchState,
    dynamics: Dynamics,
}

/// A two-terminal device calculator.
#[derive(Debug, Clone)]
pub struct Device {
    id: DeviceId,
    name: String,
    terminals: [usize; 2],
    pub(crate) kind: DeviceKind,
    pub(crate) state: BranchState,
    history: StateRing<Snapshot>,
    /// State at the start of the step being solved
    step_start: Snapshot,
}

impl Device {
    pub(crate) fn new(id: DeviceId, name: String, terminals: [usize; 2], kind: DeviceKind) -> Self {
        let step_start = Snapshot {
            state: BranchState::default(),
            dynamics: kind.dynamics(),
        };
        Self {
            id,
            name,
            terminals,
            kind,
            state: BranchState::default(),
            history: StateRing::new(2),
            step_start,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Global matrix indices of terminal 0 and terminal 1.
    pub fn terminals(&self) -> [usize; 2] {
        self.terminals
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn state(&self) -> &BranchState {
        &self.state
    }

    pub fn current(&self) -> f64 {
        self.state.current
    }

    pub fn voltage(&self) -> f64 {
        self.state.voltage
    }

    /// Running maximum of the quantity relevant for this device: voltage for
    /// capacitors and sources, current for everything else.
    pub fn max_abs_value(&self) -> f64 {
        match self.kind {
            DeviceKind::Capacitor(_) | DeviceKind::VoltageSource(_) | DeviceKind::CurrentSource(_) => {
                self.state.max_abs_voltage
            }
            _ => self.state.max_abs_current,
        }
    }

    pub fn as_switch(&self) -> Option<&Switch> {
        match &self.kind {
            DeviceKind::Switch(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the B contribution is constant and belongs to the basis vector.
    pub fn is_basis(&self) -> bool {
        match &self.kind {
            DeviceKind::VoltageSource(v) => v.function().is_constant(),
            DeviceKind::CurrentSource(i) => i.function().is_constant(),
            _ => false,
        }
    }

    /// Whether the device writes anything into B.
    pub fn stamps_rhs(&self) -> bool {
        !matches!(self.kind, DeviceKind::Resistor(_))
    }

    /// Move branch rows from their ordinal to their place after the nodes.
    pub(crate) fn offset_branch(&mut self, offset: usize) {
        match &mut self.kind {
            DeviceKind::VoltageSource(v) => v.offset_branch(offset),
            DeviceKind::Capacitor(c) => c.offset_branch(offset),
            _ => {}
        }
    }

    pub(crate) fn set_history_depth(&mut self, depth: usize) {
        self.history = StateRing::new(depth);
        if let Some(function) = self.kind.function_mut() {
            function.set_history_depth(depth);
        }
    }

    pub(crate) fn replace_characteristic(&mut self, characteristic: Characteristic) -> bool {
        match &mut self.kind {
            DeviceKind::Resistor(r) => r.replace_characteristic(characteristic),
            DeviceKind::Capacitor(c) => c.replace_characteristic(characteristic),
            DeviceKind::Inductor(l) => l.replace_characteristic(characteristic),
            _ => false,
        }
    }

    pub(crate) fn set_waveform(&mut self, waveform: Waveform) -> bool {
        match self.kind.function_mut() {
            Some(function) => {
                function.set_waveform(waveform);
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_gate(&mut self, gate: bool) -> bool {
        match &mut self.kind {
            DeviceKind::Switch(s) => {
                s.set_gate(gate);
                true
            }
            _ => false,
        }
    }

    /// Remember the committed state before a step is solved.
    pub(crate) fn begin_step(&mut self) {
        self.step_start = Snapshot {
            state: self.state,
            dynamics: self.kind.dynamics(),
        };
    }

    /// Drop everything a failed step changed.
    pub(crate) fn abort_step(&mut self) {
        self.state = self.step_start.state;
        self.kind.restore(self.step_start.dynamics);
    }

    /// Refresh nonlinear parameters and gate-driven states from the last
    /// committed step.
    pub(crate) fn prepare(&mut self, ctx: &mut StepContext) {
        match &mut self.kind {
            DeviceKind::Resistor(r) => r.prepare(&self.name, &self.state, ctx),
            DeviceKind::Capacitor(c) => c.prepare(&self.name, &self.state, ctx),
            DeviceKind::Inductor(l) => l.prepare(&self.name, &self.state, ctx),
            DeviceKind::Switch(s) => s.apply_gate(&self.name, ctx),
            DeviceKind::VoltageSource(_) | DeviceKind::CurrentSource(_) => {}
        }
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, ctx: &StepContext) {
        let t = self.terminals;
        match &self.kind {
            DeviceKind::Resistor(r) => r.stamp_matrix(m, t),
            DeviceKind::Capacitor(c) => c.stamp_matrix(m, t, ctx),
            DeviceKind::Inductor(l) => l.stamp_matrix(m, t, ctx),
            DeviceKind::VoltageSource(v) => v.stamp_matrix(m, t),
            DeviceKind::CurrentSource(_) => {}
            DeviceKind::Switch(s) => s.stamp_matrix(m, t),
        }
    }

    /// Add this device's contribution into `b` (never overwrites).
    pub(crate) fn stamp_rhs(&self, b: &mut [f64], ctx: &StepContext, inputs: &SourceInputs<'_>) {
        let t = self.terminals;
        match &self.kind {
            DeviceKind::Resistor(_) => {}
            DeviceKind::Capacitor(c) => c.stamp_rhs(b, t, &self.state, ctx),
            DeviceKind::Inductor(l) => l.stamp_rhs(b, t, &self.state, ctx),
            DeviceKind::VoltageSource(v) => v.stamp_rhs(b, ctx.time(), inputs),
            DeviceKind::CurrentSource(i) => i.stamp_rhs(b, t, ctx.time(), inputs),
            DeviceKind::Switch(s) => s.stamp_rhs(b, t),
        }
    }

    /// Derive current and voltage from the solved potentials.
    ///
    /// Coupled inductors are skipped here; their group sets the currents.
    pub(crate) fn compute_current(&mut self, p: &[f64], ctx: &mut StepContext, inputs: &SourceInputs<'_>) {
        let t = self.terminals;
        let v = p[t[0]] - p[t[1]];
        match &mut self.kind {
            DeviceKind::Resistor(r) => r.compute_current(&mut self.state, v),
            DeviceKind::Capacitor(c) => c.compute_current(self.id, &mut self.state, p, t, ctx),
            DeviceKind::Inductor(l) => l.compute_current(&mut self.state, v, ctx),
            DeviceKind::VoltageSource(s) => s.compute_current(&mut self.state, p, t),
            DeviceKind::CurrentSource(s) => s.compute_current(&mut self.state, p, t, ctx.time(), inputs),
            DeviceKind::Switch(s) => s.compute_current(&mut self.state, v),
        }
    }

    /// Check a switch against the solved voltage and current.
    pub(crate) fn update_switch_state(&mut self, ctx: &mut StepContext) -> bool {
        match &mut self.kind {
            DeviceKind::Switch(s) => {
                s.update_state(self.id, &self.name, self.state.voltage, self.state.current, ctx)
            }
            _ => false,
        }
    }

    /// Accept the solved step: save the pre-commit state, then shift the
    /// history.
    pub(crate) fn commit(&mut self, p: &[f64], time: f64, inputs: &SourceInputs<'_>) {
        self.history.push(Snapshot {
            state: self.state,
            dynamics: self.kind.dynamics(),
        });
        let value = match &self.kind {
            DeviceKind::VoltageSource(v) => Some(v.voltage(time, inputs)),
            DeviceKind::CurrentSource(i) => Some(i.current(time, inputs)),
            _ => None,
        };
        if let (Some(value), Some(function)) = (value, self.kind.function_mut()) {
            function.commit(value);
        }
        self.state.commit(p[self.terminals[0]], p[self.terminals[1]]);
    }

    /// Restore the state saved by the newest commit.
    pub(crate) fn step_back(&mut self) -> bool {
        let Some(snapshot) = self.history.pop() else {
            return false;
        };
        self.state = snapshot.state;
        self.kind.restore(snapshot.dynamics);
        if let Some(function) = self.kind.function_mut() {
            function.step_back();
        }
        true
    }

    pub(crate) fn can_step_back(&self) -> bool {
        self.history.can_pop()
    }
}
