//! Two-state switching devices.
//!
//! Every member of the family is a resistor that is either `r_on` or
//! `r_off`, with a forward-voltage offset while conducting:
//!
//! ```text
//! i = (v - uF) / r_on     conducting
//! i = v / r_off           blocking
//! ```
//!
//! The state is decided after each solve. A transition asks the step loop
//! to re-solve the same time step with the new conductance.
//!
//! Both transitions share the boundary `v = uF`: a blocking switch turns on
//! above `uF + ACCEPTANCE_THRESHOLD`, a conducting one turns off when its
//! current reverses, which is `v < uF` in the conducting model. Every solved
//! voltage is therefore consistent with at least one of the two states.

use log::debug;

use super::companion::inject;
use super::history::BranchState;
use crate::circuit::DeviceId;
use crate::solver::{
    RelinearizationCause, StepContext, SystemMatrix, ACCEPTANCE_THRESHOLD, DEFAULT_RECOVERY_TIME,
    DEFAULT_R_OFF, DEFAULT_R_ON, DEFAULT_U_FORWARD, MAX_RESISTANCE, MIN_RESISTANCE,
    THYRISTOR_IDLE_RESET_FACTOR,
};

/// Switching behaviour of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchKind {
    /// Turns on under forward bias, off on current reversal
    Diode,
    /// Diode that also needs a gate to turn on and holds for the recovery time
    Thyristor,
    /// Bidirectional, conducts exactly while the gate is set
    IdealSwitch,
    /// Gate and forward bias to turn on; off on gate removal or reversal
    Igbt,
    /// Gate turns the channel on; without gate the body diode conducts in reverse
    Mosfet,
}

impl SwitchKind {
    /// Whether the conducting offset is `uF` (junction devices).
    fn has_forward_drop(self) -> bool {
        !matches!(self, SwitchKind::IdealSwitch | SwitchKind::Mosfet)
    }
}

/// Conduction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Conduction {
    #[default]
    Off,
    /// Conducting from terminal 0 to terminal 1 (or bidirectional channel)
    Forward,
    /// MOSFET body diode, conducting from terminal 1 to terminal 0
    Reverse,
}

/// Electrical parameters of a switch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchParams {
    pub r_on: f64,
    pub r_off: f64,
    pub u_forward: f64,
    /// Thyristor reverse-recovery time
    pub recovery_time: f64,
}

impl Default for SwitchParams {
    fn default() -> Self {
        Self {
            r_on: DEFAULT_R_ON,
            r_off: DEFAULT_R_OFF,
            u_forward: DEFAULT_U_FORWARD,
            recovery_time: DEFAULT_RECOVERY_TIME,
        }
    }
}

impl SwitchParams {
    pub fn new(r_on: f64, r_off: f64, u_forward: f64) -> Self {
        Self {
            r_on,
            r_off,
            u_forward,
            ..Default::default()
        }
    }

    pub fn with_recovery_time(mut self, recovery_time: f64) -> Self {
        self.recovery_time = recovery_time;
        self
    }

    fn clamped(self) -> Self {
        Self {
            r_on: self.r_on.clamp(MIN_RESISTANCE, MAX_RESISTANCE),
            r_off: self.r_off.clamp(MIN_RESISTANCE, MAX_RESISTANCE),
            ..self
        }
    }
}

/// Mutable part of a switch that is saved with each committed step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SwitchState {
    pub conduction: Conduction,
    /// Time of the last transition (`-inf` before the first one)
    pub last_switch_event: f64,
}

impl Default for SwitchState {
    fn default() -> Self {
        Self {
            conduction: Conduction::Off,
            last_switch_event: f64::NEG_INFINITY,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Switch {
    kind: SwitchKind,
    params: SwitchParams,
    pub(crate) dynamics: SwitchState,
    gate: bool,
}

impl Switch {
    pub fn new(kind: SwitchKind, params: SwitchParams) -> Self {
        Self {
            kind,
            params: params.clamped(),
            dynamics: SwitchState::default(),
            gate: false,
        }
    }

    pub fn kind(&self) -> SwitchKind {
        self.kind
    }

    pub fn params(&self) -> &SwitchParams {
        &self.params
    }

    pub fn conduction(&self) -> Conduction {
        self.dynamics.conduction
    }

    pub fn is_on(&self) -> bool {
        self.dynamics.conduction != Conduction::Off
    }

    pub fn last_switch_event(&self) -> f64 {
        self.dynamics.last_switch_event
    }

    pub fn gate(&self) -> bool {
        self.gate
    }

    /// Set the gate signal; takes effect at the next step.
    pub fn set_gate(&mut self, gate: bool) {
        self.gate = gate;
    }

    /// Present resistance `r_on` or `r_off`.
    pub fn resistance(&self) -> f64 {
        if self.is_on() {
            self.params.r_on
        } else {
            self.params.r_off
        }
    }

    /// Voltage offset of the present state.
    pub fn offset(&self) -> f64 {
        match self.dynamics.conduction {
            Conduction::Off => 0.0,
            Conduction::Forward if self.kind.has_forward_drop() => self.params.u_forward,
            Conduction::Forward => 0.0,
            Conduction::Reverse => -self.params.u_forward,
        }
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, terminals: [usize; 2]) {
        m.stamp_conductance(terminals, 1.0 / self.resistance());
    }

    pub(crate) fn stamp_rhs(&self, b: &mut [f64], terminals: [usize; 2]) {
        let offset = self.offset();
        if offset != 0.0 {
            inject(b, terminals, offset / self.params.r_on);
        }
    }

    pub(crate) fn compute_current(&self, state: &mut BranchState, v: f64) {
        state.voltage = v;
        state.current = (v - self.offset()) / self.resistance();
    }

    /// Apply gate-driven transitions before the first solve of a step.
    pub(crate) fn apply_gate(&mut self, name: &str, ctx: &mut StepContext) {
        let next = match (self.kind, self.dynamics.conduction, self.gate) {
            (SwitchKind::IdealSwitch, Conduction::Off, true) => Conduction::Forward,
            (SwitchKind::IdealSwitch, Conduction::Forward, false) => Conduction::Off,
            (SwitchKind::Igbt, Conduction::Forward, false) => Conduction::Off,
            (SwitchKind::Mosfet, Conduction::Off | Conduction::Reverse, true) => Conduction::Forward,
            (SwitchKind::Mosfet, Conduction::Forward, false) => Conduction::Off,
            _ => return,
        };
        self.switch_to(name, next, ctx.time());
        ctx.mark_matrix_stale();
    }

    /// Decide the state from the solved voltage and current.
    ///
    /// Returns `true` and records a relinearization request when the state
    /// changed.
    pub(crate) fn update_state(
        &mut self,
        id: DeviceId,
        name: &str,
        v: f64,
        i: f64,
        ctx: &mut StepContext,
    ) -> bool {
        let t = ctx.time();
        let threshold = self.params.u_forward + ACCEPTANCE_THRESHOLD;
        let since_event = t - self.dynamics.last_switch_event;
        let t_rr = self.params.recovery_time;

        let next = match (self.kind, self.dynamics.conduction) {
            (SwitchKind::Diode, Conduction::Off) if v > threshold => Conduction::Forward,
            (SwitchKind::Diode | SwitchKind::Igbt, Conduction::Forward) if i < 0.0 => Conduction::Off,
            (SwitchKind::Igbt, Conduction::Off) if self.gate && v > threshold => Conduction::Forward,
            (SwitchKind::Thyristor, Conduction::Off)
                if self.gate && v > threshold && since_event >= t_rr =>
            {
                Conduction::Forward
            }
            (SwitchKind::Thyristor, Conduction::Forward) if i < 0.0 => {
                if since_event > THYRISTOR_IDLE_RESET_FACTOR * t_rr {
                    // Long conduction: recovery is timed from the reversal
                    self.dynamics.last_switch_event = t;
                }
                if t - self.dynamics.last_switch_event >= t_rr {
                    Conduction::Off
                } else {
                    return false;
                }
            }
            (SwitchKind::Mosfet, Conduction::Off) if !self.gate && -v > threshold => Conduction::Reverse,
            (SwitchKind::Mosfet, Conduction::Reverse) if i > 0.0 => Conduction::Off,
            _ => return false,
        };
        let cause = if next == Conduction::Off {
            RelinearizationCause::SwitchedOff
        } else {
            RelinearizationCause::SwitchedOn
        };
        self.switch_to(name, next, t);
        ctx.request(id, cause);
        true
    }

    fn switch_to(&mut self, name: &str, next: Conduction, t: f64) {
        debug!(
            "{} ({:?}): {:?} -> {:?} at t={:.6e}",
            name, self.kind, self.dynamics.conduction, next, t
        );
        self.dynamics.conduction = next;
        self.dynamics.last_switch_event = t;
    }
}
