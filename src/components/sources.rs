//! Voltage and current sources driven by time functions.

use std::f64::consts::PI;

use super::companion::inject;
use super::history::{BranchState, StateRing};
use crate::circuit::DeviceId;
use crate::solver::SystemMatrix;

/// Committed quantities a controlled source may read.
#[derive(Debug, Clone, Copy)]
pub struct SourceInputs<'a> {
    /// Potential vector of the last committed step
    pub potentials: &'a [f64],
    /// Device currents of the last committed step, indexed by `DeviceId`
    pub currents: &'a [f64],
}

impl SourceInputs<'_> {
    pub const EMPTY: SourceInputs<'static> = SourceInputs {
        potentials: &[],
        currents: &[],
    };
}

/// Waveform of a time function.
#[derive(Debug, Clone, PartialEq)]
pub enum Waveform {
    /// Constant value
    Constant(f64),
    /// `offset + amplitude * sin(2*pi*frequency*t + phase)`, phase in radians
    Sine {
        amplitude: f64,
        frequency: f64,
        phase: f64,
        offset: f64,
    },
    /// `gain * (p[a] - p[b])` of the last committed step
    PotentialControlled { nodes: [usize; 2], gain: f64 },
    /// `gain * i(device)` of the last committed step
    CurrentControlled { device: DeviceId, gain: f64 },
}

impl Waveform {
    pub fn sine(amplitude: f64, frequency: f64) -> Self {
        Waveform::Sine {
            amplitude,
            frequency,
            phase: 0.0,
            offset: 0.0,
        }
    }

    /// Value at time `t`.
    pub fn value(&self, t: f64, inputs: &SourceInputs<'_>) -> f64 {
        match *self {
            Waveform::Constant(v) => v,
            Waveform::Sine {
                amplitude,
                frequency,
                phase,
                offset,
            } => offset + amplitude * (2.0 * PI * frequency * t + phase).sin(),
            Waveform::PotentialControlled { nodes: [a, b], gain } => {
                let p = |n: usize| inputs.potentials.get(n).copied().unwrap_or(0.0);
                gain * (p(a) - p(b))
            }
            Waveform::CurrentControlled { device, gain } => {
                gain * inputs.currents.get(device.0).copied().unwrap_or(0.0)
            }
        }
    }
}

/// A waveform plus the values it produced on committed steps.
#[derive(Debug, Clone)]
pub struct TimeFunction {
    waveform: Waveform,
    last_value: f64,
    history: StateRing<f64>,
}

impl TimeFunction {
    pub fn new(waveform: Waveform) -> Self {
        let last_value = match waveform {
            Waveform::Constant(v) => v,
            _ => 0.0,
        };
        Self {
            waveform,
            last_value,
            history: StateRing::new(2),
        }
    }

    pub fn constant(value: f64) -> Self {
        Self::new(Waveform::Constant(value))
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    /// Constant functions can live in the cached basis vector.
    pub fn is_constant(&self) -> bool {
        matches!(self.waveform, Waveform::Constant(_))
    }

    pub fn value(&self, t: f64, inputs: &SourceInputs<'_>) -> f64 {
        self.waveform.value(t, inputs)
    }

    /// Value of the last committed step.
    pub fn last_value(&self) -> f64 {
        self.last_value
    }

    pub(crate) fn set_history_depth(&mut self, depth: usize) {
        self.history = StateRing::new(depth);
    }

    /// Swap the waveform. Values already committed stay in the history.
    pub(crate) fn set_waveform(&mut self, waveform: Waveform) {
        self.waveform = waveform;
    }

    pub(crate) fn commit(&mut self, value: f64) {
        self.history.push(self.last_value);
        self.last_value = value;
    }

    pub(crate) fn step_back(&mut self) -> bool {
        match self.history.pop() {
            Some(value) => {
                self.last_value = value;
                true
            }
            None => false,
        }
    }
}

/// Optional output clamp of a voltage source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageLimits {
    pub lower: f64,
    pub upper: f64,
}

/// An ideal voltage source with its own branch row.
///
/// Enforces `p[0] - p[1] = v(t)`; the branch row unknown is the source
/// current (terminal 0 -> terminal 1 through the source).
#[derive(Debug, Clone)]
pub struct VoltageSource {
    branch: usize,
    function: TimeFunction,
    limits: Option<VoltageLimits>,
}

impl VoltageSource {
    pub(crate) fn new(branch: usize, function: TimeFunction) -> Self {
        Self {
            branch,
            function,
            limits: None,
        }
    }

    pub(crate) fn offset_branch(&mut self, offset: usize) {
        self.branch += offset;
    }

    pub(crate) fn set_limits(&mut self, limits: VoltageLimits) {
        self.limits = Some(limits);
    }

    pub fn branch(&self) -> usize {
        self.branch
    }

    pub fn function(&self) -> &TimeFunction {
        &self.function
    }

    pub(crate) fn function_mut(&mut self) -> &mut TimeFunction {
        &mut self.function
    }

    pub fn limits(&self) -> Option<VoltageLimits> {
        self.limits
    }

    /// Source voltage at `t`, clamped to the limits.
    pub fn voltage(&self, t: f64, inputs: &SourceInputs<'_>) -> f64 {
        let v = self.function.value(t, inputs);
        match self.limits {
            Some(VoltageLimits { lower, upper }) => v.clamp(lower, upper),
            None => v,
        }
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, terminals: [usize; 2]) {
        m.stamp_branch(terminals, self.branch);
    }

    pub(crate) fn stamp_rhs(&self, b: &mut [f64], t: f64, inputs: &SourceInputs<'_>) {
        b[self.branch] += self.voltage(t, inputs);
    }

    pub(crate) fn compute_current(&self, state: &mut BranchState, p: &[f64], terminals: [usize; 2]) {
        state.voltage = p[terminals[0]] - p[terminals[1]];
        state.current = p[self.branch];
    }
}

/// An ideal current source; `i(t)` flows terminal 0 -> terminal 1 through
/// the source.
#[derive(Debug, Clone)]
pub struct CurrentSource {
    function: TimeFunction,
}

impl CurrentSource {
    pub(crate) fn new(function: TimeFunction) -> Self {
        Self { function }
    }

    pub fn function(&self) -> &TimeFunction {
        &self.function
    }

    pub(crate) fn function_mut(&mut self) -> &mut TimeFunction {
        &mut self.function
    }

    pub fn current(&self, t: f64, inputs: &SourceInputs<'_>) -> f64 {
        self.function.value(t, inputs)
    }

    pub(crate) fn stamp_rhs(&self, b: &mut [f64], terminals: [usize; 2], t: f64, inputs: &SourceInputs<'_>) {
        inject(b, terminals, -self.current(t, inputs));
    }

    pub(crate) fn compute_current(
        &self,
        state: &mut BranchState,
        p: &[f64],
        terminals: [usize; 2],
        t: f64,
        inputs: &SourceInputs<'_>,
    ) {
        state.voltage = p[terminals[0]] - p[terminals[1]];
        state.current = self.current(t, inputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sine_waveform() {
        let w = Waveform::sine(10.0, 50.0);
        assert_relative_eq!(w.value(0.005, &SourceInputs::EMPTY), 10.0, epsilon = 1e-12);
        let shifted = Waveform::Sine {
            amplitude: 1.0,
            frequency: 1.0,
            phase: PI / 2.0,
            offset: 2.0,
        };
        assert_relative_eq!(shifted.value(0.0, &SourceInputs::EMPTY), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_controlled_waveforms_read_committed_values() {
        let potentials = [0.0, 4.0, 1.0];
        let currents = [0.0, 0.25];
        let inputs = SourceInputs {
            potentials: &potentials,
            currents: &currents,
        };
        let vcvs = Waveform::PotentialControlled {
            nodes: [1, 2],
            gain: 2.0,
        };
        assert_relative_eq!(vcvs.value(0.0, &inputs), 6.0);
        let ccvs = Waveform::CurrentControlled {
            device: DeviceId(1),
            gain: 100.0,
        };
        assert_relative_eq!(ccvs.value(0.0, &inputs), 25.0);
    }

    #[test]
    fn test_time_function_step_back() {
        let mut f = TimeFunction::new(Waveform::sine(1.0, 1.0));
        f.commit(0.5);
        f.commit(0.75);
        assert_eq!(f.last_value(), 0.75);
        assert!(f.step_back());
        assert_eq!(f.last_value(), 0.5);
        assert!(f.step_back());
        assert_eq!(f.last_value(), 0.0);
        assert!(!f.step_back());
    }

    #[test]
    fn test_voltage_limits_clamp() {
        let mut v = VoltageSource::new(3, TimeFunction::constant(12.0));
        v.set_limits(VoltageLimits {
            lower: -5.0,
            upper: 5.0,
        });
        let mut b = vec![0.0; 4];
        v.stamp_rhs(&mut b, 0.0, &SourceInputs::EMPTY);
        v.stamp_rhs(&mut b, 0.0, &SourceInputs::EMPTY);
        // Stamps accumulate
        assert_eq!(b[3], 10.0);
    }

    #[test]
    fn test_current_source_direction() {
        let s = CurrentSource::new(TimeFunction::constant(2.0));
        let mut b = vec![0.0; 3];
        s.stamp_rhs(&mut b, [1, 2], 0.0, &SourceInputs::EMPTY);
        assert_eq!(b, vec![0.0, -2.0, 2.0]);
    }
}
