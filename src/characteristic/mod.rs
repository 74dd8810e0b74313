//! Piecewise nonlinear characteristics.
//!
//! A [`Characteristic`] is a measured or fitted curve given as ascending
//! `(x, y)` samples, e.g. a capacitance-vs-voltage curve `C(u)` or an
//! inductance-vs-current curve `L(i)`. Queries between samples are
//! interpolated, queries outside the sampled range clamp to the boundary
//! sample (no extrapolation).
//!
//! Two interpolation modes exist:
//!
//! ```text
//! Linear:  y = y[i-1] + (y[i] - y[i-1]) * (x - x[i-1]) / (x[i] - x[i-1])
//! Log:     y = 10^( log10(y[i-1]) + (log10(y[i]) - log10(y[i-1])) * (x - x[i-1]) / (x[i] - x[i-1]) )
//! ```
//!
//! Log mode suits device capacitance curves that span several decades.

mod file;

pub use file::{parse_characteristic, read_characteristic, write_characteristic, CharacteristicFile};

use crate::error::{PowerStampError, Result};

/// Interpolation rule applied between two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Linear in y
    #[default]
    Linear,
    /// Linear in log10(y), then exponentiated
    Log,
}

/// Default C(u) curve: 100 nF falling to 1 nF over 0..400 V.
pub const DEFAULT_CAPACITANCE_X: [f64; 4] = [0.0, 100.0, 300.0, 400.0];
/// Capacitance samples matching [`DEFAULT_CAPACITANCE_X`].
pub const DEFAULT_CAPACITANCE_Y: [f64; 4] = [1e-7, 0.8e-7, 1.2e-9, 1e-9];

/// Default L(i) curve: 500 µH saturating to 100 µH over 0..30 A.
pub const DEFAULT_INDUCTANCE_X: [f64; 4] = [0.0, 10.0, 15.0, 30.0];
/// Inductance samples matching [`DEFAULT_INDUCTANCE_X`].
pub const DEFAULT_INDUCTANCE_Y: [f64; 4] = [500e-6, 500e-6, 150e-6, 100e-6];

/// A sampled nonlinear characteristic y(x).
#[derive(Debug, Clone, PartialEq)]
pub struct Characteristic {
    x: Vec<f64>,
    y: Vec<f64>,
    mode: Interpolation,
}

impl Characteristic {
    /// Create a characteristic from ascending x samples and matching y samples.
    ///
    /// Fails if fewer than two samples are given, the arrays differ in
    /// length, x is not strictly ascending, or log mode is requested with a
    /// non-positive y sample.
    pub fn new(x: Vec<f64>, y: Vec<f64>, mode: Interpolation) -> Result<Self> {
        if x.len() != y.len() {
            return Err(PowerStampError::SampleLengthMismatch {
                x_len: x.len(),
                y_len: y.len(),
            });
        }
        if x.len() < 2 {
            return Err(PowerStampError::TooFewSamples { count: x.len() });
        }
        if let Some(index) = x.windows(2).position(|w| !(w[1] > w[0])) {
            return Err(PowerStampError::NonAscendingSamples { index: index + 1 });
        }
        if mode == Interpolation::Log {
            if let Some((index, &value)) = y.iter().enumerate().find(|(_, v)| !(**v > 0.0)) {
                return Err(PowerStampError::NonPositiveLogSample { index, value });
            }
        }
        Ok(Self { x, y, mode })
    }

    /// Linear-mode characteristic.
    pub fn linear(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        Self::new(x, y, Interpolation::Linear)
    }

    /// Log-y-mode characteristic.
    pub fn log(x: Vec<f64>, y: Vec<f64>) -> Result<Self> {
        Self::new(x, y, Interpolation::Log)
    }

    /// Default nonlinear capacitance curve (log mode).
    pub fn default_capacitance() -> Self {
        Self {
            x: DEFAULT_CAPACITANCE_X.to_vec(),
            y: DEFAULT_CAPACITANCE_Y.to_vec(),
            mode: Interpolation::Log,
        }
    }

    /// Default nonlinear inductance curve (linear mode).
    pub fn default_inductance() -> Self {
        Self {
            x: DEFAULT_INDUCTANCE_X.to_vec(),
            y: DEFAULT_INDUCTANCE_Y.to_vec(),
            mode: Interpolation::Linear,
        }
    }

    /// Same samples with a different interpolation mode.
    pub fn with_mode(self, mode: Interpolation) -> Result<Self> {
        Self::new(self.x, self.y, mode)
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn mode(&self) -> Interpolation {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Always false: a valid characteristic holds at least two samples.
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Evaluate y(x).
    pub fn interpolate(&self, x: f64) -> f64 {
        self.evaluate(x, |y| y)
    }

    /// Evaluate the reciprocal curve 1/y(x), interpolating over `1/y`
    /// samples with the same rule. Used by reluctance-style devices whose
    /// table holds a resistance but which stamp a conductance.
    pub fn interpolate_inverse(&self, x: f64) -> f64 {
        self.evaluate(x, |y| 1.0 / y)
    }

    fn evaluate(&self, x: f64, map: impl Fn(f64) -> f64) -> f64 {
        let last = self.x.len() - 1;
        // First index with x[i] >= x
        let i = self.x.partition_point(|&xi| xi < x);
        if i == 0 {
            return map(self.y[0]);
        }
        if i > last || x >= self.x[last] {
            return map(self.y[last]);
        }

        let (x0, x1) = (self.x[i - 1], self.x[i]);
        let (y0, y1) = (map(self.y[i - 1]), map(self.y[i]));
        let t = (x - x0) / (x1 - x0);

        match self.mode {
            Interpolation::Linear => y0 + (y1 - y0) * t,
            Interpolation::Log => {
                let (l0, l1) = (y0.log10(), y1.log10());
                10f64.powf(l0 + (l1 - l0) * t)
            }
        }
    }
}
