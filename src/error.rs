//! Error types for the powerstamp solver core.
//!
//! This module provides a unified error type [`PowerStampError`] covering
//! configuration problems detected at construction/load time, numerical
//! failures that cannot be recovered locally, and characteristic file I/O.
//!
//! Recoverable numerical inconsistencies (a switch whose state disagrees with
//! the solved potentials, a nonlinear capacitance that flipped the current
//! sign) are not errors: they are reported through
//! [`StepContext`](crate::solver::StepContext) events and resolved by
//! re-solving the same time step.

use thiserror::Error;

/// Result type alias using [`PowerStampError`].
pub type Result<T> = std::result::Result<T, PowerStampError>;

/// Unified error type for all powerstamp operations.
#[derive(Error, Debug)]
pub enum PowerStampError {
    // ============ Configuration Errors ============
    /// Mutual inductance matrix is not symmetric positive definite
    #[error("Invalid inductance matrix: {message}")]
    InvalidMatrix { message: String },

    /// Malformed line in a nonlinear characteristic
    #[error("Characteristic format error at line {line}: {message}")]
    CharacteristicFormat { line: usize, message: String },

    /// Characteristic has fewer than two sample points
    #[error("Characteristic needs at least 2 sample points, got {count}")]
    TooFewSamples { count: usize },

    /// Characteristic x samples are not strictly ascending
    #[error("Characteristic x values must be strictly ascending (violated at sample {index})")]
    NonAscendingSamples { index: usize },

    /// Log-y interpolation over a non-positive sample
    #[error("Log interpolation needs positive y values (sample {index} is {value})")]
    NonPositiveLogSample { index: usize, value: f64 },

    /// Characteristic x and y arrays differ in length
    #[error("Characteristic has {x_len} x samples but {y_len} y samples")]
    SampleLengthMismatch { x_len: usize, y_len: usize },

    /// Invalid device definition
    #[error("Invalid device '{name}': {message}")]
    InvalidDevice { name: String, message: String },

    /// Device terminal or branch row outside the system size
    #[error("Device '{name}' references index {index}, but the system has only {size} rows")]
    TerminalOutOfRange {
        name: String,
        index: usize,
        size: usize,
    },

    /// Invalid magnetic coupling declaration
    #[error("Invalid coupling between '{first}' and '{second}': {message}")]
    InvalidCoupling {
        first: String,
        second: String,
        message: String,
    },

    /// Invalid simulation parameter
    #[error("Invalid simulation parameter: {message}")]
    InvalidSimulationParam { message: String },

    // ============ Simulation Errors ============
    /// Matrix is singular and cannot be solved
    #[error("Singular matrix - circuit may have a floating node or a source loop")]
    SingularMatrix,

    /// Relinearization did not settle within the configured cap
    #[error("Switch states did not settle after {iterations} re-solves at t={time:.6e} s (last toggled: {devices})")]
    RelinearizationLimit {
        iterations: usize,
        time: f64,
        devices: String,
    },

    // ============ I/O Errors ============
    /// Error reading a characteristic file
    #[error("Failed to read characteristic file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Error writing a characteristic file
    #[error("Failed to write characteristic file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl PowerStampError {
    /// Create an invalid matrix error
    pub fn invalid_matrix(message: impl Into<String>) -> Self {
        Self::InvalidMatrix {
            message: message.into(),
        }
    }

    /// Create a characteristic format error
    pub fn format(line: usize, message: impl Into<String>) -> Self {
        Self::CharacteristicFormat {
            line,
            message: message.into(),
        }
    }

    /// Create an invalid device error
    pub fn invalid_device(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDevice {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an invalid simulation parameter error
    pub fn invalid_param(message: impl Into<String>) -> Self {
        Self::InvalidSimulationParam {
            message: message.into(),
        }
    }

    /// Create a relinearization limit error
    pub fn relinearization_limit(iterations: usize, time: f64, devices: &[String]) -> Self {
        Self::RelinearizationLimit {
            iterations,
            time,
            devices: devices.join(", "),
        }
    }
}
