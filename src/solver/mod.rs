//! Time-step engine for companion-model MNA.
//!
//! Each time step assembles a system `A p = b` where:
//! - p contains node potentials and branch (source) currents
//! - A holds the companion conductances and source incidences
//! - b holds source values and companion history currents
//!
//! The matrix structure is:
//! ```text
//! [ G   B ] [ v ]   [ i ]
//! [ C   D ] [ j ] = [ e ]
//! ```
//!
//! A only changes when dt, a switch state or a nonlinear parameter changes,
//! so it is re-factored lazily. b is split into a cached basis part
//! (constant sources) and a part re-stamped every solve.
//!
//! After each solve the devices derive their currents; switches whose state
//! disagrees with the solution toggle and the step is solved again, up to
//! a configurable cap.

mod context;
mod matrix;
mod relinearize;
mod rhs;
mod simulator;

pub use context::{RelinearizationCause, RelinearizationEvent, StepContext};
pub use matrix::{DenseLu, LinearSolver, SystemMatrix};
pub use relinearize::Relinearizer;
pub use rhs::RhsAssembler;
pub use simulator::{Simulator, SimulatorConfig, StepReport};

/// Margin above uF a blocking switch must exceed to turn on.
pub const ACCEPTANCE_THRESHOLD: f64 = 1e-6;

/// Smallest inductance ever stamped.
pub const MIN_INDUCTANCE: f64 = 1e-12;

/// Resistance range used for clamping.
pub const MIN_RESISTANCE: f64 = 1e-12;
pub const MAX_RESISTANCE: f64 = 1e15;

/// Relative change `|a - b| / (a + b)` above which a nonlinear parameter is
/// written into the matrix instead of being carried as a correction.
pub const CAPACITANCE_COMMIT_RATIO: f64 = 0.1;

/// A thyristor reverse-biased this many recovery times after its last
/// transition restarts its recovery clock.
pub const THYRISTOR_IDLE_RESET_FACTOR: f64 = 3.0;

/// Default switch forward voltage.
pub const DEFAULT_U_FORWARD: f64 = 0.6;

/// Default switch on resistance.
pub const DEFAULT_R_ON: f64 = 10e-3;

/// Default switch off resistance.
pub const DEFAULT_R_OFF: f64 = 10e6;

/// Default thyristor recovery time.
pub const DEFAULT_RECOVERY_TIME: f64 = 10e-6;

/// Default cap on re-solves per time step.
pub const DEFAULT_MAX_RELINEARIZATIONS: usize = 50;

/// Default number of committed steps that can be rolled back.
pub const DEFAULT_HISTORY_DEPTH: usize = 2;

/// Default time step in seconds.
pub const DEFAULT_DT: f64 = 1e-6;
