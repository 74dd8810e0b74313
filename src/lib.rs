//! # Powerstamp
//!
//! Companion-model stamping and relinearization engine for time-stepped
//! power-electronics circuit simulation.
//!
//! This library provides:
//! - Companion models for resistors, capacitors and inductors under
//!   backward Euler, trapezoidal and Gear-Shichman integration
//! - Switching devices (diode, thyristor, ideal switch, IGBT, MOSFET) that
//!   are relinearized when their state disagrees with the solution
//! - Magnetically coupled inductor groups stamped through the inverse
//!   inductance matrix
//! - Piecewise nonlinear characteristics for C(u), L(i) and R(u)
//! - Per-step commit and rollback of every device's history
//!
//! ## Architecture
//!
//! - [`characteristic`] - Sampled curves and their two-column file format
//! - [`circuit`] - Network of devices, node numbering and validation
//! - [`components`] - Device calculators and companion equations
//! - [`solver`] - Matrix assembly, right-hand side, relinearization loop
//! - [`trace`] - CSV waveform output (CLI only)
//!
//! ## Usage
//!
//! ```no_run
//! use powerstamp::components::TimeFunction;
//! use powerstamp::{Network, Simulator, SimulatorConfig};
//!
//! # fn main() -> powerstamp::Result<()> {
//! let mut net = Network::new();
//! let a = net.node("in");
//! let b = net.node("out");
//! net.add_voltage_source("V1", [a, 0], TimeFunction::constant(10.0))?;
//! net.add_resistor("R1", [a, b], 1e3)?;
//! let c = net.add_capacitor("C1", [b, 0], 1e-6)?;
//!
//! let mut sim = Simulator::new(net, SimulatorConfig::new().with_dt(1e-6))?;
//! sim.run_until(1e-3)?;
//! println!("v(C1) = {:?}", sim.voltage(c));
//! # Ok(())
//! # }
//! ```
//!
//! ## Simulation Method
//!
//! For each time step:
//!
//! 1. Each device turns its differential equation into a conductance plus
//!    a current source (its companion model) and stamps both
//! 2. Solve `A p = b` for node potentials and branch currents
//! 3. Each device derives its current from the solved potentials
//! 4. Switches whose state contradicts the solution toggle, and the same
//!    step is solved again
//! 5. Once consistent, every device commits the step into its history

pub mod characteristic;
pub mod circuit;
pub mod components;
pub mod error;
pub mod solver;
pub mod units;

#[cfg(feature = "cli")]
pub mod trace;

// Re-export main types for convenience
pub use circuit::{DeviceId, IntegrationScheme, Network};
pub use error::{PowerStampError, Result};
pub use solver::{Simulator, SimulatorConfig};
