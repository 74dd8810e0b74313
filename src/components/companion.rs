//! Companion-model equations for the implicit integration schemes.
//!
//! Each reactive element is replaced, per time step, by a conductance `g`
//! in parallel with a history current `h`. The element current is then
//!
//! ```text
//! i = g * v - h          (capacitor, h injected into terminal 0)
//! i = g * v + h          (inductor,  h flows terminal 0 -> terminal 1)
//! ```
//!
//! | Scheme | capacitor g | capacitor h                  | inductor g      | inductor h                      |
//! |--------|-------------|------------------------------|-----------------|---------------------------------|
//! | BE     | C/dt        | C/dt * v'                    | dt/L            | i'                              |
//! | TRZ    | 2C/dt       | 2C/dt * v' + i'              | dt/(2L)         | i' + dt/2 * v'/L                |
//! | GS     | 3C/(2dt)    | C/dt * (2v' - v''/2)         | 2dt/(3L)        | 4/3 i' - 1/3 i''                |
//!
//! where `'` marks the last committed step and `''` the one before.

use crate::circuit::IntegrationScheme;

/// Add `value` into terminal 0 and remove it from terminal 1.
#[inline]
pub fn inject(b: &mut [f64], terminals: [usize; 2], value: f64) {
    b[terminals[0]] += value;
    b[terminals[1]] -= value;
}

/// Capacitive companion conductance.
pub fn capacitor_conductance(scheme: IntegrationScheme, capacitance: f64, dt: f64) -> f64 {
    scheme.capacitive_coefficient() * capacitance / dt
}

/// Capacitive history injection from the committed voltages and current.
pub fn capacitor_history(
    scheme: IntegrationScheme,
    capacitance: f64,
    dt: f64,
    v_prev: f64,
    v_prev_prev: f64,
    i_prev: f64,
) -> f64 {
    let c_dt = capacitance / dt;
    match scheme {
        IntegrationScheme::BackwardEuler => c_dt * v_prev,
        IntegrationScheme::Trapezoidal => 2.0 * c_dt * v_prev + i_prev,
        IntegrationScheme::GearShichman => c_dt * (2.0 * v_prev - 0.5 * v_prev_prev),
    }
}

/// Capacitor current for the solved voltage `v`.
pub fn capacitor_current(
    scheme: IntegrationScheme,
    capacitance: f64,
    dt: f64,
    v: f64,
    v_prev: f64,
    v_prev_prev: f64,
    i_prev: f64,
) -> f64 {
    capacitor_conductance(scheme, capacitance, dt) * v
        - capacitor_history(scheme, capacitance, dt, v_prev, v_prev_prev, i_prev)
}

/// Inductive companion conductance `coeff * dt / L`.
pub fn inductor_conductance(scheme: IntegrationScheme, inductance: f64, dt: f64) -> f64 {
    scheme.inductive_coefficient() * dt / inductance
}

/// Inductive history current.
///
/// `w_prev` is the inverse-inductance-weighted voltage of the last committed
/// step: `v' / L` for a single inductor, `(L^-1 v')_k` inside a coupled group.
pub fn inductor_history(
    scheme: IntegrationScheme,
    dt: f64,
    i_prev: f64,
    i_prev_prev: f64,
    w_prev: f64,
) -> f64 {
    match scheme {
        IntegrationScheme::BackwardEuler => i_prev,
        IntegrationScheme::Trapezoidal => i_prev + 0.5 * dt * w_prev,
        IntegrationScheme::GearShichman => (4.0 * i_prev - i_prev_prev) / 3.0,
    }
}

/// Inductor current for the present weighted voltage `w` (`v / L` or
/// `(L^-1 v)_k`).
pub fn inductor_current(
    scheme: IntegrationScheme,
    dt: f64,
    i_prev: f64,
    i_prev_prev: f64,
    w: f64,
    w_prev: f64,
) -> f64 {
    scheme.inductive_coefficient() * dt * w
        + inductor_history(scheme, dt, i_prev, i_prev_prev, w_prev)
}
