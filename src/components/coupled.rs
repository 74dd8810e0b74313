//! Magnetically coupled inductor groups.
//!
//! A group of `n` inductors with self inductances `L_k` and mutual
//! inductances `M_kl` shares one symmetric positive definite inductance
//! matrix. Its companion model stamps
//!
//! ```text
//! coeff * dt * Adj^T * L^-1 * Adj
//! ```
//!
//! where `Adj` maps node potentials to member branch voltages, and each
//! member's current is recovered from `(L^-1 v)_k`.

use super::{Device, DeviceKind};
use crate::circuit::DeviceId;
use crate::error::{PowerStampError, Result};
use crate::solver::{StepContext, SystemMatrix};

/// Relative asymmetry tolerated in an inductance matrix.
const SYMMETRY_TOLERANCE: f64 = 1e-12;

/// How a mutual inductance is declared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CouplingValue {
    /// Coupling coefficient `k`, `M = k * sqrt(L1 * L2)`
    Coefficient(f64),
    /// Mutual inductance `M` in henry
    Mutual(f64),
}

/// A mutual coupling between two member inductors.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MutualCoupling {
    pub first: DeviceId,
    pub second: DeviceId,
    pub value: CouplingValue,
}

impl MutualCoupling {
    pub fn coefficient(first: DeviceId, second: DeviceId, k: f64) -> Self {
        Self {
            first,
            second,
            value: CouplingValue::Coefficient(k),
        }
    }

    pub fn mutual(first: DeviceId, second: DeviceId, m: f64) -> Self {
        Self {
            first,
            second,
            value: CouplingValue::Mutual(m),
        }
    }

    /// Mutual inductance for the given self inductances.
    pub fn inductance(&self, l1: f64, l2: f64) -> f64 {
        match self.value {
            CouplingValue::Coefficient(k) => k * (l1 * l2).sqrt(),
            CouplingValue::Mutual(m) => m,
        }
    }
}

/// Invert a symmetric positive definite `n x n` matrix (row-major) via its
/// Cholesky factor: `A = L L^T`, `A^-1 = L^-T L^-1`.
pub fn cholesky_inverse(a: &[f64], n: usize) -> Result<Vec<f64>> {
    if a.len() != n * n {
        return Err(PowerStampError::invalid_matrix(format!(
            "expected {} entries for a {n}x{n} matrix, got {}",
            n * n,
            a.len()
        )));
    }
    for i in 0..n {
        for j in (i + 1)..n {
            let (aij, aji) = (a[i * n + j], a[j * n + i]);
            let scale = aij.abs().max(aji.abs()).max(f64::MIN_POSITIVE);
            if (aij - aji).abs() > SYMMETRY_TOLERANCE * scale {
                return Err(PowerStampError::invalid_matrix(format!(
                    "matrix is not symmetric at ({i}, {j})"
                )));
            }
        }
    }

    // Decomposition, lower triangle
    let mut l = vec![0.0; n * n];
    for j in 0..n {
        let mut d = a[j * n + j];
        for k in 0..j {
            d -= l[j * n + k] * l[j * n + k];
        }
        if !(d > 0.0) || !d.is_finite() {
            return Err(PowerStampError::invalid_matrix("matrix is not positive definite"));
        }
        let djj = d.sqrt();
        l[j * n + j] = djj;
        for i in (j + 1)..n {
            let mut s = a[i * n + j];
            for k in 0..j {
                s -= l[i * n + k] * l[j * n + k];
            }
            l[i * n + j] = s / djj;
        }
    }

    // Inverse of the triangular factor
    let mut m = vec![0.0; n * n];
    for i in 0..n {
        let lii = l[i * n + i];
        m[i * n + i] = 1.0 / lii;
        for j in 0..i {
            let mut s = 0.0;
            for k in j..i {
                s += l[i * n + k] * m[k * n + j];
            }
            m[i * n + j] = -s / lii;
        }
    }

    // A^-1 = M^T M
    let mut inv = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut s = 0.0;
            for k in i..n {
                s += m[k * n + i] * m[k * n + j];
            }
            inv[i * n + j] = s;
            inv[j * n + i] = s;
        }
    }
    Ok(inv)
}

/// A set of mutually coupled inductors solved as one element.
#[derive(Debug, Clone)]
pub struct CoupledInductorGroup {
    members: Vec<DeviceId>,
    terminals: Vec<[usize; 2]>,
    inductance: Vec<f64>,
    inverse: Vec<f64>,
}

impl CoupledInductorGroup {
    /// Build a group from its members and the full inductance matrix.
    pub(crate) fn new(members: Vec<DeviceId>, terminals: Vec<[usize; 2]>, inductance: Vec<f64>) -> Result<Self> {
        let inverse = cholesky_inverse(&inductance, members.len())?;
        Ok(Self {
            members,
            terminals,
            inductance,
            inverse,
        })
    }

    pub fn members(&self) -> &[DeviceId] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Inductance matrix, row-major.
    pub fn inductance_matrix(&self) -> &[f64] {
        &self.inductance
    }

    /// Inverse inductance matrix, row-major.
    pub fn inverse(&self) -> &[f64] {
        &self.inverse
    }

    /// `L^-1 v` for member branch voltages `v`.
    pub fn weighted(&self, v: &[f64]) -> Vec<f64> {
        let n = self.len();
        (0..n)
            .map(|k| (0..n).map(|l| self.inverse[k * n + l] * v[l]).sum())
            .collect()
    }

    pub(crate) fn stamp_matrix(&self, m: &mut SystemMatrix, ctx: &StepContext) {
        let n = self.len();
        let scale = ctx.scheme().inductive_coefficient() * ctx.dt();
        for k in 0..n {
            let [pk, mk] = self.terminals[k];
            for l in 0..n {
                let [pl, ml] = self.terminals[l];
                let g = scale * self.inverse[k * n + l];
                m.add(pk, pl, g);
                m.add(pk, ml, -g);
                m.add(mk, pl, -g);
                m.add(mk, ml, g);
            }
        }
    }

    /// Hand each member its `(L^-1 v')_k` for the history term.
    pub(crate) fn prepare(&self, devices: &mut [Device]) {
        let v_prev: Vec<f64> = self
            .members
            .iter()
            .map(|id| devices[id.0].state.previous_voltage())
            .collect();
        for (id, w) in self.members.iter().zip(self.weighted(&v_prev)) {
            if let DeviceKind::Inductor(inductor) = &mut devices[id.0].kind {
                inductor.set_weighted_voltage_prev(w);
            }
        }
    }

    /// Recover member currents from the solved potentials.
    pub(crate) fn compute_currents(&self, devices: &mut [Device], p: &[f64], ctx: &StepContext) {
        let v: Vec<f64> = self.terminals.iter().map(|&[i, j]| p[i] - p[j]).collect();
        let w = self.weighted(&v);
        for (k, id) in self.members.iter().enumerate() {
            let device = &mut devices[id.0];
            if let DeviceKind::Inductor(inductor) = &device.kind {
                inductor.apply_weighted_voltage(&mut device.state, v[k], w[k], ctx);
            }
        }
    }
}
