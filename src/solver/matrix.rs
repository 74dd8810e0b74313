//! System matrix assembly and the dense LU back end.
//!
//! Row/column 0 of the assembled matrix belongs to the reference node. It
//! is stamped like any other node so that device stamps never need to
//! special-case ground, and is dropped when the system is factored.

use crate::error::{PowerStampError, Result};

/// Pivot magnitude below which the matrix is treated as singular.
const PIVOT_EPSILON: f64 = 1e-15;

/// Assembled system matrix A (row-major, square).
#[derive(Debug, Clone)]
pub struct SystemMatrix {
    a: Vec<f64>,
    size: usize,
}

impl SystemMatrix {
    /// Create a zeroed matrix with `size` rows (nodes plus branch rows).
    pub fn new(size: usize) -> Self {
        Self {
            a: vec![0.0; size * size],
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Reset all entries to zero.
    pub fn clear(&mut self) {
        self.a.fill(0.0);
    }

    /// Get matrix element at (row, col).
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row * self.size + col]
    }

    /// Add to matrix element at (row, col).
    pub fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
    }

    /// Stamp a conductance between two nodes.
    ///   A[i,i] += g, A[j,j] += g, A[i,j] -= g, A[j,i] -= g
    pub fn stamp_conductance(&mut self, terminals: [usize; 2], g: f64) {
        let [i, j] = terminals;
        self.add(i, i, g);
        self.add(j, j, g);
        self.add(i, j, -g);
        self.add(j, i, -g);
    }

    /// Stamp the incidence of a voltage-defined branch with current row `z`.
    /// p[i] - p[j] = b[z]
    pub fn stamp_branch(&mut self, terminals: [usize; 2], z: usize) {
        let [i, j] = terminals;
        self.add(z, i, 1.0);
        self.add(i, z, 1.0);
        self.add(z, j, -1.0);
        self.add(j, z, -1.0);
    }

    /// Row-major entries.
    pub fn as_slice(&self) -> &[f64] {
        &self.a
    }
}

/// Linear-system back end used by the step loop.
///
/// `factor` is only called when the matrix changed; `solve` is called once
/// per solve with a fresh right-hand side. Both work on the full system and
/// must return a solution with `x[0] == 0`.
pub trait LinearSolver {
    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()>;
    fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<()>;
}

/// Dense LU decomposition with partial pivoting on the grounded system.
#[derive(Debug, Clone, Default)]
pub struct DenseLu {
    lu: Vec<f64>,
    pivots: Vec<usize>,
    /// Dimension of the reduced (ground-free) system
    n: usize,
}

impl DenseLu {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LinearSolver for DenseLu {
    fn factor(&mut self, matrix: &SystemMatrix) -> Result<()> {
        let full = matrix.size();
        let n = full.saturating_sub(1);
        self.n = n;
        self.lu.clear();
        self.lu.reserve(n * n);
        for row in 1..full {
            for col in 1..full {
                self.lu.push(matrix.get(row, col));
            }
        }
        self.pivots = (0..n).collect();

        let lu = &mut self.lu;
        for k in 0..n {
            // Find pivot
            let mut max_val = lu[k * n + k].abs();
            let mut max_row = k;
            for i in (k + 1)..n {
                let val = lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < PIVOT_EPSILON {
                self.pivots.clear();
                return Err(PowerStampError::SingularMatrix);
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    lu.swap(k * n + j, max_row * n + j);
                }
            }

            // Eliminate
            let pivot = lu[k * n + k];
            for i in (k + 1)..n {
                let factor = lu[i * n + k] / pivot;
                lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    lu[i * n + j] -= factor * lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    fn solve(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let n = self.n;
        if self.pivots.len() != n || b.len() != n + 1 || x.len() != n + 1 {
            return Err(PowerStampError::SingularMatrix);
        }

        x[0] = 0.0;
        let y = &mut x[1..];

        // Apply pivot permutation, skipping the ground row
        for i in 0..n {
            y[i] = b[self.pivots[i] + 1];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                y[i] -= self.lu[i * n + j] * y[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                y[i] -= self.lu[i * n + j] * y[j];
            }
            y[i] /= self.lu[i * n + i];
        }

        Ok(())
    }
}
