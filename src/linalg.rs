//! Tridiagonal systems and the solvers the diffusion step can use.
//!
//! The stepping code only sees [`LinearSystem`], so a dense reference solver
//! can stand in for the banded one in tests.

use crate::error::{TchronError, TchronResult};

/// Pivots smaller than this (relative to the row scale) count as zero.
const PIVOT_EPS: f64 = 1e-300;

/// Tridiagonal matrix stored by diagonals.
///
/// - `lower[i]` couples row i to column i-1 (`lower[0]` unused)
/// - `diag[i]` is the main diagonal
/// - `upper[i]` couples row i to column i+1 (`upper[n-1]` unused)
#[derive(Debug, Clone, PartialEq)]
pub struct Tridiagonal {
    pub lower: Vec<f64>,
    pub diag: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Tridiagonal {
    /// Constant-band matrix with values `(a, b, c)` on the (sub, main, super) diagonals.
    pub fn constant(a: f64, b: f64, c: f64, n: usize) -> Self {
        let mut lower = vec![a; n];
        let mut upper = vec![c; n];
        if n > 0 {
            lower[0] = 0.0;
            upper[n - 1] = 0.0;
        }
        Tridiagonal { lower, diag: vec![b; n], upper }
    }

    pub fn len(&self) -> usize {
        self.diag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diag.is_empty()
    }

    /// Expands to a row-major dense matrix.
    pub fn to_dense(&self) -> Vec<Vec<f64>> {
        let n = self.len();
        let mut dense = vec![vec![0.0; n]; n];
        for i in 0..n {
            dense[i][i] = self.diag[i];
            if i > 0 {
                dense[i][i - 1] = self.lower[i];
            }
            if i + 1 < n {
                dense[i][i + 1] = self.upper[i];
            }
        }
        dense
    }

    fn check_rhs(&self, rhs: &[f64]) -> TchronResult<()> {
        if self.lower.len() != self.len() || self.upper.len() != self.len() || rhs.len() != self.len() {
            return Err(TchronError::Config(format!(
                "tridiagonal band lengths ({}, {}, {}) and rhs length {} disagree",
                self.lower.len(),
                self.diag.len(),
                self.upper.len(),
                rhs.len()
            )));
        }
        Ok(())
    }
}

/// Solves `matrix * x = rhs` for x.
pub trait LinearSystem: Send + Sync {
    fn solve(&self, matrix: &Tridiagonal, rhs: &[f64]) -> TchronResult<Vec<f64>>;
}

/// Direct banded solve (Thomas algorithm, O(n)).
#[derive(Debug, Clone, Copy, Default)]
pub struct BandedSolver;

impl LinearSystem for BandedSolver {
    fn solve(&self, matrix: &Tridiagonal, rhs: &[f64]) -> TchronResult<Vec<f64>> {
        matrix.check_rhs(rhs)?;
        let n = rhs.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        let a = &matrix.lower;
        let b = &matrix.diag;
        let c = &matrix.upper;

        let mut c_prime = vec![0.0; n];
        let mut d_prime = vec![0.0; n];

        // Forward sweep
        if b[0].abs() < PIVOT_EPS {
            return Err(TchronError::SingularSystem { row: 0 });
        }
        c_prime[0] = c[0] / b[0];
        d_prime[0] = rhs[0] / b[0];
        for i in 1..n {
            let den = b[i] - a[i] * c_prime[i - 1];
            if den.abs() < PIVOT_EPS || !den.is_finite() {
                return Err(TchronError::SingularSystem { row: i });
            }
            if i < n - 1 {
                c_prime[i] = c[i] / den;
            }
            d_prime[i] = (rhs[i] - a[i] * d_prime[i - 1]) / den;
        }

        // Back substitution
        let mut x = vec![0.0; n];
        x[n - 1] = d_prime[n - 1];
        for i in (0..n - 1).rev() {
            x[i] = d_prime[i] - c_prime[i] * x[i + 1];
        }
        Ok(x)
    }
}

/// Gaussian elimination with partial pivoting on the expanded dense matrix.
/// O(n^3); meant for cross-checking the banded solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseSolver;

impl LinearSystem for DenseSolver {
    fn solve(&self, matrix: &Tridiagonal, rhs: &[f64]) -> TchronResult<Vec<f64>> {
        matrix.check_rhs(rhs)?;
        let n = rhs.len();
        let mut m = matrix.to_dense();
        let mut b = rhs.to_vec();

        for col in 0..n {
            let pivot_row = (col..n)
                .max_by(|&i, &j| m[i][col].abs().total_cmp(&m[j][col].abs()))
                .unwrap_or(col);
            if m[pivot_row][col].abs() < PIVOT_EPS {
                return Err(TchronError::SingularSystem { row: col });
            }
            m.swap(col, pivot_row);
            b.swap(col, pivot_row);

            for row in col + 1..n {
                let factor = m[row][col] / m[col][col];
                if factor == 0.0 {
                    continue;
                }
                for k in col..n {
                    let pivot_value = m[col][k];
                    m[row][k] -= factor * pivot_value;
                }
                b[row] -= factor * b[col];
            }
        }

        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let tail: f64 = (i + 1..n).map(|k| m[i][k] * x[k]).sum();
            x[i] = (b[i] - tail) / m[i][i];
        }
        Ok(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn multiply(m: &Tridiagonal, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        (0..n)
            .map(|i| {
                let mut v = m.diag[i] * x[i];
                if i > 0 {
                    v += m.lower[i] * x[i - 1];
                }
                if i + 1 < n {
                    v += m.upper[i] * x[i + 1];
                }
                v
            })
            .collect()
    }

    #[test]
    fn banded_solves_identity() {
        let m = Tridiagonal::constant(0.0, 1.0, 0.0, 5);
        let d = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let x = BandedSolver.solve(&m, &d).unwrap();
        for i in 0..5 {
            assert_abs_diff_eq!(x[i], d[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn banded_solves_laplacian() {
        // [ 2 -1  0  0]       [1]
        // [-1  2 -1  0] * x = [0]
        // [ 0 -1  2 -1]       [0]
        // [ 0  0 -1  2]       [1]
        let m = Tridiagonal::constant(-1.0, 2.0, -1.0, 4);
        let x = BandedSolver.solve(&m, &[1.0, 0.0, 0.0, 1.0]).unwrap();
        for xi in &x {
            assert_abs_diff_eq!(*xi, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn banded_and_dense_agree_on_diffusion_matrix() {
        let n = 33;
        let beta = 3.7;
        let mut m = Tridiagonal::constant(1.0, -2.0 - beta, 1.0, n);
        m.diag[0] = -3.0 - beta;
        let rhs: Vec<f64> = (0..n).map(|i| ((i as f64) * 0.37).sin() - 0.2).collect();

        let banded = BandedSolver.solve(&m, &rhs).unwrap();
        let dense = DenseSolver.solve(&m, &rhs).unwrap();
        for i in 0..n {
            assert_abs_diff_eq!(banded[i], dense[i], epsilon = 1e-10);
        }
        let back = multiply(&m, &banded);
        for i in 0..n {
            assert_abs_diff_eq!(back[i], rhs[i], epsilon = 1e-10);
        }
    }

    #[test]
    fn zero_pivot_is_reported() {
        let m = Tridiagonal::constant(0.0, 0.0, 0.0, 3);
        let err = BandedSolver.solve(&m, &[1.0, 1.0, 1.0]).unwrap_err();
        assert!(matches!(err, TchronError::SingularSystem { row: 0 }));
        assert!(DenseSolver.solve(&m, &[1.0, 1.0, 1.0]).is_err());
    }

    #[test]
    fn mismatched_rhs_is_rejected() {
        let m = Tridiagonal::constant(1.0, -3.0, 1.0, 4);
        assert!(BandedSolver.solve(&m, &[1.0, 2.0]).is_err());
    }

    #[test]
    fn dense_expansion_places_bands() {
        let m = Tridiagonal::constant(1.0, -2.0, 3.0, 3);
        let d = m.to_dense();
        assert_eq!(d[0], vec![-2.0, 3.0, 0.0]);
        assert_eq!(d[1], vec![1.0, -2.0, 3.0]);
        assert_eq!(d[2], vec![0.0, 1.0, -2.0]);
    }
}
