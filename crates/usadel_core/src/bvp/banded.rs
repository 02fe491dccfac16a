//! Band-matrix Gaussian elimination for the condensed collocation system.

/// Square band matrix with `kl` sub- and `ku` super-diagonals.
///
/// Storage reserves `kl` extra super-diagonals for the fill-in produced by
/// row interchanges during partial pivoting.
#[derive(Debug, Clone)]
pub struct BandedMatrix {
    n: usize,
    kl: usize,
    ku: usize,
    width: usize,
    data: Vec<f64>,
}

impl BandedMatrix {
    pub fn zeros(n: usize, kl: usize, ku: usize) -> Self {
        let width = 2 * kl + ku + 1;
        Self {
            n,
            kl,
            ku,
            width,
            data: vec![0.0; n * width],
        }
    }

    pub fn size(&self) -> usize {
        self.n
    }

    fn in_band(&self, i: usize, j: usize) -> bool {
        i < self.n && j < self.n && j + self.kl >= i && j <= i + self.kl + self.ku
    }

    fn offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(self.in_band(i, j), "({i}, {j}) outside band storage");
        i * self.width + (j + self.kl - i)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        if self.in_band(i, j) {
            self.data[self.offset(i, j)]
        } else {
            0.0
        }
    }

    /// Sets entry `(i, j)`, which must lie within `kl` below and `ku` above the diagonal.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        assert!(
            i < self.n && j < self.n && j + self.kl >= i && j <= i + self.ku,
            "entry ({i}, {j}) outside the declared band (kl = {}, ku = {})",
            self.kl,
            self.ku
        );
        let idx = self.offset(i, j);
        self.data[idx] = value;
    }

    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let current = self.get(i, j);
        self.set(i, j, current + value);
    }

    /// Solves `A x = rhs` in place with partial pivoting.
    ///
    /// Returns `None` if a zero (or non-finite) pivot is met; `rhs` is then
    /// left in an unspecified state.
    pub fn solve(mut self, rhs: &mut [f64]) -> Option<()> {
        let n = self.n;
        assert_eq!(rhs.len(), n, "right-hand side length mismatch");
        let reach = self.kl + self.ku;

        for k in 0..n {
            let last_row = (k + self.kl).min(n - 1);
            let last_col = (k + reach).min(n - 1);

            let mut pivot_row = k;
            let mut best = self.get(k, k).abs();
            for i in k + 1..=last_row {
                let value = self.get(i, k).abs();
                if value > best {
                    best = value;
                    pivot_row = i;
                }
            }
            if best == 0.0 || !best.is_finite() {
                return None;
            }

            if pivot_row != k {
                for j in k..=last_col {
                    let a = self.offset(k, j);
                    let b = self.offset(pivot_row, j);
                    self.data.swap(a, b);
                }
                rhs.swap(k, pivot_row);
            }

            let pivot = self.data[self.offset(k, k)];
            for i in k + 1..=last_row {
                let lower = self.offset(i, k);
                let factor = self.data[lower] / pivot;
                if factor == 0.0 {
                    continue;
                }
                self.data[lower] = 0.0;
                for j in k + 1..=last_col {
                    let upper = self.data[self.offset(k, j)];
                    if upper != 0.0 {
                        let idx = self.offset(i, j);
                        self.data[idx] -= factor * upper;
                    }
                }
                rhs[i] -= factor * rhs[k];
            }
        }

        for k in (0..n).rev() {
            let last_col = (k + reach).min(n - 1);
            let mut sum = rhs[k];
            for j in k + 1..=last_col {
                sum -= self.data[self.offset(k, j)] * rhs[j];
            }
            rhs[k] = sum / self.data[self.offset(k, k)];
        }

        if rhs.iter().all(|v| v.is_finite()) {
            Some(())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};
    use proptest::prelude::*;

    fn to_dense(m: &BandedMatrix) -> DMatrix<f64> {
        DMatrix::from_fn(m.size(), m.size(), |i, j| m.get(i, j))
    }

    #[test]
    fn solves_tridiagonal_system() {
        let n = 5;
        let mut m = BandedMatrix::zeros(n, 1, 1);
        for i in 0..n {
            m.set(i, i, 2.0);
            if i > 0 {
                m.set(i, i - 1, -1.0);
            }
            if i + 1 < n {
                m.set(i, i + 1, -1.0);
            }
        }
        let dense = to_dense(&m);
        let x_true = DVector::from_vec(vec![1.0, -2.0, 0.5, 3.0, -1.0]);
        let mut rhs: Vec<f64> = (&dense * &x_true).iter().cloned().collect();
        m.solve(&mut rhs).expect("system should be solvable");
        for (a, b) in rhs.iter().zip(x_true.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn pivoting_handles_zero_diagonal() {
        let mut m = BandedMatrix::zeros(2, 1, 1);
        m.set(0, 1, 1.0);
        m.set(1, 0, 1.0);
        let mut rhs = vec![3.0, 4.0];
        m.solve(&mut rhs).expect("permutation matrix is invertible");
        assert_eq!(rhs, vec![4.0, 3.0]);
    }

    #[test]
    fn singular_matrix_is_reported() {
        let mut m = BandedMatrix::zeros(2, 1, 1);
        m.set(0, 0, 1.0);
        m.set(0, 1, 2.0);
        m.set(1, 0, 2.0);
        m.set(1, 1, 4.0);
        let mut rhs = vec![1.0, 1.0];
        assert!(m.solve(&mut rhs).is_none());
    }

    proptest! {
        #[test]
        fn agrees_with_dense_lu(
            entries in proptest::collection::vec(-1.0f64..1.0, 12 * 7),
            rhs in proptest::collection::vec(-5.0f64..5.0, 12),
        ) {
            let (n, kl, ku) = (12usize, 3usize, 2usize);
            let mut m = BandedMatrix::zeros(n, kl, ku);
            let mut k = 0;
            for i in 0..n {
                for j in i.saturating_sub(kl)..=(i + ku).min(n - 1) {
                    let mut value = entries[k % entries.len()];
                    if i == j {
                        value += 8.0;
                    }
                    m.set(i, j, value);
                    k += 1;
                }
            }
            let dense = to_dense(&m);
            let expected = dense
                .lu()
                .solve(&DVector::from_vec(rhs.clone()))
                .expect("diagonally dominant matrix is invertible");
            let mut x = rhs.clone();
            m.solve(&mut x).expect("band solve should succeed");
            for (a, b) in x.iter().zip(expected.iter()) {
                prop_assert!((a - b).abs() < 1e-9);
            }
        }
    }
}
