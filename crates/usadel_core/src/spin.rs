use nalgebra::Matrix2;
use num_complex::Complex64;
use num_traits::{One, Zero};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign};

/// Number of reals needed to store one `SpinState`.
pub const SPIN_REALS: usize = 8;

/// A single Riccati parameter: a 2x2 complex matrix in spin space.
///
/// Flattened layout is row-major with interleaved real/imaginary parts:
/// `[re m00, im m00, re m01, im m01, re m10, im m10, re m11, im m11]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpinState {
    pub matrix: Matrix2<Complex64>,
}

impl SpinState {
    pub fn new(matrix: Matrix2<Complex64>) -> Self {
        Self { matrix }
    }

    /// Builds a state from its entries in row-major order.
    pub fn from_entries(m00: Complex64, m01: Complex64, m10: Complex64, m11: Complex64) -> Self {
        Self::new(Matrix2::new(m00, m01, m10, m11))
    }

    pub fn identity() -> Self {
        Self::one()
    }

    pub fn pauli_x() -> Self {
        let one = Complex64::new(1.0, 0.0);
        Self::from_entries(Complex64::zero(), one, one, Complex64::zero())
    }

    pub fn pauli_y() -> Self {
        let i = Complex64::new(0.0, 1.0);
        Self::from_entries(Complex64::zero(), -i, i, Complex64::zero())
    }

    pub fn pauli_z() -> Self {
        let one = Complex64::new(1.0, 0.0);
        Self::from_entries(one, Complex64::zero(), Complex64::zero(), -one)
    }

    /// Reads a state from the first `SPIN_REALS` entries of `values`.
    pub fn from_slice(values: &[f64]) -> Self {
        let mut matrix = Matrix2::zeros();
        for r in 0..2 {
            for c in 0..2 {
                let k = 2 * (2 * r + c);
                matrix[(r, c)] = Complex64::new(values[k], values[k + 1]);
            }
        }
        Self { matrix }
    }

    /// Writes the state into the first `SPIN_REALS` entries of `out`.
    pub fn write_to(&self, out: &mut [f64]) {
        for r in 0..2 {
            for c in 0..2 {
                let k = 2 * (2 * r + c);
                let value = self.matrix[(r, c)];
                out[k] = value.re;
                out[k + 1] = value.im;
            }
        }
    }

    pub fn to_array(&self) -> [f64; SPIN_REALS] {
        let mut out = [0.0; SPIN_REALS];
        self.write_to(&mut out);
        out
    }

    pub fn trace(&self) -> Complex64 {
        self.matrix.trace()
    }

    /// Elementwise complex conjugate (not the Hermitian adjoint).
    pub fn conj(&self) -> Self {
        Self::new(self.matrix.map(|v| v.conj()))
    }

    pub fn transpose(&self) -> Self {
        Self::new(self.matrix.transpose())
    }

    pub fn determinant(&self) -> Complex64 {
        let m = &self.matrix;
        m[(0, 0)] * m[(1, 1)] - m[(0, 1)] * m[(1, 0)]
    }

    /// Matrix inverse, or `None` when the determinant vanishes.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.norm() == 0.0 || !det.is_finite() {
            return None;
        }
        let m = &self.matrix;
        Some(Self::from_entries(
            m[(1, 1)] / det,
            -m[(0, 1)] / det,
            -m[(1, 0)] / det,
            m[(0, 0)] / det,
        ))
    }

    /// Frobenius norm.
    pub fn norm(&self) -> f64 {
        self.matrix.iter().map(|v| v.norm_sqr()).sum::<f64>().sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.matrix.iter().all(|v| v.is_finite())
    }
}

impl Default for SpinState {
    fn default() -> Self {
        Self::zero()
    }
}

impl Zero for SpinState {
    fn zero() -> Self {
        Self::new(Matrix2::zeros())
    }
    fn is_zero(&self) -> bool {
        self.matrix.iter().all(|v| v.is_zero())
    }
}

impl One for SpinState {
    fn one() -> Self {
        Self::new(Matrix2::identity())
    }
}

impl Add for SpinState {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.matrix + rhs.matrix)
    }
}

impl Sub for SpinState {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.matrix - rhs.matrix)
    }
}

impl Neg for SpinState {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.matrix)
    }
}

/// Matrix product.
impl Mul for SpinState {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(self.matrix * rhs.matrix)
    }
}

impl Mul<Complex64> for SpinState {
    type Output = Self;
    fn mul(self, rhs: Complex64) -> Self {
        Self::new(self.matrix * rhs)
    }
}

impl Mul<f64> for SpinState {
    type Output = Self;
    fn mul(self, rhs: f64) -> Self {
        self * Complex64::new(rhs, 0.0)
    }
}

impl Mul<SpinState> for Complex64 {
    type Output = SpinState;
    fn mul(self, rhs: SpinState) -> SpinState {
        rhs * self
    }
}

impl Mul<SpinState> for f64 {
    type Output = SpinState;
    fn mul(self, rhs: SpinState) -> SpinState {
        rhs * self
    }
}

impl AddAssign for SpinState {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for SpinState {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign for SpinState {
    fn mul_assign(&mut self, rhs: Self) {
        *self = *self * rhs;
    }
}
