//! Riccati-parametrized Green's function at one (energy, position) point.
//!
//! A `GreenState` bundles the two Riccati parameters `g`, `gt` and their
//! spatial derivatives. The solver sees it as a flat vector of
//! `GREEN_REALS` reals laid out as `[g, gt, dg, dgt]`, each block being the
//! `SPIN_REALS` layout of a `SpinState`.

use crate::spin::{SpinState, SPIN_REALS};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Width of the packed representation of one `GreenState`.
pub const GREEN_REALS: usize = 4 * SPIN_REALS;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GreenState {
    pub g: SpinState,
    pub gt: SpinState,
    pub dg: SpinState,
    pub dgt: SpinState,
}

impl GreenState {
    pub fn new(g: SpinState, gt: SpinState, dg: SpinState, dgt: SpinState) -> Self {
        Self { g, gt, dg, dgt }
    }

    /// Green's function used at a boundary without a neighbor.
    pub fn vacuum() -> Self {
        Self::default()
    }

    /// Homogeneous singlet BCS state for complex energy `energy` and gap `gap`.
    ///
    /// With `gap == 0` this reduces to the vacuum state.
    pub fn bcs(energy: Complex64, gap: Complex64) -> Self {
        if gap.norm() == 0.0 {
            return Self::vacuum();
        }
        let theta = (Complex64::new(gap.norm(), 0.0) / energy).atanh();
        let amplitude = theta.sinh() / (1.0 + theta.cosh());
        let phase = Complex64::new(0.0, gap.arg()).exp();

        let a = amplitude * phase;
        let b = -amplitude * phase.conj();
        let zero = Complex64::new(0.0, 0.0);
        Self {
            g: SpinState::from_entries(zero, a, -a, zero),
            gt: SpinState::from_entries(zero, b, -b, zero),
            dg: SpinState::default(),
            dgt: SpinState::default(),
        }
    }

    /// Unpacks the first `GREEN_REALS` entries of `values`.
    pub fn from_slice(values: &[f64]) -> Self {
        Self {
            g: SpinState::from_slice(&values[0..SPIN_REALS]),
            gt: SpinState::from_slice(&values[SPIN_REALS..2 * SPIN_REALS]),
            dg: SpinState::from_slice(&values[2 * SPIN_REALS..3 * SPIN_REALS]),
            dgt: SpinState::from_slice(&values[3 * SPIN_REALS..4 * SPIN_REALS]),
        }
    }

    /// Packs the state into the first `GREEN_REALS` entries of `out`.
    pub fn write_to(&self, out: &mut [f64]) {
        self.g.write_to(&mut out[0..SPIN_REALS]);
        self.gt.write_to(&mut out[SPIN_REALS..2 * SPIN_REALS]);
        self.dg.write_to(&mut out[2 * SPIN_REALS..3 * SPIN_REALS]);
        self.dgt.write_to(&mut out[3 * SPIN_REALS..4 * SPIN_REALS]);
    }

    pub fn to_array(&self) -> [f64; GREEN_REALS] {
        let mut out = [0.0; GREEN_REALS];
        self.write_to(&mut out);
        out
    }

    /// Normalization matrix `N = (1 - g gt)^-1`.
    pub fn normalization(&self) -> Option<SpinState> {
        (SpinState::identity() - self.g * self.gt).inverse()
    }

    /// Tilde normalization matrix `Nt = (1 - gt g)^-1`.
    pub fn normalization_tilde(&self) -> Option<SpinState> {
        (SpinState::identity() - self.gt * self.g).inverse()
    }

    /// Density of states `Re Tr[N (1 + g gt)] / 2`.
    ///
    /// Diverges (returns infinity) where `1 - g gt` is singular.
    pub fn density_of_states(&self) -> f64 {
        match self.normalization() {
            Some(n) => 0.5 * (n * (SpinState::identity() + self.g * self.gt)).trace().re,
            None => f64::INFINITY,
        }
    }

    /// Largest absolute difference between any two packed components.
    pub fn max_abs_diff(&self, other: &GreenState) -> f64 {
        self.to_array()
            .iter()
            .zip(other.to_array().iter())
            .map(|(a, b)| (a - b).abs())
            .fold(0.0, f64::max)
    }

    pub fn is_finite(&self) -> bool {
        self.g.is_finite() && self.gt.is_finite() && self.dg.is_finite() && self.dgt.is_finite()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn vacuum_density_of_states_is_one() {
        assert!((GreenState::vacuum().density_of_states() - 1.0).abs() < 1e-15);
    }

    #[test]
    fn bcs_density_of_states_matches_closed_form() {
        let gap = Complex64::new(1.0, 0.0);
        for &e in &[0.3, 0.9, 1.5, 2.0, 5.0] {
            let energy = Complex64::new(e, 1e-3);
            let state = GreenState::bcs(energy, gap);
            let expected = (energy / (energy * energy - gap * gap).sqrt()).re;
            assert!(
                (state.density_of_states() - expected).abs() < 1e-9,
                "E = {e}: got {}, expected {expected}",
                state.density_of_states()
            );
        }
    }

    #[test]
    fn bcs_without_gap_is_vacuum() {
        let state = GreenState::bcs(Complex64::new(0.5, 0.01), Complex64::new(0.0, 0.0));
        assert_eq!(state, GreenState::vacuum());
    }

    #[test]
    fn packing_order_is_g_gt_dg_dgt() {
        let one = Complex64::new(1.0, 0.0);
        let mut state = GreenState::vacuum();
        state.dgt = SpinState::from_entries(one, one, one, one);
        let flat = state.to_array();
        assert!(flat[..3 * SPIN_REALS].iter().all(|v| *v == 0.0));
        assert_eq!(flat[3 * SPIN_REALS], 1.0);
        assert_eq!(flat[3 * SPIN_REALS + 1], 0.0);
    }

    proptest! {
        #[test]
        fn pack_unpack_round_trip(values in proptest::collection::vec(-1e3f64..1e3, GREEN_REALS)) {
            let state = GreenState::from_slice(&values);
            let repacked = state.to_array();
            for (a, b) in values.iter().zip(repacked.iter()) {
                prop_assert!((a - b).abs() <= 1e-12);
            }
            prop_assert_eq!(GreenState::from_slice(&repacked), state);
        }
    }
}
