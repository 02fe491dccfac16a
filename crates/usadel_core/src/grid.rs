use crate::error::MaterialError;
use crate::green::GreenState;
use serde::{Deserialize, Serialize};

/// Row-major (energy outer, position inner) grid of Green's functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateGrid {
    energies: usize,
    positions: usize,
    data: Vec<GreenState>,
}

impl StateGrid {
    /// Creates a grid filled with `fill`.
    pub fn filled(energies: usize, positions: usize, fill: GreenState) -> Self {
        Self {
            energies,
            positions,
            data: vec![fill; energies * positions],
        }
    }

    pub fn vacuum(energies: usize, positions: usize) -> Self {
        Self::filled(energies, positions, GreenState::vacuum())
    }

    /// `(energies, positions)`.
    pub fn dims(&self) -> (usize, usize) {
        (self.energies, self.positions)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, energy: usize, position: usize) -> &GreenState {
        &self.data[self.index(energy, position)]
    }

    pub fn get_mut(&mut self, energy: usize, position: usize) -> &mut GreenState {
        let idx = self.index(energy, position);
        &mut self.data[idx]
    }

    pub fn row(&self, energy: usize) -> &[GreenState] {
        let start = energy * self.positions;
        &self.data[start..start + self.positions]
    }

    pub fn row_mut(&mut self, energy: usize) -> &mut [GreenState] {
        let start = energy * self.positions;
        &mut self.data[start..start + self.positions]
    }

    pub fn iter(&self) -> impl Iterator<Item = &GreenState> {
        self.data.iter()
    }

    /// Reshapes the grid, discarding the previous contents.
    pub fn resize(&mut self, energies: usize, positions: usize) {
        self.energies = energies;
        self.positions = positions;
        self.data = vec![GreenState::vacuum(); energies * positions];
    }

    /// Deep copy of `other`, reallocating this grid to match its shape.
    pub fn copy_from(&mut self, other: &StateGrid) {
        let data = other.data.clone();
        self.energies = other.energies;
        self.positions = other.positions;
        self.data = data;
    }

    /// Deep copy of `other` into a grid that must already have the same shape.
    ///
    /// On mismatch nothing is written.
    pub fn copy_exact(&mut self, other: &StateGrid) -> Result<(), MaterialError> {
        if self.dims() != other.dims() {
            return Err(MaterialError::ShapeMismatch {
                expected: self.dims(),
                found: other.dims(),
            });
        }
        self.data.clone_from_slice(&other.data);
        Ok(())
    }

    /// Largest absolute change in any packed component between two grids of
    /// equal shape.
    pub fn max_abs_diff(&self, other: &StateGrid) -> Result<f64, MaterialError> {
        if self.dims() != other.dims() {
            return Err(MaterialError::ShapeMismatch {
                expected: self.dims(),
                found: other.dims(),
            });
        }
        Ok(self
            .data
            .iter()
            .zip(other.data.iter())
            .map(|(a, b)| a.max_abs_diff(b))
            .fold(0.0, f64::max))
    }

    fn index(&self, energy: usize, position: usize) -> usize {
        assert!(
            energy < self.energies && position < self.positions,
            "grid index ({energy}, {position}) out of bounds for {}x{} grid",
            self.energies,
            self.positions
        );
        energy * self.positions + position
    }
}
