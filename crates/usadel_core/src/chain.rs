//! Materials wired into a one-dimensional chain.
//!
//! The chain owns every material; links between neighbors are `MaterialId`
//! handles, so a material never holds a reference to another. Boundary
//! values are copied out of the neighbors before each update.

use crate::config::SweepSettings;
use crate::error::MaterialError;
use crate::green::GreenState;
use crate::material::{Boundaries, Material, UpdateReport};
use crate::physics::{Coupling, Side};
use anyhow::{bail, Context};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable handle of a material inside a `Chain`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MaterialId(usize);

impl MaterialId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for MaterialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of `Chain::converge`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepSummary {
    pub sweeps: usize,
    pub difference: f64,
}

#[derive(Debug, Default)]
pub struct Chain {
    materials: Vec<Material>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }

    /// Handles in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = MaterialId> {
        (0..self.materials.len()).map(MaterialId)
    }

    pub fn get(&self, id: MaterialId) -> Result<&Material, MaterialError> {
        self.materials
            .get(id.0)
            .ok_or(MaterialError::UnknownMaterial(id))
    }

    pub fn get_mut(&mut self, id: MaterialId) -> Result<&mut Material, MaterialError> {
        self.materials
            .get_mut(id.0)
            .ok_or(MaterialError::UnknownMaterial(id))
    }

    /// Places `right` directly after `left` and forwards the coupling to both
    /// physics plugins.
    pub fn connect(
        &mut self,
        left: MaterialId,
        right: MaterialId,
        coupling: Coupling,
    ) -> Result<(), MaterialError> {
        if left == right {
            return Err(MaterialError::InvalidConfiguration(format!(
                "cannot connect material {left} to itself"
            )));
        }
        let (a, b) = (self.get(left)?, self.get(right)?);
        if let Some(existing) = a.right {
            return Err(MaterialError::InvalidConfiguration(format!(
                "material {left} already has {existing} on its right"
            )));
        }
        if let Some(existing) = b.left {
            return Err(MaterialError::InvalidConfiguration(format!(
                "material {right} already has {existing} on its left"
            )));
        }
        if a.energy() != b.energy() {
            return Err(MaterialError::InvalidConfiguration(format!(
                "materials {left} and {right} use different energy axes"
            )));
        }

        self.materials[left.0].link(Side::Right, right, coupling.left_conductance);
        self.materials[right.0].link(Side::Left, left, coupling.right_conductance);
        Ok(())
    }

    /// State at the last position of the left neighbor of `id`, or vacuum.
    pub fn left_boundary(&self, id: MaterialId, n: usize) -> Result<GreenState, MaterialError> {
        let material = self.get(id)?;
        match material.left {
            Some(neighbor) => edge(material, self.get(neighbor)?, n, Side::Right),
            None => Ok(GreenState::vacuum()),
        }
    }

    /// State at the first position of the right neighbor of `id`, or vacuum.
    pub fn right_boundary(&self, id: MaterialId, n: usize) -> Result<GreenState, MaterialError> {
        let material = self.get(id)?;
        match material.right {
            Some(neighbor) => edge(material, self.get(neighbor)?, n, Side::Left),
            None => Ok(GreenState::vacuum()),
        }
    }

    /// Copies both neighbor edges of `id` for every energy.
    pub fn boundaries(&self, id: MaterialId) -> Result<Boundaries, MaterialError> {
        let material = self.get(id)?;
        let energies = material.energy().len();
        let left = match material.left {
            Some(_) => Some(
                (0..energies)
                    .map(|n| self.left_boundary(id, n))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        let right = match material.right {
            Some(_) => Some(
                (0..energies)
                    .map(|n| self.right_boundary(id, n))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };
        Ok(Boundaries { left, right })
    }

    /// Updates one material against the current state of its neighbors.
    pub fn update(&mut self, id: MaterialId) -> Result<UpdateReport, MaterialError> {
        let boundaries = self.boundaries(id)?;
        self.get_mut(id)?.update(&boundaries)
    }

    /// Updates every material once in insertion order and returns the
    /// largest difference.
    pub fn sweep(&mut self) -> Result<f64, MaterialError> {
        let mut largest = 0.0f64;
        for id in self.ids().collect::<Vec<_>>() {
            largest = largest.max(self.update(id)?.difference);
        }
        Ok(largest)
    }

    /// Sweeps until the largest difference drops below `settings.threshold`.
    pub fn converge(&mut self, settings: SweepSettings) -> anyhow::Result<SweepSummary> {
        if self.is_empty() {
            bail!("cannot converge an empty chain");
        }
        let mut difference = f64::INFINITY;
        for sweep in 1..=settings.max_sweeps {
            difference = self
                .sweep()
                .with_context(|| format!("sweep {sweep} of {} failed", settings.max_sweeps))?;
            if difference < settings.threshold {
                info!("chain converged after {sweep} sweeps (difference {difference:e})");
                return Ok(SweepSummary {
                    sweeps: sweep,
                    difference,
                });
            }
        }
        bail!(
            "chain did not converge within {} sweeps (difference {difference:e}, threshold {:e})",
            settings.max_sweeps,
            settings.threshold
        )
    }
}

/// Edge state of `neighbor` at energy `n` on `side`, checked against the
/// energy count of `material`.
fn edge(
    material: &Material,
    neighbor: &Material,
    n: usize,
    side: Side,
) -> Result<GreenState, MaterialError> {
    let (energies, positions) = neighbor.state().dims();
    let expected = material.energy().len();
    if energies != expected {
        return Err(MaterialError::ShapeMismatch {
            expected: (expected, positions),
            found: (energies, positions),
        });
    }
    let position = match side {
        Side::Left => 0,
        Side::Right => positions - 1,
    };
    Ok(*neighbor.state().get(n, position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::fixtures::Flat;
    use num_complex::Complex64;

    fn energies() -> Vec<f64> {
        vec![0.2, 0.6, 1.4, 1.8, 2.4]
    }

    fn flat(positions: usize) -> Material {
        let location = (0..positions)
            .map(|p| p as f64 / (positions - 1) as f64)
            .collect();
        Material::new(energies(), location, Flat::default()).expect("material")
    }

    /// reservoir -> a -> b, with the reservoir holding a superconducting state.
    fn three_segments() -> (Chain, [MaterialId; 3]) {
        let mut chain = Chain::new();
        let mut reservoir = flat(2);
        reservoir.init(Complex64::new(1.0, 0.0)).expect("init");
        let r = chain.insert(reservoir);
        let a = chain.insert(flat(3));
        let b = chain.insert(flat(4));
        chain.connect(r, a, Coupling::default()).expect("connect r-a");
        chain.connect(a, b, Coupling::default()).expect("connect a-b");
        (chain, [r, a, b])
    }

    #[test]
    fn connect_sets_links() {
        let (chain, [r, a, b]) = three_segments();
        let a_mat = chain.get(a).expect("a");
        assert_eq!(a_mat.left(), Some(r));
        assert_eq!(a_mat.right(), Some(b));
        assert_eq!(chain.get(r).expect("r").left(), None);
        assert_eq!(chain.get(b).expect("b").right(), None);
    }

    #[test]
    fn connect_rejects_bad_wiring() {
        let (mut chain, [r, a, b]) = three_segments();
        assert!(matches!(
            chain.connect(a, a, Coupling::default()),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chain.connect(r, b, Coupling::default()),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            chain.connect(b, MaterialId(9), Coupling::default()),
            Err(MaterialError::UnknownMaterial(MaterialId(9)))
        ));

        let other = Material::new(vec![0.1, 0.2], vec![0.0, 1.0], Flat::default())
            .expect("material");
        let c = chain.insert(other);
        assert!(matches!(
            chain.connect(b, c, Coupling::default()),
            Err(MaterialError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn boundaries_default_to_vacuum() {
        let (chain, [r, _, b]) = three_segments();
        assert_eq!(chain.left_boundary(r, 0).expect("left"), GreenState::vacuum());
        assert_eq!(chain.right_boundary(b, 4).expect("right"), GreenState::vacuum());
        let snapshot = chain.boundaries(r).expect("snapshot");
        assert!(snapshot.left.is_none());
        assert_eq!(snapshot.right.map(|s| s.len()), Some(5));
    }

    #[test]
    fn update_is_visible_to_next_neighbor() {
        let (mut chain, [r, a, b]) = three_segments();
        assert_eq!(chain.left_boundary(b, 2).expect("stale"), GreenState::vacuum());

        chain.update(a).expect("update a");
        for n in 0..5 {
            let source = *chain.get(r).expect("r").state().get(n, 1);
            let a_edge = *chain.get(a).expect("a").state().get(n, 2);
            assert!(a_edge.max_abs_diff(&source) < 1e-8);
            assert_eq!(chain.left_boundary(b, n).expect("fresh"), a_edge);
            assert!(a_edge.max_abs_diff(&GreenState::vacuum()) > 1e-3);
        }

        chain.update(b).expect("update b");
        for n in 0..5 {
            let a_edge = *chain.get(a).expect("a").state().get(n, 2);
            for green in chain.get(b).expect("b").state().row(n) {
                assert!(green.max_abs_diff(&a_edge) < 1e-8);
            }
        }
    }

    #[test]
    fn coupling_is_forwarded_to_both_sides() {
        let location = vec![0.0, 1.0];
        let (left_physics, right_physics) = (Flat::default(), Flat::default());
        let left_log = left_physics.couplings.clone();
        let right_log = right_physics.couplings.clone();

        let mut chain = Chain::new();
        let a = chain.insert(Material::new(energies(), location.clone(), left_physics).expect("a"));
        let b = chain.insert(Material::new(energies(), location, right_physics).expect("b"));
        let coupling = Coupling {
            left_conductance: 0.5,
            right_conductance: 2.0,
        };
        chain.connect(a, b, coupling).expect("connect");

        assert_eq!(*left_log.borrow(), vec![(Side::Right, 0.5)]);
        assert_eq!(*right_log.borrow(), vec![(Side::Left, 2.0)]);
    }

    #[test]
    fn converge_reaches_fixed_point() {
        let (mut chain, [r, _, b]) = three_segments();
        let summary = chain
            .converge(SweepSettings {
                max_sweeps: 10,
                threshold: 1e-8,
            })
            .expect("converge");
        assert!(summary.sweeps >= 2);
        assert!(summary.difference < 1e-8);
        // The reservoir sees vacuum on its left and relaxes to it, then so does the rest.
        for green in chain.get(b).expect("b").state().iter() {
            assert!(green.max_abs_diff(&GreenState::vacuum()) < 1e-8);
        }
        assert!(chain.get(r).expect("r").difference() < 1e-8);
    }

    #[test]
    fn converge_reports_exhausted_budget() {
        let (mut chain, _) = three_segments();
        let err = chain
            .converge(SweepSettings {
                max_sweeps: 1,
                threshold: 1e-12,
            })
            .expect_err("one sweep cannot settle the chain");
        assert!(err.to_string().contains("did not converge"));
    }

    #[test]
    fn empty_chain_does_not_converge() {
        let mut chain = Chain::new();
        assert!(chain.converge(SweepSettings::default()).is_err());
    }
}
