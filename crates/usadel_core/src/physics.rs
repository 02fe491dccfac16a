//! The capability set a concrete material type plugs into the engine.

use crate::error::MaterialError;
use crate::green::GreenState;
use crate::material::MaterialCore;
use crate::spin::SpinState;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Which end of a material an interface sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

/// Interface parameters recorded when two materials are connected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coupling {
    /// Interface conductance as seen from the left material.
    pub left_conductance: f64,
    /// Interface conductance as seen from the right material.
    pub right_conductance: f64,
}

impl Coupling {
    pub fn symmetric(conductance: f64) -> Self {
        Self {
            left_conductance: conductance,
            right_conductance: conductance,
        }
    }
}

impl Default for Coupling {
    fn default() -> Self {
        Self::symmetric(0.3)
    }
}

/// Physics of one material type: its diffusion equation, its interface
/// equations and optional hooks around each update.
///
/// Residuals returned by the interface equations are driven to zero by the
/// solver; `(r, rt)` constrain `g` and `gt` respectively.
pub trait Physics: Debug {
    /// Sets the initial condition. The default fills the grid with the
    /// homogeneous BCS state for `gap`.
    fn init(&mut self, core: &mut MaterialCore, gap: Complex64) -> Result<(), MaterialError> {
        core.fill_bcs(gap)
    }

    /// Second derivatives `(d2g, d2gt)` at position `z` for the normalized
    /// complex energy `energy`.
    fn diffusion_equation(
        &self,
        energy: Complex64,
        z: f64,
        state: &GreenState,
    ) -> (SpinState, SpinState);

    /// Boundary residuals at the left end, given the neighbor's Green's function.
    fn interface_equation_left(
        &self,
        boundary: &GreenState,
        state: &GreenState,
    ) -> (SpinState, SpinState);

    /// Boundary residuals at the right end, given the neighbor's Green's function.
    fn interface_equation_right(
        &self,
        boundary: &GreenState,
        state: &GreenState,
    ) -> (SpinState, SpinState);

    /// Runs before the energy loop of every update.
    fn update_prehook(&mut self, _core: &mut MaterialCore) -> Result<(), MaterialError> {
        Ok(())
    }

    /// Runs after the energy loop of every update.
    fn update_posthook(&mut self, _core: &mut MaterialCore) -> Result<(), MaterialError> {
        Ok(())
    }

    /// Records the conductance of a newly connected interface on `side`.
    fn couple(&mut self, _side: Side, _conductance: f64) {}
}
