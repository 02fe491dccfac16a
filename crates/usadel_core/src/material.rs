//! A material: one segment of the chain with its own axes, state grid and
//! physics plugin.

use crate::bvp::{self, BvpSettings, BvpSolution};
use crate::chain::MaterialId;
use crate::config::{FailurePolicy, MaterialConfig, PhysicalParams, SolverConfig};
use crate::error::{BvpError, ConvergenceError, MaterialError};
use crate::green::{GreenState, GREEN_REALS};
use crate::grid::StateGrid;
use crate::physics::{Physics, Side};
use crate::spin::SPIN_REALS;
use crate::traits::BoundaryValueProblem;
use log::{debug, trace, warn};
use nalgebra::DMatrix;
use num_complex::Complex64;

/// Maximum Newton steps per mesh in a material update.
const NEWTON_STEPS: usize = 25;

/// Data a physics plugin may read and modify from its hooks.
///
/// The axes are fixed at construction and the grid always has one row per
/// energy and one column per location.
#[derive(Debug, Clone)]
pub struct MaterialCore {
    energy: Vec<f64>,
    location: Vec<f64>,
    state: StateGrid,
    pub params: PhysicalParams,
    difference: f64,
}

impl MaterialCore {
    pub fn energy(&self) -> &[f64] {
        &self.energy
    }

    pub fn location(&self) -> &[f64] {
        &self.location
    }

    pub fn state(&self) -> &StateGrid {
        &self.state
    }

    pub fn green(&self, energy: usize, position: usize) -> &GreenState {
        self.state.get(energy, position)
    }

    pub fn green_mut(&mut self, energy: usize, position: usize) -> &mut GreenState {
        self.state.get_mut(energy, position)
    }

    pub fn row_mut(&mut self, energy: usize) -> &mut [GreenState] {
        self.state.row_mut(energy)
    }

    pub fn difference(&self) -> f64 {
        self.difference
    }

    /// Energy `n` with the inelastic scattering broadening, in units of the
    /// Thouless energy.
    pub fn complex_energy(&self, n: usize) -> Complex64 {
        Complex64::new(self.energy[n], self.params.scattering) / self.params.thouless
    }

    /// Fills every position with the homogeneous BCS state for `gap`.
    ///
    /// Fails without touching the grid if any energy gives a non-finite
    /// state, which happens at `E = 0` or `E = |gap|` without broadening.
    pub fn fill_bcs(&mut self, gap: Complex64) -> Result<(), MaterialError> {
        let mut states = Vec::with_capacity(self.energy.len());
        for &energy in &self.energy {
            let state = GreenState::bcs(Complex64::new(energy, self.params.scattering), gap);
            if !state.is_finite() {
                return Err(MaterialError::InvalidConfiguration(format!(
                    "BCS state is singular at energy {energy} (gap {gap}, scattering {})",
                    self.params.scattering
                )));
            }
            states.push(state);
        }
        for (n, state) in states.into_iter().enumerate() {
            self.state.row_mut(n).fill(state);
        }
        Ok(())
    }
}

/// Neighbor edge states for every energy, taken before an update starts.
///
/// `None` on a side means there is no neighbor there and the vacuum state is
/// used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Boundaries {
    pub left: Option<Vec<GreenState>>,
    pub right: Option<Vec<GreenState>>,
}

impl Boundaries {
    pub fn vacuum() -> Self {
        Self::default()
    }

    pub fn left_at(&self, n: usize) -> GreenState {
        self.left
            .as_ref()
            .map_or_else(GreenState::vacuum, |states| states[n])
    }

    pub fn right_at(&self, n: usize) -> GreenState {
        self.right
            .as_ref()
            .map_or_else(GreenState::vacuum, |states| states[n])
    }

    fn check(&self, energies: usize) -> Result<(), MaterialError> {
        for states in [&self.left, &self.right].into_iter().flatten() {
            if states.len() != energies {
                return Err(MaterialError::ShapeMismatch {
                    expected: (energies, 1),
                    found: (states.len(), 1),
                });
            }
        }
        Ok(())
    }
}

/// Outcome of one `Material::update`.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    /// Largest absolute change of any packed component.
    pub difference: f64,
    /// Energies left untouched under `FailurePolicy::Skip`.
    pub skipped: Vec<ConvergenceError>,
}

#[derive(Debug)]
pub struct Material {
    core: MaterialCore,
    solver: SolverConfig,
    physics: Box<dyn Physics>,
    pub(crate) left: Option<MaterialId>,
    pub(crate) right: Option<MaterialId>,
}

impl Material {
    /// Creates a material in the vacuum state with the default configuration.
    pub fn new(
        energy: Vec<f64>,
        location: Vec<f64>,
        physics: impl Physics + 'static,
    ) -> Result<Self, MaterialError> {
        Self::with_config(energy, location, &MaterialConfig::default(), physics)
    }

    pub fn with_config(
        energy: Vec<f64>,
        location: Vec<f64>,
        config: &MaterialConfig,
        physics: impl Physics + 'static,
    ) -> Result<Self, MaterialError> {
        check_axis("energy", &energy, 1)?;
        check_axis("location", &location, 2)?;
        let (params, solver) = config.split()?;
        let state = StateGrid::vacuum(energy.len(), location.len());
        Ok(Self {
            core: MaterialCore {
                energy,
                location,
                state,
                params,
                difference: 0.0,
            },
            solver,
            physics: Box::new(physics),
            left: None,
            right: None,
        })
    }

    pub fn energy(&self) -> &[f64] {
        self.core.energy()
    }

    pub fn location(&self) -> &[f64] {
        self.core.location()
    }

    pub fn state(&self) -> &StateGrid {
        self.core.state()
    }

    pub fn core(&self) -> &MaterialCore {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut MaterialCore {
        &mut self.core
    }

    pub fn params(&self) -> &PhysicalParams {
        &self.core.params
    }

    pub fn solver(&self) -> &SolverConfig {
        &self.solver
    }

    pub fn set_solver(&mut self, solver: SolverConfig) -> Result<(), MaterialError> {
        solver.validate()?;
        self.solver = solver;
        Ok(())
    }

    /// Largest change recorded by the last update; infinite if that update
    /// stopped on a solver error.
    pub fn difference(&self) -> f64 {
        self.core.difference
    }

    pub fn left(&self) -> Option<MaterialId> {
        self.left
    }

    pub fn right(&self) -> Option<MaterialId> {
        self.right
    }

    /// Replaces the state with the physics plugin's initial condition.
    pub fn init(&mut self, gap: Complex64) -> Result<(), MaterialError> {
        let Material { core, physics, .. } = self;
        physics.init(core, gap)
    }

    /// Deep copy of the state into `buffer`, which is resized to match.
    pub fn save(&self, buffer: &mut StateGrid) {
        buffer.copy_from(&self.core.state);
    }

    /// Restores the state from `buffer`, which must have this material's shape.
    pub fn load(&mut self, buffer: &StateGrid) -> Result<(), MaterialError> {
        self.core.state.copy_exact(buffer)
    }

    pub(crate) fn link(&mut self, side: Side, neighbor: MaterialId, conductance: f64) {
        match side {
            Side::Left => self.left = Some(neighbor),
            Side::Right => self.right = Some(neighbor),
        }
        self.physics.couple(side, conductance);
    }

    /// Solves the diffusion problem for every energy with the given neighbor
    /// edges and writes the result back into the state.
    ///
    /// Rows solved before an aborting failure keep their new values and
    /// `difference` is set to infinity.
    pub fn update(&mut self, boundaries: &Boundaries) -> Result<UpdateReport, MaterialError> {
        let energies = self.core.energy.len();
        boundaries.check(energies)?;

        let Material {
            core,
            solver,
            physics,
            ..
        } = self;
        let verbosity = solver.verbosity;

        physics.update_prehook(core)?;
        core.difference = 0.0;

        let positions = core.location.len();
        let settings = BvpSettings {
            order: solver.order,
            error_control: solver.error_control,
            tolerance: solver.tolerance,
            max_subintervals: positions * solver.mesh_scaling,
            max_newton_steps: NEWTON_STEPS,
            verbosity,
        };
        if verbosity.debug() {
            debug!(
                "updating material with {energies} energies, {positions} positions \
                 (order {}, tolerance {:e})",
                solver.order.value(),
                solver.tolerance
            );
        }

        let mut skipped = Vec::new();
        for n in 0..energies {
            let mut packed = vec![0.0; GREEN_REALS * positions];
            for (chunk, green) in packed
                .chunks_exact_mut(GREEN_REALS)
                .zip(core.state.row(n))
            {
                green.write_to(chunk);
            }
            let initial = DMatrix::from_vec(GREEN_REALS, positions, packed);

            let slice = EnergySlice {
                physics: &**physics,
                energy: core.complex_energy(n),
                left: boundaries.left_at(n),
                right: boundaries.right_at(n),
            };
            match solve_energy(&slice, &core.location, &initial, settings, solver.failure_policy, n) {
                Ok(solution) => {
                    let values = solution.evaluate_at(&core.location);
                    let change = values
                        .iter()
                        .zip(initial.iter())
                        .fold(0.0f64, |acc, (new, old)| acc.max((new - old).abs()));
                    for (green, chunk) in core
                        .state
                        .row_mut(n)
                        .iter_mut()
                        .zip(values.as_slice().chunks_exact(GREEN_REALS))
                    {
                        *green = GreenState::from_slice(chunk);
                    }
                    core.difference = core.difference.max(change);
                    if verbosity.trace() {
                        trace!(
                            "energy {n}: change {change:e} on {} subintervals",
                            solution.subintervals()
                        );
                    }
                }
                Err(MaterialError::Convergence(err))
                    if solver.failure_policy == FailurePolicy::Skip =>
                {
                    if verbosity.warnings() {
                        warn!("skipping energy {}: {err}", core.energy[n]);
                    }
                    skipped.push(err);
                }
                Err(err) => {
                    core.difference = f64::INFINITY;
                    return Err(err);
                }
            }
        }

        physics.update_posthook(core)?;
        if verbosity.debug() {
            debug!(
                "material update finished: difference {:e}, {} energies skipped",
                core.difference,
                skipped.len()
            );
        }
        Ok(UpdateReport {
            difference: core.difference,
            skipped,
        })
    }
}

fn check_axis(name: &str, values: &[f64], min_len: usize) -> Result<(), MaterialError> {
    if values.len() < min_len {
        return Err(MaterialError::InvalidConfiguration(format!(
            "{name} axis needs at least {min_len} points, got {}",
            values.len()
        )));
    }
    if values.iter().any(|v| !v.is_finite()) || values.windows(2).any(|w| w[1] <= w[0]) {
        return Err(MaterialError::InvalidConfiguration(format!(
            "{name} axis must be finite and strictly increasing"
        )));
    }
    Ok(())
}

/// Runs the solver for one energy, retrying with a looser tolerance under
/// `FailurePolicy::Relax`.
fn solve_energy(
    slice: &EnergySlice<'_>,
    location: &[f64],
    initial: &DMatrix<f64>,
    mut settings: BvpSettings,
    policy: FailurePolicy,
    n: usize,
) -> Result<BvpSolution, MaterialError> {
    let (factor, attempts) = match policy {
        FailurePolicy::Relax { factor, attempts } => (factor, attempts),
        FailurePolicy::Abort | FailurePolicy::Skip => (1.0, 0),
    };
    let mut attempt = 0;
    loop {
        match bvp::solve(slice, location, initial, &settings) {
            Ok(solution) => return Ok(solution),
            Err(BvpError::NotConverged { reason, .. }) if attempt < attempts => {
                attempt += 1;
                settings.tolerance *= factor;
                if settings.verbosity.warnings() {
                    warn!(
                        "energy index {n}: {reason}; retrying with tolerance {:e} ({attempt}/{attempts})",
                        settings.tolerance
                    );
                }
            }
            Err(err) => return Err(MaterialError::from_bvp(err, n, settings.tolerance)),
        }
    }
}

/// The Usadel problem at one energy as a first-order system over the packed
/// `[g, gt, dg, dgt]` layout.
struct EnergySlice<'a> {
    physics: &'a dyn Physics,
    energy: Complex64,
    left: GreenState,
    right: GreenState,
}

impl BoundaryValueProblem for EnergySlice<'_> {
    fn dimension(&self) -> usize {
        GREEN_REALS
    }

    fn left_conditions(&self) -> usize {
        GREEN_REALS / 2
    }

    fn derivative(&self, z: f64, y: &[f64], out: &mut [f64]) {
        let state = GreenState::from_slice(y);
        let (d2g, d2gt) = self.physics.diffusion_equation(self.energy, z, &state);
        GreenState::new(state.dg, state.dgt, d2g, d2gt).write_to(out);
    }

    fn left_residual(&self, y: &[f64], out: &mut [f64]) {
        let state = GreenState::from_slice(y);
        let (r, rt) = self.physics.interface_equation_left(&self.left, &state);
        r.write_to(&mut out[..SPIN_REALS]);
        rt.write_to(&mut out[SPIN_REALS..2 * SPIN_REALS]);
    }

    fn right_residual(&self, y: &[f64], out: &mut [f64]) {
        let state = GreenState::from_slice(y);
        let (r, rt) = self.physics.interface_equation_right(&self.right, &state);
        r.write_to(&mut out[..SPIN_REALS]);
        rt.write_to(&mut out[SPIN_REALS..2 * SPIN_REALS]);
    }
}
