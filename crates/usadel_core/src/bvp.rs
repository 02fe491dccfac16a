//! Adaptive collocation solver for two-point boundary value problems.
//!
//! `solve` runs damped Newton iterations of a Gauss-Legendre collocation
//! discretization, estimates the error per mesh interval and bisects the
//! intervals that miss the tolerance. Mesh points supplied by the caller are
//! never moved or removed, only interior points are inserted.

pub mod banded;
mod collocation;

use crate::config::{ErrorControl, Order, Verbosity};
use crate::error::{BvpError, FailureReason};
use crate::traits::BoundaryValueProblem;
use collocation::{
    column, column_mut, solve_on_mesh, CollocationCoefficients, Iterate, NewtonControl,
};
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};
use std::cmp::Ordering;

/// Fractions of an interval where the defect is sampled; none of them is a
/// Gauss-Legendre node for up to three stages.
const DEFECT_SAMPLES: [f64; 4] = [0.0, 0.25, 0.75, 1.0];

#[derive(Debug, Clone, Copy)]
pub struct BvpSettings {
    pub order: Order,
    pub error_control: ErrorControl,
    pub tolerance: f64,
    /// Hard cap on the number of mesh intervals.
    pub max_subintervals: usize,
    pub max_newton_steps: usize,
    pub verbosity: Verbosity,
}

impl Default for BvpSettings {
    fn default() -> Self {
        Self {
            order: Order::Fourth,
            error_control: ErrorControl::GlobalError,
            tolerance: 1e-6,
            max_subintervals: 1024,
            max_newton_steps: 25,
            verbosity: Verbosity::Quiet,
        }
    }
}

impl BvpSettings {
    fn newton_tolerance(&self) -> f64 {
        (self.tolerance * 1e-3).max(1e-13)
    }
}

/// Converged collocation solution with its continuous extension.
#[derive(Debug, Clone)]
pub struct BvpSolution {
    mesh: Vec<f64>,
    states: DMatrix<f64>,
    slopes: DMatrix<f64>,
    coeffs: CollocationCoefficients,
    estimate: f64,
}

impl BvpSolution {
    fn new(it: Iterate, slopes: DMatrix<f64>, coeffs: CollocationCoefficients) -> Self {
        Self {
            mesh: it.mesh,
            states: it.states,
            slopes,
            coeffs,
            estimate: f64::NAN,
        }
    }

    /// Final mesh, including every point of the initial mesh.
    pub fn mesh(&self) -> &[f64] {
        &self.mesh
    }

    pub fn dimension(&self) -> usize {
        self.states.nrows()
    }

    pub fn subintervals(&self) -> usize {
        self.mesh.len() - 1
    }

    /// Largest per-interval error estimate of the accepted mesh.
    pub fn estimated_error(&self) -> f64 {
        self.estimate
    }

    /// Solution values at the mesh points, one column per point.
    pub fn mesh_states(&self) -> &DMatrix<f64> {
        &self.states
    }

    /// Evaluates the solution at `x`. Mesh points return their stored value.
    pub fn evaluate(&self, x: f64) -> DVector<f64> {
        if let Ok(idx) = self
            .mesh
            .binary_search_by(|m| m.partial_cmp(&x).unwrap_or(Ordering::Less))
        {
            return DVector::from_column_slice(column(&self.states, idx));
        }
        let i = self
            .mesh
            .partition_point(|&m| m <= x)
            .saturating_sub(1)
            .min(self.subintervals() - 1);
        let h = self.mesh[i + 1] - self.mesh[i];
        DVector::from_vec(self.extension(i, (x - self.mesh[i]) / h))
    }

    /// Evaluates the solution at each of `points`, one column per point.
    pub fn evaluate_at(&self, points: &[f64]) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.dimension(), points.len());
        for (idx, &x) in points.iter().enumerate() {
            column_mut(&mut out, idx).copy_from_slice(self.evaluate(x).as_slice());
        }
        out
    }

    fn mesh_column(&self, idx: usize) -> Vec<f64> {
        column(&self.states, idx).to_vec()
    }

    fn extension(&self, interval: usize, tau: f64) -> Vec<f64> {
        let s = self.coeffs.stages();
        let h = self.mesh[interval + 1] - self.mesh[interval];
        let weights = self.coeffs.integral_weights(tau);
        let mut value = column(&self.states, interval).to_vec();
        for (k, w) in weights.iter().enumerate() {
            let slope = column(&self.slopes, interval * s + k);
            for (v, f) in value.iter_mut().zip(slope) {
                *v += h * w * f;
            }
        }
        value
    }

    fn extension_slope(&self, interval: usize, tau: f64) -> Vec<f64> {
        let s = self.coeffs.stages();
        let weights = self.coeffs.basis_weights(tau);
        let mut value = vec![0.0; self.dimension()];
        for (k, w) in weights.iter().enumerate() {
            let slope = column(&self.slopes, interval * s + k);
            for (v, f) in value.iter_mut().zip(slope) {
                *v += w * f;
            }
        }
        value
    }

    /// Samples this solution on `mesh` as the starting point of another solve.
    fn resample(&self, mesh: Vec<f64>) -> Iterate {
        let s = self.coeffs.stages();
        let states = self.evaluate_at(&mesh);
        let intervals = mesh.len() - 1;
        let mut stages = DMatrix::zeros(self.dimension(), intervals * s);
        for i in 0..intervals {
            let h = mesh[i + 1] - mesh[i];
            for (k, &node) in self.coeffs.nodes.iter().enumerate() {
                let value = self.evaluate(mesh[i] + node * h);
                column_mut(&mut stages, i * s + k).copy_from_slice(value.as_slice());
            }
        }
        Iterate {
            mesh,
            states,
            stages,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EstimateKind {
    Defect,
    Global,
    Both,
}

/// Solves `problem` starting from `initial` (one column per point of `mesh`).
pub fn solve<P: BoundaryValueProblem>(
    problem: &P,
    mesh: &[f64],
    initial: &DMatrix<f64>,
    settings: &BvpSettings,
) -> Result<BvpSolution, BvpError> {
    validate(problem, mesh, initial, settings)?;
    let coeffs = CollocationCoefficients::new(settings.order.stages())?;
    let control = NewtonControl {
        max_steps: settings.max_newton_steps,
        tolerance: settings.newton_tolerance(),
    };
    let mut kind = match settings.error_control {
        ErrorControl::Defect | ErrorControl::DefectThenGlobal => EstimateKind::Defect,
        ErrorControl::GlobalError => EstimateKind::Global,
        ErrorControl::DefectAndGlobal => EstimateKind::Both,
    };
    let mut guess = Iterate::linear(mesh.to_vec(), initial.clone(), &coeffs);

    loop {
        let intervals = guess.intervals();
        let (it, slopes) = match solve_on_mesh(problem, &coeffs, guess.clone(), control) {
            Ok(result) => result,
            Err(BvpError::NotConverged { reason, achieved, .. })
                if 2 * intervals <= settings.max_subintervals =>
            {
                if settings.verbosity.debug() {
                    debug!(
                        "newton failed on {intervals} subintervals ({reason}, residual {achieved:e}); \
                         retrying on a bisected mesh"
                    );
                }
                guess = bisect_guess(&guess, &coeffs);
                continue;
            }
            Err(err) => return Err(err),
        };

        let mut solution = BvpSolution::new(it, slopes, coeffs.clone());
        let mut estimates = interval_errors(problem, &solution, kind, settings, control);
        if settings.error_control == ErrorControl::DefectThenGlobal
            && kind == EstimateKind::Defect
            && max_of(&estimates) <= settings.tolerance
        {
            kind = EstimateKind::Global;
            estimates = interval_errors(problem, &solution, kind, settings, control);
        }

        let worst = max_of(&estimates);
        if worst <= settings.tolerance {
            if settings.verbosity.debug() {
                debug!(
                    "collocation converged on {intervals} subintervals (estimate {worst:e})"
                );
            }
            solution.estimate = worst;
            return Ok(solution);
        }

        let flagged: Vec<bool> = estimates
            .iter()
            .map(|e| !(*e <= settings.tolerance))
            .collect();
        let added = flagged.iter().filter(|f| **f).count();
        if intervals + added > settings.max_subintervals {
            return Err(BvpError::NotConverged {
                reason: FailureReason::MeshLimit,
                achieved: worst,
                subintervals: intervals,
            });
        }
        if settings.verbosity.debug() {
            debug!(
                "estimate {worst:e} on {intervals} subintervals; bisecting {added} of them"
            );
        }
        let refined = bisect_mesh(solution.mesh(), &flagged);
        guess = solution.resample(refined);
    }
}

fn validate<P: BoundaryValueProblem>(
    problem: &P,
    mesh: &[f64],
    initial: &DMatrix<f64>,
    settings: &BvpSettings,
) -> Result<(), BvpError> {
    let dim = problem.dimension();
    if dim == 0 {
        return Err(BvpError::InvalidInput("problem has zero dimension".into()));
    }
    if problem.left_conditions() > dim {
        return Err(BvpError::InvalidInput(format!(
            "{} left conditions exceed dimension {dim}",
            problem.left_conditions()
        )));
    }
    if mesh.len() < 2 {
        return Err(BvpError::InvalidInput(
            "mesh needs at least two points".into(),
        ));
    }
    if mesh.iter().any(|x| !x.is_finite()) || mesh.windows(2).any(|w| w[1] <= w[0]) {
        return Err(BvpError::InvalidInput(
            "mesh must be finite and strictly increasing".into(),
        ));
    }
    if initial.nrows() != dim || initial.ncols() != mesh.len() {
        return Err(BvpError::InvalidInput(format!(
            "initial state is {}x{}, expected {dim}x{}",
            initial.nrows(),
            initial.ncols(),
            mesh.len()
        )));
    }
    if mesh.len() - 1 > settings.max_subintervals {
        return Err(BvpError::InvalidInput(format!(
            "initial mesh has {} subintervals, more than the limit of {}",
            mesh.len() - 1,
            settings.max_subintervals
        )));
    }
    if !(settings.tolerance > 0.0) {
        return Err(BvpError::InvalidInput("tolerance must be positive".into()));
    }
    Ok(())
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc: f64, v| {
        if v.is_nan() {
            f64::INFINITY
        } else {
            acc.max(*v)
        }
    })
}

fn bisect_mesh(mesh: &[f64], flagged: &[bool]) -> Vec<f64> {
    let mut refined = Vec::with_capacity(mesh.len() + flagged.len());
    for (i, split) in flagged.iter().enumerate() {
        refined.push(mesh[i]);
        if *split {
            refined.push(0.5 * (mesh[i] + mesh[i + 1]));
        }
    }
    refined.push(mesh[mesh.len() - 1]);
    refined
}

/// Uniformly bisected copy of a guess, with linearly interpolated midpoints.
fn bisect_guess(guess: &Iterate, coeffs: &CollocationCoefficients) -> Iterate {
    let intervals = guess.intervals();
    let mesh = bisect_mesh(&guess.mesh, &vec![true; intervals]);
    let dim = guess.states.nrows();
    let mut states = DMatrix::zeros(dim, mesh.len());
    for i in 0..intervals {
        let current = column(&guess.states, i);
        let next = column(&guess.states, i + 1);
        column_mut(&mut states, 2 * i).copy_from_slice(current);
        let mid = column_mut(&mut states, 2 * i + 1);
        for d in 0..dim {
            mid[d] = 0.5 * (current[d] + next[d]);
        }
    }
    column_mut(&mut states, 2 * intervals).copy_from_slice(column(&guess.states, intervals));
    Iterate::linear(mesh, states, coeffs)
}

fn interval_errors<P: BoundaryValueProblem>(
    problem: &P,
    solution: &BvpSolution,
    kind: EstimateKind,
    settings: &BvpSettings,
    control: NewtonControl,
) -> Vec<f64> {
    match kind {
        EstimateKind::Defect => defect_errors(problem, solution),
        EstimateKind::Global => global_errors(problem, solution, settings, control),
        EstimateKind::Both => defect_errors(problem, solution)
            .into_iter()
            .zip(global_errors(problem, solution, settings, control))
            .map(|(d, g)| d.max(g))
            .collect(),
    }
}

/// Scaled defect `|u' - f(z, u)| / (1 + |f|)` of the continuous solution.
fn defect_errors<P: BoundaryValueProblem>(problem: &P, solution: &BvpSolution) -> Vec<f64> {
    let dim = solution.dimension();
    let mut f = vec![0.0; dim];
    (0..solution.subintervals())
        .map(|i| {
            let x0 = solution.mesh[i];
            let h = solution.mesh[i + 1] - x0;
            let mut worst: f64 = 0.0;
            for &tau in DEFECT_SAMPLES.iter() {
                let u = solution.extension(i, tau);
                let du = solution.extension_slope(i, tau);
                problem.derivative(x0 + tau * h, &u, &mut f);
                for r in 0..dim {
                    let defect = (du[r] - f[r]).abs() / (1.0 + f[r].abs());
                    worst = if defect.is_nan() {
                        f64::INFINITY
                    } else {
                        worst.max(defect)
                    };
                }
            }
            worst
        })
        .collect()
}

/// Richardson estimate from a second solve on the uniformly bisected mesh.
fn global_errors<P: BoundaryValueProblem>(
    problem: &P,
    solution: &BvpSolution,
    settings: &BvpSettings,
    control: NewtonControl,
) -> Vec<f64> {
    let intervals = solution.subintervals();
    let fine_mesh = bisect_mesh(solution.mesh(), &vec![true; intervals]);
    let guess = solution.resample(fine_mesh);
    let fine = match solve_on_mesh(problem, &solution.coeffs, guess, control) {
        Ok((fine, _)) => fine,
        Err(err) => {
            if settings.verbosity.trace() {
                trace!("global error estimate unavailable: {err}");
            }
            return vec![f64::INFINITY; intervals];
        }
    };

    let p = settings.order.value() as i32;
    let richardson = 2f64.powi(p) / (2f64.powi(p) - 1.0);
    (0..intervals)
        .map(|i| {
            let samples = [
                (solution.mesh_column(i), 2 * i),
                (solution.extension(i, 0.5), 2 * i + 1),
                (solution.mesh_column(i + 1), 2 * i + 2),
            ];
            let mut worst: f64 = 0.0;
            for (coarse, fine_idx) in samples.iter() {
                let reference = column(&fine.states, *fine_idx);
                for (c, r) in coarse.iter().zip(reference) {
                    let err = richardson * (c - r).abs() / (1.0 + r.abs());
                    worst = if err.is_nan() {
                        f64::INFINITY
                    } else {
                        worst.max(err)
                    };
                }
            }
            worst
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y'' = -y`, `y(0) = 0`, `y(1) = sin(1)`; exact solution `sin(z)`.
    struct Oscillator;

    impl BoundaryValueProblem for Oscillator {
        fn dimension(&self) -> usize {
            2
        }
        fn left_conditions(&self) -> usize {
            1
        }
        fn derivative(&self, _z: f64, y: &[f64], out: &mut [f64]) {
            out[0] = y[1];
            out[1] = -y[0];
        }
        fn left_residual(&self, y: &[f64], out: &mut [f64]) {
            out[0] = y[0];
        }
        fn right_residual(&self, y: &[f64], out: &mut [f64]) {
            out[0] = y[0] - 1f64.sin();
        }
    }

    /// `eps y'' = y`, `y(0) = 1`, `y(1) = 0`: a boundary layer at `z = 0`.
    struct BoundaryLayer {
        eps: f64,
    }

    impl BoundaryValueProblem for BoundaryLayer {
        fn dimension(&self) -> usize {
            2
        }
        fn left_conditions(&self) -> usize {
            1
        }
        fn derivative(&self, _z: f64, y: &[f64], out: &mut [f64]) {
            out[0] = y[1];
            out[1] = y[0] / self.eps;
        }
        fn left_residual(&self, y: &[f64], out: &mut [f64]) {
            out[0] = y[0] - 1.0;
        }
        fn right_residual(&self, y: &[f64], out: &mut [f64]) {
            out[0] = y[0];
        }
    }

    /// `y' = y^2 + 1` with `y(0) = 0`; exact solution `tan(z)`.
    struct Riccati;

    impl BoundaryValueProblem for Riccati {
        fn dimension(&self) -> usize {
            1
        }
        fn left_conditions(&self) -> usize {
            1
        }
        fn derivative(&self, _z: f64, y: &[f64], out: &mut [f64]) {
            out[0] = y[0] * y[0] + 1.0;
        }
        fn left_residual(&self, y: &[f64], out: &mut [f64]) {
            out[0] = y[0];
        }
        fn right_residual(&self, _y: &[f64], _out: &mut [f64]) {}
    }

    fn uniform_mesh(points: usize) -> Vec<f64> {
        (0..points)
            .map(|i| i as f64 / (points - 1) as f64)
            .collect()
    }

    #[test]
    fn oscillator_matches_sine_for_every_order() {
        let mesh = uniform_mesh(5);
        let initial = DMatrix::zeros(2, mesh.len());
        for order in [Order::Second, Order::Fourth, Order::Sixth] {
            let settings = BvpSettings {
                order,
                tolerance: 1e-6,
                max_subintervals: 4096,
                ..BvpSettings::default()
            };
            let solution = solve(&Oscillator, &mesh, &initial, &settings).expect("solve");
            for &x in &mesh {
                let y = solution.evaluate(x);
                assert!(
                    (y[0] - x.sin()).abs() < 1e-5,
                    "order {order:?}: y({x}) = {} vs {}",
                    y[0],
                    x.sin()
                );
                assert!((y[1] - x.cos()).abs() < 1e-5);
            }
            assert!(solution.estimated_error() <= 1e-6);
        }
    }

    #[test]
    fn caller_mesh_points_are_kept_in_order() {
        let mesh = vec![0.0, 0.1, 0.7, 1.0];
        let initial = DMatrix::zeros(2, mesh.len());
        let settings = BvpSettings {
            order: Order::Second,
            tolerance: 1e-5,
            ..BvpSettings::default()
        };
        let solution = solve(&Oscillator, &mesh, &initial, &settings).expect("solve");
        assert!(solution.subintervals() > 3, "midpoint rule should need refinement");
        let kept: Vec<f64> = solution
            .mesh()
            .iter()
            .cloned()
            .filter(|x| mesh.contains(x))
            .collect();
        assert_eq!(kept, mesh);
        assert!(solution.mesh().windows(2).all(|w| w[0] < w[1]));
        let values = solution.evaluate_at(&mesh);
        assert_eq!(values.ncols(), mesh.len());
        assert!((values[(0, 2)] - 0.7f64.sin()).abs() < 1e-4);
    }

    #[test]
    fn boundary_layer_refines_near_the_layer() {
        let problem = BoundaryLayer { eps: 1e-3 };
        let mesh = uniform_mesh(3);
        let initial = DMatrix::zeros(2, mesh.len());
        let settings = BvpSettings {
            tolerance: 1e-4,
            error_control: ErrorControl::DefectAndGlobal,
            max_subintervals: 4096,
            ..BvpSettings::default()
        };
        let solution = solve(&problem, &mesh, &initial, &settings).expect("solve");
        let near_layer = solution.mesh().iter().filter(|&&x| x < 0.1).count();
        let far = solution.mesh().iter().filter(|&&x| x > 0.5).count();
        assert!(near_layer > far, "mesh should cluster at the layer");
        let k = (1.0 / problem.eps).sqrt();
        let x = 0.05;
        let exact = (k * (1.0 - x)).sinh() / k.sinh();
        assert!((solution.evaluate(x)[0] - exact).abs() < 1e-3);
    }

    #[test]
    fn mesh_budget_exhaustion_reports_estimate() {
        let problem = BoundaryLayer { eps: 1e-4 };
        let mesh = uniform_mesh(3);
        let initial = DMatrix::zeros(2, mesh.len());
        let settings = BvpSettings {
            tolerance: 1e-10,
            error_control: ErrorControl::Defect,
            max_subintervals: 8,
            ..BvpSettings::default()
        };
        let err = solve(&problem, &mesh, &initial, &settings).expect_err("budget too small");
        match err {
            BvpError::NotConverged {
                reason: FailureReason::MeshLimit,
                achieved,
                subintervals,
            } => {
                assert!(achieved > 1e-10);
                assert!(subintervals <= 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn nonlinear_problem_converges_with_defect_then_global_control() {
        let mesh = uniform_mesh(4);
        let initial = DMatrix::zeros(1, mesh.len());
        let settings = BvpSettings {
            tolerance: 1e-5,
            error_control: ErrorControl::DefectThenGlobal,
            max_subintervals: 4096,
            ..BvpSettings::default()
        };
        let solution = solve(&Riccati, &mesh, &initial, &settings).expect("solve");
        for &x in &mesh {
            assert!((solution.evaluate(x)[0] - x.tan()).abs() < 1e-5);
        }
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        let initial = DMatrix::zeros(2, 3);
        let settings = BvpSettings::default();
        let err = solve(&Oscillator, &[0.0, 0.5, 0.5], &initial, &settings)
            .expect_err("non-increasing mesh");
        assert!(err.to_string().contains("strictly increasing"));
        let err = solve(&Oscillator, &[0.0, 1.0], &initial, &settings)
            .expect_err("shape mismatch");
        assert!(matches!(err, BvpError::InvalidInput(_)));
    }
}
