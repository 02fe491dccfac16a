//! Gauss-Legendre collocation on a fixed mesh.
//!
//! Unknowns are the states at the mesh points and at the `s` collocation
//! stages inside each interval. Each Newton step condenses the stage
//! unknowns interval by interval, leaving an almost block diagonal system in
//! the mesh states that is solved as a band matrix.

use super::banded::BandedMatrix;
use crate::error::{BvpError, FailureReason};
use crate::traits::BoundaryValueProblem;
use anyhow::{anyhow, bail, Result};
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

const MIN_DAMPING: f64 = 1.0 / 64.0;

#[derive(Debug, Clone)]
pub(crate) struct CollocationCoefficients {
    pub nodes: Vec<f64>,
    pub a: Vec<Vec<f64>>,
    pub b: Vec<f64>,
    basis: Vec<Vec<f64>>,
}

impl CollocationCoefficients {
    pub fn new(stages: usize) -> Result<Self> {
        if stages == 0 {
            bail!("Collocation needs at least one stage");
        }
        let nodes = gauss_legendre_nodes(stages)?;
        let basis = lagrange_coefficients(&nodes)?;
        let b = basis.iter().map(|p| integrate_polynomial(p, 1.0)).collect();
        let a = nodes
            .iter()
            .map(|&c| basis.iter().map(|p| integrate_polynomial(p, c)).collect())
            .collect();
        Ok(Self { nodes, a, b, basis })
    }

    pub fn stages(&self) -> usize {
        self.nodes.len()
    }

    /// `∫_0^tau L_j` for every Lagrange basis polynomial `L_j`.
    pub fn integral_weights(&self, tau: f64) -> Vec<f64> {
        self.basis
            .iter()
            .map(|p| integrate_polynomial(p, tau))
            .collect()
    }

    /// `L_j(tau)` for every Lagrange basis polynomial.
    pub fn basis_weights(&self, tau: f64) -> Vec<f64> {
        self.basis
            .iter()
            .map(|p| evaluate_polynomial(p, tau))
            .collect()
    }
}

fn gauss_legendre_nodes(degree: usize) -> Result<Vec<f64>> {
    if degree == 0 {
        bail!("Collocation degree must be positive");
    }
    let n = degree;
    let m = (n + 1) / 2;
    let mut nodes = vec![0.0; n];
    for i in 0..m {
        let mut x = f64::cos(PI * (i as f64 + 0.75) / (n as f64 + 0.5));
        for _ in 0..50 {
            let (p, dp) = legendre_eval(n, x);
            let dx = -p / dp;
            x += dx;
            if dx.abs() < 1e-15 {
                break;
            }
        }
        let t = 0.5 * (x + 1.0);
        nodes[i] = t;
        nodes[n - i - 1] = 1.0 - t;
    }
    nodes.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Ok(nodes)
}

fn legendre_eval(n: usize, x: f64) -> (f64, f64) {
    if n == 0 {
        return (1.0, 0.0);
    }
    let mut p0 = 1.0;
    let mut p1 = x;
    if n == 1 {
        return (p1, 1.0);
    }
    for k in 2..=n {
        let kf = k as f64;
        let pn = ((2.0 * kf - 1.0) * x * p1 - (kf - 1.0) * p0) / kf;
        p0 = p1;
        p1 = pn;
    }
    let dp = (n as f64) * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}

/// Monomial coefficients of the Lagrange basis polynomials on `nodes`.
fn lagrange_coefficients(nodes: &[f64]) -> Result<Vec<Vec<f64>>> {
    let degree = nodes.len();
    let mut vandermonde = DMatrix::zeros(degree, degree);
    for (i, &node) in nodes.iter().enumerate() {
        let mut power = 1.0;
        for j in 0..degree {
            vandermonde[(i, j)] = power;
            power *= node;
        }
    }
    let lu = vandermonde.lu();
    if !lu.is_invertible() {
        bail!("Failed to invert Vandermonde matrix for collocation coefficients");
    }
    let mut coeffs = Vec::with_capacity(degree);
    for j in 0..degree {
        let mut rhs = DVector::zeros(degree);
        rhs[j] = 1.0;
        let sol = lu
            .solve(&rhs)
            .ok_or_else(|| anyhow!("Failed to solve for Lagrange coefficients"))?;
        coeffs.push(sol.iter().cloned().collect());
    }
    Ok(coeffs)
}

fn integrate_polynomial(coeffs: &[f64], upper: f64) -> f64 {
    let mut sum = 0.0;
    for (deg, &c) in coeffs.iter().enumerate() {
        let power = upper.powi((deg + 1) as i32);
        sum += c * power / ((deg + 1) as f64);
    }
    sum
}

fn evaluate_polynomial(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, &c| acc * x + c)
}

pub(crate) fn column(m: &DMatrix<f64>, idx: usize) -> &[f64] {
    let rows = m.nrows();
    &m.as_slice()[idx * rows..(idx + 1) * rows]
}

pub(crate) fn column_mut(m: &mut DMatrix<f64>, idx: usize) -> &mut [f64] {
    let rows = m.nrows();
    &mut m.as_mut_slice()[idx * rows..(idx + 1) * rows]
}

/// Mesh, mesh states and stage states of one collocation iterate.
#[derive(Debug, Clone)]
pub(crate) struct Iterate {
    pub mesh: Vec<f64>,
    /// One column per mesh point.
    pub states: DMatrix<f64>,
    /// One column per stage, interval-major.
    pub stages: DMatrix<f64>,
}

impl Iterate {
    /// Builds stage states by linear interpolation between mesh states.
    pub fn linear(mesh: Vec<f64>, states: DMatrix<f64>, coeffs: &CollocationCoefficients) -> Self {
        let dim = states.nrows();
        let intervals = mesh.len() - 1;
        let s = coeffs.stages();
        let mut stages = DMatrix::zeros(dim, intervals * s);
        for i in 0..intervals {
            let current = column(&states, i);
            let next = column(&states, i + 1);
            for (k, &node) in coeffs.nodes.iter().enumerate() {
                let dest = column_mut(&mut stages, i * s + k);
                for d in 0..dim {
                    dest[d] = current[d] + node * (next[d] - current[d]);
                }
            }
        }
        Self {
            mesh,
            states,
            stages,
        }
    }

    pub fn intervals(&self) -> usize {
        self.mesh.len() - 1
    }

    fn stepped(&self, dy: &DVector<f64>, dz: &DMatrix<f64>, lambda: f64) -> Self {
        let mut next = self.clone();
        for (v, d) in next.states.as_mut_slice().iter_mut().zip(dy.iter()) {
            *v += lambda * d;
        }
        for (v, d) in next.stages.as_mut_slice().iter_mut().zip(dz.iter()) {
            *v += lambda * d;
        }
        next
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct NewtonControl {
    pub max_steps: usize,
    pub tolerance: f64,
}

/// Right-hand side evaluated at every stage, one column per stage.
pub(crate) fn stage_slopes<P: BoundaryValueProblem>(
    problem: &P,
    coeffs: &CollocationCoefficients,
    it: &Iterate,
) -> DMatrix<f64> {
    let s = coeffs.stages();
    let mut slopes = DMatrix::zeros(it.states.nrows(), it.stages.ncols());
    for i in 0..it.intervals() {
        let h = it.mesh[i + 1] - it.mesh[i];
        for (k, &node) in coeffs.nodes.iter().enumerate() {
            let idx = i * s + k;
            problem.derivative(
                it.mesh[i] + node * h,
                column(&it.stages, idx),
                column_mut(&mut slopes, idx),
            );
        }
    }
    slopes
}

/// Largest absolute residual of the collocation equations and boundary conditions.
fn residual_norm<P: BoundaryValueProblem>(
    problem: &P,
    coeffs: &CollocationCoefficients,
    it: &Iterate,
    slopes: &DMatrix<f64>,
) -> f64 {
    let dim = problem.dimension();
    let nl = problem.left_conditions();
    let s = coeffs.stages();
    let mut norm: f64 = 0.0;
    let mut finite = true;
    let mut track = |v: f64| {
        if v.is_finite() {
            norm = norm.max(v.abs());
        } else {
            finite = false;
        }
    };

    for i in 0..it.intervals() {
        let h = it.mesh[i + 1] - it.mesh[i];
        let base = column(&it.states, i);
        let next = column(&it.states, i + 1);
        for j in 0..s {
            let z = column(&it.stages, i * s + j);
            for r in 0..dim {
                let mut sum = 0.0;
                for k in 0..s {
                    sum += coeffs.a[j][k] * slopes[(r, i * s + k)];
                }
                track(z[r] - base[r] - h * sum);
            }
        }
        for r in 0..dim {
            let mut sum = 0.0;
            for k in 0..s {
                sum += coeffs.b[k] * slopes[(r, i * s + k)];
            }
            track(next[r] - base[r] - h * sum);
        }
    }

    let mut left = vec![0.0; nl];
    problem.left_residual(column(&it.states, 0), &mut left);
    let mut right = vec![0.0; dim - nl];
    problem.right_residual(column(&it.states, it.intervals()), &mut right);
    for v in left.into_iter().chain(right) {
        track(v);
    }
    if finite {
        norm
    } else {
        f64::NAN
    }
}

fn finite_difference<F>(y: &[f64], rows: usize, mut eval: F) -> DMatrix<f64>
where
    F: FnMut(&[f64], &mut [f64]),
{
    let n = y.len();
    let mut jac = DMatrix::zeros(rows, n);
    let mut shifted = y.to_vec();
    let mut plus = vec![0.0; rows];
    let mut minus = vec![0.0; rows];
    for c in 0..n {
        let delta = 1e-6f64.max(1e-6 * y[c].abs());
        shifted[c] = y[c] + delta;
        eval(&shifted, &mut plus);
        shifted[c] = y[c] - delta;
        eval(&shifted, &mut minus);
        shifted[c] = y[c];
        for r in 0..rows {
            jac[(r, c)] = (plus[r] - minus[r]) / (2.0 * delta);
        }
    }
    jac
}

fn singular(it: &Iterate) -> BvpError {
    BvpError::NotConverged {
        reason: FailureReason::SingularJacobian,
        achieved: f64::INFINITY,
        subintervals: it.intervals(),
    }
}

/// Newton direction for mesh states (`dy`) and stage states (`dz`).
fn newton_direction<P: BoundaryValueProblem>(
    problem: &P,
    coeffs: &CollocationCoefficients,
    it: &Iterate,
    slopes: &DMatrix<f64>,
) -> Result<(DVector<f64>, DMatrix<f64>), BvpError> {
    let n = problem.dimension();
    let nl = problem.left_conditions();
    let s = coeffs.stages();
    let intervals = it.intervals();
    let sn = s * n;
    let size = (intervals + 1) * n;

    let mut system = BandedMatrix::zeros(size, n + nl - 1, 2 * n - 1 - nl);
    let mut rhs = vec![0.0; size];

    let y0 = column(&it.states, 0);
    let mut left = vec![0.0; nl];
    problem.left_residual(y0, &mut left);
    let jac_left = finite_difference(y0, nl, |y, out| problem.left_residual(y, out));
    for r in 0..nl {
        for c in 0..n {
            system.set(r, c, jac_left[(r, c)]);
        }
        rhs[r] = -left[r];
    }

    let mut expansion = DMatrix::zeros(sn, n);
    for j in 0..s {
        for r in 0..n {
            expansion[(j * n + r, r)] = 1.0;
        }
    }

    let mut stage_offsets: Vec<DVector<f64>> = Vec::with_capacity(intervals);
    let mut stage_gains: Vec<DMatrix<f64>> = Vec::with_capacity(intervals);

    for i in 0..intervals {
        let x0 = it.mesh[i];
        let h = it.mesh[i + 1] - x0;
        let base = column(&it.states, i);
        let next = column(&it.states, i + 1);

        let jacobians: Vec<DMatrix<f64>> = (0..s)
            .map(|k| {
                let z = x0 + coeffs.nodes[k] * h;
                finite_difference(column(&it.stages, i * s + k), n, |y, out| {
                    problem.derivative(z, y, out)
                })
            })
            .collect();

        let mut block = DMatrix::identity(sn, sn);
        let mut stage_residual = DVector::zeros(sn);
        for j in 0..s {
            for k in 0..s {
                let scale = h * coeffs.a[j][k];
                for r in 0..n {
                    for c in 0..n {
                        block[(j * n + r, k * n + c)] -= scale * jacobians[k][(r, c)];
                    }
                }
            }
            let z = column(&it.stages, i * s + j);
            for r in 0..n {
                let mut sum = 0.0;
                for k in 0..s {
                    sum += coeffs.a[j][k] * slopes[(r, i * s + k)];
                }
                stage_residual[j * n + r] = z[r] - base[r] - h * sum;
            }
        }

        let lu = block.lu();
        if !lu.is_invertible() {
            return Err(singular(it));
        }
        let offset = lu.solve(&(-stage_residual)).ok_or_else(|| singular(it))?;
        let gain = lu.solve(&expansion).ok_or_else(|| singular(it))?;

        let mut coupling = DMatrix::zeros(n, sn);
        for k in 0..s {
            let scale = h * coeffs.b[k];
            for r in 0..n {
                for c in 0..n {
                    coupling[(r, k * n + c)] = scale * jacobians[k][(r, c)];
                }
            }
        }
        let propagator = DMatrix::<f64>::identity(n, n) + &coupling * &gain;
        let shift = &coupling * &offset;

        let row0 = nl + i * n;
        for r in 0..n {
            let mut sum = 0.0;
            for k in 0..s {
                sum += coeffs.b[k] * slopes[(r, i * s + k)];
            }
            let continuity = next[r] - base[r] - h * sum;
            for c in 0..n {
                system.set(row0 + r, i * n + c, -propagator[(r, c)]);
            }
            system.add(row0 + r, (i + 1) * n + r, 1.0);
            rhs[row0 + r] = -continuity + shift[r];
        }

        stage_offsets.push(offset);
        stage_gains.push(gain);
    }

    let y_end = column(&it.states, intervals);
    let nr = n - nl;
    let mut right = vec![0.0; nr];
    problem.right_residual(y_end, &mut right);
    let jac_right = finite_difference(y_end, nr, |y, out| problem.right_residual(y, out));
    let row0 = nl + intervals * n;
    for r in 0..nr {
        for c in 0..n {
            system.set(row0 + r, intervals * n + c, jac_right[(r, c)]);
        }
        rhs[row0 + r] = -right[r];
    }

    system.solve(&mut rhs).ok_or_else(|| singular(it))?;
    let dy = DVector::from_vec(rhs);

    let mut dz = DMatrix::zeros(n, intervals * s);
    for i in 0..intervals {
        let local = dy.rows(i * n, n);
        let delta = &stage_offsets[i] + &stage_gains[i] * local;
        dz.as_mut_slice()[i * sn..(i + 1) * sn].copy_from_slice(delta.as_slice());
    }
    Ok((dy, dz))
}

/// Damped Newton iteration on a fixed mesh.
///
/// Returns the converged iterate together with its stage slopes.
pub(crate) fn solve_on_mesh<P: BoundaryValueProblem>(
    problem: &P,
    coeffs: &CollocationCoefficients,
    mut it: Iterate,
    control: NewtonControl,
) -> Result<(Iterate, DMatrix<f64>), BvpError> {
    let mut slopes = stage_slopes(problem, coeffs, &it);
    let mut norm = residual_norm(problem, coeffs, &it, &slopes);

    for step in 0..=control.max_steps {
        if !norm.is_finite() {
            return Err(BvpError::NotConverged {
                reason: FailureReason::NonFinite,
                achieved: norm,
                subintervals: it.intervals(),
            });
        }
        if norm <= control.tolerance {
            return Ok((it, slopes));
        }
        if step == control.max_steps {
            break;
        }

        let (dy, dz) = newton_direction(problem, coeffs, &it, &slopes)?;
        let mut lambda = 1.0;
        loop {
            let trial = it.stepped(&dy, &dz, lambda);
            let trial_slopes = stage_slopes(problem, coeffs, &trial);
            let trial_norm = residual_norm(problem, coeffs, &trial, &trial_slopes);
            if trial_norm.is_finite() && (trial_norm < norm || lambda <= MIN_DAMPING) {
                it = trial;
                slopes = trial_slopes;
                norm = trial_norm;
                break;
            }
            if lambda <= MIN_DAMPING {
                return Err(BvpError::NotConverged {
                    reason: FailureReason::NonFinite,
                    achieved: trial_norm,
                    subintervals: it.intervals(),
                });
            }
            lambda *= 0.5;
        }
    }

    Err(BvpError::NotConverged {
        reason: FailureReason::NewtonDiverged,
        achieved: norm,
        subintervals: it.intervals(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gauss_nodes_are_symmetric_and_sum_weights_to_one() {
        for stages in 1..=3 {
            let coeffs = CollocationCoefficients::new(stages).expect("coefficients");
            let sum: f64 = coeffs.b.iter().sum();
            assert!((sum - 1.0).abs() < 1e-14);
            for (k, node) in coeffs.nodes.iter().enumerate() {
                let mirror = coeffs.nodes[stages - 1 - k];
                assert!((node + mirror - 1.0).abs() < 1e-14);
            }
        }
        let midpoint = CollocationCoefficients::new(1).expect("coefficients");
        assert!((midpoint.nodes[0] - 0.5).abs() < 1e-15);
        assert!((midpoint.a[0][0] - 0.5).abs() < 1e-15);
    }

    #[test]
    fn basis_weights_interpolate_nodes() {
        let coeffs = CollocationCoefficients::new(3).expect("coefficients");
        for (k, &node) in coeffs.nodes.iter().enumerate() {
            let weights = coeffs.basis_weights(node);
            for (j, w) in weights.iter().enumerate() {
                let expected = if j == k { 1.0 } else { 0.0 };
                assert!((w - expected).abs() < 1e-12);
            }
        }
        let full = coeffs.integral_weights(1.0);
        for (w, b) in full.iter().zip(coeffs.b.iter()) {
            assert!((w - b).abs() < 1e-15);
        }
    }

    #[test]
    fn zero_stages_are_rejected() {
        let err = CollocationCoefficients::new(0).expect_err("zero stages should fail");
        assert!(err.to_string().contains("at least one stage"));
    }
}
