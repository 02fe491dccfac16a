/// A two-point boundary value problem `y' = f(z, y)` on `[z_left, z_right]`
/// with separated boundary conditions.
///
/// The first `left_conditions()` residuals are imposed at the left end and
/// the remaining `dimension() - left_conditions()` at the right end. A
/// solution drives every residual to zero.
pub trait BoundaryValueProblem {
    /// Returns the dimension of the state vector.
    fn dimension(&self) -> usize;

    /// Number of residuals imposed at the left end.
    fn left_conditions(&self) -> usize;

    /// Evaluates the right-hand side `dy/dz` at position `z` into `out`.
    fn derivative(&self, z: f64, y: &[f64], out: &mut [f64]);

    /// Writes the `left_conditions()` left-end residuals into `out`.
    fn left_residual(&self, y: &[f64], out: &mut [f64]);

    /// Writes the remaining right-end residuals into `out`.
    fn right_residual(&self, y: &[f64], out: &mut [f64]);
}
