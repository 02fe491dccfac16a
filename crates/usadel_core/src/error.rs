use crate::chain::MaterialId;
use std::fmt;
use thiserror::Error;

/// Why a boundary-value solve stopped without meeting its tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// Newton iteration did not reach the residual target.
    NewtonDiverged,
    /// A collocation block or the condensed system could not be factorized.
    SingularJacobian,
    /// Meeting the tolerance would need more subintervals than allowed.
    MeshLimit,
    /// The ODE or boundary functions produced NaN or infinity.
    NonFinite,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FailureReason::NewtonDiverged => "Newton iteration diverged",
            FailureReason::SingularJacobian => "singular Jacobian",
            FailureReason::MeshLimit => "mesh growth budget exhausted",
            FailureReason::NonFinite => "non-finite values encountered",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Error)]
pub enum BvpError {
    #[error("invalid boundary value problem: {0}")]
    InvalidInput(String),
    #[error("{reason} with {subintervals} subintervals (estimated error {achieved:e})")]
    NotConverged {
        reason: FailureReason,
        achieved: f64,
        subintervals: usize,
    },
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}

/// A solve that failed for one energy index of one update.
#[derive(Debug, Clone, Error)]
#[error(
    "no convergence at energy index {energy_index}: {reason} \
     (estimated error {achieved:e}, tolerance {tolerance:e}, {subintervals} subintervals)"
)]
pub struct ConvergenceError {
    pub energy_index: usize,
    pub reason: FailureReason,
    pub achieved: f64,
    pub tolerance: f64,
    pub subintervals: usize,
}

#[derive(Debug, Error)]
pub enum MaterialError {
    #[error("state grid shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error(transparent)]
    Convergence(#[from] ConvergenceError),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("no material with id {0}")]
    UnknownMaterial(MaterialId),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MaterialError {
    pub(crate) fn from_bvp(err: BvpError, energy_index: usize, tolerance: f64) -> Self {
        match err {
            BvpError::NotConverged {
                reason,
                achieved,
                subintervals,
            } => MaterialError::Convergence(ConvergenceError {
                energy_index,
                reason,
                achieved,
                tolerance,
                subintervals,
            }),
            BvpError::InvalidInput(msg) => MaterialError::InvalidConfiguration(msg),
            BvpError::Setup(err) => MaterialError::InvalidConfiguration(format!("{err:#}")),
        }
    }
}
