//! Per-material configuration.
//!
//! Everything here is instance-scoped: each `Material` owns its own
//! `PhysicalParams` and `SolverConfig`, there is no process-wide solver state.

use crate::error::MaterialError;
use serde::{Deserialize, Serialize};

/// Order of the one-step collocation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum Order {
    Second,
    Fourth,
    Sixth,
}

impl Order {
    /// Number of Gauss-Legendre stages per interval.
    pub fn stages(self) -> usize {
        match self {
            Order::Second => 1,
            Order::Fourth => 2,
            Order::Sixth => 3,
        }
    }

    pub fn value(self) -> u32 {
        match self {
            Order::Second => 2,
            Order::Fourth => 4,
            Order::Sixth => 6,
        }
    }
}

impl TryFrom<u32> for Order {
    type Error = MaterialError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(Order::Second),
            4 => Ok(Order::Fourth),
            6 => Ok(Order::Sixth),
            other => Err(MaterialError::InvalidConfiguration(format!(
                "order must be 2, 4 or 6 (got {other})"
            ))),
        }
    }
}

impl From<Order> for u32 {
    fn from(order: Order) -> u32 {
        order.value()
    }
}

/// How the solver decides that a mesh is fine enough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ErrorControl {
    /// Scaled defect of the continuous collocation solution.
    Defect,
    /// Richardson estimate of the global error.
    GlobalError,
    /// Defect control until satisfied, then global error control.
    DefectThenGlobal,
    /// Defect and global error must both be below tolerance.
    DefectAndGlobal,
}

impl ErrorControl {
    pub fn value(self) -> u32 {
        match self {
            ErrorControl::Defect => 1,
            ErrorControl::GlobalError => 2,
            ErrorControl::DefectThenGlobal => 3,
            ErrorControl::DefectAndGlobal => 4,
        }
    }
}

impl TryFrom<u32> for ErrorControl {
    type Error = MaterialError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorControl::Defect),
            2 => Ok(ErrorControl::GlobalError),
            3 => Ok(ErrorControl::DefectThenGlobal),
            4 => Ok(ErrorControl::DefectAndGlobal),
            other => Err(MaterialError::InvalidConfiguration(format!(
                "error control mode must be 1, 2, 3 or 4 (got {other})"
            ))),
        }
    }
}

impl From<ErrorControl> for u32 {
    fn from(mode: ErrorControl) -> u32 {
        mode.value()
    }
}

/// Log verbosity of one material and its solves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Verbosity {
    /// Nothing, not even warnings.
    Silent,
    /// Warnings only.
    Quiet,
    /// Adds per-update and refinement messages.
    Normal,
    /// Adds per-energy and per-iteration messages.
    Detailed,
}

impl Verbosity {
    pub fn warnings(self) -> bool {
        self >= Verbosity::Quiet
    }

    pub fn debug(self) -> bool {
        self >= Verbosity::Normal
    }

    pub fn trace(self) -> bool {
        self >= Verbosity::Detailed
    }
}

impl TryFrom<i32> for Verbosity {
    type Error = MaterialError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Verbosity::Silent),
            0 => Ok(Verbosity::Quiet),
            1 => Ok(Verbosity::Normal),
            2 => Ok(Verbosity::Detailed),
            other => Err(MaterialError::InvalidConfiguration(format!(
                "verbosity must be between -1 and 2 (got {other})"
            ))),
        }
    }
}

impl From<Verbosity> for i32 {
    fn from(v: Verbosity) -> i32 {
        match v {
            Verbosity::Silent => -1,
            Verbosity::Quiet => 0,
            Verbosity::Normal => 1,
            Verbosity::Detailed => 2,
        }
    }
}

/// What `Material::update` does when the solve for one energy fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the error immediately.
    Abort,
    /// Keep the previous state for that energy and carry on.
    Skip,
    /// Retry with the tolerance multiplied by `factor`, at most `attempts` times.
    Relax { factor: f64, attempts: usize },
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Abort
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalParams {
    pub thouless: f64,
    pub scattering: f64,
}

impl Default for PhysicalParams {
    fn default() -> Self {
        Self {
            thouless: 1.0,
            scattering: 0.01,
        }
    }
}

impl PhysicalParams {
    pub fn validate(&self) -> Result<(), MaterialError> {
        if !(self.thouless.is_finite() && self.thouless > 0.0) {
            return Err(MaterialError::InvalidConfiguration(format!(
                "thouless energy must be positive (got {})",
                self.thouless
            )));
        }
        if !self.scattering.is_finite() {
            return Err(MaterialError::InvalidConfiguration(
                "scattering rate must be finite".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Upper bound on mesh growth: at most `positions * mesh_scaling` subintervals.
    pub mesh_scaling: usize,
    pub order: Order,
    pub error_control: ErrorControl,
    pub tolerance: f64,
    pub verbosity: Verbosity,
    pub failure_policy: FailurePolicy,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            mesh_scaling: 128,
            order: Order::Fourth,
            error_control: ErrorControl::GlobalError,
            tolerance: 1e-6,
            verbosity: Verbosity::Quiet,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), MaterialError> {
        if !self.mesh_scaling.is_power_of_two() {
            return Err(MaterialError::InvalidConfiguration(format!(
                "mesh scaling must be a power of two (got {})",
                self.mesh_scaling
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(MaterialError::InvalidConfiguration(format!(
                "tolerance must be positive (got {})",
                self.tolerance
            )));
        }
        if let FailurePolicy::Relax { factor, attempts } = self.failure_policy {
            if !(factor.is_finite() && factor > 1.0) || attempts == 0 {
                return Err(MaterialError::InvalidConfiguration(format!(
                    "relax policy needs factor > 1 and at least one attempt \
                     (got factor {factor}, attempts {attempts})"
                )));
            }
        }
        Ok(())
    }
}

/// Flat, serde-friendly view of every per-material setting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialConfig {
    pub thouless: f64,
    pub scattering: f64,
    pub mesh_scaling: usize,
    pub order: Order,
    pub error_control: ErrorControl,
    pub tolerance: f64,
    pub verbosity: Verbosity,
    pub failure_policy: FailurePolicy,
}

impl Default for MaterialConfig {
    fn default() -> Self {
        let params = PhysicalParams::default();
        let solver = SolverConfig::default();
        Self {
            thouless: params.thouless,
            scattering: params.scattering,
            mesh_scaling: solver.mesh_scaling,
            order: solver.order,
            error_control: solver.error_control,
            tolerance: solver.tolerance,
            verbosity: solver.verbosity,
            failure_policy: solver.failure_policy,
        }
    }
}

impl MaterialConfig {
    pub fn validate(&self) -> Result<(), MaterialError> {
        self.split().map(|_| ())
    }

    /// Validates and splits the configuration into its two halves.
    pub fn split(&self) -> Result<(PhysicalParams, SolverConfig), MaterialError> {
        let params = PhysicalParams {
            thouless: self.thouless,
            scattering: self.scattering,
        };
        let solver = SolverConfig {
            mesh_scaling: self.mesh_scaling,
            order: self.order,
            error_control: self.error_control,
            tolerance: self.tolerance,
            verbosity: self.verbosity,
            failure_policy: self.failure_policy,
        };
        params.validate()?;
        solver.validate()?;
        Ok((params, solver))
    }
}

/// Settings for `Chain::converge`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SweepSettings {
    pub max_sweeps: usize,
    pub threshold: f64,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            max_sweeps: 100,
            threshold: 1e-6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = MaterialConfig::default();
        assert_eq!(config.thouless, 1.0);
        assert_eq!(config.scattering, 0.01);
        assert_eq!(config.mesh_scaling, 128);
        assert_eq!(config.order, Order::Fourth);
        assert_eq!(config.error_control, ErrorControl::GlobalError);
        assert_eq!(config.tolerance, 1e-6);
        assert_eq!(config.verbosity, Verbosity::Quiet);
        assert!(config.split().is_ok());
    }

    #[test]
    fn order_and_error_control_reject_unknown_values() {
        assert!(matches!(
            Order::try_from(3),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            ErrorControl::try_from(5),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            Verbosity::try_from(3),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        assert_eq!(Order::try_from(6).expect("valid order").stages(), 3);
    }

    #[test]
    fn verbosity_levels_gate_log_output() {
        let gates = |v: Verbosity| (v.warnings(), v.debug(), v.trace());
        assert_eq!(gates(Verbosity::Silent), (false, false, false));
        assert_eq!(gates(Verbosity::Quiet), (true, false, false));
        assert_eq!(gates(Verbosity::Normal), (true, true, false));
        assert_eq!(gates(Verbosity::Detailed), (true, true, true));
        assert_eq!(Verbosity::try_from(-1).expect("silent"), Verbosity::Silent);
        assert_eq!(i32::from(Verbosity::Detailed), 2);
    }

    #[test]
    fn json_config_fills_missing_fields_with_defaults() {
        let config: MaterialConfig =
            serde_json::from_str(r#"{ "order": 6, "error_control": 3, "scattering": 0.05 }"#)
                .expect("config should parse");
        assert_eq!(config.order, Order::Sixth);
        assert_eq!(config.error_control, ErrorControl::DefectThenGlobal);
        assert_eq!(config.scattering, 0.05);
        assert_eq!(config.mesh_scaling, 128);
    }

    #[test]
    fn json_config_rejects_invalid_order() {
        let err = serde_json::from_str::<MaterialConfig>(r#"{ "order": 5 }"#)
            .expect_err("order 5 should be rejected");
        assert!(err.to_string().contains("order must be 2, 4 or 6"), "{err}");
    }

    #[test]
    fn split_rejects_bad_mesh_scaling_and_tolerance() {
        let config = MaterialConfig {
            mesh_scaling: 100,
            ..MaterialConfig::default()
        };
        assert!(matches!(
            config.split(),
            Err(MaterialError::InvalidConfiguration(_))
        ));
        let config = MaterialConfig {
            tolerance: 0.0,
            ..MaterialConfig::default()
        };
        assert!(config.split().is_err());
        let config = MaterialConfig {
            failure_policy: FailurePolicy::Relax {
                factor: 0.5,
                attempts: 2,
            },
            ..MaterialConfig::default()
        };
        assert!(config.split().is_err());
    }
}
