/// The `usadel_core` crate solves the quasiclassical diffusion equations of a
/// chain of materials in the Riccati parametrization.
///
/// Key components:
/// - **Spin and Green states**: `SpinState` (2x2 complex matrix) and `GreenState` (`g`, `gt` and their derivatives, packed to 32 reals).
/// - **BVP**: A Gauss-Legendre collocation solver with Newton iteration, banded elimination and adaptive mesh bisection.
/// - **Material**: Energy and location axes, a state grid and a `Physics` plugin; `update` solves every energy in turn.
/// - **Chain**: An arena of materials linked left to right, with sweeps until the states stop changing.
/// - **Diagnostics**: Density-of-states output.
pub mod bvp;
pub mod chain;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod green;
pub mod grid;
pub mod material;
pub mod physics;
pub mod spin;
pub mod traits;

pub use chain::{Chain, MaterialId, SweepSummary};
pub use config::{
    ErrorControl, FailurePolicy, MaterialConfig, Order, PhysicalParams, SolverConfig,
    SweepSettings, Verbosity,
};
pub use error::{BvpError, ConvergenceError, FailureReason, MaterialError};
pub use green::GreenState;
pub use grid::StateGrid;
pub use material::{Boundaries, Material, MaterialCore, UpdateReport};
pub use physics::{Coupling, Physics, Side};
pub use spin::SpinState;
