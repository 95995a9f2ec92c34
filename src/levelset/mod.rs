//! Level set evolution
//!
//! - `parameters`: snake weights, exponents and solver selection
//! - `function`: per-voxel update and time step rule
//! - `layers`: shared sparse layer bookkeeping
//! - `solver`: numerical backends
//! - `driver`: iteration state machine

pub mod parameters;
pub mod function;
pub mod layers;
pub mod solver;
pub mod driver;

pub use parameters::*;
pub use function::*;
pub use solver::{IterationReport, Solver};
pub use driver::*;
