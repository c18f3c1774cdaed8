//! Linearized 2 -> 2 collision operator on a spectral momentum grid.
//!
//! For each ordered pair of out-of-equilibrium species and each point of
//! the (m, n, j, k) index lattice this crate computes the collision
//! integral C[m,n;j,k]: a five-dimensional Monte Carlo integral of
//! matrix-element-weighted kinematics against Chebyshev-type test
//! functions, with energy-momentum conservation enforced analytically
//! through a delta-function reduction. Grids are evaluated in parallel
//! with deterministic per-point random streams and cooperative
//! cancellation.

pub mod basis;
pub mod collision_element;
pub mod collision_integral;
pub mod constants;
pub mod four_vector;
pub mod grid;
pub mod kinematics;
pub mod matrix_element;
pub mod model_parameters;
pub mod particle;
pub mod storage;
pub mod tensor;
pub mod vegas;

pub use basis::PolynomialBasis;
pub use collision_element::CollisionElement;
pub use collision_integral::{
    CollisionIntegral, CollisionIntegralError, CollisionTensorVerbosity, IntegrandParameters,
    IntegrationOptions,
};
pub use four_vector::FourVector;
pub use grid::{CollisionResultsGrid, GridPoint, GridReduction, PointStatus};
pub use kinematics::{InputsForKinematics, Kinematics};
pub use matrix_element::{MatrixElement, MatrixElementError};
pub use model_parameters::ModelParameters;
pub use particle::{ParticleSpecies, Statistics};
pub use tensor::{CollisionTensor, CollisionTensorError, CollisionTensorResult};
pub use vegas::{IntegrationResult, VegasIntegrator};
