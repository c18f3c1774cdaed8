//! Numerical thresholds shared across the crate.
//!
//! These reflect double-precision limits rather than physics; keeping them
//! in one place avoids scattering magic numbers through the solvers.

/// Guard against division by values indistinguishable from zero.
pub const SMALL_NUMBER: f64 = 1e-50;

/// Mass-squared values below this are treated as massless in kinematic
/// prefactors and in g'(p3). Regularization threshold, not an exact limit.
pub const MASS_SQUARED_LOWER_BOUND: f64 = 1e-14;

/// Accepted roots of g(p3) must satisfy |g(p3)| <= tol * max(1, |kappa|).
pub const ROOT_RESIDUAL_TOLERANCE: f64 = 1e-8;

/// The atanh momentum maps diverge at |rho| = 1; arguments are clamped to
/// [-1 + eps, 1 - eps].
pub const RHO_CLAMP_EPSILON: f64 = 1e-12;

/// Default number of Monte Carlo samples per production run.
pub const DEFAULT_CALLS: usize = 50_000;

/// Default upper cutoff for the p2 momentum integral, in temperature units.
pub const DEFAULT_MAX_INTEGRATION_MOMENTUM: f64 = 20.0;

/// Default relative error goal for a single grid point.
pub const DEFAULT_RELATIVE_ERROR_GOAL: f64 = 1e-2;

/// Default absolute error goal for a single grid point.
pub const DEFAULT_ABSOLUTE_ERROR_GOAL: f64 = 0.0;

/// Default cap on production runs per grid point.
pub const DEFAULT_MAX_TRIES: usize = 50;
