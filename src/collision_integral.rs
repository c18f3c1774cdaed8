use crate::basis::PolynomialBasis;
use crate::collision_element::CollisionElement;
use crate::constants::{
    DEFAULT_ABSOLUTE_ERROR_GOAL, DEFAULT_CALLS, DEFAULT_MAX_INTEGRATION_MOMENTUM,
    DEFAULT_MAX_TRIES, DEFAULT_RELATIVE_ERROR_GOAL,
};
use crate::grid::{CollisionResultsGrid, GridError, GridPoint, GridReduction, PointStatus};
use crate::kinematics::{
    calculate_kinematics, calculate_kinematics_ultrarelativistic, InputsForKinematics,
};
use crate::model_parameters::ModelParameters;
use crate::particle::ParticleSpecies;
use crate::vegas::{IntegrationResult, VegasError, VegasIntegrator};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollisionIntegralError {
    #[error(transparent)]
    Grid(#[from] GridError),

    #[error(transparent)]
    Vegas(#[from] VegasError),
}

/// Options controlling one grid point integration and the grid sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationOptions {
    /// Monte Carlo samples per production run.
    pub calls: usize,
    /// Upper cutoff of the p2 integral, in temperature units.
    pub max_integration_momentum: f64,
    /// Stop when sigma/|mean| falls below this (for nonzero mean).
    pub relative_error_goal: f64,
    /// Stop when sigma falls below this.
    pub absolute_error_goal: f64,
    /// Cap on production runs per grid point.
    pub max_tries: usize,
    /// Use the optimized kinematics for all-ultrarelativistic elements.
    pub optimize_ultrarelativistic: bool,
    /// Grid symmetry exploited by the sweep.
    pub reduction: GridReduction,
}

impl Default for IntegrationOptions {
    fn default() -> Self {
        IntegrationOptions {
            calls: DEFAULT_CALLS,
            max_integration_momentum: DEFAULT_MAX_INTEGRATION_MOMENTUM,
            relative_error_goal: DEFAULT_RELATIVE_ERROR_GOAL,
            absolute_error_goal: DEFAULT_ABSOLUTE_ERROR_GOAL,
            max_tries: DEFAULT_MAX_TRIES,
            optimize_ultrarelativistic: true,
            reduction: GridReduction::None,
        }
    }
}

/// Stdout reporting knobs for grid sweeps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionTensorVerbosity {
    /// Report progress every this many percent of completed points;
    /// zero disables reporting.
    pub progress_report_percentage: f64,
    /// Print every integral result after the sweep.
    pub print_individual_integrals: bool,
}

impl Default for CollisionTensorVerbosity {
    fn default() -> Self {
        CollisionTensorVerbosity {
            progress_report_percentage: 0.0,
            print_individual_integrals: false,
        }
    }
}

/// Everything about a grid point that does not change along the five
/// integration variables: p1 from the grid nodes and the slot-0 test
/// function value at the signed grid coordinates.
#[derive(Debug, Clone, Copy)]
pub struct IntegrandParameters {
    pub m: usize,
    pub n: usize,
    pub rho_z1: f64,
    pub rho_par1: f64,
    pub p_z1: f64,
    pub p_par1: f64,
    pub p1: f64,
    pub tm_tn_p1: f64,
}

/// 2 -> 2 collision integral for one ordered pair of out-of-equilibrium
/// particles.
///
/// Holds the spectral basis and the collision elements targeting the
/// pair, split into ultrarelativistic and general subsets so the UR
/// kinematics can be solved once per sample and shared. The struct is
/// cheap to clone; the grid driver hands each worker its own copy
/// because evaluation reuses scratch buffers.
#[derive(Debug, Clone)]
pub struct CollisionIntegral {
    basis: PolynomialBasis,
    particle_pair: (String, String),
    elements_ultrarelativistic: Vec<CollisionElement>,
    elements_general: Vec<CollisionElement>,
    optimize_ultrarelativistic: bool,
    model_parameters: ModelParameters,
}

impl CollisionIntegral {
    pub fn new(
        basis_size: usize,
        particle_pair: (String, String),
        model_parameters: ModelParameters,
    ) -> Self {
        CollisionIntegral {
            basis: PolynomialBasis::new(basis_size),
            particle_pair,
            elements_ultrarelativistic: Vec::new(),
            elements_general: Vec::new(),
            optimize_ultrarelativistic: true,
            model_parameters,
        }
    }

    pub fn add_collision_element(&mut self, element: CollisionElement) {
        if element.is_ultrarelativistic() {
            self.elements_ultrarelativistic.push(element);
        } else {
            self.elements_general.push(element);
        }
    }

    pub fn particle_pair(&self) -> (&str, &str) {
        (&self.particle_pair.0, &self.particle_pair.1)
    }

    pub fn basis_size(&self) -> usize {
        self.basis.size()
    }

    /// Resize the spectral basis without touching the element lists.
    pub fn change_polynomial_basis(&mut self, new_basis_size: usize) {
        self.basis = PolynomialBasis::new(new_basis_size);
    }

    pub fn is_empty(&self) -> bool {
        self.elements_ultrarelativistic.is_empty() && self.elements_general.is_empty()
    }

    pub fn ultrarelativistic_elements(&self) -> &[CollisionElement] {
        &self.elements_ultrarelativistic
    }

    pub fn general_elements(&self) -> &[CollisionElement] {
        &self.elements_general
    }

    /// Parameter snapshot written to output metadata.
    pub fn model_parameters(&self) -> &ModelParameters {
        &self.model_parameters
    }

    pub fn set_optimize_ultrarelativistic(&mut self, enabled: bool) {
        self.optimize_ultrarelativistic = enabled;
    }

    /// Number of direct integrations a sweep performs under `reduction`.
    pub fn count_independent_integrals(&self, reduction: GridReduction) -> usize {
        reduction.independent_points(self.basis.size()).len()
    }

    /// Propagate catalog or parameter changes into every element. Runs on
    /// the driver thread between evaluations.
    pub fn handle_model_change(
        &mut self,
        particles: &[ParticleSpecies],
        params: &ModelParameters,
    ) {
        for element in self
            .elements_ultrarelativistic
            .iter_mut()
            .chain(self.elements_general.iter_mut())
        {
            element.refresh(particles, params);
        }
        // elements may have changed UR classification with the new masses
        let mut all: Vec<CollisionElement> = Vec::with_capacity(
            self.elements_ultrarelativistic.len() + self.elements_general.len(),
        );
        all.append(&mut self.elements_ultrarelativistic);
        all.append(&mut self.elements_general);
        for element in all {
            self.add_collision_element(element);
        }
        self.model_parameters = params.clone();
    }

    /// Precompute the grid-dependent quantities for one point.
    pub fn integrand_parameters(&self, point: GridPoint) -> IntegrandParameters {
        let rho_z1 = self.basis.rho_z_grid(point.j);
        let rho_par1 = self.basis.rho_par_grid(point.k);
        let p_z1 = self.basis.rho_z_to_p_z(rho_z1);
        let p_par1 = self.basis.rho_par_to_p_par(rho_par1);
        IntegrandParameters {
            m: point.m,
            n: point.n,
            rho_z1,
            rho_par1,
            p_z1,
            p_par1,
            p1: (p_z1 * p_z1 + p_par1 * p_par1).sqrt(),
            tm_tn_p1: self.basis.tm(point.m, rho_z1) * self.basis.ttilde(point.n, rho_par1),
        }
    }

    /// The full collision integrand at one sample of the five
    /// integration variables, summed over all elements and kinematic
    /// branches, including the phase-space normalization.
    pub fn calculate_integrand(
        &mut self,
        p2: f64,
        phi2: f64,
        phi3: f64,
        cos_theta2: f64,
        cos_theta3: f64,
        params: &IntegrandParameters,
    ) -> f64 {
        let inputs = InputsForKinematics::new(
            params.p_z1,
            params.p_par1,
            p2,
            phi2,
            phi3,
            cos_theta2,
            cos_theta3,
        );
        let basis = self.basis;
        let mut total = 0.0;

        if !self.elements_ultrarelativistic.is_empty() {
            if self.optimize_ultrarelativistic {
                // one kinematic solve shared by every UR element
                if let Some(kinematics) = calculate_kinematics_ultrarelativistic(&inputs) {
                    for element in &mut self.elements_ultrarelativistic {
                        total += element.evaluate(
                            &kinematics,
                            &basis,
                            params.m,
                            params.n,
                            params.tm_tn_p1,
                        );
                    }
                }
            } else {
                for element in &mut self.elements_ultrarelativistic {
                    for kinematics in calculate_kinematics(&inputs, element.mass_squared()) {
                        total += element.evaluate(
                            &kinematics,
                            &basis,
                            params.m,
                            params.n,
                            params.tm_tn_p1,
                        );
                    }
                }
            }
        }

        for element in &mut self.elements_general {
            for kinematics in calculate_kinematics(&inputs, element.mass_squared()) {
                total +=
                    element.evaluate(&kinematics, &basis, params.m, params.n, params.tm_tn_p1);
            }
        }

        let two_pi = 2.0 * std::f64::consts::PI;
        total / (two_pi.powi(5) * 8.0)
    }

    fn integration_limits(options: &IntegrationOptions) -> Vec<(f64, f64)> {
        let two_pi = 2.0 * std::f64::consts::PI;
        vec![
            (0.0, options.max_integration_momentum),
            (0.0, two_pi),
            (0.0, two_pi),
            (-1.0, 1.0),
            (-1.0, 1.0),
        ]
    }

    /// Monte Carlo estimate of C[m,n;j,k] at one grid point.
    pub fn integrate(
        &mut self,
        point: GridPoint,
        options: &IntegrationOptions,
        rng: &mut StdRng,
    ) -> Result<IntegrationResult, CollisionIntegralError> {
        if !point.is_valid(self.basis.size()) {
            return Err(GridError::InvalidGridPoint {
                m: point.m,
                n: point.n,
                j: point.j,
                k: point.k,
                basis_size: self.basis.size(),
            }
            .into());
        }
        self.optimize_ultrarelativistic = options.optimize_ultrarelativistic;
        let params = self.integrand_parameters(point);
        let mut vegas = VegasIntegrator::new(Self::integration_limits(options))?;
        let result = vegas.integrate(
            |x| self.calculate_integrand(x[0], x[1], x[2], x[3], x[4], &params),
            rng,
            options.calls,
            options.relative_error_goal,
            options.absolute_error_goal,
            options.max_tries,
        )?;
        Ok(result)
    }

    /// Evaluate every independent grid point in parallel.
    ///
    /// Work units are single points; each worker gets its own clone of
    /// the integral and an RNG stream derived from the master seed and
    /// the point indices, so results do not depend on worker count or
    /// scheduling. The host cancellation callback is polled only on the
    /// driver thread, once per completed-point event; workers pause
    /// until their completion event has been acknowledged before taking
    /// the next unit, so a cancellation always lands between grid
    /// points. Remaining points are returned as `NotEvaluated` and the
    /// grid is flagged cancelled.
    pub fn evaluate_on_grid(
        &self,
        pool: &ThreadPool,
        options: &IntegrationOptions,
        verbosity: &CollisionTensorVerbosity,
        master_seed: u64,
        should_continue: Option<&dyn Fn() -> bool>,
    ) -> Result<CollisionResultsGrid, CollisionIntegralError> {
        let mut grid = CollisionResultsGrid::new(
            self.particle_pair.clone(),
            self.basis.size(),
            options.reduction,
        );
        let points = options.reduction.independent_points(self.basis.size());
        if points.is_empty() {
            return Ok(grid);
        }
        // surface bad options before spawning workers
        VegasIntegrator::new(Self::integration_limits(options))?;

        if let Some(callback) = should_continue {
            if !callback() {
                grid.mark_cancelled();
                return Ok(grid);
            }
        }

        let total = points.len();
        let stop = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);
        let acknowledged = AtomicUsize::new(0);

        let outcomes: Vec<Option<IntegrationResult>> = thread::scope(|scope| {
            let worker_handle = scope.spawn(|| {
                pool.install(|| {
                    points
                        .par_iter()
                        .map(|&point| {
                            if stop.load(Ordering::Relaxed) {
                                return None;
                            }
                            let mut integral = self.clone();
                            let mut rng =
                                StdRng::seed_from_u64(point_stream_seed(master_seed, point));
                            let outcome = integral.integrate(point, options, &mut rng).ok();
                            let event = completed.fetch_add(1, Ordering::AcqRel) + 1;
                            while acknowledged.load(Ordering::Acquire) < event
                                && !stop.load(Ordering::Relaxed)
                            {
                                thread::yield_now();
                            }
                            outcome
                        })
                        .collect()
                })
            });

            let report_step = if verbosity.progress_report_percentage > 0.0 {
                ((total as f64 * verbosity.progress_report_percentage / 100.0).ceil() as usize)
                    .max(1)
            } else {
                usize::MAX
            };

            let mut seen = 0usize;
            loop {
                let done = completed.load(Ordering::Acquire);
                while seen < done {
                    seen += 1;
                    if let Some(callback) = should_continue {
                        if !callback() {
                            stop.store(true, Ordering::Release);
                        }
                    }
                    if seen % report_step == 0 || (report_step != usize::MAX && seen == total) {
                        println!(
                            "collision grid ({}, {}): {}/{} points evaluated",
                            self.particle_pair.0, self.particle_pair.1, seen, total
                        );
                    }
                    acknowledged.store(seen, Ordering::Release);
                }
                if worker_handle.is_finished() {
                    break;
                }
                thread::sleep(Duration::from_micros(200));
            }
            match worker_handle.join() {
                Ok(outcomes) => outcomes,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        });

        for (&point, outcome) in points.iter().zip(outcomes.iter()) {
            if let Some(result) = outcome {
                let status = if result.converged {
                    PointStatus::Converged
                } else {
                    PointStatus::NotConverged
                };
                grid.set_point(point, result.result, result.error, status)?;
            }
        }
        if stop.load(Ordering::Acquire) {
            grid.mark_cancelled();
        }
        grid.apply_reflect_j();

        if verbosity.print_individual_integrals {
            for point in grid.points() {
                let value = grid.result(point)?;
                let error = grid.error(point)?;
                let status = grid.status(point)?;
                println!(
                    "C[{},{};{},{}] = {:.6e} +- {:.6e} ({})",
                    point.m,
                    point.n,
                    point.j,
                    point.k,
                    value,
                    error,
                    status.label()
                );
            }
        }

        Ok(grid)
    }
}

/// Deterministic per-point RNG stream: SplitMix64 finalizer over the
/// packed indices, mixed with the master seed.
fn point_stream_seed(master_seed: u64, point: GridPoint) -> u64 {
    let packed = ((point.m as u64) << 48)
        | ((point.n as u64) << 32)
        | ((point.j as u64) << 16)
        | point.k as u64;
    let mut z = master_seed ^ packed.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}
