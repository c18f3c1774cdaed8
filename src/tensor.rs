use crate::collision_element::CollisionElement;
use crate::collision_integral::{
    CollisionIntegral, CollisionIntegralError, CollisionTensorVerbosity, IntegrationOptions,
};
use crate::grid::CollisionResultsGrid;
use crate::matrix_element::{parse_matrix_element_file, MatrixElementError};
use crate::model_parameters::{ModelParameters, ModelParametersError};
use crate::particle::ParticleSpecies;
use crate::storage::{write_results_grid, StorageError};
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CollisionTensorError {
    #[error("Particle '{0}' is already registered")]
    DuplicateParticle(String),

    #[error("Particle '{0}' is not registered")]
    UnregisteredParticle(String),

    #[error("No collision integral cached for pair ({particle1}, {particle2})")]
    UnknownParticlePair {
        particle1: String,
        particle2: String,
    },

    #[error("Matrix element file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Matrix element file has not been set")]
    MatrixElementFileNotSet,

    #[error("Tensor is busy with a grid evaluation")]
    BusyTensor,

    #[error(transparent)]
    Parameters(#[from] ModelParametersError),

    #[error(transparent)]
    MatrixElements(#[from] MatrixElementError),

    #[error(transparent)]
    Integration(#[from] CollisionIntegralError),

    #[error("Failed to build thread pool")]
    ThreadPool(#[from] ThreadPoolBuildError),
}

/// Result of a full-tensor evaluation: one grid per cached pair, plus
/// any persistence failures (I/O degrades to the in-memory result).
#[derive(Debug)]
pub struct CollisionTensorResult {
    grids: Vec<CollisionResultsGrid>,
    io_errors: Vec<StorageError>,
}

impl CollisionTensorResult {
    pub fn grids(&self) -> &[CollisionResultsGrid] {
        &self.grids
    }

    pub fn grid(&self, particle1: &str, particle2: &str) -> Option<&CollisionResultsGrid> {
        self.grids
            .iter()
            .find(|g| g.particle_pair() == (particle1, particle2))
    }

    pub fn is_empty(&self) -> bool {
        self.grids.is_empty()
    }

    pub fn cancelled(&self) -> bool {
        self.grids.iter().any(|g| g.cancelled())
    }

    pub fn io_errors(&self) -> &[StorageError] {
        &self.io_errors
    }
}

/// Main interface to collision integral computation.
///
/// Owns the particle catalog (arena indexed by registration order; the
/// matrix-element file refers to particles by these indices), the model
/// parameter map, and the per-pair integral cache built from the
/// matrix-element file. Mutators propagate changes into the cache on the
/// calling thread between evaluations and fail with `BusyTensor` while a
/// grid evaluation is in flight.
pub struct CollisionTensor {
    basis_size: usize,
    particles: Vec<ParticleSpecies>,
    particle_index: BTreeMap<String, usize>,
    parameters: ModelParameters,
    cached_integrals: BTreeMap<(String, String), CollisionIntegral>,
    default_options: IntegrationOptions,
    default_verbosity: CollisionTensorVerbosity,
    output_directory: PathBuf,
    matrix_element_file: Option<PathBuf>,
    master_seed: u64,
    thread_pool: ThreadPool,
    busy: AtomicBool,
    should_continue: Option<Box<dyn Fn() -> bool>>,
}

impl CollisionTensor {
    pub fn new(basis_size: usize) -> Result<Self, CollisionTensorError> {
        let default_num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let thread_pool = ThreadPoolBuilder::new()
            .num_threads(default_num_threads)
            .build()?;
        Ok(CollisionTensor {
            basis_size,
            particles: Vec::new(),
            particle_index: BTreeMap::new(),
            parameters: ModelParameters::new(),
            cached_integrals: BTreeMap::new(),
            default_options: IntegrationOptions::default(),
            default_verbosity: CollisionTensorVerbosity::default(),
            output_directory: PathBuf::from("."),
            matrix_element_file: None,
            master_seed: 0,
            thread_pool,
            busy: AtomicBool::new(false),
            should_continue: None,
        })
    }

    fn ensure_not_busy(&self) -> Result<(), CollisionTensorError> {
        if self.busy.load(Ordering::Acquire) {
            Err(CollisionTensorError::BusyTensor)
        } else {
            Ok(())
        }
    }

    pub fn basis_size(&self) -> usize {
        self.basis_size
    }

    /// Master seed for all Monte Carlo streams.
    pub fn set_seed(&mut self, seed: u64) {
        self.master_seed = seed;
    }

    pub fn seed(&self) -> u64 {
        self.master_seed
    }

    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        self.thread_pool = ThreadPoolBuilder::new().num_threads(num_threads).build()?;
        Ok(())
    }

    pub fn set_default_integration_options(&mut self, options: IntegrationOptions) {
        self.default_options = options;
    }

    pub fn set_default_verbosity(&mut self, verbosity: CollisionTensorVerbosity) {
        self.default_verbosity = verbosity;
    }

    pub fn set_output_directory(&mut self, directory: impl Into<PathBuf>) {
        self.output_directory = directory.into();
    }

    /// Install (or clear) the host cancellation callback. It is polled
    /// only on the driver thread, between grid points.
    pub fn set_cancellation_callback(&mut self, callback: Option<Box<dyn Fn() -> bool>>) {
        self.should_continue = callback;
    }

    /// Register a new species. The registration order defines the
    /// particle indices used by the matrix-element file.
    pub fn define_particle(
        &mut self,
        particle: ParticleSpecies,
    ) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        if self.particle_index.contains_key(&particle.name) {
            return Err(CollisionTensorError::DuplicateParticle(particle.name));
        }
        self.particle_index
            .insert(particle.name.clone(), self.particles.len());
        self.particles.push(particle);
        Ok(())
    }

    pub fn define_variable(
        &mut self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        self.parameters.define(name, value)?;
        Ok(())
    }

    pub fn define_variables(
        &mut self,
        variables: &BTreeMap<String, f64>,
    ) -> Result<(), CollisionTensorError> {
        for (name, value) in variables {
            self.define_variable(name.clone(), *value)?;
        }
        Ok(())
    }

    /// Assign a new value to a defined symbol and rebind every cached
    /// matrix element. Assigning the stored value is a no-op.
    pub fn set_variable(&mut self, name: &str, value: f64) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        let changed = self.parameters.set(name, value)?;
        if changed {
            self.propagate_model_change();
        }
        Ok(())
    }

    pub fn set_variables(
        &mut self,
        values: &BTreeMap<String, f64>,
    ) -> Result<(), CollisionTensorError> {
        for (name, value) in values {
            self.set_variable(name, *value)?;
        }
        Ok(())
    }

    /// Update vacuum and thermal mass squares, in temperature units.
    /// Only particles named in the maps are touched; unknown names fail.
    pub fn update_particle_masses(
        &mut self,
        msq_vacuum: &BTreeMap<String, f64>,
        msq_thermal: &BTreeMap<String, f64>,
    ) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        for name in msq_vacuum.keys().chain(msq_thermal.keys()) {
            if !self.particle_index.contains_key(name) {
                return Err(CollisionTensorError::UnregisteredParticle(name.clone()));
            }
        }
        for (name, &value) in msq_vacuum {
            let index = self.particle_index[name];
            self.particles[index].msq_vacuum = value;
        }
        for (name, &value) in msq_thermal {
            let index = self.particle_index[name];
            self.particles[index].msq_thermal = value;
        }
        self.propagate_model_change();
        Ok(())
    }

    fn propagate_model_change(&mut self) {
        let particles = &self.particles;
        let parameters = &self.parameters;
        for integral in self.cached_integrals.values_mut() {
            integral.handle_model_change(particles, parameters);
        }
    }

    /// Point the tensor at a matrix-element file. Returns whether the
    /// file exists; the path is stored either way.
    pub fn set_matrix_element_file(&mut self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        let exists = path.is_file();
        self.matrix_element_file = Some(path);
        exists
    }

    pub fn particles(&self) -> &[ParticleSpecies] {
        &self.particles
    }

    pub fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    pub fn cached_integral(
        &self,
        particle1: &str,
        particle2: &str,
    ) -> Option<&CollisionIntegral> {
        self.cached_integrals
            .get(&(particle1.to_string(), particle2.to_string()))
    }

    /// Drop all cached collision integral objects.
    pub fn clear_integral_cache(&mut self) {
        self.cached_integrals.clear();
    }

    /// Parse the matrix-element file and build one collision integral
    /// per ordered pair of out-of-equilibrium particles. Clears any
    /// previously cached integrals.
    pub fn setup_collision_integrals(
        &mut self,
        verbose: bool,
    ) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        let path = self
            .matrix_element_file
            .clone()
            .ok_or(CollisionTensorError::MatrixElementFileNotSet)?;
        if !path.is_file() {
            return Err(CollisionTensorError::FileNotFound(path));
        }
        let parsed = parse_matrix_element_file(&path, &self.parameters, self.particles.len())?;

        self.cached_integrals.clear();
        let off_equilibrium: Vec<usize> = (0..self.particles.len())
            .filter(|&i| !self.particles[i].in_equilibrium)
            .collect();

        for &index1 in &off_equilibrium {
            for &index2 in &off_equilibrium {
                let name1 = self.particles[index1].name.clone();
                let name2 = self.particles[index2].name.clone();
                let mut integral = CollisionIntegral::new(
                    self.basis_size,
                    (name1.clone(), name2.clone()),
                    self.parameters.clone(),
                );
                for declaration in &parsed {
                    let indices = declaration.particle_indices;
                    if indices[0] != index1 || !indices.contains(&index2) {
                        continue;
                    }
                    integral.add_collision_element(CollisionElement::new(
                        indices,
                        declaration.matrix_element.clone(),
                        &self.particles,
                    ));
                }
                if verbose {
                    println!(
                        "collision pair ({}, {}): {} elements",
                        name1,
                        name2,
                        integral.ultrarelativistic_elements().len()
                            + integral.general_elements().len()
                    );
                }
                self.cached_integrals.insert((name1, name2), integral);
            }
        }
        Ok(())
    }

    /// Resize the spectral basis in every cached integral without
    /// rebuilding element lists.
    pub fn change_polynomial_basis_size(
        &mut self,
        new_basis_size: usize,
    ) -> Result<(), CollisionTensorError> {
        self.ensure_not_busy()?;
        self.basis_size = new_basis_size;
        for integral in self.cached_integrals.values_mut() {
            integral.change_polynomial_basis(new_basis_size);
        }
        Ok(())
    }

    fn lookup_pair(
        &self,
        particle1: &str,
        particle2: &str,
    ) -> Result<&CollisionIntegral, CollisionTensorError> {
        for name in [particle1, particle2] {
            if !self.particle_index.contains_key(name) {
                return Err(CollisionTensorError::UnregisteredParticle(name.to_string()));
            }
        }
        self.cached_integral(particle1, particle2)
            .ok_or_else(|| CollisionTensorError::UnknownParticlePair {
                particle1: particle1.to_string(),
                particle2: particle2.to_string(),
            })
    }

    /// Evaluate the cached integral for (particle1, particle2) on the
    /// whole grid. Defaults are used for whichever of options/verbosity
    /// is not given.
    pub fn evaluate_collisions_grid(
        &self,
        particle1: &str,
        particle2: &str,
        options: Option<&IntegrationOptions>,
        verbosity: Option<&CollisionTensorVerbosity>,
    ) -> Result<CollisionResultsGrid, CollisionTensorError> {
        let integral = self.lookup_pair(particle1, particle2)?;
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(CollisionTensorError::BusyTensor);
        }
        let outcome = integral.evaluate_on_grid(
            &self.thread_pool,
            options.unwrap_or(&self.default_options),
            verbosity.unwrap_or(&self.default_verbosity),
            self.master_seed,
            self.should_continue.as_deref(),
        );
        self.busy.store(false, Ordering::Release);
        Ok(outcome?)
    }

    /// Evaluate every cached pair and persist each grid to the output
    /// directory. Persistence failures do not abort: the in-memory
    /// result is returned with the errors attached. A cancellation stops
    /// the sweep after the pair in which it fired.
    pub fn calculate_all_integrals(
        &self,
        verbose: bool,
    ) -> Result<CollisionTensorResult, CollisionTensorError> {
        let mut grids = Vec::with_capacity(self.cached_integrals.len());
        for ((name1, name2), _) in self.cached_integrals.iter() {
            let grid = self.evaluate_collisions_grid(name1, name2, None, None)?;
            if verbose {
                println!(
                    "pair ({}, {}): {}/{} points evaluated, all converged: {}",
                    name1,
                    name2,
                    grid.evaluated_count(),
                    grid.points().len(),
                    grid.all_converged()
                );
            }
            let cancelled = grid.cancelled();
            grids.push(grid);
            if cancelled {
                break;
            }
        }

        let mut io_errors = Vec::new();
        for grid in &grids {
            if let Err(error) =
                write_results_grid(&self.output_directory, grid, self.master_seed, &self.parameters)
            {
                io_errors.push(error);
            }
        }
        Ok(CollisionTensorResult { grids, io_errors })
    }

    /// Number of direct integrations for a full tensor of `basis_size`
    /// polynomials and `out_of_eq_count` off-equilibrium species,
    /// without grid reduction.
    pub fn count_independent_integrals(basis_size: usize, out_of_eq_count: usize) -> usize {
        let per_direction = basis_size.saturating_sub(1);
        per_direction.pow(4) * out_of_eq_count * out_of_eq_count
    }

    /// Convenience wrapper for reading output paths in callers.
    pub fn output_directory(&self) -> &Path {
        &self.output_directory
    }
}
