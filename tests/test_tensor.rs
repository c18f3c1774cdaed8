use boltzmann_collision::collision_integral::IntegrationOptions;
use boltzmann_collision::grid::{GridPoint, GridReduction, PointStatus};
use boltzmann_collision::particle::{ParticleSpecies, Statistics};
use boltzmann_collision::storage::read_metadata;
use boltzmann_collision::tensor::{CollisionTensor, CollisionTensorError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn write_file(name: &str, contents: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("bc_tensor_{}_{}", std::process::id(), name));
    std::fs::write(&path, contents).unwrap();
    path
}

fn out_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("bc_out_{}_{}", std::process::id(), name))
}

fn ur_species(name: &str) -> ParticleSpecies {
    ParticleSpecies::new(name, Statistics::Boson, false, true, 0.0, 0.0)
}

fn scenario_options() -> IntegrationOptions {
    IntegrationOptions {
        calls: 20_000,
        ..IntegrationOptions::default()
    }
}

#[test]
fn test_empty_tensor_evaluates_to_empty_result() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_output_directory(out_dir("empty"));
    tensor.set_seed(0);
    let result = tensor.calculate_all_integrals(false).unwrap();
    assert!(result.is_empty());
    assert!(result.io_errors().is_empty());
    assert!(!result.cancelled());
}

#[test]
fn test_single_ur_species_diagonal_pair() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("diag.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let options = scenario_options();
    let grid = tensor
        .evaluate_collisions_grid("top", "top", Some(&options), None)
        .unwrap();

    assert!(!grid.cancelled());
    for point in grid.points() {
        let value = grid.result(point).unwrap();
        let error = grid.error(point).unwrap();
        assert!(value.is_finite());
        assert_eq!(grid.status(point).unwrap(), PointStatus::Converged);
        assert!(
            error <= 0.05 * value.abs(),
            "point {:?}: {} +- {}",
            point,
            value,
            error
        );
    }
}

#[test]
fn test_grid_scales_with_coupling_parameter() {
    let file = write_file("coupling.txt", "M[0,1,0,1] -> gs^4\n");

    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor.define_particle(ur_species("quark")).unwrap();
    tensor.define_particle(ur_species("gluon")).unwrap();
    tensor.define_variable("gs", 1.2).unwrap();
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let options = scenario_options();
    let strong = tensor
        .evaluate_collisions_grid("quark", "gluon", Some(&options), None)
        .unwrap();

    tensor.set_variable("gs", 1.0).unwrap();
    let unit = tensor
        .evaluate_collisions_grid("quark", "gluon", Some(&options), None)
        .unwrap();

    // the amplitude is linear in gs^4; with identical random streams the
    // two grids differ by the exact coupling ratio
    let ratio = 1.2f64.powi(4);
    for point in strong.points() {
        let lhs = strong.result(point).unwrap();
        let rhs = ratio * unit.result(point).unwrap();
        assert!(
            (lhs - rhs).abs() <= 1e-6 * rhs.abs().max(1e-12),
            "point {:?}: {} vs {}",
            point,
            lhs,
            rhs
        );
    }
}

#[test]
fn test_non_convergence_is_flagged_not_fatal() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor
        .define_particle(ParticleSpecies::new(
            "chi",
            Statistics::Fermion,
            false,
            false,
            0.0,
            0.25,
        ))
        .unwrap();
    let file = write_file("massive.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let options = IntegrationOptions {
        calls: 20_000,
        relative_error_goal: 1e-6,
        max_tries: 2,
        ..IntegrationOptions::default()
    };
    let grid = tensor
        .evaluate_collisions_grid("chi", "chi", Some(&options), None)
        .unwrap();

    let mut non_converged = 0;
    for point in grid.points() {
        assert!(grid.result(point).unwrap().is_finite());
        let status = grid.status(point).unwrap();
        assert_ne!(status, PointStatus::NotEvaluated);
        if status == PointStatus::NotConverged {
            non_converged += 1;
        }
    }
    assert!(non_converged > 0, "the 1e-6 goal should not be reachable");
}

#[test]
fn test_cancellation_leaves_partial_grid() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor.set_num_threads(1).unwrap();
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("cancel.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    // the callback is polled once before the sweep and once per
    // completed point: refusing on the fourth call cancels after three
    // completed grid points
    let polls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&polls);
    tensor.set_cancellation_callback(Some(Box::new(move || {
        seen.fetch_add(1, Ordering::SeqCst) + 1 < 4
    })));

    let options = scenario_options();
    let grid = tensor
        .evaluate_collisions_grid("top", "top", Some(&options), None)
        .unwrap();

    assert!(grid.cancelled());
    assert_eq!(grid.evaluated_count(), 3);
    let not_evaluated = grid
        .points()
        .iter()
        .filter(|&&p| grid.status(p).unwrap() == PointStatus::NotEvaluated)
        .count();
    assert_eq!(not_evaluated, grid.points().len() - 3);
}

#[test]
fn test_mass_update_propagates_to_cached_integrals() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor
        .define_particle(ParticleSpecies::new(
            "chi",
            Statistics::Fermion,
            false,
            false,
            0.0,
            0.1,
        ))
        .unwrap();
    tensor.define_variable("gs", 2.0).unwrap();
    let file = write_file("update.txt", "M[0,0,0,0] -> gs\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let options = IntegrationOptions {
        calls: 20_000,
        max_tries: 10,
        ..IntegrationOptions::default()
    };
    let point = GridPoint::new(2, 1, 1, 1);

    let mut before = tensor.cached_integral("chi", "chi").unwrap().clone();
    let mut rng = StdRng::seed_from_u64(0);
    let first = before.integrate(point, &options, &mut rng).unwrap();

    let mut thermal = BTreeMap::new();
    thermal.insert("chi".to_string(), 0.5);
    tensor
        .update_particle_masses(&BTreeMap::new(), &thermal)
        .unwrap();

    let mut after = tensor.cached_integral("chi", "chi").unwrap().clone();
    let mut rng = StdRng::seed_from_u64(0);
    let second = after.integrate(point, &options, &mut rng).unwrap();

    assert!(
        (first.result - second.result).abs() > first.error + second.error,
        "mass update must shift the integral beyond the error band: {} +- {} vs {} +- {}",
        first.result,
        first.error,
        second.result,
        second.error
    );

    // parameter snapshots survive inside the integrand
    assert_eq!(after.model_parameters().get("gs"), Some(2.0));

    // assigning the stored value again is a no-op on the cache
    let revision = tensor.parameters().revision();
    tensor.set_variable("gs", 2.0).unwrap();
    assert_eq!(tensor.parameters().revision(), revision);
    let element = &tensor.cached_integral("chi", "chi").unwrap().general_elements()[0];
    assert_eq!(element.matrix_element().parameters_revision(), revision);
}

#[test]
fn test_ultrarelativistic_paths_agree() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("ur_paths.txt", "M[0,0,0,0] -> s^2 + t^2\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let mut optimized = tensor.cached_integral("top", "top").unwrap().clone();
    let mut general = optimized.clone();
    optimized.set_optimize_ultrarelativistic(true);
    general.set_optimize_ultrarelativistic(false);

    let params = optimized.integrand_parameters(GridPoint::new(2, 1, 1, 1));
    let samples = [
        [0.7, 0.3, 1.1, 0.2, -0.4],
        [3.0, 2.0, 4.0, -0.8, 0.6],
        [12.0, 5.5, 0.4, 0.95, -0.95],
        [0.05, 1.0, 2.0, 0.0, 0.0],
    ];
    for sample in samples {
        let a = optimized.calculate_integrand(
            sample[0], sample[1], sample[2], sample[3], sample[4], &params,
        );
        let b = general.calculate_integrand(
            sample[0], sample[1], sample[2], sample[3], sample[4], &params,
        );
        assert!(
            (a - b).abs() <= 1e-12 * (a.abs() + b.abs()) + 1e-20,
            "paths disagree: {} vs {}",
            a,
            b
        );
    }
}

#[test]
fn test_results_independent_of_worker_count() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(7);
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("threads.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let options = IntegrationOptions {
        calls: 2_000,
        max_tries: 2,
        ..IntegrationOptions::default()
    };

    tensor.set_num_threads(1).unwrap();
    let serial = tensor
        .evaluate_collisions_grid("top", "top", Some(&options), None)
        .unwrap();
    tensor.set_num_threads(4).unwrap();
    let parallel = tensor
        .evaluate_collisions_grid("top", "top", Some(&options), None)
        .unwrap();

    for point in serial.points() {
        assert_eq!(
            serial.result(point).unwrap().to_bits(),
            parallel.result(point).unwrap().to_bits()
        );
        assert_eq!(
            serial.error(point).unwrap().to_bits(),
            parallel.error(point).unwrap().to_bits()
        );
    }
}

#[test]
fn test_reflection_reduction_matches_direct_evaluation() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("reduction.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let direct_options = IntegrationOptions {
        calls: 10_000,
        ..IntegrationOptions::default()
    };
    let reduced_options = IntegrationOptions {
        reduction: GridReduction::ReflectJ,
        ..direct_options
    };

    let direct = tensor
        .evaluate_collisions_grid("top", "top", Some(&direct_options), None)
        .unwrap();
    let reduced = tensor
        .evaluate_collisions_grid("top", "top", Some(&reduced_options), None)
        .unwrap();

    for point in direct.points() {
        assert_ne!(
            reduced.status(point).unwrap(),
            PointStatus::NotEvaluated,
            "reduction must reconstruct {:?}",
            point
        );
        let a = direct.result(point).unwrap();
        let b = reduced.result(point).unwrap();
        let band = 5.0 * (direct.error(point).unwrap() + reduced.error(point).unwrap());
        assert!(
            (a - b).abs() <= band + 1e-12,
            "point {:?}: {} vs {} (band {})",
            point,
            a,
            b,
            band
        );
    }
}

#[test]
fn test_persisted_output_and_metadata() {
    let dir = out_dir("persist");
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.set_seed(0);
    tensor.set_output_directory(&dir);
    tensor.define_particle(ur_species("top")).unwrap();
    tensor.define_variable("gs", 1.2).unwrap();
    let file = write_file("persist.txt", "M[0,0,0,0] -> gs^2\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();
    tensor.set_default_integration_options(IntegrationOptions {
        calls: 2_000,
        max_tries: 2,
        ..IntegrationOptions::default()
    });

    let result = tensor.calculate_all_integrals(false).unwrap();
    assert!(result.io_errors().is_empty());
    assert_eq!(result.grids().len(), 1);
    assert!(result.grid("top", "top").is_some());

    assert!(dir.join("collisions_top_top.csv").is_file());
    let metadata = read_metadata(&dir.join("collisions_top_top.meta.csv")).unwrap();
    let lookup = |key: &str| -> Option<String> {
        metadata
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(lookup("basis_size").as_deref(), Some("3"));
    assert_eq!(lookup("master_seed").as_deref(), Some("0"));
    assert_eq!(lookup("reduction").as_deref(), Some("none"));
    assert_eq!(lookup("schema_version").as_deref(), Some("1"));
    assert!(lookup("param.gs").is_some());
}

#[test]
fn test_catalog_and_configuration_errors() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.define_particle(ur_species("top")).unwrap();

    let result = tensor.define_particle(ur_species("top"));
    assert!(matches!(
        result,
        Err(CollisionTensorError::DuplicateParticle(ref name)) if name == "top"
    ));

    let result = tensor.set_variable("gs", 1.0);
    assert!(matches!(result, Err(CollisionTensorError::Parameters(_))));

    let mut thermal = BTreeMap::new();
    thermal.insert("ghost".to_string(), 1.0);
    let result = tensor.update_particle_masses(&BTreeMap::new(), &thermal);
    assert!(matches!(
        result,
        Err(CollisionTensorError::UnregisteredParticle(ref name)) if name == "ghost"
    ));

    let result = tensor.evaluate_collisions_grid("top", "nobody", None, None);
    assert!(matches!(
        result,
        Err(CollisionTensorError::UnregisteredParticle(ref name)) if name == "nobody"
    ));

    // registered particle without a cached integral
    let result = tensor.evaluate_collisions_grid("top", "top", None, None);
    assert!(matches!(
        result,
        Err(CollisionTensorError::UnknownParticlePair { .. })
    ));

    assert!(!tensor.set_matrix_element_file("/no/such/file.txt"));
    let result = tensor.setup_collision_integrals(false);
    assert!(matches!(result, Err(CollisionTensorError::FileNotFound(_))));
}

#[test]
fn test_basis_resize_preserves_element_lists() {
    let mut tensor = CollisionTensor::new(3).unwrap();
    tensor.define_particle(ur_species("top")).unwrap();
    let file = write_file("resize.txt", "M[0,0,0,0] -> 1\n");
    assert!(tensor.set_matrix_element_file(&file));
    tensor.setup_collision_integrals(false).unwrap();

    let before = tensor
        .cached_integral("top", "top")
        .unwrap()
        .ultrarelativistic_elements()
        .len();
    tensor.change_polynomial_basis_size(5).unwrap();
    let integral = tensor.cached_integral("top", "top").unwrap();
    assert_eq!(integral.basis_size(), 5);
    assert_eq!(integral.ultrarelativistic_elements().len(), before);
    assert_eq!(
        integral.count_independent_integrals(GridReduction::None),
        4 * 4 * 4 * 4
    );
}

#[test]
fn test_independent_integral_count() {
    assert_eq!(CollisionTensor::count_independent_integrals(3, 1), 16);
    assert_eq!(CollisionTensor::count_independent_integrals(5, 2), 1024);
    assert_eq!(CollisionTensor::count_independent_integrals(1, 3), 0);
}
