//! Minimal end-to-end run: two ultrarelativistic species, one matrix
//! element, a coarse grid, results printed and persisted as CSV.

use boltzmann_collision::collision_integral::{CollisionTensorVerbosity, IntegrationOptions};
use boltzmann_collision::particle::{ParticleSpecies, Statistics};
use boltzmann_collision::tensor::CollisionTensor;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matrix_file = std::env::temp_dir().join("two_species_matrix_elements.txt");
    std::fs::write(
        &matrix_file,
        "# quark-gluon scattering, leading log\n\
         M[0,1,0,1] -> gs^4 * (s^2 + u^2) / (t - msq)^2\n",
    )?;

    let mut tensor = CollisionTensor::new(3)?;
    tensor.set_seed(0);
    tensor.set_output_directory(std::env::temp_dir().join("two_species_output"));

    tensor.define_particle(ParticleSpecies::new(
        "quark",
        Statistics::Fermion,
        false,
        true,
        0.0,
        0.0,
    ))?;
    tensor.define_particle(ParticleSpecies::new(
        "gluon",
        Statistics::Boson,
        false,
        true,
        0.0,
        0.0,
    ))?;
    tensor.define_variable("gs", 1.2)?;
    tensor.define_variable("msq", 0.4)?;

    if !tensor.set_matrix_element_file(&matrix_file) {
        return Err("matrix element file missing".into());
    }
    tensor.setup_collision_integrals(true)?;

    tensor.set_default_integration_options(IntegrationOptions {
        calls: 10_000,
        ..IntegrationOptions::default()
    });
    tensor.set_default_verbosity(CollisionTensorVerbosity {
        progress_report_percentage: 25.0,
        print_individual_integrals: false,
    });

    let result = tensor.calculate_all_integrals(true)?;
    for grid in result.grids() {
        let (p1, p2) = grid.particle_pair();
        println!(
            "pair ({}, {}): {} points, all converged: {}",
            p1,
            p2,
            grid.evaluated_count(),
            grid.all_converged()
        );
    }
    println!(
        "output written to {}",
        tensor.output_directory().display()
    );
    Ok(())
}
