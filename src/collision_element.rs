use crate::basis::PolynomialBasis;
use crate::kinematics::Kinematics;
use crate::matrix_element::MatrixElement;
use crate::model_parameters::ModelParameters;
use crate::particle::ParticleSpecies;

/// One diagrammatic contribution to a collision integral: four external
/// particle slots, a squared amplitude, and the linearized population
/// bookkeeping.
///
/// Slot 0 is the incoming particle whose momentum is fixed by the grid.
/// Slots snapshot the catalog state they need (dispersion masses, delta-f
/// flags); `refresh` rebinds the snapshots after a model change so that
/// workers never read shared mutable state.
#[derive(Debug, Clone)]
pub struct CollisionElement {
    particle_indices: [usize; 4],
    matrix_element: MatrixElement,
    delta_f_flags: [bool; 4],
    mass_squared: [f64; 4],
    symmetry_factor: f64,
    ultrarelativistic: bool,
}

/// Sign of the linearized population term per slot: the incoming slot
/// enters the linearization with opposite sign.
const DELTA_F_SIGNS: [f64; 4] = [-1.0, 1.0, 1.0, 1.0];

impl CollisionElement {
    pub fn new(
        particle_indices: [usize; 4],
        matrix_element: MatrixElement,
        particles: &[ParticleSpecies],
    ) -> Self {
        let mut element = CollisionElement {
            particle_indices,
            matrix_element,
            delta_f_flags: [false; 4],
            mass_squared: [0.0; 4],
            symmetry_factor: 0.0,
            ultrarelativistic: false,
        };
        element.bind_catalog(particles);
        element
    }

    fn bind_catalog(&mut self, particles: &[ParticleSpecies]) {
        for (slot, &index) in self.particle_indices.iter().enumerate() {
            let particle = &particles[index];
            self.delta_f_flags[slot] = !particle.in_equilibrium;
            self.mass_squared[slot] = particle.total_mass_squared();
        }
        self.ultrarelativistic = self
            .particle_indices
            .iter()
            .all(|&index| particles[index].ultrarelativistic);
        let multiplicity = particles[self.particle_indices[0]].multiplicity.max(1);
        self.symmetry_factor = 1.0 / (2.0 * multiplicity as f64);
    }

    /// Rebind catalog snapshots and the matrix-element parameter values.
    pub fn refresh(&mut self, particles: &[ParticleSpecies], params: &ModelParameters) {
        self.bind_catalog(particles);
        self.matrix_element.refresh_parameters(params);
    }

    pub fn particle_indices(&self) -> &[usize; 4] {
        &self.particle_indices
    }

    /// True iff all four external particles are ultrarelativistic.
    pub fn is_ultrarelativistic(&self) -> bool {
        self.ultrarelativistic
    }

    pub fn mass_squared(&self) -> &[f64; 4] {
        &self.mass_squared
    }

    pub fn matrix_element(&self) -> &MatrixElement {
        &self.matrix_element
    }

    /// Contribution of this element at one solved kinematic branch:
    ///   |M|^2/(2N) * (df0 + df1 - df2 - df3) * prefactor
    /// where df_i vanishes for in-equilibrium slots and is the spectral
    /// test function (with slot sign) otherwise. Slot 0 uses the grid
    /// value `tm_tn_p1` precomputed from the signed rho coordinates.
    pub fn evaluate(
        &mut self,
        kinematics: &Kinematics,
        basis: &PolynomialBasis,
        m: usize,
        n: usize,
        tm_tn_p1: f64,
    ) -> f64 {
        let momenta = [
            kinematics.fv1,
            kinematics.fv2,
            kinematics.fv3,
            kinematics.fv4,
        ];
        let mut delta_f = [0.0; 4];
        if self.delta_f_flags[0] {
            delta_f[0] = DELTA_F_SIGNS[0] * tm_tn_p1;
        }
        for slot in 1..4 {
            if self.delta_f_flags[slot] {
                delta_f[slot] = DELTA_F_SIGNS[slot] * basis.tm_tn(m, n, &momenta[slot]);
            }
        }
        // gain minus loss for 12 -> 34
        let population = delta_f[0] + delta_f[1] - delta_f[2] - delta_f[3];
        if population == 0.0 {
            return 0.0;
        }

        let s = (kinematics.fv1 + kinematics.fv2).minkowski_square();
        let t = (kinematics.fv1 - kinematics.fv3).minkowski_square();
        let u = (kinematics.fv1 - kinematics.fv4).minkowski_square();
        let amplitude = self.matrix_element.evaluate(s, t, u);

        amplitude * self.symmetry_factor * population * kinematics.prefactor
    }
}
