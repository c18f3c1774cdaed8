use crate::constants::{MASS_SQUARED_LOWER_BOUND, ROOT_RESIDUAL_TOLERANCE, SMALL_NUMBER};
use crate::four_vector::FourVector;
use nalgebra::Vector3;

/// Geometry of one Monte Carlo sample, shared by every collision element
/// evaluated at that sample. p1 comes from the grid; p2 and the p3
/// direction come from the integration variables.
#[derive(Debug, Clone, Copy)]
pub struct InputsForKinematics {
    pub p1: f64,
    pub p2: f64,
    pub p1_vec: Vector3<f64>,
    pub p2_vec: Vector3<f64>,
    pub p3_hat: Vector3<f64>,
    pub p1p2_dot: f64,
    pub p1p3_hat_dot: f64,
    pub p2p3_hat_dot: f64,
}

impl InputsForKinematics {
    /// Build the sample geometry from grid momentum p1 = (0, p_par, p_z)
    /// and the five integration variables.
    pub fn new(
        p_z1: f64,
        p_par1: f64,
        p2: f64,
        phi2: f64,
        phi3: f64,
        cos_theta2: f64,
        cos_theta3: f64,
    ) -> Self {
        let sin_theta2 = (1.0 - cos_theta2 * cos_theta2).max(0.0).sqrt();
        let sin_theta3 = (1.0 - cos_theta3 * cos_theta3).max(0.0).sqrt();
        let p1_vec = Vector3::new(0.0, p_par1, p_z1);
        let p2_vec = Vector3::new(
            p2 * sin_theta2 * phi2.cos(),
            p2 * sin_theta2 * phi2.sin(),
            p2 * cos_theta2,
        );
        let p3_hat = Vector3::new(
            sin_theta3 * phi3.cos(),
            sin_theta3 * phi3.sin(),
            cos_theta3,
        );
        InputsForKinematics {
            p1: p1_vec.norm(),
            p2,
            p1_vec,
            p2_vec,
            p3_hat,
            p1p2_dot: p1_vec.dot(&p2_vec),
            p1p3_hat_dot: p1_vec.dot(&p3_hat),
            p2p3_hat_dot: p2_vec.dot(&p3_hat),
        }
    }
}

/// One root of the momentum-conserving delta function: a complete set of
/// on-shell four-momenta and the kinematic prefactor
/// kappa2(p2) * kappa3(p3) * |1/g'(p3)|.
#[derive(Debug, Clone, Copy)]
pub struct Kinematics {
    pub fv1: FourVector,
    pub fv2: FourVector,
    pub fv3: FourVector,
    pub fv4: FourVector,
    pub prefactor: f64,
}

/// Roots of g(p3) for one sample. The quadratic admits at most two valid
/// branches and both are kept when both pass the filters.
pub type KinematicsRoots = Vec<Kinematics>;

/// Solve the energy-conservation condition
///   g(p3) = kappa + delta*p3 - eps*sqrt(p3^2 + m3^2) = 0
/// for general masses. Squaring gives A p3^2 + B p3 + C = 0 with
/// A = delta^2 - eps^2, B = 2 kappa delta, C = kappa^2 - eps^2 m3^2;
/// each candidate is checked against the unsquared g to reject spurious
/// branches. Invalid roots are discarded silently.
pub fn calculate_kinematics(
    inputs: &InputsForKinematics,
    mass_squared: &[f64; 4],
) -> KinematicsRoots {
    let [msq1, msq2, msq3, msq4] = *mass_squared;
    let e1 = (inputs.p1 * inputs.p1 + msq1).sqrt();
    let e2 = (inputs.p2 * inputs.p2 + msq2).sqrt();

    let kappa = msq1 + msq2 + msq3 - msq4 + 2.0 * (e1 * e2 - inputs.p1p2_dot);
    let delta = 2.0 * (inputs.p1p3_hat_dot + inputs.p2p3_hat_dot);
    let eps = 2.0 * (e1 + e2);

    let a = delta * delta - eps * eps;
    let b = 2.0 * kappa * delta;
    let c = kappa * kappa - eps * eps * msq3;

    let mut candidates: [Option<f64>; 2] = [None, None];
    if a.abs() < SMALL_NUMBER {
        // collinear massless degeneracy: the quadratic collapses
        if b.abs() > SMALL_NUMBER {
            candidates[0] = Some(-c / b);
        }
    } else {
        let discriminant = b * b - 4.0 * a * c;
        if discriminant >= 0.0 {
            let sqrt_disc = discriminant.sqrt();
            candidates[0] = Some(0.5 * (-b - sqrt_disc) / a);
            candidates[1] = Some(0.5 * (-b + sqrt_disc) / a);
        }
    }

    let g = |p3: f64| kappa + delta * p3 - eps * (p3 * p3 + msq3).sqrt();
    let residual_bound = ROOT_RESIDUAL_TOLERANCE * kappa.abs().max(1.0);

    let mut roots = Vec::with_capacity(2);
    for p3 in candidates.into_iter().flatten() {
        if p3 <= 0.0 || g(p3).abs() > residual_bound {
            continue;
        }
        let e3 = (p3 * p3 + msq3).sqrt();
        let e4 = e1 + e2 - e3;
        if e4 < 0.0 {
            continue;
        }
        let g_prime = if msq3.abs() < MASS_SQUARED_LOWER_BOUND {
            delta - eps
        } else {
            delta - eps * p3 / e3
        };
        if g_prime.abs() < SMALL_NUMBER {
            continue;
        }
        let prefactor =
            kinematic_factor(inputs.p2, e2, msq2) * kinematic_factor(p3, e3, msq3) / g_prime.abs();

        let fv1 = FourVector::from_spatial(e1, &inputs.p1_vec);
        let fv2 = FourVector::from_spatial(e2, &inputs.p2_vec);
        let fv3 = FourVector::from_spatial(e3, &(p3 * inputs.p3_hat));
        let fv4 = fv1 + fv2 - fv3;
        roots.push(Kinematics {
            fv1,
            fv2,
            fv3,
            fv4,
            prefactor,
        });
    }
    roots
}

/// Fast path for collision elements whose external particles are all
/// ultrarelativistic. With E_i = |p_i| the delta-function condition is
/// linear and has at most one valid root, p3 = kappa / (eps - delta).
pub fn calculate_kinematics_ultrarelativistic(
    inputs: &InputsForKinematics,
) -> Option<Kinematics> {
    let e1 = inputs.p1;
    let e2 = inputs.p2;
    let kappa = 2.0 * (e1 * e2 - inputs.p1p2_dot);
    let delta = 2.0 * (inputs.p1p3_hat_dot + inputs.p2p3_hat_dot);
    let eps = 2.0 * (e1 + e2);

    let denominator = eps - delta;
    if denominator.abs() < SMALL_NUMBER {
        return None;
    }
    let p3 = kappa / denominator;
    if p3 <= 0.0 {
        return None;
    }
    let e3 = p3;
    let e4 = e1 + e2 - e3;
    if e4 < 0.0 {
        return None;
    }

    let prefactor = inputs.p2 * p3 / denominator.abs();
    let fv1 = FourVector::from_spatial(e1, &inputs.p1_vec);
    let fv2 = FourVector::from_spatial(e2, &inputs.p2_vec);
    let fv3 = FourVector::from_spatial(e3, &(p3 * inputs.p3_hat));
    let fv4 = fv1 + fv2 - fv3;
    Some(Kinematics {
        fv1,
        fv2,
        fv3,
        fv4,
        prefactor,
    })
}

/// p^2/E regularized to p at small mass, where p^2/E == p exactly.
fn kinematic_factor(p: f64, e: f64, msq: f64) -> f64 {
    if msq.abs() < MASS_SQUARED_LOWER_BOUND {
        p
    } else {
        p * p / e
    }
}
