use nalgebra::{Vector3, Vector4};
use std::ops::{Add, Mul, Sub};

/// A four-momentum (E, px, py, pz) with metric signature (+,-,-,-).
///
/// Components are stored time-first in a `nalgebra::Vector4`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FourVector(Vector4<f64>);

impl FourVector {
    pub fn new(e: f64, px: f64, py: f64, pz: f64) -> Self {
        FourVector(Vector4::new(e, px, py, pz))
    }

    /// Build from a spatial 3-vector and an energy component.
    pub fn from_spatial(e: f64, p: &Vector3<f64>) -> Self {
        FourVector(Vector4::new(e, p.x, p.y, p.z))
    }

    pub fn energy(&self) -> f64 {
        self.0.x
    }

    pub fn spatial(&self) -> Vector3<f64> {
        Vector3::new(self.0.y, self.0.z, self.0.w)
    }

    /// Longitudinal (z) momentum component.
    pub fn p_z(&self) -> f64 {
        self.0.w
    }

    /// Transverse momentum magnitude, sqrt(px^2 + py^2).
    pub fn p_par(&self) -> f64 {
        (self.0.y * self.0.y + self.0.z * self.0.z).sqrt()
    }

    /// Minkowski product P.Q = E_P E_Q - p.q.
    pub fn minkowski_dot(&self, other: &FourVector) -> f64 {
        self.0.x * other.0.x - self.0.y * other.0.y - self.0.z * other.0.z - self.0.w * other.0.w
    }

    /// Minkowski square P.P = E^2 - |p|^2.
    pub fn minkowski_square(&self) -> f64 {
        self.minkowski_dot(self)
    }

    /// |P.P - msq| scaled by max(1, msq); small for on-shell momenta.
    pub fn on_shell_residual(&self, mass_squared: f64) -> f64 {
        (self.minkowski_square() - mass_squared).abs() / mass_squared.abs().max(1.0)
    }
}

impl Add for FourVector {
    type Output = FourVector;
    fn add(self, rhs: FourVector) -> FourVector {
        FourVector(self.0 + rhs.0)
    }
}

impl Sub for FourVector {
    type Output = FourVector;
    fn sub(self, rhs: FourVector) -> FourVector {
        FourVector(self.0 - rhs.0)
    }
}

impl Mul<FourVector> for f64 {
    type Output = FourVector;
    fn mul(self, rhs: FourVector) -> FourVector {
        FourVector(rhs.0 * self)
    }
}
