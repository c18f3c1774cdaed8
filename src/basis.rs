use crate::constants::RHO_CLAMP_EPSILON;
use crate::four_vector::FourVector;

/// Spectral basis for the momentum grid.
///
/// Momenta are reparametrized onto [-1, 1] through rho = tanh(p / scale)
/// with the reference scale fixed to the temperature (= 1 in our units).
/// Grid nodes are Chebyshev extrema; test functions are Chebyshev
/// polynomials with boundary subtractions:
///
/// - longitudinal: Tbar_m(x) = T_m(x) - T_{m mod 2}(x), vanishing at both
///   rho_Z = +-1 (the p_Z -> +-infinity boundaries) for m >= 2;
/// - transverse: Ttilde_n(x) = T_n(x) - 1, vanishing at rho_par = 1
///   (the p_par -> infinity boundary).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialBasis {
    size: usize,
    momentum_scale: f64,
}

impl PolynomialBasis {
    pub fn new(size: usize) -> Self {
        PolynomialBasis {
            size,
            momentum_scale: 1.0,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Longitudinal grid node rho_Z(j) = cos(j pi / N). Valid for
    /// 1 <= j <= N-1; the endpoints map to infinite momenta and must never
    /// be requested.
    pub fn rho_z_grid(&self, j: usize) -> f64 {
        debug_assert!(j >= 1 && j < self.size);
        (j as f64 * std::f64::consts::PI / self.size as f64).cos()
    }

    /// Transverse grid node rho_par(k) = -cos(k pi / N), 1 <= k <= N-1.
    pub fn rho_par_grid(&self, k: usize) -> f64 {
        debug_assert!(k >= 1 && k < self.size);
        -(k as f64 * std::f64::consts::PI / self.size as f64).cos()
    }

    pub fn rho_z_to_p_z(&self, rho_z: f64) -> f64 {
        self.momentum_scale * clamp_rho(rho_z).atanh()
    }

    pub fn rho_par_to_p_par(&self, rho_par: f64) -> f64 {
        self.momentum_scale * clamp_rho(rho_par).atanh()
    }

    pub fn p_z_to_rho_z(&self, p_z: f64) -> f64 {
        (p_z / self.momentum_scale).tanh()
    }

    pub fn p_par_to_rho_par(&self, p_par: f64) -> f64 {
        (p_par / self.momentum_scale).tanh()
    }

    /// Boundary-subtracted longitudinal polynomial Tbar_m.
    pub fn tm(&self, m: usize, x: f64) -> f64 {
        if m % 2 == 0 {
            chebyshev(m, x) - 1.0
        } else {
            chebyshev(m, x) - x
        }
    }

    /// Boundary-subtracted transverse polynomial Ttilde_n.
    pub fn ttilde(&self, n: usize, x: f64) -> f64 {
        chebyshev(n, x) - 1.0
    }

    /// Tbar_m(rho_Z(P)) * Ttilde_n(rho_par(P)) for a solved four-momentum.
    pub fn tm_tn(&self, m: usize, n: usize, momentum: &FourVector) -> f64 {
        let rho_z = self.p_z_to_rho_z(momentum.p_z());
        let rho_par = self.p_par_to_rho_par(momentum.p_par());
        self.tm(m, rho_z) * self.ttilde(n, rho_par)
    }
}

/// Chebyshev polynomial of the first kind by three-term recurrence.
fn chebyshev(order: usize, x: f64) -> f64 {
    match order {
        0 => 1.0,
        1 => x,
        _ => {
            let mut prev = 1.0;
            let mut cur = x;
            for _ in 2..=order {
                let next = 2.0 * x * cur - prev;
                prev = cur;
                cur = next;
            }
            cur
        }
    }
}

fn clamp_rho(rho: f64) -> f64 {
    rho.clamp(-1.0 + RHO_CLAMP_EPSILON, 1.0 - RHO_CLAMP_EPSILON)
}
