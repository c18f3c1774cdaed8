use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

/// Bins per axis of the importance-sampling grid.
const N_BINS: usize = 50;
/// Damping exponent for grid refinement.
const ALPHA: f64 = 1.5;
/// Fraction of `calls` spent training the grid before production runs.
const WARMUP_FRACTION: f64 = 0.2;
/// Warmup samples are split into this many refinement iterations.
const WARMUP_ITERATIONS: usize = 5;

#[derive(Error, Debug)]
pub enum VegasError {
    #[error("Invalid integration limits in dimension {dim}: [{lo}, {hi}]")]
    InvalidLimits { dim: usize, lo: f64, hi: f64 },

    #[error("Number of calls must be positive")]
    ZeroCalls,
}

/// Estimate for one integral: mean, standard error, and whether one of
/// the error goals was reached before the retry cap.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntegrationResult {
    pub result: f64,
    pub error: f64,
    pub converged: bool,
}

impl IntegrationResult {
    pub fn not_evaluated() -> Self {
        IntegrationResult {
            result: 0.0,
            error: 0.0,
            converged: false,
        }
    }
}

/// Adaptive importance-sampling Monte Carlo over an axis-aligned box.
///
/// Each axis carries a piecewise-constant sampling density on `N_BINS`
/// bins. A warmup pass trains the bins on the squared integrand, then
/// production runs of `calls` samples are combined by inverse variance
/// until an error goal or the retry cap is reached. Non-finite integrand
/// values are counted as zero so a stray singularity cannot destroy the
/// whole estimate.
#[derive(Debug, Clone)]
pub struct VegasIntegrator {
    limits: Vec<(f64, f64)>,
    edges: Vec<Vec<f64>>,
    accumulated: Vec<Vec<f64>>,
    point: Vec<f64>,
    bin_of_dim: Vec<usize>,
}

impl VegasIntegrator {
    pub fn new(limits: Vec<(f64, f64)>) -> Result<Self, VegasError> {
        for (dim, &(lo, hi)) in limits.iter().enumerate() {
            if !(lo < hi) || !lo.is_finite() || !hi.is_finite() {
                return Err(VegasError::InvalidLimits { dim, lo, hi });
            }
        }
        let dim = limits.len();
        Ok(VegasIntegrator {
            limits,
            edges: vec![uniform_edges(); dim],
            accumulated: vec![vec![0.0; N_BINS]; dim],
            point: vec![0.0; dim],
            bin_of_dim: vec![0; dim],
        })
    }

    pub fn dimension(&self) -> usize {
        self.limits.len()
    }

    /// Forget the learned grid and start from uniform bins.
    pub fn reset_grid(&mut self) {
        for edges in &mut self.edges {
            *edges = uniform_edges();
        }
        for acc in &mut self.accumulated {
            acc.iter_mut().for_each(|a| *a = 0.0);
        }
    }

    /// Integrate `f` to the requested goals. Stops when the combined
    /// estimate satisfies sigma/|mu| <= `relative_error_goal` (for
    /// nonzero mu) or sigma <= `absolute_error_goal`, or after
    /// `max_tries` production runs.
    pub fn integrate<F>(
        &mut self,
        mut f: F,
        rng: &mut StdRng,
        calls: usize,
        relative_error_goal: f64,
        absolute_error_goal: f64,
        max_tries: usize,
    ) -> Result<IntegrationResult, VegasError>
    where
        F: FnMut(&[f64]) -> f64,
    {
        if calls == 0 {
            return Err(VegasError::ZeroCalls);
        }
        self.reset_grid();

        let warmup_total = (WARMUP_FRACTION * calls as f64).ceil() as usize;
        let warmup_chunk = (warmup_total / WARMUP_ITERATIONS).max(2);
        for _ in 0..WARMUP_ITERATIONS {
            let _ = self.sample_iteration(&mut f, rng, warmup_chunk);
            self.refine();
        }

        let mut inv_variance_sum = 0.0;
        let mut weighted_mean_sum = 0.0;
        let mut mean = 0.0;
        let mut sigma = f64::INFINITY;
        let mut converged = false;

        for _ in 0..max_tries.max(1) {
            let (iter_mean, iter_sigma) = self.sample_iteration(&mut f, rng, calls);
            self.refine();

            if iter_sigma <= 0.0 {
                // exact within sampling: constant or vanishing integrand
                mean = iter_mean;
                sigma = 0.0;
            } else {
                let weight = 1.0 / (iter_sigma * iter_sigma);
                inv_variance_sum += weight;
                weighted_mean_sum += iter_mean * weight;
                mean = weighted_mean_sum / inv_variance_sum;
                sigma = inv_variance_sum.recip().sqrt();
            }

            let relative_ok = mean != 0.0 && sigma / mean.abs() <= relative_error_goal;
            if relative_ok || sigma <= absolute_error_goal {
                converged = true;
                break;
            }
        }

        Ok(IntegrationResult {
            result: mean,
            error: sigma,
            converged,
        })
    }

    /// One run of `n` samples; returns (mean, standard error) and feeds
    /// the per-bin accumulators used by the next refinement.
    fn sample_iteration<F>(&mut self, f: &mut F, rng: &mut StdRng, n: usize) -> (f64, f64)
    where
        F: FnMut(&[f64]) -> f64,
    {
        let dim = self.limits.len();
        let mut sum = 0.0;
        let mut sum_squares = 0.0;

        for _ in 0..n {
            let mut weight = 1.0;
            for d in 0..dim {
                let r: f64 = rng.gen();
                let position = r * N_BINS as f64;
                let bin = (position as usize).min(N_BINS - 1);
                let frac = position - bin as f64;
                let lo_edge = self.edges[d][bin];
                let width = self.edges[d][bin + 1] - lo_edge;
                let x_unit = lo_edge + frac * width;
                let (lo, hi) = self.limits[d];
                self.point[d] = lo + x_unit * (hi - lo);
                self.bin_of_dim[d] = bin;
                weight *= width * N_BINS as f64 * (hi - lo);
            }

            let mut value = f(&self.point);
            if !value.is_finite() {
                value = 0.0;
            }
            let weighted = value * weight;
            let squared = weighted * weighted;
            sum += weighted;
            sum_squares += squared;
            for d in 0..dim {
                self.accumulated[d][self.bin_of_dim[d]] += squared;
            }
        }

        let n_f = n as f64;
        let mean = sum / n_f;
        let variance = ((sum_squares / n_f - mean * mean) / (n_f - 1.0)).max(0.0);
        (mean, variance.sqrt())
    }

    /// Lepage-style grid refinement: smooth the accumulated squared
    /// values, damp them, and move bin edges to equidistribute the
    /// damped weight.
    fn refine(&mut self) {
        for d in 0..self.limits.len() {
            let acc = &mut self.accumulated[d];

            let mut smoothed = vec![0.0; N_BINS];
            smoothed[0] = (acc[0] + acc[1]) / 2.0;
            smoothed[N_BINS - 1] = (acc[N_BINS - 2] + acc[N_BINS - 1]) / 2.0;
            for i in 1..N_BINS - 1 {
                smoothed[i] = (acc[i - 1] + acc[i] + acc[i + 1]) / 3.0;
            }
            let total: f64 = smoothed.iter().sum();
            acc.iter_mut().for_each(|a| *a = 0.0);
            if total <= 0.0 {
                continue;
            }

            let mut damped = vec![0.0; N_BINS];
            for i in 0..N_BINS {
                let ratio = smoothed[i] / total;
                damped[i] = if ratio <= 0.0 {
                    0.0
                } else if ratio >= 1.0 - 1e-12 {
                    1.0
                } else {
                    ((1.0 - ratio) / -ratio.ln()).powf(ALPHA)
                };
            }
            let damped_total: f64 = damped.iter().sum();
            if damped_total <= 0.0 {
                continue;
            }

            let old_edges = self.edges[d].clone();
            let step = damped_total / N_BINS as f64;
            let mut consumed = 0.0;
            let mut k = 0;
            let new_edges = &mut self.edges[d];
            for nb in 1..N_BINS {
                let target = step * nb as f64;
                while k < N_BINS - 1 && consumed + damped[k] < target {
                    consumed += damped[k];
                    k += 1;
                }
                let frac = if damped[k] > 0.0 {
                    ((target - consumed) / damped[k]).clamp(0.0, 1.0)
                } else {
                    0.0
                };
                new_edges[nb] = old_edges[k] + frac * (old_edges[k + 1] - old_edges[k]);
            }
            new_edges[0] = 0.0;
            new_edges[N_BINS] = 1.0;
        }
    }
}

fn uniform_edges() -> Vec<f64> {
    (0..=N_BINS).map(|i| i as f64 / N_BINS as f64).collect()
}
