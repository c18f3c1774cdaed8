use ndarray::Array4;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error(
        "Grid point (m={m}, n={n}, j={j}, k={k}) outside the valid range for basis size {basis_size}"
    )]
    InvalidGridPoint {
        m: usize,
        n: usize,
        j: usize,
        k: usize,
        basis_size: usize,
    },
}

/// One point of the spectral x momentum index lattice. Valid ranges for
/// basis size N: 2 <= m <= N and 1 <= n, j, k <= N-1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridPoint {
    pub m: usize,
    pub n: usize,
    pub j: usize,
    pub k: usize,
}

impl GridPoint {
    pub fn new(m: usize, n: usize, j: usize, k: usize) -> Self {
        GridPoint { m, n, j, k }
    }

    pub fn is_valid(&self, basis_size: usize) -> bool {
        let n_max = basis_size.saturating_sub(1);
        self.m >= 2
            && self.m <= basis_size
            && (1..=n_max).contains(&self.n)
            && (1..=n_max).contains(&self.j)
            && (1..=n_max).contains(&self.k)
    }
}

/// Evaluation status of one grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointStatus {
    NotEvaluated,
    Converged,
    NotConverged,
}

impl PointStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PointStatus::NotEvaluated => "not_evaluated",
            PointStatus::Converged => "converged",
            PointStatus::NotConverged => "not_converged",
        }
    }
}

/// Optional exploitation of grid symmetries by the driver.
///
/// `ReflectJ` uses the exact identity C[m,n,N-j,k] = (-1)^m C[m,n,j,k]
/// (a z-parity relabeling of the integration momenta flips the sign of
/// rho_Z everywhere, and each integrand term carries exactly one
/// longitudinal polynomial factor). The choice is recorded in the output
/// metadata; with `None` every point is evaluated directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridReduction {
    #[default]
    None,
    ReflectJ,
}

impl GridReduction {
    pub fn label(&self) -> &'static str {
        match self {
            GridReduction::None => "none",
            GridReduction::ReflectJ => "reflect-j-parity-m",
        }
    }

    /// The independent grid points to evaluate directly, in deterministic
    /// row-major (m, n, j, k) order.
    pub fn independent_points(&self, basis_size: usize) -> Vec<GridPoint> {
        let n_max = basis_size.saturating_sub(1);
        let j_max = match self {
            GridReduction::None => n_max,
            GridReduction::ReflectJ => basis_size / 2,
        };
        let mut points = Vec::new();
        for m in 2..=basis_size {
            for n in 1..=n_max {
                for j in 1..=j_max.min(n_max) {
                    for k in 1..=n_max {
                        points.push(GridPoint::new(m, n, j, k));
                    }
                }
            }
        }
        points
    }
}

/// Dense per-pair result container: result, error and status over the
/// full (m, n, j, k) tensor, stored with index offsets (m-2, n-1, j-1,
/// k-1).
#[derive(Debug, Clone)]
pub struct CollisionResultsGrid {
    particle_pair: (String, String),
    basis_size: usize,
    results: Array4<f64>,
    errors: Array4<f64>,
    statuses: Array4<PointStatus>,
    reduction: GridReduction,
    cancelled: bool,
}

impl CollisionResultsGrid {
    pub fn new(
        particle_pair: (String, String),
        basis_size: usize,
        reduction: GridReduction,
    ) -> Self {
        let extent = basis_size.saturating_sub(1);
        let shape = (extent, extent, extent, extent);
        CollisionResultsGrid {
            particle_pair,
            basis_size,
            results: Array4::zeros(shape),
            errors: Array4::zeros(shape),
            statuses: Array4::from_elem(shape, PointStatus::NotEvaluated),
            reduction,
            cancelled: false,
        }
    }

    pub fn particle_pair(&self) -> (&str, &str) {
        (&self.particle_pair.0, &self.particle_pair.1)
    }

    pub fn basis_size(&self) -> usize {
        self.basis_size
    }

    pub fn reduction(&self) -> GridReduction {
        self.reduction
    }

    /// True when the sweep was cancelled before covering every point.
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn mark_cancelled(&mut self) {
        self.cancelled = true;
    }

    fn offsets(&self, point: GridPoint) -> Result<[usize; 4], GridError> {
        if !point.is_valid(self.basis_size) {
            return Err(GridError::InvalidGridPoint {
                m: point.m,
                n: point.n,
                j: point.j,
                k: point.k,
                basis_size: self.basis_size,
            });
        }
        Ok([point.m - 2, point.n - 1, point.j - 1, point.k - 1])
    }

    pub fn set_point(
        &mut self,
        point: GridPoint,
        result: f64,
        error: f64,
        status: PointStatus,
    ) -> Result<(), GridError> {
        let idx = self.offsets(point)?;
        self.results[idx] = result;
        self.errors[idx] = error;
        self.statuses[idx] = status;
        Ok(())
    }

    pub fn result(&self, point: GridPoint) -> Result<f64, GridError> {
        Ok(self.results[self.offsets(point)?])
    }

    pub fn error(&self, point: GridPoint) -> Result<f64, GridError> {
        Ok(self.errors[self.offsets(point)?])
    }

    pub fn status(&self, point: GridPoint) -> Result<PointStatus, GridError> {
        Ok(self.statuses[self.offsets(point)?])
    }

    pub fn evaluated_count(&self) -> usize {
        self.statuses
            .iter()
            .filter(|s| **s != PointStatus::NotEvaluated)
            .count()
    }

    pub fn all_converged(&self) -> bool {
        self.statuses.iter().all(|s| *s == PointStatus::Converged)
    }

    /// All valid points of the full tensor in deterministic order.
    pub fn points(&self) -> Vec<GridPoint> {
        GridReduction::None.independent_points(self.basis_size)
    }

    /// Fill mirror cells from evaluated ones under the j -> N-j identity.
    /// Cells whose source was never evaluated stay `NotEvaluated`.
    pub fn apply_reflect_j(&mut self) {
        if self.reduction != GridReduction::ReflectJ {
            return;
        }
        let n = self.basis_size;
        for point in GridReduction::ReflectJ.independent_points(n) {
            let mirror_j = n - point.j;
            if mirror_j == point.j {
                continue;
            }
            let src = match self.offsets(point) {
                Ok(idx) => idx,
                Err(_) => continue,
            };
            if self.statuses[src] == PointStatus::NotEvaluated {
                continue;
            }
            let sign = if point.m % 2 == 0 { 1.0 } else { -1.0 };
            let mirrored = GridPoint::new(point.m, point.n, mirror_j, point.k);
            if let Ok(dst) = self.offsets(mirrored) {
                self.results[dst] = sign * self.results[src];
                self.errors[dst] = self.errors[src];
                self.statuses[dst] = self.statuses[src];
            }
        }
    }
}
