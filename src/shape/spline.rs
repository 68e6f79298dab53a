//! Thin-plate spline interpolation between two landmark configurations.
//!
//! The spline maps every landmark of the reference exactly onto the
//! corresponding target landmark while minimizing bending energy. It is used
//! for deformation grids and for estimating missing landmarks.

use crate::error::{GmError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A fitted 2D thin-plate spline.
#[derive(Debug, Clone)]
pub struct ThinPlateSpline {
    reference: Vec<[f64; 2]>,
    /// Non-affine weights (k × 2).
    weights: DMatrix<f64>,
    /// Affine part (3 × 2): constant, x, y.
    affine: DMatrix<f64>,
    /// Bending matrix (k × k) of the reference.
    kernel: DMatrix<f64>,
}

/// U(r) = r² ln r², with U(0) = 0.
fn kernel_fn(a: [f64; 2], b: [f64; 2]) -> f64 {
    let r2 = (a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2);
    if r2 < 1e-300 {
        0.0
    } else {
        r2 * r2.ln()
    }
}

impl ThinPlateSpline {
    /// Fit the spline taking `reference` onto `target`.
    pub fn fit(reference: &[[f64; 2]], target: &[[f64; 2]]) -> Result<Self> {
        let k = reference.len();
        if k != target.len() {
            return Err(GmError::DimensionMismatch {
                expected: k,
                actual: target.len(),
            });
        }
        if k < 3 {
            return Err(GmError::InvalidParameter(
                "Thin-plate spline requires at least 3 landmarks".to_string(),
            ));
        }
        if reference
            .iter()
            .chain(target)
            .any(|p| !p[0].is_finite() || !p[1].is_finite())
        {
            return Err(GmError::MissingLandmarks(
                "Thin-plate spline landmarks must all be observed".to_string(),
            ));
        }

        let kernel = DMatrix::from_fn(k, k, |i, j| kernel_fn(reference[i], reference[j]));

        let mut system = DMatrix::zeros(k + 3, k + 3);
        system.view_mut((0, 0), (k, k)).copy_from(&kernel);
        for (i, p) in reference.iter().enumerate() {
            let row = [1.0, p[0], p[1]];
            for (j, &v) in row.iter().enumerate() {
                system[(i, k + j)] = v;
                system[(k + j, i)] = v;
            }
        }

        let mut rhs = DMatrix::zeros(k + 3, 2);
        for (i, p) in target.iter().enumerate() {
            rhs[(i, 0)] = p[0];
            rhs[(i, 1)] = p[1];
        }

        let solution = system.lu().solve(&rhs).ok_or_else(|| {
            GmError::Numerical(
                "Thin-plate spline system is singular (collinear or duplicate landmarks)"
                    .to_string(),
            )
        })?;

        Ok(Self {
            reference: reference.to_vec(),
            weights: solution.rows(0, k).into_owned(),
            affine: solution.rows(k, 3).into_owned(),
            kernel,
        })
    }

    /// Map a point through the spline.
    pub fn transform(&self, point: [f64; 2]) -> [f64; 2] {
        let u = DVector::from_iterator(
            self.reference.len(),
            self.reference.iter().map(|r| kernel_fn(*r, point)),
        );
        let mut out = [0.0; 2];
        for (d, slot) in out.iter_mut().enumerate() {
            *slot = self.affine[(0, d)]
                + self.affine[(1, d)] * point[0]
                + self.affine[(2, d)] * point[1]
                + self.weights.column(d).dot(&u);
        }
        out
    }

    /// Bending energy of the deformation, `trace(Wᵀ K W)`.
    pub fn bending_energy(&self) -> f64 {
        (self.weights.transpose() * &self.kernel * &self.weights)
            .trace()
            .abs()
    }
}

/// A warped grid: each line is a polyline of transformed grid points.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeformationGrid {
    /// Warped lines of constant y (in reference space).
    pub horizontal: Vec<Vec<[f64; 2]>>,
    /// Warped lines of constant x (in reference space).
    pub vertical: Vec<Vec<[f64; 2]>>,
    /// Target landmarks after magnification.
    pub target: Vec<[f64; 2]>,
    /// Bending energy of the deformation.
    pub bending_energy: f64,
}

/// Exaggerate the difference between `target` and `reference`.
pub fn magnify(reference: &[[f64; 2]], target: &[[f64; 2]], magnification: f64) -> Vec<[f64; 2]> {
    reference
        .iter()
        .zip(target)
        .map(|(r, t)| {
            [
                r[0] + magnification * (t[0] - r[0]),
                r[1] + magnification * (t[1] - r[1]),
            ]
        })
        .collect()
}

/// Deform a regular grid over the reference bounding box (10% padding) by
/// the spline from `reference` to the magnified `target`.
pub fn deformation_grid(
    reference: &[[f64; 2]],
    target: &[[f64; 2]],
    n_grid: usize,
    magnification: f64,
) -> Result<DeformationGrid> {
    if n_grid < 2 {
        return Err(GmError::InvalidParameter(
            "Deformation grid needs at least 2 lines per direction".to_string(),
        ));
    }
    let target = magnify(reference, target, magnification);
    let spline = ThinPlateSpline::fit(reference, &target)?;

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for p in reference {
        min_x = min_x.min(p[0]);
        max_x = max_x.max(p[0]);
        min_y = min_y.min(p[1]);
        max_y = max_y.max(p[1]);
    }
    let pad_x = 0.1 * (max_x - min_x);
    let pad_y = 0.1 * (max_y - min_y);
    let (min_x, max_x) = (min_x - pad_x, max_x + pad_x);
    let (min_y, max_y) = (min_y - pad_y, max_y + pad_y);

    let samples = 4 * n_grid;
    let lerp = |lo: f64, hi: f64, i: usize, n: usize| lo + (hi - lo) * i as f64 / (n - 1) as f64;

    let horizontal = (0..n_grid)
        .map(|row| {
            let y = lerp(min_y, max_y, row, n_grid);
            (0..samples)
                .map(|s| spline.transform([lerp(min_x, max_x, s, samples), y]))
                .collect()
        })
        .collect();
    let vertical = (0..n_grid)
        .map(|col| {
            let x = lerp(min_x, max_x, col, n_grid);
            (0..samples)
                .map(|s| spline.transform([x, lerp(min_y, max_y, s, samples)]))
                .collect()
        })
        .collect();

    Ok(DeformationGrid {
        horizontal,
        vertical,
        bending_energy: spline.bending_energy(),
        target,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn reference() -> Vec<[f64; 2]> {
        vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]]
    }

    #[test]
    fn test_interpolates_landmarks() {
        let reference = reference();
        let mut target = reference.clone();
        target[4] = [0.6, 0.55];
        let spline = ThinPlateSpline::fit(&reference, &target).unwrap();
        for (r, t) in reference.iter().zip(&target) {
            let mapped = spline.transform(*r);
            assert_relative_eq!(mapped[0], t[0], epsilon = 1e-9);
            assert_relative_eq!(mapped[1], t[1], epsilon = 1e-9);
        }
        assert!(spline.bending_energy() > 0.0);
    }

    #[test]
    fn test_affine_map_has_no_bending() {
        let reference = reference();
        let target: Vec<[f64; 2]> = reference
            .iter()
            .map(|p| [2.0 * p[0] + 0.5 * p[1] + 1.0, p[1] - 3.0])
            .collect();
        let spline = ThinPlateSpline::fit(&reference, &target).unwrap();
        assert_relative_eq!(spline.bending_energy(), 0.0, epsilon = 1e-9);

        let off = spline.transform([0.25, 0.75]);
        assert_relative_eq!(off[0], 2.0 * 0.25 + 0.5 * 0.75 + 1.0, epsilon = 1e-9);
        assert_relative_eq!(off[1], 0.75 - 3.0, epsilon = 1e-9);
    }

    #[test]
    fn test_singular_configuration() {
        let line = vec![[0.0, 0.0], [1.0, 0.0], [2.0, 0.0]];
        assert!(ThinPlateSpline::fit(&line, &line).is_err());
    }

    #[test]
    fn test_grid_shape_and_identity() {
        let reference = reference();
        let grid = deformation_grid(&reference, &reference, 5, 1.0).unwrap();
        assert_eq!(grid.horizontal.len(), 5);
        assert_eq!(grid.vertical[0].len(), 20);
        // Identity warp leaves the first grid corner at the padded corner.
        assert_relative_eq!(grid.horizontal[0][0][0], -0.1, epsilon = 1e-9);
        assert_relative_eq!(grid.horizontal[0][0][1], -0.1, epsilon = 1e-9);
        assert_relative_eq!(grid.bending_energy, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_magnify() {
        let a = vec![[0.0, 0.0]];
        let b = vec![[1.0, 2.0]];
        assert_eq!(magnify(&a, &b, 3.0), vec![[3.0, 6.0]]);
    }
}
