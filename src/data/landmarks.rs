//! Landmark configurations for a set of specimens.

use crate::error::{GmError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// A single specimen: one 2D coordinate per landmark.
///
/// Missing coordinates are stored as `f64::NAN`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Specimen {
    /// Specimen identifier.
    pub id: String,
    /// Image file name from the `IMAGE=` field, if any.
    pub image: Option<String>,
    /// Scale factor from the `SCALE=` field, if any.
    pub scale: Option<f64>,
    /// Landmark coordinates in file order.
    pub coords: Vec<[f64; 2]>,
}

impl Specimen {
    /// Create a specimen with no image or scale information.
    pub fn new(id: impl Into<String>, coords: Vec<[f64; 2]>) -> Self {
        Self {
            id: id.into(),
            image: None,
            scale: None,
            coords,
        }
    }

    /// Indices of landmarks with a missing coordinate.
    pub fn missing_indices(&self) -> Vec<usize> {
        self.coords
            .iter()
            .enumerate()
            .filter(|(_, p)| p[0].is_nan() || p[1].is_nan())
            .map(|(i, _)| i)
            .collect()
    }

    /// Whether every landmark is observed.
    pub fn is_complete(&self) -> bool {
        self.coords.iter().all(|p| p[0].is_finite() && p[1].is_finite())
    }
}

/// A set of specimens sharing the same number of landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarkSet {
    specimens: Vec<Specimen>,
    n_landmarks: usize,
}

impl LandmarkSet {
    /// Create a landmark set, checking that landmark counts agree and IDs are unique.
    pub fn new(specimens: Vec<Specimen>) -> Result<Self> {
        let first = specimens
            .first()
            .ok_or_else(|| GmError::EmptyData("No specimens in landmark set".to_string()))?;
        let n_landmarks = first.coords.len();
        if n_landmarks == 0 {
            return Err(GmError::EmptyData(format!(
                "Specimen '{}' has no landmarks",
                first.id
            )));
        }

        let mut seen = HashSet::new();
        for s in &specimens {
            if s.coords.len() != n_landmarks {
                return Err(GmError::DimensionMismatch {
                    expected: n_landmarks,
                    actual: s.coords.len(),
                });
            }
            if !seen.insert(s.id.as_str()) {
                return Err(GmError::SpecimenMismatch(format!(
                    "Duplicate specimen ID '{}'",
                    s.id
                )));
            }
        }

        Ok(Self {
            specimens,
            n_landmarks,
        })
    }

    /// All specimens in order.
    pub fn specimens(&self) -> &[Specimen] {
        &self.specimens
    }

    /// Number of specimens.
    pub fn n_specimens(&self) -> usize {
        self.specimens.len()
    }

    /// Number of landmarks per specimen.
    pub fn n_landmarks(&self) -> usize {
        self.n_landmarks
    }

    /// Specimen IDs in order.
    pub fn specimen_ids(&self) -> Vec<String> {
        self.specimens.iter().map(|s| s.id.clone()).collect()
    }

    /// Look up a specimen by ID.
    pub fn get(&self, id: &str) -> Option<&Specimen> {
        self.specimens.iter().find(|s| s.id == id)
    }

    /// Keep only the given specimens, in the order of `ids`.
    pub fn subset(&self, ids: &[String]) -> Result<Self> {
        let specimens = ids
            .iter()
            .map(|id| {
                self.get(id).cloned().ok_or_else(|| {
                    GmError::SpecimenMismatch(format!("Specimen '{}' not found in landmarks", id))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(specimens)
    }

    /// Missing landmark indices per incomplete specimen.
    pub fn missing_landmarks(&self) -> BTreeMap<String, Vec<usize>> {
        self.specimens
            .iter()
            .filter(|s| !s.is_complete())
            .map(|s| (s.id.clone(), s.missing_indices()))
            .collect()
    }

    /// Whether any specimen has a missing landmark.
    pub fn has_missing(&self) -> bool {
        self.specimens.iter().any(|s| !s.is_complete())
    }

    /// Remove specimens with missing landmarks. Returns the new set and the dropped IDs.
    pub fn drop_incomplete(&self) -> Result<(Self, Vec<String>)> {
        let (kept, dropped): (Vec<&Specimen>, Vec<&Specimen>) =
            self.specimens.iter().partition(|s| s.is_complete());
        if kept.is_empty() {
            return Err(GmError::MissingLandmarks(
                "Every specimen has missing landmarks".to_string(),
            ));
        }
        let set = Self::new(kept.into_iter().cloned().collect())?;
        Ok((set, dropped.into_iter().map(|s| s.id.clone()).collect()))
    }

    /// Multiply coordinates by each specimen's `SCALE=` factor, when present.
    pub fn apply_scale(&self) -> Self {
        let specimens = self
            .specimens
            .iter()
            .map(|s| match s.scale {
                Some(f) => Specimen {
                    coords: s.coords.iter().map(|p| [p[0] * f, p[1] * f]).collect(),
                    scale: None,
                    ..s.clone()
                },
                None => s.clone(),
            })
            .collect();
        Self {
            specimens,
            n_landmarks: self.n_landmarks,
        }
    }

    /// Shape matrix (specimens × 2k) with row layout `x1 y1 x2 y2 ...`.
    pub fn to_shape_matrix(&self) -> DMatrix<f64> {
        configs_to_matrix(self.specimens.iter().map(|s| s.coords.as_slice()), self.n_landmarks)
    }

    /// Rebuild a landmark set from a shape matrix.
    pub fn from_shape_matrix(ids: &[String], matrix: &DMatrix<f64>) -> Result<Self> {
        if matrix.nrows() != ids.len() {
            return Err(GmError::DimensionMismatch {
                expected: ids.len(),
                actual: matrix.nrows(),
            });
        }
        if matrix.ncols() % 2 != 0 {
            return Err(GmError::InvalidParameter(format!(
                "Shape matrix has an odd number of columns ({})",
                matrix.ncols()
            )));
        }
        let specimens = ids
            .iter()
            .enumerate()
            .map(|(i, id)| Specimen::new(id.clone(), row_to_config(matrix, i)))
            .collect();
        Self::new(specimens)
    }
}

/// Stack configurations into a specimens × 2k matrix.
pub(crate) fn configs_to_matrix<'a, I>(configs: I, n_landmarks: usize) -> DMatrix<f64>
where
    I: IntoIterator<Item = &'a [[f64; 2]]>,
{
    let rows: Vec<&[[f64; 2]]> = configs.into_iter().collect();
    let mut m = DMatrix::zeros(rows.len(), 2 * n_landmarks);
    for (i, config) in rows.iter().enumerate() {
        for (j, p) in config.iter().enumerate() {
            m[(i, 2 * j)] = p[0];
            m[(i, 2 * j + 1)] = p[1];
        }
    }
    m
}

/// Unstack one row of a shape matrix into a configuration.
pub(crate) fn row_to_config(matrix: &DMatrix<f64>, row: usize) -> Vec<[f64; 2]> {
    (0..matrix.ncols() / 2)
        .map(|j| [matrix[(row, 2 * j)], matrix[(row, 2 * j + 1)]])
        .collect()
}

/// Unstack a flat `x1 y1 x2 y2 ...` vector into a configuration.
pub(crate) fn vector_to_config(values: &[f64]) -> Vec<[f64; 2]> {
    values.chunks_exact(2).map(|c| [c[0], c[1]]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triangle(id: &str, dx: f64) -> Specimen {
        Specimen::new(id, vec![[0.0 + dx, 0.0], [1.0 + dx, 0.0], [0.5 + dx, 1.0]])
    }

    #[test]
    fn test_new_checks_landmark_count() {
        let bad = Specimen::new("b", vec![[0.0, 0.0], [1.0, 1.0]]);
        let result = LandmarkSet::new(vec![triangle("a", 0.0), bad]);
        assert!(matches!(result, Err(GmError::DimensionMismatch { expected: 3, actual: 2 })));
    }

    #[test]
    fn test_new_rejects_duplicate_ids() {
        let result = LandmarkSet::new(vec![triangle("a", 0.0), triangle("a", 1.0)]);
        assert!(matches!(result, Err(GmError::SpecimenMismatch(_))));
    }

    #[test]
    fn test_shape_matrix_layout() {
        let set = LandmarkSet::new(vec![triangle("a", 0.0), triangle("b", 2.0)]).unwrap();
        let m = set.to_shape_matrix();
        assert_eq!(m.shape(), (2, 6));
        assert_eq!(m[(1, 0)], 2.0);
        assert_eq!(m[(1, 5)], 1.0);

        let back = LandmarkSet::from_shape_matrix(&set.specimen_ids(), &m).unwrap();
        assert_eq!(back.specimens()[1].coords, set.specimens()[1].coords);
    }

    #[test]
    fn test_subset_follows_requested_order() {
        let set = LandmarkSet::new(vec![triangle("a", 0.0), triangle("b", 1.0), triangle("c", 2.0)])
            .unwrap();
        let sub = set.subset(&["c".to_string(), "a".to_string()]).unwrap();
        assert_eq!(sub.specimen_ids(), vec!["c", "a"]);
        assert!(set.subset(&["z".to_string()]).is_err());
    }

    #[test]
    fn test_drop_incomplete() {
        let mut gap = triangle("b", 1.0);
        gap.coords[1] = [f64::NAN, f64::NAN];
        let set = LandmarkSet::new(vec![triangle("a", 0.0), gap]).unwrap();

        assert!(set.has_missing());
        assert_eq!(set.missing_landmarks().get("b"), Some(&vec![1]));

        let (complete, dropped) = set.drop_incomplete().unwrap();
        assert_eq!(complete.n_specimens(), 1);
        assert_eq!(dropped, vec!["b"]);
    }

    #[test]
    fn test_apply_scale() {
        let mut s = triangle("a", 0.0);
        s.scale = Some(2.0);
        let set = LandmarkSet::new(vec![s]).unwrap().apply_scale();
        assert_eq!(set.specimens()[0].coords[1], [2.0, 0.0]);
        assert_eq!(set.specimens()[0].scale, None);
    }
}
