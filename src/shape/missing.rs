//! Handling of specimens with missing landmarks.

use crate::align::gpa::{gpa, GpaConfig};
use crate::align::superimpose::similarity_fit;
use crate::data::{LandmarkSet, Specimen};
use crate::error::{GmError, Result};
use crate::shape::spline::ThinPlateSpline;
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// What to do with specimens that have missing landmarks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingPolicy {
    /// Fail if any landmark is missing.
    #[default]
    Error,
    /// Remove incomplete specimens.
    Drop,
    /// Estimate missing landmarks with a thin-plate spline from the mean shape.
    Estimate,
}

/// Apply a missing-landmark policy. Returns the resolved set and the IDs of
/// specimens that were dropped or estimated.
pub fn resolve_missing(set: &LandmarkSet, policy: MissingPolicy) -> Result<(LandmarkSet, Vec<String>)> {
    if !set.has_missing() {
        return Ok((set.clone(), Vec::new()));
    }
    match policy {
        MissingPolicy::Error => {
            let ids: Vec<String> = set.missing_landmarks().into_keys().collect();
            Err(GmError::MissingLandmarks(format!(
                "{} specimen(s) have missing landmarks: {}",
                ids.len(),
                ids.join(", ")
            )))
        }
        MissingPolicy::Drop => {
            let (kept, dropped) = set.drop_incomplete()?;
            warn!(
                "Dropped {} specimen(s) with missing landmarks: {}",
                dropped.len(),
                dropped.join(", ")
            );
            Ok((kept, dropped))
        }
        MissingPolicy::Estimate => {
            let estimated: Vec<String> = set.missing_landmarks().into_keys().collect();
            let resolved = estimate_missing(set)?;
            info!("Estimated missing landmarks for {} specimen(s)", estimated.len());
            Ok((resolved, estimated))
        }
    }
}

/// Estimate missing landmarks.
///
/// The mean shape of the complete specimens is fitted onto each incomplete
/// specimen's observed landmarks (similarity transform), then a thin-plate
/// spline from the fitted mean to the specimen, built on the observed
/// landmarks, predicts the missing positions.
pub fn estimate_missing(set: &LandmarkSet) -> Result<LandmarkSet> {
    let (complete, _) = set.drop_incomplete()?;
    if complete.n_specimens() < 3 {
        return Err(GmError::MissingLandmarks(format!(
            "Estimating missing landmarks requires at least 3 complete specimens, found {}",
            complete.n_specimens()
        )));
    }
    let config = GpaConfig {
        project_tangent: false,
        ..Default::default()
    };
    let reference = gpa(&complete, &config)?.consensus;

    let specimens = set
        .specimens()
        .iter()
        .map(|s| {
            if s.is_complete() {
                Ok(s.clone())
            } else {
                estimate_specimen(s, &reference)
            }
        })
        .collect::<Result<Vec<Specimen>>>()?;

    LandmarkSet::new(specimens)
}

fn estimate_specimen(specimen: &Specimen, reference: &[[f64; 2]]) -> Result<Specimen> {
    let missing = specimen.missing_indices();
    let observed: Vec<usize> = (0..specimen.coords.len())
        .filter(|i| !missing.contains(i))
        .collect();
    if observed.len() < 3 {
        return Err(GmError::MissingLandmarks(format!(
            "Specimen '{}' has only {} observed landmarks; at least 3 are needed",
            specimen.id,
            observed.len()
        )));
    }

    let fitted = similarity_fit(reference, &specimen.coords, &observed).ok_or_else(|| {
        GmError::Numerical(format!(
            "Cannot fit mean shape to observed landmarks of '{}'",
            specimen.id
        ))
    })?;

    let src: Vec<[f64; 2]> = observed.iter().map(|&i| fitted[i]).collect();
    let dst: Vec<[f64; 2]> = observed.iter().map(|&i| specimen.coords[i]).collect();
    let spline = ThinPlateSpline::fit(&src, &dst)?;

    let mut coords = specimen.coords.clone();
    for &i in &missing {
        coords[i] = spline.transform(fitted[i]);
    }
    Ok(Specimen {
        coords,
        ..specimen.clone()
    })
}
