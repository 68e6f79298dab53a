//! Detection of unusual specimens by distance to the consensus shape.

use crate::align::gpa::Alignment;
use serde::{Deserialize, Serialize};

/// One specimen's distance from the consensus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierEntry {
    pub specimen_id: String,
    pub distance: f64,
    pub is_outlier: bool,
}

/// Specimens ranked by Procrustes distance to the consensus (largest first).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlierReport {
    pub entries: Vec<OutlierEntry>,
    pub median: f64,
    pub upper_quartile: f64,
    pub lower_quartile: f64,
    /// Upper quartile + 1.5 × IQR.
    pub threshold: f64,
}

impl OutlierReport {
    /// IDs flagged as outliers.
    pub fn outlier_ids(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.is_outlier)
            .map(|e| e.specimen_id.as_str())
            .collect()
    }
}

/// Rank specimens by distance to the consensus and flag those beyond
/// the upper quartile + 1.5 × IQR.
pub fn find_outliers(alignment: &Alignment) -> OutlierReport {
    let distances = alignment.procrustes_distances();
    let mut sorted = distances.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let lower_quartile = quantile(&sorted, 0.25);
    let median = quantile(&sorted, 0.5);
    let upper_quartile = quantile(&sorted, 0.75);
    let threshold = upper_quartile + 1.5 * (upper_quartile - lower_quartile);

    let mut entries: Vec<OutlierEntry> = alignment
        .specimen_ids
        .iter()
        .zip(&distances)
        .map(|(id, &d)| OutlierEntry {
            specimen_id: id.clone(),
            distance: d,
            is_outlier: d > threshold,
        })
        .collect();
    entries.sort_by(|a, b| b.distance.total_cmp(&a.distance));

    OutlierReport {
        entries,
        median,
        upper_quartile,
        lower_quartile,
        threshold,
    }
}

/// Quantile of sorted data with linear interpolation between order statistics.
pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}
