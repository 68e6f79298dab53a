//! Geometry of single 2D landmark configurations.

/// Centroid of a configuration.
pub fn centroid(points: &[[f64; 2]]) -> [f64; 2] {
    if points.is_empty() {
        return [0.0, 0.0];
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    [sx / n, sy / n]
}

/// Square root of the summed squared distances of landmarks to their centroid.
pub fn centroid_size(points: &[[f64; 2]]) -> f64 {
    let c = centroid(points);
    points
        .iter()
        .map(|p| (p[0] - c[0]).powi(2) + (p[1] - c[1]).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Translate a configuration so its centroid is at the origin.
pub fn center(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let c = centroid(points);
    points.iter().map(|p| [p[0] - c[0], p[1] - c[1]]).collect()
}

/// Scale a centered configuration to unit centroid size.
///
/// Degenerate configurations (all landmarks coincident) are returned unchanged.
pub fn scale_to_unit(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let size = sum_of_squares(points).sqrt();
    if size < 1e-12 {
        return points.to_vec();
    }
    points.iter().map(|p| [p[0] / size, p[1] / size]).collect()
}

/// Sum of squared coordinates.
pub fn sum_of_squares(points: &[[f64; 2]]) -> f64 {
    points.iter().map(|p| p[0] * p[0] + p[1] * p[1]).sum()
}

/// Rotation angle that best maps centered `source` onto centered `target`
/// in the least-squares sense. Reflections are never produced.
pub fn optimal_rotation_angle(source: &[[f64; 2]], target: &[[f64; 2]]) -> f64 {
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syx = 0.0;
    let mut syy = 0.0;
    for (s, t) in source.iter().zip(target) {
        sxx += s[0] * t[0];
        sxy += s[0] * t[1];
        syx += s[1] * t[0];
        syy += s[1] * t[1];
    }
    (sxy - syx).atan2(sxx + syy)
}

/// Rotate a configuration about the origin.
pub fn rotate(points: &[[f64; 2]], angle: f64) -> Vec<[f64; 2]> {
    let (sin_a, cos_a) = angle.sin_cos();
    points
        .iter()
        .map(|p| [cos_a * p[0] - sin_a * p[1], sin_a * p[0] + cos_a * p[1]])
        .collect()
}

/// Rotate centered `source` onto centered `target`.
pub fn rotate_onto(source: &[[f64; 2]], target: &[[f64; 2]]) -> Vec<[f64; 2]> {
    rotate(source, optimal_rotation_angle(source, target))
}

/// Euclidean distance between two superimposed configurations.
pub fn procrustes_distance(a: &[[f64; 2]], b: &[[f64; 2]]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(p, q)| (p[0] - q[0]).powi(2) + (p[1] - q[1]).powi(2))
        .sum::<f64>()
        .sqrt()
}

/// Mean configuration of a set of configurations with equal landmark counts.
pub fn mean_configuration(configs: &[Vec<[f64; 2]>]) -> Vec<[f64; 2]> {
    let Some(first) = configs.first() else {
        return Vec::new();
    };
    let n = configs.len() as f64;
    let mut mean = vec![[0.0, 0.0]; first.len()];
    for config in configs {
        for (m, p) in mean.iter_mut().zip(config) {
            m[0] += p[0];
            m[1] += p[1];
        }
    }
    for m in &mut mean {
        m[0] /= n;
        m[1] /= n;
    }
    mean
}

/// Least-squares similarity fit (translation, rotation, uniform scale) of
/// `source` onto `target`, returned as the transformed source.
///
/// Only landmark indices listed in `using` drive the fit; every landmark is
/// transformed. Returns `None` when the fitted landmarks are degenerate.
pub fn similarity_fit(
    source: &[[f64; 2]],
    target: &[[f64; 2]],
    using: &[usize],
) -> Option<Vec<[f64; 2]>> {
    if using.len() < 2 {
        return None;
    }
    let src: Vec<[f64; 2]> = using.iter().map(|&i| source[i]).collect();
    let tar: Vec<[f64; 2]> = using.iter().map(|&i| target[i]).collect();
    let src_c = centroid(&src);
    let tar_c = centroid(&tar);

    let src_centered: Vec<[f64; 2]> = src.iter().map(|p| [p[0] - src_c[0], p[1] - src_c[1]]).collect();
    let tar_centered: Vec<[f64; 2]> = tar.iter().map(|p| [p[0] - tar_c[0], p[1] - tar_c[1]]).collect();

    let src_var = sum_of_squares(&src_centered);
    if src_var < 1e-12 {
        return None;
    }
    let angle = optimal_rotation_angle(&src_centered, &tar_centered);
    let rotated = rotate(&src_centered, angle);
    let scale = rotated
        .iter()
        .zip(&tar_centered)
        .map(|(r, t)| r[0] * t[0] + r[1] * t[1])
        .sum::<f64>()
        / src_var;
    if scale <= 0.0 {
        return None;
    }

    let (sin_a, cos_a) = angle.sin_cos();
    Some(
        source
            .iter()
            .map(|p| {
                let x = p[0] - src_c[0];
                let y = p[1] - src_c[1];
                [
                    tar_c[0] + scale * (cos_a * x - sin_a * y),
                    tar_c[1] + scale * (sin_a * x + cos_a * y),
                ]
            })
            .collect(),
    )
}
