//! Figure builders for each analysis result.

use serde::{Deserialize, Serialize};

use super::color::{GroupColors, Rgb};
use super::figure::{Figure, Layer};
use super::hull::convex_hull;
use crate::align::gpa::Alignment;
use crate::error::Result;
use crate::model::allometry::AllometryResult;
use crate::ordinate::pca::PcaResult;
use crate::shape::outliers::OutlierReport;
use crate::shape::spline::{deformation_grid, magnify};
use crate::test::disparity::DisparityResult;

/// Wireframe link between two landmarks (zero-based indices).
pub type Link = [usize; 2];

/// How a shape difference is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeformationStyle {
    /// Thin-plate spline warped grid.
    #[default]
    Grid,
    /// Displacement vectors from reference to target.
    Vectors,
    /// Reference and target landmarks overlaid.
    Points,
}

/// Options for PCA scatter plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PcaPlotOptions {
    /// Components on the x and y axes (zero-based).
    pub pcs: [usize; 2],
    /// Draw a convex hull around each group.
    pub hulls: bool,
    pub x_limits: Option<[f64; 2]>,
    pub y_limits: Option<[f64; 2]>,
}

impl Default for PcaPlotOptions {
    fn default() -> Self {
        Self {
            pcs: [0, 1],
            hulls: true,
            x_limits: None,
            y_limits: None,
        }
    }
}

const GRID_LINES: usize = 20;

fn link_segments(config: &[[f64; 2]], links: &[Link]) -> Vec<[[f64; 2]; 2]> {
    links
        .iter()
        .filter(|l| l[0] < config.len() && l[1] < config.len())
        .map(|l| [config[l[0]], config[l[1]]])
        .collect()
}

fn wireframe(config: &[[f64; 2]], links: &[Link], color: Rgb) -> Option<Layer> {
    if links.is_empty() {
        return None;
    }
    Some(Layer::Segments {
        name: None,
        segments: link_segments(config, links),
        color,
        width: 1.5,
    })
}

/// One points layer per group (named for the legend), or a single layer.
fn grouped_points(
    points: &[[f64; 2]],
    groups: Option<&[String]>,
    colors: Option<&GroupColors>,
    radius: f32,
) -> Vec<Layer> {
    match groups {
        Some(labels) => {
            let fallback;
            let colors = match colors {
                Some(c) => c,
                None => {
                    fallback = GroupColors::from_labels(labels, None);
                    &fallback
                }
            };
            colors
                .legend_entries()
                .into_iter()
                .filter_map(|(level, color)| {
                    let members: Vec<[f64; 2]> = points
                        .iter()
                        .zip(labels)
                        .filter(|(_, l)| **l == level)
                        .map(|(p, _)| *p)
                        .collect();
                    if members.is_empty() {
                        return None;
                    }
                    Some(Layer::Points {
                        name: Some(level),
                        points: members,
                        color,
                        radius,
                    })
                })
                .collect()
        }
        None => vec![Layer::Points {
            name: None,
            points: points.to_vec(),
            color: Rgb::BLACK,
            radius,
        }],
    }
}

/// Every aligned landmark over the consensus configuration.
pub fn all_specimens_figure(alignment: &Alignment, links: &[Link]) -> Figure {
    let mut fig = Figure::new("aligned_specimens", "Procrustes-aligned specimens")
        .labels("x", "y")
        .equal_aspect();
    fig.push(Layer::Points {
        name: Some("specimens".to_string()),
        points: alignment.aligned.iter().flatten().copied().collect(),
        color: Rgb::GREY,
        radius: 1.0,
    });
    if let Some(layer) = wireframe(&alignment.consensus, links, Rgb::BLACK) {
        fig.push(layer);
    }
    fig.push(Layer::Points {
        name: Some("consensus".to_string()),
        points: alignment.consensus.clone(),
        color: Rgb::BLACK,
        radius: 3.0,
    });
    for (i, p) in alignment.consensus.iter().enumerate() {
        fig.push(Layer::Text {
            position: *p,
            text: (i + 1).to_string(),
            color: Rgb::BLUE,
        });
    }
    fig
}

/// Distances to the consensus in rank order with the outlier threshold.
pub fn outlier_figure(report: &OutlierReport) -> Figure {
    let mut fig = Figure::new("outliers", "Procrustes distance to consensus")
        .labels("Rank", "Procrustes distance");
    let n = report.entries.len();
    let (flagged, regular): (Vec<_>, Vec<_>) = report
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| ([(i + 1) as f64, e.distance], e))
        .partition(|(_, e)| e.is_outlier);

    fig.push(Layer::Points {
        name: Some("specimens".to_string()),
        points: regular.iter().map(|(p, _)| *p).collect(),
        color: Rgb::BLACK,
        radius: 2.0,
    });
    if !flagged.is_empty() {
        fig.push(Layer::Points {
            name: Some("outliers".to_string()),
            points: flagged.iter().map(|(p, _)| *p).collect(),
            color: Rgb::RED,
            radius: 3.0,
        });
        for (p, e) in &flagged {
            fig.push(Layer::Text {
                position: *p,
                text: e.specimen_id.clone(),
                color: Rgb::RED,
            });
        }
    }
    for (name, value) in [("median", report.median), ("threshold", report.threshold)] {
        fig.push(Layer::Line {
            name: Some(name.to_string()),
            points: vec![[1.0, value], [n.max(1) as f64, value]],
            color: Rgb::GREY,
            width: 1.0,
            dashed: name == "threshold",
        });
    }
    fig
}

/// Scatter of two principal components, coloured by group with hulls.
pub fn pca_figure(
    pca: &PcaResult,
    options: &PcaPlotOptions,
    groups: Option<&[String]>,
    colors: Option<&GroupColors>,
) -> Result<Figure> {
    let [a, b] = options.pcs;
    let xs = pca.component_scores(a)?;
    let ys = pca.component_scores(b)?;
    let points: Vec<[f64; 2]> = xs.into_iter().zip(ys).map(|(x, y)| [x, y]).collect();

    let axis = |pc: usize| format!("PC{} ({:.1}%)", pc + 1, 100.0 * pca.proportion[pc]);
    let mut fig = Figure::new(
        &format!("pca_pc{}_pc{}", a + 1, b + 1),
        &format!("PCA of shape: PC{} vs PC{}", a + 1, b + 1),
    )
    .labels(&axis(a), &axis(b))
    .limits(options.x_limits, options.y_limits);

    let layers = grouped_points(&points, groups, colors, 2.5);
    if options.hulls && groups.is_some() {
        for layer in &layers {
            if let Layer::Points {
                points: members,
                color,
                name,
                ..
            } = layer
            {
                let hull = convex_hull(members);
                if hull.len() >= 3 {
                    fig.push(Layer::Polygon {
                        name: name.as_ref().map(|n| format!("{} hull", n)),
                        points: hull,
                        color: *color,
                        fill_alpha: 40,
                    });
                }
            }
        }
    }
    for layer in layers {
        fig.push(layer);
    }
    Ok(fig)
}

/// Regression score against log centroid size with a least-squares line.
pub fn allometry_figure(result: &AllometryResult, colors: Option<&GroupColors>) -> Figure {
    let mut fig = Figure::new("allometry", "Allometry: regression score vs size")
        .labels("log(centroid size)", "Regression score");
    let points: Vec<[f64; 2]> = result
        .log_csize
        .iter()
        .zip(&result.regression_scores)
        .map(|(&x, &y)| [x, y])
        .collect();
    for layer in grouped_points(&points, result.groups.as_deref(), colors, 2.5) {
        fig.push(layer);
    }

    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p[1]).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p[0] - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p[0] - mean_x) * (p[1] - mean_y)).sum();
    if sxx > 0.0 {
        let slope = sxy / sxx;
        let lo = points.iter().map(|p| p[0]).fold(f64::INFINITY, f64::min);
        let hi = points.iter().map(|p| p[0]).fold(f64::NEG_INFINITY, f64::max);
        fig.push(Layer::Line {
            name: Some("fit".to_string()),
            points: vec![
                [lo, mean_y + slope * (lo - mean_x)],
                [hi, mean_y + slope * (hi - mean_x)],
            ],
            color: Rgb::GREY,
            width: 1.5,
            dashed: true,
        });
    }
    fig
}

/// Difference between two configurations, magnified.
pub fn deformation_figure(
    reference: &[[f64; 2]],
    target: &[[f64; 2]],
    style: DeformationStyle,
    magnification: f64,
    links: &[Link],
) -> Result<Figure> {
    let mut fig = Figure::new("deformation", &format!("Shape deformation (x{})", magnification))
        .labels("x", "y")
        .equal_aspect();

    match style {
        DeformationStyle::Grid => {
            let grid = deformation_grid(reference, target, GRID_LINES, magnification)?;
            for line in grid.horizontal.into_iter().chain(grid.vertical) {
                fig.push(Layer::Line {
                    name: None,
                    points: line,
                    color: Rgb::GREY,
                    width: 0.8,
                    dashed: false,
                });
            }
            if let Some(layer) = wireframe(&grid.target, links, Rgb::BLACK) {
                fig.push(layer);
            }
            fig.push(Layer::Points {
                name: Some("target".to_string()),
                points: grid.target,
                color: Rgb::BLACK,
                radius: 2.5,
            });
        }
        DeformationStyle::Vectors => {
            let magnified = magnify(reference, target, magnification);
            if let Some(layer) = wireframe(reference, links, Rgb::GREY) {
                fig.push(layer);
            }
            fig.push(Layer::Segments {
                name: Some("displacement".to_string()),
                segments: reference
                    .iter()
                    .zip(&magnified)
                    .map(|(r, t)| [*r, *t])
                    .collect(),
                color: Rgb::RED,
                width: 1.5,
            });
            fig.push(Layer::Points {
                name: Some("reference".to_string()),
                points: reference.to_vec(),
                color: Rgb::BLACK,
                radius: 2.5,
            });
        }
        DeformationStyle::Points => {
            let magnified = magnify(reference, target, magnification);
            for (config, color, name) in [
                (reference.to_vec(), Rgb::GREY, "reference"),
                (magnified, Rgb::BLACK, "target"),
            ] {
                if let Some(layer) = wireframe(&config, links, color) {
                    fig.push(layer);
                }
                fig.push(Layer::Points {
                    name: Some(name.to_string()),
                    points: config,
                    color,
                    radius: 2.5,
                });
            }
        }
    }
    Ok(fig)
}

/// Procrustes variance per group as vertical bars.
pub fn disparity_figure(result: &DisparityResult, colors: Option<&GroupColors>) -> Figure {
    let mut fig = Figure::new(
        "disparity",
        &format!("Morphological disparity by {}", result.group_column),
    )
    .labels(&result.group_column, "Procrustes variance");
    for (i, (group, pv)) in result
        .groups
        .iter()
        .zip(&result.procrustes_variance)
        .enumerate()
    {
        let x = (i + 1) as f64;
        let color = colors.map(|c| c.color_for(group)).unwrap_or(Rgb::BLUE);
        fig.push(Layer::Segments {
            name: Some(group.clone()),
            segments: vec![[[x, 0.0], [x, *pv]]],
            color,
            width: 12.0,
        });
        fig.push(Layer::Text {
            position: [x, *pv],
            text: format!("{} (n={})", group, result.n_per_group[i]),
            color: Rgb::BLACK,
        });
    }
    fig
}
