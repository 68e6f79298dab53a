//! Serializable figure description.
//!
//! A figure is a titled 2D plot made of layers. Figures carry no rendering
//! state: the viewer draws them, and they are exported as JSON next to the
//! numeric results.

use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use super::color::Rgb;
use crate::error::Result;

/// One drawable element of a figure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Layer {
    /// Scatter of points; named layers appear in the legend.
    Points {
        name: Option<String>,
        points: Vec<[f64; 2]>,
        color: Rgb,
        radius: f32,
    },
    /// Connected polyline.
    Line {
        name: Option<String>,
        points: Vec<[f64; 2]>,
        color: Rgb,
        width: f32,
        #[serde(default)]
        dashed: bool,
    },
    /// Independent line segments (wireframes, displacement vectors).
    Segments {
        name: Option<String>,
        segments: Vec<[[f64; 2]; 2]>,
        color: Rgb,
        width: f32,
    },
    /// Closed outline, optionally filled.
    Polygon {
        name: Option<String>,
        points: Vec<[f64; 2]>,
        color: Rgb,
        fill_alpha: u8,
    },
    /// Text anchored at a position.
    Text {
        position: [f64; 2],
        text: String,
        color: Rgb,
    },
}

impl Layer {
    /// Points of the layer, for bounds computation.
    fn coordinates(&self) -> Vec<[f64; 2]> {
        match self {
            Layer::Points { points, .. }
            | Layer::Line { points, .. }
            | Layer::Polygon { points, .. } => points.clone(),
            Layer::Segments { segments, .. } => segments.iter().flatten().copied().collect(),
            Layer::Text { position, .. } => vec![*position],
        }
    }
}

/// A titled 2D plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Figure {
    /// File stem used on export.
    pub id: String,
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    /// Landmark plots need equal axis scaling.
    #[serde(default)]
    pub equal_aspect: bool,
    #[serde(default)]
    pub x_limits: Option<[f64; 2]>,
    #[serde(default)]
    pub y_limits: Option<[f64; 2]>,
    pub layers: Vec<Layer>,
}

impl Figure {
    pub fn new(id: &str, title: &str) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            x_label: String::new(),
            y_label: String::new(),
            equal_aspect: false,
            x_limits: None,
            y_limits: None,
            layers: Vec::new(),
        }
    }

    pub fn labels(mut self, x: &str, y: &str) -> Self {
        self.x_label = x.to_string();
        self.y_label = y.to_string();
        self
    }

    pub fn equal_aspect(mut self) -> Self {
        self.equal_aspect = true;
        self
    }

    pub fn limits(mut self, x: Option<[f64; 2]>, y: Option<[f64; 2]>) -> Self {
        self.x_limits = x;
        self.y_limits = y;
        self
    }

    pub fn push(&mut self, layer: Layer) {
        self.layers.push(layer);
    }

    /// Data bounds `[min_x, max_x, min_y, max_y]`, or the explicit limits
    /// where they are set. `None` for an empty figure.
    pub fn bounds(&self) -> Option<[f64; 4]> {
        let coords: Vec<[f64; 2]> = self
            .layers
            .iter()
            .flat_map(|l| l.coordinates())
            .filter(|p| p[0].is_finite() && p[1].is_finite())
            .collect();
        if coords.is_empty() && (self.x_limits.is_none() || self.y_limits.is_none()) {
            return None;
        }
        let fold = |axis: usize| {
            coords.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                (lo.min(p[axis]), hi.max(p[axis]))
            })
        };
        let (x0, x1) = self.x_limits.map(|l| (l[0], l[1])).unwrap_or_else(|| fold(0));
        let (y0, y1) = self.y_limits.map(|l| (l[0], l[1])).unwrap_or_else(|| fold(1));
        Some([x0, x1, y0, y1])
    }
}

/// Write each figure as `<dir>/<id>.json`.
pub fn write_figures<P: AsRef<Path>>(dir: P, figures: &[Figure]) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    figures
        .iter()
        .map(|figure| {
            let path = dir.join(format!("{}.json", figure.id));
            fs::write(&path, serde_json::to_string_pretty(figure)?)?;
            debug!("Wrote figure {}", path.display());
            Ok(path)
        })
        .collect()
}

/// Read all `*.json` figures in a directory, ordered by file name.
pub fn read_figures<P: AsRef<Path>>(dir: P) -> Result<Vec<Figure>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    paths.sort();
    paths
        .iter()
        .map(|p| Ok(serde_json::from_str(&fs::read_to_string(p)?)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample() -> Figure {
        let mut fig = Figure::new("01_sample", "Sample").labels("x", "y");
        fig.push(Layer::Points {
            name: Some("a".into()),
            points: vec![[0.0, 1.0], [2.0, -1.0]],
            color: Rgb::RED,
            radius: 2.0,
        });
        fig.push(Layer::Segments {
            name: None,
            segments: vec![[[-1.0, 0.0], [0.0, 3.0]]],
            color: Rgb::BLACK,
            width: 1.0,
        });
        fig
    }

    #[test]
    fn test_bounds() {
        let fig = sample();
        assert_eq!(fig.bounds(), Some([-1.0, 2.0, -1.0, 3.0]));

        let limited = sample().limits(Some([-5.0, 5.0]), None);
        assert_eq!(limited.bounds(), Some([-5.0, 5.0, -1.0, 3.0]));
        assert_eq!(Figure::new("e", "Empty").bounds(), None);
    }

    #[test]
    fn test_write_and_read_back() {
        let dir = TempDir::new().unwrap();
        let figs = vec![sample(), Figure::new("00_empty", "Empty")];
        let paths = write_figures(dir.path(), &figs).unwrap();
        assert_eq!(paths.len(), 2);

        let json = std::fs::read_to_string(&paths[0]).unwrap();
        assert!(json.contains("\"kind\": \"points\""));

        let back = read_figures(dir.path()).unwrap();
        assert_eq!(back[0].id, "00_empty");
        assert_eq!(back[1], figs[0]);
    }
}
