use std::collections::BTreeMap;

use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};

use crate::error::{GmError, Result};

// ---------------------------------------------------------------------------
// Colour value
// ---------------------------------------------------------------------------

/// An 8-bit sRGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const GREY: Rgb = Rgb::new(160, 160, 160);
    pub const RED: Rgb = Rgb::new(220, 40, 40);
    pub const BLUE: Rgb = Rgb::new(40, 90, 200);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        let bad = || GmError::InvalidParameter(format!("Invalid colour '{}'", hex));
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(bad());
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).map_err(|_| bad());
        Ok(Self::new(channel(0)?, channel(2)?, channel(4)?))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

// ---------------------------------------------------------------------------
// Palette generator
// ---------------------------------------------------------------------------

/// An ordered list of colours, reused cyclically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    colors: Vec<Rgb>,
}

impl Palette {
    /// `n` visually distinct colours using evenly spaced hues.
    pub fn generate(n: usize) -> Self {
        let colors = (0..n)
            .map(|i| {
                let hue = (i as f32 / n as f32) * 360.0;
                let hsl = Hsl::new(hue, 0.75, 0.55);
                let rgb: Srgb = hsl.into_color();
                Rgb::new(
                    (rgb.red * 255.0) as u8,
                    (rgb.green * 255.0) as u8,
                    (rgb.blue * 255.0) as u8,
                )
            })
            .collect();
        Self { colors }
    }

    /// Analyst-chosen colours in hex notation.
    pub fn from_hex(colors: &[String]) -> Result<Self> {
        Ok(Self {
            colors: colors.iter().map(|c| Rgb::from_hex(c)).collect::<Result<_>>()?,
        })
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Colour `i`, wrapping around when the palette is shorter.
    pub fn color(&self, i: usize) -> Rgb {
        if self.colors.is_empty() {
            Rgb::GREY
        } else {
            self.colors[i % self.colors.len()]
        }
    }
}

// ---------------------------------------------------------------------------
// Colour mapping: group label → Rgb
// ---------------------------------------------------------------------------

/// Maps group labels to distinct colours.
#[derive(Debug, Clone)]
pub struct GroupColors {
    mapping: BTreeMap<String, Rgb>,
    default_color: Rgb,
}

impl GroupColors {
    /// Assign colours to `levels` in order. Without a palette, one is generated.
    pub fn new(levels: &[String], palette: Option<&Palette>) -> Self {
        let generated;
        let palette = match palette {
            Some(p) if !p.is_empty() => p,
            _ => {
                generated = Palette::generate(levels.len());
                &generated
            }
        };
        let mapping = levels
            .iter()
            .enumerate()
            .map(|(i, level)| (level.clone(), palette.color(i)))
            .collect();
        Self {
            mapping,
            default_color: Rgb::GREY,
        }
    }

    /// Build from the distinct labels found in `labels`, sorted.
    pub fn from_labels(labels: &[String], palette: Option<&Palette>) -> Self {
        let mut levels = labels.to_vec();
        levels.sort();
        levels.dedup();
        Self::new(&levels, palette)
    }

    pub fn color_for(&self, level: &str) -> Rgb {
        self.mapping.get(level).copied().unwrap_or(self.default_color)
    }

    /// Legend entries (label → colour), sorted by label.
    pub fn legend_entries(&self) -> Vec<(String, Rgb)> {
        self.mapping.iter().map(|(l, c)| (l.clone(), *c)).collect()
    }
}
