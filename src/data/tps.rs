//! Reader and writer for TPS landmark files.
//!
//! A TPS file is a sequence of specimen blocks:
//!
//! ```text
//! LM=3
//! 10.0 20.0
//! 30.0 20.0
//! 20.0 40.0
//! CURVES=1
//! POINTS=2
//! 12.0 22.0
//! 14.0 24.0
//! IMAGE=fish_01.jpg
//! ID=1
//! SCALE=0.0125
//! ```
//!
//! Keys are case-insensitive and blank lines are ignored.

use crate::data::landmarks::{LandmarkSet, Specimen};
use crate::error::{GmError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Where to take each specimen's identifier from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecimenIdSource {
    /// The `ID=` field.
    #[default]
    Id,
    /// The `IMAGE=` field with its file extension removed.
    Image,
    /// The 1-based position of the block in the file.
    Index,
}

/// Options controlling how a TPS file is read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpsOptions {
    /// Source of specimen identifiers.
    pub id_source: SpecimenIdSource,
    /// Append curve points as additional landmarks.
    pub read_curves: bool,
    /// Treat negative coordinates as missing landmarks.
    pub negative_missing: bool,
}

impl Default for TpsOptions {
    fn default() -> Self {
        Self {
            id_source: SpecimenIdSource::Id,
            read_curves: false,
            negative_missing: true,
        }
    }
}

#[derive(Default)]
struct Block {
    start_line: usize,
    landmarks: Vec<[f64; 2]>,
    curve_points: Vec<[f64; 2]>,
    image: Option<String>,
    id: Option<String>,
    scale: Option<f64>,
}

enum Expect {
    Fields,
    Landmarks(usize),
    CurveHeader(usize),
    CurvePoints { remaining: usize, curves_left: usize },
}

/// Read a TPS file from disk.
pub fn read_tps<P: AsRef<Path>>(path: P, options: &TpsOptions) -> Result<LandmarkSet> {
    let text = std::fs::read_to_string(path)?;
    parse_tps(&text, options)
}

/// Parse TPS content.
pub fn parse_tps(text: &str, options: &TpsOptions) -> Result<LandmarkSet> {
    let mut blocks: Vec<Block> = Vec::new();
    let mut current: Option<Block> = None;
    let mut expect = Expect::Fields;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }

        match expect {
            Expect::Landmarks(remaining) => {
                let block = current.as_mut().ok_or_else(|| orphan(line_no))?;
                block.landmarks.push(parse_point(line, line_no, options)?);
                expect = if remaining > 1 {
                    Expect::Landmarks(remaining - 1)
                } else {
                    Expect::Fields
                };
                continue;
            }
            Expect::CurvePoints {
                remaining,
                curves_left,
            } => {
                let block = current.as_mut().ok_or_else(|| orphan(line_no))?;
                block.curve_points.push(parse_point(line, line_no, options)?);
                expect = if remaining > 1 {
                    Expect::CurvePoints {
                        remaining: remaining - 1,
                        curves_left,
                    }
                } else if curves_left > 0 {
                    Expect::CurveHeader(curves_left)
                } else {
                    Expect::Fields
                };
                continue;
            }
            Expect::CurveHeader(_) | Expect::Fields => {}
        }

        let (key, value) = split_field(line).ok_or_else(|| GmError::TpsParse {
            line: line_no,
            reason: format!("expected KEY=value, found '{}'", line),
        })?;

        if let Expect::CurveHeader(curves_left) = expect {
            if key != "POINTS" {
                return Err(GmError::TpsParse {
                    line: line_no,
                    reason: format!("expected POINTS= inside CURVES block, found {}=", key),
                });
            }
            let n = parse_count(value, line_no)?;
            expect = if n > 0 {
                Expect::CurvePoints {
                    remaining: n,
                    curves_left: curves_left - 1,
                }
            } else if curves_left > 1 {
                Expect::CurveHeader(curves_left - 1)
            } else {
                Expect::Fields
            };
            continue;
        }

        match key.as_str() {
            "LM" => {
                if let Some(done) = current.take() {
                    blocks.push(done);
                }
                let n = parse_count(value, line_no)?;
                current = Some(Block {
                    start_line: line_no,
                    ..Default::default()
                });
                expect = if n > 0 {
                    Expect::Landmarks(n)
                } else {
                    Expect::Fields
                };
            }
            "LM3" => {
                return Err(GmError::TpsParse {
                    line: line_no,
                    reason: "3D landmark blocks (LM3=) are not supported".to_string(),
                });
            }
            "CURVES" => {
                current.as_ref().ok_or_else(|| orphan(line_no))?;
                let n = parse_count(value, line_no)?;
                expect = if n > 0 {
                    Expect::CurveHeader(n)
                } else {
                    Expect::Fields
                };
            }
            "IMAGE" => {
                current.as_mut().ok_or_else(|| orphan(line_no))?.image = Some(value.to_string());
            }
            "ID" => {
                current.as_mut().ok_or_else(|| orphan(line_no))?.id = Some(value.to_string());
            }
            "SCALE" => {
                let scale = value.parse::<f64>().map_err(|_| GmError::TpsParse {
                    line: line_no,
                    reason: format!("invalid SCALE value '{}'", value),
                })?;
                current.as_mut().ok_or_else(|| orphan(line_no))?.scale = Some(scale);
            }
            "COMMENT" | "VARIABLES" => {}
            other => {
                debug!("Ignoring unknown TPS field {}= at line {}", other, line_no);
            }
        }
    }

    match expect {
        Expect::Fields => {}
        _ => {
            return Err(GmError::TpsParse {
                line: text.lines().count(),
                reason: "unexpected end of file inside a coordinate block".to_string(),
            })
        }
    }
    if let Some(done) = current.take() {
        blocks.push(done);
    }
    if blocks.is_empty() {
        return Err(GmError::EmptyData("No LM= blocks in TPS data".to_string()));
    }

    let n_landmarks = blocks[0].landmarks.len()
        + if options.read_curves {
            blocks[0].curve_points.len()
        } else {
            0
        };

    let mut specimens = Vec::with_capacity(blocks.len());
    for (i, block) in blocks.into_iter().enumerate() {
        let id = specimen_id(&block, i + 1, options.id_source);
        let mut coords = block.landmarks;
        if options.read_curves {
            coords.extend(block.curve_points);
        }
        if coords.len() != n_landmarks {
            return Err(GmError::TpsParse {
                line: block.start_line,
                reason: format!(
                    "specimen '{}' has {} points, expected {}",
                    id,
                    coords.len(),
                    n_landmarks
                ),
            });
        }
        specimens.push(Specimen {
            id,
            image: block.image,
            scale: block.scale,
            coords,
        });
    }

    LandmarkSet::new(specimens)
}

/// Write a landmark set in TPS format.
pub fn write_tps<P: AsRef<Path>>(set: &LandmarkSet, path: P) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    for specimen in set.specimens() {
        writeln!(writer, "LM={}", specimen.coords.len())?;
        for p in &specimen.coords {
            if p[0].is_nan() || p[1].is_nan() {
                writeln!(writer, "NA NA")?;
            } else {
                writeln!(writer, "{} {}", p[0], p[1])?;
            }
        }
        if let Some(image) = &specimen.image {
            writeln!(writer, "IMAGE={}", image)?;
        }
        writeln!(writer, "ID={}", specimen.id)?;
        if let Some(scale) = specimen.scale {
            writeln!(writer, "SCALE={}", scale)?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn specimen_id(block: &Block, index: usize, source: SpecimenIdSource) -> String {
    let from_field = match source {
        SpecimenIdSource::Id => block.id.clone(),
        SpecimenIdSource::Image => block.image.as_deref().map(strip_extension),
        SpecimenIdSource::Index => return index.to_string(),
    };
    from_field.unwrap_or_else(|| {
        warn!(
            "Specimen block at line {} has no {:?} field; using index {}",
            block.start_line, source, index
        );
        index.to_string()
    })
}

fn strip_extension(name: &str) -> String {
    match name.rfind('.') {
        Some(pos) if pos > 0 => name[..pos].to_string(),
        _ => name.to_string(),
    }
}

fn split_field(line: &str) -> Option<(String, &str)> {
    let (key, value) = line.split_once('=')?;
    Some((key.trim().to_ascii_uppercase(), value.trim()))
}

fn parse_count(value: &str, line: usize) -> Result<usize> {
    value.parse::<usize>().map_err(|_| GmError::TpsParse {
        line,
        reason: format!("invalid count '{}'", value),
    })
}

fn parse_point(line: &str, line_no: usize, options: &TpsOptions) -> Result<[f64; 2]> {
    let fields: Vec<&str> = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .collect();
    if fields.len() != 2 {
        return Err(GmError::TpsParse {
            line: line_no,
            reason: format!("expected 2 coordinates, found {}", fields.len()),
        });
    }
    let mut point = [0.0; 2];
    for (slot, field) in point.iter_mut().zip(&fields) {
        *slot = parse_coordinate(field, line_no)?;
    }
    if point.iter().any(|v| v.is_nan()) || (options.negative_missing && point.iter().any(|&v| v < 0.0)) {
        return Ok([f64::NAN, f64::NAN]);
    }
    Ok(point)
}

fn parse_coordinate(field: &str, line: usize) -> Result<f64> {
    match field {
        "NA" | "na" | "NaN" | "nan" | "?" => Ok(f64::NAN),
        _ => field.parse::<f64>().map_err(|_| GmError::TpsParse {
            line,
            reason: format!("invalid coordinate '{}'", field),
        }),
    }
}

fn orphan(line: usize) -> GmError {
    GmError::TpsParse {
        line,
        reason: "field appears before the first LM= line".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = "\
LM=3
1.0 2.0
3.0 2.0
2.0 4.0
CURVES=1
POINTS=2
1.5 2.5
2.5 2.5
IMAGE=fish_01.jpg
ID=7
SCALE=0.5

lm=3
1.1 2.1
3.1 2.0
2.0 -1.0
image=fish_02.JPG
id=8
";

    #[test]
    fn test_parse_ids_and_fields() {
        let set = parse_tps(SAMPLE, &TpsOptions::default()).unwrap();
        assert_eq!(set.n_specimens(), 2);
        assert_eq!(set.n_landmarks(), 3);
        assert_eq!(set.specimen_ids(), vec!["7", "8"]);

        let first = &set.specimens()[0];
        assert_eq!(first.image.as_deref(), Some("fish_01.jpg"));
        assert_eq!(first.scale, Some(0.5));
        assert_eq!(first.coords[2], [2.0, 4.0]);
    }

    #[test]
    fn test_negative_coordinates_are_missing() {
        let set = parse_tps(SAMPLE, &TpsOptions::default()).unwrap();
        assert_eq!(set.missing_landmarks().get("8"), Some(&vec![2]));

        let keep = TpsOptions {
            negative_missing: false,
            ..Default::default()
        };
        let set = parse_tps(SAMPLE, &keep).unwrap();
        assert!(!set.has_missing());
        assert_eq!(set.specimens()[1].coords[2], [2.0, -1.0]);
    }

    #[test]
    fn test_image_and_index_ids() {
        let by_image = TpsOptions {
            id_source: SpecimenIdSource::Image,
            ..Default::default()
        };
        let set = parse_tps(SAMPLE, &by_image).unwrap();
        assert_eq!(set.specimen_ids(), vec!["fish_01", "fish_02"]);

        let by_index = TpsOptions {
            id_source: SpecimenIdSource::Index,
            ..Default::default()
        };
        let set = parse_tps(SAMPLE, &by_index).unwrap();
        assert_eq!(set.specimen_ids(), vec!["1", "2"]);
    }

    #[test]
    fn test_read_curves_requires_matching_counts() {
        let curves = TpsOptions {
            read_curves: true,
            ..Default::default()
        };
        // Second specimen has no curve points, so counts disagree.
        let result = parse_tps(SAMPLE, &curves);
        assert!(matches!(result, Err(GmError::TpsParse { .. })));

        let text = "LM=1\n0 0\nCURVES=1\nPOINTS=2\n1 1\n2 2\nID=a\nLM=1\n0 1\nCURVES=1\nPOINTS=2\n1 2\n2 3\nID=b\n";
        let set = parse_tps(text, &curves).unwrap();
        assert_eq!(set.n_landmarks(), 3);
        assert_eq!(set.specimens()[1].coords[2], [2.0, 3.0]);
    }

    #[test]
    fn test_missing_id_falls_back_to_index() {
        let text = "LM=1\n0 0\nLM=1\n1 1\nID=x\n";
        let set = parse_tps(text, &TpsOptions::default()).unwrap();
        assert_eq!(set.specimen_ids(), vec!["1", "x"]);
    }

    #[test]
    fn test_malformed_input() {
        let opts = TpsOptions::default();
        assert!(parse_tps("", &opts).is_err());
        assert!(parse_tps("ID=1\nLM=1\n0 0\n", &opts).is_err());
        assert!(parse_tps("LM=2\n0 0\n", &opts).is_err());
        assert!(parse_tps("LM=1\n0 zero\n", &opts).is_err());
        assert!(parse_tps("LM=1\n0 0 0\n", &opts).is_err());
        assert!(parse_tps("LM3=1\n0 0 0\n", &opts).is_err());
    }

    #[test]
    fn test_write_then_read() {
        let set = parse_tps(SAMPLE, &TpsOptions::default()).unwrap();
        let file = NamedTempFile::new().unwrap();
        write_tps(&set, file.path()).unwrap();

        let back = read_tps(file.path(), &TpsOptions::default()).unwrap();
        assert_eq!(back.specimen_ids(), set.specimen_ids());
        assert_eq!(back.specimens()[0].coords, set.specimens()[0].coords);
        assert!(back.specimens()[1].coords[2][0].is_nan());
    }
}
