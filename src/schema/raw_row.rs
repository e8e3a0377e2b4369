//! Raw session log rows
//!
//! The task logger writes one CSV per session. After the header line come a
//! few metadata rows, then one row per frame. Two of the Euler angle columns
//! carry a stray bracket from the logger's vector formatting: `X Euler Angle`
//! starts with `(` and `Z Euler Angle` ends with `)`.

use crate::error::ComputeError;
use crate::types::Position;
use serde::{Deserialize, Serialize};
use std::io::Read;

/// Columns the metrics need; any other column is ignored
pub const REQUIRED_COLUMNS: [&str; 7] = [
    "Lapsed Time",
    "Target Name",
    "X",
    "Z",
    "X Euler Angle",
    "Y Euler Angle",
    "Z Euler Angle",
];

/// One frame row as written by the task logger (values still textual)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    #[serde(rename = "Lapsed Time")]
    pub lapsed_time: String,
    #[serde(rename = "Target Name")]
    pub target_name: String,
    #[serde(rename = "X")]
    pub x: String,
    #[serde(rename = "Z")]
    pub z: String,
    #[serde(rename = "X Euler Angle")]
    pub x_angle: String,
    #[serde(rename = "Y Euler Angle")]
    pub y_angle: String,
    #[serde(rename = "Z Euler Angle")]
    pub z_angle: String,
    /// 1-based line in the source file, for error messages
    #[serde(skip)]
    pub line: u64,
}

/// A raw row with every numeric field parsed
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub elapsed_time: f64,
    pub destination: String,
    pub position: Position,
    /// Raw X, Y, Z Euler angles in degrees
    pub angles: [f64; 3],
}

impl RawRow {
    /// Parse the numeric fields, stripping the bracket characters
    pub fn parse(&self) -> Result<ParsedRow, ComputeError> {
        let elapsed_time = self.number("Lapsed Time", &self.lapsed_time)?;
        let x = self.number("X", &self.x)?;
        let z = self.number("Z", &self.z)?;
        let x_angle = self.number("X Euler Angle", strip_leading_bracket(&self.x_angle))?;
        let y_angle = self.number("Y Euler Angle", &self.y_angle)?;
        let z_angle = self.number("Z Euler Angle", strip_trailing_bracket(&self.z_angle))?;

        Ok(ParsedRow {
            elapsed_time,
            destination: self.target_name.clone(),
            position: Position::new(x, z),
            angles: [x_angle, y_angle, z_angle],
        })
    }

    fn number(&self, column: &str, value: &str) -> Result<f64, ComputeError> {
        match value.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(v),
            _ => Err(ComputeError::MalformedInput(format!(
                "line {}: column '{}' is not numeric: {:?}",
                self.line, column, value
            ))),
        }
    }
}

/// Drop the `(` the logger prepends to the X angle, if present
fn strip_leading_bracket(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed.strip_prefix('(').unwrap_or(trimmed)
}

/// Drop the `)` the logger appends to the Z angle, if present
fn strip_trailing_bracket(value: &str) -> &str {
    let trimmed = value.trim();
    trimmed.strip_suffix(')').unwrap_or(trimmed)
}

/// Read the frame rows of a raw session log, discarding the metadata rows.
///
/// Destination labels are kept verbatim (including trailing spaces); only the
/// header names are trimmed.
pub fn read_raw_rows<R: Read>(reader: R, metadata_rows: usize) -> Result<Vec<RawRow>, ComputeError> {
    let mut rdr = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|column| !headers.iter().any(|h| h == *column))
        .collect();
    if !missing.is_empty() {
        return Err(ComputeError::MalformedInput(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut rows = Vec::new();
    let mut seen = 0usize;
    for result in rdr.records() {
        let record = result?;
        seen += 1;
        if seen <= metadata_rows {
            continue;
        }

        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let mut row: RawRow = record.deserialize(Some(&headers)).map_err(|e| {
            ComputeError::MalformedInput(format!("line {}: {}", line, e))
        })?;
        row.line = line;
        rows.push(row);
    }

    if seen < metadata_rows {
        return Err(ComputeError::MalformedInput(format!(
            "expected {} metadata rows, found {}",
            metadata_rows, seen
        )));
    }

    Ok(rows)
}
