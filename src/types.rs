//! Core types for the NavCity metrics pipeline
//!
//! This module defines the data structures that flow through each stage of the
//! pipeline: normalized samples, per-destination statistics records, and the
//! rows of the merged and averaged cohort tables.

use crate::error::ComputeError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Planar position in the virtual city (the engine's X/Z ground plane)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }

    /// Euclidean distance to another position
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = other.x - self.x;
        let dz = other.z - self.z;
        (dx * dx + dz * dz).sqrt()
    }

    /// Hashable key with exact-equality semantics (`-0.0` and `0.0` collapse)
    pub(crate) fn key(&self) -> PositionKey {
        PositionKey(canonical_bits(self.x), canonical_bits(self.z))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PositionKey(u64, u64);

fn canonical_bits(value: f64) -> u64 {
    if value == 0.0 {
        0.0f64.to_bits()
    } else {
        value.to_bits()
    }
}

/// One orientation axis: raw reading, wrapped value, and delta from the previous row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisAngle {
    /// Raw Euler angle in degrees (0-360)
    pub raw: f64,
    /// Angle mapped into (-180, 180]
    pub wrapped: f64,
    /// Absolute change of `wrapped` from the previous row (0 for the first row)
    pub delta: f64,
}

/// Wrap an Euler angle so values above 180 degrees become negative
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > 180.0 {
        angle - 360.0
    } else {
        angle
    }
}

/// Head orientation for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub x: AxisAngle,
    pub y: AxisAngle,
    pub z: AxisAngle,
}

/// One observed instant of a session, with derived fields attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Destination the participant was navigating toward
    pub destination: String,
    pub position: Position,
    pub orientation: Orientation,
    /// Seconds since the session started
    pub elapsed_time: f64,
    /// Non-negative time since the previous row (0 for the first row)
    pub time_delta: f64,
}

/// Numeric statistics computed per destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricField {
    TotalTime,
    OrientationTime,
    NavigationTime,
    Distance,
    Speed,
    MeanDwell,
    Teleportations,
    MeanTeleportDistance,
}

impl MetricField {
    pub const COUNT: usize = 8;

    /// All fields, in table column order
    pub const ALL: [MetricField; MetricField::COUNT] = [
        MetricField::TotalTime,
        MetricField::OrientationTime,
        MetricField::NavigationTime,
        MetricField::Distance,
        MetricField::Speed,
        MetricField::MeanDwell,
        MetricField::Teleportations,
        MetricField::MeanTeleportDistance,
    ];

    /// Column header used in result tables
    pub fn column_name(&self) -> &'static str {
        match self {
            MetricField::TotalTime => "Total_Time",
            MetricField::OrientationTime => "Orientation_Time",
            MetricField::NavigationTime => "Navigation_Time",
            MetricField::Distance => "Distance",
            MetricField::Speed => "Speed",
            MetricField::MeanDwell => "Mean_Dwell",
            MetricField::Teleportations => "Teleportations",
            MetricField::MeanTeleportDistance => "Mean_Teleport_Distance",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for MetricField {
    type Err = ComputeError;

    /// Accepts the column header (`Orientation_Time`) case-insensitively,
    /// with `-` allowed in place of `_`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        MetricField::ALL
            .iter()
            .copied()
            .find(|field| field.column_name().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| ComputeError::UnknownField(s.to_string()))
    }
}

/// Statistics for one destination of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsRecord {
    pub destination: String,
    /// Sum of time deltas in the group (seconds)
    pub total_time: f64,
    /// Time spent on the starting coordinate (seconds)
    pub orientation_time: f64,
    /// `total_time - orientation_time`, never clamped
    pub navigation_time: f64,
    /// Path length over first-occurrence positions
    pub distance: f64,
    /// `distance / navigation_time`, or 0 when navigation time is not positive
    pub speed: f64,
    /// Mean dwell over position buckets, excluding the first bucket
    pub mean_dwell: f64,
    /// Number of distinct positions visited
    pub teleport_count: usize,
    /// Mean hop length between first-occurrence positions
    pub mean_teleport_distance: f64,
}

impl StatisticsRecord {
    /// Numeric value of one field
    pub fn value(&self, field: MetricField) -> f64 {
        match field {
            MetricField::TotalTime => self.total_time,
            MetricField::OrientationTime => self.orientation_time,
            MetricField::NavigationTime => self.navigation_time,
            MetricField::Distance => self.distance,
            MetricField::Speed => self.speed,
            MetricField::MeanDwell => self.mean_dwell,
            MetricField::Teleportations => self.teleport_count as f64,
            MetricField::MeanTeleportDistance => self.mean_teleport_distance,
        }
    }

    /// All fields as nullable table values
    pub fn values(&self) -> MetricValues {
        let mut values = MetricValues::default();
        for field in MetricField::ALL {
            values.set(field, Some(self.value(field)));
        }
        values
    }
}

/// Nullable statistics values as stored in result tables (`None` = NaN)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricValues([Option<f64>; MetricField::COUNT]);

impl MetricValues {
    pub fn get(&self, field: MetricField) -> Option<f64> {
        self.0[field.index()]
    }

    pub fn set(&mut self, field: MetricField, value: Option<f64>) {
        // NaN read back from a table is the same as a missing value
        self.0[field.index()] = value.filter(|v| !v.is_nan());
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricField, Option<f64>)> + '_ {
        MetricField::ALL.into_iter().map(move |f| (f, self.get(f)))
    }
}

/// Participant and block number identifying one session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey {
    pub participant: String,
    pub block: u32,
}

impl SessionKey {
    pub fn new(participant: impl Into<String>, block: u32) -> Self {
        Self {
            participant: participant.into(),
            block,
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} block {}", self.participant, self.block)
    }
}

/// Row of the merged table: one destination of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRow {
    /// Cohort label, set when tables from several cohorts are combined
    pub cohort: Option<String>,
    pub participant: String,
    pub block: u32,
    pub destination: String,
    pub values: MetricValues,
}

impl MergedRow {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.participant.clone(), self.block)
    }
}

/// Row of the averaged table: mean across destinations of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AveragedRow {
    pub cohort: Option<String>,
    pub participant: String,
    pub block: u32,
    pub values: MetricValues,
}

impl AveragedRow {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.participant.clone(), self.block)
    }
}
