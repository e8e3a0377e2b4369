//! Sample normalization
//!
//! This module turns the parsed rows of one session into typed samples:
//! - Time deltas between consecutive rows, clamped at zero
//! - Euler angles wrapped into (-180, 180] with per-axis deltas
//! - Removal of the trailing "Mission complete" rows
//!
//! Deltas are taken over the full row sequence before the sentinel rows are
//! removed, so a sample keeps the delta it had in the raw log.

use crate::config::RawFormatConfig;
use crate::error::ComputeError;
use crate::schema::{read_raw_rows, ParsedRow, RawRow};
use crate::types::{wrap_angle, AxisAngle, Orientation, Sample};
use std::io::Read;

/// Normalizer for converting raw rows into samples
pub struct SampleNormalizer;

impl SampleNormalizer {
    /// Normalize the frame rows of one session
    pub fn normalize(rows: &[RawRow], config: &RawFormatConfig) -> Result<Vec<Sample>, ComputeError> {
        let parsed = rows
            .iter()
            .map(RawRow::parse)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::normalize_parsed(parsed, config))
    }

    /// Read and normalize a raw session log
    pub fn from_reader<R: Read>(reader: R, config: &RawFormatConfig) -> Result<Vec<Sample>, ComputeError> {
        let rows = read_raw_rows(reader, config.metadata_rows)?;
        Self::normalize(&rows, config)
    }

    /// Attach derived fields and drop sentinel rows
    pub fn normalize_parsed(rows: Vec<ParsedRow>, config: &RawFormatConfig) -> Vec<Sample> {
        let mut samples = Vec::with_capacity(rows.len());
        let mut previous: Option<(f64, [f64; 3])> = None;

        for row in rows {
            let wrapped = row.angles.map(wrap_angle);

            let (time_delta, angle_deltas) = match previous {
                Some((prev_time, prev_wrapped)) => (
                    compute_time_delta(prev_time, row.elapsed_time),
                    [
                        (wrapped[0] - prev_wrapped[0]).abs(),
                        (wrapped[1] - prev_wrapped[1]).abs(),
                        (wrapped[2] - prev_wrapped[2]).abs(),
                    ],
                ),
                None => (0.0, [0.0; 3]),
            };
            previous = Some((row.elapsed_time, wrapped));

            if row.destination == config.mission_complete_label {
                continue;
            }

            let axis = |i: usize| AxisAngle {
                raw: row.angles[i],
                wrapped: wrapped[i],
                delta: angle_deltas[i],
            };

            samples.push(Sample {
                orientation: Orientation {
                    x: axis(0),
                    y: axis(1),
                    z: axis(2),
                },
                destination: row.destination,
                position: row.position,
                elapsed_time: row.elapsed_time,
                time_delta,
            });
        }

        samples
    }
}

/// Time since the previous row; clock glitches never contribute negative time
fn compute_time_delta(previous: f64, current: f64) -> f64 {
    (current - previous).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn row(time: f64, destination: &str, x: f64, z: f64, angles: [f64; 3]) -> ParsedRow {
        ParsedRow {
            elapsed_time: time,
            destination: destination.to_string(),
            position: Position::new(x, z),
            angles,
        }
    }

    #[test]
    fn test_time_deltas_clamped() {
        let rows = vec![
            row(1.0, "Bank", 0.0, 0.0, [0.0; 3]),
            row(1.5, "Bank", 0.0, 0.0, [0.0; 3]),
            row(1.2, "Bank", 0.0, 0.0, [0.0; 3]),
            row(2.2, "Bank", 0.0, 0.0, [0.0; 3]),
        ];
        let samples = SampleNormalizer::normalize_parsed(rows, &RawFormatConfig::default());

        let deltas: Vec<f64> = samples.iter().map(|s| s.time_delta).collect();
        assert_eq!(deltas[0], 0.0);
        assert_eq!(deltas[1], 0.5);
        assert_eq!(deltas[2], 0.0);
        assert!((deltas[3] - 1.0).abs() < 1e-12);
        assert_eq!(samples.len(), 4);
    }

    #[test]
    fn test_angle_wrap_and_deltas() {
        let rows = vec![
            row(0.0, "Bank", 0.0, 0.0, [350.0, 10.0, 180.0]),
            row(1.0, "Bank", 0.0, 0.0, [10.0, 20.0, 200.0]),
        ];
        let samples = SampleNormalizer::normalize_parsed(rows, &RawFormatConfig::default());

        let first = &samples[0].orientation;
        assert_eq!(first.x.wrapped, -10.0);
        assert_eq!(first.x.delta, 0.0);
        assert_eq!(first.z.wrapped, 180.0);

        let second = &samples[1].orientation;
        assert_eq!(second.x.raw, 10.0);
        assert_eq!(second.x.delta, 20.0);
        assert_eq!(second.y.delta, 10.0);
        assert_eq!(second.z.wrapped, -160.0);
        assert_eq!(second.z.delta, 340.0);
    }

    #[test]
    fn test_mission_complete_rows_dropped_after_deltas() {
        let rows = vec![
            row(0.0, "Bank", 0.0, 0.0, [0.0; 3]),
            row(1.0, "Mission complete", 0.0, 0.0, [0.0; 3]),
            row(3.0, "Pizzeria", 1.0, 1.0, [0.0; 3]),
        ];
        let samples = SampleNormalizer::normalize_parsed(rows, &RawFormatConfig::default());

        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.destination != "Mission complete"));
        // The Pizzeria delta is measured from the dropped row, not from Bank
        assert_eq!(samples[1].time_delta, 2.0);
    }

    #[test]
    fn test_from_reader() {
        let csv = "Lapsed Time,Target Name,X,Y,Z,X Euler Angle,Y Euler Angle,Z Euler Angle\n\
                   m,,,,,,,\nm,,,,,,,\nm,,,,,,,\n\
                   0.0,Bank,0,1,-4.1,(0,90,0)\n\
                   0.5,Bank,2,1,3,(270,90,359)\n\
                   0.9,Mission complete,2,1,3,(270,90,359)\n";
        let samples =
            SampleNormalizer::from_reader(csv.as_bytes(), &RawFormatConfig::default()).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].position, Position::new(0.0, -4.1));
        assert_eq!(samples[1].orientation.x.wrapped, -90.0);
        assert_eq!(samples[1].orientation.z.wrapped, -1.0);
        assert_eq!(samples[1].time_delta, 0.5);
    }

    #[test]
    fn test_malformed_row_fails_session() {
        let csv = "Lapsed Time,Target Name,X,Y,Z,X Euler Angle,Y Euler Angle,Z Euler Angle\n\
                   0.0,Bank,0,1,-4.1,(zero,90,0)\n";
        let config = RawFormatConfig {
            metadata_rows: 0,
            ..Default::default()
        };
        assert!(matches!(
            SampleNormalizer::from_reader(csv.as_bytes(), &config),
            Err(ComputeError::MalformedInput(_))
        ));
    }
}
