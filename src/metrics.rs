//! Per-destination metric computation
//!
//! This module derives one statistics record per destination from the samples
//! of a session:
//! - Total, orientation and navigation time
//! - Path length and speed over first-occurrence positions
//! - Mean dwell per visited position
//! - Teleport count and mean teleport distance
//!
//! The logger samples at a fixed rate, so a stationary participant produces
//! long runs of identical coordinates. Distance-like metrics therefore work on
//! the list of distinct positions in order of first appearance, treating each
//! visited coordinate as one waypoint.

use crate::config::{AnalysisConfig, UnknownDestinationPolicy};
use crate::error::ComputeError;
use crate::types::{Position, PositionKey, Sample, StatisticsRecord};
use std::collections::{HashMap, HashSet};

/// Metric engine for computing per-destination statistics
pub struct MetricEngine;

impl MetricEngine {
    /// Compute one record per destination present, in canonical order.
    ///
    /// Destinations missing from the canonical list are dropped, or rejected
    /// when the configuration asks for it.
    pub fn compute(
        samples: &[Sample],
        config: &AnalysisConfig,
    ) -> Result<Vec<StatisticsRecord>, ComputeError> {
        let mut groups: HashMap<&str, Vec<&Sample>> = HashMap::new();
        for sample in samples {
            groups
                .entry(sample.destination.as_str())
                .or_default()
                .push(sample);
        }

        let mut unknown: Vec<&str> = groups
            .keys()
            .copied()
            .filter(|name| config.canonical_rank(name).is_none())
            .collect();
        unknown.sort_unstable();

        if let Some(first) = unknown.first() {
            match config.unknown_destinations {
                UnknownDestinationPolicy::Reject => {
                    return Err(ComputeError::UnknownDestination(first.to_string()));
                }
                UnknownDestinationPolicy::Drop => {
                    tracing::debug!(destinations = ?unknown, "Dropping destinations outside canonical order");
                }
            }
        }

        let records = config
            .destinations
            .iter()
            .filter_map(|name| {
                groups
                    .get(name.as_str())
                    .map(|group| Self::compute_group(name, group, config.start_position))
            })
            .collect();

        Ok(records)
    }

    /// Compute the statistics of a single destination group
    pub fn compute_group(
        destination: &str,
        group: &[&Sample],
        start: Position,
    ) -> StatisticsRecord {
        let total_time = compute_total_time(group);
        let orientation_time = compute_orientation_time(group, start);
        let navigation_time = total_time - orientation_time;

        let waypoints = first_occurrence_positions(group);
        let distance = compute_path_length(&waypoints);
        let speed = compute_speed(distance, navigation_time);
        let mean_dwell = compute_mean_dwell(group);
        let mean_teleport_distance = compute_mean_teleport_distance(&waypoints);

        StatisticsRecord {
            destination: destination.to_string(),
            total_time,
            orientation_time,
            navigation_time,
            distance,
            speed,
            mean_dwell,
            teleport_count: waypoints.len(),
            mean_teleport_distance,
        }
    }
}

/// Sum of time deltas in the group
fn compute_total_time(group: &[&Sample]) -> f64 {
    group.iter().map(|s| s.time_delta).sum()
}

/// Sum of time deltas spent exactly on the starting coordinate
fn compute_orientation_time(group: &[&Sample], start: Position) -> f64 {
    let start_key = start.key();
    group
        .iter()
        .filter(|s| s.position.key() == start_key)
        .map(|s| s.time_delta)
        .sum()
}

/// Distinct positions in order of first appearance
pub fn first_occurrence_positions(group: &[&Sample]) -> Vec<Position> {
    let mut seen: HashSet<PositionKey> = HashSet::new();
    group
        .iter()
        .filter(|s| seen.insert(s.position.key()))
        .map(|s| s.position)
        .collect()
}

/// Euclidean length of the path through consecutive waypoints
fn compute_path_length(waypoints: &[Position]) -> f64 {
    waypoints
        .windows(2)
        .map(|pair| pair[0].distance_to(&pair[1]))
        .sum()
}

/// Distance over navigation time; zero when navigation time is not positive
fn compute_speed(distance: f64, navigation_time: f64) -> f64 {
    if navigation_time > 0.0 {
        distance / navigation_time
    } else {
        0.0
    }
}

/// Mean dwell over position buckets, skipping the first bucket.
///
/// Samples are bucketed by coordinate value, so returning to a position extends
/// the original bucket. Dwell is the elapsed time between the first and last
/// sample of a bucket. The first bucket is the position the participant started
/// the trial from and is not counted.
fn compute_mean_dwell(group: &[&Sample]) -> f64 {
    // (first elapsed, last elapsed) per bucket, in first-encountered order
    let mut buckets: Vec<(f64, f64)> = Vec::new();
    let mut index: HashMap<PositionKey, usize> = HashMap::new();

    for sample in group {
        let key = sample.position.key();
        match index.get(&key).copied() {
            Some(i) => buckets[i].1 = sample.elapsed_time,
            None => {
                index.insert(key, buckets.len());
                buckets.push((sample.elapsed_time, sample.elapsed_time));
            }
        }
    }

    if buckets.len() < 2 {
        return 0.0;
    }

    let dwells: Vec<f64> = buckets[1..].iter().map(|(first, last)| last - first).collect();
    mean(&dwells)
}

/// Mean hop length between consecutive waypoints
fn compute_mean_teleport_distance(waypoints: &[Position]) -> f64 {
    if waypoints.len() < 2 {
        return 0.0;
    }
    let hops: Vec<f64> = waypoints
        .windows(2)
        .map(|pair| pair[0].distance_to(&pair[1]))
        .collect();
    mean(&hops)
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AxisAngle, Orientation};
    use pretty_assertions::assert_eq;

    const START: Position = Position { x: 0.0, z: -4.1 };

    fn sample(destination: &str, x: f64, z: f64, elapsed_time: f64, time_delta: f64) -> Sample {
        let axis = AxisAngle {
            raw: 0.0,
            wrapped: 0.0,
            delta: 0.0,
        };
        Sample {
            destination: destination.to_string(),
            position: Position::new(x, z),
            orientation: Orientation {
                x: axis,
                y: axis,
                z: axis,
            },
            elapsed_time,
            time_delta,
        }
    }

    /// Samples at the given positions, one second apart
    fn trace(destination: &str, positions: &[(f64, f64)]) -> Vec<Sample> {
        positions
            .iter()
            .enumerate()
            .map(|(i, &(x, z))| sample(destination, x, z, i as f64, if i == 0 { 0.0 } else { 1.0 }))
            .collect()
    }

    fn config_with(destinations: &[&str]) -> AnalysisConfig {
        AnalysisConfig {
            destinations: destinations.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn group_record(samples: &[Sample]) -> StatisticsRecord {
        let refs: Vec<&Sample> = samples.iter().collect();
        MetricEngine::compute_group("D", &refs, START)
    }

    #[test]
    fn test_repeated_positions() {
        let samples = trace(
            "D",
            &[
                (0.0, -4.1),
                (0.0, -4.1),
                (0.0, -4.1),
                (5.0, 5.0),
                (5.0, 5.0),
                (5.0, 5.0),
                (0.0, -4.1),
            ],
        );
        let record = group_record(&samples);
        let hop = START.distance_to(&Position::new(5.0, 5.0));

        assert_eq!(record.teleport_count, 2);
        assert_eq!(record.distance, hop);
        assert_eq!(record.mean_teleport_distance, hop);
        assert_eq!(record.total_time, 6.0);
        // deltas of samples 2, 3 and 7 are on the start coordinate
        assert_eq!(record.orientation_time, 3.0);
        assert_eq!(record.navigation_time, 3.0);
        assert_eq!(record.speed, hop / 3.0);
        // bucket (5,5) spans t=3..5; the start bucket is skipped
        assert_eq!(record.mean_dwell, 2.0);
    }

    #[test]
    fn test_time_identity() {
        let samples = vec![
            sample("D", 0.0, -4.1, 0.0, 0.0),
            sample("D", 0.0, -4.1, 0.3, 0.3),
            sample("D", 1.0, 2.0, 0.7, 0.4),
            sample("D", 3.0, 2.0, 1.8, 1.1),
        ];
        let record = group_record(&samples);
        assert!(
            (record.total_time - (record.orientation_time + record.navigation_time)).abs() < 1e-12
        );
    }

    #[test]
    fn test_single_position() {
        let samples = trace("D", &[(2.0, 2.0), (2.0, 2.0), (2.0, 2.0)]);
        let record = group_record(&samples);

        assert_eq!(record.teleport_count, 1);
        assert_eq!(record.distance, 0.0);
        assert_eq!(record.mean_teleport_distance, 0.0);
        assert_eq!(record.mean_dwell, 0.0);
        assert_eq!(record.speed, 0.0);
        assert_eq!(record.navigation_time, 2.0);
    }

    #[test]
    fn test_speed_zero_without_navigation_time() {
        // Only the first sample is off the start coordinate and it carries no time
        let samples = vec![
            sample("D", 9.0, 9.0, 0.0, 0.0),
            sample("D", 0.0, -4.1, 1.0, 1.0),
            sample("D", 0.0, -4.1, 2.0, 1.0),
        ];
        let record = group_record(&samples);

        assert!(record.distance > 0.0);
        assert_eq!(record.navigation_time, 0.0);
        assert_eq!(record.speed, 0.0);
    }

    #[test]
    fn test_mean_dwell_excludes_first_bucket() {
        let samples = vec![
            sample("D", 0.0, 0.0, 0.0, 0.0),
            sample("D", 0.0, 0.0, 4.0, 4.0),
            sample("D", 1.0, 0.0, 5.0, 1.0),
            sample("D", 1.0, 0.0, 6.0, 1.0),
            sample("D", 2.0, 0.0, 7.0, 1.0),
            sample("D", 2.0, 0.0, 10.0, 3.0),
        ];
        let record = group_record(&samples);
        // buckets: (0,0)=4 skipped, (1,0)=1, (2,0)=3
        assert_eq!(record.mean_dwell, 2.0);
    }

    #[test]
    fn test_mean_dwell_revisit_extends_bucket() {
        let samples = vec![
            sample("D", 0.0, 0.0, 0.0, 0.0),
            sample("D", 1.0, 0.0, 1.0, 1.0),
            sample("D", 2.0, 0.0, 2.0, 1.0),
            sample("D", 1.0, 0.0, 6.0, 4.0),
        ];
        let record = group_record(&samples);
        // (1,0) spans t=1..6, (2,0) spans nothing
        assert_eq!(record.mean_dwell, 2.5);
        assert_eq!(record.teleport_count, 3);
    }

    #[test]
    fn test_path_length_over_waypoints() {
        let samples = trace(
            "D",
            &[(0.0, 0.0), (3.0, 4.0), (3.0, 4.0), (3.0, 10.0), (0.0, 0.0)],
        );
        let record = group_record(&samples);

        assert_eq!(record.teleport_count, 3);
        assert_eq!(record.distance, 11.0);
        assert_eq!(record.mean_teleport_distance, 5.5);
    }

    #[test]
    fn test_signed_zero_is_start_position() {
        let samples = vec![
            sample("D", -0.0, -4.1, 0.0, 0.0),
            sample("D", 0.0, -4.1, 2.0, 2.0),
        ];
        let record = group_record(&samples);
        assert_eq!(record.teleport_count, 1);
        assert_eq!(record.orientation_time, 2.0);
    }

    #[test]
    fn test_orientation_requires_exact_start() {
        let samples = vec![
            sample("D", 0.0, -4.1, 0.0, 0.0),
            sample("D", 0.0, -4.1000001, 1.0, 1.0),
            sample("D", 1e-9, -4.1, 2.0, 1.0),
            sample("D", 0.0, -4.1, 3.0, 1.0),
        ];
        let record = group_record(&samples);

        // Near misses are neither orientation time nor the start bucket
        assert_eq!(record.orientation_time, 1.0);
        assert_eq!(record.navigation_time, 2.0);
        assert_eq!(record.teleport_count, 3);
    }

    #[test]
    fn test_canonical_order_omits_absent() {
        let mut samples = trace("D3", &[(1.0, 1.0), (2.0, 2.0)]);
        samples.extend(trace("D1", &[(0.0, 0.0), (1.0, 0.0)]));

        let records = MetricEngine::compute(&samples, &config_with(&["D1", "D2", "D3"])).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.destination.as_str()).collect();
        assert_eq!(names, vec!["D1", "D3"]);
    }

    #[test]
    fn test_groups_preserve_interleaved_order() {
        let mut samples = trace("D1", &[(0.0, 0.0)]);
        samples.extend(trace("D2", &[(5.0, 0.0)]));
        samples.push(sample("D1", 3.0, 4.0, 2.0, 1.0));

        let records = MetricEngine::compute(&samples, &config_with(&["D1", "D2"])).unwrap();
        assert_eq!(records[0].distance, 5.0);
        assert_eq!(records[0].total_time, 1.0);
        assert_eq!(records[1].teleport_count, 1);
    }

    #[test]
    fn test_unknown_destination_dropped() {
        let mut samples = trace("D1", &[(0.0, 0.0)]);
        samples.extend(trace("Typo", &[(1.0, 1.0)]));

        let records = MetricEngine::compute(&samples, &config_with(&["D1"])).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].destination, "D1");
    }

    #[test]
    fn test_unknown_destination_rejected() {
        let samples = trace("Typo", &[(1.0, 1.0)]);
        let config = AnalysisConfig {
            unknown_destinations: UnknownDestinationPolicy::Reject,
            ..config_with(&["D1"])
        };

        match MetricEngine::compute(&samples, &config) {
            Err(ComputeError::UnknownDestination(name)) => assert_eq!(name, "Typo"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_empty_session() {
        let records = MetricEngine::compute(&[], &AnalysisConfig::default()).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_deterministic() {
        let mut samples = trace("Bank", &[(0.0, -4.1), (1.5, 2.25), (7.0, -3.0), (1.5, 2.25)]);
        samples.extend(trace("Pizzeria", &[(7.0, -3.0), (0.1, 0.2), (0.3, 0.4)]));
        let config = AnalysisConfig::default();

        let first = MetricEngine::compute(&samples, &config).unwrap();
        let second = MetricEngine::compute(&samples, &config).unwrap();

        assert_eq!(first.len(), 2);
        for (a, b) in first.iter().zip(&second) {
            for field in crate::types::MetricField::ALL {
                assert_eq!(a.value(field).to_bits(), b.value(field).to_bits());
            }
        }
    }
}
