//! Trajectory extraction
//!
//! Builds the per-destination waypoint tables used to draw overhead maps of
//! every participant's route. Rendering itself happens elsewhere; this module
//! only produces the coordinates.

use crate::types::{Position, PositionKey, Sample, SessionKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One waypoint of one participant's route to a destination
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryPoint {
    pub participant: String,
    pub block: u32,
    pub position: Position,
    pub destination: String,
}

/// Waypoints of one destination group: the last sample at each distinct
/// position, ordered by where that last sample appears
pub fn last_occurrence_waypoints(samples: &[&Sample]) -> Vec<Position> {
    let mut last_index: HashMap<PositionKey, usize> = HashMap::new();
    for (i, sample) in samples.iter().enumerate() {
        last_index.insert(sample.position.key(), i);
    }

    samples
        .iter()
        .enumerate()
        .filter(|(i, sample)| last_index.get(&sample.position.key()) == Some(i))
        .map(|(_, sample)| sample.position)
        .collect()
}

/// Trajectory tables keyed by destination, per block and across all blocks
#[derive(Debug, Clone, Default)]
pub struct TrajectoryCollector {
    destinations: Vec<String>,
    by_block: BTreeMap<(u32, usize), Vec<TrajectoryPoint>>,
    all_blocks: BTreeMap<usize, Vec<TrajectoryPoint>>,
}

impl TrajectoryCollector {
    /// Collect tables for the given destinations (canonical order)
    pub fn new(destinations: &[String]) -> Self {
        Self {
            destinations: destinations.to_vec(),
            ..Default::default()
        }
    }

    /// Add the waypoints of one session
    pub fn add_session(&mut self, key: &SessionKey, samples: &[Sample]) {
        for (rank, destination) in self.destinations.iter().enumerate() {
            let group: Vec<&Sample> = samples
                .iter()
                .filter(|s| &s.destination == destination)
                .collect();
            if group.is_empty() {
                continue;
            }

            let points: Vec<TrajectoryPoint> = last_occurrence_waypoints(&group)
                .into_iter()
                .map(|position| TrajectoryPoint {
                    participant: key.participant.clone(),
                    block: key.block,
                    position,
                    destination: destination.clone(),
                })
                .collect();

            self.by_block
                .entry((key.block, rank))
                .or_default()
                .extend(points.iter().cloned());
            self.all_blocks.entry(rank).or_default().extend(points);
        }
    }

    /// Tables per (block, destination), in block then canonical order
    pub fn block_tables(&self) -> impl Iterator<Item = (u32, &str, &[TrajectoryPoint])> {
        self.by_block.iter().map(|(&(block, rank), points)| {
            (block, self.destinations[rank].as_str(), points.as_slice())
        })
    }

    /// Tables per destination across every block, in canonical order
    pub fn combined_tables(&self) -> impl Iterator<Item = (&str, &[TrajectoryPoint])> {
        self.all_blocks
            .iter()
            .map(|(&rank, points)| (self.destinations[rank].as_str(), points.as_slice()))
    }
}
