//! Session and cohort aggregation
//!
//! This module combines per-session statistics into the cohort tables:
//! - the merged table, one row per (participant, block, destination)
//! - the averaged table, one row per (participant, block)
//!
//! Undefined values never count as zero: a mean is taken over the defined
//! values of each field independently.

use crate::types::{AveragedRow, MergedRow, MetricField, MetricValues, SessionKey, StatisticsRecord};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Flat table of statistics rows across sessions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedTable {
    rows: Vec<MergedRow>,
}

impl MergedTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: Vec<MergedRow>) -> Self {
        Self { rows }
    }

    /// Append the records of one session, tagged with its key
    pub fn push_session(&mut self, key: &SessionKey, records: &[StatisticsRecord]) {
        self.rows.extend(records.iter().map(|record| MergedRow {
            cohort: None,
            participant: key.participant.clone(),
            block: key.block,
            destination: record.destination.clone(),
            values: record.values(),
        }));
    }

    pub fn rows(&self) -> &[MergedRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<MergedRow> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Per-session means across destinations
    pub fn average(&self) -> Vec<AveragedRow> {
        average_rows(&self.rows)
    }
}

/// Concatenate the records of many sessions into one merged table
pub fn merge<'a, I>(sessions: I) -> MergedTable
where
    I: IntoIterator<Item = (&'a SessionKey, &'a [StatisticsRecord])>,
{
    let mut table = MergedTable::new();
    for (key, records) in sessions {
        table.push_session(key, records);
    }
    table
}

/// Average merged rows per (cohort, participant, block), in order of first appearance
pub fn average_rows(rows: &[MergedRow]) -> Vec<AveragedRow> {
    let mut order: Vec<(Option<&str>, SessionKey)> = Vec::new();
    let mut groups: HashMap<(Option<&str>, SessionKey), Vec<&MergedRow>> = HashMap::new();

    for row in rows {
        let key = (row.cohort.as_deref(), row.session_key());
        groups
            .entry(key.clone())
            .or_insert_with(|| {
                order.push(key);
                Vec::new()
            })
            .push(row);
    }

    order
        .into_iter()
        .map(|key| {
            let members = &groups[&key];
            let (cohort, session) = key;
            AveragedRow {
                cohort: cohort.map(str::to_string),
                participant: session.participant,
                block: session.block,
                values: mean_values(members.iter().map(|row| &row.values)),
            }
        })
        .collect()
}

/// Field-wise mean over the defined values
pub fn mean_values<'a, I>(values: I) -> MetricValues
where
    I: IntoIterator<Item = &'a MetricValues>,
{
    let mut sums = [0.0f64; MetricField::COUNT];
    let mut counts = [0usize; MetricField::COUNT];

    for row in values {
        for (i, (_, value)) in row.iter().enumerate() {
            if let Some(v) = value {
                sums[i] += v;
                counts[i] += 1;
            }
        }
    }

    let mut mean = MetricValues::default();
    for (i, field) in MetricField::ALL.iter().enumerate() {
        if counts[i] > 0 {
            mean.set(*field, Some(sums[i] / counts[i] as f64));
        }
    }
    mean
}

/// Rows that carry a cohort label
pub trait CohortRow {
    fn set_cohort(&mut self, cohort: &str);
}

impl CohortRow for MergedRow {
    fn set_cohort(&mut self, cohort: &str) {
        self.cohort = Some(cohort.to_string());
    }
}

impl CohortRow for AveragedRow {
    fn set_cohort(&mut self, cohort: &str) {
        self.cohort = Some(cohort.to_string());
    }
}

/// Label each table with its cohort and concatenate them in the given order
pub fn combine_cohorts<T: CohortRow>(tables: Vec<(String, Vec<T>)>) -> Vec<T> {
    let mut combined = Vec::new();
    for (cohort, rows) in tables {
        combined.extend(rows.into_iter().map(|mut row| {
            row.set_cohort(&cohort);
            row
        }));
    }
    combined
}
