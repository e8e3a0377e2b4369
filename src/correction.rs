//! Manual corrections to cohort tables
//!
//! A reviewer may decide that one logged value is wrong (for example a trial
//! where the participant idled on the start coordinate far longer than the
//! task allows). The value is nulled in the merged table and the averaged row
//! of that session is recomputed from the corrected rows.
//!
//! Both operations are pure: they return new tables and leave persistence to
//! the caller.

use crate::aggregate::mean_values;
use crate::error::ComputeError;
use crate::types::{AveragedRow, MergedRow, MetricField, SessionKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The single merged-table cell to null out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Cohort label of the row; `None` for tables without a cohort column
    #[serde(default)]
    pub cohort: Option<String>,
    pub participant: String,
    pub block: u32,
    pub destination: String,
    pub field: MetricField,
}

impl Correction {
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.participant.clone(), self.block)
    }

    fn matches(&self, row: &MergedRow) -> bool {
        row.cohort == self.cohort
            && row.participant == self.participant
            && row.block == self.block
            && row.destination == self.destination
    }
}

impl fmt::Display for Correction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(cohort) = &self.cohort {
            write!(f, "{} ", cohort)?;
        }
        write!(
            f,
            "{} block {} {:?} {}",
            self.participant, self.block, self.destination, self.field
        )
    }
}

/// Null one field of the merged table.
///
/// Orientation time is part of total time, so nulling `Orientation_Time` also
/// subtracts the old value from `Total_Time` on the same row. Every row that
/// matches the key is corrected.
pub fn apply_correction(
    rows: &[MergedRow],
    correction: &Correction,
) -> Result<Vec<MergedRow>, ComputeError> {
    if !rows.iter().any(|row| correction.matches(row)) {
        return Err(ComputeError::CorrectionTargetNotFound(correction.to_string()));
    }

    let corrected = rows
        .iter()
        .map(|row| {
            if !correction.matches(row) {
                return row.clone();
            }

            let mut row = row.clone();
            if correction.field == MetricField::OrientationTime {
                if let Some(orientation) = row.values.get(MetricField::OrientationTime) {
                    let total = row.values.get(MetricField::TotalTime).map(|t| t - orientation);
                    row.values.set(MetricField::TotalTime, total);
                }
            }
            row.values.set(correction.field, None);
            row
        })
        .collect();

    Ok(corrected)
}

/// Recompute the averaged row of one session from corrected merged rows.
///
/// Sessions are keyed by cohort as well, so the same participant id in two
/// cohorts is two sessions. Every field of the averaged row is recomputed, so
/// derived changes (such as the total time adjustment) propagate as well.
pub fn recompute_average(
    merged: &[MergedRow],
    averaged: &[AveragedRow],
    cohort: Option<&str>,
    session: &SessionKey,
) -> Result<Vec<AveragedRow>, ComputeError> {
    let in_session = |row_cohort: &Option<String>, key: SessionKey| {
        row_cohort.as_deref() == cohort && key == *session
    };

    let session_rows: Vec<&MergedRow> = merged
        .iter()
        .filter(|row| in_session(&row.cohort, row.session_key()))
        .collect();

    if !averaged.iter().any(|row| in_session(&row.cohort, row.session_key())) {
        let label = cohort.map(|c| format!("{} ", c)).unwrap_or_default();
        return Err(ComputeError::CorrectionTargetNotFound(format!(
            "no averaged row for {}{}",
            label, session
        )));
    }

    let values = mean_values(session_rows.iter().map(|row| &row.values));

    Ok(averaged
        .iter()
        .map(|row| {
            let mut row = row.clone();
            if in_session(&row.cohort, row.session_key()) {
                row.values = values;
            }
            row
        })
        .collect())
}

/// Apply a correction and recompute the dependent averaged row
pub fn correct_tables(
    merged: &[MergedRow],
    averaged: &[AveragedRow],
    correction: &Correction,
) -> Result<(Vec<MergedRow>, Vec<AveragedRow>), ComputeError> {
    let merged = apply_correction(merged, correction)?;
    let averaged = recompute_average(
        &merged,
        averaged,
        correction.cohort.as_deref(),
        &correction.session_key(),
    )?;
    tracing::info!(%correction, "Applied correction");
    Ok((merged, averaged))
}
