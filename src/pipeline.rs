//! Pipeline orchestration
//!
//! This module provides the public API for turning raw NavCity session logs
//! into result tables. It runs the stages in order:
//! 1. SampleNormalizer - Parse rows and attach time and angle deltas
//! 2. MetricEngine - Per-destination statistics
//! 3. Aggregation - Merged and averaged cohort tables
//! 4. TrajectoryCollector - Waypoint tables for route maps
//!
//! Batch runs never abort: missing or malformed files, unreadable data
//! folders and failed writes are logged and recorded in the `BatchReport`.

use crate::aggregate::{average_rows, MergedTable};
use crate::config::AnalysisConfig;
use crate::error::ComputeError;
use crate::metrics::MetricEngine;
use crate::normalizer::SampleNormalizer;
use crate::store;
use crate::trajectory::TrajectoryCollector;
use crate::types::{AveragedRow, MergedRow, SessionKey, StatisticsRecord};
use crate::{PRODUCER_NAME, VERSION};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Compute the statistics of one session log.
///
/// # Example
/// ```ignore
/// let file = File::open("BNC01/Saved_data_BNC01_t1.csv")?;
/// let records = session_statistics(file, &AnalysisConfig::default())?;
/// ```
pub fn session_statistics<R: Read>(
    reader: R,
    config: &AnalysisConfig,
) -> Result<Vec<StatisticsRecord>, ComputeError> {
    let samples = SampleNormalizer::from_reader(reader, &config.raw)?;
    MetricEngine::compute(&samples, config)
}

/// Compute the statistics of one session log on disk
pub fn process_session_file(
    path: &Path,
    config: &AnalysisConfig,
) -> Result<Vec<StatisticsRecord>, ComputeError> {
    let samples = store::read_session_samples(path, config)?;
    MetricEngine::compute(&samples, config)
}

/// One stage of a batch run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStep {
    Metrics,
    Merge,
    Average,
    Trajectories,
}

impl BatchStep {
    pub const ALL: [BatchStep; 4] = [
        BatchStep::Metrics,
        BatchStep::Merge,
        BatchStep::Average,
        BatchStep::Trajectories,
    ];
}

impl fmt::Display for BatchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStep::Metrics => "metrics",
            BatchStep::Merge => "merge",
            BatchStep::Average => "average",
            BatchStep::Trajectories => "trajectories",
        };
        f.write_str(name)
    }
}

/// A session handled by a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedSession {
    pub step: BatchStep,
    pub session: SessionKey,
}

/// A session a step could not use, and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedSession {
    pub step: BatchStep,
    pub session: SessionKey,
    pub reason: String,
}

/// A table that could not be written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedArtifact {
    pub path: PathBuf,
    pub reason: String,
}

/// Manifest of one batch run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub producer: String,
    pub version: String,
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub data_folder: PathBuf,
    pub output_dir: PathBuf,
    /// Why the data folder was skipped as a whole, if it was
    pub folder_error: Option<String>,
    pub participants: Vec<String>,
    pub processed: Vec<ProcessedSession>,
    pub skipped: Vec<SkippedSession>,
    pub artifacts: Vec<PathBuf>,
    pub failed_artifacts: Vec<FailedArtifact>,
}

impl BatchReport {
    pub fn new(data_folder: &Path, output_dir: &Path) -> Self {
        Self {
            producer: PRODUCER_NAME.to_string(),
            version: VERSION.to_string(),
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            finished_at: None,
            data_folder: data_folder.to_path_buf(),
            output_dir: output_dir.to_path_buf(),
            folder_error: None,
            participants: Vec::new(),
            processed: Vec::new(),
            skipped: Vec::new(),
            artifacts: Vec::new(),
            failed_artifacts: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> Result<String, ComputeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn processed(&mut self, step: BatchStep, session: &SessionKey) {
        self.processed.push(ProcessedSession {
            step,
            session: session.clone(),
        });
    }

    /// Record a per-session failure. Missing files are warnings, anything else
    /// is logged as an error.
    fn skip(&mut self, step: BatchStep, session: &SessionKey, error: &ComputeError) {
        match error {
            ComputeError::MissingFile(path) => {
                tracing::warn!(%step, %session, path = %path.display(), "Missing file, skipping session");
            }
            _ => {
                tracing::error!(%step, %session, %error, "Failed to process session, skipping");
            }
        }
        self.skipped.push(SkippedSession {
            step,
            session: session.clone(),
            reason: error.to_string(),
        });
    }

    fn artifact(&mut self, path: PathBuf) {
        tracing::info!(path = %path.display(), "Wrote artifact");
        self.artifacts.push(path);
    }

    fn folder_failed(&mut self, error: &ComputeError) {
        tracing::warn!(data_folder = %self.data_folder.display(), %error, "Skipping data folder");
        self.folder_error = Some(error.to_string());
    }

    /// Write one table, recording the outcome
    fn write_artifact<F>(&mut self, path: PathBuf, write: F)
    where
        F: FnOnce(BufWriter<File>) -> Result<(), ComputeError>,
    {
        match store::create_file(&path).and_then(write) {
            Ok(()) => self.artifact(path),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to write artifact");
                self.failed_artifacts.push(FailedArtifact {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }
}

/// Run the same steps over several data folders.
///
/// With an output directory and more than one folder, each folder's tables go
/// to a subfolder named after it. A folder that cannot be read is recorded in
/// its report and the remaining folders still run.
pub fn run_batches(
    config: &AnalysisConfig,
    data_folders: &[PathBuf],
    output_dir: Option<&Path>,
    steps: &[BatchStep],
) -> Vec<BatchReport> {
    data_folders
        .iter()
        .enumerate()
        .map(|(i, data_folder)| {
            let mut runner = BatchRunner::new(config.clone(), data_folder);
            if let Some(dir) = output_dir {
                let dir = if data_folders.len() > 1 {
                    let name = data_folder
                        .file_name()
                        .map(PathBuf::from)
                        .unwrap_or_else(|| PathBuf::from(format!("folder_{}", i + 1)));
                    dir.join(name)
                } else {
                    dir.to_path_buf()
                };
                runner = runner.with_output_dir(dir);
            }
            runner.run(steps)
        })
        .collect()
}

/// Batch processor over one data folder
pub struct BatchRunner {
    config: AnalysisConfig,
    data_folder: PathBuf,
    output_dir: PathBuf,
}

impl BatchRunner {
    /// Create a runner that writes its tables next to the raw logs
    pub fn new(config: AnalysisConfig, data_folder: impl Into<PathBuf>) -> Self {
        let data_folder = data_folder.into();
        Self {
            config,
            output_dir: data_folder.clone(),
            data_folder,
        }
    }

    /// Write tables to a separate folder
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Every (participant, block) pair of the data folder
    pub fn sessions(&self) -> Result<Vec<SessionKey>, ComputeError> {
        let participants = store::discover_participants(&self.data_folder, &self.config.layout)?;
        Ok(participants
            .iter()
            .flat_map(|participant| {
                self.config
                    .layout
                    .blocks
                    .iter()
                    .map(move |&block| SessionKey::new(participant.clone(), block))
            })
            .collect())
    }

    /// Run the given steps in order and return the manifest
    pub fn run(&self, steps: &[BatchStep]) -> BatchReport {
        let mut report = BatchReport::new(&self.data_folder, &self.output_dir);
        match store::discover_participants(&self.data_folder, &self.config.layout) {
            Ok(participants) => report.participants = participants,
            Err(e) => {
                report.folder_failed(&e);
                report.finish();
                return report;
            }
        }
        tracing::info!(
            run_id = %report.run_id,
            data_folder = %self.data_folder.display(),
            participants = report.participants.len(),
            "Starting batch run"
        );

        for step in steps {
            let result = match step {
                BatchStep::Metrics => self.run_metrics(&mut report),
                BatchStep::Merge => self.run_merge(&mut report).map(|_| ()),
                BatchStep::Average => self.run_average(&mut report).map(|_| ()),
                BatchStep::Trajectories => self.run_trajectories(&mut report),
            };
            // Only folder discovery fails a whole step
            if let Err(e) = result {
                report.folder_failed(&e);
                break;
            }
        }

        report.finish();
        tracing::info!(
            processed = report.processed.len(),
            skipped = report.skipped.len(),
            "Batch run finished"
        );
        report
    }

    /// Compute and write per-session statistics tables
    pub fn run_metrics(&self, report: &mut BatchReport) -> Result<(), ComputeError> {
        let layout = &self.config.layout;
        for session in self.sessions()? {
            let raw = layout.raw_path(&self.data_folder, &session);
            let records = match process_session_file(&raw, &self.config) {
                Ok(records) => records,
                Err(e) => {
                    report.skip(BatchStep::Metrics, &session, &e);
                    continue;
                }
            };

            let path = layout.results_path(&self.output_dir, &session);
            let written = store::create_file(&path)
                .and_then(|file| store::write_session_results(file, &records));
            match written {
                Ok(()) => {
                    report.processed(BatchStep::Metrics, &session);
                    report.artifact(path);
                }
                Err(e) => report.skip(BatchStep::Metrics, &session, &e),
            }
        }
        Ok(())
    }

    /// Read every per-session table that exists
    fn collect_results(&self, step: BatchStep, report: &mut BatchReport) -> Result<MergedTable, ComputeError> {
        let mut rows: Vec<MergedRow> = Vec::new();
        for session in self.sessions()? {
            let path = self.config.layout.results_path(&self.output_dir, &session);
            let read = store::open_file(&path)
                .and_then(|file| store::read_session_results(file, &session));
            match read {
                Ok(session_rows) => {
                    rows.extend(session_rows);
                    report.processed(step, &session);
                }
                Err(e) => report.skip(step, &session, &e),
            }
        }
        Ok(MergedTable::from_rows(rows))
    }

    /// Concatenate the per-session tables into the merged table
    pub fn run_merge(&self, report: &mut BatchReport) -> Result<MergedTable, ComputeError> {
        let table = self.collect_results(BatchStep::Merge, report)?;

        let path = self.config.layout.merged_path(&self.output_dir);
        report.write_artifact(path, |file| store::write_merged(file, table.rows()));
        Ok(table)
    }

    /// Average each per-session table into one row per session
    pub fn run_average(&self, report: &mut BatchReport) -> Result<Vec<AveragedRow>, ComputeError> {
        let table = self.collect_results(BatchStep::Average, report)?;
        let averaged = average_rows(table.rows());

        let path = self.config.layout.averaged_path(&self.output_dir);
        report.write_artifact(path, |file| store::write_averaged(file, &averaged));
        Ok(averaged)
    }

    /// Write waypoint tables per (block, destination) and per destination
    pub fn run_trajectories(&self, report: &mut BatchReport) -> Result<(), ComputeError> {
        let layout = &self.config.layout;
        let mut collector = TrajectoryCollector::new(&self.config.destinations);

        for session in self.sessions()? {
            let raw = layout.raw_path(&self.data_folder, &session);
            match store::read_session_samples(&raw, &self.config) {
                Ok(samples) => {
                    collector.add_session(&session, &samples);
                    report.processed(BatchStep::Trajectories, &session);
                }
                Err(e) => report.skip(BatchStep::Trajectories, &session, &e),
            }
        }

        for (block, destination, points) in collector.block_tables() {
            let path = layout.trajectory_block_path(&self.output_dir, block, destination);
            report.write_artifact(path, |file| store::write_trajectory(file, points));
        }
        for (destination, points) in collector.combined_tables() {
            let path = layout.trajectory_all_path(&self.output_dir, destination);
            report.write_artifact(path, |file| store::write_trajectory(file, points));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MetricField;
    use pretty_assertions::assert_eq;
    use std::fs;

    const HEADER: &str = "Lapsed Time,Target Name,X,Y,Z,X Euler Angle,Y Euler Angle,Z Euler Angle\n";
    const METADATA: &str = "m,,,,,,,\nm,,,,,,,\nm,,,,,,,\n";

    fn session_log(rows: &[(f64, &str, f64, f64)]) -> String {
        let mut csv = String::from(HEADER);
        csv.push_str(METADATA);
        for (time, destination, x, z) in rows {
            csv.push_str(&format!("{},{},{},1,{},(0,90,0)\n", time, destination, x, z));
        }
        csv
    }

    fn bank_log() -> String {
        session_log(&[
            (0.0, "Bank", 0.0, -4.1),
            (1.0, "Bank", 0.0, -4.1),
            (2.0, "Bank", 3.0, 0.0),
            (3.0, "Bank", 3.0, 4.0),
            (4.0, "Pizzeria", 3.0, 4.0),
            (6.0, "Pizzeria", 6.0, 8.0),
            (7.0, "Mission complete", 6.0, 8.0),
        ])
    }

    fn write_log(data: &Path, participant: &str, block: u32, contents: &str) {
        let dir = data.join(participant);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("Saved_data_{}_t{}.csv", participant, block)),
            contents,
        )
        .unwrap();
    }

    #[test]
    fn test_session_statistics() {
        let records = session_statistics(bank_log().as_bytes(), &AnalysisConfig::default()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].destination, "Bank");
        assert_eq!(records[0].total_time, 3.0);
        assert_eq!(records[0].orientation_time, 1.0);
        assert_eq!(records[0].teleport_count, 3);
        assert_eq!(records[1].destination, "Pizzeria");
        assert_eq!(records[1].total_time, 3.0);
        assert_eq!(records[1].distance, 5.0);
    }

    #[test]
    fn test_process_missing_session_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = process_session_file(&dir.path().join("absent.csv"), &AnalysisConfig::default());
        assert!(matches!(result, Err(ComputeError::MissingFile(_))));
    }

    #[test]
    fn test_batch_run_skips_bad_sessions() {
        let data = tempfile::tempdir().unwrap();
        write_log(data.path(), "BNC01", 1, &bank_log());
        write_log(data.path(), "BNC01", 2, &bank_log());
        write_log(data.path(), "BNC01", 3, "Lapsed Time,Target Name\n");
        write_log(data.path(), "NAV02", 1, &bank_log());

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path());
        let report = runner.run(&BatchStep::ALL);

        assert_eq!(report.participants, vec!["BNC01", "NAV02"]);
        assert!(report.finished_at.is_some());

        let metrics_done: Vec<String> = report
            .processed
            .iter()
            .filter(|p| p.step == BatchStep::Metrics)
            .map(|p| p.session.to_string())
            .collect();
        assert_eq!(
            metrics_done,
            vec!["BNC01 block 1", "BNC01 block 2", "NAV02 block 1"]
        );

        // Malformed BNC01 t3, missing NAV02 t2 and t3
        let metrics_skipped = report
            .skipped
            .iter()
            .filter(|s| s.step == BatchStep::Metrics)
            .count();
        assert_eq!(metrics_skipped, 3);

        let merged = store::read_merged(
            store::open_file(&runner.config().layout.merged_path(data.path())).unwrap(),
        )
        .unwrap();
        assert_eq!(merged.len(), 6);
        assert_eq!(merged[4].participant, "NAV02");

        let averaged = store::read_averaged(
            store::open_file(&runner.config().layout.averaged_path(data.path())).unwrap(),
        )
        .unwrap();
        assert_eq!(averaged.len(), 3);
        assert_eq!(averaged[0].values.get(MetricField::TotalTime), Some(3.0));

        let trajectories = data.path().join("Target_Data");
        assert!(trajectories.join("b1_Bank_results.csv").is_file());
        assert!(trajectories.join("b2_Pizzeria_results.csv").is_file());
        assert!(trajectories.join("all_Bank_results.csv").is_file());
        assert!(!trajectories.join("b3_Bank_results.csv").exists());
    }

    #[test]
    fn test_separate_output_dir() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_log(data.path(), "BNC05", 1, &bank_log());

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path()).with_output_dir(out.path());
        let report = runner.run(&[BatchStep::Metrics, BatchStep::Merge]);

        assert!(out.path().join("BNC05").join("b1_results.csv").is_file());
        assert!(out.path().join("merged_results.csv").is_file());
        assert!(!data.path().join("merged_results.csv").exists());
        assert_eq!(report.artifacts.len(), 2);
    }

    #[test]
    fn test_merge_without_results_records_warnings() {
        let data = tempfile::tempdir().unwrap();
        fs::create_dir(data.path().join("BNC01")).unwrap();

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path());
        let mut report = BatchReport::new(data.path(), data.path());
        let table = runner.run_merge(&mut report).unwrap();

        assert!(table.is_empty());
        assert_eq!(report.skipped.len(), 3);
        assert!(report.skipped[0].reason.starts_with("Missing file"));
    }

    #[test]
    fn test_missing_data_folder_is_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = BatchRunner::new(AnalysisConfig::default(), dir.path().join("nowhere"));
        let report = runner.run(&BatchStep::ALL);

        assert!(report.folder_error.unwrap().starts_with("Missing file"));
        assert!(report.finished_at.is_some());
        assert!(report.artifacts.is_empty());
    }

    #[test]
    fn test_missing_folder_does_not_stop_other_folders() {
        let root = tempfile::tempdir().unwrap();
        let young = root.path().join("YA_Data");
        let older = root.path().join("OA_Data");
        write_log(&older, "BNC01", 1, &bank_log());

        let reports = run_batches(
            &AnalysisConfig::default(),
            &[young, older.clone()],
            None,
            &[BatchStep::Metrics],
        );

        assert_eq!(reports.len(), 2);
        assert!(reports[0].folder_error.is_some());
        assert!(reports[1].folder_error.is_none());
        assert!(older.join("BNC01").join("b1_results.csv").is_file());
    }

    #[test]
    fn test_run_batches_splits_output_per_folder() {
        let root = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let young = root.path().join("YA_Data");
        let older = root.path().join("OA_Data");
        write_log(&young, "BNC01", 1, &bank_log());
        write_log(&older, "BNC01", 1, &bank_log());

        run_batches(
            &AnalysisConfig::default(),
            &[young, older],
            Some(out.path()),
            &[BatchStep::Metrics],
        );

        assert!(out.path().join("YA_Data/BNC01/b1_results.csv").is_file());
        assert!(out.path().join("OA_Data/BNC01/b1_results.csv").is_file());
    }

    #[test]
    fn test_failed_session_write_skips_only_that_session() {
        let data = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        write_log(data.path(), "BNC01", 1, &bank_log());
        write_log(data.path(), "BNC02", 1, &bank_log());
        // A file where the participant output folder should go
        fs::write(out.path().join("BNC01"), "").unwrap();

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path()).with_output_dir(out.path());
        let report = runner.run(&[BatchStep::Metrics]);

        assert!(report.folder_error.is_none());
        assert!(report
            .skipped
            .iter()
            .any(|s| s.session == SessionKey::new("BNC01", 1)));
        assert_eq!(
            report.processed,
            vec![ProcessedSession {
                step: BatchStep::Metrics,
                session: SessionKey::new("BNC02", 1),
            }]
        );
        assert!(out.path().join("BNC02/b1_results.csv").is_file());
    }

    #[test]
    fn test_failed_table_write_is_recorded() {
        let data = tempfile::tempdir().unwrap();
        write_log(data.path(), "BNC01", 1, &bank_log());
        // A folder where the merged table should go
        fs::create_dir(data.path().join("merged_results.csv")).unwrap();

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path());
        let report = runner.run(&[BatchStep::Metrics, BatchStep::Merge, BatchStep::Average]);

        assert_eq!(report.failed_artifacts.len(), 1);
        assert_eq!(report.failed_artifacts[0].path, data.path().join("merged_results.csv"));
        assert!(data.path().join("averaged_results.csv").is_file());
    }

    #[test]
    fn test_trajectory_file_names_are_sanitized() {
        let data = tempfile::tempdir().unwrap();
        write_log(
            data.path(),
            "BNC01",
            1,
            &session_log(&[(0.0, "Police station ", 0.0, -4.1), (1.0, "Police station ", 1.0, 1.0)]),
        );

        let runner = BatchRunner::new(AnalysisConfig::default(), data.path());
        let report = runner.run(&[BatchStep::Trajectories]);

        let dir = data.path().join("Target_Data");
        assert!(dir.join("b1_Police_station_results.csv").is_file());
        assert!(dir.join("all_Police_station_results.csv").is_file());
        assert_eq!(report.artifacts.len(), 2);
    }

    #[test]
    fn test_report_json() {
        let report = BatchReport::new(Path::new("data"), Path::new("out"));
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

        assert_eq!(json["producer"], "navcity-metrics");
        assert_eq!(json["run_id"].as_str().unwrap().len(), 36);
        assert!(json["finished_at"].is_null());
    }
}
