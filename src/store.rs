//! CSV storage of sessions and result tables
//!
//! Column layouts:
//! - per-session results: `Target_Name, <statistics...>`
//! - merged: `[Cohort,] Participant, Block_Num, Target_Name, <statistics...>`
//! - averaged: `[Cohort,] Participant, Block_Num, <statistics...>`
//! - trajectories: `Participant, Block_num, X, Z, Target_Name`
//!
//! Undefined values are written as empty cells. Empty cells and `NaN` read
//! back as undefined.

use crate::config::{AnalysisConfig, LayoutConfig};
use crate::error::ComputeError;
use crate::normalizer::SampleNormalizer;
use crate::trajectory::TrajectoryPoint;
use crate::types::{AveragedRow, MergedRow, MetricField, MetricValues, Sample, SessionKey, StatisticsRecord};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const COHORT: &str = "Cohort";
const PARTICIPANT: &str = "Participant";
const BLOCK_NUM: &str = "Block_Num";
const TARGET_NAME: &str = "Target_Name";

/// Participant folders in a data folder, sorted by name
pub fn discover_participants(data_folder: &Path, layout: &LayoutConfig) -> Result<Vec<String>, ComputeError> {
    if !data_folder.is_dir() {
        return Err(ComputeError::MissingFile(data_folder.to_path_buf()));
    }

    let mut participants = Vec::new();
    for entry in fs::read_dir(data_folder)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if layout.is_participant(name) {
                participants.push(name.to_string());
            }
        }
    }
    participants.sort();
    Ok(participants)
}

/// Open a file for reading, reporting absence as `MissingFile`
pub fn open_file(path: &Path) -> Result<BufReader<File>, ComputeError> {
    if !path.is_file() {
        return Err(ComputeError::MissingFile(path.to_path_buf()));
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Create a file for writing, creating parent folders as needed
pub fn create_file(path: &Path) -> Result<BufWriter<File>, ComputeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(BufWriter::new(File::create(path)?))
}

/// Read and normalize a raw session log from disk
pub fn read_session_samples(path: &Path, config: &AnalysisConfig) -> Result<Vec<Sample>, ComputeError> {
    SampleNormalizer::from_reader(open_file(path)?, &config.raw)
}

fn format_value(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn parse_value(column: &str, cell: &str, line: u64) -> Result<Option<f64>, ComputeError> {
    let cell = cell.trim();
    if cell.is_empty() || cell.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    cell.parse::<f64>().map(Some).map_err(|_| {
        ComputeError::MalformedInput(format!(
            "line {}: column '{}' is not numeric: {:?}",
            line, column, cell
        ))
    })
}

fn metric_headers() -> impl Iterator<Item = &'static str> {
    MetricField::ALL.into_iter().map(|f| f.column_name())
}

/// Column positions of a table header
struct ColumnIndex {
    headers: csv::StringRecord,
}

impl ColumnIndex {
    fn new(headers: csv::StringRecord) -> Self {
        Self { headers }
    }

    fn find(&self, column: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == column)
    }

    fn require(&self, column: &str) -> Result<usize, ComputeError> {
        self.find(column).ok_or_else(|| {
            ComputeError::MalformedInput(format!("missing required column '{}'", column))
        })
    }
}

/// Parsed access to one data record
struct Row<'a> {
    record: &'a csv::StringRecord,
    line: u64,
}

impl<'a> Row<'a> {
    fn new(record: &'a csv::StringRecord) -> Self {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        Self { record, line }
    }

    fn text(&self, index: usize) -> Result<&'a str, ComputeError> {
        self.record.get(index).ok_or_else(|| {
            ComputeError::MalformedInput(format!("line {}: missing field {}", self.line, index + 1))
        })
    }

    fn block(&self, index: usize) -> Result<u32, ComputeError> {
        let text = self.text(index)?.trim();
        // Blocks may have been written as floats by spreadsheet tools
        text.parse::<u32>()
            .ok()
            .or_else(|| {
                text.parse::<f64>()
                    .ok()
                    .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= u32::MAX as f64)
                    .map(|v| v as u32)
            })
            .ok_or_else(|| {
                ComputeError::MalformedInput(format!(
                    "line {}: column '{}' is not a block number: {:?}",
                    self.line, BLOCK_NUM, text
                ))
            })
    }

    fn values(&self, metric_columns: &[usize; MetricField::COUNT]) -> Result<MetricValues, ComputeError> {
        let mut values = MetricValues::default();
        for (field, &index) in MetricField::ALL.iter().zip(metric_columns) {
            let cell = self.text(index)?;
            values.set(*field, parse_value(field.column_name(), cell, self.line)?);
        }
        Ok(values)
    }
}

fn metric_columns(index: &ColumnIndex) -> Result<[usize; MetricField::COUNT], ComputeError> {
    let mut columns = [0usize; MetricField::COUNT];
    for (slot, field) in columns.iter_mut().zip(MetricField::ALL) {
        *slot = index.require(field.column_name())?;
    }
    Ok(columns)
}

fn reader<R: Read>(input: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new().flexible(true).from_reader(input)
}

/// Write one session's statistics, one row per destination
pub fn write_session_results<W: Write>(output: W, records: &[StatisticsRecord]) -> Result<(), ComputeError> {
    let mut writer = csv::Writer::from_writer(output);

    let mut header = vec![TARGET_NAME];
    header.extend(metric_headers());
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![record.destination.clone()];
        row.extend(
            MetricField::ALL
                .iter()
                .map(|&field| format_value(Some(record.value(field)))),
        );
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read one session's statistics as merged rows tagged with the session key
pub fn read_session_results<R: Read>(input: R, key: &SessionKey) -> Result<Vec<MergedRow>, ComputeError> {
    let mut rdr = reader(input);
    let index = ColumnIndex::new(rdr.headers()?.clone());
    let target = index.require(TARGET_NAME)?;
    let metrics = metric_columns(&index)?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = Row::new(&record);
        rows.push(MergedRow {
            cohort: None,
            participant: key.participant.clone(),
            block: key.block,
            destination: row.text(target)?.to_string(),
            values: row.values(&metrics)?,
        });
    }
    Ok(rows)
}

/// Write the merged table. A cohort column is written when any row has one.
pub fn write_merged<W: Write>(output: W, rows: &[MergedRow]) -> Result<(), ComputeError> {
    let with_cohort = rows.iter().any(|r| r.cohort.is_some());
    let mut writer = csv::Writer::from_writer(output);

    let mut header = Vec::new();
    if with_cohort {
        header.push(COHORT);
    }
    header.extend([PARTICIPANT, BLOCK_NUM, TARGET_NAME]);
    header.extend(metric_headers());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = Vec::new();
        if with_cohort {
            record.push(row.cohort.clone().unwrap_or_default());
        }
        record.push(row.participant.clone());
        record.push(row.block.to_string());
        record.push(row.destination.clone());
        record.extend(row.values.iter().map(|(_, v)| format_value(v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read a merged table written by `write_merged`
pub fn read_merged<R: Read>(input: R) -> Result<Vec<MergedRow>, ComputeError> {
    let mut rdr = reader(input);
    let index = ColumnIndex::new(rdr.headers()?.clone());
    let cohort = index.find(COHORT);
    let participant = index.require(PARTICIPANT)?;
    let block = index.require(BLOCK_NUM)?;
    let target = index.require(TARGET_NAME)?;
    let metrics = metric_columns(&index)?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = Row::new(&record);
        rows.push(MergedRow {
            cohort: read_cohort(&row, cohort)?,
            participant: row.text(participant)?.to_string(),
            block: row.block(block)?,
            destination: row.text(target)?.to_string(),
            values: row.values(&metrics)?,
        });
    }
    Ok(rows)
}

fn read_cohort(row: &Row<'_>, column: Option<usize>) -> Result<Option<String>, ComputeError> {
    match column {
        Some(index) => {
            let text = row.text(index)?;
            Ok((!text.is_empty()).then(|| text.to_string()))
        }
        None => Ok(None),
    }
}

/// Write the averaged table. A cohort column is written when any row has one.
pub fn write_averaged<W: Write>(output: W, rows: &[AveragedRow]) -> Result<(), ComputeError> {
    let with_cohort = rows.iter().any(|r| r.cohort.is_some());
    let mut writer = csv::Writer::from_writer(output);

    let mut header = Vec::new();
    if with_cohort {
        header.push(COHORT);
    }
    header.extend([PARTICIPANT, BLOCK_NUM]);
    header.extend(metric_headers());
    writer.write_record(&header)?;

    for row in rows {
        let mut record = Vec::new();
        if with_cohort {
            record.push(row.cohort.clone().unwrap_or_default());
        }
        record.push(row.participant.clone());
        record.push(row.block.to_string());
        record.extend(row.values.iter().map(|(_, v)| format_value(v)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Read an averaged table written by `write_averaged`
pub fn read_averaged<R: Read>(input: R) -> Result<Vec<AveragedRow>, ComputeError> {
    let mut rdr = reader(input);
    let index = ColumnIndex::new(rdr.headers()?.clone());
    let cohort = index.find(COHORT);
    let participant = index.require(PARTICIPANT)?;
    let block = index.require(BLOCK_NUM)?;
    let metrics = metric_columns(&index)?;

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let row = Row::new(&record);
        rows.push(AveragedRow {
            cohort: read_cohort(&row, cohort)?,
            participant: row.text(participant)?.to_string(),
            block: row.block(block)?,
            values: row.values(&metrics)?,
        });
    }
    Ok(rows)
}

/// Write one trajectory table
pub fn write_trajectory<W: Write>(output: W, points: &[TrajectoryPoint]) -> Result<(), ComputeError> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record([PARTICIPANT, "Block_num", "X", "Z", TARGET_NAME])?;
    for point in points {
        writer.write_record([
            point.participant.clone(),
            point.block.to_string(),
            point.position.x.to_string(),
            point.position.z.to_string(),
            point.destination.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
