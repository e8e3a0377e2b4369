//! Analysis configuration
//!
//! Immutable settings shared by every pipeline stage: the canonical destination
//! order, the starting coordinate, the raw file conventions, and the on-disk
//! layout of inputs and outputs. Loaded from TOML; every field has a default
//! matching the NavCity task.

use crate::error::ComputeError;
use crate::types::{Position, SessionKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Destination names in canonical output order
pub const DEFAULT_DESTINATIONS: [&str; 8] = [
    "Automobile shop",
    "Police station ", // trailing space is part of the logged label
    "Fire Station",
    "Bank",
    "Pawn Shop",
    "Pizzeria",
    "Quattroki Restaurant",
    "High School",
];

/// Starting coordinate of every trial
pub const DEFAULT_START_POSITION: Position = Position { x: 0.0, z: -4.1 };

/// Label of the trailing rows written after the last destination is reached
pub const MISSION_COMPLETE: &str = "Mission complete";

/// What to do with destinations missing from the canonical list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownDestinationPolicy {
    /// Omit the destination from the output
    #[default]
    Drop,
    /// Fail the session with `ComputeError::UnknownDestination`
    Reject,
}

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Canonical destination order
    pub destinations: Vec<String>,
    pub unknown_destinations: UnknownDestinationPolicy,
    /// Fixed starting coordinate used for orientation time
    pub start_position: Position,
    /// Raw file conventions
    pub raw: RawFormatConfig,
    /// Directory and file naming
    pub layout: LayoutConfig,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            destinations: DEFAULT_DESTINATIONS.iter().map(|d| d.to_string()).collect(),
            unknown_destinations: UnknownDestinationPolicy::default(),
            start_position: DEFAULT_START_POSITION,
            raw: RawFormatConfig::default(),
            layout: LayoutConfig::default(),
        }
    }
}

/// Conventions of the raw session log format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawFormatConfig {
    /// Metadata rows following the header line
    pub metadata_rows: usize,
    /// Destination label marking the end of the task
    pub mission_complete_label: String,
}

impl Default for RawFormatConfig {
    fn default() -> Self {
        Self {
            metadata_rows: 3,
            mission_complete_label: MISSION_COMPLETE.to_string(),
        }
    }
}

/// Directory and file naming. Templates accept `{participant}` and `{block}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Block numbers recorded per participant
    pub blocks: Vec<u32>,
    /// Participant folder name prefixes
    pub participant_prefixes: Vec<String>,
    /// Raw session file, relative to the participant folder
    pub raw_file: String,
    /// Per-session results file, relative to the participant output folder
    pub results_file: String,
    pub merged_file: String,
    pub averaged_file: String,
    /// Folder (under the output directory) for trajectory tables
    pub trajectory_dir: String,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            blocks: vec![1, 2, 3],
            participant_prefixes: vec!["BNC".to_string(), "NAV".to_string()],
            raw_file: "Saved_data_{participant}_t{block}.csv".to_string(),
            results_file: "b{block}_results.csv".to_string(),
            merged_file: "merged_results.csv".to_string(),
            averaged_file: "averaged_results.csv".to_string(),
            trajectory_dir: "Target_Data".to_string(),
        }
    }
}

impl LayoutConfig {
    /// Path of the raw log for one session
    pub fn raw_path(&self, data_folder: &Path, key: &SessionKey) -> PathBuf {
        data_folder
            .join(&key.participant)
            .join(render_template(&self.raw_file, key))
    }

    /// Path of the per-session statistics table
    pub fn results_path(&self, output_dir: &Path, key: &SessionKey) -> PathBuf {
        output_dir
            .join(&key.participant)
            .join(render_template(&self.results_file, key))
    }

    pub fn merged_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.merged_file)
    }

    pub fn averaged_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.averaged_file)
    }

    pub fn trajectory_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.trajectory_dir)
    }

    /// Trajectory table of one destination in one block
    pub fn trajectory_block_path(&self, output_dir: &Path, block: u32, destination: &str) -> PathBuf {
        self.trajectory_path(output_dir)
            .join(format!("b{}_{}_results.csv", block, file_label(destination)))
    }

    /// Trajectory table of one destination across all blocks
    pub fn trajectory_all_path(&self, output_dir: &Path, destination: &str) -> PathBuf {
        self.trajectory_path(output_dir)
            .join(format!("all_{}_results.csv", file_label(destination)))
    }

    /// Whether a folder name looks like a participant id
    pub fn is_participant(&self, name: &str) -> bool {
        self.participant_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Destination label as used in file names: trimmed, with anything other than
/// ASCII letters, digits and `-` replaced by `_`
pub fn file_label(destination: &str) -> String {
    destination
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

fn render_template(template: &str, key: &SessionKey) -> String {
    template
        .replace("{participant}", &key.participant)
        .replace("{block}", &key.block.to_string())
}

impl AnalysisConfig {
    /// Position of a destination in the canonical order
    pub fn canonical_rank(&self, destination: &str) -> Option<usize> {
        self.destinations.iter().position(|d| d == destination)
    }

    /// Parse configuration from TOML; omitted fields take their defaults
    pub fn from_toml(toml_str: &str) -> Result<Self, ComputeError> {
        let config: Self =
            toml::from_str(toml_str).map_err(|e| ComputeError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ComputeError> {
        if !path.exists() {
            return Err(ComputeError::MissingFile(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        tracing::info!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    /// Generate TOML representation
    pub fn to_toml(&self) -> Result<String, ComputeError> {
        toml::to_string_pretty(self).map_err(|e| ComputeError::ConfigError(e.to_string()))
    }

    fn validate(&self) -> Result<(), ComputeError> {
        if self.destinations.is_empty() {
            return Err(ComputeError::ConfigError(
                "destinations must not be empty".to_string(),
            ));
        }
        for (i, name) in self.destinations.iter().enumerate() {
            if self.destinations[..i].contains(name) {
                return Err(ComputeError::ConfigError(format!(
                    "duplicate destination {:?}",
                    name
                )));
            }
            if name.trim().is_empty() {
                return Err(ComputeError::ConfigError(
                    "destination names must not be blank".to_string(),
                ));
            }
            let label = file_label(name);
            if let Some(other) = self.destinations[..i].iter().find(|d| file_label(d) == label) {
                return Err(ComputeError::ConfigError(format!(
                    "destinations {:?} and {:?} share the file name label {:?}",
                    other, name, label
                )));
            }
        }
        if !self.start_position.x.is_finite() || !self.start_position.z.is_finite() {
            return Err(ComputeError::ConfigError(
                "start_position must be finite".to_string(),
            ));
        }
        if self.layout.blocks.is_empty() {
            return Err(ComputeError::ConfigError(
                "layout.blocks must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
