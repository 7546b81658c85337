//! Persisted run records
//!
//! A [`SheetRecord`] is a snapshot of everything a run produced: title, version, when it was last
//! edited, what it ran on, and every step's verdict, observation, and note in procedure order. The
//! sheet hands a fresh snapshot to its [`Recorder`] after every change.

use std::{
    fs,
    io,
    path::{ Path, PathBuf },
};
use chrono::{ DateTime, Local };
use log::debug;
use serde::{ Deserialize, Serialize };
use thiserror::Error;
use crate::step::{ Compliance, Step };

#[derive(Debug, Error)]
pub enum RecordError
{
    #[error("failed to access record {path}: {source}")]
    Io
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord
{
    #[serde(rename = "ref")]
    pub reference: Option<String>,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    pub compliance: Option<Compliance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&Step> for StepRecord
{
    fn from(step: &Step) -> Self
    {
        Self {
            reference: step.reference().map(str::to_owned),
            text: step.procedure().to_owned(),
            input: step.input().map(str::to_owned),
            compliance: step.compliance().verdict(),
            note: step.note().map(str::to_owned),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformInfo
{
    pub os: String,
    pub family: String,
    pub arch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo
{
    pub platform: PlatformInfo,
    pub package: String,
    pub package_version: String,
}

impl SystemInfo
{
    /// Describe the machine and build this process is running as
    pub fn current() -> Self
    {
        Self {
            platform: PlatformInfo {
                os: std::env::consts::OS.to_owned(),
                family: std::env::consts::FAMILY.to_owned(),
                arch: std::env::consts::ARCH.to_owned(),
            },
            package: env!("CARGO_PKG_NAME").to_owned(),
            package_version: env!("CARGO_PKG_VERSION").to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SheetRecord
{
    pub last_edit: DateTime<Local>,
    pub title: String,
    pub version: Option<String>,
    pub system: SystemInfo,
    pub steps: Vec<StepRecord>,
}

impl SheetRecord
{
    pub fn to_json(&self) -> Result<String, RecordError>
    {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the record as pretty JSON, creating parent directories as needed
    pub fn write_to(&self, path: &Path) -> Result<(), RecordError>
    {
        let json = self.to_json()?;
        let io_err = |source| RecordError::Io { path: path.to_owned(), source: source };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        fs::write(path, json).map_err(io_err)?;
        debug!("wrote sheet record to {}", path.display());
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, RecordError>
    {
        let json = fs::read_to_string(path).map_err(|source| RecordError::Io {
            path: path.to_owned(),
            source: source,
        })?;

        Ok(serde_json::from_str(&json)?)
    }
}

/// Receives a snapshot after every change to a sheet
pub trait Recorder: Send
{
    fn record(&mut self, record: &SheetRecord) -> Result<(), RecordError>;
}

/// Discards every record
#[derive(Debug, Default)]
pub struct NullRecorder;

impl Recorder for NullRecorder
{
    fn record(&mut self, _record: &SheetRecord) -> Result<(), RecordError>
    {
        Ok(())
    }
}

/// Overwrites a single scratch file with the latest record
#[derive(Debug, Clone)]
pub struct JsonFileRecorder
{
    path: PathBuf,
}

impl JsonFileRecorder
{
    pub const SCRATCH_FILE: &'static str = "tmp.json";

    pub fn new(path: impl Into<PathBuf>) -> Self
    {
        Self { path: path.into() }
    }

    /// Scratch file inside a data directory
    pub fn in_dir(data_dir: &Path) -> Self
    {
        Self::new(data_dir.join(Self::SCRATCH_FILE))
    }

    pub fn path(&self) -> &Path
    {
        &self.path
    }
}

impl Recorder for JsonFileRecorder
{
    fn record(&mut self, record: &SheetRecord) -> Result<(), RecordError>
    {
        record.write_to(&self.path)
    }
}

/// File name for a finished run: title reduced to a slug plus a local timestamp
pub fn record_file_name(title: &str, at: &DateTime<Local>) -> String
{
    let mut slug = String::with_capacity(title.len());

    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        }
        else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }

    let slug = slug.trim_end_matches('-');
    let slug = if slug.is_empty() { "sheet" } else { slug };

    format!("{}_{}.json", slug, at.format("%Y%m%d-%H%M%S"))
}
