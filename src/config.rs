//! Bench configuration
//!
//! ```toml
//! data_dir = "data"
//!
//! [[instrument]]
//! name = "dmm"
//! kind = "bk5492"
//! port = "/dev/ttyUSB0"
//! ```

use std::{
    fs,
    io,
    path::{ Path, PathBuf },
    sync::Arc,
    time::Duration,
};
use serde::Deserialize;
use thiserror::Error;
use crate::instrument::{ Bk5492, LineTransport, SerialOpener };

#[derive(Debug, Error)]
pub enum ConfigError
{
    #[error("failed to read config {path}: {source}")]
    Read
    {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("instrument name {0:?} is used more than once")]
    DuplicateInstrument(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind
{
    Bk5492,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InstrumentConfig
{
    pub name: String,
    pub kind: InstrumentKind,
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_change_delay_ms")]
    pub change_delay_ms: u64,
}

fn default_baud() -> u32
{
    Bk5492::<SerialOpener>::DEFAULT_BAUD
}

fn default_timeout_ms() -> u64
{
    100
}

fn default_change_delay_ms() -> u64
{
    5000
}

impl InstrumentConfig
{
    /// Build a handle for the configured meter. Nothing is opened until the first query.
    pub fn connect(&self) -> Arc<Bk5492>
    {
        match self.kind {
            InstrumentKind::Bk5492 => {
                let transport = LineTransport::with(SerialOpener::new(&self.port, self.baud))
                    .timeout(Duration::from_millis(self.timeout_ms));

                Arc::new(
                    Bk5492::with(&self.name, transport)
                        .change_delay(Duration::from_millis(self.change_delay_ms))
                )
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config
{
    /// Where run records are written
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default, rename = "instrument")]
    pub instruments: Vec<InstrumentConfig>,
}

fn default_data_dir() -> PathBuf
{
    PathBuf::from("data")
}

impl Default for Config
{
    fn default() -> Self
    {
        Self {
            data_dir: default_data_dir(),
            instruments: Vec::new(),
        }
    }
}

impl Config
{
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError>
    {
        let config: Config = toml::from_str(text)?;

        for (index, instrument) in config.instruments.iter().enumerate() {
            if config.instruments[..index].iter().any(|other| other.name == instrument.name) {
                return Err(ConfigError::DuplicateInstrument(instrument.name.clone()));
            }
        }

        Ok(config)
    }

    /// Load from `path`, or defaults when there is no file there
    ///
    /// A relative `data_dir` is taken relative to the config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError>
    {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(ConfigError::Read { path: path.to_owned(), source: err }),
        };

        let mut config = Self::from_toml_str(&text)?;

        if config.data_dir.is_relative() {
            if let Some(base) = path.parent() {
                config.data_dir = base.join(&config.data_dir);
            }
        }

        Ok(config)
    }

    pub fn instrument(&self, name: &str) -> Option<&InstrumentConfig>
    {
        self.instruments.iter().find(|instrument| instrument.name == name)
    }
}

#[cfg(test)]
mod tests
{
    use std::path::PathBuf;
    use super::{ Config, ConfigError, InstrumentKind };

    #[test]
    fn empty_config_uses_defaults()
    {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn instruments_take_serial_defaults()
    {
        let config = Config::from_toml_str(
            r#"
            data_dir = "runs"

            [[instrument]]
            name = "dmm"
            kind = "bk5492"
            port = "/dev/ttyUSB0"

            [[instrument]]
            name = "dmm2"
            kind = "bk5492"
            port = "COM4"
            baud = 19200
            change_delay_ms = 2500
            "#,
        )
        .unwrap();

        let dmm = config.instrument("dmm").unwrap();
        assert_eq!(dmm.kind, InstrumentKind::Bk5492);
        assert_eq!(dmm.baud, 9600);
        assert_eq!(dmm.timeout_ms, 100);
        assert_eq!(dmm.change_delay_ms, 5000);

        let dmm2 = config.instrument("dmm2").unwrap();
        assert_eq!(dmm2.baud, 19200);
        assert_eq!(dmm2.change_delay_ms, 2500);
        assert!(config.instrument("scope").is_none());
    }

    #[test]
    fn rejects_bad_configs()
    {
        assert!(matches!(Config::from_toml_str("colour = \"dark\""), Err(ConfigError::Parse(_))));
        assert!(matches!(
            Config::from_toml_str("[[instrument]]\nname = \"x\"\nkind = \"fluke\"\nport = \"p\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_toml_str(
                "[[instrument]]\nname = \"x\"\nkind = \"bk5492\"\nport = \"a\"\n\
                 [[instrument]]\nname = \"x\"\nkind = \"bk5492\"\nport = \"b\""
            ),
            Err(ConfigError::DuplicateInstrument(name)) if name == "x"
        ));
    }

    #[test]
    fn missing_file_is_default_and_data_dir_is_relative_to_file()
    {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Config::load(&dir.path().join("absent.toml")).unwrap(), Config::default());

        let path = dir.path().join("bench.toml");
        std::fs::write(&path, "data_dir = \"runs\"").unwrap();
        assert_eq!(Config::load(&path).unwrap().data_dir, dir.path().join("runs"));
    }
}
