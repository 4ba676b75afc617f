use std::convert::TryFrom;
use std::time::Duration;

use log::LevelFilter;
use thiserror::Error;
use yaml_rust::{ Yaml, YamlLoader };

use crate::race::contestants::{ Contestant, Contestants };
use crate::session::RaceMode;

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Failed to parse yaml: {0}")]
    Yaml(String),

    #[error("Config key `{key}` should be {expected}")]
    WrongType { key: &'static str, expected: &'static str },

    #[error("Config key `{key}` has invalid value {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub serial_port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
    pub heartbeat_timeout: Duration,
    pub total_laps: u32,
    pub mode: RaceMode,
    pub simulation: bool,
    pub log_level: LevelFilter,
    pub contestants: Contestants,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            serial_port: default_serial_port().to_string(),
            baud_rate: 9600,
            read_timeout: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(10),
            total_laps: 10,
            mode: RaceMode::Training,
            simulation: false,
            log_level: LevelFilter::Debug,
            contestants: Contestants::default(),
        }
    }
}

fn default_serial_port() -> &'static str {
    if cfg!(target_os = "macos") {
        "/dev/tty.usbserial-AB0KLIK2"
    } else {
        "/dev/ttyUSB0"
    }
}

fn string(doc: &Yaml, key: &'static str) -> Result<Option<String>, ConfigError> {
    match &doc[key] {
        Yaml::String(value) => Ok(Some(value.clone())),
        Yaml::BadValue | Yaml::Null => Ok(None),
        _ => Err(ConfigError::WrongType { key, expected: "a string" }),
    }
}

fn integer(doc: &Yaml, key: &'static str) -> Result<Option<u64>, ConfigError> {
    match &doc[key] {
        Yaml::Integer(value) => u64::try_from(*value)
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value: value.to_string() }),
        Yaml::BadValue | Yaml::Null => Ok(None),
        _ => Err(ConfigError::WrongType { key, expected: "a non-negative integer" }),
    }
}

fn u32_value(doc: &Yaml, key: &'static str) -> Result<Option<u32>, ConfigError> {
    integer(doc, key)?
        .map(|value| u32::try_from(value).map_err(|_| ConfigError::InvalidValue { key, value: value.to_string() }))
        .transpose()
}

fn boolean(doc: &Yaml, key: &'static str) -> Result<Option<bool>, ConfigError> {
    match &doc[key] {
        Yaml::Boolean(value) => Ok(Some(*value)),
        Yaml::BadValue | Yaml::Null => Ok(None),
        _ => Err(ConfigError::WrongType { key, expected: "true or false" }),
    }
}

fn contestants(doc: &Yaml) -> Result<Option<Contestants>, ConfigError> {
    let entries = match &doc["contestants"] {
        Yaml::Array(entries) => entries,
        Yaml::BadValue | Yaml::Null => return Ok(None),
        _ => return Err(ConfigError::WrongType { key: "contestants", expected: "a list" }),
    };

    let mut parsed = Vec::with_capacity(entries.len());
    for entry in entries {
        let transmitter_id = u32_value(entry, "transmitter_id")?;
        let name = string(entry, "name")?;
        match (transmitter_id, name) {
            (Some(transmitter_id), Some(name)) => parsed.push(Contestant { transmitter_id, name }),
            // Incomplete entries are skipped rather than failing the whole file.
            _ => warn!["Skipping contestant without transmitter_id and name: {:?}", entry],
        }
    }
    Ok(Some(Contestants::new(parsed)))
}

impl TryFrom<&String> for Config {
    type Error = ConfigError;

    fn try_from(str: &String) -> Result<Self, Self::Error> {
        let documents = YamlLoader::load_from_str(str)
            .map_err(|err| ConfigError::Yaml(format!("{}", err)))?;
        let mut config = Config::default();
        let doc = match documents.first() {
            Some(doc) => doc,
            None => return Ok(config),
        };

        if let Some(serial_port) = string(doc, "serial_port")? {
            config.serial_port = serial_port;
        }
        if let Some(baud_rate) = u32_value(doc, "baud_rate")? {
            config.baud_rate = baud_rate;
        }
        if let Some(read_timeout_ms) = integer(doc, "read_timeout_ms")? {
            config.read_timeout = Duration::from_millis(read_timeout_ms);
        }
        if let Some(heartbeat_timeout_secs) = integer(doc, "heartbeat_timeout_secs")? {
            config.heartbeat_timeout = Duration::from_secs(heartbeat_timeout_secs);
        }
        if let Some(total_laps) = u32_value(doc, "total_laps")? {
            if total_laps == 0 {
                return Err(ConfigError::InvalidValue { key: "total_laps", value: total_laps.to_string() });
            }
            config.total_laps = total_laps;
        }
        if let Some(mode) = string(doc, "mode")? {
            config.mode = mode.parse()
                .map_err(|_| ConfigError::InvalidValue { key: "mode", value: mode.clone() })?;
        }
        if let Some(simulation) = boolean(doc, "simulation")? {
            config.simulation = simulation;
        }
        if let Some(log_level) = string(doc, "log_level")? {
            config.log_level = log_level.parse()
                .map_err(|_| ConfigError::InvalidValue { key: "log_level", value: log_level.clone() })?;
        }
        if let Some(contestants) = contestants(doc)? {
            config.contestants = contestants;
        }

        Ok(config)
    }
}
