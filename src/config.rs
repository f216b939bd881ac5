//! Configuration of the daemon.

use std::{env, fmt, fs, io};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use log::{LevelFilter, info};
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;
use crate::audit::{AuditProperties, AuditSettings};
use crate::constants::{ENV_LOG_LEVEL, INTEGRITY_AUDIT_APP};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    pub fn log_level() -> LevelFilter {
        match env::var(ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Info,
        }
    }

    pub fn log_type() -> LogType {
        LogType::Stderr
    }

    pub fn log_file() -> PathBuf {
        PathBuf::from("./integrity-audit.log")
    }

    pub fn syslog_facility() -> String {
        "daemon".to_string()
    }
}


//------------ Config --------------------------------------------------------

/// The configuration of the `integrity-audit` daemon.
///
/// Apart from the logging keys, the file holds the identity of the node and
/// the [`AuditProperties`] all at the top level.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    resource_name: Option<String>,

    #[serde(default)]
    persistence_unit: Option<String>,

    #[serde(flatten)]
    pub properties: AuditProperties,

    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,
}

/// # Accessors
impl Config {
    /// Returns the resource name of this node.
    ///
    /// A missing name is returned as an empty string which verification
    /// rejects.
    pub fn resource_name(&self) -> &str {
        self.resource_name.as_deref().unwrap_or_default()
    }

    pub fn persistence_unit(&self) -> &str {
        self.persistence_unit.as_deref().unwrap_or_default()
    }

    /// Returns the validated audit settings.
    pub fn audit_settings(&self) -> Result<AuditSettings, ConfigError> {
        self.properties.validate(
            self.resource_name(), self.persistence_unit()
        )
    }
}

/// # Loading and Verifying
impl Config {
    /// Creates the config at startup.
    ///
    /// Reads the file, initialises logging and verifies the result.
    pub fn create(config_file: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_config(config_file).map_err(|e| {
            ConfigError::Other(format!(
                "Error parsing config file: {}, error: {}",
                config_file.display(), e
            ))
        })?;
        config.init_logging()?;
        info!(
            "{} uses configuration file: {}",
            INTEGRITY_AUDIT_APP, config_file.display()
        );
        config.verify()?;
        Ok(config)
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(file)?;
        Self::parse_str(&data)
    }

    pub fn parse_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Checks the node identity and all audit properties.
    ///
    /// Reports every bad parameter at once.
    pub fn verify(&self) -> Result<(), ConfigError> {
        self.audit_settings().map(|_| ())
    }
}

/// # Logging
impl Config {
    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            #[cfg(unix)]
            LogType::Syslog => {
                let facility = Facility::from_str(
                    &self.syslog_facility
                ).map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
                self.syslog_logger(facility)
            }
            #[cfg(not(unix))]
            LogType::Syslog => {
                Err(ConfigError::other(
                    "syslog is only supported on Unix systems"
                ))
            }
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger().chain(io::stderr()).apply().map_err(|e| {
            ConfigError::Other(format!(
                "Failed to init stderr logging: {}", e
            ))
        })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = fern::log_file(path).map_err(|e| {
            ConfigError::Other(format!(
                "Failed to open log file '{}': {}", path.display(), e
            ))
        })?;
        self.fern_logger().chain(file).apply().map_err(|e| {
            ConfigError::Other(format!("Failed to init file logging: {}", e))
        })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(
        &self, facility: syslog::Facility
    ) -> Result<(), ConfigError> {
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from("integrity-audit"));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => {
                self.fern_logger().chain(logger).apply().map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {}", e))
                })
            }
            Err(err) => {
                Err(ConfigError::Other(
                    format!("Cannot connect to syslog: {}", err)
                ))
            }
        }
    }

    /// Creates and returns a fern logger with log level tweaks
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;

        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("mio", framework_level)
            .level_for("tokio", framework_level)
            .level_for("signal_hook_registry", framework_level)
    }
}


//------------ de_level_filter -----------------------------------------------

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        match string.as_str() {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(de::Error::custom(format!(
                "expected \"stderr\", \"file\", or \"syslog\", \
                 found: \"{}\"",
                string
            ))),
        }
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),

    /// Every bad audit parameter found during validation.
    InvalidProperties(Vec<String>),

    Other(String),
}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::Io(e) => e.fmt(f),
            ConfigError::Toml(e) => e.fmt(f),
            ConfigError::InvalidProperties(list) => {
                write!(
                    f, "invalid integrity audit properties: {}",
                    list.join("; ")
                )
            }
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError { }

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Toml(e)
    }
}


//------------ Tests ---------------------------------------------------------
