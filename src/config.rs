//! Configuration module for reqtest.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Largest accepted step; `1 << 31` bytes is the biggest payload.
pub const MAX_STEP: u32 = 31;

const DEFAULT_START_STEP: u32 = 1;
const DEFAULT_END_STEP: u32 = 25;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "reqtest")]
#[command(version = "0.1.0")]
#[command(
    about = "Listen for requests and log their body sizes, or send requests of increasing sizes to a listener",
    long_about = None
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Adds a delay before responding to a request in listen mode (e.g. 500ms, 5s)
    #[arg(long, global = true)]
    pub resp_delay: Option<String>,

    /// The number of bytes to start sending at in powers of 2
    /// (a value of 1 starts at 2 bytes, a value of 15 starts at 2^15 bytes)
    #[arg(long, global = true)]
    pub start_step: Option<u32>,

    /// The number of bytes to end sending at in powers of 2
    /// (a value of 25 stops sending once payload sizes hit 2^25 bytes)
    #[arg(long, global = true)]
    pub end_step: Option<u32>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long, global = true)]
    pub workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Listen for any requests and log the size of their bodies
    Listen {
        /// Address to bind to (e.g. 127.0.0.1:8080 or :8080)
        address: String,
    },
    /// Send PUT requests of increasing sizes to a listener
    Send {
        /// Target URL (e.g. http://127.0.0.1:8080/upload)
        url: String,
    },
}

impl Command {
    /// Name of the mode, as used in `failed to <mode>: ...`.
    pub fn mode_name(&self) -> &'static str {
        match self {
            Command::Listen { .. } => "listen",
            Command::Send { .. } => "send",
        }
    }
}

/// Bad subcommand or argument count: exit 1 with usage rather than clap's exit 2.
pub fn is_usage_error(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::InvalidSubcommand
            | ErrorKind::MissingRequiredArgument
            | ErrorKind::UnknownArgument
            | ErrorKind::TooManyValues
    )
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub send: SendSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct ListenSection {
    /// Humantime duration, e.g. "2s"
    pub resp_delay: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct SendSection {
    pub start_step: Option<u32>,
    pub end_step: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RuntimeSection {
    /// Number of worker threads
    pub workers: Option<usize>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Settings for listen mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenConfig {
    pub address: String,
    pub resp_delay: Duration,
}

/// Settings for send mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendConfig {
    pub url: String,
    pub start_step: u32,
    pub end_step: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Listen(ListenConfig),
    Send(SendConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub workers: Option<usize>,
    pub log_level: String,
}

impl Config {
    /// Resolve parsed CLI args against an optional TOML file.
    ///
    /// Returns `Ok(None)` when no subcommand was given.
    pub fn from_cli(cli: CliArgs) -> Result<Option<Self>, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Option<Self>, ConfigError> {
        let Some(command) = cli.command else {
            return Ok(None);
        };

        // Rejected in either mode, even though only listen uses it.
        let resp_delay = match cli.resp_delay.or(toml_config.listen.resp_delay) {
            Some(raw) => humantime::parse_duration(raw.trim())
                .map_err(|e| ConfigError::InvalidDuration(raw, e))?,
            None => Duration::ZERO,
        };

        let mode = match command {
            Command::Listen { address } => {
                Mode::Listen(ListenConfig {
                    address: normalize_listen_address(&address),
                    resp_delay,
                })
            }
            Command::Send { url } => {
                let start_step = resolve_step(
                    "start-step",
                    cli.start_step.or(toml_config.send.start_step),
                    DEFAULT_START_STEP,
                )?;
                let end_step = resolve_step(
                    "end-step",
                    cli.end_step.or(toml_config.send.end_step),
                    DEFAULT_END_STEP,
                )?;
                if end_step < start_step {
                    return Err(ConfigError::StepOrder {
                        start: start_step,
                        end: end_step,
                    });
                }
                Mode::Send(SendConfig {
                    url,
                    start_step,
                    end_step,
                })
            }
        };

        Ok(Some(Config {
            mode,
            workers: cli.workers.or(toml_config.runtime.workers),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }))
    }
}

/// Zero or unset falls back to the default.
fn resolve_step(name: &'static str, value: Option<u32>, default: u32) -> Result<u32, ConfigError> {
    match value {
        Some(step) if step > MAX_STEP => Err(ConfigError::StepTooLarge(name)),
        Some(step) if step > 0 => Ok(step),
        _ => Ok(default),
    }
}

/// `:8080` binds every interface.
fn normalize_listen_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("invalid resp-delay '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),
    #[error("{0} cannot be greater than {max}", max = MAX_STEP)]
    StepTooLarge(&'static str),
    #[error("end-step cannot be less than start-step ({end} < {start})")]
    StepOrder { start: u32, end: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Config>, ConfigError> {
        let cli = CliArgs::try_parse_from(args).unwrap();
        Config::merge(cli, TomlConfig::default())
    }

    #[test]
    fn test_send_defaults() {
        let config = parse(&["reqtest", "send", "http://127.0.0.1:8080"])
            .unwrap()
            .unwrap();
        assert_eq!(
            config.mode,
            Mode::Send(SendConfig {
                url: "http://127.0.0.1:8080".to_string(),
                start_step: 1,
                end_step: 25,
            })
        );
        assert_eq!(config.log_level, "info");
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_flags_before_and_after_subcommand() {
        let before = parse(&["reqtest", "--start-step", "4", "send", "http://h/"])
            .unwrap()
            .unwrap();
        let after = parse(&["reqtest", "send", "http://h/", "--start-step", "4"])
            .unwrap()
            .unwrap();
        assert_eq!(before.mode, after.mode);
        match before.mode {
            Mode::Send(send) => assert_eq!(send.start_step, 4),
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_zero_step_means_default() {
        let config = parse(&["reqtest", "--start-step", "0", "--end-step", "0", "send", "x"])
            .unwrap()
            .unwrap();
        match config.mode {
            Mode::Send(send) => {
                assert_eq!(send.start_step, 1);
                assert_eq!(send.end_step, 25);
            }
            other => panic!("unexpected mode {:?}", other),
        }
    }

    #[test]
    fn test_step_too_large() {
        let err = parse(&["reqtest", "--start-step", "32", "send", "x"]).unwrap_err();
        assert_eq!(err.to_string(), "start-step cannot be greater than 31");

        let err = parse(&["reqtest", "--end-step", "40", "send", "x"]).unwrap_err();
        assert_eq!(err.to_string(), "end-step cannot be greater than 31");

        assert!(parse(&["reqtest", "--end-step", "31", "send", "x"]).is_ok());
    }

    #[test]
    fn test_end_before_start() {
        let err = parse(&["reqtest", "--start-step", "10", "--end-step", "5", "send", "x"])
            .unwrap_err();
        assert!(matches!(err, ConfigError::StepOrder { start: 10, end: 5 }));
        assert!(err
            .to_string()
            .starts_with("end-step cannot be less than start-step"));
    }

    #[test]
    fn test_steps_ignored_in_listen_mode() {
        let config = parse(&["reqtest", "--start-step", "99", "listen", "127.0.0.1:0"])
            .unwrap()
            .unwrap();
        assert_eq!(
            config.mode,
            Mode::Listen(ListenConfig {
                address: "127.0.0.1:0".to_string(),
                resp_delay: Duration::ZERO,
            })
        );
    }

    #[test]
    fn test_resp_delay_and_port_only_address() {
        let config = parse(&["reqtest", "listen", ":8080", "--resp-delay", "1500ms"])
            .unwrap()
            .unwrap();
        assert_eq!(
            config.mode,
            Mode::Listen(ListenConfig {
                address: "0.0.0.0:8080".to_string(),
                resp_delay: Duration::from_millis(1500),
            })
        );
    }

    #[test]
    fn test_invalid_resp_delay() {
        let err = parse(&["reqtest", "--resp-delay", "soon", "listen", ":1"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(ref raw, _) if raw == "soon"));
    }

    #[test]
    fn test_invalid_resp_delay_in_send_mode() {
        let err = parse(&["reqtest", "--resp-delay", "soon", "send", "http://h/"]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDuration(ref raw, _) if raw == "soon"));
    }

    #[test]
    fn test_mode_name() {
        let cli = CliArgs::try_parse_from(["reqtest", "listen", ":1"]).unwrap();
        assert_eq!(cli.command.unwrap().mode_name(), "listen");
        let cli = CliArgs::try_parse_from(["reqtest", "send", "x"]).unwrap();
        assert_eq!(cli.command.unwrap().mode_name(), "send");
    }

    #[test]
    fn test_usage_errors_exit_one() {
        let kind = |args: &[&str]| CliArgs::try_parse_from(args).unwrap_err().kind();

        assert!(is_usage_error(kind(&["reqtest", "bogus", "x"])));
        assert!(is_usage_error(kind(&["reqtest", "send"])));
        assert!(is_usage_error(kind(&["reqtest", "listen", "a", "b"])));
        assert!(is_usage_error(kind(&["reqtest", "send", "x", "--no-such-flag"])));

        assert!(!is_usage_error(kind(&["reqtest", "--help"])));
        assert!(!is_usage_error(kind(&["reqtest", "--version"])));
        assert!(!is_usage_error(kind(&["reqtest", "--start-step", "abc", "send", "x"])));
    }

    #[test]
    fn test_no_subcommand() {
        assert!(parse(&["reqtest"]).unwrap().is_none());
    }

    #[test]
    fn test_wrong_argument_count() {
        assert!(CliArgs::try_parse_from(["reqtest", "send"]).is_err());
        assert!(CliArgs::try_parse_from(["reqtest", "listen", "a", "b"]).is_err());
        assert!(CliArgs::try_parse_from(["reqtest", "bogus", "a"]).is_err());
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [listen]
            resp_delay = "2s"

            [send]
            start_step = 10
            end_step = 20

            [runtime]
            workers = 4

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen.resp_delay.as_deref(), Some("2s"));
        assert_eq!(config.send.start_step, Some(10));
        assert_eq!(config.send.end_step, Some(20));
        assert_eq!(config.runtime.workers, Some(4));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [send]
            start_step = 10
            end_step = 20

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();
        let cli = CliArgs::try_parse_from(["reqtest", "--end-step", "12", "send", "x"]).unwrap();

        let config = Config::merge(cli, toml_config).unwrap().unwrap();
        assert_eq!(
            config.mode,
            Mode::Send(SendConfig {
                url: "x".to_string(),
                start_step: 10,
                end_step: 12,
            })
        );
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_missing_config_file() {
        let cli = CliArgs::try_parse_from([
            "reqtest",
            "--config",
            "/nonexistent/reqtest.toml",
            "send",
            "x",
        ])
        .unwrap();
        let err = Config::from_cli(cli).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
