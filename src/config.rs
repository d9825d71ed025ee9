//! Configuration module for the scgi-echo server.
//!
//! Supports both command-line arguments and a plain `KEY VALUE` file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use std::path::PathBuf;
use thiserror::Error;

/// Worker threads when nothing else is configured.
pub const DEFAULT_THREADS: usize = 1;

/// Listening port when nothing else is configured.
pub const DEFAULT_PORT: u16 = 3000;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "scgi-echo")]
#[command(version)]
#[command(about = "A multi-threaded server for a length-prefixed gateway protocol", long_about = None)]
pub struct CliArgs {
    /// Path to the KEY VALUE configuration file
    #[arg(short, long, default_value = "config.txt")]
    pub config: PathBuf,

    /// Number of worker threads (overrides THREADS)
    #[arg(short = 't', long)]
    pub threads: Option<usize>,

    /// Port to listen on (overrides PORT)
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Number of worker threads, at least one.
    pub threads: usize,
    pub port: u16,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threads: DEFAULT_THREADS,
            port: DEFAULT_PORT,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and the config file they name.
    ///
    /// Never fails: problems are returned alongside the configuration so they
    /// can be reported once logging is up.
    pub fn load() -> (Self, Vec<ConfigError>) {
        Self::from_args(CliArgs::parse())
    }

    pub fn from_args(cli: CliArgs) -> (Self, Vec<ConfigError>) {
        let mut config = Config {
            log_level: cli.log_level,
            ..Config::default()
        };

        let mut problems = Vec::new();
        match std::fs::read_to_string(&cli.config) {
            Ok(contents) => problems.extend(config.apply_file(&contents)),
            Err(source) => problems.push(ConfigError::FileRead {
                path: cli.config,
                source,
            }),
        }

        if let Some(threads) = cli.threads.filter(|&n| n > 0) {
            config.threads = threads;
        }
        if let Some(port) = cli.port {
            config.port = port;
        }

        (config, problems)
    }

    /// Apply `KEY VALUE` lines on top of the current values.
    ///
    /// Blank lines are skipped, tokens after the value are ignored.
    /// `THREADS 0` and ports above 65535 are ignored without complaint.
    /// Unknown keys and unparsable values are reported and skipped.
    pub fn apply_file(&mut self, contents: &str) -> Vec<ConfigError> {
        let mut problems = Vec::new();

        for (idx, line) in contents.lines().enumerate() {
            let line_no = idx + 1;
            let mut tokens = line.split_whitespace();
            let Some(key) = tokens.next() else {
                continue;
            };
            let value = tokens.next().unwrap_or("");

            let invalid = || ConfigError::InvalidValue {
                line: line_no,
                key: key.to_string(),
                value: value.to_string(),
            };

            match key {
                "THREADS" => match value.parse::<usize>() {
                    Ok(0) => {}
                    Ok(threads) => self.threads = threads,
                    Err(_) => problems.push(invalid()),
                },
                "PORT" => match value.parse::<u64>() {
                    Ok(port) => {
                        if let Ok(port) = u16::try_from(port) {
                            self.port = port;
                        }
                    }
                    Err(_) => problems.push(invalid()),
                },
                _ => problems.push(ConfigError::UnknownKey {
                    line: line_no,
                    key: key.to_string(),
                }),
            }
        }

        problems
    }
}

/// Configuration problems. None of them stop the server from starting.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: unknown key '{key}'")]
    UnknownKey { line: usize, key: String },
    #[error("line {line}: invalid value '{value}' for {key}")]
    InvalidValue {
        line: usize,
        key: String,
        value: String,
    },
}
