//! CLI argument definitions for the Parley server.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Parley - streams conversational replies and keeps every message searchable.
#[derive(Parser, Debug)]
#[command(name = "parley", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Data directory for the SQLite database.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Write the effective configuration to the config path and exit.
    #[arg(long = "write-config")]
    pub write_config: bool,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > PARLEY_CONFIG env var > ~/.parley/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("PARLEY_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > PARLEY_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.resolve_port_with(std::env::var("PARLEY_PORT").ok(), config_port)
    }

    fn resolve_port_with(&self, env_port: Option<String>, config_port: u16) -> u16 {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(p) = env_port.and_then(|val| val.parse::<u16>().ok()) {
            return p;
        }
        config_port
    }

    /// Resolve the data directory.
    ///
    /// Priority: --data-dir flag > PARLEY_DATA_DIR env var > config file value.
    pub fn resolve_data_dir(&self, config_data_dir: &str) -> String {
        self.resolve_data_dir_with(std::env::var("PARLEY_DATA_DIR").ok(), config_data_dir)
    }

    fn resolve_data_dir_with(&self, env_dir: Option<String>, config_data_dir: &str) -> String {
        if let Some(ref p) = self.data_dir {
            return p.to_string_lossy().to_string();
        }
        env_dir.unwrap_or_else(|| config_data_dir.to_string())
    }

    /// Resolve the log level.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".parley").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

pub fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let home = std::env::var("USERPROFILE");
    #[cfg(not(target_os = "windows"))]
    let home = std::env::var("HOME");
    home.ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::parse_from(std::iter::once("parley").chain(args.iter().copied()))
    }

    #[test]
    fn test_no_flags() {
        let args = parse(&[]);
        assert!(args.config.is_none());
        assert!(args.port.is_none());
        assert!(args.data_dir.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.write_config);
        assert!(parse(&["--write-config"]).write_config);
    }

    #[test]
    fn test_port_priority() {
        let args = parse(&["--port", "4000"]);
        assert_eq!(args.resolve_port_with(Some("5000".into()), 3040), 4000);

        let args = parse(&[]);
        assert_eq!(args.resolve_port_with(Some("5000".into()), 3040), 5000);
        assert_eq!(args.resolve_port_with(Some("not-a-port".into()), 3040), 3040);
        assert_eq!(args.resolve_port_with(None, 3040), 3040);
    }

    #[test]
    fn test_data_dir_priority() {
        let args = parse(&["-d", "/tmp/flag"]);
        assert_eq!(
            args.resolve_data_dir_with(Some("/tmp/env".into()), "~/.parley/data"),
            "/tmp/flag"
        );

        let args = parse(&[]);
        assert_eq!(
            args.resolve_data_dir_with(Some("/tmp/env".into()), "~/.parley/data"),
            "/tmp/env"
        );
        assert_eq!(
            args.resolve_data_dir_with(None, "~/.parley/data"),
            "~/.parley/data"
        );
    }

    #[test]
    fn test_log_level_and_config_flag() {
        let args = parse(&["-l", "debug", "-c", "/etc/parley.toml"]);
        assert_eq!(args.resolve_log_level("info"), "debug");
        assert_eq!(args.resolve_config_path(), PathBuf::from("/etc/parley.toml"));
        assert_eq!(parse(&[]).resolve_log_level("warn"), "warn");
    }
}
