//! Command-line argument parsing
//!
//! Flags given here override the matching settings of the configuration file.

use clap::{Parser, ValueEnum};
use mod_loader::Environment;
use std::path::PathBuf;

/// Output format of the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportFormat {
    #[default]
    Text,
    Json,
}

/// Resolve and load a directory of mods, then print the load set or the
/// reasons it could not be built.
#[derive(Parser, Debug)]
#[command(name = "mod-launcher", author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Mods directory, overriding `loader.mods_directory`
    #[arg(short, long)]
    pub mods: Option<PathBuf>,

    /// Environment to load for
    #[arg(short, long, value_parser = parse_environment)]
    pub environment: Option<Environment>,

    /// Dependency override file, overriding `loader.overrides_file`
    #[arg(short, long)]
    pub overrides: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
    pub report: ReportFormat,
}

fn parse_environment(value: &str) -> Result<Environment, String> {
    value.parse()
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("config.toml"),
            mods: None,
            environment: None,
            overrides: None,
            log_level: None,
            json_logs: false,
            report: ReportFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("config.toml"));
        assert!(args.mods.is_none());
        assert!(args.environment.is_none());
        assert!(!args.json_logs);
        assert_eq!(args.report, ReportFormat::Text);
    }

    #[test]
    fn test_args_parse_overrides() {
        let args = Args::try_parse_from([
            "mod-launcher",
            "--mods",
            "custom_mods",
            "--environment",
            "server",
            "--report",
            "json",
            "--json-logs",
        ])
        .unwrap();

        assert_eq!(args.mods, Some(PathBuf::from("custom_mods")));
        assert_eq!(args.environment, Some(Environment::Server));
        assert_eq!(args.report, ReportFormat::Json);
        assert!(args.json_logs);
    }

    #[test]
    fn test_args_reject_unknown_environment() {
        assert!(Args::try_parse_from(["mod-launcher", "--environment", "toaster"]).is_err());
    }
}
