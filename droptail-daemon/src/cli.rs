//! CLI argument definitions for droptail-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Packet drop event daemon.
///
/// Tails the node's firewall log, attributes dropped packets to cluster
/// workloads and records them as Kubernetes events and Prometheus metrics.
#[derive(Parser, Debug)]
#[command(name = "droptail-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to droptail.toml configuration file.
    ///
    /// When omitted, configuration comes from defaults and `DROPTAIL_*`
    /// environment variables only.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_flags() {
        let cli = DaemonCli::try_parse_from([
            "droptail-daemon",
            "--config",
            "/etc/droptail/droptail.toml",
            "--log-level",
            "debug",
            "--log-format",
            "pretty",
            "--validate",
        ])
        .unwrap();
        assert_eq!(
            cli.config.as_deref(),
            Some(std::path::Path::new("/etc/droptail/droptail.toml"))
        );
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log_format.as_deref(), Some("pretty"));
        assert!(cli.validate);
    }

    #[test]
    fn config_is_optional() {
        let cli = DaemonCli::try_parse_from(["droptail-daemon"]).unwrap();
        assert!(cli.config.is_none());
        assert!(!cli.validate);
    }
}
