pub mod config;
pub mod validate;

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::parse_duration_arg;

pub const DEFAULT_TOPIC: &str = "NBA-WRK";
pub const DEFAULT_SERVER: &str = "http://127.0.0.1:2142";

/// Long flags that may also be written with a single dash (`-timeout 5`).
const LONG_FLAGS: &[&str] = &[
    "concurrency",
    "duration",
    "timeout",
    "server",
    "users",
    "file",
    "redis",
    "csv",
    "ready",
    "ramp",
    "check",
    "topic",
    "send",
    "schema",
];

fn default_parallelism() -> usize {
    num_cpus::get() * 2
}

#[derive(Parser, Debug, Clone)]
#[command(name = "barrage")]
#[command(about = "Scenario-driven HTTP load generator with pub/sub worker control", long_about = None)]
#[command(version, args_override_self = true)]
pub struct Cli {
    /// Number of concurrent workers
    #[arg(short = 'c', long, default_value_t = default_parallelism())]
    pub concurrency: usize,

    /// Duration of the run (seconds, or e.g. 30s, 2m)
    #[arg(short = 'd', long, default_value = "10", value_parser = parse_duration_arg)]
    pub duration: Duration,

    /// Timeout of a single request
    #[arg(long, default_value = "30s", value_parser = parse_duration_arg)]
    pub timeout: Duration,

    /// Target server address
    #[arg(short = 's', long, default_value = DEFAULT_SERVER)]
    pub server: String,

    /// Number of users to pre-provision
    #[arg(short = 'u', long, default_value_t = default_parallelism())]
    pub users: usize,

    /// Scenario file (JSON)
    #[arg(short = 'f', long)]
    pub file: Option<PathBuf>,

    /// Redis address; switches to worker mode
    #[arg(short = 'r', long)]
    pub redis: Option<String>,

    /// Write the report as CSV to this path
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Wait for a line on stdin between provisioning and the run
    #[arg(long, default_value_t = false)]
    pub ready: bool,

    /// Admit at most this many cycles per second (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub ramp: usize,

    /// Run the scenario once with a single user and print the report
    #[arg(long, default_value_t = false)]
    pub check: bool,

    /// Pub/sub control topic
    #[arg(long, default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Publish one control command (e.g. "RUN") and exit; requires --redis
    #[arg(long, requires = "redis")]
    pub send: Option<String>,

    /// Print the JSON schema of the scenario format and exit
    #[arg(long, default_value_t = false)]
    pub schema: bool,
}

impl Cli {
    /// Parse flags given without the program name, as carried by a `PRE`
    /// command.
    pub fn parse_command_args<I, S>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let argv = std::iter::once("barrage".to_string())
            .chain(normalize_args(args.into_iter().map(|a| a.as_ref().to_string())));
        Self::try_parse_from(argv)
    }
}

/// Rewrite single-dash long flags (`-timeout`, `-csv=out.csv`) to their
/// double-dash form. Short flags and values are left alone.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            let Some(rest) = arg.strip_prefix('-') else {
                return arg;
            };
            if rest.starts_with('-') {
                return arg;
            }
            let name = rest.split_once('=').map_or(rest, |(name, _)| name);
            if LONG_FLAGS.contains(&name) {
                format!("-{}", arg)
            } else {
                arg
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_command_args(Vec::<String>::new()).unwrap();
        assert_eq!(cli.concurrency, num_cpus::get() * 2);
        assert_eq!(cli.users, num_cpus::get() * 2);
        assert_eq!(cli.duration, Duration::from_secs(10));
        assert_eq!(cli.timeout, Duration::from_secs(30));
        assert_eq!(cli.server, DEFAULT_SERVER);
        assert_eq!(cli.topic, DEFAULT_TOPIC);
        assert_eq!(cli.ramp, 0);
        assert!(!cli.ready && !cli.check && !cli.schema);
        assert!(cli.file.is_none() && cli.redis.is_none());
    }

    #[test]
    fn test_short_flags() {
        let cli = Cli::parse_command_args([
            "-c", "16", "-d", "45", "-s", "http://target:80", "-u", "100", "-f", "s.json", "-r",
            "127.0.0.1:6379",
        ])
        .unwrap();
        assert_eq!(cli.concurrency, 16);
        assert_eq!(cli.duration, Duration::from_secs(45));
        assert_eq!(cli.server, "http://target:80");
        assert_eq!(cli.users, 100);
        assert_eq!(cli.file, Some(PathBuf::from("s.json")));
        assert_eq!(cli.redis.as_deref(), Some("127.0.0.1:6379"));
    }

    #[test]
    fn test_single_dash_long_flags() {
        let cli = Cli::parse_command_args([
            "-timeout", "5", "-csv=out.csv", "-ready", "-ramp", "20", "-check",
        ])
        .unwrap();
        assert_eq!(cli.timeout, Duration::from_secs(5));
        assert_eq!(cli.csv, Some(PathBuf::from("out.csv")));
        assert!(cli.ready);
        assert_eq!(cli.ramp, 20);
        assert!(cli.check);
    }

    #[test]
    fn test_duration_suffixes() {
        let cli = Cli::parse_command_args(["-d", "2m", "--timeout", "500ms"]).unwrap();
        assert_eq!(cli.duration, Duration::from_secs(120));
        assert_eq!(cli.timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_later_flags_override_earlier() {
        let cli = Cli::parse_command_args(["-c", "4", "-f", "a.json", "-c", "8"]).unwrap();
        assert_eq!(cli.concurrency, 8);
        assert_eq!(cli.file, Some(PathBuf::from("a.json")));
    }

    #[test]
    fn test_invalid_flags_are_errors() {
        assert!(Cli::parse_command_args(["-c", "many"]).is_err());
        assert!(Cli::parse_command_args(["-d", "soon"]).is_err());
        assert!(Cli::parse_command_args(["--bogus"]).is_err());
        assert!(Cli::parse_command_args(["--send", "RUN"]).is_err());
    }

    #[test]
    fn test_normalize_leaves_short_and_values() {
        let args = ["-c", "10", "--timeout", "3", "-timeout", "-x", "value", "-"]
            .iter()
            .map(|s| s.to_string());
        assert_eq!(
            normalize_args(args),
            vec!["-c", "10", "--timeout", "3", "--timeout", "-x", "value", "-"]
        );
    }
}
