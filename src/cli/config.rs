use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

/// Resolved run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub concurrency: usize,
    pub duration: Duration,
    /// Bound on a single request
    pub timeout: Duration,
    pub server: String,
    /// Size of the pre-provisioned user pool
    pub users: usize,
    pub scenario_file: Option<PathBuf>,
    pub csv: Option<PathBuf>,
    pub ready: bool,
    /// Cycles admitted per second, 0 disables the throttle
    pub ramp: usize,
    pub topic: String,
}

impl Config {
    pub fn from_cli(cli: &Cli) -> Self {
        let concurrency = cli.concurrency.max(1);
        // Every worker must be able to hold a user while others are queued.
        let users = if concurrency > cli.users {
            concurrency * 2
        } else {
            cli.users
        };

        Self {
            concurrency,
            duration: cli.duration,
            timeout: cli.timeout,
            server: cli.server.clone(),
            users,
            scenario_file: cli.file.clone(),
            csv: cli.csv.clone(),
            ready: cli.ready,
            ramp: cli.ramp,
            topic: cli.topic.clone(),
        }
    }
}

/// What the process was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Print the scenario JSON schema
    Schema,
    /// Single-user validation run
    Check,
    /// Publish one command to the control topic
    Send { redis: String, command: String },
    /// Wait for commands on the control topic
    Worker { redis: String },
    /// Local provision and run
    Coordinator,
}

impl Mode {
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.schema {
            return Mode::Schema;
        }
        if cli.check {
            return Mode::Check;
        }
        match (&cli.redis, &cli.send) {
            (Some(redis), Some(command)) => Mode::Send {
                redis: redis.clone(),
                command: command.clone(),
            },
            (Some(redis), None) => Mode::Worker {
                redis: redis.clone(),
            },
            _ => Mode::Coordinator,
        }
    }
}
