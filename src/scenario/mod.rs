//! Declarative load scenario: parameter generators plus the `pre`, `run`
//! and `pre_step` task lists.
//!
//! A scenario is loaded once at start-up and is read-only afterwards. All
//! generator expressions and wait specifications are validated while
//! deserializing, so a scenario that loads successfully can only fail later
//! on a reference to an undefined user parameter.

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use schemars::JsonSchema;
use serde::Deserialize;

use crate::error::ScenarioError;

pub mod param;

pub use param::{ParamGenerator, StepCounter};

/// One scripted HTTP call.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Task {
    /// Label used as the statistics key
    #[serde(default)]
    pub step: String,
    /// Path appended to the server address, may contain one `[NAME]` placeholder
    #[serde(default)]
    pub url: String,
    /// HTTP method, GET when empty
    #[serde(default)]
    pub method: String,
    /// Query string parameters (values are templates)
    #[serde(default)]
    pub url_param: HashMap<String, String>,
    /// Form-encoded body parameters (values are templates)
    #[serde(default)]
    pub body: HashMap<String, String>,
    /// Output bindings: `"[DEST]" -> "dotted.path.into.response"`
    #[serde(default)]
    pub set_param: HashMap<String, String>,
    /// Send `Authorization: Bearer [ACCESS_TOKEN]`
    #[serde(default)]
    pub use_token: bool,
    /// Execute only on a user's first cycle
    #[serde(default)]
    pub is_once: bool,
    /// Pause after the task: `"N"` seconds or a `"MIN:MAX"` range
    #[serde(default)]
    #[schemars(with = "String")]
    pub wait_sec: WaitSpec,
}

impl Task {
    pub fn method(&self) -> &str {
        if self.method.is_empty() {
            "GET"
        } else {
            &self.method
        }
    }

    pub fn has_url(&self) -> bool {
        !self.url.is_empty()
    }
}

#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct Scenario {
    /// Per-user parameter generators: literal, `[RAND:min:max]` or `[STEP:min:max]`
    #[serde(default)]
    #[schemars(with = "HashMap<String, String>")]
    pub param: HashMap<String, ParamGenerator>,
    /// One-time setup tasks; when present users are provisioned into a pool
    #[serde(default)]
    pub pre: Vec<Task>,
    /// The repeating cycle
    #[serde(default)]
    pub run: Vec<Task>,
    /// Tasks executed before every run task (e.g. token refresh)
    #[serde(default)]
    pub pre_step: Vec<Task>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let data = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(data)?)
    }

    /// Users must be pre-provisioned through a pool.
    pub fn has_pre(&self) -> bool {
        !self.pre.is_empty()
    }
}

/// JSON schema of the scenario file format.
pub fn json_schema() -> String {
    let schema = schemars::schema_for!(Scenario);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// How long a user pauses after a task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum WaitSpec {
    #[default]
    None,
    Fixed(u64),
    /// Uniform whole seconds in `[min, max)`
    Range { min: u64, max: u64 },
}

impl WaitSpec {
    pub fn sample(&self) -> Duration {
        match *self {
            WaitSpec::None => Duration::ZERO,
            WaitSpec::Fixed(secs) => Duration::from_secs(secs),
            WaitSpec::Range { min, max } => {
                Duration::from_secs(rand::thread_rng().gen_range(min..max))
            }
        }
    }
}

impl FromStr for WaitSpec {
    type Err = ScenarioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(WaitSpec::None);
        }
        let invalid = || ScenarioError::InvalidWait(s.to_string());
        match s.split_once(':') {
            None => s.parse().map(WaitSpec::Fixed).map_err(|_| invalid()),
            Some((min, max)) => {
                let min: u64 = min.trim().parse().map_err(|_| invalid())?;
                let max: u64 = max.trim().parse().map_err(|_| invalid())?;
                if max <= min {
                    return Err(invalid());
                }
                Ok(WaitSpec::Range { min, max })
            }
        }
    }
}

impl TryFrom<String> for WaitSpec {
    type Error = ScenarioError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}
