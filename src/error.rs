use std::path::PathBuf;

use thiserror::Error;

/// Problems with the scenario itself. Everything here is an authoring bug:
/// load-time variants abort start-up and `MissingParam` aborts the run.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("unsupported parameter generator '{0}'")]
    InvalidGenerator(String),

    #[error("invalid wait specification '{0}'")]
    InvalidWait(String),

    #[error("scenario references undefined user parameter '{0}'")]
    MissingParam(String),
}

/// Failure of a single scripted HTTP call. Counted against the step and never
/// retried.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("failed to build request: {0}")]
    Build(#[from] http::Error),

    #[error("transport error: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    #[error("request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("unexpected status {status}: body={body}")]
    Status { status: u16, body: String },

    #[error("invalid JSON body ({source}): body={body}")]
    Json {
        #[source]
        source: serde_json::Error,
        body: String,
    },
}

/// Outcome of one step inside a user's cycle.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Request(#[from] RequestError),
}
