//! A simulated user: its parameter state and the logic that walks it through
//! the scenario's task lists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::engine::http_client::{ApiRequest, ApiResponse, HttpClient};
use crate::engine::substitution::{bind_response, resolve_map, resolve_placeholder, Params};
use crate::error::{ScenarioError, StepError};
use crate::scenario::{Scenario, StepCounter, Task};
use crate::stats::{RequesterStats, StatsSender};

/// Reserved parameter holding the title of the run task in progress.
pub const STEP_NAME: &str = "STEP_NAME";
/// Parameter sent as the bearer token by tasks with `use_token`.
pub const ACCESS_TOKEN: &str = "ACCESS_TOKEN";

/// Shared context every user executes against.
#[derive(Clone)]
pub struct UserEnv {
    pub client: HttpClient,
    pub stats: StatsSender,
}

impl UserEnv {
    pub fn new(client: HttpClient, stats: StatsSender) -> Self {
        Self { client, stats }
    }

    pub(crate) fn report(&self, stats: RequesterStats) {
        // Receiver gone means the run is already being torn down.
        let _ = self.stats.send(stats);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub elapsed: Duration,
    /// false when a task failed and the rest of the cycle was skipped
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: u32,
    pub params: Params,
    /// Response bytes received during the current cycle
    pub resp_size: u64,
    pub cycle: u64,
}

impl User {
    pub fn new(id: u32, params: Params) -> Self {
        Self {
            id,
            params,
            resp_size: 0,
            cycle: 0,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    fn access_token(&self) -> &str {
        self.param(ACCESS_TOKEN).unwrap_or_default()
    }

    /// Resolve the task's templates, issue it and apply its bindings.
    async fn issue(&mut self, env: &UserEnv, task: &Task) -> Result<ApiResponse, StepError> {
        let path = resolve_placeholder(&task.url, &self.params)?;
        let query = resolve_map(&task.url_param, &self.params)?;
        let form = resolve_map(&task.body, &self.params)?;
        let token = task.use_token.then(|| self.access_token().to_string());

        let response = env
            .client
            .execute(ApiRequest {
                method: task.method(),
                path: &path,
                query,
                form,
                bearer: token.as_deref(),
            })
            .await?;

        if let Some(json) = &response.json {
            bind_response(&task.set_param, json, &mut self.params);
        }
        Ok(response)
    }

    /// Run the setup tasks once. The first failing request ends the phase
    /// without an error; only scenario errors are returned.
    pub async fn pre(&mut self, env: &UserEnv, tasks: &[Task]) -> Result<Duration, ScenarioError> {
        let start = Instant::now();
        for task in tasks.iter().filter(|t| t.has_url()) {
            match self.issue(env, task).await {
                Ok(_) => {}
                Err(StepError::Scenario(e)) => return Err(e),
                Err(StepError::Request(e)) => {
                    warn!(user = self.id, step = %task.step, error = %e, "pre task failed");
                    break;
                }
            }
        }
        Ok(start.elapsed())
    }

    async fn run_pre_steps(&mut self, env: &UserEnv, pre_steps: &[Task]) -> Result<(), ScenarioError> {
        for step in pre_steps {
            if step.has_url() {
                if step.use_token && self.access_token().is_empty() {
                    continue;
                }
                match self.issue(env, step).await {
                    Ok(_) => {}
                    Err(StepError::Scenario(e)) => return Err(e),
                    Err(StepError::Request(e)) => {
                        debug!(user = self.id, step = %step.step, error = %e, "pre_step failed");
                        break;
                    }
                }
            }
            pause(step).await;
        }
        Ok(())
    }

    /// One pass over the run tasks. Every executed task's outcome is sent to
    /// the aggregator as soon as it is known.
    pub async fn run_cycle(
        &mut self,
        env: &UserEnv,
        run: &[Task],
        pre_steps: &[Task],
    ) -> Result<CycleOutcome, ScenarioError> {
        self.resp_size = 0;
        let start = Instant::now();
        let mut completed = true;

        for task in run {
            if task.is_once && self.cycle > 0 {
                continue;
            }
            self.params.insert(STEP_NAME.to_string(), task.step.clone());

            self.run_pre_steps(env, pre_steps).await?;

            if task.has_url() {
                let mut stats = RequesterStats::new(task.step.as_str());
                match self.issue(env, task).await {
                    Ok(response) => {
                        self.resp_size += response.size;
                        stats.record(response.duration, response.size);
                        env.report(stats);
                    }
                    Err(StepError::Scenario(e)) => return Err(e),
                    Err(StepError::Request(e)) => {
                        debug!(user = self.id, step = %task.step, error = %e, "task failed");
                        stats.record_error();
                        env.report(stats);
                        completed = false;
                        break;
                    }
                }
            }
            pause(task).await;
        }

        self.cycle += 1;
        Ok(CycleOutcome {
            elapsed: start.elapsed(),
            completed,
        })
    }
}

async fn pause(task: &Task) {
    let wait = task.wait_sec.sample();
    if !wait.is_zero() {
        tokio::time::sleep(wait).await;
    }
}

/// Builds users from a scenario's parameter generators.
#[derive(Debug)]
pub struct UserFactory {
    scenario: Arc<Scenario>,
    steps: StepCounter,
    next_id: AtomicU32,
}

impl UserFactory {
    pub fn new(scenario: Arc<Scenario>) -> Self {
        Self {
            scenario,
            steps: StepCounter::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// `None` once a STEP sequence is exhausted.
    pub fn create(&self) -> Option<User> {
        let params = self.scenario.draw_params(&self.steps)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Some(User::new(id, params))
    }
}
