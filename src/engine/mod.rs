use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cli::config::Config;
use crate::engine::control::ControlState;
use crate::engine::http_client::HttpClient;
use crate::engine::pool::UserPool;
use crate::engine::throttle::Throttle;
use crate::engine::user::{User, UserEnv, UserFactory};
use crate::error::ScenarioError;
use crate::scenario::Scenario;
use crate::stats::{stats_channel, RequesterStats, RunReport, StatsAggregator, TOTAL_TASK};

pub mod control;
pub mod distributed;
pub mod http_client;
pub mod pool;
pub mod substitution;
pub mod throttle;
pub mod user;

#[cfg(test)]
pub(crate) mod mock;

const TICK: Duration = Duration::from_secs(1);

/// Provisions users and drives timed runs of one scenario.
pub struct Engine {
    config: Arc<Config>,
    scenario: Arc<Scenario>,
    factory: Arc<UserFactory>,
    client: HttpClient,
    control: Arc<ControlState>,
    pool: Option<Arc<UserPool>>,
}

impl Engine {
    /// Load the configured scenario file and build an engine around it.
    pub fn new(config: Config, control: Arc<ControlState>) -> Result<Self> {
        let path = config
            .scenario_file
            .clone()
            .context("no scenario file given (use -f <file>)")?;
        let scenario = Scenario::load(&path)
            .with_context(|| format!("failed to load scenario {}", path.display()))?;
        Ok(Self::with_scenario(config, scenario, control))
    }

    pub fn with_scenario(config: Config, scenario: Scenario, control: Arc<ControlState>) -> Self {
        let client = HttpClient::new(
            config.server.clone(),
            config.timeout,
            config.concurrency.max(config.users),
        );
        let scenario = Arc::new(scenario);
        Self {
            factory: Arc::new(UserFactory::new(scenario.clone())),
            config: Arc::new(config),
            scenario,
            client,
            control,
            pool: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn scenario(&self) -> &Scenario {
        &self.scenario
    }

    pub fn control(&self) -> &Arc<ControlState> {
        &self.control
    }

    /// Users currently waiting in the pool, if the scenario uses one.
    pub fn pooled_users(&self) -> Option<usize> {
        self.pool.as_ref().map(|p| p.len())
    }

    pub fn banner(&self) -> String {
        format!(
            "Running {:?} test @ {},  {} worker(s) running concurrently {} user",
            self.config.duration, self.config.server, self.config.concurrency, self.config.users
        )
    }

    /// Build the user pool and run every user's pre tasks. Scenarios without
    /// pre tasks create users on demand and skip this step.
    ///
    /// Stops early when a user cannot be constructed or on interrupt and
    /// returns the number of users provisioned.
    pub async fn provision(&mut self) -> Result<usize> {
        if !self.scenario.has_pre() {
            self.pool = None;
            return Ok(0);
        }

        let target = self.config.users;
        let pool = Arc::new(UserPool::new(target));
        // Pre tasks are not measured.
        let (tx, _rx) = stats_channel();
        let env = UserEnv::new(self.client.clone(), tx);

        let start = Instant::now();
        let mut provisioned = 0;
        while provisioned < target && !self.control.is_stopped() {
            let Some(mut user) = self.factory.create() else {
                warn!(provisioned, target, "user parameters exhausted, pool under-filled");
                break;
            };
            user.pre(&env, &self.scenario.pre).await?;
            pool.put(user).await;
            provisioned += 1;
            if provisioned % 100 == 0 {
                debug!(provisioned, target, "provisioning users");
            }
        }

        info!(provisioned, target, elapsed = ?start.elapsed(), "PRE finished");
        self.pool = Some(pool);
        Ok(provisioned)
    }

    /// Run `concurrency` workers until the deadline or an interrupt and
    /// return the merged statistics. A scenario error aborts the run and is
    /// returned once every worker has drained.
    pub async fn run(&self) -> Result<RunReport> {
        let concurrency = self.config.concurrency.max(1);
        let throttle = (self.config.ramp > 0).then(|| Arc::new(Throttle::new(self.config.ramp)));
        let fatal = Arc::new(Mutex::new(None));
        let (tx, mut rx) = stats_channel();

        info!(
            concurrency,
            duration = ?self.config.duration,
            server = %self.config.server,
            "RUN started"
        );

        let deadline = Instant::now() + self.config.duration;
        for id in 0..concurrency {
            let worker = Worker {
                id,
                env: UserEnv::new(self.client.clone(), tx.clone()),
                scenario: self.scenario.clone(),
                factory: self.factory.clone(),
                pool: self.pool.clone(),
                throttle: throttle.clone(),
                control: self.control.clone(),
                fatal: fatal.clone(),
                deadline,
            };
            tokio::spawn(worker.run());
        }
        drop(tx);

        let mut ticker = tokio::time::interval_at(Instant::now() + TICK, TICK);
        let mut aggregator = StatsAggregator::new();
        let mut ticks = 0u64;
        while aggregator.responders() < concurrency {
            tokio::select! {
                _ = ticker.tick() => {
                    ticks += 1;
                    if let Some(throttle) = &throttle {
                        throttle.reset();
                    }
                    info!(
                        elapsed_secs = ticks,
                        duration_secs = self.config.duration.as_secs(),
                        finished = aggregator.responders(),
                        "RUN progress"
                    );
                }
                stats = rx.recv() => match stats {
                    Some(stats) => {
                        aggregator.add(stats);
                    }
                    None => break,
                },
            }
        }
        info!(responders = aggregator.responders(), "RUN finished");

        if let Some(e) = fatal.lock().take() {
            return Err(anyhow::Error::new(e).context("run aborted"));
        }
        Ok(aggregator.into_report())
    }

    /// Validate the scenario end to end with a single user: pre tasks, then
    /// one run cycle.
    pub async fn check(&self) -> Result<RunReport> {
        let (tx, mut rx) = stats_channel();
        let env = UserEnv::new(self.client.clone(), tx);

        let mut user = self
            .factory
            .create()
            .context("scenario parameters cannot produce a user")?;
        if self.scenario.has_pre() {
            user.pre(&env, &self.scenario.pre).await?;
        }
        let outcome = user
            .run_cycle(&env, &self.scenario.run, &self.scenario.pre_step)
            .await?;

        if !outcome.completed {
            debug!(user = user.id, "check cycle aborted by a failed step");
        }
        let mut total = RequesterStats::new(TOTAL_TASK);
        total.record(outcome.elapsed, user.resp_size);
        env.report(total);
        drop(env);

        let mut aggregator = StatsAggregator::new();
        while let Some(stats) = rx.recv().await {
            aggregator.add(stats);
        }
        Ok(aggregator.into_report())
    }
}

/// One concurrent execution loop of a run.
struct Worker {
    id: usize,
    env: UserEnv,
    scenario: Arc<Scenario>,
    factory: Arc<UserFactory>,
    pool: Option<Arc<UserPool>>,
    throttle: Option<Arc<Throttle>>,
    control: Arc<ControlState>,
    fatal: Arc<Mutex<Option<ScenarioError>>>,
    deadline: Instant,
}

impl Worker {
    async fn run(self) {
        let mut total = RequesterStats::new(TOTAL_TASK);

        while Instant::now() <= self.deadline && !self.control.is_stopped() {
            if let Some(throttle) = &self.throttle {
                if !throttle.check_limit().await {
                    continue;
                }
            }

            let Some(mut user) = self.acquire().await else {
                debug!(worker = self.id, "no user available");
                break;
            };

            let result = user
                .run_cycle(&self.env, &self.scenario.run, &self.scenario.pre_step)
                .await;
            match result {
                // Aborted cycles still count toward the worker's time.
                Ok(outcome) => {
                    if !outcome.completed {
                        debug!(worker = self.id, user = user.id, "cycle aborted");
                    }
                    total.record(outcome.elapsed, user.resp_size);
                }
                Err(e) => {
                    error!(worker = self.id, user = user.id, error = %e, "scenario error, stopping run");
                    self.fatal.lock().get_or_insert(e);
                    self.control.stop();
                    self.release(user).await;
                    break;
                }
            }
            self.release(user).await;
        }

        self.env.report(total);
    }

    async fn acquire(&self) -> Option<User> {
        let Some(pool) = &self.pool else {
            return self.factory.create();
        };
        tokio::select! {
            user = tokio::time::timeout_at(self.deadline, pool.acquire()) => user.ok().flatten(),
            _ = self.control.stopped() => None,
        }
    }

    async fn release(&self, user: User) {
        if let Some(pool) = &self.pool {
            pool.put(user).await;
        }
    }
}
