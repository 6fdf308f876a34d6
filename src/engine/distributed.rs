//! Worker side of the pub/sub control protocol.
//!
//! Every worker subscribes to one topic and reacts to `PRE <flags>`, `RUN`
//! and `EXIT`. Finished runs are published back to the same topic as
//! `IP : <addr>\n<report>`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::cli::config::Config;
use crate::cli::Cli;
use crate::engine::control::{parse_control_command, ControlCommand, ControlState};
use crate::engine::Engine;
use crate::stats::csv::write_csv;
use crate::utils::local_ip;

/// A subscription to the control topic plus the ability to publish on it.
#[async_trait]
pub trait ControlBus: Send {
    /// Next payload. `Ok(None)` when the subscription closed.
    async fn next_message(&mut self) -> Result<Option<String>>;

    async fn publish(&mut self, message: &str) -> Result<()>;

    async fn close(&mut self) {}
}

/// Accept `host:port` as well as full `redis://` URLs.
pub fn redis_url(addr: &str) -> String {
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("redis://{}", addr)
    }
}

pub struct RedisBus {
    topic: String,
    publisher: redis::aio::Connection,
    messages: mpsc::UnboundedReceiver<redis::RedisResult<String>>,
    listener: JoinHandle<()>,
}

impl RedisBus {
    pub async fn connect(addr: &str, topic: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url(addr))
            .with_context(|| format!("invalid redis address {}", addr))?;

        let mut publisher = client
            .get_async_connection()
            .await
            .with_context(|| format!("failed to connect to redis at {}", addr))?;
        redis::cmd("PING")
            .query_async::<_, String>(&mut publisher)
            .await
            .context("redis PING failed")?;
        info!(addr, "connected to redis");

        let mut pubsub = client.get_async_connection().await?.into_pubsub();
        pubsub
            .psubscribe(topic)
            .await
            .with_context(|| format!("failed to subscribe to {}", topic))?;
        info!(topic, "subscribed");

        let (tx, messages) = mpsc::unbounded_channel();
        let listener = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload = msg.get_payload::<String>();
                let undecodable = payload.is_err();
                if tx.send(payload).is_err() || undecodable {
                    break;
                }
            }
        });

        Ok(Self {
            topic: topic.to_string(),
            publisher,
            messages,
            listener,
        })
    }
}

#[async_trait]
impl ControlBus for RedisBus {
    async fn next_message(&mut self) -> Result<Option<String>> {
        match self.messages.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(anyhow::Error::new(e).context("undecodable control message")),
            None => Ok(None),
        }
    }

    async fn publish(&mut self, message: &str) -> Result<()> {
        let receivers: i64 = self
            .publisher
            .publish(&self.topic, message)
            .await
            .with_context(|| format!("failed to publish to {}", self.topic))?;
        info!(topic = %self.topic, receivers, "[PUB] report sent");
        Ok(())
    }

    async fn close(&mut self) {
        self.listener.abort();
        info!("disconnected from redis");
    }
}

/// Publish a single command and return how many subscribers received it.
pub async fn publish_command(addr: &str, topic: &str, command: &str) -> Result<i64> {
    let client = redis::Client::open(redis_url(addr))
        .with_context(|| format!("invalid redis address {}", addr))?;
    let mut conn = client
        .get_async_connection()
        .await
        .with_context(|| format!("failed to connect to redis at {}", addr))?;
    let receivers: i64 = conn.publish(topic, command).await?;
    info!(topic, command, receivers, "[PUB] command sent");
    Ok(receivers)
}

/// Remote-controlled engine host.
pub struct WorkerNode<B> {
    bus: B,
    /// Start-up flags; `PRE` flags are applied on top of them
    base_args: Vec<String>,
    control: Arc<ControlState>,
    engine: Option<Engine>,
}

impl<B: ControlBus> WorkerNode<B> {
    pub fn new(bus: B, base_args: Vec<String>, control: Arc<ControlState>) -> Self {
        Self {
            bus,
            base_args,
            control,
            engine: None,
        }
    }

    /// Handle commands until `EXIT`, interrupt or loss of the subscription.
    /// Only scenario failures are returned as errors.
    pub async fn run(mut self) -> Result<()> {
        info!("waiting for commands");
        let result = self.serve().await;
        self.bus.close().await;
        result
    }

    async fn serve(&mut self) -> Result<()> {
        loop {
            let message = tokio::select! {
                _ = self.control.stopped() => {
                    info!("interrupted, leaving control loop");
                    return Ok(());
                }
                message = self.bus.next_message() => message,
            };

            let payload = match message {
                Ok(Some(payload)) => payload,
                Ok(None) => {
                    warn!("control subscription closed");
                    return Ok(());
                }
                Err(e) => {
                    error!(error = %format!("{:#}", e), "control channel failed");
                    return Ok(());
                }
            };
            debug!(%payload, "[SUB] message");

            match parse_control_command(&payload) {
                Some(ControlCommand::Pre(args)) => self.prepare(&args).await?,
                Some(ControlCommand::Run) => self.run_test().await?,
                Some(ControlCommand::Exit) => {
                    info!("EXIT received");
                    return Ok(());
                }
                None => debug!("ignoring non-command message"),
            }
        }
    }

    async fn prepare(&mut self, args: &[String]) -> Result<()> {
        let cli = match Cli::parse_command_args(self.base_args.iter().chain(args)) {
            Ok(cli) => cli,
            Err(e) => {
                warn!(error = %e, "ignoring PRE with invalid flags");
                return Ok(());
            }
        };

        let mut engine = Engine::new(Config::from_cli(&cli), self.control.clone())?;
        println!("{}", engine.banner());
        engine.provision().await?;
        self.engine = Some(engine);
        Ok(())
    }

    async fn run_test(&mut self) -> Result<()> {
        if self.engine.is_none() {
            self.prepare(&[]).await?;
        }
        let Some(engine) = &self.engine else {
            return Ok(());
        };

        let report = engine.run().await?;
        let text = report.render();
        println!("RUN Finish!");
        print!("{}", text);

        if let Some(path) = &engine.config().csv {
            write_csv(path, &report)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        let message = format!("IP : {}\n{}", local_ip(), text);
        if let Err(e) = self.bus.publish(&message).await {
            error!(error = %format!("{:#}", e), "failed to publish report");
        }
        Ok(())
    }
}
