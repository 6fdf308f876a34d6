use anyhow::{Context, Result};
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use barrage::cli::config::{Config, Mode};
use barrage::cli::validate::run_validate;
use barrage::cli::Cli;
use barrage::engine::control::ControlState;
use barrage::engine::distributed::{publish_command, RedisBus, WorkerNode};
use barrage::engine::Engine;
use barrage::scenario;
use barrage::stats::csv::write_csv;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = Cli::parse_command_args(&args).unwrap_or_else(|e| e.exit());

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Mode::Schema = Mode::from_cli(&cli) {
        println!("{}", scenario::json_schema());
        return Ok(());
    }

    let rt = Runtime::new()?;
    rt.block_on(async {
        let control = Arc::new(ControlState::new());
        let on_interrupt = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping...");
                on_interrupt.stop();
            }
        });

        match Mode::from_cli(&cli) {
            Mode::Schema => Ok(()),
            Mode::Check => run_validate(Config::from_cli(&cli), control).await.map(|_| ()),
            Mode::Send { redis, command } => {
                let receivers = publish_command(&redis, &cli.topic, &command).await?;
                println!("{} delivered to {} worker(s)", command, receivers);
                Ok(())
            }
            Mode::Worker { redis } => {
                let bus = RedisBus::connect(&redis, &cli.topic).await?;
                WorkerNode::new(bus, args, control).run().await
            }
            Mode::Coordinator => run_local(Config::from_cli(&cli), control).await,
        }
    })
}

async fn run_local(config: Config, control: Arc<ControlState>) -> Result<()> {
    let mut engine = Engine::new(config, control)?;
    println!("{}", engine.banner());
    engine.provision().await?;

    if engine.config().ready && engine.scenario().has_pre() {
        wait_for_start().await?;
    }
    if engine.control().is_stopped() {
        warn!("interrupted before the run started");
        return Ok(());
    }

    let report = engine.run().await?;
    println!("RUN Finish!");
    print!("{}", report.render());

    if let Some(path) = &engine.config().csv {
        write_csv(path, &report).with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

/// Block until the operator enters a line on stdin.
async fn wait_for_start() -> Result<()> {
    tokio::task::spawn_blocking(|| -> io::Result<()> {
        print!("start > ");
        io::stdout().flush()?;
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line)?;
        Ok(())
    })
    .await??;
    Ok(())
}
