mod face;

use anyhow::{Context, Result};
use clap::Parser;
use dotenvy::dotenv;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};
use webpilot::{
    Agent, AgentEvent, ChromeDriver, Config, ConsoleChannel, ConsoleInput, Executor,
    OpenAiOracle, QueuedChannel, TaskReport, UserChannel,
};

/// Drive a Chrome session with a language model.
#[derive(Parser, Debug)]
#[command(name = "agent", version, about)]
struct Args {
    /// Instruction to run once; omit to read instructions from stdin.
    instruction: Option<String>,

    /// Serve the local web UI instead of using the terminal.
    #[arg(long)]
    ui: bool,

    /// Launch Chrome without a window.
    #[arg(long)]
    headless: bool,

    /// Override the action ceiling per instruction.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Token of the instruction currently running, shared with Ctrl-C and the UI.
type CurrentTask = Arc<Mutex<CancellationToken>>;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = Config::from_env().context("invalid configuration")?;
    if args.headless {
        config = config.with_headless(true);
    }
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max.max(1));
    }
    info!(?config, "starting agent");

    let oracle = Arc::new(OpenAiOracle::new(&config.oracle)?);
    let (event_tx, _) = broadcast::channel::<AgentEvent>(64);
    let current: CurrentTask = Arc::new(Mutex::new(CancellationToken::new()));

    // UI first, so the user sees something while Chrome starts.
    let mut commands = None;
    let console = ConsoleInput::stdin();
    let user: Arc<dyn UserChannel> = if args.ui {
        let (answer_tx, channel) = QueuedChannel::pair(8);
        commands = Some(face::start_server(event_tx.clone(), answer_tx, current.clone()).await?);
        Arc::new(channel)
    } else {
        Arc::new(ConsoleChannel::new(console.clone()))
    };

    info!("launching Chrome");
    let browser = config.browser.clone();
    let driver = tokio::task::spawn_blocking(move || ChromeDriver::launch(&browser))
        .await
        .context("browser launch panicked")??;
    let executor = Executor::for_driver(Arc::new(driver), &config);

    let agent = Agent::new(oracle, executor, user, config.agent.clone()).with_events(event_tx);

    let on_interrupt = current.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the running instruction");
            lock(&on_interrupt).cancel();
        }
    });

    if let Some(instruction) = args.instruction {
        let report = run_one(&agent, &current, &instruction).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.is_success() {
            std::process::exit(1);
        }
        return Ok(());
    }

    if let Some(mut commands) = commands {
        info!("waiting for instructions from the web UI");
        while let Some(instruction) = commands.recv().await {
            run_one(&agent, &current, &instruction).await;
        }
        return Ok(());
    }

    loop {
        // askUser answers come through the same reader, so a prompt that
        // timed out cannot swallow the next instruction.
        let Ok(line) = console.read("\ninstruction> ", false).await else {
            break;
        };
        let instruction = line.trim();
        if instruction.is_empty() {
            continue;
        }
        if matches!(instruction, "exit" | "quit") {
            break;
        }
        let report = run_one(&agent, &current, instruction).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

async fn run_one(agent: &Agent, current: &CurrentTask, instruction: &str) -> TaskReport {
    let cancel = CancellationToken::new();
    *lock(current) = cancel.clone();
    agent.run_with(instruction, &cancel).await
}

fn lock(current: &CurrentTask) -> std::sync::MutexGuard<'_, CancellationToken> {
    current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn init_logging(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
