use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use tickscope::config::{Overrides, Settings};
use tickscope::console::{Command, Console, Flow, Stdout};
use tickscope::duration::{format_duration, parse_duration};
use tickscope::ticker::TickLoop;
use tickscope_sdk::{
    providers, BytebinClient, CommandSender, FnProvider, MonitoringManager, MonitoringPublisher,
    SocketEvent, SocketTransport, TickRateCalculator, TpsProvider,
};

#[derive(Parser, Debug)]
#[command(name = "tickscope")]
#[command(about = "Samples CPU, memory and tick rate, streams live updates and publishes history")]
#[command(version)]
struct Args {
    /// Path to a TOML settings file
    #[arg(short, long, env = "TICKSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of snapshots kept in memory
    #[arg(long)]
    history: Option<usize>,

    /// Time between collection cycles (e.g., "5s", "500ms")
    #[arg(short, long, value_parser = parse_duration)]
    interval: Option<Duration>,

    /// Host loop ticks per second
    #[arg(long)]
    tick_rate: Option<f64>,

    /// Set up a socket and publish once at startup
    #[arg(short, long)]
    publish: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let settings = Settings::load(args.config.as_deref())?.with_overrides(&Overrides {
        history: args.history,
        interval: args.interval,
        tick_rate: args.tick_rate,
        publish: args.publish,
    })?;

    init_tracing(&settings.log_level);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let _guard = runtime.enter();

    let manager = MonitoringManager::builder()
        .history_length(settings.history)
        .build()?;

    let calculator = Arc::new(TickRateCalculator::new());
    providers::register_system(&manager);
    manager.add_provider(
        providers::TPS,
        Arc::new(TpsProvider::new(calculator.clone())),
    );
    let ticks = calculator.clone();
    manager.add_provider(
        "ticks",
        Arc::new(FnProvider::sync(move || Ok(json!(ticks.ticks())))),
    );

    let transport = SocketTransport::builder()
        .host(&settings.socket_host)
        .user_agent(settings.user_agent.clone())
        .build()?;
    let store = BytebinClient::builder()
        .base_url(&settings.content_url)
        .viewer_url(settings.viewer_url.clone())
        .user_agent(settings.user_agent.clone())
        .build()?;
    let publisher = MonitoringPublisher::builder()
        .transport(Arc::new(transport))
        .store(Arc::new(store))
        .manager(&manager)
        .reconnect_policy(settings.reconnect_policy())
        .on_socket_event(announce)
        .build()?;

    info!(
        history = settings.history,
        interval = %format_duration(settings.interval),
        providers = ?manager.provider_ids(),
        "Monitoring started"
    );

    let ticker = TickLoop::spawn(
        settings.tick_rate,
        settings.interval,
        calculator.clone(),
        manager.clone(),
    )?;

    let console = Console::new(manager.clone(), publisher.clone(), calculator);
    let result = runtime.block_on(read_commands(&console, settings.publish));

    ticker.stop();
    publisher.disconnect();
    manager.close();
    info!("Monitoring stopped");

    result
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Tell the operator when streaming stops for good.
fn announce(event: &SocketEvent) {
    if !event.is_terminal() {
        return;
    }
    match event {
        SocketEvent::ReconnectExhausted { attempts } => Stdout.send_message(&format!(
            "Lost the viewer socket after {attempts} reconnect attempts. Run 'monitoring' to start again."
        )),
        SocketEvent::Closed { code, .. } => {
            Stdout.send_message(&format!("Viewer socket closed ({code})."))
        }
        _ => {}
    }
}

async fn read_commands(console: &Console, publish: bool) -> Result<()> {
    let out = Stdout;
    if publish {
        console.handle(Command::Monitoring, &out).await;
    }
    out.send_message("Type 'help' for a list of commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line.context("Failed to read stdin")? {
                Some(line) => {
                    if console.handle_line(&line, &out).await == Flow::Stop {
                        break;
                    }
                }
                None => {
                    // Detached from a terminal; keep collecting until interrupted.
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
