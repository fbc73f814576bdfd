//! Console commands read from stdin.

use std::str::FromStr;
use std::sync::Arc;

use tickscope_sdk::{CommandSender, MonitoringManager, MonitoringPublisher, TickRateCalculator};
use tracing::error;

/// Prefix on every line printed to the console.
pub const PREFIX: &str = "[tickscope]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set up the socket if needed and publish the history.
    Monitoring,
    /// Print tick-rate averages.
    Tps,
    /// Print the history as JSON.
    Export,
    Help,
    Stop,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monitoring" | "publish" => Ok(Command::Monitoring),
            "tps" => Ok(Command::Tps),
            "export" => Ok(Command::Export),
            "help" | "?" => Ok(Command::Help),
            "stop" | "quit" | "exit" => Ok(Command::Stop),
            other => Err(format!("Unknown command '{other}'. Type 'help' for a list.")),
        }
    }
}

/// What the read loop should do after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Prints prefixed messages to stdout.
#[derive(Debug, Default)]
pub struct Stdout;

impl CommandSender for Stdout {
    fn send_message(&self, message: &str) {
        println!("{PREFIX} {message}");
    }
}

/// Executes console commands against the running daemon.
pub struct Console {
    manager: MonitoringManager,
    publisher: MonitoringPublisher,
    calculator: Arc<TickRateCalculator>,
}

impl Console {
    pub fn new(
        manager: MonitoringManager,
        publisher: MonitoringPublisher,
        calculator: Arc<TickRateCalculator>,
    ) -> Self {
        Self {
            manager,
            publisher,
            calculator,
        }
    }

    /// Parse and run one input line. Blank lines are ignored.
    pub async fn handle_line(&self, line: &str, out: &dyn CommandSender) -> Flow {
        if line.trim().is_empty() {
            return Flow::Continue;
        }
        match line.parse::<Command>() {
            Ok(command) => self.handle(command, out).await,
            Err(message) => {
                out.send_message(&message);
                Flow::Continue
            }
        }
    }

    pub async fn handle(&self, command: Command, out: &dyn CommandSender) -> Flow {
        match command {
            Command::Monitoring => self.monitoring(out).await,
            Command::Tps => {
                out.send_message("TPS from last 5s, 10s, 1m, 5m, 15m:");
                out.send_message(&self.calculator.formatted());
            }
            Command::Export => match serde_json::to_string_pretty(&self.manager.export()) {
                Ok(json) => out.send_message(&json),
                Err(e) => out.send_message(&format!("Unable to export history: {e}")),
            },
            Command::Help => {
                out.send_message("Commands: monitoring, tps, export, help, stop");
            }
            Command::Stop => return Flow::Stop,
        }
        Flow::Continue
    }

    async fn monitoring(&self, out: &dyn CommandSender) {
        if self.publisher.ensure_socket_setup(Some(out)).await.is_err() {
            return;
        }

        match self.publisher.publish().await {
            Ok(key) => {
                out.send_message("Monitoring data published:");
                out.send_message(&self.publisher.viewer_url(&key));
            }
            Err(e) => {
                error!(error = %e, "Publish failed");
                out.send_message("An error occurred whilst uploading monitoring data.");
            }
        }
    }
}
