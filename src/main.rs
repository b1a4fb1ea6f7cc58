//! CLI Entry Point for motorctl
//!
//! Provides command-line interface for:
//! - Listing serial ports the motor may be attached to
//! - Driving the motor interactively from stdin
//!
//! # Usage
//!
//! List ports:
//! ```bash
//! motorctl ports
//! ```
//!
//! Drive the motor:
//! ```bash
//! motorctl run --port /dev/ttyACM0 --config motor.toml
//! ```
//!
//! Commands read from stdin in `run` mode:
//! `calibrate`, `manual`, `cw`, `ccw`, `stop`, `done`, `target <mm>`,
//! `rest`, `status`, `raw <line>`, `quit`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use motor_controller::config::MotorConfig;
use motor_controller::controller::{ControllerEvent, MotorController, TransitionPhase};
use motor_controller::hardware::available_ports;
use motor_controller::logging;
use motor_controller::protocol::{Command, ManualCommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "motorctl")]
#[command(about = "Serial motor controller", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Connect to the motor and read commands from stdin
    Run {
        /// Serial device, e.g. /dev/ttyACM0 or COM3
        #[arg(long)]
        port: String,

        /// Optional TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Print controller events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

/// One line of operator input.
#[derive(Debug, PartialEq)]
enum Input {
    Calibrate,
    Manual,
    Jog(ManualCommand),
    Done,
    Target(f64),
    Rest,
    Status,
    Raw(String),
    Quit,
}

fn parse_input(line: &str) -> Result<Input> {
    let line = line.trim();
    let (word, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    Ok(match word.to_lowercase().as_str() {
        "calibrate" => Input::Calibrate,
        "manual" => Input::Manual,
        "cw" => Input::Jog(ManualCommand::Cw),
        "ccw" => Input::Jog(ManualCommand::Ccw),
        "stop" => Input::Jog(ManualCommand::Stop),
        "done" => Input::Done,
        "target" => {
            let mm: f64 = rest
                .parse()
                .with_context(|| format!("'{}' is not a distance in mm", rest))?;
            if !mm.is_finite() || mm < 0.0 {
                bail!("Target distance must be a non-negative number of mm");
            }
            Input::Target(mm)
        }
        "rest" => Input::Rest,
        "status" => Input::Status,
        "raw" if !rest.is_empty() => Input::Raw(rest.to_string()),
        "quit" | "exit" => Input::Quit,
        other => bail!("Unknown command '{}'", other),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ports => list_ports(),
        Commands::Run { port, config, json } => run(port, config, json).await,
    }
}

fn list_ports() -> Result<()> {
    let ports = available_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port.label);
    }
    Ok(())
}

async fn run(port: String, config_path: Option<PathBuf>, json: bool) -> Result<()> {
    let config = match &config_path {
        Some(path) => MotorConfig::load_from(path)?,
        None => MotorConfig::load()?,
    };
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;
    info!(app = %config.application.name, "Starting");

    let controller = Arc::new(MotorController::new(&config));
    let printer = tokio::spawn(print_events(controller.event_stream(), json));

    // Mailbox drain at a fixed cadence
    let drain = {
        let controller = controller.clone();
        let interval = config.mailbox.drain_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for line in controller.drain_messages() {
                    info!(at = %line.timestamp.format("%H:%M:%S%.3f"), "<- Received: {}", line.text);
                }
            }
        })
    };

    controller.connect(&port).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_input(&line) {
                    Ok(Input::Quit) => break,
                    Ok(input) => execute(&controller, input),
                    Err(err) => warn!("{:#}", err),
                }
            }
        }
    }

    controller.shutdown().await;
    drain.abort();
    printer.abort();
    for line in controller.drain_messages() {
        info!("<- Received: {}", line.text);
    }
    Ok(())
}

fn execute(controller: &MotorController, input: Input) {
    let result = match input {
        Input::Calibrate => controller.start_calibration(),
        Input::Manual if !controller.is_calibrated() => {
            warn!("Calibrate before entering manual control");
            return;
        }
        Input::Manual => controller.manual_mode(),
        Input::Jog(command) => {
            controller.send_command(&Command::Manual(command));
            Ok(())
        }
        Input::Done => {
            controller.send_command(&Command::Manual(ManualCommand::Complete));
            controller.go_rest()
        }
        Input::Target(_) if !controller.is_calibrated() => {
            warn!("Calibrate before moving to a target");
            return;
        }
        Input::Target(mm) => controller
            .set_target_distance(mm)
            .and_then(|()| controller.target_move()),
        Input::Rest => controller.go_rest(),
        Input::Status => {
            match serde_json::to_string(&controller.snapshot()) {
                Ok(status) => println!("{}", status),
                Err(err) => warn!(error = %err, "Could not render status"),
            }
            Ok(())
        }
        Input::Raw(line) => {
            controller.send(&line);
            Ok(())
        }
        Input::Quit => Ok(()),
    };

    if let Err(err) = result {
        warn!("{}", err);
    }
}

async fn print_events(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ControllerEvent>,
    json: bool,
) {
    while let Some(event) = events.recv().await {
        if json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!(error = %err, "Could not serialize event"),
            }
            continue;
        }
        match event {
            ControllerEvent::StateChanged {
                mode,
                phase: TransitionPhase::After,
            } => println!("Mode: {}", mode),
            ControllerEvent::StateChanged { .. } => {}
            ControllerEvent::PositionChanged { value } => println!("Position: {:.3} mm", value),
            ControllerEvent::ConnectionChanged { status, detail } => match detail {
                Some(detail) => println!("Connection: {} ({})", status, detail),
                None => println!("Connection: {}", status),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_commands() {
        assert_eq!(parse_input("calibrate").unwrap(), Input::Calibrate);
        assert_eq!(parse_input(" CW ").unwrap(), Input::Jog(ManualCommand::Cw));
        assert_eq!(parse_input("target 12.5").unwrap(), Input::Target(12.5));
        assert_eq!(
            parse_input("raw MANUAL:STOP").unwrap(),
            Input::Raw("MANUAL:STOP".into())
        );
        assert_eq!(parse_input("quit").unwrap(), Input::Quit);
    }

    #[test]
    fn rejects_bad_targets() {
        assert!(parse_input("target -1").is_err());
        assert!(parse_input("target abc").is_err());
        assert!(parse_input("target").is_err());
        assert!(parse_input("raw").is_err());
        assert!(parse_input("spin").is_err());
    }
}
