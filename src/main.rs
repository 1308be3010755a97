use color_eyre::{eyre::eyre, Result};
use gamepad_jogging::cell::StaticCell;
use gamepad_jogging::config::{AppConfig, StreamKind};
use gamepad_jogging::controller::ControllerHandle;
use gamepad_jogging::jogging::JoggingController;
use gamepad_jogging::mqtt::MqttJoggingTransport;
use gamepad_jogging::transport::loopback::LoopbackTransport;
use gamepad_jogging::transport::JoggingTransport;
use std::str::FromStr;
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::default_path()?;
    AppConfig::ensure_default_config(&config_path).await?;
    let config = AppConfig::load(&config_path).await?;
    info!("Configuration loaded from {}", config_path.display());

    let (batch_tx, batch_rx) = mpsc::channel(config.gamepad.batch_capacity);
    let mut gamepad = ControllerHandle::spawn(Some(config.gamepad.clone()), batch_tx)
        .await
        .map_err(|e| eyre!("Failed to spawn controller: {}", e))?;

    let cell = StaticCell::new(config.cell.clone());

    match config.stream.kind {
        StreamKind::Mqtt => {
            let transport = MqttJoggingTransport::new(
                config.stream.mqtt.clone(),
                cell.id(),
                config.jogging.frame_buffer,
            );
            let controller = JoggingController::new(Arc::new(transport), batch_rx, config.jogging);
            run_console(controller, &cell).await?;
        }
        StreamKind::Loopback => {
            info!("Loopback mode, frames are logged instead of sent");
            let (transport, mut frames) = LoopbackTransport::new(config.jogging.frame_buffer);
            tokio::spawn(async move {
                while let Some(frame) = frames.recv().await {
                    info!(
                        "pos ({:.3}, {:.3}, {:.3}) @ {:.3} mm/s, rot ({:.3}, {:.3}, {:.3}) @ {:.3} rad/s",
                        frame.position_direction.x,
                        frame.position_direction.y,
                        frame.position_direction.z,
                        frame.position_velocity,
                        frame.rotation_direction.x,
                        frame.rotation_direction.y,
                        frame.rotation_direction.z,
                        frame.rotation_velocity
                    );
                }
            });
            let controller = JoggingController::new(Arc::new(transport), batch_rx, config.jogging);
            run_console(controller, &cell).await?;
        }
    }

    // The batch receiver is gone by now, so a reader stuck in a send wakes up too
    tokio::task::spawn_blocking(move || gamepad.shutdown()).await?;
    info!("Shut down");
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsoleCommand {
    Activate,
    Deactivate,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "activate" | "a" => Ok(Self::Activate),
            "deactivate" | "d" => Ok(Self::Deactivate),
            "status" | "s" => Ok(Self::Status),
            "quit" | "q" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

async fn run_console<T: JoggingTransport>(
    controller: JoggingController<T>,
    cell: &StaticCell,
) -> Result<()> {
    info!("Commands: activate, deactivate, status, quit");
    let mut lines = spawn_console_reader();
    let mut console_open = true;

    loop {
        let running = controller.is_running();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            _ = controller.stopped(), if running => {
                warn!("Jogging session ended on its own");
                report_deactivation(&controller).await;
            }
            line = lines.recv(), if console_open => {
                let Some(line) = line else {
                    info!("Console closed, press Ctrl-C to quit");
                    console_open = false;
                    continue;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ConsoleCommand>() {
                    Ok(ConsoleCommand::Activate) => activate(&controller, cell).await,
                    Ok(ConsoleCommand::Deactivate) => report_deactivation(&controller).await,
                    Ok(ConsoleCommand::Status) => status(&controller).await,
                    Ok(ConsoleCommand::Quit) => break,
                    Err(e) => warn!("{}, try activate, deactivate, status or quit", e),
                }
            }
        }
    }

    report_deactivation(&controller).await;
    Ok(())
}

/// Reads stdin on its own thread; a blocked read must not hold up shutdown.
fn spawn_console_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!("Console input unavailable: {}", e);
    }
    rx
}

async fn activate<T: JoggingTransport>(controller: &JoggingController<T>, cell: &StaticCell) {
    match controller.activate_in_cell(cell).await {
        Ok(motion_group) => info!("Jogging activated for {}", motion_group),
        Err(e) => error!("Jogging activation failed: {}", e),
    }
}

async fn report_deactivation<T: JoggingTransport>(controller: &JoggingController<T>) {
    match controller.deactivate().await {
        Ok(Some(report)) => info!(
            "Jogging deactivated: {} frames sent to {}, {} responses",
            report.frames_sent, report.motion_group, report.responses_received
        ),
        Ok(None) => {}
        Err(e) => error!("Jogging session failed: {}", e),
    }
}

async fn status<T: JoggingTransport>(controller: &JoggingController<T>) {
    match controller.active_motion_group().await {
        Some(motion_group) => {
            let state = controller.axis_state().snapshot();
            info!(
                "Jogging {}: position @ {:.3} mm/s, rotation @ {:.3} rad/s",
                motion_group, state.position_velocity, state.rotation_velocity
            );
        }
        None => info!("Jogging inactive"),
    }
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}
