//! aggvol CLI Application

mod listen;

use aggvol_core::domain::{
    AggvolConfig, ConfigManager, ConfigWatcher, Device, DeviceChange, HotkeyEvent,
    PropertyBridge, StatusSnapshot, VolumeController,
};
use aggvol_infra::audio::{simulated_bridge, system_bridge};
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use listen::ChangeListener;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "aggvol")]
#[command(about = "One volume control for aggregate audio devices", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: <config dir>/aggvol/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Use simulated devices instead of the OS audio system
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices
    List {
        #[arg(long)]
        json: bool,
    },
    /// Show volume and mute of the default output device
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Set the volume in percent (0 mutes)
    Set { percent: f32 },
    /// Raise the volume by one step
    Up,
    /// Lower the volume by one step
    Down,
    /// Mute the default output device
    Mute,
    /// Unmute the default output device
    Unmute,
    /// Toggle mute
    Toggle,
    /// Make a device the default output, by id, UID or name
    Select { device: String },
    /// Show what each sub-device contributes
    Members,
    /// Follow the default device and read hotkeys (up, down, mute) from stdin
    Run,
}

#[derive(Serialize)]
struct DeviceListing {
    #[serde(flatten)]
    device: Device,
    uid: Option<String>,
    default: bool,
    aggregate: bool,
    members: Vec<Device>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .with_writer(std::io::stderr)
            .init();
    }

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new(ConfigManager::default_config_dir()?),
    };
    let config = manager.load().await;

    let bridge: Arc<dyn PropertyBridge> = if cli.simulate {
        simulated_bridge()
    } else {
        system_bridge()?
    };

    let mut controller = VolumeController::new(bridge, &config);
    controller.refresh_devices();
    controller.refresh_current_device();

    match cli.command.unwrap_or(Commands::Status { json: false }) {
        Commands::List { json } => list(&controller, json)?,
        Commands::Status { json } => print_snapshot(&controller.snapshot(), json)?,
        Commands::Set { percent } => {
            require_device(&controller)?;
            controller.set_current_volume(percent.clamp(0.0, 100.0) / 100.0);
            print_result(&mut controller)?;
        }
        Commands::Up => hotkey(&mut controller, HotkeyEvent::VolumeUp)?,
        Commands::Down => hotkey(&mut controller, HotkeyEvent::VolumeDown)?,
        Commands::Toggle => hotkey(&mut controller, HotkeyEvent::MuteToggle)?,
        Commands::Mute => set_mute(&mut controller, true)?,
        Commands::Unmute => set_mute(&mut controller, false)?,
        Commands::Select { device } => {
            let device = controller.directory().find(&device)?;
            controller.select_device(device);
            print_snapshot(&controller.snapshot(), false)?;
        }
        Commands::Members => members(&controller)?,
        Commands::Run => run(controller, manager, config, cli.simulate).await?,
    }

    Ok(())
}

fn require_device(controller: &VolumeController) -> anyhow::Result<Device> {
    controller
        .current_device()
        .cloned()
        .ok_or_else(|| anyhow!("No default output device"))
}

fn hotkey(controller: &mut VolumeController, event: HotkeyEvent) -> anyhow::Result<()> {
    require_device(controller)?;
    controller.handle_hotkey(event);
    print_result(controller)
}

fn set_mute(controller: &mut VolumeController, muted: bool) -> anyhow::Result<()> {
    let device = require_device(controller)?;
    controller
        .engine()
        .set_mute(&device, muted)
        .with_context(|| format!("Could not change mute on {}", device))?;
    print_result(controller)
}

/// Re-read hardware after a write and print what it now reports
fn print_result(controller: &mut VolumeController) -> anyhow::Result<()> {
    controller.refresh_levels();
    print_snapshot(&controller.snapshot(), false)
}

fn status_line(snapshot: &StatusSnapshot) -> String {
    let device = snapshot
        .device
        .as_ref()
        .map(|d| d.name.as_str())
        .unwrap_or("no device");
    if !snapshot.available && snapshot.device.is_some() {
        return format!("{}: no volume control", device);
    }
    if snapshot.muted {
        format!("{}: muted ({}%)", device, snapshot.percent)
    } else {
        format!("{}: {}%", device, snapshot.percent)
    }
}

fn print_snapshot(snapshot: &StatusSnapshot, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshot)?);
    } else {
        println!("{}", status_line(snapshot));
    }
    Ok(())
}

fn list(controller: &VolumeController, json: bool) -> anyhow::Result<()> {
    let default_id = controller.current_device().map(|d| d.id);
    let listings: Vec<DeviceListing> = controller
        .output_devices()
        .iter()
        .map(|device| {
            let aggregate = controller
                .engine()
                .classify(device)
                .map(|class| class.is_aggregate())
                .unwrap_or(false);
            let members = if aggregate {
                controller.engine().member_devices(device).unwrap_or_default()
            } else {
                Vec::new()
            };
            DeviceListing {
                device: device.clone(),
                uid: controller.directory().device_uid(device).ok(),
                default: Some(device.id) == default_id,
                aggregate,
                members,
            }
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(());
    }

    for listing in &listings {
        let marker = if listing.default { "*" } else { " " };
        if listing.aggregate {
            let names: Vec<&str> = listing.members.iter().map(|m| m.name.as_str()).collect();
            println!("{} {} [aggregate: {}]", marker, listing.device, names.join(", "));
        } else {
            println!("{} {}", marker, listing.device);
        }
    }
    Ok(())
}

fn members(controller: &VolumeController) -> anyhow::Result<()> {
    let device = require_device(controller)?;
    let report = controller.engine().report(&device)?;

    println!("{}", device);
    if report.is_empty() {
        println!("  (no active sub-devices)");
    }
    for member in &report {
        let volume = member
            .volume
            .map(|v| format!("{:.0}%", v * 100.0))
            .unwrap_or_else(|| "no volume control".to_string());
        let channels: Vec<String> = member
            .volume_channels
            .iter()
            .map(|c| c.to_string())
            .collect();
        let source = if member.uses_virtual_main_volume {
            "virtual main".to_string()
        } else {
            format!("channels [{}]", channels.join(", "))
        };
        println!(
            "  {}: {} via {}{}",
            member.device,
            volume,
            source,
            if member.muted { ", muted" } else { "" }
        );
    }
    Ok(())
}

fn ticker(config: &AggvolConfig) -> Interval {
    let mut ticker = interval(config.control.refresh_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

/// Single-writer loop: polling, stdin hotkeys, OS notifications and config reloads
async fn run(
    mut controller: VolumeController,
    manager: ConfigManager,
    mut config: AggvolConfig,
    simulate: bool,
) -> anyhow::Result<()> {
    let (change_tx, mut change_rx) = mpsc::unbounded_channel::<DeviceChange>();
    let mut listener =
        ChangeListener::start(change_tx.clone(), config.control.listen_for_changes && !simulate);
    listener.follow(&controller, &config.engine.probe_channels);

    let watcher = match ConfigWatcher::new(manager.config_path().to_path_buf()).await {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "Config hot-reload disabled");
            None
        }
    };
    let mut reload_rx = watcher.as_ref().map(|w| w.subscribe());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut ticker = ticker(&config);

    info!(
        interval_ms = config.control.refresh_interval_ms,
        "aggvol running, type up, down, mute, refresh or quit"
    );
    println!("{}", status_line(&controller.snapshot()));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if controller.refresh_levels() {
                    println!("{}", status_line(&controller.snapshot()));
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        let command = line.trim();
                        match command {
                            "" => {}
                            "quit" | "exit" | "q" => break,
                            "refresh" => {
                                controller.refresh_devices();
                                controller.refresh_current_device();
                                listener.follow(&controller, &config.engine.probe_channels);
                                println!("{}", status_line(&controller.snapshot()));
                            }
                            other => match other.parse::<HotkeyEvent>() {
                                Ok(event) => {
                                    controller.handle_hotkey(event);
                                    println!("{}", status_line(&controller.snapshot()));
                                }
                                Err(e) => warn!("{}", e),
                            },
                        }
                    }
                    Ok(None) => {
                        debug!("stdin closed, continuing without hotkeys");
                        stdin_open = false;
                    }
                    Err(e) => {
                        warn!(error = %e, "stdin read failed, continuing without hotkeys");
                        stdin_open = false;
                    }
                }
            }
            Some(change) = change_rx.recv() => {
                debug!(?change, "Device change");
                if change.requires_device_refresh() {
                    controller.refresh_devices();
                    controller.refresh_current_device();
                    listener.follow(&controller, &config.engine.probe_channels);
                    println!("{}", status_line(&controller.snapshot()));
                } else if controller.refresh_levels() {
                    println!("{}", status_line(&controller.snapshot()));
                }
            }
            changed = next_config_change(&mut reload_rx) => {
                match changed {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        let reloaded = manager.reload(&config).await;
                        if reloaded != config {
                            if reloaded.control.refresh_interval_ms != config.control.refresh_interval_ms {
                                ticker = self::ticker(&reloaded);
                            }
                            controller.apply_config(&reloaded);
                            config = reloaded;
                            info!("Configuration reloaded");
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => reload_rx = None,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    drop(change_tx);
    info!("aggvol stopped");
    Ok(())
}

async fn next_config_change(
    rx: &mut Option<broadcast::Receiver<PathBuf>>,
) -> Result<PathBuf, broadcast::error::RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
