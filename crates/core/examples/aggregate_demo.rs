//! Example driving an aggregate device through the in-memory bridge
//!
//! Run with: cargo run --package aggvol-core --example aggregate_demo

use aggvol_core::domain::{
    AggvolConfig, DeviceFixture, HotkeyEvent, MemoryBridge, VolumeController,
};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("aggvol_core=debug,info")
        .init();

    println!("=== Aggregate Volume Demo ===\n");

    // 1. Build a topology: two members with different layouts, one without controls
    println!("1. Installing devices...");
    let devices = [
        DeviceFixture::plain(1, "Studio Monitors").with_stereo(0.4, 0.6),
        DeviceFixture::plain(2, "Headphone Amp")
            .with_volume(0, 0.8)
            .with_mute(0, false),
        DeviceFixture::plain(3, "Capture Card"),
        DeviceFixture::aggregate(10, "Monitoring Bus", &[1, 2, 3]),
    ];
    let bridge = Arc::new(MemoryBridge::with_devices(Some(10), &devices));
    println!("   ✓ Installed {} devices", devices.len());

    // 2. Config, persisted to a scratch file and read back
    println!("\n2. Round-tripping configuration...");
    let config_path = std::env::temp_dir().join("aggvol_demo.toml");
    AggvolConfig::factory_default()
        .save_to_file(&config_path)
        .await?;
    let config = AggvolConfig::load_from_file(&config_path).await?;
    println!("   ✓ Volume step: {}", config.control.volume_step);

    // 3. Follow the default output
    println!("\n3. Following the default output...");
    let mut controller = VolumeController::new(bridge.clone(), &config);
    controller.refresh_devices();
    controller.refresh_current_device();
    let device = controller
        .current_device()
        .cloned()
        .ok_or("no default output device")?;
    println!("   ✓ {} at {:.3}", device, controller.current_volume());

    // 4. Per-member breakdown
    println!("\n4. Members:");
    for member in controller.engine().report(&device)? {
        match member.volume {
            Some(volume) => println!(
                "   - {} {:?} {:.3}",
                member.device.name,
                member.volume_channels.as_slice(),
                volume
            ),
            None => println!("   - {} (no volume control)", member.device.name),
        }
    }

    // 5. Media keys
    println!("\n5. Media keys:");
    for event in [
        HotkeyEvent::VolumeUp,
        HotkeyEvent::VolumeUp,
        HotkeyEvent::MuteToggle,
        HotkeyEvent::MuteToggle,
        HotkeyEvent::VolumeDown,
    ] {
        controller.handle_hotkey(event);
        let snapshot = controller.snapshot();
        println!(
            "   {:<11} → {}",
            event.to_string(),
            snapshot.tooltip.replace('\n', " | ")
        );
    }

    println!("\n6. Writes issued: {}", bridge.writes().len());
    println!("\n=== Demo Complete ===");

    std::fs::remove_file(config_path)?;

    Ok(())
}
