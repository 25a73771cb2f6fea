//! Print the PulseAudio sources voxgate can record from

use anyhow::Result;
use clap::Parser;
use voxgate::audio::{DeviceType, PulseFrameSource};

#[derive(Parser, Debug)]
#[command(name = "list_devices", about = "List PulseAudio capture devices")]
struct Cli {
    /// Include monitor sources (system playback)
    #[arg(long)]
    monitors: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let filter = if cli.monitors {
        DeviceType::Any
    } else {
        DeviceType::Microphone
    };
    let devices = PulseFrameSource::list_devices(filter)?;

    if devices.is_empty() {
        println!("No audio devices found!");
        return Ok(());
    }

    println!("Available capture devices:");
    for (i, device) in devices.iter().enumerate() {
        println!(
            "{}: {} ({})",
            i + 1,
            device.description,
            if device.is_monitor {
                "Monitor"
            } else {
                "Microphone"
            }
        );
        println!("   Name: {}", device.name);
        println!(
            "   Rate: {} Hz, Channels: {}",
            device.sample_rate, device.channels
        );
    }
    println!("\nPass a name with --device to record from it.");
    Ok(())
}
