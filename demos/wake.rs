use async_wol::{
    CoordinatorConfigBuilder, DeviceBook, DeviceId, DeviceSnapshot, ReachabilityCoordinator,
};
use clap::Parser;
use std::io::Write;
use std::time::Duration;

/// Sends a Wake-on-LAN packet and reports whether the device came up
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Hardware address of the device, e.g. AA:BB:CC:DD:EE:FF
    #[arg(short, long)]
    mac: String,

    /// Broadcast address the magic packet is sent to
    #[arg(short, long, default_value = "255.255.255.255")]
    broadcast: String,

    /// UDP port the magic packet is sent to
    #[arg(short, long, default_value = "9")]
    port: String,

    /// IP address used for the follow-up status check
    #[arg(short, long)]
    ip: String,

    /// Seconds to wait before checking the device status
    #[arg(short, long, default_value_t = 5)]
    delay: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut book = DeviceBook::new();
    let id = book.add(
        DeviceSnapshot::new(DeviceId::new(), "target", &args.mac, &args.broadcast, &args.ip)
            .with_port(&args.port),
    );

    let (coordinator, mut updates) = ReachabilityCoordinator::new(
        CoordinatorConfigBuilder::new()
            .with_reprobe_delay(Duration::from_secs(args.delay))
            .build(),
    );

    if let Some(wake) = coordinator.wake(&book.get(id).unwrap().snapshot()) {
        wake.await.unwrap();
        while coordinator.is_probing(id) {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
    book.apply_pending(&mut updates);

    let device = book.get(id).unwrap();
    let mut stdout = std::io::stdout().lock();
    for entry in &device.log {
        writeln!(stdout, "{} {}", entry.timestamp.format("%H:%M:%S%.3f"), entry.message).unwrap();
    }
    writeln!(stdout, "Status: {:?}", device.status).unwrap();
}
