use async_wol::{CoordinatorConfigBuilder, DeviceBook, DeviceId, DeviceSnapshot, ReachabilityCoordinator};
use clap::Parser;
use std::io::Write;
use std::time::{Duration, Instant};

/// Checks the status of several hosts concurrently
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Hosts to probe
    #[arg(required = true)]
    hosts: Vec<String>,

    /// Echo requests sent to each host
    #[arg(short, long, default_value_t = 3)]
    count: u16,

    /// Milliseconds between echo requests
    #[arg(short, long, default_value_t = 800)]
    interval: u64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    pretty_env_logger::init();
    let args = Args::parse();

    let mut book = DeviceBook::new();
    for host in &args.hosts {
        book.add(DeviceSnapshot::new(
            DeviceId::new(),
            host,
            "00:00:00:00:00:00",
            "255.255.255.255",
            host,
        ));
    }
    let snapshots: Vec<_> = book.iter().map(|device| device.snapshot()).collect();

    let (coordinator, mut updates) = ReachabilityCoordinator::new(
        CoordinatorConfigBuilder::new()
            .with_probe_count(args.count)
            .with_probe_interval(Duration::from_millis(args.interval))
            .without_reprobe()
            .build(),
    );

    let start = Instant::now();
    let handles = coordinator.check_all(&snapshots);
    futures::future::join_all(handles.into_iter().map(|handle| handle.wait())).await;
    let check_duration = start.elapsed();
    book.apply_pending(&mut updates);

    {
        let mut stdout = std::io::stdout().lock();
        for device in book.iter() {
            let snapshot = device.snapshot();
            let summary = device
                .log
                .last()
                .map(|entry| entry.message.as_str())
                .unwrap_or_default();
            writeln!(stdout, "{:<20} {:?}\t{}", snapshot.name, device.status, summary).unwrap();
        }
        writeln!(stdout, "Check took {:?}", check_duration).unwrap();
    }
}
