use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_PROBE_COUNT, DEFAULT_PROBE_INTERVAL, DEFAULT_REPROBE_DELAY};
use crate::device::{DeviceId, DeviceSnapshot, DeviceStatus, Update, UpdateReceiver};
use crate::magic::MagicPacket;
use crate::probe::{Echo, IcmpEcho, Prober};
use crate::registry::{ProbeHandle, ProbeRegistry};
use crate::wake::WakeSender;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub probe_count: u16,
    pub probe_interval: Duration,
    pub reprobe_delay: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfigBuilder::new().build()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfigBuilder {
    probe_count: u16,
    probe_interval: Duration,
    reprobe_delay: Option<Duration>,
}

impl Default for CoordinatorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorConfigBuilder {
    pub fn new() -> Self {
        Self {
            probe_count: DEFAULT_PROBE_COUNT,
            probe_interval: DEFAULT_PROBE_INTERVAL,
            reprobe_delay: Some(DEFAULT_REPROBE_DELAY),
        }
    }

    pub fn with_probe_count(mut self, count: u16) -> Self {
        self.probe_count = count;
        self
    }

    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Delay between a successful wake and the follow-up status check.
    pub fn with_reprobe_delay(mut self, delay: Duration) -> Self {
        self.reprobe_delay = Some(delay);
        self
    }

    pub fn without_reprobe(mut self) -> Self {
        self.reprobe_delay = None;
        self
    }

    pub fn build(self) -> CoordinatorConfig {
        CoordinatorConfig {
            probe_count: self.probe_count,
            probe_interval: self.probe_interval,
            reprobe_delay: self.reprobe_delay,
        }
    }
}

/// Drives wake and status-check operations for a device collection it does not own.
///
/// Results are never written to device storage directly: every status change and log
/// line is emitted as an [`Update`] on the receiver returned at construction, in the
/// order it must be applied.
///
/// # Example
/// ```no_run
/// use async_wol::{CoordinatorConfig, DeviceBook, DeviceId, DeviceSnapshot, ReachabilityCoordinator};
///
/// tokio_test::block_on(async {
///     let (coordinator, mut updates) = ReachabilityCoordinator::new(CoordinatorConfig::default());
///     let mut book = DeviceBook::new();
///     let id = book.add(DeviceSnapshot::new(
///         DeviceId::new(),
///         "nas",
///         "AA:BB:CC:DD:EE:FF",
///         "192.168.1.255",
///         "192.168.1.10",
///     ));
///
///     let snapshot = book.get(id).unwrap().snapshot();
///     coordinator.check_status(&snapshot).wait().await;
///     book.apply_pending(&mut updates);
///     println!("{:?}", book.get(id).unwrap().status);
/// })
/// ```
#[derive(Debug)]
pub struct ReachabilityCoordinator<E: Echo = IcmpEcho> {
    inner: Arc<Inner<E>>,
}

#[derive(Debug)]
struct Inner<E> {
    sender: WakeSender,
    prober: Arc<Prober<E>>,
    registry: Arc<ProbeRegistry>,
    updates: UnboundedSender<Update>,
    reprobe_delay: Option<Duration>,
    pending: Mutex<PendingReprobes>,
    shutdown: CancellationToken,
}

#[derive(Debug)]
struct PendingReprobe {
    generation: u64,
    token: CancellationToken,
}

/// Status checks scheduled after a wake that have not started yet.
#[derive(Debug, Default)]
struct PendingReprobes {
    next_generation: u64,
    reprobes: HashMap<DeviceId, PendingReprobe>,
}

impl ReachabilityCoordinator<IcmpEcho> {
    /// Creates a coordinator probing over ICMP.
    ///
    /// ICMP sockets are opened lazily by the first probe; failing to open them is reported
    /// per device as a probe setup failure.
    pub fn new(config: CoordinatorConfig) -> (Self, UpdateReceiver) {
        Self::with_echo(config, IcmpEcho::new())
    }
}

impl<E: Echo> ReachabilityCoordinator<E> {
    pub fn with_echo(config: CoordinatorConfig, echo: E) -> (Self, UpdateReceiver) {
        let (updates, receiver) = mpsc::unbounded_channel();
        let prober = Prober::new(echo)
            .with_count(config.probe_count)
            .with_interval(config.probe_interval);
        let inner = Inner {
            sender: WakeSender::new(),
            prober: Arc::new(prober),
            registry: Arc::new(ProbeRegistry::new()),
            updates,
            reprobe_delay: config.reprobe_delay,
            pending: Mutex::new(PendingReprobes::default()),
            shutdown: CancellationToken::new(),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            receiver,
        )
    }

    /// Sends a magic packet to the device, then schedules a status check if configured to.
    ///
    /// Returns `None` when the MAC address is invalid; nothing is sent in that case.
    pub fn wake(&self, device: &DeviceSnapshot) -> Option<JoinHandle<()>> {
        Inner::wake(&self.inner, device, self.inner.reprobe_delay)
    }

    /// Like [`ReachabilityCoordinator::wake`], without the follow-up status check.
    pub fn wake_only(&self, device: &DeviceSnapshot) -> Option<JoinHandle<()>> {
        Inner::wake(&self.inner, device, None)
    }

    /// Probes the device, cancelling any probe already running for it.
    pub fn check_status(&self, device: &DeviceSnapshot) -> ProbeHandle {
        self.inner.check_status(device)
    }

    pub fn check_all<'a>(
        &self,
        devices: impl IntoIterator<Item = &'a DeviceSnapshot>,
    ) -> Vec<ProbeHandle> {
        devices
            .into_iter()
            .map(|device| self.inner.check_status(device))
            .collect()
    }

    /// Stops any outstanding probe for a device that is being removed, including a status
    /// check still waiting to follow a wake. Returns whether anything was cancelled.
    pub fn forget(&self, device_id: DeviceId) -> bool {
        let reprobe = self.inner.cancel_reprobe(device_id);
        let probe = self.inner.registry.cancel(device_id);
        reprobe || probe
    }

    pub fn is_probing(&self, device_id: DeviceId) -> bool {
        self.inner.registry.is_probing(device_id)
    }
}

impl<E> Drop for ReachabilityCoordinator<E>
where
    E: Echo,
{
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
        self.inner.registry.cancel_all();
    }
}

impl<E: Echo> Inner<E> {
    fn wake(
        this: &Arc<Self>,
        device: &DeviceSnapshot,
        reprobe_delay: Option<Duration>,
    ) -> Option<JoinHandle<()>> {
        let packet = match MagicPacket::build(&device.mac) {
            Ok(packet) => packet,
            Err(err) => {
                this.emit(Update::log(device.id, err.to_string()));
                return None;
            }
        };
        this.emit(Update::log(
            device.id,
            format!(
                "Sending magic packet to {}:{}",
                device.broadcast.trim(),
                device.port.trim()
            ),
        ));

        let inner = Arc::clone(this);
        let device = device.clone();
        Some(tokio::spawn(async move {
            let result = inner
                .sender
                .send(&packet, &device.broadcast, &device.port)
                .await;
            if let Err(err) = result {
                inner.emit(Update::log(device.id, err.to_string()));
                return;
            }
            inner.emit(Update::log(device.id, "Magic packet sent"));

            if let Some(delay) = reprobe_delay {
                let (generation, token) = inner.schedule_reprobe(device.id);
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("skipping re-probe of {}", device.id);
                    }
                    _ = tokio::time::sleep(delay) => {
                        inner.start_reprobe(&device, generation);
                    }
                }
            }
        }))
    }

    // A later wake of the same device replaces the pending check.
    fn schedule_reprobe(&self, device_id: DeviceId) -> (u64, CancellationToken) {
        let mut pending = self.lock_pending();
        pending.next_generation += 1;
        let generation = pending.next_generation;
        let token = self.shutdown.child_token();
        let previous = pending.reprobes.insert(
            device_id,
            PendingReprobe {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            previous.token.cancel();
        }
        (generation, token)
    }

    // Runs under the pending lock so a concurrent forget either prevents the probe or
    // finds it in the registry.
    fn start_reprobe(&self, device: &DeviceSnapshot, generation: u64) {
        let mut pending = self.lock_pending();
        match pending.reprobes.get(&device.id) {
            Some(reprobe) if reprobe.generation == generation && !reprobe.token.is_cancelled() => {
                pending.reprobes.remove(&device.id);
                self.check_status(device);
            }
            _ => debug!("re-probe of {} was replaced", device.id),
        }
    }

    fn cancel_reprobe(&self, device_id: DeviceId) -> bool {
        match self.lock_pending().reprobes.remove(&device_id) {
            Some(reprobe) => {
                reprobe.token.cancel();
                true
            }
            None => false,
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, PendingReprobes> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_status(&self, device: &DeviceSnapshot) -> ProbeHandle {
        let device_id = device.id;
        let checking = Update::status(
            device_id,
            DeviceStatus::Unknown,
            format!("Checking status of {}", device.ip.trim()),
        );

        let prober = Arc::clone(&self.prober);
        let host = device.ip.clone();
        let updates = self.updates.clone();
        self.registry.start_probe_with(
            device_id,
            || self.emit(checking),
            async move { prober.probe(&host).await },
            move |result| {
                let update = match result {
                    Ok(verdict) => Update::status(device_id, verdict.status(), verdict.summary()),
                    Err(err) => Update::status(device_id, DeviceStatus::Offline, err.to_string()),
                };
                send(&updates, update);
            },
        )
    }

    fn emit(&self, update: Update) {
        send(&self.updates, update);
    }
}

fn send(updates: &UnboundedSender<Update>, update: Update) {
    if let Err(err) = updates.send(update) {
        warn!(
            "update receiver dropped, discarding update for {}",
            err.0.device_id
        );
    }
}
