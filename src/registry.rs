use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, trace};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::device::DeviceId;

#[derive(Debug)]
struct Entry {
    generation: u64,
    token: CancellationToken,
}

#[derive(Debug, Default)]
struct Entries {
    next_generation: u64,
    probes: HashMap<DeviceId, Entry>,
}

/// Tracks at most one in-flight probe per device.
///
/// Starting a probe cancels the previous one for the same device, and a completion is
/// only delivered while its probe is still the current one.
#[derive(Debug, Default)]
pub struct ProbeRegistry {
    entries: Mutex<Entries>,
}

/// Handle to a probe task started through [`ProbeRegistry::start_probe`].
#[derive(Debug)]
pub struct ProbeHandle {
    device_id: DeviceId,
    generation: u64,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the probe task has ended, whether it completed, was superseded or was cancelled.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            debug!("probe task for {} ended abnormally: {}", self.device_id, err);
        }
    }
}

impl ProbeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any probe running for `device_id` and spawns `probe` in its place.
    ///
    /// `on_complete` receives the probe output only if this probe is still current when it
    /// finishes; the entry is removed at the same time. A superseded or cancelled probe is
    /// stopped at its next await point and `on_complete` is dropped unused.
    pub fn start_probe<Fut, T, C>(
        self: &Arc<Self>,
        device_id: DeviceId,
        probe: Fut,
        on_complete: C,
    ) -> ProbeHandle
    where
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        self.start_probe_with(device_id, || (), probe, on_complete)
    }

    /// Like [`ProbeRegistry::start_probe`], running `on_start` under the registry lock once
    /// the previous probe is cancelled, so nothing the old probe delivers can follow it.
    pub fn start_probe_with<S, Fut, T, C>(
        self: &Arc<Self>,
        device_id: DeviceId,
        on_start: S,
        probe: Fut,
        on_complete: C,
    ) -> ProbeHandle
    where
        S: FnOnce(),
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
        C: FnOnce(T) + Send + 'static,
    {
        let token = CancellationToken::new();
        let generation = {
            let mut entries = self.lock();
            if let Some(previous) = entries.probes.remove(&device_id) {
                debug!(
                    "superseding probe #{} for {}",
                    previous.generation, device_id
                );
                previous.token.cancel();
            }
            entries.next_generation += 1;
            let generation = entries.next_generation;
            entries.probes.insert(
                device_id,
                Entry {
                    generation,
                    token: token.clone(),
                },
            );
            on_start();
            generation
        };

        let registry = Arc::clone(self);
        let task = tokio::spawn(async move {
            let output = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    trace!("probe #{} for {} cancelled", generation, device_id);
                    return;
                }
                output = probe => output,
            };
            registry.complete(device_id, generation, || on_complete(output));
        });

        ProbeHandle {
            device_id,
            generation,
            task,
        }
    }

    /// Cancels the probe for `device_id`, if any. Returns whether one was running.
    pub fn cancel(&self, device_id: DeviceId) -> bool {
        match self.lock().probes.remove(&device_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, entry) in self.lock().probes.drain() {
            entry.token.cancel();
        }
    }

    pub fn is_probing(&self, device_id: DeviceId) -> bool {
        self.lock().probes.contains_key(&device_id)
    }

    pub fn len(&self) -> usize {
        self.lock().probes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().probes.is_empty()
    }

    // Delivery happens under the lock so a newer start_probe cannot interleave with it.
    fn complete(&self, device_id: DeviceId, generation: u64, deliver: impl FnOnce()) {
        let mut entries = self.lock();
        match entries.probes.get(&device_id) {
            Some(entry) if entry.generation == generation && !entry.token.is_cancelled() => {
                entries.probes.remove(&device_id);
                deliver();
            }
            _ => trace!(
                "discarding stale completion of probe #{} for {}",
                generation,
                device_id
            ),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        // entries stay consistent even if a holder panicked, so recover the guard
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::oneshot;

    use super::ProbeRegistry;
    use crate::device::DeviceId;

    #[tokio::test]
    async fn test_completion_clears_entry() {
        let registry = Arc::new(ProbeRegistry::new());
        let id = DeviceId::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&delivered);
        let handle = registry.start_probe(id, async { 7 }, move |v| sink.lock().unwrap().push(v));
        handle.wait().await;

        assert_eq!(*delivered.lock().unwrap(), [7]);
        assert!(!registry.is_probing(id));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_restart_delivers_only_latest() {
        let registry = Arc::new(ProbeRegistry::new());
        let id = DeviceId::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&delivered);
        let first = registry.start_probe(
            id,
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                1
            },
            move |v| sink.lock().unwrap().push(v),
        );
        let sink = Arc::clone(&delivered);
        let second = registry.start_probe(
            id,
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                2
            },
            move |v| sink.lock().unwrap().push(v),
        );
        assert_eq!(registry.len(), 1);
        assert!(second.generation() > first.generation());

        futures::future::join_all([first.wait(), second.wait()]).await;
        assert_eq!(*delivered.lock().unwrap(), [2]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_suppresses_delivery() {
        let registry = Arc::new(ProbeRegistry::new());
        let id = DeviceId::new();
        let (release, released) = oneshot::channel::<()>();
        let delivered = Arc::new(Mutex::new(false));

        let sink = Arc::clone(&delivered);
        let handle = registry.start_probe(
            id,
            async move {
                let _ = released.await;
            },
            move |_| *sink.lock().unwrap() = true,
        );
        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        let _ = release.send(());
        handle.wait().await;

        assert!(!*delivered.lock().unwrap());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_stops_further_work() {
        let registry = Arc::new(ProbeRegistry::new());
        let id = DeviceId::new();
        let attempts = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&attempts);
        let handle = registry.start_probe(
            id,
            async move {
                for _ in 0..3 {
                    counter.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(30)).await;
                }
            },
            |_| panic!("cancelled work must not complete"),
        );
        while attempts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(registry.cancel(id));
        handle.wait().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_on_start_follows_superseded_output() {
        let registry = Arc::new(ProbeRegistry::new());
        let id = DeviceId::new();
        let events = Arc::new(Mutex::new(Vec::new()));

        let (start, sink) = (Arc::clone(&events), Arc::clone(&events));
        let first = registry.start_probe_with(
            id,
            move || start.lock().unwrap().push("start 1"),
            async { "done 1" },
            move |v| sink.lock().unwrap().push(v),
        );
        let (start, sink) = (Arc::clone(&events), Arc::clone(&events));
        let second = registry.start_probe_with(
            id,
            move || start.lock().unwrap().push("start 2"),
            async { "done 2" },
            move |v| sink.lock().unwrap().push(v),
        );
        futures::future::join_all([first.wait(), second.wait()]).await;

        assert_eq!(*events.lock().unwrap(), ["start 1", "start 2", "done 2"]);
    }

    #[tokio::test]
    async fn test_devices_are_independent() {
        let registry = Arc::new(ProbeRegistry::new());
        let delivered = Arc::new(Mutex::new(Vec::new()));

        let handles: Vec<_> = (0..4)
            .map(|n| {
                let sink = Arc::clone(&delivered);
                registry.start_probe(DeviceId::new(), async move { n }, move |v| {
                    sink.lock().unwrap().push(v)
                })
            })
            .collect();
        futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;

        let mut delivered = delivered.lock().unwrap().clone();
        delivered.sort();
        assert_eq!(delivered, [0, 1, 2, 3]);
    }
}
