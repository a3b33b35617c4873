use std::fmt;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{error::TryRecvError, UnboundedReceiver};
use uuid::Uuid;

use crate::constants::DEFAULT_WAKE_PORT;

/// Stable identity of a registered device, independent of its mutable fields.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct DeviceId(Uuid);

impl DeviceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for DeviceId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

#[derive(Clone, Eq, PartialEq, Debug)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            message: message.into(),
        }
    }
}

/// Immutable view of a device handed to the coordinator when an operation starts.
///
/// Addresses and port are kept as entered; they are validated by the operation that
/// uses them so that a bad field only fails that operation.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct DeviceSnapshot {
    pub id: DeviceId,
    pub name: String,
    pub mac: String,
    pub broadcast: String,
    pub port: String,
    pub ip: String,
}

impl DeviceSnapshot {
    /// Creates a snapshot targeting the default wake port.
    pub fn new(id: DeviceId, name: &str, mac: &str, broadcast: &str, ip: &str) -> Self {
        Self {
            id,
            name: name.into(),
            mac: mac.into(),
            broadcast: broadcast.into(),
            port: DEFAULT_WAKE_PORT.to_string(),
            ip: ip.into(),
        }
    }

    pub fn with_port(mut self, port: &str) -> Self {
        self.port = port.into();
        self
    }
}

/// A delta produced by the coordinator, addressed by device identity.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Update {
    pub device_id: DeviceId,
    pub status: Option<DeviceStatus>,
    pub entry: LogEntry,
}

impl Update {
    pub fn log(device_id: DeviceId, message: impl Into<String>) -> Self {
        Self {
            device_id,
            status: None,
            entry: LogEntry::new(message),
        }
    }

    pub fn status(device_id: DeviceId, status: DeviceStatus, message: impl Into<String>) -> Self {
        Self {
            device_id,
            status: Some(status),
            entry: LogEntry::new(message),
        }
    }
}

pub type UpdateReceiver = UnboundedReceiver<Update>;

#[derive(Clone, Debug)]
pub struct Device {
    snapshot: DeviceSnapshot,
    pub status: DeviceStatus,
    pub log: Vec<LogEntry>,
}

impl Device {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            snapshot,
            status: DeviceStatus::Unknown,
            log: Vec::new(),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.snapshot.id
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.snapshot.clone()
    }

    /// Log entries in presentation order, most recent first.
    pub fn log_newest_first(&self) -> Vec<&LogEntry> {
        let mut entries: Vec<_> = self.log.iter().collect();
        // stable, so entries sharing a timestamp keep reverse creation order
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        entries
    }

    fn apply(&mut self, update: Update) {
        if let Some(status) = update.status {
            self.status = status;
        }
        self.log.push(update.entry);
    }
}

/// An in-memory device collection that applies coordinator updates by identity.
///
/// Updates must be applied from a single consumer in the order they are received.
#[derive(Clone, Debug, Default)]
pub struct DeviceBook {
    devices: Vec<Device>,
}

impl DeviceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, snapshot: DeviceSnapshot) -> DeviceId {
        let id = snapshot.id;
        self.devices.push(Device::new(snapshot));
        id
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Device> {
        let index = self.devices.iter().position(|device| device.id() == id)?;
        Some(self.devices.remove(index))
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|device| device.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Applies one update; returns `false` without changes if the device is gone.
    pub fn apply(&mut self, update: Update) -> bool {
        match self
            .devices
            .iter_mut()
            .find(|device| device.id() == update.device_id)
        {
            Some(device) => {
                device.apply(update);
                true
            }
            None => {
                log::debug!("dropping update for removed device {}", update.device_id);
                false
            }
        }
    }

    /// Drains every update already queued on `updates`, returning how many were applied.
    pub fn apply_pending(&mut self, updates: &mut UpdateReceiver) -> usize {
        let mut applied = 0;
        loop {
            match updates.try_recv() {
                Ok(update) => {
                    if self.apply(update) {
                        applied += 1;
                    }
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return applied,
            }
        }
    }
}
