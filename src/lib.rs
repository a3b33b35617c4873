//! Wake-on-LAN and reachability checks for a collection of registered devices.
//!
//! A [`ReachabilityCoordinator`] sends magic packets ([`MagicPacket`], [`WakeSender`]),
//! probes devices over ICMP echo ([`Prober`]) with at most one probe in flight per device
//! ([`ProbeRegistry`]), and reports every status change and log line as an [`Update`]
//! keyed by [`DeviceId`]. The caller applies updates to its own storage from a single
//! consumer, for instance through a [`DeviceBook`].
//!
//! ## Example
//! Following example wakes a device and prints the updates produced, including the status
//! check chained after a successful send. ICMP probing needs raw or datagram ICMP sockets,
//! so run it with sufficient privileges.
//! ```rust,no_run
#![doc = include_str!("../demos/wake.rs")]
//! ```

pub mod coordinator;
pub mod device;
pub mod error;
pub mod magic;
pub mod probe;
pub mod registry;
pub mod wake;

pub(crate) mod constants;

pub use constants::{DEFAULT_WAKE_PORT, MAGIC_PACKET_LEN};
pub use coordinator::{CoordinatorConfig, CoordinatorConfigBuilder, ReachabilityCoordinator};
pub use device::{
    Device, DeviceBook, DeviceId, DeviceSnapshot, DeviceStatus, LogEntry, Update, UpdateReceiver,
};
pub use error::{Error, OpaqueError, Result};
pub use magic::{parse_mac, MagicPacket};
pub use probe::{Echo, IcmpEcho, Prober, Verdict};
pub use registry::{ProbeHandle, ProbeRegistry};
pub use wake::{parse_port, WakeSender};
