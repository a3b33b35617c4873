use std::time::Duration;

pub(crate) const MAC_ADDR_LEN: usize = 6;
pub(crate) const SYNC_STREAM_LEN: usize = 6;
pub(crate) const MAC_REPETITIONS: usize = 16;

/// Length of a Wake-on-LAN magic packet: the sync stream followed by sixteen copies of the MAC.
pub const MAGIC_PACKET_LEN: usize = SYNC_STREAM_LEN + MAC_ADDR_LEN * MAC_REPETITIONS;

/// UDP "discard" port conventionally used for magic packets.
pub const DEFAULT_WAKE_PORT: u16 = 9;

pub(crate) const DEFAULT_PROBE_COUNT: u16 = 3;
pub(crate) const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(800);
pub(crate) const DEFAULT_REPROBE_DELAY: Duration = Duration::from_secs(5);
