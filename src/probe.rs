use std::future::Future;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use log::{debug, trace};
use tokio::sync::OnceCell;
use tokio_icmp_echo::Pinger;

use crate::constants::{DEFAULT_PROBE_COUNT, DEFAULT_PROBE_INTERVAL};
use crate::device::DeviceStatus;
use crate::error::{Error, OpaqueError, Result};

/// Transport for a single echo request/reply exchange.
///
/// `prepare` is called once per probe before any request; its failure is a setup
/// problem rather than an unreachable host.
pub trait Echo: Send + Sync + 'static {
    fn prepare(&self) -> impl Future<Output = Result<()>> + Send;

    /// Resolves to the round-trip time, or `None` if no reply arrived within `timeout`.
    fn echo(
        &self,
        target: IpAddr,
        seq: u16,
        timeout: Duration,
    ) -> impl Future<Output = std::result::Result<Option<Duration>, OpaqueError>> + Send;
}

/// ICMP echo over `tokio-icmp-echo`, opening its sockets on first use.
pub struct IcmpEcho {
    pinger: OnceCell<Pinger>,
    ident: AtomicU16,
}

impl IcmpEcho {
    pub fn new() -> Self {
        Self {
            pinger: OnceCell::new(),
            // only the low bits of the pid seed the identifier
            ident: AtomicU16::new((std::process::id() & 0xFFFF) as u16),
        }
    }
}

impl Default for IcmpEcho {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IcmpEcho {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IcmpEcho")
            .field("prepared", &self.pinger.initialized())
            .finish()
    }
}

impl Echo for IcmpEcho {
    async fn prepare(&self) -> Result<()> {
        self.pinger
            .get_or_try_init(|| async {
                Pinger::new().await.map_err(|err| {
                    Error::ProbeSetupFailed(format!(
                        "failed to open ICMP socket, reason: {}",
                        err
                    ))
                })
            })
            .await
            .map(|_| ())
    }

    async fn echo(
        &self,
        target: IpAddr,
        seq: u16,
        timeout: Duration,
    ) -> std::result::Result<Option<Duration>, OpaqueError> {
        let pinger = self.pinger.get().ok_or("ICMP socket is not open")?;
        // a fresh identifier per request keeps concurrent probes from matching each other's replies
        let ident = self.ident.fetch_add(1, Ordering::Relaxed);
        pinger
            .ping(target, ident, seq, timeout)
            .await
            .map_err(|err| OpaqueError::from(err.to_string()))
    }
}

/// Aggregated outcome of one probe run.
#[derive(Clone, Eq, PartialEq, Debug, Default)]
pub struct Verdict {
    pub packets_transmitted: u16,
    pub packets_received: u16,
    pub round_trips: Vec<Duration>,
    pub last_error: Option<String>,
}

impl Verdict {
    pub fn status(&self) -> DeviceStatus {
        if self.packets_received > 0 {
            DeviceStatus::Online
        } else {
            DeviceStatus::Offline
        }
    }

    pub fn mean_round_trip(&self) -> Option<Duration> {
        if self.round_trips.is_empty() {
            return None;
        }
        let total: Duration = self.round_trips.iter().sum();
        Some(total / self.round_trips.len() as u32)
    }

    /// Log line describing the verdict.
    pub fn summary(&self) -> String {
        let counts = format!(
            "{}/{} packets received",
            self.packets_received, self.packets_transmitted
        );
        match (self.status(), self.mean_round_trip()) {
            (DeviceStatus::Online, Some(rtt)) => format!(
                "Online: {}, avg RTT: {:.2} ms",
                counts,
                rtt.as_secs_f64() * 1000.0
            ),
            (DeviceStatus::Online, None) => format!("Online: {}", counts),
            _ => match &self.last_error {
                Some(err) => format!("Offline: {}, last error: {}", counts, err),
                None => format!("Offline: {}", counts),
            },
        }
    }
}

/// Runs a bounded sequence of echo requests against a host.
#[derive(Debug)]
pub struct Prober<E> {
    echo: E,
    count: u16,
    interval: Duration,
}

impl<E: Echo> Prober<E> {
    pub fn new(echo: E) -> Self {
        Self {
            echo,
            count: DEFAULT_PROBE_COUNT,
            interval: DEFAULT_PROBE_INTERVAL,
        }
    }

    pub fn with_count(mut self, count: u16) -> Self {
        self.count = count;
        self
    }

    /// Spacing between requests, also used as the per-request timeout.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        // tokio::time::interval panics on a zero period
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Probes `host` and returns the aggregated verdict.
    ///
    /// Dropping the returned future stops any further requests.
    ///
    /// # Errors
    /// Returns [`Error::ProbeSetupFailed`] if the host cannot be resolved or the echo
    /// transport cannot be prepared. An unreachable host is not an error.
    pub async fn probe(&self, host: &str) -> Result<Verdict> {
        let target = resolve_host(host).await?;
        self.echo.prepare().await?;

        let mut verdict = Verdict::default();
        let mut ticker = tokio::time::interval(self.interval);
        for seq in 0..self.count {
            ticker.tick().await;
            verdict.packets_transmitted += 1;
            let reply = tokio::time::timeout(
                self.interval,
                self.echo.echo(target, seq, self.interval),
            )
            .await;
            match reply {
                Ok(Ok(Some(rtt))) => {
                    trace!("reply from {} seq={} rtt={:?}", target, seq, rtt);
                    verdict.packets_received += 1;
                    verdict.round_trips.push(rtt);
                }
                Ok(Ok(None)) | Err(_) => {
                    trace!("request to {} seq={} timed out", target, seq);
                    verdict.last_error = Some("request timed out".into());
                }
                Ok(Err(err)) => {
                    trace!("request to {} seq={} failed: {}", target, seq, err);
                    verdict.last_error = Some(err.to_string());
                }
            }
        }
        debug!(
            "probe of {} finished: {}/{}",
            target, verdict.packets_received, verdict.packets_transmitted
        );
        Ok(verdict)
    }
}

async fn resolve_host(host: &str) -> Result<IpAddr> {
    let host = host.trim();
    if host.is_empty() {
        return Err(Error::ProbeSetupFailed("IP address is empty".into()));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    tokio::net::lookup_host((host, 0))
        .await
        .map_err(|err| {
            Error::ProbeSetupFailed(format!("failed to resolve {}, reason: {}", host, err))
        })?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::ProbeSetupFailed(format!("no address found for {}", host)))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::net::IpAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::{Echo, IcmpEcho, Prober, Verdict};
    use crate::device::DeviceStatus;
    use crate::error::{Error, OpaqueError, Result};

    pub(crate) type Reply = std::result::Result<Option<Duration>, String>;

    /// Replays scripted replies; once the script runs out every request times out.
    #[derive(Default)]
    pub(crate) struct ScriptedEcho {
        pub(crate) replies: Mutex<VecDeque<Reply>>,
        pub(crate) delay: Duration,
        pub(crate) setup_error: Option<String>,
        pub(crate) calls: Arc<AtomicUsize>,
    }

    impl ScriptedEcho {
        pub(crate) fn replying(replies: impl IntoIterator<Item = Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into_iter().collect()),
                ..Default::default()
            }
        }

        pub(crate) fn always_up(delay: Duration) -> Self {
            Self {
                replies: Mutex::new((0..64).map(|_| Ok(Some(delay))).collect()),
                delay,
                ..Default::default()
            }
        }
    }

    impl Echo for ScriptedEcho {
        async fn prepare(&self) -> Result<()> {
            match &self.setup_error {
                Some(reason) => Err(Error::ProbeSetupFailed(reason.clone())),
                None => Ok(()),
            }
        }

        async fn echo(
            &self,
            _target: IpAddr,
            _seq: u16,
            _timeout: Duration,
        ) -> std::result::Result<Option<Duration>, OpaqueError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let reply = self.replies.lock().unwrap().pop_front();
            match reply {
                Some(Ok(rtt)) => Ok(rtt),
                Some(Err(err)) => Err(err.into()),
                None => Ok(None),
            }
        }
    }

    fn prober(echo: ScriptedEcho) -> Prober<ScriptedEcho> {
        Prober::new(echo).with_interval(Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_partial_replies_are_online() {
        let echo = ScriptedEcho::replying([
            Ok(Some(Duration::from_millis(10))),
            Ok(None),
            Ok(Some(Duration::from_millis(14))),
        ]);
        let verdict = prober(echo).probe("127.0.0.1").await.unwrap();

        assert_eq!(verdict.packets_transmitted, 3);
        assert_eq!(verdict.packets_received, 2);
        assert_eq!(verdict.status(), DeviceStatus::Online);
        assert_eq!(verdict.mean_round_trip(), Some(Duration::from_millis(12)));
        assert!(verdict.summary().contains("avg RTT: 12.00 ms"));
        assert!(verdict.summary().contains("2/3 packets received"));
    }

    #[tokio::test]
    async fn test_no_replies_keep_last_error() {
        let echo = ScriptedEcho::replying([
            Err("host unreachable".into()),
            Ok(None),
            Err("network is down".into()),
        ]);
        let verdict = prober(echo).probe("10.0.0.1").await.unwrap();

        assert_eq!(verdict.packets_transmitted, 3);
        assert_eq!(verdict.packets_received, 0);
        assert_eq!(verdict.status(), DeviceStatus::Offline);
        assert_eq!(verdict.mean_round_trip(), None);
        assert_eq!(verdict.last_error.as_deref(), Some("network is down"));
        assert_eq!(
            verdict.summary(),
            "Offline: 0/3 packets received, last error: network is down"
        );
    }

    #[tokio::test]
    async fn test_count_is_configurable() {
        let echo = ScriptedEcho::always_up(Duration::ZERO);
        let verdict = prober(echo).with_count(5).probe("::1").await.unwrap();
        assert_eq!(verdict.packets_transmitted, 5);
        assert_eq!(verdict.packets_received, 5);
    }

    #[tokio::test]
    async fn test_slow_reply_counts_as_timeout() {
        let echo = ScriptedEcho {
            delay: Duration::from_millis(200),
            ..ScriptedEcho::replying([Ok(Some(Duration::from_millis(1)))])
        };
        let verdict = prober(echo).with_count(1).probe("127.0.0.1").await.unwrap();
        assert_eq!(verdict.packets_received, 0);
        assert_eq!(verdict.last_error.as_deref(), Some("request timed out"));
    }

    #[tokio::test]
    async fn test_setup_failures() {
        let echo = ScriptedEcho {
            setup_error: Some("operation not permitted".into()),
            ..Default::default()
        };
        assert_eq!(
            prober(echo).probe("127.0.0.1").await,
            Err(Error::ProbeSetupFailed("operation not permitted".into()))
        );

        let result = prober(ScriptedEcho::default()).probe("").await;
        assert!(matches!(result, Err(Error::ProbeSetupFailed(_))));
    }

    #[test]
    fn test_status_follows_received_count() {
        let mut verdict = Verdict {
            packets_transmitted: 0,
            packets_received: 1,
            ..Default::default()
        };
        assert_eq!(verdict.status(), DeviceStatus::Online);
        assert_eq!(verdict.summary(), "Online: 1/0 packets received");
        verdict.packets_received = 0;
        verdict.packets_transmitted = 3;
        assert_eq!(verdict.status(), DeviceStatus::Offline);
        assert_eq!(verdict.summary(), "Offline: 0/3 packets received");
    }

    #[test]
    fn test_icmp_echo_opens_lazily() {
        let echo = IcmpEcho::new();
        assert_eq!(format!("{:?}", echo), "IcmpEcho { prepared: false }");
        assert_eq!(
            echo.ident.load(Ordering::Relaxed),
            (std::process::id() & 0xFFFF) as u16
        );
    }

    #[tokio::test]
    async fn test_dropped_run_sends_no_more_requests() {
        let echo = ScriptedEcho::always_up(Duration::from_millis(1));
        let calls = Arc::clone(&echo.calls);
        let prober = prober(echo);

        let run = prober.probe("127.0.0.1");
        let _ = tokio::time::timeout(Duration::from_millis(10), run).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
