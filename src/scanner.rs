use crate::error::{IdentifyIssue, ScanError};
use crate::inspect::{self, Identification, ProcessInspector};
use crate::netdetect;
use crate::transport::{TcpTransport, Transport};
use crate::types::{ProbeError, ProbeResult, ScanEntry, ScanReport, ScanTarget};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::{self, JoinSet};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use ::time::{format_description::well_known, OffsetDateTime};

pub const DEFAULT_CONCURRENCY: usize = 256;
pub const MAX_CONCURRENCY: usize = 5_000;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(2);
pub const MAX_BANNER_BYTES: usize = 4096;

/// Tunables for one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanConfig {
    /// Max simultaneous connect attempts, clamped to `1..=MAX_CONCURRENCY`.
    pub concurrency: usize,
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,
    /// Longest banner line accepted, newline included.
    pub max_banner_bytes: usize,
    /// Attribute open ports to processes when an inspector is attached.
    pub identify: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: CONNECT_TIMEOUT,
            banner_timeout: BANNER_TIMEOUT,
            max_banner_bytes: MAX_BANNER_BYTES,
            identify: true,
        }
    }
}

impl ScanConfig {
    pub fn effective_concurrency(&self) -> usize {
        self.concurrency.clamp(1, MAX_CONCURRENCY)
    }

    /// Connect deadline, clamped to `1ms..=CONNECT_TIMEOUT`.
    pub fn effective_connect_timeout(&self) -> Duration {
        self.connect_timeout.clamp(Duration::from_millis(1), CONNECT_TIMEOUT)
    }

    /// Banner deadline, clamped to `1ms..=BANNER_TIMEOUT`.
    pub fn effective_banner_timeout(&self) -> Duration {
        self.banner_timeout.clamp(Duration::from_millis(1), BANNER_TIMEOUT)
    }
}

/// Live counters for a running scan, readable from other tasks.
#[derive(Clone, Debug)]
pub struct SharedProgress {
    pub total: Arc<AtomicU64>,
    pub scanned_done: Arc<AtomicU64>,
    pub open_count: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self {
            total: Arc::new(AtomicU64::new(0)),
            scanned_done: Arc::new(AtomicU64::new(0)),
            open_count: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Default for SharedProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded connect-scanner over one host.
///
/// - Limits concurrent socket attempts using a `Semaphore`.
/// - Uses `tokio::time::timeout` for both the connect and the banner read.
/// - Joins every dispatched probe before assembling the report in port order.
pub struct Scanner<T = TcpTransport> {
    transport: Arc<T>,
    inspector: Option<Arc<dyn ProcessInspector>>,
    config: ScanConfig,
}

impl Scanner<TcpTransport> {
    pub fn new(config: ScanConfig) -> Self {
        Self::with_transport(TcpTransport, config)
    }
}

impl<T: Transport> Scanner<T> {
    pub fn with_transport(transport: T, config: ScanConfig) -> Self {
        Self { transport: Arc::new(transport), inspector: None, config }
    }

    /// Attach a process inspector. Without one, open ports carry no attribution.
    pub fn with_inspector(mut self, inspector: Arc<dyn ProcessInspector>) -> Self {
        self.inspector = Some(inspector);
        self
    }

    pub async fn scan(&self, target: &ScanTarget) -> ScanReport {
        self.scan_internal(target, None, None).await
    }

    /// Variant that accepts a `CancellationToken`; once cancelled no further probes are dispatched.
    pub async fn scan_with_cancel(&self, target: &ScanTarget, cancel: CancellationToken) -> ScanReport {
        self.scan_internal(target, Some(cancel), None).await
    }

    pub async fn scan_with_shared(
        &self,
        target: &ScanTarget,
        cancel: CancellationToken,
        shared: SharedProgress,
    ) -> ScanReport {
        self.scan_internal(target, Some(cancel), Some(shared)).await
    }

    /// Validate raw bounds, then scan. Nothing is dialed if validation fails.
    pub async fn scan_bounds(&self, host: &str, start: i64, end: i64) -> Result<ScanReport, ScanError> {
        let target = ScanTarget::from_bounds(host, start, end)?;
        Ok(self.scan(&target).await)
    }

    async fn scan_internal(
        &self,
        target: &ScanTarget,
        cancel_opt: Option<CancellationToken>,
        shared_opt: Option<SharedProgress>,
    ) -> ScanReport {
        let started_at = now_iso_like();
        let range = target.range();
        let shared = shared_opt.unwrap_or_default();
        shared.total.store(range.len() as u64, Ordering::Relaxed);
        let cancel = cancel_opt.unwrap_or_default();

        let limit = self.config.effective_concurrency();
        let sem = Arc::new(Semaphore::new(limit));
        let mut set = JoinSet::new();
        let host: Arc<str> = Arc::from(target.host());
        let inspector = match (&self.inspector, self.config.identify) {
            (Some(insp), true) if netdetect::host_is_local(&host).await => Some(insp.clone()),
            (Some(_), true) => {
                debug!(host = %host, "host is not local; process attribution disabled");
                None
            }
            _ => None,
        };

        info!(host = %host, range = %range, concurrency = limit, "scan started");

        let mut last_dispatched: Option<u16> = None;
        for port in range.iter() {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = sem.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let transport = self.transport.clone();
            let host = host.clone();
            let inspector = inspector.clone();
            let shared = shared.clone();
            let config = self.config;

            set.spawn(async move {
                let _permit = permit; // keep permit until task completes

                let probe = probe_port(transport.as_ref(), &host, port, &config).await;
                let id = match (&inspector, probe.open) {
                    (Some(insp), true) => identify_port(insp.clone(), port).await,
                    _ => Identification::default(),
                };

                shared.scanned_done.fetch_add(1, Ordering::Relaxed);
                if probe.open {
                    shared.open_count.fetch_add(1, Ordering::Relaxed);
                }
                ScanEntry { probe, process: id.process, lookup_issue: id.issue }
            });
            last_dispatched = Some(port);
        }

        let mut by_port = BTreeMap::new();
        while let Some(res) = set.join_next().await {
            match res {
                Ok(entry) => {
                    by_port.insert(entry.probe.port, entry);
                }
                Err(e) => warn!(error = %e, "probe task failed"),
            }
        }

        let cancelled = last_dispatched != Some(range.end());
        let entries: Vec<ScanEntry> = range
            .iter()
            .map(|port| {
                by_port.remove(&port).unwrap_or_else(|| {
                    let cause = match last_dispatched {
                        Some(last) if port <= last => ProbeError::Other("probe task aborted".into()),
                        _ => ProbeError::NotProbed,
                    };
                    ScanEntry { probe: ProbeResult::closed(port, cause), process: None, lookup_issue: None }
                })
            })
            .collect();
        let open_count = entries.iter().filter(|e| e.probe.open).count() as u64;

        info!(host = %host, open = open_count, cancelled, "scan finished");

        ScanReport {
            host: target.host().to_string(),
            start_port: range.start(),
            end_port: range.end(),
            started_at,
            finished_at: now_iso_like(),
            cancelled,
            open_count,
            entries,
        }
    }
}

/// One connect attempt with an optional banner read. The stream is dropped before returning.
pub async fn probe_port<T: Transport>(
    transport: &T,
    host: &str,
    port: u16,
    config: &ScanConfig,
) -> ProbeResult {
    let start = Instant::now();
    match time::timeout(config.effective_connect_timeout(), transport.connect(host, port)).await {
        Ok(Ok(mut stream)) => {
            let latency_ms = start.elapsed().as_millis() as u64;
            let banner = read_banner(&mut stream, config.effective_banner_timeout(), config.max_banner_bytes).await;
            drop(stream);
            debug!(port, latency_ms, banner = banner.is_some(), "port open");
            ProbeResult::open(port, latency_ms, banner)
        }
        Ok(Err(e)) => {
            trace!(port, error = %e, "connect failed");
            ProbeResult::closed(port, e.into())
        }
        Err(_) => {
            trace!(port, "connect timed out");
            ProbeResult::closed(port, ProbeError::TimedOut)
        }
    }
}

/// Read one `\n`-terminated line within `timeout`, newline included, lossy UTF-8.
///
/// Timeout, EOF before a newline, or a line longer than `max_bytes` yields `None`.
pub async fn read_banner<S: AsyncRead + Unpin>(stream: &mut S, timeout: Duration, max_bytes: usize) -> Option<String> {
    let mut reader = BufReader::new(stream.take(max_bytes as u64));
    let mut line = Vec::new();
    match time::timeout(timeout, reader.read_until(b'\n', &mut line)).await {
        Ok(Ok(n)) if n > 0 && line.last() == Some(&b'\n') => Some(String::from_utf8_lossy(&line).into_owned()),
        _ => None,
    }
}

async fn identify_port(inspector: Arc<dyn ProcessInspector>, port: u16) -> Identification {
    match task::spawn_blocking(move || inspect::identify(inspector.as_ref(), port)).await {
        Ok(id) => id,
        Err(e) => {
            warn!(port, error = %e, "process lookup task failed");
            Identification {
                process: None,
                issue: Some(IdentifyIssue::ProcessLookupUnavailable(e.to_string())),
            }
        }
    }
}

fn now_iso_like() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
