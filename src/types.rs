use serde::{Deserialize, Serialize};

use crate::error::{IdentifyIssue, ScanError};
use crate::ports::PortRange;

/// Host and port range of a single scan. Validated on construction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(try_from = "RawTarget")]
pub struct ScanTarget {
    host: String,
    range: PortRange,
}

#[derive(Deserialize)]
struct RawTarget {
    host: String,
    range: PortRange,
}

impl TryFrom<RawTarget> for ScanTarget {
    type Error = ScanError;

    fn try_from(raw: RawTarget) -> Result<Self, Self::Error> {
        ScanTarget::new(raw.host, raw.range)
    }
}

impl ScanTarget {
    pub fn new(host: impl Into<String>, range: PortRange) -> Result<Self, ScanError> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ScanError::InvalidTarget("host is empty".into()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(ScanError::InvalidTarget(format!("host contains whitespace: {trimmed:?}")));
        }
        Ok(Self { host: trimmed.to_string(), range })
    }

    /// Validate host and raw bounds together.
    pub fn from_bounds(host: impl Into<String>, start: i64, end: i64) -> Result<Self, ScanError> {
        let range = PortRange::new(start, end)?;
        Self::new(host, range)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn range(&self) -> PortRange {
        self.range
    }
}

/// Why a port was not reported open. Kept for diagnostics only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum ProbeError {
    Refused,
    TimedOut,
    Unreachable,
    Other(String),
    /// The scan was cancelled before this port was dispatched.
    NotProbed,
}

impl From<std::io::Error> for ProbeError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => ProbeError::Refused,
            ErrorKind::TimedOut => ProbeError::TimedOut,
            ErrorKind::HostUnreachable | ErrorKind::NetworkUnreachable | ErrorKind::AddrNotAvailable => {
                ProbeError::Unreachable
            }
            _ => ProbeError::Other(e.to_string()),
        }
    }
}

/// Outcome of one connect attempt.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub port: u16,
    pub open: bool,
    pub banner: Option<String>,
    pub error: Option<ProbeError>,
    pub latency_ms: Option<u64>,
}

impl ProbeResult {
    pub fn open(port: u16, latency_ms: u64, banner: Option<String>) -> Self {
        Self { port, open: true, banner, error: None, latency_ms: Some(latency_ms) }
    }

    pub fn closed(port: u16, error: ProbeError) -> Self {
        Self { port, open: false, banner: None, error: Some(error), latency_ms: None }
    }
}

/// Details of the process owning a listening socket. Only `pid` is guaranteed.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub executable_path: Option<String>,
    pub command_line: Option<String>,
    pub process_name: Option<String>,
    pub parent_pid: Option<u32>,
    pub state: Option<String>,
    pub thread_count: Option<u32>,
}

impl ProcessInfo {
    pub fn with_pid(pid: u32) -> Self {
        Self { pid, ..Self::default() }
    }
}

/// One report row: the probe outcome and, for open ports, its process attribution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    pub probe: ProbeResult,
    pub process: Option<ProcessInfo>,
    pub lookup_issue: Option<IdentifyIssue>,
}

/// Ordered results of a scan: one entry per port of the range, ascending.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ScanReport {
    pub host: String,
    pub start_port: u16,
    pub end_port: u16,
    pub started_at: String,
    pub finished_at: String,
    pub cancelled: bool,
    pub open_count: u64,
    pub entries: Vec<ScanEntry>,
}

impl ScanReport {
    pub fn open_entries(&self) -> impl Iterator<Item = &ScanEntry> {
        self.entries.iter().filter(|e| e.probe.open)
    }

    pub fn entry(&self, port: u16) -> Option<&ScanEntry> {
        let idx = port.checked_sub(self.start_port)? as usize;
        self.entries.get(idx).filter(|e| e.probe.port == port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_requires_host() {
        assert!(ScanTarget::from_bounds("  ", 0, 10).is_err());
        let t = ScanTarget::from_bounds(" localhost ", 0, 10).unwrap();
        assert_eq!(t.host(), "localhost");
        assert_eq!(t.range(), PortRange::new(0, 10).unwrap());
    }

    #[test]
    fn deserialize_validates_host() {
        let ok: ScanTarget =
            serde_json::from_str(r#"{"host":"127.0.0.1","range":{"start":1,"end":2}}"#).unwrap();
        assert_eq!(ok.host(), "127.0.0.1");
        assert!(serde_json::from_str::<ScanTarget>(r#"{"host":"","range":{"start":1,"end":2}}"#).is_err());
        assert!(serde_json::from_str::<ScanTarget>(r#"{"host":"a b","range":{"start":1,"end":2}}"#).is_err());
    }
}
