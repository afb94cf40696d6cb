//! Attribution of listening ports to host processes.
//!
//! The socket-table and process-table queries sit behind [`ProcessInspector`] so the
//! scanner stays portable and can be driven by a fake in tests. Two host adapters
//! are provided: a `/proc` reader and a `netstat` invoker.
mod netstat;
mod procfs;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IdentifyIssue, InspectError};
use crate::types::ProcessInfo;

pub use netstat::{parse_listener_pid, NetstatInspector};
pub use procfs::{parse_listening_inodes, parse_status, ProcFsInspector};

/// Host capability to map a listening port to a process and describe it.
pub trait ProcessInspector: Send + Sync {
    /// Pid owning a socket in the listening state on `port`, if any.
    ///
    /// `Err` means the socket table itself could not be queried.
    fn listening_pid(&self, port: u16) -> Result<Option<u32>, InspectError>;

    /// Describe `pid`. Missing fields are left `None`; `None` means the process
    /// could not be inspected at all.
    fn describe_process(&self, pid: u32) -> Option<ProcessInfo>;
}

/// Best-effort attribution of one open port.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Identification {
    pub process: Option<ProcessInfo>,
    pub issue: Option<IdentifyIssue>,
}

/// Resolve the process listening on `port`. Never fails; problems are reported in `issue`.
pub fn identify(inspector: &dyn ProcessInspector, port: u16) -> Identification {
    let pid = match inspector.listening_pid(port) {
        Ok(Some(pid)) => pid,
        Ok(None) => {
            debug!(port, "no listening process found");
            return Identification::default();
        }
        Err(e) => {
            warn!(port, error = %e, "socket table query failed");
            return Identification {
                process: None,
                issue: Some(IdentifyIssue::ProcessLookupUnavailable(e.to_string())),
            };
        }
    };

    match inspector.describe_process(pid) {
        Some(mut info) => {
            info.pid = pid;
            Identification { process: Some(info), issue: None }
        }
        None => {
            debug!(port, pid, "process vanished or unreadable");
            Identification {
                process: Some(ProcessInfo::with_pid(pid)),
                issue: Some(IdentifyIssue::ProcessDescribeFailure { pid }),
            }
        }
    }
}

/// Pick the inspector for this host: `/proc` when its socket table is readable,
/// otherwise `netstat`.
pub fn default_inspector() -> Arc<dyn ProcessInspector> {
    if Path::new("/proc/net/tcp").is_file() {
        Arc::new(ProcFsInspector::new())
    } else {
        Arc::new(NetstatInspector::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeInspector {
        pids: HashMap<u16, u32>,
        procs: HashMap<u32, ProcessInfo>,
        broken: bool,
    }

    impl ProcessInspector for FakeInspector {
        fn listening_pid(&self, port: u16) -> Result<Option<u32>, InspectError> {
            if self.broken {
                return Err(InspectError::Unavailable("no socket table".into()));
            }
            Ok(self.pids.get(&port).copied())
        }

        fn describe_process(&self, pid: u32) -> Option<ProcessInfo> {
            self.procs.get(&pid).cloned()
        }
    }

    fn fake() -> FakeInspector {
        let info = ProcessInfo {
            pid: 42,
            executable_path: Some("/usr/sbin/sshd".into()),
            command_line: Some("sshd -D".into()),
            process_name: Some("sshd".into()),
            parent_pid: Some(1),
            state: Some("S (sleeping)".into()),
            thread_count: Some(1),
        };
        FakeInspector {
            pids: HashMap::from([(22, 42), (80, 99)]),
            procs: HashMap::from([(42, info)]),
            broken: false,
        }
    }

    #[test]
    fn identifies_known_process() {
        let id = identify(&fake(), 22);
        assert_eq!(id.issue, None);
        let p = id.process.unwrap();
        assert_eq!(p.pid, 42);
        assert_eq!(p.process_name.as_deref(), Some("sshd"));
        assert_eq!(p.parent_pid, Some(1));
    }

    #[test]
    fn no_listener_is_empty_without_issue() {
        assert_eq!(identify(&fake(), 443), Identification::default());
    }

    #[test]
    fn vanished_process_keeps_pid() {
        let id = identify(&fake(), 80);
        assert_eq!(id.process, Some(ProcessInfo::with_pid(99)));
        assert_eq!(id.issue, Some(IdentifyIssue::ProcessDescribeFailure { pid: 99 }));
    }

    #[test]
    fn unavailable_table_is_reported_not_raised() {
        let mut f = fake();
        f.broken = true;
        let id = identify(&f, 22);
        assert!(id.process.is_none());
        assert!(matches!(id.issue, Some(IdentifyIssue::ProcessLookupUnavailable(_))));
    }
}
