use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::ProcessInspector;
use crate::error::InspectError;
use crate::types::ProcessInfo;

const TCP_LISTEN: &str = "0A";
const SOCKET_TABLES: &[&str] = &["net/tcp", "net/tcp6"];

/// Linux `/proc` reader.
///
/// Listening sockets come from `net/tcp{,6}`; the owning pid is found by matching
/// the socket inode against the `fd` links of every process.
#[derive(Debug, Clone)]
pub struct ProcFsInspector {
    root: PathBuf,
}

impl ProcFsInspector {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from an alternate proc tree (a container mount or a test fixture).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn listening_inodes(&self, port: u16) -> Result<HashSet<u64>, InspectError> {
        let mut inodes = HashSet::new();
        let mut readable = 0usize;
        let mut last_err = None;
        for table in SOCKET_TABLES {
            match fs::read_to_string(self.root.join(table)) {
                Ok(content) => {
                    readable += 1;
                    inodes.extend(parse_listening_inodes(&content, port));
                }
                Err(e) => last_err = Some(e),
            }
        }
        if readable == 0 {
            let reason = last_err.map(|e| e.to_string()).unwrap_or_default();
            return Err(InspectError::Unavailable(format!(
                "cannot read socket tables under {}: {reason}",
                self.root.display()
            )));
        }
        Ok(inodes)
    }

    fn pid_owning(&self, inodes: &HashSet<u64>) -> Result<Option<u32>, InspectError> {
        let mut pids: Vec<u32> = fs::read_dir(&self.root)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
            .collect();
        pids.sort_unstable();

        for pid in pids {
            let fd_dir = self.root.join(pid.to_string()).join("fd");
            // Other users' fd directories are unreadable without privileges.
            let Ok(entries) = fs::read_dir(&fd_dir) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let Ok(target) = fs::read_link(entry.path()) else {
                    continue;
                };
                if let Some(inode) = socket_inode(&target.to_string_lossy()) {
                    if inodes.contains(&inode) {
                        return Ok(Some(pid));
                    }
                }
            }
        }
        Ok(None)
    }
}

impl Default for ProcFsInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for ProcFsInspector {
    fn listening_pid(&self, port: u16) -> Result<Option<u32>, InspectError> {
        let inodes = self.listening_inodes(port)?;
        if inodes.is_empty() {
            return Ok(None);
        }
        debug!(port, ?inodes, "listening socket inodes");
        self.pid_owning(&inodes)
    }

    fn describe_process(&self, pid: u32) -> Option<ProcessInfo> {
        let dir = self.root.join(pid.to_string());
        if !dir.is_dir() {
            return None;
        }

        let mut info = ProcessInfo::with_pid(pid);
        info.executable_path = fs::read_link(dir.join("exe"))
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        info.command_line = fs::read(dir.join("cmdline"))
            .ok()
            .and_then(|raw| join_cmdline(&raw));

        if let Ok(status) = fs::read_to_string(dir.join("status")) {
            let s = parse_status(&status);
            info.process_name = s.process_name;
            info.parent_pid = s.parent_pid;
            info.state = s.state;
            info.thread_count = s.thread_count;
        }
        if info.process_name.is_none() {
            info.process_name = info
                .executable_path
                .as_deref()
                .and_then(|p| Path::new(p).file_name())
                .map(|n| n.to_string_lossy().into_owned());
        }
        Some(info)
    }
}

/// Inodes of `LISTEN` rows bound to `port` in a `/proc/net/tcp`-format table.
///
/// Columns follow the kernel layout: `sl local_address rem_address st ... uid timeout inode`.
pub fn parse_listening_inodes(content: &str, port: u16) -> Vec<u64> {
    content
        .lines()
        .skip(1)
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 10 || fields[3] != TCP_LISTEN {
                return None;
            }
            let (_, hex_port) = fields[1].rsplit_once(':')?;
            if u16::from_str_radix(hex_port, 16).ok()? != port {
                return None;
            }
            fields[9].parse::<u64>().ok().filter(|&inode| inode != 0)
        })
        .collect()
}

/// Fields of interest from `/proc/<pid>/status`, as a pid-less [`ProcessInfo`].
pub fn parse_status(content: &str) -> ProcessInfo {
    let mut info = ProcessInfo::default();
    for line in content.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key {
            "Name" => info.process_name = Some(value.to_string()),
            "PPid" => info.parent_pid = value.parse().ok(),
            "State" => info.state = Some(value.to_string()),
            "Threads" => info.thread_count = value.parse().ok(),
            _ => {}
        }
    }
    info
}

fn socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}

fn join_cmdline(raw: &[u8]) -> Option<String> {
    let joined = raw
        .split(|&b| b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ");
    (!joined.is_empty()).then_some(joined)
}
