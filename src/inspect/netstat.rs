use std::io::ErrorKind;
use std::process::Command;

use super::procfs::ProcFsInspector;
use super::ProcessInspector;
use crate::error::InspectError;
use crate::types::ProcessInfo;

/// Socket-table lookup through an external listing tool (`netstat -tlnp` by default).
///
/// Process details are read through `/proc` where it exists.
#[derive(Debug, Clone)]
pub struct NetstatInspector {
    program: String,
    args: Vec<String>,
    describer: ProcFsInspector,
}

impl NetstatInspector {
    pub fn new() -> Self {
        Self::with_command("netstat", ["-tlnp"])
    }

    /// Use another lister with compatible output, e.g. `ss -ltnp`.
    pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            describer: ProcFsInspector::new(),
        }
    }

    fn run(&self) -> Result<String, InspectError> {
        let output = Command::new(&self.program).args(&self.args).output().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                InspectError::Unavailable(format!("{} not found", self.program))
            } else {
                InspectError::Io(e)
            }
        })?;
        if !output.status.success() && output.stdout.is_empty() {
            return Err(InspectError::CommandFailed {
                command: self.program.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl Default for NetstatInspector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessInspector for NetstatInspector {
    fn listening_pid(&self, port: u16) -> Result<Option<u32>, InspectError> {
        Ok(parse_listener_pid(&self.run()?, port))
    }

    fn describe_process(&self, pid: u32) -> Option<ProcessInfo> {
        self.describer.describe_process(pid)
    }
}

/// Find the pid listening on `port` in `netstat -tlnp` or `ss -ltnp` output.
///
/// Rows are matched by content rather than column position: a `LISTEN` token, a
/// local address ending in `:<port>`, and a `<pid>/<name>` or `pid=<pid>` token.
/// Rows without a visible pid (another user's socket) are skipped.
pub fn parse_listener_pid(output: &str, port: u16) -> Option<u32> {
    let suffix = format!(":{port}");
    output.lines().find_map(|line| {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if !tokens.iter().any(|t| t.eq_ignore_ascii_case("LISTEN")) {
            return None;
        }
        // The first address-like token is the local one.
        let local = tokens.iter().find(|t| t.contains(':') && !t.starts_with("users:"))?;
        if !local.ends_with(&suffix) {
            return None;
        }
        tokens.iter().find_map(|t| pid_token(t))
    })
}

fn pid_token(token: &str) -> Option<u32> {
    if let Some(idx) = token.find("pid=") {
        let digits: String = token[idx + 4..].chars().take_while(char::is_ascii_digit).collect();
        return digits.parse().ok();
    }
    let (pid, name) = token.split_once('/')?;
    if name.is_empty() || pid.is_empty() || !pid.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    pid.parse().ok()
}
