//! Reachability probing via the system `ping` binary.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait HostProber: Send + Sync {
    /// `true` when `address` answered.  Never fails: anything that prevents
    /// the probe from running counts as unreachable.
    async fn is_up(&self, address: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct PingProber {
    program: String,
    count: u32,
}

impl PingProber {
    pub fn new(count: u32) -> Self {
        Self {
            program: "ping".to_string(),
            count: count.max(1),
        }
    }

    /// Overrides the executable, e.g. an absolute path to `ping`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// One-second reply timeout; Windows measures it in milliseconds.
    fn args(&self, address: &str) -> Vec<String> {
        let (count_flag, timeout_flag, timeout) = if cfg!(windows) {
            ("-n", "-w", "1000")
        } else {
            ("-c", "-W", "1")
        };
        vec![
            count_flag.to_string(),
            self.count.to_string(),
            timeout_flag.to_string(),
            timeout.to_string(),
            address.to_string(),
        ]
    }
}

impl Default for PingProber {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl HostProber for PingProber {
    async fn is_up(&self, address: &str) -> bool {
        let status = Command::new(&self.program)
            .args(self.args(address))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await;
        match status {
            Ok(status) => {
                debug!(address, code = ?status.code(), "ping finished");
                status.success()
            }
            Err(err) => {
                debug!(address, program = %self.program, %err, "ping could not be started");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_single_probe_arguments() {
        let args = PingProber::default().args("192.168.1.20");
        if cfg!(windows) {
            assert_eq!(args, ["-n", "1", "-w", "1000", "192.168.1.20"]);
        } else {
            assert_eq!(args, ["-c", "1", "-W", "1", "192.168.1.20"]);
        }
    }

    #[test]
    fn count_is_at_least_one() {
        let args = PingProber::new(0).args("pc");
        assert_eq!(args[1], "1");
        assert_eq!(PingProber::new(3).args("pc")[1], "3");
    }

    #[tokio::test]
    async fn missing_binary_counts_as_unreachable() {
        let prober = PingProber::default().with_program("/nonexistent/onoffpc-ping");
        assert!(!prober.is_up("127.0.0.1").await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_reachability() {
        assert!(PingProber::default().with_program("true").is_up("pc").await);
        assert!(!PingProber::default().with_program("false").is_up("pc").await);
    }
}
