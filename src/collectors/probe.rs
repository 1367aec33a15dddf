use crate::error::CollectorError;
use log::{debug, warn};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Source of raw disk usage output for a single path
///
/// Implementations return the tab-separated `<kilobytes>\t<name>` text that
/// `du -k -d 1 <path>` prints.
#[cfg_attr(test, mockall::automock)]
pub trait UsageProbe: Send + Sync {
    fn measure(&self, path: &str) -> Result<String, CollectorError>;
}

/// Probe that runs the `du` utility
///
/// Each call spawns `<program> -k -d 1 <path>` and waits for it to exit, up
/// to the configured timeout. A child that outlives the deadline is killed.
#[derive(Debug, Clone)]
pub struct DuProbe {
    program: PathBuf,
    timeout: Duration,
}

impl DuProbe {
    /// Create a probe for the given `du` binary
    ///
    /// # Arguments
    ///
    /// * `program` - Name or path of the `du` executable
    /// * `timeout` - Deadline for a single measurement
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::time::Duration;
    /// use du_exporter::collectors::{DuProbe, UsageProbe};
    ///
    /// let probe = DuProbe::new("du", Duration::from_secs(30));
    /// let output = probe.measure("/var/log").unwrap();
    /// ```
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Deadline applied to each measurement
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `child` until it exits or the timeout expires
    ///
    /// # Returns
    ///
    /// The exit status, `CollectorError::Timeout` once the deadline passes, or
    /// `CollectorError::IoError` if the child's state cannot be queried. The
    /// child is left running on error.
    fn wait_with_deadline(
        &self,
        child: &mut Child,
        path: &str,
    ) -> Result<ExitStatus, CollectorError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            match child.try_wait()? {
                Some(status) => return Ok(status),
                None if Instant::now() >= deadline => {
                    return Err(CollectorError::Timeout {
                        path: path.to_string(),
                        timeout: self.timeout,
                    });
                }
                None => thread::sleep(POLL_INTERVAL),
            }
        }
    }

    /// Kill `child` and collect its exit status so no zombie is left behind
    fn reap(child: &mut Child, path: &str) {
        if let Err(e) = child.kill() {
            warn!("Failed to kill du for {}: {}", path, e);
        }
        if let Err(e) = child.wait() {
            warn!("Failed to reap du for {}: {}", path, e);
        }
    }

    fn spawn_reader<R>(mut source: R) -> JoinHandle<std::io::Result<Vec<u8>>>
    where
        R: Read + Send + 'static,
    {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            source.read_to_end(&mut buffer)?;
            Ok(buffer)
        })
    }

    fn join_reader(
        handle: JoinHandle<std::io::Result<Vec<u8>>>,
        stream: &str,
    ) -> Result<Vec<u8>, CollectorError> {
        let bytes = handle.join().map_err(|_| {
            CollectorError::SubprocessTerminated(format!("{} reader thread panicked", stream))
        })??;
        Ok(bytes)
    }
}

impl UsageProbe for DuProbe {
    fn measure(&self, path: &str) -> Result<String, CollectorError> {
        debug!("Running {} -k -d 1 {}", self.program.display(), path);

        let mut child = Command::new(&self.program)
            .args(["-k", "-d", "1"])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                CollectorError::SubprocessSpawn(format!("{}: {}", self.program.display(), e))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CollectorError::ParseError("No stdout available".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| CollectorError::ParseError("No stderr available".to_string()))?;

        // Drain both pipes while waiting so a large listing cannot block the child
        let stdout_reader = Self::spawn_reader(stdout);
        let stderr_reader = Self::spawn_reader(stderr);

        let status = match self.wait_with_deadline(&mut child, path) {
            Ok(status) => status,
            Err(e) => {
                // Readers finish on their own once the pipes close
                Self::reap(&mut child, path);
                return Err(e);
            }
        };

        let stdout = Self::join_reader(stdout_reader, "stdout")?;
        let stderr = Self::join_reader(stderr_reader, "stderr")?;

        if !status.success() {
            return Err(CollectorError::SubprocessFailed {
                path: path.to_string(),
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&stdout).into_owned())
    }
}
