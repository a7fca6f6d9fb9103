//! Run an external command as one step of the pipeline.
//!
//! Every external invocation goes through [`Task`] so the audit behavior is
//! uniform: the step is announced on stdout, the tool's stderr is passed
//! through, and the exit status is recorded at debug level but never turned
//! into an error. Failure of a step is only observable through the output it
//! did (not) produce.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

pub(crate) struct Task {
    description: String,
    quiet: bool,
    timeout: Option<Duration>,
    cmd: Command,
}

/// What a finished (or killed) task left behind.
#[derive(Debug)]
pub(crate) struct TaskOutput {
    pub(crate) status: ExitStatus,
    pub(crate) stdout: String,
}

impl Task {
    pub(crate) fn new(description: impl AsRef<str>, exe: impl AsRef<str>) -> Self {
        let mut cmd = Command::new(exe.as_ref());
        // Default to noninteractive; never leave a stray child behind if the
        // surrounding future is dropped.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        Self {
            description: description.as_ref().to_string(),
            quiet: false,
            timeout: None,
            cmd,
        }
    }

    pub(crate) fn args<S: AsRef<OsStr>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.cmd.args(args);
        self
    }

    pub(crate) fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Bound the task's runtime. On expiry the child is killed and whatever
    /// output it produced is still reaped; the timeout itself is not a
    /// failure.
    pub(crate) fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the command, echoing its stdout to the console.
    pub(crate) async fn run(self) -> Result<()> {
        let output = self.execute().await?;
        if !output.stdout.is_empty() {
            print!("{}", output.stdout);
        }
        Ok(())
    }

    /// Like [`Self::run()`], but return stdout instead of echoing it.
    pub(crate) async fn read(self) -> Result<String> {
        Ok(self.execute().await?.stdout)
    }

    async fn execute(self) -> Result<TaskOutput> {
        let Task {
            description,
            quiet,
            timeout,
            mut cmd,
        } = self;
        if !quiet {
            println!("{description}");
        }
        tracing::debug!("exec: {:?}", cmd);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd
            .spawn()
            .with_context(|| format!("Spawning {description} failed"))?;
        // Both handles exist because of the pipes configured above.
        let mut stdout_pipe = child.stdout.take().context("Taking stdout")?;
        let mut stderr_pipe = child.stderr.take().context("Taking stderr")?;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // Drain both pipes while waiting so a chatty child cannot deadlock
        // on a full pipe buffer, and so a killed child's partial output is
        // still collected.
        let wait = async {
            let status = match timeout {
                Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                    Ok(status) => status?,
                    Err(_) => {
                        tracing::warn!(
                            "{description} timed out after {}s; killing it",
                            limit.as_secs()
                        );
                        if let Err(e) = child.start_kill() {
                            tracing::debug!("kill failed (child already gone?): {e}");
                        }
                        child.wait().await?
                    }
                },
                None => child.wait().await?,
            };
            anyhow::Ok(status)
        };
        let (status, stdout_read, stderr_read) = tokio::join!(
            wait,
            stdout_pipe.read_to_end(&mut stdout),
            stderr_pipe.read_to_end(&mut stderr),
        );
        let status = status.with_context(|| format!("Executing {description} failed"))?;
        stdout_read.context("Reading stdout")?;
        stderr_read.context("Reading stderr")?;

        if !stderr.is_empty() {
            eprint!("{}", String::from_utf8_lossy(&stderr));
        }
        let output = TaskOutput {
            status,
            stdout: String::from_utf8(stdout).context("Decoding stdout")?,
        };
        tracing::debug!("{description}: {:?}", output.status);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read() -> Result<()> {
        let out = Task::new("Reading", "/bin/sh")
            .args(["-c", "echo hello; echo oops >&2"])
            .quiet()
            .read()
            .await?;
        assert_eq!(out, "hello\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_nonzero_status_is_not_an_error() -> Result<()> {
        let out = Task::new("Failing", "/bin/sh")
            .args(["-c", "echo partial; exit 3"])
            .quiet()
            .execute()
            .await?;
        assert!(!out.status.success());
        assert_eq!(out.stdout, "partial\n");
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reaps() -> Result<()> {
        let start = std::time::Instant::now();
        let out = Task::new("Sleeping", "/bin/sh")
            .args(["-c", "echo early; exec sleep 60"])
            .quiet()
            .timeout(Some(Duration::from_millis(200)))
            .execute()
            .await?;
        assert_eq!(out.stdout, "early\n");
        assert!(!out.status.success());
        assert!(start.elapsed() < Duration::from_secs(30));
        Ok(())
    }

    #[tokio::test]
    async fn test_spawn_failure_is_fatal() {
        let r = Task::new("Missing", "/no/such/binary").quiet().read().await;
        assert!(r.is_err());
    }
}
