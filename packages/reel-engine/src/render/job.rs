use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct JobOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub enum WaitOutcome {
    Exited(JobOutput),
    /// The deadline passed and the process was killed.
    TimedOut,
}

/// One running engine process with captured output streams.
///
/// The child is killed if the job is dropped before it exits.
pub struct RenderJob {
    child: Child,
    stdout: JoinHandle<String>,
    stderr: JoinHandle<String>,
    started_at: Instant,
}

fn drain<R: AsyncRead + Unpin + Send + 'static>(reader: Option<R>) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut r) = reader {
            if let Err(e) = r.read_to_end(&mut buf).await {
                debug!(error = %e, "stopped reading engine output");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

impl RenderJob {
    pub fn start<I, S>(program: &str, args: I) -> std::io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        debug!(command = ?cmd, "starting render engine");

        let mut child = cmd.spawn()?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        Ok(Self {
            child,
            stdout,
            stderr,
            started_at: Instant::now(),
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Waits for exit and for both streams to close, all within `timeout`.
    pub async fn wait_with_timeout(mut self, timeout: Duration) -> std::io::Result<WaitOutcome> {
        let waited = {
            let child = &mut self.child;
            let stdout = &mut self.stdout;
            let stderr = &mut self.stderr;
            tokio::time::timeout(timeout, async move {
                let status = child.wait().await?;
                let stdout = stdout.await.unwrap_or_default();
                let stderr = stderr.await.unwrap_or_default();
                Ok::<_, std::io::Error>((status, stdout, stderr))
            })
            .await
        };

        match waited {
            Ok(Ok((status, stdout, stderr))) => Ok(WaitOutcome::Exited(JobOutput {
                status,
                stdout,
                stderr,
                elapsed: self.started_at.elapsed(),
            })),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(pid = ?self.child.id(), timeout_secs = timeout.as_secs(), "render engine timed out");
                self.kill().await;
                Ok(WaitOutcome::TimedOut)
            }
        }
    }

    /// Forcibly terminates the process and stops collecting its output.
    pub async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            debug!(error = %e, "kill after exit");
        }
        self.stdout.abort();
        self.stderr.abort();
    }
}
