use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::BrigadeError;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

/// Outcome of one supervised process-group execution (spec.md §4.5).
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
    pub crashed: bool,
    pub timed_out: bool,
    pub cancelled: bool,
}

/// Spawns `command` (via `sh -c`) as its own process group, streams its
/// combined stdout+stderr incrementally, and enforces `timeout` and
/// `cancel` by terminating the whole group (soft signal, then hard signal
/// after `grace_period`). Never returns while the group still has live
/// members (spec.md §4.5, §5).
#[allow(clippy::too_many_arguments)]
pub async fn run_process_group(
    command: &str,
    stdin_payload: &str,
    cwd: &Path,
    timeout: Duration,
    health_check_interval: Duration,
    grace_period: Duration,
    crash_exit_code: i32,
    timeout_exit_code: i32,
    cancel: &CancellationToken,
) -> Result<RunOutcome, BrigadeError> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(cwd)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            // Detach into our own session so the whole subtree can be
            // signalled as one process group.
            nix::unistd::setsid().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
            Ok(())
        });
    }

    let mut child = cmd.spawn()?;
    let pid = child.id();

    let mut stdin = child.stdin.take().expect("piped stdin");
    let payload = stdin_payload.to_string();
    let stdin_write = tokio::spawn(async move {
        let _ = stdin.write_all(payload.as_bytes()).await;
    });

    let output = Arc::new(Mutex::new(String::new()));
    let stdout_task = spawn_reader(child.stdout.take().expect("piped stdout"), output.clone());
    let stderr_task = spawn_reader(child.stderr.take().expect("piped stderr"), output.clone());

    let start = Instant::now();
    let mut timed_out = false;
    let mut cancelled = false;
    let mut terminated = false;

    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }

        if start.elapsed() >= timeout {
            timed_out = true;
            terminated = true;
            warn!(?pid, "worker timed out, terminating process group");
            terminate_group(pid, grace_period).await;
            break child.wait().await?;
        }

        if cancel.is_cancelled() {
            cancelled = true;
            terminated = true;
            info!(?pid, "cancellation requested, terminating process group");
            terminate_group(pid, grace_period).await;
            break child.wait().await?;
        }

        tokio::select! {
            _ = tokio::time::sleep(health_check_interval) => {}
            _ = cancel.cancelled() => {}
        }
    };

    let _ = stdin_write.await;
    let _ = stdout_task.await;
    let _ = stderr_task.await;

    let captured = output.lock().expect("output mutex poisoned").clone();
    let duration = start.elapsed();

    let (exit_code, crashed) = if timed_out {
        (timeout_exit_code, false)
    } else if cancelled {
        (status.code().unwrap_or(-1), false)
    } else {
        match status.code() {
            Some(code) => (code, false),
            None => (crash_exit_code, true),
        }
    };
    let _ = terminated;

    Ok(RunOutcome {
        output: captured,
        exit_code,
        duration,
        crashed,
        timed_out,
        cancelled,
    })
}

fn spawn_reader<R>(mut reader: R, sink: Arc<Mutex<String>>) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let chunk = String::from_utf8_lossy(&buf[..n]);
                    sink.lock().expect("output mutex poisoned").push_str(&chunk);
                }
            }
        }
    })
}

async fn terminate_group(pid: Option<u32>, grace_period: Duration) {
    let Some(pid) = pid else { return };
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let group = Pid::from_raw(-(pid as i32));
        let _ = kill(group, Signal::SIGTERM);
        tokio::time::sleep(grace_period).await;
        let _ = kill(group, Signal::SIGKILL);
    }
    #[cfg(not(unix))]
    {
        let _ = grace_period;
    }
}

