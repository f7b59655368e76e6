// ABOUTME: Runs the application entry script inside the drone.
// ABOUTME: Waits for it to listen on the assigned port, reports, then mirrors its exit.

use hive_core::report::ENV_PORT;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::Instant;

use crate::context::DroneContext;
use crate::error::BootstrapError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Locate the entry script relative to the current directory.
pub fn resolve_entry(script: &Path) -> Result<PathBuf, BootstrapError> {
    let path = match std::env::current_dir() {
        Ok(cwd) => cwd.join(script),
        Err(_) => script.to_path_buf(),
    };
    if path.is_file() {
        Ok(path)
    } else {
        Err(BootstrapError::EntryNotFound(script.to_path_buf()))
    }
}

/// Build the command that runs `entry` with the drone's arguments.
pub fn entry_command(ctx: &DroneContext, entry: &Path) -> Command {
    let config = ctx.config();
    let mut cmd = match &config.interpreter {
        Some(interpreter) => {
            let mut cmd = Command::new(interpreter);
            cmd.arg(entry);
            cmd
        }
        None => Command::new(entry),
    };

    let port = config.port.to_string();
    cmd.args(&config.args)
        .env("PORT", &port)
        .env(ENV_PORT, &port)
        .stdin(Stdio::null())
        .kill_on_drop(true);

    #[cfg(target_os = "linux")]
    die_with_parent(&mut cmd);

    cmd
}

#[cfg(target_os = "linux")]
fn die_with_parent(cmd: &mut Command) {
    // SAFETY: prctl is async-signal-safe and the closure allocates nothing.
    unsafe {
        cmd.pre_exec(|| {
            nix::sys::prctl::set_pdeathsig(nix::sys::signal::Signal::SIGKILL)
                .map_err(std::io::Error::from)
        });
    }
}

/// Addresses an app may bind its assigned port on: both loopbacks, plus the
/// host the orchestrator hands out.
pub fn listen_hosts(host: Option<&str>) -> Vec<String> {
    let mut hosts = vec!["127.0.0.1".to_string(), "::1".to_string()];
    if let Some(host) = host {
        if !hosts.iter().any(|h| h == host) {
            hosts.push(host.to_string());
        }
    }
    hosts
}

async fn accepts(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Poll until something accepts TCP connections on `port` at any of `hosts`,
/// or `timeout` passes.
pub async fn wait_until_listening(hosts: &[String], port: u16, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        for host in hosts {
            if accepts(host, port).await {
                return true;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Exit code to mirror for `status`; signals map to 128 + signo like a shell.
pub fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(1)
}

/// Run the entry script until it exits and return its exit code.
pub async fn run(ctx: &DroneContext) -> Result<i32, BootstrapError> {
    let config = ctx.config();
    let entry = resolve_entry(&config.script)?;
    let mut child = entry_command(ctx, &entry)
        .spawn()
        .map_err(|source| BootstrapError::Exec {
            path: entry.clone(),
            source,
        })?;
    let pid = child.id();
    tracing::info!(entry = %entry.display(), pid = ?pid, port = config.port, "Started entry script");

    let exec_err = |source: std::io::Error| BootstrapError::Exec {
        path: entry.clone(),
        source,
    };
    let mut terminate = signal(SignalKind::terminate()).map_err(exec_err)?;
    let mut interrupt = signal(SignalKind::interrupt()).map_err(exec_err)?;

    let hosts = listen_hosts(config.host.as_deref());
    let ready = wait_until_listening(&hosts, config.port, config.ready_timeout);
    tokio::pin!(ready);
    let mut waiting = true;

    loop {
        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(exec_err)?;
                tracing::info!(status = %status, "Entry script exited");
                return Ok(exit_code(status));
            }
            listening = &mut ready, if waiting => {
                waiting = false;
                if !listening {
                    let err = BootstrapError::NotListening {
                        port: config.port,
                        timeout: config.ready_timeout,
                    };
                    tracing::error!(error = %err, "Stopping entry script");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "Failed to kill entry script");
                    }
                    return Err(err);
                }
                if let Err(e) = ctx.report_port(config.port).await {
                    tracing::warn!(port = config.port, error = %e, "Port report failed");
                }
            }
            _ = terminate.recv() => forward(pid, nix::sys::signal::Signal::SIGTERM),
            _ = interrupt.recv() => forward(pid, nix::sys::signal::Signal::SIGINT),
        }
    }
}

fn forward(pid: Option<u32>, sig: nix::sys::signal::Signal) {
    let Some(pid) = pid else { return };
    let Ok(raw) = i32::try_from(pid) else { return };
    tracing::info!(pid, signal = ?sig, "Forwarding signal to entry script");
    if let Err(e) = nix::sys::signal::kill(nix::unistd::Pid::from_raw(raw), sig) {
        tracing::warn!(pid, error = %e, "Failed to forward signal");
    }
}
