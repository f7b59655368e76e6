// ABOUTME: Runs one drone process, restarts it under a policy and fans out its events.
// ABOUTME: MonitorHandle is the live, cloneable reference the orchestrator keeps.

use hive_core::RestartPolicy;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::command::CommandLine;
use crate::event::{ExitInfo, MonitorEvent, StartInfo, Subscription};

const READ_CHUNK: usize = 8 * 1024;

/// How long to wait for output pipes to drain once the process is gone.
/// A grandchild holding the pipe open must not stall the exit event.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// How a monitor runs its process.
#[derive(Debug, Clone)]
pub struct MonitorOptions {
    /// Application tag attached to every log line
    pub tag: String,
    pub cwd: Option<PathBuf>,
    /// Added on top of the orchestrator's own environment
    pub env: BTreeMap<String, String>,
    /// Log only the number of environment entries
    pub hide_env: bool,
    /// Runs shorter than this count as spinning while the gate is set
    pub min_uptime: Duration,
    /// Delay before restarting a spinning process; None gives up instead
    pub spin_sleep: Option<Duration>,
    pub restart: RestartPolicy,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            tag: String::new(),
            cwd: None,
            env: BTreeMap::new(),
            hide_env: false,
            min_uptime: Duration::from_secs(2),
            spin_sleep: None,
            restart: RestartPolicy::Unbounded,
        }
    }
}

/// What the monitor does after a run ends on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterExit {
    Restart,
    RestartAfter(Duration),
    GiveUp,
}

fn after_exit(
    restart: RestartPolicy,
    restarts: u32,
    spinning: bool,
    spin_sleep: Option<Duration>,
) -> AfterExit {
    if !restart.allows(restarts) {
        return AfterExit::GiveUp;
    }
    match (spinning, spin_sleep) {
        (false, _) => AfterExit::Restart,
        (true, Some(delay)) => AfterExit::RestartAfter(delay),
        (true, None) => AfterExit::GiveUp,
    }
}

/// Event callback; returning false removes it.
type Listener = Box<dyn Fn(&MonitorEvent) -> bool + Send>;

struct Shared {
    tag: String,
    command: CommandLine,
    restart: RestartPolicy,
    min_uptime_ms: AtomicU64,
    /// 0 while no process is running
    pid: AtomicU32,
    restarts: AtomicU32,
    running: AtomicBool,
    started: AtomicBool,
    listeners: Mutex<Vec<Listener>>,
    stop: CancellationToken,
    done: CancellationToken,
}

impl Shared {
    /// Deliver an event to every listener, dropping the ones that decline more.
    ///
    /// Errors are always logged here, so a spawn failure is handled even
    /// when nobody is listening.
    fn emit(&self, event: MonitorEvent) {
        if let MonitorEvent::Error(ref err) = event {
            tracing::error!(app = %self.tag, command = %self.command, error = %err, "Drone failed to start");
        }
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|listener| listener(&event));
        }
    }

    fn min_uptime(&self) -> Duration {
        Duration::from_millis(self.min_uptime_ms.load(Ordering::SeqCst))
    }
}

/// Live reference to a supervised drone.
#[derive(Clone)]
pub struct MonitorHandle {
    shared: Arc<Shared>,
}

impl MonitorHandle {
    /// Register a callback for every future event. Events emitted before
    /// this call are not replayed.
    ///
    /// The callback runs on the monitor's task while the listener list is
    /// locked: it must not call back into this monitor. Return false to
    /// deregister.
    pub fn listen<F>(&self, listener: F)
    where
        F: Fn(&MonitorEvent) -> bool + Send + 'static,
    {
        if let Ok(mut listeners) = self.shared.listeners.lock() {
            listeners.push(Box::new(listener));
        }
    }

    /// Channel-backed listener. Dropping the receiver deregisters it on the next event.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listen(move |event| tx.send(event.clone()).is_ok());
        rx
    }

    pub fn tag(&self) -> &str {
        &self.shared.tag
    }

    pub fn command(&self) -> &CommandLine {
        &self.shared.command
    }

    pub fn restart_policy(&self) -> RestartPolicy {
        self.shared.restart
    }

    pub fn min_uptime(&self) -> Duration {
        self.shared.min_uptime()
    }

    pub fn set_min_uptime(&self, min_uptime: Duration) {
        let millis = u64::try_from(min_uptime.as_millis()).unwrap_or(u64::MAX);
        self.shared.min_uptime_ms.store(millis, Ordering::SeqCst);
    }

    /// Drop the boot grace period: later crashes restart immediately.
    pub fn clear_min_uptime(&self) {
        self.shared.min_uptime_ms.store(0, Ordering::SeqCst);
    }

    pub fn pid(&self) -> Option<u32> {
        match self.shared.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    pub fn restarts(&self) -> u32 {
        self.shared.restarts.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Kill the process and stop restarting it. The final event is a forced Exit.
    pub fn stop(&self) {
        self.shared.stop.cancel();
    }

    /// Resolves once the monitor has emitted its terminal event.
    /// Never resolves for a monitor that was not started.
    pub async fn stopped(&self) {
        self.shared.done.cancelled().await;
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.done.is_cancelled()
    }
}

impl std::fmt::Debug for MonitorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorHandle")
            .field("tag", &self.shared.tag)
            .field("pid", &self.pid())
            .field("restarts", &self.restarts())
            .finish()
    }
}

/// A process monitor that has not been started yet.
///
/// Subscribe before calling [`Monitor::start`] to see the first Start event.
pub struct Monitor {
    handle: MonitorHandle,
    options: MonitorOptions,
}

impl Monitor {
    pub fn new(command: CommandLine, options: MonitorOptions) -> Self {
        let min_uptime_ms = u64::try_from(options.min_uptime.as_millis()).unwrap_or(u64::MAX);
        let shared = Shared {
            tag: options.tag.clone(),
            command,
            restart: options.restart,
            min_uptime_ms: AtomicU64::new(min_uptime_ms),
            pid: AtomicU32::new(0),
            restarts: AtomicU32::new(0),
            running: AtomicBool::new(false),
            started: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            stop: CancellationToken::new(),
            done: CancellationToken::new(),
        };
        Self {
            handle: MonitorHandle {
                shared: Arc::new(shared),
            },
            options,
        }
    }

    pub fn handle(&self) -> MonitorHandle {
        self.handle.clone()
    }

    pub fn subscribe(&self) -> Subscription {
        self.handle.subscribe()
    }

    pub fn listen<F>(&self, listener: F)
    where
        F: Fn(&MonitorEvent) -> bool + Send + 'static,
    {
        self.handle.listen(listener);
    }

    /// Launch the process on the current tokio runtime.
    pub fn start(self) -> MonitorHandle {
        let handle = self.handle.clone();
        if !handle.shared.started.swap(true, Ordering::SeqCst) {
            tokio::spawn(supervise(handle.shared.clone(), self.options));
        }
        handle
    }
}

async fn supervise(shared: Arc<Shared>, options: MonitorOptions) {
    if options.hide_env {
        tracing::info!(
            app = %shared.tag,
            command = %shared.command,
            env_keys = options.env.len(),
            "Starting drone"
        );
    } else {
        tracing::info!(
            app = %shared.tag,
            command = %shared.command,
            env = ?options.env,
            "Starting drone"
        );
    }

    let mut restarts: u32 = 0;
    let mut spinning = false;

    loop {
        if shared.stop.is_cancelled() {
            finish(&shared, None, spinning, true, restarts);
            return;
        }

        let launched_at = Instant::now();
        let mut child = match launch(&shared.command, &options) {
            Ok(child) => child,
            Err(err) => {
                shared.running.store(false, Ordering::SeqCst);
                shared.emit(MonitorEvent::Error(Arc::new(err)));
                shared.done.cancel();
                return;
            }
        };

        let pid = child.id().unwrap_or(0);
        shared.pid.store(pid, Ordering::SeqCst);
        shared.running.store(true, Ordering::SeqCst);
        tracing::debug!(app = %shared.tag, pid, restarts, "Drone process launched");
        shared.emit(MonitorEvent::Start(StartInfo { pid, restarts }));

        let mut pumps = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(pump(shared.clone(), stdout, MonitorEvent::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(pump(shared.clone(), stderr, MonitorEvent::Stderr));
        }

        let waited = tokio::select! {
            status = child.wait() => Some(status),
            _ = shared.stop.cancelled() => None,
        };

        let (code, forced) = match waited {
            Some(Ok(status)) => (status.code(), false),
            Some(Err(err)) => {
                tracing::warn!(app = %shared.tag, pid, error = %err, "Failed to wait for drone");
                (None, false)
            }
            None => {
                if let Err(err) = child.kill().await {
                    tracing::warn!(app = %shared.tag, pid, error = %err, "Failed to kill drone");
                }
                (None, true)
            }
        };

        drain(pumps).await;
        shared.pid.store(0, Ordering::SeqCst);
        shared.running.store(false, Ordering::SeqCst);

        spinning = launched_at.elapsed() < shared.min_uptime();
        if forced {
            finish(&shared, code, false, true, restarts);
            return;
        }

        match after_exit(shared.restart, restarts, spinning, options.spin_sleep) {
            AfterExit::GiveUp => {
                if spinning {
                    tracing::warn!(app = %shared.tag, ?code, "Drone restarted too fast, not restarting");
                } else {
                    tracing::warn!(app = %shared.tag, ?code, restarts, "Drone exited, restart budget spent");
                }
                finish(&shared, code, spinning, false, restarts);
                return;
            }
            AfterExit::RestartAfter(delay) => {
                tracing::warn!(app = %shared.tag, ?code, delay_ms = delay.as_millis() as u64, "Drone is spinning, delaying restart");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shared.stop.cancelled() => {
                        finish(&shared, code, spinning, true, restarts);
                        return;
                    }
                }
            }
            AfterExit::Restart => {
                tracing::info!(app = %shared.tag, ?code, "Drone exited, restarting");
            }
        }

        restarts += 1;
        shared.restarts.store(restarts, Ordering::SeqCst);
        shared.emit(MonitorEvent::Restart { attempt: restarts });
    }
}

fn finish(shared: &Shared, code: Option<i32>, spinning: bool, forced: bool, restarts: u32) {
    shared.emit(MonitorEvent::Exit(ExitInfo {
        code,
        spinning,
        forced,
        restarts,
    }));
    shared.done.cancel();
}

fn launch(command: &CommandLine, options: &MonitorOptions) -> std::io::Result<Child> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &options.cwd {
        cmd.current_dir(cwd);
    }
    cmd.spawn()
}

fn pump<R>(shared: Arc<Shared>, mut reader: R, wrap: fn(String) -> MonitorEvent) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK];
        let mut text = TextChunks::default();
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => {
                    if let Some(chunk) = text.push(&buf[..n]) {
                        shared.emit(wrap(chunk));
                    }
                }
                Err(err) => {
                    tracing::debug!(app = %shared.tag, error = %err, "Drone output closed");
                    break;
                }
            }
        }
        if let Some(rest) = text.finish() {
            shared.emit(wrap(rest));
        }
    })
}

/// Decodes raw output reads, holding back a character cut off at the end
/// of a read until the next read completes it.
#[derive(Default)]
struct TextChunks {
    pending: Vec<u8>,
}

impl TextChunks {
    fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let ready = self.pending.len() - keep;
        if ready == 0 {
            return None;
        }
        let chunk = String::from_utf8_lossy(&self.pending[..ready]).into_owned();
        self.pending.drain(..ready);
        Some(chunk)
    }

    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

/// Length of a trailing multi-byte sequence that still misses bytes.
fn incomplete_tail(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0xC0 == 0x80 {
            continue;
        }
        let width = match byte {
            0xC2..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF4 => 4,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}

async fn drain(pumps: Vec<JoinHandle<()>>) {
    for mut pump in pumps {
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await.is_err() {
            pump.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_split_across_reads() {
        let bytes = "héllo ✓".as_bytes();
        let mut text = TextChunks::default();

        // "h" plus the first byte of "é"
        assert_eq!(text.push(&bytes[..2]).as_deref(), Some("h"));
        assert_eq!(text.push(&bytes[2..6]).as_deref(), Some("éllo"));
        // " " plus two of the three bytes of "✓"
        assert_eq!(text.push(&bytes[6..9]).as_deref(), Some(" "));
        assert_eq!(text.push(&bytes[9..]).as_deref(), Some("✓"));
        assert!(text.finish().is_none());
    }

    #[test]
    fn test_lone_lead_byte_waits_for_more() {
        let mut text = TextChunks::default();
        assert!(text.push(&[0xE2]).is_none());
        assert!(text.push(&[0x9C]).is_none());
        assert_eq!(text.push(&[0x93, b'\n']).as_deref(), Some("✓\n"));
    }

    #[test]
    fn test_truncated_output_is_flushed_lossy() {
        let mut text = TextChunks::default();
        assert_eq!(text.push(b"ok\xE2\x9C").as_deref(), Some("ok"));
        assert_eq!(text.finish().as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_invalid_bytes_are_not_held_back() {
        let mut text = TextChunks::default();
        assert_eq!(text.push(b"a\xFFb").as_deref(), Some("a\u{FFFD}b"));
        assert_eq!(text.push(b"\x80").as_deref(), Some("\u{FFFD}"));
    }

    #[test]
    fn test_after_exit_restarts_healthy_runs() {
        assert_eq!(
            after_exit(RestartPolicy::Unbounded, 10, false, None),
            AfterExit::Restart
        );
        assert_eq!(
            after_exit(RestartPolicy::Bounded { max: 3 }, 2, false, None),
            AfterExit::Restart
        );
    }

    #[test]
    fn test_after_exit_respects_budget() {
        assert_eq!(
            after_exit(RestartPolicy::Bounded { max: 3 }, 3, false, None),
            AfterExit::GiveUp
        );
        assert_eq!(
            after_exit(
                RestartPolicy::Bounded { max: 0 },
                0,
                true,
                Some(Duration::from_millis(5))
            ),
            AfterExit::GiveUp
        );
    }

    #[test]
    fn test_after_exit_spinning() {
        assert_eq!(
            after_exit(RestartPolicy::Unbounded, 0, true, None),
            AfterExit::GiveUp
        );
        assert_eq!(
            after_exit(RestartPolicy::Unbounded, 0, true, Some(Duration::from_secs(1))),
            AfterExit::RestartAfter(Duration::from_secs(1))
        );
    }

    #[test]
    fn test_min_uptime_gate_can_be_cleared() {
        let monitor = Monitor::new(
            CommandLine::new("true"),
            MonitorOptions {
                min_uptime: Duration::from_millis(1500),
                ..MonitorOptions::default()
            },
        );
        let handle = monitor.handle();
        assert_eq!(handle.min_uptime(), Duration::from_millis(1500));

        handle.clear_min_uptime();
        assert_eq!(handle.min_uptime(), Duration::ZERO);

        handle.set_min_uptime(Duration::from_millis(20));
        assert_eq!(handle.min_uptime(), Duration::from_millis(20));
    }

    #[test]
    fn test_restart_policy_is_carried() {
        let monitor = Monitor::new(
            CommandLine::new("true"),
            MonitorOptions {
                restart: RestartPolicy::Bounded { max: 3 },
                ..MonitorOptions::default()
            },
        );
        assert_eq!(
            monitor.handle().restart_policy(),
            RestartPolicy::Bounded { max: 3 }
        );
        assert_eq!(monitor.handle().pid(), None);
        assert!(!monitor.handle().is_running());
    }

    #[test]
    fn test_declining_listener_is_removed() {
        use std::sync::atomic::AtomicUsize;

        let monitor = Monitor::new(CommandLine::new("true"), MonitorOptions::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        monitor.listen(move |_| counted.fetch_add(1, Ordering::SeqCst) == 0);

        for attempt in 1..=3 {
            monitor
                .handle
                .shared
                .emit(MonitorEvent::Restart { attempt });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropped_subscription_is_pruned() {
        let monitor = Monitor::new(CommandLine::new("true"), MonitorOptions::default());
        let kept = monitor.subscribe();
        drop(monitor.subscribe());

        monitor
            .handle
            .shared
            .emit(MonitorEvent::Restart { attempt: 1 });

        let listeners = monitor.handle.shared.listeners.lock().unwrap().len();
        assert_eq!(listeners, 1);
        drop(kept);
    }
}
