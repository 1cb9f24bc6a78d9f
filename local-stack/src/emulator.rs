use crate::config::{EmulatorCommand, Endpoint};
use crate::{Error, Result};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// How often the readiness check tries to connect to the emulator.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long the emulator gets to shut down after SIGTERM before it is killed.
pub const KILL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Output and lifecycle notifications from the emulator process.
///
/// Output is forwarded one line at a time, as read, minus the `\n` or `\r\n` terminator.
/// A final line without a terminator is forwarded too.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorEvent {
    /// A line the emulator printed to stdout, without the line break
    Stdout(String),
    /// A line the emulator printed to stderr, without the line break
    Stderr(String),
    /// The process terminated. Contains the exit code, if there was one.
    Exited(Option<i32>),
}

/// Receives [EmulatorEvent]s. Delivery is best-effort: a closed receiver is ignored.
pub type Observer = mpsc::UnboundedSender<EmulatorEvent>;

/// A running emulator process.
///
/// The child is owned by a background task that waits for it to exit or for a kill request,
/// whichever comes first. On unix the child leads its own process group, so a kill request
/// reaches everything the emulator started. Dropping this struct kills the direct child only.
pub struct Emulator {
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    exit_rx: watch::Receiver<Option<Option<i32>>>,
    monitor: JoinHandle<Option<i32>>,
}

impl Emulator {
    /// Launches `command` from `workdir` as
    /// `<program> <args..> --template <template> --host <host> --port <port> --region <region> <extra_args..>`.
    pub fn spawn(
        command: &EmulatorCommand,
        workdir: &Path,
        template: &Path,
        endpoint: &Endpoint,
        extra_args: &[String],
        observer: Option<Observer>,
    ) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .arg("--template")
            .arg(template)
            .arg("--host")
            .arg(&endpoint.host)
            .arg("--port")
            .arg(endpoint.port.to_string())
            .arg("--region")
            .arg(&endpoint.region)
            .args(extra_args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        debug!("Launching: {:?}", cmd.as_std());

        let mut child = cmd.spawn().map_err(|source| Error::Launch {
            program: command.program.clone(),
            source,
        })?;

        let pid = child.id();
        info!("Emulator started, pid {:?}", pid);

        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, observer.clone(), EmulatorEvent::Stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, observer.clone(), EmulatorEvent::Stderr);
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let (exit_tx, exit_rx) = watch::channel(None);
        let monitor = tokio::spawn(supervise(child, kill_rx, exit_tx, observer));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exit_rx,
            monitor,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Returns `Some(exit code)` once the process has terminated.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        *self.exit_rx.borrow()
    }

    /// Waits until the emulator accepts TCP connections on the endpoint.
    /// Fails early if the process exits in the meantime.
    pub async fn wait_until_ready(&self, endpoint: &Endpoint, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let authority = endpoint.authority();

        loop {
            if let Some(code) = self.exit_code() {
                return Err(Error::EmulatorExited(code));
            }

            match TcpStream::connect(&authority).await {
                Ok(_) => {
                    debug!("Emulator is accepting connections on {authority}");
                    return Ok(());
                }
                Err(e) => {
                    if Instant::now() >= deadline {
                        debug!("Last connection error: {e}");
                        return Err(Error::NotReady(authority));
                    }
                }
            }

            sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Stops the process and everything it started, and waits for it to exit.
    /// Returns the exit code, if there was one. On unix the process group gets SIGTERM, then SIGKILL
    /// after [KILL_GRACE_PERIOD].
    pub async fn kill(mut self) -> Result<Option<i32>> {
        if let Some(kill_tx) = self.kill_tx.take() {
            // the monitor is gone if the process has already exited
            let _ = kill_tx.send(());
        }

        match (&mut self.monitor).await {
            Ok(code) => Ok(code),
            Err(e) => Err(Error::Teardown(std::io::Error::other(e))),
        }
    }
}

/// Owns the child until it exits on its own or is asked to die.
/// A dropped `kill_rx` sender counts as a kill request.
async fn supervise(
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<Option<i32>>>,
    observer: Option<Observer>,
) -> Option<i32> {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill_rx => terminate(&mut child).await,
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("Failed to get the emulator exit status: {e}");
            None
        }
    };

    info!("Emulator exited with {:?}", code);
    let _ = exit_tx.send(Some(code));
    if let Some(observer) = observer {
        let _ = observer.send(EmulatorEvent::Exited(code));
    }

    code
}

/// Sends SIGTERM to the process group of the emulator and gives it [KILL_GRACE_PERIOD] to exit.
/// Then SIGKILLs the group, so no descendant outlives the emulator.
#[cfg(unix)]
async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    let pgid = match child.id() {
        Some(v) => v,
        // already reaped
        None => return child.wait().await,
    };

    debug!("Sending SIGTERM to process group {pgid}");
    signal_group(pgid, libc::SIGTERM);

    let status = match tokio::time::timeout(KILL_GRACE_PERIOD, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!("The emulator did not exit within {KILL_GRACE_PERIOD:?}. Killing it.");
            signal_group(pgid, libc::SIGKILL);
            child.wait().await
        }
    };

    // descendants that ignored SIGTERM or were started while the leader was shutting down
    signal_group(pgid, libc::SIGKILL);

    status
}

#[cfg(not(unix))]
async fn terminate(child: &mut Child) -> std::io::Result<ExitStatus> {
    debug!("Killing the emulator");
    if let Err(e) = child.kill().await {
        warn!("Failed to kill the emulator: {e}");
    }
    child.wait().await
}

/// A group that no longer exists is not an error.
#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    let pgid = match libc::pid_t::try_from(pgid) {
        Ok(v) => v,
        Err(_) => {
            warn!("Invalid process group ID: {pgid}");
            return;
        }
    };

    // SAFETY: killpg only takes plain integers
    if unsafe { libc::killpg(pgid, signal) } != 0 {
        let e = std::io::Error::last_os_error();
        if e.raw_os_error() != Some(libc::ESRCH) {
            warn!("Failed to send signal {signal} to process group {pgid}: {e}");
        }
    }
}

/// Reads `reader` line by line in the background and passes every line to the observer and to the log.
fn forward_lines<R>(reader: R, observer: Option<Observer>, wrap: fn(String) -> EmulatorEvent)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!("emulator: {line}");
                    if let Some(observer) = &observer {
                        let _ = observer.send(wrap(line));
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read the emulator output: {e}");
                    break;
                }
            }
        }
    });
}

/// True while `/proc/<pid>` exists and is not a zombie.
#[cfg(all(test, target_os = "linux"))]
pub(crate) fn is_running(pid: &str) -> bool {
    match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
        Ok(stat) => !stat.rsplit(')').next().unwrap_or_default().trim_start().starts_with('Z'),
        Err(_) => false,
    }
}
