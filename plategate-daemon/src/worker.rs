//! Recognition worker processes.
//!
//! The supervisor never touches a child process directly. It asks a
//! [`WorkerLauncher`] for a worker and gets back a [`WorkerHandle`] (the only
//! way to terminate it) while everything the worker says arrives as
//! [`WorkerEnvelope`]s on the supervisor's inbox, tagged with the launch
//! generation so output from a superseded worker can be told apart.

use std::fmt;
use std::io;
use std::process::Stdio;
use std::time::Duration;

use plategate_core::config::{ArgStyle, WorkerConfig, DEFAULT_DEVICE, DEFAULT_FRAME_RATE};
use plategate_core::{CameraIp, PerformanceSample, WorkerErrorKind};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ControlError;
use crate::parser::{StderrClass, StderrScanner, StdoutEvent, StdoutScanner};

/// Time a worker gets to exit after SIGTERM before it is killed.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);
/// Time allowed for the output readers to drain once the process has exited.
const READER_DRAIN: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Launch parameters
// ---------------------------------------------------------------------------

/// Everything needed to (re)launch the worker for one camera.
#[derive(Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub ip: CameraIp,
    pub user: String,
    pub password: String,
    pub device: String,
    pub frame_rate: u32,
}

impl fmt::Debug for WorkerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSpec")
            .field("ip", &self.ip)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("device", &self.device)
            .field("frame_rate", &self.frame_rate)
            .finish()
    }
}

impl WorkerSpec {
    /// Spec with the default device and frame rate.
    pub fn new(ip: impl Into<CameraIp>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user: user.into(),
            password: password.into(),
            device: DEFAULT_DEVICE.to_string(),
            frame_rate: DEFAULT_FRAME_RATE,
        }
    }

    pub fn validate(&self) -> Result<(), ControlError> {
        let required = [
            ("ip", self.ip.0.as_str()),
            ("user", self.user.as_str()),
            ("password", self.password.as_str()),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ControlError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.frame_rate == 0 {
            return Err(ControlError::Invalid("frame_rate must be positive".to_string()));
        }
        Ok(())
    }

    /// Launch parameters in the order the worker expects them.
    pub fn launch_args(&self, style: ArgStyle) -> Vec<String> {
        let values = [
            ("--ip", self.ip.0.clone()),
            ("--user", self.user.clone()),
            ("--password", self.password.clone()),
            ("--frame_rate", self.frame_rate.to_string()),
            ("--device", self.device.clone()),
        ];
        match style {
            ArgStyle::Positional => values.into_iter().map(|(_, value)| value).collect(),
            ArgStyle::Flags => values
                .into_iter()
                .flat_map(|(flag, value)| [flag.to_string(), value])
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker -> supervisor messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerMessage {
    Started,
    Plate(String),
    Performance(PerformanceSample),
    /// A non-warning stderr line.
    Error { kind: WorkerErrorKind, line: String },
    /// The process is gone and its output fully drained.
    Exited { code: Option<i32> },
}

impl From<StdoutEvent> for WorkerMessage {
    fn from(event: StdoutEvent) -> Self {
        match event {
            StdoutEvent::Started => WorkerMessage::Started,
            StdoutEvent::Plate(plate) => WorkerMessage::Plate(plate),
            StdoutEvent::Performance(sample) => WorkerMessage::Performance(sample),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerEnvelope {
    pub ip: CameraIp,
    pub generation: u64,
    pub message: WorkerMessage,
}

/// Outbox for one launched worker. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerSink {
    ip: CameraIp,
    generation: u64,
    tx: mpsc::Sender<WorkerEnvelope>,
}

impl WorkerSink {
    pub fn new(ip: CameraIp, generation: u64, tx: mpsc::Sender<WorkerEnvelope>) -> Self {
        Self { ip, generation, tx }
    }

    pub fn ip(&self) -> &CameraIp {
        &self.ip
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// `false` once the supervisor is gone.
    pub async fn send(&self, message: WorkerMessage) -> bool {
        self.tx
            .send(WorkerEnvelope {
                ip: self.ip.clone(),
                generation: self.generation,
                message,
            })
            .await
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// Handle and launcher seam
// ---------------------------------------------------------------------------

/// Owning handle to a live worker. Dropping it also terminates the worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pid: Option<u32>,
    terminate: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    pub fn new(pid: Option<u32>, terminate: oneshot::Sender<()>) -> Self {
        Self {
            pid,
            terminate: Some(terminate),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Ask the worker to exit. Returns `false` if it had already gone.
    pub fn terminate(mut self) -> bool {
        self.terminate
            .take()
            .map(|tx| tx.send(()).is_ok())
            .unwrap_or(false)
    }
}

/// Starts workers. Implementations must report every worker's lifecycle
/// through the given sink and finish with exactly one `Exited`.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self, spec: &WorkerSpec, sink: WorkerSink) -> io::Result<WorkerHandle>;
}

// ---------------------------------------------------------------------------
// OS process launcher
// ---------------------------------------------------------------------------

/// Launches `program args.. <launch params>` as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    config: WorkerConfig,
}

impl ProcessLauncher {
    pub fn new(config: WorkerConfig) -> Self {
        Self { config }
    }

    fn command(&self, spec: &WorkerSpec) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.args)
            .args(spec.launch_args(self.config.arg_style))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.config.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, spec: &WorkerSpec, sink: WorkerSink) -> io::Result<WorkerHandle> {
        let mut child = self.command(spec).spawn()?;
        let pid = child.id();

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(read_stdout(stdout, sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(read_stderr(stderr, sink.clone())));
        }

        let (terminate_tx, terminate_rx) = oneshot::channel();
        tokio::spawn(wait_for_exit(child, terminate_rx, readers, sink));

        tracing::info!(ip = %spec.ip, pid = ?pid, program = %self.config.program, "worker spawned");
        Ok(WorkerHandle::new(pid, terminate_tx))
    }
}

async fn read_stdout(mut stream: impl AsyncRead + Unpin, sink: WorkerSink) {
    let mut scanner = StdoutScanner::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let (events, eof) = match stream.read(&mut buf).await {
            Ok(0) => (scanner.finish(), true),
            Ok(n) => (scanner.feed(&buf[..n]), false),
            Err(err) => {
                tracing::warn!(ip = %sink.ip(), error = %err, "worker stdout read failed");
                (scanner.finish(), true)
            }
        };
        for event in events {
            if !sink.send(event.into()).await {
                return;
            }
        }
        if eof {
            return;
        }
    }
}

async fn read_stderr(mut stream: impl AsyncRead + Unpin, sink: WorkerSink) {
    let mut scanner = StderrScanner::new();
    let mut buf = vec![0u8; READ_CHUNK];
    loop {
        let (lines, eof) = match stream.read(&mut buf).await {
            Ok(0) => (scanner.finish().into_iter().collect::<Vec<_>>(), true),
            Ok(n) => (scanner.feed(&buf[..n]), false),
            Err(err) => {
                tracing::warn!(ip = %sink.ip(), error = %err, "worker stderr read failed");
                (scanner.finish().into_iter().collect::<Vec<_>>(), true)
            }
        };
        for (line, class) in lines {
            match class {
                StderrClass::Warning => {
                    tracing::debug!(ip = %sink.ip(), line = %line, "worker warning");
                }
                StderrClass::Error(kind) => {
                    tracing::warn!(ip = %sink.ip(), kind = %kind, line = %line, "worker error");
                    if !sink.send(WorkerMessage::Error { kind, line }).await {
                        return;
                    }
                }
            }
        }
        if eof {
            return;
        }
    }
}

async fn wait_for_exit(
    mut child: Child,
    terminate_rx: oneshot::Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    sink: WorkerSink,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = terminate_rx => {
            if let Err(err) = send_terminate(&mut child) {
                tracing::warn!(ip = %sink.ip(), error = %err, "failed to signal worker");
            }
            match timeout(TERMINATE_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(ip = %sink.ip(), "worker ignored SIGTERM, killing");
                    if let Err(err) = child.start_kill() {
                        tracing::warn!(ip = %sink.ip(), error = %err, "failed to kill worker");
                    }
                    child.wait().await
                }
            }
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(err) => {
            tracing::warn!(ip = %sink.ip(), error = %err, "failed to reap worker");
            None
        }
    };

    for reader in readers {
        let abort = reader.abort_handle();
        if timeout(READER_DRAIN, reader).await.is_err() {
            abort.abort();
        }
    }

    tracing::info!(ip = %sink.ip(), code = ?code, "worker exited");
    sink.send(WorkerMessage::Exited { code }).await;
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return Ok(());
    };
    let pid = i32::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> io::Result<()> {
    child.start_kill()
}
