use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use plategate_core::config::{load_config_at, plategate_root, LogFormat, DEFAULT_DEVICE, DEFAULT_FRAME_RATE};
use plategate_core::{CameraIp, DaemonConfig, DocumentStore, FileStore};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use crate::error::{io_err, ControlError, DaemonError};
use crate::hub::{EventHub, SupervisorEvent};
use crate::paths::{data_dir, socket_path};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::supervisor::{self, resolve_gate, SupervisorHandle, SupervisorSettings};
use crate::worker::{ProcessLauncher, WorkerLauncher, WorkerSpec};

/// Shared state of the socket server and its clients.
#[derive(Clone)]
struct ServerContext {
    home: PathBuf,
    store: Arc<dyn DocumentStore>,
    supervisor: SupervisorHandle,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    let config = load_config_at(home)?;
    init_tracing(config.log_format);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf(), config))
}

/// Run the daemon with the file store and OS worker processes.
pub async fn run(home: PathBuf, config: DaemonConfig) -> Result<(), DaemonError> {
    let store: Arc<dyn DocumentStore> = Arc::new(FileStore::at(&home));
    let launcher: Arc<dyn WorkerLauncher> = Arc::new(ProcessLauncher::new(config.worker.clone()));
    run_with(home, store, launcher, SupervisorSettings::from(&config)).await
}

/// Run the daemon with explicit collaborators.
pub async fn run_with(
    home: PathBuf,
    store: Arc<dyn DocumentStore>,
    launcher: Arc<dyn WorkerLauncher>,
    settings: SupervisorSettings,
) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;
    let started_at_unix = unix_seconds_now();

    let (supervisor, supervisor_task) =
        supervisor::spawn(launcher, store.clone(), EventHub::default(), settings);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let ctx = ServerContext {
            home: home.clone(),
            store,
            supervisor: supervisor.clone(),
            shutdown_tx: shutdown_tx.clone(),
            started_at_unix,
        };
        tokio::spawn(async move {
            let result = socket_server_task(ctx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
                signal = terminate_signal() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received SIGTERM, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("SIGTERM handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (socket_result, signal_result) = tokio::join!(socket_handle, signal_handle);

    supervisor.shutdown().await;
    if let Err(err) = supervisor_task.await {
        tracing::error!(error = %err, "supervisor task failed");
    }

    handle_join("socket_server", socket_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!("daemon stopped");
    Ok(())
}

#[cfg(unix)]
async fn terminate_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    signal(SignalKind::terminate())?.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn terminate_signal() -> std::io::Result<()> {
    std::future::pending().await
}

async fn socket_server_task(
    ctx: ServerContext,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&ctx.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "daemon listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, ctx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(stream: UnixStream, ctx: ServerContext) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => request,
            Err(err) => {
                let response = DaemonResponse::rejected(&ControlError::Invalid(format!(
                    "invalid request JSON: {err}"
                )));
                write_line(&mut writer, &response).await?;
                continue;
            }
        };

        let response = match request {
            DaemonRequest::Status => DaemonResponse::ok(build_status_payload(&ctx).await),
            DaemonRequest::Stop => {
                let _ = ctx.shutdown_tx.send(());
                write_line(&mut writer, &DaemonResponse::ok(json!({ "stopping": true }))).await?;
                break;
            }
            DaemonRequest::CameraStart {
                ip,
                user,
                password,
                device,
                frame_rate,
            } => {
                let spec = spec_from_request(ip, user, password, device, frame_rate);
                let ip = spec.ip.clone();
                match camera_start(&ctx, spec).await {
                    Ok(()) => DaemonResponse::ok(json!({ "ip": ip, "state": "running" })),
                    Err(err) => {
                        tracing::info!(ip = %ip, code = err.code(), error = %err, "camera start failed");
                        DaemonResponse::rejected(&err)
                    }
                }
            }
            DaemonRequest::CameraStop { ip } => {
                let ip = CameraIp::from(ip);
                match ctx.supervisor.stop(&ip).await {
                    Ok(()) => DaemonResponse::ok(json!({ "ip": ip, "stopping": true })),
                    Err(err) => DaemonResponse::rejected(&err),
                }
            }
            DaemonRequest::CameraStatus => match ctx.supervisor.status().await {
                Ok(statuses) => DaemonResponse::ok(json!(statuses)),
                Err(err) => DaemonResponse::rejected(&err),
            },
            DaemonRequest::Performance => match ctx.supervisor.performance().await {
                Ok(samples) => DaemonResponse::ok(json!(samples)),
                Err(err) => DaemonResponse::rejected(&err),
            },
            DaemonRequest::Subscribe => {
                let events = ctx.supervisor.subscribe();
                write_line(&mut writer, &DaemonResponse::ok(json!({ "subscribed": true }))).await?;
                return stream_events(
                    &mut writer,
                    &mut lines,
                    events,
                    ctx.shutdown_tx.subscribe(),
                )
                .await;
            }
        };

        write_line(&mut writer, &response).await?;
    }

    Ok(())
}

fn spec_from_request(
    ip: String,
    user: String,
    password: String,
    device: Option<String>,
    frame_rate: Option<u32>,
) -> WorkerSpec {
    WorkerSpec {
        ip: CameraIp::from(ip.trim()),
        user,
        password,
        device: device
            .filter(|device| !device.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
        frame_rate: frame_rate.unwrap_or(DEFAULT_FRAME_RATE),
    }
}

/// Validate, refuse duplicates, check the camera can reach a gate, then hand
/// over to the supervisor.
async fn camera_start(ctx: &ServerContext, spec: WorkerSpec) -> Result<(), ControlError> {
    spec.validate()?;

    // A live camera answers `conflict` even if its configuration has since gone.
    let tracked = ctx.supervisor.status().await?;
    if tracked
        .iter()
        .any(|camera| camera.ip == spec.ip && camera.state.is_active())
    {
        return Err(ControlError::Conflict(spec.ip));
    }

    let store = Arc::clone(&ctx.store);
    let ip = spec.ip.clone();
    tokio::task::spawn_blocking(move || resolve_gate(store.as_ref(), &ip))
        .await
        .map_err(|err| ControlError::Internal(format!("configuration lookup failed: {err}")))??;

    ctx.supervisor.start(spec).await
}

async fn stream_events(
    writer: &mut OwnedWriteHalf,
    lines: &mut Lines<BufReader<OwnedReadHalf>>,
    mut events: broadcast::Receiver<SupervisorEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            line = lines.next_line() => {
                // Subscribers only listen; EOF or any input ends the stream.
                if !matches!(line, Ok(Some(_))) {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(err) = write_line(writer, &event).await {
                        tracing::debug!(error = %err, "subscriber went away");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "subscriber lagging, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn build_status_payload(ctx: &ServerContext) -> Value {
    let cameras = ctx.supervisor.status().await.map(|s| s.len()).unwrap_or(0);
    json!({
        "running": true,
        "label": crate::paths::DAEMON_LABEL,
        "pid": std::process::id(),
        "started_at_unix": ctx.started_at_unix,
        "cameras": cameras,
        "subscribers": ctx.supervisor.hub().subscriber_count(),
        "socket": socket_path(&ctx.home).display().to_string(),
        "data_dir": data_dir(&ctx.home).display().to_string(),
    })
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [plategate_root(home), data_dir(home)] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

async fn write_line<T: Serialize>(
    writer: &mut OwnedWriteHalf,
    message: &T,
) -> Result<(), DaemonError> {
    let payload = serde_json::to_string(message)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing(format: LogFormat) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);
    let _ = match format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}
