use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plategate_core::{
    CameraIp, CameraSettings, ChannelConfig, Device, DocumentStore, FileStore, PerformanceSample,
    PlateRecord, ProcessState, WorkerErrorKind,
};
use plategate_daemon::gate::{door_open_frame, GateTimeouts, FRAME_LEN};
use plategate_daemon::supervisor::{self, SupervisorHandle, SupervisorSettings};
use plategate_daemon::{
    ControlError, EventHub, SupervisorEvent, WorkerHandle, WorkerLauncher, WorkerMessage,
    WorkerSink, WorkerSpec,
};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const CAMERA: &str = "10.0.0.5";

// ─── Scripted launcher ──────────────────────────────────────────────────────

struct Launch {
    spec: WorkerSpec,
    sink: WorkerSink,
    terminate_rx: oneshot::Receiver<()>,
    terminated: bool,
}

/// Records every launch and hands the test the worker's outbox.
#[derive(Default)]
struct ScriptedLauncher {
    launches: Mutex<Vec<Launch>>,
    failures: AtomicUsize,
}

impl ScriptedLauncher {
    fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    fn count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    fn sink(&self, index: usize) -> WorkerSink {
        self.launches.lock().unwrap()[index].sink.clone()
    }

    fn spec(&self, index: usize) -> WorkerSpec {
        self.launches.lock().unwrap()[index].spec.clone()
    }

    fn terminated(&self, index: usize) -> bool {
        let mut launches = self.launches.lock().unwrap();
        let launch = &mut launches[index];
        if !launch.terminated {
            launch.terminated = launch.terminate_rx.try_recv().is_ok();
        }
        launch.terminated
    }

    async fn wait_for(&self, count: usize) {
        timeout(Duration::from_secs(30), async {
            while self.count() < count {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker launched");
    }
}

impl WorkerLauncher for ScriptedLauncher {
    fn launch(&self, spec: &WorkerSpec, sink: WorkerSink) -> io::Result<WorkerHandle> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }
        let (tx, rx) = oneshot::channel();
        let mut launches = self.launches.lock().unwrap();
        let pid = 1000 + launches.len() as u32;
        launches.push(Launch {
            spec: spec.clone(),
            sink,
            terminate_rx: rx,
            terminated: false,
        });
        Ok(WorkerHandle::new(Some(pid), tx))
    }
}

// ─── Harness ────────────────────────────────────────────────────────────────

struct Harness {
    supervisor: SupervisorHandle,
    launcher: Arc<ScriptedLauncher>,
    events: broadcast::Receiver<SupervisorEvent>,
    store: Arc<FileStore>,
    _home: TempDir,
}

fn settings(retry_delay: Duration, suppression_window: Duration, gate_port: u16) -> SupervisorSettings {
    SupervisorSettings {
        retry_delay,
        suppression_window,
        gate_port,
        gate_timeouts: GateTimeouts {
            connect: Duration::from_secs(2),
            response: Duration::from_secs(2),
        },
    }
}

fn harness(settings: SupervisorSettings) -> Harness {
    let home = TempDir::new().expect("home");
    let store = Arc::new(FileStore::at(home.path()));
    let launcher = Arc::new(ScriptedLauncher::default());
    let hub = EventHub::default();
    let events = hub.subscribe();
    let (supervisor, _task) = supervisor::spawn(launcher.clone(), store.clone(), hub, settings);
    Harness {
        supervisor,
        launcher,
        events,
        store,
        _home: home,
    }
}

fn scripted() -> Harness {
    harness(settings(Duration::from_secs(1), Duration::from_secs(5), 9000))
}

fn ip() -> CameraIp {
    CameraIp::from(CAMERA)
}

fn spec() -> WorkerSpec {
    WorkerSpec::new(CAMERA, "admin", "hunter2")
}

async fn next_event(events: &mut broadcast::Receiver<SupervisorEvent>) -> SupervisorEvent {
    timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("event before timeout")
        .expect("hub open")
}

/// Next event that is not a performance sample.
async fn next_lifecycle_event(events: &mut broadcast::Receiver<SupervisorEvent>) -> SupervisorEvent {
    loop {
        let event = next_event(events).await;
        if !matches!(event, SupervisorEvent::Performance { .. }) {
            return event;
        }
    }
}

fn assert_quiet(events: &mut broadcast::Receiver<SupervisorEvent>) {
    match events.try_recv() {
        Err(broadcast::error::TryRecvError::Empty) => {}
        other => panic!("expected no further events, got {other:?}"),
    }
}

fn spawn_start(supervisor: &SupervisorHandle, spec: WorkerSpec) -> JoinHandle<Result<(), ControlError>> {
    let supervisor = supervisor.clone();
    tokio::spawn(async move { supervisor.start(spec).await })
}

/// Start the camera and confirm startup; returns the launch index.
async fn start_running(h: &mut Harness) -> usize {
    let before = h.launcher.count();
    let pending = spawn_start(&h.supervisor, spec());
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Starting { ip: ip() });
    h.launcher.wait_for(before + 1).await;
    assert!(h.launcher.sink(before).send(WorkerMessage::Started).await);
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Started { ip: ip() });
    pending.await.expect("join").expect("start confirmed");
    before
}

async fn state_of(supervisor: &SupervisorHandle) -> Option<(ProcessState, bool)> {
    supervisor
        .status()
        .await
        .expect("status")
        .into_iter()
        .find(|row| row.ip == ip())
        .map(|row| (row.state, row.retry_pending))
}

// ─── Lifecycle ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn startup_marker_confirms_start() {
    let mut h = scripted();
    let pending = spawn_start(&h.supervisor, spec());

    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Starting { ip: ip() });
    h.launcher.wait_for(1).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Connecting, false)));
    assert!(!pending.is_finished(), "start must wait for the startup marker");

    h.launcher.sink(0).send(WorkerMessage::Started).await;
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Started { ip: ip() });
    pending.await.expect("join").expect("start confirmed");
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));

    // A repeated marker is not a second transition.
    h.launcher.sink(0).send(WorkerMessage::Started).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));
    assert_quiet(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn duplicate_start_is_rejected_without_spawning() {
    let mut h = scripted();
    let _pending = spawn_start(&h.supervisor, spec());
    next_event(&mut h.events).await;
    h.launcher.wait_for(1).await;

    let connecting = h.supervisor.start(spec()).await;
    assert_eq!(connecting, Err(ControlError::Conflict(ip())));

    h.launcher.sink(0).send(WorkerMessage::Started).await;
    next_event(&mut h.events).await;
    let running = h.supervisor.start(spec()).await;
    assert_eq!(running, Err(ControlError::Conflict(ip())));

    assert_eq!(h.launcher.count(), 1);
    assert!(!h.launcher.terminated(0));
    assert_quiet(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn stop_of_untracked_camera_is_not_found() {
    let h = scripted();
    let err = h.supervisor.stop(&ip()).await.unwrap_err();
    assert_eq!(err, ControlError::NotFound(ip()));
    assert_eq!(err.code(), "not_found");
}

#[tokio::test(start_paused = true)]
async fn unexpected_exit_publishes_stopped_and_forgets_camera() {
    let mut h = scripted();
    let index = start_running(&mut h).await;

    h.launcher.sink(index).send(WorkerMessage::Exited { code: Some(1) }).await;
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Stopped { ip: ip() });
    assert!(h.supervisor.status().await.expect("status").is_empty());
}

#[tokio::test(start_paused = true)]
async fn exit_before_startup_fails_pending_start() {
    let mut h = scripted();
    let pending = spawn_start(&h.supervisor, spec());
    next_event(&mut h.events).await;
    h.launcher.wait_for(1).await;

    h.launcher.sink(0).send(WorkerMessage::Exited { code: Some(2) }).await;
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Stopped { ip: ip() });
    assert_eq!(
        pending.await.expect("join"),
        Err(ControlError::WorkerExited(ip()))
    );
}

#[tokio::test(start_paused = true)]
async fn stop_terminates_worker_and_exit_reports_stopped() {
    let mut h = scripted();
    let index = start_running(&mut h).await;

    h.supervisor.stop(&ip()).await.expect("stop");
    assert!(h.launcher.terminated(index));
    assert!(h.supervisor.status().await.expect("status").is_empty());
    assert_quiet(&mut h.events);

    h.launcher.sink(index).send(WorkerMessage::Exited { code: None }).await;
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Stopped { ip: ip() });
}

#[tokio::test(start_paused = true)]
async fn stop_during_connecting_fails_pending_start() {
    let mut h = scripted();
    let pending = spawn_start(&h.supervisor, spec());
    next_event(&mut h.events).await;
    h.launcher.wait_for(1).await;

    h.supervisor.stop(&ip()).await.expect("stop");
    assert_eq!(
        pending.await.expect("join"),
        Err(ControlError::StoppedBeforeStartup(ip()))
    );
}

// ─── Error handling and retry ───────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stream_timeout_retries_once_with_same_credentials() {
    let mut h = scripted();
    let first = start_running(&mut h).await;

    let sink = h.launcher.sink(first);
    sink.send(WorkerMessage::Error {
        kind: WorkerErrorKind::ConnectionTimeout,
        line: "[rtsp] Stream timeout".into(),
    })
    .await;
    assert_eq!(
        next_event(&mut h.events).await,
        SupervisorEvent::Error {
            ip: ip(),
            error_type: WorkerErrorKind::ConnectionTimeout
        }
    );
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Error, true)));
    assert!(h.launcher.terminated(first));

    // Follow-up errors and the expected exit stay silent.
    sink.send(WorkerMessage::Error {
        kind: WorkerErrorKind::NetworkUnreachable,
        line: "Network is unreachable".into(),
    })
    .await;
    sink.send(WorkerMessage::Exited { code: Some(1) }).await;

    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Reconnecting { ip: ip() });
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Starting { ip: ip() });
    h.launcher.wait_for(2).await;
    assert_eq!(h.launcher.count(), 2, "exactly one retry");
    assert_eq!(h.launcher.spec(1), h.launcher.spec(0));
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Connecting, false)));

    h.launcher.sink(1).send(WorkerMessage::Started).await;
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Started { ip: ip() });
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));
}

#[tokio::test(start_paused = true)]
async fn retried_worker_rearms_error_classification() {
    let mut h = scripted();
    let first = start_running(&mut h).await;
    let timeout_error = WorkerMessage::Error {
        kind: WorkerErrorKind::ConnectionTimeout,
        line: "Stream timeout".into(),
    };

    h.launcher.sink(first).send(timeout_error.clone()).await;
    next_event(&mut h.events).await;
    next_event(&mut h.events).await; // reconnecting
    next_event(&mut h.events).await; // starting
    h.launcher.wait_for(2).await;

    h.launcher.sink(1).send(timeout_error).await;
    assert!(matches!(
        next_event(&mut h.events).await,
        SupervisorEvent::Error { .. }
    ));
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Reconnecting { ip: ip() });
    h.launcher.wait_for(3).await;
}

#[tokio::test(start_paused = true)]
async fn unauthorized_never_schedules_retry() {
    let mut h = scripted();
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Error {
            kind: WorkerErrorKind::CredentialsUnauthorized,
            line: "DESCRIBE failed: 401 Unauthorized".into(),
        })
        .await;
    assert_eq!(
        next_event(&mut h.events).await,
        SupervisorEvent::Error {
            ip: ip(),
            error_type: WorkerErrorKind::CredentialsUnauthorized
        }
    );
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Error, false)));
    h.launcher.sink(index).send(WorkerMessage::Exited { code: Some(1) }).await;

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.launcher.count(), 1);
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Error, false)));
    assert_quiet(&mut h.events);

    h.supervisor.stop(&ip()).await.expect("stop");
    assert!(h.supervisor.status().await.expect("status").is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_retry() {
    let mut h = scripted();
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Error {
            kind: WorkerErrorKind::NetworkUnreachable,
            line: "unreachable".into(),
        })
        .await;
    next_event(&mut h.events).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Error, true)));

    h.supervisor.stop(&ip()).await.expect("stop");
    sleep(Duration::from_secs(10)).await;

    assert_eq!(h.launcher.count(), 1, "no retry after stop");
    assert_quiet(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn start_replaces_errored_camera() {
    let mut h = scripted();
    let index = start_running(&mut h).await;
    h.launcher
        .sink(index)
        .send(WorkerMessage::Error {
            kind: WorkerErrorKind::CredentialsUnauthorized,
            line: "401".into(),
        })
        .await;
    next_event(&mut h.events).await;

    let replacement = start_running(&mut h).await;
    assert_eq!(replacement, 1);

    // The replaced worker's exit belongs to an older generation.
    h.launcher.sink(index).send(WorkerMessage::Exited { code: Some(1) }).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));
    assert_quiet(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn spawn_failure_is_other_error_with_retry() {
    let mut h = scripted();
    h.launcher.fail_next(1);

    let outcome = h.supervisor.start(spec()).await;
    assert_eq!(
        outcome,
        Err(ControlError::WorkerFailed {
            ip: ip(),
            kind: WorkerErrorKind::OtherError
        })
    );
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Starting { ip: ip() });
    assert_eq!(
        next_event(&mut h.events).await,
        SupervisorEvent::Error {
            ip: ip(),
            error_type: WorkerErrorKind::OtherError
        }
    );
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Error, true)));

    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Reconnecting { ip: ip() });
    assert_eq!(next_event(&mut h.events).await, SupervisorEvent::Starting { ip: ip() });
    h.launcher.wait_for(1).await;
    assert_eq!(h.launcher.spec(0), spec());
}

#[tokio::test(start_paused = true)]
async fn superseded_worker_output_is_ignored() {
    let mut h = scripted();
    let first = start_running(&mut h).await;
    h.launcher
        .sink(first)
        .send(WorkerMessage::Error {
            kind: WorkerErrorKind::ConnectionTimeout,
            line: "Stream timeout".into(),
        })
        .await;
    next_event(&mut h.events).await; // error
    next_event(&mut h.events).await; // reconnecting
    next_event(&mut h.events).await; // starting
    h.launcher.wait_for(2).await;

    h.launcher.sink(first).send(WorkerMessage::Started).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Connecting, false)));
    assert_quiet(&mut h.events);
}

#[tokio::test(start_paused = true)]
async fn shutdown_terminates_workers_and_retries() {
    let mut h = scripted();
    let index = start_running(&mut h).await;

    h.supervisor.shutdown().await;
    assert!(h.launcher.terminated(index));
    assert!(h.supervisor.status().await.is_err(), "actor is gone");
}

#[tokio::test(start_paused = true)]
async fn performance_samples_are_published_and_kept() {
    let mut h = scripted();
    let index = start_running(&mut h).await;
    let sample = PerformanceSample {
        avg_fps: 14.5,
        cpu_usage: 37.2,
        ram_usage: 61.0,
        gpu_usage: 0.0,
        gpu_memory_usage: 3.25,
    };

    h.launcher.sink(index).send(WorkerMessage::Performance(sample)).await;
    assert_eq!(
        next_event(&mut h.events).await,
        SupervisorEvent::performance(ip(), sample)
    );

    h.supervisor.stop(&ip()).await.expect("stop");
    let samples = h.supervisor.performance().await.expect("performance");
    assert_eq!(samples.get(&ip()), Some(&sample));
}

// ─── Detections (real time: store reads and gate sessions do real I/O) ─────

struct GatePeer {
    port: u16,
    frames: mpsc::UnboundedReceiver<[u8; FRAME_LEN]>,
}

async fn gate_peer() -> GatePeer {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind gate");
    let port = listener.local_addr().expect("addr").port();
    let (tx, frames) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut frame = [0u8; FRAME_LEN];
                if socket.read_exact(&mut frame).await.is_ok() {
                    let _ = socket.write_all(&[0x06]).await;
                    let _ = tx.send(frame);
                }
            });
        }
    });
    GatePeer { port, frames }
}

fn seed_store(store: &FileStore) {
    store
        .replace_plates(&[
            PlateRecord {
                owner_name: "Carla Mendes".into(),
                group: "B".into(),
                unit: "7".into(),
                devices: vec![Device {
                    plate: "XYZ9876".into(),
                    make: "Fiat".into(),
                    model: "Uno".into(),
                    color: "red".into(),
                }],
            },
            PlateRecord {
                owner_name: "Ana Souza".into(),
                group: "A".into(),
                unit: "12".into(),
                devices: vec![Device {
                    plate: "ABC1134".into(),
                    make: "Toyota".into(),
                    model: "Corolla".into(),
                    color: "silver".into(),
                }],
            },
        ])
        .expect("plates");
    store
        .replace_cameras(&[CameraSettings {
            ip: ip(),
            name: Some("north gate".into()),
            channel_occupied: "chan2".into(),
        }])
        .expect("cameras");
    store
        .replace_gate_channels(&[ChannelConfig {
            channel: 2,
            controller_address: "127.0.0.1".into(),
            receptor_id: 3,
            door_id: 2,
        }])
        .expect("gates");
}

async fn next_detection(events: &mut broadcast::Receiver<SupervisorEvent>) -> SupervisorEvent {
    loop {
        let event = next_lifecycle_event(events).await;
        if matches!(event, SupervisorEvent::Detection { .. }) {
            return event;
        }
    }
}

async fn next_frame(peer: &mut GatePeer) -> [u8; FRAME_LEN] {
    timeout(Duration::from_secs(5), peer.frames.recv())
        .await
        .expect("gate frame before timeout")
        .expect("gate peer running")
}

#[tokio::test]
async fn one_edit_match_records_event_and_opens_gate() {
    let mut peer = gate_peer().await;
    let mut h = harness(settings(Duration::from_secs(60), Duration::from_secs(5), peer.port));
    seed_store(&h.store);
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Plate("ABC1234".into()))
        .await;

    let SupervisorEvent::Detection { ip: camera, access_event } = next_detection(&mut h.events).await
    else {
        unreachable!()
    };
    assert_eq!(camera, ip());
    assert_eq!(access_event.detected_plate, "ABC1234");
    assert_eq!(access_event.channel_number, Some(2));
    assert_eq!(access_event.customer_info.unit, "12");
    assert_eq!(access_event.customer_info.group, "A");
    assert_eq!(access_event.customer_info.plate, "ABC1134");

    assert_eq!(next_frame(&mut peer).await, door_open_frame(3, 2));
    let stored = h.store.events().expect("events");
    assert_eq!(stored, vec![access_event]);
}

#[tokio::test]
async fn detections_inside_suppression_window_are_dropped() {
    let window = Duration::from_millis(400);
    let mut peer = gate_peer().await;
    let mut h = harness(settings(Duration::from_secs(60), window, peer.port));
    seed_store(&h.store);
    let index = start_running(&mut h).await;
    let sink = h.launcher.sink(index);

    sink.send(WorkerMessage::Plate("ABC1134".into())).await;
    sink.send(WorkerMessage::Plate("ABC1134".into())).await;
    next_detection(&mut h.events).await;
    next_frame(&mut peer).await;

    sleep(Duration::from_millis(150)).await;
    assert_quiet(&mut h.events);
    assert!(peer.frames.try_recv().is_err(), "one gate call per window");
    assert_eq!(h.store.events().expect("events").len(), 1);

    sleep(window).await;
    sink.send(WorkerMessage::Plate("ABC1134".into())).await;
    next_detection(&mut h.events).await;
    next_frame(&mut peer).await;
    assert_eq!(h.store.events().expect("events").len(), 2);
}

#[tokio::test]
async fn unregistered_plate_is_reported_not_recorded() {
    let mut h = harness(settings(Duration::from_secs(60), Duration::from_secs(5), 9000));
    seed_store(&h.store);
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Plate("QQQ0000".into()))
        .await;
    assert_eq!(
        next_lifecycle_event(&mut h.events).await,
        SupervisorEvent::PlateNotFound {
            ip: ip(),
            plate: "QQQ0000".into()
        }
    );
    assert!(h.store.events().expect("events").is_empty());
}

#[tokio::test]
async fn gate_failure_leaves_camera_running() {
    let closed = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = closed.local_addr().expect("addr").port();
    drop(closed);

    let mut h = harness(settings(Duration::from_secs(60), Duration::from_secs(5), port));
    seed_store(&h.store);
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Plate("ABC1234".into()))
        .await;
    next_detection(&mut h.events).await;

    sleep(Duration::from_millis(200)).await;
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));
    assert_quiet(&mut h.events);
    assert_eq!(h.store.events().expect("events").len(), 1);
}

#[tokio::test]
async fn missing_gate_configuration_still_records_detection() {
    let mut h = harness(settings(Duration::from_secs(60), Duration::from_secs(5), 9000));
    seed_store(&h.store);
    h.store.replace_gate_channels(&[]).expect("clear gates");
    let index = start_running(&mut h).await;

    h.launcher
        .sink(index)
        .send(WorkerMessage::Plate("ABC1234".into()))
        .await;
    let SupervisorEvent::Detection { access_event, .. } = next_detection(&mut h.events).await else {
        unreachable!()
    };
    assert_eq!(access_event.channel_number, Some(2));
    assert_eq!(state_of(&h.supervisor).await, Some((ProcessState::Running, false)));
}
