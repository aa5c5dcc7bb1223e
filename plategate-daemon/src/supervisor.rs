//! Per-camera process supervision.
//!
//! A single actor task owns the camera table. Control requests, worker output
//! and timer callbacks are all messages on its inboxes, so every mutation of a
//! [`CameraProcess`] is serialized without locks. Anything slow (store reads,
//! appending access events, gate sessions) runs in a spawned task that reports
//! back by message or, for gate sessions, not at all.
//!
//! ```text
//! stopped ──start──► connecting ──marker──► running
//!                      ▲    │                  │
//!                retry │    └──── stderr ──────┤
//!                      └──────── error ◄───────┘
//! ```
//!
//! An unexpected exit from `connecting` or `running` removes the entry and
//! publishes `stopped`; an exit while in `error` is silent.
//!
//! Each launch gets a fresh generation number. Messages from an older
//! generation are ignored, so a replaced worker can never move the state of
//! its successor.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use plategate_core::matcher::find_match;
use plategate_core::{
    AccessEvent, CameraIp, ChannelConfig, CustomerInfo, DaemonConfig, DocumentStore,
    PerformanceSample, ProcessState, WorkerErrorKind,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ControlError;
use crate::gate::{open_door, DoorOpen, GateTimeouts};
use crate::hub::{EventHub, SupervisorEvent};
use crate::worker::{WorkerEnvelope, WorkerHandle, WorkerLauncher, WorkerMessage, WorkerSink, WorkerSpec};

const COMMAND_QUEUE: usize = 64;
const WORKER_QUEUE: usize = 1024;

/// Timing and gate parameters the supervisor runs with.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub retry_delay: Duration,
    pub suppression_window: Duration,
    pub gate_port: u16,
    pub gate_timeouts: GateTimeouts,
}

impl From<&DaemonConfig> for SupervisorSettings {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            retry_delay: config.retry_delay(),
            suppression_window: config.suppression_window(),
            gate_port: config.gate.port,
            gate_timeouts: GateTimeouts::from(&config.gate),
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

/// One row of `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraStatus {
    pub ip: CameraIp,
    pub state: ProcessState,
    pub retry_pending: bool,
}

// ---------------------------------------------------------------------------
// Gate routing
// ---------------------------------------------------------------------------

/// Camera → occupied channel.
pub fn lookup_channel(store: &dyn DocumentStore, ip: &CameraIp) -> Result<u8, ControlError> {
    let camera = store
        .find_camera(ip)
        .map_err(|err| ControlError::Internal(err.to_string()))?
        .ok_or_else(|| ControlError::ConfigurationMissing(format!("no camera settings for {ip}")))?;
    camera.channel_number().ok_or_else(|| {
        ControlError::ConfigurationMissing(format!(
            "camera {ip} occupies unknown channel '{}'",
            camera.channel_occupied
        ))
    })
}

/// Channel → gate parameters.
pub fn lookup_gate(store: &dyn DocumentStore, channel: u8) -> Result<ChannelConfig, ControlError> {
    store
        .find_gate_channel(channel)
        .map_err(|err| ControlError::Internal(err.to_string()))?
        .ok_or_else(|| {
            ControlError::ConfigurationMissing(format!("no gate configuration for channel {channel}"))
        })
}

/// Both lookups in sequence, as done before accepting a start request.
pub fn resolve_gate(store: &dyn DocumentStore, ip: &CameraIp) -> Result<ChannelConfig, ControlError> {
    let channel = lookup_channel(store, ip)?;
    lookup_gate(store, channel)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        spec: WorkerSpec,
        respond_to: Reply<Result<(), ControlError>>,
    },
    Stop {
        ip: CameraIp,
        respond_to: Reply<Result<(), ControlError>>,
    },
    Status {
        respond_to: Reply<Vec<CameraStatus>>,
    },
    Performance {
        respond_to: Reply<BTreeMap<CameraIp, PerformanceSample>>,
    },
    Shutdown {
        respond_to: Reply<()>,
    },
}

enum Internal {
    RetryFired {
        ip: CameraIp,
        token: u64,
    },
    PlateResolved {
        ip: CameraIp,
        detected: String,
        customer: Option<CustomerInfo>,
    },
}

/// Cloneable client of the supervisor actor.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
    hub: EventHub,
}

impl SupervisorHandle {
    /// Resolves once the worker confirms startup, or with the reason it did not.
    pub async fn start(&self, spec: WorkerSpec) -> Result<(), ControlError> {
        self.request(|respond_to| Command::Start { spec, respond_to })
            .await?
    }

    pub async fn stop(&self, ip: &CameraIp) -> Result<(), ControlError> {
        let ip = ip.clone();
        self.request(|respond_to| Command::Stop { ip, respond_to })
            .await?
    }

    /// Tracked cameras, sorted by IP.
    pub async fn status(&self) -> Result<Vec<CameraStatus>, ControlError> {
        self.request(|respond_to| Command::Status { respond_to }).await
    }

    pub async fn performance(&self) -> Result<BTreeMap<CameraIp, PerformanceSample>, ControlError> {
        self.request(|respond_to| Command::Performance { respond_to })
            .await
    }

    /// Terminate every worker and cancel every retry, then stop the actor.
    pub async fn shutdown(&self) {
        if self
            .request(|respond_to| Command::Shutdown { respond_to })
            .await
            .is_err()
        {
            tracing::debug!("supervisor already stopped");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.hub.subscribe()
    }

    pub fn hub(&self) -> &EventHub {
        &self.hub
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, ControlError> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(build(tx))
            .await
            .map_err(|_| ControlError::Internal("supervisor is not running".to_string()))?;
        rx.await
            .map_err(|_| ControlError::Internal("supervisor dropped the request".to_string()))
    }
}

/// Spawn the supervisor actor on the current runtime.
pub fn spawn(
    launcher: Arc<dyn WorkerLauncher>,
    store: Arc<dyn DocumentStore>,
    hub: EventHub,
    settings: SupervisorSettings,
) -> (SupervisorHandle, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
    let (worker_tx, worker_rx) = mpsc::channel(WORKER_QUEUE);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let supervisor = Supervisor {
        launcher,
        store,
        hub: hub.clone(),
        settings,
        cameras: BTreeMap::new(),
        performance: BTreeMap::new(),
        detached: HashSet::new(),
        next_generation: 0,
        next_retry_token: 0,
        worker_tx,
        internal_tx,
    };
    let task = tokio::spawn(supervisor.run(command_rx, worker_rx, internal_rx));
    (SupervisorHandle { tx: command_tx, hub }, task)
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct RetryTimer {
    token: u64,
    task: JoinHandle<()>,
}

struct CameraProcess {
    spec: WorkerSpec,
    state: ProcessState,
    has_error: bool,
    last_detection_at: Option<Instant>,
    retry: Option<RetryTimer>,
    worker: Option<WorkerHandle>,
    generation: u64,
    /// The caller of the initial `start`, until startup is confirmed or fails.
    pending_start: Option<Reply<Result<(), ControlError>>>,
}

impl CameraProcess {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.task.abort();
        }
    }

    fn terminate_worker(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                worker.terminate();
                true
            }
            None => false,
        }
    }

    fn answer_start(&mut self, outcome: Result<(), ControlError>) {
        if let Some(respond_to) = self.pending_start.take() {
            let _ = respond_to.send(outcome);
        }
    }
}

struct Supervisor {
    launcher: Arc<dyn WorkerLauncher>,
    store: Arc<dyn DocumentStore>,
    hub: EventHub,
    settings: SupervisorSettings,
    cameras: BTreeMap<CameraIp, CameraProcess>,
    /// Latest sample per camera; outlives the camera entry.
    performance: BTreeMap<CameraIp, PerformanceSample>,
    /// Generations removed by `stop` whose exit has not been seen yet.
    detached: HashSet<u64>,
    next_generation: u64,
    next_retry_token: u64,
    worker_tx: mpsc::Sender<WorkerEnvelope>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl Supervisor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut worker_rx: mpsc::Receiver<WorkerEnvelope>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { respond_to }) => {
                        self.shutdown();
                        let _ = respond_to.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown();
                        break;
                    }
                },
                Some(envelope) = worker_rx.recv() => self.handle_worker(envelope),
                Some(internal) = internal_rx.recv() => self.handle_internal(internal),
            }
        }
        tracing::info!("supervisor stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { spec, respond_to } => self.start(spec, respond_to),
            Command::Stop { ip, respond_to } => {
                let _ = respond_to.send(self.stop(&ip));
            }
            Command::Status { respond_to } => {
                let _ = respond_to.send(self.status());
            }
            Command::Performance { respond_to } => {
                let _ = respond_to.send(self.performance.clone());
            }
            Command::Shutdown { respond_to } => {
                self.shutdown();
                let _ = respond_to.send(());
            }
        }
    }

    fn handle_worker(&mut self, envelope: WorkerEnvelope) {
        let WorkerEnvelope {
            ip,
            generation,
            message,
        } = envelope;

        let current = self
            .cameras
            .get(&ip)
            .is_some_and(|process| process.generation == generation);
        if !current {
            if matches!(message, WorkerMessage::Exited { .. }) {
                self.detached_exit(&ip, generation);
            }
            return;
        }

        match message {
            WorkerMessage::Started => self.on_started(&ip),
            WorkerMessage::Plate(plate) => self.on_plate(&ip, plate),
            WorkerMessage::Performance(sample) => {
                self.performance.insert(ip.clone(), sample);
                self.hub.publish(SupervisorEvent::performance(ip, sample));
            }
            WorkerMessage::Error { kind, .. } => self.on_error(&ip, kind),
            WorkerMessage::Exited { code } => self.on_exit(&ip, code),
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::RetryFired { ip, token } => self.on_retry(&ip, token),
            Internal::PlateResolved {
                ip,
                detected,
                customer,
            } => self.on_plate_resolved(ip, detected, customer),
        }
    }

    // -- control operations -------------------------------------------------

    fn start(&mut self, spec: WorkerSpec, respond_to: Reply<Result<(), ControlError>>) {
        let ip = spec.ip.clone();

        // Only an errored entry can be replaced; its detection clock carries over.
        let mut last_detection_at = None;
        if let Some(existing) = self.cameras.get(&ip) {
            if existing.state.is_active() {
                tracing::info!(ip = %ip, state = %existing.state, "start rejected");
                let _ = respond_to.send(Err(ControlError::Conflict(ip)));
                return;
            }
        }
        if let Some(mut previous) = self.cameras.remove(&ip) {
            previous.cancel_retry();
            previous.terminate_worker();
            last_detection_at = previous.last_detection_at;
        }

        self.cameras.insert(
            ip.clone(),
            CameraProcess {
                spec,
                state: ProcessState::Connecting,
                has_error: false,
                last_detection_at,
                retry: None,
                worker: None,
                generation: 0,
                pending_start: Some(respond_to),
            },
        );
        self.launch(&ip);
    }

    fn stop(&mut self, ip: &CameraIp) -> Result<(), ControlError> {
        let mut process = self
            .cameras
            .remove(ip)
            .ok_or_else(|| ControlError::NotFound(ip.clone()))?;

        process.cancel_retry();
        if process.terminate_worker() {
            self.detached.insert(process.generation);
        }
        process.answer_start(Err(ControlError::StoppedBeforeStartup(ip.clone())));
        tracing::info!(ip = %ip, "camera stopped");
        Ok(())
    }

    fn status(&self) -> Vec<CameraStatus> {
        self.cameras
            .iter()
            .map(|(ip, process)| CameraStatus {
                ip: ip.clone(),
                state: process.state,
                retry_pending: process.retry.is_some(),
            })
            .collect()
    }

    fn shutdown(&mut self) {
        for (ip, mut process) in std::mem::take(&mut self.cameras) {
            process.cancel_retry();
            process.terminate_worker();
            process.answer_start(Err(ControlError::StoppedBeforeStartup(ip)));
        }
        self.detached.clear();
    }

    // -- lifecycle ----------------------------------------------------------

    /// Publish `starting` and spawn a worker for an existing entry.
    fn launch(&mut self, ip: &CameraIp) {
        self.next_generation += 1;
        let generation = self.next_generation;

        let Some(process) = self.cameras.get_mut(ip) else {
            return;
        };
        process.generation = generation;
        process.state = ProcessState::Connecting;
        self.hub
            .publish(SupervisorEvent::Starting { ip: ip.clone() });

        let sink = WorkerSink::new(ip.clone(), generation, self.worker_tx.clone());
        match self.launcher.launch(&process.spec, sink) {
            Ok(worker) => {
                tracing::info!(ip = %ip, generation, pid = ?worker.pid(), "worker launched");
                process.worker = Some(worker);
            }
            Err(err) => {
                tracing::error!(ip = %ip, error = %err, "failed to spawn worker");
                self.on_error(ip, WorkerErrorKind::OtherError);
            }
        }
    }

    fn on_started(&mut self, ip: &CameraIp) {
        let Some(process) = self.cameras.get_mut(ip) else {
            return;
        };
        if process.state != ProcessState::Connecting {
            return;
        }
        process.state = ProcessState::Running;
        process.answer_start(Ok(()));
        tracing::info!(ip = %ip, "camera running");
        self.hub.publish(SupervisorEvent::Started { ip: ip.clone() });
    }

    fn on_error(&mut self, ip: &CameraIp, kind: WorkerErrorKind) {
        let Some(process) = self.cameras.get_mut(ip) else {
            return;
        };

        if !process.has_error {
            process.has_error = true;
            process.state = ProcessState::Error;
            tracing::warn!(ip = %ip, error_type = %kind, "camera entered error state");
            self.hub.publish(SupervisorEvent::Error {
                ip: ip.clone(),
                error_type: kind,
            });
            process.answer_start(Err(ControlError::WorkerFailed {
                ip: ip.clone(),
                kind,
            }));

            if kind.is_retryable() && process.retry.is_none() {
                self.next_retry_token += 1;
                process.retry = Some(schedule_retry(
                    ip.clone(),
                    self.next_retry_token,
                    self.settings.retry_delay,
                    self.internal_tx.clone(),
                ));
                tracing::info!(ip = %ip, delay_ms = self.settings.retry_delay.as_millis() as u64, "retry scheduled");
            }
        }

        process.terminate_worker();
    }

    fn on_exit(&mut self, ip: &CameraIp, code: Option<i32>) {
        let Some(process) = self.cameras.get_mut(ip) else {
            return;
        };
        process.worker = None;
        if process.state == ProcessState::Error {
            tracing::debug!(ip = %ip, code = ?code, "worker exited after error");
            return;
        }

        if let Some(mut process) = self.cameras.remove(ip) {
            process.cancel_retry();
            process.answer_start(Err(ControlError::WorkerExited(ip.clone())));
        }
        tracing::warn!(ip = %ip, code = ?code, "worker exited unexpectedly");
        self.hub.publish(SupervisorEvent::Stopped { ip: ip.clone() });
    }

    fn detached_exit(&mut self, ip: &CameraIp, generation: u64) {
        if self.detached.remove(&generation) && !self.cameras.contains_key(ip) {
            self.hub.publish(SupervisorEvent::Stopped { ip: ip.clone() });
        }
    }

    fn on_retry(&mut self, ip: &CameraIp, token: u64) {
        let Some(process) = self.cameras.get_mut(ip) else {
            return;
        };
        if process.retry.as_ref().map(|retry| retry.token) != Some(token) {
            return;
        }
        process.retry = None;
        process.has_error = false;
        tracing::info!(ip = %ip, "reconnecting");
        self.hub
            .publish(SupervisorEvent::Reconnecting { ip: ip.clone() });
        self.launch(ip);
    }

    // -- detections ---------------------------------------------------------

    fn on_plate(&mut self, ip: &CameraIp, detected: String) {
        let store = Arc::clone(&self.store);
        let internal_tx = self.internal_tx.clone();
        let ip = ip.clone();

        tokio::spawn(async move {
            let lookup = {
                let detected = detected.clone();
                tokio::task::spawn_blocking(move || {
                    let registry = store.plates()?;
                    Ok::<_, plategate_core::StoreError>(
                        find_match(&detected, &registry)
                            .map(|found| CustomerInfo::from_match(found.record, found.device)),
                    )
                })
                .await
            };
            let customer = match lookup {
                Ok(Ok(customer)) => customer,
                Ok(Err(err)) => {
                    tracing::error!(ip = %ip, error = %err, "plate registry read failed");
                    return;
                }
                Err(err) => {
                    tracing::error!(ip = %ip, error = %err, "plate match task failed");
                    return;
                }
            };
            let _ = internal_tx.send(Internal::PlateResolved {
                ip,
                detected,
                customer,
            });
        });
    }

    fn on_plate_resolved(&mut self, ip: CameraIp, detected: String, customer: Option<CustomerInfo>) {
        let Some(process) = self.cameras.get_mut(&ip) else {
            return;
        };

        let Some(customer) = customer else {
            tracing::info!(ip = %ip, plate = %detected, "plate not registered");
            self.hub
                .publish(SupervisorEvent::PlateNotFound { ip, plate: detected });
            return;
        };

        let now = Instant::now();
        if let Some(last) = process.last_detection_at {
            if now.duration_since(last) < self.settings.suppression_window {
                tracing::info!(ip = %ip, plate = %detected, "detection suppressed");
                return;
            }
        }
        process.last_detection_at = Some(now);

        tokio::spawn(record_detection(
            Arc::clone(&self.store),
            self.hub.clone(),
            self.settings.clone(),
            ip,
            detected,
            customer,
        ));
    }
}

fn schedule_retry(
    ip: CameraIp,
    token: u64,
    delay: Duration,
    internal_tx: mpsc::UnboundedSender<Internal>,
) -> RetryTimer {
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = internal_tx.send(Internal::RetryFired { ip, token });
    });
    RetryTimer { token, task }
}

/// Persist, publish and open the gate for one accepted detection.
async fn record_detection(
    store: Arc<dyn DocumentStore>,
    hub: EventHub,
    settings: SupervisorSettings,
    ip: CameraIp,
    detected: String,
    customer: CustomerInfo,
) {
    let timestamp = Utc::now();
    let task_ip = ip.clone();
    let persisted = tokio::task::spawn_blocking(move || {
        let channel = lookup_channel(store.as_ref(), &task_ip);
        let gate = match &channel {
            Ok(channel) => lookup_gate(store.as_ref(), *channel),
            Err(err) => Err(err.clone()),
        };
        let event = AccessEvent {
            channel_number: channel.ok(),
            camera_ip: task_ip,
            detected_plate: detected,
            customer_info: customer,
            timestamp,
        };
        let appended = store.append_event(&event);
        (event, gate, appended)
    })
    .await;

    let (event, gate, appended) = match persisted {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(ip = %ip, error = %err, "detection task failed");
            return;
        }
    };
    if let Err(err) = appended {
        tracing::error!(ip = %ip, error = %err, "failed to persist access event");
    }

    tracing::info!(
        ip = %ip,
        plate = %event.detected_plate,
        registered = %event.customer_info.plate,
        unit = %event.customer_info.unit,
        "access granted",
    );
    hub.publish(SupervisorEvent::Detection {
        ip: ip.clone(),
        access_event: event,
    });

    let gate = match gate {
        Ok(gate) => gate,
        Err(err) => {
            tracing::error!(ip = %ip, error = %err, "door not opened");
            return;
        }
    };
    let request = DoorOpen {
        address: gate.controller_address,
        port: settings.gate_port,
        receptor_id: gate.receptor_id,
        door_id: gate.door_id,
    };
    tokio::spawn(async move {
        match open_door(&request, settings.gate_timeouts).await {
            Ok(response) => {
                tracing::info!(ip = %ip, bytes = response.len(), "door opened");
            }
            Err(err) => {
                tracing::error!(ip = %ip, error = %err, "door-open failed");
            }
        }
    });
}
