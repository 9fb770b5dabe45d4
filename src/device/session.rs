//! Device session: lifecycle of one capture process
//!
//! A session owns the capture process of a single device and decides when it
//! runs. Attached clients create demand; the session starts the process when
//! demand appears, stops it when the last demanding client leaves, and retries
//! failed starts on a fixed delay until the attempt budget is spent.
//!
//! # Architecture
//!
//! ```text
//!   add_client / set_always_on / restart timer
//!                      │
//!                      ▼
//!   ┌─────────────── start() ────────────────┐
//!   │ 1. render command, spawn (control lock) │
//!   │ 2. probe the data port (no lock)        │
//!   │ 3. settle Running / retry / fail        │
//!   └─────────────────────────────────────────┘
//!                      │
//!                      ▼
//!   notifier thread ──► SessionClient callbacks (in order, outside locks)
//! ```
//!
//! Lock order is `control` before `shared`. Neither is held while client
//! callbacks run.

use crate::config::{
    value_as_u64, ConfigChanges, DeviceConfig, Layer, ProfileConfig, Properties, PropertyStore,
    RetryConfig, StartupConfig, SubscriptionId,
};
use crate::device::client::{same_client, SessionClient};
use crate::device::command::CommandTemplate;
use crate::device::port::available_port;
use crate::device::probe::{wait_until_ready, ProbeOutcome, ProbeSchedule, ReadinessProbe, TcpProbe};
use crate::device::profile::ProfileCarousel;
use crate::device::restart::DelayedTask;
use crate::device::source::SourceHub;
use crate::device::state::{BusyState, ClientClass, SourceState};
use crate::error::{Result, ResultExt, RxError};
use crate::pipeline::conduit::lock;
use crate::pipeline::ConduitId;
use crate::process::{ChildProcess, ProcessExit, SpawnOptions};
use crate::types::Block;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::ThreadId;
use std::time::Duration;

/// Longest wait in [`DeviceSession::flush_notifications`]
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

// ==================== Hooks ====================

/// Device specific steps around the capture process.
pub trait SessionHooks: Send + Sync {
    /// Runs before every spawn. Errors are logged and the start continues.
    fn pre_start(&self, _values: &Properties) -> Result<()> {
        Ok(())
    }

    /// Runs once the data port accepts connections. An error fails the attempt.
    fn post_start(&self, _port: u16, _values: &Properties) -> Result<()> {
        Ok(())
    }

    /// Forward changes of live keys to the running process.
    fn apply_live_change(&self, _changes: &ConfigChanges) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl SessionHooks for NoHooks {}

// ==================== Reports ====================

/// Status record emitted on every state change and profile switch
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionReport {
    State {
        timestamp: DateTime<Utc>,
        source_id: String,
        source: String,
        state: SourceState,
    },
    Profile {
        timestamp: DateTime<Utc>,
        source_id: String,
        source: String,
        profile_id: String,
        profile: String,
        freq: Option<u64>,
        samplerate: Option<u64>,
    },
}

impl SessionReport {
    pub fn source_id(&self) -> &str {
        match self {
            SessionReport::State { source_id, .. } | SessionReport::Profile { source_id, .. } => source_id,
        }
    }
}

// ==================== Options ====================

/// Collaborators of a session; [`SessionOptions::for_config`] gives the production set.
#[derive(Clone)]
pub struct SessionOptions {
    pub probe: Arc<dyn ReadinessProbe>,
    pub hooks: Arc<dyn SessionHooks>,
    pub reports: Option<Sender<SessionReport>>,
    /// Fixed data port; allocated from the OS when `None`
    pub port: Option<u16>,
}

impl SessionOptions {
    pub fn for_config(config: &DeviceConfig) -> Self {
        Self {
            probe: Arc::new(TcpProbe {
                connect_timeout: config.startup.connect_timeout(),
            }),
            hooks: Arc::new(NoHooks),
            reports: None,
            port: None,
        }
    }

    pub fn with_probe(mut self, probe: impl ReadinessProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    pub fn with_hooks(mut self, hooks: impl SessionHooks + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn with_reports(mut self, reports: Sender<SessionReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }
}

// ==================== Notifications ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Event {
    State(SourceState),
    Busy(BusyState),
    Fail,
    Shutdown,
    Enable,
    Disable,
}

enum Notification {
    Deliver {
        clients: Vec<Arc<dyn SessionClient>>,
        event: Event,
    },
    Barrier(Sender<()>),
}

fn run_notifier(rx: Receiver<Notification>) {
    for notification in rx {
        match notification {
            Notification::Deliver { clients, event } => {
                for client in &clients {
                    match event {
                        Event::State(state) => client.on_state_change(state),
                        Event::Busy(state) => client.on_busy_state_change(state),
                        Event::Fail => client.on_fail(),
                        Event::Shutdown => client.on_shutdown(),
                        Event::Enable => client.on_enable(),
                        Event::Disable => client.on_disable(),
                    }
                }
            }
            Notification::Barrier(ack) => {
                let _ = ack.send(());
            }
        }
    }
}

// ==================== Session ====================

struct Control {
    process: Option<ChildProcess>,
    restart: Option<DelayedTask>,
    /// Identifies the task in `restart`; a timer only launches while it still matches
    restart_seq: u64,
}

struct Shared {
    state: SourceState,
    busy: BusyState,
    failed: bool,
    enabled: bool,
    always_on: bool,
    retry_count: u32,
    restart_pending: bool,
    /// Bumped on every spawn and stop; stale monitors and probes compare against it
    generation: u64,
    clients: Vec<Arc<dyn SessionClient>>,
}

impl Shared {
    fn has_class(&self, class: ClientClass) -> bool {
        self.clients.iter().any(|c| c.client_class() == class)
    }

    fn has_demand(&self) -> bool {
        self.clients.iter().any(|c| c.client_class().creates_demand())
    }
}

enum Launch {
    Running,
    Refused,
    Attempt {
        generation: u64,
        exited: Option<Arc<AtomicBool>>,
    },
}

pub struct DeviceSession {
    id: String,
    name: String,
    template: CommandTemplate,
    /// Template keys whose change needs a fresh process
    spawn_keys: BTreeSet<String>,
    live_keys: Vec<String>,
    retry: RetryConfig,
    startup: StartupConfig,
    port: u16,
    props: PropertyStore,
    carousel: Mutex<ProfileCarousel>,
    control: Mutex<Control>,
    shared: Mutex<Shared>,
    hub: SourceHub,
    probe: Arc<dyn ReadinessProbe>,
    hooks: Arc<dyn SessionHooks>,
    reports: Option<Sender<SessionReport>>,
    notify_tx: Sender<Notification>,
    notifier: ThreadId,
    this: Weak<DeviceSession>,
}

impl DeviceSession {
    pub fn new(config: DeviceConfig) -> Result<Arc<Self>> {
        let options = SessionOptions::for_config(&config);
        Self::with_options(config, options)
    }

    pub fn with_options(config: DeviceConfig, options: SessionOptions) -> Result<Arc<Self>> {
        let port = match options.port {
            Some(port) => port,
            None => available_port().context(format!("allocating data port for {}", config.id))?,
        };

        for warning in config.validate_profiles() {
            tracing::warn!(device = %config.id, "{}", warning);
        }

        let carousel = ProfileCarousel::new(config.profiles.clone());
        let props = PropertyStore::new();

        let mut device_layer = config.properties.clone();
        device_layer.insert("name".to_string(), Value::from(config.display_name()));
        device_layer.insert("device_id".to_string(), Value::from(config.id.clone()));
        props.replace_layer(Layer::Device, device_layer);

        let profile_layer = carousel.layer();
        let center_freq = profile_layer
            .get("center_freq")
            .or_else(|| config.properties.get("center_freq"))
            .cloned()
            .unwrap_or_else(|| Value::from(0u64));
        props.replace_layer(Layer::Profile, profile_layer);
        props.set(Layer::Override, "center_freq", center_freq);

        let mut spawn_keys = config.command.keys();
        if spawn_keys.remove("tuner_freq") {
            spawn_keys.insert("center_freq".to_string());
            spawn_keys.insert("lfo_offset".to_string());
        }
        spawn_keys.remove("port");
        for key in &config.live_keys {
            spawn_keys.remove(key);
        }

        let (notify_tx, notify_rx) = unbounded();
        let notifier = std::thread::Builder::new()
            .name(format!("device-{}-events", config.id))
            .spawn(move || run_notifier(notify_rx))?;
        let notifier = notifier.thread().id();
        let hub = SourceHub::new(format!("device-{}", config.id), config.format);

        let session = Arc::new_cyclic(|this| Self {
            name: config.display_name().to_string(),
            id: config.id,
            template: config.command,
            spawn_keys,
            live_keys: config.live_keys,
            retry: config.retry,
            startup: config.startup,
            port,
            props,
            carousel: Mutex::new(carousel),
            control: Mutex::new(Control {
                process: None,
                restart: None,
                restart_seq: 0,
            }),
            shared: Mutex::new(Shared {
                state: SourceState::Stopped,
                busy: BusyState::Idle,
                failed: false,
                enabled: config.enabled,
                always_on: config.always_on,
                retry_count: 0,
                restart_pending: false,
                generation: 0,
                clients: Vec::new(),
            }),
            hub,
            probe: options.probe,
            hooks: options.hooks,
            reports: options.reports,
            notify_tx,
            notifier,
            this: this.clone(),
        });

        tracing::debug!(device = %session.id, port = session.port, "Session created");
        Ok(session)
    }

    // ── Lifecycle ──

    /// Start the capture process and wait until its data port is ready.
    ///
    /// Returns `true` when the process is running afterwards. Refused while the
    /// device is disabled or written off as failed.
    pub fn start(&self) -> bool {
        self.start_attempt(None)
    }

    /// Timer entry point: launches only if restart `seq` is still scheduled.
    fn start_scheduled(&self, seq: u64) -> bool {
        self.start_attempt(Some(seq))
    }

    fn start_attempt(&self, scheduled: Option<u64>) -> bool {
        let (generation, exited) = match self.launch(scheduled) {
            Launch::Running => return true,
            Launch::Refused => return false,
            Launch::Attempt { generation, exited } => (generation, exited),
        };

        let outcome = match &exited {
            Some(exited) => wait_until_ready(
                self.probe.as_ref(),
                self.port,
                ProbeSchedule::from(&self.startup),
                || exited.load(Ordering::SeqCst),
            ),
            None => ProbeOutcome::Exited,
        };

        self.settle(generation, outcome)
    }

    fn launch(&self, scheduled: Option<u64>) -> Launch {
        let mut control = lock(&self.control);
        if let Some(seq) = scheduled {
            if control.restart.is_none() || control.restart_seq != seq {
                tracing::debug!(device = %self.id, "Scheduled restart was cancelled");
                return Launch::Refused;
            }
        }
        self.cancel_restart(&mut control);

        if let Some(process) = &control.process {
            if !process.has_exited() {
                return Launch::Running;
            }
        }
        if let Some(mut process) = control.process.take() {
            process.wait_timeout(Duration::ZERO);
        }

        {
            let shared = lock(&self.shared);
            if shared.failed {
                tracing::debug!(device = %self.id, "Not starting a failed device");
                return Launch::Refused;
            }
            if !shared.enabled {
                tracing::debug!(device = %self.id, "Not starting a disabled device");
                return Launch::Refused;
            }
        }

        let values = self.command_values();
        if let Err(e) = self.hooks.pre_start(&values) {
            tracing::error!(device = %self.id, "Pre-start hook failed: {}", e);
        }

        let generation = {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            self.set_state_locked(&mut shared, SourceState::Starting);
            shared.generation
        };

        let exited = match self.spawn(&values, generation) {
            Ok(process) => {
                let exited = process.exit_flag();
                control.process = Some(process);
                Some(exited)
            }
            Err(e) => {
                tracing::error!(device = %self.id, "Failed to start capture: {}", e);
                None
            }
        };
        Launch::Attempt { generation, exited }
    }

    fn spawn(&self, values: &Properties, generation: u64) -> Result<ChildProcess> {
        let command = self.template.render(values)?;
        let this = self.this.clone();
        let options = SpawnOptions::new(format!("device-{}", self.id)).with_stop_grace(self.startup.stop_grace());
        let process = ChildProcess::spawn(&command, options, move |exit| {
            if let Some(session) = this.upgrade() {
                session.on_process_exit(generation, exit);
            }
        })
        .map_err(|e| RxError::Process(format!("{}: {}", command, e)))?;
        tracing::info!(device = %self.id, pid = process.pid(), "Started capture: {}", command);
        Ok(process)
    }

    fn settle(&self, generation: u64, outcome: ProbeOutcome) -> bool {
        let mut control = lock(&self.control);
        if lock(&self.shared).generation != generation {
            tracing::debug!(device = %self.id, "Start attempt superseded");
            return false;
        }

        let mut ready = outcome == ProbeOutcome::Ready;
        match outcome {
            ProbeOutcome::Ready => {}
            ProbeOutcome::Exited => tracing::warn!(device = %self.id, "Capture exited during startup"),
            ProbeOutcome::Exhausted => {
                tracing::warn!(device = %self.id, port = self.port, "Data port never became ready")
            }
        }
        if ready {
            if let Err(e) = self.hooks.post_start(self.port, &self.command_values()) {
                tracing::error!(device = %self.id, "Post-start hook failed: {}", e);
                ready = false;
            }
        }
        if ready && control.process.as_ref().map_or(true, ChildProcess::has_exited) {
            ready = false;
        }

        if !ready {
            if let Some(mut process) = control.process.take() {
                process.terminate(self.startup.stop_grace());
            }
        } else if let Err(e) = self.hub.connect(self.port) {
            tracing::warn!(device = %self.id, "Cannot read capture data: {}", e);
        }

        let mut shared = lock(&self.shared);
        shared.retry_count += 1;
        if ready {
            if shared.retry_count > 1 {
                tracing::info!(device = %self.id, "Started after {} attempts", shared.retry_count);
            }
            shared.retry_count = 0;
            self.set_state_locked(&mut shared, SourceState::Running);
            return true;
        }

        self.set_state_locked(&mut shared, SourceState::Stopped);
        if shared.retry_count < self.retry.max_attempts {
            let delay = self.retry.delay();
            tracing::info!(
                device = %self.id,
                "Start attempt {} of {} failed, retrying in {:?}",
                shared.retry_count,
                self.retry.max_attempts,
                delay
            );
            let this = self.this.clone();
            control.restart_seq += 1;
            let seq = control.restart_seq;
            let task = DelayedTask::schedule(&format!("device-{}-restart", self.id), delay, move || {
                if let Some(session) = this.upgrade() {
                    session.start_scheduled(seq);
                }
            });
            match task {
                Ok(task) => {
                    control.restart = Some(task);
                    shared.restart_pending = true;
                }
                Err(e) => {
                    tracing::error!(device = %self.id, "Cannot schedule restart: {}", e);
                    self.fail_locked(&mut shared);
                }
            }
        } else {
            tracing::error!(
                device = %self.id,
                "Giving up after {} failed start attempts",
                shared.retry_count
            );
            self.fail_locked(&mut shared);
        }
        false
    }

    fn on_process_exit(&self, generation: u64, exit: ProcessExit) {
        let mut shared = lock(&self.shared);
        if shared.generation != generation {
            return;
        }
        if shared.state == SourceState::Running {
            tracing::warn!(device = %self.id, "Capture process died: {}", exit);
            self.notify_locked(&shared, Event::Fail);
        } else {
            tracing::debug!(device = %self.id, "Capture process exited: {}", exit);
        }
        self.set_state_locked(&mut shared, SourceState::Stopped);
    }

    /// Stop the capture process, cancelling any pending restart.
    pub fn stop(&self) {
        let mut control = lock(&self.control);
        self.cancel_restart(&mut control);
        self.hub.disconnect();

        let process = control.process.take();
        {
            let mut shared = lock(&self.shared);
            shared.generation += 1;
            if process.as_ref().is_some_and(|p| !p.has_exited()) {
                self.set_state_locked(&mut shared, SourceState::Stopping);
            }
        }

        if let Some(mut process) = process {
            if !process.has_exited() {
                tracing::info!(device = %self.id, pid = process.pid(), "Stopping capture");
            }
            process.terminate(self.startup.stop_grace());
        }

        let mut shared = lock(&self.shared);
        self.set_state_locked(&mut shared, SourceState::Stopped);
    }

    /// Stop the device for good and tell every client.
    pub fn shutdown(&self) {
        tracing::debug!(device = %self.id, "Shutting down");
        self.stop();
        let shared = lock(&self.shared);
        self.notify_locked(&shared, Event::Shutdown);
    }

    /// Stop and start again, e.g. after a spawn-time parameter changed.
    pub fn restart(&self) -> bool {
        self.stop();
        self.start()
    }

    fn cancel_restart(&self, control: &mut Control) {
        if let Some(mut task) = control.restart.take() {
            task.cancel();
        }
        lock(&self.shared).restart_pending = false;
    }

    // ── Clients ──

    /// Attach a client. It immediately receives the current state; demand starts the device.
    pub fn add_client(&self, client: Arc<dyn SessionClient>) {
        let demand = {
            let mut shared = lock(&self.shared);
            if shared.clients.iter().any(|c| same_client(c, &client)) {
                return;
            }
            shared.clients.push(client.clone());
            self.send(Notification::Deliver {
                clients: vec![client],
                event: Event::State(shared.state),
            });

            let has_users = shared.has_class(ClientClass::User);
            if has_users || shared.has_class(ClientClass::Background) {
                let busy = if has_users { BusyState::Busy } else { BusyState::Idle };
                self.set_busy_locked(&mut shared, busy);
                true
            } else {
                false
            }
        };
        if demand {
            self.start();
        }
    }

    /// Detach a client; returns `false` if it was not attached.
    pub fn remove_client(&self, client: &Arc<dyn SessionClient>) -> bool {
        let removed = {
            let mut shared = lock(&self.shared);
            let before = shared.clients.len();
            shared.clients.retain(|c| !same_client(c, client));
            shared.clients.len() != before
        };
        if removed {
            self.check_status();
        }
        removed
    }

    /// Re-evaluate demand after a client changed class or left.
    pub fn check_status(&self) {
        let stop = {
            let mut shared = lock(&self.shared);
            let busy = if shared.has_class(ClientClass::User) {
                BusyState::Busy
            } else {
                BusyState::Idle
            };
            self.set_busy_locked(&mut shared, busy);
            !shared.always_on && !shared.has_demand()
        };
        if stop {
            self.stop();
        }
    }

    pub fn client_count(&self) -> usize {
        lock(&self.shared).clients.len()
    }

    pub fn has_clients(&self, class: ClientClass) -> bool {
        lock(&self.shared).has_class(class)
    }

    // ── Enable / always-on ──

    pub fn set_enabled(&self, enabled: bool) {
        let demand = {
            let mut shared = lock(&self.shared);
            if shared.enabled == enabled && !shared.failed {
                return;
            }
            shared.enabled = enabled;
            shared.failed = false;
            shared.retry_count = 0;
            let event = if enabled { Event::Enable } else { Event::Disable };
            self.notify_locked(&shared, event);
            enabled && (shared.always_on || shared.has_demand())
        };
        tracing::info!(device = %self.id, "Device {}", if enabled { "enabled" } else { "disabled" });
        if !enabled {
            self.stop();
        } else if demand {
            self.start();
        }
    }

    pub fn set_always_on(&self, always_on: bool) {
        {
            let mut shared = lock(&self.shared);
            if shared.always_on == always_on {
                return;
            }
            shared.always_on = always_on;
        }
        if always_on {
            self.start();
        } else {
            self.check_status();
        }
    }

    // ── Profiles and properties ──

    /// Switch the active profile. Unknown ids are logged and ignored.
    pub fn activate_profile(&self, id: &str) -> bool {
        let layer = {
            let mut carousel = lock(&self.carousel);
            if carousel.active_id() == Some(id) {
                return true;
            }
            if !carousel.activate(id) {
                tracing::warn!(device = %self.id, "Unknown profile {:?}", id);
                return false;
            }
            carousel.layer()
        };
        tracing::info!(device = %self.id, profile = id, "Activating profile");
        let changes = self.publish_profile_layer(layer);
        self.apply_changes(&changes);
        self.report_profile();
        true
    }

    /// Add or update a profile; the active profile's values are republished.
    pub fn add_profile(&self, profile: ProfileConfig) {
        let layer = {
            let mut carousel = lock(&self.carousel);
            carousel.upsert(profile);
            carousel.layer()
        };
        let changes = self.publish_profile_layer(layer);
        self.apply_changes(&changes);
    }

    pub fn remove_profile(&self, id: &str) -> Option<ProfileConfig> {
        let (removed, layer) = {
            let mut carousel = lock(&self.carousel);
            let removed = carousel.remove(id)?;
            (removed, carousel.layer())
        };
        let changes = self.publish_profile_layer(layer);
        self.apply_changes(&changes);
        Some(removed)
    }

    fn publish_profile_layer(&self, layer: Properties) -> ConfigChanges {
        let previous = self.props.layer(Layer::Profile).get("center_freq").cloned();
        let center_freq = layer.get("center_freq").cloned();
        let mut changes = self.props.replace_layer(Layer::Profile, layer);
        if let Some(center_freq) = center_freq {
            if previous.as_ref() != Some(&center_freq) {
                changes.merge(self.props.set(Layer::Override, "center_freq", center_freq));
            }
        }
        changes
    }

    /// Retune. Restarts the capture process unless the frequency is a live key.
    pub fn set_center_freq(&self, freq: u64) {
        let changes = self.props.set(Layer::Override, "center_freq", freq);
        self.apply_changes(&changes);
    }

    pub fn set_property(&self, key: &str, value: impl Into<Value>) {
        let changes = self.props.set(Layer::Override, key, value);
        self.apply_changes(&changes);
    }

    fn apply_changes(&self, changes: &ConfigChanges) {
        if changes.is_empty() || !self.is_available() {
            return;
        }
        let restart: Vec<&str> = changes.keys().filter(|k| self.spawn_keys.contains(*k)).collect();
        if !restart.is_empty() {
            tracing::info!(device = %self.id, keys = ?restart, "Restarting capture for new parameters");
            self.restart();
            return;
        }
        let live: Vec<&str> = self.live_keys.iter().map(String::as_str).collect();
        let live = changes.filter(&live);
        if !live.is_empty() {
            if let Err(e) = self.hooks.apply_live_change(&live) {
                tracing::warn!(device = %self.id, "Live change failed: {}", e);
            }
        }
    }

    /// Values a command template renders against: the merged properties plus
    /// `tuner_freq` and `port`.
    pub fn command_values(&self) -> Properties {
        let mut values = self.props.snapshot();
        let as_i64 = |v: &Value| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64));
        let center = values.get("center_freq").and_then(as_i64).unwrap_or(0);
        let lfo = values.get("lfo_offset").and_then(as_i64).unwrap_or(0);
        values.insert("tuner_freq".to_string(), Value::from(center + lfo));
        values.insert("port".to_string(), Value::from(self.port));
        values
    }

    // ── Accessors ──

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> SourceState {
        lock(&self.shared).state
    }

    /// State for display: a device waiting for its next attempt shows as `Starting`.
    pub fn display_state(&self) -> SourceState {
        let shared = lock(&self.shared);
        if shared.restart_pending && shared.state == SourceState::Stopped {
            SourceState::Starting
        } else {
            shared.state
        }
    }

    pub fn busy_state(&self) -> BusyState {
        lock(&self.shared).busy
    }

    pub fn is_failed(&self) -> bool {
        lock(&self.shared).failed
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.shared).enabled
    }

    pub fn is_always_on(&self) -> bool {
        lock(&self.shared).always_on
    }

    pub fn retry_count(&self) -> u32 {
        lock(&self.shared).retry_count
    }

    pub fn is_restart_pending(&self) -> bool {
        lock(&self.shared).restart_pending
    }

    /// The capture process is alive
    pub fn is_available(&self) -> bool {
        lock(&self.control)
            .process
            .as_ref()
            .is_some_and(|p| !p.has_exited())
    }

    pub fn props(&self) -> &PropertyStore {
        &self.props
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&ConfigChanges) + Send + Sync + 'static,
    {
        self.props.subscribe(callback)
    }

    pub fn center_freq(&self) -> Option<u64> {
        self.props.get_u64("center_freq")
    }

    pub fn sample_rate(&self) -> Option<u64> {
        self.props.get_u64("samp_rate")
    }

    pub fn profile_id(&self) -> Option<String> {
        lock(&self.carousel).active_id().map(str::to_string)
    }

    pub fn profiles(&self) -> Vec<ProfileConfig> {
        lock(&self.carousel).profiles().to_vec()
    }

    pub fn hub(&self) -> &SourceHub {
        &self.hub
    }

    /// Conduit fed with the capture data while the device runs
    pub fn subscribe_data(&self, capacity: usize) -> (ConduitId, Receiver<Block>) {
        self.hub.subscribe(capacity)
    }

    /// Wait until every callback queued so far has been delivered.
    ///
    /// Returns immediately when called from a client callback.
    pub fn flush_notifications(&self) {
        if std::thread::current().id() == self.notifier {
            return;
        }
        let (ack_tx, ack_rx) = bounded(1);
        self.send(Notification::Barrier(ack_tx));
        let _ = ack_rx.recv_timeout(FLUSH_TIMEOUT);
    }

    // ── Internals ──

    fn send(&self, notification: Notification) {
        if self.notify_tx.send(notification).is_err() {
            tracing::error!(device = %self.id, "Notifier thread is gone");
        }
    }

    fn notify_locked(&self, shared: &Shared, event: Event) {
        if shared.clients.is_empty() {
            return;
        }
        self.send(Notification::Deliver {
            clients: shared.clients.clone(),
            event,
        });
    }

    fn set_state_locked(&self, shared: &mut Shared, state: SourceState) {
        if shared.state == state {
            return;
        }
        tracing::debug!(device = %self.id, "{} -> {}", shared.state, state);
        shared.state = state;
        self.notify_locked(shared, Event::State(state));
        self.report(SessionReport::State {
            timestamp: Utc::now(),
            source_id: self.id.clone(),
            source: self.name.clone(),
            state,
        });
    }

    fn set_busy_locked(&self, shared: &mut Shared, busy: BusyState) {
        if shared.busy == busy {
            return;
        }
        shared.busy = busy;
        self.notify_locked(shared, Event::Busy(busy));
    }

    fn fail_locked(&self, shared: &mut Shared) {
        if shared.failed {
            return;
        }
        shared.failed = true;
        self.notify_locked(shared, Event::Fail);
    }

    fn report_profile(&self) {
        let Some((profile_id, profile)) = lock(&self.carousel)
            .active()
            .map(|p| (p.id.clone(), p.display_name().to_string()))
        else {
            return;
        };
        self.report(SessionReport::Profile {
            timestamp: Utc::now(),
            source_id: self.id.clone(),
            source: self.name.clone(),
            profile_id,
            profile,
            freq: self.props.get("center_freq").as_ref().and_then(value_as_u64),
            samplerate: self.props.get("samp_rate").as_ref().and_then(value_as_u64),
        });
    }

    fn report(&self, report: SessionReport) {
        if let Some(reports) = &self.reports {
            if reports.try_send(report).is_err() {
                tracing::trace!(device = %self.id, "Report dropped");
            }
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish()
    }
}
