//! Control plane of the voice pipeline
//!
//! [`Pipeline`] owns the device table, the control end of the message queue
//! and the IO thread running the data plane. Everything here runs on the
//! caller's thread; the data plane is reached only through messages.
//!
//! ```text
//! VoIP sink ──> raw sink ──> hardware sink        (downlink)
//! VoIP source <── raw source <── hardware source  (uplink)
//! ```
//!
//! Each virtual layer wraps exactly one master. State changes go down the
//! chain before they are applied locally; queries recurse down the chain on
//! the data plane.

mod transition;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::Receiver;

use crate::clock::{Clock, MonotonicClock};
use crate::config::{LayerTuning, PipelineConfig};
use crate::device::{DeviceConfig, DeviceFlags, DeviceState, Role, StateMachine};
use crate::dispatch::{
    message_channel, DataPlane, DeviceHandler, Dispatcher, IoCore, IoThread, MasterRef, Op, Reply,
};
use crate::error::{DispatchError, PipelineError};
use crate::events::{EventBus, PipelineEvent};
use crate::gc::{chunk_from, chunk_with_capacity, Chunk};
use crate::hardware::{HardwareBackend, HardwareHandler, HardwareIo};
use crate::queue::SideInfoHandle;
use crate::sink::{RawSinkHandler, VoipSinkHandler};
use crate::source::{RawSourceHandler, VoipSourceHandler};
use crate::types::{ChannelMap, DeviceId, Direction, InputId, SampleSpec};
use crate::volume::{FixedOutputGain, OutputGain, VolumeProxy};

/// Collaborators handed to the pipeline at start
pub struct PipelineServices {
    pub volume: VolumeProxy,
    pub gain: Box<dyn OutputGain>,
    pub clock: Box<dyn Clock>,
}

impl PipelineServices {
    /// Fresh volume proxy, gain table from the config, wall clock
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            volume: VolumeProxy::new(),
            gain: Box::new(FixedOutputGain::from(&config.gain)),
            clock: Box::new(MonotonicClock::new()),
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_volume(mut self, volume: VolumeProxy) -> Self {
        self.volume = volume;
        self
    }
}

/// Per-layer construction options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerOptions {
    pub queue_bytes: usize,
    pub max_rewind: usize,
    /// Input that must never be connected back into this layer
    pub loopback: Option<InputId>,
}

impl From<LayerTuning> for LayerOptions {
    fn from(tuning: LayerTuning) -> Self {
        Self {
            queue_bytes: tuning.queue_bytes,
            max_rewind: tuning.max_rewind,
            loopback: None,
        }
    }
}

/// Snapshot of a device's control-plane record
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub id: DeviceId,
    pub name: String,
    pub description: String,
    pub role: Role,
    pub spec: SampleSpec,
    pub channel_map: ChannelMap,
    pub flags: DeviceFlags,
    pub state: DeviceState,
    pub master: Option<DeviceId>,
}

struct DeviceRecord {
    id: DeviceId,
    name: String,
    description: String,
    role: Role,
    spec: SampleSpec,
    channel_map: ChannelMap,
    flags: DeviceFlags,
    machine: StateMachine,
    master: Option<DeviceId>,
    quiesced: Arc<AtomicBool>,
    /// Hardware devices only
    backend: Option<Box<dyn HardwareBackend>>,
    /// Input this layer holds on its master (raw sink)
    master_input: Option<InputId>,
}

impl DeviceRecord {
    fn info(&self) -> DeviceInfo {
        DeviceInfo {
            id: self.id,
            name: self.name.clone(),
            description: self.description.clone(),
            role: self.role,
            spec: self.spec,
            channel_map: self.channel_map.clone(),
            flags: self.flags,
            state: self.machine.state(),
            master: self.master,
        }
    }

    fn is_live(&self) -> bool {
        !self.quiesced.load(Ordering::Acquire)
    }
}

/// The layered virtual device pipeline
pub struct Pipeline {
    devices: Vec<Option<DeviceRecord>>,
    creation_order: Vec<DeviceId>,
    dispatcher: Dispatcher,
    io_thread: IoThread,
    events: EventBus,
    volume: Option<VolumeProxy>,
    gain: Box<dyn OutputGain>,
    next_input: u32,
}

impl Pipeline {
    /// Start the IO thread and return an empty pipeline
    pub fn start(config: &PipelineConfig, services: PipelineServices) -> Result<Self, PipelineError> {
        config.validate()?;

        let (producer, consumer) = message_channel(config.message_queue_capacity);
        let events = EventBus::new(config.event_capacity);
        let data_plane = DataPlane::new(
            consumer,
            events.sender(),
            services.clock,
            config.max_devices,
            config.deferred_capacity,
        );
        let io_thread = IoThread::spawn(data_plane, Duration::from_millis(config.io_period_ms.max(1)))?;
        let dispatcher = Dispatcher::new(producer, io_thread.waker());

        log::info!("Voice pipeline started ({} device slots)", config.max_devices);

        Ok(Self {
            devices: (0..config.max_devices).map(|_| None).collect(),
            creation_order: Vec::with_capacity(config.max_devices),
            dispatcher,
            io_thread,
            events,
            volume: Some(services.volume),
            gain: services.gain,
            next_input: 1,
        })
    }

    // ─────────────────────────────────────────────────────────────
    // Construction and teardown
    // ─────────────────────────────────────────────────────────────

    /// Register a hardware device driven by `backend` and `io`
    pub fn register_hardware(
        &mut self,
        direction: Direction,
        config: DeviceConfig,
        backend: Box<dyn HardwareBackend>,
        io: Box<dyn HardwareIo>,
    ) -> Result<DeviceId, PipelineError> {
        let role = match direction {
            Direction::Sink => Role::HardwareSink,
            Direction::Source => Role::HardwareSource,
        };
        self.validate(role, &config)?;
        let id = self.free_slot()?;

        let core = IoCore::new(id, config.name.clone(), config.spec, None);
        let handler = Box::new(HardwareHandler::new(core, io));
        self.install(id, role, config, handler, Some(backend))
    }

    /// Create a virtual layer on top of `config.master`
    pub fn create_layer(
        &mut self,
        role: Role,
        mut config: DeviceConfig,
        options: LayerOptions,
    ) -> Result<DeviceId, PipelineError> {
        if role.is_hardware() {
            return Err(PipelineError::NotVirtual(config.name));
        }
        let master = self
            .validate(role, &config)?
            .ok_or_else(|| PipelineError::MissingMaster(config.name.clone()))?;
        let id = self.free_slot()?;

        if config.description.is_none() {
            let master_name = self.record(master.id).map(|r| r.name.as_str()).unwrap_or("?");
            config.description = Some(match role.direction() {
                Direction::Source => format!("{} source connected to {}", config.name, master_name),
                Direction::Sink => format!("{} connected to {}", config.name, master_name),
            });
        }

        let core = IoCore::new(id, config.name.clone(), config.spec, Some(master))
            .with_max_rewind(options.max_rewind);
        let handler: Box<dyn DeviceHandler> = match role {
            Role::RawSource => Box::new(RawSourceHandler::new(core, options.queue_bytes)),
            Role::VoipSource => Box::new(VoipSourceHandler::new(core, options.queue_bytes)),
            Role::RawSink => Box::new(RawSinkHandler::new(core, options.loopback)),
            Role::VoipSink => Box::new(VoipSinkHandler::new(core, options.queue_bytes, options.loopback)),
            Role::HardwareSink | Role::HardwareSource => {
                return Err(PipelineError::NotVirtual(config.name))
            }
        };
        self.install(id, role, config, handler, None)
    }

    fn validate(&self, role: Role, config: &DeviceConfig) -> Result<Option<MasterRef>, PipelineError> {
        if config.name.is_empty() {
            return Err(PipelineError::EmptyName);
        }
        if self.find(&config.name).is_some() {
            return Err(PipelineError::DuplicateName(config.name.clone()));
        }
        if !config.spec.is_valid() {
            return Err(PipelineError::InvalidSpec {
                name: config.name.clone(),
                spec: config.spec,
            });
        }
        if !config.channel_map.matches(&config.spec) {
            return Err(PipelineError::ChannelMapMismatch {
                name: config.name.clone(),
                map: config.channel_map.len(),
                channels: config.spec.channels,
            });
        }
        if role.is_hardware() {
            return Ok(None);
        }

        let master_id = config
            .master
            .ok_or_else(|| PipelineError::MissingMaster(config.name.clone()))?;
        let master = self
            .live_record(master_id)
            .ok_or(PipelineError::DeviceNotFound(master_id))?;
        if master.role.direction() != role.direction() {
            return Err(PipelineError::DirectionMismatch {
                device: config.name.clone(),
                expected: role.direction(),
                found: master.role.direction(),
            });
        }
        Ok(Some(MasterRef {
            id: master_id,
            spec: master.spec,
        }))
    }

    fn free_slot(&self) -> Result<DeviceId, PipelineError> {
        self.devices
            .iter()
            .position(Option::is_none)
            .map(DeviceId::new)
            .ok_or(PipelineError::TableFull(self.devices.len()))
    }

    fn install(
        &mut self,
        id: DeviceId,
        role: Role,
        config: DeviceConfig,
        handler: Box<dyn DeviceHandler>,
        backend: Option<Box<dyn HardwareBackend>>,
    ) -> Result<DeviceId, PipelineError> {
        let quiesced = Arc::new(AtomicBool::new(false));
        if let Err(source) = self.dispatcher.send(
            id,
            Op::Attach {
                handler,
                quiesced: quiesced.clone(),
            },
        ) {
            return Err(PipelineError::Registration {
                name: config.name,
                source,
            });
        }

        let description = config.description.unwrap_or_else(|| config.name.clone());
        log::info!(
            "Created {} '{}' ({}) at {}: {}",
            role.name(),
            config.name,
            config.spec,
            id,
            description
        );
        self.events.publish(PipelineEvent::DeviceCreated {
            device: id,
            name: config.name.clone(),
        });

        self.devices[id.index()] = Some(DeviceRecord {
            id,
            name: config.name,
            description,
            role,
            spec: config.spec,
            channel_map: config.channel_map,
            flags: config.flags,
            machine: StateMachine::new(role.is_call_session()),
            master: config.master.filter(|_| !role.is_hardware()),
            quiesced,
            backend,
            master_input: None,
        });
        self.creation_order.push(id);
        Ok(id)
    }

    /// Remove a device that nothing wraps any more
    ///
    /// The handler is detached synchronously and dropped on this thread.
    pub fn destroy(&mut self, id: DeviceId) -> Result<(), PipelineError> {
        let record = self.record(id).ok_or(PipelineError::DeviceNotFound(id))?;
        if let Some(dependent) = self.records().find(|d| d.master == Some(id)) {
            return Err(PipelineError::DeviceInUse {
                device: record.name.clone(),
                dependent: dependent.name.clone(),
            });
        }
        let Some(record) = self.devices[id.index()].take() else {
            return Err(PipelineError::DeviceNotFound(id));
        };
        record.quiesced.store(true, Ordering::Release);

        if let (Some(master), Some(input)) = (record.master, record.master_input) {
            if let Err(e) = self.dispatcher.post(master, Op::RemoveInput(input)) {
                log::warn!("[DISPATCH] Failed to disconnect {} from {}: {}", record.name, master, e);
            }
        }

        match self.dispatcher.send(id, Op::Detach) {
            Ok(Reply::Detached(handler)) => drop(handler),
            Ok(other) => log::warn!("[DISPATCH] Unexpected {} reply detaching {}", other.name(), record.name),
            Err(e) => log::warn!("[DISPATCH] Detaching {} failed: {}", record.name, e),
        }

        self.creation_order.retain(|d| *d != id);
        log::info!("Removed {} '{}' at {}", record.role.name(), record.name, id);
        self.events.publish(PipelineEvent::DeviceRemoved {
            device: id,
            name: record.name,
        });
        Ok(())
    }

    /// Re-point a virtual layer at another master of the same direction
    pub fn set_master(&mut self, id: DeviceId, master: DeviceId) -> Result<(), PipelineError> {
        let record = self.record(id).ok_or(PipelineError::DeviceNotFound(id))?;
        if record.role.is_hardware() {
            return Err(PipelineError::NotVirtual(record.name.clone()));
        }
        if record.machine.state().is_running() {
            return Err(PipelineError::DeviceRunning(record.name.clone()));
        }
        let target = self.live_record(master).ok_or(PipelineError::DeviceNotFound(master))?;
        if target.role.direction() != record.role.direction() {
            return Err(PipelineError::DirectionMismatch {
                device: record.name.clone(),
                expected: record.role.direction(),
                found: target.role.direction(),
            });
        }
        if self.chain_contains(master, id) {
            return Err(PipelineError::InvalidConfig(format!(
                "{} cannot wrap {}, it would wrap itself",
                record.name, target.name
            )));
        }

        let master_ref = MasterRef {
            id: master,
            spec: target.spec,
        };
        let name = record.name.clone();
        let (old_master, input) = (record.master, record.master_input);

        if old_master == Some(master) {
            return Ok(());
        }

        // New master first; a refusal leaves the old wiring intact
        if let Some(input) = input {
            self.dispatcher
                .send(master, Op::AddInput { input, spec: master_ref.spec })
                .map_err(|source| PipelineError::Registration {
                    name: name.clone(),
                    source,
                })?;
        }
        if let Err(source) = self.dispatcher.send(id, Op::SetMaster(Some(master_ref))) {
            if let Some(input) = input {
                if let Err(e) = self.dispatcher.post(master, Op::RemoveInput(input)) {
                    log::warn!("[DISPATCH] Failed to disconnect {} from {}: {}", name, master, e);
                }
            }
            return Err(PipelineError::Registration { name, source });
        }
        if let (Some(input), Some(old)) = (input, old_master) {
            if let Err(e) = self.dispatcher.post(old, Op::RemoveInput(input)) {
                log::warn!("[DISPATCH] Failed to disconnect {} from {}: {}", name, old, e);
            }
        }

        if let Some(record) = self.devices[id.index()].as_mut() {
            record.master = Some(master);
        }
        log::info!("'{}' now wraps {}", name, master);
        Ok(())
    }

    /// Null a layer's master link
    ///
    /// Afterwards state requests are ignored, latency counts local buffering
    /// only and rewinds are dropped, until [`Pipeline::set_master`] re-points it.
    pub fn detach_master(&mut self, id: DeviceId) -> Result<(), PipelineError> {
        let record = self.record(id).ok_or(PipelineError::DeviceNotFound(id))?;
        let name = record.name.clone();
        if let (Some(master), Some(input)) = (record.master, record.master_input) {
            if let Err(e) = self.dispatcher.post(master, Op::RemoveInput(input)) {
                log::warn!("[DISPATCH] Failed to disconnect {} from {}: {}", name, master, e);
            }
        }
        self.dispatcher
            .send(id, Op::SetMaster(None))
            .map_err(|source| PipelineError::Registration { name, source })?;
        if let Some(record) = self.devices[id.index()].as_mut() {
            record.master = None;
        }
        Ok(())
    }

    /// Whether `needle` is `start` or one of its masters
    fn chain_contains(&self, start: DeviceId, needle: DeviceId) -> bool {
        let mut current = Some(start);
        // The table size bounds any chain
        for _ in 0..=self.devices.len() {
            match current {
                Some(id) if id == needle => return true,
                Some(id) => current = self.record(id).and_then(|r| r.master),
                None => return false,
            }
        }
        false
    }

    /// Tear everything down in reverse creation order
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        let order: Vec<DeviceId> = self.creation_order.iter().rev().copied().collect();
        for id in order {
            if let Err(e) = self.drive(id, DeviceState::Idle) {
                log::warn!("[STATE] Failed to idle {} during shutdown: {}", id, e);
            }
            if let Err(e) = self.destroy(id) {
                log::warn!("Failed to remove {} during shutdown: {}", id, e);
            }
        }

        if self.io_thread.shutdown().is_some() {
            log::info!("Voice pipeline stopped");
        }
        if let Some(volume) = self.volume.take() {
            volume.release();
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Lookups
    // ─────────────────────────────────────────────────────────────

    fn record(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.devices.get(id.index()).and_then(Option::as_ref)
    }

    fn live_record(&self, id: DeviceId) -> Option<&DeviceRecord> {
        self.record(id).filter(|r| r.is_live())
    }

    fn records(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.devices.iter().flatten()
    }

    pub fn device(&self, id: DeviceId) -> Option<DeviceInfo> {
        self.record(id).map(DeviceRecord::info)
    }

    /// All devices in creation order
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.creation_order
            .iter()
            .filter_map(|id| self.device(*id))
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<DeviceId> {
        self.records().find(|r| r.name == name).map(|r| r.id)
    }

    pub fn state(&self, id: DeviceId) -> Option<DeviceState> {
        self.record(id).map(|r| r.machine.state())
    }

    /// Whether any call session device is Running
    pub fn call_active(&self) -> bool {
        self.records()
            .any(|r| r.role.is_call_session() && r.machine.state().is_running())
    }

    pub fn subscribe(&self) -> Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn volume(&self) -> Option<&VolumeProxy> {
        self.volume.as_ref()
    }

    /// Fresh input id for connecting a stream to a sink
    pub fn allocate_input(&mut self) -> InputId {
        let id = InputId::new(self.next_input);
        self.next_input = self.next_input.wrapping_add(1).max(1);
        id
    }

    pub(crate) fn bind_master_input(&mut self, id: DeviceId, input: InputId) {
        if let Some(record) = self.devices.get_mut(id.index()).and_then(Option::as_mut) {
            record.master_input = Some(input);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Queries (degrade to defaults, never fail)
    // ─────────────────────────────────────────────────────────────

    /// Total latency of `id` in usec; 0 if it cannot be determined
    pub fn latency(&mut self, id: DeviceId) -> u64 {
        match self.dispatcher.send(id, Op::GetLatency) {
            Ok(Reply::Latency(usec)) => usec,
            Ok(other) => {
                log::warn!("[LATENCY] {}: unexpected {} reply", id, other.name());
                0
            }
            Err(e) => {
                log::warn!("[LATENCY] {}: query failed ({}), reporting 0", id, e);
                0
            }
        }
    }

    /// Side-info queue of a VoIP sink; `None` if unset or unavailable
    pub fn side_info_queue(&mut self, id: DeviceId) -> Option<SideInfoHandle> {
        match self.dispatcher.send(id, Op::GetSideInfoQueue) {
            Ok(Reply::SideInfo(handle)) => handle,
            Ok(other) => {
                log::warn!("{}: unexpected {} reply to side-info query", id, other.name());
                None
            }
            Err(e) => {
                log::warn!("{}: side-info query failed: {}", id, e);
                None
            }
        }
    }

    /// Output gain of `id`, following volume sharing to the owning device
    pub fn output_gain(&self, id: DeviceId) -> Result<f32, PipelineError> {
        let mut owner = self.record(id).ok_or(PipelineError::DeviceNotFound(id))?;
        while owner.flags.share_volume_with_master {
            match owner.master.and_then(|m| self.record(m)) {
                Some(master) => owner = master,
                None => break,
            }
        }

        let named = self.volume.as_ref().and_then(|v| v.get_gain(&owner.name));
        Ok(named.unwrap_or_else(|| self.gain.current_output_gain(self.call_active())))
    }

    // ─────────────────────────────────────────────────────────────
    // Control messages
    // ─────────────────────────────────────────────────────────────

    pub fn set_side_info_queue(
        &mut self,
        id: DeviceId,
        handle: Option<SideInfoHandle>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.send(id, Op::SetSideInfoQueue(handle)).map(drop)
    }

    /// Absolute uplink deadline in usec on the data-plane clock
    pub fn set_uplink_deadline(&mut self, id: DeviceId, deadline_usec: u64) -> Result<(), DispatchError> {
        self.dispatcher.post(id, Op::SetUplinkDeadline(deadline_usec))
    }

    /// Admit `input` into sink `id`
    pub fn add_input(&mut self, id: DeviceId, input: InputId, spec: SampleSpec) -> Result<(), DispatchError> {
        self.dispatcher.send(id, Op::AddInput { input, spec }).map(drop)
    }

    pub fn remove_input(&mut self, id: DeviceId, input: InputId) -> Result<(), DispatchError> {
        self.dispatcher.post(id, Op::RemoveInput(input))
    }

    /// Fire-and-forget rewind of `nbytes` in the device's own format
    pub fn request_rewind(&mut self, id: DeviceId, nbytes: usize) -> Result<(), DispatchError> {
        self.dispatcher.post(id, Op::RequestRewind(nbytes))
    }

    /// Rewind and wait until it has propagated; returns bytes accepted by `id`
    pub fn request_rewind_sync(&mut self, id: DeviceId, nbytes: usize) -> Result<usize, DispatchError> {
        match self.dispatcher.send(id, Op::RequestRewind(nbytes))? {
            Reply::Rewound(accepted) => Ok(accepted),
            _ => Err(DispatchError::Malformed("rewind reply")),
        }
    }

    pub fn set_max_rewind(&mut self, id: DeviceId, nbytes: usize) -> Result<(), DispatchError> {
        self.dispatcher.post(id, Op::SetMaxRewind(nbytes))
    }

    /// Latency requested by clients of `id`, propagated down the chain
    pub fn set_requested_latency(&mut self, id: DeviceId, usec: Option<u64>) -> Result<(), DispatchError> {
        self.dispatcher.send(id, Op::SetRequestedLatency(usec)).map(drop)
    }

    // ─────────────────────────────────────────────────────────────
    // Data path
    // ─────────────────────────────────────────────────────────────

    /// Queue audio into `id`
    pub fn push(&mut self, id: DeviceId, data: &[u8]) -> Result<(), DispatchError> {
        self.dispatcher.post(id, Op::Push(chunk_from(data)))
    }

    /// Read up to `max` ready bytes from `id`
    pub fn pull(&mut self, id: DeviceId, max: usize) -> Result<Chunk, DispatchError> {
        self.read(id, Op::Pull(chunk_with_capacity(max)))
    }

    /// Read up to `max` bytes of echo reference from a VoIP sink
    pub fn pull_echo_reference(&mut self, id: DeviceId, max: usize) -> Result<Chunk, DispatchError> {
        self.read(id, Op::PullEchoReference(chunk_with_capacity(max)))
    }

    fn read(&mut self, id: DeviceId, op: Op) -> Result<Chunk, DispatchError> {
        match self.dispatcher.send(id, op)? {
            Reply::Chunk(chunk) => Ok(chunk),
            _ => Err(DispatchError::Malformed("read reply")),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}
