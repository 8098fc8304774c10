//! Hardware-facing devices
//!
//! The pipeline never drives a sound card itself. A hardware device is
//! registered with two halves:
//!
//! - [`HardwareBackend`] (control plane): accepts or refuses state changes.
//! - [`HardwareIo`] (data plane): reports latency, takes rewinds and audio.
//!
//! [`SimulatedHardware`] implements both for tests and the report binary,
//! with a [`HardwareProbe`] to steer and observe it from outside.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::device::DeviceState;
use crate::dispatch::{DeviceHandler, DispatchResult, IoContext, IoCore, Op, Reply};
use crate::error::DispatchError;

/// Control-plane half of a hardware device
pub trait HardwareBackend: Send {
    /// Apply a state change; `Err` carries the refusal reason
    fn set_state(&mut self, state: DeviceState) -> Result<(), String>;
}

/// Data-plane half of a hardware device; must not block
pub trait HardwareIo: Send {
    /// Current device latency in usec, `None` if the device cannot tell
    fn latency(&mut self) -> Option<u64>;

    /// Discard `nbytes` of already-queued playback
    fn rewind(&mut self, nbytes: usize);

    /// Queue playback; returns bytes accepted
    fn write(&mut self, data: &[u8]) -> usize;

    fn set_requested_latency(&mut self, _usec: Option<u64>) {}
}

/// Data-plane handler wrapping a [`HardwareIo`]
pub struct HardwareHandler {
    core: IoCore,
    io: Box<dyn HardwareIo>,
}

impl HardwareHandler {
    pub fn new(core: IoCore, io: Box<dyn HardwareIo>) -> Self {
        Self { core, io }
    }
}

impl DeviceHandler for HardwareHandler {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IoCore {
        &mut self.core
    }

    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::GetLatency => self
                .io
                .latency()
                .map(Reply::Latency)
                .ok_or(DispatchError::MasterUnreachable),
            Op::Push(chunk) => {
                self.io.write(&chunk);
                Ok(Reply::Ack)
            }
            op => self.core.process_generic(ctx, op),
        }
    }

    fn update_requested_latency(&mut self, _ctx: &mut IoContext<'_>) {
        self.io.set_requested_latency(self.core.effective_requested_latency());
    }

    fn request_rewind(&mut self, _ctx: &mut IoContext<'_>, nbytes: usize) -> usize {
        if nbytes > 0 {
            self.io.rewind(nbytes);
        }
        nbytes
    }
}

const NO_LATENCY: u64 = u64::MAX;

/// Shared view into a [`SimulatedHardware`]
#[derive(Debug)]
pub struct HardwareProbe {
    latency: AtomicU64,
    refuse: AtomicBool,
    state: AtomicU8,
    transitions: AtomicUsize,
    rewinds: AtomicUsize,
    last_rewind: AtomicUsize,
    bytes_written: AtomicUsize,
    requested_latency: AtomicU64,
}

impl HardwareProbe {
    fn new(latency_usec: Option<u64>) -> Self {
        Self {
            latency: AtomicU64::new(latency_usec.unwrap_or(NO_LATENCY)),
            refuse: AtomicBool::new(false),
            state: AtomicU8::new(0),
            transitions: AtomicUsize::new(0),
            rewinds: AtomicUsize::new(0),
            last_rewind: AtomicUsize::new(0),
            bytes_written: AtomicUsize::new(0),
            requested_latency: AtomicU64::new(NO_LATENCY),
        }
    }

    /// Reported latency; `None` makes latency queries fail
    pub fn set_latency(&self, usec: Option<u64>) {
        self.latency.store(usec.unwrap_or(NO_LATENCY), Ordering::Release);
    }

    /// Refuse every following state change
    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::Release);
    }

    pub fn state(&self) -> DeviceState {
        DeviceState::ALL[self.state.load(Ordering::Acquire) as usize]
    }

    /// Accepted state changes so far
    pub fn transitions(&self) -> usize {
        self.transitions.load(Ordering::Acquire)
    }

    /// Rewind requests received so far
    pub fn rewinds(&self) -> usize {
        self.rewinds.load(Ordering::Acquire)
    }

    pub fn last_rewind(&self) -> usize {
        self.last_rewind.load(Ordering::Acquire)
    }

    pub fn bytes_written(&self) -> usize {
        self.bytes_written.load(Ordering::Acquire)
    }

    pub fn requested_latency(&self) -> Option<u64> {
        match self.requested_latency.load(Ordering::Acquire) {
            NO_LATENCY => None,
            usec => Some(usec),
        }
    }
}

/// Stand-in sound card with a fixed, adjustable latency
#[derive(Debug, Clone)]
pub struct SimulatedHardware {
    probe: Arc<HardwareProbe>,
}

impl SimulatedHardware {
    pub fn new(latency_usec: Option<u64>) -> Self {
        Self {
            probe: Arc::new(HardwareProbe::new(latency_usec)),
        }
    }

    pub fn probe(&self) -> Arc<HardwareProbe> {
        self.probe.clone()
    }

    pub fn backend(&self) -> Box<dyn HardwareBackend> {
        Box::new(SimulatedBackend {
            probe: self.probe.clone(),
        })
    }

    pub fn io(&self) -> Box<dyn HardwareIo> {
        Box::new(SimulatedIo {
            probe: self.probe.clone(),
        })
    }
}

struct SimulatedBackend {
    probe: Arc<HardwareProbe>,
}

impl HardwareBackend for SimulatedBackend {
    fn set_state(&mut self, state: DeviceState) -> Result<(), String> {
        if self.probe.refuse.load(Ordering::Acquire) {
            return Err(format!("simulated refusal of {:?}", state));
        }
        let rank = DeviceState::ALL.iter().position(|s| *s == state).unwrap_or(0);
        self.probe.state.store(rank as u8, Ordering::Release);
        self.probe.transitions.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

struct SimulatedIo {
    probe: Arc<HardwareProbe>,
}

impl HardwareIo for SimulatedIo {
    fn latency(&mut self) -> Option<u64> {
        match self.probe.latency.load(Ordering::Acquire) {
            NO_LATENCY => None,
            usec => Some(usec),
        }
    }

    fn rewind(&mut self, nbytes: usize) {
        self.probe.rewinds.fetch_add(1, Ordering::AcqRel);
        self.probe.last_rewind.store(nbytes, Ordering::Release);
    }

    fn write(&mut self, data: &[u8]) -> usize {
        self.probe.bytes_written.fetch_add(data.len(), Ordering::AcqRel);
        data.len()
    }

    fn set_requested_latency(&mut self, usec: Option<u64>) {
        self.probe
            .requested_latency
            .store(usec.unwrap_or(NO_LATENCY), Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_refusal() {
        let hw = SimulatedHardware::new(Some(1_000));
        let probe = hw.probe();
        let mut backend = hw.backend();

        backend.set_state(DeviceState::Suspended).unwrap();
        assert_eq!(probe.state(), DeviceState::Suspended);

        probe.set_refuse(true);
        assert!(backend.set_state(DeviceState::Active).is_err());
        assert_eq!(probe.state(), DeviceState::Suspended);
        assert_eq!(probe.transitions(), 1);
    }

    #[test]
    fn test_io_latency_and_rewind() {
        let hw = SimulatedHardware::new(None);
        let probe = hw.probe();
        let mut io = hw.io();

        assert_eq!(io.latency(), None);
        probe.set_latency(Some(10_000));
        assert_eq!(io.latency(), Some(10_000));

        io.rewind(1920);
        assert_eq!(probe.rewinds(), 1);
        assert_eq!(probe.last_rewind(), 1920);

        assert_eq!(io.write(&[0; 64]), 64);
        assert_eq!(probe.bytes_written(), 64);
    }
}
