//! Data-plane handler seam
//!
//! Every layer registers one [`DeviceHandler`] on the data plane. Handlers
//! process the opcodes they specialise and fall through to
//! [`IoCore::process_generic`] for the rest. A handler never blocks and never
//! allocates while processing a message: all of its buffers are sized when
//! it is built on the control plane.

use crate::device::DeviceState;
use crate::error::DispatchError;
use crate::latency;
use crate::rewind;
use crate::types::{DeviceId, InputId, SampleSpec};

use super::data_plane::IoContext;
use super::message::{DispatchResult, Op, Reply};

/// Upper bound on inputs connected to one sink
pub const MAX_INPUTS: usize = 32;

/// Data-plane view of a device's master
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterRef {
    pub id: DeviceId,
    /// Master's spec, used to convert byte counts crossing the link
    pub spec: SampleSpec,
}

/// Data-plane state shared by every handler
#[derive(Debug)]
pub struct IoCore {
    pub id: DeviceId,
    pub name: String,
    pub spec: SampleSpec,
    pub state: DeviceState,
    pub master: Option<MasterRef>,
    /// Rewind budget in this device's format
    pub max_rewind: usize,
    /// Latency asked for by this device's own clients
    pub requested_latency: Option<u64>,
    /// Latency asked for by the layer wrapping this device
    pub wrapper_latency: Option<u64>,
    inputs: Vec<InputId>,
}

impl IoCore {
    pub fn new(id: DeviceId, name: impl Into<String>, spec: SampleSpec, master: Option<MasterRef>) -> Self {
        Self {
            id,
            name: name.into(),
            spec,
            state: DeviceState::Idle,
            master,
            max_rewind: 0,
            requested_latency: None,
            wrapper_latency: None,
            inputs: Vec::with_capacity(MAX_INPUTS),
        }
    }

    pub fn with_max_rewind(mut self, max_rewind: usize) -> Self {
        self.max_rewind = max_rewind;
        self
    }

    /// Smallest latency anyone above or on this device asked for
    pub fn effective_requested_latency(&self) -> Option<u64> {
        match (self.requested_latency, self.wrapper_latency) {
            (Some(own), Some(wrapper)) => Some(own.min(wrapper)),
            (own, wrapper) => own.or(wrapper),
        }
    }

    pub fn inputs(&self) -> &[InputId] {
        &self.inputs
    }

    /// Record an admitted input; the reserved capacity is never exceeded
    pub fn admit_input(&mut self, input: InputId, spec: &SampleSpec) -> Result<(), DispatchError> {
        if !spec.is_valid() {
            return Err(DispatchError::Malformed("input sample spec"));
        }
        if self.inputs.contains(&input) {
            return Ok(());
        }
        if self.inputs.len() >= MAX_INPUTS {
            return Err(DispatchError::TooManyInputs);
        }
        self.inputs.push(input);
        Ok(())
    }

    /// Opcodes every device understands the same way
    ///
    /// Anything else is reported as unsupported.
    pub fn process_generic(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::GetLatency => Ok(Reply::Latency(latency::aggregate(ctx, self, 0).total_usec())),
            Op::SetMaster(master) => {
                self.master = master;
                Ok(Reply::Ack)
            }
            Op::SetMaxRewind(n) => {
                self.max_rewind = n;
                Ok(Reply::Ack)
            }
            Op::AddInput { input, spec } => {
                self.admit_input(input, &spec)?;
                Ok(Reply::Ack)
            }
            Op::RemoveInput(input) => {
                self.inputs.retain(|i| *i != input);
                Ok(Reply::Ack)
            }
            other => Err(DispatchError::Unsupported(other.name())),
        }
    }
}

/// A device's behaviour on the data plane
pub trait DeviceHandler: Send {
    fn core(&self) -> &IoCore;
    fn core_mut(&mut self) -> &mut IoCore;

    /// Role-specific opcodes; unknown ones must end in [`IoCore::process_generic`]
    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult;

    /// Apply a committed state change
    fn set_state(&mut self, state: DeviceState) {
        self.core_mut().state = state;
    }

    /// Latency request changed on this device or above it
    fn update_requested_latency(&mut self, ctx: &mut IoContext<'_>) {
        latency::propagate_requested(self.core(), ctx);
    }

    /// Rewind request in this device's format; returns bytes accepted
    fn request_rewind(&mut self, ctx: &mut IoContext<'_>, nbytes: usize) -> usize {
        rewind::forward(self.core(), ctx, nbytes)
    }
}

/// Route one operation to the matching handler entry point
pub(crate) fn handle(handler: &mut dyn DeviceHandler, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
    match op {
        Op::SetState(state) => {
            handler.set_state(state);
            Ok(Reply::Ack)
        }
        Op::RequestRewind(nbytes) => Ok(Reply::Rewound(handler.request_rewind(ctx, nbytes))),
        Op::SetRequestedLatency(usec) => {
            handler.core_mut().requested_latency = usec;
            handler.update_requested_latency(ctx);
            Ok(Reply::Ack)
        }
        Op::UpdateRequestedLatency(usec) => {
            handler.core_mut().wrapper_latency = usec;
            handler.update_requested_latency(ctx);
            Ok(Reply::Ack)
        }
        op => handler.process_message(ctx, op),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core() -> IoCore {
        IoCore::new(DeviceId::new(0), "test", SampleSpec::hw_default(), None)
    }

    #[test]
    fn test_effective_requested_latency() {
        let mut core = core();
        assert_eq!(core.effective_requested_latency(), None);

        core.requested_latency = Some(20_000);
        assert_eq!(core.effective_requested_latency(), Some(20_000));

        core.wrapper_latency = Some(5_000);
        assert_eq!(core.effective_requested_latency(), Some(5_000));

        core.requested_latency = None;
        assert_eq!(core.effective_requested_latency(), Some(5_000));
    }

    #[test]
    fn test_admit_input_bounds() {
        let mut core = core();
        let spec = SampleSpec::hw_default();
        for i in 0..MAX_INPUTS as u32 {
            core.admit_input(InputId::new(i), &spec).unwrap();
        }
        // Re-admitting a known input is fine
        core.admit_input(InputId::new(0), &spec).unwrap();
        assert_eq!(
            core.admit_input(InputId::new(999), &spec),
            Err(DispatchError::TooManyInputs)
        );
        assert_eq!(core.inputs().len(), MAX_INPUTS);
    }

    #[test]
    fn test_admit_input_rejects_bad_spec() {
        let mut core = core();
        let bad = SampleSpec::new(crate::types::SampleFormat::S16Le, 0, 2);
        assert!(matches!(
            core.admit_input(InputId::new(1), &bad),
            Err(DispatchError::Malformed(_))
        ));
        assert!(core.inputs().is_empty());
    }
}
