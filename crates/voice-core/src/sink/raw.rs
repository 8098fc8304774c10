//! Raw sink: plumbing layer directly on the playback hardware
//!
//! Keeps no buffer of its own; audio goes straight to the master.

use crate::dispatch::{DeviceHandler, DispatchResult, IoContext, IoCore, Op};
use crate::error::DispatchError;
use crate::events::PipelineEvent;
use crate::types::InputId;

pub struct RawSinkHandler {
    core: IoCore,
    /// Input carrying this chain's audio into the hardware
    loopback: Option<InputId>,
}

impl RawSinkHandler {
    pub fn new(core: IoCore, loopback: Option<InputId>) -> Self {
        Self { core, loopback }
    }
}

impl DeviceHandler for RawSinkHandler {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IoCore {
        &mut self.core
    }

    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::AddInput { input, .. } if Some(input) == self.loopback => {
                ctx.emit(PipelineEvent::LoopbackDenied {
                    device: self.core.id,
                    input,
                });
                Err(DispatchError::LoopbackDenied(input))
            }
            Op::Push(chunk) => match self.core.master {
                Some(master) => ctx.dispatch(master.id, Op::Push(chunk)),
                None => Err(DispatchError::MasterUnreachable),
            },
            op => self.core.process_generic(ctx, op),
        }
    }
}
