//! VoIP sink: downlink session layer seen by the voice algorithm
//!
//! Downlink audio queues in `dl_queue` for playback and is mirrored into the
//! echo reference queue read by the canceller. The side-info queue handle
//! travels with the downlink stream.

use crate::device::DeviceState;
use crate::dispatch::{DeviceHandler, DispatchResult, IoContext, IoCore, Op, Reply};
use crate::error::DispatchError;
use crate::events::PipelineEvent;
use crate::latency;
use crate::queue::{ByteQueue, SideInfoHandle};
use crate::types::InputId;

pub struct VoipSinkHandler {
    core: IoCore,
    dl_queue: ByteQueue,
    echo_ref: ByteQueue,
    side_info: Option<SideInfoHandle>,
    loopback: Option<InputId>,
}

impl VoipSinkHandler {
    pub fn new(core: IoCore, queue_bytes: usize, loopback: Option<InputId>) -> Self {
        Self {
            core,
            dl_queue: ByteQueue::new(queue_bytes),
            echo_ref: ByteQueue::new(queue_bytes),
            side_info: None,
            loopback,
        }
    }
}

impl DeviceHandler for VoipSinkHandler {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IoCore {
        &mut self.core
    }

    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::GetLatency => {
                let report = latency::aggregate(ctx, &self.core, self.dl_queue.len());
                Ok(Reply::Latency(report.total_usec()))
            }
            Op::GetSideInfoQueue => {
                if self.side_info.is_none() {
                    log::warn!("{}: side-info queue requested but not set", self.core.name);
                }
                Ok(Reply::SideInfo(self.side_info.clone()))
            }
            Op::SetSideInfoQueue(handle) => {
                // The previous handle drops through the GC
                self.side_info = handle;
                Ok(Reply::Ack)
            }
            Op::AddInput { input, .. } if Some(input) == self.loopback => {
                ctx.emit(PipelineEvent::LoopbackDenied {
                    device: self.core.id,
                    input,
                });
                Err(DispatchError::LoopbackDenied(input))
            }
            Op::ResetEchoReference => {
                self.echo_ref.clear();
                Ok(Reply::Ack)
            }
            Op::Push(chunk) => {
                self.dl_queue.push(&chunk);
                self.echo_ref.push(&chunk);
                Ok(Reply::Ack)
            }
            Op::Pull(mut buf) => {
                let room = buf.capacity() - buf.len();
                self.dl_queue.pop_into(&mut buf, room);
                Ok(Reply::Chunk(buf))
            }
            Op::PullEchoReference(mut buf) => {
                let room = buf.capacity() - buf.len();
                self.echo_ref.pop_into(&mut buf, room);
                Ok(Reply::Chunk(buf))
            }
            op => self.core.process_generic(ctx, op),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.core.state.is_running() && !state.is_running() {
            self.dl_queue.clear();
            self.echo_ref.clear();
        }
        self.core.state = state;
    }
}
