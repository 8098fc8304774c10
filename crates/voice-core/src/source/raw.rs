//! Raw source: plumbing layer directly on the capture hardware

use crate::device::DeviceState;
use crate::dispatch::{DeviceHandler, DispatchResult, IoContext, IoCore, Op, Reply};
use crate::latency;
use crate::queue::ByteQueue;

pub struct RawSourceHandler {
    core: IoCore,
    /// Captured audio not yet read by the layer above
    hw_queue: ByteQueue,
}

impl RawSourceHandler {
    pub fn new(core: IoCore, queue_bytes: usize) -> Self {
        Self {
            core,
            hw_queue: ByteQueue::new(queue_bytes),
        }
    }
}

impl DeviceHandler for RawSourceHandler {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IoCore {
        &mut self.core
    }

    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::GetLatency => {
                let report = latency::aggregate(ctx, &self.core, self.hw_queue.len());
                Ok(Reply::Latency(report.total_usec()))
            }
            Op::Push(chunk) => {
                // Capture outside Running is discarded
                if self.core.state.is_running() {
                    self.hw_queue.push(&chunk);
                }
                Ok(Reply::Ack)
            }
            Op::Pull(mut buf) => {
                let room = buf.capacity() - buf.len();
                self.hw_queue.pop_into(&mut buf, room);
                Ok(Reply::Chunk(buf))
            }
            op => self.core.process_generic(ctx, op),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.core.state.is_running() && !state.is_running() {
            self.hw_queue.clear();
        }
        self.core.state = state;
    }
}
