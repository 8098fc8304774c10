//! VoIP source: uplink session layer seen by the voice algorithm
//!
//! Processed uplink audio waits in `ul_queue` until the uplink deadline.
//! Once the deadline passes, a pull releases what is ready and moves the
//! deadline forward by the duration released, so framing stays aligned to
//! the modem's schedule.

use crate::device::DeviceState;
use crate::dispatch::{DeviceHandler, DispatchResult, IoContext, IoCore, Op, Reply};
use crate::latency;
use crate::queue::ByteQueue;

pub struct VoipSourceHandler {
    core: IoCore,
    ul_queue: ByteQueue,
    /// Absolute data-plane time (usec) before which nothing is released
    ul_deadline: Option<u64>,
}

impl VoipSourceHandler {
    pub fn new(core: IoCore, queue_bytes: usize) -> Self {
        Self {
            core,
            ul_queue: ByteQueue::new(queue_bytes),
            ul_deadline: None,
        }
    }

    fn release(&mut self, now: u64, buf: &mut Vec<u8>) -> usize {
        if let Some(deadline) = self.ul_deadline {
            if now < deadline {
                return 0;
            }
        }
        let room = self.core.spec.frame_align(buf.capacity() - buf.len());
        let released = self.ul_queue.pop_into(buf, room);
        if let Some(deadline) = self.ul_deadline.as_mut() {
            *deadline = deadline.saturating_add(self.core.spec.bytes_to_usec(released));
        }
        released
    }
}

impl DeviceHandler for VoipSourceHandler {
    fn core(&self) -> &IoCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut IoCore {
        &mut self.core
    }

    fn process_message(&mut self, ctx: &mut IoContext<'_>, op: Op) -> DispatchResult {
        match op {
            Op::GetLatency => {
                let report = latency::aggregate(ctx, &self.core, self.ul_queue.len());
                Ok(Reply::Latency(report.total_usec()))
            }
            Op::SetUplinkDeadline(deadline) => {
                self.ul_deadline = Some(deadline);
                Ok(Reply::Ack)
            }
            Op::Push(chunk) => {
                self.ul_queue.push(&chunk);
                Ok(Reply::Ack)
            }
            Op::Pull(mut buf) => {
                self.release(ctx.now(), &mut buf);
                Ok(Reply::Chunk(buf))
            }
            op => self.core.process_generic(ctx, op),
        }
    }

    fn set_state(&mut self, state: DeviceState) {
        if self.core.state.is_running() && !state.is_running() {
            self.ul_queue.clear();
            self.ul_deadline = None;
        }
        self.core.state = state;
    }
}
