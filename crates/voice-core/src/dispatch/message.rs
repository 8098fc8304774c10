//! Opcode-tagged messages between the control plane and the data plane
//!
//! Every message names a target device, carries one [`Op`] and optionally a
//! reply slot. Payloads are fixed-size: anything large travels boxed or as a
//! [`Chunk`] allocated on the control plane, so the data plane never
//! allocates to read a message.
//!
//! Synchronous messages block the *sender* on the reply slot. The data plane
//! answers with a non-blocking oneshot send and moves on.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use super::handler::{DeviceHandler, MasterRef};
use crate::device::DeviceState;
use crate::error::DispatchError;
use crate::gc::Chunk;
use crate::queue::SideInfoHandle;
use crate::types::{DeviceId, InputId, SampleSpec};

/// Operation requested of a device (or of the data plane's slot table)
pub enum Op {
    // ─────────────────────────────────────────────────────────────
    // Queries (answered in bounded time, never block)
    // ─────────────────────────────────────────────────────────────
    /// Total latency in usec: master latency plus own buffering
    GetLatency,
    /// Handle of the downlink side-info queue (`None` if unset)
    GetSideInfoQueue,

    // ─────────────────────────────────────────────────────────────
    // Control
    // ─────────────────────────────────────────────────────────────
    SetSideInfoQueue(Option<SideInfoHandle>),
    /// Absolute deadline (usec, data-plane clock) pacing uplink framing
    SetUplinkDeadline(u64),
    /// Admission request for a new input stream
    AddInput { input: InputId, spec: SampleSpec },
    RemoveInput(InputId),
    /// Data-plane half of a committed state change
    SetState(DeviceState),
    /// Re-point (or null) the master link
    SetMaster(Option<MasterRef>),
    /// Rewind budget in this device's byte format
    SetMaxRewind(usize),
    /// Discard/resubmit up to N bytes in this device's format (fire-and-forget)
    RequestRewind(usize),
    /// Latency requested by this device's own clients
    SetRequestedLatency(Option<u64>),
    /// Latency requested by the layer wrapping this device
    UpdateRequestedLatency(Option<u64>),
    /// Drop buffered echo reference (before a call begins)
    ResetEchoReference,

    // ─────────────────────────────────────────────────────────────
    // Data path
    // ─────────────────────────────────────────────────────────────
    /// Queue audio into the device
    Push(Chunk),
    /// Fill the caller's buffer with ready audio; answered with `Reply::Chunk`
    Pull(Chunk),
    /// Fill the caller's buffer from the echo reference queue
    PullEchoReference(Chunk),

    // ─────────────────────────────────────────────────────────────
    // Slot table (handled by the data plane itself)
    // ─────────────────────────────────────────────────────────────
    Attach {
        handler: Box<dyn DeviceHandler>,
        quiesced: Arc<AtomicBool>,
    },
    /// Remove the handler; it is handed back so the control plane drops it
    Detach,
}

impl Op {
    /// Opcode name for logs and error codes
    pub fn name(&self) -> &'static str {
        match self {
            Op::GetLatency => "GetLatency",
            Op::GetSideInfoQueue => "GetSideInfoQueue",
            Op::SetSideInfoQueue(_) => "SetSideInfoQueue",
            Op::SetUplinkDeadline(_) => "SetUplinkDeadline",
            Op::AddInput { .. } => "AddInput",
            Op::RemoveInput(_) => "RemoveInput",
            Op::SetState(_) => "SetState",
            Op::SetMaster(_) => "SetMaster",
            Op::SetMaxRewind(_) => "SetMaxRewind",
            Op::RequestRewind(_) => "RequestRewind",
            Op::SetRequestedLatency(_) => "SetRequestedLatency",
            Op::UpdateRequestedLatency(_) => "UpdateRequestedLatency",
            Op::ResetEchoReference => "ResetEchoReference",
            Op::Push(_) => "Push",
            Op::Pull(_) => "Pull",
            Op::PullEchoReference(_) => "PullEchoReference",
            Op::Attach { .. } => "Attach",
            Op::Detach => "Detach",
        }
    }
}

/// Answer to a message
pub enum Reply {
    Ack,
    Latency(u64),
    SideInfo(Option<SideInfoHandle>),
    /// Bytes accepted for rewind, in the target's format
    Rewound(usize),
    Chunk(Chunk),
    Detached(Box<dyn DeviceHandler>),
}

impl Reply {
    pub fn name(&self) -> &'static str {
        match self {
            Reply::Ack => "Ack",
            Reply::Latency(_) => "Latency",
            Reply::SideInfo(_) => "SideInfo",
            Reply::Rewound(_) => "Rewound",
            Reply::Chunk(_) => "Chunk",
            Reply::Detached(_) => "Detached",
        }
    }
}

pub type DispatchResult = Result<Reply, DispatchError>;

/// Reply slot of a synchronous message
pub type ReplySender = tokio::sync::oneshot::Sender<DispatchResult>;

/// A message in flight
pub struct Message {
    pub target: DeviceId,
    pub op: Op,
    /// `None` for fire-and-forget
    pub reply: Option<ReplySender>,
}

/// Default capacity of the control → data queue
pub const MESSAGE_QUEUE_CAPACITY: usize = 256;

/// Create a message channel (producer/consumer pair)
///
/// - Producer: control plane
/// - Consumer: data plane
pub fn message_channel(capacity: usize) -> (rtrb::Producer<Message>, rtrb::Consumer<Message>) {
    rtrb::RingBuffer::new(capacity.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        let (mut tx, mut rx) = message_channel(4);
        tx.push(Message {
            target: DeviceId::new(1),
            op: Op::SetUplinkDeadline(42),
            reply: None,
        })
        .ok()
        .unwrap();

        let msg = rx.pop().ok().unwrap();
        assert_eq!(msg.target, DeviceId::new(1));
        assert!(matches!(msg.op, Op::SetUplinkDeadline(42)));
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_bounded_capacity() {
        let (mut tx, _rx) = message_channel(1);
        let msg = || Message {
            target: DeviceId::new(0),
            op: Op::GetLatency,
            reply: None,
        };
        assert!(tx.push(msg()).is_ok());
        assert!(tx.push(msg()).is_err());
    }

    #[test]
    fn test_op_size() {
        // Keep the payload fixed and small; large data must be boxed or chunked
        let size = std::mem::size_of::<Op>();
        assert!(size <= 40, "Op is {} bytes, expected <= 40", size);
    }
}
