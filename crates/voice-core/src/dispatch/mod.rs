//! Cross-thread message dispatch
//!
//! The control plane (device creation, state changes, re-wiring) runs on the
//! caller's thread. The data plane (audio, latency queries, rewinds) runs on
//! a dedicated IO thread. They talk only through a lock-free SPSC queue:
//!
//! ```text
//! Control plane                     IO thread
//! ┌────────────────┐  Message       ┌──────────────────────────┐
//! │ Dispatcher     │ ─────────────> │ DataPlane                │
//! │ post() / send()│  (rtrb SPSC)   │  slot table of handlers  │
//! │                │ <───────────── │  deferred queue          │
//! └────────────────┘  oneshot reply └──────────────────────────┘
//! ```
//!
//! `post` is fire-and-forget. `send` blocks the control thread until the
//! data plane answers; the data plane itself never blocks.

mod data_plane;
mod handler;
mod io_thread;
mod message;

pub use data_plane::{DataPlane, IoContext};
pub use handler::{DeviceHandler, IoCore, MasterRef, MAX_INPUTS};
pub use io_thread::IoThread;
pub use message::{
    message_channel, DispatchResult, Message, Op, Reply, ReplySender, MESSAGE_QUEUE_CAPACITY,
};

use std::thread::Thread;

use rtrb::Producer;
use tokio::sync::oneshot;

use crate::error::DispatchError;
use crate::types::DeviceId;

/// Control-plane end of the message queue
pub struct Dispatcher {
    producer: Producer<Message>,
    waker: Option<Thread>,
}

impl Dispatcher {
    pub fn new(producer: Producer<Message>, waker: Option<Thread>) -> Self {
        Self { producer, waker }
    }

    /// Queue `op` for `target` without waiting
    pub fn post(&mut self, target: DeviceId, op: Op) -> Result<(), DispatchError> {
        self.push(Message {
            target,
            op,
            reply: None,
        })
    }

    /// Queue `op` for `target` and block until the data plane answers
    pub fn send(&mut self, target: DeviceId, op: Op) -> DispatchResult {
        let (tx, rx) = oneshot::channel();
        self.push(Message {
            target,
            op,
            reply: Some(tx),
        })?;
        rx.blocking_recv().unwrap_or(Err(DispatchError::Disconnected))
    }

    fn push(&mut self, message: Message) -> Result<(), DispatchError> {
        if self.producer.is_abandoned() {
            return Err(DispatchError::Disconnected);
        }
        self.producer.push(message).map_err(|_| DispatchError::QueueFull)?;
        if let Some(waker) = &self.waker {
            waker.unpark();
        }
        Ok(())
    }
}
