//! Per-layer buffering and the side-info metadata channel
//!
//! - [`ByteQueue`]: fixed-capacity byte FIFO owned by one layer on the data
//!   plane. Capacity is allocated up front; pushes never grow it.
//! - [`SideInfoQueue`]: lock-free bounded metadata queue paired with the
//!   downlink stream, shared through a [`SideInfoHandle`] and read by at most
//!   one [`SideInfoConsumer`] at a time.

use basedrop::Shared;
use crossbeam::queue::ArrayQueue;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::gc::gc_handle;

/// Fixed-capacity FIFO of audio bytes
#[derive(Debug)]
pub struct ByteQueue {
    buf: VecDeque<u8>,
    capacity: usize,
}

impl ByteQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append as much of `data` as fits; returns bytes accepted
    pub fn push(&mut self, data: &[u8]) -> usize {
        let room = self.capacity - self.buf.len();
        let n = room.min(data.len());
        self.buf.extend(&data[..n]);
        n
    }

    /// Move up to `max` bytes into `out` without growing it
    pub fn pop_into(&mut self, out: &mut Vec<u8>, max: usize) -> usize {
        let room = out.capacity() - out.len();
        let n = max.min(room).min(self.buf.len());
        out.extend(self.buf.drain(..n));
        n
    }

    /// Drop up to `n` bytes from the front
    pub fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.buf.len());
        self.buf.drain(..n);
        n
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Per-frame auxiliary information travelling next to the downlink audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SideInfo {
    /// Frame counter of the audio this entry describes
    pub frame: u64,
    /// Algorithm-defined flags (e.g. bad-frame indicator)
    pub flags: u32,
}

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// Bounded lock-free side-info queue
pub struct SideInfoQueue {
    id: u64,
    queue: ArrayQueue<SideInfo>,
    claimed: AtomicBool,
}

/// Shared handle to a side-info queue
///
/// Clone on the data plane is an atomic increment; the final drop is
/// deferred to the GC thread.
pub type SideInfoHandle = Shared<SideInfoQueue>;

impl SideInfoQueue {
    /// Create a queue and wrap it in a shareable handle
    pub fn create(capacity: usize) -> SideInfoHandle {
        Shared::new(
            &gc_handle(),
            Self {
                id: NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed),
                queue: ArrayQueue::new(capacity.max(1)),
                claimed: AtomicBool::new(false),
            },
        )
    }

    /// Identity of this queue (stable across handle clones)
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue an entry; a full queue hands the entry back
    pub fn push(&self, info: SideInfo) -> Result<(), SideInfo> {
        self.queue.push(info)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Become the single reader of this queue
    ///
    /// Returns `None` while another consumer holds the claim.
    pub fn claim(handle: &SideInfoHandle) -> Option<SideInfoConsumer> {
        handle
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(SideInfoConsumer {
            handle: handle.clone(),
        })
    }
}

/// Exclusive reader of a side-info queue; releases the claim on drop
pub struct SideInfoConsumer {
    handle: SideInfoHandle,
}

impl SideInfoConsumer {
    pub fn pop(&self) -> Option<SideInfo> {
        self.handle.queue.pop()
    }

    pub fn queue_id(&self) -> u64 {
        self.handle.id
    }
}

impl Drop for SideInfoConsumer {
    fn drop(&mut self) {
        self.handle.claimed.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_queue_caps_at_capacity() {
        let mut q = ByteQueue::new(8);
        assert_eq!(q.push(&[1; 6]), 6);
        assert_eq!(q.push(&[2; 6]), 2);
        assert_eq!(q.len(), 8);
    }

    #[test]
    fn test_byte_queue_pop_respects_out_capacity() {
        let mut q = ByteQueue::new(16);
        q.push(&[7; 16]);

        let mut out = Vec::with_capacity(4);
        let n = q.pop_into(&mut out, 100);
        assert_eq!(n, out.len());
        assert!(n <= out.capacity());
        assert_eq!(q.len(), 16 - n);
    }

    #[test]
    fn test_byte_queue_discard_and_clear() {
        let mut q = ByteQueue::new(16);
        q.push(&[1, 2, 3, 4]);
        assert_eq!(q.discard(3), 3);
        assert_eq!(q.len(), 1);
        q.clear();
        assert!(q.is_empty());
    }

    #[test]
    fn test_side_info_single_consumer() {
        let handle = SideInfoQueue::create(4);
        let first = SideInfoQueue::claim(&handle).expect("first claim");
        assert!(SideInfoQueue::claim(&handle).is_none());
        assert!(handle.is_claimed());

        drop(first);
        assert!(!handle.is_claimed());
        assert!(SideInfoQueue::claim(&handle).is_some());
    }

    #[test]
    fn test_side_info_fifo() {
        let handle = SideInfoQueue::create(2);
        handle.push(SideInfo { frame: 1, flags: 0 }).unwrap();
        handle.push(SideInfo { frame: 2, flags: 1 }).unwrap();
        assert!(handle.push(SideInfo { frame: 3, flags: 0 }).is_err());

        let consumer = SideInfoQueue::claim(&handle).unwrap();
        assert_eq!(consumer.pop().map(|i| i.frame), Some(1));
        assert_eq!(consumer.pop().map(|i| i.frame), Some(2));
        assert_eq!(consumer.pop(), None);
        assert_eq!(consumer.queue_id(), handle.id());
    }
}
