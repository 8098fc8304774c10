//! RT-safe deferred deallocation
//!
//! Audio chunks and shared handles cross from the control plane into the
//! data plane and are often dropped there. Freeing memory on the data plane
//! can hit the allocator's slow path, so these values are wrapped in
//! `basedrop` smart pointers: a drop on the data plane only enqueues the
//! pointer, and a background collector thread frees it.

use basedrop::{Collector, Handle, Owned};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Audio bytes handed across planes
///
/// Owned by whoever holds it; dropping it anywhere defers the free.
pub type Chunk = Owned<Vec<u8>>;

/// Collector period; reclamation latency does not matter
const COLLECT_PERIOD: Duration = Duration::from_millis(50);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("voice-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, it lives on this thread only
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Voice GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_PERIOD);
            }
        })
        .expect("Failed to spawn voice GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle for creating deferred-drop allocations
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

/// Chunk holding a copy of `data`
///
/// Allocates: call from the control plane only.
pub fn chunk_from(data: &[u8]) -> Chunk {
    Owned::new(&gc_handle(), data.to_vec())
}

/// Empty chunk with room for `capacity` bytes, used as a read buffer
///
/// Allocates: call from the control plane only.
pub fn chunk_with_capacity(capacity: usize) -> Chunk {
    Owned::new(&gc_handle(), Vec::with_capacity(capacity))
}
