//! IO thread hosting the data plane
//!
//! The thread drains the message queue, then parks until the control plane
//! unparks it or the period elapses. Shutdown hands the [`DataPlane`] back so
//! any handlers still attached are dropped on the calling thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crate::error::PipelineError;

use super::data_plane::DataPlane;

pub struct IoThread {
    handle: Option<JoinHandle<DataPlane>>,
    running: Arc<AtomicBool>,
}

impl IoThread {
    pub fn spawn(mut data_plane: DataPlane, period: Duration) -> Result<Self, PipelineError> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("voice-io".to_string())
            .spawn(move || {
                log::info!("[DISPATCH] IO thread started (period {:?})", period);
                while flag.load(Ordering::Acquire) {
                    data_plane.pump();
                    thread::park_timeout(period);
                }
                // Answer whatever raced with shutdown
                data_plane.pump();
                log::info!("[DISPATCH] IO thread stopped");
                data_plane
            })
            .map_err(|e| PipelineError::ThreadSpawn(e.to_string()))?;

        Ok(Self {
            handle: Some(handle),
            running,
        })
    }

    /// Handle used to wake the thread after pushing a message
    pub fn waker(&self) -> Option<Thread> {
        self.handle.as_ref().map(|h| h.thread().clone())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Stop the thread and take the data plane back
    ///
    /// Returns `None` if already stopped or the thread panicked.
    pub fn shutdown(&mut self) -> Option<DataPlane> {
        let handle = self.handle.take()?;
        self.running.store(false, Ordering::Release);
        handle.thread().unpark();
        match handle.join() {
            Ok(data_plane) => Some(data_plane),
            Err(_) => {
                log::error!("[DISPATCH] IO thread panicked");
                None
            }
        }
    }
}

impl Drop for IoThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}
