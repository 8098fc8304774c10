//! Named gain registry shared between the pipeline and policy code
//!
//! Ownership is explicit: [`VolumeProxy::acquire`] hands out another owner,
//! [`VolumeProxy::release`] gives one back, and the last release tears down
//! hooks and subscribers. Nothing is process-global.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::channel::{Receiver, Sender};

/// One named gain value
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeEntry {
    pub name: String,
    pub gain: f32,
}

/// Synchronous hook run before a value is stored; may alter it
pub type ChangingHook = Box<dyn Fn(&mut VolumeEntry) + Send>;

#[derive(Default)]
struct ProxyInner {
    volumes: HashMap<String, f32>,
    changing: Vec<ChangingHook>,
    subscribers: Vec<Sender<VolumeEntry>>,
}

/// Shared handle to the registry
pub struct VolumeProxy {
    inner: Arc<Mutex<ProxyInner>>,
}

impl VolumeProxy {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ProxyInner::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProxyInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Another owner of the same registry
    pub fn acquire(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }

    /// Give up this owner; returns true if it was the last one
    pub fn release(self) -> bool {
        match Arc::into_inner(self.inner) {
            Some(inner) => {
                let inner = inner.into_inner().unwrap_or_else(PoisonError::into_inner);
                log::debug!(
                    "Volume proxy released ({} entries, {} subscribers)",
                    inner.volumes.len(),
                    inner.subscribers.len()
                );
                true
            }
            None => false,
        }
    }

    pub fn get_gain(&self, name: &str) -> Option<f32> {
        self.lock().volumes.get(name).copied()
    }

    /// Store a gain
    ///
    /// With `allow_update`, changing hooks run first and may alter the
    /// value. Subscribers are notified when the entry is new or the stored
    /// value changed. Hooks must not call back into the proxy.
    pub fn set_gain(&self, name: &str, gain: f32, allow_update: bool) {
        let mut guard = self.lock();
        let ProxyInner {
            volumes,
            changing,
            subscribers,
        } = &mut *guard;

        let mut changed = false;
        let stored = volumes.entry(name.to_string()).or_insert_with(|| {
            changed = true;
            gain
        });

        if allow_update {
            let old = *stored;
            let mut entry = VolumeEntry {
                name: name.to_string(),
                gain,
            };
            for hook in changing.iter() {
                hook(&mut entry);
            }
            *stored = entry.gain;
            changed |= *stored != old;
        }

        changed |= *stored != gain;
        if !allow_update {
            *stored = gain;
        }

        if changed {
            let entry = VolumeEntry {
                name: name.to_string(),
                gain: *stored,
            };
            subscribers.retain(|tx| tx.send(entry.clone()).is_ok());
        }
    }

    pub fn on_changing(&self, hook: ChangingHook) {
        self.lock().changing.push(hook);
    }

    /// Receive a [`VolumeEntry`] for every change
    pub fn subscribe(&self) -> Receiver<VolumeEntry> {
        let (tx, rx) = crossbeam::channel::unbounded();
        self.lock().subscribers.push(tx);
        rx
    }
}

impl Default for VolumeProxy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entry_notifies() {
        let proxy = VolumeProxy::new();
        let rx = proxy.subscribe();

        proxy.set_gain("sink.hw", 0.5, true);
        assert_eq!(proxy.get_gain("sink.hw"), Some(0.5));
        assert_eq!(rx.try_recv().unwrap().gain, 0.5);
    }

    #[test]
    fn test_unchanged_value_is_silent() {
        let proxy = VolumeProxy::new();
        proxy.set_gain("sink.hw", 0.5, true);
        let rx = proxy.subscribe();

        proxy.set_gain("sink.hw", 0.5, true);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_changing_hook_alters_value() {
        let proxy = VolumeProxy::new();
        proxy.on_changing(Box::new(|entry| entry.gain = entry.gain.min(0.8)));
        proxy.set_gain("sink.hw", 0.2, true);
        let rx = proxy.subscribe();

        proxy.set_gain("sink.hw", 1.0, true);
        assert_eq!(proxy.get_gain("sink.hw"), Some(0.8));
        assert_eq!(rx.try_recv().unwrap().gain, 0.8);
    }

    #[test]
    fn test_no_update_skips_hooks() {
        let proxy = VolumeProxy::new();
        proxy.on_changing(Box::new(|entry| entry.gain = 0.0));
        proxy.set_gain("sink.hw", 0.3, false);
        proxy.set_gain("sink.hw", 0.6, false);
        assert_eq!(proxy.get_gain("sink.hw"), Some(0.6));
    }

    #[test]
    fn test_last_release_tears_down() {
        let proxy = VolumeProxy::new();
        let other = proxy.acquire();
        let rx = proxy.subscribe();

        assert!(!proxy.release());
        other.set_gain("a", 1.0, true);
        assert!(rx.try_recv().is_ok());

        assert!(other.release());
        // Subscriber senders are gone with the registry
        assert!(rx.recv().is_err());
    }
}
